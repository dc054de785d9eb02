//! Episode selection.
//!
//! Both helpers return dataset indexes in ascending order so evaluation
//! keeps the dataset's own ordering.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;

/// Pick up to `per_group` indexes from every group, seeded.
///
/// `groups[i]` is the group label (task type or variation) of dataset item
/// `i`. Groups are visited in order of first appearance with one shared
/// generator, so the same `seed` always yields the same selection. A group
/// with no more than `per_group` items is taken whole.
pub fn select_per_group(groups: &[String], per_group: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<(&str, Vec<usize>)> = Vec::new();
    for (idx, label) in groups.iter().enumerate() {
        match order.iter_mut().find(|(l, _)| *l == label.as_str()) {
            Some((_, members)) => members.push(idx),
            None => order.push((label.as_str(), vec![idx])),
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut selected = Vec::new();
    for (_, members) in order {
        if members.len() <= per_group {
            selected.extend(members);
        } else {
            selected.extend(sample(&mut rng, members.len(), per_group).into_iter().map(|i| members[i]));
        }
    }
    selected.sort_unstable();
    selected
}

/// Keep `ceil(len * ratio)` evenly spaced entries of `indexes`.
///
/// Ratios outside `(0, 1)` leave the list untouched.
pub fn down_sample(indexes: &[usize], ratio: f64) -> Vec<usize> {
    if !(ratio > 0.0 && ratio < 1.0) || indexes.is_empty() {
        return indexes.to_vec();
    }
    let len = indexes.len();
    let keep = ((len as f64) * ratio).ceil() as usize;
    (0..keep).map(|i| indexes[i * len / keep]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(spec: &[(&str, usize)]) -> Vec<String> {
        spec.iter()
            .flat_map(|(l, n)| std::iter::repeat_n(l.to_string(), *n))
            .collect()
    }

    #[test]
    fn caps_each_group_and_sorts() {
        let groups = labels(&[("pick", 10), ("stack", 3), ("wipe", 8)]);
        let picked = select_per_group(&groups, 5, 42);
        assert_eq!(picked.len(), 5 + 3 + 5);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(picked.iter().filter(|&&i| groups[i] == "stack").count(), 3);
        assert_eq!(picked.iter().filter(|&&i| groups[i] == "pick").count(), 5);
    }

    #[test]
    fn same_seed_same_selection() {
        let groups = labels(&[("a", 20), ("b", 20)]);
        assert_eq!(select_per_group(&groups, 4, 7), select_per_group(&groups, 4, 7));
    }

    #[test]
    fn interleaved_groups() {
        let groups: Vec<String> = ["a", "b", "a", "b", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(select_per_group(&groups, 5, 0), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn down_sample_is_evenly_spaced() {
        let all: Vec<usize> = (0..10).collect();
        assert_eq!(down_sample(&all, 0.5), vec![0, 2, 4, 6, 8]);
        assert_eq!(down_sample(&all, 0.25), vec![0, 3, 6]);
        assert_eq!(down_sample(&all, 1.0), all);
        assert!(down_sample(&[], 0.5).is_empty());
    }
}
