//! Keyword overlap between instructions.
//!
//! Each instruction is reduced to its set of lower-cased alphanumeric
//! keywords, minus common English stop words; the similarity is the Jaccard index of the two sets:
//!
//! ```text
//! J(A, B) = |A ∩ B| / |A ∪ B|
//! ```
//!
//! It is a diagnostic only. Example selection stays in discovery order.
//!
//! # Example
//!
//! ```rust
//! use planbench_memory::similarity::keyword_jaccard;
//!
//! let s = keyword_jaccard("Pick up the red cube", "pick the blue cube");
//! assert!(s > 0.0 && s < 1.0);
//! ```

use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "at", "by", "for", "from", "in", "into", "is", "it", "of", "on", "onto", "the", "then",
    "to", "up", "with",
];

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Jaccard index of the keyword sets of `a` and `b`, in `[0.0, 1.0]`.
///
/// Two texts without any keyword are considered unrelated (0.0).
pub fn keyword_jaccard(a: &str, b: &str) -> f64 {
    let ka = keywords(a);
    let kb = keywords(b);
    let union = ka.union(&kb).count();
    if union == 0 {
        return 0.0;
    }
    ka.intersection(&kb).count() as f64 / union as f64
}
