//! [`VariantProfile`] – the per-benchmark differences of the evaluator loop.
//!
//! | | ALFRED | Manipulation |
//! |---|---|---|
//! | invalid planner output | reward −1, re-plan until the invalid budget is spent | ends the episode like an empty plan |
//! | failed action | stop executing the plan and re-plan | keep executing |
//! | per-step detail lists | rewards only | rewards, action success, executed actions, step success |
//! | memory categories | eval set × task type | task variation |
//! | memory for the `base` set | never | yes |
//! | resume from a previous run | no | yes |

use std::path::{Path, PathBuf};

use planbench_types::{CategoryKey, EnvKind, MemoryMode};

/// The seven ALFRED task types.
pub const ALFRED_TASK_TYPES: [&str; 7] = [
    "pick_and_place_simple",
    "pick_clean_then_place_in_recep",
    "pick_heat_then_place_in_recep",
    "pick_cool_then_place_in_recep",
    "pick_two_obj_and_place",
    "look_at_obj_in_light",
    "pick_and_place_with_movable_recep",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantProfile {
    kind: EnvKind,
}

impl VariantProfile {
    pub fn new(kind: EnvKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> EnvKind {
        self.kind
    }

    /// Invalid output is retried rather than ending the episode.
    pub fn replans_on_invalid(&self) -> bool {
        self.kind == EnvKind::Alfred
    }

    pub fn replans_on_failed_action(&self) -> bool {
        self.kind == EnvKind::Alfred
    }

    pub fn records_step_details(&self) -> bool {
        self.kind == EnvKind::Manipulation
    }

    /// Failed actions count towards `num_invalid_actions`.
    pub fn counts_failed_actions(&self) -> bool {
        self.kind == EnvKind::Alfred
    }

    pub fn resumes(&self) -> bool {
        self.kind == EnvKind::Manipulation
    }

    pub fn loads_memory_for(&self, eval_set: &str) -> bool {
        !(self.kind == EnvKind::Alfred && eval_set == "base")
    }

    /// Category of one episode given the label its environment reported.
    pub fn episode_category(&self, eval_set: &str, label: &str) -> CategoryKey {
        match self.kind {
            EnvKind::Alfred if label.is_empty() => CategoryKey::eval_set(eval_set),
            EnvKind::Alfred => CategoryKey::eval_set_task(eval_set, label),
            EnvKind::Manipulation => CategoryKey::variation(label),
        }
    }

    /// Categories whose memory is preloaded before an evaluation set runs.
    pub fn memory_categories(&self, eval_set: &str, env_categories: &[String]) -> Vec<CategoryKey> {
        match self.kind {
            EnvKind::Alfred => ALFRED_TASK_TYPES
                .iter()
                .map(|t| CategoryKey::eval_set_task(eval_set, *t))
                .collect(),
            EnvKind::Manipulation => env_categories.iter().map(CategoryKey::variation).collect(),
        }
    }

    /// Log directory of one evaluation set; results go to `<log_path>/results`.
    pub fn log_path(&self, root: &Path, model_name: &str, exp_name: &str, mode: MemoryMode, eval_set: &str) -> PathBuf {
        let model_short = model_name.rsplit('/').next().unwrap_or(model_name);
        let mut path = root.join(self.kind.log_dir_name());
        match self.kind {
            EnvKind::Alfred if exp_name.is_empty() => path.push(model_short),
            EnvKind::Alfred => path.push(format!("{model_short}_{exp_name}")),
            EnvKind::Manipulation => {
                path.push(model_short);
                path.push(format!("{}{exp_name}", mode.folder_prefix()));
            }
        }
        path.push(eval_set);
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alfred_categories_cover_every_task_type() {
        let p = VariantProfile::new(EnvKind::Alfred);
        let cats = p.memory_categories("common_sense", &[]);
        assert_eq!(cats.len(), 7);
        assert!(cats.contains(&CategoryKey::eval_set_task("common_sense", "look_at_obj_in_light")));
        assert!(!p.loads_memory_for("base"));
        assert!(p.loads_memory_for("spatial"));
    }

    #[test]
    fn manipulation_categories_come_from_env() {
        let p = VariantProfile::new(EnvKind::Manipulation);
        let cats = p.memory_categories("base", &["pick_cube_shape".to_string()]);
        assert_eq!(cats, vec![CategoryKey::variation("pick_cube_shape")]);
        assert!(p.loads_memory_for("base"));
        assert!(p.resumes());
    }

    #[test]
    fn episode_category_per_kind() {
        let alf = VariantProfile::new(EnvKind::Alfred);
        assert_eq!(
            alf.episode_category("base", "pick_two_obj_and_place"),
            CategoryKey::eval_set_task("base", "pick_two_obj_and_place")
        );
        assert_eq!(alf.episode_category("base", ""), CategoryKey::eval_set("base"));
        let man = VariantProfile::new(EnvKind::Manipulation);
        assert_eq!(man.episode_category("base", "stack_cubes_color"), CategoryKey::variation("stack_cubes_color"));
    }

    #[test]
    fn log_paths() {
        let root = Path::new("running");
        let alf = VariantProfile::new(EnvKind::Alfred);
        assert_eq!(
            alf.log_path(root, "openai/gpt-4o", "", MemoryMode::Baseline, "base"),
            root.join(EnvKind::Alfred.log_dir_name()).join("gpt-4o").join("base")
        );
        assert_eq!(
            alf.log_path(root, "gpt-4o", "run1", MemoryMode::FailureOnly, "spatial"),
            root.join(EnvKind::Alfred.log_dir_name()).join("gpt-4o_run1").join("spatial")
        );
        let man = VariantProfile::new(EnvKind::Manipulation);
        let path = man.log_path(root, "Qwen/Qwen2-VL", "exp", MemoryMode::FailureOnly, "base");
        assert!(path.starts_with(root.join(EnvKind::Manipulation.log_dir_name()).join("Qwen2-VL")));
        assert!(path.ends_with("base"));
    }
}
