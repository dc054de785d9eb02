//! Run-level aggregate written after every evaluation set.
//!
//! ALFRED summaries also carry the mean of every numeric per-episode field
//! and a breakdown by task type.

use std::collections::BTreeMap;
use std::path::PathBuf;

use planbench_types::{EnvKind, EpisodeResult, MemoryMode};
use serde::{Deserialize, Serialize};

/// Aggregate metrics over the episodes of one evaluation set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub save_path: PathBuf,
    pub total_num_tasks: usize,
    pub num_success: usize,
    pub success_rate: f64,
    pub avg_planner_steps: f64,
    pub avg_num_steps: f64,
    pub avg_task_progress: f64,
    /// Episodes with at least one unparseable planner output.
    pub output_format_error: usize,
    pub memory_mode: MemoryMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_per_group: Option<usize>,
    pub previous_results_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_averages: Option<EpisodeAverages>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub task_types: BTreeMap<String, TaskTypeSummary>,
}

/// Mean of each numeric per-episode field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeAverages {
    pub task_success: f64,
    pub task_progress: f64,
    pub avg_reward: f64,
    pub num_steps: f64,
    pub planner_steps: f64,
    pub planner_output_error: f64,
    pub num_invalid_actions: f64,
    pub num_invalid_action_ratio: f64,
    pub empty_plan: f64,
    pub episode_elapsed_seconds: f64,
}

impl EpisodeAverages {
    fn from_results(results: &[EpisodeResult]) -> Self {
        Self {
            task_success: mean(results, |r| r.task_success),
            task_progress: mean(results, |r| r.task_progress),
            avg_reward: mean(results, |r| r.avg_reward),
            num_steps: mean(results, |r| r.num_steps as f64),
            planner_steps: mean(results, |r| r.planner_steps as f64),
            planner_output_error: mean(results, |r| r.planner_output_error as f64),
            num_invalid_actions: mean(results, |r| r.num_invalid_actions as f64),
            num_invalid_action_ratio: mean(results, |r| r.num_invalid_action_ratio),
            empty_plan: mean(results, |r| f64::from(r.empty_plan)),
            episode_elapsed_seconds: mean(results, |r| r.episode_elapsed_seconds),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTypeSummary {
    pub num_tasks: usize,
    pub num_success: usize,
    pub success_rate: f64,
    pub avg_task_progress: f64,
}

impl RunSummary {
    /// Aggregate `results`. An empty slice gives all-zero rates.
    pub fn from_results(
        save_path: impl Into<PathBuf>,
        kind: EnvKind,
        results: &[EpisodeResult],
        memory_mode: MemoryMode,
        tasks_per_group: Option<usize>,
        previous_results_dir: Option<PathBuf>,
    ) -> Self {
        let total = results.len();
        let num_success = count_success(results.iter());
        let (episode_averages, task_types) = match kind {
            EnvKind::Alfred => (Some(EpisodeAverages::from_results(results)), by_task_type(results)),
            EnvKind::Manipulation => (None, BTreeMap::new()),
        };

        Self {
            save_path: save_path.into(),
            total_num_tasks: total,
            num_success,
            success_rate: if total == 0 { 0.0 } else { num_success as f64 / total as f64 },
            avg_planner_steps: mean(results, |r| r.planner_steps as f64),
            avg_num_steps: mean(results, |r| r.num_steps as f64),
            avg_task_progress: mean(results, |r| r.task_progress),
            output_format_error: results.iter().filter(|r| r.planner_output_error > 0).count(),
            memory_mode,
            tasks_per_group,
            previous_results_dir,
            episode_averages,
            task_types,
        }
    }
}

fn count_success<'a>(results: impl Iterator<Item = &'a EpisodeResult>) -> usize {
    results.filter(|r| r.task_success == 1.0).count()
}

fn by_task_type(results: &[EpisodeResult]) -> BTreeMap<String, TaskTypeSummary> {
    let mut groups: BTreeMap<String, Vec<&EpisodeResult>> = BTreeMap::new();
    for r in results.iter().filter(|r| !r.task_type.is_empty()) {
        groups.entry(r.task_type.clone()).or_default().push(r);
    }
    groups
        .into_iter()
        .map(|(task_type, group)| {
            let num_tasks = group.len();
            let num_success = count_success(group.iter().copied());
            let summary = TaskTypeSummary {
                num_tasks,
                num_success,
                success_rate: num_success as f64 / num_tasks as f64,
                avg_task_progress: group.iter().map(|r| r.task_progress).sum::<f64>() / num_tasks as f64,
            };
            (task_type, summary)
        })
        .collect()
}

fn mean(results: &[EpisodeResult], f: impl Fn(&EpisodeResult) -> f64) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(f).sum::<f64>() / results.len() as f64
}
