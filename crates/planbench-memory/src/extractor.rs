//! Memory Extractor.
//!
//! Turns the episode records of a previous run into few-shot examples. A
//! record becomes an example when its category matches, its success flag is
//! exactly 0 or 1, and its raw planner output contains at least one
//! parseable JSON line. Selection is in file-name order, capped per kind.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use planbench_memory::extractor::{ExampleCaps, load_memory_from_results};
//! use planbench_types::{CategoryKey, EnvKind};
//!
//! let memory = load_memory_from_results(
//!     Path::new("running/eb_manipulation/gpt-4o/baseline4_re/base/results"),
//!     EnvKind::Manipulation,
//!     &CategoryKey::variation("pick_cube_shape"),
//!     ExampleCaps::default(),
//! );
//! assert!(memory.success.len() <= 3);
//! ```

use std::path::Path;

use planbench_types::{CategoryKey, EnvKind, EpisodeResult};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::results::{StoredEpisode, load_episode_records};

const MAN_SUCCESS_PREAMBLE: &str = "=== SUCCESSFUL EXAMPLE ===\nThis is a successful example from a similar task type (though not identical to the current task). Follow this pattern to complete your task.\n\n";

const MAN_FAILURE_PREAMBLE: &str = "=== FAILED EXAMPLE ===\n**IMPORTANT**: This is a FAILED example from a similar task type to your current task (though not identical). This example failed to complete the task. You must:\n1. Carefully analyze the failure_analysis section below to understand why this similar task failed\n2. Identify the root causes of the failure (e.g., incorrect reasoning, wrong action sequence, positioning errors, gripper state issues)\n3. Learn from these mistakes and perform actions that avoid the same failures in your current task\n4. Use this failed example as a reference to understand what NOT to do, and adjust your plan accordingly\n\nPay close attention to the executed actions, their outcomes, and the failure analysis. When performing your current task, be especially careful to avoid making the same mistakes shown in this failed example.\n\n";

const MAN_FAILURE_NOTICE: &str = "[IMPORTANT: This is a FAILED example from a SIMILAR task type (though not identical to your current task). The reasoning below was the initial plan for that similar task, but it did not succeed. Use this as a reference to understand what went wrong and avoid making the same mistakes in your current task. Check the failure_analysis section to understand why it failed and what went wrong.]\n\n";

const MAN_FAILURE_NOTE: &str = "This task failed. Analyze the failed_steps below to understand what went wrong. Pay attention to the executed actions and their outcomes.";

const MAN_ANALYSIS_HINT: &str = "Consider: Were the actions executed correctly but the task still failed? Were there issues with object positioning, gripper state, or movement sequence? Compare these failed actions with successful examples to identify the differences.";

const ALF_SUCCESS_PREAMBLE: &str = "=== SUCCESSFUL EXAMPLE ===\nThis is a successful example from a similar task type. Follow this pattern to complete your task.\n\n";

const ALF_FAILURE_PREAMBLE: &str = "=== FAILED EXAMPLE ===\nThis is a FAILED example from a similar task type. **IMPORTANT**: This example failed to complete the task. Analyze why it failed and avoid making the same mistakes.\n\n";

const ALF_FAILURE_NOTICE: &str = "[IMPORTANT: This is a FAILED example from a SIMILAR task type. The reasoning below was the initial plan, but it did not succeed. Use this as a reference to understand what went wrong and avoid making the same mistakes.]\n\n";

const ALF_FAILURE_NOTE: &str = "This task failed. Analyze why it failed and avoid similar mistakes.";

/// At most this many zero-success steps are listed per failure.
const MAX_FAILED_STEPS: usize = 3;
/// Characters of the last reasoning kept in `final_reasoning`.
const FINAL_REASONING_CHARS: usize = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bounds on how many examples of each kind are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExampleCaps {
    pub max_success: usize,
    pub max_failure: usize,
}

impl Default for ExampleCaps {
    fn default() -> Self {
        Self {
            max_success: 3,
            max_failure: 3,
        }
    }
}

/// Formatted examples for one category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryExamples {
    pub success: Vec<String>,
    pub failure: Vec<String>,
}

impl MemoryExamples {
    pub fn is_empty(&self) -> bool {
        self.success.is_empty() && self.failure.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Build success/failure examples for `category` from the run in `dir`.
///
/// Never fails: a missing directory, corrupt records and empty outputs all
/// simply contribute nothing.
pub fn load_memory_from_results(
    dir: &Path,
    kind: EnvKind,
    category: &CategoryKey,
    caps: ExampleCaps,
) -> MemoryExamples {
    let records = load_episode_records(dir, kind);
    let mut memory = MemoryExamples::default();

    for record in records.iter().filter(|r| category.matches(&r.result)) {
        let success = if record.result.is_success() {
            if memory.success.len() >= caps.max_success {
                continue;
            }
            true
        } else if record.result.is_failure() {
            if memory.failure.len() >= caps.max_failure {
                continue;
            }
            false
        } else {
            continue;
        };

        match create_memory_example(kind, record, success) {
            Some(example) if success => memory.success.push(example),
            Some(example) => memory.failure.push(example),
            None => debug!(episode = record.number, "no usable planner output, example omitted"),
        }
    }

    debug!(
        %category,
        success = memory.success.len(),
        failure = memory.failure.len(),
        "memory loaded"
    );
    memory
}

// ─────────────────────────────────────────────────────────────────────────────
// Formatting
// ─────────────────────────────────────────────────────────────────────────────

/// Render one stored episode as a preamble-wrapped example.
///
/// Returns `None` when the planner output holds no parseable JSON line.
pub fn create_memory_example(kind: EnvKind, record: &StoredEpisode, success: bool) -> Option<String> {
    let steps = parse_output_lines(&record.planner_output);
    let first = steps.first()?;

    let mut header = format!("Human Instruction: {}", record.result.instruction);
    if kind == EnvKind::Manipulation {
        header.push_str("\nInput: {}");
    }

    let mut reasoning = first_reasoning(kind, first);
    if !success {
        let notice = match kind {
            EnvKind::Alfred => ALF_FAILURE_NOTICE,
            EnvKind::Manipulation => MAN_FAILURE_NOTICE,
        };
        reasoning = format!("{notice}{reasoning}");
    }

    let default_plan = match kind {
        EnvKind::Alfred => Value::Array(Vec::new()),
        EnvKind::Manipulation => Value::String(String::new()),
    };

    let mut output = Map::new();
    output.insert(
        "visual_state_description".into(),
        first
            .get("visual_state_description")
            .cloned()
            .unwrap_or_else(|| Value::String(String::new())),
    );
    output.insert("reasoning_and_reflection".into(), Value::String(reasoning));
    output.insert(
        "executable_plan".into(),
        first.get("executable_plan").cloned().unwrap_or(default_plan),
    );
    if !success {
        let analysis = match kind {
            EnvKind::Alfred => alfred_failure_analysis(&record.result, &steps),
            EnvKind::Manipulation => manipulation_failure_analysis(&record.result, &steps),
        };
        output.insert("failure_analysis".into(), Value::Object(analysis));
    }

    let body = match to_pretty_json(&Value::Object(output)) {
        Ok(body) => body,
        Err(e) => {
            warn!(episode = record.number, error = %e, "cannot render example");
            return None;
        }
    };

    let preamble = match (kind, success) {
        (EnvKind::Alfred, true) => ALF_SUCCESS_PREAMBLE,
        (EnvKind::Alfred, false) => ALF_FAILURE_PREAMBLE,
        (EnvKind::Manipulation, true) => MAN_SUCCESS_PREAMBLE,
        (EnvKind::Manipulation, false) => MAN_FAILURE_PREAMBLE,
    };
    Some(format!("{preamble}{header}\nOutput: {body}"))
}

/// One JSON object per non-blank line; anything else is dropped.
fn parse_output_lines(raw: &str) -> Vec<Map<String, Value>> {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match serde_json::from_str::<Value>(l) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
        .collect()
}

fn string_field(step: &Map<String, Value>, key: &str) -> String {
    match step.get(key) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn first_reasoning(kind: EnvKind, step: &Map<String, Value>) -> String {
    let reasoning = string_field(step, "reasoning_and_reflection");
    if reasoning.is_empty() && kind == EnvKind::Alfred {
        return string_field(step, "reasoning");
    }
    reasoning
}

fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn manipulation_failure_analysis(result: &EpisodeResult, steps: &[Map<String, Value>]) -> Map<String, Value> {
    let mut analysis = Map::new();
    analysis.insert("total_steps".into(), json!(result.executed_actions.len()));
    analysis.insert("final_task_success".into(), json!(result.success_flag()));
    analysis.insert("note".into(), json!(MAN_FAILURE_NOTE));

    let failed: Vec<Value> = result
        .executed_actions
        .iter()
        .zip(&result.step_task_success)
        .enumerate()
        .filter(|(_, (_, task_success))| **task_success == 0.0)
        .take(MAX_FAILED_STEPS)
        .map(|(idx, (action, task_success))| {
            json!({
                "step": idx + 1,
                "executed_action": action,
                "action_success": result.action_success.get(idx),
                "task_success": task_success,
            })
        })
        .collect();
    if !failed.is_empty() {
        analysis.insert("failed_steps".into(), Value::Array(failed));
        analysis.insert("analysis_hint".into(), json!(MAN_ANALYSIS_HINT));
    }

    if steps.len() > 1 {
        let last = steps.last().map(|s| string_field(s, "reasoning_and_reflection")).unwrap_or_default();
        if !last.is_empty() {
            analysis.insert("final_reasoning".into(), json!(truncate_chars(&last, FINAL_REASONING_CHARS)));
        }
    }
    analysis
}

fn alfred_failure_analysis(result: &EpisodeResult, steps: &[Map<String, Value>]) -> Map<String, Value> {
    let mut analysis = Map::new();
    analysis.insert("total_steps".into(), json!(result.num_steps));
    analysis.insert("num_invalid_actions".into(), json!(result.num_invalid_actions));
    analysis.insert("final_task_success".into(), json!(result.success_flag()));
    analysis.insert("note".into(), json!(ALF_FAILURE_NOTE));

    if steps.len() > 1 {
        let last = steps.last().map(|s| first_reasoning(EnvKind::Alfred, s)).unwrap_or_default();
        if !last.is_empty() {
            analysis.insert("final_reasoning".into(), json!(truncate_chars(&last, FINAL_REASONING_CHARS)));
        }
    }
    analysis
}

/// Pretty JSON with 4-space indentation, non-ASCII left unescaped.
fn to_pretty_json(value: &Value) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
