use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Benchmark environment a run is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EnvKind {
    /// ALFRED household tasks on AI2-THOR.
    #[default]
    #[serde(rename = "eb-alf")]
    Alfred,
    /// Tabletop manipulation on CoppeliaSim/RLBench.
    #[serde(rename = "eb-man")]
    Manipulation,
}

impl EnvKind {
    /// Identifier used on the command line (`env=eb-alf`).
    pub fn id(&self) -> &'static str {
        match self {
            EnvKind::Alfred => "eb-alf",
            EnvKind::Manipulation => "eb-man",
        }
    }

    /// Directory under `running/` where this environment's logs live.
    pub fn log_dir_name(&self) -> &'static str {
        match self {
            EnvKind::Alfred => "eb_alfred",
            EnvKind::Manipulation => "eb_manipulation",
        }
    }
}

impl fmt::Display for EnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for EnvKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eb-alf" => Ok(EnvKind::Alfred),
            "eb-man" => Ok(EnvKind::Manipulation),
            other => Err(ParseEnumError::new("environment", other)),
        }
    }
}

/// Which examples from a previous run are injected into the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    #[default]
    Baseline,
    FailureOnly,
    SuccessAndFailure,
    SuccessOnly,
}

impl MemoryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryMode::Baseline => "baseline",
            MemoryMode::FailureOnly => "failure_only",
            MemoryMode::SuccessAndFailure => "success_and_failure",
            MemoryMode::SuccessOnly => "success_only",
        }
    }

    /// Short prefix used when naming manipulation experiment folders
    /// (`baseline4_re`, `failure4_re`, ...).
    pub fn folder_prefix(&self) -> &'static str {
        match self {
            MemoryMode::Baseline => "baseline",
            MemoryMode::FailureOnly => "failure",
            MemoryMode::SuccessAndFailure => "all",
            MemoryMode::SuccessOnly => "success",
        }
    }

    pub fn uses_success(&self) -> bool {
        matches!(self, MemoryMode::SuccessOnly | MemoryMode::SuccessAndFailure)
    }

    pub fn uses_failure(&self) -> bool {
        matches!(self, MemoryMode::FailureOnly | MemoryMode::SuccessAndFailure)
    }
}

impl fmt::Display for MemoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "baseline" => Ok(MemoryMode::Baseline),
            "failure_only" => Ok(MemoryMode::FailureOnly),
            "success_and_failure" => Ok(MemoryMode::SuccessAndFailure),
            "success_only" => Ok(MemoryMode::SuccessOnly),
            other => Err(ParseEnumError::new("memory mode", other)),
        }
    }
}

/// Returned when a textual identifier does not name a known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Grouping key that partitions memory examples.
///
/// ALFRED groups by evaluation set and (optionally) task type; manipulation
/// groups by task variation. Keeping the parts separate avoids collisions
/// between names that themselves contain underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKey {
    EvalSet {
        eval_set: String,
        task_type: Option<String>,
    },
    Variation(String),
}

impl CategoryKey {
    pub fn eval_set(eval_set: impl Into<String>) -> Self {
        CategoryKey::EvalSet {
            eval_set: eval_set.into(),
            task_type: None,
        }
    }

    pub fn eval_set_task(eval_set: impl Into<String>, task_type: impl Into<String>) -> Self {
        CategoryKey::EvalSet {
            eval_set: eval_set.into(),
            task_type: Some(task_type.into()),
        }
    }

    pub fn variation(name: impl Into<String>) -> Self {
        CategoryKey::Variation(name.into())
    }

    /// `true` when `result` belongs to this category.
    pub fn matches(&self, result: &EpisodeResult) -> bool {
        match self {
            CategoryKey::EvalSet {
                eval_set,
                task_type,
            } => {
                result.eval_set == *eval_set
                    && task_type.as_ref().is_none_or(|t| result.task_type == *t)
            }
            CategoryKey::Variation(name) => result.task_variation == *name,
        }
    }

    /// Leading word of the most specific part of the key
    /// (`pick_cube_shape` → `pick`), used to look up base examples.
    pub fn family(&self) -> &str {
        let name = match self {
            CategoryKey::EvalSet {
                task_type: Some(t), ..
            } => t.as_str(),
            CategoryKey::EvalSet { eval_set, .. } => eval_set.as_str(),
            CategoryKey::Variation(name) => name.as_str(),
        };
        name.split('_').next().unwrap_or(name)
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryKey::EvalSet {
                eval_set,
                task_type: Some(t),
            } => write!(f, "{eval_set}/{t}"),
            CategoryKey::EvalSet {
                eval_set,
                task_type: None,
            } => f.write_str(eval_set),
            CategoryKey::Variation(name) => f.write_str(name),
        }
    }
}

/// An executable action chosen by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Action {
    /// Index into a discrete skill list.
    Index(usize),
    /// Discretised end-effector command (position, rotation, gripper bins).
    Vector(Vec<i64>),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Index(i) => write!(f, "{i}"),
            Action::Vector(v) => {
                let parts: Vec<String> = v.iter().map(i64::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// The set of actions an environment accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpace {
    /// Named skills addressed by index (`action id 0: find a Apple`).
    Discrete { actions: Vec<String> },
    /// Fixed-length integer vectors.
    Vector { dims: usize },
}

impl ActionSpace {
    /// `true` when `action` is executable in this space.
    pub fn contains(&self, action: &Action) -> bool {
        match (self, action) {
            (ActionSpace::Discrete { actions }, Action::Index(i)) => *i < actions.len(),
            (ActionSpace::Vector { dims }, Action::Vector(v)) => v.len() == *dims,
            _ => false,
        }
    }

    /// Human-readable form of `action` for prompts and logs.
    pub fn describe(&self, action: &Action) -> String {
        match (self, action) {
            (ActionSpace::Discrete { actions }, Action::Index(i)) => actions
                .get(*i)
                .cloned()
                .unwrap_or_else(|| format!("unknown action {i}")),
            _ => action.to_string(),
        }
    }

    /// Highest valid action index, as advertised to the model.
    pub fn max_action_id(&self) -> usize {
        match self {
            ActionSpace::Discrete { actions } => actions.len().saturating_sub(1),
            ActionSpace::Vector { dims } => dims.saturating_sub(1),
        }
    }

    /// Key carrying the action inside each `executable_plan` step.
    pub fn step_key(&self) -> &'static str {
        match self {
            ActionSpace::Discrete { .. } => "action_id",
            ActionSpace::Vector { .. } => "action",
        }
    }

    /// JSON schema of the response the planner expects for this space.
    pub fn response_schema(&self) -> serde_json::Value {
        let schema = match self {
            ActionSpace::Discrete { .. } => schemars::schema_for!(PlannerResponse<IndexedStep>),
            ActionSpace::Vector { .. } => schemars::schema_for!(PlannerResponse<VectorStep>),
        };
        serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
    }
}

/// Outcome of one planner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannerAction {
    /// The model returned an empty plan; the episode ends.
    Stop,
    /// The output could not be used (bad JSON or first action out of range).
    Invalid,
    /// One or more executable actions, in order. Never empty.
    Plan(Vec<Action>),
}

/// Structured output the model is asked to produce.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlannerResponse<S> {
    pub visual_state_description: String,
    pub reasoning_and_reflection: String,
    pub language_plan: String,
    pub executable_plan: Vec<S>,
}

/// Plan step for discrete action spaces.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexedStep {
    pub action_id: usize,
    pub action_name: String,
}

/// Plan step for vector action spaces.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VectorStep {
    pub action: Vec<i64>,
}

/// Metrics persisted at the end of every episode and read back as memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeResult {
    pub instruction: String,
    pub task_success: f64,
    pub task_progress: f64,
    /// Per-step rewards. Older ALFRED results stored the mean as a scalar.
    #[serde(deserialize_with = "one_or_many")]
    pub reward: Vec<f64>,
    pub avg_reward: f64,
    pub action_success: Vec<f64>,
    pub executed_actions: Vec<serde_json::Value>,
    pub step_task_success: Vec<f64>,
    pub num_steps: usize,
    pub planner_steps: usize,
    pub planner_output_error: usize,
    pub num_invalid_actions: usize,
    pub num_invalid_action_ratio: f64,
    pub empty_plan: u8,
    pub episode_elapsed_seconds: f64,
    pub eval_set: String,
    pub task_type: String,
    pub task_variation: String,
}

impl EpisodeResult {
    /// Success flag as the memory loader sees it (integer truncation).
    pub fn success_flag(&self) -> i64 {
        self.task_success as i64
    }

    pub fn is_success(&self) -> bool {
        self.success_flag() == 1
    }

    pub fn is_failure(&self) -> bool {
        self.success_flag() == 0
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(f64),
        Many(Vec<f64>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(v) => vec![v],
        OneOrMany::Many(v) => v,
    })
}

/// What the planner sees before choosing the next action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Observation {
    /// Rendered camera frames, oldest first.
    pub images: Vec<PathBuf>,
    /// Extra textual input (object coordinates for manipulation).
    pub text: Option<String>,
}

/// Feedback reported by the environment after executing one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub action: Action,
    #[serde(default)]
    pub env_feedback: String,
    #[serde(default)]
    pub task_success: f64,
    #[serde(default)]
    pub task_progress: f64,
    #[serde(default)]
    pub last_action_success: f64,
    #[serde(default)]
    pub env_step: usize,
    #[serde(default)]
    pub episode_elapsed_seconds: f64,
}

/// Errors that cross crate boundaries and end a run.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum BenchError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Environment Error on {component}: {details}")]
    Environment { component: String, details: String },

    #[error("Planner Error: {0}")]
    Planner(String),

    #[error("Result Store Error: {0}")]
    Storage(String),
}
