//! The [`Environment`] trait every simulator adapter implements.
//!
//! The evaluator never talks to a simulator directly. It drives an
//! `Environment` through `reset` / `step` cycles and reads the episode
//! quota, step budget and invalid-action budget from it.

use async_trait::async_trait;
use planbench_types::{Action, ActionSpace, EnvKind, Observation, StepInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by environment adapters.
#[derive(Error, Debug)]
pub enum EnvError {
    /// The simulator session (and its display server) could not be started.
    #[error("cannot open simulator session: {0}")]
    Session(String),
    #[error("simulator request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected simulator reply: {0}")]
    Protocol(String),
    /// `reset` was called after the episode quota was used up.
    #[error("no episodes left ({0} total)")]
    Exhausted(usize),
    /// `step` was called before `reset`.
    #[error("no episode in progress")]
    NoEpisode,
}

/// Everything known at the start of an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStart {
    /// Number used in result file names.
    pub number: usize,
    pub instruction: String,
    /// Task type (ALFRED) or task variation (manipulation).
    #[serde(default)]
    pub category: String,
    pub observation: Observation,
    /// Skill set for this episode when it differs per scene.
    #[serde(default)]
    pub action_space: Option<ActionSpace>,
}

/// Result of executing one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

#[async_trait]
pub trait Environment: Send {
    fn kind(&self) -> EnvKind;

    fn eval_set(&self) -> &str;

    /// Episodes this environment will serve.
    fn number_of_episodes(&self) -> usize;

    /// Position of the next episode `reset` will start.
    fn cursor(&self) -> usize;

    /// Move the cursor, e.g. to skip episodes completed by an earlier run.
    fn set_cursor(&mut self, cursor: usize);

    /// Start the episode at the cursor and advance the cursor.
    async fn reset(&mut self) -> Result<EpisodeStart, EnvError>;

    async fn step(&mut self, action: &Action) -> Result<StepOutcome, EnvError>;

    fn action_space(&self) -> &ActionSpace;

    fn max_episode_steps(&self) -> usize;

    fn max_invalid_actions(&self) -> usize;

    /// Actions executed in the current episode.
    fn current_step(&self) -> usize;

    /// Categories this evaluation set covers, used to preload memory.
    fn task_categories(&self) -> Vec<String>;

    async fn close(&mut self) -> Result<(), EnvError>;
}
