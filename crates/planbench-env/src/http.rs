//! [`HttpEnv`] – simulator bridge over JSON/HTTP.
//!
//! The simulators (AI2-THOR for ALFRED, CoppeliaSim for manipulation) run in
//! their own process behind a small session API:
//!
//! | Method | Path | Body → Reply |
//! |---|---|---|
//! | `POST`   | `/sessions`                 | [`SessionRequest`] → [`SessionReply`] |
//! | `POST`   | `/sessions/{id}/reset`      | `{"episode_index": n}` → [`ResetReply`] |
//! | `POST`   | `/sessions/{id}/step`       | `{"action": ...}` → [`StepOutcome`] |
//! | `DELETE` | `/sessions/{id}`            | – |
//!
//! The session reply lists the task category of every dataset item. Which
//! items are evaluated (explicit indexes, per-category sampling, down
//! sampling) is decided here, client-side, so runs are reproducible
//! regardless of the simulator build.

use std::path::PathBuf;

use async_trait::async_trait;
use planbench_types::{Action, ActionSpace, EnvKind, Observation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::environment::{EnvError, Environment, EpisodeStart, StepOutcome};
use crate::selection::{down_sample, select_per_group};

/// How to reach the simulator and which episodes to run.
#[derive(Debug, Clone)]
pub struct HttpEnvConfig {
    pub base_url: String,
    pub kind: EnvKind,
    pub eval_set: String,
    /// Square render resolution in pixels.
    pub resolution: u32,
    /// Directory the simulator writes rendered frames into.
    pub log_path: PathBuf,
    /// X display forwarded to the simulator.
    pub display: Option<String>,
    /// Explicit dataset indexes; wins over every other selection rule.
    pub selected_indexes: Vec<usize>,
    /// Sample this many episodes per task category.
    pub tasks_per_group: Option<usize>,
    pub selection_seed: u64,
    pub down_sample_ratio: f64,
    /// Overrides the simulator's own step budget.
    pub max_episode_steps: Option<usize>,
}

impl HttpEnvConfig {
    pub fn new(base_url: impl Into<String>, kind: EnvKind, eval_set: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            kind,
            eval_set: eval_set.into(),
            resolution: 500,
            log_path: PathBuf::from("running"),
            display: std::env::var("DISPLAY").ok(),
            selected_indexes: Vec::new(),
            tasks_per_group: None,
            selection_seed: 0,
            down_sample_ratio: 1.0,
            max_episode_steps: None,
        }
    }

    /// Dataset indexes to evaluate, in order, given each item's category.
    pub fn select(&self, categories: &[String]) -> Vec<usize> {
        let base: Vec<usize> = if !self.selected_indexes.is_empty() {
            self.selected_indexes
                .iter()
                .copied()
                .filter(|&i| i < categories.len())
                .collect()
        } else if let Some(k) = self.tasks_per_group {
            select_per_group(categories, k, self.selection_seed)
        } else {
            (0..categories.len()).collect()
        };
        down_sample(&base, self.down_sample_ratio)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SessionRequest<'a> {
    pub env: &'a str,
    pub eval_set: &'a str,
    pub resolution: u32,
    pub log_path: &'a std::path::Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct SessionReply {
    pub session_id: String,
    /// Category of every dataset item, by index.
    pub categories: Vec<String>,
    pub action_space: ActionSpace,
    pub max_episode_steps: usize,
    #[serde(default = "default_max_invalid")]
    pub max_invalid_actions: usize,
}

fn default_max_invalid() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct ResetReply {
    pub instruction: String,
    #[serde(default)]
    pub observation: Observation,
    #[serde(default)]
    pub action_space: Option<ActionSpace>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment
// ─────────────────────────────────────────────────────────────────────────────

pub struct HttpEnv {
    client: reqwest::Client,
    config: HttpEnvConfig,
    session_id: String,
    categories: Vec<String>,
    episodes: Vec<usize>,
    action_space: ActionSpace,
    max_episode_steps: usize,
    max_invalid_actions: usize,
    cursor: usize,
    step_count: usize,
    in_episode: bool,
}

impl HttpEnv {
    /// Open a simulator session. Any failure here is fatal for the run.
    pub async fn connect(config: HttpEnvConfig) -> Result<Self, EnvError> {
        let client = reqwest::Client::new();
        let request = SessionRequest {
            env: config.kind.id(),
            eval_set: &config.eval_set,
            resolution: config.resolution,
            log_path: &config.log_path,
            display: config.display.as_deref(),
        };
        let url = format!("{}/sessions", config.base_url.trim_end_matches('/'));
        let reply: SessionReply = client
            .post(&url)
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EnvError::Session(e.to_string()))?
            .json()
            .await
            .map_err(|e| EnvError::Session(e.to_string()))?;

        let episodes = config.select(&reply.categories);
        info!(
            env = config.kind.id(),
            eval_set = %config.eval_set,
            session = %reply.session_id,
            episodes = episodes.len(),
            "simulator session opened"
        );
        Ok(Self {
            client,
            max_episode_steps: config.max_episode_steps.unwrap_or(reply.max_episode_steps),
            max_invalid_actions: reply.max_invalid_actions,
            session_id: reply.session_id,
            categories: reply.categories,
            action_space: reply.action_space,
            episodes,
            config,
            cursor: 0,
            step_count: 0,
            in_episode: false,
        })
    }

    fn url(&self, tail: &str) -> String {
        format!(
            "{}/sessions/{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.session_id,
            tail
        )
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        tail: &str,
        body: &B,
    ) -> Result<R, EnvError> {
        let response = self
            .client
            .post(self.url(tail))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        let value: serde_json::Value = response.json().await?;
        serde_json::from_value(value).map_err(|e| EnvError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl Environment for HttpEnv {
    fn kind(&self) -> EnvKind {
        self.config.kind
    }

    fn eval_set(&self) -> &str {
        &self.config.eval_set
    }

    fn number_of_episodes(&self) -> usize {
        self.episodes.len()
    }

    fn cursor(&self) -> usize {
        self.cursor
    }

    fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    async fn reset(&mut self) -> Result<EpisodeStart, EnvError> {
        let position = self.cursor;
        let index = *self
            .episodes
            .get(position)
            .ok_or(EnvError::Exhausted(self.episodes.len()))?;
        let reply: ResetReply = self
            .post("/reset", &serde_json::json!({ "episode_index": index }))
            .await?;
        if let Some(space) = &reply.action_space {
            self.action_space = space.clone();
        }
        self.cursor += 1;
        self.step_count = 0;
        self.in_episode = true;
        debug!(position, index, "episode reset");
        Ok(EpisodeStart {
            number: match self.config.kind {
                EnvKind::Alfred => index + 1,
                EnvKind::Manipulation => position,
            },
            instruction: reply.instruction,
            category: self.categories.get(index).cloned().unwrap_or_default(),
            observation: reply.observation,
            action_space: reply.action_space,
        })
    }

    async fn step(&mut self, action: &Action) -> Result<StepOutcome, EnvError> {
        if !self.in_episode {
            return Err(EnvError::NoEpisode);
        }
        let outcome: StepOutcome = self
            .post("/step", &serde_json::json!({ "action": action }))
            .await?;
        self.step_count = outcome.info.env_step.max(self.step_count + 1);
        Ok(outcome)
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn max_episode_steps(&self) -> usize {
        self.max_episode_steps
    }

    fn max_invalid_actions(&self) -> usize {
        self.max_invalid_actions
    }

    fn current_step(&self) -> usize {
        self.step_count
    }

    fn task_categories(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for &i in &self.episodes {
            if let Some(c) = self.categories.get(i) {
                if !seen.contains(c) {
                    seen.push(c.clone());
                }
            }
        }
        seen
    }

    async fn close(&mut self) -> Result<(), EnvError> {
        let result = self
            .client
            .delete(self.url(""))
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = &result {
            warn!(error = %e, session = %self.session_id, "failed to close simulator session");
        }
        self.in_episode = false;
        result.map(|_| ()).map_err(EnvError::from)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
