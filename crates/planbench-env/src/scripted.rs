//! [`ScriptedEnv`] – In-process environment for tests and dry runs.
//!
//! Serves a fixed list of [`ScriptedEpisode`]s without a simulator. Every
//! episode decides up front at which step the task succeeds (if ever) and
//! which steps report a failed action, so evaluator behaviour can be
//! exercised deterministically.
//!
//! # Example
//!
//! ```rust
//! use planbench_env::scripted::{ScriptedEnv, ScriptedEpisode};
//! use planbench_types::{ActionSpace, EnvKind};
//!
//! let env = ScriptedEnv::builder(EnvKind::Manipulation, "base")
//!     .action_space(ActionSpace::Vector { dims: 7 })
//!     .max_episode_steps(5)
//!     .with_episode(ScriptedEpisode::new("put the red cube in the container", "place_into_shape_sorter_color"))
//!     .build();
//! ```

use std::collections::BTreeSet;
use std::time::Instant;

use async_trait::async_trait;
use planbench_types::{Action, ActionSpace, EnvKind, Observation, StepInfo};

use crate::environment::{EnvError, Environment, EpisodeStart, StepOutcome};

// ─────────────────────────────────────────────────────────────────────────────
// Episode script
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ScriptedEpisode {
    pub instruction: String,
    pub category: String,
    /// Step (1-based) whose action completes the task.
    pub succeed_at: Option<usize>,
    /// Steps (1-based) whose action fails.
    pub failing_steps: BTreeSet<usize>,
    pub observation_text: Option<String>,
}

impl ScriptedEpisode {
    pub fn new(instruction: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            category: category.into(),
            succeed_at: None,
            failing_steps: BTreeSet::new(),
            observation_text: None,
        }
    }

    pub fn succeed_at(mut self, step: usize) -> Self {
        self.succeed_at = Some(step);
        self
    }

    pub fn fail_step(mut self, step: usize) -> Self {
        self.failing_steps.insert(step);
        self
    }

    pub fn observation_text(mut self, text: impl Into<String>) -> Self {
        self.observation_text = Some(text.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

pub struct ScriptedEnvBuilder {
    kind: EnvKind,
    eval_set: String,
    action_space: ActionSpace,
    max_episode_steps: usize,
    max_invalid_actions: usize,
    step_errors: usize,
    episodes: Vec<ScriptedEpisode>,
}

impl ScriptedEnvBuilder {
    pub fn action_space(mut self, space: ActionSpace) -> Self {
        self.action_space = space;
        self
    }

    pub fn max_episode_steps(mut self, steps: usize) -> Self {
        self.max_episode_steps = steps;
        self
    }

    pub fn max_invalid_actions(mut self, n: usize) -> Self {
        self.max_invalid_actions = n;
        self
    }

    /// Make the next `n` calls to `step` fail with a protocol error.
    pub fn step_errors(mut self, n: usize) -> Self {
        self.step_errors = n;
        self
    }

    pub fn with_episode(mut self, episode: ScriptedEpisode) -> Self {
        self.episodes.push(episode);
        self
    }

    pub fn build(self) -> ScriptedEnv {
        ScriptedEnv {
            kind: self.kind,
            eval_set: self.eval_set,
            action_space: self.action_space,
            max_episode_steps: self.max_episode_steps,
            max_invalid_actions: self.max_invalid_actions,
            step_errors: self.step_errors,
            episodes: self.episodes,
            cursor: 0,
            current: None,
            step_count: 0,
            started: Instant::now(),
            executed: Vec::new(),
            closed: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment
// ─────────────────────────────────────────────────────────────────────────────

pub struct ScriptedEnv {
    kind: EnvKind,
    eval_set: String,
    action_space: ActionSpace,
    max_episode_steps: usize,
    max_invalid_actions: usize,
    step_errors: usize,
    episodes: Vec<ScriptedEpisode>,
    cursor: usize,
    current: Option<usize>,
    step_count: usize,
    started: Instant,
    executed: Vec<Action>,
    closed: bool,
}

impl ScriptedEnv {
    pub fn builder(kind: EnvKind, eval_set: impl Into<String>) -> ScriptedEnvBuilder {
        let action_space = match kind {
            EnvKind::Alfred => ActionSpace::Discrete {
                actions: vec!["find a apple".into(), "pick up the apple".into()],
            },
            EnvKind::Manipulation => ActionSpace::Vector { dims: 7 },
        };
        ScriptedEnvBuilder {
            kind,
            eval_set: eval_set.into(),
            action_space,
            max_episode_steps: 30,
            max_invalid_actions: 10,
            step_errors: 0,
            episodes: Vec::new(),
        }
    }

    /// Actions executed in the current episode.
    pub fn executed(&self) -> &[Action] {
        &self.executed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn observation(&self, episode: &ScriptedEpisode) -> Observation {
        Observation {
            images: Vec::new(),
            text: episode.observation_text.clone(),
        }
    }
}

#[async_trait]
impl Environment for ScriptedEnv {
    fn kind(&self) -> EnvKind {
        self.kind
    }

    fn eval_set(&self) -> &str {
        &self.eval_set
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
        let episode = self
            .episodes
            .get(position)
            .ok_or(EnvError::Exhausted(self.episodes.len()))?;
        let start = EpisodeStart {
            number: match self.kind {
                EnvKind::Alfred => position + 1,
                EnvKind::Manipulation => position,
            },
            instruction: episode.instruction.clone(),
            category: episode.category.clone(),
            observation: self.observation(episode),
            action_space: None,
        };
        self.cursor += 1;
        self.current = Some(position);
        self.step_count = 0;
        self.executed.clear();
        self.started = Instant::now();
        Ok(start)
    }

    async fn step(&mut self, action: &Action) -> Result<StepOutcome, EnvError> {
        if self.step_errors > 0 {
            self.step_errors -= 1;
            return Err(EnvError::Protocol("scripted step failure".into()));
        }
        let episode = self
            .current
            .and_then(|i| self.episodes.get(i))
            .ok_or(EnvError::NoEpisode)?;

        self.step_count += 1;
        let step = self.step_count;
        let action_ok = self.action_space.contains(action) && !episode.failing_steps.contains(&step);
        let success = action_ok && episode.succeed_at.is_some_and(|s| step >= s);
        let progress = match episode.succeed_at {
            _ if success => 1.0,
            Some(s) if s > 0 => (step.min(s) as f64 / s as f64).min(0.99),
            _ => 0.0,
        };
        let observation = self.observation(episode);
        self.executed.push(action.clone());

        let info = StepInfo {
            action: action.clone(),
            env_feedback: if action_ok {
                "Last action executed successfully.".into()
            } else {
                "Last action is invalid.".into()
            },
            task_success: if success { 1.0 } else { 0.0 },
            task_progress: progress,
            last_action_success: if action_ok { 1.0 } else { 0.0 },
            env_step: step,
            episode_elapsed_seconds: self.started.elapsed().as_secs_f64(),
        };
        Ok(StepOutcome {
            observation,
            reward: if success { 1.0 } else { 0.0 },
            done: success || step >= self.max_episode_steps,
            info,
        })
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
        for episode in &self.episodes {
            if !seen.contains(&episode.category) {
                seen.push(episode.category.clone());
            }
        }
        seen
    }

    async fn close(&mut self) -> Result<(), EnvError> {
        self.closed = true;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn two_episode_env() -> ScriptedEnv {
        ScriptedEnv::builder(EnvKind::Manipulation, "base")
            .max_episode_steps(3)
            .with_episode(ScriptedEpisode::new("stack the cubes", "stack_cubes_color").succeed_at(2))
            .with_episode(ScriptedEpisode::new("wipe the table", "wipe_table_shape"))
            .build()
    }

    fn arm(v: i64) -> Action {
        Action::Vector(vec![v; 7])
    }

    #[tokio::test]
    async fn reset_advances_cursor_and_numbers_from_zero() {
        let mut env = two_episode_env();
        let first = env.reset().await.unwrap();
        assert_eq!(first.number, 0);
        assert_eq!(first.instruction, "stack the cubes");
        assert_eq!(env.cursor(), 1);
        let second = env.reset().await.unwrap();
        assert_eq!(second.number, 1);
        assert!(matches!(env.reset().await, Err(EnvError::Exhausted(2))));
    }

    #[tokio::test]
    async fn alfred_numbers_from_one() {
        let mut env = ScriptedEnv::builder(EnvKind::Alfred, "base")
            .with_episode(ScriptedEpisode::new("put a washed apple in the fridge", "pick_clean_then_place_in_recep"))
            .build();
        assert_eq!(env.reset().await.unwrap().number, 1);
    }

    #[tokio::test]
    async fn succeeds_at_scripted_step() {
        let mut env = two_episode_env();
        env.reset().await.unwrap();
        let s1 = env.step(&arm(1)).await.unwrap();
        assert_eq!(s1.info.task_success, 0.0);
        assert!(!s1.done);
        let s2 = env.step(&arm(2)).await.unwrap();
        assert_eq!(s2.info.task_success, 1.0);
        assert_eq!(s2.info.env_step, 2);
        assert!(s2.done);
        assert_eq!(env.executed().len(), 2);
    }

    #[tokio::test]
    async fn step_budget_ends_episode() {
        let mut env = two_episode_env();
        env.set_cursor(1);
        env.reset().await.unwrap();
        for _ in 0..2 {
            assert!(!env.step(&arm(0)).await.unwrap().done);
        }
        let last = env.step(&arm(0)).await.unwrap();
        assert!(last.done);
        assert_eq!(last.info.task_success, 0.0);
    }

    #[tokio::test]
    async fn invalid_and_failing_actions() {
        let mut env = ScriptedEnv::builder(EnvKind::Manipulation, "base")
            .with_episode(ScriptedEpisode::new("pick the cube", "pick_cube_shape").fail_step(2))
            .build();
        env.reset().await.unwrap();
        let wrong_dims = env.step(&Action::Vector(vec![1, 2])).await.unwrap();
        assert_eq!(wrong_dims.info.last_action_success, 0.0);
        let scripted_fail = env.step(&arm(1)).await.unwrap();
        assert_eq!(scripted_fail.info.last_action_success, 0.0);
        assert_eq!(scripted_fail.info.env_feedback, "Last action is invalid.");
    }

    #[tokio::test]
    async fn step_errors_then_recovers() {
        let mut env = ScriptedEnv::builder(EnvKind::Manipulation, "base")
            .step_errors(1)
            .with_episode(ScriptedEpisode::new("pick the cube", "pick_cube_shape"))
            .build();
        env.reset().await.unwrap();
        assert!(env.step(&arm(0)).await.is_err());
        assert_eq!(env.step(&arm(0)).await.unwrap().info.env_step, 1);
    }

    #[tokio::test]
    async fn step_before_reset_fails() {
        let mut env = two_episode_env();
        assert!(matches!(env.step(&arm(0)).await, Err(EnvError::NoEpisode)));
    }

    #[test]
    fn categories_in_first_seen_order() {
        let env = ScriptedEnv::builder(EnvKind::Manipulation, "base")
            .with_episode(ScriptedEpisode::new("a", "wipe"))
            .with_episode(ScriptedEpisode::new("b", "pick"))
            .with_episode(ScriptedEpisode::new("c", "wipe"))
            .build();
        assert_eq!(env.task_categories(), vec!["wipe".to_string(), "pick".to_string()]);
    }
}
