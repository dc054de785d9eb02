//! [`Evaluator`] – the episode loop.
//!
//! For one evaluation set the evaluator:
//!
//! 1. points the planner at the environment's action space,
//! 2. preloads dynamic memory per category from `previous_results_dir`,
//! 3. skips episodes a previous run of the same experiment already
//!    completed (manipulation only),
//! 4. runs `reset` → (`act` → `step`…)* until done for every remaining
//!    episode, persisting the result, planner outputs, prompt transcript and
//!    memory snapshot of each,
//! 5. writes the run summary and `config.txt`, and closes the environment.
//!
//! Errors inside an episode (model call or simulator step) are logged and the
//! same episode continues after `step_error_delay`. Setting the shutdown
//! flag stops the loop once the current episode is persisted.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use planbench_env::{EnvError, Environment, StepOutcome};
use planbench_memory::{
    ExampleCaps, MemoryInfo, ResultStore, ResultStoreError, RunSummary, keyword_jaccard,
    load_memory_from_results,
};
use planbench_planner::{PlannerError, VlmPlanner};
use planbench_types::{
    Action, BenchError, CategoryKey, EnvKind, EpisodeResult, MemoryMode, Observation,
    PlannerAction, StepInfo,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::profile::VariantProfile;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum EvalError {
    #[error(transparent)]
    Store(#[from] ResultStoreError),
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error(transparent)]
    Planner(#[from] PlannerError),
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<EvalError> for BenchError {
    fn from(e: EvalError) -> Self {
        match e {
            EvalError::Store(e) => BenchError::Storage(e.to_string()),
            EvalError::Env(e) => BenchError::Environment {
                component: "simulator".into(),
                details: e.to_string(),
            },
            EvalError::Planner(e) => BenchError::Planner(e.to_string()),
            EvalError::Io { path, source } => BenchError::Storage(format!("{}: {source}", path.display())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Root of all log directories (`running`).
    pub log_root: PathBuf,
    pub model_name: String,
    pub exp_name: String,
    pub memory_mode: MemoryMode,
    pub previous_results_dir: Option<PathBuf>,
    pub caps: ExampleCaps,
    /// Recorded in the summary only; selection happens in the environment.
    pub tasks_per_group: Option<usize>,
    /// Feed every frame seen so far instead of only the latest one.
    pub multistep: bool,
    pub step_error_delay: Duration,
    /// Written verbatim to `config.txt` next to the results.
    pub config_dump: Option<String>,
}

impl EvaluatorConfig {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            log_root: PathBuf::from("running"),
            model_name: model_name.into(),
            exp_name: String::new(),
            memory_mode: MemoryMode::Baseline,
            previous_results_dir: None,
            caps: ExampleCaps::default(),
            tasks_per_group: None,
            multistep: false,
            step_error_delay: Duration::from_secs(30),
            config_dump: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-episode bookkeeping
// ─────────────────────────────────────────────────────────────────────────────

enum Flow {
    Replan,
    Done,
}

struct EpisodeState {
    observation: Observation,
    image_history: Vec<PathBuf>,
    rewards: Vec<f64>,
    action_success: Vec<f64>,
    executed_actions: Vec<serde_json::Value>,
    step_task_success: Vec<f64>,
    num_invalid_actions: usize,
    invalid_outputs: usize,
    empty_plan: bool,
    forced_failure: bool,
    last_info: Option<StepInfo>,
    outputs: Vec<String>,
    prompts: Vec<String>,
}

impl EpisodeState {
    fn new(observation: Observation) -> Self {
        Self {
            image_history: observation.images.clone(),
            observation,
            rewards: Vec::new(),
            action_success: Vec::new(),
            executed_actions: Vec::new(),
            step_task_success: Vec::new(),
            num_invalid_actions: 0,
            invalid_outputs: 0,
            empty_plan: false,
            forced_failure: false,
            last_info: None,
            outputs: Vec::new(),
            prompts: Vec::new(),
        }
    }

    fn planner_observation(&self, multistep: bool) -> Observation {
        if multistep {
            Observation {
                images: self.image_history.clone(),
                text: self.observation.text.clone(),
            }
        } else {
            self.observation.clone()
        }
    }

    fn stop(&mut self, profile: VariantProfile) {
        if profile.records_step_details() {
            self.rewards.push(0.0);
            self.action_success.push(0.0);
            self.executed_actions.push(serde_json::Value::Array(Vec::new()));
            self.step_task_success.push(0.0);
            self.forced_failure = true;
        } else {
            self.empty_plan = true;
            self.forced_failure = true;
        }
    }

    fn record_step(&mut self, profile: VariantProfile, action: &Action, outcome: StepOutcome) {
        self.rewards.push(outcome.reward);
        if profile.counts_failed_actions() && outcome.info.last_action_success == 0.0 {
            self.num_invalid_actions += 1;
        }
        if profile.records_step_details() {
            self.action_success.push(outcome.info.last_action_success);
            self.executed_actions.push(action_value(action));
            self.step_task_success.push(outcome.info.task_success);
        }
        self.image_history.extend(outcome.observation.images.iter().cloned());
        self.observation = outcome.observation;
        self.last_info = Some(outcome.info);
    }
}

fn action_value(action: &Action) -> serde_json::Value {
    match action {
        Action::Index(i) => serde_json::json!(i),
        Action::Vector(v) => serde_json::json!(v),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Evaluator
// ─────────────────────────────────────────────────────────────────────────────

pub struct Evaluator {
    config: EvaluatorConfig,
    profile: VariantProfile,
    shutdown: Arc<AtomicBool>,
}

impl Evaluator {
    pub fn new(kind: EnvKind, config: EvaluatorConfig) -> Self {
        Self {
            config,
            profile: VariantProfile::new(kind),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a flag that, once set, ends the run after the current episode.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn profile(&self) -> VariantProfile {
        self.profile
    }

    pub fn log_path(&self, eval_set: &str) -> PathBuf {
        self.profile.log_path(
            &self.config.log_root,
            &self.config.model_name,
            &self.config.exp_name,
            self.config.memory_mode,
            eval_set,
        )
    }

    fn stop_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Add dynamic memory for every category of the environment's eval set.
    ///
    /// Returns the number of categories that received examples.
    pub fn load_memory(&self, env: &dyn Environment, planner: &mut VlmPlanner) -> usize {
        let mode = self.config.memory_mode;
        let Some(dir) = self.config.previous_results_dir.as_deref() else {
            return 0;
        };
        if mode == MemoryMode::Baseline || !self.profile.loads_memory_for(env.eval_set()) {
            return 0;
        }

        let mut loaded = 0;
        for category in self
            .profile
            .memory_categories(env.eval_set(), &env.task_categories())
        {
            let memory = load_memory_from_results(dir, self.profile.kind(), &category, self.config.caps);
            let success = if mode.uses_success() { memory.success } else { Vec::new() };
            let failure = if mode.uses_failure() { memory.failure } else { Vec::new() };
            if success.is_empty() && failure.is_empty() {
                continue;
            }
            info!(
                %category,
                success = success.len(),
                failure = failure.len(),
                "loaded dynamic memory"
            );
            planner.add_dynamic_memory(category, success, failure);
            loaded += 1;
        }
        loaded
    }

    /// Move the cursor past episodes an earlier run already completed.
    pub fn resume(&self, env: &mut dyn Environment, store: &ResultStore) -> Result<(), EvalError> {
        let completed = store.completed_episodes()?;
        if let Some(&max) = completed.last() {
            info!(
                completed = completed.len(),
                last = max,
                "resuming after completed episodes"
            );
            env.set_cursor(max + 1);
        }
        Ok(())
    }

    /// Run every remaining episode of `env` and return the run summary.
    pub async fn evaluate_set(
        &self,
        env: &mut dyn Environment,
        planner: &mut VlmPlanner,
    ) -> Result<RunSummary, EvalError> {
        let eval_set = env.eval_set().to_string();
        let log_path = self.log_path(&eval_set);
        let store = ResultStore::new(log_path.join("results"), self.profile.kind(), self.config.memory_mode);
        info!(%eval_set, log_path = %log_path.display(), "evaluating");

        planner.set_action_space(env.action_space().clone());
        self.load_memory(env, planner);
        if self.profile.resumes() {
            self.resume(env, &store)?;
        }

        while env.cursor() < env.number_of_episodes() {
            if self.stop_requested() {
                info!("shutdown requested, stopping before next episode");
                break;
            }
            self.run_episode(env, planner, &store, &eval_set).await?;
        }

        let summary = RunSummary::from_results(
            &log_path,
            self.profile.kind(),
            &store.load_own_results()?,
            self.config.memory_mode,
            self.config.tasks_per_group,
            self.config.previous_results_dir.clone(),
        );
        store.write_summary(&summary)?;
        if let Some(dump) = &self.config.config_dump {
            write_config_dump(&log_path, dump)?;
        }
        info!(
            %eval_set,
            total = summary.total_num_tasks,
            success_rate = summary.success_rate,
            "evaluation set finished"
        );

        if let Err(e) = env.close().await {
            warn!(error = %e, "environment did not close cleanly");
        }
        Ok(summary)
    }

    async fn run_episode(
        &self,
        env: &mut dyn Environment,
        planner: &mut VlmPlanner,
        store: &ResultStore,
        eval_set: &str,
    ) -> Result<usize, EvalError> {
        let start = env.reset().await?;
        let number = start.number;
        info!(episode = number, instruction = %start.instruction, "episode started");

        planner.reset();
        if let Some(space) = start.action_space.clone() {
            planner.set_action_space(space);
        }
        let category = self.profile.episode_category(eval_set, &start.category);
        self.log_memory_similarity(planner, &category, &start.instruction);

        let started = Instant::now();
        let mut state = EpisodeState::new(start.observation);
        loop {
            match self
                .advance(env, planner, &start.instruction, &category, &mut state)
                .await
            {
                Ok(Flow::Done) => break,
                Ok(Flow::Replan) => {}
                Err(e) => {
                    warn!(episode = number, error = %e, "episode step failed, retrying");
                    tokio::time::sleep(self.config.step_error_delay).await;
                    if self.stop_requested() {
                        warn!(episode = number, "shutdown requested, persisting partial episode");
                        break;
                    }
                }
            }
        }

        let result = self.episode_result(&start.instruction, eval_set, &start.category, planner, &state, started);
        info!(
            episode = number,
            task_success = result.task_success,
            steps = result.num_steps,
            planner_steps = result.planner_steps,
            "episode finished"
        );

        let (success, failure) = planner.memory_for(&category);
        let memory = MemoryInfo::new(
            &category,
            self.config.memory_mode,
            self.config.previous_results_dir.clone(),
            success.to_vec(),
            failure.to_vec(),
        );
        store.write_episode(number, &result)?;
        store.write_planner_outputs(number, &state.outputs)?;
        store.write_prompts(number, &state.prompts)?;
        store.write_memory_info(number, &memory)?;
        Ok(number)
    }

    /// One planner call and the execution of its plan.
    async fn advance(
        &self,
        env: &mut dyn Environment,
        planner: &mut VlmPlanner,
        instruction: &str,
        category: &CategoryKey,
        state: &mut EpisodeState,
    ) -> Result<Flow, EvalError> {
        let observation = state.planner_observation(self.config.multistep);
        let (action, raw) = planner.act(&observation, instruction, Some(category)).await?;
        state.outputs.push(raw);
        if let Some(prompt) = planner.last_prompt() {
            state.prompts.push(prompt.to_string());
        }

        let actions = match action {
            PlannerAction::Stop => {
                state.stop(self.profile);
                return Ok(Flow::Done);
            }
            PlannerAction::Invalid if !self.profile.replans_on_invalid() => {
                state.stop(self.profile);
                return Ok(Flow::Done);
            }
            PlannerAction::Invalid => {
                state.rewards.push(-1.0);
                state.num_invalid_actions += 1;
                state.invalid_outputs += 1;
                let exhausted = state.invalid_outputs >= env.max_invalid_actions();
                if exhausted {
                    info!(invalid = state.invalid_outputs, "invalid action budget spent");
                    state.forced_failure = true;
                }
                return Ok(if exhausted { Flow::Done } else { Flow::Replan });
            }
            PlannerAction::Plan(actions) => actions,
        };

        let remaining = env.max_episode_steps().saturating_sub(env.current_step());
        for action in actions.iter().take(remaining) {
            let outcome = env.step(action).await?;
            debug!(
                action = %planner.action_space().describe(action),
                reward = outcome.reward,
                task_success = outcome.info.task_success,
                done = outcome.done,
                "executed action"
            );
            planner.update_info(&outcome.info);
            let done = outcome.done;
            let failed = outcome.info.last_action_success == 0.0;
            state.record_step(self.profile, action, outcome);
            if done {
                return Ok(Flow::Done);
            }
            if failed && self.profile.replans_on_failed_action() {
                debug!("action failed, replanning");
                break;
            }
        }

        if env.current_step() >= env.max_episode_steps() {
            Ok(Flow::Done)
        } else {
            Ok(Flow::Replan)
        }
    }

    fn episode_result(
        &self,
        instruction: &str,
        eval_set: &str,
        label: &str,
        planner: &VlmPlanner,
        state: &EpisodeState,
        started: Instant,
    ) -> EpisodeResult {
        let info = state.last_info.as_ref();
        let num_steps = info.map(|i| i.env_step).unwrap_or(0);
        let task_success = match info {
            Some(i) if !state.forced_failure => i.task_success,
            _ => 0.0,
        };
        let elapsed = info
            .map(|i| i.episode_elapsed_seconds)
            .filter(|s| *s > 0.0)
            .unwrap_or_else(|| started.elapsed().as_secs_f64());
        let avg_reward = if state.rewards.is_empty() {
            0.0
        } else {
            state.rewards.iter().sum::<f64>() / state.rewards.len() as f64
        };
        let (task_type, task_variation) = match self.profile.kind() {
            EnvKind::Alfred => (label.to_string(), String::new()),
            EnvKind::Manipulation => (String::new(), label.to_string()),
        };

        EpisodeResult {
            instruction: instruction.to_string(),
            task_success,
            task_progress: match info {
                Some(i) if !state.forced_failure => i.task_progress,
                _ => 0.0,
            },
            reward: state.rewards.clone(),
            avg_reward,
            action_success: state.action_success.clone(),
            executed_actions: state.executed_actions.clone(),
            step_task_success: state.step_task_success.clone(),
            num_steps,
            planner_steps: planner.planner_steps(),
            planner_output_error: planner.output_json_error(),
            num_invalid_actions: state.num_invalid_actions,
            num_invalid_action_ratio: if num_steps > 0 {
                state.num_invalid_actions as f64 / num_steps as f64
            } else {
                0.0
            },
            empty_plan: u8::from(state.empty_plan),
            episode_elapsed_seconds: elapsed,
            eval_set: eval_set.to_string(),
            task_type,
            task_variation,
        }
    }

    fn log_memory_similarity(&self, planner: &VlmPlanner, category: &CategoryKey, instruction: &str) {
        let (success, failure) = planner.memory_for(category);
        for (label, examples) in [("success", success), ("failure", failure)] {
            if examples.is_empty() {
                continue;
            }
            let best = examples
                .iter()
                .map(|e| keyword_jaccard(instruction, e))
                .fold(0.0, f64::max);
            debug!(%category, kind = label, examples = examples.len(), best_similarity = best, "memory overlap with instruction");
        }
    }
}

fn write_config_dump(log_path: &Path, dump: &str) -> Result<(), EvalError> {
    let path = log_path.join("config.txt");
    fs::create_dir_all(log_path)
        .and_then(|_| fs::write(&path, dump))
        .map_err(|source| EvalError::Io { path, source })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use planbench_env::{ScriptedEnv, ScriptedEpisode};
    use planbench_planner::{
        ChatBackend, ChatMessage, ExamplePool, LlmError, PlannerConfig, RetryPolicy,
    };
    use planbench_types::ActionSpace;

    use super::*;

    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, String>>>,
    }

    impl ScriptedBackend {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
            })
        }

        fn with_failures(replies: Vec<Result<String, String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn respond(
            &self,
            _messages: &[ChatMessage],
            _schema: Option<&serde_json::Value>,
        ) -> Result<String, LlmError> {
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(msg)) => Err(LlmError::BadResponse(msg)),
                None => Ok(r#"{"executable_plan": []}"#.to_string()),
            }
        }
    }

    fn planner(kind: EnvKind, backend: Arc<dyn ChatBackend>, space: ActionSpace) -> VlmPlanner {
        let mut config = PlannerConfig::new("gpt-4o", kind);
        config.retry = RetryPolicy::immediate();
        config.language_only = true;
        VlmPlanner::new(config, backend, space, ExamplePool::default())
    }

    fn evaluator(kind: EnvKind, root: &Path) -> Evaluator {
        let mut config = EvaluatorConfig::new("gpt-4o");
        config.log_root = root.to_path_buf();
        config.step_error_delay = Duration::ZERO;
        Evaluator::new(kind, config)
    }

    fn alfred_plan(ids: &[usize]) -> String {
        let steps: Vec<String> = ids
            .iter()
            .map(|i| format!(r#"{{"action_id": {i}, "action_name": "a"}}"#))
            .collect();
        format!(r#"{{"executable_plan": [{}]}}"#, steps.join(","))
    }

    fn arm_plan(n: usize) -> String {
        let steps: Vec<&str> = std::iter::repeat_n(r#"{"action": [1,2,3,4,5,6,1]}"#, n).collect();
        format!(r#"{{"executable_plan": [{}]}}"#, steps.join(","))
    }

    fn alfred_env(episode: ScriptedEpisode) -> ScriptedEnv {
        ScriptedEnv::builder(EnvKind::Alfred, "base")
            .max_episode_steps(10)
            .max_invalid_actions(2)
            .with_episode(episode)
            .build()
    }

    fn read_result(path: &Path) -> EpisodeResult {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn alfred_success_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let eval = evaluator(EnvKind::Alfred, dir.path());
        let mut env = alfred_env(ScriptedEpisode::new("put the apple in the fridge", "pick_and_place_simple").succeed_at(2));
        let space = env.action_space().clone();
        let mut planner = planner(EnvKind::Alfred, ScriptedBackend::new(&[alfred_plan(&[0, 1]).as_str()]), space);

        let summary = eval.evaluate_set(&mut env, &mut planner).await.unwrap();
        assert_eq!(summary.total_num_tasks, 1);
        assert_eq!(summary.num_success, 1);

        let results = eval.log_path("base").join("results");
        let result = read_result(&results.join("episode_1_final_res.json"));
        assert_eq!(result.task_success, 1.0);
        assert_eq!(result.num_steps, 2);
        assert_eq!(result.planner_steps, 1);
        assert_eq!(result.task_type, "pick_and_place_simple");
        assert!(results.join("planner_output_episode_1.txt").exists());
        assert!(results.join("prompts_episode_1.txt").exists());
        assert!(results.join("memory_info_episode_1.json").exists());
        assert!(results.join("summary.json").exists());
        assert!(env.is_closed());
    }

    #[tokio::test]
    async fn alfred_invalid_outputs_end_at_budget() {
        let dir = tempfile::tempdir().unwrap();
        let eval = evaluator(EnvKind::Alfred, dir.path());
        let mut env = alfred_env(ScriptedEpisode::new("find the apple", "pick_and_place_simple"));
        let space = env.action_space().clone();
        let mut planner = planner(EnvKind::Alfred, ScriptedBackend::new(&["not json", "still not json"]), space);

        eval.evaluate_set(&mut env, &mut planner).await.unwrap();
        let result = read_result(&eval.log_path("base").join("results/episode_1_final_res.json"));
        assert_eq!(result.reward, vec![-1.0, -1.0]);
        assert_eq!(result.num_invalid_actions, 2);
        assert_eq!(result.planner_output_error, 2);
        assert_eq!(result.task_success, 0.0);
    }

    #[tokio::test]
    async fn alfred_empty_plan_sets_flag() {
        let dir = tempfile::tempdir().unwrap();
        let eval = evaluator(EnvKind::Alfred, dir.path());
        let mut env = alfred_env(ScriptedEpisode::new("find the apple", "pick_and_place_simple"));
        let space = env.action_space().clone();
        let mut planner = planner(EnvKind::Alfred, ScriptedBackend::new(&[r#"{"executable_plan": []}"#]), space);

        eval.evaluate_set(&mut env, &mut planner).await.unwrap();
        let result = read_result(&eval.log_path("base").join("results/episode_1_final_res.json"));
        assert_eq!(result.empty_plan, 1);
        assert_eq!(result.num_steps, 0);
        assert_eq!(result.num_invalid_action_ratio, 0.0);
    }

    #[tokio::test]
    async fn alfred_early_stop_discards_progress() {
        let dir = tempfile::tempdir().unwrap();
        let eval = evaluator(EnvKind::Alfred, dir.path());
        let mut env = alfred_env(ScriptedEpisode::new("find the apple", "pick_and_place_simple").succeed_at(4));
        let space = env.action_space().clone();
        let backend = ScriptedBackend::new(&[alfred_plan(&[0, 1]).as_str(), r#"{"executable_plan": []}"#]);
        let mut planner = planner(EnvKind::Alfred, backend, space);

        eval.evaluate_set(&mut env, &mut planner).await.unwrap();
        let result = read_result(&eval.log_path("base").join("results/episode_1_final_res.json"));
        assert_eq!(result.num_steps, 2);
        assert_eq!(result.empty_plan, 1);
        assert_eq!(result.task_success, 0.0);
        assert_eq!(result.task_progress, 0.0);
    }

    #[tokio::test]
    async fn alfred_invalid_budget_discards_progress() {
        let dir = tempfile::tempdir().unwrap();
        let eval = evaluator(EnvKind::Alfred, dir.path());
        let mut env = alfred_env(ScriptedEpisode::new("find the apple", "pick_and_place_simple").succeed_at(4));
        let space = env.action_space().clone();
        let backend = ScriptedBackend::new(&[alfred_plan(&[0]).as_str(), "not json", "still not json"]);
        let mut planner = planner(EnvKind::Alfred, backend, space);

        eval.evaluate_set(&mut env, &mut planner).await.unwrap();
        let result = read_result(&eval.log_path("base").join("results/episode_1_final_res.json"));
        assert_eq!(result.num_steps, 1);
        assert_eq!(result.num_invalid_actions, 2);
        assert_eq!(result.task_progress, 0.0);
    }

    #[tokio::test]
    async fn alfred_failed_action_forces_replan() {
        let dir = tempfile::tempdir().unwrap();
        let eval = evaluator(EnvKind::Alfred, dir.path());
        let mut env = alfred_env(
            ScriptedEpisode::new("find the apple", "pick_and_place_simple")
                .fail_step(1)
                .succeed_at(2),
        );
        let space = env.action_space().clone();
        let backend = ScriptedBackend::new(&[alfred_plan(&[0, 1, 1]).as_str(), alfred_plan(&[1]).as_str()]);
        let mut planner = planner(EnvKind::Alfred, backend, space);

        eval.evaluate_set(&mut env, &mut planner).await.unwrap();
        let result = read_result(&eval.log_path("base").join("results/episode_1_final_res.json"));
        assert_eq!(result.planner_steps, 2);
        assert_eq!(result.num_steps, 2);
        assert_eq!(result.num_invalid_actions, 1);
        assert_eq!(result.num_invalid_action_ratio, 0.5);
        assert_eq!(result.task_success, 1.0);
    }

    #[tokio::test]
    async fn plan_is_cut_to_remaining_steps() {
        let dir = tempfile::tempdir().unwrap();
        let eval = evaluator(EnvKind::Manipulation, dir.path());
        let mut env = ScriptedEnv::builder(EnvKind::Manipulation, "base")
            .max_episode_steps(3)
            .with_episode(ScriptedEpisode::new("stack the cubes", "stack_cubes_color"))
            .build();
        let space = env.action_space().clone();
        let mut planner = planner(EnvKind::Manipulation, ScriptedBackend::new(&[arm_plan(5).as_str()]), space);

        eval.evaluate_set(&mut env, &mut planner).await.unwrap();
        assert_eq!(env.executed().len(), 3);
    }

    #[tokio::test]
    async fn manipulation_stop_records_zero_step() {
        let dir = tempfile::tempdir().unwrap();
        let eval = evaluator(EnvKind::Manipulation, dir.path());
        let mut env = ScriptedEnv::builder(EnvKind::Manipulation, "base")
            .with_episode(ScriptedEpisode::new("wipe the table", "wipe_table_shape").succeed_at(1))
            .build();
        let space = env.action_space().clone();
        let mut planner = planner(EnvKind::Manipulation, ScriptedBackend::new(&["garbage"]), space);

        eval.evaluate_set(&mut env, &mut planner).await.unwrap();
        let store = ResultStore::new(eval.log_path("base").join("results"), EnvKind::Manipulation, MemoryMode::Baseline);
        let result = read_result(&store.dir().join(store.result_file_name(0)));
        assert_eq!(result.reward, vec![0.0]);
        assert_eq!(result.action_success, vec![0.0]);
        assert_eq!(result.executed_actions, vec![serde_json::json!([])]);
        assert_eq!(result.task_success, 0.0);
        assert_eq!(result.task_variation, "wipe_table_shape");
    }

    #[tokio::test]
    async fn step_errors_are_retried_within_the_episode() {
        let dir = tempfile::tempdir().unwrap();
        let eval = evaluator(EnvKind::Manipulation, dir.path());
        let mut env = ScriptedEnv::builder(EnvKind::Manipulation, "base")
            .step_errors(1)
            .with_episode(ScriptedEpisode::new("pick the cube", "pick_cube_shape").succeed_at(1))
            .build();
        let space = env.action_space().clone();
        let backend = ScriptedBackend::with_failures(vec![
            Err("boom".into()),
            Err("boom again".into()),
            Ok(arm_plan(1)),
            Ok(arm_plan(1)),
        ]);
        let mut planner = planner(EnvKind::Manipulation, backend, space);

        let summary = eval.evaluate_set(&mut env, &mut planner).await.unwrap();
        assert_eq!(summary.num_success, 1);
    }

    #[tokio::test]
    async fn shutdown_flag_skips_remaining_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let eval = evaluator(EnvKind::Manipulation, dir.path()).with_shutdown(flag);
        let mut env = ScriptedEnv::builder(EnvKind::Manipulation, "base")
            .with_episode(ScriptedEpisode::new("pick the cube", "pick_cube_shape"))
            .build();
        let space = env.action_space().clone();
        let mut planner = planner(EnvKind::Manipulation, ScriptedBackend::new(&[]), space);

        let summary = eval.evaluate_set(&mut env, &mut planner).await.unwrap();
        assert_eq!(summary.total_num_tasks, 0);
        assert_eq!(summary.success_rate, 0.0);
    }

    #[tokio::test]
    async fn config_dump_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EvaluatorConfig::new("gpt-4o");
        config.log_root = dir.path().to_path_buf();
        config.config_dump = Some("model_name = \"gpt-4o\"".into());
        let eval = Evaluator::new(EnvKind::Alfred, config);
        let mut env = alfred_env(ScriptedEpisode::new("find the apple", "pick_and_place_simple"));
        let space = env.action_space().clone();
        let mut planner = planner(EnvKind::Alfred, ScriptedBackend::new(&[]), space);

        eval.evaluate_set(&mut env, &mut planner).await.unwrap();
        let dump = fs::read_to_string(eval.log_path("base").join("config.txt")).unwrap();
        assert!(dump.contains("gpt-4o"));
    }

    #[test]
    fn eval_error_maps_to_bench_error() {
        let err: BenchError = EvalError::Env(EnvError::NoEpisode).into();
        assert!(matches!(err, BenchError::Environment { .. }));
    }
}
