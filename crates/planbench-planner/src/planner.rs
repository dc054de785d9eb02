//! [`VlmPlanner`] – the Planner Facade.
//!
//! Each call to [`VlmPlanner::act`]:
//!
//! 1. **Prompt** – fills the system template with the action space and up to
//!    `n_shot` examples from the [`ExamplePool`], then appends the human
//!    instruction (first step) or the action history (later steps).
//! 2. **Message** – wraps the prompt with the observation images as `data:`
//!    URLs. Rolling-history mode keeps previous turns in the conversation.
//! 3. **Call** – sends the conversation through the [`ChatBackend`], retrying
//!    once after the [`RetryPolicy`] back-off.
//! 4. **Parse** – maps the reply to a [`PlannerAction`] with
//!    [`json_to_action`]. Unreadable replies count as output errors.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use planbench_planner::{ExamplePool, LlmDriver, PlannerConfig, VlmPlanner};
//! use planbench_types::{ActionSpace, EnvKind};
//!
//! let driver = Arc::new(LlmDriver::new("https://api.openai.com", "gpt-4o-mini"));
//! let config = PlannerConfig::new("gpt-4o-mini", EnvKind::Alfred);
//! let space = ActionSpace::Discrete { actions: vec!["find a Apple".into()] };
//! let mut planner = VlmPlanner::new(config, driver, space, ExamplePool::default());
//! planner.reset();
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use planbench_types::{Action, ActionSpace, CategoryKey, EnvKind, Observation, PlannerAction, StepInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::llm_driver::{ChatBackend, ChatMessage, ContentPart, ImageUrl, LlmError, Role, image_to_data_url};
use crate::parse::json_to_action;
use crate::pool::ExamplePool;
use crate::prompt;

/// Model name fragments of backends that cannot take a response schema.
const TEXT_TEMPLATE_MODELS: [&str; 4] = ["claude", "InternVL", "Qwen2-VL", "Qwen2.5-VL"];

/// Model name fragments of rate-limited Gemini backends.
const PACED_MODELS: [&str; 2] = ["gemini-1.5-pro", "gemini-2.0-flash"];

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum PlannerError {
    /// The backend failed twice in a row.
    #[error("model backend failed after retry: {0}")]
    Backend(#[from] LlmError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Where the model is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    Remote,
    Local,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Remote => f.write_str("remote"),
            ModelType::Local => f.write_str("local"),
        }
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote" => Ok(ModelType::Remote),
            "local" => Ok(ModelType::Local),
            other => Err(format!("unknown model type: {other:?}")),
        }
    }
}

/// Delays around a model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleep after every successful call.
    pub pacing: Duration,
    /// Sleep before the single retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Provider defaults: Gemini 15 s pacing and 60 s back-off, other remote
    /// models 60 s, local servers 20 s.
    pub fn for_model(model_name: &str, model_type: ModelType) -> Self {
        if PACED_MODELS.iter().any(|m| model_name.contains(m)) {
            return Self {
                pacing: Duration::from_secs(15),
                backoff: Duration::from_secs(60),
            };
        }
        let backoff = match model_type {
            ModelType::Remote => Duration::from_secs(60),
            ModelType::Local => Duration::from_secs(20),
        };
        Self {
            pacing: Duration::ZERO,
            backoff,
        }
    }

    /// No delays at all.
    pub fn immediate() -> Self {
        Self {
            pacing: Duration::ZERO,
            backoff: Duration::ZERO,
        }
    }
}

/// Planner knobs.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub model_name: String,
    pub model_type: ModelType,
    pub env: EnvKind,
    pub system_prompt: String,
    pub n_shot: usize,
    /// Keep previous turns in the conversation and send a short follow-up.
    pub chat_history: bool,
    pub language_only: bool,
    /// Include environment feedback in the action history.
    pub use_feedback: bool,
    /// Number of most recent frames sent per call (0 sends every frame).
    pub multistep: usize,
    pub retry: RetryPolicy,
}

impl PlannerConfig {
    pub fn new(model_name: impl Into<String>, env: EnvKind) -> Self {
        let model_name = model_name.into();
        Self {
            retry: RetryPolicy::for_model(&model_name, ModelType::Remote),
            model_name,
            model_type: ModelType::Remote,
            env,
            system_prompt: prompt::system_prompt_for(env).to_string(),
            n_shot: 10,
            chat_history: false,
            language_only: false,
            use_feedback: true,
            multistep: 0,
        }
    }

    /// `true` when the model gets a textual JSON template instead of a schema.
    pub fn needs_text_template(&self) -> bool {
        TEXT_TEMPLATE_MODELS.iter().any(|m| self.model_name.contains(m))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// VlmPlanner
// ─────────────────────────────────────────────────────────────────────────────

pub struct VlmPlanner {
    config: PlannerConfig,
    backend: Arc<dyn ChatBackend>,
    space: ActionSpace,
    available_actions: String,
    pool: ExamplePool,
    // ── episode state ─────────────────────────────────────────────────────────
    messages: Vec<ChatMessage>,
    history: Vec<(Action, String)>,
    planner_steps: usize,
    output_json_error: usize,
    last_prompt: Option<String>,
}

impl VlmPlanner {
    pub fn new(config: PlannerConfig, backend: Arc<dyn ChatBackend>, space: ActionSpace, pool: ExamplePool) -> Self {
        Self {
            config,
            backend,
            available_actions: prompt::available_actions(&space),
            space,
            pool,
            messages: Vec::new(),
            history: Vec::new(),
            planner_steps: 0,
            output_json_error: 0,
            last_prompt: None,
        }
    }

    /// Clear all per-episode state.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.history.clear();
        self.planner_steps = 0;
        self.output_json_error = 0;
        self.last_prompt = None;
    }

    /// Swap the action space (ALFRED skill sets change per scene).
    pub fn set_action_space(&mut self, space: ActionSpace) {
        self.available_actions = prompt::available_actions(&space);
        self.space = space;
    }

    pub fn action_space(&self) -> &ActionSpace {
        &self.space
    }

    pub fn add_dynamic_memory(&mut self, category: CategoryKey, success: Vec<String>, failure: Vec<String>) {
        self.pool.add_dynamic(category, success, failure);
    }

    /// Dynamic `(success, failure)` examples stored for `category`.
    pub fn memory_for(&self, category: &CategoryKey) -> (&[String], &[String]) {
        (self.pool.success_for(category), self.pool.failure_for(category))
    }

    pub fn pool(&self) -> &ExamplePool {
        &self.pool
    }

    pub fn planner_steps(&self) -> usize {
        self.planner_steps
    }

    pub fn output_json_error(&self) -> usize {
        self.output_json_error
    }

    /// Prompt text of the most recent call, before any output template.
    pub fn last_prompt(&self) -> Option<&str> {
        self.last_prompt.as_deref()
    }

    /// Record one executed action and its feedback for later prompts.
    pub fn update_info(&mut self, info: &StepInfo) {
        self.history.push((info.action.clone(), info.env_feedback.clone()));
    }

    fn system_block(&self, category: Option<&CategoryKey>, replanning: bool) -> String {
        let examples = if self.config.n_shot >= 1 {
            let all = self.pool.examples_for(category);
            if let Some(c) = category.filter(|c| self.pool.has_dynamic(c)) {
                debug!(
                    category = %c,
                    base = self.pool.base_for(Some(c)).len(),
                    success = self.pool.success_for(c).len(),
                    failure = self.pool.failure_for(c).len(),
                    "prompt includes dynamic memory"
                );
            }
            prompt::examples_block(&all, self.config.n_shot, replanning)
        } else {
            String::new()
        };
        prompt::fill_system_prompt(&self.config.system_prompt, &self.space, &self.available_actions, &examples)
    }

    /// Build the prompt text for the next call.
    pub fn build_prompt(&self, instruction: &str, category: Option<&CategoryKey>, input: Option<&str>) -> String {
        let instruction = instruction.trim_end_matches('.');
        let max_id = self.space.max_action_id();
        let language_only = self.config.language_only;
        let use_feedback = self.config.use_feedback;

        if self.history.is_empty() {
            let mut text = self.system_block(category, false);
            text.push_str(&format!("\n\n## Now the human instruction is: {instruction}."));
            if let Some(input) = input {
                text.push_str(&format!("\nInput: {input}"));
            }
            text.push_str(&prompt::first_step_instruction(max_id, language_only));
            return text;
        }

        let mut text = if self.config.chat_history {
            format!("The human instruction is: {instruction}.")
        } else {
            let mut text = self.system_block(category, true);
            text.push_str(&format!("\n\n## Now the human instruction is: {instruction}."));
            text
        };
        if let Some(input) = input {
            text.push_str(&format!("\nInput: {input}"));
        }
        text.push_str(&prompt::action_history(&self.space, &self.history, use_feedback));
        text.push_str(&prompt::replan_instruction(instruction, max_id, language_only, use_feedback));
        text
    }

    fn user_message(&self, text: String, observation: &Observation) -> Result<ChatMessage, LlmError> {
        if self.config.language_only {
            return Ok(ChatMessage::user_text(text));
        }
        let frames: &[_] = if self.config.multistep > 0 {
            let start = observation.images.len().saturating_sub(self.config.multistep);
            &observation.images[start..]
        } else {
            &observation.images
        };
        let mut images = Vec::with_capacity(frames.len());
        for path in frames {
            images.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image_to_data_url(path)?,
                },
            });
        }
        let text = ContentPart::Text { text };
        let content: Vec<ContentPart> = if self.config.multistep > 0 {
            std::iter::once(text).chain(images).collect()
        } else {
            images.into_iter().chain(std::iter::once(text)).collect()
        };
        Ok(ChatMessage {
            role: Role::User,
            content,
        })
    }

    async fn call_model(&self, schema: Option<&serde_json::Value>) -> Result<String, LlmError> {
        let retry = self.config.retry;
        match self.backend.respond(&self.messages, schema).await {
            Ok(out) => {
                if !retry.pacing.is_zero() {
                    tokio::time::sleep(retry.pacing).await;
                }
                Ok(out)
            }
            Err(e) => {
                warn!(error = %e, backoff_secs = retry.backoff.as_secs(), "model call failed, retrying once");
                tokio::time::sleep(retry.backoff).await;
                self.backend.respond(&self.messages, schema).await
            }
        }
    }

    /// Ask the model for the next action(s).
    ///
    /// Returns the parsed action and the raw reply text.
    ///
    /// # Errors
    ///
    /// [`PlannerError::Backend`] when the model call fails twice or an
    /// observation image cannot be read. Malformed replies are not errors.
    pub async fn act(
        &mut self,
        observation: &Observation,
        instruction: &str,
        category: Option<&CategoryKey>,
    ) -> Result<(PlannerAction, String), PlannerError> {
        let text = self.build_prompt(instruction, category, observation.text.as_deref());
        self.last_prompt = Some(text.clone());

        let text_template = self.config.needs_text_template();
        let text = if text_template {
            text + &prompt::output_template(&self.space, self.config.language_only)
        } else {
            text
        };
        let message = self.user_message(text, observation)?;
        if self.config.chat_history && !self.messages.is_empty() {
            self.messages.push(message);
        } else {
            self.messages = vec![message];
        }
        for m in &self.messages {
            debug!(role = ?m.role, "Model Input:\n{}", m.text());
        }

        let schema = (!text_template).then(|| self.space.response_schema());
        let raw = self.call_model(schema.as_ref()).await?;
        let out = if text_template { prompt::fix_json(&raw) } else { raw };
        debug!("Model Output:\n{out}");

        if self.config.chat_history {
            self.messages.push(ChatMessage::assistant_text(out.clone()));
        }

        let action = match json_to_action(&out, &self.space) {
            Ok(action) => action,
            Err(e) => {
                warn!(error = %e, "unusable planner output");
                self.output_json_error += 1;
                PlannerAction::Invalid
            }
        };
        if action == PlannerAction::Stop {
            info!("empty plan, stopping");
        }
        self.planner_steps += 1;
        Ok((action, out))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Replays canned replies and records every conversation it receives.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        seen: Mutex<Vec<(Vec<ChatMessage>, bool)>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn ok<S: AsRef<str>>(replies: &[S]) -> Arc<Self> {
            Self::new(replies.iter().map(|r| Ok(r.as_ref().to_string())).collect())
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn respond(
            &self,
            messages: &[ChatMessage],
            schema: Option<&serde_json::Value>,
        ) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push((messages.to_vec(), schema.is_some()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::BadResponse("script exhausted".into())))
        }
    }

    fn skills() -> ActionSpace {
        ActionSpace::Discrete {
            actions: vec![
                "find a Apple".into(),
                "pick up the Apple".into(),
                "find a Fridge".into(),
                "open the Fridge".into(),
            ],
        }
    }

    fn config(model: &str) -> PlannerConfig {
        let mut config = PlannerConfig::new(model, EnvKind::Alfred);
        config.retry = RetryPolicy::immediate();
        config.language_only = true;
        config
    }

    fn plan(ids: &[i64]) -> String {
        let steps: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| serde_json::json!({"action_id": id, "action_name": "x"}))
            .collect();
        serde_json::json!({
            "visual_state_description": "",
            "reasoning_and_reflection": "r",
            "language_plan": "p",
            "executable_plan": steps,
        })
        .to_string()
    }

    fn planner(backend: Arc<ScriptedBackend>, config: PlannerConfig) -> VlmPlanner {
        VlmPlanner::new(config, backend, skills(), ExamplePool::new(vec!["base example".into()]))
    }

    fn feedback(id: usize, text: &str) -> StepInfo {
        StepInfo {
            action: Action::Index(id),
            env_feedback: text.into(),
            task_success: 0.0,
            task_progress: 0.0,
            last_action_success: 1.0,
            env_step: 1,
            episode_elapsed_seconds: 0.0,
        }
    }

    #[tokio::test]
    async fn empty_plan_stops_every_call() {
        let empty = plan(&[]);
        let backend = ScriptedBackend::ok(&[&empty, &empty, &empty]);
        let mut p = planner(backend, config("gpt-4o-mini"));
        let obs = Observation::default();
        for instruction in ["Put an apple in the fridge.", "Slice bread", "x"] {
            let (action, _) = p.act(&obs, instruction, None).await.unwrap();
            assert_eq!(action, PlannerAction::Stop);
        }
        assert_eq!(p.planner_steps(), 3);
        assert_eq!(p.output_json_error(), 0);
    }

    #[tokio::test]
    async fn out_of_range_action_truncates_plan() {
        let reply = plan(&[0, 1, 9, 2]);
        let backend = ScriptedBackend::ok(&[&reply]);
        let mut p = planner(backend, config("gpt-4o-mini"));
        let (action, raw) = p.act(&Observation::default(), "x", None).await.unwrap();
        assert_eq!(action, PlannerAction::Plan(vec![Action::Index(0), Action::Index(1)]));
        assert_eq!(raw, reply);
    }

    #[tokio::test]
    async fn malformed_output_counts_error_and_is_invalid() {
        let backend = ScriptedBackend::ok(&["I think I will pick the apple"]);
        let mut p = planner(backend, config("gpt-4o-mini"));
        let (action, _) = p.act(&Observation::default(), "x", None).await.unwrap();
        assert_eq!(action, PlannerAction::Invalid);
        assert_eq!(p.output_json_error(), 1);
        assert_eq!(p.planner_steps(), 1);
    }

    #[tokio::test]
    async fn backend_failure_is_retried_once() {
        let backend = ScriptedBackend::new(vec![Err(LlmError::BadResponse("503".into())), Ok(plan(&[1]))]);
        let mut p = planner(backend.clone(), config("gpt-4o-mini"));
        let (action, _) = p.act(&Observation::default(), "x", None).await.unwrap();
        assert_eq!(action, PlannerAction::Plan(vec![Action::Index(1)]));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn second_failure_propagates() {
        let backend = ScriptedBackend::new(vec![
            Err(LlmError::BadResponse("503".into())),
            Err(LlmError::BadResponse("503".into())),
            Ok(plan(&[1])),
        ]);
        let mut p = planner(backend.clone(), config("gpt-4o-mini"));
        let err = p.act(&Observation::default(), "x", None).await.unwrap_err();
        assert!(matches!(err, PlannerError::Backend(_)));
        assert_eq!(backend.calls(), 2);
        assert_eq!(p.planner_steps(), 0);
    }

    #[tokio::test]
    async fn first_prompt_layout() {
        let backend = ScriptedBackend::ok(&[&plan(&[0])]);
        let mut p = planner(backend, config("gpt-4o-mini"));
        let key = CategoryKey::eval_set_task("common_sense", "pick_and_place_simple");
        p.add_dynamic_memory(key.clone(), vec!["success example".into()], vec!["failure example".into()]);
        p.act(&Observation::default(), "Put an apple in the fridge.", Some(&key))
            .await
            .unwrap();

        let prompt = p.last_prompt().unwrap();
        assert!(prompt.contains("(0 ~ 3)"));
        assert!(prompt.contains("\naction id 0: find a Apple, \naction id 1: pick up the Apple"));
        let base = prompt.find("## Task Execution Example 0: \n base example").unwrap();
        let success = prompt.find("## Task Execution Example 1: \n success example").unwrap();
        let failure = prompt.find("## Task Execution Example 2: \n failure example").unwrap();
        assert!(base < success && success < failure);
        assert!(prompt.contains("## Now the human instruction is: Put an apple in the fridge. You are supposed"));
        assert!(!prompt.contains("The action history"));
    }

    #[tokio::test]
    async fn n_shot_caps_examples() {
        let backend = ScriptedBackend::ok(&[&plan(&[0])]);
        let mut cfg = config("gpt-4o-mini");
        cfg.n_shot = 1;
        let mut p = planner(backend, cfg);
        let key = CategoryKey::eval_set("common_sense");
        p.add_dynamic_memory(key.clone(), vec!["success example".into()], vec![]);
        p.act(&Observation::default(), "x", Some(&key)).await.unwrap();
        let prompt = p.last_prompt().unwrap();
        assert!(prompt.contains("base example"));
        assert!(!prompt.contains("success example"));
    }

    #[tokio::test]
    async fn single_exchange_rebuilds_full_prompt_with_history() {
        let backend = ScriptedBackend::ok(&[&plan(&[0]), &plan(&[1])]);
        let mut p = planner(backend.clone(), config("gpt-4o-mini"));
        let obs = Observation::default();
        p.act(&obs, "Put an apple in the fridge", None).await.unwrap();
        p.update_info(&feedback(0, "Last action executed successfully."));
        p.act(&obs, "Put an apple in the fridge", None).await.unwrap();

        let prompt = p.last_prompt().unwrap();
        assert!(prompt.contains("## Task Execution Example  0: \n base example"));
        assert!(prompt.contains(
            "The action history:\nStep 0, action id 0, find a Apple, env feedback: Last action executed successfully."
        ));
        assert!(prompt.contains("to achieve the human instruction: 'Put an apple in the fridge'"));
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[1].0.len(), 1);
    }

    #[tokio::test]
    async fn rolling_history_keeps_turns_and_sends_short_prompt() {
        let backend = ScriptedBackend::ok(&[&plan(&[0]), &plan(&[1])]);
        let mut cfg = config("gpt-4o-mini");
        cfg.chat_history = true;
        cfg.use_feedback = false;
        let mut p = planner(backend.clone(), cfg);
        let obs = Observation::default();
        p.act(&obs, "Put an apple in the fridge", None).await.unwrap();
        p.update_info(&feedback(0, "ok"));
        p.act(&obs, "Put an apple in the fridge", None).await.unwrap();

        let prompt = p.last_prompt().unwrap();
        assert!(prompt.starts_with("The human instruction is: Put an apple in the fridge."));
        assert!(!prompt.contains("Task Execution Example"));
        assert!(prompt.contains("\nStep 0, action id 0, find a Apple"));
        assert!(!prompt.contains("env feedback"));

        let seen = backend.seen.lock().unwrap();
        let roles: Vec<Role> = seen[1].0.iter().map(|m| m.role.clone()).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[tokio::test]
    async fn reset_clears_history_and_counters() {
        let backend = ScriptedBackend::ok(&["junk".to_string(), plan(&[0])]);
        let mut p = planner(backend, config("gpt-4o-mini"));
        let obs = Observation::default();
        p.act(&obs, "x", None).await.unwrap();
        p.update_info(&feedback(0, "ok"));
        p.reset();
        assert_eq!(p.planner_steps(), 0);
        assert_eq!(p.output_json_error(), 0);
        assert!(p.last_prompt().is_none());
        p.act(&obs, "x", None).await.unwrap();
        assert!(!p.last_prompt().unwrap().contains("action history"));
    }

    #[tokio::test]
    async fn text_template_models_get_template_and_fixed_json() {
        let fenced = format!("```json\n{}\n```", plan(&[2]));
        let backend = ScriptedBackend::ok(&[&fenced]);
        let mut p = planner(backend.clone(), config("claude-3-5-sonnet-20241022"));
        let (action, raw) = p.act(&Observation::default(), "x", None).await.unwrap();
        assert_eq!(action, PlannerAction::Plan(vec![Action::Index(2)]));
        assert!(raw.starts_with('{'));

        let seen = backend.seen.lock().unwrap();
        let (messages, had_schema) = &seen[0];
        assert!(!had_schema);
        assert!(messages[0].text().contains("The output json format should be"));
        assert!(!p.last_prompt().unwrap().contains("The output json format should be"));
    }

    #[tokio::test]
    async fn schema_models_get_response_format() {
        let backend = ScriptedBackend::ok(&[&plan(&[0])]);
        let mut p = planner(backend.clone(), config("gpt-4o"));
        p.act(&Observation::default(), "x", None).await.unwrap();
        assert!(backend.seen.lock().unwrap()[0].1);
    }

    #[tokio::test]
    async fn vision_messages_carry_images() {
        let dir = tempfile::tempdir().unwrap();
        let frames: Vec<_> = (0..3)
            .map(|i| {
                let path = dir.path().join(format!("step_{i}.png"));
                std::fs::write(&path, [i as u8]).unwrap();
                path
            })
            .collect();
        let obs = Observation {
            images: frames,
            text: None,
        };

        let backend = ScriptedBackend::ok(&[&plan(&[0]), &plan(&[0])]);
        let mut cfg = config("gpt-4o");
        cfg.language_only = false;
        let mut p = planner(backend.clone(), cfg.clone());
        p.act(&obs, "x", None).await.unwrap();

        cfg.multistep = 2;
        let mut multi = planner(backend.clone(), cfg);
        multi.act(&obs, "x", None).await.unwrap();

        let seen = backend.seen.lock().unwrap();
        let single = &seen[0].0[0].content;
        assert_eq!(single.len(), 4);
        assert!(matches!(single[0], ContentPart::ImageUrl { .. }));
        assert!(matches!(single[3], ContentPart::Text { .. }));

        let stepped = &seen[1].0[0].content;
        assert_eq!(stepped.len(), 3);
        assert!(matches!(stepped[0], ContentPart::Text { .. }));
    }

    #[test]
    fn retry_policy_per_provider() {
        let gemini = RetryPolicy::for_model("gemini-2.0-flash", ModelType::Remote);
        assert_eq!(gemini.pacing, Duration::from_secs(15));
        assert_eq!(gemini.backoff, Duration::from_secs(60));
        assert_eq!(RetryPolicy::for_model("gpt-4o", ModelType::Remote).backoff, Duration::from_secs(60));
        assert_eq!(RetryPolicy::for_model("Qwen2-VL-7B", ModelType::Local).backoff, Duration::from_secs(20));
    }

    #[test]
    fn text_template_detection() {
        assert!(config("OpenGVLab/InternVL2_5-8B").needs_text_template());
        assert!(config("Qwen/Qwen2.5-VL-7B-Instruct").needs_text_template());
        assert!(!config("gpt-4o-mini").needs_text_template());
    }
}
