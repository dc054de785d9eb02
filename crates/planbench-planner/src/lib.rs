//! `planbench-planner` – The Planner Facade.
//!
//! Turns an observation plus a human instruction into the next action(s) by
//! prompting a vision-language model.
//!
//! # Modules
//!
//! - [`llm_driver`] – [`LlmDriver`][llm_driver::LlmDriver]: an async
//!   OpenAI-compatible chat-completions client with multimodal messages,
//!   behind the [`ChatBackend`][llm_driver::ChatBackend] trait. The
//!   [`PlannerResponse`][planbench_types::PlannerResponse] JSON Schema is
//!   injected via `response_format` for models that accept one.
//! - [`prompt`] – system templates, the action enumeration, few-shot and
//!   history blocks, and [`fix_json`][prompt::fix_json].
//! - [`parse`] – [`json_to_action`][parse::json_to_action]: maps a reply to a
//!   [`PlannerAction`][planbench_types::PlannerAction].
//! - [`pool`] – [`ExamplePool`][pool::ExamplePool]: base and per-category
//!   dynamic examples.
//! - [`planner`] – [`VlmPlanner`][planner::VlmPlanner]: prompt, call, retry,
//!   parse, and per-episode history.

pub mod llm_driver;
pub mod parse;
pub mod planner;
pub mod pool;
pub mod prompt;

pub use llm_driver::{ChatBackend, ChatMessage, ContentPart, LlmDriver, LlmError, Role};
pub use parse::{ParseError, json_to_action};
pub use planner::{ModelType, PlannerConfig, PlannerError, RetryPolicy, VlmPlanner};
pub use pool::ExamplePool;
