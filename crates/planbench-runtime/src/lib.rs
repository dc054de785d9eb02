//! `planbench-runtime` – The evaluation loop.
//!
//! # Modules
//!
//! - [`evaluator`] – [`Evaluator`][evaluator::Evaluator]: drives an
//!   [`Environment`][planbench_env::Environment] and a
//!   [`VlmPlanner`][planbench_planner::VlmPlanner] through every episode of
//!   an evaluation set and persists the results.
//! - [`profile`] – [`VariantProfile`][profile::VariantProfile]: what differs
//!   between ALFRED and manipulation runs.
//! - [`telemetry`] – `tracing` subscriber and optional OTLP export.

pub mod evaluator;
pub mod profile;
pub mod telemetry;

pub use evaluator::{EvalError, Evaluator, EvaluatorConfig};
pub use profile::{ALFRED_TASK_TYPES, VariantProfile};
