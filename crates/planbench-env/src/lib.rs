//! `planbench-env` – Environment adapters.
//!
//! # Modules
//!
//! - [`environment`] – the [`Environment`][environment::Environment] trait
//!   and the episode/step types it exchanges.
//! - [`http`] – [`HttpEnv`][http::HttpEnv]: JSON/HTTP bridge to an external
//!   simulator process.
//! - [`scripted`] – [`ScriptedEnv`][scripted::ScriptedEnv]: deterministic
//!   in-process episodes for tests and dry runs.
//! - [`selection`] – seeded per-category sampling and down sampling.

pub mod environment;
pub mod http;
pub mod scripted;
pub mod selection;

pub use environment::{EnvError, Environment, EpisodeStart, StepOutcome};
pub use http::{HttpEnv, HttpEnvConfig};
pub use scripted::{ScriptedEnv, ScriptedEpisode};
pub use selection::{down_sample, select_per_group};
