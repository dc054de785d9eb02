//! Base few-shot examples shipped with each benchmark.
//!
//! ALFRED files hold a JSON array of example strings. Manipulation files
//! hold an object mapping a task family (`pick`, `stack`, ...) to its array.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use planbench_planner::ExamplePool;
use planbench_types::EnvKind;
use tracing::{info, warn};

use crate::config::{ConfigError, EvalConfig};

pub fn load_pool(path: &Path, kind: EnvKind) -> Result<ExamplePool, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let invalid = |e: serde_json::Error| ConfigError::Value {
        key: path.display().to_string(),
        message: e.to_string(),
    };
    let pool = match kind {
        EnvKind::Alfred => ExamplePool::new(serde_json::from_str::<Vec<String>>(&raw).map_err(invalid)?),
        EnvKind::Manipulation => {
            ExamplePool::with_families(serde_json::from_str::<HashMap<String, Vec<String>>>(&raw).map_err(invalid)?)
        }
    };
    info!(path = %path.display(), "loaded base examples");
    Ok(pool)
}

/// Base examples for one evaluation set. No configured file means no base
/// examples.
pub fn pool_for(cfg: &EvalConfig, eval_set: &str) -> Result<ExamplePool, ConfigError> {
    let path = match (&cfg.exploration_examples_path, &cfg.examples_path) {
        (Some(exploration), _) if cfg.env == EnvKind::Alfred && eval_set == "long_horizon" => Some(exploration),
        (_, path) => path.as_ref(),
    };
    match path {
        Some(path) => load_pool(path, cfg.env),
        None => {
            warn!(eval_set, "no base examples configured");
            Ok(ExamplePool::default())
        }
    }
}
