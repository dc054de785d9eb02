//! Run configuration.
//!
//! Layers, later wins:
//!
//! 1. built-in defaults,
//! 2. a TOML file (`--config path.toml`),
//! 3. `PLANBENCH_*` / `OPENAI_API_KEY` environment variables,
//! 4. `key=value` arguments. Values are TOML literals (`n_shots=5`,
//!    `language_only=true`); anything that does not parse is taken as a
//!    string, and `eval_sets` / `selected_indexes` also accept comma lists.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use planbench_env::HttpEnvConfig;
use planbench_memory::ExampleCaps;
use planbench_planner::{ModelType, PlannerConfig, RetryPolicy};
use planbench_runtime::EvaluatorConfig;
use planbench_types::{EnvKind, MemoryMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const ALFRED_EVAL_SETS: [&str; 6] = [
    "base",
    "common_sense",
    "complex_instruction",
    "spatial",
    "visual_appearance",
    "long_horizon",
];

pub const MANIPULATION_EVAL_SETS: [&str; 5] = ["base", "common_sense", "complex", "spatial", "visual"];

const LIST_KEYS: [&str; 2] = ["eval_sets", "selected_indexes"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("malformed argument {0:?}, expected key=value")]
    Argument(String),
    #[error("invalid value for {key}: {message}")]
    Value { key: String, message: String },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub env: EnvKind,
    pub model_name: String,
    pub model_type: ModelType,
    /// Empty means every evaluation set of `env`.
    pub eval_sets: Vec<String>,
    pub exp_name: String,
    pub n_shots: usize,
    pub language_only: bool,
    pub chat_history: bool,
    /// Frames of history sent per call; 0 disables multistep.
    pub multistep: usize,
    pub multiview: bool,
    pub visual_icl: bool,
    pub detection_box: bool,
    pub env_feedback: bool,
    pub resolution: u32,
    pub down_sample_ratio: f64,
    pub selected_indexes: Vec<usize>,
    pub tasks_per_group: Option<usize>,
    pub seed: u64,
    pub task_selection_seed: Option<u64>,
    pub max_episode_steps: Option<usize>,
    pub memory_mode: MemoryMode,
    pub previous_results_dir: Option<PathBuf>,
    pub max_success_examples: usize,
    pub max_failure_examples: usize,
    /// JSON file with the base few-shot examples.
    pub examples_path: Option<PathBuf>,
    /// Base examples for the ALFRED `long_horizon` set.
    pub exploration_examples_path: Option<PathBuf>,
    pub llm_url: String,
    pub sim_url: String,
    pub log_root: PathBuf,
    pub step_error_delay_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing)]
    pub api_key: String,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            env: EnvKind::Alfred,
            model_name: "gpt-4o-mini".into(),
            model_type: ModelType::Remote,
            eval_sets: Vec::new(),
            exp_name: String::new(),
            n_shots: 10,
            language_only: false,
            chat_history: false,
            multistep: 0,
            multiview: false,
            visual_icl: false,
            detection_box: false,
            env_feedback: true,
            resolution: 500,
            down_sample_ratio: 1.0,
            selected_indexes: Vec::new(),
            tasks_per_group: None,
            seed: 42,
            task_selection_seed: None,
            max_episode_steps: None,
            memory_mode: MemoryMode::Baseline,
            previous_results_dir: None,
            max_success_examples: 3,
            max_failure_examples: 3,
            examples_path: None,
            exploration_examples_path: None,
            llm_url: "https://api.openai.com".into(),
            sim_url: "http://127.0.0.1:5000".into(),
            log_root: PathBuf::from("running"),
            step_error_delay_secs: 30,
            temperature: 0.0,
            max_tokens: 2048,
            api_key: String::new(),
        }
    }
}

impl std::fmt::Debug for EvalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalConfig")
            .field("env", &self.env)
            .field("model_name", &self.model_name)
            .field("model_type", &self.model_type)
            .field("eval_sets", &self.eval_sets)
            .field("exp_name", &self.exp_name)
            .field("n_shots", &self.n_shots)
            .field("memory_mode", &self.memory_mode)
            .field("previous_results_dir", &self.previous_results_dir)
            .field("llm_url", &self.llm_url)
            .field("sim_url", &self.sim_url)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish_non_exhaustive()
    }
}

impl EvalConfig {
    /// Build the configuration from command-line arguments.
    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        let mut file = None;
        let mut overrides = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "--config" {
                let path = iter
                    .next()
                    .ok_or_else(|| ConfigError::Argument("--config needs a path".into()))?;
                file = Some(PathBuf::from(path));
            } else if let Some(path) = arg.strip_prefix("--config=") {
                file = Some(PathBuf::from(path));
            } else {
                overrides.push(arg.as_str());
            }
        }

        let mut cfg = match file {
            Some(path) => Self::load_file(&path)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides();
        cfg.apply_overrides(&overrides)?;
        cfg.fill_env_defaults();
        cfg.check_config_valid()?;
        Ok(cfg)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::File {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment variable overrides.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `PLANBENCH_MODEL` | `model_name` |
    /// | `PLANBENCH_LLM_URL` | `llm_url` |
    /// | `PLANBENCH_SIM_URL` | `sim_url` |
    /// | `OPENAI_API_KEY` | `api_key` |
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PLANBENCH_MODEL") {
            self.model_name = v;
        }
        if let Ok(v) = std::env::var("PLANBENCH_LLM_URL") {
            self.llm_url = v;
        }
        if let Ok(v) = std::env::var("PLANBENCH_SIM_URL") {
            self.sim_url = v;
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.api_key = v;
        }
    }

    /// Apply `key=value` arguments.
    pub fn apply_overrides(&mut self, args: &[&str]) -> Result<(), ConfigError> {
        if args.is_empty() {
            return Ok(());
        }
        let mut table = match toml::Value::try_from(&*self) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => return Err(ConfigError::Invalid("configuration is not a table".into())),
            Err(e) => return Err(ConfigError::Invalid(e.to_string())),
        };
        for arg in args {
            let (key, raw) = arg
                .split_once('=')
                .ok_or_else(|| ConfigError::Argument(arg.to_string()))?;
            let key = key.trim().trim_start_matches("--");
            table.insert(key.to_string(), parse_value(key, raw.trim()));
        }
        let api_key = std::mem::take(&mut self.api_key);
        let mut updated: EvalConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Value {
                key: args.join(" "),
                message: e.message().to_string(),
            })?;
        if updated.api_key.is_empty() {
            updated.api_key = api_key;
        }
        *self = updated;
        Ok(())
    }

    fn fill_env_defaults(&mut self) {
        if self.eval_sets.is_empty() {
            self.eval_sets = self.valid_eval_sets().iter().map(|s| s.to_string()).collect();
        }
    }

    pub fn valid_eval_sets(&self) -> &'static [&'static str] {
        match self.env {
            EnvKind::Alfred => &ALFRED_EVAL_SETS,
            EnvKind::Manipulation => &MANIPULATION_EVAL_SETS,
        }
    }

    /// Reject contradictory input modes and normalise language-only runs.
    pub fn check_config_valid(&mut self) -> Result<(), ConfigError> {
        let enabled = [self.multiview, self.multistep > 0, self.visual_icl, self.chat_history]
            .iter()
            .filter(|on| **on)
            .count();
        if enabled > 1 {
            return Err(ConfigError::Invalid(
                "only one of multiview, multistep, visual_icl, chat_history can be enabled at a time".into(),
            ));
        }
        if self.language_only && (self.multistep > 0 || self.multiview) {
            warn!("language only mode should not have multistep or multiview enabled, disabling them");
            self.multistep = 0;
            self.multiview = false;
        }
        if let Some(unknown) = self
            .eval_sets
            .iter()
            .find(|s| !self.valid_eval_sets().contains(&s.as_str()))
        {
            return Err(ConfigError::Invalid(format!(
                "unknown eval set {unknown:?} for {}",
                self.env
            )));
        }
        if !(self.down_sample_ratio > 0.0 && self.down_sample_ratio <= 1.0) {
            return Err(ConfigError::Invalid("down_sample_ratio must be in (0, 1]".into()));
        }
        Ok(())
    }

    /// Redacted dump written to `config.txt`.
    pub fn dump(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|e| format!("# unserializable config: {e}\n{self:?}"))
    }

    pub fn planner_config(&self) -> PlannerConfig {
        let mut p = PlannerConfig::new(&self.model_name, self.env);
        p.model_type = self.model_type;
        p.retry = RetryPolicy::for_model(&self.model_name, self.model_type);
        p.n_shot = self.n_shots;
        p.chat_history = self.chat_history;
        p.language_only = self.language_only;
        p.use_feedback = self.env_feedback;
        p.multistep = self.multistep;
        p
    }

    pub fn evaluator_config(&self) -> EvaluatorConfig {
        let mut e = EvaluatorConfig::new(&self.model_name);
        e.log_root = self.log_root.clone();
        e.exp_name = self.exp_name.clone();
        e.memory_mode = self.memory_mode;
        e.previous_results_dir = self.previous_results_dir.clone();
        e.caps = ExampleCaps {
            max_success: self.max_success_examples,
            max_failure: self.max_failure_examples,
        };
        e.tasks_per_group = self.tasks_per_group;
        e.multistep = self.multistep > 0;
        e.step_error_delay = Duration::from_secs(self.step_error_delay_secs);
        e.config_dump = Some(self.dump());
        e
    }

    pub fn env_config(&self, eval_set: &str, log_path: PathBuf) -> HttpEnvConfig {
        let mut c = HttpEnvConfig::new(&self.sim_url, self.env, eval_set);
        c.resolution = self.resolution;
        c.log_path = log_path;
        c.selected_indexes = self.selected_indexes.clone();
        c.tasks_per_group = self.tasks_per_group;
        c.selection_seed = self.task_selection_seed.unwrap_or(self.seed);
        c.down_sample_ratio = self.down_sample_ratio;
        c.max_episode_steps = self.max_episode_steps;
        c
    }

    pub fn api_key(&self) -> Option<String> {
        (!self.api_key.is_empty()).then(|| self.api_key.clone())
    }
}

fn parse_value(key: &str, raw: &str) -> toml::Value {
    if LIST_KEYS.contains(&key) && !raw.starts_with('[') {
        let items = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_literal)
            .collect();
        return toml::Value::Array(items);
    }
    parse_literal(raw)
}

fn parse_literal(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_fill_every_eval_set() {
        let cfg = EvalConfig::from_args(&args(&["env=eb-man"])).unwrap();
        assert_eq!(cfg.env, EnvKind::Manipulation);
        assert_eq!(cfg.eval_sets.len(), MANIPULATION_EVAL_SETS.len());
        assert_eq!(cfg.n_shots, 10);
    }

    #[test]
    fn key_value_overrides_are_typed() {
        let cfg = EvalConfig::from_args(&args(&[
            "model_name=gpt-4o-mini",
            "n_shots=5",
            "memory_mode=failure_only",
            "previous_results_dir=running/eb_alfred/gpt-4o/base/results",
            "language_only=true",
            "eval_sets=common_sense,spatial",
            "selected_indexes=0,12",
            "tasks_per_group=4",
        ]))
        .unwrap();
        assert_eq!(cfg.n_shots, 5);
        assert_eq!(cfg.memory_mode, MemoryMode::FailureOnly);
        assert_eq!(
            cfg.previous_results_dir,
            Some(PathBuf::from("running/eb_alfred/gpt-4o/base/results"))
        );
        assert!(cfg.language_only);
        assert_eq!(cfg.eval_sets, vec!["common_sense".to_string(), "spatial".to_string()]);
        assert_eq!(cfg.selected_indexes, vec![0, 12]);
        assert_eq!(cfg.tasks_per_group, Some(4));
    }

    #[test]
    fn bad_override_is_reported() {
        assert!(matches!(
            EvalConfig::from_args(&args(&["n_shots=many"])),
            Err(ConfigError::Value { .. })
        ));
        assert!(matches!(
            EvalConfig::from_args(&args(&["n_shots"])),
            Err(ConfigError::Argument(_))
        ));
    }

    #[test]
    fn only_one_input_mode() {
        let err = EvalConfig::from_args(&args(&["chat_history=true", "multistep=2"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn language_only_clears_visual_modes() {
        let cfg = EvalConfig::from_args(&args(&["env=eb-man", "language_only=true", "multiview=true"])).unwrap();
        assert!(!cfg.multiview);
        assert_eq!(cfg.multistep, 0);
    }

    #[test]
    fn unknown_eval_set_rejected() {
        let err = EvalConfig::from_args(&args(&["env=eb-man", "eval_sets=long_horizon"])).unwrap_err();
        assert!(err.to_string().contains("long_horizon"));
    }

    #[test]
    fn file_then_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, "env = \"eb-man\"\nexp_name = \"from_file\"\nn_shots = 3\n").unwrap();
        let cfg = EvalConfig::from_args(&args(&["--config", path.to_str().unwrap(), "n_shots=7"])).unwrap();
        assert_eq!(cfg.env, EnvKind::Manipulation);
        assert_eq!(cfg.exp_name, "from_file");
        assert_eq!(cfg.n_shots, 7);
    }

    #[test]
    fn api_key_survives_overrides_and_is_redacted() {
        let mut cfg = EvalConfig {
            api_key: "sk-super-secret".into(),
            ..Default::default()
        };
        cfg.apply_overrides(&["n_shots=2"]).unwrap();
        assert_eq!(cfg.api_key(), Some("sk-super-secret".to_string()));
        assert!(!format!("{cfg:?}").contains("sk-super-secret"));
        assert!(format!("{cfg:?}").contains("<redacted>"));
        assert!(!cfg.dump().contains("sk-super-secret"));
    }

    #[test]
    fn env_overrides() {
        // SAFETY: no other test in this binary touches these variables.
        unsafe { std::env::set_var("PLANBENCH_SIM_URL", "http://sim-host:5000") };
        let mut cfg = EvalConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.sim_url, "http://sim-host:5000");
        unsafe { std::env::remove_var("PLANBENCH_SIM_URL") };
    }

    #[test]
    fn derived_component_configs() {
        let cfg = EvalConfig::from_args(&args(&[
            "env=eb-man",
            "exp_name=4_re",
            "multistep=3",
            "seed=7",
            "max_failure_examples=1",
        ]))
        .unwrap();
        let planner = cfg.planner_config();
        assert_eq!(planner.multistep, 3);
        assert_eq!(planner.env, EnvKind::Manipulation);
        let eval = cfg.evaluator_config();
        assert!(eval.multistep);
        assert_eq!(eval.caps.max_failure, 1);
        assert!(eval.config_dump.unwrap().contains("exp_name = \"4_re\""));
        let env = cfg.env_config("base", PathBuf::from("running/x"));
        assert_eq!(env.selection_seed, 7);
        assert_eq!(env.kind, EnvKind::Manipulation);
    }
}
