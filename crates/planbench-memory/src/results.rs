//! Episode Result Store.
//!
//! One evaluation set writes into a single `results/` directory. Every
//! episode produces four files, all sharing the same episode number and
//! memory-mode suffix:
//!
//! | file | content |
//! |------|---------|
//! | `episode_<n>_final_res<suffix>.json` (ALFRED) / `episode_<n>_res<suffix>.json` (manipulation) | [`EpisodeResult`] |
//! | `planner_output_episode_<n><suffix>.txt` | one raw model output per line |
//! | `prompts_episode_<n><suffix>.txt` | transcript of every prompt sent |
//! | `memory_info_episode_<n><suffix>.json` | [`MemoryInfo`] snapshot |
//!
//! There is no index: episode numbers are recovered from file names.
//!
//! # Example
//!
//! ```rust
//! use planbench_memory::results::ResultStore;
//! use planbench_types::{EnvKind, EpisodeResult, MemoryMode};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = ResultStore::new(dir.path(), EnvKind::Manipulation, MemoryMode::Baseline);
//! store.write_episode(4, &EpisodeResult::default()).unwrap();
//! assert_eq!(store.completed_episodes().unwrap(), vec![4]);
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use planbench_types::{CategoryKey, EnvKind, EpisodeResult, MemoryMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::summary::RunSummary;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise while reading or writing result files.
#[derive(Error, Debug)]
pub enum ResultStoreError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON error in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ResultStoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File naming
// ─────────────────────────────────────────────────────────────────────────────

/// Marker that separates the episode number from the suffix in result names.
pub fn result_marker(kind: EnvKind) -> &'static str {
    match kind {
        EnvKind::Alfred => "_final_res",
        EnvKind::Manipulation => "_res",
    }
}

/// File-name suffix for a run in `mode`.
///
/// ALFRED baseline runs keep the historical unsuffixed names; manipulation
/// runs always carry the mode.
pub fn suffix_for(kind: EnvKind, mode: MemoryMode) -> String {
    match (kind, mode) {
        (EnvKind::Alfred, MemoryMode::Baseline) => String::new(),
        (_, mode) => format!("_{}", mode.as_str()),
    }
}

/// Split `episode_<n><marker><suffix>.json` into `(n, suffix)`.
///
/// Returns `None` for any other file name.
pub fn parse_result_file_name(name: &str, marker: &str) -> Option<(usize, String)> {
    if !name.starts_with("episode_") || !name.contains(marker) {
        return None;
    }
    let stem = name.strip_suffix(".json")?;
    let (head, suffix) = stem.split_once(marker)?;
    let number = head.split('_').nth(1)?.parse().ok()?;
    Some((number, suffix.to_string()))
}

/// Result files in `dir` as `(file name, episode number, suffix)`, sorted by
/// file name. A missing directory yields an empty list.
fn scan_result_files(dir: &Path, marker: &str) -> Result<Vec<(String, usize, String)>, ResultStoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ResultStoreError::io(dir, e))? {
        let entry = entry.map_err(|e| ResultStoreError::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some((number, suffix)) = parse_result_file_name(&name, marker) {
            found.push((name, number, suffix));
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Which dynamic examples were available to the planner for one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_set: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_variation: Option<String>,
    pub memory_mode: MemoryMode,
    pub previous_results_dir: Option<PathBuf>,
    pub used_memory: UsedMemory,
    pub num_success_examples: usize,
    pub num_failure_examples: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsedMemory {
    pub success_examples: Vec<String>,
    pub failure_examples: Vec<String>,
}

impl MemoryInfo {
    pub fn new(
        category: &CategoryKey,
        memory_mode: MemoryMode,
        previous_results_dir: Option<PathBuf>,
        success_examples: Vec<String>,
        failure_examples: Vec<String>,
    ) -> Self {
        let (eval_set, task_type, task_variation) = match category {
            CategoryKey::EvalSet {
                eval_set,
                task_type,
            } => (
                Some(eval_set.clone()),
                Some(task_type.clone().unwrap_or_default()),
                None,
            ),
            CategoryKey::Variation(name) => (None, None, Some(name.clone())),
        };
        Self {
            eval_set,
            task_type,
            task_variation,
            memory_mode,
            previous_results_dir,
            num_success_examples: success_examples.len(),
            num_failure_examples: failure_examples.len(),
            used_memory: UsedMemory {
                success_examples,
                failure_examples,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ResultStore
// ─────────────────────────────────────────────────────────────────────────────

/// Writer/reader for one run's `results/` directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
    kind: EnvKind,
    suffix: String,
}

impl ResultStore {
    /// Create a store rooted at `dir`. Nothing is created on disk until the
    /// first write.
    pub fn new(dir: impl Into<PathBuf>, kind: EnvKind, mode: MemoryMode) -> Self {
        Self {
            dir: dir.into(),
            kind,
            suffix: suffix_for(kind, mode),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn result_file_name(&self, episode: usize) -> String {
        format!("episode_{episode}{}{}.json", result_marker(self.kind), self.suffix)
    }

    pub fn planner_output_file_name(&self, episode: usize) -> String {
        format!("planner_output_episode_{episode}{}.txt", self.suffix)
    }

    pub fn prompts_file_name(&self, episode: usize) -> String {
        format!("prompts_episode_{episode}{}.txt", self.suffix)
    }

    pub fn memory_info_file_name(&self, episode: usize) -> String {
        format!("memory_info_episode_{episode}{}.json", self.suffix)
    }

    pub fn summary_file_name(&self) -> String {
        match self.kind {
            EnvKind::Alfred => "summary.json".to_string(),
            EnvKind::Manipulation => format!("summary{}.json", self.suffix),
        }
    }

    /// Persist the metrics of episode `episode`.
    pub fn write_episode(&self, episode: usize, result: &EpisodeResult) -> Result<PathBuf, ResultStoreError> {
        self.write_json(&self.result_file_name(episode), result)
    }

    /// Persist the raw planner outputs, one per line.
    pub fn write_planner_outputs(&self, episode: usize, outputs: &[String]) -> Result<PathBuf, ResultStoreError> {
        let mut body = String::new();
        for out in outputs {
            body.push_str(out);
            body.push('\n');
        }
        self.write_text(&self.planner_output_file_name(episode), &body)
    }

    /// Persist the transcript of every prompt sent during the episode.
    pub fn write_prompts(&self, episode: usize, prompts: &[String]) -> Result<PathBuf, ResultStoreError> {
        let mut body = String::new();
        for (i, prompt) in prompts.iter().enumerate() {
            body.push_str(&format!("=== Step {i} ===\n"));
            body.push_str(prompt);
            body.push_str("\n\n");
        }
        self.write_text(&self.prompts_file_name(episode), &body)
    }

    pub fn write_memory_info(&self, episode: usize, info: &MemoryInfo) -> Result<PathBuf, ResultStoreError> {
        self.write_json(&self.memory_info_file_name(episode), info)
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<PathBuf, ResultStoreError> {
        self.write_json(&self.summary_file_name(), summary)
    }

    /// Episode numbers that already have a result file (any suffix), sorted
    /// and de-duplicated.
    pub fn completed_episodes(&self) -> Result<Vec<usize>, ResultStoreError> {
        let mut numbers: Vec<usize> = scan_result_files(&self.dir, result_marker(self.kind))?
            .into_iter()
            .map(|(_, n, _)| n)
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        Ok(numbers)
    }

    /// Results written by this run (same suffix), in file-name order.
    /// Unreadable files are skipped.
    pub fn load_own_results(&self) -> Result<Vec<EpisodeResult>, ResultStoreError> {
        let files = scan_result_files(&self.dir, result_marker(self.kind))?;
        Ok(files
            .into_iter()
            .filter(|(_, _, suffix)| *suffix == self.suffix)
            .filter_map(|(name, _, _)| match read_result(&self.dir.join(&name)) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable result file");
                    None
                }
            })
            .collect())
    }

    fn ensure_dir(&self) -> Result<(), ResultStoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| ResultStoreError::io(&self.dir, e))
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, ResultStoreError> {
        let path = self.dir.join(name);
        let body = serde_json::to_string_pretty(value).map_err(|e| ResultStoreError::json(&path, e))?;
        self.write_text(name, &body)
    }

    fn write_text(&self, name: &str, body: &str) -> Result<PathBuf, ResultStoreError> {
        self.ensure_dir()?;
        let path = self.dir.join(name);
        fs::write(&path, body).map_err(|e| ResultStoreError::io(&path, e))?;
        debug!(path = %path.display(), "wrote result file");
        Ok(path)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading previous runs
// ─────────────────────────────────────────────────────────────────────────────

/// A result record together with its raw planner output.
#[derive(Debug, Clone)]
pub struct StoredEpisode {
    pub number: usize,
    pub result: EpisodeResult,
    /// Contents of the paired planner-output file; empty when missing.
    pub planner_output: String,
}

fn read_result(path: &Path) -> Result<EpisodeResult, ResultStoreError> {
    let raw = fs::read_to_string(path).map_err(|e| ResultStoreError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|e| ResultStoreError::json(path, e))
}

fn read_planner_output(dir: &Path, number: usize, suffix: &str) -> String {
    let primary = dir.join(format!("planner_output_episode_{number}{suffix}.txt"));
    let fallback = dir.join(format!("planner_output_episode_{number}.txt"));
    [primary, fallback]
        .iter()
        .find(|p| p.exists())
        .and_then(|p| fs::read_to_string(p).ok())
        .unwrap_or_default()
}

/// Load every episode record of a previous run in `dir`.
///
/// Files are visited in file-name order. When two files share an episode
/// number (different suffixes), the episode keeps its first position and
/// the later file's contents. A missing directory or an unreadable file is
/// never an error: the offending entry is skipped.
pub fn load_episode_records(dir: &Path, kind: EnvKind) -> Vec<StoredEpisode> {
    let files = match scan_result_files(dir, result_marker(kind)) {
        Ok(files) => files,
        Err(e) => {
            warn!(error = %e, "cannot scan previous results");
            return Vec::new();
        }
    };

    let mut records: Vec<StoredEpisode> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();
    for (name, number, suffix) in files {
        let result = match read_result(&dir.join(&name)) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "skipping unreadable result file");
                continue;
            }
        };
        let record = StoredEpisode {
            number,
            result,
            planner_output: read_planner_output(dir, number, &suffix),
        };
        match position.get(&number) {
            Some(&i) => records[i] = record,
            None => {
                position.insert(number, records.len());
                records.push(record);
            }
        }
    }
    records
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
