//! `planbench-memory` – The Result Store and Memory Extractor.
//!
//! Persists one JSON record per evaluated episode (plus sidecar text files)
//! and turns the records of a previous run back into few-shot examples.
//!
//! # Modules
//!
//! - [`results`] – [`ResultStore`][results::ResultStore]: the file-naming
//!   convention for episode records, raw planner outputs, prompt transcripts
//!   and memory snapshots, plus directory scans used for resume and memory
//!   loading.
//! - [`extractor`] – [`load_memory_from_results`][extractor::load_memory_from_results]:
//!   filters prior episodes by [`CategoryKey`][planbench_types::CategoryKey]
//!   and formats them as templated success / failure examples.
//! - [`similarity`] – keyword Jaccard similarity between instructions.
//! - [`summary`] – [`RunSummary`][summary::RunSummary]: run-level aggregate
//!   written after every evaluation set.

pub mod extractor;
pub mod results;
pub mod similarity;
pub mod summary;

pub use extractor::{ExampleCaps, MemoryExamples, create_memory_example, load_memory_from_results};
pub use results::{MemoryInfo, ResultStore, ResultStoreError, StoredEpisode, load_episode_records};
pub use similarity::keyword_jaccard;
pub use summary::{EpisodeAverages, RunSummary, TaskTypeSummary};
