pub mod error;
pub mod file;
pub mod memory;

use std::{path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::analysis::{ports::HistoryPort, types::AnalysisRecord};

pub use error::HistoryError;
pub use file::FileHistoryStore;
pub use memory::InMemoryHistoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryBackend {
    #[default]
    File,
    Memory,
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("./state/history")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub backend: HistoryBackend,
    #[serde(default = "default_history_dir")]
    pub dir: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: HistoryBackend::default(),
            dir: default_history_dir(),
        }
    }
}

pub fn build_history_store(config: &HistoryConfig) -> Arc<dyn HistoryPort> {
    match config.backend {
        HistoryBackend::File => Arc::new(FileHistoryStore::new(config.dir.clone())),
        HistoryBackend::Memory => Arc::new(InMemoryHistoryStore::new()),
    }
}

/// Newest first; ties broken by id so listings are deterministic.
pub(crate) fn sort_newest_first(records: &mut [AnalysisRecord]) {
    records.sort_by(|left, right| {
        right
            .created_at
            .cmp(&left.created_at)
            .then_with(|| right.id.cmp(&left.id))
    });
}
