use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    analysis::{error::AnalysisError, ports::HistoryPort, types::AnalysisRecord},
    history::{HistoryError, sort_newest_first},
};

const ENVELOPE_VERSION: u64 = 1;
const RECORD_EXTENSION: &str = "json";

/// One JSON document per analysis id, replaced atomically.
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord {
    version: u64,
    record: AnalysisRecord,
}

impl FileHistoryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, HistoryError> {
        let parsed = Uuid::parse_str(id).map_err(|_| HistoryError::InvalidId(id.to_string()))?;
        Ok(self
            .dir
            .join(format!("{}.{RECORD_EXTENSION}", parsed.hyphenated())))
    }

    pub fn save(&self, record: &AnalysisRecord) -> Result<(), HistoryError> {
        let path = self.record_path(&record.id)?;
        fs::create_dir_all(&self.dir).map_err(|err| HistoryError::io(&self.dir, err))?;

        let envelope = PersistedRecord {
            version: ENVELOPE_VERSION,
            record: record.clone(),
        };

        let tmp_path = self
            .dir
            .join(format!(".{}.{}.tmp", record.id, Uuid::new_v4().simple()));
        let written = write_synced(&tmp_path, &envelope);
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }

        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(HistoryError::io(&path, err));
        }

        if let Ok(dir_handle) = fs::File::open(&self.dir) {
            let _ = dir_handle.sync_all();
        }

        tracing::debug!(
            target: "history",
            analysis_id = %record.id,
            path = %path.display(),
            "history_record_written"
        );
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<AnalysisRecord, HistoryError> {
        let path = self.record_path(id)?;
        match read_envelope(&path) {
            Err(HistoryError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Err(HistoryError::NotFound(id.to_string()))
            }
            other => other,
        }
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<AnalysisRecord>, HistoryError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(HistoryError::io(&self.dir, err)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| HistoryError::io(&self.dir, err))?;
            let path = entry.path();
            let is_record = path.extension().and_then(|ext| ext.to_str()) == Some(RECORD_EXTENSION)
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }
            match read_envelope(&path) {
                Ok(record) => records.push(record),
                Err(err) => tracing::warn!(
                    target: "history",
                    path = %path.display(),
                    error = %err,
                    "history_record_skipped"
                ),
            }
        }

        sort_newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }
}

fn write_synced(path: &Path, envelope: &PersistedRecord) -> Result<(), HistoryError> {
    let file = fs::File::create(path).map_err(|err| HistoryError::io(path, err))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, envelope).map_err(|source| HistoryError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    writer
        .write_all(b"\n")
        .map_err(|err| HistoryError::io(path, err))?;
    let file = writer
        .into_inner()
        .map_err(|err| HistoryError::io(path, err.into_error()))?;
    file.sync_all().map_err(|err| HistoryError::io(path, err))
}

fn read_envelope(path: &Path) -> Result<AnalysisRecord, HistoryError> {
    let content = fs::read_to_string(path).map_err(|err| HistoryError::io(path, err))?;
    let parsed: PersistedRecord =
        serde_json::from_str(&content).map_err(|source| HistoryError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
    if parsed.version != ENVELOPE_VERSION {
        return Err(HistoryError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: parsed.version,
        });
    }
    Ok(parsed.record)
}

#[async_trait]
impl HistoryPort for FileHistoryStore {
    async fn put(&self, record: &AnalysisRecord) -> Result<(), AnalysisError> {
        let store = self.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || store.save(&record))
            .await
            .map_err(|err| HistoryError::Worker(err.to_string()))??;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<AnalysisRecord, AnalysisError> {
        let store = self.clone();
        let id = id.to_string();
        let record = tokio::task::spawn_blocking(move || store.load(&id))
            .await
            .map_err(|err| HistoryError::Worker(err.to_string()))??;
        Ok(record)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AnalysisRecord>, AnalysisError> {
        let store = self.clone();
        let records = tokio::task::spawn_blocking(move || store.list_recent(limit))
            .await
            .map_err(|err| HistoryError::Worker(err.to_string()))??;
        Ok(records)
    }
}
