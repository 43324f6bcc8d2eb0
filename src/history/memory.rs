use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    analysis::{error::AnalysisError, ports::HistoryPort, types::AnalysisRecord},
    history::{HistoryError, sort_newest_first},
};

/// Process-local history for tests and ephemeral deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistoryStore {
    records: Arc<RwLock<HashMap<String, AnalysisRecord>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl HistoryPort for InMemoryHistoryStore {
    async fn put(&self, record: &AnalysisRecord) -> Result<(), AnalysisError> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<AnalysisRecord, AnalysisError> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| HistoryError::NotFound(id.to_string()).into())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AnalysisRecord>, AnalysisError> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        sort_newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }
}
