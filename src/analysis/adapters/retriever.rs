use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    analysis::{
        error::{AnalysisError, AnalysisErrorKind, index_unavailable},
        ports::{RetrievalRequest, RetrieverPort},
        types::RetrievedPassage,
    },
    inference::{InferenceClient, types::ServiceProfile},
};

fn default_index() -> String {
    "ethical-knowledge".to_string()
}

fn default_vector_field() -> String {
    "embedding".to_string()
}

fn default_text_field() -> String {
    "text".to_string()
}

/// Vector index coordinates for the k-NN backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default = "default_vector_field")]
    pub vector_field: String,
    #[serde(default = "default_text_field")]
    pub text_field: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            index: default_index(),
            vector_field: default_vector_field(),
            text_field: default_text_field(),
        }
    }
}

/// k-NN retriever speaking the OpenSearch `_search` dialect.
#[derive(Clone)]
pub struct OpenSearchRetriever {
    client: InferenceClient,
    service: ServiceProfile,
    index: IndexSettings,
}

impl OpenSearchRetriever {
    pub fn new(client: InferenceClient, service: ServiceProfile, index: IndexSettings) -> Self {
        Self {
            client,
            service,
            index,
        }
    }

    fn build_query(&self, req: &RetrievalRequest) -> Value {
        let mut knn = serde_json::Map::new();
        knn.insert(
            self.index.vector_field.clone(),
            json!({ "vector": req.embedding, "k": req.k }),
        );
        json!({
            "size": req.k,
            "query": { "knn": knn },
            "_source": { "excludes": [self.index.vector_field] },
        })
    }
}

#[async_trait]
impl RetrieverPort for OpenSearchRetriever {
    async fn retrieve(
        &self,
        req: RetrievalRequest,
    ) -> Result<Vec<RetrievedPassage>, AnalysisError> {
        if req.k == 0 {
            return Ok(Vec::new());
        }

        let path = format!("{}/_search", self.index.index);
        let payload = self
            .client
            .post_json(&self.service, &path, &req.request_id, &self.build_query(&req))
            .await
            .map_err(|err| {
                AnalysisError::from_inference(AnalysisErrorKind::IndexUnavailable, &err)
            })?;

        let hits = parse_hits(&payload, &self.index.text_field)?;
        Ok(rank_passages(hits, req.k, req.min_similarity))
    }
}

/// A raw hit in backend order, before filtering and ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredHit {
    pub source_id: String,
    pub text: String,
    pub score: f32,
}

fn parse_hits(payload: &Value, text_field: &str) -> Result<Vec<ScoredHit>, AnalysisError> {
    let hits = payload
        .get("hits")
        .and_then(|hits| hits.get("hits"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            index_unavailable("search response is missing hits.hits").with_retryable(false)
        })?;

    Ok(hits
        .iter()
        .enumerate()
        .filter_map(|(position, hit)| {
            let source = hit.get("_source")?;
            let text = source.get(text_field)?.as_str()?.to_string();
            let source_id = source
                .get("metadata")
                .and_then(|metadata| metadata.get("source"))
                .and_then(Value::as_str)
                .or_else(|| hit.get("_id").and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| format!("hit-{}", position + 1));
            let score = hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            Some(ScoredHit {
                source_id,
                text,
                score,
            })
        })
        .collect())
}

/// Clamps scores into [0, 1], drops hits under `min_similarity`, orders by
/// descending similarity (stable on ties) and assigns ranks 1..n.
pub fn rank_passages(hits: Vec<ScoredHit>, k: usize, min_similarity: f32) -> Vec<RetrievedPassage> {
    let mut kept: Vec<ScoredHit> = hits
        .into_iter()
        .map(|mut hit| {
            hit.score = if hit.score.is_finite() {
                hit.score.clamp(0.0, 1.0)
            } else {
                0.0
            };
            hit
        })
        .filter(|hit| hit.score >= min_similarity)
        .collect();

    kept.sort_by(|left, right| {
        right
            .score
            .partial_cmp(&left.score)
            .unwrap_or(Ordering::Equal)
    });
    kept.truncate(k);

    kept.into_iter()
        .enumerate()
        .map(|(position, hit)| RetrievedPassage {
            text: hit.text,
            source_id: hit.source_id,
            similarity: hit.score,
            rank: position + 1,
        })
        .collect()
}
