//! Vector store interface and in-memory reference implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use warden_primitives::EmbeddingVector;

use crate::{ServiceError, ServiceResult};

/// A point upserted into a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    /// Point identifier; upserting the same id replaces the point.
    pub id: Uuid,
    /// The embedding.
    pub embedding: EmbeddingVector,
    /// Structured payload returned with search hits.
    #[serde(default)]
    pub payload: Value,
}

/// Parameters for a similarity search.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    /// Query embedding.
    pub embedding: EmbeddingVector,
    /// Payload fields that must equal the given values.
    pub payload_filters: Vec<(String, Value)>,
    /// Minimum cosine similarity for a hit.
    pub min_similarity: f32,
    /// Maximum hits returned.
    pub limit: usize,
}

/// A search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    /// Identifier of the matching point.
    pub id: Uuid,
    /// Cosine similarity to the query embedding.
    pub score: f32,
    /// Payload stored with the point.
    pub payload: Value,
}

/// Vector search backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates the named collection if it does not exist.
    async fn ensure_collection(&self, collection: &str) -> ServiceResult<()>;

    /// Inserts or replaces points in a collection.
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> ServiceResult<()>;

    /// Searches a collection, best matches first.
    async fn search(&self, collection: &str, query: &VectorQuery) -> ServiceResult<Vec<VectorHit>>;

    /// Releases backend resources.
    async fn close(&self) -> ServiceResult<()>;
}

/// In-memory cosine-similarity [`VectorStore`].
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, HashMap<Uuid, VectorPoint>>>,
}

impl InMemoryVectorStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn payload_matches(payload: &Value, filters: &[(String, Value)]) -> bool {
    filters
        .iter()
        .all(|(key, expected)| payload.get(key) == Some(expected))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(&self, collection: &str) -> ServiceResult<()> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| ServiceError::backend("vector store poisoned"))?;
        collections.entry(collection.to_owned()).or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> ServiceResult<()> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| ServiceError::backend("vector store poisoned"))?;
        let entries = collections.entry(collection.to_owned()).or_default();
        for point in points {
            entries.insert(point.id, point);
        }
        Ok(())
    }

    async fn search(&self, collection: &str, query: &VectorQuery) -> ServiceResult<Vec<VectorHit>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| ServiceError::backend("vector store poisoned"))?;
        let Some(entries) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<VectorHit> = entries
            .values()
            .filter(|point| payload_matches(&point.payload, &query.payload_filters))
            .map(|point| VectorHit {
                id: point.id,
                score: query.embedding.cosine_similarity(&point.embedding),
                payload: point.payload.clone(),
            })
            .filter(|hit| hit.score >= query.min_similarity)
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        if query.limit > 0 {
            hits.truncate(query.limit);
        }
        Ok(hits)
    }

    async fn close(&self) -> ServiceResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(values: Vec<f32>, payload: Value) -> VectorPoint {
        VectorPoint {
            id: Uuid::new_v4(),
            embedding: EmbeddingVector::new(values).unwrap(),
            payload,
        }
    }

    #[tokio::test]
    async fn search_orders_by_similarity() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("memories").await.unwrap();
        store
            .upsert(
                "memories",
                vec![
                    point(vec![1.0, 0.0], json!({"agent": "a"})),
                    point(vec![0.0, 1.0], json!({"agent": "a"})),
                    point(vec![0.9, 0.1], json!({"agent": "b"})),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search(
                "memories",
                &VectorQuery {
                    embedding: EmbeddingVector::new(vec![1.0, 0.0]).unwrap(),
                    payload_filters: vec![("agent".into(), json!("a"))],
                    min_similarity: 0.1,
                    limit: 10,
                },
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.9);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_point() {
        let store = InMemoryVectorStore::new();
        let mut p = point(vec![1.0, 0.0], json!({"v": 1}));
        store.upsert("c", vec![p.clone()]).await.unwrap();
        p.payload = json!({"v": 2});
        store.upsert("c", vec![p.clone()]).await.unwrap();

        let hits = store
            .search(
                "c",
                &VectorQuery {
                    embedding: EmbeddingVector::new(vec![1.0, 0.0]).unwrap(),
                    payload_filters: vec![],
                    min_similarity: 0.0,
                    limit: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload, json!({"v": 2}));
    }
}
