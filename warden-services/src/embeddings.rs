//! Embedding generation interface.

use async_trait::async_trait;
use warden_primitives::EmbeddingVector;

use crate::ServiceResult;

/// Generates embeddings for memory and search augmentation.
///
/// `generate` may return `Ok(None)` when the service is unavailable or
/// declines the input; callers proceed without vector augmentation in
/// that case.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Generates an embedding for `text`, or `None` when unavailable.
    async fn generate(&self, text: &str) -> ServiceResult<Option<EmbeddingVector>>;
}

/// Embedding service that always declines.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledEmbeddingService;

#[async_trait]
impl EmbeddingService for DisabledEmbeddingService {
    async fn generate(&self, _text: &str) -> ServiceResult<Option<EmbeddingVector>> {
        Ok(None)
    }
}

const DETERMINISTIC_DIMENSIONS: usize = 16;

/// Deterministic character-histogram embedder for tests and offline use.
///
/// Nearby texts produce nearby vectors, which is enough to exercise
/// similarity search without a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicEmbeddingService;

#[async_trait]
impl EmbeddingService for DeterministicEmbeddingService {
    async fn generate(&self, text: &str) -> ServiceResult<Option<EmbeddingVector>> {
        if text.is_empty() {
            return Ok(None);
        }
        let mut buckets = [0.0_f32; DETERMINISTIC_DIMENSIONS];
        for (i, byte) in text.bytes().enumerate() {
            buckets[(byte as usize + i) % DETERMINISTIC_DIMENSIONS] += 1.0;
        }
        let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut buckets {
                *value /= norm;
            }
        }
        let embedding = EmbeddingVector::new(buckets.to_vec())
            .map_err(|err| crate::ServiceError::backend(err.to_string()))?;
        Ok(Some(embedding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_service_declines() {
        let service = DisabledEmbeddingService;
        assert!(service.generate("anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deterministic_service_is_stable() {
        let service = DeterministicEmbeddingService;
        let a = service.generate("hello world").await.unwrap().unwrap();
        let b = service.generate("hello world").await.unwrap().unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
        assert!(service.generate("").await.unwrap().is_none());
    }
}
