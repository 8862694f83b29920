//! Provider usage accounting.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LlmUsage, ServiceError, ServiceResult};

/// Aggregated usage for one (provider, model) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUsage {
    /// Provider identifier.
    pub provider_id: String,
    /// Model name.
    pub model: String,
    /// Requests served.
    pub requests: u64,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens produced.
    pub output_tokens: u64,
    /// Estimated spend in USD.
    pub cost_usd: f64,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Store accumulating provider usage records.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Folds one completed call into the (provider, model) aggregate.
    async fn record(
        &self,
        provider_id: &str,
        model: &str,
        usage: LlmUsage,
        cost_usd: f64,
    ) -> ServiceResult<()>;

    /// Lists all aggregates.
    async fn list(&self) -> ServiceResult<Vec<ProviderUsage>>;
}

/// In-memory reference implementation of [`UsageStore`].
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    records: RwLock<HashMap<(String, String), ProviderUsage>>,
}

impl InMemoryUsageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn record(
        &self,
        provider_id: &str,
        model: &str,
        usage: LlmUsage,
        cost_usd: f64,
    ) -> ServiceResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| ServiceError::backend("usage store poisoned"))?;
        let entry = records
            .entry((provider_id.to_owned(), model.to_owned()))
            .or_insert(ProviderUsage {
                provider_id: provider_id.to_owned(),
                model: model.to_owned(),
                requests: 0,
                input_tokens: 0,
                output_tokens: 0,
                cost_usd: 0.0,
                updated_at: Utc::now(),
            });
        entry.requests += 1;
        entry.input_tokens += usage.input_tokens;
        entry.output_tokens += usage.output_tokens;
        entry.cost_usd += cost_usd;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn list(&self) -> ServiceResult<Vec<ProviderUsage>> {
        let records = self
            .records
            .read()
            .map_err(|_| ServiceError::backend("usage store poisoned"))?;
        let mut listed: Vec<ProviderUsage> = records.values().cloned().collect();
        listed.sort_by(|a, b| (&a.provider_id, &a.model).cmp(&(&b.provider_id, &b.model)));
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_accumulates_per_model() {
        let store = InMemoryUsageStore::new();
        let usage = LlmUsage {
            input_tokens: 10,
            output_tokens: 5,
        };
        store.record("echo", "echo-1", usage, 0.01).await.unwrap();
        store.record("echo", "echo-1", usage, 0.01).await.unwrap();
        store.record("echo", "echo-2", usage, 0.02).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        let first = &listed[0];
        assert_eq!(first.model, "echo-1");
        assert_eq!(first.requests, 2);
        assert_eq!(first.input_tokens, 20);
        assert!((first.cost_usd - 0.02).abs() < 1e-9);
    }
}
