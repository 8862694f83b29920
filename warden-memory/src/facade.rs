//! Stateless facade over the memory store and optional vector services.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;
use warden_primitives::{AgentId, EmbeddingVector};
use warden_services::{EmbeddingService, VectorPoint, VectorQuery, VectorStore};

use crate::kinds::{EpisodicEvent, Procedure, SemanticFact};
use crate::store::{MemoryHit, MemoryStore, SearchFilter};
use crate::{MemoryError, MemoryResult};

const VECTOR_COLLECTION: &str = "agent_memories";
const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Parameters for recording an episodic event.
#[derive(Debug, Clone)]
pub struct EpisodeParams {
    /// Short event name.
    pub event_name: String,
    /// Context text.
    pub context: String,
    /// Outcome text.
    pub outcome: String,
    /// Whether the event concluded successfully.
    pub success: bool,
    /// Importance in `0.0..=1.0`.
    pub importance: f32,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Optional session correlation id.
    pub session_id: Option<String>,
}

/// Parameters for storing a semantic fact.
#[derive(Debug, Clone)]
pub struct FactParams {
    /// Category label.
    pub category: String,
    /// Kind label within the category.
    pub kind: String,
    /// The fact itself.
    pub content: String,
    /// Importance in `0.0..=1.0`.
    pub importance: f32,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Where the fact came from.
    pub source: Option<String>,
}

/// Parameters for learning a procedure.
#[derive(Debug, Clone)]
pub struct ProcedureParams {
    /// Procedure name.
    pub name: String,
    /// Trigger description.
    pub trigger: String,
    /// Ordered steps.
    pub steps: Vec<String>,
    /// Optional inputs schema.
    pub inputs_schema: Option<Value>,
    /// Optional outputs schema.
    pub outputs_schema: Option<Value>,
}

/// Uniform write/read surface over the three memory kinds.
///
/// The facade is stateless: all durable state lives behind the store and
/// vector interfaces.
pub struct MemoryFacade {
    store: Arc<dyn MemoryStore>,
    vectors: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn EmbeddingService>>,
    encryption_enabled: bool,
}

impl std::fmt::Debug for MemoryFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFacade")
            .field("vectors", &self.vectors.is_some())
            .field("embedder", &self.embedder.is_some())
            .field("encryption_enabled", &self.encryption_enabled)
            .finish_non_exhaustive()
    }
}

impl MemoryFacade {
    /// Creates a facade over the supplied store.
    #[must_use]
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            vectors: None,
            embedder: None,
            encryption_enabled: false,
        }
    }

    /// Attaches a vector store for similarity-augmented search.
    #[must_use]
    pub fn with_vector_store(mut self, vectors: Arc<dyn VectorStore>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    /// Attaches an embedding service for write-time vector generation.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingService>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Enables memory encryption; vector search is disabled while on.
    #[must_use]
    pub const fn with_encryption(mut self, enabled: bool) -> Self {
        self.encryption_enabled = enabled;
        self
    }

    /// Records an episodic event and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] on blank context or a store
    /// error on persistence failure.
    pub async fn record_episode(
        &self,
        agent_id: AgentId,
        params: EpisodeParams,
    ) -> MemoryResult<Uuid> {
        if params.context.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("episode context cannot be empty"));
        }
        let embedding = self.embed(&params.context).await;
        let event = EpisodicEvent {
            id: Uuid::new_v4(),
            agent_id,
            event_name: params.event_name,
            context: params.context,
            outcome: params.outcome,
            success: params.success,
            importance: params.importance.clamp(0.0, 1.0),
            tags: params.tags,
            session_id: params.session_id,
            embedding: embedding.clone(),
            created_at: Utc::now(),
        };
        let id = event.id;
        self.store.insert_episode(event).await?;
        self.mirror_vector(agent_id, id, "episodic", embedding).await;
        Ok(id)
    }

    /// Stores a semantic fact and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] on blank content or a store
    /// error on persistence failure.
    pub async fn store_fact(&self, agent_id: AgentId, params: FactParams) -> MemoryResult<Uuid> {
        if params.content.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("fact content cannot be empty"));
        }
        let embedding = self.embed(&params.content).await;
        let fact = SemanticFact {
            id: Uuid::new_v4(),
            agent_id,
            category: params.category,
            kind: params.kind,
            content: params.content,
            importance: params.importance.clamp(0.0, 1.0),
            tags: params.tags,
            source: params.source,
            embedding: embedding.clone(),
            created_at: Utc::now(),
        };
        let id = fact.id;
        self.store.insert_fact(fact).await?;
        self.mirror_vector(agent_id, id, "semantic", embedding).await;
        Ok(id)
    }

    /// Learns a procedure and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] when the procedure has no
    /// steps, or a store error on persistence failure.
    pub async fn learn_procedure(
        &self,
        agent_id: AgentId,
        params: ProcedureParams,
    ) -> MemoryResult<Uuid> {
        if params.steps.is_empty() {
            return Err(MemoryError::InvalidRecord(
                "procedure must declare at least one step",
            ));
        }
        let embedding = self.embed(&format!("{} {}", params.name, params.trigger)).await;
        let now = Utc::now();
        let procedure = Procedure {
            id: Uuid::new_v4(),
            agent_id,
            name: params.name,
            trigger: params.trigger,
            steps: params.steps,
            inputs_schema: params.inputs_schema,
            outputs_schema: params.outputs_schema,
            version: 1,
            success_rate: 0.0,
            execution_count: 0,
            active: true,
            embedding: embedding.clone(),
            created_at: now,
            updated_at: now,
        };
        let id = procedure.id;
        self.store.upsert_procedure(procedure).await?;
        self.mirror_vector(agent_id, id, "procedural", embedding).await;
        Ok(id)
    }

    /// Returns one procedure.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotFound`] when absent.
    pub async fn get_procedure(&self, agent_id: AgentId, id: Uuid) -> MemoryResult<Procedure> {
        self.store.get_procedure(agent_id, id).await
    }

    /// Finds an agent's active procedures by name or trigger.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn find_procedures(
        &self,
        agent_id: AgentId,
        query: &str,
    ) -> MemoryResult<Vec<Procedure>> {
        self.store.find_procedures(agent_id, query).await
    }

    /// Folds one execution outcome into a procedure's running average.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotFound`] when the procedure is absent.
    pub async fn record_procedure_execution(
        &self,
        agent_id: AgentId,
        id: Uuid,
        success: bool,
    ) -> MemoryResult<Procedure> {
        let mut procedure = self.store.get_procedure(agent_id, id).await?;
        procedure.record_execution(success);
        self.store.upsert_procedure(procedure.clone()).await?;
        Ok(procedure)
    }

    /// Fan-out search across kinds.
    ///
    /// When a query string is present and the embedder is available the
    /// facade attempts similarity search; on embedding failure it falls
    /// back to text matching without surfacing an error.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn search(
        &self,
        agent_id: AgentId,
        mut filter: SearchFilter,
    ) -> MemoryResult<Vec<MemoryHit>> {
        if filter.limit == 0 {
            filter.limit = DEFAULT_SEARCH_LIMIT;
        }

        if let (Some(vectors), Some(query)) = (self.vector_search_target(), filter.query.clone()) {
            if let Some(embedding) = self.embed(&query).await {
                let hits = self
                    .vector_hits(vectors, agent_id, &embedding, &filter)
                    .await;
                if let Some(hits) = hits {
                    return Ok(hits);
                }
            }
        }

        self.store.search(agent_id, &filter).await
    }

    fn vector_search_target(&self) -> Option<&Arc<dyn VectorStore>> {
        if self.encryption_enabled {
            return None;
        }
        self.vectors.as_ref()
    }

    async fn vector_hits(
        &self,
        vectors: &Arc<dyn VectorStore>,
        agent_id: AgentId,
        embedding: &EmbeddingVector,
        filter: &SearchFilter,
    ) -> Option<Vec<MemoryHit>> {
        let query = VectorQuery {
            embedding: embedding.clone(),
            payload_filters: vec![("agent_id".into(), json!(agent_id.to_string()))],
            min_similarity: filter.min_similarity.unwrap_or(0.0),
            limit: filter.limit,
        };
        let found = match vectors.search(VECTOR_COLLECTION, &query).await {
            Ok(found) => found,
            Err(err) => {
                debug!(error = %err, "vector search failed; falling back to text match");
                return None;
            }
        };

        let ids: Vec<Uuid> = found.iter().map(|hit| hit.id).collect();
        let scores: Vec<f32> = found.iter().map(|hit| hit.score).collect();
        let mut hits = self
            .store
            .fetch_many(agent_id, &ids, filter.include_embeddings)
            .await
            .ok()?;
        for (hit, score) in hits.iter_mut().zip(scores) {
            hit.score = Some(score);
        }
        hits.retain(|hit| {
            (filter.kinds.is_empty() || filter.kinds.contains(&hit.kind))
                && filter.min_importance.is_none_or(|min| hit.importance >= min)
                && filter.tags.iter().all(|tag| hit.tags.contains(tag))
        });
        Some(hits)
    }

    async fn embed(&self, text: &str) -> Option<EmbeddingVector> {
        if self.encryption_enabled {
            return None;
        }
        let embedder = self.embedder.as_ref()?;
        match embedder.generate(text).await {
            Ok(embedding) => embedding,
            Err(err) => {
                debug!(error = %err, "embedding generation failed; storing without vector");
                None
            }
        }
    }

    async fn mirror_vector(
        &self,
        agent_id: AgentId,
        id: Uuid,
        kind: &str,
        embedding: Option<EmbeddingVector>,
    ) {
        let (Some(vectors), Some(embedding)) = (self.vector_search_target(), embedding) else {
            return;
        };
        let point = VectorPoint {
            id,
            embedding,
            payload: json!({
                "agent_id": agent_id.to_string(),
                "kind": kind,
            }),
        };
        if let Err(err) = vectors.ensure_collection(VECTOR_COLLECTION).await {
            debug!(error = %err, "vector collection unavailable");
            return;
        }
        if let Err(err) = vectors.upsert(VECTOR_COLLECTION, vec![point]).await {
            debug!(error = %err, "vector mirror failed");
        }
    }
}
