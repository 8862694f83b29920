//! Memory persistence interface and in-memory reference implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_primitives::{AgentId, EmbeddingVector};
use warden_services::ServiceError;

use crate::kinds::{EpisodicEvent, MemoryKind, Procedure, SemanticFact};
use crate::MemoryResult;

/// Filters applied to a fan-out search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Kinds to search; empty means all kinds.
    pub kinds: Vec<MemoryKind>,
    /// Tags that must all be present on a hit.
    pub tags: Vec<String>,
    /// Minimum importance, when set.
    pub min_importance: Option<f32>,
    /// Minimum similarity for vector-augmented hits.
    pub min_similarity: Option<f32>,
    /// Lower time bound, inclusive.
    pub since: Option<DateTime<Utc>>,
    /// Upper time bound, inclusive.
    pub until: Option<DateTime<Utc>>,
    /// Maximum hits returned; zero means unbounded.
    pub limit: usize,
    /// Whether hit embeddings are materialized.
    pub include_embeddings: bool,
    /// Free-text query matched against content fields.
    pub query: Option<String>,
}

impl SearchFilter {
    fn wants(&self, kind: MemoryKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    fn accepts(
        &self,
        importance: f32,
        tags: &[String],
        created_at: DateTime<Utc>,
        haystack: &str,
    ) -> bool {
        if let Some(min) = self.min_importance {
            if importance < min {
                return false;
            }
        }
        if !self.tags.iter().all(|tag| tags.contains(tag)) {
            return false;
        }
        if let Some(since) = self.since {
            if created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if created_at > until {
                return false;
            }
        }
        if let Some(query) = &self.query {
            if !haystack.to_lowercase().contains(&query.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// One search result across any memory kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryHit {
    /// Record identifier.
    pub id: Uuid,
    /// Record kind.
    pub kind: MemoryKind,
    /// Owning agent.
    pub agent_id: AgentId,
    /// Content summary (context, fact content, or procedure name).
    pub summary: String,
    /// Record importance; procedures report their success rate.
    pub importance: f32,
    /// Record tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Similarity score, present on vector-augmented hits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Embedding, present when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingVector>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Persistence interface for the three memory kinds.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persists an episodic event.
    async fn insert_episode(&self, event: EpisodicEvent) -> MemoryResult<()>;

    /// Persists a semantic fact.
    async fn insert_fact(&self, fact: SemanticFact) -> MemoryResult<()>;

    /// Persists or replaces a procedure.
    async fn upsert_procedure(&self, procedure: Procedure) -> MemoryResult<()>;

    /// Returns one procedure.
    async fn get_procedure(&self, agent_id: AgentId, id: Uuid) -> MemoryResult<Procedure>;

    /// Finds procedures whose name or trigger matches `query`; an empty
    /// query lists all of the agent's active procedures.
    async fn find_procedures(&self, agent_id: AgentId, query: &str) -> MemoryResult<Vec<Procedure>>;

    /// Text-and-filter search across kinds, newest first.
    async fn search(&self, agent_id: AgentId, filter: &SearchFilter) -> MemoryResult<Vec<MemoryHit>>;

    /// Materializes hits for the given record ids, preserving input order.
    async fn fetch_many(
        &self,
        agent_id: AgentId,
        ids: &[Uuid],
        include_embeddings: bool,
    ) -> MemoryResult<Vec<MemoryHit>>;
}

/// In-memory reference implementation of [`MemoryStore`].
#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    inner: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    episodes: HashMap<Uuid, EpisodicEvent>,
    facts: HashMap<Uuid, SemanticFact>,
    procedures: HashMap<Uuid, Procedure>,
}

impl InMemoryMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn episode_hit(event: &EpisodicEvent, include_embeddings: bool) -> MemoryHit {
    MemoryHit {
        id: event.id,
        kind: MemoryKind::Episodic,
        agent_id: event.agent_id,
        summary: event.context.clone(),
        importance: event.importance,
        tags: event.tags.clone(),
        score: None,
        embedding: include_embeddings.then(|| event.embedding.clone()).flatten(),
        created_at: event.created_at,
    }
}

fn fact_hit(fact: &SemanticFact, include_embeddings: bool) -> MemoryHit {
    MemoryHit {
        id: fact.id,
        kind: MemoryKind::Semantic,
        agent_id: fact.agent_id,
        summary: fact.content.clone(),
        importance: fact.importance,
        tags: fact.tags.clone(),
        score: None,
        embedding: include_embeddings.then(|| fact.embedding.clone()).flatten(),
        created_at: fact.created_at,
    }
}

fn procedure_hit(procedure: &Procedure, include_embeddings: bool) -> MemoryHit {
    MemoryHit {
        id: procedure.id,
        kind: MemoryKind::Procedural,
        agent_id: procedure.agent_id,
        summary: procedure.name.clone(),
        importance: procedure.success_rate as f32,
        tags: Vec::new(),
        score: None,
        embedding: include_embeddings
            .then(|| procedure.embedding.clone())
            .flatten(),
        created_at: procedure.created_at,
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn insert_episode(&self, event: EpisodicEvent) -> MemoryResult<()> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| ServiceError::backend("memory store poisoned"))?;
        state.episodes.insert(event.id, event);
        Ok(())
    }

    async fn insert_fact(&self, fact: SemanticFact) -> MemoryResult<()> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| ServiceError::backend("memory store poisoned"))?;
        state.facts.insert(fact.id, fact);
        Ok(())
    }

    async fn upsert_procedure(&self, procedure: Procedure) -> MemoryResult<()> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| ServiceError::backend("memory store poisoned"))?;
        state.procedures.insert(procedure.id, procedure);
        Ok(())
    }

    async fn get_procedure(&self, agent_id: AgentId, id: Uuid) -> MemoryResult<Procedure> {
        let state = self
            .inner
            .read()
            .map_err(|_| ServiceError::backend("memory store poisoned"))?;
        state
            .procedures
            .get(&id)
            .filter(|p| p.agent_id == agent_id)
            .cloned()
            .ok_or(crate::MemoryError::NotFound)
    }

    async fn find_procedures(
        &self,
        agent_id: AgentId,
        query: &str,
    ) -> MemoryResult<Vec<Procedure>> {
        let state = self
            .inner
            .read()
            .map_err(|_| ServiceError::backend("memory store poisoned"))?;
        let needle = query.to_lowercase();
        let mut found: Vec<Procedure> = state
            .procedures
            .values()
            .filter(|p| p.agent_id == agent_id && p.active)
            .filter(|p| {
                needle.is_empty()
                    || p.name.to_lowercase().contains(&needle)
                    || p.trigger.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(found)
    }

    async fn search(
        &self,
        agent_id: AgentId,
        filter: &SearchFilter,
    ) -> MemoryResult<Vec<MemoryHit>> {
        let state = self
            .inner
            .read()
            .map_err(|_| ServiceError::backend("memory store poisoned"))?;
        let mut hits = Vec::new();

        if filter.wants(MemoryKind::Episodic) {
            for event in state.episodes.values().filter(|e| e.agent_id == agent_id) {
                let haystack = format!("{} {} {}", event.event_name, event.context, event.outcome);
                if filter.accepts(event.importance, &event.tags, event.created_at, &haystack) {
                    hits.push(episode_hit(event, filter.include_embeddings));
                }
            }
        }
        if filter.wants(MemoryKind::Semantic) {
            for fact in state.facts.values().filter(|f| f.agent_id == agent_id) {
                let haystack = format!("{} {} {}", fact.category, fact.kind, fact.content);
                if filter.accepts(fact.importance, &fact.tags, fact.created_at, &haystack) {
                    hits.push(fact_hit(fact, filter.include_embeddings));
                }
            }
        }
        if filter.wants(MemoryKind::Procedural) {
            for procedure in state
                .procedures
                .values()
                .filter(|p| p.agent_id == agent_id && p.active)
            {
                let haystack = format!("{} {}", procedure.name, procedure.trigger);
                if filter.accepts(
                    procedure.success_rate as f32,
                    &[],
                    procedure.created_at,
                    &haystack,
                ) {
                    hits.push(procedure_hit(procedure, filter.include_embeddings));
                }
            }
        }

        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if filter.limit > 0 {
            hits.truncate(filter.limit);
        }
        Ok(hits)
    }

    async fn fetch_many(
        &self,
        agent_id: AgentId,
        ids: &[Uuid],
        include_embeddings: bool,
    ) -> MemoryResult<Vec<MemoryHit>> {
        let state = self
            .inner
            .read()
            .map_err(|_| ServiceError::backend("memory store poisoned"))?;
        let mut hits = Vec::new();
        for id in ids {
            if let Some(event) = state.episodes.get(id).filter(|e| e.agent_id == agent_id) {
                hits.push(episode_hit(event, include_embeddings));
            } else if let Some(fact) = state.facts.get(id).filter(|f| f.agent_id == agent_id) {
                hits.push(fact_hit(fact, include_embeddings));
            } else if let Some(procedure) =
                state.procedures.get(id).filter(|p| p.agent_id == agent_id)
            {
                hits.push(procedure_hit(procedure, include_embeddings));
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(agent_id: AgentId, content: &str, importance: f32, tags: Vec<String>) -> SemanticFact {
        SemanticFact {
            id: Uuid::new_v4(),
            agent_id,
            category: "domain".into(),
            kind: "fact".into(),
            content: content.into(),
            importance,
            tags,
            source: None,
            embedding: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn search_honors_filters() {
        let store = InMemoryMemoryStore::new();
        let agent = AgentId::random();
        store
            .insert_fact(fact(agent, "rust is fast", 0.9, vec!["lang".into()]))
            .await
            .unwrap();
        store
            .insert_fact(fact(agent, "grass is green", 0.2, vec!["nature".into()]))
            .await
            .unwrap();
        store
            .insert_fact(fact(AgentId::random(), "other agent", 0.9, vec![]))
            .await
            .unwrap();

        let hits = store
            .search(
                agent,
                &SearchFilter {
                    min_importance: Some(0.5),
                    tags: vec!["lang".into()],
                    ..SearchFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].summary, "rust is fast");
    }

    #[tokio::test]
    async fn text_query_matches_content() {
        let store = InMemoryMemoryStore::new();
        let agent = AgentId::random();
        store
            .insert_fact(fact(agent, "The deploy pipeline has three stages", 0.5, vec![]))
            .await
            .unwrap();

        let hits = store
            .search(
                agent,
                &SearchFilter {
                    query: Some("deploy PIPELINE".into()),
                    ..SearchFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn procedures_scope_to_agent() {
        let store = InMemoryMemoryStore::new();
        let agent = AgentId::random();
        let procedure = Procedure {
            id: Uuid::new_v4(),
            agent_id: agent,
            name: "rollback".into(),
            trigger: "on failed deploy".into(),
            steps: vec!["revert".into()],
            inputs_schema: None,
            outputs_schema: None,
            version: 1,
            success_rate: 0.0,
            execution_count: 0,
            active: true,
            embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = procedure.id;
        store.upsert_procedure(procedure).await.unwrap();

        assert!(store.get_procedure(agent, id).await.is_ok());
        assert!(store.get_procedure(AgentId::random(), id).await.is_err());
        let found = store.find_procedures(agent, "deploy").await.unwrap();
        assert_eq!(found.len(), 1);
    }
}
