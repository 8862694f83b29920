//! Record types for the three memory kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use warden_primitives::{AgentId, EmbeddingVector};

/// The storage kinds the facade fans out across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Events the agent participated in.
    Episodic,
    /// Facts the agent has learned.
    Semantic,
    /// Named procedures with execution statistics.
    Procedural,
}

impl MemoryKind {
    /// Returns the canonical wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
        }
    }
}

/// An episodic memory: something that happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodicEvent {
    /// Record identifier.
    pub id: Uuid,
    /// Owning agent.
    pub agent_id: AgentId,
    /// Short event name, e.g. `chat.completed`.
    pub event_name: String,
    /// Context text describing the event.
    pub context: String,
    /// Outcome text.
    pub outcome: String,
    /// Whether the event concluded successfully.
    pub success: bool,
    /// Importance in `0.0..=1.0`.
    pub importance: f32,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Optional session correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Optional embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingVector>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A semantic memory: something the agent knows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticFact {
    /// Record identifier.
    pub id: Uuid,
    /// Owning agent.
    pub agent_id: AgentId,
    /// Category label, e.g. `domain`.
    pub category: String,
    /// Kind label within the category.
    pub kind: String,
    /// The fact itself.
    pub content: String,
    /// Importance in `0.0..=1.0`.
    pub importance: f32,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Where the fact came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Optional embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingVector>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A procedural memory: something the agent knows how to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Procedure {
    /// Record identifier.
    pub id: Uuid,
    /// Owning agent.
    pub agent_id: AgentId,
    /// Procedure name.
    pub name: String,
    /// Trigger description: when to run the procedure.
    pub trigger: String,
    /// Ordered steps.
    pub steps: Vec<String>,
    /// Optional JSON schema describing the inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs_schema: Option<Value>,
    /// Optional JSON schema describing the outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs_schema: Option<Value>,
    /// Revision counter, bumped on update.
    pub version: u32,
    /// Running average success rate over recorded executions.
    pub success_rate: f64,
    /// Number of recorded executions.
    pub execution_count: u64,
    /// Whether the procedure is active.
    pub active: bool,
    /// Optional embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingVector>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Procedure {
    /// Folds one execution outcome into the running success average.
    ///
    /// O(1): the rate is adjusted incrementally, never recomputed from
    /// history.
    pub fn record_execution(&mut self, success: bool) {
        self.execution_count += 1;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate += (outcome - self.success_rate) / self.execution_count as f64;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn procedure() -> Procedure {
        Procedure {
            id: Uuid::new_v4(),
            agent_id: AgentId::random(),
            name: "deploy".into(),
            trigger: "on release".into(),
            steps: vec!["build".into(), "ship".into()],
            inputs_schema: None,
            outputs_schema: None,
            version: 1,
            success_rate: 0.0,
            execution_count: 0,
            active: true,
            embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn running_average_tracks_outcomes() {
        let mut p = procedure();
        p.record_execution(true);
        assert!((p.success_rate - 1.0).abs() < 1e-9);
        p.record_execution(false);
        assert!((p.success_rate - 0.5).abs() < 1e-9);
        p.record_execution(true);
        assert!((p.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(p.execution_count, 3);
    }
}
