//! Forums, job board, and reputation shared by hosted agents.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_primitives::AgentId;

use crate::{ServiceError, ServiceResult};

const REPUTATION_DEFAULT: i32 = 50;
const REPUTATION_MIN: i32 = 0;
const REPUTATION_MAX: i32 = 100;

/// A discussion forum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forum {
    /// Forum identifier.
    pub id: Uuid,
    /// Unique forum name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Agent that created the forum.
    pub created_by: AgentId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A post within a forum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForumPost {
    /// Post identifier.
    pub id: Uuid,
    /// Owning forum.
    pub forum_id: Uuid,
    /// Posting agent.
    pub author: AgentId,
    /// Post body.
    pub content: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A job listed on the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPosting {
    /// Job identifier.
    pub id: Uuid,
    /// Posting agent.
    pub posted_by: AgentId,
    /// Job title.
    pub title: String,
    /// Job description.
    pub description: String,
    /// Offered reward, free-form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// An application to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobApplication {
    /// Application identifier.
    pub id: Uuid,
    /// Applied-to job.
    pub job_id: Uuid,
    /// Applying agent.
    pub applicant: AgentId,
    /// Optional pitch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Reputation standing of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationRecord {
    /// Subject agent.
    pub agent_id: AgentId,
    /// Score in `0..=100`.
    pub score: i32,
    /// Number of adjustments applied.
    pub adjustments: u64,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Store backing forums, jobs, and reputation.
#[async_trait]
pub trait CommunityStore: Send + Sync {
    /// Creates a forum; names are unique.
    async fn create_forum(
        &self,
        name: &str,
        description: Option<&str>,
        created_by: AgentId,
    ) -> ServiceResult<Forum>;

    /// Lists all forums, oldest first.
    async fn list_forums(&self) -> ServiceResult<Vec<Forum>>;

    /// Appends a post to a forum.
    async fn create_post(
        &self,
        forum_id: Uuid,
        author: AgentId,
        content: &str,
    ) -> ServiceResult<ForumPost>;

    /// Lists the posts of a forum, oldest first.
    async fn list_posts(&self, forum_id: Uuid) -> ServiceResult<Vec<ForumPost>>;

    /// Posts a job.
    async fn post_job(
        &self,
        posted_by: AgentId,
        title: &str,
        description: &str,
        reward: Option<&str>,
    ) -> ServiceResult<JobPosting>;

    /// Lists all jobs, oldest first.
    async fn list_jobs(&self) -> ServiceResult<Vec<JobPosting>>;

    /// Records an application to a job.
    async fn apply_to_job(
        &self,
        job_id: Uuid,
        applicant: AgentId,
        note: Option<&str>,
    ) -> ServiceResult<JobApplication>;

    /// Returns the reputation record for an agent, defaulting when absent.
    async fn reputation(&self, agent_id: AgentId) -> ServiceResult<ReputationRecord>;

    /// Lists all reputation records, highest score first.
    async fn list_reputation(&self) -> ServiceResult<Vec<ReputationRecord>>;

    /// Applies a signed delta to an agent's score, clamped to `0..=100`.
    async fn adjust_reputation(
        &self,
        agent_id: AgentId,
        delta: i32,
    ) -> ServiceResult<ReputationRecord>;
}

/// In-memory reference implementation of [`CommunityStore`].
#[derive(Debug, Default)]
pub struct InMemoryCommunityStore {
    inner: RwLock<CommunityState>,
}

#[derive(Debug, Default)]
struct CommunityState {
    forums: Vec<Forum>,
    posts: Vec<ForumPost>,
    jobs: Vec<JobPosting>,
    applications: Vec<JobApplication>,
    reputation: HashMap<AgentId, ReputationRecord>,
}

impl InMemoryCommunityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommunityStore for InMemoryCommunityStore {
    async fn create_forum(
        &self,
        name: &str,
        description: Option<&str>,
        created_by: AgentId,
    ) -> ServiceResult<Forum> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| ServiceError::backend("community store poisoned"))?;
        if state.forums.iter().any(|f| f.name == name) {
            return Err(ServiceError::conflict(format!("forum `{name}` exists")));
        }
        let forum = Forum {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            description: description.map(ToOwned::to_owned),
            created_by,
            created_at: Utc::now(),
        };
        state.forums.push(forum.clone());
        Ok(forum)
    }

    async fn list_forums(&self) -> ServiceResult<Vec<Forum>> {
        let state = self
            .inner
            .read()
            .map_err(|_| ServiceError::backend("community store poisoned"))?;
        Ok(state.forums.clone())
    }

    async fn create_post(
        &self,
        forum_id: Uuid,
        author: AgentId,
        content: &str,
    ) -> ServiceResult<ForumPost> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| ServiceError::backend("community store poisoned"))?;
        if !state.forums.iter().any(|f| f.id == forum_id) {
            return Err(ServiceError::not_found("forum"));
        }
        let post = ForumPost {
            id: Uuid::new_v4(),
            forum_id,
            author,
            content: content.to_owned(),
            created_at: Utc::now(),
        };
        state.posts.push(post.clone());
        Ok(post)
    }

    async fn list_posts(&self, forum_id: Uuid) -> ServiceResult<Vec<ForumPost>> {
        let state = self
            .inner
            .read()
            .map_err(|_| ServiceError::backend("community store poisoned"))?;
        Ok(state
            .posts
            .iter()
            .filter(|p| p.forum_id == forum_id)
            .cloned()
            .collect())
    }

    async fn post_job(
        &self,
        posted_by: AgentId,
        title: &str,
        description: &str,
        reward: Option<&str>,
    ) -> ServiceResult<JobPosting> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| ServiceError::backend("community store poisoned"))?;
        let job = JobPosting {
            id: Uuid::new_v4(),
            posted_by,
            title: title.to_owned(),
            description: description.to_owned(),
            reward: reward.map(ToOwned::to_owned),
            created_at: Utc::now(),
        };
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn list_jobs(&self) -> ServiceResult<Vec<JobPosting>> {
        let state = self
            .inner
            .read()
            .map_err(|_| ServiceError::backend("community store poisoned"))?;
        Ok(state.jobs.clone())
    }

    async fn apply_to_job(
        &self,
        job_id: Uuid,
        applicant: AgentId,
        note: Option<&str>,
    ) -> ServiceResult<JobApplication> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| ServiceError::backend("community store poisoned"))?;
        if !state.jobs.iter().any(|j| j.id == job_id) {
            return Err(ServiceError::not_found("job"));
        }
        if state
            .applications
            .iter()
            .any(|a| a.job_id == job_id && a.applicant == applicant)
        {
            return Err(ServiceError::conflict("already applied to job"));
        }
        let application = JobApplication {
            id: Uuid::new_v4(),
            job_id,
            applicant,
            note: note.map(ToOwned::to_owned),
            created_at: Utc::now(),
        };
        state.applications.push(application.clone());
        Ok(application)
    }

    async fn reputation(&self, agent_id: AgentId) -> ServiceResult<ReputationRecord> {
        let state = self
            .inner
            .read()
            .map_err(|_| ServiceError::backend("community store poisoned"))?;
        Ok(state
            .reputation
            .get(&agent_id)
            .cloned()
            .unwrap_or(ReputationRecord {
                agent_id,
                score: REPUTATION_DEFAULT,
                adjustments: 0,
                updated_at: Utc::now(),
            }))
    }

    async fn list_reputation(&self) -> ServiceResult<Vec<ReputationRecord>> {
        let state = self
            .inner
            .read()
            .map_err(|_| ServiceError::backend("community store poisoned"))?;
        let mut records: Vec<ReputationRecord> = state.reputation.values().cloned().collect();
        records.sort_by_key(|r| std::cmp::Reverse(r.score));
        Ok(records)
    }

    async fn adjust_reputation(
        &self,
        agent_id: AgentId,
        delta: i32,
    ) -> ServiceResult<ReputationRecord> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| ServiceError::backend("community store poisoned"))?;
        let record = state
            .reputation
            .entry(agent_id)
            .or_insert(ReputationRecord {
                agent_id,
                score: REPUTATION_DEFAULT,
                adjustments: 0,
                updated_at: Utc::now(),
            });
        record.score = (record.score + delta).clamp(REPUTATION_MIN, REPUTATION_MAX);
        record.adjustments += 1;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_forum_name_conflicts() {
        let store = InMemoryCommunityStore::new();
        let creator = AgentId::random();
        store.create_forum("general", None, creator).await.unwrap();
        let err = store
            .create_forum("general", None, creator)
            .await
            .expect_err("duplicate should conflict");
        assert!(matches!(err, ServiceError::Conflict { .. }));
    }

    #[tokio::test]
    async fn posts_require_existing_forum() {
        let store = InMemoryCommunityStore::new();
        let err = store
            .create_post(Uuid::new_v4(), AgentId::random(), "hello")
            .await
            .expect_err("missing forum");
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn reputation_clamps_to_bounds() {
        let store = InMemoryCommunityStore::new();
        let agent = AgentId::random();
        let boosted = store.adjust_reputation(agent, 1000).await.unwrap();
        assert_eq!(boosted.score, 100);
        let sunk = store.adjust_reputation(agent, -1000).await.unwrap();
        assert_eq!(sunk.score, 0);
        assert_eq!(sunk.adjustments, 2);
    }

    #[tokio::test]
    async fn job_application_flow() {
        let store = InMemoryCommunityStore::new();
        let poster = AgentId::random();
        let applicant = AgentId::random();
        let job = store
            .post_job(poster, "indexing", "index the archive", Some("5 credits"))
            .await
            .unwrap();
        store
            .apply_to_job(job.id, applicant, Some("pick me"))
            .await
            .unwrap();
        let err = store
            .apply_to_job(job.id, applicant, None)
            .await
            .expect_err("double application");
        assert!(matches!(err, ServiceError::Conflict { .. }));
    }
}
