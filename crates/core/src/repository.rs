use crate::models::{FEEDBACK, Feedback, INTERVIEWS, Interview, USERS, User};
use crate::store::{Direction, DocumentStore, Query, check_document_id, to_fields};
use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;

pub const DEFAULT_LATEST_LIMIT: usize = 20;

/// How [`Repository::get_feedback_by_interview_id`] behaves when no feedback
/// matches the exact (interview, user) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedbackLookup {
    /// Only the caller's own feedback is ever returned.
    #[default]
    ExactMatch,
    /// Fall back to any feedback for the interview. This can show one user's
    /// feedback to another user.
    AllowInterviewFallback,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetLatestInterviewsParams {
    pub user_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetFeedbackParams {
    pub interview_id: String,
    pub user_id: String,
}

/// Read/write access to the `users`, `interviews` and `feedback` collections.
///
/// This is the only writer of those collections.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn DocumentStore>,
    feedback_lookup: FeedbackLookup,
}

impl Repository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            feedback_lookup: FeedbackLookup::default(),
        }
    }

    pub fn with_feedback_lookup(mut self, lookup: FeedbackLookup) -> Self {
        self.feedback_lookup = lookup;
        self
    }

    /// All interviews owned by `user_id`, newest first.
    ///
    /// `None` means the user id was empty or the store failed; an empty list
    /// means the user has no interviews.
    pub async fn get_interviews_by_user_id(&self, user_id: &str) -> Option<Vec<Interview>> {
        if user_id.is_empty() {
            tracing::warn!("No user ID provided for interview query");
            return None;
        }

        let query = Query::new()
            .where_eq("userId", user_id)
            .order_by("createdAt", Direction::Descending);
        match self.query_interviews(&query).await {
            Ok(interviews) => Some(interviews),
            Err(e) => {
                tracing::error!("Error fetching interviews by user id: {e:?}");
                None
            }
        }
    }

    /// Up to `limit` finalized interviews owned by other users, newest first.
    pub async fn get_latest_interviews(
        &self,
        params: &GetLatestInterviewsParams,
    ) -> Option<Vec<Interview>> {
        if params.user_id.is_empty() {
            tracing::warn!("No user ID provided for latest interviews query");
            return None;
        }

        let query = Query::new()
            .where_eq("finalized", true)
            .where_ne("userId", params.user_id.as_str())
            .order_by("createdAt", Direction::Descending)
            .limit(params.limit.unwrap_or(DEFAULT_LATEST_LIMIT));
        match self.query_interviews(&query).await {
            Ok(interviews) => Some(interviews),
            Err(e) => {
                tracing::error!("Error fetching latest interviews: {e:?}");
                None
            }
        }
    }

    /// `None` when no interview has this id, including ids that could not
    /// name a document at all.
    pub async fn get_interview_by_id(&self, id: &str) -> Result<Option<Interview>> {
        if let Err(e) = check_document_id(id) {
            tracing::warn!("Refusing interview lookup: {e}");
            return Ok(None);
        }
        self.store
            .get(INTERVIEWS, id)
            .await?
            .map(|doc| doc.parse())
            .transpose()
    }

    /// The feedback `user_id` received for `interview_id`, subject to the
    /// configured [`FeedbackLookup`] policy.
    pub async fn get_feedback_by_interview_id(
        &self,
        params: &GetFeedbackParams,
    ) -> Result<Option<Feedback>> {
        let exact = Query::new()
            .where_eq("interviewId", params.interview_id.as_str())
            .where_eq("userId", params.user_id.as_str())
            .limit(1);
        if let Some(doc) = self.store.query(FEEDBACK, &exact).await?.into_iter().next() {
            return doc.parse().map(Some);
        }

        if self.feedback_lookup == FeedbackLookup::ExactMatch {
            return Ok(None);
        }

        let by_interview = Query::new()
            .where_eq("interviewId", params.interview_id.as_str())
            .limit(1);
        match self.store.query(FEEDBACK, &by_interview).await?.into_iter().next() {
            Some(doc) => {
                tracing::warn!(
                    interview_id = %params.interview_id,
                    feedback_id = %doc.id,
                    "returning feedback not associated with the requesting user"
                );
                doc.parse().map(Some)
            }
            None => Ok(None),
        }
    }

    /// Writes `feedback` under its id, replacing any existing document.
    /// Fails with [`InvalidDocumentId`](crate::store::InvalidDocumentId) when the id would leave the
    /// `feedback` collection.
    pub async fn put_feedback(&self, feedback: &Feedback) -> Result<()> {
        check_document_id(&feedback.id)?;
        self.store
            .set(FEEDBACK, &feedback.id, to_fields(feedback)?)
            .await
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.store
            .get(USERS, id)
            .await?
            .map(|doc| doc.parse())
            .transpose()
    }

    pub async fn put_user(&self, user: &User) -> Result<()> {
        self.store.set(USERS, &user.id, to_fields(user)?).await
    }

    pub fn new_id(&self) -> String {
        self.store.new_id()
    }

    async fn query_interviews(&self, query: &Query) -> Result<Vec<Interview>> {
        self.store
            .query(INTERVIEWS, query)
            .await?
            .into_iter()
            .map(|doc| doc.parse())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, CategoryScore};
    use crate::store::MemoryStore;

    fn interview(id: &str, owner: &str, finalized: bool, at: &str) -> Interview {
        Interview {
            id: id.to_string(),
            role: "Backend".to_string(),
            kind: "technical".to_string(),
            techstack: vec!["rust".to_string()],
            questions: vec!["Explain ownership.".to_string()],
            user_id: owner.to_string(),
            finalized,
            created_at: at.to_string(),
        }
    }

    fn feedback(id: &str, interview_id: &str, user_id: &str) -> Feedback {
        Feedback {
            id: id.to_string(),
            interview_id: interview_id.to_string(),
            user_id: user_id.to_string(),
            total_score: 70,
            category_scores: vec![CategoryScore {
                name: Category::ProblemSolving,
                score: 70,
                comment: "fine".to_string(),
            }],
            strengths: vec![],
            areas_for_improvement: vec![],
            final_assessment: "ok".to_string(),
            created_at: "2025-01-01T00:00:00.000Z".to_string(),
        }
    }

    async fn seeded() -> Repository {
        let store = Arc::new(MemoryStore::new());
        for iv in [
            interview("i1", "u1", true, "2025-01-01T00:00:00.000Z"),
            interview("i2", "u1", false, "2025-01-03T00:00:00.000Z"),
            interview("i3", "u2", true, "2025-01-02T00:00:00.000Z"),
            interview("i4", "u3", true, "2025-01-05T00:00:00.000Z"),
            interview("i5", "u3", false, "2025-01-06T00:00:00.000Z"),
        ] {
            store
                .set(INTERVIEWS, &iv.id, to_fields(&iv).unwrap())
                .await
                .unwrap();
        }
        Repository::new(store)
    }

    #[tokio::test]
    async fn user_interviews_are_newest_first() {
        let repo = seeded().await;
        let mine = repo.get_interviews_by_user_id("u1").await.unwrap();
        let ids: Vec<_> = mine.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["i2", "i1"]);
    }

    #[tokio::test]
    async fn empty_user_id_is_none_but_no_results_is_empty() {
        let repo = seeded().await;
        assert!(repo.get_interviews_by_user_id("").await.is_none());
        assert_eq!(repo.get_interviews_by_user_id("nobody").await, Some(vec![]));
    }

    #[tokio::test]
    async fn latest_interviews_exclude_the_caller() {
        let repo = seeded().await;
        let params = GetLatestInterviewsParams {
            user_id: "u1".to_string(),
            limit: None,
        };
        let latest = repo.get_latest_interviews(&params).await.unwrap();

        assert!(latest.iter().all(|i| i.user_id != "u1"));
        assert!(latest.iter().all(|i| i.finalized));
        let ids: Vec<_> = latest.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["i4", "i3"]);
    }

    #[tokio::test]
    async fn latest_interviews_respect_limit() {
        let repo = seeded().await;
        let params = GetLatestInterviewsParams {
            user_id: "u1".to_string(),
            limit: Some(1),
        };
        assert_eq!(repo.get_latest_interviews(&params).await.unwrap().len(), 1);

        let anonymous = GetLatestInterviewsParams {
            user_id: String::new(),
            limit: None,
        };
        assert!(repo.get_latest_interviews(&anonymous).await.is_none());
    }

    #[tokio::test]
    async fn interview_by_id() {
        let repo = seeded().await;
        let found = repo.get_interview_by_id("i3").await.unwrap().unwrap();
        assert_eq!(found.user_id, "u2");
        assert!(repo.get_interview_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn path_like_interview_ids_find_nothing() {
        let repo = seeded().await;
        for id in ["..", "../users/u1", "i3/extra", ""] {
            assert!(repo.get_interview_by_id(id).await.unwrap().is_none(), "{id:?}");
        }
    }

    #[tokio::test]
    async fn feedback_cannot_be_written_outside_its_collection() {
        let store = Arc::new(MemoryStore::new());
        let repo = Repository::new(store.clone());

        let err = repo
            .put_feedback(&feedback("x/../../users/victim", "i1", "u1"))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<crate::store::InvalidDocumentId>().is_some());
        assert_eq!(store.count(FEEDBACK).await, 0);
        assert_eq!(store.count(USERS).await, 0);
    }

    #[tokio::test]
    async fn feedback_lookup_exact_pair() {
        let repo = seeded().await;
        repo.put_feedback(&feedback("f1", "i3", "u1")).await.unwrap();
        repo.put_feedback(&feedback("f2", "i3", "u2")).await.unwrap();

        let params = GetFeedbackParams {
            interview_id: "i3".to_string(),
            user_id: "u2".to_string(),
        };
        let found = repo.get_feedback_by_interview_id(&params).await.unwrap();
        assert_eq!(found.unwrap().id, "f2");
    }

    #[tokio::test]
    async fn exact_policy_does_not_fall_back() {
        let repo = seeded().await;
        repo.put_feedback(&feedback("f1", "i3", "u2")).await.unwrap();

        let params = GetFeedbackParams {
            interview_id: "i3".to_string(),
            user_id: "u9".to_string(),
        };
        assert!(repo.get_feedback_by_interview_id(&params).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fallback_policy_returns_interview_feedback() {
        let repo = seeded()
            .await
            .with_feedback_lookup(FeedbackLookup::AllowInterviewFallback);
        repo.put_feedback(&feedback("f1", "i3", "u2")).await.unwrap();

        let params = GetFeedbackParams {
            interview_id: "i3".to_string(),
            user_id: "u9".to_string(),
        };
        let found = repo.get_feedback_by_interview_id(&params).await.unwrap();
        assert_eq!(found.unwrap().user_id, "u2");

        let unknown = GetFeedbackParams {
            interview_id: "nope".to_string(),
            user_id: "u9".to_string(),
        };
        assert!(repo.get_feedback_by_interview_id(&unknown).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn users_round_trip() {
        let repo = seeded().await;
        let user = User {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        };
        repo.put_user(&user).await.unwrap();
        assert_eq!(repo.get_user("u1").await.unwrap(), Some(user));
        assert_eq!(repo.get_user("u2").await.unwrap(), None);
    }
}
