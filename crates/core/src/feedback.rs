use crate::evaluator::{EvaluationRequest, Evaluator};
use crate::models::{Category, CategoryScore, Feedback, Role, TranscriptMessage, timestamp_now};
use crate::repository::Repository;
use crate::store::check_document_id;
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

/// Fewer turns than this carry too little signal to score.
pub const MIN_TRANSCRIPT_TURNS: usize = 4;
/// Minimum number of non-empty candidate turns.
pub const MIN_USER_TURNS: usize = 3;

pub const SYSTEM_INSTRUCTION: &str = "You are a professional interviewer analyzing a mock interview. Your task is to evaluate the candidate based on structured categories";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFeedbackRequest {
    pub interview_id: String,
    pub user_id: String,
    pub transcript: Vec<TranscriptMessage>,
    #[serde(default)]
    pub feedback_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFeedbackResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CreateFeedbackResult {
    pub fn created(feedback_id: String) -> Self {
        Self {
            success: true,
            feedback_id: Some(feedback_id),
            error: None,
        }
    }

    pub fn failed(error: Option<String>) -> Self {
        Self {
            success: false,
            feedback_id: None,
            error,
        }
    }
}

/// Why a transcript was refused before any model call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedbackRejection {
    #[error(
        "Not enough conversation to generate feedback: {found} turns, at least {} needed",
        MIN_TRANSCRIPT_TURNS
    )]
    TooFewTurns { found: usize },
    #[error(
        "Not enough answers to generate feedback: {found} candidate responses, at least {} needed",
        MIN_USER_TURNS
    )]
    TooFewUserTurns { found: usize },
}

/// Model output that does not fit the feedback schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaViolation {
    #[error("model output does not match the feedback schema: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{what} score {score} is outside 0..=100")]
    ScoreOutOfRange { what: String, score: u8 },
    #[error("category '{}' is missing", .0.name())]
    MissingCategory(Category),
    #[error("category '{}' appears more than once", .0.name())]
    DuplicateCategory(Category),
}

pub fn check_transcript(transcript: &[TranscriptMessage]) -> Result<(), FeedbackRejection> {
    if transcript.len() < MIN_TRANSCRIPT_TURNS {
        return Err(FeedbackRejection::TooFewTurns {
            found: transcript.len(),
        });
    }
    let user_turns = transcript
        .iter()
        .filter(|m| m.role == Role::User && !m.content.trim().is_empty())
        .count();
    if user_turns < MIN_USER_TURNS {
        return Err(FeedbackRejection::TooFewUserTurns { found: user_turns });
    }
    Ok(())
}

/// Renders the transcript as `- <role>: <content>` lines in call order.
pub fn format_transcript(transcript: &[TranscriptMessage]) -> String {
    transcript
        .iter()
        .map(|m| format!("- {}: {}\n", m.role.as_str(), m.content))
        .collect()
}

pub fn evaluation_prompt(formatted_transcript: &str) -> String {
    let categories: String = Category::ALL
        .iter()
        .map(|c| format!("        - **{}**: {}\n", c.name(), c.description()))
        .collect();
    format!(
        r#"
        You are an AI interviewer analyzing a mock interview. Your task is to evaluate the candidate based on structured categories. Be thorough and detailed in your analysis. Don't be lenient with the candidate. If there are mistakes or areas for improvement, point them out.
        Transcript:
        {formatted_transcript}

        Please score the candidate from 0 to 100 in the following areas. Do not add categories other than the ones provided:
{categories}"#
    )
}

/// JSON schema the model output must follow.
pub fn feedback_schema() -> Value {
    let names: Vec<&str> = Category::ALL.iter().map(Category::name).collect();
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "totalScore": { "type": "integer", "minimum": 0, "maximum": 100 },
            "categoryScores": {
                "type": "array",
                "minItems": 5,
                "maxItems": 5,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "name": { "type": "string", "enum": names },
                        "score": { "type": "integer", "minimum": 0, "maximum": 100 },
                        "comment": { "type": "string" }
                    },
                    "required": ["name", "score", "comment"]
                }
            },
            "strengths": { "type": "array", "items": { "type": "string" } },
            "areasForImprovement": { "type": "array", "items": { "type": "string" } },
            "finalAssessment": { "type": "string" }
        },
        "required": ["totalScore", "categoryScores", "strengths", "areasForImprovement", "finalAssessment"]
    })
}

/// Validated model output, before it is tied to an interview and a user.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackDraft {
    pub total_score: u8,
    pub category_scores: Vec<CategoryScore>,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub final_assessment: String,
}

impl FeedbackDraft {
    /// Parses and validates model output. Every category appears exactly
    /// once and the scores come back in the canonical category order.
    pub fn from_model_output(value: Value) -> Result<Self, SchemaViolation> {
        let mut draft: FeedbackDraft = serde_json::from_value(value)?;

        if draft.total_score > 100 {
            return Err(SchemaViolation::ScoreOutOfRange {
                what: "total".to_string(),
                score: draft.total_score,
            });
        }
        for cs in &draft.category_scores {
            if cs.score > 100 {
                return Err(SchemaViolation::ScoreOutOfRange {
                    what: cs.name.name().to_string(),
                    score: cs.score,
                });
            }
        }

        draft.category_scores.sort_by_key(|cs| cs.name);
        for pair in draft.category_scores.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(SchemaViolation::DuplicateCategory(pair[0].name));
            }
        }
        for category in Category::ALL {
            if !draft.category_scores.iter().any(|cs| cs.name == category) {
                return Err(SchemaViolation::MissingCategory(category));
            }
        }
        Ok(draft)
    }
}

/// Anything that can turn a finished call into stored feedback.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeedbackService: Send + Sync {
    async fn create_feedback(&self, request: CreateFeedbackRequest) -> CreateFeedbackResult;
}

/// Scores transcripts with an [`Evaluator`] and persists the result.
pub struct FeedbackGenerator {
    repository: Repository,
    evaluator: Arc<dyn Evaluator>,
}

impl FeedbackGenerator {
    pub fn new(repository: Repository, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            repository,
            evaluator,
        }
    }

    async fn generate(&self, request: CreateFeedbackRequest) -> Result<String> {
        if let Some(id) = request.feedback_id.as_deref().filter(|id| !id.is_empty()) {
            check_document_id(id)?;
        }
        let evaluation = EvaluationRequest {
            system: SYSTEM_INSTRUCTION.to_string(),
            prompt: evaluation_prompt(&format_transcript(&request.transcript)),
            schema_name: "feedback".to_string(),
            schema: feedback_schema(),
        };
        let output = self.evaluator.generate_object(&evaluation).await?;
        let draft = FeedbackDraft::from_model_output(output)?;

        // A supplied id replaces the feedback document stored under it.
        let id = request
            .feedback_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.repository.new_id());
        let feedback = Feedback {
            id: id.clone(),
            interview_id: request.interview_id,
            user_id: request.user_id,
            total_score: draft.total_score,
            category_scores: draft.category_scores,
            strengths: draft.strengths,
            areas_for_improvement: draft.areas_for_improvement,
            final_assessment: draft.final_assessment,
            created_at: timestamp_now(),
        };
        self.repository.put_feedback(&feedback).await?;
        Ok(id)
    }
}

#[async_trait]
impl FeedbackService for FeedbackGenerator {
    async fn create_feedback(&self, request: CreateFeedbackRequest) -> CreateFeedbackResult {
        if let Err(rejection) = check_transcript(&request.transcript) {
            tracing::info!(
                interview_id = %request.interview_id,
                "feedback request rejected: {rejection}"
            );
            return CreateFeedbackResult::failed(Some(rejection.to_string()));
        }

        let interview_id = request.interview_id.clone();
        match self.generate(request).await {
            Ok(feedback_id) => {
                tracing::info!(%interview_id, %feedback_id, "feedback saved");
                CreateFeedbackResult::created(feedback_id)
            }
            Err(e) => {
                tracing::error!(%interview_id, "Error saving feedback: {e:?}");
                CreateFeedbackResult::failed(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::MockEvaluator;
    use crate::models::{FEEDBACK, USERS};
    use crate::repository::GetFeedbackParams;
    use crate::store::{DocumentStore, MemoryStore};

    fn turn(role: Role, content: &str) -> TranscriptMessage {
        TranscriptMessage::new(role, content)
    }

    fn valid_transcript() -> Vec<TranscriptMessage> {
        vec![
            turn(Role::Assistant, "Tell me about yourself."),
            turn(Role::User, "I build backend services."),
            turn(Role::Assistant, "What is a mutex?"),
            turn(Role::User, "A lock for exclusive access."),
            turn(Role::Assistant, "Why Rust?"),
            turn(Role::User, "Memory safety without a GC."),
        ]
    }

    fn model_output() -> Value {
        json!({
            "totalScore": 74,
            "categoryScores": [
                {"name": "Confidence & Clarity", "score": 70, "comment": "Steady."},
                {"name": "Communication Skills", "score": 80, "comment": "Clear."},
                {"name": "Technical Knowledge", "score": 75, "comment": "Solid."},
                {"name": "Problem-Solving", "score": 65, "comment": "Fine."},
                {"name": "Cultural & Role Fit", "score": 78, "comment": "Good fit."}
            ],
            "strengths": ["Concise answers"],
            "areasForImprovement": ["Give examples"],
            "finalAssessment": "A promising candidate."
        })
    }

    fn request(transcript: Vec<TranscriptMessage>, feedback_id: Option<&str>) -> CreateFeedbackRequest {
        CreateFeedbackRequest {
            interview_id: "i1".to_string(),
            user_id: "u1".to_string(),
            transcript,
            feedback_id: feedback_id.map(str::to_string),
        }
    }

    fn generator(evaluator: MockEvaluator) -> (FeedbackGenerator, Arc<MemoryStore>, Repository) {
        let store = Arc::new(MemoryStore::new());
        let repository = Repository::new(store.clone());
        (
            FeedbackGenerator::new(repository.clone(), Arc::new(evaluator)),
            store,
            repository,
        )
    }

    #[test]
    fn short_transcripts_are_rejected() {
        for n in 0..MIN_TRANSCRIPT_TURNS {
            let transcript: Vec<_> = valid_transcript().into_iter().take(n).collect();
            assert_eq!(
                check_transcript(&transcript),
                Err(FeedbackRejection::TooFewTurns { found: n })
            );
        }
    }

    #[test]
    fn blank_user_turns_do_not_count() {
        let transcript = vec![
            turn(Role::Assistant, "Q1"),
            turn(Role::User, "A1"),
            turn(Role::Assistant, "Q2"),
            turn(Role::User, "   "),
            turn(Role::Assistant, "Q3"),
            turn(Role::User, "A3"),
        ];
        assert_eq!(
            check_transcript(&transcript),
            Err(FeedbackRejection::TooFewUserTurns { found: 2 })
        );
        assert!(check_transcript(&valid_transcript()).is_ok());
    }

    #[test]
    fn transcript_lines_keep_order() {
        let formatted = format_transcript(&[
            turn(Role::Assistant, "Hello"),
            turn(Role::User, "Hi"),
            turn(Role::System, "note"),
        ]);
        assert_eq!(formatted, "- assistant: Hello\n- user: Hi\n- system: note\n");
    }

    #[test]
    fn prompt_names_all_five_categories() {
        let prompt = evaluation_prompt("- user: hi\n");
        for category in Category::ALL {
            assert!(prompt.contains(category.name()), "{}", category.name());
        }
        assert!(prompt.contains("- user: hi"));
    }

    #[test]
    fn draft_is_reordered_to_canonical_categories() {
        let draft = FeedbackDraft::from_model_output(model_output()).unwrap();
        let names: Vec<Category> = draft.category_scores.iter().map(|c| c.name).collect();
        assert_eq!(names, Category::ALL.to_vec());
    }

    #[test]
    fn draft_rejects_schema_violations() {
        let mut missing = model_output();
        missing["categoryScores"].as_array_mut().unwrap().pop();
        assert!(matches!(
            FeedbackDraft::from_model_output(missing),
            Err(SchemaViolation::MissingCategory(Category::CulturalAndRoleFit))
        ));

        let mut duplicate = model_output();
        duplicate["categoryScores"][0]["name"] = json!("Communication Skills");
        assert!(matches!(
            FeedbackDraft::from_model_output(duplicate),
            Err(SchemaViolation::DuplicateCategory(Category::CommunicationSkills))
        ));

        let mut too_high = model_output();
        too_high["categoryScores"][2]["score"] = json!(140);
        assert!(matches!(
            FeedbackDraft::from_model_output(too_high),
            Err(SchemaViolation::ScoreOutOfRange { .. })
        ));

        let mut renamed = model_output();
        renamed["categoryScores"][0]["name"] = json!("Leadership");
        assert!(matches!(
            FeedbackDraft::from_model_output(renamed),
            Err(SchemaViolation::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn rejected_transcript_makes_no_call_and_no_write() {
        let mut evaluator = MockEvaluator::new();
        evaluator.expect_generate_object().never();
        let (generator, store, _) = generator(evaluator);

        let short = valid_transcript().into_iter().take(3).collect();
        let result = generator.create_feedback(request(short, None)).await;

        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(store.count(FEEDBACK).await, 0);
    }

    #[tokio::test]
    async fn valid_transcript_is_scored_and_saved() {
        let mut evaluator = MockEvaluator::new();
        evaluator
            .expect_generate_object()
            .withf(|req| {
                req.prompt.contains("- user: Memory safety without a GC.")
                    && req.system == SYSTEM_INSTRUCTION
            })
            .times(1)
            .returning(|_| Ok(model_output()));
        let (generator, _, repository) = generator(evaluator);

        let result = generator
            .create_feedback(request(valid_transcript(), None))
            .await;
        assert!(result.success);

        let saved = repository
            .get_feedback_by_interview_id(&GetFeedbackParams {
                interview_id: "i1".to_string(),
                user_id: "u1".to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(saved.id.clone()), result.feedback_id);
        assert_eq!(saved.category_scores.len(), 5);
        assert!(saved.category_scores.iter().all(|c| c.score <= 100));
        let names: Vec<Category> = saved.category_scores.iter().map(|c| c.name).collect();
        assert_eq!(names, Category::ALL.to_vec());
    }

    #[tokio::test]
    async fn same_feedback_id_overwrites() {
        let mut evaluator = MockEvaluator::new();
        evaluator
            .expect_generate_object()
            .times(2)
            .returning(|_| Ok(model_output()));
        let (generator, store, _) = generator(evaluator);

        let first = generator
            .create_feedback(request(valid_transcript(), Some("fb-1")))
            .await;
        let second = generator
            .create_feedback(request(valid_transcript(), Some("fb-1")))
            .await;

        assert_eq!(first.feedback_id.as_deref(), Some("fb-1"));
        assert_eq!(second.feedback_id.as_deref(), Some("fb-1"));
        assert_eq!(store.count(FEEDBACK).await, 1);
        assert!(store.get(FEEDBACK, "fb-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn feedback_ids_that_escape_the_collection_fail_without_evaluating() {
        let mut evaluator = MockEvaluator::new();
        evaluator.expect_generate_object().times(0);
        let (generator, store, _) = generator(evaluator);

        let result = generator
            .create_feedback(request(valid_transcript(), Some("x/../../users/victim")))
            .await;

        assert!(!result.success);
        assert_eq!(result.feedback_id, None);
        assert_eq!(store.count(FEEDBACK).await, 0);
        assert_eq!(store.count(USERS).await, 0);
    }

    #[tokio::test]
    async fn evaluator_failure_is_a_plain_failure() {
        let mut evaluator = MockEvaluator::new();
        evaluator
            .expect_generate_object()
            .returning(|_| Err(anyhow::anyhow!("provider unavailable")));
        let (generator, store, _) = generator(evaluator);

        let result = generator
            .create_feedback(request(valid_transcript(), None))
            .await;

        assert_eq!(result, CreateFeedbackResult::failed(None));
        assert_eq!(store.count(FEEDBACK).await, 0);
    }

    #[tokio::test]
    async fn invalid_model_output_is_not_persisted() {
        let mut evaluator = MockEvaluator::new();
        evaluator.expect_generate_object().returning(|_| {
            let mut out = model_output();
            out["categoryScores"].as_array_mut().unwrap().truncate(3);
            Ok(out)
        });
        let (generator, store, _) = generator(evaluator);

        let result = generator
            .create_feedback(request(valid_transcript(), None))
            .await;

        assert!(!result.success);
        assert_eq!(store.count(FEEDBACK).await, 0);
    }
}
