use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const USERS: &str = "users";
pub const INTERVIEWS: &str = "interviews";
pub const FEEDBACK: &str = "feedback";

/// Current time as an ISO-8601 UTC string with millisecond precision.
///
/// Timestamps are stored as strings so that lexicographic order in the
/// document store matches chronological order.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interview {
    pub id: String,
    pub role: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub techstack: Vec<String>,
    #[serde(default)]
    pub questions: Vec<String>,
    pub user_id: String,
    #[serde(default)]
    pub finalized: bool,
    pub created_at: String,
}

impl Interview {
    /// Label shown for the interview type; anything mentioning "mix" reads as "Mixed".
    pub fn display_type(&self) -> String {
        if self.kind.to_lowercase().contains("mix") {
            "Mixed".to_string()
        } else {
            self.kind.clone()
        }
    }

    pub fn display_role(&self) -> String {
        capitalize_each_word(&self.role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One finalized turn of a call transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: Role,
    pub content: String,
}

impl TranscriptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// The five fixed scoring categories. The set is closed: a model answer
/// naming anything else fails to deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Communication Skills")]
    CommunicationSkills,
    #[serde(rename = "Technical Knowledge")]
    TechnicalKnowledge,
    #[serde(rename = "Problem-Solving")]
    ProblemSolving,
    #[serde(rename = "Cultural & Role Fit")]
    CulturalAndRoleFit,
    #[serde(rename = "Confidence & Clarity")]
    ConfidenceAndClarity,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::CommunicationSkills,
        Category::TechnicalKnowledge,
        Category::ProblemSolving,
        Category::CulturalAndRoleFit,
        Category::ConfidenceAndClarity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Category::CommunicationSkills => "Communication Skills",
            Category::TechnicalKnowledge => "Technical Knowledge",
            Category::ProblemSolving => "Problem-Solving",
            Category::CulturalAndRoleFit => "Cultural & Role Fit",
            Category::ConfidenceAndClarity => "Confidence & Clarity",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Category::CommunicationSkills => "Clarity, articulation, structured responses.",
            Category::TechnicalKnowledge => "Understanding of key concepts for the role.",
            Category::ProblemSolving => "Ability to analyze problems and propose solutions.",
            Category::CulturalAndRoleFit => "Alignment with company values and job role.",
            Category::ConfidenceAndClarity => {
                "Confidence in responses, engagement, and clarity."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub name: Category,
    pub score: u8,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: String,
    pub interview_id: String,
    pub user_id: String,
    pub total_score: u8,
    pub category_scores: Vec<CategoryScore>,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub final_assessment: String,
    pub created_at: String,
}

/// Upper-cases the first letter of every word.
pub fn capitalize_each_word(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        let is_word = c.is_alphanumeric() || c == '_';
        if is_word && at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !is_word;
    }
    out
}
