use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use std::collections::BTreeMap;

/// Template variables handed to the call provider at start.
pub type VariableValues = BTreeMap<String, String>;

/// What the call provider should run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CallTarget {
    /// A provider-side workflow, identified by id. Used to generate new interviews.
    Workflow(String),
    /// An inline assistant definition. Used to take an existing interview.
    Assistant(InterviewerPersona),
}

/// A trait abstracting the voice-call SDK.
///
/// Only two operations are needed: start a call and stop it. Lifecycle and
/// transcript events travel separately through a
/// [`CallEventHub`](crate::call_events::CallEventHub).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CallClient: Send + Sync {
    /// Starts a call. Resolves once the provider accepted the request,
    /// not once the call is live (that is the `call-start` event).
    async fn start(&self, target: CallTarget, variable_values: VariableValues) -> Result<()>;

    /// Requests the call to stop. Fire-and-forget: there is no confirmation.
    fn stop(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewerPersona {
    pub name: String,
    pub first_message: String,
    pub transcriber: ProviderModel,
    pub voice: Voice,
    pub model: PersonaModel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderModel {
    pub provider: String,
    pub model: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Voice {
    pub provider: String,
    pub voice_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub speed: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonaModel {
    pub provider: String,
    pub model: String,
    pub messages: Vec<PersonaMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonaMessage {
    pub role: String,
    pub content: String,
}

const INTERVIEWER_PROMPT: &str = r#"You are a professional job interviewer conducting a real-time voice interview with a candidate. Your goal is to assess their qualifications, motivation, and fit for the role.

Interview Guidelines:
Follow the structured question flow:
{{questions}}

Engage naturally & react appropriately:
Listen actively to responses and acknowledge them before moving forward.
Ask brief follow-up questions if a response is vague or requires more detail.
Keep the conversation flowing smoothly while maintaining control.

Be professional, yet warm and welcoming:
Use official yet friendly language.
Keep responses concise and to the point (like in a real voice interview).
Avoid robotic phrasing; sound natural and conversational.

Conclude the interview properly:
Thank the candidate for their time.
Inform them that the company will reach out soon with feedback.
End the conversation on a polite and positive note.

Keep all your responses short and simple. This is a voice conversation, so keep your responses short, like in a real conversation. Don't ramble for too long."#;

impl Default for InterviewerPersona {
    fn default() -> Self {
        Self {
            name: "Interviewer".to_string(),
            first_message: "Hello! Thank you for taking the time to speak with me today. I'm excited to learn more about you and your experience.".to_string(),
            transcriber: ProviderModel {
                provider: "deepgram".to_string(),
                model: "nova-2".to_string(),
                language: "en".to_string(),
            },
            voice: Voice {
                provider: "11labs".to_string(),
                voice_id: "sarah".to_string(),
                stability: 0.4,
                similarity_boost: 0.8,
                speed: 0.9,
            },
            model: PersonaModel {
                provider: "openai".to_string(),
                model: "gpt-4".to_string(),
                messages: vec![PersonaMessage {
                    role: "system".to_string(),
                    content: INTERVIEWER_PROMPT.to_string(),
                }],
            },
        }
    }
}

/// Formats prewritten questions as the bullet list the interviewer prompt expects.
pub fn format_questions(questions: &[String]) -> String {
    questions
        .iter()
        .map(|q| format!("- {q}"))
        .collect::<Vec<_>>()
        .join("\n")
}
