pub mod auth;
pub mod call_api;
pub mod call_events;
pub mod call_session;
pub mod evaluator;
pub mod feedback;
pub mod models;
pub mod repository;
pub mod store;

use std::time::Duration;

use call_session::CallStatus;
use models::TranscriptMessage;

/// Represents commands that the call session issues to the runtime.
///
/// The session never touches the UI directly. The runtime (the WebSocket
/// bridge in the API service, or a test harness) decides how each command
/// is rendered or executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Show a transient notification to the user.
    Toast(Toast),
    /// Navigate to the given path right away.
    Navigate(String),
    /// Navigate to the given path once `delay` has passed.
    NavigateAfter { path: String, delay: Duration },
    /// The call status changed.
    Status(CallStatus),
    /// The interviewer started or stopped speaking.
    Speaking(bool),
    /// The most recent transcript turns, oldest first.
    Transcript(Vec<TranscriptMessage>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub title: String,
    pub description: String,
}

impl Toast {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(ToastLevel::Info, title, description)
    }

    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(ToastLevel::Success, title, description)
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(ToastLevel::Error, title, description)
    }

    fn new(level: ToastLevel, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            description: description.into(),
        }
    }
}
