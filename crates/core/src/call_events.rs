use crate::models::{Role, TranscriptMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Events emitted by the voice-call SDK, in the shape the browser forwards them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum CallEvent {
    CallStart,
    CallEnd,
    Message { message: SdkMessage },
    SpeechStart,
    SpeechEnd,
    Error { error: Value },
}

/// A `message` payload. Only final transcripts matter to the session;
/// everything else the SDK sends (status updates, function calls, partial
/// transcripts) is carried but ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub transcript_type: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}

impl SdkMessage {
    pub fn final_transcript(role: Role, transcript: impl Into<String>) -> Self {
        Self {
            kind: "transcript".to_string(),
            role: Some(role),
            transcript_type: Some("final".to_string()),
            transcript: Some(transcript.into()),
        }
    }

    pub fn partial_transcript(role: Role, transcript: impl Into<String>) -> Self {
        Self {
            transcript_type: Some("partial".to_string()),
            ..Self::final_transcript(role, transcript)
        }
    }

    /// The transcript turn this message carries, if it is a final transcript.
    pub fn as_final_transcript(&self) -> Option<TranscriptMessage> {
        if self.kind != "transcript" || self.transcript_type.as_deref() != Some("final") {
            return None;
        }
        let role = self.role?;
        let content = self.transcript.clone()?;
        Some(TranscriptMessage { role, content })
    }
}

impl CallEvent {
    pub fn transcript(role: Role, content: impl Into<String>) -> Self {
        CallEvent::Message {
            message: SdkMessage::final_transcript(role, content),
        }
    }
}

/// Fan-out point for SDK events.
///
/// Every listener gets its own [`Subscription`]. Dropping the subscription
/// removes the listener, so each `subscribe` is paired with exactly one
/// release no matter how the listener's scope ends.
#[derive(Debug, Clone, Default)]
pub struct CallEventHub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Debug, Default)]
struct HubInner {
    next_id: u64,
    listeners: HashMap<u64, mpsc::UnboundedSender<CallEvent>>,
}

impl CallEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, tx);
        tracing::debug!(listener = id, "call event listener registered");
        Subscription {
            id,
            hub: self.clone(),
            rx,
        }
    }

    /// Delivers `event` to every live listener and returns how many received it.
    pub fn emit(&self, event: CallEvent) -> usize {
        let mut inner = self.lock();
        inner
            .listeners
            .retain(|_, tx| tx.send(event.clone()).is_ok());
        inner.listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn remove(&self, id: u64) {
        if self.lock().listeners.remove(&id).is_some() {
            tracing::debug!(listener = id, "call event listener removed");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A registered listener on a [`CallEventHub`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    hub: CallEventHub,
    rx: mpsc::UnboundedReceiver<CallEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<CallEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<CallEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.remove(self.id);
    }
}
