//! WebSocket bridge between a browser-hosted voice SDK and a server-side
//! [`CallSession`].
//!
//! The browser forwards SDK events (`{"event": "call-start"}`, ...) and user
//! intents (`{"action": "start"}`) as JSON text frames. The server answers
//! with `start-call`/`stop-call` requests for the SDK and with the session's
//! UI commands.

use crate::error::ApiError;
use crate::{AppState, CurrentUser};
use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use prepme_core::call_api::{CallClient, CallTarget, VariableValues};
use prepme_core::call_events::{CallEvent, CallEventHub};
use prepme_core::call_session::{CallSession, CallStatus, SessionMode, UserAction};
use prepme_core::models::{TranscriptMessage, User};
use prepme_core::repository::GetFeedbackParams;
use prepme_core::{Command, Toast};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Frames sent to the browser.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    StartCall {
        target: CallTarget,
        #[serde(rename = "variableValues")]
        variable_values: VariableValues,
    },
    StopCall,
    Toast(Toast),
    Navigate {
        path: String,
    },
    NavigateAfter {
        path: String,
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },
    Status {
        status: CallStatus,
    },
    Speaking {
        speaking: bool,
    },
    Transcript {
        messages: Vec<TranscriptMessage>,
    },
}

impl From<Command> for ServerMessage {
    fn from(command: Command) -> Self {
        match command {
            Command::Toast(toast) => ServerMessage::Toast(toast),
            Command::Navigate(path) => ServerMessage::Navigate { path },
            Command::NavigateAfter { path, delay } => ServerMessage::NavigateAfter {
                path,
                delay_ms: delay.as_millis() as u64,
            },
            Command::Status(status) => ServerMessage::Status { status },
            Command::Speaking(speaking) => ServerMessage::Speaking { speaking },
            Command::Transcript(messages) => ServerMessage::Transcript { messages },
        }
    }
}

/// Frames received from the browser.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Action(UserAction),
    Event(CallEvent),
}

/// A [`CallClient`] whose SDK lives on the other end of the socket.
pub struct BridgeCallClient {
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl BridgeCallClient {
    pub fn new(outbound: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self { outbound }
    }
}

#[async_trait]
impl CallClient for BridgeCallClient {
    async fn start(&self, target: CallTarget, variable_values: VariableValues) -> Result<()> {
        self.outbound
            .send(ServerMessage::StartCall {
                target,
                variable_values,
            })
            .map_err(|_| anyhow::anyhow!("call bridge is closed"))
    }

    fn stop(&self) -> Result<()> {
        self.outbound
            .send(ServerMessage::StopCall)
            .map_err(|_| anyhow::anyhow!("call bridge is closed"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallQuery {
    pub interview_id: Option<String>,
}

pub async fn call_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<CallQuery>,
) -> Result<Response, ApiError> {
    let mode = resolve_mode(&state, user, query.interview_id).await?;
    tracing::info!(mode = ?mode_name(&mode), "call bridge upgrade accepted");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, mode)))
}

async fn resolve_mode(
    state: &AppState,
    user: User,
    interview_id: Option<String>,
) -> Result<SessionMode, ApiError> {
    let Some(interview_id) = interview_id.filter(|id| !id.is_empty()) else {
        let workflow_id = state
            .workflow_id
            .clone()
            .ok_or_else(|| ApiError::BadRequest("No interview workflow is configured".into()))?;
        return Ok(SessionMode::Generate {
            workflow_id,
            user_name: user.name,
            user_id: user.id,
        });
    };

    let interview = state
        .repository
        .get_interview_by_id(&interview_id)
        .await?
        .ok_or(ApiError::NotFound("Interview"))?;

    // Retaking an interview replaces the caller's earlier feedback.
    let params = GetFeedbackParams {
        interview_id: interview_id.clone(),
        user_id: user.id.clone(),
    };
    let feedback_id = state
        .repository
        .get_feedback_by_interview_id(&params)
        .await?
        .filter(|feedback| feedback.user_id == user.id)
        .map(|feedback| feedback.id);

    Ok(SessionMode::Interview {
        interview_id,
        user_id: user.id,
        questions: interview.questions,
        feedback_id,
    })
}

fn mode_name(mode: &SessionMode) -> &'static str {
    match mode {
        SessionMode::Generate { .. } => "generate",
        SessionMode::Interview { .. } => "interview",
    }
}

/// Runs one call session for the lifetime of the socket.
async fn handle_socket(socket: WebSocket, state: AppState, mode: SessionMode) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (command_tx, mut command_rx) = mpsc::channel::<Command>(32);
    let (action_tx, action_rx) = mpsc::channel::<UserAction>(8);
    let hub = CallEventHub::new();

    let client = Arc::new(BridgeCallClient::new(outbound_tx));
    let mut session = CallSession::new(mode, client, state.feedback.clone(), command_tx);

    // Everything the browser must see goes through this one writer.
    let writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                Some(message) = outbound_rx.recv() => message,
                Some(command) = command_rx.recv() => ServerMessage::from(command),
                else => break,
            };
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode bridge message: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                tracing::info!("Browser went away; dropping outgoing messages.");
                break;
            }
        }
    });

    let reader_hub = hub.clone();
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::info!("WebSocket error: {e}");
                    break;
                }
            };
            match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::Action(action)) => {
                    if action_tx.send(action).await.is_err() {
                        break;
                    }
                }
                Ok(ClientMessage::Event(event)) => {
                    reader_hub.emit(event);
                }
                Err(e) => tracing::warn!("Ignoring unrecognised bridge frame: {e}"),
            }
        }
        // Dropping `action_tx` here ends the session loop.
    });

    session.run(&hub, action_rx).await;
    tracing::info!(status = ?session.status(), "call session closed");
    drop(session);

    if let Err(e) = reader.await {
        tracing::error!("Bridge reader task failed: {e}");
    }
    if let Err(e) = writer.await {
        tracing::error!("Bridge writer task failed: {e}");
    }
}
