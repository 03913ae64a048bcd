use crate::call_api::{CallClient, CallTarget, InterviewerPersona, VariableValues, format_questions};
use crate::call_events::{CallEvent, CallEventHub};
use crate::feedback::{CreateFeedbackRequest, FeedbackService};
use crate::models::TranscriptMessage;
use crate::{Command, Toast};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Delay before redirecting to the feedback view, long enough for the
/// success toast to be read.
pub const FEEDBACK_REDIRECT_DELAY: Duration = Duration::from_secs(2);
const RECENT_MESSAGES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Inactive,
    Connecting,
    Active,
    Finished,
    Processing,
}

impl CallStatus {
    pub fn can_start(&self) -> bool {
        matches!(self, CallStatus::Inactive | CallStatus::Finished)
    }

    /// A call has been requested or is running.
    pub fn is_live(&self) -> bool {
        matches!(self, CallStatus::Connecting | CallStatus::Active)
    }
}

/// What the call is for.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMode {
    /// Generate a new interview through a provider workflow. The workflow
    /// persists the interview itself, so nothing is stored here.
    Generate {
        workflow_id: String,
        user_name: String,
        user_id: String,
    },
    /// Take an existing interview and get feedback on it.
    Interview {
        interview_id: String,
        user_id: String,
        questions: Vec<String>,
        feedback_id: Option<String>,
    },
}

/// User intents coming from the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum UserAction {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallSessionError {
    #[error("a call cannot be started while {0:?}")]
    Busy(CallStatus),
    #[error("there is no call to end while {0:?}")]
    NotLive(CallStatus),
    #[error("the call could not be started: {0}")]
    StartFailed(String),
}

/// The lifecycle of one voice-interview call.
///
/// `Inactive -> Connecting -> Active -> Finished`, with `Finished` passing
/// through `Processing` while feedback is generated. The session is driven
/// from a single task: SDK events via [`CallSession::handle_event`] and user
/// intents via [`CallSession::start`] / [`CallSession::end`], or both at once
/// through [`CallSession::run`].
pub struct CallSession<C: CallClient, F: FeedbackService> {
    status: CallStatus,
    messages: Vec<TranscriptMessage>,
    is_speaking: bool,
    mode: SessionMode,
    client: Arc<C>,
    feedback: Arc<F>,
    command_tx: mpsc::Sender<Command>,
}

impl<C: CallClient, F: FeedbackService> CallSession<C, F> {
    pub fn new(
        mode: SessionMode,
        client: Arc<C>,
        feedback: Arc<F>,
        command_tx: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            status: CallStatus::Inactive,
            messages: Vec::new(),
            is_speaking: false,
            mode,
            client,
            feedback,
            command_tx,
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn messages(&self) -> &[TranscriptMessage] {
        &self.messages
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Whether the call controls should be disabled.
    pub fn is_disabled(&self) -> bool {
        matches!(self.status, CallStatus::Connecting | CallStatus::Processing)
    }

    /// Starts a call. Only valid from `Inactive` or `Finished`; otherwise the
    /// state is left untouched.
    pub async fn start(&mut self) -> Result<(), CallSessionError> {
        if !self.status.can_start() {
            tracing::debug!(status = ?self.status, "ignoring start request");
            return Err(CallSessionError::Busy(self.status));
        }

        self.messages.clear();
        self.set_status(CallStatus::Connecting).await;
        self.send(Command::Toast(Toast::info(
            "Starting call",
            "Please wait while we connect...",
        )))
        .await;

        let (target, variables) = self.start_parameters();
        if let Err(e) = self.client.start(target, variables).await {
            tracing::error!("Call start error: {e:?}");
            self.set_status(CallStatus::Inactive).await;
            self.send(Command::Toast(Toast::error(
                "Call Start Failed",
                "Unable to start the call. Please try again.",
            )))
            .await;
            return Err(CallSessionError::StartFailed(e.to_string()));
        }
        Ok(())
    }

    /// Ends the call right away. The SDK is asked to stop but its
    /// confirmation is never awaited.
    pub async fn end(&mut self) -> Result<(), CallSessionError> {
        if !self.status.is_live() {
            return Err(CallSessionError::NotLive(self.status));
        }

        self.set_status(CallStatus::Finished).await;
        if let Err(e) = self.client.stop() {
            tracing::error!("Disconnect error: {e:?}");
        }
        self.send(Command::Toast(Toast::info(
            "Call Ended",
            "The call has been disconnected.",
        )))
        .await;

        self.finish().await;
        Ok(())
    }

    pub async fn handle_event(&mut self, event: CallEvent) {
        match event {
            CallEvent::CallStart => {
                if self.status == CallStatus::Connecting {
                    self.set_status(CallStatus::Active).await;
                }
            }
            CallEvent::CallEnd => {
                // After `end` the status is already past `Active`; a late
                // confirmation must not trigger a second feedback run.
                if self.status.is_live() {
                    self.set_status(CallStatus::Finished).await;
                    self.finish().await;
                }
            }
            CallEvent::Message { message } => {
                if let Some(turn) = message.as_final_transcript() {
                    self.messages.push(turn);
                    let from = self.messages.len().saturating_sub(RECENT_MESSAGES);
                    self.send(Command::Transcript(self.messages[from..].to_vec()))
                        .await;
                }
            }
            CallEvent::SpeechStart => {
                self.is_speaking = true;
                self.send(Command::Speaking(true)).await;
            }
            CallEvent::SpeechEnd => {
                self.is_speaking = false;
                self.send(Command::Speaking(false)).await;
            }
            CallEvent::Error { error } => {
                tracing::warn!(status = ?self.status, "call error: {error}");
                if self.status == CallStatus::Connecting {
                    self.set_status(CallStatus::Inactive).await;
                }
                self.send(Command::Toast(Toast::error("Call error", describe_error(&error))))
                    .await;
            }
        }
    }

    /// Drives the session until the action channel closes.
    ///
    /// SDK events are received through a subscription on `hub` that lives
    /// exactly as long as this call, so listeners never accumulate across
    /// sessions.
    pub async fn run(&mut self, hub: &CallEventHub, mut actions: mpsc::Receiver<UserAction>) {
        let mut events = hub.subscribe();
        loop {
            // Events already queued are handled before any action, so an `End`
            // never overtakes transcripts the SDK delivered ahead of it.
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event).await,
                action = actions.recv() => match action {
                    Some(UserAction::Start) => {
                        if let Err(e) = self.start().await {
                            tracing::info!("start refused: {e}");
                        }
                    }
                    Some(UserAction::End) => {
                        if let Err(e) = self.end().await {
                            tracing::info!("end refused: {e}");
                        }
                    }
                    None => break,
                },
            }
        }
    }

    fn start_parameters(&self) -> (CallTarget, VariableValues) {
        let mut variables = VariableValues::new();
        match &self.mode {
            SessionMode::Generate {
                workflow_id,
                user_name,
                user_id,
            } => {
                variables.insert("username".to_string(), user_name.clone());
                variables.insert("userid".to_string(), user_id.clone());
                (CallTarget::Workflow(workflow_id.clone()), variables)
            }
            SessionMode::Interview { questions, .. } => {
                variables.insert("questions".to_string(), format_questions(questions));
                (
                    CallTarget::Assistant(InterviewerPersona::default()),
                    variables,
                )
            }
        }
    }

    async fn finish(&mut self) {
        let (interview_id, user_id, feedback_id) = match &self.mode {
            SessionMode::Generate { .. } => {
                self.send(Command::Navigate("/".to_string())).await;
                return;
            }
            SessionMode::Interview {
                interview_id,
                user_id,
                feedback_id,
                ..
            } => (interview_id.clone(), user_id.clone(), feedback_id.clone()),
        };

        self.set_status(CallStatus::Processing).await;
        self.send(Command::Toast(Toast::info(
            "Analyzing interview",
            "Please wait while we process your interview...",
        )))
        .await;

        let result = self
            .feedback
            .create_feedback(CreateFeedbackRequest {
                interview_id: interview_id.clone(),
                user_id,
                transcript: self.messages.clone(),
                feedback_id,
            })
            .await;

        if result.success && result.feedback_id.is_some() {
            self.send(Command::Toast(Toast::success(
                "Interview processed successfully!",
                "Redirecting to feedback...",
            )))
            .await;
            self.send(Command::NavigateAfter {
                path: format!("/interview/{interview_id}/feedback"),
                delay: FEEDBACK_REDIRECT_DELAY,
            })
            .await;
        } else {
            let description = result
                .error
                .unwrap_or_else(|| "Please try again later".to_string());
            self.send(Command::Toast(Toast::error(
                "Error processing interview",
                description,
            )))
            .await;
            self.send(Command::Navigate("/".to_string())).await;
        }
        self.set_status(CallStatus::Finished).await;
    }

    async fn set_status(&mut self, status: CallStatus) {
        if self.status != status {
            tracing::debug!(from = ?self.status, to = ?status, "call status changed");
            self.status = status;
            self.send(Command::Status(status)).await;
        }
    }

    async fn send(&self, command: Command) {
        if self.command_tx.send(command).await.is_err() {
            tracing::warn!("Command receiver dropped; UI update lost.");
        }
    }
}

fn describe_error(error: &serde_json::Value) -> String {
    error
        .as_str()
        .or_else(|| error.get("message").and_then(|m| m.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_api::MockCallClient;
    use crate::feedback::{CreateFeedbackResult, MockFeedbackService};
    use crate::models::Role;
    use serde_json::json;
    use std::sync::Mutex;

    type Session = CallSession<MockCallClient, MockFeedbackService>;

    fn interview_mode() -> SessionMode {
        SessionMode::Interview {
            interview_id: "i1".to_string(),
            user_id: "u1".to_string(),
            questions: vec!["What is ownership?".to_string(), "What is a trait?".to_string()],
            feedback_id: None,
        }
    }

    fn generate_mode() -> SessionMode {
        SessionMode::Generate {
            workflow_id: "wf-1".to_string(),
            user_name: "Ada".to_string(),
            user_id: "u1".to_string(),
        }
    }

    fn accepting_client() -> MockCallClient {
        let mut client = MockCallClient::new();
        client.expect_start().returning(|_, _| Ok(()));
        client.expect_stop().returning(|| Ok(()));
        client
    }

    fn session(
        mode: SessionMode,
        client: MockCallClient,
        feedback: MockFeedbackService,
    ) -> (Session, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(64);
        (
            CallSession::new(mode, Arc::new(client), Arc::new(feedback), tx),
            rx,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<Command>) -> Vec<Command> {
        let mut out = vec![];
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[tokio::test]
    async fn interview_start_sends_bulleted_questions() {
        let mut client = MockCallClient::new();
        client
            .expect_start()
            .withf(|target, vars| {
                matches!(target, CallTarget::Assistant(_))
                    && vars.get("questions").map(String::as_str)
                        == Some("- What is ownership?\n- What is a trait?")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let (mut s, mut rx) = session(interview_mode(), client, MockFeedbackService::new());

        s.start().await.unwrap();
        assert_eq!(s.status(), CallStatus::Connecting);
        assert!(s.is_disabled());

        s.handle_event(CallEvent::CallStart).await;
        assert_eq!(s.status(), CallStatus::Active);
        assert!(drain(&mut rx).contains(&Command::Status(CallStatus::Active)));
    }

    #[tokio::test]
    async fn generate_start_uses_workflow() {
        let mut client = MockCallClient::new();
        client
            .expect_start()
            .withf(|target, vars| {
                *target == CallTarget::Workflow("wf-1".to_string())
                    && vars.get("username").map(String::as_str) == Some("Ada")
                    && vars.get("userid").map(String::as_str) == Some("u1")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let (mut s, _rx) = session(generate_mode(), client, MockFeedbackService::new());
        s.start().await.unwrap();
    }

    #[tokio::test]
    async fn start_while_active_is_refused() {
        let mut client = MockCallClient::new();
        client.expect_start().times(1).returning(|_, _| Ok(()));
        let (mut s, _rx) = session(interview_mode(), client, MockFeedbackService::new());

        s.start().await.unwrap();
        s.handle_event(CallEvent::CallStart).await;

        assert_eq!(
            s.start().await,
            Err(CallSessionError::Busy(CallStatus::Active))
        );
        assert_eq!(s.status(), CallStatus::Active);
    }

    #[tokio::test]
    async fn failed_start_reverts_to_inactive() {
        let mut client = MockCallClient::new();
        client
            .expect_start()
            .returning(|_, _| Err(anyhow::anyhow!("microphone denied")));
        let (mut s, mut rx) = session(interview_mode(), client, MockFeedbackService::new());

        assert!(matches!(
            s.start().await,
            Err(CallSessionError::StartFailed(_))
        ));
        assert_eq!(s.status(), CallStatus::Inactive);
        let commands = drain(&mut rx);
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::Toast(t) if t.title == "Call Start Failed"
        )));
    }

    #[tokio::test]
    async fn error_while_connecting_reverts_to_inactive() {
        let (mut s, _rx) = session(interview_mode(), accepting_client(), MockFeedbackService::new());
        s.start().await.unwrap();

        s.handle_event(CallEvent::Error {
            error: json!({"message": "no assistant"}),
        })
        .await;
        assert_eq!(s.status(), CallStatus::Inactive);
    }

    #[tokio::test]
    async fn error_while_active_keeps_the_call() {
        let (mut s, mut rx) =
            session(interview_mode(), accepting_client(), MockFeedbackService::new());
        s.start().await.unwrap();
        s.handle_event(CallEvent::CallStart).await;
        drain(&mut rx);

        s.handle_event(CallEvent::Error { error: json!("glitch") }).await;
        assert_eq!(s.status(), CallStatus::Active);
        assert_eq!(
            drain(&mut rx),
            vec![Command::Toast(Toast::error("Call error", "glitch"))]
        );
    }

    #[tokio::test]
    async fn only_final_transcripts_are_kept() {
        let (mut s, _rx) = session(interview_mode(), accepting_client(), MockFeedbackService::new());
        s.start().await.unwrap();
        s.handle_event(CallEvent::CallStart).await;

        s.handle_event(CallEvent::Message {
            message: crate::call_events::SdkMessage::partial_transcript(Role::User, "I thi"),
        })
        .await;
        s.handle_event(CallEvent::transcript(Role::User, "I think so.")).await;

        assert_eq!(
            s.messages(),
            &[TranscriptMessage::new(Role::User, "I think so.")]
        );
    }

    #[tokio::test]
    async fn speaking_indicator_follows_speech_events() {
        let (mut s, _rx) = session(interview_mode(), accepting_client(), MockFeedbackService::new());
        s.handle_event(CallEvent::SpeechStart).await;
        assert!(s.is_speaking());
        s.handle_event(CallEvent::SpeechEnd).await;
        assert!(!s.is_speaking());
    }

    #[tokio::test]
    async fn end_generates_feedback_with_the_transcript_in_order() {
        let captured: Arc<Mutex<Option<CreateFeedbackRequest>>> = Arc::new(Mutex::new(None));
        let sink = captured.clone();
        let mut feedback = MockFeedbackService::new();
        feedback
            .expect_create_feedback()
            .times(1)
            .returning(move |req| {
                *sink.lock().unwrap() = Some(req);
                CreateFeedbackResult::created("fb-9".to_string())
            });

        let mut client = MockCallClient::new();
        client.expect_start().returning(|_, _| Ok(()));
        client.expect_stop().times(1).returning(|| Ok(()));
        let (mut s, mut rx) = session(interview_mode(), client, feedback);

        s.start().await.unwrap();
        s.handle_event(CallEvent::CallStart).await;
        let script = [
            (Role::Assistant, "Welcome. What is ownership?"),
            (Role::User, "Each value has one owner."),
            (Role::Assistant, "And borrowing?"),
            (Role::User, "References without taking ownership."),
            (Role::Assistant, "What is a trait?"),
            (Role::User, "A set of methods a type implements."),
        ];
        for (role, text) in script {
            s.handle_event(CallEvent::transcript(role, text)).await;
        }
        drain(&mut rx);

        s.end().await.unwrap();
        // A late confirmation from the SDK must not run feedback twice.
        s.handle_event(CallEvent::CallEnd).await;

        let request = captured.lock().unwrap().take().unwrap();
        let expected: Vec<TranscriptMessage> = script
            .iter()
            .map(|(role, text)| TranscriptMessage::new(*role, *text))
            .collect();
        assert_eq!(request.transcript, expected);
        assert_eq!(request.interview_id, "i1");
        assert_eq!(request.feedback_id, None);

        let commands = drain(&mut rx);
        assert_eq!(commands.first(), Some(&Command::Status(CallStatus::Finished)));
        assert!(commands.contains(&Command::Status(CallStatus::Processing)));
        assert!(commands.contains(&Command::NavigateAfter {
            path: "/interview/i1/feedback".to_string(),
            delay: FEEDBACK_REDIRECT_DELAY,
        }));
        assert_eq!(s.status(), CallStatus::Finished);
    }

    #[tokio::test]
    async fn feedback_failure_redirects_home() {
        let mut feedback = MockFeedbackService::new();
        feedback
            .expect_create_feedback()
            .times(1)
            .returning(|_| CreateFeedbackResult::failed(Some("too short".to_string())));
        let (mut s, mut rx) = session(interview_mode(), accepting_client(), feedback);

        s.start().await.unwrap();
        s.handle_event(CallEvent::CallStart).await;
        s.handle_event(CallEvent::CallEnd).await;

        let commands = drain(&mut rx);
        assert!(commands.contains(&Command::Toast(Toast::error(
            "Error processing interview",
            "too short"
        ))));
        assert_eq!(commands.last(), Some(&Command::Status(CallStatus::Finished)));
        assert!(commands.contains(&Command::Navigate("/".to_string())));
    }

    #[tokio::test]
    async fn generate_mode_goes_home_without_feedback() {
        let mut feedback = MockFeedbackService::new();
        feedback.expect_create_feedback().never();
        let (mut s, mut rx) = session(generate_mode(), accepting_client(), feedback);

        s.start().await.unwrap();
        s.handle_event(CallEvent::CallStart).await;
        s.end().await.unwrap();

        assert_eq!(s.status(), CallStatus::Finished);
        assert!(drain(&mut rx).contains(&Command::Navigate("/".to_string())));
    }

    #[tokio::test]
    async fn end_without_a_call_is_refused() {
        let (mut s, _rx) = session(interview_mode(), MockCallClient::new(), MockFeedbackService::new());
        assert_eq!(
            s.end().await,
            Err(CallSessionError::NotLive(CallStatus::Inactive))
        );
    }

    #[tokio::test]
    async fn restart_from_finished_clears_the_transcript() {
        let mut feedback = MockFeedbackService::new();
        feedback
            .expect_create_feedback()
            .returning(|_| CreateFeedbackResult::failed(None));
        let (mut s, _rx) = session(interview_mode(), accepting_client(), feedback);

        s.start().await.unwrap();
        s.handle_event(CallEvent::CallStart).await;
        s.handle_event(CallEvent::transcript(Role::User, "hello")).await;
        s.end().await.unwrap();
        assert_eq!(s.status(), CallStatus::Finished);

        s.start().await.unwrap();
        assert_eq!(s.status(), CallStatus::Connecting);
        assert!(s.messages().is_empty());
    }

    #[tokio::test]
    async fn run_releases_its_listener_when_done() {
        let hub = CallEventHub::new();
        let (action_tx, action_rx) = mpsc::channel(8);
        let (mut s, _rx) = session(interview_mode(), accepting_client(), MockFeedbackService::new());

        let driver = async {
            s.run(&hub, action_rx).await;
            s
        };
        let script = async {
            action_tx.send(UserAction::Start).await.unwrap();
            tokio::task::yield_now().await;
            drop(action_tx);
        };
        let (s, ()) = tokio::join!(driver, script);

        assert_eq!(s.status(), CallStatus::Connecting);
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn run_scores_transcripts_queued_before_end() {
        let script = [
            (Role::Assistant, "Welcome. What is ownership?"),
            (Role::User, "Each value has one owner."),
            (Role::Assistant, "And borrowing?"),
            (Role::User, "References without taking ownership."),
            (Role::Assistant, "What is a trait?"),
            (Role::User, "A set of methods a type implements."),
        ];
        let expected: Vec<TranscriptMessage> = script
            .iter()
            .map(|(role, text)| TranscriptMessage::new(*role, *text))
            .collect();

        for _ in 0..20 {
            let captured: Arc<Mutex<Option<CreateFeedbackRequest>>> = Arc::new(Mutex::new(None));
            let sink = captured.clone();
            let mut feedback = MockFeedbackService::new();
            feedback
                .expect_create_feedback()
                .times(1)
                .returning(move |req| {
                    *sink.lock().unwrap() = Some(req);
                    CreateFeedbackResult::created("fb-9".to_string())
                });

            let hub = CallEventHub::new();
            let (action_tx, action_rx) = mpsc::channel(8);
            let (mut s, _rx) = session(interview_mode(), accepting_client(), feedback);
            s.start().await.unwrap();
            s.handle_event(CallEvent::CallStart).await;

            let driver = async {
                s.run(&hub, action_rx).await;
                s
            };
            let browser = async {
                while hub.listener_count() == 0 {
                    tokio::task::yield_now().await;
                }
                // The SDK delivered every turn before the user pressed end.
                for (role, text) in script {
                    hub.emit(CallEvent::transcript(role, text));
                }
                action_tx.send(UserAction::End).await.unwrap();
                drop(action_tx);
            };
            let (s, ()) = tokio::join!(driver, browser);

            let request = captured.lock().unwrap().take().unwrap();
            assert_eq!(request.transcript, expected);
            assert_eq!(s.messages(), expected.as_slice());
            assert_eq!(s.status(), CallStatus::Finished);
        }
    }
}
