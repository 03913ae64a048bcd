pub mod bridge;
pub mod config;
pub mod error;
pub mod routes;

use crate::config::{Config, EvaluatorProvider, StoreBackend};
use crate::error::ApiError;
use anyhow::{Context, Result};
use axum::Router;
use axum::extract::FromRequestParts;
use axum::http::header::{CONTENT_TYPE, COOKIE};
use axum::http::{HeaderValue, Method};
use axum::http::request::Parts;
use axum::routing::{get, post};
use prepme_core::auth::{
    AuthService, FirebaseIdentity, IdentityProvider, SessionTokens, session_from_cookie_header,
};
use prepme_core::evaluator::{Evaluator, GeminiEvaluator, OpenAiEvaluator};
use prepme_core::feedback::FeedbackGenerator;
use prepme_core::models::User;
use prepme_core::repository::Repository;
use prepme_core::store::{DocumentStore, FirestoreStore, MemoryStore};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub repository: Repository,
    pub auth: AuthService,
    pub feedback: Arc<FeedbackGenerator>,
    pub workflow_id: Option<String>,
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(
        repository: Repository,
        evaluator: Arc<dyn Evaluator>,
        identity: Arc<dyn IdentityProvider>,
        tokens: SessionTokens,
    ) -> Self {
        Self {
            auth: AuthService::new(repository.clone(), identity, tokens),
            feedback: Arc::new(FeedbackGenerator::new(repository.clone(), evaluator)),
            repository,
            workflow_id: None,
            secure_cookies: false,
        }
    }

    pub fn with_workflow_id(mut self, workflow_id: Option<String>) -> Self {
        self.workflow_id = workflow_id;
        self
    }

    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    /// Wires the production collaborators described by `config`.
    pub async fn from_config(config: &Config, seed: Option<&Path>) -> Result<Self> {
        let store = build_store(config, seed).await?;
        let repository = Repository::new(store).with_feedback_lookup(config.feedback_lookup);
        let identity = Arc::new(FirebaseIdentity::new(config.firebase_api_key.clone()));
        let tokens = SessionTokens::new(&config.session_secret);

        Ok(Self::new(repository, build_evaluator(config)?, identity, tokens)
            .with_workflow_id(config.workflow_id.clone())
            .with_secure_cookies(config.secure_cookies))
    }
}

fn build_evaluator(config: &Config) -> Result<Arc<dyn Evaluator>> {
    let evaluator: Arc<dyn Evaluator> = match config.provider {
        EvaluatorProvider::Gemini => {
            let key = config
                .gemini_api_key
                .clone()
                .context("GOOGLE_GENERATIVE_AI_API_KEY is not set")?;
            Arc::new(GeminiEvaluator::new(key, config.chat_model.clone()))
        }
        EvaluatorProvider::OpenAI => {
            let key = config
                .openai_api_key
                .clone()
                .context("OPENAI_API_KEY is not set")?;
            Arc::new(OpenAiEvaluator::new(key, config.chat_model.clone()))
        }
    };
    tracing::info!(provider = ?config.provider, model = %config.chat_model, "evaluator ready");
    Ok(evaluator)
}

async fn build_store(config: &Config, seed: Option<&Path>) -> Result<Arc<dyn DocumentStore>> {
    match config.store {
        StoreBackend::Memory => {
            let store = MemoryStore::new();
            if let Some(path) = seed {
                let count = store.load_fixture(path).await?;
                tracing::info!("Seeded {count} documents from {}", path.display());
            }
            Ok(Arc::new(store))
        }
        StoreBackend::Firestore => {
            if seed.is_some() {
                anyhow::bail!("--seed is only supported with DOCUMENT_STORE=memory");
            }
            let project_id = config
                .firebase_project_id
                .as_deref()
                .context("FIREBASE_PROJECT_ID is not set")?;
            let store = match &config.firestore_emulator_host {
                Some(host) => {
                    tracing::info!("Using the Firestore emulator at {host}");
                    FirestoreStore::emulator(host, project_id)
                }
                None => FirestoreStore::new(project_id, config.firestore_access_token.clone()),
            };
            Ok(Arc::new(store))
        }
    }
}

/// The signed-in user of a request. Rejects with 401 when there is none.
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(session_from_cookie_header);
        state
            .auth
            .current_user(token)
            .await
            .map(CurrentUser)
            .ok_or(ApiError::Unauthorized)
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/sign-up", post(routes::sign_up))
        .route("/api/auth/sign-in", post(routes::sign_in))
        .route("/api/auth/sign-out", post(routes::sign_out))
        .route("/api/auth/me", get(routes::me))
        .route("/api/interviews", get(routes::user_interviews))
        .route("/api/interviews/latest", get(routes::latest_interviews))
        .route("/api/interviews/{id}", get(routes::interview))
        .route("/api/interviews/{id}/feedback", get(routes::interview_feedback))
        .route("/api/feedback", post(routes::create_feedback))
        .route("/ws/call", get(bridge::call_handler))
        .with_state(state)
}

/// CORS for a frontend served from other origins. The session cookie is a
/// credential, so only the listed origins are allowed. It is `SameSite=Lax`,
/// so those origins must still be on the same site as the API.
pub fn cors_layer(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true)
}
