use axum::http::HeaderValue;
use prepme_core::evaluator::{DEFAULT_GEMINI_MODEL, DEFAULT_OPENAI_MODEL};
use prepme_core::repository::FeedbackLookup;
use secrecy::SecretString;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported backend providers for feedback generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvaluatorProvider {
    Gemini,
    OpenAI,
}

/// Where documents are kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Memory,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub provider: EvaluatorProvider,
    pub gemini_api_key: Option<SecretString>,
    pub openai_api_key: Option<SecretString>,
    pub chat_model: String,
    pub store: StoreBackend,
    pub firebase_project_id: Option<String>,
    pub firestore_emulator_host: Option<String>,
    pub firestore_access_token: Option<SecretString>,
    pub firebase_api_key: SecretString,
    pub session_secret: SecretString,
    pub secure_cookies: bool,
    pub workflow_id: Option<String>,
    pub feedback_lookup: FeedbackLookup,
    pub allowed_origins: Vec<HeaderValue>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory
    /// and load the following variables:
    ///
    /// *   `BIND_ADDRESS`: The address and port to bind the server to. Defaults to "0.0.0.0:3000".
    /// *   `EVALUATOR_PROVIDER`: "gemini" or "openai". Defaults to "gemini".
    /// *   `GOOGLE_GENERATIVE_AI_API_KEY`: Required if provider is "gemini".
    /// *   `OPENAI_API_KEY`: Required if provider is "openai".
    /// *   `CHAT_MODEL`: (Optional) The model used to score interviews. Defaults per provider.
    /// *   `DOCUMENT_STORE`: "firestore" or "memory". Defaults to "firestore".
    /// *   `FIREBASE_PROJECT_ID`: Required for the firestore store.
    /// *   `FIRESTORE_EMULATOR_HOST`: (Optional) Talk to a local emulator instead.
    /// *   `FIRESTORE_ACCESS_TOKEN`: (Optional) OAuth token for production Firestore.
    /// *   `FIREBASE_API_KEY`: Web API key used to verify sign-in ID tokens.
    /// *   `SESSION_SECRET`: Key that signs session cookies.
    /// *   `APP_ENV`: "production" marks session cookies `Secure`.
    /// *   `VAPI_WORKFLOW_ID`: (Optional) Workflow that generates new interviews.
    /// *   `FEEDBACK_FALLBACK`: (Optional) "true" lets feedback lookups fall back
    ///     to any feedback for the interview.
    /// *   `ALLOWED_ORIGINS`: (Optional) Comma-separated frontend origins allowed
    ///     to call the API with the session cookie. Unset means same-origin only.
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| var(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()));

        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let provider_str = var("EVALUATOR_PROVIDER").unwrap_or_else(|| "gemini".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "gemini" => EvaluatorProvider::Gemini,
            "openai" => EvaluatorProvider::OpenAI,
            other => {
                return Err(ConfigError::InvalidValue(
                    "EVALUATOR_PROVIDER".to_string(),
                    format!("'{other}' is not one of gemini, openai"),
                ));
            }
        };

        let gemini_api_key = var("GOOGLE_GENERATIVE_AI_API_KEY").map(SecretString::from);
        let openai_api_key = var("OPENAI_API_KEY").map(SecretString::from);

        // Validate that the required API key is present for the selected provider.
        match provider {
            EvaluatorProvider::Gemini if gemini_api_key.is_none() => {
                return Err(ConfigError::MissingVar(
                    "GOOGLE_GENERATIVE_AI_API_KEY must be set for 'gemini' provider".to_string(),
                ));
            }
            EvaluatorProvider::OpenAI if openai_api_key.is_none() => {
                return Err(ConfigError::MissingVar(
                    "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                ));
            }
            _ => {}
        }

        let chat_model = var("CHAT_MODEL").unwrap_or_else(|| match provider {
            EvaluatorProvider::Gemini => DEFAULT_GEMINI_MODEL.to_string(),
            EvaluatorProvider::OpenAI => DEFAULT_OPENAI_MODEL.to_string(),
        });

        let store_str = var("DOCUMENT_STORE").unwrap_or_else(|| "firestore".to_string());
        let store = match store_str.to_lowercase().as_str() {
            "firestore" => StoreBackend::Firestore,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue(
                    "DOCUMENT_STORE".to_string(),
                    format!("'{other}' is not one of firestore, memory"),
                ));
            }
        };

        let firebase_project_id = var("FIREBASE_PROJECT_ID");
        if store == StoreBackend::Firestore && firebase_project_id.is_none() {
            return Err(ConfigError::MissingVar(
                "FIREBASE_PROJECT_ID must be set for the 'firestore' store".to_string(),
            ));
        }

        let feedback_lookup = match var("FEEDBACK_FALLBACK").as_deref() {
            Some("true") | Some("1") => FeedbackLookup::AllowInterviewFallback,
            _ => FeedbackLookup::ExactMatch,
        };

        let allowed_origins = var("ALLOWED_ORIGINS")
            .map(|list| parse_origins(&list))
            .transpose()?
            .unwrap_or_default();

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            provider,
            gemini_api_key,
            openai_api_key,
            chat_model,
            store,
            firebase_project_id,
            firestore_emulator_host: var("FIRESTORE_EMULATOR_HOST"),
            firestore_access_token: var("FIRESTORE_ACCESS_TOKEN").map(SecretString::from),
            firebase_api_key: required("FIREBASE_API_KEY").map(SecretString::from)?,
            session_secret: required("SESSION_SECRET").map(SecretString::from)?,
            secure_cookies: var("APP_ENV").is_some_and(|env| env == "production"),
            workflow_id: var("VAPI_WORKFLOW_ID"),
            feedback_lookup,
            allowed_origins,
            log_level,
        })
    }
}

/// Origins are sent with credentials, so a wildcard is never accepted.
fn parse_origins(list: &str) -> Result<Vec<HeaderValue>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue("ALLOWED_ORIGINS".to_string(), reason);
    list.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            if origin == "*" {
                return Err(invalid("'*' cannot be used with session cookies".to_string()));
            }
            HeaderValue::from_str(origin.trim_end_matches('/'))
                .map_err(|e| invalid(format!("'{origin}': {e}")))
        })
        .collect()
}
