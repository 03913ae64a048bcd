use crate::models::User;
use crate::repository::Repository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const SESSION_COOKIE: &str = "session";
/// Sessions last one week and are never refreshed.
pub const SESSION_LIFETIME: Duration = Duration::from_secs(60 * 60 * 24 * 7);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// The user id.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionTokenError {
    #[error("session has expired")]
    Expired,
    #[error("session token is invalid")]
    Invalid,
}

/// Issues and verifies the signed tokens carried in the session cookie.
#[derive(Clone)]
pub struct SessionTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionTokens {
    pub fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
        }
    }

    pub fn issue(&self, user_id: &str) -> Result<String> {
        self.issue_at(user_id, Utc::now())
    }

    pub fn issue_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<String> {
        let iat = now.timestamp();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            iat,
            exp: iat + SESSION_LIFETIME.as_secs() as i64,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("Failed to sign session token")
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionTokenError> {
        let validation = Validation::new(Algorithm::HS256);
        jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => SessionTokenError::Expired,
                _ => SessionTokenError::Invalid,
            })
    }
}

/// `Set-Cookie` value carrying a fresh session.
pub fn session_cookie(token: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={token}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_LIFETIME.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that removes the session.
pub fn clear_session_cookie(secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Extracts the session token from a `Cookie` request header.
pub fn session_from_cookie_header(header: &str) -> Option<&str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// An identity vouched for by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: String,
}

/// A trait abstracting the identity provider that issues client ID tokens.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_id_token(&self, id_token: &str) -> Result<VerifiedIdentity>;
}

/// Verifies Firebase ID tokens through the Identity Toolkit REST API.
pub struct FirebaseIdentity {
    client: Client,
    api_key: SecretString,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
}

impl FirebaseIdentity {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://identitytoolkit.googleapis.com".to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn verify_id_token(&self, id_token: &str) -> Result<VerifiedIdentity> {
        let url = format!(
            "{}/v1/accounts:lookup?key={}",
            self.base_url,
            self.api_key.expose_secret()
        );
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "idToken": id_token }))
            .send()
            .await
            .context("Identity lookup failed")?
            .error_for_status()
            .context("Identity provider rejected the ID token")?
            .json::<LookupResponse>()
            .await
            .context("Failed to decode identity lookup response")?;

        let user = resp
            .users
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("ID token does not belong to any user"))?;
        Ok(VerifiedIdentity {
            uid: user.local_id,
            email: user.email.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthResult {
    pub success: bool,
    pub message: String,
}

impl AuthResult {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }

    fn failed(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignUpParams {
    pub uid: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInParams {
    pub email: String,
    pub id_token: String,
}

/// A sign-in result plus the session token to set, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInOutcome {
    pub result: AuthResult,
    pub session_token: Option<String>,
}

/// Account creation and session resolution.
#[derive(Clone)]
pub struct AuthService {
    repository: Repository,
    identity: Arc<dyn IdentityProvider>,
    tokens: SessionTokens,
}

impl AuthService {
    pub fn new(
        repository: Repository,
        identity: Arc<dyn IdentityProvider>,
        tokens: SessionTokens,
    ) -> Self {
        Self {
            repository,
            identity,
            tokens,
        }
    }

    /// Creates the user profile for an account the provider already created.
    ///
    /// The `uid` is stored as sent; it is not checked with the identity
    /// provider. A session is only ever issued by [`AuthService::sign_in`],
    /// for the uid inside a verified ID token.
    pub async fn sign_up(&self, params: SignUpParams) -> AuthResult {
        self.try_sign_up(params).await.unwrap_or_else(|e| {
            tracing::error!("Error creating a user: {e:?}");
            AuthResult::failed("Failed to create an account.")
        })
    }

    async fn try_sign_up(&self, params: SignUpParams) -> Result<AuthResult> {
        if self.repository.get_user(&params.uid).await?.is_some() {
            return Ok(AuthResult::failed("User already exists."));
        }
        self.repository
            .put_user(&User {
                id: params.uid,
                name: params.name,
                email: params.email,
            })
            .await?;
        Ok(AuthResult::ok("User created successfully."))
    }

    pub async fn sign_in(&self, params: SignInParams) -> SignInOutcome {
        match self.try_sign_in(&params).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Error signing in a user: {e:?}");
                SignInOutcome {
                    result: AuthResult::failed("Failed to log in to an account."),
                    session_token: None,
                }
            }
        }
    }

    async fn try_sign_in(&self, params: &SignInParams) -> Result<SignInOutcome> {
        let identity = self.identity.verify_id_token(&params.id_token).await?;

        let known = identity.email.eq_ignore_ascii_case(params.email.trim())
            && self.repository.get_user(&identity.uid).await?.is_some();
        if !known {
            return Ok(SignInOutcome {
                result: AuthResult::failed("User does not exist. Create an account instead."),
                session_token: None,
            });
        }

        let token = self.tokens.issue(&identity.uid)?;
        tracing::info!(user_id = %identity.uid, "user signed in");
        Ok(SignInOutcome {
            result: AuthResult::ok("User signed in successfully."),
            session_token: Some(token),
        })
    }

    pub fn sign_out(&self) -> AuthResult {
        AuthResult::ok("User signed out successfully.")
    }

    /// The user a session token belongs to. Missing, invalid or expired
    /// tokens, and users without a profile, all resolve to `None`.
    pub async fn current_user(&self, session_token: Option<&str>) -> Option<User> {
        let token = session_token?;
        let claims = match self.tokens.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!("rejecting session: {e}");
                return None;
            }
        };
        match self.repository.get_user(&claims.sub).await {
            Ok(user) => user,
            Err(e) => {
                tracing::error!("Error loading the current user: {e:?}");
                None
            }
        }
    }

    pub async fn is_authenticated(&self, session_token: Option<&str>) -> bool {
        self.current_user(session_token).await.is_some()
    }
}
