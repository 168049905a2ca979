use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::AuthError,
    models::{AuthResponse, User},
    storage::KeyValueStorage,
    transport::{TransportError, send_json},
};

pub const AUTH_TOKEN_KEY: &str = "auth_token";
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEMO_EMAIL: &str = "demo@medical.com";
pub const DEMO_PASSWORD: &str = "demo123";
const DEMO_TOKEN_PREFIX: &str = "demo_jwt_token_";

const LOGIN_FAILED: &str = "Login failed. Please try again.";
const REGISTRATION_FAILED: &str = "Registration failed. Please try again.";

/// Remote account service.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, TransportError>;
    async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, TransportError>;
    async fn current_user(&self, token: &str) -> Result<User, TransportError>;
}

pub struct HttpAuthApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, TransportError> {
        let body = json!({ "email": email, "password": password });
        send_json(self.client.post(self.url("/auth/login")).json(&body)).await
    }

    async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, TransportError> {
        let body = json!({ "name": name, "email": email, "password": password });
        send_json(self.client.post(self.url("/auth/register")).json(&body)).await
    }

    async fn current_user(&self, token: &str) -> Result<User, TransportError> {
        send_json(self.client.get(self.url("/auth/me")).bearer_auth(token)).await
    }
}

/// Offline stand-in for the account service: one demo login, open registration.
#[derive(Default)]
pub struct SimulatedAuthApi;

impl SimulatedAuthApi {
    pub fn new() -> Self {
        Self
    }

    fn demo_user() -> User {
        User {
            id: 1,
            name: "Dr. Demo User".to_string(),
            email: DEMO_EMAIL.to_string(),
            role: "doctor".to_string(),
        }
    }

    fn issue_token() -> String {
        format!("{}{}", DEMO_TOKEN_PREFIX, Uuid::new_v4().simple())
    }
}

#[async_trait]
impl AuthApi for SimulatedAuthApi {
    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, TransportError> {
        if email == DEMO_EMAIL && password == DEMO_PASSWORD {
            Ok(AuthResponse {
                token: Self::issue_token(),
                user: Self::demo_user(),
            })
        } else {
            Err(TransportError::status(
                401,
                Some("Invalid email or password".to_string()),
            ))
        }
    }

    async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, TransportError> {
        if [name, email, password].iter().any(|field| field.trim().is_empty()) {
            return Err(TransportError::status(
                400,
                Some("All fields are required".to_string()),
            ));
        }
        Ok(AuthResponse {
            token: Self::issue_token(),
            user: User {
                id: u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default(),
                name: name.to_string(),
                email: email.to_string(),
                role: "doctor".to_string(),
            },
        })
    }

    async fn current_user(&self, token: &str) -> Result<User, TransportError> {
        if token.starts_with(DEMO_TOKEN_PREFIX) {
            Ok(Self::demo_user())
        } else {
            Err(TransportError::status(401, None))
        }
    }
}

/// The signed-in clinician. The bearer token lives in the injected storage
/// under [`AUTH_TOKEN_KEY`]; the user profile only in memory.
pub struct AuthSession {
    storage: Arc<dyn KeyValueStorage>,
    api: Arc<dyn AuthApi>,
    user: RwLock<Option<User>>,
}

impl AuthSession {
    pub fn new(storage: Arc<dyn KeyValueStorage>, api: Arc<dyn AuthApi>) -> Self {
        Self {
            storage,
            api,
            user: RwLock::new(None),
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        match self.api.login(email, password).await {
            Ok(response) => self.establish(response).await,
            Err(e) => {
                warn!("Login failed: {}", e);
                Err(AuthError::Rejected(
                    e.server_message().unwrap_or(LOGIN_FAILED).to_string(),
                ))
            }
        }
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User, AuthError> {
        match self.api.register(name, email, password).await {
            Ok(response) => self.establish(response).await,
            Err(e) => {
                warn!("Registration failed: {}", e);
                Err(AuthError::Rejected(
                    e.server_message().unwrap_or(REGISTRATION_FAILED).to_string(),
                ))
            }
        }
    }

    /// Re-validate a token left over from a previous run. A token the server
    /// no longer accepts is discarded.
    pub async fn restore(&self) -> Result<Option<User>, AuthError> {
        let Some(token) = self.storage.get(AUTH_TOKEN_KEY)? else {
            return Ok(None);
        };

        match self.api.current_user(&token).await {
            Ok(user) => {
                info!("Restored session for {}", user.email);
                *self.user.write().await = Some(user.clone());
                Ok(Some(user))
            }
            Err(e) => {
                warn!("Token verification failed: {}", e);
                self.logout().await;
                Ok(None)
            }
        }
    }

    pub async fn logout(&self) {
        if let Err(e) = self.storage.remove(AUTH_TOKEN_KEY) {
            warn!("Failed to remove auth token: {}", e);
        }
        *self.user.write().await = None;
    }

    pub fn token(&self) -> Option<String> {
        self.storage.get(AUTH_TOKEN_KEY).unwrap_or_else(|e| {
            warn!("Could not read auth token: {}", e);
            None
        })
    }

    pub async fn current_user(&self) -> Option<User> {
        self.user.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token().is_some() && self.user.read().await.is_some()
    }

    /// Drop the session when a downstream call reports the token as expired.
    pub async fn handle_transport_error(&self, error: &TransportError) {
        if error.is_unauthorized() {
            warn!("Session expired, clearing auth token");
            self.logout().await;
        }
    }

    async fn establish(&self, response: AuthResponse) -> Result<User, AuthError> {
        self.storage.set(AUTH_TOKEN_KEY, &response.token)?;
        info!("Signed in as {}", response.user.email);
        *self.user.write().await = Some(response.user.clone());
        Ok(response.user)
    }
}
