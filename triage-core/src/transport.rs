//! Shared HTTP plumbing for the inference, directory and auth clients.
//!
//! Every remote failure is folded into [`TransportError`], which knows the
//! fixed message the user sees for it. Nothing here retries.

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::AUTH_TOKEN_KEY;
use crate::storage::KeyValueStorage;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to build request: {0}")]
    Request(String),

    #[error("Server responded with status {status}")]
    Status { status: u16, message: Option<String> },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    pub fn status(status: u16, message: Option<String>) -> Self {
        Self::Status { status, message }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }

    /// Message reported by the server itself, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Status {
                message: Some(message),
                ..
            } => Some(message),
            _ => None,
        }
    }

    /// The fixed, user-facing text for this failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout => "Request timeout. Please try again.".to_string(),
            Self::Network(_) => "Network error. Please check your connection.".to_string(),
            Self::Request(_) => "Could not send the request. Please try again.".to_string(),
            Self::InvalidResponse(_) => {
                "Unexpected response from the inference service.".to_string()
            }
            Self::Status { status, message } => match status {
                401 => "Session expired. Please login again.".to_string(),
                400 => message
                    .clone()
                    .unwrap_or_else(|| "Invalid request. Please check your image.".to_string()),
                413 => "File too large. Please upload a smaller image.".to_string(),
                415 => "Unsupported file type. Please upload a JPEG or PNG image.".to_string(),
                500 => "Server error. Please try again later.".to_string(),
                503 => "Service temporarily unavailable. Please try again.".to_string(),
                other => message
                    .clone()
                    .unwrap_or_else(|| format!("Server error ({}). Please try again.", other)),
            },
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_builder() {
            Self::Request(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Attach `Authorization: Bearer <token>` when a token is stored.
pub(crate) fn with_bearer(
    request: RequestBuilder,
    token_storage: Option<&Arc<dyn KeyValueStorage>>,
) -> RequestBuilder {
    let token = token_storage.and_then(|storage| match storage.get(AUTH_TOKEN_KEY) {
        Ok(token) => token,
        Err(e) => {
            warn!("Could not read auth token: {}", e);
            None
        }
    });
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Send a request and decode a JSON body, mapping every failure mode.
pub(crate) async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, TransportError> {
    let response = request.send().await?;
    read_json(response).await
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        let message = extract_message(&body);
        debug!("Request failed with status {}: {:?}", status, message);
        return Err(TransportError::status(status.as_u16(), message));
    }

    serde_json::from_slice(&body).map_err(|e| TransportError::InvalidResponse(e.to_string()))
}

/// Pull a human-readable message out of an error body (`message` or `detail`).
fn extract_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    ["message", "detail"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
