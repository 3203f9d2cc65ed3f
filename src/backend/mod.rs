// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Caption backends.
//!
//! A backend turns one image plus the current settings into caption text.
//! Every failure maps to a distinct human-readable message, which the
//! scheduler stores verbatim as the image's error message.

pub mod encode;
pub mod gemini;
pub mod openai;

use async_trait::async_trait;

use crate::config::{Config, Protocol};
use crate::model::ImagePayload;

/// Errors from a captioning call.
#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    #[error("Please configure your API Key in Settings.")]
    MissingCredentials,

    #[error("API returned no candidates.")]
    NoCandidates,

    #[error("API returned no choices.")]
    NoChoices,

    #[error("Response Truncated (Max Tokens). Try increasing the limit or shortening the prompt.")]
    Truncated,

    #[error("Response Filtered (Content Policy).")]
    ContentFiltered,

    #[error("API returned an empty response.")]
    EmptyResponse,

    /// The endpoint could not be reached at all.
    #[error("Network Error: Could not connect to {url}.")]
    Network { url: String },

    /// Non-2xx response.
    #[error("API Error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to read image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Failed to generate caption: {0}")]
    Other(String),
}

impl CaptionError {
    /// Map a transport failure. Connection-level failures become `Network`.
    pub(crate) fn from_request(err: reqwest::Error, url: &str) -> Self {
        if err.is_connect() || err.is_timeout() {
            CaptionError::Network {
                url: url.to_string(),
            }
        } else if err.is_decode() {
            CaptionError::InvalidResponse(err.to_string())
        } else {
            CaptionError::Other(err.to_string())
        }
    }
}

#[async_trait]
pub trait CaptionBackend: Send + Sync {
    async fn generate_caption(
        &self,
        payload: &ImagePayload,
        settings: &Config,
    ) -> Result<String, CaptionError>;
}

/// Pull a human-readable message out of an error body: `error.message` when
/// the body is JSON and has one, the raw JSON otherwise, or `fallback`.
pub(crate) fn error_message(body: &str, fallback: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => json
            .pointer("/error/message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| json.to_string()),
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => fallback.to_string(),
    }
}

/// Ensure a 2xx status, otherwise produce [`CaptionError::Api`].
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, CaptionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let reason = status.canonical_reason().unwrap_or("Request failed");
    let body = response.text().await.unwrap_or_default();
    Err(CaptionError::Api {
        status: status.as_u16(),
        message: error_message(&body, reason),
    })
}

/// HTTP backend dispatching on the configured protocol. One pooled client is
/// shared by every worker.
#[derive(Clone, Default)]
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CaptionBackend for HttpBackend {
    async fn generate_caption(
        &self,
        payload: &ImagePayload,
        settings: &Config,
    ) -> Result<String, CaptionError> {
        if !settings.has_credentials() {
            return Err(CaptionError::MissingCredentials);
        }

        let bytes = payload.bytes.clone();
        let encoded = tokio::task::spawn_blocking(move || encode::prepare(&bytes))
            .await
            .map_err(|e| CaptionError::Other(e.to_string()))??;
        tracing::debug!(
            name = %payload.name,
            width = encoded.width,
            height = encoded.height,
            "image prepared"
        );

        match settings.protocol {
            Protocol::Google => gemini::generate(&self.client, &encoded, settings).await,
            Protocol::OpenaiCompatible => openai::generate(&self.client, &encoded, settings).await,
        }
    }
}
