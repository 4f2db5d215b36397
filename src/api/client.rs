use anyhow::{Context, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::messages::{
    AudioTurnResponse, CreateRoomRequest, EndConversationRequest, ErrorBody, RoomCredentials,
    ServiceStatus, StartConversationRequest, StartConversationResponse, TextTurnRequest,
    TextTurnResponse, TtsRequest,
};
use crate::session::PracticeMode;

/// Failure talking to the backend voice service
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Request to {endpoint} failed: {source}")]
    Http {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {message}")]
    Status {
        endpoint: &'static str,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {endpoint}: {message}")]
    InvalidResponse {
        endpoint: &'static str,
        message: String,
    },
}

/// HTTP client for the backend voice service
///
/// Every call carries the bearer token when one is configured.
#[derive(Clone)]
pub struct VoiceApi {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl VoiceApi {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("Voice backend at {}", base_url);

        Ok(Self {
            base_url,
            auth_token: auth_token.filter(|t| !t.is_empty()),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(endpoint: &'static str, builder: RequestBuilder) -> Result<Response, BackendError> {
        debug!("-> {}", endpoint);

        let response = builder
            .send()
            .await
            .map_err(|source| BackendError::Http { endpoint, source })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
        let message = parsed
            .detail
            .or(parsed.error)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

        Err(BackendError::Status {
            endpoint,
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        endpoint: &'static str,
        builder: RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = Self::send(endpoint, builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                endpoint,
                message: e.to_string(),
            })
    }

    /// Negotiate a streaming room for `mode`
    pub async fn create_room(&self, mode: PracticeMode) -> Result<RoomCredentials, BackendError> {
        let builder = self
            .request(Method::POST, "/voice/room")
            .json(&CreateRoomRequest { mode });
        Self::send_json("/voice/room", builder).await
    }

    /// Ask the backend to tear a room down
    pub async fn delete_room(&self, room_name: &str) -> Result<(), BackendError> {
        let path = format!("/voice/room/{}", urlencode_segment(room_name));
        Self::send("/voice/room/{name}", self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    /// Initialize a turn-based conversation; returns the AI's opening line
    pub async fn start_conversation(
        &self,
        session_id: &str,
        mode: PracticeMode,
    ) -> Result<String, BackendError> {
        let builder = self
            .request(Method::POST, "/voice/conversation/start")
            .json(&StartConversationRequest {
                session_id: session_id.to_string(),
                mode,
            });
        let response: StartConversationResponse =
            Self::send_json("/voice/conversation/start", builder).await?;
        Ok(response.message)
    }

    /// Upload one spoken turn
    pub async fn submit_audio(
        &self,
        session_id: &str,
        mode: PracticeMode,
        audio: Vec<u8>,
        file_name: &str,
        mime: &str,
    ) -> Result<AudioTurnResponse, BackendError> {
        let endpoint = "/voice/conversation/audio";

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|e| BackendError::InvalidResponse {
                endpoint,
                message: format!("bad mime type {}: {}", mime, e),
            })?;
        let form = reqwest::multipart::Form::new()
            .part("audio", part)
            .text("sessionId", session_id.to_string())
            .text("mode", mode.as_str());

        let builder = self.request(Method::POST, endpoint).multipart(form);
        Self::send_json(endpoint, builder).await
    }

    /// Submit one typed turn
    pub async fn submit_text(
        &self,
        session_id: &str,
        mode: PracticeMode,
        user_text: &str,
    ) -> Result<TextTurnResponse, BackendError> {
        let builder = self
            .request(Method::POST, "/voice/conversation")
            .json(&TextTurnRequest {
                session_id: session_id.to_string(),
                mode,
                user_text: user_text.to_string(),
            });
        Self::send_json("/voice/conversation", builder).await
    }

    /// Synthesize arbitrary text; returns encoded audio bytes
    pub async fn synthesize(
        &self,
        text: &str,
        emotion: Option<&str>,
        format: &str,
    ) -> Result<Vec<u8>, BackendError> {
        let endpoint = "/voice/tts";
        let builder = self.request(Method::POST, endpoint).json(&TtsRequest {
            text: text.to_string(),
            emotion: emotion.map(str::to_string),
            format: format.to_string(),
        });

        let response = Self::send(endpoint, builder).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| BackendError::Http { endpoint, source })?;
        Ok(bytes.to_vec())
    }

    /// Close a turn-based conversation on the server
    pub async fn end_conversation(&self, session_id: &str) -> Result<(), BackendError> {
        let builder = self
            .request(Method::POST, "/voice/conversation/end")
            .json(&EndConversationRequest {
                session_id: session_id.to_string(),
            });
        Self::send("/voice/conversation/end", builder).await?;
        Ok(())
    }

    /// Readiness of the backend's voice providers
    pub async fn status(&self) -> Result<ServiceStatus, BackendError> {
        Self::send_json("/voice/status", self.request(Method::GET, "/voice/status")).await
    }
}

fn urlencode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}
