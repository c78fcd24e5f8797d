//! HTTP implementation of the backend gateway
//!
//! All endpoints are JSON POSTs except `/message_async` with attachments
//! (multipart form) and the `/health` probe (GET). Authentication is a
//! static `X-API-KEY` header attached to every request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ServerConfig;
use crate::error::{Error, Result};

use super::wire::{
    OutgoingMessage, PauseAck, PollRequest, PollResponse, SendPayload, SendResponse, SessionAck,
};
use super::Gateway;

/// Name of the API key header the backend expects.
const API_KEY_HEADER: &str = "X-API-KEY";

/// HTTP client for the agent backend API
pub struct HttpGateway {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    /// Create a new gateway from server configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .url
            .clone()
            .ok_or_else(|| Error::Config("server.url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        // Build default headers
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            headers.insert(
                API_KEY_HEADER,
                HeaderValue::from_str(api_key)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body and decode a JSON reply.
    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http_client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(map_request_error)?;

        decode_response(response).await
    }

    /// POST a JSON body, accepting any JSON reply shape.
    async fn post_ack<B>(&self, path: &str, body: &B) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let _: serde_json::Value = self.post_json(path, body).await?;
        Ok(())
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn poll(&self, request: &PollRequest) -> Result<PollResponse> {
        self.post_json("/poll", request).await
    }

    async fn send_message(&self, outgoing: &OutgoingMessage) -> Result<SendResponse> {
        if outgoing.attachments.is_empty() {
            let payload = SendPayload {
                text: &outgoing.text,
                context: outgoing.context.as_deref(),
                message_id: &outgoing.message_id,
            };
            return self.post_json("/message_async", &payload).await;
        }

        // Multipart branch: text fields plus one part per attachment.
        let mut form = reqwest::multipart::Form::new()
            .text("text", outgoing.text.clone())
            .text("context", outgoing.context.clone().unwrap_or_default())
            .text("message_id", outgoing.message_id.clone());

        for path in &outgoing.attachments {
            let bytes = tokio::fs::read(path).await?;
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("attachment")
                .to_string();
            form = form.part(
                "attachments",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
        }

        let response = self
            .http_client
            .post(self.url("/message_async"))
            .multipart(form)
            .send()
            .await
            .map_err(map_request_error)?;

        decode_response(response).await
    }

    async fn new_session(&self, current: Option<&str>) -> Result<SessionAck> {
        self.post_json(
            "/chat_create",
            &serde_json::json!({ "current_context": current.unwrap_or("") }),
        )
        .await
    }

    async fn reset_session(&self, context: &str) -> Result<()> {
        self.post_ack("/chat_reset", &serde_json::json!({ "context": context }))
            .await
    }

    async fn remove_session(&self, context: &str) -> Result<()> {
        self.post_ack("/chat_remove", &serde_json::json!({ "context": context }))
            .await
    }

    async fn set_paused(&self, context: &str, paused: bool) -> Result<bool> {
        let ack: PauseAck = self
            .post_json(
                "/pause",
                &serde_json::json!({ "context": context, "paused": paused }),
            )
            .await?;
        Ok(ack.paused.unwrap_or(paused))
    }

    async fn nudge(&self, context: &str) -> Result<()> {
        self.post_ack("/nudge", &serde_json::json!({ "context": context }))
            .await
    }

    async fn health(&self) -> Result<bool> {
        match self.http_client.get(self.url("/health")).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

/// Map a reqwest send failure onto the transport error class.
fn map_request_error(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Transport(format!("request timed out: {}", error))
    } else {
        Error::Transport(format!("HTTP request failed: {}", error))
    }
}

/// Classify the response status, then decode the JSON body.
async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        return Err(Error::Auth(error_text));
    }

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        return Err(Error::Server {
            status: status.as_u16(),
            message: error_text,
        });
    }

    response
        .json()
        .await
        .map_err(|e| Error::Decode(format!("failed to parse response: {}", e)))
}
