use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::sse::SseError;

/// Payload that terminates a chat-completion event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP {status} client error: {message}")]
    Http4xx { status: u16, message: String },

    #[error("HTTP {status} server error: {message}")]
    Http5xx { status: u16, message: String },

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Stream read error: {0}")]
    Transport(String),

    #[error("Failed to decode stream event {payload:?}: {source}")]
    Decode {
        payload: String,
        #[source]
        source: DecodeError,
    },

    #[error("Other error: {0}")]
    Other(String),
}

/// Why a response body could not be decoded.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Frame(#[from] SseError),
}

impl From<SseError> for ClientError {
    fn from(error: SseError) -> Self {
        ClientError::Decode {
            payload: error.line().to_string(),
            source: error.into(),
        }
    }
}

impl ClientError {
    /// True when the request never produced a usable response: the endpoint
    /// was unreachable, timed out, or answered with a non-success status.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            ClientError::Connection(_)
                | ClientError::Timeout(_)
                | ClientError::Http4xx { .. }
                | ClientError::Http5xx { .. }
                | ClientError::HttpStatus { .. }
        )
    }

    /// True when the benchmark request was sent and the run failed, as
    /// opposed to the client never getting as far as sending it.
    pub fn is_run_failure(&self) -> bool {
        self.is_request_error()
            || matches!(self, ClientError::Transport(_) | ClientError::Decode { .. })
    }

    /// Classify a reqwest error raised while sending the request.
    fn from_send(error: reqwest::Error, timeout: Option<Duration>) -> Self {
        if error.is_timeout() {
            ClientError::Timeout(timeout.unwrap_or_default())
        } else if error.is_connect() {
            ClientError::Connection(error.to_string())
        } else if error.is_request() {
            ClientError::Connection(format!("Request error: {}", error))
        } else {
            ClientError::Other(error.to_string())
        }
    }

    fn from_status(status: u16, message: String) -> Self {
        match status {
            400..=499 => ClientError::Http4xx { status, message },
            500..=599 => ClientError::Http5xx { status, message },
            _ => ClientError::HttpStatus { status, message },
        }
    }
}

// Request types for the Chat Completions API
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

// Streaming response types. Servers differ in which envelope fields they
// send, so everything but `choices` is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    /// Sent in a final chunk when the request asked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: Delta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ChatCompletionChunk {
    /// Content fragment of the first choice, if it is non-empty.
    ///
    /// Role announcements and finish markers carry no content (or an empty
    /// string) and return `None`.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
            .filter(|content| !content.is_empty())
    }

    /// Reasoning fragment of the first choice, if it is non-empty. Servers
    /// use either `reasoning_content` or `reasoning`.
    pub fn reasoning(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| {
                choice
                    .delta
                    .reasoning_content
                    .as_deref()
                    .or(choice.delta.reasoning.as_deref())
            })
            .filter(|reasoning| !reasoning.is_empty())
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.finish_reason.as_deref())
    }
}

// Models list response
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsResponse {
    pub data: Vec<Model>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub owned_by: String,
}

/// Configuration for creating an OpenAI-compatible client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API, e.g. `http://localhost:8000/v1`
    pub base_url: String,
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
    pub model: String,
    /// Upper bound on the whole request including the streamed body
    pub timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Ask the server to append a usage chunk to the stream
    pub include_usage: bool,
}

impl ClientConfig {
    pub fn new(base_url: &str, api_key: Option<&str>, model: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: api_key.filter(|key| !key.is_empty()).map(str::to_string),
            model: model.to_string(),
            timeout: None,
            connect_timeout: Duration::from_secs(10),
            max_tokens: None,
            temperature: None,
            include_usage: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Option<Duration>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    include_usage: bool,
}

impl OpenAIClient {
    /// Creates a client for a single streaming benchmark request.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ttft_bench::client::{ClientConfig, OpenAIClient};
    ///
    /// let config = ClientConfig::new("http://localhost:8000/v1", None, "llama-3.1-8b");
    /// let client = OpenAIClient::new(config).unwrap();
    /// ```
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut builder = Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::Other(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            model: config.model,
            timeout: config.timeout,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            include_usage: config.include_usage,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// A streaming request carrying `prompt` as the single user message.
    pub fn create_request(&self, prompt: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
            stream_options: self.include_usage.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    /// Send the request and return the response once its status line and
    /// headers arrived. The body is left unread for the caller to stream.
    ///
    /// Exactly one attempt is made.
    pub async fn open_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, ClientError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut req = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request);

        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }

        log::debug!("POST {} (model: {})", url, request.model);

        let response = req
            .send()
            .await
            .map_err(|e| ClientError::from_send(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(ClientError::from_status(status.as_u16(), text));
        }

        Ok(response)
    }
}

/// List the models served at `base_url`.
pub async fn list_models(
    base_url: &str,
    api_key: Option<&str>,
    timeout: Duration,
) -> Result<Vec<Model>, ClientError> {
    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ClientError::Other(e.to_string()))?;

    let url = format!("{}/models", base_url.trim_end_matches('/'));
    let mut req = client.get(&url);

    if let Some(key) = api_key {
        req = req.bearer_auth(key);
    }

    let response = req
        .send()
        .await
        .map_err(|e| ClientError::from_send(e, Some(timeout)))?;

    let status = response.status();
    if !status.is_success() {
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        return Err(ClientError::from_status(status.as_u16(), text));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    let models: ModelsResponse = serde_json::from_str(&body)
        .map_err(|source| ClientError::Decode {
            payload: body,
            source: source.into(),
        })?;

    Ok(models.data)
}

/// Pick the model to benchmark when none was configured: the first one the
/// server lists.
pub async fn detect_model(
    base_url: &str,
    api_key: Option<&str>,
    timeout: Duration,
) -> Result<String, ClientError> {
    let models = list_models(base_url, api_key, timeout).await?;

    let Some(first) = models.first() else {
        return Err(ClientError::Other(format!(
            "No models available from server at {}/models",
            base_url.trim_end_matches('/')
        )));
    };

    if models.len() > 1 {
        log::info!("Found {} models, using: {}", models.len(), first.id);
        log::debug!(
            "Available models: {:?}",
            models.iter().map(|m| &m.id).collect::<Vec<_>>()
        );
    } else {
        log::info!("Detected model: {}", first.id);
    }

    Ok(first.id.clone())
}
