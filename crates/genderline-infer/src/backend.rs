//! Inference backends.
//!
//! The backend is chosen by configuration from a closed set
//! ([`BackendKind`]); there is no fallback between backends. Each adapter
//! turns its wire response into the same [`ChatReply`].

use std::future::Future;
use std::str::FromStr;

use genderline_core::{HttpConfig, HttpError, build_http_client};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOCAL_URL: &str = "http://localhost:11434";
pub const DEFAULT_HOSTED_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Known backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Ollama native chat API on a local model server
    LocalModel,
    /// OpenAI-compatible hosted chat completions
    HostedChat,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalModel => "local-model",
            Self::HostedChat => "hosted-chat",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = BackendConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "local-model" => Ok(Self::LocalModel),
            "hosted-chat" => Ok(Self::HostedChat),
            other => Err(BackendConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Fatal backend setup errors
#[derive(Debug)]
pub enum BackendConfigError {
    UnknownBackend(String),
    MissingApiKey,
    Client(HttpError),
}

impl std::fmt::Display for BackendConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownBackend(name) => write!(
                f,
                "unknown backend {name:?} (expected \"local-model\" or \"hosted-chat\")"
            ),
            Self::MissingApiKey => write!(
                f,
                "hosted-chat backend needs an API key (set {DEFAULT_API_KEY_VAR} or backend.api_key)"
            ),
            Self::Client(e) => write!(f, "cannot build HTTP client: {e}"),
        }
    }
}

impl std::error::Error for BackendConfigError {}

/// Per-call failure; the author gets no row
#[derive(Debug)]
pub enum BackendError {
    Http(HttpError),
    /// 2xx response whose envelope did not match the backend's shape
    Envelope(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(e) => write!(f, "{e}"),
            Self::Envelope(m) => write!(f, "unexpected response envelope: {m}"),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<HttpError> for BackendError {
    fn from(e: HttpError) -> Self {
        Self::Http(e)
    }
}

/// Text content of one chat answer, whatever backend produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub content: String,
}

/// Sends one prompt and returns the model's text.
///
/// Implemented by [`ChatClient`]; tests supply instrumented fakes.
pub trait ChatBackend: Send + Sync + 'static {
    fn complete(
        &self,
        prompt: &str,
    ) -> impl Future<Output = Result<ChatReply, BackendError>> + Send;
}

/// Backend selection plus endpoint details
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub local_url: String,
    pub hosted_url: String,
    pub api_key: Option<String>,
    pub http: HttpConfig,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::LocalModel,
            local_url: DEFAULT_LOCAL_URL.to_string(),
            hosted_url: DEFAULT_HOSTED_URL.to_string(),
            api_key: std::env::var(DEFAULT_API_KEY_VAR).ok(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage<'a>],
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage<'a>],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP chat client for either backend kind
#[derive(Debug, Clone)]
pub struct ChatClient {
    kind: BackendKind,
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl ChatClient {
    pub fn new(settings: &BackendSettings, model: &str) -> Result<Self, BackendConfigError> {
        let (endpoint, api_key) = match settings.kind {
            BackendKind::LocalModel => (
                format!("{}/api/chat", settings.local_url.trim_end_matches('/')),
                None,
            ),
            BackendKind::HostedChat => {
                let key = settings
                    .api_key
                    .clone()
                    .filter(|k| !k.trim().is_empty())
                    .ok_or(BackendConfigError::MissingApiKey)?;
                (
                    format!("{}/chat/completions", settings.hosted_url.trim_end_matches('/')),
                    Some(key),
                )
            }
        };
        let http = build_http_client(&settings.http).map_err(BackendConfigError::Client)?;
        log::debug!("{} backend at {endpoint} (model {model})", settings.kind);
        Ok(Self {
            kind: settings.kind,
            http,
            endpoint,
            model: model.to_string(),
            api_key,
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, prompt: &str) -> Result<String, HttpError> {
        let messages = [ChatMessage {
            role: "user",
            content: prompt,
        }];
        let request = match self.kind {
            BackendKind::LocalModel => self.http.post(&self.endpoint).json(&OllamaChatRequest {
                model: &self.model,
                messages: &messages,
                stream: false,
            }),
            BackendKind::HostedChat => self.http.post(&self.endpoint).json(&CompletionRequest {
                model: &self.model,
                messages: &messages,
            }),
        };
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };

        let response = request.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

impl ChatBackend for ChatClient {
    async fn complete(&self, prompt: &str) -> Result<ChatReply, BackendError> {
        let body = self.post(prompt).await?;
        match self.kind {
            BackendKind::LocalModel => adapt_ollama(&body),
            BackendKind::HostedChat => adapt_completion(&body),
        }
    }
}

fn adapt_ollama(body: &str) -> Result<ChatReply, BackendError> {
    let parsed: OllamaChatResponse =
        serde_json::from_str(body).map_err(|e| BackendError::Envelope(e.to_string()))?;
    Ok(ChatReply {
        content: parsed.message.content.trim().to_string(),
    })
}

fn adapt_completion(body: &str) -> Result<ChatReply, BackendError> {
    let parsed: CompletionResponse =
        serde_json::from_str(body).map_err(|e| BackendError::Envelope(e.to_string()))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::Envelope("no choices".to_string()))?
        .message
        .content
        .unwrap_or_default();
    Ok(ChatReply {
        content: content.trim().to_string(),
    })
}
