//! Typed client for the external coding-agent server
//!
//! One `reqwest::Client` is shared process-wide: pooled connections with
//! keep-alive, a per-request timeout, and Basic Auth on every call. Every
//! request carries a `directory` query parameter binding the call to the
//! job's workspace.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::AgentConfig;
use crate::ledger::ModelRef;
use crate::ledger::PermissionDecision;

const BODY_EXCERPT_LEN: usize = 300;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Connection-level failure (refused, reset, timeout). Retriable.
    #[error("agent transport error: {0}")]
    Transport(String),

    /// 401/403. Fatal.
    #[error("agent auth failed (HTTP {status}): {body}")]
    Auth { status: u16, body: String },

    #[error("agent resource not found (HTTP {status}): {body}")]
    NotFound { status: u16, body: String },

    /// 5xx. Retriable once.
    #[error("agent server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    /// 4xx other than auth/404. Fatal.
    #[error("agent rejected request (HTTP {status}): {body}")]
    BadRequest { status: u16, body: String },

    #[error("agent response decode error: {0}")]
    Decode(String),
}

impl AgentError {
    pub fn is_transport(&self) -> bool {
        matches!(self, AgentError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentHealth {
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedSession {
    #[serde(alias = "session_id")]
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStateKind {
    Idle,
    Running,
    Retry,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionState {
    #[serde(rename = "type")]
    pub kind: SessionStateKind,
}

/// Pending permission request as reported by the agent server.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionRequest {
    #[serde(alias = "id")]
    pub request_id: String,
    #[serde(alias = "sessionID", alias = "session_id")]
    pub session_id: String,
    #[serde(alias = "type")]
    pub tool: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

impl PermissionRequest {
    /// Target path, checking the flat field first and then the metadata
    /// blob the agent attaches to file tools.
    pub fn target_path(&self) -> Option<&str> {
        if let Some(path) = self.path.as_deref() {
            return Some(path);
        }
        self.metadata
            .get("filePath")
            .or_else(|| self.metadata.get("path"))
            .and_then(Value::as_str)
    }

    pub fn command_line(&self) -> Option<&str> {
        if let Some(command) = self.command.as_deref() {
            return Some(command);
        }
        self.metadata.get("command").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptPart {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptRequest {
    pub parts: Vec<PromptPart>,
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
}

impl PromptRequest {
    pub fn text(prompt: impl Into<String>, agent: impl Into<String>, model: Option<ModelRef>) -> Self {
        Self {
            parts: vec![PromptPart {
                kind: "text",
                text: prompt.into(),
            }],
            agent: agent.into(),
            model,
        }
    }
}

#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: Option<String>,
}

impl AgentClient {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// `GET /global/health`
    pub async fn health(&self) -> Result<AgentHealth> {
        let response = self.get("/global/health", None).send().await;
        let response = classify(response).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Decode(e.to_string()))?;
        Ok(AgentHealth {
            healthy: body.get("healthy").and_then(Value::as_bool).unwrap_or(true),
            version: body
                .get("version")
                .and_then(Value::as_str)
                .map(str::to_owned),
        })
    }

    /// `POST /session`: returns the new session id.
    pub async fn create_session(&self, directory: &str, title: Option<&str>) -> Result<String> {
        let mut body = serde_json::Map::new();
        if let Some(title) = title {
            body.insert("title".to_string(), Value::String(title.to_string()));
        }
        let response = self
            .post("/session", Some(directory))
            .json(&Value::Object(body))
            .send()
            .await;
        let response = classify(response).await?;
        let created: CreatedSession = response
            .json()
            .await
            .map_err(|e| AgentError::Decode(e.to_string()))?;
        debug!(session_id = %created.id, "Agent session created");
        Ok(created.id)
    }

    /// `POST /session/{id}/prompt_async`: fire-and-forget; the agent
    /// answers quickly and keeps working in the background.
    pub async fn prompt_async(
        &self,
        directory: &str,
        session_id: &str,
        prompt: &PromptRequest,
    ) -> Result<()> {
        let path = format!("/session/{session_id}/prompt_async");
        let response = self.post(&path, Some(directory)).json(prompt).send().await;
        classify(response).await?;
        Ok(())
    }

    /// `GET /session/status`: state of every live session.
    pub async fn session_status(&self, directory: &str) -> Result<HashMap<String, SessionState>> {
        let response = self.get("/session/status", Some(directory)).send().await;
        let response = classify(response).await?;
        response
            .json()
            .await
            .map_err(|e| AgentError::Decode(e.to_string()))
    }

    /// `POST /session/{id}/abort`
    pub async fn abort_session(&self, directory: &str, session_id: &str) -> Result<()> {
        let path = format!("/session/{session_id}/abort");
        let response = self.post(&path, Some(directory)).send().await;
        classify(response).await?;
        Ok(())
    }

    /// `GET /permission`: pending permission requests.
    pub async fn list_permissions(&self, directory: &str) -> Result<Vec<PermissionRequest>> {
        let response = self.get("/permission", Some(directory)).send().await;
        let response = classify(response).await?;
        response
            .json()
            .await
            .map_err(|e| AgentError::Decode(e.to_string()))
    }

    /// `POST /permission/{request_id}/reply`
    pub async fn reply_permission(
        &self,
        directory: &str,
        request_id: &str,
        decision: PermissionDecision,
    ) -> Result<()> {
        let path = format!("/permission/{request_id}/reply");
        let response = self
            .post(&path, Some(directory))
            .json(&serde_json::json!({ "response": decision.as_str() }))
            .send()
            .await;
        classify(response).await?;
        Ok(())
    }

    /// `GET /session/{id}/message?limit=1`: concatenated text of the most
    /// recent assistant message.
    pub async fn last_message(&self, directory: &str, session_id: &str) -> Result<String> {
        let path = format!("/session/{session_id}/message");
        let response = self
            .get(&path, Some(directory))
            .query(&[("limit", "1")])
            .send()
            .await;
        let response = classify(response).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Decode(e.to_string()))?;
        Ok(extract_message_text(&body))
    }

    /// `GET /file?path=…`: used sparingly for sanity checks.
    pub async fn read_file(&self, directory: &str, path: &str) -> Result<String> {
        let response = self
            .get("/file", Some(directory))
            .query(&[("path", path)])
            .send()
            .await;
        let response = classify(response).await?;
        response
            .text()
            .await
            .map_err(|e| AgentError::Decode(e.to_string()))
    }

    /// Raw event-stream response for the bridge. The caller owns reconnects.
    pub(crate) async fn open_event_stream(&self, directory: &str) -> Result<reqwest::Response> {
        let response = self
            .get("/event", Some(directory))
            .timeout(Duration::from_secs(24 * 60 * 60))
            .send()
            .await;
        classify(response).await
    }

    fn get(&self, path: &str, directory: Option<&str>) -> reqwest::RequestBuilder {
        self.builder(reqwest::Method::GET, path, directory)
    }

    fn post(&self, path: &str, directory: Option<&str>) -> reqwest::RequestBuilder {
        self.builder(reqwest::Method::POST, path, directory)
    }

    fn builder(
        &self,
        method: reqwest::Method,
        path: &str,
        directory: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, self.password.as_deref());
        if let Some(directory) = directory {
            builder = builder.query(&[("directory", directory)]);
        }
        builder
    }
}

/// Map the transport/status outcome onto the error taxonomy.
async fn classify(
    response: std::result::Result<reqwest::Response, reqwest::Error>,
) -> Result<reqwest::Response> {
    let response = response.map_err(|e| AgentError::Transport(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let code = status.as_u16();
    let body = excerpt(&response.text().await.unwrap_or_default());
    Err(classify_status(code, body))
}

fn classify_status(status: u16, body: String) -> AgentError {
    match status {
        401 | 403 => AgentError::Auth { status, body },
        404 => AgentError::NotFound { status, body },
        400..=499 => AgentError::BadRequest { status, body },
        _ => AgentError::Server { status, body },
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= BODY_EXCERPT_LEN {
        trimmed.to_string()
    } else {
        let mut cut = BODY_EXCERPT_LEN;
        while !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &trimmed[..cut])
    }
}

/// Pull the text parts out of a message-list response. The agent returns
/// messages as `[{info, parts: [{type, text}, …]}, …]`.
fn extract_message_text(body: &Value) -> String {
    let messages = match body.as_array() {
        Some(messages) => messages,
        None => return String::new(),
    };

    let mut out = Vec::new();
    for message in messages {
        let parts = message
            .get("parts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();
        for part in parts {
            if part.get("type").and_then(Value::as_str) == Some("text") {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    out.push(text.to_string());
                }
            }
        }
    }
    out.join("\n")
}
