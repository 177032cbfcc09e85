//! Model API client.
//!
//! Thin typed layer over a [`ConnectionSession`]. Every call goes through
//! `session.request`, so a server that restarts mid-use is found again
//! without the caller noticing.

use std::sync::Arc;

use serde_json::{json, Value};

use super::parse::{extract_model_name, parse_chat_response, parse_models, sanitize_model_name};
use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, EmbeddingsRequest,
    GenerationParams, ModelInfo,
};
use crate::config::ClientConfig;
use crate::session::{ApiCall, ConnectionSession, SessionError};

// ─── Endpoints ───────────────────────────────────────────────────────────────

const MODELS_PATH: &str = "/api/v1/models";
const CHAT_COMPLETIONS_PATH: &str = "/api/v1/chat/completions";
const EMBEDDINGS_PATH: &str = "/api/v1/embeddings";
const LOAD_MODEL_PATH: &str = "/api/v1/load_model";
const UNLOAD_MODEL_PATH: &str = "/api/v1/unload_model";

/// Endpoints that may report the active model, tried in order. Servers
/// expose different subsets of these.
const CURRENT_MODEL_PATHS: &[&str] = &["/api/v1/current_model", "/api/v1/model", "/api/v1/status"];

// ─── LemonadeClient ──────────────────────────────────────────────────────────

/// Client for a local Lemonade-compatible inference server.
#[derive(Clone)]
pub struct LemonadeClient {
    session: Arc<ConnectionSession>,
}

impl LemonadeClient {
    /// Discover a server using `config` and return a client bound to it.
    pub async fn connect(config: &ClientConfig) -> Result<Self, SessionError> {
        let session = ConnectionSession::from_config(config)?;
        let endpoint = session.discover().await?;
        tracing::info!(endpoint = %endpoint, "connected to server");
        Ok(Self::from_session(Arc::new(session)))
    }

    /// Wrap an existing session, bound or not.
    pub fn from_session(session: Arc<ConnectionSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<ConnectionSession> {
        &self.session
    }

    /// `GET /api/v1/models`.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, SessionError> {
        let body = self.session.request(&ApiCall::get(MODELS_PATH)).await?;
        let models = parse_models(body)?;
        tracing::debug!(count = models.len(), "listed models");
        Ok(models)
    }

    /// Non-streaming chat completion.
    pub async fn chat_completion(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        params: GenerationParams,
    ) -> Result<ChatCompletionResponse, SessionError> {
        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages,
            stream: false,
            params,
        };
        let body = to_body(&request)?;

        tracing::debug!(
            model = %model,
            message_count = request.messages.len(),
            "sending chat completion"
        );
        let resp = self
            .session
            .request(&ApiCall::post(CHAT_COMPLETIONS_PATH, body))
            .await?;
        parse_chat_response(resp)
    }

    /// `POST /api/v1/embeddings`. The response is returned as-is.
    pub async fn embeddings(&self, model: &str, input: Vec<String>) -> Result<Value, SessionError> {
        let request = EmbeddingsRequest {
            model: model.to_string(),
            input,
        };
        let body = to_body(&request)?;
        self.session
            .request(&ApiCall::post(EMBEDDINGS_PATH, body))
            .await
    }

    /// Ask the server to load `name`. Blank names are rejected locally.
    pub async fn load_model(&self, name: &str) -> Result<Value, SessionError> {
        let model = sanitize_model_name(name).ok_or_else(|| SessionError::MalformedPayload {
            reason: "model name is empty".into(),
        })?;
        tracing::info!(model = %model, "loading model");
        self.session
            .request(&ApiCall::post(LOAD_MODEL_PATH, json!({ "model": model })))
            .await
    }

    /// Ask the server to unload `name`, or whatever is loaded when `None`.
    pub async fn unload_model(&self, name: Option<&str>) -> Result<Value, SessionError> {
        let body = match name.and_then(sanitize_model_name) {
            Some(model) => json!({ "model": model }),
            None => json!({}),
        };
        tracing::info!(model = ?name, "unloading model");
        self.session
            .request(&ApiCall::post(UNLOAD_MODEL_PATH, body))
            .await
    }

    /// Best guess at the model the server is currently serving.
    ///
    /// Status endpoints that are missing or answer in an unknown shape are
    /// skipped. Falls back to the first listed model.
    pub async fn current_model(&self) -> Result<Option<String>, SessionError> {
        for path in CURRENT_MODEL_PATHS {
            match self.session.request(&ApiCall::get(*path)).await {
                Ok(body) => {
                    if let Some(name) = extract_model_name(&body) {
                        return Ok(Some(name));
                    }
                }
                Err(SessionError::Http { status, .. }) => {
                    tracing::debug!(path = %path, status, "status endpoint unavailable");
                }
                Err(SessionError::MalformedPayload { reason }) => {
                    tracing::debug!(path = %path, reason = %reason, "status endpoint unreadable");
                }
                Err(e) => return Err(e),
            }
        }

        let models = self.list_models().await?;
        Ok(models.into_iter().next().map(|m| m.id))
    }

    /// Whether the server lists `name` by id or display name.
    pub async fn is_model_available(&self, name: &str) -> Result<bool, SessionError> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m.matches(name)))
    }

    /// Liveness of the bound endpoint. Never triggers recovery.
    pub async fn health_check(&self) -> bool {
        self.session.health_check().await
    }
}

fn to_body<T: serde::Serialize>(request: &T) -> Result<Value, SessionError> {
    serde_json::to_value(request).map_err(|e| SessionError::MalformedPayload {
        reason: format!("failed to serialize request: {e}"),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
