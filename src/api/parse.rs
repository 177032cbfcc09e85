//! Response parsing for the model API.
//!
//! Servers in the wild disagree on envelope shapes, so each parser accepts
//! the variants seen in practice and reports anything else as
//! `MalformedPayload`.

use serde_json::Value;

use super::types::{ChatCompletionResponse, ModelInfo, RawModel};
use crate::session::SessionError;

/// Fields that may carry the active model name, in lookup order.
const MODEL_NAME_FIELDS: &[&str] = &["model", "current_model", "active_model", "name"];

/// Parse a model list: `{"data": [...]}` or a bare array.
pub fn parse_models(body: Value) -> Result<Vec<ModelInfo>, SessionError> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                return Err(SessionError::MalformedPayload {
                    reason: format!("model list `data` is not an array: {other}"),
                })
            }
            None => {
                return Err(SessionError::MalformedPayload {
                    reason: "model list has no `data` field".into(),
                })
            }
        },
        other => {
            return Err(SessionError::MalformedPayload {
                reason: format!("unexpected model list shape: {other}"),
            })
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let raw: RawModel =
                serde_json::from_value(entry).map_err(|e| SessionError::MalformedPayload {
                    reason: format!("model entry {i} is invalid: {e}"),
                })?;
            let id = raw.id.or_else(|| raw.name.clone()).ok_or_else(|| {
                SessionError::MalformedPayload {
                    reason: format!("model entry {i} has neither `id` nor `name`"),
                }
            })?;
            Ok(ModelInfo {
                id,
                name: raw.name,
                object: raw.object,
                created: raw.created,
                owned_by: raw.owned_by,
            })
        })
        .collect()
}

/// Parse a non-streaming chat completion. At least one choice is required.
pub fn parse_chat_response(body: Value) -> Result<ChatCompletionResponse, SessionError> {
    let resp: ChatCompletionResponse =
        serde_json::from_value(body).map_err(|e| SessionError::MalformedPayload {
            reason: format!("failed to parse chat completion: {e}"),
        })?;

    if resp.choices.is_empty() {
        return Err(SessionError::MalformedPayload {
            reason: "empty choices array".into(),
        });
    }
    Ok(resp)
}

/// Pull the active model name out of a status-like response.
///
/// Accepts a bare JSON string or an object carrying one of the known
/// fields. Empty strings count as absent.
pub fn extract_model_name(body: &Value) -> Option<String> {
    let name = match body {
        Value::String(s) => Some(s.as_str()),
        Value::Object(obj) => MODEL_NAME_FIELDS
            .iter()
            .find_map(|field| obj.get(*field).and_then(Value::as_str)),
        _ => None,
    }?;

    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Normalize a model name for the load endpoint: trim, then replace inner
/// spaces with underscores. Returns `None` for blank names.
pub fn sanitize_model_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.replace(' ', "_"))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
