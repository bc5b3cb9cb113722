//! Application-level interpretation of a transport-successful execution.

use crate::error::FssError;
use crate::types::ExecutionResponse;
use serde_json::Value;

const LOG_ERROR_MARKER: &str = "Error: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpretation {
    Success,
    Failure { reason: String },
}

impl Interpretation {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn into_result(self) -> Result<(), FssError> {
        match self {
            Self::Success => Ok(()),
            Self::Failure { reason } => Err(FssError::ApplicationLevelExecutionError(reason)),
        }
    }
}

/// Decides whether the action itself succeeded.
///
/// A structured `{status: "error" | "success"}` payload wins; without one, a log line with text
/// after `Error: ` marks failure.
pub fn interpret(response: &ExecutionResponse) -> Interpretation {
    if let Some(payload) = response.response.as_ref().and_then(structured_payload) {
        match payload.get("status").and_then(Value::as_str) {
            Some("error") => {
                return Interpretation::Failure {
                    reason: error_reason(&payload),
                }
            }
            Some("success") => return Interpretation::Success,
            _ => {}
        }
    }

    match log_error(&response.logs) {
        Some(message) => Interpretation::Failure {
            reason: format!("Action error: {}", message),
        },
        None => Interpretation::Success,
    }
}

fn structured_payload(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value.clone()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed @ Value::Object(_)) => Some(parsed),
            _ => None,
        },
        _ => None,
    }
}

fn error_reason(payload: &Value) -> String {
    let mut reason = match payload.get("error") {
        Some(Value::String(message)) => message.clone(),
        Some(other) => other.to_string(),
        None => "unknown error".to_string(),
    };

    let details = payload.get("details");
    let field = |name: &str| {
        details
            .and_then(|details| details.get(name))
            .map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
    };
    if let Some(detail_reason) = field("reason") {
        reason.push_str(&format!("\nReason: {}", detail_reason));
    }
    if let Some(code) = field("code") {
        reason.push_str(&format!("\nCode: {}", code));
    }
    if let Some(message) = details
        .and_then(|details| details.get("error"))
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
    {
        reason.push_str(&format!("\nDetails: {}", message));
    }
    reason
}

fn log_error(logs: &str) -> Option<String> {
    logs.match_indices(LOG_ERROR_MARKER).find_map(|(start, _)| {
        let rest = &logs[start + LOG_ERROR_MARKER.len()..];
        let line = rest.split(['\n', '\r']).next().unwrap_or_default();
        (!line.is_empty()).then(|| line.trim().to_string())
    })
}
