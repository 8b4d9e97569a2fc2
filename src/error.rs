use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::Envelope;

/// A request field that failed its schema check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid field `{field}`: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unknown operation: {operation}. Available: [{}]", .available.join(", "))]
    UnknownOperation {
        operation: String,
        available: Vec<String>,
    },
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("failed to load model {model_id}: {reason}")]
    ModelLoad { model_id: String, reason: String },
    #[error("inference failed on {model_id}: {reason}")]
    Inference { model_id: String, reason: String },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("job timed out after {0}s")]
    Timeout(u64),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification written into failure envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UnknownOperation,
    UnknownModel,
    ModelLoad,
    Inference,
    Storage,
    Config,
    BadRequest,
    Timeout,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::UnknownOperation => "unknown_operation",
            ErrorKind::UnknownModel => "unknown_model",
            ErrorKind::ModelLoad => "model_load",
            ErrorKind::Inference => "inference",
            ErrorKind::Storage => "storage",
            ErrorKind::Config => "config",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Io => "io",
        };
        f.write_str(raw)
    }
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::UnknownOperation { .. } => ErrorKind::UnknownOperation,
            ServiceError::UnknownModel(_) => ErrorKind::UnknownModel,
            ServiceError::ModelLoad { .. } => ErrorKind::ModelLoad,
            ServiceError::Inference { .. } => ErrorKind::Inference,
            ServiceError::Storage(_) => ErrorKind::Storage,
            ServiceError::Config(_) => ErrorKind::Config,
            ServiceError::BadRequest(_) => ErrorKind::BadRequest,
            ServiceError::Timeout(_) => ErrorKind::Timeout,
            ServiceError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn load(model_id: impl Into<String>, reason: impl fmt::Display) -> Self {
        ServiceError::ModelLoad {
            model_id: model_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn inference(model_id: impl Into<String>, reason: impl fmt::Display) -> Self {
        ServiceError::Inference {
            model_id: model_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Diagnostic detail attached to failure envelopes.
    pub fn diagnostics(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut detail = serde_json::Map::new();
        detail.insert("errorKind".into(), self.kind().to_string().into());
        match self {
            ServiceError::Validation(err) => {
                detail.insert("field".into(), err.field.clone().into());
            }
            ServiceError::UnknownOperation { available, .. } => {
                detail.insert("available".into(), available.clone().into());
            }
            ServiceError::UnknownModel(model_id)
            | ServiceError::ModelLoad { model_id, .. }
            | ServiceError::Inference { model_id, .. } => {
                detail.insert("modelId".into(), model_id.clone().into());
            }
            _ => {}
        }
        detail
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Validation
            | ErrorKind::UnknownOperation
            | ErrorKind::UnknownModel
            | ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::ModelLoad => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Inference | ErrorKind::Storage | ErrorKind::Config | ErrorKind::Io => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, axum::Json(Envelope::failure(&self, 0))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_operation_lists_available_names() {
        let err = ServiceError::UnknownOperation {
            operation: "unknown_op".into(),
            available: vec!["rack_focus".into(), "health".into()],
        };
        assert_eq!(
            err.to_string(),
            "unknown operation: unknown_op. Available: [rack_focus, health]"
        );
        assert_eq!(err.kind(), ErrorKind::UnknownOperation);
    }

    #[test]
    fn validation_diagnostics_name_the_field() {
        let err = ServiceError::from(ValidationError::new("strength", "out of range"));
        let detail = err.diagnostics();
        assert_eq!(detail["errorKind"], "validation");
        assert_eq!(detail["field"], "strength");
    }

    #[test]
    fn error_kind_display_matches_serde_name() {
        let json = serde_json::to_value(ErrorKind::ModelLoad).unwrap();
        assert_eq!(json, ErrorKind::ModelLoad.to_string());
    }
}
