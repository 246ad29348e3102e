//! Error types for the migration engine.

use serde::Deserialize;

/// Errors raised while talking to a record store or migrating records.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("object not found: {message}")]
    NotFound { message: String },

    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("API error ({status}, {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("file upload {upload_id} finished with status '{status}'")]
    MediaUpload { upload_id: String, status: String },

    #[error("failed to download media from {url}: {reason}")]
    MediaDownload { url: String, reason: String },

    #[error("no scope record matches '{0}'")]
    ScopeNotFound(String),

    #[error("filter values {0:?} have no configured scope or filter to apply to")]
    UnusedFilterValues(Vec<String>),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MigrateError>;

/// Error body returned by the API on non-success responses.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl MigrateError {
    /// Classify an API error response by its error code.
    pub fn from_api(status: u16, code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "object_not_found" => MigrateError::NotFound { message },
            "unauthorized" | "restricted_resource" => MigrateError::Unauthorized { message },
            _ => MigrateError::Api {
                status,
                code: code.to_string(),
                message,
            },
        }
    }

    /// User-facing guidance for errors the operator can fix themselves.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            MigrateError::NotFound { .. } => Some(
                "Check that the database or page id is correct and that the integration has been shared with it.",
            ),
            MigrateError::Unauthorized { .. } => Some(
                "Check that the integration token is valid and has the capabilities this migration needs.",
            ),
            MigrateError::UnusedFilterValues(_) => Some(
                "Add a [scope] section or [[filters]] entries to the configuration, or drop the extra values.",
            ),
            _ => None,
        }
    }
}
