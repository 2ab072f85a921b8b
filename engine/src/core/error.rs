//! ContentForge Error Definitions
//!
//! Defines the error taxonomy shared by every module. Public boundaries
//! translate these into [`ErrorInfo`] so callers receive a kind plus a
//! human-readable message instead of a raised error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Resolution Errors
    // =========================================================================
    #[error("No credential stored for service: {0}")]
    CredentialMissing(String),

    #[error("Unsupported service: {0}")]
    UnsupportedService(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // =========================================================================
    // Provider Errors
    // =========================================================================
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider error ({code}): {message}")]
    Provider { code: String, message: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    // =========================================================================
    // Binary Errors
    // =========================================================================
    #[error("Decode error: {0}")]
    Decode(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Shorthand for a provider error with a code and message
    pub fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Provider {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns the taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::CredentialMissing(_) => ErrorKind::CredentialMissing,
            CoreError::UnsupportedService(_) => ErrorKind::UnsupportedService,
            CoreError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            CoreError::Transport(_) => ErrorKind::TransportError,
            CoreError::Provider { .. } => ErrorKind::ProviderError,
            CoreError::Timeout(_) => ErrorKind::Timeout,
            CoreError::Cancelled(_) => ErrorKind::Cancelled,
            CoreError::Decode(_) => ErrorKind::DecodeError,
            CoreError::IoError(_) | CoreError::JsonError(_) | CoreError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Converts into the structured form handed across the module boundary
    pub fn to_error_info(&self) -> ErrorInfo {
        let code = match self {
            CoreError::Provider { code, .. } => Some(code.clone()),
            _ => None,
        };
        let message = match self {
            CoreError::CredentialMissing(msg)
            | CoreError::UnsupportedService(msg)
            | CoreError::InvalidRequest(msg)
            | CoreError::Transport(msg)
            | CoreError::Timeout(msg)
            | CoreError::Cancelled(msg)
            | CoreError::Decode(msg)
            | CoreError::Internal(msg) => msg.clone(),
            CoreError::Provider { message, .. } => message.clone(),
            other => other.to_string(),
        };

        ErrorInfo {
            kind: self.kind(),
            message,
            code,
        }
    }
}

/// Error taxonomy visible to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CredentialMissing,
    UnsupportedService,
    InvalidRequest,
    TransportError,
    ProviderError,
    Timeout,
    Cancelled,
    DecodeError,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::CredentialMissing => write!(f, "Credential Missing"),
            ErrorKind::UnsupportedService => write!(f, "Unsupported Service"),
            ErrorKind::InvalidRequest => write!(f, "Invalid Request"),
            ErrorKind::TransportError => write!(f, "Transport Error"),
            ErrorKind::ProviderError => write!(f, "Provider Error"),
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
            ErrorKind::DecodeError => write!(f, "Decode Error"),
            ErrorKind::Internal => write!(f, "Internal Error"),
        }
    }
}

/// Structured error description carried by results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Taxonomy kind (drives retry affordances in the UI)
    pub kind: ErrorKind,
    /// Human-readable message, provider text passed through when available
    pub message: String,
    /// Provider error code (HTTP status or provider-specific code)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorInfo {
    /// Rebuilds a [`CoreError`] of the same kind (used when a stage result
    /// feeds a caller that propagates errors)
    pub fn into_core_error(self) -> CoreError {
        match self.kind {
            ErrorKind::CredentialMissing => CoreError::CredentialMissing(self.message),
            ErrorKind::UnsupportedService => CoreError::UnsupportedService(self.message),
            ErrorKind::InvalidRequest => CoreError::InvalidRequest(self.message),
            ErrorKind::TransportError => CoreError::Transport(self.message),
            ErrorKind::ProviderError => CoreError::Provider {
                code: self.code.unwrap_or_default(),
                message: self.message,
            },
            ErrorKind::Timeout => CoreError::Timeout(self.message),
            ErrorKind::Cancelled => CoreError::Cancelled(self.message),
            ErrorKind::DecodeError => CoreError::Decode(self.message),
            ErrorKind::Internal => CoreError::Internal(self.message),
        }
    }
}

impl From<CoreError> for ErrorInfo {
    fn from(err: CoreError) -> Self {
        err.to_error_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            CoreError::CredentialMissing("openai".into()).kind(),
            ErrorKind::CredentialMissing
        );
        assert_eq!(
            CoreError::provider("429", "slow down").kind(),
            ErrorKind::ProviderError
        );
        assert_eq!(
            CoreError::Internal("boom".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_provider_error_info_passes_message_through() {
        let info = CoreError::provider("400", "Invalid image size").to_error_info();
        assert_eq!(info.kind, ErrorKind::ProviderError);
        assert_eq!(info.message, "Invalid image size");
        assert_eq!(info.code.as_deref(), Some("400"));
    }

    #[test]
    fn test_error_info_back_to_core_error_keeps_kind() {
        let original = CoreError::provider("500", "upstream exploded");
        let rebuilt = original.to_error_info().into_core_error();
        assert_eq!(rebuilt.kind(), ErrorKind::ProviderError);
        assert_eq!(rebuilt.to_string(), "Provider error (500): upstream exploded");
    }

    #[test]
    fn test_error_info_serialization() {
        let info = CoreError::Timeout("job abc".into()).to_error_info();
        assert_eq!(info.message, "job abc");
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"kind\":\"timeout\""));
        assert!(!json.contains("code"));
    }
}
