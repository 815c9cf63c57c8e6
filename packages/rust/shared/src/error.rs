//! Error types for paperbrief.
//!
//! Library crates use [`PaperBriefError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Every variant maps to a stable [`ErrorCode`] and a short user-facing
//! message so that chat or CLI surfaces can render failures without
//! matching on internal detail strings.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all paperbrief operations.
#[derive(Debug, thiserror::Error)]
pub enum PaperBriefError {
    /// The requester exceeded a rate-limit window.
    #[error("admission denied, retry after {retry_after_secs}s")]
    AdmissionDenied { retry_after_secs: u64 },

    /// Unknown or malformed arXiv identifier.
    #[error("paper not found: {identifier}")]
    NotFound { identifier: String },

    /// Retriever or model API unreachable after retries.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Summary schema or language checks failed after the retry budget.
    #[error("summary validation failed: {}", violations.join(", "))]
    ValidationFailed { violations: Vec<String> },

    /// A model call or a whole run exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The run was cancelled by its caller.
    #[error("run cancelled")]
    Cancelled,

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// XML / JSON parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Cache backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invalid input format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PaperBriefError>;

impl PaperBriefError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            identifier: identifier.into(),
        }
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AdmissionDenied { .. } => ErrorCode::AdmissionDenied,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::UpstreamUnavailable(_) => ErrorCode::UpstreamUnavailable,
            Self::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Config { .. }
            | Self::Parse { .. }
            | Self::Storage(_)
            | Self::Io { .. }
            | Self::Validation { .. }
            | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Short message suitable for showing to the person who made the request.
    pub fn user_message(&self) -> String {
        match self {
            Self::AdmissionDenied { retry_after_secs } => {
                format!("請求過於頻繁，請在 {retry_after_secs} 秒後再試。")
            }
            Self::NotFound { identifier } => {
                format!("無法識別 arXiv ID 或找不到論文：{identifier}")
            }
            other => other.code().default_message().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stable error codes
// ---------------------------------------------------------------------------

/// Stable, machine-readable error code surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AdmissionDenied,
    NotFound,
    UpstreamUnavailable,
    ValidationFailed,
    Timeout,
    Cancelled,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdmissionDenied => "ADMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Generic user-facing message for the code.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::AdmissionDenied => "請求過於頻繁，請稍後再試。",
            Self::NotFound => "無法識別 arXiv ID 或找不到論文。",
            Self::UpstreamUnavailable => "外部服務暫時無法使用，請稍後再試。",
            Self::ValidationFailed => "摘要未通過驗證。",
            Self::Timeout => "處理逾時，請稍後再試。",
            Self::Cancelled => "請求已取消。",
            Self::InternalError => "發生未預期的錯誤。",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PaperBriefError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = PaperBriefError::ValidationFailed {
            violations: vec!["too_long:intro".into(), "bullets:2".into()],
        };
        assert!(err.to_string().contains("too_long:intro, bullets:2"));
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            PaperBriefError::AdmissionDenied {
                retry_after_secs: 12
            }
            .code()
            .as_str(),
            "ADMISSION_DENIED"
        );
        assert_eq!(PaperBriefError::not_found("x").code(), ErrorCode::NotFound);
        assert_eq!(
            PaperBriefError::Storage("disk".into()).code(),
            ErrorCode::InternalError
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::UpstreamUnavailable).expect("serialize"),
            "\"UPSTREAM_UNAVAILABLE\""
        );
    }

    #[test]
    fn user_message_carries_retry_after() {
        let err = PaperBriefError::AdmissionDenied {
            retry_after_secs: 42,
        };
        assert!(err.user_message().contains("42"));

        let err = PaperBriefError::not_found("9999.99999");
        assert!(err.user_message().contains("9999.99999"));
    }
}
