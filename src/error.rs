use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Max retries exceeded for {0}")]
    MaxRetriesExceeded(&'static str),

    #[error("Download failed: HTTP {0}")]
    DownloadFailed(u16),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("File too large: {0} bytes. Maximum allowed: {1} bytes")]
    FileTooLarge(u64, u64),

    #[error("Failed to create output directory: {0}")]
    DirectoryCreationFailed(PathBuf),

    #[error("No image files found in input path: {0}")]
    NoImageFilesFound(String),

    #[error("Walkdir error: {0}")]
    WalkdirError(#[from] walkdir::Error),

    #[error("Invalid glob pattern {0}: {1}")]
    GlobPattern(String, String),

    #[error("API key not configured. Run 'tiny-squeeze config set-key <KEY>' or set TINYPNG_API_KEY")]
    MissingApiKey,

    #[error("Invalid concurrency value: {0}. Must be between {1} and {2}")]
    InvalidConcurrency(usize, usize, usize),

    #[error("Invalid filename suffix: {0:?}")]
    InvalidSuffix(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used for retry decisions and job reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid credential or exhausted quota (HTTP 401 / 429).
    Auth,
    /// The API rejected the input (other 4xx).
    Client,
    /// Server errors and transport failures, possibly after retries.
    Transient,
    /// Local filesystem failure.
    Io,
    /// The pipeline was stopped while the operation was in flight.
    Cancelled,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Client => "client",
            ErrorKind::Transient => "transient",
            ErrorKind::Io => "io",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

impl CompressionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompressionError::Api { status, .. } if *status == 401 || *status == 429 => {
                ErrorKind::Auth
            }
            CompressionError::Api { status, .. } if *status >= 500 => ErrorKind::Transient,
            CompressionError::Api { .. } => ErrorKind::Client,
            CompressionError::DownloadFailed(status) if *status >= 500 => ErrorKind::Transient,
            CompressionError::DownloadFailed(_) => ErrorKind::Client,
            CompressionError::Transport(_) | CompressionError::MaxRetriesExceeded(_) => {
                ErrorKind::Transient
            }
            CompressionError::Io(_)
            | CompressionError::FileNotFound(_)
            | CompressionError::FileTooLarge(_, _)
            | CompressionError::DirectoryCreationFailed(_) => ErrorKind::Io,
            CompressionError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompressionError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, CompressionError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> CompressionError {
        CompressionError::Api {
            status,
            code: "Error".to_string(),
            message: "message".to_string(),
        }
    }

    #[test]
    fn test_api_error_classification() {
        assert_eq!(api(401).kind(), ErrorKind::Auth);
        assert_eq!(api(429).kind(), ErrorKind::Auth);
        assert_eq!(api(400).kind(), ErrorKind::Client);
        assert_eq!(api(415).kind(), ErrorKind::Client);
        assert_eq!(api(503).kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_local_errors_are_io() {
        let err = CompressionError::Io(std::io::Error::other("disk full"));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(
            CompressionError::FileNotFound(PathBuf::from("a.png")).kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn test_cancelled_is_distinguishable() {
        assert!(CompressionError::Cancelled.is_cancelled());
        assert_eq!(CompressionError::Cancelled.kind(), ErrorKind::Cancelled);
        assert!(!api(500).is_cancelled());
    }

    #[test]
    fn test_api_error_message() {
        let err = CompressionError::Api {
            status: 401,
            code: "Unauthorized".to_string(),
            message: "Credentials are invalid".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "API error 401 (Unauthorized): Credentials are invalid"
        );
    }
}
