use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol call an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ClientSetup,
    RapidUpload,
    PreCreate,
    Chunk(usize),
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientSetup => write!(f, "client setup"),
            Self::RapidUpload => write!(f, "rapid upload"),
            Self::PreCreate => write!(f, "pre-create"),
            Self::Chunk(index) => write!(f, "chunk {}", index),
            Self::Finalize => write!(f, "finalize"),
        }
    }
}

/// Coarse classification used when reporting failures to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Validation,
    Transport,
    Protocol,
    Consistency,
    Cancelled,
}

/// Errors that can occur during an upload
#[derive(Error, Debug)]
pub enum UploadError {
    /// File not found on local filesystem
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Permission denied accessing local file
    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    /// Access token missing, placeholder or malformed
    #[error("Invalid access token: {reason}")]
    InvalidCredential { reason: String },

    /// Local file name cannot be mapped to a remote path
    #[error("Invalid remote path: {path}")]
    InvalidRemotePath { path: String },

    #[error("Invalid chunk size: {size} bytes")]
    InvalidChunkSize { size: u64 },

    /// Timeout, connection failure or unparseable response
    #[error("Transport error during {stage}: {message}")]
    Transport { stage: Stage, message: String },

    /// Non-zero errno reported by the service
    #[error("{stage} failed: {message} (errno: {errno})")]
    Protocol {
        stage: Stage,
        errno: i64,
        message: String,
    },

    /// Manifest, chunk content or session state diverged
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Create an error from an IO error with context
    pub fn from_io_error(error: std::io::Error, path: &str) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound {
                path: path.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.to_string(),
            },
            _ => Self::Io(error),
        }
    }

    /// Create a transport error from a reqwest error
    pub fn from_reqwest(stage: Stage, error: reqwest::Error) -> Self {
        let message = if error.is_timeout() {
            format!("request timed out: {}", error)
        } else if error.is_connect() {
            format!("connection failed: {}", error)
        } else {
            error.to_string()
        };
        Self::Transport { stage, message }
    }

    pub fn malformed(stage: Stage, detail: impl fmt::Display) -> Self {
        Self::Transport {
            stage,
            message: format!("malformed response: {}", detail),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileNotFound { .. }
            | Self::PermissionDenied { .. }
            | Self::InvalidCredential { .. }
            | Self::InvalidRemotePath { .. }
            | Self::InvalidChunkSize { .. } => ErrorKind::Validation,
            Self::Transport { .. } | Self::Io(_) => ErrorKind::Transport,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Consistency(_) => ErrorKind::Consistency,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Remediation hints shown next to the error message
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::FileNotFound { path } => vec![
                "Check that the download finished and the path is correct".to_string(),
                format!("Verify the file exists: ls -la {}", path),
            ],
            Self::PermissionDenied { path } => {
                vec![format!("Grant read access to the file: chmod u+r {}", path)]
            }
            Self::InvalidCredential { .. } => vec![
                "Set BAIDU_ACCESS_TOKEN in .env".to_string(),
                "Refresh the token if it has expired".to_string(),
            ],
            Self::InvalidRemotePath { .. } => vec![
                "Use a remote directory without '..' segments or consecutive slashes".to_string(),
            ],
            Self::InvalidChunkSize { .. } => {
                vec!["Set PAN_CHUNK_SIZE_MB between 1 and 32".to_string()]
            }
            Self::Transport { .. } => vec![
                "Check your network connection and proxy settings".to_string(),
                "Raise PAN_METADATA_TIMEOUT_SECS or PAN_CHUNK_TIMEOUT_SECS".to_string(),
            ],
            Self::Consistency(_) => vec![
                "Make sure nothing else writes to the file, then upload it again".to_string(),
            ],
            Self::Protocol { .. } | Self::Cancelled | Self::Io(_) => Vec::new(),
        }
    }
}

/// Result type for upload operations
pub type Result<T> = std::result::Result<T, UploadError>;
