pub mod client;
pub mod error;
pub mod fingerprint;
pub mod helpers;
pub mod progress;
pub mod rapid;
pub mod session;
pub mod upload;

pub use client::{Endpoints, PanClient, RemoteFile, Timeouts};
pub use error::{ErrorKind, Stage, UploadError};
pub use fingerprint::{ChunkManifest, Digest, FileFingerprint, fingerprint};
pub use helpers::{AccessToken, build_remote_path, sanitize_file_name, validate_remote_dir};
pub use progress::{ProgressCallback, ProgressTracker};
pub use rapid::RapidOutcome;
pub use session::{ChunkUploadSession, SessionState};
pub use upload::{
    UploadMethod, UploadReply, UploadRequest, UploadResult, UploadSettings, UploadStatus,
    Uploader, handle_upload,
};
