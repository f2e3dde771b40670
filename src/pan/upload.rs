use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::client::{Endpoints, PanClient, RemoteFile, Timeouts};
use super::error::{ErrorKind, Result, UploadError};
use super::fingerprint::{self, DEFAULT_CHUNK_SIZE};
use super::helpers::{AccessToken, build_remote_path};
use super::progress::{ProgressCallback, ProgressTracker};
use super::rapid::{self, RapidOutcome};
use super::session::ChunkUploadSession;

pub const DEFAULT_REMOTE_DIR: &str = "/apps/yt-download";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Success,
    Error,
}

/// Which path produced the remote file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMethod {
    Rapid,
    Chunked,
}

/// Outcome of one [`Uploader::upload`] call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub status: UploadStatus,
    pub remote_file_id: Option<String>,
    pub remote_path: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<UploadMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl UploadResult {
    fn success(file: RemoteFile, method: UploadMethod) -> Self {
        let message = match method {
            UploadMethod::Rapid => "Upload succeeded (rapid upload)",
            UploadMethod::Chunked => "Upload succeeded",
        };
        Self {
            status: UploadStatus::Success,
            remote_file_id: Some(file.fs_id),
            remote_path: Some(file.path),
            message: message.to_string(),
            method: Some(method),
            error_kind: None,
            suggestions: Vec::new(),
        }
    }

    fn failure(error: &UploadError) -> Self {
        Self {
            status: UploadStatus::Error,
            remote_file_id: None,
            remote_path: None,
            message: error.to_string(),
            method: None,
            error_kind: Some(error.kind()),
            suggestions: error.suggestions(),
        }
    }
}

/// Everything an [`Uploader`] needs besides the credential
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub remote_dir: String,
    pub chunk_size: u64,
    pub endpoints: Endpoints,
    pub timeouts: Timeouts,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            remote_dir: DEFAULT_REMOTE_DIR.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            endpoints: Endpoints::default(),
            timeouts: Timeouts::default(),
        }
    }
}

/// Entry point: rapid upload first, chunked upload on a miss
///
/// Holds only read-only state, so one instance can serve concurrent uploads
/// of different files.
#[derive(Clone)]
pub struct Uploader {
    credential: String,
    settings: UploadSettings,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("credential", &"***")
            .field("settings", &self.settings)
            .finish()
    }
}

impl Uploader {
    pub fn new(credential: impl Into<String>, settings: UploadSettings) -> Self {
        Self {
            credential: credential.into(),
            settings,
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Upload `local_path` into `remote_dir`
    ///
    /// Never returns an error: every failure becomes `status=error` with a
    /// message. Validation failures are detected before any network call.
    pub async fn upload(
        &self,
        local_path: &Path,
        remote_dir: &str,
        progress: Option<ProgressCallback<'_>>,
        cancel: &CancellationToken,
    ) -> UploadResult {
        match self.try_upload(local_path, remote_dir, progress, cancel).await {
            Ok((file, method)) => UploadResult::success(file, method),
            Err(e) => {
                error!("Upload failed for {}: {}", local_path.display(), e);
                UploadResult::failure(&e)
            }
        }
    }

    async fn try_upload(
        &self,
        local_path: &Path,
        remote_dir: &str,
        progress: Option<ProgressCallback<'_>>,
        cancel: &CancellationToken,
    ) -> Result<(RemoteFile, UploadMethod)> {
        let display = local_path.display().to_string();
        let metadata = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| UploadError::from_io_error(e, &display))?;
        if !metadata.is_file() {
            return Err(UploadError::FileNotFound { path: display });
        }

        let token = AccessToken::parse(&self.credential)?;

        let (fingerprint, manifest) =
            fingerprint::fingerprint(local_path, self.settings.chunk_size, cancel).await?;

        let remote_path = build_remote_path(remote_dir, local_path)?;
        info!(
            "Uploading {} -> {} ({} bytes)",
            local_path.display(),
            remote_path,
            fingerprint.size_bytes
        );

        let client = PanClient::new(
            token,
            self.settings.endpoints.clone(),
            self.settings.timeouts,
        )?;
        let mut tracker = ProgressTracker::new(fingerprint.size_bytes, progress);

        match rapid::attempt(&client, &fingerprint, &remote_path).await {
            RapidOutcome::Hit(file) => {
                tracker.complete();
                return Ok((file, UploadMethod::Rapid));
            }
            RapidOutcome::Miss { .. } | RapidOutcome::TransportError { .. } => {
                info!("Rapid upload unavailable, falling back to chunked upload");
            }
        }

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let mut session =
            ChunkUploadSession::new(&client, remote_path, fingerprint.size_bytes, &manifest);
        let mut on_bytes = |transferred: u64| tracker.bytes(transferred);
        let file = session.run(local_path, cancel, &mut on_bytes).await?;

        tracker.complete();
        Ok((file, UploadMethod::Chunked))
    }
}

/// Upload request from the messaging layer, after media retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub identifier: String,
    pub local_path: PathBuf,
}

/// Reply sent back to the messaging layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReply {
    pub status: UploadStatus,
    pub message: String,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// Upload a retrieved file into the configured remote directory
pub async fn handle_upload(
    uploader: &Uploader,
    request: UploadRequest,
    progress: Option<ProgressCallback<'_>>,
    cancel: &CancellationToken,
) -> UploadReply {
    info!(
        "Handling upload request: identifier={}, local_path={}",
        request.identifier,
        request.local_path.display()
    );

    let result = uploader
        .upload(
            &request.local_path,
            &uploader.settings().remote_dir,
            progress,
            cancel,
        )
        .await;

    UploadReply {
        status: result.status,
        message: result.message,
        identifier: request.identifier,
        remote_file_id: result.remote_file_id,
        remote_path: result.remote_path,
        error_kind: result.error_kind,
        suggestions: result.suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Unroutable endpoints: validation must fail before they matter
    fn offline_settings() -> UploadSettings {
        UploadSettings {
            endpoints: Endpoints::single("http://127.0.0.1:9"),
            ..UploadSettings::default()
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_validation_error() {
        let uploader = Uploader::new("token", offline_settings());
        let result = uploader
            .upload(
                Path::new("/no/such/file.mp4"),
                "/apps/x",
                None,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.status, UploadStatus::Error);
        assert!(result.message.contains("File not found"));
        assert!(result.remote_file_id.is_none());
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
        assert!(
            result
                .suggestions
                .iter()
                .any(|s| s.contains("ls -la /no/such/file.mp4"))
        );
    }

    #[tokio::test]
    async fn test_placeholder_credential_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"data").unwrap();

        let uploader = Uploader::new("你的访问令牌", offline_settings());
        let result = uploader
            .upload(file.path(), "/apps/x", None, &CancellationToken::new())
            .await;

        assert_eq!(result.status, UploadStatus::Error);
        assert!(result.message.contains("Invalid access token"));
        assert!(result.suggestions.iter().any(|s| s.contains("BAIDU_ACCESS_TOKEN")));
    }

    #[tokio::test]
    async fn test_traversal_in_remote_dir_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"data").unwrap();

        let uploader = Uploader::new("token", offline_settings());
        let result = uploader
            .upload(file.path(), "/apps/../etc", None, &CancellationToken::new())
            .await;

        assert_eq!(result.status, UploadStatus::Error);
        assert!(result.message.contains("Invalid remote path"), "{}", result.message);
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    }

    #[test]
    fn test_result_serialization() {
        let result = UploadResult::success(
            RemoteFile {
                fs_id: "42".to_string(),
                path: "/apps/a.mp4".to_string(),
            },
            UploadMethod::Chunked,
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["remoteFileId"], "42");
        assert_eq!(json["remotePath"], "/apps/a.mp4");
        assert_eq!(json["method"], "chunked");
        assert!(json.get("errorKind").is_none());

        let failed = UploadResult::failure(&UploadError::Cancelled);
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "Upload cancelled");
        assert!(json.get("method").is_none());
        assert!(json.get("suggestions").is_none());
        assert_eq!(json["errorKind"], "cancelled");
    }
}
