use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{CreateForm, PanClient, PreCreateForm, RemoteFile};
use super::error::{Result, UploadError};
use super::fingerprint::{ChunkManifest, Digest};

/// Lifecycle of one chunked upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Created,
    PreCreated { upload_id: String },
    Uploading { next_chunk_index: usize },
    Finalizing,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Three-phase chunked upload: pre-create, sequential chunk transfer, finalize
///
/// A session is single-use. Any error moves it to [`SessionState::Failed`] and
/// every later call is rejected; callers restart from a fresh session.
pub struct ChunkUploadSession<'a> {
    client: &'a PanClient,
    remote_path: String,
    size: u64,
    manifest: &'a ChunkManifest,
    upload_id: Option<String>,
    registered_block_list: Option<String>,
    state: SessionState,
    bytes_transferred: u64,
}

impl<'a> ChunkUploadSession<'a> {
    pub fn new(
        client: &'a PanClient,
        remote_path: impl Into<String>,
        size: u64,
        manifest: &'a ChunkManifest,
    ) -> Self {
        Self {
            client,
            remote_path: remote_path.into(),
            size,
            manifest,
            upload_id: None,
            registered_block_list: None,
            state: SessionState::Created,
            bytes_transferred: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Run all three phases against the file at `local_path`
    pub async fn run(
        &mut self,
        local_path: &Path,
        cancel: &CancellationToken,
        on_bytes: &mut (dyn FnMut(u64) + Send),
    ) -> Result<RemoteFile> {
        self.pre_create().await?;
        self.upload_all(local_path, cancel, on_bytes).await?;
        self.finalize().await
    }

    /// Register the manifest and size; rename on remote name conflict
    pub async fn pre_create(&mut self) -> Result<String> {
        if self.state != SessionState::Created {
            return Err(self.misuse("pre-create"));
        }

        let block_list = self.manifest.block_list();
        let form = PreCreateForm {
            path: &self.remote_path,
            size: self.size,
            isdir: 0,
            autoinit: 1,
            block_list: &block_list,
            rtype: 1,
        };

        info!(
            "Pre-creating {} ({} bytes, {} chunks)",
            self.remote_path,
            self.size,
            self.manifest.len()
        );

        let result = self.client.precreate(&form).await;
        let upload_id = match result {
            Ok(id) => id,
            Err(e) => return Err(self.fail(e)),
        };

        debug!("Upload session {} created", upload_id);

        self.upload_id = Some(upload_id.clone());
        self.registered_block_list = Some(block_list);
        self.state = SessionState::PreCreated {
            upload_id: upload_id.clone(),
        };

        Ok(upload_id)
    }

    /// Transfer chunk `index`; chunks must arrive in manifest order
    pub async fn upload_chunk(&mut self, index: usize, bytes: Vec<u8>) -> Result<()> {
        let expected_index = match self.state {
            SessionState::PreCreated { .. } => Some(0),
            SessionState::Uploading { next_chunk_index } => Some(next_chunk_index),
            _ => None,
        };
        let Some(expected_index) = expected_index else {
            return Err(self.misuse("chunk upload"));
        };
        if index != expected_index || index >= self.manifest.len() {
            return Err(self.fail(UploadError::Consistency(format!(
                "chunk {} sent out of order (expected {} of {})",
                index,
                expected_index,
                self.manifest.len()
            ))));
        }

        let range = self.manifest.chunk_range(index, self.size);
        let expected_len = range.end - range.start;
        if bytes.len() as u64 != expected_len {
            return Err(self.fail(UploadError::Consistency(format!(
                "chunk {} is {} bytes, manifest expects {}",
                index,
                bytes.len(),
                expected_len
            ))));
        }

        let expected_digest = self.manifest.digests()[index];
        if Digest::of(&bytes) != expected_digest {
            return Err(self.fail(UploadError::Consistency(format!(
                "chunk {} changed since fingerprinting",
                index
            ))));
        }

        let Some(upload_id) = self.upload_id.clone() else {
            return Err(self.misuse("chunk upload"));
        };

        debug!("Uploading chunk {} ({} bytes)", index, expected_len);

        let result = self
            .client
            .upload_chunk(&self.remote_path, &upload_id, index, bytes)
            .await;
        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.fail(e)),
        };

        if let Some(md5) = receipt.md5 {
            if !md5.eq_ignore_ascii_case(&expected_digest.to_hex()) {
                return Err(self.fail(UploadError::Consistency(format!(
                    "server received chunk {} with md5 {}, expected {}",
                    index, md5, expected_digest
                ))));
            }
        }

        self.bytes_transferred += expected_len;
        self.state = SessionState::Uploading {
            next_chunk_index: index + 1,
        };

        Ok(())
    }

    /// Read the file chunk by chunk and transfer each one in order
    ///
    /// The file handle lives only inside this call, so it is released on
    /// every exit path.
    pub async fn upload_all(
        &mut self,
        local_path: &Path,
        cancel: &CancellationToken,
        on_bytes: &mut (dyn FnMut(u64) + Send),
    ) -> Result<()> {
        if !matches!(self.state, SessionState::PreCreated { .. }) {
            return Err(self.misuse("chunk enumeration"));
        }

        let display = local_path.display().to_string();
        let mut file = match tokio::fs::File::open(local_path).await {
            Ok(file) => file,
            Err(e) => return Err(self.fail(UploadError::from_io_error(e, &display))),
        };

        for index in 0..self.manifest.len() {
            if cancel.is_cancelled() {
                return Err(self.fail(UploadError::Cancelled));
            }

            let range = self.manifest.chunk_range(index, self.size);
            let mut buffer = vec![0u8; (range.end - range.start) as usize];
            if let Err(e) = file.read_exact(&mut buffer).await {
                let error = if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    UploadError::Consistency(format!(
                        "file shrank below {} bytes during upload",
                        self.size
                    ))
                } else {
                    UploadError::from_io_error(e, &display)
                };
                return Err(self.fail(error));
            }

            self.upload_chunk(index, buffer).await?;
            on_bytes(self.bytes_transferred);
        }

        let mut probe = [0u8; 1];
        match file.read(&mut probe).await {
            Ok(0) => {}
            Ok(_) => {
                return Err(self.fail(UploadError::Consistency(format!(
                    "file grew past {} bytes during upload",
                    self.size
                ))));
            }
            Err(e) => return Err(self.fail(UploadError::from_io_error(e, &display))),
        }

        // Empty files have no chunks but still move through Uploading
        if self.manifest.is_empty() {
            self.state = SessionState::Uploading {
                next_chunk_index: 0,
            };
        }

        info!("All {} chunks uploaded", self.manifest.len());

        Ok(())
    }

    /// Submit the registered manifest and assemble the remote object
    pub async fn finalize(&mut self) -> Result<RemoteFile> {
        let all_chunks_sent = matches!(
            self.state,
            SessionState::Uploading { next_chunk_index } if next_chunk_index == self.manifest.len()
        );
        if !all_chunks_sent {
            return Err(self.misuse("finalize"));
        }
        self.state = SessionState::Finalizing;

        let block_list = self.manifest.block_list();
        if self.registered_block_list.as_deref() != Some(block_list.as_str()) {
            return Err(self.fail(UploadError::Consistency(
                "block list differs from the one registered at pre-create".to_string(),
            )));
        }

        let Some(upload_id) = self.upload_id.clone() else {
            return Err(self.misuse("finalize"));
        };

        let form = CreateForm {
            path: &self.remote_path,
            size: self.size,
            isdir: 0,
            block_list: &block_list,
            uploadid: &upload_id,
        };

        let result = self.client.create(&form).await;
        match result {
            Ok(file) => {
                info!("Upload complete: {} (fs_id {})", file.path, file.fs_id);
                self.state = SessionState::Completed;
                Ok(file)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn misuse(&mut self, operation: &str) -> UploadError {
        let error = UploadError::Consistency(format!(
            "{} not allowed in state {:?}",
            operation, self.state
        ));
        self.fail(error)
    }

    fn fail(&mut self, error: UploadError) -> UploadError {
        warn!("Upload session for {} failed: {}", self.remote_path, error);
        self.state = SessionState::Failed;
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pan::client::{Endpoints, Timeouts};
    use crate::pan::helpers::AccessToken;

    // Unroutable; none of these tests reach the network
    fn offline_client() -> PanClient {
        PanClient::new(
            AccessToken::parse("token").unwrap(),
            Endpoints::single("http://127.0.0.1:9"),
            Timeouts::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_finalize_before_upload_is_rejected() {
        let client = offline_client();
        let manifest = ChunkManifest::new(4, vec![Digest::of(b"abcd")]);
        let mut session = ChunkUploadSession::new(&client, "/apps/a", 4, &manifest);

        let err = session.finalize().await.unwrap_err();
        assert!(matches!(err, UploadError::Consistency(_)));
        assert_eq!(session.state(), &SessionState::Failed);
    }

    #[tokio::test]
    async fn test_chunk_before_pre_create_is_rejected() {
        let client = offline_client();
        let manifest = ChunkManifest::new(4, vec![Digest::of(b"abcd")]);
        let mut session = ChunkUploadSession::new(&client, "/apps/a", 4, &manifest);

        assert!(session.upload_chunk(0, b"abcd".to_vec()).await.is_err());
        assert_eq!(session.state(), &SessionState::Failed);
        assert_eq!(session.bytes_transferred(), 0);
    }

    #[tokio::test]
    async fn test_failed_session_is_not_reusable() {
        let client = offline_client();
        let manifest = ChunkManifest::new(4, vec![]);
        let mut session = ChunkUploadSession::new(&client, "/apps/a", 0, &manifest);

        let _ = session.finalize().await;
        assert!(session.state().is_terminal());
        assert!(session.pre_create().await.is_err());
        assert_eq!(session.state(), &SessionState::Failed);
    }
}
