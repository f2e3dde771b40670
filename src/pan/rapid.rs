use tracing::{info, warn};

use super::client::{PanClient, RapidUploadForm, RemoteFile};
use super::error::UploadError;
use super::fingerprint::FileFingerprint;

/// Accepted stand-in for the optional CRC32 field
pub const PLACEHOLDER_CRC32: &str = "0";

/// Result of a dedup probe; only `Hit` short-circuits the upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RapidOutcome {
    /// Service already holds identical content
    Hit(RemoteFile),
    /// Service answered with a non-zero errno
    Miss { reason: String },
    /// Timeout, connection failure, or a response without a file id
    TransportError { reason: String },
}

/// Try to register `remote_path` by content hash alone
///
/// Never fails and never retries: every error is folded into `Miss` or
/// `TransportError` so the caller falls through to the chunked path. Holding a
/// [`PanClient`] implies the credential was already validated.
pub async fn attempt(
    client: &PanClient,
    fingerprint: &FileFingerprint,
    remote_path: &str,
) -> RapidOutcome {
    let form = RapidUploadForm {
        path: remote_path,
        content_length: fingerprint.size_bytes,
        content_md5: fingerprint.whole_file_digest.to_hex(),
        slice_md5: fingerprint.leading_slice_digest.to_hex(),
        content_crc32: PLACEHOLDER_CRC32,
    };

    info!(
        "Rapid upload probe: size={}, md5={}",
        form.content_length, form.content_md5
    );

    match client.rapid_upload(&form).await {
        Ok(file) => {
            info!("Rapid upload hit: {} (fs_id {})", file.path, file.fs_id);
            RapidOutcome::Hit(file)
        }
        Err(e @ UploadError::Protocol { .. }) => {
            warn!("Rapid upload miss: {}", e);
            RapidOutcome::Miss {
                reason: e.to_string(),
            }
        }
        Err(e) => {
            warn!("Rapid upload probe failed: {}", e);
            RapidOutcome::TransportError {
                reason: e.to_string(),
            }
        }
    }
}
