use md5::{Digest as _, Md5};
use std::fmt;
use std::ops::Range;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::{Result, UploadError};

/// Size of the leading slice hashed for the dedup probe (256KB)
pub const LEADING_SLICE_SIZE: u64 = 256 * 1024;

/// Default chunk size (4MB), the service minimum for regular accounts
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

// Digests never hold more than this many bytes of the file in memory
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A 128-bit MD5 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 16]);

impl Digest {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(bytes);
        Self::from_hasher(hasher)
    }

    fn from_hasher(hasher: Md5) -> Self {
        let mut out = [0u8; 16];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hexadecimal form, as sent on the wire
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self)
    }
}

/// Digests identifying a file's content for the dedup probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub size_bytes: u64,
    pub whole_file_digest: Digest,
    pub leading_slice_digest: Digest,
    pub leading_slice_digest_envelope: Digest,
}

/// Ordered per-chunk digests of a file split into fixed-size windows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkManifest {
    chunk_size: u64,
    digests: Vec<Digest>,
}

impl ChunkManifest {
    pub fn new(chunk_size: u64, digests: Vec<Digest>) -> Self {
        Self {
            chunk_size,
            digests,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn digests(&self) -> &[Digest] {
        &self.digests
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Byte range of chunk `index` within a file of `total_size` bytes
    pub fn chunk_range(&self, index: usize, total_size: u64) -> Range<u64> {
        let start = (index as u64).saturating_mul(self.chunk_size).min(total_size);
        let end = start.saturating_add(self.chunk_size).min(total_size);
        start..end
    }

    /// JSON array of hex digests, the `block_list` wire field
    pub fn block_list(&self) -> String {
        serde_json::Value::Array(
            self.digests
                .iter()
                .map(|d| serde_json::Value::String(d.to_hex()))
                .collect(),
        )
        .to_string()
    }
}

/// Hash of the hex text of the leading slice digest, required by the dedup endpoint
pub fn envelope_of(leading_slice_digest: &Digest) -> Digest {
    Digest::of(leading_slice_digest.to_hex().as_bytes())
}

/// Stream the whole file through MD5
pub async fn whole_file_digest(path: &Path) -> Result<Digest> {
    let mut hasher = Md5::new();
    stream_file(path, None, None, |data| hasher.update(data)).await?;
    Ok(Digest::from_hasher(hasher))
}

/// MD5 of the first `min(size, 256KB)` bytes
pub async fn leading_slice_digest(path: &Path) -> Result<Digest> {
    let mut hasher = Md5::new();
    stream_file(path, Some(LEADING_SLICE_SIZE), None, |data| {
        hasher.update(data)
    })
    .await?;
    Ok(Digest::from_hasher(hasher))
}

pub async fn leading_slice_digest_envelope(path: &Path) -> Result<Digest> {
    Ok(envelope_of(&leading_slice_digest(path).await?))
}

/// Per-chunk MD5s in file order; the last chunk may be shorter
pub async fn chunk_digests(path: &Path, chunk_size: u64) -> Result<Vec<Digest>> {
    let mut pass = DigestPass::new(chunk_size)?;
    stream_file(path, None, None, |data| pass.update(data)).await?;
    let (_, manifest) = pass.finish();
    Ok(manifest.digests)
}

/// Compute fingerprint and manifest in a single streaming pass
///
/// Produces exactly what the individual digest functions would, while reading
/// the file once. The cancellation token is checked between buffer reads.
pub async fn fingerprint(
    path: &Path,
    chunk_size: u64,
    cancel: &CancellationToken,
) -> Result<(FileFingerprint, ChunkManifest)> {
    let mut pass = DigestPass::new(chunk_size)?;
    stream_file(path, None, Some(cancel), |data| pass.update(data)).await?;
    let (fingerprint, manifest) = pass.finish();

    debug!(
        "Fingerprinted {} ({} bytes, md5 {}, {} chunks)",
        path.display(),
        fingerprint.size_bytes,
        fingerprint.whole_file_digest,
        manifest.len()
    );

    Ok((fingerprint, manifest))
}

/// Read `path` through a bounded buffer, handing each filled slice to `sink`
async fn stream_file<F>(
    path: &Path,
    limit: Option<u64>,
    cancel: Option<&CancellationToken>,
    mut sink: F,
) -> Result<()>
where
    F: FnMut(&[u8]),
{
    let display = path.display().to_string();
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| UploadError::from_io_error(e, &display))?;

    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut remaining = limit.unwrap_or(u64::MAX);

    while remaining > 0 {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(UploadError::Cancelled);
        }

        let want = remaining.min(READ_BUFFER_SIZE as u64) as usize;
        let bytes_read = file
            .read(&mut buffer[..want])
            .await
            .map_err(|e| UploadError::from_io_error(e, &display))?;

        if bytes_read == 0 {
            break; // EOF
        }

        sink(&buffer[..bytes_read]);
        remaining -= bytes_read as u64;
    }

    Ok(())
}

/// Incremental state feeding every digest from the same byte stream
struct DigestPass {
    chunk_size: u64,
    size: u64,
    whole: Md5,
    slice: Md5,
    slice_remaining: u64,
    chunk: Md5,
    chunk_filled: u64,
    chunks: Vec<Digest>,
}

impl DigestPass {
    fn new(chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(UploadError::InvalidChunkSize { size: chunk_size });
        }

        Ok(Self {
            chunk_size,
            size: 0,
            whole: Md5::new(),
            slice: Md5::new(),
            slice_remaining: LEADING_SLICE_SIZE,
            chunk: Md5::new(),
            chunk_filled: 0,
            chunks: Vec::new(),
        })
    }

    fn update(&mut self, mut data: &[u8]) {
        self.size += data.len() as u64;
        self.whole.update(data);

        if self.slice_remaining > 0 {
            let take = self.slice_remaining.min(data.len() as u64) as usize;
            self.slice.update(&data[..take]);
            self.slice_remaining -= take as u64;
        }

        while !data.is_empty() {
            let take = (self.chunk_size - self.chunk_filled).min(data.len() as u64) as usize;
            self.chunk.update(&data[..take]);
            self.chunk_filled += take as u64;
            data = &data[take..];

            if self.chunk_filled == self.chunk_size {
                let hasher = std::mem::take(&mut self.chunk);
                self.chunks.push(Digest::from_hasher(hasher));
                self.chunk_filled = 0;
            }
        }
    }

    fn finish(mut self) -> (FileFingerprint, ChunkManifest) {
        if self.chunk_filled > 0 {
            self.chunks.push(Digest::from_hasher(self.chunk));
        }

        let leading_slice_digest = Digest::from_hasher(self.slice);
        let fingerprint = FileFingerprint {
            size_bytes: self.size,
            whole_file_digest: Digest::from_hasher(self.whole),
            leading_slice_digest_envelope: envelope_of(&leading_slice_digest),
            leading_slice_digest,
        };

        (fingerprint, ChunkManifest::new(self.chunk_size, self.chunks))
    }
}
