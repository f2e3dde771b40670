use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::debug;

use super::error::{Result, Stage, UploadError};
use super::helpers::AccessToken;

pub const DEFAULT_API_BASE_URL: &str = "https://pan.baidu.com/rest/2.0";
pub const DEFAULT_UPLOAD_BASE_URL: &str = "https://d.pcs.baidu.com/rest/2.0";

/// Base URLs of the metadata and chunk-transfer hosts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_base: String,
    pub upload_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE_URL.to_string(),
            upload_base: DEFAULT_UPLOAD_BASE_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Both hosts served from the same base, used against local test servers
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            api_base: base.clone(),
            upload_base: base,
        }
    }

    fn file_url(&self) -> String {
        format!("{}/xpan/file", self.api_base.trim_end_matches('/'))
    }

    fn superfile_url(&self) -> String {
        format!("{}/pcs/superfile2", self.upload_base.trim_end_matches('/'))
    }
}

/// Per-request timeouts: short for metadata calls, size-proportional for chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub metadata: Duration,
    pub chunk_base: Duration,
    /// Slowest acceptable chunk throughput in bytes per second
    pub min_chunk_throughput: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            metadata: Duration::from_secs(30),
            chunk_base: Duration::from_secs(60),
            min_chunk_throughput: 64 * 1024,
        }
    }
}

impl Timeouts {
    pub fn for_chunk(&self, chunk_len: u64) -> Duration {
        self.chunk_base
            .saturating_add(Duration::from_secs(chunk_len / self.min_chunk_throughput.max(1)))
    }
}

/// File identity returned by the service after a rapid hit or finalize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub fs_id: String,
    pub path: String,
}

/// `rapidupload` form fields
#[derive(Debug, Serialize)]
pub struct RapidUploadForm<'a> {
    pub path: &'a str,
    #[serde(rename = "content-length")]
    pub content_length: u64,
    #[serde(rename = "content-md5")]
    pub content_md5: String,
    #[serde(rename = "slice-md5")]
    pub slice_md5: String,
    #[serde(rename = "content-crc32")]
    pub content_crc32: &'a str,
}

/// `precreate` form fields
#[derive(Debug, Serialize)]
pub struct PreCreateForm<'a> {
    pub path: &'a str,
    pub size: u64,
    pub isdir: u8,
    pub autoinit: u8,
    pub block_list: &'a str,
    /// 1 = rename on name conflict
    pub rtype: u8,
}

/// `create` form fields
#[derive(Debug, Serialize)]
pub struct CreateForm<'a> {
    pub path: &'a str,
    pub size: u64,
    pub isdir: u8,
    pub block_list: &'a str,
    pub uploadid: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    errno: i64,
    #[serde(default)]
    errmsg: Option<String>,
    #[serde(flatten)]
    body: T,
}

#[derive(Debug, Default, Deserialize)]
struct FileBody {
    #[serde(default, deserialize_with = "de_opt_id")]
    fs_id: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    info: Option<FileInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct FileInfo {
    #[serde(default, deserialize_with = "de_opt_id")]
    fs_id: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PreCreateBody {
    #[serde(default)]
    uploadid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkBody {
    #[serde(default)]
    md5: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_msg: Option<String>,
}

/// Acknowledgement of a transferred chunk
#[derive(Debug, Clone, Default)]
pub struct ChunkReceipt {
    /// Server-side MD5 of the received chunk, when reported
    pub md5: Option<String>,
}

// fs_id is numeric on the wire but opaque to us
fn de_opt_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Num(u64),
        Str(String),
    }

    Ok(Option::<IdRepr>::deserialize(deserializer)?.map(|id| match id {
        IdRepr::Num(n) => n.to_string(),
        IdRepr::Str(s) => s,
    }))
}

impl FileBody {
    fn into_remote_file(self, requested_path: &str) -> Option<RemoteFile> {
        let (info_id, info_path) = match self.info {
            Some(info) => (info.fs_id, info.path),
            None => (None, None),
        };

        let fs_id = self.fs_id.or(info_id).filter(|id| !id.is_empty())?;
        let path = self
            .path
            .or(info_path)
            .unwrap_or_else(|| requested_path.to_string());

        Some(RemoteFile { fs_id, path })
    }
}

/// HTTP client for the pan file endpoints
///
/// Constructed explicitly per uploader and passed by reference; it holds the
/// validated token and never mutates after construction.
#[derive(Clone)]
pub struct PanClient {
    http: reqwest::Client,
    token: AccessToken,
    endpoints: Endpoints,
    timeouts: Timeouts,
}

impl PanClient {
    pub fn new(token: AccessToken, endpoints: Endpoints, timeouts: Timeouts) -> Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .user_agent(concat!("pan-upload/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UploadError::from_reqwest(Stage::ClientSetup, e))?;

        Ok(Self {
            http,
            token,
            endpoints,
            timeouts,
        })
    }

    /// Probe whether the service already holds this content
    pub async fn rapid_upload(&self, form: &RapidUploadForm<'_>) -> Result<RemoteFile> {
        let body: FileBody = self
            .post_file_method(Stage::RapidUpload, "rapidupload", form)
            .await?;
        body.into_remote_file(form.path)
            .ok_or_else(|| UploadError::malformed(Stage::RapidUpload, "missing fs_id"))
    }

    /// Register size and block list; returns the upload id
    pub async fn precreate(&self, form: &PreCreateForm<'_>) -> Result<String> {
        let body: PreCreateBody = self
            .post_file_method(Stage::PreCreate, "precreate", form)
            .await?;
        body.uploadid
            .filter(|id| !id.is_empty())
            .ok_or_else(|| UploadError::malformed(Stage::PreCreate, "missing uploadid"))
    }

    /// Transfer one chunk as a temporary part of `upload_id`
    pub async fn upload_chunk(
        &self,
        remote_path: &str,
        upload_id: &str,
        partseq: usize,
        bytes: Vec<u8>,
    ) -> Result<ChunkReceipt> {
        let stage = Stage::Chunk(partseq);
        let timeout = self.timeouts.for_chunk(bytes.len() as u64);
        let partseq_str = partseq.to_string();

        let part = multipart::Part::bytes(bytes)
            .file_name(format!("part{}", partseq))
            .mime_str("application/octet-stream")
            .map_err(|e| UploadError::from_reqwest(stage, e))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.endpoints.superfile_url())
            .query(&[
                ("method", "upload"),
                ("access_token", self.token.as_str()),
                ("type", "tmpfile"),
                ("path", remote_path),
                ("uploadid", upload_id),
                ("partseq", partseq_str.as_str()),
            ])
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| UploadError::from_reqwest(stage, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| UploadError::from_reqwest(stage, e))?;

        if !status.is_success() {
            return Err(UploadError::Transport {
                stage,
                message: format!("HTTP {}: {}", status, text),
            });
        }

        // Success bodies are informational; an unparseable one is still an ack
        let body: ChunkBody = serde_json::from_str(&text).unwrap_or_default();
        if let Some(code) = body.error_code.filter(|c| *c != 0) {
            return Err(UploadError::Protocol {
                stage,
                errno: code,
                message: body.error_msg.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        Ok(ChunkReceipt { md5: body.md5 })
    }

    /// Assemble uploaded chunks into the final object
    pub async fn create(&self, form: &CreateForm<'_>) -> Result<RemoteFile> {
        let body: FileBody = self.post_file_method(Stage::Finalize, "create", form).await?;
        body.into_remote_file(form.path)
            .ok_or_else(|| UploadError::malformed(Stage::Finalize, "missing fs_id"))
    }

    async fn post_file_method<F, T>(&self, stage: Stage, method: &str, form: &F) -> Result<T>
    where
        F: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!("POST xpan/file method={}", method);

        let response = self
            .http
            .post(self.endpoints.file_url())
            .query(&[("method", method), ("access_token", self.token.as_str())])
            .form(form)
            .timeout(self.timeouts.metadata)
            .send()
            .await
            .map_err(|e| UploadError::from_reqwest(stage, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| UploadError::from_reqwest(stage, e))?;

        let envelope: Envelope<T> = serde_json::from_str(&text)
            .map_err(|e| UploadError::malformed(stage, format!("HTTP {}: {}", status, e)))?;

        if envelope.errno != 0 {
            return Err(UploadError::Protocol {
                stage,
                errno: envelope.errno,
                message: envelope
                    .errmsg
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        Ok(envelope.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_timeout_scales_with_size() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.for_chunk(0), Duration::from_secs(60));
        assert_eq!(timeouts.for_chunk(4 * 1024 * 1024), Duration::from_secs(60 + 64));
        assert!(timeouts.for_chunk(1) < timeouts.for_chunk(32 * 1024 * 1024));
    }

    #[test]
    fn test_chunk_timeout_saturates() {
        let timeouts = Timeouts {
            chunk_base: Duration::from_secs(u64::MAX),
            ..Timeouts::default()
        };
        assert_eq!(timeouts.for_chunk(4 * 1024 * 1024), Duration::MAX);
    }

    #[test]
    fn test_endpoint_urls() {
        let endpoints = Endpoints::default();
        assert_eq!(endpoints.file_url(), "https://pan.baidu.com/rest/2.0/xpan/file");
        assert_eq!(
            endpoints.superfile_url(),
            "https://d.pcs.baidu.com/rest/2.0/pcs/superfile2"
        );

        let local = Endpoints::single("http://127.0.0.1:8080/");
        assert_eq!(local.file_url(), "http://127.0.0.1:8080/xpan/file");
    }

    #[test]
    fn test_file_body_numeric_fs_id() {
        let envelope: Envelope<FileBody> =
            serde_json::from_str(r#"{"errno":0,"fs_id":123456789,"path":"/apps/a.mp4"}"#)
                .unwrap();
        let file = envelope.body.into_remote_file("/apps/requested.mp4").unwrap();
        assert_eq!(file.fs_id, "123456789");
        assert_eq!(file.path, "/apps/a.mp4");
    }

    #[test]
    fn test_file_body_nested_info() {
        let envelope: Envelope<FileBody> = serde_json::from_str(
            r#"{"errno":0,"info":{"fs_id":42,"path":"/apps/b.mp4"},"request_id":1}"#,
        )
        .unwrap();
        let file = envelope.body.into_remote_file("/apps/requested.mp4").unwrap();
        assert_eq!(file.fs_id, "42");
        assert_eq!(file.path, "/apps/b.mp4");
    }

    #[test]
    fn test_file_body_missing_id() {
        let envelope: Envelope<FileBody> = serde_json::from_str(r#"{"errno":0}"#).unwrap();
        assert!(envelope.body.into_remote_file("/x").is_none());
    }

    #[test]
    fn test_error_envelope() {
        let envelope: Envelope<PreCreateBody> =
            serde_json::from_str(r#"{"errno":-8,"errmsg":"file already exists"}"#).unwrap();
        assert_eq!(envelope.errno, -8);
        assert_eq!(envelope.errmsg.as_deref(), Some("file already exists"));
        assert!(envelope.body.uploadid.is_none());
    }

    #[test]
    fn test_precreate_form_encoding() {
        let form = PreCreateForm {
            path: "/apps/a b.mp4",
            size: 10,
            isdir: 0,
            autoinit: 1,
            block_list: r#"["abc"]"#,
            rtype: 1,
        };
        let json = serde_json::to_value(&form).unwrap();
        assert_eq!(json["isdir"], 0);
        assert_eq!(json["autoinit"], 1);
        assert_eq!(json["rtype"], 1);
        assert_eq!(json["block_list"], r#"["abc"]"#);
    }

    #[test]
    fn test_rapid_form_field_names() {
        let form = RapidUploadForm {
            path: "/apps/a.mp4",
            content_length: 3,
            content_md5: "m".to_string(),
            slice_md5: "s".to_string(),
            content_crc32: "0",
        };
        let json = serde_json::to_value(&form).unwrap();
        for key in ["path", "content-length", "content-md5", "slice-md5", "content-crc32"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
    }
}
