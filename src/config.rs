use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::pan::client::{DEFAULT_API_BASE_URL, DEFAULT_UPLOAD_BASE_URL, Endpoints, Timeouts};
use crate::pan::helpers;
use crate::pan::upload::{DEFAULT_REMOTE_DIR, UploadSettings};

// The service accepts 4MB chunks for every account and up to 32MB for paid tiers
const MIN_CHUNK_SIZE_MB: u64 = 1;
const MAX_CHUNK_SIZE_MB: u64 = 32;

/// Configuration for pan upload operations
#[derive(Clone)]
pub struct Config {
    pub access_token: String,
    pub remote_dir: String,
    pub chunk_size_mb: u64,
    pub api_base_url: String,
    pub upload_base_url: String,
    pub metadata_timeout_secs: u64,
    pub chunk_timeout_secs: u64,
    pub min_chunk_throughput_kb: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            remote_dir: DEFAULT_REMOTE_DIR.to_string(),
            chunk_size_mb: 4,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            upload_base_url: DEFAULT_UPLOAD_BASE_URL.to_string(),
            metadata_timeout_secs: 30,
            chunk_timeout_secs: 60,
            min_chunk_throughput_kb: 64,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("access_token", &"***")
            .field("remote_dir", &self.remote_dir)
            .field("chunk_size_mb", &self.chunk_size_mb)
            .field("api_base_url", &self.api_base_url)
            .field("upload_base_url", &self.upload_base_url)
            .field("metadata_timeout_secs", &self.metadata_timeout_secs)
            .field("chunk_timeout_secs", &self.chunk_timeout_secs)
            .field("min_chunk_throughput_kb", &self.min_chunk_throughput_kb)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables and .env file
    ///
    /// The access token is read but not validated here; an unusable token is
    /// reported by the uploader as a failed upload.
    ///
    /// # Errors
    ///
    /// Returns an error if an optional variable is present but invalid
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if it exists

        let defaults = Self::default();

        let access_token = env::var("BAIDU_ACCESS_TOKEN").unwrap_or_default();

        let remote_dir = env::var("PAN_REMOTE_DIR").unwrap_or(defaults.remote_dir);
        Self::validate_remote_dir(&remote_dir)?;

        let chunk_size_mb = env_u64("PAN_CHUNK_SIZE_MB", defaults.chunk_size_mb)?;
        Self::validate_chunk_size(chunk_size_mb)?;

        let api_base_url = env::var("PAN_API_BASE_URL").unwrap_or(defaults.api_base_url);
        Self::validate_base_url("PAN_API_BASE_URL", &api_base_url)?;

        let upload_base_url =
            env::var("PAN_UPLOAD_BASE_URL").unwrap_or(defaults.upload_base_url);
        Self::validate_base_url("PAN_UPLOAD_BASE_URL", &upload_base_url)?;

        let metadata_timeout_secs =
            env_u64("PAN_METADATA_TIMEOUT_SECS", defaults.metadata_timeout_secs)?;
        let chunk_timeout_secs = env_u64("PAN_CHUNK_TIMEOUT_SECS", defaults.chunk_timeout_secs)?;
        let min_chunk_throughput_kb = env_u64(
            "PAN_MIN_CHUNK_THROUGHPUT_KB",
            defaults.min_chunk_throughput_kb,
        )?;
        for (name, value) in [
            ("PAN_METADATA_TIMEOUT_SECS", metadata_timeout_secs),
            ("PAN_CHUNK_TIMEOUT_SECS", chunk_timeout_secs),
            ("PAN_MIN_CHUNK_THROUGHPUT_KB", min_chunk_throughput_kb),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        Ok(Self {
            access_token,
            remote_dir,
            chunk_size_mb,
            api_base_url,
            upload_base_url,
            metadata_timeout_secs,
            chunk_timeout_secs,
            min_chunk_throughput_kb,
        })
    }

    /// Replace the remote directory, e.g. from a command-line override
    pub fn with_remote_dir(mut self, remote_dir: &str) -> Result<Self> {
        Self::validate_remote_dir(remote_dir)?;
        self.remote_dir = remote_dir.to_string();
        Ok(self)
    }

    /// Validate remote directory: absolute, no traversal, no empty segments
    fn validate_remote_dir(dir: &str) -> Result<()> {
        if !dir.starts_with('/') {
            anyhow::bail!(
                "PAN_REMOTE_DIR '{}' must be an absolute path (e.g. /apps/yt-download)",
                dir
            );
        }

        helpers::validate_remote_dir(dir).with_context(|| {
            format!(
                "PAN_REMOTE_DIR '{}' must not contain '..' segments or consecutive slashes",
                dir
            )
        })
    }

    fn validate_chunk_size(mb: u64) -> Result<()> {
        if !(MIN_CHUNK_SIZE_MB..=MAX_CHUNK_SIZE_MB).contains(&mb) {
            anyhow::bail!(
                "PAN_CHUNK_SIZE_MB must be between {} and {} (got {})",
                MIN_CHUNK_SIZE_MB,
                MAX_CHUNK_SIZE_MB,
                mb
            );
        }
        Ok(())
    }

    fn validate_base_url(name: &str, url: &str) -> Result<()> {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            anyhow::bail!("{} '{}' must start with http:// or https://", name, url);
        }
        Ok(())
    }

    /// Settings handed to the uploader
    pub fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            remote_dir: self.remote_dir.clone(),
            chunk_size: self.chunk_size_mb * 1024 * 1024,
            endpoints: Endpoints {
                api_base: self.api_base_url.clone(),
                upload_base: self.upload_base_url.clone(),
            },
            timeouts: Timeouts {
                metadata: Duration::from_secs(self.metadata_timeout_secs),
                chunk_base: Duration::from_secs(self.chunk_timeout_secs),
                min_chunk_throughput: self.min_chunk_throughput_kb * 1024,
            },
        }
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} must be a non-negative integer, got '{}'", name, value)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_dir_validation() {
        // Valid directories
        assert!(Config::validate_remote_dir("/").is_ok());
        assert!(Config::validate_remote_dir("/apps/yt-download").is_ok());
        assert!(Config::validate_remote_dir("/apps/yt-download/").is_ok());
        assert!(Config::validate_remote_dir("/apps/my..videos").is_ok());

        // Invalid directories
        assert!(Config::validate_remote_dir("apps/yt").is_err()); // Relative
        assert!(Config::validate_remote_dir("").is_err()); // Empty
        assert!(Config::validate_remote_dir("/apps//yt").is_err()); // Consecutive slashes
        assert!(Config::validate_remote_dir("/apps/../etc").is_err()); // Traversal
    }

    #[test]
    fn test_chunk_size_validation() {
        assert!(Config::validate_chunk_size(4).is_ok());
        assert!(Config::validate_chunk_size(1).is_ok());
        assert!(Config::validate_chunk_size(32).is_ok());

        assert!(Config::validate_chunk_size(0).is_err());
        assert!(Config::validate_chunk_size(33).is_err());
    }

    #[test]
    fn test_base_url_validation() {
        assert!(Config::validate_base_url("X", "https://pan.baidu.com/rest/2.0").is_ok());
        assert!(Config::validate_base_url("X", "http://127.0.0.1:8080").is_ok());
        assert!(Config::validate_base_url("X", "pan.baidu.com").is_err());
    }

    #[test]
    fn test_upload_settings_conversion() {
        let config = Config {
            chunk_size_mb: 8,
            min_chunk_throughput_kb: 128,
            ..Config::default()
        };

        let settings = config.upload_settings();
        assert_eq!(settings.chunk_size, 8 * 1024 * 1024);
        assert_eq!(settings.remote_dir, "/apps/yt-download");
        assert_eq!(settings.endpoints, Endpoints::default());
        assert_eq!(settings.timeouts.metadata, Duration::from_secs(30));
        assert_eq!(settings.timeouts.min_chunk_throughput, 128 * 1024);
    }

    #[test]
    fn test_remote_dir_override() {
        let config = Config::default().with_remote_dir("/apps/other").unwrap();
        assert_eq!(config.remote_dir, "/apps/other");
        assert!(Config::default().with_remote_dir("relative").is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = Config {
            access_token: "secret".to_string(),
            ..Config::default()
        };
        assert!(!format!("{:?}", config).contains("secret"));
    }
}
