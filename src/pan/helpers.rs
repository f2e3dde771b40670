use std::path::Path;

use super::error::{Result, UploadError};

/// Character substituted for anything the remote path syntax cannot carry
pub const PLACEHOLDER_CHAR: char = '_';

// Rejected by the service in file names
const UNSAFE_CHARS: &[char] = &['\\', '/', '?', '|', '"', '<', '>', ':', '*'];

// Values shipped in sample configs that are never real tokens
const PLACEHOLDER_TOKENS: &[&str] = &[
    "你的访问令牌",
    "your_access_token",
    "your-access-token",
    "YOUR_ACCESS_TOKEN",
    "<access_token>",
    "changeme",
];

/// Replace characters that are structurally unsafe in a remote file name
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if UNSAFE_CHARS.contains(&c) || c.is_control() {
                PLACEHOLDER_CHAR
            } else {
                c
            }
        })
        .collect()
}

/// Reject remote directories with `..` segments or consecutive slashes
pub fn validate_remote_dir(remote_dir: &str) -> Result<()> {
    let dir = remote_dir.trim();
    if dir.contains("//") || dir.split('/').any(|segment| segment == "..") {
        return Err(UploadError::InvalidRemotePath {
            path: dir.to_string(),
        });
    }
    Ok(())
}

/// Remote path for a local file: `remote_dir` joined with its sanitized base name
///
/// # Examples
///
/// ```
/// # use std::path::Path;
/// # use pan_upload::pan::helpers::build_remote_path;
/// let remote = build_remote_path("/apps/yt-download/", Path::new("/tmp/a?b.mp4")).unwrap();
/// assert_eq!(remote, "/apps/yt-download/a_b.mp4");
/// ```
pub fn build_remote_path(remote_dir: &str, local_path: &Path) -> Result<String> {
    validate_remote_dir(remote_dir)?;

    let file_name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| UploadError::InvalidRemotePath {
            path: local_path.display().to_string(),
        })?;

    let safe_name = sanitize_file_name(file_name.trim());
    if safe_name.is_empty() || safe_name == "." || safe_name == ".." {
        return Err(UploadError::InvalidRemotePath {
            path: local_path.display().to_string(),
        });
    }

    let dir = remote_dir.trim().trim_end_matches('/');
    if dir.is_empty() {
        Ok(format!("/{}", safe_name))
    } else if dir.starts_with('/') {
        Ok(format!("{}/{}", dir, safe_name))
    } else {
        Ok(format!("/{}/{}", dir, safe_name))
    }
}

/// Validated access credential; only constructible through [`AccessToken::parse`]
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    /// Accept a non-empty, whitespace-free token that is not a sample placeholder
    pub fn parse(raw: &str) -> Result<Self> {
        let token = raw.trim();

        if token.is_empty() {
            return Err(UploadError::InvalidCredential {
                reason: "access token is not set".to_string(),
            });
        }

        if PLACEHOLDER_TOKENS.contains(&token) {
            return Err(UploadError::InvalidCredential {
                reason: "access token is still the placeholder value".to_string(),
            });
        }

        if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(UploadError::InvalidCredential {
                reason: "access token contains whitespace".to_string(),
            });
        }

        Ok(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a?b*c\"d.mp4"), "a_b_c_d.mp4");
        assert_eq!(sanitize_file_name("x<y>z|w:v\\u.webm"), "x_y_z_w_v_u.webm");
        assert_eq!(sanitize_file_name("tab\there.mp4"), "tab_here.mp4");
        // Full-width punctuation is legal in remote names
        assert_eq!(
            sanitize_file_name("周末玄学大课堂：实例｜ [Esk-pbgFaBI].webm"),
            "周末玄学大课堂：实例｜ [Esk-pbgFaBI].webm"
        );
    }

    #[test]
    fn test_build_remote_path() {
        let local = PathBuf::from("/tmp/videos/clip [abc].mp4");
        assert_eq!(
            build_remote_path("/apps/yt-download", &local).unwrap(),
            "/apps/yt-download/clip [abc].mp4"
        );
        assert_eq!(
            build_remote_path("/apps/yt-download/", &local).unwrap(),
            "/apps/yt-download/clip [abc].mp4"
        );
        assert_eq!(
            build_remote_path("apps/yt", &local).unwrap(),
            "/apps/yt/clip [abc].mp4"
        );
        assert_eq!(build_remote_path("/", &local).unwrap(), "/clip [abc].mp4");
    }

    #[test]
    fn test_build_remote_path_is_deterministic() {
        let local = PathBuf::from("/tmp/what?.mp4");
        let first = build_remote_path("/apps/x", &local).unwrap();
        let second = build_remote_path("/apps/x", &local).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "/apps/x/what_.mp4");
    }

    #[test]
    fn test_build_remote_path_without_file_name() {
        assert!(build_remote_path("/apps/x", Path::new("/")).is_err());
        assert!(build_remote_path("/apps/x", Path::new("..")).is_err());
    }

    #[test]
    fn test_build_remote_path_rejects_unsafe_dirs() {
        let local = PathBuf::from("/tmp/x.mp4");
        for dir in ["/a/../b", "..", "/apps//yt", "/apps/yt/.."] {
            let err = build_remote_path(dir, &local).unwrap_err();
            assert!(
                matches!(err, UploadError::InvalidRemotePath { ref path } if path == dir),
                "{} accepted",
                dir
            );
        }
        assert!(validate_remote_dir("/apps/my..videos").is_ok());
    }

    #[test]
    fn test_access_token_validation() {
        assert!(AccessToken::parse("121.27a0fc94de.YGb5RHek4r.0oT7xQ").is_ok());
        assert_eq!(AccessToken::parse("  tok  ").unwrap().as_str(), "tok");

        assert!(AccessToken::parse("").is_err());
        assert!(AccessToken::parse("   ").is_err());
        assert!(AccessToken::parse("你的访问令牌").is_err());
        assert!(AccessToken::parse("your_access_token").is_err());
        assert!(AccessToken::parse("abc def").is_err());
    }

    #[test]
    fn test_access_token_debug_is_redacted() {
        let token = AccessToken::parse("secret-token").unwrap();
        assert_eq!(format!("{:?}", token), "AccessToken(***)");
    }
}
