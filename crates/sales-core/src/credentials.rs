use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const USERNAME_ENV: &str = "KAGGLE_USERNAME";
pub const KEY_ENV: &str = "KAGGLE_KEY";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("JSON decoding error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KaggleCredentials {
    pub username: String,
    pub key: String,
}

impl fmt::Debug for KaggleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KaggleCredentials")
            .field("username", &self.username)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl KaggleCredentials {
    pub fn from_json(raw: &str) -> Result<Self, CredentialError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_env() -> Result<Self, CredentialError> {
        let username =
            std::env::var(USERNAME_ENV).map_err(|_| CredentialError::MissingEnv(USERNAME_ENV))?;
        let key = std::env::var(KEY_ENV).map_err(|_| CredentialError::MissingEnv(KEY_ENV))?;
        Ok(Self { username, key })
    }

    /// Four-space indented JSON, the layout the Kaggle CLI writes itself.
    pub fn to_pretty_json(&self) -> Result<Vec<u8>, CredentialError> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.serialize(&mut serializer)?;
        buffer.push(b'\n');
        Ok(buffer)
    }
}

/// `$HOME/.kaggle/kaggle.json`, the location the Kaggle CLI reads.
pub fn default_credentials_path() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/root"));
    home.join(".kaggle").join("kaggle.json")
}

/// Decodes `raw` and writes it to `dest` with owner-only permissions.
///
/// Decoding happens before anything touches the filesystem, so malformed
/// input never leaves a file behind. The parent directory may already exist.
pub fn provision(raw: &str, dest: &Path) -> Result<PathBuf, CredentialError> {
    let credentials = KaggleCredentials::from_json(raw)?;
    write_credentials(&credentials, dest)
}

pub fn write_credentials(
    credentials: &KaggleCredentials,
    dest: &Path,
) -> Result<PathBuf, CredentialError> {
    let bytes = credentials.to_pretty_json()?;

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| CredentialError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let io_err = |source| CredentialError::Io {
        path: dest.to_path_buf(),
        source,
    };

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(dest).map_err(io_err)?;
    file.write_all(&bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    restrict_permissions(dest)?;
    info!(path = %dest.display(), username = %credentials.username, "Setup successful");
    Ok(dest.to_path_buf())
}

/// Reads back a credential file, failing if it is missing or malformed.
pub fn load(path: &Path) -> Result<KaggleCredentials, CredentialError> {
    let content = fs::read_to_string(path).map_err(|source| CredentialError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    KaggleCredentials::from_json(&content)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), CredentialError> {
    use std::os::unix::fs::PermissionsExt;

    let io_err = |source| CredentialError::Io {
        path: path.to_path_buf(),
        source,
    };
    // A pre-existing file keeps its old mode through `open`, so reset it.
    let metadata = fs::metadata(path).map_err(io_err)?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(0o600);
    fs::set_permissions(path, permissions).map_err(io_err)
}

#[cfg(not(unix))]
fn restrict_permissions(path: &Path) -> Result<(), CredentialError> {
    fs::metadata(path)
        .map(|_| ())
        .map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = r#"{"username":"analyst","key":"0123456789abcdef"}"#;

    #[test]
    fn writes_pretty_json_with_four_space_indent() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(".kaggle").join("kaggle.json");

        let written = provision(RAW, &dest).expect("provision failed");
        assert_eq!(written, dest);

        let content = fs::read_to_string(&dest).unwrap();
        assert_eq!(
            content,
            "{\n    \"username\": \"analyst\",\n    \"key\": \"0123456789abcdef\"\n}\n"
        );
        assert_eq!(load(&dest).unwrap().username, "analyst");
    }

    #[test]
    fn directory_creation_tolerates_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let kaggle_dir = dir.path().join(".kaggle");
        fs::create_dir_all(&kaggle_dir).unwrap();
        let dest = kaggle_dir.join("kaggle.json");

        provision(RAW, &dest).expect("first run");
        provision(RAW, &dest).expect("second run over an existing directory and file");
    }

    #[test]
    fn malformed_json_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(".kaggle").join("kaggle.json");

        let err = provision("{username: analyst", &dest).expect_err("must fail to decode");
        assert!(matches!(err, CredentialError::Decode(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn missing_key_field_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("kaggle.json");

        let err = provision(r#"{"username":"analyst"}"#, &dest).expect_err("key is required");
        assert!(matches!(err, CredentialError::Decode(_)));
    }

    #[cfg(unix)]
    #[test]
    fn credential_file_is_owner_read_write_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("kaggle.json");
        fs::write(&dest, "stale").unwrap();
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o644)).unwrap();

        provision(RAW, &dest).unwrap();

        let mode = fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn debug_output_redacts_key() {
        let credentials = KaggleCredentials::from_json(RAW).unwrap();
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("analyst"));
        assert!(!rendered.contains("0123456789abcdef"));
    }
}
