//! On-disk token storage (`~/.eremos/credentials.json`)
//!
//! The store refuses to follow symlinks for either the credentials directory
//! or the file itself, writes through a temporary file plus rename, and
//! restricts permissions to the owner where the platform allows it.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::debug;

use crate::auth::StoredTokens;

const CREDENTIALS_DIR_NAME: &str = ".eremos";
const CREDENTIALS_FILE_NAME: &str = "credentials.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid {0}")]
    Validation(&'static str),
    #[error("Refusing to use symlinked credentials directory: {}", .0.display())]
    SymlinkedDirectory(PathBuf),
    #[error("Refusing to use symlinked credentials file: {}", .0.display())]
    SymlinkedFile(PathBuf),
    #[error("Could not determine home directory")]
    NoHomeDirectory,
    #[error("Credentials I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize credentials: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Owns the credentials file. Callers only ever see copies of its contents.
#[derive(Debug, Clone)]
pub struct TokenStore {
    dir: PathBuf,
    file: PathBuf,
}

impl TokenStore {
    /// Store rooted at an explicit credentials directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let file = dir.join(CREDENTIALS_FILE_NAME);
        Self { dir, file }
    }

    /// Store at the conventional per-user location, `~/.eremos`
    pub fn default_location() -> Result<Self, StorageError> {
        let home = dirs::home_dir().ok_or(StorageError::NoHomeDirectory)?;
        Ok(Self::new(home.join(CREDENTIALS_DIR_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Validate and atomically persist `tokens`
    pub fn save(&self, tokens: &StoredTokens) -> Result<(), StorageError> {
        if let Some(field) = tokens.invalid_field() {
            return Err(StorageError::Validation(field));
        }

        if is_symlink(&self.dir) {
            return Err(StorageError::SymlinkedDirectory(self.dir.clone()));
        }
        if !self.dir.exists() {
            create_private_dir(&self.dir)?;
        }
        // Best effort: permission semantics differ per platform, never fail on this.
        restrict_permissions(&self.dir, 0o700);

        if is_symlink(&self.file) {
            return Err(StorageError::SymlinkedFile(self.file.clone()));
        }

        let contents = serde_json::to_string_pretty(tokens)?;
        let tmp = self.dir.join(temp_file_name());
        if let Err(e) = write_private_file(&tmp, contents.as_bytes()) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        restrict_permissions(&tmp, 0o600);

        if fs::rename(&tmp, &self.file).is_err() {
            // Some platforms refuse to rename over an existing file.
            let _ = fs::remove_file(&self.file);
            if let Err(e) = fs::rename(&tmp, &self.file) {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
        }
        restrict_permissions(&self.file, 0o600);

        debug!("Saved credentials to {}", self.file.display());
        Ok(())
    }

    /// Stored tokens, or `None` when the file is missing, unparsable or invalid
    pub fn load(&self) -> Result<Option<StoredTokens>, StorageError> {
        if is_symlink(&self.file) {
            return Err(StorageError::SymlinkedFile(self.file.clone()));
        }

        let contents = match fs::read_to_string(&self.file) {
            Ok(contents) => contents,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!("Ignoring unreadable credentials file: {}", e);
                }
                return Ok(None);
            }
        };

        let tokens = match serde_json::from_str::<StoredTokens>(&contents) {
            Ok(tokens) => tokens,
            Err(e) => {
                debug!("Ignoring malformed credentials file: {}", e);
                return Ok(None);
            }
        };

        if let Some(field) = tokens.invalid_field() {
            debug!("Ignoring credentials file with invalid {}", field);
            return Ok(None);
        }

        Ok(Some(tokens))
    }

    /// Remove the credentials file; no-op when absent
    pub fn delete(&self) -> Result<(), StorageError> {
        if is_symlink(&self.file) {
            return Err(StorageError::SymlinkedFile(self.file.clone()));
        }
        match fs::remove_file(&self.file) {
            Ok(()) => {
                debug!("Deleted credentials at {}", self.file.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

fn temp_file_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("credentials.{}.{}.tmp", std::process::id(), millis)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// Owner-only permissions, ignoring any failure
#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        debug!("Could not restrict permissions on {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) {}
