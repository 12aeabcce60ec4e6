//! On-disk token persistence.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::Token;
use crate::error::{Error, Result};

/// Token file at a fixed path, with a single-generation `.bak` sibling.
///
/// On Unix the file is created `0600` and missing parent directories
/// `0700`.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Creates a store for the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the token file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the backup written by [`TokenStore::save`].
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".bak");
        PathBuf::from(name)
    }

    /// Loads the stored token.
    ///
    /// Returns `Ok(None)` if there is no token file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptToken`] if the file exists but does not
    /// decode, or an I/O error if it cannot be read.
    pub fn load(&self) -> Result<Option<Token>> {
        debug!(path = %self.path.display(), "loading token");
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "token file not found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| Error::CorruptToken {
                path: self.path.clone(),
                source,
            })
    }

    /// Saves a token, moving any existing file to the backup path first.
    ///
    /// An older backup is replaced, so there is never more than one.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, backup or file cannot be written.
    pub fn save(&self, token: &Token) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_private_dir(dir)?;
        }

        if self.path.exists() {
            let backup = self.backup_path();
            info!(path = %backup.display(), "backing up existing token");
            fs::rename(&self.path, &backup)?;
        }

        let mut json = serde_json::to_vec_pretty(token)?;
        json.push(b'\n');

        let mut file = create_private_file(&self.path)?;
        file.write_all(&json)?;
        file.sync_all()?;

        info!(path = %self.path.display(), "token saved");
        Ok(())
    }

    /// Erases the token file: zero-fills it, then deletes it. The backup,
    /// if any, is erased the same way.
    ///
    /// Returns `false` if there was nothing to revoke.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be overwritten or
    /// removed.
    pub fn revoke(&self) -> Result<bool> {
        let removed = erase(&self.path)?;
        if erase(&self.backup_path())? {
            debug!("token backup erased");
        }

        if removed {
            info!(path = %self.path.display(), "token revoked");
        } else {
            info!(path = %self.path.display(), "token file not found, nothing to revoke");
        }
        Ok(removed)
    }
}

fn erase(path: &Path) -> Result<bool> {
    let mut file = match OpenOptions::new().write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let len = usize::try_from(file.metadata()?.len())
        .map_err(|_| Error::InvalidConfig(format!("{} is too large", path.display())))?;
    file.write_all(&vec![0u8; len])?;
    file.sync_all()?;
    drop(file);

    fs::remove_file(path)?;
    Ok(true)
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

#[cfg(unix)]
fn create_private_file(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> TokenStore {
        TokenStore::new(dir.path().join("nested/smog/token.json"))
    }

    fn token(access: &str) -> Token {
        Token::new(access, "Bearer").with_refresh_token("refresh")
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&token("one")).unwrap();
        assert_eq!(store.load().unwrap(), Some(token("one")));
        assert!(!store.backup_path().exists());
    }

    #[test]
    fn test_single_backup_generation() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&token("one")).unwrap();
        store.save(&token("two")).unwrap();
        store.save(&token("three")).unwrap();

        assert_eq!(store.load().unwrap(), Some(token("three")));
        let backup: Token =
            serde_json::from_slice(&fs::read(store.backup_path()).unwrap()).unwrap();
        assert_eq!(backup, token("two"));

        let entries: Vec<_> = fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries.len(), 2, "{entries:?}");
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), b"{not json").unwrap();
        assert!(matches!(store.load(), Err(Error::CorruptToken { .. })));

        fs::write(store.path(), b"").unwrap();
        assert!(matches!(store.load(), Err(Error::CorruptToken { .. })));
    }

    #[test]
    fn test_revoke() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&token("one")).unwrap();
        store.save(&token("two")).unwrap();

        assert!(store.revoke().unwrap());
        assert!(!store.path().exists());
        assert!(!store.backup_path().exists());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_revoke_missing_is_noop() {
        let dir = TempDir::new().unwrap();
        assert!(!store(&dir).revoke().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&token("one")).unwrap();

        let file_mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
        let dir_mode = fs::metadata(store.path().parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }
}
