//! Password sources for LUKS devices.

use std::fs::{self, Metadata};
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use snafu::ResultExt;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, KeyFileSnafu, PasswordPromptSnafu, Result};
use crate::identity::UserIdentity;

/// Asks the user for a passphrase.
pub trait PasswordPrompt {
    fn prompt(&self, message: &str) -> Result<String>;
}

/// Reads the passphrase from the controlling terminal without echo.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtyPrompt;

impl PasswordPrompt for TtyPrompt {
    fn prompt(&self, message: &str) -> Result<String> {
        rpassword::prompt_password(message).context(PasswordPromptSnafu)
    }
}

/// Where cryptsetup reads the key from.
#[derive(Debug)]
pub enum PasswordSource {
    /// Let the encryption tool handle it.
    None,
    /// A key file supplied by the caller; never deleted.
    ExistingFile(PathBuf),
    /// Interactively entered passphrase; removed on drop.
    Temporary(NamedTempFile),
}

impl PasswordSource {
    /// Picks a source: the supplied file if any, a prompt if the device
    /// needs one, nothing otherwise.
    ///
    /// A supplied file is handed to cryptsetup running as root, so `reader`
    /// (the invoking user) must be able to read it on their own.
    pub fn acquire(
        supplied: Option<&Path>,
        needed: bool,
        device: &Path,
        reader: &UserIdentity,
        prompt: &dyn PasswordPrompt,
    ) -> Result<Self> {
        if let Some(path) = supplied {
            let canonical = fs::canonicalize(path)
                .ok()
                .filter(|p| p.is_file())
                .ok_or_else(|| Error::Luks {
                    message: format!("Passphrase file {} does not exist.", path.display()),
                })?;
            let meta = fs::metadata(&canonical).context(KeyFileSnafu)?;
            if !readable_by(&meta, reader) {
                return Err(Error::Permission {
                    message: format!("{} may not read {}.", reader.name, path.display()),
                });
            }
            return Ok(Self::ExistingFile(canonical));
        }

        if !needed {
            return Ok(Self::None);
        }

        let passphrase = prompt.prompt(&format!("Enter passphrase for {}: ", device.display()))?;
        let mut file = NamedTempFile::new().context(KeyFileSnafu)?;
        file.write_all(passphrase.as_bytes()).context(KeyFileSnafu)?;
        file.flush().context(KeyFileSnafu)?;
        debug!("passphrase stored in {}", file.path().display());
        Ok(Self::Temporary(file))
    }

    pub fn key_file(&self) -> Option<&Path> {
        match self {
            Self::None => None,
            Self::ExistingFile(path) => Some(path),
            Self::Temporary(file) => Some(file.path()),
        }
    }

    /// `--key-file`/`--keyfile-size` arguments for cryptsetup.
    pub fn key_args(&self) -> Result<Vec<String>> {
        let Some(path) = self.key_file() else {
            return Ok(Vec::new());
        };
        let size = std::fs::metadata(path).context(KeyFileSnafu)?.len();
        Ok(vec![
            "--key-file".to_string(),
            path.display().to_string(),
            "--keyfile-size".to_string(),
            size.to_string(),
        ])
    }
}

/// Permission bits check against the user's uid and primary gid.
/// Supplementary groups are not consulted.
fn readable_by(meta: &Metadata, user: &UserIdentity) -> bool {
    let mode = meta.mode();
    if user.uid == 0 {
        true
    } else if meta.uid() == user.uid {
        mode & 0o400 != 0
    } else if meta.gid() == user.gid {
        mode & 0o040 != 0
    } else {
        mode & 0o004 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::os::unix::fs::PermissionsExt;

    fn reader() -> UserIdentity {
        UserIdentity {
            name: "alice".to_string(),
            uid: nix::unistd::Uid::current().as_raw(),
            gid: nix::unistd::Gid::current().as_raw(),
            group: "users".to_string(),
            home: PathBuf::from("/home/alice"),
        }
    }

    fn stranger() -> UserIdentity {
        let me = reader();
        UserIdentity {
            name: "mallory".to_string(),
            uid: me.uid.wrapping_add(1).max(1),
            gid: me.gid.wrapping_add(1),
            ..me
        }
    }

    struct FixedPrompt {
        calls: Cell<u32>,
    }

    impl PasswordPrompt for FixedPrompt {
        fn prompt(&self, _message: &str) -> Result<String> {
            self.calls.set(self.calls.get() + 1);
            Ok("hunter22".to_string())
        }
    }

    fn prompt() -> FixedPrompt {
        FixedPrompt {
            calls: Cell::new(0),
        }
    }

    #[test]
    fn test_not_needed_means_none() {
        let p = prompt();
        let source =
            PasswordSource::acquire(None, false, Path::new("/dev/sdb1"), &reader(), &p).unwrap();
        assert!(matches!(source, PasswordSource::None));
        assert!(source.key_args().unwrap().is_empty());
        assert_eq!(p.calls.get(), 0);
    }

    #[test]
    fn test_existing_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key");
        std::fs::write(&key, b"secret").unwrap();

        let p = prompt();
        let source =
            PasswordSource::acquire(Some(&key), true, Path::new("/dev/sdb1"), &reader(), &p)
                .unwrap();
        let key = fs::canonicalize(&key).unwrap();
        assert_eq!(source.key_file(), Some(key.as_path()));
        assert_eq!(
            source.key_args().unwrap(),
            vec![
                "--key-file".to_string(),
                key.display().to_string(),
                "--keyfile-size".to_string(),
                "6".to_string()
            ]
        );
        assert_eq!(p.calls.get(), 0);
        drop(source);
        assert!(key.exists());
    }

    #[test]
    fn test_missing_file_is_luks_error() {
        let p = prompt();
        let err = PasswordSource::acquire(
            Some(Path::new("/nonexistent/key")),
            true,
            Path::new("/dev/sdb1"),
            &reader(),
            &p,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Luks { .. }));
    }

    #[test]
    fn test_key_file_must_be_readable_by_invoker() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key");
        std::fs::write(&key, b"secret").unwrap();
        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o600)).unwrap();
        let p = prompt();

        let err =
            PasswordSource::acquire(Some(&key), true, Path::new("/dev/sdb1"), &stranger(), &p)
                .unwrap_err();
        assert!(matches!(err, Error::Permission { .. }));

        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o644)).unwrap();
        let source =
            PasswordSource::acquire(Some(&key), true, Path::new("/dev/sdb1"), &stranger(), &p);
        assert!(source.is_ok());
        assert_eq!(p.calls.get(), 0);
    }

    #[test]
    fn test_temporary_file_is_removed() {
        let p = prompt();
        let source =
            PasswordSource::acquire(None, true, Path::new("/dev/sdb1"), &reader(), &p).unwrap();
        let path = source.key_file().unwrap().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hunter22");
        assert_eq!(source.key_args().unwrap()[3], "8");
        drop(source);
        assert!(!path.exists());
    }
}
