//! LUKS mapping lifecycle around `cryptsetup`.
//!
//! A mapping opened for a mount is held by a [`LuksGuard`]. The guard closes
//! the mapping when dropped unless the mount succeeded and the guard was
//! disarmed, so every failure path after `luksOpen` rolls back.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::executor::CommandRunner;
use crate::password::PasswordSource;

const CRYPTSETUP: &str = "cryptsetup";

/// Opens and closes LUKS mappings.
pub struct Cryptsetup<'a> {
    runner: &'a dyn CommandRunner,
    mapper_dir: PathBuf,
    close_delay: Duration,
    dry_run: bool,
}

impl<'a> Cryptsetup<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        mapper_dir: impl Into<PathBuf>,
        close_delay: Duration,
        dry_run: bool,
    ) -> Self {
        Self {
            runner,
            mapper_dir: mapper_dir.into(),
            close_delay,
            dry_run,
        }
    }

    /// Device-mapper node for a mapping.
    pub fn node(&self, name: &str) -> PathBuf {
        self.mapper_dir.join(name)
    }

    /// Runs `luksOpen` and returns a guard owning the new mapping.
    pub fn open(
        &self,
        device: &Path,
        password: &PasswordSource,
        name: &str,
    ) -> Result<LuksGuard<'_, 'a>> {
        let mut args = vec![
            "luksOpen".to_string(),
            device.display().to_string(),
            name.to_string(),
        ];
        args.extend(password.key_args()?);

        self.runner.run(CRYPTSETUP, &args).map_err(|e| Error::Luks {
            message: format!("Failed to open {}: {}", device.display(), e),
        })?;

        let node = self.node(name);
        if !self.dry_run && !node.exists() {
            return Err(Error::Luks {
                message: format!(
                    "Mapping {} did not appear; wrong passphrase or cryptsetup failure.",
                    node.display()
                ),
            });
        }

        debug!("opened {} as {}", device.display(), node.display());
        Ok(LuksGuard {
            cryptsetup: self,
            name: name.to_string(),
            armed: true,
        })
    }

    /// Waits briefly, then runs `luksClose`.
    pub fn close(&self, name: &str) -> Result<()> {
        if !self.close_delay.is_zero() {
            thread::sleep(self.close_delay);
        }

        self.runner
            .run(CRYPTSETUP, &["luksClose".to_string(), name.to_string()])
            .map_err(|e| Error::Luks {
                message: format!("Failed to close mapping {}: {}", name, e),
            })?;
        debug!("closed mapping {}", name);
        Ok(())
    }
}

/// An open mapping that is closed on drop until disarmed.
pub struct LuksGuard<'c, 'a> {
    cryptsetup: &'c Cryptsetup<'a>,
    name: String,
    armed: bool,
}

impl LuksGuard<'_, '_> {
    pub fn node(&self) -> PathBuf {
        self.cryptsetup.node(&self.name)
    }

    /// Keeps the mapping open past the guard's lifetime.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LuksGuard<'_, '_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!("rolling back mapping {}", self.name);
        if let Err(e) = self.cryptsetup.close(&self.name) {
            warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    /// Simulates cryptsetup by creating/removing mapper nodes.
    struct FakeCryptsetup {
        mapper_dir: PathBuf,
        calls: RefCell<Vec<Vec<String>>>,
        create_node: bool,
    }

    impl CommandRunner for FakeCryptsetup {
        fn run(&self, program: &str, args: &[String]) -> Result<String> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().cloned());
            self.calls.borrow_mut().push(call);

            match args[0].as_str() {
                "luksOpen" if self.create_node => {
                    fs::write(self.mapper_dir.join(&args[2]), b"").unwrap();
                }
                "luksClose" => {
                    let _ = fs::remove_file(self.mapper_dir.join(&args[1]));
                }
                _ => {}
            }
            Ok(String::new())
        }
    }

    fn fake(dir: &Path, create_node: bool) -> FakeCryptsetup {
        FakeCryptsetup {
            mapper_dir: dir.to_path_buf(),
            calls: RefCell::new(Vec::new()),
            create_node,
        }
    }

    #[test]
    fn test_guard_closes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake(dir.path(), true);
        let cs = Cryptsetup::new(&runner, dir.path(), Duration::ZERO, false);

        let guard = cs
            .open(Path::new("/dev/sdd1"), &PasswordSource::None, "_dev_sdd1")
            .unwrap();
        assert!(guard.node().exists());
        drop(guard);

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], vec!["cryptsetup", "luksClose", "_dev_sdd1"]);
        assert!(!dir.path().join("_dev_sdd1").exists());
    }

    #[test]
    fn test_disarmed_guard_keeps_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake(dir.path(), true);
        let cs = Cryptsetup::new(&runner, dir.path(), Duration::ZERO, false);

        let guard = cs
            .open(Path::new("/dev/sdd1"), &PasswordSource::None, "_dev_sdd1")
            .unwrap();
        guard.disarm();

        assert_eq!(runner.calls.borrow().len(), 1);
        assert!(dir.path().join("_dev_sdd1").exists());
    }

    #[test]
    fn test_missing_node_is_luks_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake(dir.path(), false);
        let cs = Cryptsetup::new(&runner, dir.path(), Duration::ZERO, false);

        let result = cs.open(Path::new("/dev/sdd1"), &PasswordSource::None, "_dev_sdd1");
        assert!(matches!(result, Err(Error::Luks { .. })));
        // Nothing was opened, so nothing is closed.
        assert_eq!(runner.calls.borrow().len(), 1);
    }

    #[test]
    fn test_dry_run_skips_node_check() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake(dir.path(), false);
        let cs = Cryptsetup::new(&runner, dir.path(), Duration::ZERO, true);

        let guard = cs.open(Path::new("/dev/sdd1"), &PasswordSource::None, "_dev_sdd1");
        assert!(guard.is_ok());
    }

    #[test]
    fn test_open_passes_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key");
        fs::write(&key, b"abc").unwrap();
        let runner = fake(dir.path(), true);
        let cs = Cryptsetup::new(&runner, dir.path(), Duration::ZERO, false);

        let guard = cs
            .open(
                Path::new("/dev/sdd1"),
                &PasswordSource::ExistingFile(key.clone()),
                "_dev_sdd1",
            )
            .unwrap();
        guard.disarm();

        let calls = runner.calls.borrow();
        assert_eq!(
            calls[0],
            vec![
                "cryptsetup".to_string(),
                "luksOpen".to_string(),
                "/dev/sdd1".to_string(),
                "_dev_sdd1".to_string(),
                "--key-file".to_string(),
                key.display().to_string(),
                "--keyfile-size".to_string(),
                "3".to_string(),
            ]
        );
    }
}
