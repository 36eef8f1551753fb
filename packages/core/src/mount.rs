//! Mountpoint directories and the `mount`/`umount` invocations.
//!
//! Directories created here carry a marker file so that a later unmount (or a
//! failed mount) can tell them apart from directories the user made and
//! remove them once nothing but the marker is left.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{IoResultExt, Result};
use crate::executor::CommandRunner;

/// Marker placed in every directory this tool creates.
pub const MARKER_FILE: &str = ".created_by_fmount";

/// Marker left by older pmount-compatible tools; honoured on removal.
pub const LEGACY_MARKER_FILE: &str = ".created_by_pmount";

const MOUNT: &str = "mount";
const UMOUNT: &str = "umount";

/// Makes sure `path` is a directory and reports whether it was created.
///
/// The parent must already exist; only the leaf is created.
pub fn ensure_mount_dir(path: &Path, dry_run: bool) -> Result<bool> {
    if path.is_dir() {
        debug!("mountpoint {} already exists", path.display());
        return Ok(false);
    }
    if path.exists() {
        return Err(io::Error::new(io::ErrorKind::AlreadyExists, "not a directory"))
            .mount_point_context(path);
    }

    let parent_exists = path.parent().is_some_and(Path::is_dir);
    if !parent_exists {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "parent directory does not exist",
        ))
        .mount_point_context(path);
    }

    if dry_run {
        info!("would create mountpoint {}", path.display());
        return Ok(true);
    }

    fs::create_dir(path).mount_point_context(path)?;
    fs::write(path.join(MARKER_FILE), b"").mount_point_context(path)?;
    debug!("created mountpoint {}", path.display());
    Ok(true)
}

/// Removes `path` if it holds nothing but a creation marker.
///
/// Best effort: anything unexpected leaves the directory in place.
pub fn remove_if_auto_created(path: &Path, dry_run: bool) -> bool {
    let Ok(entries) = fs::read_dir(path) else {
        return false;
    };

    let mut markers = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else {
            return false;
        };
        let name = entry.file_name();
        if name != MARKER_FILE && name != LEGACY_MARKER_FILE {
            debug!("keeping {}: not empty", path.display());
            return false;
        }
        markers.push(entry.path());
    }

    if markers.is_empty() {
        debug!("keeping {}: not created by fmount", path.display());
        return false;
    }

    if dry_run {
        info!("would remove mountpoint {}", path.display());
        return true;
    }

    let removed = markers.iter().all(|m| fs::remove_file(m).is_ok()) && fs::remove_dir(path).is_ok();
    if removed {
        debug!("removed mountpoint {}", path.display());
    } else {
        debug!("could not remove {}", path.display());
    }
    removed
}

/// Mounts `source` at `mount_point` with precomputed arguments.
pub fn mount_device(
    runner: &dyn CommandRunner,
    args: &[String],
    source: &Path,
    mount_point: &Path,
) -> Result<()> {
    let mut argv = args.to_vec();
    argv.push(source.display().to_string());
    argv.push(mount_point.display().to_string());
    runner.run(MOUNT, &argv)?;
    Ok(())
}

/// Mounts an fstab-pinned mountpoint; fstab supplies device and options.
pub fn mount_fstab(runner: &dyn CommandRunner, mount_point: &Path) -> Result<()> {
    runner.run(MOUNT, &[mount_point.display().to_string()])?;
    Ok(())
}

/// Unmounts whatever is mounted at `mount_point`.
pub fn unmount(
    runner: &dyn CommandRunner,
    mount_point: &Path,
    verbose: bool,
    lazy: bool,
) -> Result<()> {
    let mut argv = Vec::new();
    if verbose {
        argv.push("--verbose".to_string());
    }
    if lazy {
        argv.push("--lazy".to_string());
    }
    argv.push(mount_point.display().to_string());
    runner.run(UMOUNT, &argv)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::RefCell;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl CommandRunner for Recorder {
        fn run(&self, program: &str, args: &[String]) -> Result<String> {
            self.calls
                .borrow_mut()
                .push(crate::executor::command_line(program, args));
            Ok(String::new())
        }
    }

    #[test]
    fn test_creates_leaf_with_marker() {
        let root = tempdir().unwrap();
        let target = root.path().join("stick");

        assert!(ensure_mount_dir(&target, false).unwrap());
        assert!(target.join(MARKER_FILE).is_file());
        assert!(!ensure_mount_dir(&target, false).unwrap());
    }

    #[test]
    fn test_parent_must_exist() {
        let root = tempdir().unwrap();
        let target = root.path().join("missing").join("stick");

        let err = ensure_mount_dir(&target, false).unwrap_err();
        assert!(matches!(err, Error::MountPointCreation { .. }));
        assert!(!target.exists());
    }

    #[test]
    fn test_regular_file_is_rejected() {
        let root = tempdir().unwrap();
        let target = root.path().join("stick");
        fs::write(&target, b"").unwrap();

        assert!(ensure_mount_dir(&target, false).is_err());
    }

    #[test]
    fn test_dry_run_creates_nothing() {
        let root = tempdir().unwrap();
        let target = root.path().join("stick");

        assert!(ensure_mount_dir(&target, true).unwrap());
        assert!(!target.exists());
    }

    #[test]
    fn test_removes_marker_only_dir() {
        let root = tempdir().unwrap();
        let target = root.path().join("stick");
        ensure_mount_dir(&target, false).unwrap();

        assert!(remove_if_auto_created(&target, false));
        assert!(!target.exists());
    }

    #[test]
    fn test_legacy_marker_is_honoured() {
        let root = tempdir().unwrap();
        let target = root.path().join("old");
        fs::create_dir(&target).unwrap();
        fs::write(target.join(LEGACY_MARKER_FILE), b"").unwrap();

        assert!(remove_if_auto_created(&target, false));
        assert!(!target.exists());
    }

    #[test]
    fn test_keeps_dirs_with_content_or_without_marker() {
        let root = tempdir().unwrap();

        let busy = root.path().join("busy");
        ensure_mount_dir(&busy, false).unwrap();
        fs::write(busy.join("photo.jpg"), b"jpeg").unwrap();
        assert!(!remove_if_auto_created(&busy, false));
        assert!(busy.join(MARKER_FILE).exists());

        let manual = root.path().join("manual");
        fs::create_dir(&manual).unwrap();
        assert!(!remove_if_auto_created(&manual, false));
        assert!(manual.exists());

        assert!(!remove_if_auto_created(&root.path().join("gone"), false));
    }

    #[test]
    fn test_command_lines() {
        let runner = Recorder::default();
        let args = vec!["-o".to_string(), "user,noatime".to_string()];
        mount_device(&runner, &args, Path::new("/dev/sdb1"), Path::new("/media/sdb1")).unwrap();
        mount_fstab(&runner, Path::new("/mnt/InternalDrive")).unwrap();
        unmount(&runner, Path::new("/media/sdb1"), true, true).unwrap();
        unmount(&runner, Path::new("/media/sdb1"), false, false).unwrap();

        assert_eq!(
            *runner.calls.borrow(),
            vec![
                "mount -o user,noatime /dev/sdb1 /media/sdb1",
                "mount /mnt/InternalDrive",
                "umount --verbose --lazy /media/sdb1",
                "umount /media/sdb1",
            ]
        );
    }
}
