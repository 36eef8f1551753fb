//! Mountpoint resolution.
//!
//! Absolute requests are used as given. Relative names are first checked
//! against fstab, whose mountpoint wins when it names the device, and
//! otherwise joined onto the configured mount root.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::device::Device;
use crate::error::{Error, Result};

/// Where a device will be mounted and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountTarget {
    /// An absolute path requested by the caller.
    Requested(PathBuf),
    /// Pinned by an fstab entry; options come from fstab too.
    Fstab(PathBuf),
    /// `<mount root>/<name>`.
    UnderRoot(PathBuf),
}

impl MountTarget {
    pub fn path(&self) -> &Path {
        match self {
            Self::Requested(p) | Self::Fstab(p) | Self::UnderRoot(p) => p,
        }
    }

    pub fn is_fstab(&self) -> bool {
        matches!(self, Self::Fstab(_))
    }
}

/// Accepts only names made of plain components, so the mountpoint is always
/// strictly below the mount root.
pub fn validate_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components().peekable();
    let invalid = components.peek().is_none()
        || components.any(|c| !matches!(c, Component::Normal(_)));
    if invalid {
        return Err(Error::InvalidMountName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Computes the mountpoint for `device`.
///
/// `fstab` looks the device up in the static table; `mount_root` yields the
/// allow-listed mount root and is only consulted when fstab pins nothing.
pub fn resolve_mount_point(
    device: &Device,
    requested: &str,
    fstab: impl FnOnce(&Device) -> Result<Option<PathBuf>>,
    mount_root: impl FnOnce() -> Result<PathBuf>,
) -> Result<MountTarget> {
    if Path::new(requested).is_absolute() {
        return Ok(MountTarget::Requested(PathBuf::from(requested)));
    }

    validate_name(requested)?;

    if let Some(pinned) = fstab(device)? {
        let would_be = pinned
            .file_name()
            .is_some_and(|n| n.to_string_lossy() == requested);
        if !would_be {
            warn!(
                "{} is listed in fstab, mounting at {} instead of '{}'",
                device.path.display(),
                pinned.display(),
                requested
            );
        }
        return Ok(MountTarget::Fstab(pinned));
    }

    Ok(MountTarget::UnderRoot(mount_root()?.join(requested)))
}
