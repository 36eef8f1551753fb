//! Device model shared by every component.
//!
//! A `Device` is discovered per invocation from the command-line argument and
//! never persisted. Classification (removable, USB, encrypted) comes from a
//! [`DeviceProbe`]; the rest of the crate treats it as given.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Filesystem type reported for LUKS containers.
pub const LUKS_FSTYPE: &str = "crypto_LUKS";

/// A block device and everything known about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Canonical device path (e.g. "/dev/sdb1").
    pub path: PathBuf,
    /// Symlinks resolving to this device (by-label, by-uuid, ...).
    pub aliases: Vec<PathBuf>,
    /// Filesystem type, if probed. For an open LUKS device, the type inside.
    pub fstype: Option<String>,
    pub encrypted: bool,
    pub removable: bool,
    pub usb: bool,
    /// Name of the currently open device-mapper mapping, if any.
    pub mapper: Option<String>,
}

impl Device {
    /// Bare device without any classification.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            aliases: Vec::new(),
            fstype: None,
            encrypted: false,
            removable: false,
            usb: false,
            mapper: None,
        }
    }

    /// Basename of the canonical path, used as the default mount name.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// True for hotpluggable storage.
    pub fn is_hotplug(&self) -> bool {
        self.removable || self.usb
    }

    /// Canonical path followed by every alias.
    pub fn all_paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.path.as_path()).chain(self.aliases.iter().map(PathBuf::as_path))
    }

    /// True if `candidate` names this device.
    pub fn is_named_by(&self, candidate: &Path) -> bool {
        self.all_paths().any(|p| p == candidate)
    }

    /// Mapping name for a fresh `luksOpen`, derived from the device path.
    pub fn mapper_name(&self) -> String {
        self.path.to_string_lossy().replace('/', "_")
    }

    /// Node to mount: the open mapping for LUKS devices, the device otherwise.
    pub fn mount_source(&self, mapper_dir: &Path) -> PathBuf {
        match &self.mapper {
            Some(name) => mapper_dir.join(name),
            None => self.path.clone(),
        }
    }

    /// Short description for warnings.
    pub fn describe(&self) -> String {
        match &self.fstype {
            Some(fs) => format!("{} ({})", self.path.display(), fs),
            None => self.path.display().to_string(),
        }
    }
}

/// Black-box device classification.
pub trait DeviceProbe {
    /// Resolves a possibly symbolic argument to a classified device.
    fn probe(&self, argument: &Path) -> Result<Device>;
}
