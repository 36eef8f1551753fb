//! Per-invocation settings threaded through every component.
//!
//! Nothing in the library reads process-wide flags; the binaries build one
//! `Settings` value from the command line and the configuration and hand it
//! down by reference.

use std::path::PathBuf;
use std::time::Duration;

/// Live mount table.
pub const PROC_MOUNTS_PATH: &str = "/proc/mounts";

/// Static filesystem table.
pub const FSTAB_PATH: &str = "/etc/fstab";

/// Directory where device-mapper nodes appear.
pub const MAPPER_DIR: &str = "/dev/mapper";

/// Directories searched for external tools before `PATH`.
pub const DEFAULT_EXEC_DIRS: &[&str] = &["/sbin", "/usr/sbin", "/bin", "/usr/bin"];

/// Wait before `luksClose`; closing right after an open can fail spuriously.
pub const LUKS_CLOSE_DELAY: Duration = Duration::from_millis(500);

/// Explicit read-only / read-write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    /// Standalone `mount` flag for this access mode.
    pub fn flag(&self) -> &'static str {
        match self {
            Access::ReadOnly => "--read-only",
            Access::ReadWrite => "--rw",
        }
    }
}

/// Everything the option merger reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionRequest {
    /// Filesystem type override (`--types`).
    pub fs_type: Option<String>,
    /// Forced read-only or read-write.
    pub access: Option<Access>,
    /// atime-family flags, applied in order.
    pub atimes: Vec<String>,
    pub exec: bool,
    pub sync: bool,
    pub charset: Option<String>,
    pub umask: Option<String>,
    /// Free-form options, possibly comma joined.
    pub options: Vec<String>,
}

impl Default for OptionRequest {
    fn default() -> Self {
        Self {
            fs_type: None,
            access: None,
            atimes: vec!["noatime".to_string()],
            exec: false,
            sync: false,
            charset: None,
            umask: None,
            options: Vec::new(),
        }
    }
}

/// Locations of the system files the tool reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPaths {
    pub proc_mounts: PathBuf,
    pub fstab: PathBuf,
    pub mapper_dir: PathBuf,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self {
            proc_mounts: PathBuf::from(PROC_MOUNTS_PATH),
            fstab: PathBuf::from(FSTAB_PATH),
            mapper_dir: PathBuf::from(MAPPER_DIR),
        }
    }
}

/// Immutable settings for one `fmount`/`fumount` run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// 0 is quiet; 1 and above pass `--verbose` to `mount`.
    pub verbosity: u8,
    /// Log mutating operations instead of performing them.
    pub dry_run: bool,
    pub exec_dirs: Vec<PathBuf>,
    pub paths: SystemPaths,
    pub options: OptionRequest,
    /// Existing key file for LUKS devices.
    pub passphrase: Option<PathBuf>,
    /// Detach the filesystem lazily on unmount.
    pub lazy: bool,
    pub close_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            verbosity: 0,
            dry_run: false,
            exec_dirs: DEFAULT_EXEC_DIRS.iter().map(PathBuf::from).collect(),
            paths: SystemPaths::default(),
            options: OptionRequest::default(),
            passphrase: None,
            lazy: false,
            close_delay: LUKS_CLOSE_DELAY,
        }
    }
}

impl Settings {
    /// Whether `--verbose` is forwarded to the external tools.
    pub fn verbose(&self) -> bool {
        self.verbosity > 0
    }
}
