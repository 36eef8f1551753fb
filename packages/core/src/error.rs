//! Unified error types for the fmount-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The mount root or allow-list could not be resolved.
    #[snafu(display("{message}"))]
    Config { message: String },

    /// The invoking user may not act on this device.
    #[snafu(display("{message}"))]
    Permission { message: String },

    /// Opening or closing a LUKS mapping failed.
    #[snafu(display("{message}"))]
    Luks { message: String },

    /// Failed to spawn a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Command ran but did not succeed. Negative status is the terminating signal.
    #[snafu(display("command '{command}' failed with status {status}: {output}"))]
    CommandFailed {
        command: String,
        status: i32,
        output: String,
    },

    /// Required tool is not present in any execution directory.
    #[snafu(display("command '{program}' not found in {searched} or PATH"))]
    CommandNotFound { program: String, searched: String },

    /// Failed to read the live mount table.
    #[snafu(display("failed to read mount table at {}", path.display()))]
    MountTableRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Fstab file cannot be read.
    #[snafu(display("failed to read fstab at {}", path.display()))]
    FstabRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration file cannot be read.
    #[snafu(display("failed to read configuration at {}", path.display()))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for this tool. Only the position
    /// is kept; the file may not belong to the caller.
    #[snafu(display("invalid configuration in {} at line {line}, column {column}", path.display()))]
    ConfigParse {
        path: PathBuf,
        line: usize,
        column: usize,
    },

    /// Mount point creation failed.
    #[snafu(display("failed to create mount point at {}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Requested mount name is unusable.
    #[snafu(display("invalid mount point name '{name}'"))]
    InvalidMountName { name: String },

    /// Device argument does not resolve to a block device.
    #[snafu(display("no such device: {device}"))]
    DeviceNotFound { device: String },

    /// Failed to parse lsblk JSON output.
    #[snafu(display("failed to parse lsblk output: {message}"))]
    LsblkParse { message: String },

    /// Interactive password entry failed.
    #[snafu(display("failed to read password"))]
    PasswordPrompt { source: std::io::Error },

    /// Writing the temporary key file failed.
    #[snafu(display("failed to prepare key file"))]
    KeyFile { source: std::io::Error },

    /// User or group lookup failed.
    #[snafu(display("failed to resolve user '{user}'"))]
    UserLookup { user: String },
}

impl Error {
    /// Configuration and authorization failures abort the run; everything
    /// else is an operational failure that gets reported as a warning.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config { .. }
                | Error::Permission { .. }
                | Error::ConfigRead { .. }
                | Error::ConfigParse { .. }
                | Error::InvalidMountName { .. }
                | Error::DeviceNotFound { .. }
                | Error::UserLookup { .. }
        )
    }

    /// Process exit status for a fatal error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Permission { .. } => nix::errno::Errno::EPERM as i32,
            _ => 1,
        }
    }
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for mount table read errors.
    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for fstab read errors.
    fn fstab_read_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for configuration read errors.
    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount point creation errors.
    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountTableReadSnafu { path: path.into() })
    }

    fn fstab_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(FstabReadSnafu { path: path.into() })
    }

    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(ConfigReadSnafu { path: path.into() })
    }

    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountPointCreationSnafu { path: path.into() })
    }
}
