//! fmount-core: privilege-aware mounting of removable and encrypted devices.
//!
//! This library implements everything behind the `fmount` and `fumount`
//! commands: resolving where a device may be mounted, deciding whether the
//! caller may touch it, computing `mount` options and driving LUKS mappings.
//!
//! # Modules
//!
//! - [`config`]: Layered TOML configuration and mount-root allow-listing
//! - [`auth`]: Device authorization gate
//! - [`mountpoint`]: Mountpoint resolution with fstab precedence
//! - [`options`]: Mount option merging
//! - [`luks`]: LUKS open/close lifecycle
//! - [`orchestrator`]: The `fmount`/`fumount` operations
//! - [`disk`]: Device probing using `lsblk` and sysfs
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use fmount_core::{
//!     ConfigSet, ExecutionContext, LsblkProbe, Mounter, Privilege, Settings, TtyPrompt,
//! };
//!
//! let privilege = Privilege::detect().unwrap();
//! let config = ConfigSet::load(Path::new("/etc/fmount.toml"), &privilege.real).unwrap();
//! let settings = Settings::default();
//! let runner = ExecutionContext::new(&settings);
//! let probe = LsblkProbe::new(runner.clone());
//!
//! let mounter = Mounter::new(&settings, &config, &privilege, &runner, &probe, &TtyPrompt);
//! mounter.fmount(Path::new("/dev/sdb1"), Some("stick")).unwrap();
//! ```

pub mod auth;
pub mod config;
pub mod device;
pub mod disk;
pub mod error;
pub mod executor;
pub mod fstab;
pub mod identity;
pub mod luks;
pub mod mount;
pub mod mountpoint;
pub mod mounts;
pub mod options;
pub mod orchestrator;
pub mod password;
pub mod settings;

// Re-export commonly used types
pub use config::ConfigSet;
pub use device::{Device, DeviceProbe};
pub use disk::LsblkProbe;
pub use error::{Error, Result};
pub use executor::{CommandRunner, ExecutionContext};
pub use identity::{Privilege, UserIdentity};
pub use orchestrator::{MountOutcome, Mounter, UnmountOutcome};
pub use password::{PasswordPrompt, TtyPrompt};
pub use settings::{Access, OptionRequest, Settings};
