//! Shared plumbing for the `fmount` and `fumount` binaries.
//!
//! Both binaries parse their arguments with clap, install a tracing
//! subscriber, build the real system collaborators and hand over to
//! [`fmount_core::Mounter`]. Process exit codes are decided here.

use std::path::{Path, PathBuf};

use clap::Parser;
use fmount_core::config::ADMIN_CONFIG_PATH;
use fmount_core::{
    Access, ConfigSet, Error, ExecutionContext, LsblkProbe, MountOutcome, Mounter,
    OptionRequest, Privilege, Result, Settings, TtyPrompt, UnmountOutcome,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Mount a removable or encrypted device as an unprivileged user.
#[derive(Debug, Parser)]
#[command(name = "fmount", version)]
#[command(about = "Mount removable and encrypted devices", long_about = None)]
pub struct FmountArgs {
    /// Device to mount (path, or any /dev/disk/by-* alias).
    pub device: PathBuf,

    /// Mountpoint name under the mount root, or an absolute path.
    pub label: Option<String>,

    /// Mount read-only.
    #[arg(short = 'r', long = "read-only", conflicts_with = "read_write")]
    pub read_only: bool,

    /// Force a read-write mount.
    #[arg(short = 'w', long = "read-write")]
    pub read_write: bool,

    /// Filesystem type passed to mount.
    #[arg(short = 't', long = "type", value_name = "FS")]
    pub fs_type: Option<String>,

    /// Access time flag (atime, noatime, relatime, ...). Repeatable;
    /// replaces the default noatime.
    #[arg(short = 'A', long = "atime", value_name = "FLAG")]
    pub atimes: Vec<String>,

    /// Allow executing binaries from the device.
    #[arg(short = 'e', long)]
    pub exec: bool,

    /// Synchronous I/O.
    #[arg(short = 's', long)]
    pub sync: bool,

    /// Character set for filesystems that take one.
    #[arg(short = 'c', long, value_name = "CHARSET")]
    pub charset: Option<String>,

    /// File creation mask for filesystems without permissions.
    #[arg(short = 'u', long, value_name = "MASK")]
    pub umask: Option<String>,

    /// Extra mount options, comma separated. Repeatable.
    #[arg(short = 'o', long = "options", value_name = "OPTS")]
    pub options: Vec<String>,

    /// Read the LUKS passphrase from this file instead of prompting.
    #[arg(short = 'p', long, value_name = "FILE")]
    pub passphrase: Option<PathBuf>,

    /// Show what would be done without doing it.
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// More output; repeat for debug logging.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl FmountArgs {
    pub fn option_request(&self) -> OptionRequest {
        let access = if self.read_only {
            Some(Access::ReadOnly)
        } else if self.read_write {
            Some(Access::ReadWrite)
        } else {
            None
        };

        let defaults = OptionRequest::default();
        OptionRequest {
            fs_type: self.fs_type.clone(),
            access,
            atimes: if self.atimes.is_empty() {
                defaults.atimes
            } else {
                self.atimes.clone()
            },
            exec: self.exec,
            sync: self.sync,
            charset: self.charset.clone(),
            umask: self.umask.clone(),
            options: self.options.clone(),
        }
    }
}

/// Unmount a device mounted with fmount.
#[derive(Debug, Parser)]
#[command(name = "fumount", version)]
#[command(about = "Unmount devices mounted with fmount", long_about = None)]
pub struct FumountArgs {
    /// Device or mountpoint to unmount.
    pub target: PathBuf,

    /// Detach now, clean up references later.
    #[arg(short = 'l', long)]
    pub lazy: bool,

    /// Show what would be done without doing it.
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// More output; repeat for debug logging.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Default log filter for a verbosity level. Dry runs log at least `info`
/// so the skipped commands are visible.
pub fn log_level(verbosity: u8, dry_run: bool) -> &'static str {
    match verbosity.max(u8::from(dry_run)) {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Installs the stderr subscriber. `RUST_LOG` overrides the level.
pub fn init_logging(verbosity: u8, dry_run: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level(verbosity, dry_run)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

/// Everything resolved from the environment before any device is touched.
struct Environment {
    privilege: Privilege,
    config: ConfigSet,
}

impl Environment {
    fn load() -> Result<Self> {
        let privilege = Privilege::detect()?;
        let config = ConfigSet::load(Path::new(ADMIN_CONFIG_PATH), &privilege.real)?;
        Ok(Self { privilege, config })
    }

    /// Tool directories are taken from the admin view only.
    fn settings(&self, base: Settings) -> Settings {
        match self.config.admin.exec_dirs() {
            Some(dirs) => Settings {
                exec_dirs: dirs.iter().map(PathBuf::from).collect(),
                ..base
            },
            None => base,
        }
    }
}

/// Runs `fmount` and returns the process exit code.
pub fn run_fmount(args: FmountArgs) -> i32 {
    exit_code("fmount", fmount(args))
}

fn fmount(args: FmountArgs) -> Result<()> {
    let env = Environment::load()?;
    let settings = env.settings(Settings {
        verbosity: args.verbose,
        dry_run: args.dry_run,
        options: args.option_request(),
        passphrase: args.passphrase.clone(),
        ..Settings::default()
    });

    let runner = ExecutionContext::new(&settings);
    let probe = LsblkProbe::new(runner.clone());
    let mounter = Mounter::new(
        &settings,
        &env.config,
        &env.privilege,
        &runner,
        &probe,
        &TtyPrompt,
    );

    match mounter.fmount(&args.device, args.label.as_deref())? {
        MountOutcome::Mounted(path) => debug!("mounted at {}", path.display()),
        MountOutcome::AlreadyMounted(path) => debug!("already at {}", path.display()),
        MountOutcome::Failed { device, .. } => debug!("{} left unmounted", device),
    }
    Ok(())
}

/// Runs `fumount` and returns the process exit code.
pub fn run_fumount(args: FumountArgs) -> i32 {
    exit_code("fumount", fumount(args))
}

fn fumount(args: FumountArgs) -> Result<()> {
    let env = Environment::load()?;
    let settings = env.settings(Settings {
        verbosity: args.verbose,
        dry_run: args.dry_run,
        lazy: args.lazy,
        ..Settings::default()
    });

    let runner = ExecutionContext::new(&settings);
    let probe = LsblkProbe::new(runner.clone());
    let mounter = Mounter::new(
        &settings,
        &env.config,
        &env.privilege,
        &runner,
        &probe,
        &TtyPrompt,
    );

    match mounter.fumount(&args.target)? {
        UnmountOutcome::Unmounted(path) => debug!("unmounted {}", path.display()),
        UnmountOutcome::AlreadyUnmounted => {}
        UnmountOutcome::Failed { device, .. } => debug!("{} still mounted", device),
    }
    Ok(())
}

/// Operational failures were already reported; only fatal errors change the
/// exit code.
fn exit_code(program: &str, result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => report_fatal(program, &e),
    }
}

fn report_fatal(program: &str, error: &Error) -> i32 {
    eprintln!("{}: {}", program, error);
    debug!("{}", snafu::Report::from_error(error));
    error.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmount_defaults() {
        let args = FmountArgs::try_parse_from(["fmount", "/dev/sdb1"]).unwrap();
        assert_eq!(args.device, PathBuf::from("/dev/sdb1"));
        assert_eq!(args.label, None);
        assert_eq!(args.option_request(), OptionRequest::default());
    }

    #[test]
    fn test_fmount_option_flags() {
        let args = FmountArgs::try_parse_from([
            "fmount", "-r", "-t", "vfat", "-A", "relatime", "-A", "nodiratime", "-e", "-s",
            "-c", "utf8", "-u", "077", "-o", "flush", "-o", "shortname=mixed", "-p", "/root/key",
            "-vv", "/dev/sdb1", "stick",
        ])
        .unwrap();

        let request = args.option_request();
        assert_eq!(request.access, Some(Access::ReadOnly));
        assert_eq!(request.fs_type.as_deref(), Some("vfat"));
        assert_eq!(request.atimes, vec!["relatime", "nodiratime"]);
        assert!(request.exec && request.sync);
        assert_eq!(request.charset.as_deref(), Some("utf8"));
        assert_eq!(request.umask.as_deref(), Some("077"));
        assert_eq!(request.options, vec!["flush", "shortname=mixed"]);
        assert_eq!(args.passphrase, Some(PathBuf::from("/root/key")));
        assert_eq!(args.verbose, 2);
        assert_eq!(args.label.as_deref(), Some("stick"));
    }

    #[test]
    fn test_read_only_conflicts_with_read_write() {
        assert!(FmountArgs::try_parse_from(["fmount", "-r", "-w", "/dev/sdb1"]).is_err());
        let args = FmountArgs::try_parse_from(["fmount", "-w", "/dev/sdb1"]).unwrap();
        assert_eq!(args.option_request().access, Some(Access::ReadWrite));
    }

    #[test]
    fn test_fumount_args() {
        let args = FumountArgs::try_parse_from(["fumount", "-l", "-n", "/media/stick"]).unwrap();
        assert!(args.lazy);
        assert!(args.dry_run);
        assert_eq!(args.target, PathBuf::from("/media/stick"));
        assert!(FumountArgs::try_parse_from(["fumount"]).is_err());
    }

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0, false), "warn");
        assert_eq!(log_level(0, true), "info");
        assert_eq!(log_level(1, false), "info");
        assert_eq!(log_level(2, false), "debug");
        assert_eq!(log_level(5, true), "trace");
    }

    #[test]
    fn test_fatal_errors_map_to_exit_codes() {
        let permission = Error::Permission {
            message: "no".to_string(),
        };
        assert_eq!(report_fatal("fmount", &permission), 1);
        let config = Error::Config {
            message: "No root defined for mountpoints.".to_string(),
        };
        assert_eq!(exit_code("fmount", Err(config)), 1);
        assert_eq!(exit_code("fmount", Ok(())), 0);
    }
}
