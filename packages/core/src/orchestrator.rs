//! `fmount`/`fumount` orchestration.
//!
//! Configuration and authorization problems come back as `Err` before
//! anything on the system has changed. Failures of the mount or unmount
//! itself are rolled back where possible, logged as warnings and returned as
//! a `Failed` outcome so the caller can exit normally.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::auth::authorize;
use crate::config::{ConfigSet, resolve_mount_root};
use crate::device::{Device, DeviceProbe, LUKS_FSTYPE};
use crate::error::{Error, Result};
use crate::executor::CommandRunner;
use crate::fstab::lookup_mount_point_in;
use crate::identity::Privilege;
use crate::luks::Cryptsetup;
use crate::mount::{ensure_mount_dir, mount_device, mount_fstab, remove_if_auto_created, unmount};
use crate::mounts::MountTable;
use crate::mountpoint::{MountTarget, resolve_mount_point};
use crate::options::{MergeContext, build_mount_options};
use crate::password::{PasswordPrompt, PasswordSource};
use crate::settings::Settings;

const FMOUNT: &str = "fmount";
const FUMOUNT: &str = "fumount";

/// Result of a mount request.
#[derive(Debug)]
pub enum MountOutcome {
    Mounted(PathBuf),
    /// Nothing was done; the device is mounted here already.
    AlreadyMounted(PathBuf),
    /// Reported and rolled back.
    Failed { device: String, reason: Error },
}

/// Result of an unmount request.
#[derive(Debug)]
pub enum UnmountOutcome {
    Unmounted(PathBuf),
    AlreadyUnmounted,
    /// Reported; the device may still be mounted.
    Failed { device: String, reason: Error },
}

/// Mounts and unmounts devices on behalf of the invoking user.
pub struct Mounter<'a> {
    settings: &'a Settings,
    config: &'a ConfigSet,
    privilege: &'a Privilege,
    runner: &'a dyn CommandRunner,
    probe: &'a dyn DeviceProbe,
    prompt: &'a dyn PasswordPrompt,
}

impl<'a> Mounter<'a> {
    pub fn new(
        settings: &'a Settings,
        config: &'a ConfigSet,
        privilege: &'a Privilege,
        runner: &'a dyn CommandRunner,
        probe: &'a dyn DeviceProbe,
        prompt: &'a dyn PasswordPrompt,
    ) -> Self {
        Self {
            settings,
            config,
            privilege,
            runner,
            probe,
            prompt,
        }
    }

    fn mapper_dir(&self) -> &Path {
        &self.settings.paths.mapper_dir
    }

    fn cryptsetup(&self) -> Cryptsetup<'a> {
        Cryptsetup::new(
            self.runner,
            self.mapper_dir(),
            self.settings.close_delay,
            self.settings.dry_run,
        )
    }

    /// Mounts `argument`, under `name` if given, else under the device name.
    pub fn fmount(&self, argument: &Path, name: Option<&str>) -> Result<MountOutcome> {
        let device = self.probe.probe(argument)?;
        authorize(&device, FMOUNT, self.privilege)?;

        let table = MountTable::load(&self.settings.paths.proc_mounts)?;
        if let Some(record) = table.find_device(&device, self.mapper_dir()) {
            info!(
                "{} is already mounted at {}",
                device.path.display(),
                record.mount_point.display()
            );
            return Ok(MountOutcome::AlreadyMounted(record.mount_point.clone()));
        }

        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| device.display_name());
        let target = resolve_mount_point(
            &device,
            &name,
            |d| lookup_mount_point_in(&self.settings.paths.fstab, d),
            || resolve_mount_root(self.config, &self.privilege.real),
        )?;
        debug!("mountpoint for {}: {:?}", device.path.display(), target);

        match self.attempt_mount(&device, &target) {
            Ok(()) => Ok(MountOutcome::Mounted(target.path().to_path_buf())),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                report("mount", &device, &e);
                Ok(MountOutcome::Failed {
                    device: device.describe(),
                    reason: e,
                })
            }
        }
    }

    fn attempt_mount(&self, device: &Device, target: &MountTarget) -> Result<()> {
        let needs_open = device.encrypted && device.mapper.is_none();
        let supplied = self.settings.passphrase.as_deref();
        let password = if !needs_open {
            PasswordSource::None
        } else if self.settings.dry_run && supplied.is_none() {
            info!("would ask for the passphrase of {}", device.path.display());
            PasswordSource::None
        } else {
            PasswordSource::acquire(
                supplied,
                true,
                &device.path,
                &self.privilege.real,
                self.prompt,
            )?
        };

        let path = target.path();
        let created = ensure_mount_dir(path, self.settings.dry_run)?;

        let result = self.mount_into(device, target, &password, needs_open);
        if result.is_err() && created {
            remove_if_auto_created(path, self.settings.dry_run);
        }
        result
    }

    fn mount_into(
        &self,
        device: &Device,
        target: &MountTarget,
        password: &PasswordSource,
        needs_open: bool,
    ) -> Result<()> {
        let cryptsetup = self.cryptsetup();
        let guard = if needs_open {
            Some(cryptsetup.open(&device.path, password, &device.mapper_name())?)
        } else {
            None
        };
        let source = match &guard {
            Some(guard) => guard.node(),
            None => device.mount_source(self.mapper_dir()),
        };

        if target.is_fstab() {
            mount_fstab(self.runner, target.path())?;
        } else {
            let fstype = device
                .fstype
                .as_deref()
                .filter(|fs| *fs != LUKS_FSTYPE);
            let config_fs = self.settings.options.fs_type.as_deref().or(fstype);
            let config_options = self.config.fs_options(config_fs);
            let args = build_mount_options(
                &self.settings.options,
                MergeContext {
                    device_fstype: fstype,
                    config_options: &config_options,
                    verbose: self.settings.verbose(),
                    fake: self.settings.dry_run,
                },
            );
            mount_device(self.runner, &args.argv, &source, target.path())?;
        }

        if let Some(guard) = guard {
            guard.disarm();
        }
        Ok(())
    }

    /// Unmounts a device given by path or by its mountpoint.
    pub fn fumount(&self, argument: &Path) -> Result<UnmountOutcome> {
        let table = MountTable::load(&self.settings.paths.proc_mounts)?;
        let device_argument = self.device_argument(&table, argument);

        let device = self.probe.probe(&device_argument)?;
        authorize(&device, FUMOUNT, self.privilege)?;

        let Some(record) = table.find_device(&device, self.mapper_dir()) else {
            self.remove_stale_dir(&device);
            info!("{} is not mounted", device.path.display());
            return Ok(UnmountOutcome::AlreadyUnmounted);
        };

        let mapping = device.mapper.clone().or_else(|| {
            record
                .source
                .strip_prefix(self.mapper_dir())
                .ok()
                .map(|name| name.to_string_lossy().into_owned())
        });
        let mount_point = record.mount_point.clone();

        match self.attempt_unmount(&mount_point, mapping.as_deref()) {
            Ok(()) => Ok(UnmountOutcome::Unmounted(mount_point)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                report("unmount", &device, &e);
                Ok(UnmountOutcome::Failed {
                    device: device.describe(),
                    reason: e,
                })
            }
        }
    }

    /// Maps a mountpoint argument to the device mounted there.
    fn device_argument(&self, table: &MountTable, argument: &Path) -> PathBuf {
        let mount_point = fs::canonicalize(argument).unwrap_or_else(|_| argument.to_path_buf());
        match table.find_mount_point(&mount_point) {
            Some(record) => {
                debug!(
                    "{} is a mountpoint of {}",
                    argument.display(),
                    record.source.display()
                );
                record.source.clone()
            }
            None => argument.to_path_buf(),
        }
    }

    fn attempt_unmount(&self, mount_point: &Path, mapping: Option<&str>) -> Result<()> {
        unmount(
            self.runner,
            mount_point,
            self.settings.verbose(),
            self.settings.lazy,
        )?;

        if let Some(name) = mapping {
            self.cryptsetup().close(name)?;
        }

        remove_if_auto_created(mount_point, self.settings.dry_run);
        Ok(())
    }

    /// Cleans up `<mount root>/<device name>` left behind by an earlier run.
    fn remove_stale_dir(&self, device: &Device) {
        match resolve_mount_root(self.config, &self.privilege.real) {
            Ok(root) => {
                let stale = root.join(device.display_name());
                if remove_if_auto_created(&stale, self.settings.dry_run) {
                    info!("removed stale mountpoint {}", stale.display());
                }
            }
            Err(e) => debug!("no mount root to clean up: {}", e),
        }
    }
}

fn report(action: &str, device: &Device, error: &Error) {
    warn!("Failed to {} {}: {}", action, device.describe(), error);
    debug!("{}", snafu::Report::from_error(error));
}
