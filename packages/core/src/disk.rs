//! Device probing using lsblk and sysfs.
//!
//! Filesystem type and open LUKS mappings come from `lsblk --json`; the
//! removable and USB flags come from sysfs; aliases come from the udev
//! symlink directories under `/dev/disk` and from `/dev/mapper`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::device::{Device, DeviceProbe, LUKS_FSTYPE};
use crate::error::{Error, Result};
use crate::executor::ExecutionContext;

/// udev symlink directories scanned for aliases.
pub const ALIAS_DIRS: &[&str] = &[
    "/dev/disk/by-label",
    "/dev/disk/by-uuid",
    "/dev/disk/by-partuuid",
    "/dev/disk/by-path",
    "/dev/disk/by-id",
    "/dev/mapper",
];

const SYS_CLASS_BLOCK: &str = "/sys/class/block";

/// Raw JSON structure from lsblk output.
#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    rm: bool,
    #[serde(default, deserialize_with = "flag")]
    hotplug: bool,
    #[serde(default)]
    tran: Option<String>,
    #[serde(rename = "type")]
    device_type: Option<String>,
    #[serde(default)]
    children: Option<Vec<LsblkDevice>>,
}

/// Older lsblk prints flags as "0"/"1", newer as booleans.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
        Missing(Option<()>),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s == "1",
        Flag::Missing(_) => false,
    })
}

/// What lsblk says about one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LsblkInfo {
    fstype: Option<String>,
    removable: bool,
    usb: bool,
    /// Open `crypt` child: (mapping name, filesystem inside).
    crypt_child: Option<(String, Option<String>)>,
}

fn parse_lsblk(json: &str) -> Result<Option<LsblkInfo>> {
    let output: LsblkOutput = serde_json::from_str(json).map_err(|e| Error::LsblkParse {
        message: e.to_string(),
    })?;

    Ok(output.blockdevices.first().map(|dev| LsblkInfo {
        fstype: dev.fstype.clone(),
        removable: dev.rm || dev.hotplug,
        usb: dev.tran.as_deref() == Some("usb"),
        crypt_child: dev
            .children
            .iter()
            .flatten()
            .find(|c| c.device_type.as_deref() == Some("crypt"))
            .map(|c| (c.name.clone(), c.fstype.clone())),
    }))
}

/// Probe backed by the running system.
#[derive(Debug, Clone)]
pub struct LsblkProbe {
    ctx: ExecutionContext,
}

impl LsblkProbe {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self { ctx }
    }

    fn lsblk(&self, path: &Path) -> Result<Option<LsblkInfo>> {
        let path_arg = path.to_string_lossy();
        let json = self.ctx.query(
            "lsblk",
            &[
                "--json",
                "--output",
                "NAME,FSTYPE,RM,HOTPLUG,TRAN,TYPE",
                path_arg.as_ref(),
            ],
        )?;
        parse_lsblk(&json)
    }
}

impl DeviceProbe for LsblkProbe {
    fn probe(&self, argument: &Path) -> Result<Device> {
        let canonical = fs::canonicalize(argument).map_err(|_| Error::DeviceNotFound {
            device: argument.display().to_string(),
        })?;

        // A device-mapper node stands for its raw device.
        let (raw, open_mapping) = match dm_backing_device(&canonical) {
            Some((raw, name)) => (raw, Some(name)),
            None => (canonical, None),
        };

        let info = self.lsblk(&raw)?.unwrap_or_default();
        let sys = SysfsFlags::read(&raw);

        let encrypted = info.fstype.as_deref() == Some(LUKS_FSTYPE);
        let (mapper, inner_fstype) = match (open_mapping, info.crypt_child.clone()) {
            (Some(name), child) => (Some(name), child.and_then(|(_, fs)| fs)),
            (None, Some((name, fs))) => (Some(name), fs),
            (None, None) => (None, None),
        };
        let fstype = if encrypted { inner_fstype } else { info.fstype.clone() };

        let mut aliases = find_aliases(&raw);
        if let Some(name) = &mapper {
            let node = Path::new(crate::settings::MAPPER_DIR).join(name);
            if !aliases.contains(&node) {
                aliases.push(node);
            }
        }

        let device = Device {
            path: raw,
            aliases,
            fstype,
            encrypted,
            removable: info.removable || sys.removable,
            usb: info.usb || sys.usb,
            mapper,
        };
        debug!("probed {:?}", device);
        Ok(device)
    }
}

/// Removable/USB flags read from sysfs.
#[derive(Debug, Clone, Copy, Default)]
struct SysfsFlags {
    removable: bool,
    usb: bool,
}

impl SysfsFlags {
    fn read(device: &Path) -> Self {
        let Some(name) = device.file_name() else {
            return Self::default();
        };
        let Ok(sys_dir) = fs::canonicalize(Path::new(SYS_CLASS_BLOCK).join(name)) else {
            return Self::default();
        };

        // Partitions live inside their disk's directory.
        let disk_dir = if sys_dir.join("partition").exists() {
            sys_dir.parent().map(Path::to_path_buf).unwrap_or(sys_dir.clone())
        } else {
            sys_dir.clone()
        };

        let removable = fs::read_to_string(disk_dir.join("removable"))
            .map(|s| s.trim() == "1")
            .unwrap_or(false);
        let usb = sys_dir
            .components()
            .any(|c| c.as_os_str().to_string_lossy().starts_with("usb"));

        Self { removable, usb }
    }
}

/// Maps `/dev/dm-N` to its raw device and mapping name.
fn dm_backing_device(canonical: &Path) -> Option<(PathBuf, String)> {
    let name = canonical.file_name()?.to_string_lossy().into_owned();
    if !name.starts_with("dm-") {
        return None;
    }

    let sys = Path::new(SYS_CLASS_BLOCK).join(&name);
    let mapping = fs::read_to_string(sys.join("dm/name")).ok()?.trim().to_string();
    let slave = fs::read_dir(sys.join("slaves")).ok()?.flatten().next()?;
    Some((Path::new("/dev").join(slave.file_name()), mapping))
}

/// Every symlink under [`ALIAS_DIRS`] that resolves to `device`.
fn find_aliases(device: &Path) -> Vec<PathBuf> {
    let mut aliases = Vec::new();
    for dir in ALIAS_DIRS {
        collect_links(Path::new(dir), device, &mut aliases);
    }
    aliases
}

fn collect_links(dir: &Path, target: &Path, aliases: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let link = entry.path();
        if fs::canonicalize(&link).is_ok_and(|resolved| resolved == target) {
            aliases.push(link);
        }
    }
}
