//! Live mount table (`/proc/mounts`) queries.
//!
//! The table is read fresh for every query and never written; it changes only
//! as a side effect of running `mount`/`umount`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::device::Device;
use crate::error::{IoResultExt, Result};
use crate::fstab::unescape_fstab_path;

/// One line of the live mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    /// Device or alias path as the kernel reports it.
    pub source: PathBuf,
    pub mount_point: PathBuf,
    pub fstype: String,
}

/// Parsed snapshot of the mount table.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    records: Vec<MountRecord>,
}

impl MountTable {
    /// Parses `/proc/mounts` formatted text.
    pub fn parse(text: &str) -> Self {
        let records = text
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let source = parts.next()?;
                let mount_point = parts.next()?;
                let fstype = parts.next().unwrap_or_default();
                Some(MountRecord {
                    source: PathBuf::from(unescape_fstab_path(source)),
                    mount_point: PathBuf::from(unescape_fstab_path(mount_point)),
                    fstype: fstype.to_string(),
                })
            })
            .collect();
        Self { records }
    }

    /// Reads and parses the table at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).mount_table_context(path)?;
        Ok(Self::parse(&text))
    }

    pub fn records(&self) -> &[MountRecord] {
        &self.records
    }

    /// First record whose source names `device` or its open mapping.
    pub fn find_device(&self, device: &Device, mapper_dir: &Path) -> Option<&MountRecord> {
        let mapper_node = device.mapper.as_ref().map(|name| mapper_dir.join(name));
        self.records.iter().find(|record| {
            let canonical = fs::canonicalize(&record.source).ok();
            let names_device = |p: &Path| {
                device.is_named_by(p) || mapper_node.as_deref().is_some_and(|node| node == p)
            };
            names_device(&record.source) || canonical.as_deref().is_some_and(names_device)
        })
    }

    /// Record mounted at exactly `mount_point`.
    pub fn find_mount_point(&self, mount_point: &Path) -> Option<&MountRecord> {
        self.records.iter().find(|r| r.mount_point == mount_point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = "\
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
/dev/nvme0n1p2 / ext4 rw,relatime 0 0
/dev/sdb1 /media/USB\\040STICK vfat rw,nosuid,nodev 0 0
/dev/mapper/_dev_sdd1 /media/secret ext4 rw 0 0
";

    #[test]
    fn test_parse_unescapes_mount_points() {
        let table = MountTable::parse(SNAPSHOT);
        assert_eq!(table.records().len(), 4);
        assert_eq!(
            table.records()[2].mount_point,
            PathBuf::from("/media/USB STICK")
        );
    }

    #[test]
    fn test_find_device_by_path() {
        let table = MountTable::parse(SNAPSHOT);
        let dev = Device::new("/dev/sdb1");
        let record = table.find_device(&dev, Path::new("/dev/mapper")).unwrap();
        assert_eq!(record.fstype, "vfat");
        assert!(table.find_device(&Device::new("/dev/sdc1"), Path::new("/dev/mapper")).is_none());
    }

    #[test]
    fn test_find_device_by_mapping() {
        let table = MountTable::parse(SNAPSHOT);
        let dev = Device {
            mapper: Some("_dev_sdd1".to_string()),
            encrypted: true,
            ..Device::new("/dev/sdd1")
        };
        let record = table.find_device(&dev, Path::new("/dev/mapper")).unwrap();
        assert_eq!(record.mount_point, PathBuf::from("/media/secret"));
    }

    #[test]
    fn test_find_mount_point() {
        let table = MountTable::parse(SNAPSHOT);
        let record = table.find_mount_point(Path::new("/media/secret")).unwrap();
        assert_eq!(record.source, PathBuf::from("/dev/mapper/_dev_sdd1"));
    }
}
