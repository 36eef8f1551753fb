//! Fstab parsing and mountpoint precedence lookup.
//!
//! Only the first two fields matter here: an fstab line that names the
//! requested device pins its mountpoint, and the options are left to
//! `mount` itself.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::device::Device;
use crate::error::{IoResultExt, Result};

/// How an fstab line names its device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsSpec {
    /// `NAME=VALUE`, e.g. `UUID=076373AA55FCD80F` or `LABEL=STICK`.
    Attribute { name: String, value: String },
    /// A literal path such as `/dev/sdb1`.
    Path(PathBuf),
}

impl FsSpec {
    /// Parses the first fstab field. Anything else (`proc`, `tmpfs`, ...)
    /// cannot name a block device and yields `None`.
    pub fn parse(field: &str) -> Option<Self> {
        if let Some((name, value)) = field.split_once('=')
            && !name.is_empty()
            && name.chars().all(|c| c.is_ascii_uppercase() || c == '_')
        {
            return Some(Self::Attribute {
                name: name.to_string(),
                value: unescape_fstab_path(value),
            });
        }
        if field.starts_with('/') {
            return Some(Self::Path(PathBuf::from(unescape_fstab_path(field))));
        }
        None
    }

    /// True if this spec names one of the device's paths.
    ///
    /// Attribute specs match an alias `/dev/disk/by-<name>/<value>`, compared
    /// by directory name and link basename.
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            Self::Attribute { name, value } => {
                let dir_name = format!("by-{}", name.to_lowercase());
                device.all_paths().any(|alias| {
                    let link = alias.file_name().map(|n| n.to_string_lossy());
                    let dir = alias
                        .parent()
                        .and_then(Path::file_name)
                        .map(|n| n.to_string_lossy());
                    link.as_deref() == Some(value.as_str()) && dir.as_deref() == Some(dir_name.as_str())
                })
            }
            Self::Path(path) => device.is_named_by(path),
        }
    }
}

/// Represents a single fstab entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub fs_spec: FsSpec,
    pub mount_point: PathBuf,
}

impl FstabEntry {
    /// Parses a single fstab line into an entry.
    ///
    /// Returns None for comments, empty lines and non-device specs.
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();

        // Skip comments and empty lines
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut parts = line.split_whitespace();
        let fs_spec = FsSpec::parse(parts.next()?)?;
        let mount_point = PathBuf::from(unescape_fstab_path(parts.next()?));

        Some(Self {
            fs_spec,
            mount_point,
        })
    }
}

/// Unescapes octal sequences in fstab paths.
pub fn unescape_fstab_path(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            let octal_digits: String = chars.clone().take(3).collect();

            if octal_digits.len() == 3
                && octal_digits.chars().all(|d| ('0'..='7').contains(&d))
                && let Ok(byte) = u8::from_str_radix(&octal_digits, 8)
            {
                result.push(byte as char);
                // Consume the digits
                for _ in 0..3 {
                    chars.next();
                }
                continue;
            }
        }
        result.push(c);
    }
    result
}

/// Scans fstab text for the first entry naming `device`.
pub fn lookup_mount_point(text: &str, device: &Device) -> Option<PathBuf> {
    text.lines()
        .filter_map(FstabEntry::from_line)
        .find(|entry| entry.fs_spec.matches(device))
        .map(|entry| {
            debug!(
                "fstab pins {} to {}",
                device.path.display(),
                entry.mount_point.display()
            );
            entry.mount_point
        })
}

/// Reads fstab at `path` and looks `device` up. A missing fstab pins nothing.
pub fn lookup_mount_point_in(path: &Path, device: &Device) -> Result<Option<PathBuf>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(lookup_mount_point(&text, device)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).fstab_read_context(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FSTAB: &str = r#"# /etc/fstab: static file system information.

# <file system>  <mount point>  <type>  <options>  <dump>  <pass>
UUID=abc-123  /  ext4  defaults  0  1
proc  /proc  proc  defaults  0  0
UUID=076373AA55FCD80F /mnt/InternalDrive ntfs3 defaults 0 0
LABEL=My\040Stick  /mnt/My\040Stick  vfat  noauto,user  0  0
/dev/sdc1  /mnt/literal  ext4  noauto  0  0
/dev/sdc1  /mnt/second  ext4  noauto  0  0
"#;

    fn device_with(path: &str, aliases: &[&str]) -> Device {
        Device {
            aliases: aliases.iter().map(PathBuf::from).collect(),
            ..Device::new(path)
        }
    }

    #[test]
    fn test_parse_attribute_spec() {
        assert_eq!(
            FsSpec::parse("PARTUUID=1122-3344"),
            Some(FsSpec::Attribute {
                name: "PARTUUID".to_string(),
                value: "1122-3344".to_string()
            })
        );
        assert_eq!(
            FsSpec::parse("/dev/sdb1"),
            Some(FsSpec::Path(PathBuf::from("/dev/sdb1")))
        );
        assert_eq!(FsSpec::parse("tmpfs"), None);
        assert_eq!(FsSpec::parse("label=lower"), None);
    }

    #[test]
    fn test_parse_fstab_skip_comments() {
        assert!(FstabEntry::from_line("# This is a comment").is_none());
        assert!(FstabEntry::from_line("").is_none());
        assert!(FstabEntry::from_line("   ").is_none());
        assert!(FstabEntry::from_line("/dev/sdb1").is_none());
    }

    #[test]
    fn test_uuid_alias_matches() {
        let dev = device_with("/dev/sda2", &["/dev/disk/by-uuid/076373AA55FCD80F"]);
        assert_eq!(
            lookup_mount_point(SAMPLE_FSTAB, &dev),
            Some(PathBuf::from("/mnt/InternalDrive"))
        );
    }

    #[test]
    fn test_different_uuid_falls_through() {
        let dev = device_with("/dev/sda2", &["/dev/disk/by-uuid/076373AA55FCD810"]);
        assert_eq!(lookup_mount_point(SAMPLE_FSTAB, &dev), None);
    }

    #[test]
    fn test_attribute_directory_must_match() {
        // Right basename, wrong attribute directory.
        let dev = device_with("/dev/sda2", &["/dev/disk/by-label/076373AA55FCD80F"]);
        assert_eq!(lookup_mount_point(SAMPLE_FSTAB, &dev), None);
    }

    #[test]
    fn test_escaped_label_matches() {
        let dev = device_with("/dev/sdb1", &["/dev/disk/by-label/My Stick"]);
        assert_eq!(
            lookup_mount_point(SAMPLE_FSTAB, &dev),
            Some(PathBuf::from("/mnt/My Stick"))
        );
    }

    #[test]
    fn test_literal_path_first_match_wins() {
        let dev = device_with("/dev/sdc1", &[]);
        assert_eq!(
            lookup_mount_point(SAMPLE_FSTAB, &dev),
            Some(PathBuf::from("/mnt/literal"))
        );
    }

    #[test]
    fn test_literal_path_matches_alias() {
        let fstab = "/dev/disk/by-path/pci-0000:00:14.0-usb-0:1:1.0-scsi-0:0:0:0-part1 /mnt/port1 vfat noauto 0 0\n";
        let dev = device_with(
            "/dev/sdb1",
            &["/dev/disk/by-path/pci-0000:00:14.0-usb-0:1:1.0-scsi-0:0:0:0-part1"],
        );
        assert_eq!(
            lookup_mount_point(fstab, &dev),
            Some(PathBuf::from("/mnt/port1"))
        );
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape_fstab_path(r"/mnt/My\040Drive"), "/mnt/My Drive");
        assert_eq!(unescape_fstab_path(r"/mnt/back\134slash"), "/mnt/back\\slash");
        assert_eq!(unescape_fstab_path(r"/mnt/odd\09"), r"/mnt/odd\09");
    }

    #[test]
    fn test_missing_fstab_pins_nothing() {
        let dev = device_with("/dev/sdb1", &[]);
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            lookup_mount_point_in(&dir.path().join("fstab"), &dev).unwrap(),
            None
        );
    }
}
