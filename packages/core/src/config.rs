//! Layered configuration and mount root resolution.
//!
//! Configuration comes from up to three TOML sources, searched in order:
//! the invoking user's file, the administrator's file and the built-in
//! defaults. Scalars come from the first source that sets them; lists are
//! taken whole from the first source that defines them, never merged.
//!
//! ```toml
//! root = "/media"
//! allow_root = ["/media", "home"]
//!
//! [fs]
//! all = "nodev"
//! vfat = "shortname=mixed"
//! dflt = ""
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::identity::UserIdentity;

/// Administrator configuration file.
pub const ADMIN_CONFIG_PATH: &str = "/etc/fmount.toml";

/// User configuration file, relative to the home directory.
pub const USER_CONFIG_PATH: &str = ".config/fmount.toml";

/// Built-in mount root, also available as `${media}`.
pub const DEFAULT_MOUNT_ROOT: &str = "/media";

/// Allow-list sentinel: root must be owned by the invoking user.
pub const ALLOW_OWNER: &str = "owner";

/// Allow-list sentinel: root must lie under the invoking user's home.
pub const ALLOW_HOME: &str = "home";

/// `fs` key applied to every filesystem.
pub const FS_ALL: &str = "all";

/// `fs` key used when the filesystem is unknown.
pub const FS_DEFAULT: &str = "dflt";

/// One configuration source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigSource {
    pub root: Option<String>,
    pub allow_root: Option<Vec<String>>,
    pub exec_dirs: Option<Vec<String>>,
    pub fs: BTreeMap<String, String>,
}

impl ConfigSource {
    /// Parses a TOML document. Errors carry the position only, never text
    /// from the document.
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|e| {
            let offset = e.span().map_or(0, |span| span.start);
            let (line, column) = line_column(text, offset);
            Error::ConfigParse {
                path: origin.to_path_buf(),
                line,
                column,
            }
        })
    }

    /// Reads a TOML file. A missing file is an empty source.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no configuration at {}", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e).config_read_context(path),
        }
    }

    /// Reads a file that must be a regular file owned by `owner`.
    ///
    /// Used for the invoking user's file, which is read with root privileges:
    /// symlinks are not followed and foreign files are refused unread.
    pub fn load_owned(path: &Path, owner: &UserIdentity) -> Result<Self> {
        let opened = OpenOptions::new()
            .read(true)
            .custom_flags((OFlag::O_NOFOLLOW | OFlag::O_NONBLOCK).bits())
            .open(path);
        let file = match opened {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no configuration at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) if e.raw_os_error() == Some(Errno::ELOOP as i32) => {
                return Err(untrusted(path, owner));
            }
            Err(e) => return Err(e).config_read_context(path),
        };

        let meta = file.metadata().config_read_context(path)?;
        if !meta.is_file() || meta.uid() != owner.uid {
            return Err(untrusted(path, owner));
        }

        let text = read_text(file).config_read_context(path)?;
        Self::parse(&text, path)
    }

    /// Values used when nothing else is configured.
    pub fn builtin() -> Self {
        Self {
            root: Some(DEFAULT_MOUNT_ROOT.to_string()),
            allow_root: Some(vec![DEFAULT_MOUNT_ROOT.to_string()]),
            exec_dirs: None,
            fs: BTreeMap::new(),
        }
    }
}

fn read_text(mut file: File) -> std::io::Result<String> {
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    Ok(text)
}

fn untrusted(path: &Path, owner: &UserIdentity) -> Error {
    Error::Config {
        message: format!(
            "Refusing to read {}: not a regular file owned by {}.",
            path.display(),
            owner.name
        ),
    }
}

/// 1-based line and column of a byte offset.
fn line_column(text: &str, offset: usize) -> (usize, usize) {
    let before = text.get(..offset).unwrap_or(text);
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    (line, column)
}

/// Ordered list of sources, first wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayeredConfig {
    sources: Vec<ConfigSource>,
}

impl LayeredConfig {
    pub fn new(sources: Vec<ConfigSource>) -> Self {
        Self { sources }
    }

    pub fn root(&self) -> Option<&str> {
        self.sources.iter().find_map(|s| s.root.as_deref())
    }

    pub fn allow_root(&self) -> Option<&[String]> {
        self.sources.iter().find_map(|s| s.allow_root.as_deref())
    }

    pub fn exec_dirs(&self) -> Option<&[String]> {
        self.sources.iter().find_map(|s| s.exec_dirs.as_deref())
    }

    fn fs_entry(&self, key: &str) -> Option<&str> {
        self.sources
            .iter()
            .find_map(|s| s.fs.get(key).map(String::as_str))
    }

    /// Option string for a filesystem: `fs.all` followed by `fs.<name>`,
    /// or `fs.dflt` when the name is unknown or has no entry.
    pub fn fs_options(&self, filesystem: Option<&str>) -> String {
        let specific = filesystem
            .and_then(|name| self.fs_entry(name))
            .or_else(|| self.fs_entry(FS_DEFAULT));

        [self.fs_entry(FS_ALL), specific]
            .into_iter()
            .flatten()
            .flat_map(|opts| opts.split(','))
            .map(str::trim)
            .filter(|opt| !opt.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// The user view and the administrator view of the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSet {
    /// User file over admin file over defaults.
    pub user: LayeredConfig,
    /// Admin file over defaults.
    pub admin: LayeredConfig,
}

impl ConfigSet {
    /// Builds both views, rejecting `allow_root` in the user source.
    pub fn from_sources(user: ConfigSource, admin: ConfigSource) -> Result<Self> {
        if user.allow_root.is_some() {
            return Err(Error::Config {
                message: "allow_root may only be set in the system configuration.".to_string(),
            });
        }

        Ok(Self {
            user: LayeredConfig::new(vec![user, admin.clone(), ConfigSource::builtin()]),
            admin: LayeredConfig::new(vec![admin, ConfigSource::builtin()]),
        })
    }

    /// Loads the admin file and the invoking user's file.
    pub fn load(admin_path: &Path, identity: &UserIdentity) -> Result<Self> {
        let admin = ConfigSource::load(admin_path)?;
        let user = ConfigSource::load_owned(&identity.home.join(USER_CONFIG_PATH), identity)?;
        Self::from_sources(user, admin)
    }

    /// Defaults only.
    pub fn builtin() -> Self {
        Self {
            user: LayeredConfig::new(vec![ConfigSource::builtin()]),
            admin: LayeredConfig::new(vec![ConfigSource::builtin()]),
        }
    }

    pub fn fs_options(&self, filesystem: Option<&str>) -> String {
        self.user.fs_options(filesystem)
    }
}

/// Substitutes `${user}`, `${group}`, `${home}`, `${media}` and a leading `~`.
pub fn expand_vars(raw: &str, identity: &UserIdentity) -> String {
    let home = identity.home.to_string_lossy();

    let tilde_expanded = if raw == "~" {
        home.to_string()
    } else if let Some(rest) = raw.strip_prefix("~/") {
        format!("{}/{}", home.trim_end_matches('/'), rest)
    } else {
        raw.to_string()
    };

    tilde_expanded
        .replace("${user}", &identity.name)
        .replace("${group}", &identity.group)
        .replace("${home}", &home)
        .replace("${media}", DEFAULT_MOUNT_ROOT)
}

/// Resolves the effective mount root and checks it against the
/// administrator's allow-list.
pub fn resolve_mount_root(configs: &ConfigSet, identity: &UserIdentity) -> Result<PathBuf> {
    let raw = configs.user.root().ok_or_else(|| Error::Config {
        message: "No root defined for mountpoints.".to_string(),
    })?;
    let expanded = expand_vars(raw, identity);
    let root = Path::new(&expanded);

    match fs::metadata(root) {
        Err(_) => {
            return Err(Error::Config {
                message: format!("No such directory: {}", expanded),
            });
        }
        Ok(meta) if !meta.is_dir() => {
            return Err(Error::Config {
                message: format!("Not a directory: {}", expanded),
            });
        }
        Ok(_) => {}
    }

    let allowed = configs.admin.allow_root().unwrap_or_default();
    for entry in allowed {
        if root_matches(entry, raw, &expanded, identity) {
            debug!("mount root {} allowed by '{}'", expanded, entry);
            return Ok(PathBuf::from(expanded));
        }
    }

    Err(Error::Config {
        message: format!("Mount root directory '{}' is not allowed.", raw),
    })
}

fn root_matches(entry: &str, raw: &str, expanded: &str, identity: &UserIdentity) -> bool {
    match entry {
        ALLOW_OWNER => fs::metadata(expanded)
            .map(|meta| meta.uid() == identity.uid)
            .unwrap_or(false),
        ALLOW_HOME => expanded
            .as_bytes()
            .starts_with(identity.home.as_os_str().as_encoded_bytes()),
        literal => raw == literal || expanded == expand_vars(literal, identity),
    }
}
