//! Mount option merging.
//!
//! Options are accumulated in a fixed order: the `user` seed and the
//! configured per-filesystem options, then the atime/exec/sync flags, then
//! the charset and umask, then the free-form options. Every accepted option
//! evicts the options it conflicts with, so the last writer of each conflict
//! group survives and the final list keeps insertion order.

use tracing::info;

use crate::settings::OptionRequest;

/// Keys that all select the filesystem charset.
pub const CHARSET_KEYS: &[&str] = &["charset", "iocharset", "nls"];

/// Key of the permission mask option.
pub const UMASK_KEY: &str = "umask";

/// Mount flags with a known conflict set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Async,
    Sync,
    Atime,
    Noatime,
    Diratime,
    Nodiratime,
    Relatime,
    Norelatime,
    Strictatime,
    Nostrictatime,
    Lazytime,
    Nolazytime,
    Auto,
    Noauto,
    Dev,
    Nodev,
    Exec,
    Noexec,
    Suid,
    Nosuid,
    Ro,
    Rw,
    Mand,
    Nomand,
    Iversion,
    Noiversion,
    User,
    Users,
    Nouser,
    Owner,
    Group,
}

impl Flag {
    const ALL: &'static [Flag] = &[
        Flag::Async,
        Flag::Sync,
        Flag::Atime,
        Flag::Noatime,
        Flag::Diratime,
        Flag::Nodiratime,
        Flag::Relatime,
        Flag::Norelatime,
        Flag::Strictatime,
        Flag::Nostrictatime,
        Flag::Lazytime,
        Flag::Nolazytime,
        Flag::Auto,
        Flag::Noauto,
        Flag::Dev,
        Flag::Nodev,
        Flag::Exec,
        Flag::Noexec,
        Flag::Suid,
        Flag::Nosuid,
        Flag::Ro,
        Flag::Rw,
        Flag::Mand,
        Flag::Nomand,
        Flag::Iversion,
        Flag::Noiversion,
        Flag::User,
        Flag::Users,
        Flag::Nouser,
        Flag::Owner,
        Flag::Group,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Flag::Async => "async",
            Flag::Sync => "sync",
            Flag::Atime => "atime",
            Flag::Noatime => "noatime",
            Flag::Diratime => "diratime",
            Flag::Nodiratime => "nodiratime",
            Flag::Relatime => "relatime",
            Flag::Norelatime => "norelatime",
            Flag::Strictatime => "strictatime",
            Flag::Nostrictatime => "nostrictatime",
            Flag::Lazytime => "lazytime",
            Flag::Nolazytime => "nolazytime",
            Flag::Auto => "auto",
            Flag::Noauto => "noauto",
            Flag::Dev => "dev",
            Flag::Nodev => "nodev",
            Flag::Exec => "exec",
            Flag::Noexec => "noexec",
            Flag::Suid => "suid",
            Flag::Nosuid => "nosuid",
            Flag::Ro => "ro",
            Flag::Rw => "rw",
            Flag::Mand => "mand",
            Flag::Nomand => "nomand",
            Flag::Iversion => "iversion",
            Flag::Noiversion => "noiversion",
            Flag::User => "user",
            Flag::Users => "users",
            Flag::Nouser => "nouser",
            Flag::Owner => "owner",
            Flag::Group => "group",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Options removed when this flag is added.
    pub fn evicts(&self) -> &'static [Flag] {
        use Flag::*;
        match self {
            Async => &[Sync],
            Sync => &[Async],
            Atime => &[Noatime, Diratime, Nodiratime, Relatime, Norelatime],
            Noatime => &[Atime, Strictatime],
            Diratime => &[Atime, Nodiratime],
            Nodiratime => &[Atime, Diratime],
            Relatime => &[Atime, Norelatime, Strictatime],
            Norelatime => &[Atime, Relatime],
            Strictatime => &[Atime, Noatime, Relatime, Norelatime],
            Nostrictatime => &[Strictatime],
            Lazytime => &[Nolazytime],
            Nolazytime => &[Lazytime],
            Auto => &[Noauto],
            Noauto => &[Auto],
            Dev => &[Nodev],
            Nodev => &[Dev],
            Exec => &[Noexec],
            Noexec => &[Exec],
            Suid => &[Nosuid],
            Nosuid => &[Suid],
            Ro => &[Rw],
            Rw => &[Ro],
            Mand => &[Nomand],
            Nomand => &[Mand],
            Iversion => &[Noiversion],
            Noiversion => &[Iversion],
            User | Users => &[Dev, Exec, Nouser, Suid],
            Nouser => &[User, Users],
            Owner | Group => &[Dev, Suid],
        }
    }
}

/// A single option token, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOption {
    Flag(Flag),
    /// `key=value`; evicts options with the same key.
    Named { key: String, value: String },
    /// Unrecognized bare option; evicts nothing.
    Other(String),
}

impl MountOption {
    pub fn parse(token: &str) -> Self {
        if let Some((key, value)) = token.split_once('=') {
            return Self::Named {
                key: key.to_string(),
                value: value.to_string(),
            };
        }
        match Flag::from_name(token) {
            Some(flag) => Self::Flag(flag),
            None => Self::Other(token.to_string()),
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Named { key, .. } => Some(key),
            _ => None,
        }
    }

    /// True if adding `self` removes `existing`.
    pub fn evicts(&self, existing: &MountOption) -> bool {
        match (self, existing) {
            (Self::Flag(new), Self::Flag(old)) => new.evicts().contains(old),
            (Self::Named { key, .. }, Self::Named { key: old, .. }) => key == old,
            _ => false,
        }
    }
}

/// Ordered option list with last-write-wins conflict resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptionSet {
    tokens: Vec<String>,
}

impl MountOptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `token`, evicting conflicting and identical entries.
    pub fn add(&mut self, token: &str) {
        let token = token.trim();
        if token.is_empty() {
            return;
        }
        let incoming = MountOption::parse(token);
        self.tokens
            .retain(|existing| existing != token && !incoming.evicts(&MountOption::parse(existing)));
        self.tokens.push(token.to_string());
    }

    /// Adds every part of a comma separated list.
    pub fn add_list(&mut self, list: &str) {
        for token in list.split(',') {
            self.add(token);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Comma joined form for `mount -o`.
    pub fn joined(&self) -> String {
        self.tokens.join(",")
    }
}

/// Arguments for `mount` ahead of the device and mountpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountArgs {
    pub argv: Vec<String>,
    pub options: MountOptionSet,
}

impl MountArgs {
    pub fn options_string(&self) -> String {
        self.options.joined()
    }
}

/// Inputs to [`build_mount_options`] besides the request itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeContext<'a> {
    /// Filesystem detected on the device.
    pub device_fstype: Option<&'a str>,
    /// Configured options for that filesystem, comma separated.
    pub config_options: &'a str,
    pub verbose: bool,
    pub fake: bool,
}

/// Computes the `mount` argument fragment for a request.
pub fn build_mount_options(request: &OptionRequest, merge: MergeContext<'_>) -> MountArgs {
    let free: Vec<&str> = request
        .options
        .iter()
        .flat_map(|o| o.split(','))
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .collect();

    let mut argv = Vec::new();
    let mut set = MountOptionSet::new();

    if !free.iter().any(|o| *o == "user" || *o == "users") {
        set.add("user");
    }
    set.add_list(merge.config_options);

    if let Some(fs_type) = &request.fs_type {
        argv.push("--types".to_string());
        argv.push(fs_type.clone());
    }
    if let Some(access) = request.access {
        argv.push(access.flag().to_string());
    }

    for atime in &request.atimes {
        set.add(atime);
    }
    if request.exec {
        set.add("exec");
    }
    if request.sync {
        set.add("sync");
    }

    let fstype = request.fs_type.as_deref().or(merge.device_fstype);
    let charset_key = if fstype == Some("ntfs") { "nls" } else { "iocharset" };
    if let Some(charset) = effective_value(&free, CHARSET_KEYS, request.charset.as_deref(), "charset") {
        set.add(&format!("{charset_key}={charset}"));
    }
    if let Some(umask) = effective_value(&free, &[UMASK_KEY], request.umask.as_deref(), "umask") {
        set.add(&format!("{UMASK_KEY}={umask}"));
    }

    for option in &free {
        let consumed = MountOption::parse(option)
            .key()
            .is_some_and(|k| CHARSET_KEYS.contains(&k) || k == UMASK_KEY);
        if !consumed {
            set.add(option);
        }
    }

    if merge.verbose {
        argv.push("--verbose".to_string());
    }
    if merge.fake {
        argv.push("--fake".to_string());
    }
    if !set.is_empty() {
        argv.push("-o".to_string());
        argv.push(set.joined());
    }

    MountArgs { argv, options: set }
}

/// Last free-form assignment to any of `keys`, else the explicit value.
fn effective_value<'a>(
    free: &[&'a str],
    keys: &[&str],
    explicit: Option<&'a str>,
    what: &str,
) -> Option<&'a str> {
    let assigned = free.iter().rev().find_map(|option| {
        let (key, value) = option.split_once('=')?;
        keys.contains(&key).then_some(value)
    });

    match (explicit, assigned) {
        (Some(explicit), Some(assigned)) => {
            if explicit != assigned {
                info!("{} '{}' overridden by option '{}'", what, explicit, assigned);
            }
            Some(assigned)
        }
        (explicit, assigned) => assigned.or(explicit),
    }
}
