//! Invoking user identity and privilege escalation detection.

use std::path::PathBuf;

use nix::unistd::{Gid, Group, Uid, User};
use tracing::debug;

use crate::error::{Error, Result};

/// Password/group database view of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    /// Name of the primary group.
    pub group: String,
    pub home: PathBuf,
}

impl UserIdentity {
    /// True for `root:root`.
    pub fn is_root(&self) -> bool {
        self.uid == 0 && self.gid == 0
    }
}

/// Resolves a user by name.
pub fn resolve_user(name: &str) -> Result<UserIdentity> {
    let user = User::from_name(name)
        .ok()
        .flatten()
        .ok_or_else(|| Error::UserLookup {
            user: name.to_string(),
        })?;
    Ok(from_passwd(user))
}

/// Resolves a user by uid.
pub fn resolve_uid(uid: u32) -> Result<UserIdentity> {
    let user = User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .ok_or_else(|| Error::UserLookup {
            user: uid.to_string(),
        })?;
    Ok(from_passwd(user))
}

fn from_passwd(user: User) -> UserIdentity {
    let group = Group::from_gid(user.gid)
        .ok()
        .flatten()
        .map(|g| g.name)
        .unwrap_or_else(|| user.gid.as_raw().to_string());

    UserIdentity {
        name: user.name,
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
        group,
        home: user.dir,
    }
}

/// How the process obtained its effective identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Started through sudo.
    Sudo,
    /// Started through super.
    Super,
    /// Setuid binary: real and effective uid differ.
    Setuid,
    /// No escalation detected.
    None,
}

/// Effective privilege plus the real identity behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Privilege {
    pub effective_uid: u32,
    /// The user who invoked the tool, before any escalation.
    pub real: UserIdentity,
    pub escalation: Escalation,
}

/// Escalation hints left in the environment by sudo or super.
///
/// Anyone can set these variables, so they only count when the real uid is
/// already root, which is what sudo and super leave behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalationEnv {
    pub sudo_uid: Option<u32>,
    pub sudo_gid: Option<u32>,
    /// `ORIG_USER`, only when `SUPERCMD` is set too.
    pub super_user: Option<String>,
}

impl EscalationEnv {
    pub fn from_process() -> Self {
        let super_cmd = std::env::var_os("SUPERCMD").is_some();
        Self {
            sudo_uid: env_u32("SUDO_UID"),
            sudo_gid: env_u32("SUDO_GID"),
            super_user: std::env::var("ORIG_USER").ok().filter(|_| super_cmd),
        }
    }
}

/// Decides how the process got its effective uid.
pub fn classify(real_uid: u32, effective_uid: u32, env: &EscalationEnv) -> Escalation {
    if real_uid == 0 {
        if env.sudo_uid.is_some() {
            return Escalation::Sudo;
        }
        if env.super_user.is_some() {
            return Escalation::Super;
        }
    }
    if real_uid != effective_uid {
        Escalation::Setuid
    } else {
        Escalation::None
    }
}

impl Privilege {
    pub fn is_effective_root(&self) -> bool {
        self.effective_uid == 0
    }

    /// Inspects the current process.
    pub fn detect() -> Result<Self> {
        let effective_uid = Uid::effective().as_raw();
        let real_uid = Uid::current().as_raw();
        let real_gid = Gid::current().as_raw();
        let env = EscalationEnv::from_process();

        let escalation = classify(real_uid, effective_uid, &env);
        let real = match (escalation, env.sudo_uid, env.super_user.as_deref()) {
            (Escalation::Sudo, Some(uid), _) => {
                let mut identity = resolve_uid(uid)?;
                if let Some(gid) = env.sudo_gid {
                    identity.gid = gid;
                }
                identity
            }
            (Escalation::Super, _, Some(name)) => resolve_user(name)?,
            _ => UserIdentity {
                gid: real_gid,
                ..resolve_uid(real_uid)?
            },
        };

        debug!(
            "effective uid {}, invoked by {} ({}:{}), escalation {:?}",
            effective_uid, real.name, real.uid, real.gid, escalation
        );

        Ok(Self {
            effective_uid,
            real,
            escalation,
        })
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
