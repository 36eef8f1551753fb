//! Device authorization gate.
//!
//! The tools are meant to be installed behind sudo or super and refuse to do
//! anything when not running with an effective uid of root. Hotpluggable
//! devices are open to every caller that got this far; fixed disks only to a
//! real root:root caller.

use tracing::{debug, warn};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::identity::{Escalation, Privilege};

/// Decides whether `program` may act on `device` for this caller.
pub fn authorize(device: &Device, program: &str, privilege: &Privilege) -> Result<()> {
    if !privilege.is_effective_root() {
        return Err(Error::Permission {
            message: setup_hint(program, &privilege.real.name),
        });
    }

    match privilege.escalation {
        Escalation::Sudo => debug!("{} running through sudo", program),
        Escalation::Super => debug!("{} running through super", program),
        Escalation::Setuid => debug!("{} running setuid root", program),
        Escalation::None => debug!("{} running as root", program),
    }

    if device.is_hotplug() {
        debug!(
            "{} is removable or USB attached, access granted",
            device.path.display()
        );
        return Ok(());
    }

    warn!(
        "{} is neither removable nor USB attached",
        device.path.display()
    );

    if privilege.real.is_root() {
        return Ok(());
    }

    Err(Error::Permission {
        message: format!(
            "{}: only root may act on the fixed device {}.",
            program,
            device.path.display()
        ),
    })
}

fn setup_hint(program: &str, user: &str) -> String {
    format!(
        "{program} must run with root privileges.\n\
         Ask your administrator to allow it, for example in /etc/sudoers:\n\
         \x20   {user} ALL = NOPASSWD: /usr/bin/{program}\n\
         or in /etc/super.tab:\n\
         \x20   {program}  /usr/bin/{program}  {user}\n\
         then run it as 'sudo {program}' or 'super {program}'."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UserIdentity;
    use std::path::PathBuf;

    fn identity(uid: u32, gid: u32) -> UserIdentity {
        UserIdentity {
            name: if uid == 0 { "root" } else { "alice" }.to_string(),
            uid,
            gid,
            group: "users".to_string(),
            home: PathBuf::from("/home/alice"),
        }
    }

    fn privilege(effective_root: bool, real_root: bool) -> Privilege {
        Privilege {
            effective_uid: if effective_root { 0 } else { 1000 },
            real: if real_root {
                identity(0, 0)
            } else {
                identity(1000, 100)
            },
            escalation: Escalation::Sudo,
        }
    }

    fn device(hotplug: bool) -> Device {
        Device {
            usb: hotplug,
            ..Device::new("/dev/sdb1")
        }
    }

    #[test]
    fn test_authorization_matrix() {
        for effective_root in [false, true] {
            for hotplug in [false, true] {
                for real_root in [false, true] {
                    let result = authorize(
                        &device(hotplug),
                        "fmount",
                        &privilege(effective_root, real_root),
                    );
                    let expected = effective_root && (hotplug || real_root);
                    assert_eq!(
                        result.is_ok(),
                        expected,
                        "effective_root={effective_root} hotplug={hotplug} real_root={real_root}"
                    );
                    if let Err(e) = result {
                        assert!(matches!(e, Error::Permission { .. }));
                    }
                }
            }
        }
    }

    #[test]
    fn test_removable_counts_as_hotplug() {
        let dev = Device {
            removable: true,
            ..Device::new("/dev/mmcblk0p1")
        };
        assert!(authorize(&dev, "fmount", &privilege(true, false)).is_ok());
    }

    #[test]
    fn test_real_root_needs_root_group() {
        let mut p = privilege(true, true);
        p.real.gid = 100;
        assert!(authorize(&device(false), "fumount", &p).is_err());
    }

    #[test]
    fn test_denial_explains_setup() {
        let err = authorize(&device(true), "fmount", &privilege(false, false)).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("sudoers"));
        assert!(text.contains("super.tab"));
        assert_eq!(err.exit_code(), 1);
    }
}
