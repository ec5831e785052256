//! Machine identity composite for master-key derivation.

use std::path::Path;

use wb_domain::{Error, Result};

/// Stable identifiers of the host the keystore is bound to.
///
/// The composite feeds the KDF; a keystore file copied to a machine with
/// different identifiers derives a different master key and every decrypt
/// fails with an integrity error.
#[derive(Clone, PartialEq, Eq)]
pub struct MachineIdentity {
    machine_id: String,
    dmi_uuid: String,
    primary_mac: String,
}

impl MachineIdentity {
    /// Collect identifiers from the running host. Individual sources may
    /// be absent (containers often hide DMI); at least one must resolve.
    pub fn collect() -> Result<Self> {
        let machine_id = read_trimmed("/etc/machine-id")
            .or_else(|| read_trimmed("/var/lib/dbus/machine-id"))
            .unwrap_or_default();
        let dmi_uuid = read_trimmed("/sys/class/dmi/id/product_uuid").unwrap_or_default();
        let primary_mac = first_stable_mac().unwrap_or_default();

        if machine_id.is_empty() && dmi_uuid.is_empty() && primary_mac.is_empty() {
            return Err(Error::Config(
                "no machine identifiers available; cannot derive a hardware-bound key".into(),
            ));
        }

        Ok(Self {
            machine_id,
            dmi_uuid,
            primary_mac,
        })
    }

    /// Fixed identity for tests and migration tooling.
    pub fn fixed(machine_id: &str, dmi_uuid: &str, primary_mac: &str) -> Self {
        Self {
            machine_id: machine_id.into(),
            dmi_uuid: dmi_uuid.into(),
            primary_mac: primary_mac.into(),
        }
    }

    /// The KDF input composite. Field order is fixed; changing it would
    /// orphan every existing keystore.
    pub fn composite(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.machine_id.as_bytes());
        out.push(0);
        out.extend_from_slice(self.dmi_uuid.as_bytes());
        out.push(0);
        out.extend_from_slice(self.primary_mac.as_bytes());
        out
    }
}

// Debug must not print identifier values; they are KDF input.
impl std::fmt::Debug for MachineIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineIdentity")
            .field("machine_id_present", &!self.machine_id.is_empty())
            .field("dmi_uuid_present", &!self.dmi_uuid.is_empty())
            .field("primary_mac_present", &!self.primary_mac.is_empty())
            .finish()
    }
}

fn read_trimmed(path: impl AsRef<Path>) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// First non-loopback, non-virtual interface MAC, in interface-name
/// order so repeated calls agree.
fn first_stable_mac() -> Option<String> {
    let mut names: Vec<String> = std::fs::read_dir("/sys/class/net")
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "lo" && !name.starts_with("veth") && !name.starts_with("docker"))
        .collect();
    names.sort();

    for name in names {
        if let Some(mac) = read_trimmed(format!("/sys/class/net/{name}/address")) {
            if mac != "00:00:00:00:00:00" {
                return Some(mac);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_is_order_sensitive() {
        let a = MachineIdentity::fixed("mid", "uuid", "aa:bb");
        let b = MachineIdentity::fixed("uuid", "mid", "aa:bb");
        assert_ne!(a.composite(), b.composite());
    }

    #[test]
    fn debug_does_not_leak_identifiers() {
        let id = MachineIdentity::fixed("secret-machine-id", "", "");
        let rendered = format!("{id:?}");
        assert!(!rendered.contains("secret-machine-id"));
    }
}
