use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use std::process::Command;
use sysinfo::System;

use super::error::{LicenseError, LicenseResult};
use super::types::MachineIdentity;

/// Source of the current device's identity.
pub trait MachineIdentityProvider: Send + Sync {
    fn machine_info(&self) -> LicenseResult<MachineIdentity>;
}

/// Reads identifiers from the host OS. The result is cached for the process lifetime.
#[derive(Default)]
pub struct HostMachineIdentity {
    cached: OnceCell<MachineIdentity>,
}

impl HostMachineIdentity {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MachineIdentityProvider for HostMachineIdentity {
    fn machine_info(&self) -> LicenseResult<MachineIdentity> {
        self.cached
            .get_or_try_init(|| {
                let identity = MachineIdentity {
                    machine_id: get_machine_id()?,
                    computer_name: get_computer_name(),
                };
                log::info!("Resolved machine identity for '{}'", identity.computer_name);
                Ok(identity)
            })
            .cloned()
    }
}

/// A fixed identity, for hosts that already know who they are.
pub struct StaticMachineIdentity {
    identity: MachineIdentity,
}

impl StaticMachineIdentity {
    pub fn new(machine_id: impl Into<String>, computer_name: impl Into<String>) -> Self {
        Self {
            identity: MachineIdentity {
                machine_id: machine_id.into(),
                computer_name: computer_name.into(),
            },
        }
    }
}

impl MachineIdentityProvider for StaticMachineIdentity {
    fn machine_info(&self) -> LicenseResult<MachineIdentity> {
        if self.identity.machine_id.trim().is_empty() {
            return Err(LicenseError::MachineIdentity(
                "machine id is empty".to_string(),
            ));
        }
        Ok(self.identity.clone())
    }
}

/// Stable machine id: SHA-256 hex of the platform hardware identifier.
pub fn get_machine_id() -> LicenseResult<String> {
    let hardware_id = get_machine_uuid().map_err(LicenseError::MachineIdentity)?;
    let hardware_id = hardware_id.trim();
    if hardware_id.is_empty() {
        return Err(LicenseError::MachineIdentity(
            "platform returned an empty hardware id".to_string(),
        ));
    }

    // Hash the raw identifier for privacy
    let mut hasher = Sha256::new();
    hasher.update(hardware_id.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn get_computer_name() -> String {
    System::host_name()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn get_machine_uuid() -> Result<String, String> {
    #[cfg(target_os = "macos")]
    {
        get_macos_uuid()
    }

    #[cfg(target_os = "windows")]
    {
        get_windows_uuid()
    }

    #[cfg(target_os = "linux")]
    {
        get_linux_uuid()
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        Err("unsupported platform".to_string())
    }
}

#[cfg(target_os = "macos")]
fn get_macos_uuid() -> Result<String, String> {
    let output = Command::new("ioreg")
        .args(["-d2", "-c", "IOPlatformExpertDevice"])
        .output()
        .map_err(|e| format!("Failed to execute ioreg: {}", e))?;

    if !output.status.success() {
        return Err("Failed to get hardware UUID".to_string());
    }

    let output_str = String::from_utf8_lossy(&output.stdout);
    output_str
        .lines()
        .find(|line| line.contains("IOPlatformUUID"))
        .and_then(|line| line.split('"').nth(3))
        .map(str::to_string)
        .ok_or_else(|| "Could not find hardware UUID".to_string())
}

#[cfg(target_os = "windows")]
fn get_windows_uuid() -> Result<String, String> {
    let output = Command::new("wmic")
        .args(["csproduct", "get", "UUID"])
        .output()
        .map_err(|e| format!("Failed to execute wmic: {}", e))?;

    if !output.status.success() {
        return Err("Failed to get machine GUID".to_string());
    }

    // First line is the column header
    let output_str = String::from_utf8_lossy(&output.stdout);
    output_str
        .lines()
        .skip(1)
        .map(str::trim)
        .find(|line| !line.is_empty() && *line != "UUID")
        .map(str::to_string)
        .ok_or_else(|| "Could not find machine GUID".to_string())
}

#[cfg(target_os = "linux")]
fn get_linux_uuid() -> Result<String, String> {
    use std::fs;

    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(machine_id) = fs::read_to_string(path) {
            let machine_id = machine_id.trim();
            if !machine_id.is_empty() {
                return Ok(machine_id.to_string());
            }
        }
    }

    get_linux_mac_address()
}

#[cfg(target_os = "linux")]
fn get_linux_mac_address() -> Result<String, String> {
    let output = Command::new("ip")
        .args(["link", "show"])
        .output()
        .map_err(|e| format!("Failed to execute ip command: {}", e))?;

    if !output.status.success() {
        return Err("Failed to get network interfaces".to_string());
    }

    let output_str = String::from_utf8_lossy(&output.stdout);
    output_str
        .lines()
        .filter(|line| line.contains("link/ether"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .find(|mac| *mac != "00:00:00:00:00:00")
        .map(str::to_string)
        .ok_or_else(|| "Could not find a valid MAC address".to_string())
}
