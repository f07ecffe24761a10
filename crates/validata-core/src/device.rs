//! Host metadata probing.
//!
//! Shells out to the standard macOS inventory tools. The probed values ride
//! along in the submit payload and in "no offsets" reports so an operator
//! can match a failing host to a binary revision.

use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub hardware_version: String,
    pub software_name: String,
    pub software_version: String,
    pub software_build_id: String,
    pub serial_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_device_id: Option<String>,
    pub hostname: String,
}

impl DeviceInfo {
    /// Probe the running host.
    pub fn probe() -> Result<Self> {
        let sysctl = run_command(
            "sysctl",
            &["-n", "hw.model", "kern.osversion", "kern.osproductversion"],
        )?;
        let mut lines = sysctl.lines();
        let hardware_version = lines.next().unwrap_or_default().trim().to_string();
        let software_build_id = lines.next().unwrap_or_default().trim().to_string();
        let software_version = lines.next().unwrap_or_default().trim().to_string();
        if hardware_version.is_empty() || software_build_id.is_empty() || software_version.is_empty()
        {
            return Err(Error::DeviceProbe(format!(
                "unexpected sysctl output: {sysctl:?}"
            )));
        }

        let software_name = run_command("sw_vers", &["-productName"])?.trim().to_string();
        let (serial_number, unique_device_id) = probe_serial()?;
        let hostname = run_command("hostname", &[])?.trim().to_string();

        Ok(Self {
            hardware_version,
            software_name,
            software_version,
            software_build_id,
            serial_number,
            unique_device_id,
            hostname,
        })
    }

    /// Placeholder identity for hosts where probing fails. Keeps failure
    /// reports structured instead of aborting before they can be built.
    pub fn unknown() -> Self {
        Self {
            hardware_version: "unknown".to_string(),
            software_name: "unknown".to_string(),
            software_version: "unknown".to_string(),
            software_build_id: "unknown".to_string(),
            serial_number: "unknown".to_string(),
            unique_device_id: None,
            hostname: "unknown".to_string(),
        }
    }

    /// User-agent in the form the validation service expects.
    pub fn user_agent(&self) -> String {
        format!(
            "[{},{},{},{}]",
            self.software_name, self.software_version, self.software_build_id, self.hardware_version
        )
    }
}

fn run_command(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::DeviceProbe(format!("failed to run {program}: {e}")))?;
    if !output.status.success() {
        return Err(Error::DeviceProbe(format!(
            "{program} exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn probe_serial() -> Result<(String, Option<String>)> {
    match run_command("system_profiler", &["SPHardwareDataType", "-json"]) {
        Ok(json) => parse_hardware_json(&json),
        Err(e) => {
            debug!("system_profiler -json failed ({e}), falling back to XML");
            let xml = run_command("system_profiler", &["SPHardwareDataType", "-xml"])?;
            parse_hardware_plist(xml.as_bytes())
        }
    }
}

fn parse_hardware_json(json: &str) -> Result<(String, Option<String>)> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let entry = value
        .get("SPHardwareDataType")
        .and_then(|types| types.get(0))
        .ok_or_else(|| Error::DeviceProbe("missing SPHardwareDataType entry".to_string()))?;
    let serial = entry
        .get("serial_number")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let uuid = entry
        .get("platform_UUID")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    Ok((serial, uuid))
}

/// `system_profiler -xml` emits a plist: an array of data types, each with
/// an `_items` array of dictionaries.
fn parse_hardware_plist(xml: &[u8]) -> Result<(String, Option<String>)> {
    let value: plist::Value = plist::from_bytes(xml)?;
    let entry = value
        .as_array()
        .and_then(|types| types.first())
        .and_then(|t| t.as_dictionary())
        .and_then(|d| d.get("_items"))
        .and_then(|v| v.as_array())
        .and_then(|items| items.first())
        .and_then(|v| v.as_dictionary())
        .ok_or_else(|| Error::DeviceProbe("missing _items in system_profiler XML".to_string()))?;
    let serial = entry
        .get("serial_number")
        .and_then(|v| v.as_string())
        .unwrap_or_default()
        .to_string();
    let uuid = entry
        .get("platform_UUID")
        .and_then(|v| v.as_string())
        .map(str::to_string);
    Ok((serial, uuid))
}
