// SPDX-License-Identifier: MIT OR Apache-2.0
//! One-shot hardware inventory payload.

use serde::{Deserialize, Serialize};

/// Hardware facts posted to the server once per connection session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareReport {
    /// Machine hostname.
    pub hostname: String,
    /// Operating system name and version.
    pub os: String,
    /// CPU model string.
    pub cpu_model: String,
    /// Logical CPU count.
    pub cpu_count: usize,
    /// Total physical memory in bytes.
    pub total_memory_bytes: u64,
    /// Total disk capacity in bytes, summed over mounted disks.
    pub total_disk_bytes: u64,
    /// Agent release version.
    pub agent_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_round_trips() {
        let report = HardwareReport {
            hostname: "ws-17".into(),
            os: "Ubuntu 24.04".into(),
            cpu_model: "Xeon".into(),
            cpu_count: 8,
            total_memory_bytes: 16 << 30,
            total_disk_bytes: 512 << 30,
            agent_version: "1.0.0".into(),
        };
        let json = serde_json::to_string(&report).unwrap();
        let back: HardwareReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
