//! Metrics snapshot wire format.

use serde::{Deserialize, Serialize};

/// One complete system snapshot. Either every section is present or the
/// collection failed; there is no partial snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Collection time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// CPU load.
    pub cpu: CpuMetrics,
    /// Physical memory.
    pub memory: MemoryMetrics,
    /// Mounted filesystems.
    pub disks: Vec<DiskMetrics>,
    /// Network interfaces.
    pub network: Vec<NetworkMetrics>,
    /// Process counts by state.
    pub processes: ProcessMetrics,
    /// Seconds since boot.
    pub uptime_seconds: u64,
}

/// CPU section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuMetrics {
    /// Load across all cores, 0–100.
    pub usage_percent: f64,
    /// Logical core count.
    pub core_count: usize,
}

/// Memory section, in bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetrics {
    /// Total memory.
    pub total: u64,
    /// Used memory.
    pub used: u64,
    /// Free memory.
    pub free: u64,
    /// `used / total * 100`.
    pub usage_percent: f64,
}

/// One filesystem, sizes in bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskMetrics {
    /// Device or source name.
    pub fs: String,
    /// Filesystem type, e.g. `ext4`.
    #[serde(rename = "type")]
    pub fs_type: String,
    /// Mount point.
    pub mount: String,
    /// Total size.
    pub size: u64,
    /// Used space.
    pub used: u64,
    /// Space available to unprivileged users.
    pub available: u64,
    /// `used / size * 100`.
    pub usage_percent: f64,
}

/// One network interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    /// Interface name.
    pub iface: String,
    /// Bytes received since boot.
    pub rx_bytes: u64,
    /// Bytes transmitted since boot.
    pub tx_bytes: u64,
    /// Receive rate in bytes/s since the previous sample; `None` on the first.
    pub rx_rate: Option<f64>,
    /// Transmit rate in bytes/s since the previous sample; `None` on the first.
    pub tx_rate: Option<f64>,
}

/// Process counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMetrics {
    /// All processes.
    pub total: u64,
    /// Running or runnable.
    pub running: u64,
    /// In uninterruptible sleep.
    pub blocked: u64,
    /// Sleeping or idle.
    pub sleeping: u64,
}

/// `part / whole * 100`, or `0.0` when `whole` is zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_of_zero_is_zero() {
        assert!(percent(5, 0).abs() < f64::EPSILON);
        assert!((percent(1, 4) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn disk_type_uses_reserved_word() {
        let disk = DiskMetrics {
            fs: "/dev/sda1".into(),
            fs_type: "ext4".into(),
            mount: "/".into(),
            size: 100,
            used: 40,
            available: 60,
            usage_percent: 40.0,
        };
        let value = serde_json::to_value(&disk).unwrap();
        assert_eq!(value["type"], "ext4");
        assert_eq!(value["usagePercent"], 40.0);
    }

    #[test]
    fn first_sample_rates_are_null() {
        let net = NetworkMetrics {
            iface: "eth0".into(),
            rx_bytes: 1,
            tx_bytes: 2,
            rx_rate: None,
            tx_rate: None,
        };
        let value = serde_json::to_value(&net).unwrap();
        assert!(value["rxRate"].is_null());
        assert_eq!(value["rxBytes"], 1);
    }
}
