//! System metrics collection.
//!
//! A snapshot is assembled from six probes that run concurrently on the
//! blocking pool. Collection is all-or-nothing: one failing probe fails the
//! whole snapshot.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use sysinfo::{Disks, Networks, ProcessStatus, System};
use tracing::debug;
use warlock_protocol::metrics::percent;
use warlock_protocol::{
    CpuMetrics, DiskMetrics, MemoryMetrics, MetricsSnapshot, NetworkMetrics, ProcessMetrics,
};

/// Gap between the two CPU refreshes that make up one load sample.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// Errors from metrics collection.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// A probe could not read its data.
    #[error("{probe} probe failed: {message}")]
    Probe {
        /// Probe name.
        probe: &'static str,
        /// Failure reason.
        message: String,
    },

    /// The platform is not supported by the telemetry backend.
    #[error("system telemetry is not supported on this platform")]
    Unsupported,
}

impl MetricsError {
    /// Shorthand for [`MetricsError::Probe`].
    #[must_use]
    pub fn probe(probe: &'static str, message: impl Into<String>) -> Self {
        Self::Probe {
            probe,
            message: message.into(),
        }
    }
}

/// The six metric probes. Implementations may block.
pub trait TelemetrySource: Send + Sync + 'static {
    /// CPU load over a short sampling window.
    fn cpu(&self) -> Result<CpuMetrics, MetricsError>;
    /// Physical memory usage.
    fn memory(&self) -> Result<MemoryMetrics, MetricsError>;
    /// Mounted filesystems.
    fn disks(&self) -> Result<Vec<DiskMetrics>, MetricsError>;
    /// Per-interface traffic counters.
    fn network(&self) -> Result<Vec<NetworkMetrics>, MetricsError>;
    /// Process counts by state.
    fn processes(&self) -> Result<ProcessMetrics, MetricsError>;
    /// Seconds since boot.
    fn uptime(&self) -> Result<u64, MetricsError>;
}

/// Runs the probes of a [`TelemetrySource`] and assembles snapshots.
#[derive(Clone)]
pub struct MetricsCollector {
    source: Arc<dyn TelemetrySource>,
}

impl MetricsCollector {
    /// Collector over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn TelemetrySource>) -> Self {
        Self { source }
    }

    /// Collector over the host via [`SysinfoSource`].
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Unsupported`] on platforms `sysinfo` cannot
    /// read.
    pub fn system() -> Result<Self, MetricsError> {
        Ok(Self::new(Arc::new(SysinfoSource::new()?)))
    }

    /// Collect one snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first probe failure; no partial snapshot is produced.
    pub async fn collect(&self) -> Result<MetricsSnapshot, MetricsError> {
        let started = Instant::now();
        let (cpu, memory, disks, network, processes, uptime_seconds) = tokio::try_join!(
            probe(&self.source, "cpu", |s| s.cpu()),
            probe(&self.source, "memory", |s| s.memory()),
            probe(&self.source, "disks", |s| s.disks()),
            probe(&self.source, "network", |s| s.network()),
            probe(&self.source, "processes", |s| s.processes()),
            probe(&self.source, "uptime", |s| s.uptime()),
        )?;
        debug!(elapsed_ms = started.elapsed().as_millis(), "Metrics collected");

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().timestamp_millis(),
            cpu,
            memory,
            disks,
            network,
            processes,
            uptime_seconds,
        })
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").finish_non_exhaustive()
    }
}

/// Run one probe on the blocking pool.
async fn probe<T, F>(
    source: &Arc<dyn TelemetrySource>,
    name: &'static str,
    read: F,
) -> Result<T, MetricsError>
where
    T: Send + 'static,
    F: FnOnce(&dyn TelemetrySource) -> Result<T, MetricsError> + Send + 'static,
{
    let source = Arc::clone(source);
    tokio::task::spawn_blocking(move || read(source.as_ref()))
        .await
        .map_err(|e| MetricsError::probe(name, e.to_string()))?
}

/// Previous network sample, for rate computation.
struct NetworkSampler {
    networks: Networks,
    last_refresh: Option<Instant>,
}

/// [`TelemetrySource`] backed by the `sysinfo` crate.
pub struct SysinfoSource {
    cpu: Mutex<System>,
    network: Mutex<NetworkSampler>,
}

impl SysinfoSource {
    /// Source reading the local host.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Unsupported`] if `sysinfo` has no backend
    /// for this platform.
    pub fn new() -> Result<Self, MetricsError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(MetricsError::Unsupported);
        }
        Ok(Self {
            cpu: Mutex::new(System::new()),
            network: Mutex::new(NetworkSampler {
                networks: Networks::new_with_refreshed_list(),
                last_refresh: None,
            }),
        })
    }
}

impl std::fmt::Debug for SysinfoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoSource").finish_non_exhaustive()
    }
}

impl TelemetrySource for SysinfoSource {
    fn cpu(&self) -> Result<CpuMetrics, MetricsError> {
        let mut sys = self.cpu.lock().unwrap_or_else(PoisonError::into_inner);
        // Usage is a delta between two refreshes.
        sys.refresh_cpu();
        std::thread::sleep(CPU_SAMPLE_INTERVAL);
        sys.refresh_cpu();

        let core_count = sys.cpus().len();
        if core_count == 0 {
            return Err(MetricsError::probe("cpu", "no CPUs reported"));
        }
        Ok(CpuMetrics {
            usage_percent: f64::from(sys.global_cpu_info().cpu_usage()),
            core_count,
        })
    }

    fn memory(&self) -> Result<MemoryMetrics, MetricsError> {
        let mut sys = System::new();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(MetricsError::probe("memory", "total memory reported as zero"));
        }
        let used = sys.used_memory();
        Ok(MemoryMetrics {
            total,
            used,
            free: sys.free_memory(),
            usage_percent: percent(used, total),
        })
    }

    fn disks(&self) -> Result<Vec<DiskMetrics>, MetricsError> {
        let disks = Disks::new_with_refreshed_list();
        let mut out: Vec<DiskMetrics> = disks
            .list()
            .iter()
            .map(|disk| {
                let size = disk.total_space();
                let available = disk.available_space();
                let used = size.saturating_sub(available);
                DiskMetrics {
                    fs: disk.name().to_string_lossy().into_owned(),
                    fs_type: disk.file_system().to_string_lossy().into_owned(),
                    mount: disk.mount_point().to_string_lossy().into_owned(),
                    size,
                    used,
                    available,
                    usage_percent: percent(used, size),
                }
            })
            .collect();
        out.sort_by(|a, b| a.mount.cmp(&b.mount));
        Ok(out)
    }

    fn network(&self) -> Result<Vec<NetworkMetrics>, MetricsError> {
        let mut sampler = self.network.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = sampler
            .last_refresh
            .map(|prev| now.saturating_duration_since(prev).as_secs_f64())
            .filter(|secs| *secs > 0.0);
        sampler.networks.refresh();
        sampler.last_refresh = Some(now);

        #[allow(clippy::cast_precision_loss)]
        let rate = |delta: u64| elapsed.map(|secs| delta as f64 / secs);
        let mut out: Vec<NetworkMetrics> = sampler
            .networks
            .list()
            .iter()
            .map(|(name, data)| NetworkMetrics {
                iface: name.clone(),
                rx_bytes: data.total_received(),
                tx_bytes: data.total_transmitted(),
                rx_rate: rate(data.received()),
                tx_rate: rate(data.transmitted()),
            })
            .collect();
        out.sort_by(|a, b| a.iface.cmp(&b.iface));
        Ok(out)
    }

    fn processes(&self) -> Result<ProcessMetrics, MetricsError> {
        let mut sys = System::new();
        sys.refresh_processes();
        let mut counts = ProcessMetrics {
            total: 0,
            running: 0,
            blocked: 0,
            sleeping: 0,
        };
        for process in sys.processes().values() {
            counts.total = counts.total.saturating_add(1);
            match process.status() {
                ProcessStatus::Run => counts.running = counts.running.saturating_add(1),
                ProcessStatus::Sleep | ProcessStatus::Idle => {
                    counts.sleeping = counts.sleeping.saturating_add(1);
                },
                ProcessStatus::UninterruptibleDiskSleep | ProcessStatus::LockBlocked => {
                    counts.blocked = counts.blocked.saturating_add(1);
                },
                _ => {},
            }
        }
        if counts.total == 0 {
            return Err(MetricsError::probe("processes", "process table is empty"));
        }
        Ok(counts)
    }

    fn uptime(&self) -> Result<u64, MetricsError> {
        Ok(System::uptime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed readings, with an optional failing probe.
    struct FakeSource {
        fail: Option<&'static str>,
    }

    impl FakeSource {
        fn check(&self, probe: &'static str) -> Result<(), MetricsError> {
            if self.fail == Some(probe) {
                Err(MetricsError::probe(probe, "forced failure"))
            } else {
                Ok(())
            }
        }
    }

    impl TelemetrySource for FakeSource {
        fn cpu(&self) -> Result<CpuMetrics, MetricsError> {
            self.check("cpu")?;
            Ok(CpuMetrics {
                usage_percent: 12.5,
                core_count: 4,
            })
        }

        fn memory(&self) -> Result<MemoryMetrics, MetricsError> {
            self.check("memory")?;
            Ok(MemoryMetrics {
                total: 100,
                used: 25,
                free: 75,
                usage_percent: 25.0,
            })
        }

        fn disks(&self) -> Result<Vec<DiskMetrics>, MetricsError> {
            self.check("disks")?;
            Ok(vec![])
        }

        fn network(&self) -> Result<Vec<NetworkMetrics>, MetricsError> {
            self.check("network")?;
            Ok(vec![])
        }

        fn processes(&self) -> Result<ProcessMetrics, MetricsError> {
            self.check("processes")?;
            Ok(ProcessMetrics {
                total: 10,
                running: 1,
                blocked: 0,
                sleeping: 9,
            })
        }

        fn uptime(&self) -> Result<u64, MetricsError> {
            self.check("uptime")?;
            Ok(3600)
        }
    }

    #[tokio::test]
    async fn snapshot_combines_all_probes() {
        let collector = MetricsCollector::new(Arc::new(FakeSource { fail: None }));
        let snapshot = collector.collect().await.unwrap();
        assert_eq!(snapshot.cpu.core_count, 4);
        assert_eq!(snapshot.memory.used, 25);
        assert_eq!(snapshot.processes.total, 10);
        assert_eq!(snapshot.uptime_seconds, 3600);
        assert!(snapshot.timestamp > 0);
    }

    #[tokio::test]
    async fn any_failing_probe_fails_collection() {
        for probe in ["cpu", "memory", "disks", "network", "processes", "uptime"] {
            let collector = MetricsCollector::new(Arc::new(FakeSource { fail: Some(probe) }));
            let err = collector.collect().await.unwrap_err();
            assert!(err.to_string().contains(probe), "{probe}: {err}");
        }
    }

    #[tokio::test]
    async fn sysinfo_reads_local_host() {
        let Ok(collector) = MetricsCollector::system() else {
            return;
        };
        let snapshot = collector.collect().await.unwrap();
        assert!(snapshot.cpu.core_count > 0);
        assert!(snapshot.memory.total > 0);
        assert!((0.0..=100.0).contains(&snapshot.memory.usage_percent));
        assert!(snapshot.network.iter().all(|n| n.rx_rate.is_none()));
    }

    #[test]
    fn second_network_sample_has_rates() {
        let Ok(source) = SysinfoSource::new() else {
            return;
        };
        source.network().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let second = source.network().unwrap();
        assert!(second.iter().all(|n| n.rx_rate.is_some()));
    }
}
