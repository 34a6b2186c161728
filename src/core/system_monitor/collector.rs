use chrono::Utc;
use sysinfo::{Components, CpuRefreshKind, Disks, MemoryRefreshKind, Networks, RefreshKind, System};

use crate::error::Result;

use super::metrics::{MetricKind, Sample};

/// Anything that can produce a batch of samples per sampling cycle
pub trait SampleSource: Send {
    fn collect(&mut self) -> Result<Vec<Sample>>;
}

/// Configuration for metrics collection
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub collect_cpu: bool,
    pub collect_memory: bool,
    pub collect_disk: bool,
    pub collect_temperature: bool,
    pub collect_network: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            collect_cpu: true,
            collect_memory: true,
            collect_disk: true,
            collect_temperature: true,
            collect_network: true,
        }
    }
}

/// Host sampler backed by sysinfo
pub struct SystemSampler {
    system: System,
    components: Components,
    disks: Disks,
    networks: Networks,
    config: CollectorConfig,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self::with_config(CollectorConfig::default())
    }

    pub fn with_config(config: CollectorConfig) -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());

        Self {
            system: System::new_with_specifics(refresh_kind),
            components: Components::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            config,
        }
    }

    fn cpu_usage(&mut self) -> f64 {
        self.system.refresh_cpu_usage();
        self.system.global_cpu_usage() as f64
    }

    fn memory_usage(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        (self.system.used_memory() as f64 / total as f64) * 100.0
    }

    /// Usage of the fullest mounted disk
    fn disk_usage(&mut self) -> Option<f64> {
        self.disks.refresh(true);
        self.disks
            .iter()
            .filter(|disk| disk.total_space() > 0)
            .map(|disk| {
                let total = disk.total_space();
                let used = total.saturating_sub(disk.available_space());
                (used as f64 / total as f64) * 100.0
            })
            .reduce(f64::max)
    }

    /// Hottest component reading, if the host exposes any sensor
    fn max_temperature(&mut self) -> Option<f64> {
        self.components.refresh(true);
        self.components
            .iter()
            .filter_map(|comp| comp.temperature())
            .map(|t| t as f64)
            .filter(|t| t.is_finite())
            .reduce(f64::max)
    }

    /// Receive and transmit errors across interfaces since the last refresh
    fn network_errors(&mut self) -> f64 {
        self.networks.refresh(true);
        self.networks
            .values()
            .map(|data| data.errors_on_received() + data.errors_on_transmitted())
            .sum::<u64>() as f64
    }
}

impl SampleSource for SystemSampler {
    fn collect(&mut self) -> Result<Vec<Sample>> {
        let now = Utc::now();
        let mut samples = Vec::with_capacity(MetricKind::ALL.len());

        if self.config.collect_cpu {
            samples.push(Sample::new(MetricKind::Cpu, self.cpu_usage(), now));
        }

        if self.config.collect_memory {
            samples.push(Sample::new(MetricKind::Memory, self.memory_usage(), now));
        }

        if self.config.collect_disk {
            if let Some(usage) = self.disk_usage() {
                samples.push(Sample::new(MetricKind::Disk, usage, now));
            }
        }

        if self.config.collect_temperature {
            if let Some(celsius) = self.max_temperature() {
                samples.push(Sample::new(MetricKind::Temperature, celsius, now));
            }
        }

        if self.config.collect_network {
            samples.push(Sample::new(MetricKind::Network, self.network_errors(), now));
        }

        Ok(samples)
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}
