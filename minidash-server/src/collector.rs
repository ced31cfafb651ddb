use minidash_proto::{DiskStats, LoadAverage, MetricsSnapshot, NetworkStats};
use sysinfo::{Disks, ProcessesToUpdate, System};
use tracing::debug;

/// Reads host metrics in the shape the dashboard polls for.
#[derive(Debug)]
pub struct MetricsCollector {
    system: System,
    disks: Disks,
    network: NetworkSource,
}

#[derive(Debug)]
enum NetworkSource {
    /// Every non-loopback interface, re-enumerated on each collection.
    AllInterfaces,
    Interface(netdev::Interface),
}

impl MetricsCollector {
    /// Report traffic of `if_name`, or summed over all non-loopback interfaces
    /// when `None`. A named interface that does not exist is an error.
    pub fn try_new(if_name: Option<&str>) -> anyhow::Result<Self> {
        let mut system = System::new();
        // usage is a delta between two refreshes, prime the first one
        system.refresh_cpu_usage();

        let network = match if_name {
            Some(name) => {
                let iface = netdev::get_interfaces()
                    .into_iter()
                    .find(|iface| iface.name == name)
                    .ok_or_else(|| anyhow::anyhow!("Network interface '{}' not found", name))?;
                debug!("reporting traffic of interface {}", iface.name);
                NetworkSource::Interface(iface)
            }
            None => {
                debug!("reporting traffic summed over all non-loopback interfaces");
                NetworkSource::AllInterfaces
            }
        };

        Ok(Self {
            system,
            disks: Disks::new_with_refreshed_list(),
            network,
        })
    }

    fn query_cpu(&mut self) -> f64 {
        self.system.refresh_cpu_usage();
        self.system.global_cpu_usage() as f64
    }

    fn query_memory_kb(&mut self) -> u64 {
        self.system.refresh_memory();
        self.system.used_memory() / 1024
    }

    fn query_processes(&mut self) -> u64 {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        self.system.processes().len() as u64
    }

    fn query_load_average() -> LoadAverage {
        let load = System::load_average();
        LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        }
    }

    fn query_disk(&mut self) -> DiskStats {
        self.disks.refresh(true);
        self.disks
            .list()
            .iter()
            .map(|disk| disk.usage())
            .fold(
                DiskStats {
                    bytes_read: 0,
                    bytes_written: 0,
                },
                |acc, usage| DiskStats {
                    bytes_read: acc.bytes_read.saturating_add(usage.total_read_bytes),
                    bytes_written: acc.bytes_written.saturating_add(usage.total_written_bytes),
                },
            )
    }

    fn query_network(&mut self) -> NetworkStats {
        match &mut self.network {
            NetworkSource::Interface(iface) => interface_traffic(iface),
            NetworkSource::AllInterfaces => netdev::get_interfaces()
                .iter_mut()
                .filter(|iface| !iface.is_loopback())
                .map(interface_traffic)
                .fold(
                    NetworkStats {
                        bytes_received: 0,
                        bytes_sent: 0,
                    },
                    |acc, stats| NetworkStats {
                        bytes_received: acc.bytes_received.saturating_add(stats.bytes_received),
                        bytes_sent: acc.bytes_sent.saturating_add(stats.bytes_sent),
                    },
                ),
        }
    }

    pub fn collect(&mut self) -> MetricsSnapshot {
        MetricsSnapshot {
            cpu_usage: self.query_cpu(),
            memory_usage_kb: self.query_memory_kb(),
            processes: self.query_processes(),
            load_average: Self::query_load_average(),
            disk: self.query_disk(),
            network: self.query_network(),
        }
    }
}

fn interface_traffic(iface: &mut netdev::Interface) -> NetworkStats {
    if let Err(e) = iface.update_stats() {
        debug!("unable to refresh stats of {}: {e}", iface.name);
    }
    let stats = iface.stats.as_ref();
    NetworkStats {
        bytes_received: stats.map(|s| s.rx_bytes).unwrap_or(0),
        bytes_sent: stats.map(|s| s.tx_bytes).unwrap_or(0),
    }
}
