use minidash_proto::MetricsSnapshot;
use time::{OffsetDateTime, UtcOffset, macros::format_description};

const KB: f64 = 1024.0;
const MB: f64 = 1024.0 * 1024.0;

/// One point of the rolling history.
///
/// Disk and network figures are the exporter's cumulative counters converted
/// to megabytes, not rates.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: OffsetDateTime,
    pub cpu: f64,
    pub memory_mb: f64,
    pub disk_read_mb: f64,
    pub disk_write_mb: f64,
    pub net_recv_mb: f64,
    pub net_sent_mb: f64,
}

impl Sample {
    pub fn from_snapshot(snapshot: &MetricsSnapshot, timestamp: OffsetDateTime) -> Self {
        Sample {
            timestamp,
            cpu: snapshot.cpu_usage,
            memory_mb: snapshot.memory_usage_kb as f64 / KB,
            disk_read_mb: snapshot.disk.bytes_read as f64 / MB,
            disk_write_mb: snapshot.disk.bytes_written as f64 / MB,
            net_recv_mb: snapshot.network.bytes_received as f64 / MB,
            net_sent_mb: snapshot.network.bytes_sent as f64 / MB,
        }
    }

    /// Stamp `snapshot` with the current time at `offset`.
    pub fn captured_now(snapshot: &MetricsSnapshot, offset: UtcOffset) -> Self {
        Self::from_snapshot(snapshot, OffsetDateTime::now_utc().to_offset(offset))
    }

    /// `HH:MM:SS` label for chart axes.
    pub fn time_label(&self) -> String {
        self.timestamp
            .format(format_description!("[hour]:[minute]:[second]"))
            .unwrap_or_default()
    }
}
