use serde::{Deserialize, Serialize};

/// One reading of the `/metrics` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Percentage, nominally 0..=100 but not clamped by producers.
    pub cpu_usage: f64,
    pub memory_usage_kb: u64,
    pub processes: u64,
    pub load_average: LoadAverage,
    pub disk: DiskStats,
    pub network: NetworkStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    #[serde(rename = "1min")]
    pub one: f64,
    #[serde(rename = "5min")]
    pub five: f64,
    #[serde(rename = "15min")]
    pub fifteen: f64,
}

/// Cumulative counters since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Cumulative counters of the exporter's default interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIRE: &str = r#"{
        "cpu_usage": 12.50,
        "memory_usage_kb": 2048,
        "network": { "bytes_sent": 10, "bytes_received": 20 },
        "disk": { "bytes_read": 3145728, "bytes_written": 0 },
        "processes": 312,
        "load_average": { "1min": 0.52, "5min": 0.40, "15min": 0.31 }
    }"#;

    #[test]
    fn decodes_exporter_payload() {
        let snapshot: MetricsSnapshot = serde_json::from_str(WIRE).unwrap();

        assert_eq!(snapshot.cpu_usage, 12.5);
        assert_eq!(snapshot.memory_usage_kb, 2048);
        assert_eq!(snapshot.processes, 312);
        assert_eq!(snapshot.load_average.fifteen, 0.31);
        assert_eq!(snapshot.disk.bytes_read, 3145728);
        assert_eq!(snapshot.network.bytes_received, 20);
    }

    #[test]
    fn load_average_uses_minute_keys() {
        let value = serde_json::to_value(LoadAverage {
            one: 1.0,
            five: 2.0,
            fifteen: 3.0,
        })
        .unwrap();

        assert_eq!(value["1min"], 1.0);
        assert_eq!(value["5min"], 2.0);
        assert_eq!(value["15min"], 3.0);
    }

    #[test]
    fn out_of_range_cpu_is_accepted() {
        let snapshot: MetricsSnapshot =
            serde_json::from_str(&WIRE.replace("12.50", "137.0")).unwrap();
        assert_eq!(snapshot.cpu_usage, 137.0);
    }

    #[test]
    fn rejects_negative_counters_and_missing_keys() {
        assert!(serde_json::from_str::<MetricsSnapshot>(&WIRE.replace("2048", "-1")).is_err());
        assert!(
            serde_json::from_str::<MetricsSnapshot>(
                r#"{"cpu_usage": 1.0, "memory_usage_kb": 1}"#
            )
            .is_err()
        );
    }
}
