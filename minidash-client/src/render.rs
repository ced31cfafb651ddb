use std::fmt::Write;

use minidash_client::{ConnectionState, DashboardView, Sample, ViewStatus, format_bytes};

const SPARK: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

pub fn render(view: &DashboardView) -> String {
    let mut out = String::new();

    let connection = match view.connection {
        ConnectionState::Connected => "Connected",
        ConnectionState::Disconnected => "Disconnected",
    };
    let _ = writeln!(out, "Performance Monitor @ {} [{connection}]", view.endpoint);

    if let Some(error) = &view.last_error {
        let _ = writeln!(out, "  ! {error}");
    }

    match (view.status(), &view.latest) {
        (ViewStatus::Loading, _) => out.push_str("  Loading metrics...\n"),
        (_, None) => {}
        (_, Some(m)) => {
            let _ = writeln!(
                out,
                "  CPU {:.1}% | Memory {:.0} MB | Processes {} | Load (1m) {:.2}",
                m.cpu_usage,
                m.memory_usage_kb as f64 / 1024.0,
                m.processes,
                m.load_average.one,
            );
            let _ = writeln!(
                out,
                "  Load {:.2} / {:.2} / {:.2} | Disk r {} w {} | Net rx {} tx {}",
                m.load_average.one,
                m.load_average.five,
                m.load_average.fifteen,
                format_bytes(m.disk.bytes_read),
                format_bytes(m.disk.bytes_written),
                format_bytes(m.network.bytes_received),
                format_bytes(m.network.bytes_sent),
            );
        }
    }

    if let (Some(first), Some(last)) = (view.history.first(), view.history.last()) {
        let _ = writeln!(
            out,
            "  CPU {} {}..{}",
            cpu_sparkline(&view.history),
            first.time_label(),
            last.time_label()
        );
    }

    out
}

fn cpu_sparkline(history: &[Sample]) -> String {
    history
        .iter()
        .map(|s| {
            let level = (s.cpu.clamp(0.0, 100.0) / 100.0 * (SPARK.len() - 1) as f64).round();
            SPARK[level as usize]
        })
        .collect()
}
