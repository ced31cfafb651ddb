const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Render a byte count in base-1024 units, rounded to at most two decimals.
///
/// Trailing zeros are dropped (`3 MB`, `1.5 KB`). Anything past the gigabyte
/// range is still expressed in GB.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_owned();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", UNITS[unit])
}
