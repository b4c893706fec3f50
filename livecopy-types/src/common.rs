//! Common utility functions shared across models

use num_format::{Locale, ToFormattedString};

/// One mebibyte, the unit every partition size is expressed in.
pub const MIB: u64 = 1024 * 1024;

/// Whole MiB contained in `bytes` (rounded down).
pub fn bytes_to_mib(bytes: u64) -> u64 {
    bytes / MIB
}

pub fn mib_to_bytes(mib: u64) -> u64 {
    mib.saturating_mul(MIB)
}

/// Convert bytes to human-readable format (e.g., "1.50 GB")
pub fn bytes_to_pretty(bytes: &u64, add_bytes: bool) -> String {
    let mut steps = 0;
    let mut val: f64 = *bytes as f64;

    while val > 1024. && steps <= 8 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "B",
        1 => "KB",
        2 => "MB",
        3 => "GB",
        4 => "TB",
        5 => "PB",
        6 => "EB",
        7 => "ZB",
        8 => "YB",
        _ => "Not Supported",
    };

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} bytes)", val, unit, bytes_str)
    } else {
        format!("{:.2} {}", val, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_prints_with_grouped_bytes() {
        assert_eq!(bytes_to_pretty(&512, false), "512.00 B");
        assert_eq!(bytes_to_pretty(&(3 * MIB / 2), false), "1.50 MB");
        assert_eq!(
            bytes_to_pretty(&(2 * 1024 * MIB), true),
            "2.00 GB (2,147,483,648 bytes)"
        );
    }

    #[test]
    fn mib_conversion_rounds_down() {
        assert_eq!(bytes_to_mib(MIB - 1), 0);
        assert_eq!(bytes_to_mib(5 * MIB + 17), 5);
        assert_eq!(mib_to_bytes(3), 3 * MIB);
    }
}
