// SPDX-License-Identifier: GPL-3.0-only

//! Progress markers in tool output

use std::sync::LazyLock;

use regex::Regex;

static PERCENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%(?:\s*done)?").ok());

static FRACTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(\d+)\s*/\s*(\d+)\b").ok());

pub fn compute_progress_percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }

    let ratio = processed as f64 / total as f64;
    (ratio * 100.0).clamp(0.0, 100.0) as u8
}

/// Extract a percentage from a tool output line.
///
/// Understands `<n>% done`, plain `<n>%` and `<done>/<total>` counters.
pub fn parse_progress(line: &str) -> Option<u8> {
    if let Some(captures) = PERCENT.as_ref().and_then(|re| re.captures(line)) {
        let value: f64 = captures.get(1)?.as_str().parse().ok()?;
        return Some(value.clamp(0.0, 100.0) as u8);
    }

    let captures = FRACTION.as_ref().and_then(|re| re.captures(line))?;
    let done: u64 = captures.get(1)?.as_str().parse().ok()?;
    let total: u64 = captures.get(2)?.as_str().parse().ok()?;
    (total > 0).then(|| compute_progress_percent(done, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_markers() {
        assert_eq!(parse_progress("42% done"), Some(42));
        assert_eq!(parse_progress("Writing superblocks 7.5%"), Some(7));
        assert_eq!(parse_progress("100 % done"), Some(100));
    }

    #[test]
    fn fraction_markers() {
        assert_eq!(parse_progress("Allocating group tables: 12/48"), Some(25));
        assert_eq!(parse_progress("0/0"), None);
    }

    #[test]
    fn lines_without_markers() {
        assert_eq!(parse_progress("mke2fs 1.47.0 (5-Feb-2023)"), None);
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(compute_progress_percent(30, 10), 100);
        assert_eq!(compute_progress_percent(5, 0), 0);
    }
}
