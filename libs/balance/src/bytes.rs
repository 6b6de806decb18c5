//! Human-readable byte quantities for log fields and tables.

use std::fmt;

const SUFFIXES: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];
const FACTOR: f64 = 1024.0;

/// Displays a (possibly negative or fractional) byte count with a binary unit.
///
/// Plain bytes print without decimals, larger units with three significant
/// digits: `512 B`, `1.5 GB`, `-2 GB`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct ByteSize(pub f64);

impl From<u64> for ByteSize {
    fn from(value: u64) -> Self {
        Self(value as f64)
    }
}

impl From<i64> for ByteSize {
    fn from(value: i64) -> Self {
        Self(value as f64)
    }
}

impl From<f64> for ByteSize {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = self.0;
        let mut unit = 0;
        while value.abs() >= FACTOR && unit < SUFFIXES.len() - 1 {
            value /= FACTOR;
            unit += 1;
        }

        if unit == 0 {
            return write!(f, "{:.0} {}", value, SUFFIXES[0]);
        }

        write!(f, "{} {}", significant(value, 3), SUFFIXES[unit])
    }
}

/// Format `value` with `digits` significant digits, trimming trailing zeros.
fn significant(value: f64, digits: i32) -> String {
    if value == 0.0 {
        return "0".to_string();
    }

    let magnitude = value.abs().log10().floor() as i32;
    let decimals = (digits - 1 - magnitude).max(0) as usize;
    let formatted = format!("{:.*}", decimals, value);

    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        formatted
    }
}
