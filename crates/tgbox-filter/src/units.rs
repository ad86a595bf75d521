//! Size and time value parsing for filter bounds.

use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};

/// Decimal (SI) multipliers. `KB` is 1000 bytes, not 1024.
const SIZE_UNITS: &[(&str, f64)] = &[
    ("GB", 1_000_000_000.0),
    ("MB", 1_000_000.0),
    ("KB", 1_000.0),
    ("B", 1.0),
];

const DATETIME_FORMAT: &str = "%d/%m/%y, %H:%M:%S";
const DATE_FORMAT: &str = "%d/%m/%y";

/// Parse `700`, `700B`, `122.45KB`, `1GB` into bytes.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Ok(bytes) = text.parse::<u64>() {
        return Some(bytes);
    }

    let upper = text.to_ascii_uppercase();
    let (number, multiplier) = SIZE_UNITS
        .iter()
        .find_map(|(suffix, mult)| upper.strip_suffix(suffix).map(|n| (n.trim(), *mult)))?;

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

/// Parse epoch seconds (`1645568542`, `1645568542.5`), `DD/MM/YY, HH:MM:SS`
/// or a bare `DD/MM/YY` (midnight) in the local time zone.
pub fn parse_time(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(epoch) = text.parse::<f64>() {
        return epoch.is_finite().then(|| epoch.floor() as i64);
    }

    let naive = NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}
