use chrono::{DateTime, NaiveDateTime};

/// Microseconds in one second
pub const MICROS_PER_SECOND: i64 = 1_000_000;

const DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S%.f";

/// Parse a `dd/mm/yyyy HH:MM:SS.fff` UTC timestamp into Unix microseconds
pub fn unix_from_dt(text: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(text.trim(), DATETIME_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp_micros())
}

/// Format Unix microseconds as `dd/mm/yyyy HH:MM:SS.ff` (UTC, centiseconds)
pub fn dt_from_unix(micros: i64) -> String {
    match DateTime::from_timestamp_micros(micros) {
        Some(dt) => format!(
            "{}.{:02}",
            dt.format("%d/%m/%Y %H:%M:%S"),
            dt.timestamp_subsec_micros() / 10_000
        ),
        None => format!("{}us", micros),
    }
}
