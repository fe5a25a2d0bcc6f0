//! RFC 1123 dates, the way HTTP writes them: `Sun, 06 Nov 1994 08:49:37
//! GMT`, always in UTC.

use chrono::{NaiveDateTime, TimeZone, Utc};

const FORMAT_GMT: &str = "%a, %d %b %Y %H:%M:%S GMT";
const FORMAT_UTC: &str = "%a, %d %b %Y %H:%M:%S UTC";

/// Formats whole-second unix time; out-of-range input yields an empty
/// string rather than a broken header.
pub fn format(unix: i64) -> String {
    match Utc.timestamp_opt(unix, 0).single() {
        Some(dt) => dt.format(FORMAT_GMT).to_string(),
        None => String::new(),
    }
}

/// Parses an RFC 1123 date with a `GMT` or `UTC` zone suffix back to unix
/// time.
pub fn parse(value: &str) -> Option<i64> {
    let value = value.trim();

    for format in [FORMAT_GMT, FORMAT_UTC] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.and_utc().timestamp());
        }
    }
    None
}
