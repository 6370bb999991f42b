use chrono::{DateTime, Local, SecondsFormat, Utc};

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Current instant as an RFC 3339 UTC string with millisecond precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render a stored RFC 3339 timestamp in the local zone for display.
/// Unparseable input is returned unchanged.
pub fn display_local(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => parsed
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        Err(_) => raw.to_string(),
    }
}
