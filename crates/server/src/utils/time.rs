//! Time handling for the backup orchestrator.
//!
//! All timestamps are naive UTC past the entity boundary. Timezone-aware
//! inputs are normalized here, and the inverted row-key encoding that the
//! history and audit tables depend on lives here as well.

use chrono::{DateTime, NaiveDateTime, Utc};

/// .NET DateTime.MaxValue.Ticks. Row keys are `MAX_TICKS - ticks(created_at)`
/// so lexicographically ascending row keys iterate newest-first. Existing
/// data depends on this exact constant.
pub const MAX_TICKS: i64 = 3_155_378_975_999_999_999;

/// Upper bound for the microsecond-based audit row keys (16 digits).
pub const MAX_MICROS: i64 = 9_999_999_999_999_999;

/// Current wall clock as naive UTC.
pub fn now_utc() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Parse a timestamp string into naive UTC.
///
/// Accepts RFC 3339 with an offset (converted to UTC before the offset is
/// dropped) and plain `YYYY-MM-DDTHH:MM:SS[.f]` naive forms.
pub fn ensure_naive_utc(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    None
}

/// 100-nanosecond ticks since the Unix epoch.
pub fn ticks(ts: NaiveDateTime) -> i64 {
    let secs = ts.and_utc().timestamp();
    let sub_ticks = i64::from(ts.and_utc().timestamp_subsec_nanos()) / 100;
    secs * 10_000_000 + sub_ticks
}

/// Row key for backup history entries: inverted ticks, zero-padded to 19
/// digits, underscore, record id.
pub fn inverted_ticks_row_key(ts: NaiveDateTime, id: &str) -> String {
    format!("{:019}_{}", MAX_TICKS - ticks(ts), id)
}

/// Row key for audit entries: inverted microseconds, zero-padded to 16
/// digits, underscore, record id.
pub fn inverted_micros_row_key(ts: NaiveDateTime, id: &str) -> String {
    let micros = ts.and_utc().timestamp_micros();
    format!("{:016}_{}", MAX_MICROS - micros, id)
}

/// Extract the record id out of an inverted row key.
///
/// Legacy rows used the bare id as the row key; both forms are accepted.
pub fn id_from_row_key(row_key: &str) -> &str {
    match row_key.split_once('_') {
        Some((prefix, id)) if prefix.len() >= 16 && prefix.chars().all(|c| c.is_ascii_digit()) => {
            id
        }
        _ => row_key,
    }
}

/// Human-readable byte count, e.g. "1.5 MB".
pub fn format_bytes(size_bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if size_bytes == 0 {
        return "0 B".to_string();
    }
    let mut size = size_bytes as f64;
    let mut i = 0;
    while size >= 1024.0 && i < UNITS.len() - 1 {
        size /= 1024.0;
        i += 1;
    }
    if i == 0 {
        format!("{} {}", size_bytes, UNITS[i])
    } else {
        format!("{:.1} {}", size, UNITS[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn ensure_naive_utc_drops_offset() {
        let parsed = ensure_naive_utc("2024-06-01T10:30:00+02:00").unwrap();
        assert_eq!(parsed, dt(2024, 6, 1, 8, 30, 0));
    }

    #[test]
    fn ensure_naive_utc_accepts_naive_input() {
        let parsed = ensure_naive_utc("2024-06-01T10:30:00").unwrap();
        assert_eq!(parsed, dt(2024, 6, 1, 10, 30, 0));
        let parsed = ensure_naive_utc("2024-06-01").unwrap();
        assert_eq!(parsed, dt(2024, 6, 1, 0, 0, 0));
    }

    #[test]
    fn newer_timestamps_sort_first() {
        let older = inverted_ticks_row_key(dt(2024, 1, 1, 0, 0, 0), "a");
        let newer = inverted_ticks_row_key(dt(2024, 1, 2, 0, 0, 0), "b");
        assert!(newer < older);
        assert_eq!(newer.len(), 19 + 1 + 1);
    }

    #[test]
    fn audit_row_keys_sort_newest_first() {
        let older = inverted_micros_row_key(dt(2024, 1, 1, 0, 0, 0), "a");
        let newer = inverted_micros_row_key(dt(2024, 1, 1, 0, 0, 1), "b");
        assert!(newer < older);
    }

    #[test]
    fn id_extraction_handles_both_row_key_formats() {
        let key = inverted_ticks_row_key(dt(2024, 1, 1, 0, 0, 0), "abc-123");
        assert_eq!(id_from_row_key(&key), "abc-123");
        assert_eq!(id_from_row_key("abc-123"), "abc-123");
        // A legacy key with its own underscores is not mistaken for the new format
        assert_eq!(id_from_row_key("legacy_id"), "legacy_id");
    }

    #[test]
    fn format_bytes_picks_unit() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
