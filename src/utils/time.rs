/// Time utilities for collection windows
use chrono::{DateTime, NaiveDate, SubsecRound, Utc};

use crate::error::{IngestError, Result};

/// Current time truncated to whole seconds
pub fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Parse a backfill start point: RFC3339 first, then a bare `YYYY-MM-DD` at midnight UTC
pub fn parse_start_from(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .ok_or_else(|| {
            IngestError::ConfigError(format!(
                "Invalid backfill start date '{}' (expected RFC3339 or YYYY-MM-DD)",
                raw
            ))
        })
}

/// Compact window label for log lines
pub fn format_window(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    format!(
        "{} -> {}",
        from.format("%Y-%m-%dT%H:%M:%SZ"),
        to.format("%Y-%m-%dT%H:%M:%SZ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_start_from() {
        assert_eq!(
            parse_start_from("2025-09-18").unwrap(),
            Utc.with_ymd_and_hms(2025, 9, 18, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_start_from("2025-09-18T12:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2025, 9, 18, 10, 30, 0).unwrap()
        );
        assert!(matches!(
            parse_start_from("18/09/2025"),
            Err(IngestError::ConfigError(_))
        ));
    }

    #[test]
    fn test_now_seconds_has_no_fraction() {
        assert_eq!(now_seconds().timestamp_subsec_nanos(), 0);
    }
}
