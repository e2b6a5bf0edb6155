use anyhow::{Result, anyhow};
use chrono::{Duration, Months, NaiveDate, NaiveDateTime, Utc};

/// Timestamp format the RAPI expects in queries and order listings.
pub const RAPI_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const INPUT_FORMATS: &[&str] = &[
    "%Y%m%d_%H%M%S",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d"];

/// A time window for the acquisition date of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateRange {
    /// Fixed start and end (UTC).
    Between {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    /// From a point in time up to whenever the query is built.
    Since(NaiveDateTime),
}

impl DateRange {
    /// Parses `start`/`end` strings such as `20190101_000000`,
    /// `2019-01-01T00:00:00Z` or `2019-01-01`.
    pub fn new(start: &str, end: &str) -> Result<Self> {
        let start = parse_datetime(start)
            .ok_or_else(|| anyhow!("could not parse start date '{}'", start))?;
        let end =
            parse_datetime(end).ok_or_else(|| anyhow!("could not parse end date '{}'", end))?;
        Ok(DateRange::Between { start, end })
    }

    pub fn between(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        DateRange::Between { start, end }
    }

    /// A range ending now, described by a phrase like `"24 hours"`,
    /// `"3 days ago"`, `"2 weeks"` or `"yesterday"`.
    pub fn since_phrase(phrase: &str) -> Result<Self> {
        let now = Utc::now().naive_utc();
        let start = parse_phrase(phrase, now)
            .ok_or_else(|| anyhow!("could not understand date phrase '{}'", phrase))?;
        Ok(DateRange::Since(start))
    }

    /// Start and end as they appear in a RAPI query.
    pub(crate) fn bounds(&self, now: NaiveDateTime) -> (String, String) {
        let (start, end) = match self {
            DateRange::Between { start, end } => (*start, *end),
            DateRange::Since(start) => (*start, now),
        };
        (
            start.format(RAPI_FORMAT).to_string(),
            end.format(RAPI_FORMAT).to_string(),
        )
    }
}

/// Parses the fixed formats accepted throughout the crate.
pub(crate) fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for form in INPUT_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, form) {
            return Some(dt);
        }
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for form in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, form) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// A fixed date or a relative phrase, resolved against `now`.
pub(crate) fn parse_phrase(phrase: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if let Some(dt) = parse_datetime(phrase) {
        return Some(dt);
    }

    let lower = phrase.trim().to_lowercase();
    match lower.as_str() {
        "now" => return Some(now),
        "today" => return now.date().and_hms_opt(0, 0, 0),
        "yesterday" => return now.date().pred_opt()?.and_hms_opt(0, 0, 0),
        _ => {}
    }

    let mut parts = lower.split_whitespace();
    let amount: i64 = match parts.next()? {
        "a" | "an" | "one" => 1,
        n => n.parse().ok()?,
    };
    let unit = parts.next()?;
    match parts.next() {
        None | Some("ago") => {}
        Some(_) => return None,
    }
    if amount < 0 {
        return None;
    }

    match unit.trim_end_matches('s') {
        "second" | "sec" => now.checked_sub_signed(Duration::try_seconds(amount)?),
        "minute" | "min" => now.checked_sub_signed(Duration::try_minutes(amount)?),
        "hour" | "hr" => now.checked_sub_signed(Duration::try_hours(amount)?),
        "day" => now.checked_sub_signed(Duration::try_days(amount)?),
        "week" => now.checked_sub_signed(Duration::try_weeks(amount)?),
        "month" => now.checked_sub_months(Months::new(u32::try_from(amount).ok()?)),
        "year" => now.checked_sub_months(Months::new(u32::try_from(amount).ok()?.checked_mul(12)?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        parse_datetime(s).unwrap()
    }

    #[test]
    fn accepts_rapi_and_iso_inputs() {
        assert_eq!(at("20190101_000000"), at("2019-01-01T00:00:00Z"));
        assert_eq!(at("2019-01-01"), at("2019-01-01 00:00:00"));
        assert_eq!(at("2021-06-21T10:00:00+02:00"), at("2021-06-21T08:00:00Z"));
        assert!(parse_datetime("last tuesday").is_none());
    }

    #[test]
    fn relative_phrases() {
        let now = at("2024-03-31T12:00:00Z");
        assert_eq!(parse_phrase("24 hours", now), Some(at("2024-03-30T12:00:00Z")));
        assert_eq!(parse_phrase("3 days ago", now), Some(at("2024-03-28T12:00:00Z")));
        assert_eq!(parse_phrase("1 month", now), Some(at("2024-02-29T12:00:00Z")));
        assert_eq!(parse_phrase("a year", now), Some(at("2023-03-31T12:00:00Z")));
        assert_eq!(parse_phrase("yesterday", now), Some(at("2024-03-30")));
        assert_eq!(parse_phrase("3 fortnights", now), None);
        assert_eq!(parse_phrase("3 days from now", now), None);
    }

    #[test]
    fn bounds_use_rapi_format() {
        let now = at("2024-01-02T03:04:05Z");
        let range = DateRange::new("20190101_000000", "20210621_000000").unwrap();
        assert_eq!(
            range.bounds(now),
            ("2019-01-01T00:00:00Z".to_string(), "2021-06-21T00:00:00Z".to_string())
        );
        let since = DateRange::Since(at("2024-01-01"));
        assert_eq!(since.bounds(now).1, "2024-01-02T03:04:05Z");
    }
}
