use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use segmentation_common::{Error, Result, SegmentId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column format for every timestamp the store writes. Lexicographic order
/// matches chronological order, which the month-range query relies on.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Creation parameters for a segment. Only the slug is persisted; the
/// percentage and expiration drive the initial population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSegment {
    pub slug: String,
    pub random_percentage: f64,
    pub expiration_date: Option<DateTime<Utc>>,
}

/// One entry of the `add` list of an update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentAddition {
    pub slug: String,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedSegment {
    pub id: SegmentId,
    pub assigned_users: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSegments {
    pub user_id: UserId,
    pub segments: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOperation {
    Add,
    Remove,
}

impl HistoryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }

    pub(crate) fn from_db(value: &str) -> Result<Self> {
        match value {
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            other => Err(Error::Database(format!("unknown history operation: {other}"))),
        }
    }
}

/// Append-only audit row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub user_id: UserId,
    pub segment_slug: String,
    pub operation: HistoryOperation,
    pub operation_date: DateTime<Utc>,
}

/// Calendar month in `YYYY-MM` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) || !(1..=9999).contains(&year) {
            return Err(Error::InvalidArgument(format!(
                "year-month out of range: {year:04}-{month:02}"
            )));
        }
        Ok(Self { year, month })
    }

    /// Half-open `[start, end)` bounds covering the whole month.
    pub fn bounds(&self) -> (NaiveDateTime, NaiveDateTime) {
        let (next_year, next_month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        (first_of_month(self.year, self.month), first_of_month(next_year, next_month))
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

impl FromStr for YearMonth {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("year-month must be YYYY-MM, got '{raw}'"));

        let (year, month) = raw.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        if !year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn format_naive(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }

    Err(Error::Database(format!("invalid timestamp format: {raw}")))
}

pub(crate) fn display_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn year_month_parses_and_displays() {
        let ym: YearMonth = "2023-08".parse().unwrap();
        assert_eq!(ym.to_string(), "2023-08");
    }

    #[test]
    fn year_month_rejects_malformed_input() {
        for raw in ["2023-8", "2023-13", "2023-00", "23-08", "2023/08", "", "../../x", "2023-0a"] {
            let err = raw.parse::<YearMonth>().unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{raw} should be rejected");
        }
    }

    #[test]
    fn december_bounds_roll_into_next_year() {
        let (start, end) = "2023-12".parse::<YearMonth>().unwrap().bounds();
        assert_eq!(format_naive(start), "2023-12-01 00:00:00");
        assert_eq!(format_naive(end), "2024-01-01 00:00:00");
    }

    #[test]
    fn timestamps_round_trip_through_column_format() {
        let ts = Utc.with_ymd_and_hms(2023, 8, 15, 10, 30, 0).unwrap();
        let stored = format_timestamp(ts);
        assert_eq!(stored, "2023-08-15 10:30:00");
        assert_eq!(parse_timestamp(&stored).unwrap(), ts);
        assert_eq!(display_timestamp(ts), "2023-08-15T10:30:00Z");
    }

    #[test]
    fn history_operation_rejects_unknown_values() {
        assert_eq!(HistoryOperation::from_db("add").unwrap(), HistoryOperation::Add);
        assert!(HistoryOperation::from_db("rename").is_err());
    }
}
