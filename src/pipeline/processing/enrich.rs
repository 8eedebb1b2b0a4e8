use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike, Utc};
use tracing::{debug, info};

use crate::constants;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::table::{Table, Value};

/// Offset-bearing layouts tried after RFC 3339
const OFFSET_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Wall-clock layouts with no zone information
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Trait for stages that derive new columns from an existing table
pub trait Enricher {
    fn enrich(&self, table: &Table) -> Result<Table>;
}

/// Parses a timestamp column and appends calendar parts derived from it
#[derive(Debug, Clone)]
pub struct TimeEnricher {
    /// Column holding timestamp-like text
    pub column: String,
    /// Convert offsets to UTC and read naive values as UTC
    pub utc: bool,
}

impl Default for TimeEnricher {
    fn default() -> Self {
        Self {
            column: constants::CREATED_AT.to_string(),
            utc: true,
        }
    }
}

impl TimeEnricher {
    pub fn new(column: &str, utc: bool) -> Self {
        Self {
            column: column.to_string(),
            utc,
        }
    }
}

impl Enricher for TimeEnricher {
    fn enrich(&self, table: &Table) -> Result<Table> {
        let parsed = parse_datetime(table, &self.column, self.utc)?;

        let unparsed = table
            .values(&self.column)?
            .iter()
            .zip(parsed.values(&self.column)?)
            .filter(|(before, after)| !before.is_null() && after.is_null())
            .count();
        if unparsed > 0 {
            debug!("{} value(s) in {} could not be parsed as timestamps", unparsed, self.column);
        }
        metrics::enrich::timestamps_unparsed(unparsed);

        let enriched = add_time_parts(&parsed, &self.column)?;
        info!("Derived time parts from {} for {} rows", self.column, enriched.len());
        Ok(enriched)
    }
}

/// Parse `column` into timestamps. Unparseable values become null.
///
/// With `utc` set, offset-bearing values are converted to UTC and naive values
/// are taken to be UTC. Without it, offsets are kept and naive values stay naive.
pub fn parse_datetime(table: &Table, column: &str, utc: bool) -> Result<Table> {
    let values = table
        .values(column)?
        .iter()
        .map(|v| parse_timestamp(v, utc))
        .collect();
    table.with_column(column, values)
}

/// Timestamp view of a single cell, or null
pub fn parse_timestamp(value: &Value, utc: bool) -> Value {
    match value {
        Value::Timestamp(ts) => aware(*ts, utc),
        Value::NaiveTimestamp(naive) => wall_clock(*naive, utc),
        Value::Date(d) => d.and_hms_opt(0, 0, 0).map_or(Value::Null, |naive| wall_clock(naive, utc)),
        Value::Text(s) => parse_text(s.trim(), utc),
        _ => Value::Null,
    }
}

fn parse_text(s: &str, utc: bool) -> Value {
    if s.is_empty() {
        return Value::Null;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return aware(ts, utc);
    }
    if let Some(ts) = OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
    {
        return aware(ts, utc);
    }
    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return wall_clock(naive, utc);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(Value::Null, |naive| wall_clock(naive, utc))
}

fn aware(ts: DateTime<FixedOffset>, utc: bool) -> Value {
    if utc {
        Value::Timestamp(ts.with_timezone(&Utc.fix()))
    } else {
        Value::Timestamp(ts)
    }
}

fn wall_clock(naive: NaiveDateTime, utc: bool) -> Value {
    if utc {
        Value::Timestamp(Utc.fix().from_utc_datetime(&naive))
    } else {
        Value::NaiveTimestamp(naive)
    }
}

/// Append `date`, `year`, `month` ("YYYY-MM"), `dow` (full weekday name) and
/// `hour` derived from `timestamp_column`. Null timestamps give null parts.
pub fn add_time_parts(table: &Table, timestamp_column: &str) -> Result<Table> {
    let values = table.values(timestamp_column)?;
    let mut date = Vec::with_capacity(values.len());
    let mut year = Vec::with_capacity(values.len());
    let mut month = Vec::with_capacity(values.len());
    let mut dow = Vec::with_capacity(values.len());
    let mut hour = Vec::with_capacity(values.len());

    for value in values {
        let wall = match value {
            Value::Timestamp(ts) => Some(ts.naive_local()),
            Value::NaiveTimestamp(naive) => Some(*naive),
            Value::Null => None,
            other => {
                return Err(PipelineError::ColumnType {
                    column: timestamp_column.to_string(),
                    expected: "timestamp",
                    found: other.type_name().to_string(),
                })
            }
        };

        match wall {
            Some(ts) => {
                date.push(Value::Date(ts.date()));
                year.push(Value::Int(i64::from(ts.year())));
                month.push(Value::Text(format!("{:04}-{:02}", ts.year(), ts.month())));
                dow.push(Value::Text(ts.format("%A").to_string()));
                hour.push(Value::Int(i64::from(ts.hour())));
            }
            None => {
                date.push(Value::Null);
                year.push(Value::Null);
                month.push(Value::Null);
                dow.push(Value::Null);
                hour.push(Value::Null);
            }
        }
    }

    table
        .with_column(constants::DATE, date)?
        .with_column(constants::YEAR, year)?
        .with_column(constants::MONTH, month)?
        .with_column(constants::DAY_OF_WEEK, dow)?
        .with_column(constants::HOUR, hour)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts_table(cells: &[Value]) -> Table {
        Table::from_rows(&["created_at"], cells.iter().map(|c| vec![c.clone()]).collect()).unwrap()
    }

    #[test]
    fn test_parse_datetime_formats_and_failures() {
        let table = ts_table(&[
            Value::text("2024-01-01T00:00:00Z"),
            Value::text("2024-03-05 14:30:00"),
            Value::text("2024-03-05T23:30:00+02:00"),
            Value::text("2024-03-05"),
            Value::text("not a date"),
            Value::text(""),
            Value::Null,
        ]);

        let parsed = parse_datetime(&table, "created_at", true).unwrap();
        let rendered: Vec<String> = parsed
            .values("created_at")
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            rendered,
            vec![
                "2024-01-01T00:00:00Z",
                "2024-03-05T14:30:00Z",
                "2024-03-05T21:30:00Z",
                "2024-03-05T00:00:00Z",
                "",
                "",
                "",
            ]
        );
    }

    #[test]
    fn test_parse_datetime_without_utc_keeps_naive_and_offsets() {
        let table = ts_table(&[
            Value::text("2024-03-05 14:30:00"),
            Value::text("2024-03-05T23:30:00+02:00"),
        ]);
        let parsed = parse_datetime(&table, "created_at", false).unwrap();
        assert!(matches!(parsed.get("created_at", 0), Some(Value::NaiveTimestamp(_))));
        let with_parts = add_time_parts(&parsed, "created_at").unwrap();
        // Wall-clock hour in the parsed offset
        assert_eq!(with_parts.get("hour", 1), Some(&Value::Int(23)));
    }

    #[test]
    fn test_parse_datetime_is_idempotent() {
        let table = ts_table(&[Value::text("2024-03-05T23:30:00+02:00")]);
        let once = parse_datetime(&table, "created_at", true).unwrap();
        let twice = parse_datetime(&once, "created_at", true).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_add_time_parts_derives_calendar_fields() {
        let table = ts_table(&[Value::text("2024-03-05T14:30:00Z"), Value::text("garbage")]);
        let out = TimeEnricher::default().enrich(&table).unwrap();

        assert_eq!(
            out.get("date", 0),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()))
        );
        assert_eq!(out.get("year", 0), Some(&Value::Int(2024)));
        assert_eq!(out.get("month", 0), Some(&Value::text("2024-03")));
        assert_eq!(out.get("dow", 0), Some(&Value::text("Tuesday")));
        assert_eq!(out.get("hour", 0), Some(&Value::Int(14)));

        for part in ["date", "year", "month", "dow", "hour"] {
            assert_eq!(out.get(part, 1), Some(&Value::Null), "{part} should propagate null");
        }
    }

    #[test]
    fn test_add_time_parts_rejects_unparsed_text() {
        let table = ts_table(&[Value::text("2024-03-05")]);
        let err = add_time_parts(&table, "created_at").unwrap_err();
        assert!(matches!(err, PipelineError::ColumnType { expected: "timestamp", .. }));
    }
}
