use crate::error::{ConversionError, Field, NormalizeFailure};
use crate::structs::{
    AttributeValue, Dimension, GroupSummary, PartialTable, RawRecord, RawTable, Record,
    SummaryStats, Table,
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::debug;
use rayon::prelude::*;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

lazy_static! {
    /// Warehouse labels as published by the devices, e.g. `Warehouse_12`.
    static ref WAREHOUSE_LABEL: Regex = Regex::new(r"Warehouse_(\d+)").unwrap();
    /// Plain or scientific decimal literal; excludes `inf` and `NaN`.
    static ref DECIMAL_LITERAL: Regex =
        Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").unwrap();
}

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Converts raw records into typed records.
///
/// `time` is read as (possibly fractional) seconds since the Unix epoch and
/// becomes a UTC timestamp. `value` is parsed as an exact decimal and then
/// turned into the nearest `f64` through its decimal string, so `"23.50"`
/// becomes exactly `23.5`.
///
/// # Arguments
///
/// * `table` - Raw records in load order
///
/// # Returns
///
/// Returns the normalized records in the same order.
///
/// # Errors
///
/// Returns `NormalizeFailure` on the first row whose `time` or `value` is
/// missing or unparseable. The failure carries the rows converted so far and
/// the remaining raw rows, starting with the offending one.
pub fn normalize(table: RawTable) -> Result<Table, NormalizeFailure> {
    let mut converted = Vec::with_capacity(table.len());
    let mut rows = table.into_iter().enumerate();

    while let Some((row, raw)) = rows.next() {
        match normalize_record(row, &raw) {
            Ok(record) => converted.push(record),
            Err(error) => {
                debug!("Normalization stopped at row {}: {}", row, error);
                let mut pending = vec![raw];
                pending.extend(rows.map(|(_, r)| r));
                return Err(NormalizeFailure {
                    error,
                    partial: PartialTable { converted, pending },
                });
            }
        }
    }

    debug!("Normalized {} records", converted.len());
    Ok(converted)
}

fn normalize_record(row: usize, raw: &RawRecord) -> Result<Record, ConversionError> {
    Ok(Record {
        time: parse_time(row, raw.time.as_ref())?,
        value: parse_value(row, raw.value.as_ref())?,
        sensor_type: raw.sensor_type.clone(),
        location: raw.location.clone(),
        device_id: raw.device_id.clone(),
    })
}

fn raw_text(field: Field, row: usize, raw: Option<&AttributeValue>) -> Result<&str, ConversionError> {
    match raw {
        Some(value) => value.as_text().ok_or_else(|| ConversionError {
            field,
            row,
            raw: value.type_name().to_string(),
            message: format!("expected a number or string, found {}", value.type_name()),
        }),
        None => Err(ConversionError {
            field,
            row,
            raw: String::new(),
            message: "attribute is missing".to_string(),
        }),
    }
}

fn parse_decimal(field: Field, row: usize, text: &str) -> Result<Decimal, ConversionError> {
    let trimmed = text.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| ConversionError {
            field,
            row,
            raw: text.to_string(),
            message: e.to_string(),
        })
}

fn parse_time(row: usize, raw: Option<&AttributeValue>) -> Result<DateTime<Utc>, ConversionError> {
    let text = raw_text(Field::Time, row, raw)?;
    let seconds = parse_decimal(Field::Time, row, text)?;
    let out_of_range = || ConversionError {
        field: Field::Time,
        row,
        raw: text.to_string(),
        message: "timestamp out of range".to_string(),
    };

    let whole = seconds.floor();
    let secs = whole.to_i64().ok_or_else(out_of_range)?;
    let nanos = ((seconds - whole) * Decimal::from(NANOS_PER_SECOND))
        .trunc()
        .to_u32()
        .ok_or_else(out_of_range)?;
    DateTime::from_timestamp(secs, nanos).ok_or_else(out_of_range)
}

fn parse_value(row: usize, raw: Option<&AttributeValue>) -> Result<f64, ConversionError> {
    let text = raw_text(Field::Value, row, raw)?;
    let trimmed = text.trim();
    let conversion_error = |message: String| ConversionError {
        field: Field::Value,
        row,
        raw: text.to_string(),
        message,
    };

    let parsed = match Decimal::from_str_exact(trimmed).or_else(|_| Decimal::from_scientific(trimmed)) {
        Ok(decimal) => decimal.normalize().to_string().parse::<f64>().ok(),
        // Outside the exact decimal range; f64 parsing rounds correctly.
        Err(e) if DECIMAL_LITERAL.is_match(trimmed) => {
            debug!("Row {} value {:?} exceeds exact decimal range: {}", row, text, e);
            trimmed.parse::<f64>().ok()
        }
        Err(e) => return Err(conversion_error(e.to_string())),
    };

    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| conversion_error("not representable as a finite number".to_string()))
}

/// Renders the timestamp as decimal seconds since the epoch (`"100"`, `"-1.5"`).
pub fn epoch_seconds_text(time: &DateTime<Utc>) -> String {
    let seconds = Decimal::from(time.timestamp())
        + Decimal::new(i64::from(time.timestamp_subsec_nanos()), 9);
    seconds.normalize().to_string()
}

impl From<&Record> for RawRecord {
    fn from(record: &Record) -> Self {
        RawRecord {
            time: Some(AttributeValue::N(epoch_seconds_text(&record.time))),
            value: Some(AttributeValue::N(record.value.to_string())),
            sensor_type: record.sensor_type.clone(),
            location: record.location.clone(),
            device_id: record.device_id.clone(),
        }
    }
}

/// Accepted values for each tag column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub sensor_types: BTreeSet<String>,
    pub locations: BTreeSet<String>,
    pub devices: BTreeSet<String>,
}

impl Selection {
    pub fn new<I, J, K>(sensor_types: I, locations: J, devices: K) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        J: IntoIterator,
        J::Item: Into<String>,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        Self {
            sensor_types: sensor_types.into_iter().map(Into::into).collect(),
            locations: locations.into_iter().map(Into::into).collect(),
            devices: devices.into_iter().map(Into::into).collect(),
        }
    }

    /// Every distinct value present in `table`, i.e. "all selected".
    pub fn universe(table: &[Record]) -> Self {
        Self {
            sensor_types: distinct_values(table, Dimension::SensorType),
            locations: distinct_values(table, Dimension::Location),
            devices: distinct_values(table, Dimension::DeviceId),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.sensor_types.contains(&record.sensor_type)
            && self.locations.contains(&record.location)
            && self.devices.contains(&record.device_id)
    }
}

/// Sorted distinct values of one tag column.
pub fn distinct_values(table: &[Record], dimension: Dimension) -> BTreeSet<String> {
    table
        .iter()
        .map(|r| dimension.value_of(r).to_string())
        .collect()
}

/// Keeps the records whose sensor type, location and device are all selected.
///
/// An empty result is a valid outcome.
pub fn filter(table: &[Record], selection: &Selection) -> Table {
    let kept: Table = table
        .iter()
        .filter(|r| selection.matches(r))
        .cloned()
        .collect();
    debug!("Filter kept {} of {} records", kept.len(), table.len());
    kept
}

/// Shortens warehouse labels: `Warehouse_7` becomes `WH_7`. Other text is
/// left untouched.
pub fn rewrite_location_label(label: &str) -> Cow<'_, str> {
    WAREHOUSE_LABEL.replace_all(label, "WH_${1}")
}

/// Computes descriptive statistics of the `value` column.
///
/// # Returns
///
/// Returns a `SummaryStats` with count, mean, sample standard deviation
/// (N-1 denominator), min, max, quartiles and the covered time span. An empty
/// table yields all-zero statistics and no time span.
pub fn summarize(table: &[Record]) -> SummaryStats {
    if table.is_empty() {
        return SummaryStats::default();
    }

    let mut values: Vec<f64> = table.iter().map(|r| r.value).collect();
    values.sort_by(f64::total_cmp);

    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let std_dev = if count > 1 {
        let variance =
            values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };

    SummaryStats {
        count,
        mean,
        std_dev,
        min: values[0],
        percentile_25: percentile_sorted(&values, 25.0),
        median: percentile_sorted(&values, 50.0),
        percentile_75: percentile_sorted(&values, 75.0),
        max: values[count - 1],
        first_time: table.iter().map(|r| r.time).min(),
        last_time: table.iter().map(|r| r.time).max(),
    }
}

/// Computes [`summarize`] for every distinct value of `dimension`.
///
/// Groups are summarized in parallel and returned sorted by key.
pub fn summarize_by_group(table: &[Record], dimension: Dimension) -> Vec<GroupSummary> {
    let mut groups: HashMap<&str, Vec<Record>> = HashMap::new();
    for record in table {
        groups
            .entry(dimension.value_of(record))
            .or_default()
            .push(record.clone());
    }

    let mut summaries: Vec<GroupSummary> = groups
        .into_par_iter()
        .map(|(key, records)| GroupSummary {
            key: key.to_string(),
            stats: summarize(&records),
        })
        .collect();

    summaries.sort_by(|a, b| a.key.cmp(&b.key));
    summaries
}

/// Percentile of already-sorted data using linear interpolation between
/// closest ranks. Returns 0.0 for empty data.
fn percentile_sorted(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let weight = index - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}
