use chrono::{DateTime, Utc};
use log::{Log, Metadata, Record as LogRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{PipelineError, Result};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_TABLE: &str = "ioTDataTimeSeries";
pub const DEFAULT_PAGE_SIZE: usize = 100;

pub const TIME_FIELD: &str = "time";
/// Older devices publish the timestamp under a capitalized key.
pub const LEGACY_TIME_FIELD: &str = "Time";
pub const VALUE_FIELD: &str = "value";
pub const SENSOR_TYPE_FIELD: &str = "sensor_type";
pub const LOCATION_FIELD: &str = "location";
pub const DEVICE_ID_FIELD: &str = "device_id";

/// Simple logger implementation
///
/// Writes to stderr so that stdout stays reserved for command output.
pub struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &LogRecord) {
        eprintln!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// A single attribute of a store item, in the store's JSON wire format
/// (`{"S": "temp"}`, `{"N": "23.50"}`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    L(Vec<AttributeValue>),
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Textual payload of string and number attributes.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) | AttributeValue::N(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null(_) => "NULL",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
        }
    }
}

/// Raw store item: attribute name to attribute value.
pub type Item = BTreeMap<String, AttributeValue>;

/// Sensor reading as fetched from the store, before normalization.
///
/// Tag fields are required; `time` and `value` stay in their raw form until
/// `normalize` converts them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRecord {
    pub time: Option<AttributeValue>,
    pub value: Option<AttributeValue>,
    pub sensor_type: String,
    pub location: String,
    pub device_id: String,
}

impl RawRecord {
    /// Parses a store item, failing on a missing or non-string tag field.
    pub fn from_item(index: usize, item: &Item) -> Result<Self> {
        let tag = |name: &str| -> Result<String> {
            match item.get(name) {
                Some(AttributeValue::S(s)) => Ok(s.clone()),
                Some(other) => Err(PipelineError::MalformedItem {
                    index,
                    message: format!(
                        "attribute '{}' must be a string, found {}",
                        name,
                        other.type_name()
                    ),
                }),
                None => Err(PipelineError::MalformedItem {
                    index,
                    message: format!("missing attribute '{}'", name),
                }),
            }
        };

        Ok(Self {
            time: item
                .get(TIME_FIELD)
                .or_else(|| item.get(LEGACY_TIME_FIELD))
                .cloned(),
            value: item.get(VALUE_FIELD).cloned(),
            sensor_type: tag(SENSOR_TYPE_FIELD)?,
            location: tag(LOCATION_FIELD)?,
            device_id: tag(DEVICE_ID_FIELD)?,
        })
    }
}

/// Normalized sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub time: DateTime<Utc>,
    pub value: f64,
    pub sensor_type: String,
    pub location: String,
    pub device_id: String,
}

pub type RawTable = Vec<RawRecord>;
pub type Table = Vec<Record>;

/// Table state captured when normalization stops on a bad row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartialTable {
    pub converted: Table,
    pub pending: RawTable,
}

/// Connection settings for the scan store.
///
/// Defaults to [`DEFAULT_REGION`] and [`DEFAULT_TABLE`]; the CLI overrides
/// them from `AWS_REGION` and `DYNAMODB_TABLE`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub region: String,
    pub table_name: String,
    /// Root directory of the local table exports.
    pub data_dir: PathBuf,
    /// Maximum number of items returned by one scan call.
    pub page_size: usize,
    /// Attributes identifying an item; they form the continuation token.
    pub key_attributes: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            table_name: DEFAULT_TABLE.to_string(),
            data_dir: PathBuf::from("data"),
            page_size: DEFAULT_PAGE_SIZE,
            key_attributes: vec![DEVICE_ID_FIELD.to_string(), TIME_FIELD.to_string()],
        }
    }
}

/// Categorical column of a record, used for filters, chart colors and facets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    SensorType,
    Location,
    DeviceId,
}

impl Dimension {
    pub fn value_of<'a>(&self, record: &'a Record) -> &'a str {
        match self {
            Dimension::SensorType => &record.sensor_type,
            Dimension::Location => &record.location,
            Dimension::DeviceId => &record.device_id,
        }
    }
}

/// Descriptive statistics over the `value` column
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub percentile_25: f64,
    pub median: f64,
    pub percentile_75: f64,
    pub max: f64,
    pub first_time: Option<DateTime<Utc>>,
    pub last_time: Option<DateTime<Utc>>,
}

/// Statistics for one distinct value of a [`Dimension`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub key: String,
    pub stats: SummaryStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn attribute_values_use_wire_format() {
        let json = r#"{"device_id":{"S":"d1"},"value":{"N":"23.50"},"ok":{"BOOL":true}}"#;
        let parsed: Item = serde_json::from_str(json).unwrap();
        assert_eq!(parsed["device_id"], AttributeValue::S("d1".into()));
        assert_eq!(parsed["value"], AttributeValue::N("23.50".into()));
        assert_eq!(parsed["ok"], AttributeValue::Bool(true));
    }

    #[test]
    fn raw_record_accepts_legacy_time_key() {
        let it = item(&[
            ("Time", AttributeValue::N("100".into())),
            ("value", AttributeValue::S("1.1".into())),
            ("sensor_type", AttributeValue::S("temp".into())),
            ("location", AttributeValue::S("Warehouse_1".into())),
            ("device_id", AttributeValue::S("d1".into())),
        ]);
        let raw = RawRecord::from_item(0, &it).unwrap();
        assert_eq!(raw.time, Some(AttributeValue::N("100".into())));
        assert_eq!(raw.device_id, "d1");
    }

    #[test]
    fn raw_record_rejects_missing_tag() {
        let it = item(&[
            ("time", AttributeValue::N("100".into())),
            ("value", AttributeValue::N("1.1".into())),
            ("sensor_type", AttributeValue::S("temp".into())),
            ("device_id", AttributeValue::S("d1".into())),
        ]);
        let err = RawRecord::from_item(3, &it).unwrap_err();
        match err {
            PipelineError::MalformedItem { index, message } => {
                assert_eq!(index, 3);
                assert!(message.contains("location"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn raw_record_rejects_numeric_tag() {
        let it = item(&[
            ("sensor_type", AttributeValue::S("temp".into())),
            ("location", AttributeValue::S("Warehouse_1".into())),
            ("device_id", AttributeValue::N("7".into())),
        ]);
        assert!(matches!(
            RawRecord::from_item(0, &it),
            Err(PipelineError::MalformedItem { .. })
        ));
    }

    #[test]
    fn logger_leaves_level_gating_to_max_level() {
        let metadata = Metadata::builder().level(log::Level::Trace).build();
        assert!(SimpleLogger.enabled(&metadata));
    }
}
