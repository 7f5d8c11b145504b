use crate::chart::ChartSpec;
use crate::error::{PipelineError, Result};
use crate::structs::{GroupSummary, Record, SummaryStats};
use arrow_array::{Float64Array, RecordBatch, StringArray, TimestampNanosecondArray};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use chrono::SecondsFormat;
use csv::Writer;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::{fs::File, path::Path, sync::Arc};

/// Summary statistics written next to the chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub overall: SummaryStats,
    pub by_sensor_type: Vec<GroupSummary>,
    pub by_location: Vec<GroupSummary>,
    pub by_device: Vec<GroupSummary>,
}

/// Writes sensor records to a CSV file.
///
/// Timestamps are written as RFC 3339 UTC strings.
///
/// # Errors
/// Returns error if file cannot be created or written to.
pub fn write_csv(records: &[Record], output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    let mut writer = Writer::from_writer(file);

    writer.write_record(["Time", "value", "sensor_type", "location", "device_id"])?;

    for record in records {
        writer.write_record(&[
            record.time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            record.value.to_string(),
            record.sensor_type.clone(),
            record.location.clone(),
            record.device_id.clone(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes sensor records to a pretty-formatted JSON file.
///
/// # Errors
/// Returns error if file cannot be created or serialization fails.
pub fn write_json(records: &[Record], output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    serde_json::to_writer_pretty(file, records)?;
    Ok(())
}

/// Writes sensor records to a columnar Parquet file using Arrow format.
///
/// `time` is stored as a nanosecond UTC timestamp column.
///
/// # Errors
/// Returns error if file cannot be created, a timestamp falls outside the
/// nanosecond range, or Arrow operations fail.
pub fn write_parquet(records: &[Record], output_path: &Path) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new(
            "time",
            DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
            false,
        ),
        Field::new("value", DataType::Float64, false),
        Field::new("sensor_type", DataType::Utf8, false),
        Field::new("location", DataType::Utf8, false),
        Field::new("device_id", DataType::Utf8, false),
    ]));

    let nanos = records
        .iter()
        .map(|r| {
            r.time.timestamp_nanos_opt().ok_or_else(|| {
                PipelineError::Data(format!("timestamp {} out of Parquet range", r.time))
            })
        })
        .collect::<Result<Vec<i64>>>()?;
    let times = TimestampNanosecondArray::from(nanos).with_timezone("UTC");
    let values: Float64Array = records.iter().map(|r| r.value).collect();
    let sensor_types = StringArray::from_iter_values(records.iter().map(|r| r.sensor_type.as_str()));
    let locations = StringArray::from_iter_values(records.iter().map(|r| r.location.as_str()));
    let devices = StringArray::from_iter_values(records.iter().map(|r| r.device_id.as_str()));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(times),
            Arc::new(values),
            Arc::new(sensor_types),
            Arc::new(locations),
            Arc::new(devices),
        ],
    )?;

    let file = File::create(output_path)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

/// Writes the chart description as pretty JSON.
pub fn write_chart(chart: &ChartSpec, output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    serde_json::to_writer_pretty(file, chart)?;
    Ok(())
}

pub fn write_summary(summary: &SummaryReport, output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}
