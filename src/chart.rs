use crate::structs::{Dimension, Record};
use crate::transform::rewrite_location_label;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// How records are laid out on the scatter chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartOptions {
    pub title: String,
    /// Splits points into colored series.
    pub color: Option<Dimension>,
    pub facet_row: Option<Dimension>,
    pub facet_col: Option<Dimension>,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            title: "IoT Sensor Data by Sensor Type and Location".to_string(),
            color: Some(Dimension::DeviceId),
            facet_row: Some(Dimension::Location),
            facet_col: Some(Dimension::SensorType),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub color: Option<Dimension>,
    pub facet_row: Option<Dimension>,
    pub facet_col: Option<Dimension>,
    pub facets: Vec<Facet>,
}

/// One sub-plot of the facet grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Facet {
    pub row: Option<String>,
    pub col: Option<String>,
    pub series: Vec<Series>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: Option<String>,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub time: DateTime<Utc>,
    pub value: f64,
}

fn label(dimension: Option<Dimension>, record: &Record) -> Option<String> {
    dimension.map(|d| match d {
        Dimension::Location => rewrite_location_label(&record.location).into_owned(),
        other => other.value_of(record).to_string(),
    })
}

/// Builds a time/value scatter chart from `table`.
///
/// Facets are ordered by (row, column) label and series by name; points
/// inside a series are sorted by time. Location labels are shortened with
/// [`rewrite_location_label`].
pub fn build_chart(table: &[Record], options: &ChartOptions) -> ChartSpec {
    type FacetKey = (Option<String>, Option<String>);
    let mut grid: BTreeMap<FacetKey, BTreeMap<Option<String>, Vec<Point>>> = BTreeMap::new();

    for record in table {
        let facet = (
            label(options.facet_row, record),
            label(options.facet_col, record),
        );
        grid.entry(facet)
            .or_default()
            .entry(label(options.color, record))
            .or_default()
            .push(Point {
                time: record.time,
                value: record.value,
            });
    }

    let facets = grid
        .into_iter()
        .map(|((row, col), series)| Facet {
            row,
            col,
            series: series
                .into_iter()
                .map(|(name, mut points)| {
                    points.sort_by_key(|p| p.time);
                    Series { name, points }
                })
                .collect(),
        })
        .collect();

    ChartSpec {
        title: options.title.clone(),
        x_label: "Time".to_string(),
        y_label: "Sensor Value".to_string(),
        color: options.color,
        facet_row: options.facet_row,
        facet_col: options.facet_col,
        facets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(time: i64, sensor: &str, location: &str, device: &str) -> Record {
        Record {
            time: DateTime::from_timestamp(time, 0).unwrap(),
            value: time as f64,
            sensor_type: sensor.to_string(),
            location: location.to_string(),
            device_id: device.to_string(),
        }
    }

    #[test]
    fn default_layout_facets_by_location_and_sensor() {
        let table = vec![
            record(3, "temp", "Warehouse_1", "d1"),
            record(1, "temp", "Warehouse_1", "d1"),
            record(2, "temp", "Warehouse_1", "d2"),
            record(4, "Pressure", "Warehouse_2", "d3"),
        ];
        let chart = build_chart(&table, &ChartOptions::default());

        assert_eq!(chart.facets.len(), 2);
        let first = &chart.facets[0];
        assert_eq!(first.row.as_deref(), Some("WH_1"));
        assert_eq!(first.col.as_deref(), Some("temp"));
        assert_eq!(first.series.len(), 2);
        assert_eq!(first.series[0].name.as_deref(), Some("d1"));
        let times: Vec<_> = first.series[0]
            .points
            .iter()
            .map(|p| p.time.timestamp())
            .collect();
        assert_eq!(times, [1, 3]);
        assert_eq!(chart.facets[1].row.as_deref(), Some("WH_2"));
    }

    #[test]
    fn plain_chart_has_single_series() {
        let table = vec![
            record(2, "temp", "Warehouse_1", "d1"),
            record(1, "Pressure", "Zone_9", "d2"),
        ];
        let options = ChartOptions {
            title: "IoT Sensor Value Over Time".to_string(),
            color: None,
            facet_row: None,
            facet_col: None,
        };
        let chart = build_chart(&table, &options);
        assert_eq!(chart.facets.len(), 1);
        assert_eq!(chart.facets[0].series.len(), 1);
        assert_eq!(chart.facets[0].series[0].points.len(), 2);
        assert_eq!(chart.facets[0].series[0].points[0].value, 1.0);
    }

    #[test]
    fn empty_table_has_no_facets() {
        let chart = build_chart(&[], &ChartOptions::default());
        assert!(chart.facets.is_empty());
        assert_eq!(chart.y_label, "Sensor Value");
    }
}
