use crate::chart::{ChartOptions, build_chart};
use crate::error::{PipelineError, Result};
use crate::load::{
    SummaryReport, write_chart, write_csv, write_json, write_parquet, write_summary,
};
use crate::store::{ScanStore, load_all_records};
use crate::structs::{Dimension, PartialTable, Record};
use crate::transform::{Selection, filter, normalize, summarize, summarize_by_group};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

/// Requested filter values; `None` selects every value present in the data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionRequest {
    pub sensor_types: Option<BTreeSet<String>>,
    pub locations: Option<BTreeSet<String>>,
    pub devices: Option<BTreeSet<String>>,
}

impl SelectionRequest {
    pub fn resolve(&self, table: &[Record]) -> Selection {
        let universe = Selection::universe(table);
        Selection {
            sensor_types: self.sensor_types.clone().unwrap_or(universe.sensor_types),
            locations: self.locations.clone().unwrap_or(universe.locations),
            devices: self.devices.clone().unwrap_or(universe.devices),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DashboardSettings {
    pub table_name: String,
    pub selection: SelectionRequest,
    pub chart: ChartOptions,
    pub output_dir: PathBuf,
}

/// Files written by a successful render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderReport {
    pub loaded: usize,
    pub rendered: usize,
    pub files: Vec<PathBuf>,
}

/// How a render cycle ended when nothing went wrong.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Rendered(RenderReport),
    /// The store returned no records.
    EmptyResult,
    /// Records were loaded but the selection excluded all of them.
    NoMatch { loaded: usize },
}

/// A render cycle that stopped on an error.
///
/// `partial` is set when normalization failed and holds the table as it was
/// at that point.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RenderFailure {
    #[source]
    pub error: PipelineError,
    pub partial: Option<PartialTable>,
}

impl From<PipelineError> for RenderFailure {
    fn from(error: PipelineError) -> Self {
        Self {
            error,
            partial: None,
        }
    }
}

/// Runs one render cycle: connect, load every page, normalize, filter and
/// write the table, chart and summary into `settings.output_dir`.
///
/// Nothing is written unless every earlier step succeeded.
///
/// # Errors
///
/// Returns `RenderFailure` if the store cannot be reached or scanned, an
/// item is malformed, a row fails to normalize (with the partial table), or
/// an output file cannot be written.
pub fn render_cycle<S, F>(
    connect: F,
    settings: &DashboardSettings,
) -> std::result::Result<RenderOutcome, RenderFailure>
where
    S: ScanStore,
    F: FnOnce() -> Result<S>,
{
    let cycle_start = Instant::now();
    let store = connect()?;

    let raw = load_all_records(&store, &settings.table_name)?;
    if raw.is_empty() {
        warn!("No data found in table '{}'", settings.table_name);
        return Ok(RenderOutcome::EmptyResult);
    }
    let loaded = raw.len();

    let table = normalize(raw).map_err(|failure| RenderFailure {
        error: PipelineError::Conversion(failure.error),
        partial: Some(failure.partial),
    })?;

    let selection = settings.selection.resolve(&table);
    let filtered = filter(&table, &selection);
    if filtered.is_empty() {
        warn!("No data matches the selected filters ({} records loaded)", loaded);
        return Ok(RenderOutcome::NoMatch { loaded });
    }

    let files = write_outputs(&filtered, settings)?;
    info!(
        "Rendered {} of {} records in {:.2?}",
        filtered.len(),
        loaded,
        cycle_start.elapsed()
    );

    Ok(RenderOutcome::Rendered(RenderReport {
        loaded,
        rendered: filtered.len(),
        files,
    }))
}

fn write_outputs(records: &[Record], settings: &DashboardSettings) -> Result<Vec<PathBuf>> {
    let dir = &settings.output_dir;
    fs::create_dir_all(dir)?;

    let csv_path = dir.join("data.csv");
    let json_path = dir.join("data.json");
    let parquet_path = dir.join("data.parquet");
    let chart_path = dir.join("chart.json");
    let summary_path = dir.join("summary.json");

    write_csv(records, &csv_path)?;
    write_json(records, &json_path)?;
    write_parquet(records, &parquet_path)?;
    debug!("Wrote table to {}", dir.display());

    let chart = build_chart(records, &settings.chart);
    write_chart(&chart, &chart_path)?;
    debug!("Chart has {} facet(s)", chart.facets.len());

    let summary = SummaryReport {
        overall: summarize(records),
        by_sensor_type: summarize_by_group(records, Dimension::SensorType),
        by_location: summarize_by_group(records, Dimension::Location),
        by_device: summarize_by_group(records, Dimension::DeviceId),
    };
    write_summary(&summary, &summary_path)?;

    Ok(vec![csv_path, json_path, parquet_path, chart_path, summary_path])
}
