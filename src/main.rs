use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, error, info};
use sensorboard::secrets::DEFAULT_SECRET_ID;
use sensorboard::structs::{DEFAULT_PAGE_SIZE, DEFAULT_REGION, DEFAULT_TABLE};
use sensorboard::{
    CertField, ChartOptions, DashboardSettings, Dimension, FileSecretSource, FileStore,
    PipelineError, RenderFailure, RenderOutcome, SelectionRequest, SimpleLogger,
    SimulationConfig, StoreConfig, fetch_cert_bundle, render_cycle, simulate_items,
    write_table_export,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

static LOGGER: SimpleLogger = SimpleLogger;

#[derive(Parser, Debug)]
#[command(author, version, about = "IoT sensor dashboard pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level for output
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load, normalize and filter sensor records, then write table, chart and summary
    Dashboard(DashboardArgs),
    /// Fetch the device certificate secret and print one decoded field
    CheckSecret(SecretArgs),
    /// Generate synthetic sensor readings as a table export
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Root directory of the table exports (laid out as <dir>/<region>/<table>.json)
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[arg(long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    region: String,

    #[arg(long, env = "DYNAMODB_TABLE", default_value = DEFAULT_TABLE)]
    table: String,
}

/// Chart dimension, or `none` to disable it
#[derive(Debug, Clone, Copy, ValueEnum)]
enum DimensionChoice {
    SensorType,
    Location,
    DeviceId,
    None,
}

impl DimensionChoice {
    fn into_dimension(self) -> Option<Dimension> {
        match self {
            DimensionChoice::SensorType => Some(Dimension::SensorType),
            DimensionChoice::Location => Some(Dimension::Location),
            DimensionChoice::DeviceId => Some(Dimension::DeviceId),
            DimensionChoice::None => None,
        }
    }
}

#[derive(Args, Debug)]
struct DashboardArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Maximum number of items per scan page
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Output directory for data, chart and summary files
    #[arg(short, long, default_value = "output/dashboard")]
    output: PathBuf,

    /// Sensor types to keep (e.g. Temperature,Pressure). If not specified, keeps all.
    #[arg(long, value_delimiter = ',')]
    sensor_type: Vec<String>,

    /// Locations to keep. If not specified, keeps all.
    #[arg(long, value_delimiter = ',')]
    location: Vec<String>,

    /// Device ids to keep. If not specified, keeps all.
    #[arg(long, value_delimiter = ',')]
    device: Vec<String>,

    #[arg(long, value_enum, default_value = "device-id")]
    color: DimensionChoice,

    #[arg(long, value_enum, default_value = "location")]
    facet_row: DimensionChoice,

    #[arg(long, value_enum, default_value = "sensor-type")]
    facet_col: DimensionChoice,

    /// Chart title
    #[arg(long)]
    title: Option<String>,

    /// Re-render every N seconds instead of running a single cycle
    #[arg(long)]
    refresh: Option<u64>,
}

#[derive(Args, Debug)]
struct SecretArgs {
    /// Directory holding secrets as <dir>/<secret id>.json
    #[arg(long, default_value = "secrets")]
    secrets_dir: PathBuf,

    #[arg(long, env = "SECRET_NAME", default_value = DEFAULT_SECRET_ID)]
    secret_id: String,

    #[arg(long, value_enum, default_value = "ca")]
    field: CertField,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Number of readings to generate
    #[arg(short, long, default_value_t = 100)]
    count: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Epoch seconds of the first reading
    #[arg(long, default_value_t = 1_700_000_000)]
    start: i64,

    /// Seconds between readings
    #[arg(long, default_value_t = 4)]
    interval: i64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if log::set_logger(&LOGGER).is_ok() {
        if cli.debug {
            log::set_max_level(log::LevelFilter::Debug);
        } else {
            log::set_max_level(log::LevelFilter::Info);
        }
    }

    match cli.command {
        Command::Dashboard(args) => run_dashboard(args),
        Command::CheckSecret(args) => run_check_secret(args),
        Command::Simulate(args) => run_simulate(args),
    }
}

fn selection_set(values: Vec<String>) -> Option<BTreeSet<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.into_iter().collect())
    }
}

fn run_dashboard(args: DashboardArgs) -> ExitCode {
    let config = StoreConfig {
        region: args.store.region,
        table_name: args.store.table,
        data_dir: args.store.data_dir,
        page_size: args.page_size,
        ..StoreConfig::default()
    };
    let defaults = ChartOptions::default();
    let settings = DashboardSettings {
        table_name: config.table_name.clone(),
        selection: SelectionRequest {
            sensor_types: selection_set(args.sensor_type),
            locations: selection_set(args.location),
            devices: selection_set(args.device),
        },
        chart: ChartOptions {
            title: args.title.unwrap_or(defaults.title),
            color: args.color.into_dimension(),
            facet_row: args.facet_row.into_dimension(),
            facet_col: args.facet_col.into_dimension(),
        },
        output_dir: args.output,
    };
    debug!(
        "Dashboard for '{}' in {} | page size {} | output {}",
        config.table_name,
        config.region,
        config.page_size,
        settings.output_dir.display()
    );

    loop {
        let cycle_start = Instant::now();
        let ok = match render_cycle(|| FileStore::connect(&config), &settings) {
            Ok(RenderOutcome::Rendered(report)) => {
                println!(
                    "Rendered {} of {} records to {}",
                    report.rendered,
                    report.loaded,
                    settings.output_dir.display()
                );
                for file in &report.files {
                    debug!("  - {}", file.display());
                }
                true
            }
            Ok(RenderOutcome::EmptyResult) => {
                println!("No data found in table '{}'.", config.table_name);
                true
            }
            Ok(RenderOutcome::NoMatch { loaded }) => {
                println!("No data matches the selected filters ({} records loaded).", loaded);
                true
            }
            Err(failure) => {
                report_failure(&failure);
                false
            }
        };
        debug!("Render cycle took {:.2?}", cycle_start.elapsed());

        match args.refresh {
            Some(secs) => {
                info!("Next render in {}s", secs);
                thread::sleep(Duration::from_secs(secs));
            }
            None => return if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE },
        }
    }
}

fn report_failure(failure: &RenderFailure) {
    match &failure.error {
        PipelineError::StoreConnection(_) | PipelineError::Conversion(_) => {
            error!("{}", failure.error)
        }
        other => error!("A general error occurred: {}", other),
    }

    if let Some(partial) = &failure.partial {
        eprintln!(
            "Table before the conversion error ({} converted, {} pending):",
            partial.converted.len(),
            partial.pending.len()
        );
        for record in &partial.converted {
            eprintln!(
                "  {} {} {} {} {}",
                record.time, record.value, record.sensor_type, record.location, record.device_id
            );
        }
        for raw in &partial.pending {
            match serde_json::to_string(raw) {
                Ok(line) => eprintln!("  {}", line),
                Err(e) => eprintln!("  <unprintable row: {}>", e),
            }
        }
    }
}

fn run_check_secret(args: SecretArgs) -> ExitCode {
    let source = FileSecretSource::new(&args.secrets_dir);
    match fetch_cert_bundle(&source, &args.secret_id) {
        Ok(bundle) => {
            println!("{}", bundle.field(args.field));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_simulate(args: SimulateArgs) -> ExitCode {
    let config = SimulationConfig {
        count: args.count,
        seed: args.seed,
        start: args.start,
        interval_secs: args.interval,
    };
    let items = simulate_items(&config);
    let path = args
        .store
        .data_dir
        .join(&args.store.region)
        .join(format!("{}.json", args.store.table));

    match write_table_export(&items, &path) {
        Ok(()) => {
            println!("Wrote {} readings to {}", items.len(), path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
