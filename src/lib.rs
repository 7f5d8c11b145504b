pub mod chart;
pub mod dashboard;
pub mod error;
pub mod load;
pub mod secrets;
pub mod simulate;
pub mod store;
pub mod structs;
pub mod transform;

// Re-export public API
pub use chart::{ChartOptions, ChartSpec, build_chart};
pub use dashboard::{
    DashboardSettings, RenderFailure, RenderOutcome, RenderReport, SelectionRequest,
    render_cycle,
};
pub use error::{ConversionError, Field, NormalizeFailure, PipelineError, Result};
pub use load::{SummaryReport, write_chart, write_csv, write_json, write_parquet, write_summary};
pub use secrets::{
    CertBundle, CertField, FileSecretSource, SecretSource, decode_cert_bundle, fetch_cert_bundle,
};
pub use simulate::{SimulationConfig, simulate_items};
pub use store::{FileStore, MemoryStore, ScanPage, ScanStore, load_all_records, write_table_export};
pub use structs::{
    AttributeValue, Dimension, Item, PartialTable, RawRecord, Record, SimpleLogger, StoreConfig,
    SummaryStats,
};
pub use transform::{
    Selection, filter, normalize, rewrite_location_label, summarize, summarize_by_group,
};
