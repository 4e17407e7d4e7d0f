// Health Indicator ETL - Core Library
// Spreadsheet workbook → intermediate CSVs → relational store

pub mod error;       // Error taxonomy (sheet/row/cell vs. phase)
pub mod config;      // Run configuration
pub mod workbook;    // Typed grids over xlsx / csv
pub mod classifier;  // Indicator sheet detection
pub mod metadata;    // Title / subtitle / source
pub mod schema;      // Shape Layer - required columns, year columns
pub mod table;       // Indicator table parsing + numeric cleaning
pub mod entities;    // Regions, municipalities, indicators
pub mod db;          // SQLite store + audit trail
pub mod geography;   // Region mapping + municipality resolution
pub mod import;      // Transactional import phases
pub mod pipeline;    // Orchestrator

// Re-export commonly used types
pub use error::{EtlError, Phase};
pub use config::EtlConfig;
pub use workbook::{Cell, Grid, Workbook};
pub use classifier::{IndicatorSheet, SheetClassifier};
pub use metadata::{IndicatorMetadata, MetadataExtractor};
pub use schema::{ColumnMap, SheetSchema, ValidationError, ValidationResult};
pub use table::{clean_numeric, IndicatorRow, IndicatorTable, IndicatorTableParser};
pub use entities::{
    HealthRegion, MacroRegion,
    Municipality, MunicipalityIndex, RegistryRow,
    Indicator, IndicatorValue,
};
pub use db::{
    Event, MunicipalityValue, TableCounts,
    setup_database, table_counts, list_indicators, get_indicator,
    values_for_year, value_range, indicator_series, get_events_for_run,
};
pub use geography::{GeographyResolver, GeographyStats, RegionMapping};
pub use import::{PhaseReport, UpsertEngine};
pub use pipeline::{Pipeline, RunOutcome, RunReport, SheetFailure};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
