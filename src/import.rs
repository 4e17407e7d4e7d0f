// 💾 Relational Upsert Engine - three all-or-nothing import phases
//
//   geography (regions + municipalities) → indicators → values
//
// Each phase is one transaction. Expected row conditions (duplicate key,
// unresolved municipality) skip the row; anything else rolls the phase back.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::classifier::is_indicator_key;
use crate::config::EtlConfig;
use crate::db;
use crate::entities::municipality::load_registry;
use crate::error::{EtlError, Phase};
use crate::geography::GeographyResolver;
use crate::metadata::read_metadata_csv;
use crate::table::IndicatorTableParser;

/// Values need municipalities and indicators to exist
pub const PHASE_ORDER: [Phase; 3] = [Phase::Geography, Phase::Indicators, Phase::Values];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    /// Rows inserted
    pub created: usize,
    /// Rows skipped because they already existed
    pub existing: usize,
    /// Rows whose geography / municipality could not be resolved
    pub unresolved: usize,
    /// Files or rows skipped as malformed or orphaned
    pub skipped: usize,
}

impl PhaseReport {
    pub fn new(phase: Phase) -> Self {
        PhaseReport {
            phase,
            created: 0,
            existing: 0,
            unresolved: 0,
            skipped: 0,
        }
    }
}

/// Run `work` inside one transaction; commit on Ok, roll back on Err
pub fn run_phase<F>(conn: &mut Connection, phase: Phase, work: F) -> Result<PhaseReport, EtlError>
where
    F: FnOnce(&Connection) -> Result<PhaseReport>,
{
    info!("Importing {}...", phase);

    let outcome = conn
        .transaction()
        .context("Failed to begin transaction")
        .and_then(|tx| {
            let report = work(&tx)?;
            tx.commit().context("Failed to commit transaction")?;
            Ok(report)
        });

    match outcome {
        Ok(report) => {
            if report.existing > 0 {
                warn!(
                    "{}: {} rows already present, existing data kept",
                    phase, report.existing
                );
            }
            info!(
                "{} committed: {} created, {} existing, {} unresolved, {} skipped",
                phase, report.created, report.existing, report.unresolved, report.skipped
            );
            Ok(report)
        }
        Err(err) => {
            // the transaction was dropped without commit, which rolls it back
            error!("{} import failed, rolled back: {:#}", phase, err);
            Err(EtlError::phase_failure(phase, err))
        }
    }
}

/// Indicator CSVs in `dir`, as (file key, path), sorted by key
pub fn indicator_csv_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list indicator directory: {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if is_indicator_key(stem) {
            files.push((stem.to_string(), path.clone()));
        }
    }

    files.sort();
    Ok(files)
}

/// A recoverable error wrapped in anyhow (e.g. MalformedSheet from a CSV)
fn recoverable(err: &anyhow::Error) -> Option<&EtlError> {
    err.downcast_ref::<EtlError>().filter(|e| e.is_recoverable())
}

pub struct UpsertEngine<'a> {
    config: &'a EtlConfig,
    /// File keys exported by the current run; None reads every indicator CSV
    sheets: Option<BTreeSet<String>>,
}

impl<'a> UpsertEngine<'a> {
    pub fn new(config: &'a EtlConfig) -> Self {
        UpsertEngine { config, sheets: None }
    }

    /// Restrict geography and value import to these file keys
    pub fn with_sheets<I, S>(mut self, file_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sheets = Some(file_keys.into_iter().map(Into::into).collect());
        self
    }

    /// Indicator CSVs this engine may read, sorted by key
    fn csv_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let files = indicator_csv_files(&self.config.indicators_dir)?;
        Ok(match &self.sheets {
            Some(keys) => files.into_iter().filter(|(key, _)| keys.contains(key)).collect(),
            None => files,
        })
    }

    /// Run all three phases in their fixed order; the first failure stops the rest
    pub fn import_all(&self, conn: &mut Connection) -> Result<Vec<PhaseReport>, EtlError> {
        PHASE_ORDER
            .iter()
            .map(|phase| self.import_phase(conn, *phase))
            .collect()
    }

    pub fn import_phase(&self, conn: &mut Connection, phase: Phase) -> Result<PhaseReport, EtlError> {
        match phase {
            Phase::Geography => self.import_geography(conn),
            Phase::Indicators => self.import_indicators(conn),
            Phase::Values => self.import_values(conn),
        }
    }

    /// Canonical sheet CSV, or the first indicator CSV when it is missing
    fn canonical_csv(&self) -> Result<PathBuf> {
        let files = self.csv_files()?;
        if let Some((_, path)) = files.iter().find(|(key, _)| *key == self.config.canonical_sheet) {
            return Ok(path.clone());
        }

        let (key, path) = files
            .into_iter()
            .next()
            .context("No indicator CSV available to build the region mapping")?;
        warn!(
            "Canonical sheet {} not found, using {} for geography",
            self.config.canonical_sheet, key
        );
        Ok(path)
    }

    pub fn import_geography(&self, conn: &mut Connection) -> Result<PhaseReport, EtlError> {
        run_phase(conn, Phase::Geography, |tx| {
            let table = IndicatorTableParser::load_csv(&self.canonical_csv()?)?;
            let registry = load_registry(&self.config.registry_path())?;

            let mut resolver = GeographyResolver::new(tx);
            let mapping = resolver.build_region_mapping(&table)?;
            resolver.resolve_municipalities(&registry, &mapping)?;

            let stats = resolver.stats();
            info!(
                "geography: {} macro-regions and {} regions created, {} codes mapped",
                stats.macro_regions_created,
                stats.health_regions_created,
                mapping.len()
            );

            Ok(PhaseReport {
                created: stats.municipalities_created,
                existing: stats.municipalities_existing,
                unresolved: stats.unresolved,
                skipped: stats.incomplete_rows,
                ..PhaseReport::new(Phase::Geography)
            })
        })
    }

    pub fn import_indicators(&self, conn: &mut Connection) -> Result<PhaseReport, EtlError> {
        run_phase(conn, Phase::Indicators, |tx| {
            let rows = read_metadata_csv(&self.config.metadata_path())?;
            let mut report = PhaseReport::new(Phase::Indicators);

            for meta in &rows {
                match db::create_indicator(tx, meta)? {
                    Ok(_) => report.created += 1,
                    Err(dup) => {
                        debug!("{}", dup);
                        report.existing += 1;
                    }
                }
            }
            Ok(report)
        })
    }

    pub fn import_values(&self, conn: &mut Connection) -> Result<PhaseReport, EtlError> {
        let years = self.config.years();

        run_phase(conn, Phase::Values, |tx| {
            let municipalities = db::load_municipality_index(tx)?;
            let indicators = db::indicator_ids(tx)?;
            let mut report = PhaseReport::new(Phase::Values);

            for (key, path) in self.csv_files()? {
                let Some(&indicator_id) = indicators.get(&key) else {
                    warn!("Indicator not found for {}, file skipped", path.display());
                    report.skipped += 1;
                    continue;
                };

                let table = match IndicatorTableParser::load_csv(&path) {
                    Ok(table) => table,
                    Err(err) => match recoverable(&err) {
                        Some(etl_err) => {
                            warn!("{}", etl_err);
                            report.skipped += 1;
                            continue;
                        }
                        None => return Err(err),
                    },
                };

                for row in &table.rows {
                    let municipality_id = match municipalities.find_by_prefix(&row.ibge_code) {
                        Ok(id) => id,
                        Err(err) => {
                            warn!("{}: {}", key, err);
                            report.unresolved += 1;
                            continue;
                        }
                    };

                    for (year, value) in table.values_in(row, &years) {
                        match db::create_indicator_value(tx, municipality_id, indicator_id, year, value)? {
                            Ok(_) => report.created += 1,
                            Err(dup) => {
                                debug!("{}", dup);
                                report.existing += 1;
                            }
                        }
                    }
                }
            }
            Ok(report)
        })
    }
}
