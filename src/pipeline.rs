// 🚚 ETL Orchestrator - one workbook, start to finish
//
//   Start → ExtractMetadata → PersistMetadataCSV
//         → {per sheet: Parse → PersistIndicatorCSV}
//         → ImportGeography → ImportIndicators → ImportValues → Done
//
// Sheet failures skip the sheet. A phase failure ends the run (Aborted).

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::classifier::{IndicatorSheet, SheetClassifier};
use crate::config::EtlConfig;
use crate::db::{self, Event};
use crate::error::EtlError;
use crate::import::{PhaseReport, UpsertEngine, PHASE_ORDER};
use crate::metadata::{write_metadata_csv, MetadataExtractor};
use crate::table::IndicatorTableParser;
use crate::workbook::{Grid, Workbook};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every sheet exported, every phase committed
    Completed,
    /// Phases committed, but some sheets were skipped
    Partial,
    /// An import phase failed and was rolled back
    Aborted,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Partial => 1,
            RunOutcome::Aborted => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetFailure {
    pub sheet: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub workbook: Option<String>,
    /// SHA-256 of the workbook file
    pub fingerprint: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub sheets_found: usize,
    /// File keys whose intermediate CSV was written
    pub sheets_exported: Vec<String>,
    pub skipped_sheets: Vec<SheetFailure>,
    pub phases: Vec<PhaseReport>,
    pub failure: Option<String>,
    pub outcome: RunOutcome,
}

impl RunReport {
    fn new(workbook: Option<String>, fingerprint: Option<String>) -> Self {
        RunReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            workbook,
            fingerprint,
            started_at: Utc::now(),
            finished_at: None,
            sheets_found: 0,
            sheets_exported: Vec::new(),
            skipped_sheets: Vec::new(),
            phases: Vec::new(),
            failure: None,
            outcome: RunOutcome::Completed,
        }
    }
}

/// Hex SHA-256 of the raw file bytes
pub fn file_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Audit writes happen outside phase transactions; a failed insert is logged, not fatal
fn record(conn: &Connection, report: &RunReport, event_type: &str, subject: &str, data: serde_json::Value) {
    let event = Event::new(&report.run_id, event_type, subject, data);
    if let Err(err) = db::insert_event(conn, &event) {
        warn!("Failed to record {} event: {:#}", event_type, err);
    }
}

pub struct Pipeline {
    config: EtlConfig,
}

impl Pipeline {
    pub fn new(config: EtlConfig) -> Self {
        Pipeline { config }
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    /// Read the workbook file once, fingerprint it, then process it
    pub fn run(&self, workbook_path: &Path, conn: &mut Connection) -> Result<RunReport, EtlError> {
        let bytes = std::fs::read(workbook_path).map_err(|e| {
            EtlError::io(format!("Failed to read workbook {}", workbook_path.display()), e.into())
        })?;
        let fingerprint = file_fingerprint(&bytes);

        let workbook = Workbook::from_bytes(bytes).map_err(|e| {
            EtlError::io(format!("Failed to load workbook {}", workbook_path.display()), e)
        })?;

        self.execute(
            &workbook,
            Some(workbook_path.display().to_string()),
            Some(fingerprint),
            conn,
        )
    }

    /// Process an in-memory workbook
    pub fn run_workbook(&self, workbook: &Workbook, conn: &mut Connection) -> Result<RunReport, EtlError> {
        self.execute(workbook, None, None, conn)
    }

    fn execute(
        &self,
        workbook: &Workbook,
        name: Option<String>,
        fingerprint: Option<String>,
        conn: &mut Connection,
    ) -> Result<RunReport, EtlError> {
        let mut report = RunReport::new(name, fingerprint);
        info!("Run {} started", report.run_id);
        record(
            conn,
            &report,
            "run_started",
            report.workbook.as_deref().unwrap_or("<memory>"),
            serde_json::json!({ "fingerprint": report.fingerprint }),
        );

        self.export(workbook, conn, &mut report)?;
        self.import(conn, &mut report);

        if report.outcome != RunOutcome::Aborted && !report.skipped_sheets.is_empty() {
            report.outcome = RunOutcome::Partial;
        }
        report.finished_at = Some(Utc::now());

        record(
            conn,
            &report,
            "run_finished",
            &report.run_id,
            serde_json::json!({
                "outcome": report.outcome,
                "sheets_exported": report.sheets_exported.len(),
                "sheets_skipped": report.skipped_sheets.len(),
            }),
        );
        info!("Run {} finished: {:?}", report.run_id, report.outcome);
        Ok(report)
    }

    fn skip_sheet(&self, conn: &Connection, report: &mut RunReport, sheet: &IndicatorSheet, err: EtlError) {
        warn!("Sheet '{}' skipped: {}", sheet.sheet_name, err);

        // a CSV left by an earlier run must not stand in for this sheet
        let stale = self.config.indicator_csv_path(&sheet.file_key);
        if stale.exists() {
            if let Err(remove_err) = std::fs::remove_file(&stale) {
                warn!("Failed to remove stale {}: {}", stale.display(), remove_err);
            }
        }

        let failure = SheetFailure {
            sheet: sheet.sheet_name.clone(),
            reason: err.to_string(),
        };
        record(
            conn,
            report,
            "sheet_skipped",
            &failure.sheet,
            serde_json::json!({ "reason": failure.reason }),
        );
        report.skipped_sheets.push(failure);
    }

    /// Extraction stage: metadata CSV plus one CSV per parseable sheet
    fn export(&self, workbook: &Workbook, conn: &Connection, report: &mut RunReport) -> Result<(), EtlError> {
        for dir in [&self.config.data_dir, &self.config.indicators_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                EtlError::io(format!("Failed to create directory {}", dir.display()), e.into())
            })?;
        }

        let sheets = SheetClassifier::classify(workbook.sheet_names());
        report.sheets_found = sheets.len();
        info!("Found {} indicator sheets", sheets.len());

        let extractor = MetadataExtractor::new(self.config.source_scan_rows);
        let mut metadata = Vec::new();
        let mut extracted: Vec<(&IndicatorSheet, &Grid)> = Vec::new();

        for sheet in &sheets {
            let Some(grid) = workbook.sheet(&sheet.sheet_name) else {
                continue;
            };
            match extractor.extract(sheet, grid) {
                Ok(meta) => {
                    metadata.push(meta);
                    extracted.push((sheet, grid));
                }
                Err(err) => self.skip_sheet(conn, report, sheet, err),
            }
        }

        let metadata_path = self.config.metadata_path();
        write_metadata_csv(&metadata_path, &metadata)
            .map_err(|e| EtlError::io("Failed to write metadata file", e))?;
        info!("Wrote {} metadata rows to {}", metadata.len(), metadata_path.display());

        let parser = IndicatorTableParser::new(self.config.header_row);
        for (sheet, grid) in extracted {
            match parser.parse(&sheet.sheet_name, grid) {
                Ok(table) => {
                    let path = self.config.indicator_csv_path(&sheet.file_key);
                    table.write_csv(&path).map_err(|e| {
                        EtlError::io(format!("Failed to write {}", path.display()), e)
                    })?;
                    info!("{}: {} rows → {}", sheet.sheet_name, table.rows.len(), path.display());
                    report.sheets_exported.push(sheet.file_key.clone());
                }
                Err(err) => self.skip_sheet(conn, report, sheet, err),
            }
        }
        Ok(())
    }

    /// Import stage: the three phases in order, stopping at the first failure
    fn import(&self, conn: &mut Connection, report: &mut RunReport) {
        let engine = UpsertEngine::new(&self.config).with_sheets(report.sheets_exported.iter().cloned());

        for phase in PHASE_ORDER {
            match engine.import_phase(conn, phase) {
                Ok(phase_report) => {
                    let data = serde_json::to_value(&phase_report).unwrap_or_default();
                    record(conn, report, "phase_committed", phase.name(), data);
                    report.phases.push(phase_report);
                }
                Err(err) => {
                    error!("Run aborted: {}", err);
                    record(
                        conn,
                        report,
                        "phase_failed",
                        phase.name(),
                        serde_json::json!({ "error": err.to_string() }),
                    );
                    report.failure = Some(err.to_string());
                    report.outcome = RunOutcome::Aborted;
                    return;
                }
            }
        }
    }
}
