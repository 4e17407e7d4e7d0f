// 📊 Indicator Table Parser - the tabular body of an indicator sheet
//
// Steps:
//   1. header row at a fixed offset, validated against SheetSchema
//   2. rows without a Cod. IBGE are dropped
//   3. codes coerced to integers (spreadsheet floats like 292740.0 truncated)
//   4. year columns cleaned to Option<f64>; bad cells become absent, never zero

use anyhow::{Context, Result};
use csv::WriterBuilder;
use log::{debug, warn};
use std::path::Path;

use crate::error::EtlError;
use crate::schema::{self, ColumnMap, SheetSchema, YearColumn, COL_IBGE_CODE};
use crate::workbook::{format_number, Cell, Grid};

// ============================================================================
// NUMERIC CLEANING
// ============================================================================

/// "12,5" → 12.5, "" → None, "abc" → None
pub fn clean_numeric_text(raw: &str) -> Option<f64> {
    let cleaned = raw.replace(',', ".");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Typed variant: tells an empty cell (Ok(None)) apart from a bad one (Err)
pub fn parse_numeric(cell: &Cell, column: &str) -> Result<Option<f64>, EtlError> {
    if cell.is_empty() {
        return Ok(None);
    }
    let parsed = match cell {
        Cell::Number(n) if n.is_finite() => Some(*n),
        Cell::Text(text) => clean_numeric_text(text),
        _ => None,
    };
    match parsed {
        Some(value) => Ok(Some(value)),
        None => Err(EtlError::UnparseableValue {
            column: column.to_string(),
            raw: cell.as_text(),
        }),
    }
}

/// Cell-level recovery: unparseable values are logged and read as absent
pub fn clean_numeric(cell: &Cell, column: &str) -> Option<f64> {
    match parse_numeric(cell, column) {
        Ok(value) => value,
        Err(err) => {
            warn!("{}", err);
            None
        }
    }
}

/// Largest code accepted: 7 digits, check digit included
const MAX_IBGE_CODE: f64 = 9_999_999.0;

/// Cod. IBGE as an integer string; decimal artifacts are truncated.
///
/// Negative values and anything longer than 7 digits are UnparseableValue.
pub fn coerce_code(cell: &Cell) -> Result<String, EtlError> {
    let unparseable = || EtlError::UnparseableValue {
        column: COL_IBGE_CODE.to_string(),
        raw: cell.as_text(),
    };

    let number = match cell {
        Cell::Number(n) if n.is_finite() => *n,
        Cell::Text(text) => {
            let text = text.trim();
            match text.parse::<i64>() {
                Ok(code) => code as f64,
                Err(_) => clean_numeric_text(text).ok_or_else(unparseable)?,
            }
        }
        _ => return Err(unparseable()),
    };

    let code = number.trunc();
    if !(0.0..=MAX_IBGE_CODE).contains(&code) {
        return Err(unparseable());
    }
    Ok((code as i64).to_string())
}

// ============================================================================
// TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRow {
    /// Truncated 6-digit code as written in the sheet
    pub ibge_code: String,
    pub macro_region: Option<String>,
    pub health_region: Option<String>,
    pub municipality: Option<String>,
    /// Cleaned values, aligned with `IndicatorTable::year_columns()`
    pub values: Vec<Option<f64>>,
    /// Normalized rendering of every column, for the intermediate CSV
    cells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorTable {
    /// Sheet name or CSV path, for log context
    pub name: String,
    pub headers: Vec<String>,
    pub columns: ColumnMap,
    pub rows: Vec<IndicatorRow>,
    /// Year cells that held something other than a number (read as absent)
    pub unparseable_cells: usize,
}

impl IndicatorTable {
    pub fn year_columns(&self) -> &[YearColumn] {
        &self.columns.years
    }

    /// Value of `row` for `year`, if the sheet has that year and the cell was valid
    pub fn value(&self, row: &IndicatorRow, year: u16) -> Option<f64> {
        self.columns
            .years
            .iter()
            .position(|c| c.year == year)
            .and_then(|i| row.values.get(i).copied().flatten())
    }

    /// Present values of `row` restricted to `years`
    pub fn values_in<'a>(
        &'a self,
        row: &'a IndicatorRow,
        years: &'a std::ops::RangeInclusive<u16>,
    ) -> impl Iterator<Item = (u16, f64)> + 'a {
        self.columns
            .years
            .iter()
            .zip(row.values.iter())
            .filter(move |(col, _)| years.contains(&col.year))
            .filter_map(|(col, value)| value.map(|v| (col.year, v)))
    }

    /// Materialize the parsed table as CSV (header line + normalized rows)
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = WriterBuilder::new()
            .from_path(path)
            .with_context(|| format!("Failed to create indicator file: {}", path.display()))?;

        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(&row.cells)?;
        }
        writer.flush()?;
        Ok(())
    }
}

// ============================================================================
// PARSER
// ============================================================================

pub struct IndicatorTableParser {
    header_row: usize,
    schema: SheetSchema,
}

impl IndicatorTableParser {
    pub fn new(header_row: usize) -> Self {
        IndicatorTableParser {
            header_row,
            schema: SheetSchema::new(),
        }
    }

    /// Parse a sheet body. MalformedSheet if the header row or a required column is missing.
    pub fn parse(&self, name: &str, grid: &Grid) -> Result<IndicatorTable, EtlError> {
        let header_cells = grid.row(self.header_row).ok_or_else(|| {
            EtlError::malformed(name, format!("no header row at index {}", self.header_row))
        })?;
        let headers: Vec<String> = header_cells.iter().map(|c| c.as_text().trim().to_string()).collect();

        let columns = self
            .schema
            .validate(name, &headers)
            .map_err(|errors| EtlError::malformed(name, schema::describe(&errors)))?;

        let mut rows = Vec::new();
        let mut dropped_empty = 0;
        let mut unparseable_cells = 0;
        for row_index in (self.header_row + 1)..grid.row_count() {
            let code_cell = grid.cell(row_index, columns.ibge_code);
            if code_cell.is_empty() {
                dropped_empty += 1;
                continue;
            }

            let ibge_code = match coerce_code(code_cell) {
                Ok(code) => code,
                Err(err) => {
                    warn!("{}: row {} dropped: {}", name, row_index + 1, err);
                    continue;
                }
            };

            rows.push(self.build_row(grid, row_index, &headers, &columns, ibge_code, &mut unparseable_cells));
        }

        debug!(
            "{}: {} rows parsed, {} rows without Cod. IBGE dropped",
            name,
            rows.len(),
            dropped_empty
        );
        if unparseable_cells > 0 {
            warn!("{}: {} non-numeric year cells read as absent", name, unparseable_cells);
        }

        Ok(IndicatorTable {
            name: name.to_string(),
            headers,
            columns,
            rows,
            unparseable_cells,
        })
    }

    fn build_row(
        &self,
        grid: &Grid,
        row_index: usize,
        headers: &[String],
        columns: &ColumnMap,
        ibge_code: String,
        unparseable_cells: &mut usize,
    ) -> IndicatorRow {
        let values: Vec<Option<f64>> = columns
            .years
            .iter()
            .map(|col| match parse_numeric(grid.cell(row_index, col.index), &col.header) {
                Ok(value) => value,
                Err(err) => {
                    debug!("row {}: {}", row_index + 1, err);
                    *unparseable_cells += 1;
                    None
                }
            })
            .collect();

        let cells = (0..headers.len())
            .map(|col| {
                if col == columns.ibge_code {
                    return ibge_code.clone();
                }
                if let Some(i) = columns.years.iter().position(|y| y.index == col) {
                    return values[i].map(format_number).unwrap_or_default();
                }
                grid.cell(row_index, col).as_text()
            })
            .collect();

        IndicatorRow {
            macro_region: grid.cell(row_index, columns.macro_region).as_trimmed(),
            health_region: grid.cell(row_index, columns.health_region).as_trimmed(),
            municipality: grid.cell(row_index, columns.municipality).as_trimmed(),
            ibge_code,
            values,
            cells,
        }
    }

    /// Re-read an intermediate CSV; its header is the first line
    pub fn load_csv(path: &Path) -> Result<IndicatorTable> {
        let grid = Grid::from_csv_path(path)?;
        let table = IndicatorTableParser::new(0).parse(&path.display().to_string(), &grid)?;
        Ok(table)
    }
}
