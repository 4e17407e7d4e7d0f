// 📒 Workbook access - typed cells over calamine
// The whole workbook is loaded into memory; sheets are addressed by name.

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, Range, Reader, Sheets};
use std::io::{Cursor, Read, Seek};
use std::path::Path;

// ============================================================================
// CELL
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    /// Empty cells, and text cells holding only whitespace
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(n) => n.is_nan(),
            Cell::Bool(_) => false,
        }
    }

    /// Text rendering used for headers, names and CSV output.
    ///
    /// Whole numbers render without a fraction so a header typed as the
    /// number 2015 reads back as "2015".
    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => format_number(*n),
            Cell::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        }
    }

    /// Trimmed text, or None for empty cells
    pub fn as_trimmed(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let text = self.as_text();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => Cell::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        }
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// ============================================================================
// GRID
// ============================================================================

/// Raw untyped sheet. Row 0 / column 0 is always A1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    rows: Vec<Vec<Cell>>,
}

impl Grid {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Grid { rows }
    }

    /// Convenience for tests and CSV input: every non-empty string becomes a text cell
    pub fn from_strings<S: AsRef<str>>(rows: &[Vec<S>]) -> Self {
        let rows = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|value| {
                        let value = value.as_ref();
                        if value.is_empty() {
                            Cell::Empty
                        } else {
                            Cell::Text(value.to_string())
                        }
                    })
                    .collect()
            })
            .collect();
        Grid { rows }
    }

    /// Read a CSV file as a grid; the CSV header line becomes row 0
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

        let mut rows = Vec::new();
        for (line_num, result) in reader.records().enumerate() {
            let record = result.with_context(|| {
                format!("Failed to parse CSV line {} in {}", line_num + 1, path.display())
            })?;
            rows.push(record.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        }

        Ok(Grid::from_strings(&rows))
    }

    fn from_range(range: &Range<Data>) -> Self {
        // calamine ranges start at the first used cell, not at A1
        let (row_offset, col_offset) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));

        let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row_offset];
        for row in range.rows() {
            let mut cells = vec![Cell::Empty; col_offset];
            cells.extend(row.iter().map(Cell::from));
            rows.push(cells);
        }
        Grid { rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, index: usize) -> Option<&[Cell]> {
        self.rows.get(index).map(|r| r.as_slice())
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.rows.iter().map(|r| r.as_slice())
    }

    /// Out-of-bounds positions read as empty, like a spreadsheet
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        static EMPTY: Cell = Cell::Empty;
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }
}

// ============================================================================
// WORKBOOK
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Workbook {
    sheets: Vec<(String, Grid)>,
}

impl Workbook {
    /// Open an xls / xlsx / xlsb / ods file and load every sheet
    pub fn open(path: &Path) -> Result<Self> {
        let workbook = open_workbook_auto(path)
            .with_context(|| format!("Failed to open workbook: {}", path.display()))?;
        Self::load(workbook)
    }

    /// Same as `open`, for a file already read into memory
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
            .context("Failed to open workbook from memory")?;
        Self::load(workbook)
    }

    fn load<RS: Read + Seek>(mut workbook: Sheets<RS>) -> Result<Self> {
        let names = workbook.sheet_names().to_vec();
        let mut sheets = Vec::with_capacity(names.len());
        for name in names {
            let range = workbook
                .worksheet_range(&name)
                .with_context(|| format!("Failed to read sheet: {}", name))?;
            sheets.push((name, Grid::from_range(&range)));
        }

        Ok(Workbook { sheets })
    }

    pub fn from_sheets(sheets: Vec<(String, Grid)>) -> Self {
        Workbook { sheets }
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn sheet(&self, name: &str) -> Option<&Grid> {
        self.sheets
            .iter()
            .find(|(sheet_name, _)| sheet_name == name)
            .map(|(_, grid)| grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_text_rendering() {
        assert_eq!(Cell::Number(2015.0).as_text(), "2015");
        assert_eq!(Cell::Number(45.3).as_text(), "45.3");
        assert_eq!(Cell::Number(292740.0).as_text(), "292740");
        assert_eq!(Cell::Text("  Fonte: SIM ".to_string()).as_trimmed(), Some("Fonte: SIM".to_string()));
        assert_eq!(Cell::Text("   ".to_string()).as_trimmed(), None);
        assert!(Cell::Empty.is_empty());
        assert!(Cell::Number(f64::NAN).is_empty());
    }

    #[test]
    fn test_grid_out_of_bounds_reads_empty() {
        let grid = Grid::from_strings(&[vec!["a", "b"], vec!["c"]]);
        assert_eq!(grid.cell(0, 1), &Cell::Text("b".to_string()));
        assert_eq!(grid.cell(1, 1), &Cell::Empty);
        assert_eq!(grid.cell(9, 9), &Cell::Empty);
        assert_eq!(grid.row_count(), 2);
    }

    #[test]
    fn test_grid_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indicador_3.csv");
        std::fs::write(&path, "Cod. IBGE,2015\n292740,\"45,3\"\n").unwrap();

        let grid = Grid::from_csv_path(&path).unwrap();
        assert_eq!(grid.row_count(), 2);
        assert_eq!(grid.cell(0, 0).as_text(), "Cod. IBGE");
        assert_eq!(grid.cell(1, 1).as_text(), "45,3");
    }

    #[test]
    fn test_open_xlsx_keeps_absolute_positions() {
        use rust_xlsxwriter::Workbook as XlsxWriter;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serie_historica.xlsx");

        let mut writer = XlsxWriter::new();
        let cover = writer.add_worksheet();
        cover.set_name("Capa").unwrap();
        cover.write_string(0, 0, "Série histórica").unwrap();

        let sheet = writer.add_worksheet();
        sheet.set_name("Indicador 3").unwrap();
        // nothing in row 0: the reader must still put row 1 at index 1
        sheet.write_string(1, 0, "Meta Estadual: 95%").unwrap();
        sheet.write_number(2, 1, 2015.0).unwrap();
        sheet.write_number(3, 1, 45.3).unwrap();
        writer.save(&path).unwrap();

        let workbook = Workbook::open(&path).unwrap();
        assert_eq!(workbook.sheet_names(), vec!["Capa", "Indicador 3"]);

        let grid = workbook.sheet("Indicador 3").unwrap();
        assert_eq!(grid.cell(0, 0), &Cell::Empty);
        assert_eq!(grid.cell(1, 0).as_text(), "Meta Estadual: 95%");
        assert_eq!(grid.cell(2, 1).as_text(), "2015");
        assert_eq!(grid.cell(3, 1), &Cell::Number(45.3));
    }

    #[test]
    fn test_from_bytes_matches_file_reader() {
        use rust_xlsxwriter::Workbook as XlsxWriter;

        let mut writer = XlsxWriter::new();
        let sheet = writer.add_worksheet();
        sheet.set_name("Indicador 4").unwrap();
        sheet.write_string(0, 0, "Cobertura vacinal").unwrap();
        sheet.write_number(3, 2, 292740.0).unwrap();
        let bytes = writer.save_to_buffer().unwrap();

        let workbook = Workbook::from_bytes(bytes).unwrap();
        assert_eq!(workbook.sheet_names(), vec!["Indicador 4"]);
        let grid = workbook.sheet("Indicador 4").unwrap();
        assert_eq!(grid.cell(0, 0).as_text(), "Cobertura vacinal");
        assert_eq!(grid.cell(3, 2).as_text(), "292740");

        assert!(Workbook::from_bytes(b"not a workbook".to_vec()).is_err());
    }
}
