// 🏷️ Metadata Extractor - title / subtitle / source of each indicator sheet
//
// Layout of an indicator sheet:
//   A1  title
//   A2  subtitle (usually the "Meta Estadual" text)
//   ... table ...
//   last rows: footnotes, one of them "Fonte: ..."

use anyhow::{Context, Result};
use csv::{QuoteStyle, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::classifier::IndicatorSheet;
use crate::error::EtlError;
use crate::workbook::{Cell, Grid};

/// One row of the aggregate metadata file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorMetadata {
    #[serde(rename = "nome_arquivo")]
    pub file_key: String,

    #[serde(rename = "titulo")]
    pub title: String,

    #[serde(rename = "subtitulo")]
    pub subtitle: Option<String>,

    #[serde(rename = "fonte")]
    pub source: Option<String>,
}

pub struct MetadataExtractor {
    /// Trailing rows of column A searched for the source footnote
    pub source_scan_rows: usize,
}

impl MetadataExtractor {
    pub fn new(source_scan_rows: usize) -> Self {
        MetadataExtractor { source_scan_rows }
    }

    /// Pure read of the fixed header cells and the trailing footnotes
    pub fn extract(&self, sheet: &IndicatorSheet, grid: &Grid) -> Result<IndicatorMetadata, EtlError> {
        if grid.row_count() < 2 {
            return Err(EtlError::malformed(
                &sheet.sheet_name,
                format!("expected title and subtitle rows, found {} row(s)", grid.row_count()),
            ));
        }

        let title = grid
            .cell(0, 0)
            .as_trimmed()
            .ok_or_else(|| EtlError::malformed(&sheet.sheet_name, "title cell A1 is empty"))?;

        Ok(IndicatorMetadata {
            file_key: sheet.file_key.clone(),
            title,
            subtitle: grid.cell(1, 0).as_trimmed(),
            source: self.extract_source(grid),
        })
    }

    /// Bottom-up scan of column A; first text cell containing "fonte:" wins
    pub fn extract_source(&self, grid: &Grid) -> Option<String> {
        let rows = grid.row_count();
        let window = self.source_scan_rows.min(rows);

        (rows - window..rows).rev().find_map(|row| match grid.cell(row, 0) {
            Cell::Text(text) if text.to_lowercase().contains("fonte:") => {
                Some(text.trim().to_string())
            }
            _ => None,
        })
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        MetadataExtractor::new(10)
    }
}

// ============================================================================
// METADATA CSV
// ============================================================================

pub fn write_metadata_csv(path: &Path, rows: &[IndicatorMetadata]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_path(path)
        .with_context(|| format!("Failed to create metadata file: {}", path.display()))?;

    if rows.is_empty() {
        // keep the header so the import phase still sees a well-formed file
        writer.write_record(["nome_arquivo", "titulo", "subtitulo", "fonte"])?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_metadata_csv(path: &Path) -> Result<Vec<IndicatorMetadata>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open metadata file: {}", path.display()))?;

    let mut rows = Vec::new();
    for (line_num, result) in reader.deserialize().enumerate() {
        let row: IndicatorMetadata = result.with_context(|| {
            format!("Failed to parse metadata line {} in {}", line_num + 2, path.display())
        })?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::SheetClassifier;

    fn sheet(name: &str) -> IndicatorSheet {
        SheetClassifier::classify(vec![name]).remove(0)
    }

    fn indicator_grid() -> Grid {
        Grid::from_strings(&[
            vec!["Proporção de nascidos vivos", ""],
            vec!["Meta Estadual: 95%", ""],
            vec!["Macrorregião de Saúde", "Região de Saúde"],
            vec!["Leste", "Salvador"],
            vec!["NOTAS: dados preliminares", ""],
            vec!["  Fonte: SINASC/SESAB  ", ""],
            vec!["", ""],
        ])
    }

    #[test]
    fn test_extract_metadata() {
        let extractor = MetadataExtractor::default();
        let meta = extractor.extract(&sheet("Indicador 3"), &indicator_grid()).unwrap();

        assert_eq!(meta.file_key, "indicador_3");
        assert_eq!(meta.title, "Proporção de nascidos vivos");
        assert_eq!(meta.subtitle.as_deref(), Some("Meta Estadual: 95%"));
        assert_eq!(meta.source.as_deref(), Some("Fonte: SINASC/SESAB"));
    }

    #[test]
    fn test_source_is_case_insensitive() {
        let grid = Grid::from_strings(&[vec!["T"], vec!["S"], vec!["FONTE: DataSUS"]]);
        let extractor = MetadataExtractor::default();
        assert_eq!(extractor.extract_source(&grid).as_deref(), Some("FONTE: DataSUS"));
    }

    #[test]
    fn test_source_outside_window_is_absent() {
        let mut rows = vec![vec!["T".to_string()], vec!["Fonte: antiga".to_string()]];
        for i in 0..10 {
            rows.push(vec![format!("linha {}", i)]);
        }
        let grid = Grid::from_strings(&rows);

        assert_eq!(MetadataExtractor::new(10).extract_source(&grid), None);
        assert_eq!(
            MetadataExtractor::new(12).extract_source(&grid).as_deref(),
            Some("Fonte: antiga")
        );
    }

    #[test]
    fn test_single_row_sheet_is_malformed() {
        let grid = Grid::from_strings(&[vec!["Só o título"]]);
        let err = MetadataExtractor::default()
            .extract(&sheet("Indicador 9"), &grid)
            .unwrap_err();
        assert!(matches!(err, EtlError::MalformedSheet { .. }));
    }

    #[test]
    fn test_empty_title_is_malformed() {
        let grid = Grid::from_strings(&[vec![""], vec!["Meta"]]);
        let err = MetadataExtractor::default()
            .extract(&sheet("Indicador 9"), &grid)
            .unwrap_err();
        assert!(matches!(err, EtlError::MalformedSheet { .. }));
    }

    #[test]
    fn test_metadata_csv_round_trip_keeps_absent_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("titulo_subtitulo.csv");
        let rows = vec![IndicatorMetadata {
            file_key: "indicador_5".to_string(),
            title: "Cobertura vacinal, \"pentavalente\"".to_string(),
            subtitle: None,
            source: Some("Fonte: SI-PNI".to_string()),
        }];

        write_metadata_csv(&path, &rows).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("\"nome_arquivo\",\"titulo\",\"subtitulo\",\"fonte\""));

        assert_eq!(read_metadata_csv(&path).unwrap(), rows);
    }
}
