// ⚙️ Run configuration
// Every field has a default, so an empty JSON object is a valid config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    /// Where the metadata CSV and the municipality registry live
    pub data_dir: PathBuf,

    /// Where one intermediate CSV per indicator sheet is written
    pub indicators_dir: PathBuf,

    /// Aggregate metadata CSV (nome_arquivo, titulo, subtitulo, fonte)
    pub metadata_file: String,

    /// Canonical municipality registry (codigo_ibge, nome, latitude, longitude)
    pub registry_file: String,

    /// Zero-based row holding the column headers of an indicator sheet
    pub header_row: usize,

    /// Supported year range, inclusive on both ends
    pub first_year: u16,
    pub last_year: u16,

    /// How many trailing rows are scanned for the "Fonte:" footnote
    pub source_scan_rows: usize,

    /// File key of the sheet whose geography columns seed the region mapping
    pub canonical_sheet: String,
}

impl Default for EtlConfig {
    fn default() -> Self {
        EtlConfig {
            data_dir: PathBuf::from("assets/data"),
            indicators_dir: PathBuf::from("assets/indicadores"),
            metadata_file: "titulo_subtitulo.csv".to_string(),
            registry_file: "municipios.csv".to_string(),
            header_row: 2,
            first_year: 2010,
            last_year: 2020,
            source_scan_rows: 10,
            canonical_sheet: "indicador_3".to_string(),
        }
    }
}

impl EtlConfig {
    /// Load from a JSON file; missing fields fall back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: EtlConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.first_year > self.last_year {
            anyhow::bail!(
                "first_year ({}) is after last_year ({})",
                self.first_year,
                self.last_year
            );
        }
        Ok(())
    }

    pub fn years(&self) -> RangeInclusive<u16> {
        self.first_year..=self.last_year
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join(&self.metadata_file)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join(&self.registry_file)
    }

    pub fn indicator_csv_path(&self, file_key: &str) -> PathBuf {
        self.indicators_dir.join(format!("{}.csv", file_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EtlConfig::default();
        assert_eq!(config.header_row, 2);
        assert_eq!(config.years(), 2010..=2020);
        assert_eq!(
            config.indicator_csv_path("indicador_3"),
            PathBuf::from("assets/indicadores/indicador_3.csv")
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etl.json");
        std::fs::write(&path, r#"{ "data_dir": "/srv/data", "last_year": 2022 }"#).unwrap();

        let config = EtlConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/data"));
        assert_eq!(config.last_year, 2022);
        assert_eq!(config.first_year, 2010);
        assert_eq!(config.registry_path(), PathBuf::from("/srv/data/municipios.csv"));
    }

    #[test]
    fn test_inverted_year_range_rejected() {
        let config = EtlConfig {
            first_year: 2020,
            last_year: 2010,
            ..EtlConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
