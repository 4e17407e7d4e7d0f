// 🏙️ Municipality entity + the two IBGE code spaces
//
// Registry codes have 7 digits (last one is a check digit): 2927408
// Indicator sheets use the first 6: 292740
//
// The persisted Municipality always keeps the full 7-digit code. Only lookups
// against sheet data use the truncated form.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::EtlError;
use crate::table::coerce_code;
use crate::workbook::Cell;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Municipality {
    pub id: i64,
    pub ibge_code: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// None when the truncated code matched no health region
    pub health_region_id: Option<i64>,
}

/// Registry code without its check digit: "2927408" → "292740"
pub fn lookup_key(ibge_code: &str) -> &str {
    match ibge_code.char_indices().last() {
        Some((i, _)) => &ibge_code[..i],
        None => ibge_code,
    }
}

// ============================================================================
// REGISTRY FILE
// ============================================================================

/// One line of the canonical municipality registry
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RegistryRow {
    #[serde(rename = "codigo_ibge")]
    pub ibge_code: String,

    #[serde(rename = "nome")]
    pub name: String,

    pub latitude: f64,
    pub longitude: f64,
}

impl RegistryRow {
    /// Full code as an integer string ("2927408.0" → "2927408")
    pub fn normalized_code(&self) -> Result<String, EtlError> {
        coerce_code(&Cell::Text(self.ibge_code.clone()))
    }
}

pub fn load_registry(path: &Path) -> Result<Vec<RegistryRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open municipality registry: {}", path.display()))?;

    let mut rows = Vec::new();
    for (line_num, result) in reader.deserialize().enumerate() {
        let row: RegistryRow = result.with_context(|| {
            format!("Failed to parse registry line {} in {}", line_num + 2, path.display())
        })?;
        rows.push(row);
    }
    Ok(rows)
}

// ============================================================================
// PREFIX INDEX
// ============================================================================

/// In-memory code → id map with "starts with" lookup
#[derive(Debug, Clone, Default)]
pub struct MunicipalityIndex {
    by_code: BTreeMap<String, i64>,
}

impl MunicipalityIndex {
    pub fn new() -> Self {
        MunicipalityIndex::default()
    }

    pub fn insert(&mut self, ibge_code: String, id: i64) {
        self.by_code.insert(ibge_code, id);
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// The single municipality whose code starts with `code`.
    ///
    /// No match, or more than one, is UnresolvedMunicipality.
    pub fn find_by_prefix(&self, code: &str) -> Result<i64, EtlError> {
        if code.is_empty() {
            return Err(EtlError::UnresolvedMunicipality {
                code: code.to_string(),
                matches: 0,
            });
        }

        let matches: Vec<i64> = self
            .by_code
            .range(code.to_string()..)
            .take_while(|(candidate, _)| candidate.starts_with(code))
            .map(|(_, id)| *id)
            .take(2)
            .collect();

        match matches.as_slice() {
            [id] => Ok(*id),
            _ => Err(EtlError::UnresolvedMunicipality {
                code: code.to_string(),
                matches: matches.len(),
            }),
        }
    }
}

impl FromIterator<(String, i64)> for MunicipalityIndex {
    fn from_iter<T: IntoIterator<Item = (String, i64)>>(iter: T) -> Self {
        MunicipalityIndex {
            by_code: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_key_drops_check_digit() {
        assert_eq!(lookup_key("2927408"), "292740");
        assert_eq!(lookup_key("2"), "");
        assert_eq!(lookup_key(""), "");
    }

    #[test]
    fn test_prefix_lookup() {
        let index: MunicipalityIndex = vec![
            ("2927408".to_string(), 1),
            ("2913606".to_string(), 2),
            ("2927409".to_string(), 3),
        ]
        .into_iter()
        .collect();

        assert_eq!(index.find_by_prefix("291360").unwrap(), 2);
        assert_eq!(index.find_by_prefix("2913606").unwrap(), 2);

        // two registry codes share the prefix: ambiguous
        match index.find_by_prefix("292740") {
            Err(EtlError::UnresolvedMunicipality { matches, .. }) => assert_eq!(matches, 2),
            other => panic!("expected ambiguity, got {:?}", other),
        }

        match index.find_by_prefix("999999") {
            Err(EtlError::UnresolvedMunicipality { matches, .. }) => assert_eq!(matches, 0),
            other => panic!("expected no match, got {:?}", other),
        }

        assert!(index.find_by_prefix("").is_err());
    }

    #[test]
    fn test_load_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("municipios.csv");
        std::fs::write(
            &path,
            "codigo_ibge,nome,latitude,longitude\n2927408,Salvador,-12.9718,-38.5011\n2913606, Ilhéus ,-14.793,-39.046\n",
        )
        .unwrap();

        let rows = load_registry(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].normalized_code().unwrap(), "2927408");
        assert_eq!(rows[1].name, "Ilhéus");
        assert_eq!(rows[0].latitude, -12.9718);
    }
}
