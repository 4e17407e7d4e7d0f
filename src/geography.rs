// 🧭 Geography Resolver - health regions for registry municipalities
//
// 1. One canonical indicator table → (macro-region, region) per truncated code,
//    get-or-create for both.
// 2. Registry rows: drop the check digit to look the region up, but persist
//    the municipality under its full 7-digit code.

use anyhow::Result;
use log::{debug, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db;
use crate::entities::{lookup_key, normalize_name, RegistryRow};
use crate::error::EtlError;
use crate::table::IndicatorTable;

/// Truncated 6-digit code → health region id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionMapping {
    by_code: HashMap<String, i64>,
}

impl RegionMapping {
    pub fn get(&self, truncated_code: &str) -> Option<i64> {
        self.by_code.get(truncated_code).copied()
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeographyStats {
    pub macro_regions_created: usize,
    pub health_regions_created: usize,
    pub municipalities_created: usize,
    /// Registry codes already in the store (existing row kept)
    pub municipalities_existing: usize,
    /// Municipalities created without a health region
    pub unresolved: usize,
    /// Table rows lacking a macro-region or region name
    pub incomplete_rows: usize,
}

pub struct GeographyResolver<'c> {
    conn: &'c Connection,
    stats: GeographyStats,
}

impl<'c> GeographyResolver<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        GeographyResolver {
            conn,
            stats: GeographyStats::default(),
        }
    }

    pub fn stats(&self) -> GeographyStats {
        self.stats
    }

    /// Group the canonical table by (macro-region, region), creating both as needed
    pub fn build_region_mapping(&mut self, table: &IndicatorTable) -> Result<RegionMapping> {
        let mut macro_ids: HashMap<String, i64> = HashMap::new();
        let mut region_ids: HashMap<(String, i64), i64> = HashMap::new();
        let mut mapping = RegionMapping::default();

        for row in &table.rows {
            let names = (
                row.macro_region.as_deref().map(normalize_name),
                row.health_region.as_deref().map(normalize_name),
            );
            let (macro_name, region_name) = match names {
                (Some(m), Some(r)) if !m.is_empty() && !r.is_empty() => (m, r),
                _ => {
                    warn!(
                        "{}: code {} has no macro-region/region names, not mapped",
                        table.name, row.ibge_code
                    );
                    self.stats.incomplete_rows += 1;
                    continue;
                }
            };

            let macro_id = match macro_ids.get(&macro_name) {
                Some(id) => *id,
                None => {
                    let (id, created) = db::get_or_create_macro_region(self.conn, &macro_name)?;
                    if created {
                        self.stats.macro_regions_created += 1;
                    }
                    macro_ids.insert(macro_name.clone(), id);
                    id
                }
            };

            let region_key = (region_name, macro_id);
            let region_id = match region_ids.get(&region_key) {
                Some(id) => *id,
                None => {
                    let (id, created) =
                        db::get_or_create_health_region(self.conn, &region_key.0, macro_id)?;
                    if created {
                        self.stats.health_regions_created += 1;
                    }
                    region_ids.insert(region_key, id);
                    id
                }
            };

            match mapping.by_code.get(&row.ibge_code) {
                Some(existing) if *existing != region_id => warn!(
                    "{}: code {} listed under two regions, keeping the first",
                    table.name, row.ibge_code
                ),
                Some(_) => {}
                None => {
                    mapping.by_code.insert(row.ibge_code.clone(), region_id);
                }
            }
        }

        debug!(
            "region mapping: {} codes, {} macro-regions, {} regions",
            mapping.len(),
            macro_ids.len(),
            region_ids.len()
        );
        Ok(mapping)
    }

    /// Create every registry municipality (full code), with its region when the truncated code resolves
    pub fn resolve_municipalities(
        &mut self,
        registry: &[RegistryRow],
        mapping: &RegionMapping,
    ) -> Result<()> {
        for row in registry {
            let ibge_code = match row.normalized_code() {
                Ok(code) => code,
                Err(err) => {
                    warn!("registry row '{}' skipped: {}", row.name, err);
                    continue;
                }
            };
            if ibge_code.len() != 7 {
                debug!("registry code {} is not 7 digits", ibge_code);
            }

            let key = lookup_key(&ibge_code);
            let region_id = mapping.get(key);
            if region_id.is_none() {
                let err = EtlError::UnresolvedGeography {
                    ibge_code: ibge_code.clone(),
                    lookup_key: key.to_string(),
                };
                warn!("{}", err);
                self.stats.unresolved += 1;
            }

            match db::create_municipality(
                self.conn,
                &ibge_code,
                row.name.trim(),
                row.latitude,
                row.longitude,
                region_id,
            )? {
                Ok(_) => self.stats.municipalities_created += 1,
                Err(dup) => {
                    debug!("{}", dup);
                    self.stats.municipalities_existing += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::IndicatorTableParser;
    use crate::workbook::Grid;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        conn
    }

    fn canonical_table() -> IndicatorTable {
        let grid = Grid::from_strings(&[
            vec!["Título"],
            vec!["Meta"],
            vec!["Macrorregião de Saúde", "Região de Saúde", "Cod. IBGE", "Município", "2015"],
            vec!["Leste", "Salvador", "292740", "Salvador", "45,3"],
            vec!["Leste", "Salvador", "290570", "Camaçari", "30"],
            vec!["Sul", "Ilhéus", "291360", "Ilhéus", "12"],
            vec!["Norte", "Salvador", "293010", "Senhor do Bonfim", "7"],
            vec!["", "", "292100", "Sem região", "1"],
        ]);
        IndicatorTableParser::new(2).parse("Indicador 3", &grid).unwrap()
    }

    fn registry_row(code: &str, name: &str) -> RegistryRow {
        RegistryRow {
            ibge_code: code.to_string(),
            name: name.to_string(),
            latitude: -12.9,
            longitude: -38.5,
        }
    }

    #[test]
    fn test_region_mapping_groups_by_name_pair() {
        let conn = test_db();
        let mut resolver = GeographyResolver::new(&conn);
        let mapping = resolver.build_region_mapping(&canonical_table()).unwrap();

        assert_eq!(mapping.len(), 4);
        assert_eq!(mapping.get("292740"), mapping.get("290570"));
        // "Salvador" under Norte is not "Salvador" under Leste
        assert_ne!(mapping.get("292740"), mapping.get("293010"));
        assert_eq!(mapping.get("292100"), None);

        let stats = resolver.stats();
        assert_eq!(stats.macro_regions_created, 3);
        assert_eq!(stats.health_regions_created, 3);
        assert_eq!(stats.incomplete_rows, 1);
    }

    #[test]
    fn test_truncated_lookup_full_code_persisted() {
        let conn = test_db();
        let mut resolver = GeographyResolver::new(&conn);
        let mapping = resolver.build_region_mapping(&canonical_table()).unwrap();

        let registry = vec![
            registry_row("2927408", "Salvador"),
            registry_row("2933307", "Vitória da Conquista"),
        ];
        resolver.resolve_municipalities(&registry, &mapping).unwrap();

        // matching code: full code stored, region resolved through "292740"
        let salvador = db::get_municipality(&conn, "2927408").unwrap().unwrap();
        assert_eq!(salvador.ibge_code, "2927408");
        let (region, macro_region) = db::get_health_region(&conn, salvador.health_region_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(region.name, "Salvador");
        assert_eq!(macro_region.name, "Leste");

        // non-matching code: created anyway, without a region
        let conquista = db::get_municipality(&conn, "2933307").unwrap().unwrap();
        assert_eq!(conquista.health_region_id, None);
        assert!(db::get_municipality(&conn, "293330").unwrap().is_none());

        let stats = resolver.stats();
        assert_eq!(stats.municipalities_created, 2);
        assert_eq!(stats.unresolved, 1);
    }

    #[test]
    fn test_rerun_keeps_existing_rows() {
        let conn = test_db();
        let registry = vec![registry_row("2927408", "Salvador")];

        for _ in 0..2 {
            let mut resolver = GeographyResolver::new(&conn);
            let mapping = resolver.build_region_mapping(&canonical_table()).unwrap();
            resolver.resolve_municipalities(&registry, &mapping).unwrap();
        }

        let counts = db::table_counts(&conn).unwrap();
        assert_eq!(counts.macro_regions, 3);
        assert_eq!(counts.health_regions, 3);
        assert_eq!(counts.municipalities, 1);
    }
}
