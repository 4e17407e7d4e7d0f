// 🗄️ Relational store - SQLite schema, create-if-absent writes, read queries
//
// Writes never overwrite: a create that hits a UNIQUE constraint leaves the
// existing row alone and reports DuplicateKey to the caller.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entities::{
    HealthRegion, Indicator, IndicatorValue, MacroRegion, Municipality, MunicipalityIndex,
};
use crate::error::EtlError;
use crate::metadata::IndicatorMetadata;

/// Outer Result = unexpected store failure, inner = recoverable row condition
pub type RowResult<T> = std::result::Result<T, EtlError>;

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS macro_regions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS health_regions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            macro_region_id INTEGER NOT NULL REFERENCES macro_regions(id),
            UNIQUE (name, macro_region_id)
        );

        CREATE TABLE IF NOT EXISTS municipalities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ibge_code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            health_region_id INTEGER REFERENCES health_regions(id)
        );

        CREATE TABLE IF NOT EXISTS indicators (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_key TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            subtitle TEXT,
            source TEXT
        );

        CREATE TABLE IF NOT EXISTS indicator_values (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            municipality_id INTEGER NOT NULL REFERENCES municipalities(id),
            indicator_id INTEGER NOT NULL REFERENCES indicators(id),
            year INTEGER NOT NULL,
            value REAL,
            UNIQUE (municipality_id, indicator_id, year)
        );

        -- audit trail, one row per run milestone
        CREATE TABLE IF NOT EXISTS etl_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            run_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            subject TEXT NOT NULL,
            data TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_values_indicator_year ON indicator_values(indicator_id, year);
        CREATE INDEX IF NOT EXISTS idx_municipalities_region ON municipalities(health_region_id);
        CREATE INDEX IF NOT EXISTS idx_events_run ON etl_events(run_id, timestamp);",
    )?;

    Ok(())
}

/// True only for UNIQUE / PRIMARY KEY violations; FK and CHECK failures are not duplicates
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

fn insert_if_absent<P: rusqlite::Params>(
    conn: &Connection,
    entity: &'static str,
    key: &str,
    sql: &str,
    params: P,
) -> Result<RowResult<i64>> {
    match conn.execute(sql, params) {
        Ok(_) => Ok(Ok(conn.last_insert_rowid())),
        Err(e) if is_unique_violation(&e) => Ok(Err(EtlError::DuplicateKey {
            entity,
            key: key.to_string(),
        })),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// GEOGRAPHY
// ============================================================================

/// Existing id, or a freshly inserted one. The bool is true when created.
pub fn get_or_create_macro_region(conn: &Connection, name: &str) -> Result<(i64, bool)> {
    let existing: Option<i64> = conn
        .query_row("SELECT id FROM macro_regions WHERE name = ?1", [name], |row| row.get(0))
        .optional()?;

    if let Some(id) = existing {
        return Ok((id, false));
    }

    conn.execute("INSERT INTO macro_regions (name) VALUES (?1)", [name])?;
    Ok((conn.last_insert_rowid(), true))
}

pub fn get_or_create_health_region(
    conn: &Connection,
    name: &str,
    macro_region_id: i64,
) -> Result<(i64, bool)> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM health_regions WHERE name = ?1 AND macro_region_id = ?2",
            params![name, macro_region_id],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        return Ok((id, false));
    }

    conn.execute(
        "INSERT INTO health_regions (name, macro_region_id) VALUES (?1, ?2)",
        params![name, macro_region_id],
    )?;
    Ok((conn.last_insert_rowid(), true))
}

/// Create-if-absent on ibge_code; an existing municipality is never updated
pub fn create_municipality(
    conn: &Connection,
    ibge_code: &str,
    name: &str,
    latitude: f64,
    longitude: f64,
    health_region_id: Option<i64>,
) -> Result<RowResult<i64>> {
    insert_if_absent(
        conn,
        "municipality",
        ibge_code,
        "INSERT INTO municipalities (ibge_code, name, latitude, longitude, health_region_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![ibge_code, name, latitude, longitude, health_region_id],
    )
}

pub fn load_municipality_index(conn: &Connection) -> Result<MunicipalityIndex> {
    let mut stmt = conn.prepare("SELECT ibge_code, id FROM municipalities")?;
    let index = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<MunicipalityIndex, _>>()?;
    Ok(index)
}

pub fn get_municipality(conn: &Connection, ibge_code: &str) -> Result<Option<Municipality>> {
    let municipality = conn
        .query_row(
            "SELECT id, ibge_code, name, latitude, longitude, health_region_id
             FROM municipalities WHERE ibge_code = ?1",
            [ibge_code],
            |row| {
                Ok(Municipality {
                    id: row.get(0)?,
                    ibge_code: row.get(1)?,
                    name: row.get(2)?,
                    latitude: row.get(3)?,
                    longitude: row.get(4)?,
                    health_region_id: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(municipality)
}

/// Region and its macro-region
pub fn get_health_region(conn: &Connection, id: i64) -> Result<Option<(HealthRegion, MacroRegion)>> {
    let region = conn
        .query_row(
            "SELECT r.id, r.name, m.id, m.name
             FROM health_regions r JOIN macro_regions m ON m.id = r.macro_region_id
             WHERE r.id = ?1",
            [id],
            |row| {
                Ok((
                    HealthRegion {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        macro_region_id: row.get(2)?,
                    },
                    MacroRegion {
                        id: row.get(2)?,
                        name: row.get(3)?,
                    },
                ))
            },
        )
        .optional()?;
    Ok(region)
}

// ============================================================================
// INDICATORS
// ============================================================================

pub fn create_indicator(conn: &Connection, meta: &IndicatorMetadata) -> Result<RowResult<i64>> {
    insert_if_absent(
        conn,
        "indicator",
        &meta.file_key,
        "INSERT INTO indicators (file_key, title, subtitle, source) VALUES (?1, ?2, ?3, ?4)",
        params![meta.file_key, meta.title, meta.subtitle, meta.source],
    )
}

/// file_key → id for every stored indicator
pub fn indicator_ids(conn: &Connection) -> Result<HashMap<String, i64>> {
    let mut stmt = conn.prepare("SELECT file_key, id FROM indicators")?;
    let ids = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(ids)
}

fn indicator_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Indicator> {
    Ok(Indicator {
        id: row.get(0)?,
        file_key: row.get(1)?,
        title: row.get(2)?,
        subtitle: row.get(3)?,
        source: row.get(4)?,
    })
}

pub fn get_indicator(conn: &Connection, id: i64) -> Result<Option<Indicator>> {
    let indicator = conn
        .query_row(
            "SELECT id, file_key, title, subtitle, source FROM indicators WHERE id = ?1",
            [id],
            indicator_from_row,
        )
        .optional()?;
    Ok(indicator)
}

pub fn list_indicators(conn: &Connection) -> Result<Vec<Indicator>> {
    let mut stmt =
        conn.prepare("SELECT id, file_key, title, subtitle, source FROM indicators ORDER BY id")?;
    let indicators = stmt
        .query_map([], indicator_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(indicators)
}

pub fn create_indicator_value(
    conn: &Connection,
    municipality_id: i64,
    indicator_id: i64,
    year: u16,
    value: f64,
) -> Result<RowResult<i64>> {
    insert_if_absent(
        conn,
        "indicator value",
        &format!("({}, {}, {})", municipality_id, indicator_id, year),
        "INSERT INTO indicator_values (municipality_id, indicator_id, year, value)
         VALUES (?1, ?2, ?3, ?4)",
        params![municipality_id, indicator_id, year, value],
    )
}

/// A value joined to the municipality code, as the map layer consumes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MunicipalityValue {
    pub ibge_code: String,
    pub municipality: String,
    pub year: u16,
    pub value: Option<f64>,
}

pub fn values_for_year(conn: &Connection, indicator_id: i64, year: u16) -> Result<Vec<MunicipalityValue>> {
    let mut stmt = conn.prepare(
        "SELECT m.ibge_code, m.name, v.year, v.value
         FROM indicator_values v JOIN municipalities m ON m.id = v.municipality_id
         WHERE v.indicator_id = ?1 AND v.year = ?2
         ORDER BY m.ibge_code",
    )?;
    let values = stmt
        .query_map(params![indicator_id, year], |row| {
            Ok(MunicipalityValue {
                ibge_code: row.get(0)?,
                municipality: row.get(1)?,
                year: row.get(2)?,
                value: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(values)
}

/// Yearly series of one indicator for one municipality, oldest first
pub fn indicator_series(
    conn: &Connection,
    indicator_id: i64,
    municipality_id: i64,
) -> Result<Vec<IndicatorValue>> {
    let mut stmt = conn.prepare(
        "SELECT id, municipality_id, indicator_id, year, value
         FROM indicator_values
         WHERE indicator_id = ?1 AND municipality_id = ?2
         ORDER BY year",
    )?;
    let values = stmt
        .query_map(params![indicator_id, municipality_id], |row| {
            Ok(IndicatorValue {
                id: row.get(0)?,
                municipality_id: row.get(1)?,
                indicator_id: row.get(2)?,
                year: row.get(3)?,
                value: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(values)
}

/// (min, max) of one indicator in one year, for colour scales
pub fn value_range(conn: &Connection, indicator_id: i64, year: u16) -> Result<Option<(f64, f64)>> {
    let (min, max): (Option<f64>, Option<f64>) = conn.query_row(
        "SELECT MIN(value), MAX(value) FROM indicator_values WHERE indicator_id = ?1 AND year = ?2",
        params![indicator_id, year],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(min.zip(max))
}

// ============================================================================
// COUNTS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub macro_regions: i64,
    pub health_regions: i64,
    pub municipalities: i64,
    pub indicators: i64,
    pub indicator_values: i64,
}

pub fn table_counts(conn: &Connection) -> Result<TableCounts> {
    let count = |table: &str| -> Result<i64> {
        let n: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(n)
    };

    Ok(TableCounts {
        macro_regions: count("macro_regions")?,
        health_regions: count("health_regions")?,
        municipalities: count("municipalities")?,
        indicators: count("indicators")?,
        indicator_values: count("indicator_values")?,
    })
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Run milestone ("Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    /// Sheet, phase or workbook the event is about
    pub subject: String,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(run_id: &str, event_type: &str, subject: &str, data: serde_json::Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            subject: subject.to_string(),
            data,
        }
    }
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO etl_events (event_id, run_id, timestamp, event_type, subject, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.event_id,
            event.run_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.subject,
            data_json,
        ],
    )?;

    Ok(())
}

pub fn get_events_for_run(conn: &Connection, run_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, run_id, timestamp, event_type, subject, data
         FROM etl_events
         WHERE run_id = ?1
         ORDER BY id",
    )?;

    let events = stmt
        .query_map([run_id], |row| {
            let timestamp_str: String = row.get(2)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                run_id: row.get(1)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(3)?,
                subject: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn meta(key: &str, title: &str) -> IndicatorMetadata {
        IndicatorMetadata {
            file_key: key.to_string(),
            title: title.to_string(),
            subtitle: Some("Meta Estadual: 95%".to_string()),
            source: None,
        }
    }

    #[test]
    fn test_setup_is_repeatable() {
        let conn = test_db();
        setup_database(&conn).unwrap();
        assert_eq!(table_counts(&conn).unwrap(), TableCounts::default());
    }

    #[test]
    fn test_get_or_create_regions() {
        let conn = test_db();

        let (leste, created) = get_or_create_macro_region(&conn, "Leste").unwrap();
        assert!(created);
        assert_eq!(get_or_create_macro_region(&conn, "Leste").unwrap(), (leste, false));

        let (sul, _) = get_or_create_macro_region(&conn, "Sul").unwrap();

        // same region name under two macro-regions: two regions
        let (r1, _) = get_or_create_health_region(&conn, "Centro", leste).unwrap();
        let (r2, _) = get_or_create_health_region(&conn, "Centro", sul).unwrap();
        assert_ne!(r1, r2);
        assert_eq!(get_or_create_health_region(&conn, "Centro", leste).unwrap(), (r1, false));

        let counts = table_counts(&conn).unwrap();
        assert_eq!(counts.macro_regions, 2);
        assert_eq!(counts.health_regions, 2);
    }

    #[test]
    fn test_existing_municipality_wins() {
        let conn = test_db();

        let first = create_municipality(&conn, "2927408", "Salvador", -12.97, -38.50, None)
            .unwrap()
            .unwrap();
        let second = create_municipality(&conn, "2927408", "Outro Nome", 0.0, 0.0, None).unwrap();

        assert!(matches!(second, Err(EtlError::DuplicateKey { entity: "municipality", .. })));
        let stored = get_municipality(&conn, "2927408").unwrap().unwrap();
        assert_eq!(stored.id, first);
        assert_eq!(stored.name, "Salvador");
    }

    #[test]
    fn test_foreign_key_failure_is_not_a_duplicate() {
        let conn = test_db();
        let result = create_municipality(&conn, "2927408", "Salvador", 0.0, 0.0, Some(999));
        assert!(result.is_err(), "FK violation must surface as an unexpected error");
    }

    #[test]
    fn test_indicator_values_create_if_absent() {
        let conn = test_db();
        let m = create_municipality(&conn, "2927408", "Salvador", -12.97, -38.50, None)
            .unwrap()
            .unwrap();
        let i = create_indicator(&conn, &meta("indicador_3", "Cobertura")).unwrap().unwrap();

        create_indicator_value(&conn, m, i, 2015, 45.3).unwrap().unwrap();
        let again = create_indicator_value(&conn, m, i, 2015, 99.9).unwrap();
        assert!(matches!(again, Err(EtlError::DuplicateKey { .. })));

        let values = values_for_year(&conn, i, 2015).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].ibge_code, "2927408");
        assert_eq!(values[0].value, Some(45.3));
        assert_eq!(value_range(&conn, i, 2015).unwrap(), Some((45.3, 45.3)));
        assert_eq!(value_range(&conn, i, 2016).unwrap(), None);
    }

    #[test]
    fn test_indicator_series() {
        let conn = test_db();
        let m = create_municipality(&conn, "2927408", "Salvador", -12.97, -38.50, None)
            .unwrap()
            .unwrap();
        let i = create_indicator(&conn, &meta("indicador_3", "Cobertura")).unwrap().unwrap();

        create_indicator_value(&conn, m, i, 2017, 52.0).unwrap().unwrap();
        create_indicator_value(&conn, m, i, 2015, 45.3).unwrap().unwrap();

        let series = indicator_series(&conn, i, m).unwrap();
        let points: Vec<(u16, Option<f64>)> = series.iter().map(|v| (v.year, v.value)).collect();
        assert_eq!(points, vec![(2015, Some(45.3)), (2017, Some(52.0))]);
        assert!(series.iter().all(|v| v.municipality_id == m && v.indicator_id == i));
        assert!(indicator_series(&conn, i, m + 1).unwrap().is_empty());
    }

    #[test]
    fn test_indicator_queries() {
        let conn = test_db();
        let id = create_indicator(&conn, &meta("indicador_3", "Cobertura")).unwrap().unwrap();
        assert!(create_indicator(&conn, &meta("indicador_3", "Outro")).unwrap().is_err());

        let indicator = get_indicator(&conn, id).unwrap().unwrap();
        assert_eq!(indicator.title, "Cobertura");
        assert_eq!(indicator.state_target(), Some(95.0));
        assert_eq!(list_indicators(&conn).unwrap().len(), 1);
        assert_eq!(indicator_ids(&conn).unwrap().get("indicador_3"), Some(&id));
        assert!(get_indicator(&conn, id + 1).unwrap().is_none());
    }

    #[test]
    fn test_municipality_index_from_store() {
        let conn = test_db();
        create_municipality(&conn, "2927408", "Salvador", 0.0, 0.0, None).unwrap().unwrap();
        create_municipality(&conn, "2913606", "Ilhéus", 0.0, 0.0, None).unwrap().unwrap();

        let index = load_municipality_index(&conn).unwrap();
        assert_eq!(index.len(), 2);
        let salvador = get_municipality(&conn, "2927408").unwrap().unwrap();
        assert_eq!(index.find_by_prefix("292740").unwrap(), salvador.id);
    }

    #[test]
    fn test_event_log() {
        let conn = test_db();

        let event = Event::new(
            "run-1",
            "phase_committed",
            "geography",
            serde_json::json!({"created": 3}),
        );
        insert_event(&conn, &event).unwrap();
        insert_event(&conn, &Event::new("run-2", "run_started", "book.xlsx", serde_json::json!({}))).unwrap();

        let events = get_events_for_run(&conn, "run-1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "phase_committed");
        assert_eq!(events[0].data["created"], 3);
    }
}
