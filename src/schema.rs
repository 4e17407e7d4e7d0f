// 📐 Shape Layer - Schema Validation
// Indicator tables are checked for their required columns before any column
// is read by name. Validation fails closed.

use std::collections::HashMap;

use regex::Regex;
use std::sync::OnceLock;

pub const COL_MACRO_REGION: &str = "Macrorregião de Saúde";
pub const COL_HEALTH_REGION: &str = "Região de Saúde";
pub const COL_IBGE_CODE: &str = "Cod. IBGE";
pub const COL_MUNICIPALITY: &str = "Município";

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub context: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.context, self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult<T> = Result<T, Vec<ValidationError>>;

/// Join validation errors into one line for logs and MalformedSheet reasons
pub fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// YEAR COLUMNS
// ============================================================================

fn year_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}$").expect("static regex"))
}

/// Year carried by a header, if it is one: "2015" → 2015, "2015*" → 2015
pub fn header_year(header: &str) -> Option<u16> {
    let normalized = header.trim().trim_end_matches('*');
    if year_pattern().is_match(normalized) {
        normalized.parse().ok()
    } else {
        None
    }
}

/// A column whose header is a year; `header` is the raw name used for lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearColumn {
    pub header: String,
    pub year: u16,
    pub index: usize,
}

// ============================================================================
// SHEET SCHEMA
// ============================================================================

/// Resolved column positions of a validated indicator table
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap {
    pub macro_region: usize,
    pub health_region: usize,
    pub ibge_code: usize,
    pub municipality: usize,
    pub years: Vec<YearColumn>,
}

pub struct SheetSchema {
    required: Vec<&'static str>,
}

impl SheetSchema {
    pub fn new() -> Self {
        SheetSchema {
            required: vec![COL_MACRO_REGION, COL_HEALTH_REGION, COL_IBGE_CODE, COL_MUNICIPALITY],
        }
    }

    /// Check the header row of `context` (a sheet or file name)
    pub fn validate(&self, context: &str, headers: &[String]) -> ValidationResult<ColumnMap> {
        let positions: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .rev() // first occurrence wins
            .map(|(i, h)| (h.trim(), i))
            .collect();

        let mut errors = Vec::new();
        let mut found = Vec::with_capacity(self.required.len());
        for column in &self.required {
            match positions.get(column) {
                Some(&index) => found.push(index),
                None => errors.push(ValidationError {
                    field: column.to_string(),
                    message: "Required column is missing".to_string(),
                    context: context.to_string(),
                }),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let mut years: Vec<YearColumn> = Vec::new();
        for (index, header) in headers.iter().enumerate() {
            let Some(year) = header_year(header) else {
                continue;
            };
            if years.iter().any(|y| y.year == year) {
                log::warn!(
                    "{}: column '{}' repeats year {}, keeping the first one",
                    context,
                    header,
                    year
                );
                continue;
            }
            years.push(YearColumn {
                header: header.clone(),
                year,
                index,
            });
        }

        Ok(ColumnMap {
            macro_region: found[0],
            health_region: found[1],
            ibge_code: found[2],
            municipality: found[3],
            years,
        })
    }
}

impl Default for SheetSchema {
    fn default() -> Self {
        SheetSchema::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_validate_resolves_columns() {
        let schema = SheetSchema::new();
        let map = schema
            .validate(
                "Indicador 3",
                &headers(&[
                    "Macrorregião de Saúde",
                    "Região de Saúde",
                    "Cod. IBGE",
                    " Município ",
                    "2010",
                    "2015*",
                    "Meta",
                    "20155",
                ]),
            )
            .unwrap();

        assert_eq!(map.ibge_code, 2);
        assert_eq!(map.municipality, 3);
        assert_eq!(map.years.len(), 2);
        assert_eq!(map.years[1].header, "2015*");
        assert_eq!(map.years[1].year, 2015);
        assert_eq!(map.years[1].index, 5);
    }

    #[test]
    fn test_validate_reports_every_missing_column() {
        let schema = SheetSchema::new();
        let errors = schema
            .validate("Indicador 9", &headers(&["Macrorregião de Saúde", "2015"]))
            .unwrap_err();

        let missing: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(missing, vec!["Região de Saúde", "Cod. IBGE", "Município"]);
        assert!(describe(&errors).contains("[Indicador 9] Cod. IBGE"));
    }

    #[test]
    fn test_header_year() {
        assert_eq!(header_year("2015"), Some(2015));
        assert_eq!(header_year("2015*"), Some(2015));
        assert_eq!(header_year("2025"), Some(2025));
        assert_eq!(header_year("Ano 2015"), None);
        assert_eq!(header_year("201"), None);
        assert_eq!(header_year(""), None);
    }

    #[test]
    fn test_repeated_year_keeps_first() {
        let map = SheetSchema::new()
            .validate(
                "Indicador 5",
                &headers(&["Macrorregião de Saúde", "Região de Saúde", "Cod. IBGE", "Município", "2015", "2015*"]),
            )
            .unwrap();
        assert_eq!(map.years.len(), 1);
        assert_eq!(map.years[0].header, "2015");
    }
}
