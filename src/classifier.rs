// 🗂️ Sheet Classifier - which sheets carry indicator data
//
// "Indicador 13" → indicador_13 (data)    "Resumo" → skipped
// Non-data sheets are not an error; they are simply left out.

use regex::Regex;
use std::sync::OnceLock;

fn indicator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^indicador_\d+$").expect("static regex"))
}

/// Stable identity key for a sheet: lower-cased, spaces → underscores
pub fn file_key(sheet_name: &str) -> String {
    sheet_name.to_lowercase().replace(' ', "_")
}

/// True iff the normalized name is exactly `indicador_<digits>`
pub fn is_indicator_sheet(sheet_name: &str) -> bool {
    is_indicator_key(&file_key(sheet_name))
}

/// Same check for a name that is already a file key (e.g. a CSV stem)
pub fn is_indicator_key(key: &str) -> bool {
    indicator_pattern().is_match(key)
}

/// A sheet accepted as indicator data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorSheet {
    /// Name as it appears in the workbook
    pub sheet_name: String,
    pub file_key: String,
}

pub struct SheetClassifier;

impl SheetClassifier {
    /// Keep only indicator sheets, in workbook order
    pub fn classify<'a, I>(sheet_names: I) -> Vec<IndicatorSheet>
    where
        I: IntoIterator<Item = &'a str>,
    {
        sheet_names
            .into_iter()
            .filter(|name| is_indicator_sheet(name))
            .map(|name| IndicatorSheet {
                sheet_name: name.to_string(),
                file_key: file_key(name),
            })
            .collect()
    }
}
