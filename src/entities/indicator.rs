// 📈 Indicator + yearly values
//
// Indicator identity is the file key derived from the sheet name.
// Values are keyed by (municipality, indicator, year); first write wins.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub id: i64,
    pub file_key: String,
    pub title: String,
    /// Usually the "Meta Estadual" text; see `state_target`
    pub subtitle: Option<String>,
    pub source: Option<String>,
}

impl Indicator {
    /// Numeric state goal carried by the subtitle, if any
    pub fn state_target(&self) -> Option<f64> {
        self.subtitle.as_deref().and_then(parse_state_target)
    }
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)?").expect("static regex"))
}

/// First number in the text: "Meta Estadual: 95%" → 95.0, "Redução 12,5%" → 12.5
pub fn parse_state_target(text: &str) -> Option<f64> {
    number_pattern()
        .find(text)
        .and_then(|m| m.as_str().replace(',', ".").parse().ok())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub id: i64,
    pub municipality_id: i64,
    pub indicator_id: i64,
    pub year: u16,
    pub value: Option<f64>,
}
