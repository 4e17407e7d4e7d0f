// 🗺️ Macro-regions and health regions
//
// A health region belongs to exactly one macro-region. The same region name
// under two macro-regions is two different regions.

use serde::{Deserialize, Serialize};

/// Collapse inner whitespace and trim; used as the uniqueness form of names
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroRegion {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRegion {
    pub id: i64,
    pub name: String,
    pub macro_region_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Centro   Leste "), "Centro Leste");
        assert_eq!(normalize_name("Sul"), "Sul");
        assert_eq!(normalize_name("   "), "");
    }
}
