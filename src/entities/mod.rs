// Entity Models - the relational shape of the indicator store
//
// Every entity is created once and never updated:
// - stable identity = natural key (name pair, IBGE code, file key, value triple)
// - re-running an import leaves existing rows untouched

pub mod region;
pub mod municipality;
pub mod indicator;

pub use region::{normalize_name, HealthRegion, MacroRegion};
pub use municipality::{lookup_key, Municipality, MunicipalityIndex, RegistryRow};
pub use indicator::{parse_state_target, Indicator, IndicatorValue};
