// 🚨 Error Taxonomy - cell / row / sheet conditions vs. phase failures
//
// Cell, row and sheet errors are recovered where they happen (logged, then skipped).
// Only PhaseFailure aborts a run.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Import phases, in the only order they may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Geography,
    Indicators,
    Values,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Geography => "geography",
            Phase::Indicators => "indicators",
            Phase::Values => "values",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum EtlError {
    /// Required columns absent, or metadata cells missing. The sheet is skipped.
    #[error("malformed sheet '{sheet}': {reason}")]
    MalformedSheet { sheet: String, reason: String },

    /// A cell failed numeric coercion. The value is treated as absent.
    #[error("unparseable value {raw:?} in column '{column}'")]
    UnparseableValue { column: String, raw: String },

    /// A registry municipality whose truncated code has no health region.
    #[error("no health region for municipality {ibge_code} (lookup key {lookup_key})")]
    UnresolvedGeography { ibge_code: String, lookup_key: String },

    /// An indicator-value row whose code matches no municipality (or more than one).
    #[error("no unique municipality for code {code} ({matches} matches)")]
    UnresolvedMunicipality { code: String, matches: usize },

    /// A create hit a uniqueness constraint. The existing row wins.
    #[error("{entity} already exists: {key}")]
    DuplicateKey { entity: &'static str, key: String },

    /// Anything unexpected inside an import phase. The phase was rolled back.
    #[error("{phase} import failed: {source}")]
    PhaseFailure {
        phase: Phase,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Run setup failed before any phase started (workbook unreadable, output dirs).
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl EtlError {
    pub fn malformed(sheet: &str, reason: impl Into<String>) -> Self {
        EtlError::MalformedSheet {
            sheet: sheet.to_string(),
            reason: reason.into(),
        }
    }

    pub fn phase_failure(phase: Phase, err: anyhow::Error) -> Self {
        EtlError::PhaseFailure {
            phase,
            source: err.into(),
        }
    }

    pub fn io(context: impl Into<String>, err: anyhow::Error) -> Self {
        EtlError::Io {
            context: context.into(),
            source: err.into(),
        }
    }

    /// True for conditions that only skip a cell, row or sheet
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EtlError::PhaseFailure { .. } | EtlError::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_split() {
        assert!(EtlError::malformed("Indicador 3", "missing Cod. IBGE").is_recoverable());
        assert!(EtlError::UnresolvedMunicipality {
            code: "292740".to_string(),
            matches: 0
        }
        .is_recoverable());

        let fatal = EtlError::phase_failure(Phase::Values, anyhow::anyhow!("disk full"));
        assert!(!fatal.is_recoverable());
        assert_eq!(fatal.to_string(), "values import failed: disk full");
    }

    #[test]
    fn test_phase_failure_keeps_source() {
        use std::error::Error as _;

        let err = EtlError::phase_failure(Phase::Geography, anyhow::anyhow!("boom"));
        assert!(err.source().is_some());
    }
}
