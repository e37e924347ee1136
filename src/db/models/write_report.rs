use serde::Serialize;

use super::Symbol;

/// A per-symbol persistence failure inside a grouped write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteFailure {
    pub symbol: Symbol,
    pub reason: String,
}

/// Outcome of a grouped observation write.
///
/// Symbols in `written` stay written even when others failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchWriteReport {
    pub written: Vec<Symbol>,
    pub failed: Vec<WriteFailure>,
}

impl BatchWriteReport {
    pub fn record_failure(&mut self, symbol: Symbol, reason: impl Into<String>) {
        self.failed.push(WriteFailure {
            symbol,
            reason: reason.into(),
        });
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
