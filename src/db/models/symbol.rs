use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical ticker symbol: trimmed and upper-cased.
///
/// Every series, snapshot record and lookup key goes through this type so
/// `"bnb"`, `" BNB"` and `"BNB"` always address the same series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Symbol {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<&str> for Symbol {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
