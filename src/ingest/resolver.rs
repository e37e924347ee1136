use rustc_hash::FxHashMap;

use crate::db::models::Symbol;
use crate::provider::RawAsset;

/// Provider identifier to canonical symbol mapping for one cycle.
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    by_id: FxHashMap<String, Symbol>,
    /// Provider ids in first-seen order
    order: Vec<String>,
}

impl SymbolMap {
    /// Builds the mapping from the fetched pages and the markets listing.
    ///
    /// Entries are processed in page order; a later entry for the same id
    /// replaces the earlier one. The listing's symbol for an id wins over
    /// the asset's own symbol field.
    pub fn resolve(assets: &[RawAsset], listing: &[RawAsset]) -> Self {
        let mut listed: FxHashMap<&str, &str> = FxHashMap::default();
        for entry in listing {
            if !entry.id.is_empty() && !entry.symbol.trim().is_empty() {
                listed.insert(entry.id.as_str(), entry.symbol.as_str());
            }
        }

        let mut map = Self::default();
        for asset in assets {
            if asset.id.is_empty() {
                continue;
            }

            let raw = listed
                .get(asset.id.as_str())
                .copied()
                .unwrap_or(asset.symbol.as_str());
            let symbol = Symbol::new(raw);
            if symbol.is_empty() {
                continue;
            }

            if map.by_id.insert(asset.id.clone(), symbol).is_none() {
                map.order.push(asset.id.clone());
            }
        }

        map
    }

    pub fn symbol_for(&self, provider_id: &str) -> Option<&Symbol> {
        self.by_id.get(provider_id)
    }

    /// First provider id, in first-seen order, that maps to `symbol`.
    pub fn id_for(&self, symbol: &Symbol) -> Option<&str> {
        self.order
            .iter()
            .find(|id| self.by_id.get(id.as_str()) == Some(symbol))
            .map(String::as_str)
    }

    /// Distinct symbols in first-seen order.
    pub fn distinct_symbols(&self) -> Vec<Symbol> {
        let mut seen: Vec<Symbol> = Vec::new();
        for id in &self.order {
            if let Some(symbol) = self.by_id.get(id) {
                if !seen.contains(symbol) {
                    seen.push(symbol.clone());
                }
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
