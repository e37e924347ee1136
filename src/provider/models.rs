use serde::{Deserialize, Serialize};

/// One entry of the ranked `/coins/markets` listing.
///
/// Numeric fields are optional: the provider returns `null` for assets it
/// has no data for.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawAsset {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub circulating_supply: Option<f64>,
    #[serde(default)]
    pub total_supply: Option<f64>,
    #[serde(default)]
    pub max_supply: Option<f64>,
}

impl RawAsset {
    /// Circulating supply when it is a usable (positive, finite) value.
    pub fn valid_supply(&self) -> Option<f64> {
        positive(self.circulating_supply)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetailMarketData {
    #[serde(default)]
    pub circulating_supply: Option<f64>,
    #[serde(default)]
    pub total_supply: Option<f64>,
    #[serde(default)]
    pub max_supply: Option<f64>,
}

/// Response of the per-asset `/coins/{id}` lookup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawAssetDetail {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub market_data: Option<DetailMarketData>,
}

impl RawAssetDetail {
    pub fn valid_supply(&self) -> Option<f64> {
        positive(self.market_data.as_ref().and_then(|m| m.circulating_supply))
    }
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}
