// 9.0 price_feed.rs: collaborator seams. the engine never ingests or verifies prices itself;
// it asks a PriceSource, a UtilizationSource and a KeeperPolicy. in-memory versions live
// at the bottom for hosts that don't have real ones wired up (and for tests).

use crate::config::CollateralConfig;
use crate::types::{CollateralKind, KeeperId, MarketId, Price};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

/// Validated prices for markets, collateral and the gas token.
pub trait PriceSource {
    fn market_price(&self, market_id: MarketId) -> Option<Price>;

    /// Undiscounted USD price of one unit of collateral.
    fn collateral_price(&self, kind: CollateralKind) -> Option<Price>;

    /// USD price of the token keepers pay gas in.
    fn gas_token_price(&self) -> Option<Price>;
}

/// Capital-provisioning side. returns an annualized rate (0.1 = 10%/yr).
pub trait UtilizationSource {
    fn utilization_rate(&self, market_id: MarketId) -> Decimal;
}

/// Access policy for liquidators allowed to skip the capacity cap.
pub trait KeeperPolicy {
    fn is_endorsed(&self, keeper: KeeperId) -> bool;
}

// 9.1: haircut grows linearly with deposit size, bounded on both ends.
pub fn collateral_discount(amount: Decimal, config: &CollateralConfig) -> Decimal {
    if config.kind.is_settlement() {
        return Decimal::ZERO;
    }
    let raw = amount.abs() / config.skew_scale * config.discount_scalar;
    raw.max(config.min_discount).min(config.max_discount)
}

pub fn discounted_collateral_price(price: Price, amount: Decimal, config: &CollateralConfig) -> Decimal {
    price.value() * (Decimal::ONE - collateral_discount(amount, config))
}

#[derive(Debug, Default)]
struct MockOracleState {
    markets: HashMap<MarketId, Price>,
    collaterals: HashMap<CollateralKind, Price>,
    gas_token: Option<Price>,
}

/// Shared, cloneable in-memory oracle. clones see the same prices, so a host can
/// keep one handle and move prices while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MockOracle {
    inner: Arc<RwLock<MockOracleState>>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_market_price(&self, market_id: MarketId, price: Price) {
        if let Ok(mut state) = self.inner.write() {
            state.markets.insert(market_id, price);
        }
    }

    pub fn set_collateral_price(&self, kind: CollateralKind, price: Price) {
        if let Ok(mut state) = self.inner.write() {
            state.collaterals.insert(kind, price);
        }
    }

    pub fn set_gas_token_price(&self, price: Price) {
        if let Ok(mut state) = self.inner.write() {
            state.gas_token = Some(price);
        }
    }

    pub fn clear_market_price(&self, market_id: MarketId) {
        if let Ok(mut state) = self.inner.write() {
            state.markets.remove(&market_id);
        }
    }
}

impl PriceSource for MockOracle {
    fn market_price(&self, market_id: MarketId) -> Option<Price> {
        self.inner.read().ok()?.markets.get(&market_id).copied()
    }

    fn collateral_price(&self, kind: CollateralKind) -> Option<Price> {
        if kind.is_settlement() {
            return Some(Price::one());
        }
        self.inner.read().ok()?.collaterals.get(&kind).copied()
    }

    fn gas_token_price(&self) -> Option<Price> {
        self.inner.read().ok()?.gas_token
    }
}

/// Same rate for every market. cloneable handle like MockOracle.
#[derive(Debug, Clone, Default)]
pub struct FixedUtilization {
    rate: Arc<RwLock<Decimal>>,
}

impl FixedUtilization {
    pub fn new(rate: Decimal) -> Self {
        Self {
            rate: Arc::new(RwLock::new(rate)),
        }
    }

    pub fn set_rate(&self, rate: Decimal) {
        if let Ok(mut r) = self.rate.write() {
            *r = rate;
        }
    }
}

impl UtilizationSource for FixedUtilization {
    fn utilization_rate(&self, _market_id: MarketId) -> Decimal {
        self.rate.read().map(|r| *r).unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EndorsedKeepers {
    keepers: BTreeSet<KeeperId>,
}

impl EndorsedKeepers {
    pub fn new(keepers: impl IntoIterator<Item = KeeperId>) -> Self {
        Self {
            keepers: keepers.into_iter().collect(),
        }
    }
}

impl KeeperPolicy for EndorsedKeepers {
    fn is_endorsed(&self, keeper: KeeperId) -> bool {
        self.keepers.contains(&keeper)
    }
}
