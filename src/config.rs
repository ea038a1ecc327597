// 7.0 config.rs: all settings in one place. keeper economics, order ages, collateral, per-market risk.
// 7.1 GlobalConfig is shared by every market. 7.2 MarketConfig is per instrument.
// governance of these values lives outside the engine; we only validate what we're handed.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{CollateralKind, HookId, MarketId};

/** 7.1: engine-wide settings. keeper gas model, order lifetime, collateral and hook whitelists */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    // an order can't settle until it is this old (seconds)
    pub pending_order_min_age_secs: i64,
    // after this age an order is stale and must be replaced (seconds)
    pub max_order_age_secs: i64,
    // hard cap on any single keeper payout
    pub max_keeper_fee_usd: Decimal,
    // relative profit on top of tx cost (0.2 = 20%)
    pub keeper_profit_margin_percent: Decimal,
    // absolute profit on top of tx cost
    pub keeper_profit_margin_usd: Decimal,
    pub keeper_settlement_gas_units: Decimal,
    pub keeper_flag_gas_units: Decimal,
    pub keeper_liquidation_gas_units: Decimal,
    // collaterals accepted as margin. settlement currency is always accepted
    pub collaterals: Vec<CollateralConfig>,
    pub settlement_hooks: BTreeSet<HookId>,
    pub max_hooks_per_order: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            pending_order_min_age_secs: 8,
            max_order_age_secs: 60,
            max_keeper_fee_usd: dec!(100),
            keeper_profit_margin_percent: dec!(0.2),
            keeper_profit_margin_usd: dec!(5),
            keeper_settlement_gas_units: dec!(1_200_000),
            keeper_flag_gas_units: dec!(1_200_000),
            keeper_liquidation_gas_units: dec!(1_200_000),
            collaterals: vec![
                CollateralConfig::settlement(dec!(100_000_000)),
                CollateralConfig {
                    kind: CollateralKind::Eth,
                    max_allowable: dec!(100_000),
                    skew_scale: dec!(1_000_000),
                    discount_scalar: dec!(1),
                    min_discount: dec!(0.01),
                    max_discount: dec!(0.1),
                },
            ],
            settlement_hooks: BTreeSet::new(),
            max_hooks_per_order: 3,
        }
    }
}

impl GlobalConfig {
    pub fn collateral(&self, kind: CollateralKind) -> Option<&CollateralConfig> {
        self.collaterals.iter().find(|c| c.kind == kind)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pending_order_min_age_secs < 0
            || self.max_order_age_secs <= self.pending_order_min_age_secs
        {
            return Err(ConfigError::InvalidOrderAges {
                min_age_secs: self.pending_order_min_age_secs,
                max_age_secs: self.max_order_age_secs,
            });
        }

        if self.max_keeper_fee_usd < Decimal::ZERO
            || self.keeper_profit_margin_percent < Decimal::ZERO
            || self.keeper_profit_margin_usd < Decimal::ZERO
        {
            return Err(ConfigError::InvalidKeeperEconomics {
                reason: "keeper fee cap and profit margins must be non-negative".to_string(),
            });
        }

        for gas in [
            self.keeper_settlement_gas_units,
            self.keeper_flag_gas_units,
            self.keeper_liquidation_gas_units,
        ] {
            if gas < Decimal::ZERO {
                return Err(ConfigError::InvalidKeeperEconomics {
                    reason: format!("gas units must be non-negative, got {gas}"),
                });
            }
        }

        validate_collaterals(&self.collaterals)
    }
}

/** 7.2: collateral discount curve. bigger deposits get a bigger haircut */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralConfig {
    pub kind: CollateralKind,
    // market-wide deposit cap for this kind, in native units
    pub max_allowable: Decimal,
    pub skew_scale: Decimal,
    pub discount_scalar: Decimal,
    pub min_discount: Decimal,
    pub max_discount: Decimal,
}

impl CollateralConfig {
    pub fn settlement(max_allowable: Decimal) -> Self {
        Self {
            kind: CollateralKind::Usd,
            max_allowable,
            skew_scale: Decimal::ONE,
            discount_scalar: Decimal::ZERO,
            min_discount: Decimal::ZERO,
            max_discount: Decimal::ZERO,
        }
    }
}

pub fn validate_collaterals(collaterals: &[CollateralConfig]) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for c in collaterals {
        if !seen.insert(c.kind) {
            return Err(ConfigError::DuplicateCollateral(c.kind));
        }
        if c.max_allowable < Decimal::ZERO {
            return Err(ConfigError::InvalidCollateral {
                kind: c.kind,
                reason: "max allowable must be non-negative".to_string(),
            });
        }
        if c.skew_scale <= Decimal::ZERO {
            return Err(ConfigError::InvalidCollateral {
                kind: c.kind,
                reason: "skew scale must be positive".to_string(),
            });
        }
        if c.min_discount < Decimal::ZERO
            || c.min_discount > c.max_discount
            || c.max_discount >= Decimal::ONE
        {
            return Err(ConfigError::InvalidCollateral {
                kind: c.kind,
                reason: format!(
                    "discount bounds must satisfy 0 <= min ({}) <= max ({}) < 1",
                    c.min_discount, c.max_discount
                ),
            });
        }
        if c.kind.is_settlement() && !c.max_discount.is_zero() {
            return Err(ConfigError::InvalidCollateral {
                kind: c.kind,
                reason: "settlement currency cannot be discounted".to_string(),
            });
        }
    }
    Ok(())
}

/** 7.3: per-market risk parameters. immutable until the market is reconfigured */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub id: MarketId,
    // Human readable name (e.g. "ETH-PERP")
    pub name: String,
    // skew at which the fill premium reaches 100%
    pub skew_scale: Decimal,
    // per-side open interest cap
    pub max_market_size: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    // funding rate change per day at full proportional skew
    pub max_funding_velocity: Decimal,
    // |skew/skewScale| below this produces zero velocity
    pub funding_velocity_clamp: Decimal,
    pub min_margin_usd: Decimal,
    pub min_margin_ratio: Decimal,
    pub incremental_margin_scalar: Decimal,
    pub maintenance_margin_scalar: Decimal,
    pub max_initial_margin_ratio: Decimal,
    // flag reward as a fraction of notional
    pub liquidation_reward_percent: Decimal,
    pub liquidation_limit_scalar: Decimal,
    pub liquidation_window_duration_secs: i64,
    // |skew|/skewScale at or below this lets anyone bypass the capacity cap
    pub liquidation_max_price_deviation: Decimal,
}

impl MarketConfig {
    /// Default ETH-PERP market configuration
    pub fn eth_perp() -> Self {
        Self {
            id: MarketId(1),
            name: "ETH-PERP".to_string(),
            skew_scale: dec!(1_000_000),
            max_market_size: dec!(500_000),
            maker_fee: dec!(0.0002),
            taker_fee: dec!(0.0006),
            max_funding_velocity: dec!(9),
            funding_velocity_clamp: dec!(0.000001),
            min_margin_usd: dec!(50),
            min_margin_ratio: dec!(0.02),
            incremental_margin_scalar: dec!(1),
            maintenance_margin_scalar: dec!(0.5),
            max_initial_margin_ratio: dec!(0.9),
            liquidation_reward_percent: dec!(0.0001),
            liquidation_limit_scalar: dec!(1),
            liquidation_window_duration_secs: 30,
            liquidation_max_price_deviation: dec!(0.04),
        }
    }

    pub fn with_id(mut self, id: MarketId, name: &str) -> Self {
        self.id = id;
        self.name = name.to_string();
        self
    }

    /// (makerFee + takerFee) × skewScale × liquidationLimitScalar
    pub fn max_liquidatable_capacity(&self) -> Decimal {
        (self.maker_fee + self.taker_fee) * self.skew_scale * self.liquidation_limit_scalar
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidMarket {
            market: self.id,
            reason,
        };

        if self.skew_scale <= Decimal::ZERO {
            return Err(invalid("skew scale must be positive".to_string()));
        }
        if self.max_market_size < Decimal::ZERO {
            return Err(invalid("max market size must be non-negative".to_string()));
        }
        if self.maker_fee < Decimal::ZERO
            || self.taker_fee < Decimal::ZERO
            || self.maker_fee >= Decimal::ONE
            || self.taker_fee >= Decimal::ONE
        {
            return Err(invalid(format!(
                "fees must be in [0, 1), got maker {} taker {}",
                self.maker_fee, self.taker_fee
            )));
        }
        if self.max_funding_velocity < Decimal::ZERO || self.funding_velocity_clamp < Decimal::ZERO {
            return Err(invalid("funding velocity params must be non-negative".to_string()));
        }
        if self.min_margin_usd < Decimal::ZERO
            || self.min_margin_ratio < Decimal::ZERO
            || self.incremental_margin_scalar < Decimal::ZERO
        {
            return Err(invalid("margin params must be non-negative".to_string()));
        }
        if self.maintenance_margin_scalar <= Decimal::ZERO || self.maintenance_margin_scalar > Decimal::ONE {
            return Err(invalid(format!(
                "maintenance margin scalar must be in (0, 1], got {}",
                self.maintenance_margin_scalar
            )));
        }
        if self.max_initial_margin_ratio < self.min_margin_ratio {
            return Err(invalid("max initial margin ratio below min margin ratio".to_string()));
        }
        if self.liquidation_reward_percent < Decimal::ZERO
            || self.liquidation_limit_scalar < Decimal::ZERO
            || self.liquidation_max_price_deviation < Decimal::ZERO
        {
            return Err(invalid("liquidation params must be non-negative".to_string()));
        }
        if self.liquidation_window_duration_secs <= 0 {
            return Err(invalid("liquidation window must be positive".to_string()));
        }
        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid market {market:?} config: {reason}")]
    InvalidMarket { market: MarketId, reason: String },

    #[error("Invalid collateral {kind:?} config: {reason}")]
    InvalidCollateral { kind: CollateralKind, reason: String },

    #[error("Collateral {0:?} configured twice")]
    DuplicateCollateral(CollateralKind),

    #[error("Collateral {0:?} still has deposits and cannot be removed")]
    CollateralInUse(CollateralKind),

    #[error("Invalid order ages: min {min_age_secs}s, max {max_age_secs}s")]
    InvalidOrderAges { min_age_secs: i64, max_age_secs: i64 },

    #[error("Invalid keeper economics: {reason}")]
    InvalidKeeperEconomics { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_valid() {
        assert!(GlobalConfig::default().validate().is_ok());
        assert!(MarketConfig::eth_perp().validate().is_ok());
    }

    #[test]
    fn max_liquidatable_capacity_from_fees() {
        let mut config = MarketConfig::eth_perp();
        config.maker_fee = dec!(0.0002);
        config.taker_fee = dec!(0.0002);
        config.skew_scale = dec!(1_000_000);
        config.liquidation_limit_scalar = dec!(0.01);

        assert_eq!(config.max_liquidatable_capacity(), dec!(4));
    }

    #[test]
    fn rejects_zero_skew_scale() {
        let mut config = MarketConfig::eth_perp();
        config.skew_scale = Decimal::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMarket { .. })));
    }

    #[test]
    fn rejects_bad_maintenance_scalar() {
        let mut config = MarketConfig::eth_perp();
        config.maintenance_margin_scalar = dec!(1.5);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMarket { .. })));
    }

    #[test]
    fn rejects_duplicate_collateral() {
        let mut config = GlobalConfig::default();
        config.collaterals.push(CollateralConfig::settlement(dec!(1)));
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateCollateral(CollateralKind::Usd))
        );
    }

    #[test]
    fn rejects_inverted_discounts() {
        let mut config = GlobalConfig::default();
        config.collaterals[1].min_discount = dec!(0.5);
        config.collaterals[1].max_discount = dec!(0.2);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCollateral { .. })));
    }

    #[test]
    fn rejects_inverted_order_ages() {
        let mut config = GlobalConfig::default();
        config.max_order_age_secs = config.pending_order_min_age_secs;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidOrderAges { .. })));
    }

    #[test]
    fn config_serialization() {
        let config = MarketConfig::eth_perp();
        let json = serde_json::to_string(&config).unwrap();
        let back: MarketConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, config.name);
        assert_eq!(back.skew_scale, config.skew_scale);

        let global = GlobalConfig::default();
        let json = serde_json::to_string(&global).unwrap();
        let back: GlobalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.collaterals, global.collaterals);
    }
}
