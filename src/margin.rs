//! Margin calculation for initial and maintenance requirements.
//!
//! Initial margin ratio grows with position size relative to skew scale, so large
//! positions need proportionally more collateral. Maintenance margin is a fixed
//! fraction of initial, plus the keeper costs of flagging and liquidating so a
//! position is always flagged while it can still pay for its own liquidation.
//!
//! Collateral counts towards margin at its discounted value.

use crate::account::AccountMargin;
use crate::config::{GlobalConfig, MarketConfig};
use crate::liquidation::{flag_keeper_reward, liquidation_keeper_fee, KeeperCost};
use crate::price_feed::discounted_collateral_price;
use crate::types::{CollateralKind, Price, Quote, SignedSize};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginRequirement {
    pub initial: Quote,
    pub maintenance: Quote,
    pub initial_margin_ratio: Decimal,
    pub maintenance_margin_ratio: Decimal,
    pub flag_reward: Quote,
    pub liquidation_fee: Quote,
}

pub fn notional_value(size: SignedSize, price: Price) -> Quote {
    Quote::new(size.abs() * price.value())
}

// 12.1: imr = min(|size| / skewScale * incrementalScalar + minRatio, maxInitialRatio)
pub fn initial_margin_ratio(size: SignedSize, config: &MarketConfig) -> Decimal {
    let incremental = size.abs() / config.skew_scale * config.incremental_margin_scalar;
    (incremental + config.min_margin_ratio).min(config.max_initial_margin_ratio)
}

pub fn calculate_margin_requirement(
    size: SignedSize,
    price: Price,
    market: &MarketConfig,
    global: &GlobalConfig,
    keeper_cost: &KeeperCost,
) -> MarginRequirement {
    if size.is_zero() {
        return MarginRequirement {
            initial: Quote::zero(),
            maintenance: Quote::zero(),
            initial_margin_ratio: Decimal::ZERO,
            maintenance_margin_ratio: Decimal::ZERO,
            flag_reward: Quote::zero(),
            liquidation_fee: Quote::zero(),
        };
    }

    let notional = notional_value(size, price);
    let imr = initial_margin_ratio(size, market);
    let mmr = imr * market.maintenance_margin_scalar;
    let min_margin = Quote::new(market.min_margin_usd);

    let flag_reward = flag_keeper_reward(notional, market, global, keeper_cost);
    let liquidation_fee = liquidation_keeper_fee(size.abs(), market, global, keeper_cost);

    let initial = notional.mul(imr).add(min_margin);
    let maintenance = notional
        .mul(mmr)
        .add(min_margin)
        .add(flag_reward)
        .add(liquidation_fee);

    MarginRequirement {
        initial,
        maintenance,
        initial_margin_ratio: imr,
        maintenance_margin_ratio: mmr,
        flag_reward,
        liquidation_fee,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralValue {
    pub kind: CollateralKind,
    pub amount: Decimal,
    pub price: Price,
    pub discounted_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralValuation {
    pub entries: Vec<CollateralValue>,
    pub collateral_usd: Quote,
    pub discounted_collateral_usd: Quote,
}

// entries come out in collateral kind order (BTreeMap), so digests are stable
pub fn value_collateral(
    margin: &AccountMargin,
    global: &GlobalConfig,
    price_of: impl Fn(CollateralKind) -> Option<Price>,
) -> Result<CollateralValuation, MarginError> {
    let mut entries = Vec::with_capacity(margin.collateral.len());
    let mut collateral_usd = Decimal::ZERO;
    let mut discounted_usd = Decimal::ZERO;

    for (&kind, &amount) in &margin.collateral {
        if amount.is_zero() {
            continue;
        }
        let config = global
            .collateral(kind)
            .ok_or(MarginError::UnsupportedCollateral(kind))?;
        let price = price_of(kind).ok_or(MarginError::MissingCollateralPrice(kind))?;
        let discounted_price = discounted_collateral_price(price, amount, config);

        collateral_usd += amount * price.value();
        discounted_usd += amount * discounted_price;
        entries.push(CollateralValue {
            kind,
            amount,
            price,
            discounted_price,
        });
    }

    Ok(CollateralValuation {
        entries,
        collateral_usd: Quote::new(collateral_usd),
        discounted_collateral_usd: Quote::new(discounted_usd),
    })
}

// 12.2: collateral + pnl + funding - utilization - debt
pub fn margin_usd(
    collateral_usd: Quote,
    price_pnl: Quote,
    accrued_funding: Quote,
    accrued_utilization: Quote,
    debt_usd: Quote,
) -> Quote {
    collateral_usd
        .add(price_pnl)
        .add(accrued_funding)
        .sub(accrued_utilization)
        .sub(debt_usd)
}

pub fn health_factor(margin: Quote, maintenance: Quote) -> Decimal {
    if maintenance.value() <= Decimal::ZERO {
        return Decimal::MAX;
    }
    margin.value() / maintenance.value()
}

pub fn is_liquidatable(health: Decimal) -> bool {
    health <= Decimal::ONE
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarginError {
    #[error("Collateral {0:?} is not supported")]
    UnsupportedCollateral(CollateralKind),

    #[error("No price available for collateral {0:?}")]
    MissingCollateralPrice(CollateralKind),
}
