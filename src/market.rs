//! Market aggregate: skew, open interest, accumulators and the debt-correction identity.
//!
//! One `Market` per instrument. Every settlement or liquidation chunk goes through
//! [`Market::apply_position_change`], which keeps
//! `debt_correction == Σ size × (entryPrice + entryFunding)` over all open positions.
//! With that identity, [`Market::reported_debt`] equals deposited collateral plus
//! every trader's unrealized pnl and funding, minus trader debt.

use crate::config::MarketConfig;
use crate::funding::{self, FundingState, UtilizationState};
use crate::liquidation::LiquidationWindow;
use crate::margin::MarginError;
use crate::position::{debt_correction_term, Position};
use crate::types::{CollateralKind, MarketId, Price, Quote, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub config: MarketConfig,
    /// Signed sum of all position sizes.
    pub skew: Decimal,
    /// Sum of |size| over all positions.
    pub size: Decimal,
    pub funding: FundingState,
    pub utilization: UtilizationState,
    pub debt_correction: Decimal,
    pub total_trader_debt_usd: Quote,
    /// Native units per collateral kind across every account in this market.
    pub deposited_collateral: BTreeMap<CollateralKind, Decimal>,
    pub liquidation_window: LiquidationWindow,
    pub created_at: Timestamp,
    pub last_updated: Timestamp,
}

/// How one debt-correction update splits up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DebtCorrectionDelta {
    pub notional_delta: Decimal,
    pub funding_delta: Decimal,
    pub total_position_pnl_delta: Decimal,
}

impl DebtCorrectionDelta {
    pub fn total(&self) -> Decimal {
        self.notional_delta + self.funding_delta + self.total_position_pnl_delta
    }
}

impl Market {
    pub fn new(config: MarketConfig, timestamp: Timestamp) -> Self {
        let capacity = config.max_liquidatable_capacity();
        Self {
            config,
            skew: Decimal::ZERO,
            size: Decimal::ZERO,
            funding: FundingState::new(timestamp),
            utilization: UtilizationState::new(timestamp),
            debt_correction: Decimal::ZERO,
            total_trader_debt_usd: Quote::zero(),
            deposited_collateral: BTreeMap::new(),
            liquidation_window: LiquidationWindow::new(capacity),
            created_at: timestamp,
            last_updated: timestamp,
        }
    }

    pub fn id(&self) -> MarketId {
        self.config.id
    }

    pub fn long_open_interest(&self) -> Decimal {
        (self.size + self.skew) / dec!(2)
    }

    pub fn short_open_interest(&self) -> Decimal {
        (self.size - self.skew) / dec!(2)
    }

    /// True if moving one position from `old_size` to `new_size` pushes either side past the cap.
    pub fn exceeds_max_market_size(&self, old_size: Decimal, new_size: Decimal) -> bool {
        let long = self.long_open_interest() - old_size.max(Decimal::ZERO) + new_size.max(Decimal::ZERO);
        let short = self.short_open_interest() - (-old_size).max(Decimal::ZERO) + (-new_size).max(Decimal::ZERO);
        let grows_long = new_size > old_size && new_size > Decimal::ZERO;
        let grows_short = new_size < old_size && new_size < Decimal::ZERO;
        (grows_long && long > self.config.max_market_size)
            || (grows_short && short > self.config.max_market_size)
    }

    pub fn current_funding_velocity(&self) -> Decimal {
        funding::funding_velocity(self.skew, &self.config)
    }

    pub fn current_funding_rate(&self, now: Timestamp) -> Decimal {
        funding::current_funding_rate(&self.funding, self.skew, &self.config, now)
    }

    /// Per-unit funding accumulator as of `now`, including what hasn't been snapshotted.
    pub fn current_funding_accrued(&self, price: Price, now: Timestamp) -> Decimal {
        funding::next_funding_accrued(&self.funding, self.skew, &self.config, price, now)
    }

    pub fn current_utilization_accrued(&self, now: Timestamp) -> Decimal {
        funding::next_utilization_accrued(&self.utilization, now)
    }

    pub fn recompute_funding(&mut self, price: Price, now: Timestamp) -> &FundingState {
        self.funding = funding::recompute_funding(&self.funding, self.skew, &self.config, price, now);
        self.last_updated = now;
        &self.funding
    }

    pub fn recompute_utilization(&mut self, rate: Decimal, now: Timestamp) -> &UtilizationState {
        self.utilization = funding::recompute_utilization(&self.utilization, rate, now);
        self.last_updated = now;
        &self.utilization
    }

    // 3.1: swap one position's contribution for its replacement. skew, size and the
    // debt correction all move together so the identity never drifts.
    pub fn apply_position_change(
        &mut self,
        old: Option<&Position>,
        new: Option<&Position>,
        fill_price: Price,
        funding_accrued: Decimal,
    ) -> DebtCorrectionDelta {
        let old_size = old.map(|p| p.size.value()).unwrap_or(Decimal::ZERO);
        let new_size = new.map(|p| p.size.value()).unwrap_or(Decimal::ZERO);
        let size_delta = new_size - old_size;

        let total = debt_correction_term(new) - debt_correction_term(old);
        let notional_delta = fill_price.value() * size_delta;
        let funding_delta = funding_accrued * size_delta;
        let delta = DebtCorrectionDelta {
            notional_delta,
            funding_delta,
            total_position_pnl_delta: total - notional_delta - funding_delta,
        };

        self.skew += size_delta;
        self.size += new_size.abs() - old_size.abs();
        self.debt_correction += delta.total();
        delta
    }

    pub fn deposit_collateral(&mut self, kind: CollateralKind, amount: Decimal) {
        *self.deposited_collateral.entry(kind).or_insert(Decimal::ZERO) += amount;
    }

    pub fn withdraw_collateral(&mut self, kind: CollateralKind, amount: Decimal) {
        let entry = self.deposited_collateral.entry(kind).or_insert(Decimal::ZERO);
        *entry = (*entry - amount).max(Decimal::ZERO);
        if entry.is_zero() {
            self.deposited_collateral.remove(&kind);
        }
    }

    pub fn deposited(&self, kind: CollateralKind) -> Decimal {
        self.deposited_collateral.get(&kind).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn add_trader_debt(&mut self, delta: Decimal) {
        self.total_trader_debt_usd = Quote::new((self.total_trader_debt_usd.value() + delta).max(Decimal::ZERO));
    }

    /// Undiscounted USD value of everything deposited in this market.
    pub fn total_collateral_value(
        &self,
        price_of: impl Fn(CollateralKind) -> Option<Price>,
    ) -> Result<Quote, MarginError> {
        let mut total = Decimal::ZERO;
        for (&kind, &amount) in &self.deposited_collateral {
            let price = if kind.is_settlement() {
                Price::one()
            } else {
                price_of(kind).ok_or(MarginError::MissingCollateralPrice(kind))?
            };
            total += amount * price.value();
        }
        Ok(Quote::new(total))
    }

    // 3.2: collateral + skew × (price + funding now) − debtCorrection − traderDebt.
    // unclamped; negative means traders owe the pool.
    pub fn reported_debt(&self, collateral_value: Quote, price: Price, now: Timestamp) -> Quote {
        let funding_now = self.current_funding_accrued(price, now);
        Quote::new(
            collateral_value.value() + self.skew * (price.value() + funding_now)
                - self.debt_correction
                - self.total_trader_debt_usd.value(),
        )
    }

    pub fn max_liquidatable_capacity(&self) -> Decimal {
        self.config.max_liquidatable_capacity()
    }

    pub fn remaining_liquidatable_capacity(&self, now: Timestamp) -> Decimal {
        self.liquidation_window.remaining_at(
            self.max_liquidatable_capacity(),
            self.config.liquidation_window_duration_secs,
            now,
        )
    }

    pub fn advance_liquidation_window(&mut self, now: Timestamp) {
        let max = self.max_liquidatable_capacity();
        self.liquidation_window
            .advance(max, self.config.liquidation_window_duration_secs, now);
    }
}
