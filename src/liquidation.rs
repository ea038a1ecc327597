//! Liquidation economics and the per-market capacity window.
//!
//! A position moves `Safe -> Liquidatable -> Flagged -> (partial chunks) -> Closed`.
//! This module owns the pure parts of that machine: keeper rewards, the rolling
//! capacity window that throttles how much size can be closed per window, and the
//! chunk sizing rule with its two bypasses (endorsed keeper, balanced skew).
//! The engine drives the transitions.

use crate::config::{GlobalConfig, MarketConfig};
use crate::types::{Quote, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Inputs for pricing a keeper transaction, read once per call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeeperCost {
    // USD per unit of gas token
    pub gas_token_price: Decimal,
    // gas token per gas unit
    pub base_fee_per_gas: Decimal,
}

impl KeeperCost {
    pub fn tx_cost(&self, gas_units: Decimal) -> Decimal {
        gas_units * self.base_fee_per_gas * self.gas_token_price
    }
}

// tx cost plus whichever profit margin (relative or absolute) pays the keeper more
pub fn cost_based_reward(gas_units: Decimal, global: &GlobalConfig, cost: &KeeperCost) -> Decimal {
    let tx_cost = cost.tx_cost(gas_units);
    let relative = tx_cost * (Decimal::ONE + global.keeper_profit_margin_percent);
    let absolute = tx_cost + global.keeper_profit_margin_usd;
    relative.max(absolute)
}

pub fn settlement_keeper_fee(global: &GlobalConfig, cost: &KeeperCost) -> Quote {
    let reward = cost_based_reward(global.keeper_settlement_gas_units, global, cost);
    Quote::new(reward.min(global.max_keeper_fee_usd))
}

/// Flag reward before the collateral cap: max(cost based, notional percent), capped at the keeper max.
pub fn flag_keeper_reward(
    notional: Quote,
    market: &MarketConfig,
    global: &GlobalConfig,
    cost: &KeeperCost,
) -> Quote {
    let cost_based = cost_based_reward(global.keeper_flag_gas_units, global, cost);
    let notional_based = notional.value() * market.liquidation_reward_percent;
    Quote::new(cost_based.max(notional_based).min(global.max_keeper_fee_usd))
}

// never pay out more than the account actually had
pub fn capped_flag_reward(reward: Quote, collateral_value: Quote) -> Quote {
    reward.min(collateral_value.max(Quote::zero()))
}

/// Number of capacity-sized chunks needed to close `size`. Zero capacity means one shot.
pub fn liquidation_iterations(size: Decimal, max_capacity: Decimal) -> Decimal {
    if max_capacity <= Decimal::ZERO {
        return Decimal::ONE;
    }
    (size.abs() / max_capacity).ceil().max(Decimal::ONE)
}

/// Total fee for liquidating `size` from flag to close.
pub fn liquidation_keeper_fee(
    size: Decimal,
    market: &MarketConfig,
    global: &GlobalConfig,
    cost: &KeeperCost,
) -> Quote {
    let iterations = liquidation_iterations(size, market.max_liquidatable_capacity());
    let per_iteration = cost_based_reward(global.keeper_liquidation_gas_units, global, cost);
    Quote::new((iterations * per_iteration).min(global.max_keeper_fee_usd))
}

// pro-rata share of the full fee. the closing chunk takes whatever is left so the
// chunks always add up to the full fee.
pub fn liquidation_chunk_fee(
    total_fee: Quote,
    flagged_size: Decimal,
    chunk: Decimal,
    closes_position: bool,
    already_paid: Quote,
) -> Quote {
    let remaining = total_fee.sub(already_paid).max(Quote::zero());
    if closes_position || flagged_size.is_zero() {
        return remaining;
    }
    total_fee.mul(chunk / flagged_size).min(remaining)
}

// pd = |skew| / skewScale
pub fn price_deviation(skew: Decimal, skew_scale: Decimal) -> Decimal {
    if skew_scale.is_zero() {
        return Decimal::ZERO;
    }
    skew.abs() / skew_scale
}

pub fn bypasses_capacity(endorsed: bool, skew: Decimal, market: &MarketConfig) -> bool {
    endorsed || price_deviation(skew, market.skew_scale) <= market.liquidation_max_price_deviation
}

/// Rolling liquidation window. `None` means no liquidation has happened yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationWindow {
    pub last_liquidation_at: Option<Timestamp>,
    pub remaining_capacity: Decimal,
}

impl LiquidationWindow {
    pub fn new(max_capacity: Decimal) -> Self {
        Self {
            last_liquidation_at: None,
            remaining_capacity: max_capacity,
        }
    }

    fn expired(&self, window_secs: i64, now: Timestamp) -> bool {
        match self.last_liquidation_at {
            None => true,
            Some(last) => now.millis_since(&last) >= window_secs * 1000,
        }
    }

    /// Capacity available at `now` without mutating the window.
    pub fn remaining_at(&self, max_capacity: Decimal, window_secs: i64, now: Timestamp) -> Decimal {
        if self.expired(window_secs, now) {
            max_capacity
        } else {
            self.remaining_capacity
        }
    }

    /// Resets the window if it has elapsed. Same-timestamp calls stay in one window.
    pub fn advance(&mut self, max_capacity: Decimal, window_secs: i64, now: Timestamp) {
        if self.expired(window_secs, now) {
            self.remaining_capacity = max_capacity;
        }
    }

    pub fn consume(&mut self, chunk: Decimal, now: Timestamp) {
        self.remaining_capacity = (self.remaining_capacity - chunk).max(Decimal::ZERO);
        self.last_liquidation_at = Some(now);
    }

    /// Used capacity in the current window.
    pub fn used(&self, max_capacity: Decimal) -> Decimal {
        (max_capacity - self.remaining_capacity).max(Decimal::ZERO)
    }
}

// full size when bypassed, otherwise whatever the window still allows
pub fn liquidatable_chunk(size: Decimal, remaining_capacity: Decimal, bypass: bool) -> Decimal {
    if bypass {
        size.abs()
    } else {
        size.abs().min(remaining_capacity.max(Decimal::ZERO))
    }
}

/// Where a position sits in the liquidation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationStatus {
    NoPosition,
    Safe,
    Liquidatable,
    Flagged,
}

impl LiquidationStatus {
    pub fn evaluate(has_position: bool, flagged: bool, health: Decimal) -> Self {
        if !has_position {
            LiquidationStatus::NoPosition
        } else if flagged {
            LiquidationStatus::Flagged
        } else if health <= Decimal::ONE {
            LiquidationStatus::Liquidatable
        } else {
            LiquidationStatus::Safe
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market() -> MarketConfig {
        let mut m = MarketConfig::eth_perp();
        m.skew_scale = dec!(1_000_000);
        m.maker_fee = dec!(0.0002);
        m.taker_fee = dec!(0.0002);
        m.liquidation_limit_scalar = dec!(0.01);
        m.liquidation_window_duration_secs = 30;
        m.liquidation_max_price_deviation = dec!(0.04);
        m.liquidation_reward_percent = dec!(0.01);
        m
    }

    fn global() -> GlobalConfig {
        GlobalConfig {
            max_keeper_fee_usd: dec!(1000),
            keeper_profit_margin_percent: dec!(0.2),
            keeper_profit_margin_usd: dec!(5),
            keeper_flag_gas_units: dec!(1_000_000),
            keeper_liquidation_gas_units: dec!(1_000_000),
            keeper_settlement_gas_units: dec!(500_000),
            ..GlobalConfig::default()
        }
    }

    fn cost() -> KeeperCost {
        // 1M gas * 0.00000001 * 2000 = 20 USD per tx
        KeeperCost {
            gas_token_price: dec!(2000),
            base_fee_per_gas: dec!(0.00000001),
        }
    }

    #[test]
    fn cost_based_picks_larger_margin() {
        // 20 * 1.2 = 24 vs 20 + 5 = 25
        assert_eq!(cost_based_reward(dec!(1_000_000), &global(), &cost()), dec!(25));
        // 100 * 1.2 = 120 vs 105
        assert_eq!(cost_based_reward(dec!(5_000_000), &global(), &cost()), dec!(120));
    }

    #[test]
    fn settlement_fee_capped() {
        let mut g = global();
        assert_eq!(settlement_keeper_fee(&g, &cost()).value(), dec!(15));
        g.max_keeper_fee_usd = dec!(12);
        assert_eq!(settlement_keeper_fee(&g, &cost()).value(), dec!(12));
    }

    #[test]
    fn flag_reward_uses_notional_when_larger() {
        let small = flag_keeper_reward(Quote::new(dec!(1000)), &market(), &global(), &cost());
        assert_eq!(small.value(), dec!(25));
        let big = flag_keeper_reward(Quote::new(dec!(10_000)), &market(), &global(), &cost());
        assert_eq!(big.value(), dec!(100));
        assert_eq!(capped_flag_reward(big, Quote::new(dec!(40))).value(), dec!(40));
        assert!(capped_flag_reward(big, Quote::new(dec!(-3))).is_zero());
    }

    #[test]
    fn iterations_round_up() {
        assert_eq!(market().max_liquidatable_capacity(), dec!(4));
        assert_eq!(liquidation_iterations(dec!(10), dec!(4)), dec!(3));
        assert_eq!(liquidation_iterations(dec!(8), dec!(4)), dec!(2));
        assert_eq!(liquidation_iterations(dec!(-1), dec!(4)), dec!(1));
        assert_eq!(liquidation_iterations(dec!(10), dec!(0)), dec!(1));
    }

    #[test]
    fn chunk_fees_sum_to_full_fee() {
        let total = liquidation_keeper_fee(dec!(10), &market(), &global(), &cost());
        assert_eq!(total.value(), dec!(75));

        let mut paid = Quote::zero();
        for (chunk, closes) in [(dec!(4), false), (dec!(4), false), (dec!(2), true)] {
            let fee = liquidation_chunk_fee(total, dec!(10), chunk, closes, paid);
            paid = paid.add(fee);
        }
        assert_eq!(paid, total);
    }

    #[test]
    fn thirds_still_sum_exactly() {
        let total = Quote::new(dec!(100));
        let mut paid = Quote::zero();
        for (chunk, closes) in [(dec!(1), false), (dec!(1), false), (dec!(1), true)] {
            paid = paid.add(liquidation_chunk_fee(total, dec!(3), chunk, closes, paid));
        }
        assert_eq!(paid, total);
    }

    #[test]
    fn window_reset_boundary() {
        let max = dec!(4);
        let t0 = Timestamp::from_secs(1_000);
        let mut window = LiquidationWindow::new(max);
        window.advance(max, 30, t0);
        window.consume(dec!(4), t0);

        assert_eq!(window.remaining_at(max, 30, t0.plus_secs(15)), Decimal::ZERO);
        assert_eq!(window.remaining_at(max, 30, t0.plus_secs(29)), Decimal::ZERO);
        assert_eq!(window.remaining_at(max, 30, t0.plus_secs(30)), max);
        assert_eq!(window.remaining_at(max, 30, t0.plus_secs(90)), max);
    }

    #[test]
    fn same_instant_merges_usage() {
        let max = dec!(4);
        let t0 = Timestamp::from_secs(50);
        let mut window = LiquidationWindow::new(max);

        window.advance(max, 30, t0);
        window.consume(dec!(3), t0);
        window.advance(max, 30, t0);
        let chunk = liquidatable_chunk(dec!(10), window.remaining_capacity, false);
        assert_eq!(chunk, dec!(1));
        window.consume(chunk, t0);
        assert_eq!(window.used(max), max);
    }

    #[test]
    fn bypass_rules() {
        let m = market();
        assert!(bypasses_capacity(false, dec!(40_000), &m));
        assert!(!bypasses_capacity(false, dec!(-40_001), &m));
        assert!(bypasses_capacity(true, dec!(900_000), &m));
        assert_eq!(liquidatable_chunk(dec!(-10), dec!(4), true), dec!(10));
        assert_eq!(liquidatable_chunk(dec!(-10), dec!(4), false), dec!(4));
    }

    #[test]
    fn status_machine() {
        assert_eq!(LiquidationStatus::evaluate(false, false, dec!(0.5)), LiquidationStatus::NoPosition);
        assert_eq!(LiquidationStatus::evaluate(true, false, dec!(1)), LiquidationStatus::Liquidatable);
        assert_eq!(LiquidationStatus::evaluate(true, false, dec!(1.01)), LiquidationStatus::Safe);
        assert_eq!(LiquidationStatus::evaluate(true, true, dec!(5)), LiquidationStatus::Flagged);
    }
}
