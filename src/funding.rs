// 5.0: funding and utilization accrual. funding is velocity based: skew pushes the rate,
// the rate integrates into a per-unit accumulator. utilization is a plain annual cost on notional.
// 5.0 has the state structs. 5.1+ the math. everything here is pure; the engine owns the clock.

use crate::config::MarketConfig;
use crate::types::{Price, Quote, SignedSize, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingState {
    // rate (per day) as of last_computed_at
    pub rate_last_computed: Decimal,
    // per-unit funding owed to longs (USD), as of last_computed_at
    pub accrued_last_computed: Decimal,
    pub last_computed_at: Timestamp,
}

impl FundingState {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            rate_last_computed: Decimal::ZERO,
            accrued_last_computed: Decimal::ZERO,
            last_computed_at: timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationState {
    // annualized
    pub rate: Decimal,
    // per-USD-of-notional cost accumulated so far
    pub accrued_last_computed: Decimal,
    pub last_computed_at: Timestamp,
}

impl UtilizationState {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            rate: Decimal::ZERO,
            accrued_last_computed: Decimal::ZERO,
            last_computed_at: timestamp,
        }
    }
}

// 5.1: velocity = clamp(skew/skewScale, -1, 1) * maxVelocity, with a dead zone near zero
pub fn funding_velocity(skew: Decimal, config: &MarketConfig) -> Decimal {
    if config.skew_scale.is_zero() {
        return Decimal::ZERO;
    }
    let proportional = (skew / config.skew_scale).max(dec!(-1)).min(dec!(1));
    if proportional.abs() < config.funding_velocity_clamp {
        return Decimal::ZERO;
    }
    proportional * config.max_funding_velocity
}

// 5.2: rate drifts linearly with velocity since the last snapshot
pub fn current_funding_rate(
    state: &FundingState,
    skew: Decimal,
    config: &MarketConfig,
    now: Timestamp,
) -> Decimal {
    let elapsed_days = now.days_since(&state.last_computed_at);
    state.rate_last_computed + funding_velocity(skew, config) * elapsed_days
}

// 5.3: trapezoid of the rate over the interval, priced at the current price.
// positive rate means longs pay, so the per-unit accumulator moves the other way.
pub fn unrecorded_funding(
    state: &FundingState,
    skew: Decimal,
    config: &MarketConfig,
    price: Price,
    now: Timestamp,
) -> Decimal {
    let elapsed_days = now.days_since(&state.last_computed_at);
    let rate_now = current_funding_rate(state, skew, config, now);
    let avg_rate = (state.rate_last_computed + rate_now) / dec!(2);
    -avg_rate * elapsed_days * price.value()
}

pub fn next_funding_accrued(
    state: &FundingState,
    skew: Decimal,
    config: &MarketConfig,
    price: Price,
    now: Timestamp,
) -> Decimal {
    state.accrued_last_computed + unrecorded_funding(state, skew, config, price, now)
}

// 5.4: snapshot. idempotent at a fixed (now, price): the second call integrates zero time.
pub fn recompute_funding(
    state: &FundingState,
    skew: Decimal,
    config: &MarketConfig,
    price: Price,
    now: Timestamp,
) -> FundingState {
    FundingState {
        rate_last_computed: current_funding_rate(state, skew, config, now),
        accrued_last_computed: next_funding_accrued(state, skew, config, price, now),
        last_computed_at: now,
    }
}

// 5.5: funding since entry. positive = position receives.
pub fn accrued_funding(size: SignedSize, entry_accrued: Decimal, current_accrued: Decimal) -> Quote {
    Quote::new(size.value() * (current_accrued - entry_accrued))
}

pub fn unrecorded_utilization(state: &UtilizationState, now: Timestamp) -> Decimal {
    state.rate * now.years_since(&state.last_computed_at)
}

pub fn next_utilization_accrued(state: &UtilizationState, now: Timestamp) -> Decimal {
    state.accrued_last_computed + unrecorded_utilization(state, now)
}

// 5.6: integrate at the old rate, then adopt the collaborator's new rate
pub fn recompute_utilization(state: &UtilizationState, new_rate: Decimal, now: Timestamp) -> UtilizationState {
    UtilizationState {
        rate: new_rate.max(Decimal::ZERO),
        accrued_last_computed: next_utilization_accrued(state, now),
        last_computed_at: now,
    }
}

// 5.7: always a cost. notional at the current price times the accumulated rate-time.
pub fn accrued_utilization(
    size: SignedSize,
    price: Price,
    entry_accrued: Decimal,
    current_accrued: Decimal,
) -> Quote {
    let delta = (current_accrued - entry_accrued).max(Decimal::ZERO);
    Quote::new(size.abs() * price.value() * delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> MarketConfig {
        let mut c = MarketConfig::eth_perp();
        c.skew_scale = dec!(1_000_000);
        c.max_funding_velocity = dec!(9);
        c.funding_velocity_clamp = dec!(0.0001);
        c
    }

    #[test]
    fn velocity_proportional_to_skew() {
        // 100k / 1M = 0.1 * 9 = 0.9
        assert_eq!(funding_velocity(dec!(100_000), &config()), dec!(0.9));
        assert_eq!(funding_velocity(dec!(-100_000), &config()), dec!(-0.9));
    }

    #[test]
    fn velocity_clamped_to_max() {
        assert_eq!(funding_velocity(dec!(5_000_000), &config()), dec!(9));
        assert_eq!(funding_velocity(dec!(-5_000_000), &config()), dec!(-9));
    }

    #[test]
    fn velocity_dead_zone() {
        // 50 / 1M = 0.00005 < 0.0001 clamp
        assert_eq!(funding_velocity(dec!(50), &config()), Decimal::ZERO);
    }

    #[test]
    fn rate_drifts_with_velocity() {
        let state = FundingState::new(Timestamp::from_secs(0));
        let half_day = Timestamp::from_secs(43_200);
        let rate = current_funding_rate(&state, dec!(100_000), &config(), half_day);
        assert_eq!(rate, dec!(0.45));
    }

    #[test]
    fn unrecorded_funding_is_trapezoid() {
        let state = FundingState::new(Timestamp::from_secs(0));
        let one_day = Timestamp::from_secs(86_400);
        let price = Price::new_unchecked(dec!(1000));
        // rate goes 0 -> 0.9, avg 0.45, longs pay: -0.45 * 1 * 1000
        let f = unrecorded_funding(&state, dec!(100_000), &config(), price, one_day);
        assert_eq!(f, dec!(-450));
    }

    #[test]
    fn recompute_is_idempotent() {
        let state = FundingState::new(Timestamp::from_secs(0));
        let now = Timestamp::from_secs(3_600);
        let price = Price::new_unchecked(dec!(1000));

        let once = recompute_funding(&state, dec!(100_000), &config(), price, now);
        let twice = recompute_funding(&once, dec!(100_000), &config(), price, now);
        assert_eq!(once, twice);
    }

    #[test]
    fn recompute_preserves_next_accrued() {
        let state = FundingState::new(Timestamp::from_secs(0));
        let now = Timestamp::from_secs(7_200);
        let price = Price::new_unchecked(dec!(1500));

        let projected = next_funding_accrued(&state, dec!(-40_000), &config(), price, now);
        let snapped = recompute_funding(&state, dec!(-40_000), &config(), price, now);
        assert_eq!(snapped.accrued_last_computed, projected);
        assert_eq!(
            next_funding_accrued(&snapped, dec!(-40_000), &config(), price, now),
            projected
        );
    }

    #[test]
    fn accrued_funding_by_side() {
        // accumulator moved -450 per unit: longs pay, shorts receive
        assert_eq!(accrued_funding(SignedSize::new(dec!(2)), dec!(0), dec!(-450)).value(), dec!(-900));
        assert_eq!(accrued_funding(SignedSize::new(dec!(-2)), dec!(0), dec!(-450)).value(), dec!(900));
    }

    #[test]
    fn utilization_accrues_annually() {
        let state = UtilizationState {
            rate: dec!(0.1),
            accrued_last_computed: Decimal::ZERO,
            last_computed_at: Timestamp::from_secs(0),
        };
        let year = Timestamp::from_secs(365 * 86_400);
        assert_eq!(next_utilization_accrued(&state, year), dec!(0.1));

        let next = recompute_utilization(&state, dec!(0.2), year);
        assert_eq!(next.rate, dec!(0.2));
        assert_eq!(next.accrued_last_computed, dec!(0.1));
    }

    #[test]
    fn utilization_is_a_cost_for_both_sides() {
        let price = Price::new_unchecked(dec!(1000));
        let long = accrued_utilization(SignedSize::new(dec!(3)), price, dec!(0), dec!(0.01));
        let short = accrued_utilization(SignedSize::new(dec!(-3)), price, dec!(0), dec!(0.01));
        assert_eq!(long.value(), dec!(30));
        assert_eq!(short.value(), dec!(30));
    }
}
