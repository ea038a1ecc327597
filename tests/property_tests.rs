//! Property-based tests for the core math.
//!
//! These tests verify invariants hold under random inputs.

use perps_risk::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1_000i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)) // $10 to $10,000
}

fn size_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..100_000i64).prop_map(|x| Decimal::new(x, 2)) // 0.01 to 1,000
}

fn signed_size_strategy() -> impl Strategy<Value = Decimal> {
    (-100_000i64..100_000i64).prop_map(|x| Decimal::new(x, 2))
}

fn market_at(secs: i64) -> Market {
    Market::new(MarketConfig::eth_perp(), Timestamp::from_secs(secs))
}

fn open(market: &mut Market, size: Decimal, entry: Decimal, now: Timestamp) -> Position {
    let price = Price::new_unchecked(entry);
    let position = Position::new(
        market.id(),
        SignedSize::new(size),
        price,
        price,
        market.funding.accrued_last_computed,
        market.utilization.accrued_last_computed,
        now,
    );
    market.apply_position_change(None, Some(&position), price, market.funding.accrued_last_computed);
    position
}

proptest! {
    /// Buying more never gets a better price.
    #[test]
    fn fill_price_monotonic_in_size(
        skew in signed_size_strategy(),
        a in signed_size_strategy(),
        b in signed_size_strategy(),
        oracle in price_strategy(),
    ) {
        let scale = dec!(1_000_000);
        let oracle = Price::new_unchecked(oracle);
        let (small, large) = if a <= b { (a, b) } else { (b, a) };
        let lo = fill_price(skew, scale, small, oracle).unwrap();
        let hi = fill_price(skew, scale, large, oracle).unwrap();
        prop_assert!(lo <= hi);
    }

    /// A zero-skew market trading to zero skew fills at the oracle.
    #[test]
    fn fill_price_symmetric_around_oracle(
        size in size_strategy(),
        oracle in price_strategy(),
    ) {
        let scale = dec!(1_000_000);
        let oracle = Price::new_unchecked(oracle);
        let open = fill_price(Decimal::ZERO, scale, size, oracle).unwrap();
        let close = fill_price(size, scale, -size, oracle).unwrap();
        prop_assert_eq!(open, close);
        prop_assert!(open >= oracle);
    }

    /// Once longs and shorts net out, reported debt no longer depends on price.
    #[test]
    fn skew_zero_reported_debt_price_independent(
        sizes in proptest::collection::vec((size_strategy(), price_strategy(), price_strategy()), 1..8),
        p1 in price_strategy(),
        p2 in price_strategy(),
    ) {
        let now = Timestamp::from_secs(100);
        let mut market = market_at(100);
        for (size, long_entry, short_entry) in sizes {
            open(&mut market, size, long_entry, now);
            open(&mut market, -size, short_entry, now);
        }
        prop_assert!(market.skew.is_zero());

        let collateral = Quote::new(dec!(1_000_000));
        let at_p1 = market.reported_debt(collateral, Price::new_unchecked(p1), now);
        let at_p2 = market.reported_debt(collateral, Price::new_unchecked(p2), now);
        prop_assert_eq!(at_p1, at_p2);
        prop_assert_eq!(
            at_p1.value(),
            collateral.value() - market.debt_correction - market.total_trader_debt_usd.value()
        );
    }

    /// Checkpointing funding moves value between accumulators, never creates it.
    #[test]
    fn funding_recompute_is_neutral(
        size in signed_size_strategy(),
        entry in price_strategy(),
        price in price_strategy(),
        elapsed_secs in 1i64..(30 * 86_400),
    ) {
        let start = Timestamp::from_secs(1_000);
        let mut market = market_at(1_000);
        open(&mut market, size, entry, start);

        let later = start.plus_secs(elapsed_secs);
        let price = Price::new_unchecked(price);
        let collateral = Quote::new(dec!(500_000));
        let before = market.reported_debt(collateral, price, later);
        market.recompute_funding(price, later);
        let after = market.reported_debt(collateral, price, later);
        prop_assert!((before.value() - after.value()).abs() < dec!(0.000001));
    }

    /// Funding paid by one side is received by the other.
    #[test]
    fn funding_zero_sum_between_matched_positions(
        size in size_strategy(),
        entry_accrued in -1_000i64..1_000i64,
        current_accrued in -1_000i64..1_000i64,
    ) {
        let entry = Decimal::new(entry_accrued, 3);
        let current = Decimal::new(current_accrued, 3);
        let long = accrued_funding(SignedSize::new(size), entry, current);
        let short = accrued_funding(SignedSize::new(-size), entry, current);
        prop_assert_eq!(long.add(short), Quote::zero());
    }

    /// Within one window the chunks taken plus what is left always equal the cap.
    #[test]
    fn capacity_conserved_within_window(
        max_capacity in size_strategy(),
        requests in proptest::collection::vec(size_strategy(), 1..20),
    ) {
        let now = Timestamp::from_secs(50);
        let mut window = LiquidationWindow::new(max_capacity);
        let mut taken = Decimal::ZERO;
        for request in requests {
            window.advance(max_capacity, 30, now);
            let chunk = liquidatable_chunk(request, window.remaining_capacity, false);
            if chunk.is_zero() {
                continue;
            }
            window.consume(chunk, now);
            taken += chunk;
            prop_assert!(taken <= max_capacity);
            prop_assert_eq!(taken, max_capacity - window.remaining_capacity);
            prop_assert_eq!(window.used(max_capacity), taken);
        }
    }

    /// Chunked liquidation pays keepers exactly what one full liquidation would.
    #[test]
    fn chunk_fees_sum_to_full_fee(
        flagged_size in size_strategy(),
        capacity in (100i64..100_000i64).prop_map(|x| Decimal::new(x, 2)),
        total in (1i64..10_000i64).prop_map(|x| Decimal::new(x, 2)),
    ) {
        let total = Quote::new(total);
        let mut remaining = flagged_size;
        let mut paid = Quote::zero();
        while remaining > Decimal::ZERO {
            let chunk = liquidatable_chunk(remaining, capacity, false);
            let closes = chunk >= remaining;
            let fee = liquidation_chunk_fee(total, flagged_size, chunk, closes, paid);
            prop_assert!(fee >= Quote::zero());
            paid = paid.add(fee);
            remaining -= chunk;
        }
        prop_assert!((paid.value() - total.value()).abs() < dec!(0.000000000001));
    }

    /// Maintenance sits below initial once keeper costs are set aside.
    #[test]
    fn maintenance_ratio_below_initial(
        size in signed_size_strategy(),
        price in price_strategy(),
    ) {
        prop_assume!(!size.is_zero());
        let config = MarketConfig::eth_perp();
        let cost = KeeperCost { gas_token_price: dec!(2000), base_fee_per_gas: Decimal::ZERO };
        let req = calculate_margin_requirement(
            SignedSize::new(size),
            Price::new_unchecked(price),
            &config,
            &GlobalConfig::default(),
            &cost,
        );
        prop_assert!(req.maintenance_margin_ratio < req.initial_margin_ratio);
        prop_assert!(req.initial_margin_ratio <= config.max_initial_margin_ratio);
        prop_assert!(req.initial.value() > Decimal::ZERO);
    }

    /// Discounts stay inside their configured bounds.
    #[test]
    fn collateral_discount_bounded(amount in size_strategy()) {
        let config = GlobalConfig::default();
        let eth = config.collateral(CollateralKind::Eth).unwrap();
        let discount = collateral_discount(amount, eth);
        prop_assert!(discount >= eth.min_discount);
        prop_assert!(discount <= eth.max_discount);
    }
}
