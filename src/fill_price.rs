// 13.0: skew-sensitive fill price. trades that grow |skew| pay a premium, trades that shrink
// it get a discount. the premium is the average of proportional skew before and after.

use crate::types::{Price, Quote, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// oracle × (1 + (skewBefore + skewAfter) / (2 × skewScale)). None if the result isn't a valid price.
pub fn fill_price(skew_before: Decimal, skew_scale: Decimal, size_delta: Decimal, oracle_price: Price) -> Option<Price> {
    if skew_scale.is_zero() {
        return Some(oracle_price);
    }
    let skew_after = skew_before + size_delta;
    let premium = (skew_before + skew_after) / (dec!(2) * skew_scale);
    Price::new(oracle_price.value() * (Decimal::ONE + premium))
}

/// Price of a zero-size trade.
pub fn mark_price(skew: Decimal, skew_scale: Decimal, oracle_price: Price) -> Option<Price> {
    fill_price(skew, skew_scale, Decimal::ZERO, oracle_price)
}

/// Longs can't fill above their limit, shorts can't fill below it.
pub fn limit_price_exceeded(side: Side, fill: Price, limit: Price) -> bool {
    match side {
        Side::Long => fill > limit,
        Side::Short => fill < limit,
    }
}

// taker when the trade pushes skew further from zero (or skew is flat), maker otherwise
pub fn order_fee(
    skew: Decimal,
    size_delta: Decimal,
    fill: Price,
    maker_fee: Decimal,
    taker_fee: Decimal,
) -> Quote {
    let increases_skew = skew.is_zero() || (skew > Decimal::ZERO) == (size_delta > Decimal::ZERO);
    let rate = if increases_skew { taker_fee } else { maker_fee };
    Quote::new(size_delta.abs() * fill.value() * rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn oracle() -> Price {
        Price::new_unchecked(dec!(1000))
    }

    #[test]
    fn premium_when_increasing_skew() {
        // skew 0 -> 10_000 on 1M scale: avg 5_000 / 1M = 0.005
        let fill = fill_price(dec!(0), dec!(1_000_000), dec!(10_000), oracle()).unwrap();
        assert_eq!(fill.value(), dec!(1005));
    }

    #[test]
    fn discount_when_reducing_skew() {
        // skew 10_000 -> 0: avg 5_000 but trader is selling into it, receives 1005
        let fill = fill_price(dec!(10_000), dec!(1_000_000), dec!(-10_000), oracle()).unwrap();
        assert_eq!(fill.value(), dec!(1005));

        // short skew bought back: price below oracle
        let fill = fill_price(dec!(-10_000), dec!(1_000_000), dec!(10_000), oracle()).unwrap();
        assert_eq!(fill.value(), dec!(995));
    }

    #[test]
    fn zero_size_is_mark() {
        let mark = mark_price(dec!(20_000), dec!(1_000_000), oracle()).unwrap();
        assert_eq!(mark.value(), dec!(1020));
        assert_eq!(fill_price(dec!(20_000), dec!(1_000_000), dec!(0), oracle()).unwrap(), mark);
    }

    #[test]
    fn symmetric_around_oracle() {
        let up = fill_price(dec!(0), dec!(1_000_000), dec!(40_000), oracle()).unwrap();
        let down = fill_price(dec!(0), dec!(1_000_000), dec!(-40_000), oracle()).unwrap();
        assert_eq!(up.value() - oracle().value(), oracle().value() - down.value());
    }

    #[test]
    fn extreme_negative_skew_has_no_price() {
        assert!(fill_price(dec!(-2_000_000), dec!(1_000_000), dec!(-1), oracle()).is_none());
    }

    #[test]
    fn limit_checks() {
        let fill = Price::new_unchecked(dec!(1005));
        assert!(limit_price_exceeded(Side::Long, fill, Price::new_unchecked(dec!(1004))));
        assert!(!limit_price_exceeded(Side::Long, fill, Price::new_unchecked(dec!(1005))));
        assert!(limit_price_exceeded(Side::Short, fill, Price::new_unchecked(dec!(1006))));
        assert!(!limit_price_exceeded(Side::Short, fill, Price::new_unchecked(dec!(1000))));
    }

    #[test]
    fn order_fee_maker_taker() {
        let fill = Price::new_unchecked(dec!(1000));
        // flat skew is taker
        assert_eq!(order_fee(dec!(0), dec!(10), fill, dec!(0.0002), dec!(0.0006)).value(), dec!(6));
        // reducing long skew is maker
        assert_eq!(order_fee(dec!(50), dec!(-10), fill, dec!(0.0002), dec!(0.0006)).value(), dec!(2));
        // adding to short skew is taker
        assert_eq!(order_fee(dec!(-50), dec!(-10), fill, dec!(0.0002), dec!(0.0006)).value(), dec!(6));
    }
}
