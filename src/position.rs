// 4.0: open position tracking. pnl = size * (price - entry).
// entry snapshots (funding, utilization) only exist while size != 0, so a flat position is None.
// 4.1 has increase/reduce/flip logic at the bottom.

use crate::funding::{accrued_funding, accrued_utilization};
use crate::types::{KeeperId, MarketId, Price, Quote, SignedSize, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Liquidation reservation. present from flag until the position is fully liquidated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagState {
    pub flagger: KeeperId,
    pub flagged_price: Price,
    pub flagged_at: Timestamp,
    // |size| at flag time. liquidation fees are prorated against this
    pub flagged_size: Decimal,
    pub liquidation_fees_paid: Quote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub market_id: MarketId,
    pub size: SignedSize,
    pub entry_price: Price,
    pub entry_oracle_price: Price,
    pub entry_funding_accrued: Decimal,
    pub entry_utilization_accrued: Decimal,
    pub opened_at: Timestamp,
    pub updated_at: Timestamp,
    pub flag: Option<FlagState>,
}

impl Position {
    pub fn new(
        market_id: MarketId,
        size: SignedSize,
        entry_price: Price,
        oracle_price: Price,
        funding_accrued: Decimal,
        utilization_accrued: Decimal,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            market_id,
            size,
            entry_price,
            entry_oracle_price: oracle_price,
            entry_funding_accrued: funding_accrued,
            entry_utilization_accrued: utilization_accrued,
            opened_at: timestamp,
            updated_at: timestamp,
            flag: None,
        }
    }

    pub fn is_flagged(&self) -> bool {
        self.flag.is_some()
    }

    // 4.1: paper gains/losses at a given price
    pub fn price_pnl(&self, price: Price) -> Quote {
        calculate_price_pnl(self.size, self.entry_price, price)
    }

    pub fn accrued_funding(&self, current_funding_accrued: Decimal) -> Quote {
        accrued_funding(self.size, self.entry_funding_accrued, current_funding_accrued)
    }

    pub fn accrued_utilization(&self, price: Price, current_utilization_accrued: Decimal) -> Quote {
        accrued_utilization(self.size, price, self.entry_utilization_accrued, current_utilization_accrued)
    }

    pub fn notional_value(&self, price: Price) -> Quote {
        Quote::new(self.size.abs() * price.value())
    }

    /// size × (entry + entryFunding). the market's debt correction is the sum of these.
    pub fn debt_correction_term(&self) -> Decimal {
        self.size.value() * (self.entry_price.value() + self.entry_funding_accrued)
    }
}

pub fn debt_correction_term(position: Option<&Position>) -> Decimal {
    position.map(Position::debt_correction_term).unwrap_or(Decimal::ZERO)
}

// 4.2: the pnl formula. size * (price - entry)
pub fn calculate_price_pnl(size: SignedSize, entry_price: Price, price: Price) -> Quote {
    Quote::new(size.value() * (price.value() - entry_price.value()))
}

/// Result of applying a fill to an existing (or empty) position.
#[derive(Debug, Clone)]
pub struct Modification {
    pub new_position: Option<Position>,
    pub price_pnl: Quote,
    pub accrued_funding: Quote,
    pub accrued_utilization: Quote,
}

impl Modification {
    /// What gets folded into the account's margin before fees.
    pub fn realized(&self) -> Quote {
        self.price_pnl
            .add(self.accrued_funding)
            .sub(self.accrued_utilization)
    }

    pub fn new_size(&self) -> SignedSize {
        self.new_position
            .as_ref()
            .map(|p| p.size)
            .unwrap_or_else(SignedSize::zero)
    }
}

/// Market accumulators and prices at the instant a fill is applied.
#[derive(Debug, Clone, Copy)]
pub struct FillContext {
    pub fill_price: Price,
    pub oracle_price: Price,
    pub funding_accrued: Decimal,
    pub utilization_accrued: Decimal,
    pub now: Timestamp,
}

// 4.3: funding and utilization are always realized and re-snapshotted. price pnl is realized
// only for the part of the position that closes; adding blends the entry instead.
pub fn modify_position(
    market_id: MarketId,
    old: Option<&Position>,
    size_delta: Decimal,
    ctx: &FillContext,
) -> Modification {
    let Some(old) = old else {
        let new_position = (!size_delta.is_zero()).then(|| {
            Position::new(
                market_id,
                SignedSize::new(size_delta),
                ctx.fill_price,
                ctx.oracle_price,
                ctx.funding_accrued,
                ctx.utilization_accrued,
                ctx.now,
            )
        });
        return Modification {
            new_position,
            price_pnl: Quote::zero(),
            accrued_funding: Quote::zero(),
            accrued_utilization: Quote::zero(),
        };
    };

    let funding = old.accrued_funding(ctx.funding_accrued);
    let utilization = old.accrued_utilization(ctx.oracle_price, ctx.utilization_accrued);

    let old_size = old.size.value();
    let new_size = old_size + size_delta;

    let (new_position, price_pnl) = if new_size.is_zero() {
        (None, old.price_pnl(ctx.fill_price))
    } else if old.size.same_side_or_flat(SignedSize::new(new_size)) {
        if new_size.abs() > old_size.abs() {
            increase_position(old, new_size, ctx)
        } else {
            reduce_position(old, new_size, ctx)
        }
    } else {
        flip_position(old, new_size, ctx)
    };

    Modification {
        new_position,
        price_pnl,
        accrued_funding: funding,
        accrued_utilization: utilization,
    }
}

// 4.4: adds to existing position. averages the entry price by size
fn increase_position(old: &Position, new_size: Decimal, ctx: &FillContext) -> (Option<Position>, Quote) {
    let added = new_size.abs() - old.size.abs();
    let weighted = old.size.abs() * old.entry_price.value() + added * ctx.fill_price.value();
    let entry = Price::new_unchecked(weighted / new_size.abs());

    let position = Position {
        size: SignedSize::new(new_size),
        entry_price: entry,
        entry_oracle_price: ctx.oracle_price,
        entry_funding_accrued: ctx.funding_accrued,
        entry_utilization_accrued: ctx.utilization_accrued,
        updated_at: ctx.now,
        flag: None,
        ..old.clone()
    };
    (Some(position), Quote::zero())
}

// entry unchanged on reduction, closed slice realizes at the fill
fn reduce_position(old: &Position, new_size: Decimal, ctx: &FillContext) -> (Option<Position>, Quote) {
    let closed = SignedSize::new(old.size.value() - new_size);
    let pnl = calculate_price_pnl(closed, old.entry_price, ctx.fill_price);

    let position = Position {
        size: SignedSize::new(new_size),
        entry_oracle_price: ctx.oracle_price,
        entry_funding_accrued: ctx.funding_accrued,
        entry_utilization_accrued: ctx.utilization_accrued,
        updated_at: ctx.now,
        flag: None,
        ..old.clone()
    };
    (Some(position), pnl)
}

// close everything, reopen the remainder on the other side at the fill
fn flip_position(old: &Position, new_size: Decimal, ctx: &FillContext) -> (Option<Position>, Quote) {
    let pnl = old.price_pnl(ctx.fill_price);
    let position = Position::new(
        old.market_id,
        SignedSize::new(new_size),
        ctx.fill_price,
        ctx.oracle_price,
        ctx.funding_accrued,
        ctx.utilization_accrued,
        ctx.now,
    );
    (Some(position), pnl)
}
