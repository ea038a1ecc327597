// 2.0: pending orders. one per (account, market). committed now, settled by a keeper later
// once the order has aged past the minimum and before it goes stale.

use crate::types::{HookId, Price, Quote, Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub size_delta: Decimal,
    pub limit_price: Price,
    pub commitment_time: Timestamp,
    pub keeper_fee_buffer_usd: Quote,
    pub hooks: Vec<HookId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderReadiness {
    TooEarly { ready_at: Timestamp },
    Ready,
    Stale,
}

impl PendingOrder {
    pub fn side(&self) -> Side {
        if self.size_delta > Decimal::ZERO {
            Side::Long
        } else {
            Side::Short
        }
    }

    pub fn age_secs(&self, now: Timestamp) -> i64 {
        now.secs_since(&self.commitment_time)
    }

    // min age inclusive, max age inclusive. older than max is stale.
    pub fn readiness(&self, now: Timestamp, min_age_secs: i64, max_age_secs: i64) -> OrderReadiness {
        let age_ms = now.millis_since(&self.commitment_time);
        if age_ms > max_age_secs * 1000 {
            OrderReadiness::Stale
        } else if age_ms < min_age_secs * 1000 {
            OrderReadiness::TooEarly {
                ready_at: self.commitment_time.plus_secs(min_age_secs),
            }
        } else {
            OrderReadiness::Ready
        }
    }

    pub fn is_stale(&self, now: Timestamp, max_age_secs: i64) -> bool {
        now.millis_since(&self.commitment_time) > max_age_secs * 1000
    }
}
