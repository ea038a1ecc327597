//! Standalone funding and utilization snapshots.
//!
//! Every settlement and liquidation already recomputes both accumulators; these entry
//! points let a keeper checkpoint a quiet market so accrual stays current.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{EventPayload, FundingRecomputedEvent, Receipt, UtilizationRecomputedEvent};
use crate::types::MarketId;
use tracing::debug;

impl Engine {
    pub fn recompute_funding(&mut self, market_id: MarketId) -> Result<Receipt, EngineError> {
        let mut tx = self.begin(market_id)?;
        let now = tx.now();
        let price = tx.oracle_price;

        let funding_accrued = tx.market.recompute_funding(price, now).accrued_last_computed;
        let funding_rate = tx.market.current_funding_rate(now);
        let funding_velocity = tx.market.current_funding_velocity();

        tx.emit(EventPayload::FundingRecomputed(FundingRecomputedEvent {
            market_id,
            skew: tx.market.skew,
            funding_rate,
            funding_velocity,
            funding_accrued,
        }));

        debug!(market = market_id.0, rate = %funding_rate, velocity = %funding_velocity, accrued = %funding_accrued, "funding recomputed");
        Ok(self.commit(tx, []))
    }

    pub fn recompute_utilization(&mut self, market_id: MarketId) -> Result<Receipt, EngineError> {
        let mut tx = self.begin(market_id)?;
        let now = tx.now();
        let rate = self.utilization_rate(market_id);

        let state = tx.market.recompute_utilization(rate, now);
        let utilization_rate = state.rate;
        let utilization_accrued = state.accrued_last_computed;

        tx.emit(EventPayload::UtilizationRecomputed(UtilizationRecomputedEvent {
            market_id,
            skew: tx.market.skew,
            utilization_rate,
            utilization_accrued,
        }));

        debug!(market = market_id.0, rate = %utilization_rate, accrued = %utilization_accrued, "utilization recomputed");
        Ok(self.commit(tx, []))
    }
}
