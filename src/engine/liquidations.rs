//! Flagging and chunked liquidation.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{
    CancelReason, EventPayload, Instruction, OrderCanceledEvent, PositionFlaggedEvent,
    PositionLiquidatedEvent, Receipt,
};
use crate::liquidation::{
    bypasses_capacity, capped_flag_reward, flag_keeper_reward, liquidatable_chunk,
    liquidation_chunk_fee, liquidation_keeper_fee, price_deviation,
};
use crate::position::{modify_position, FillContext, FlagState};
use crate::types::{AccountId, KeeperId, MarketId, Quote};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

impl Engine {
    /// 6.1: reserve a liquidatable position. the account's margin and debt for this market
    /// move into liquidation custody and the flagging keeper is paid up front.
    pub fn flag_position(
        &mut self,
        account_id: AccountId,
        market_id: MarketId,
        keeper: KeeperId,
    ) -> Result<Receipt, EngineError> {
        let mut tx = self.begin(market_id)?;
        let mut account = self.staged_account(account_id)?;

        let position = account
            .get_position(market_id)
            .cloned()
            .ok_or(EngineError::PositionNotFound {
                account: account_id,
                market: market_id,
            })?;
        if position.is_flagged() {
            return Err(EngineError::PositionFlagged {
                account: account_id,
                market: market_id,
            });
        }

        tx.recompute_accumulators(self.utilization_rate(market_id));

        let snapshot = self.margin_snapshot(&tx, &account.margin(market_id), Some(&position))?;
        if !snapshot.is_liquidatable(true) {
            debug!(account = account_id.0, market = market_id.0, health = %snapshot.health_factor, "flag rejected, position healthy");
            return Err(EngineError::NotLiquidatable {
                account: account_id,
                market: market_id,
                health_factor: snapshot.health_factor,
            });
        }

        let canceled_order = match account.orders.remove(&market_id) {
            Some(order) => {
                tx.emit(EventPayload::OrderCanceled(OrderCanceledEvent {
                    market_id,
                    account_id,
                    keeper: Some(keeper),
                    size_delta: order.size_delta,
                    commitment_time: order.commitment_time,
                    reason: CancelReason::Flagged,
                    fill_price: None,
                    keeper_fee: Quote::zero(),
                    debt_usd: snapshot.debt_usd,
                }));
                true
            }
            None => false,
        };

        let collateral_value = snapshot.collateral.collateral_usd;
        let reward = capped_flag_reward(
            flag_keeper_reward(
                position.notional_value(tx.oracle_price),
                &tx.market.config,
                &self.global,
                &tx.keeper_cost,
            ),
            collateral_value,
        );

        // 6.1.1: seize everything and forgive the debt. the position's own pnl, funding and
        // utilization stay with it and are absorbed as it is closed out.
        let margin = account.margin_mut(market_id);
        let debt_cleared = margin.debt_usd;
        margin.debt_usd = Quote::zero();
        let seized: Vec<_> = margin.take_all().into_iter().collect();

        tx.market.add_trader_debt(-debt_cleared.value());
        for &(kind, amount) in &seized {
            tx.market.withdraw_collateral(kind, amount);
            tx.instruct(Instruction::SeizeCollateral {
                account_id,
                market_id,
                kind,
                amount,
            });
        }

        let flagged_price = tx.oracle_price;
        let flagged_at = tx.now();
        if let Some(p) = account.get_position_mut(market_id) {
            p.flag = Some(FlagState {
                flagger: keeper,
                flagged_price,
                flagged_at,
                flagged_size: position.size.abs(),
                liquidation_fees_paid: Quote::zero(),
            });
        }

        if reward.is_positive() {
            tx.instruct(Instruction::PayKeeper {
                keeper,
                market_id,
                amount: reward,
            });
        }
        tx.emit(EventPayload::PositionFlagged(PositionFlaggedEvent {
            market_id,
            account_id,
            keeper,
            size: position.size.value(),
            flagged_price,
            margin_usd: snapshot.margin_usd,
            maintenance_margin: snapshot.requirement.maintenance,
            health_factor: snapshot.health_factor,
            flag_reward: reward,
            collateral_value_usd: collateral_value,
            seized,
            debt_cleared,
            canceled_order,
        }));
        tx.emit_market_updated();

        warn!(
            account = account_id.0,
            market = market_id.0,
            keeper = keeper.0,
            size = %position.size,
            health = %snapshot.health_factor,
            reward = %reward,
            "position flagged"
        );
        Ok(self.commit(tx, [account]))
    }

    /// 6.2: close a flagged position, one capacity-limited chunk per call. endorsed keepers
    /// and a balanced market skip the cap. the chunk closes at the oracle price.
    pub fn liquidate_position(
        &mut self,
        account_id: AccountId,
        market_id: MarketId,
        keeper: KeeperId,
    ) -> Result<Receipt, EngineError> {
        let mut tx = self.begin(market_id)?;
        let mut account = self.staged_account(account_id)?;

        let not_flagged = EngineError::PositionNotFlagged {
            account: account_id,
            market: market_id,
        };
        let Some(position) = account.get_position(market_id).cloned() else {
            return Err(not_flagged);
        };
        let Some(flag) = position.flag.clone() else {
            return Err(not_flagged);
        };

        let now = tx.now();
        tx.recompute_accumulators(self.utilization_rate(market_id));
        tx.market.advance_liquidation_window(now);

        let config = &tx.market.config;
        let remaining = tx.market.liquidation_window.remaining_capacity;
        let bypass = bypasses_capacity(self.keepers.is_endorsed(keeper), tx.market.skew, config);
        let chunk = liquidatable_chunk(position.size.value(), remaining, bypass);
        if chunk.is_zero() {
            warn!(account = account_id.0, market = market_id.0, keeper = keeper.0, "liquidation capacity exhausted");
            return Err(EngineError::CapacityExhausted {
                market: market_id,
                remaining,
                max_capacity: tx.market.max_liquidatable_capacity(),
                price_deviation: price_deviation(tx.market.skew, config.skew_scale),
                max_price_deviation: config.liquidation_max_price_deviation,
            });
        }

        let closes = chunk >= position.size.abs();
        let total_fee = liquidation_keeper_fee(flag.flagged_size, config, &self.global, &tx.keeper_cost);
        let keeper_fee = liquidation_chunk_fee(
            total_fee,
            flag.flagged_size,
            chunk,
            closes,
            flag.liquidation_fees_paid,
        );

        let size_delta = if position.size.is_long() { -chunk } else { chunk };
        let ctx = FillContext {
            fill_price: tx.oracle_price,
            oracle_price: tx.oracle_price,
            funding_accrued: tx.market.funding.accrued_last_computed,
            utilization_accrued: tx.market.utilization.accrued_last_computed,
            now,
        };
        let modification = modify_position(market_id, Some(&position), size_delta, &ctx);
        let debt_correction = tx.market.apply_position_change(
            Some(&position),
            modification.new_position.as_ref(),
            ctx.fill_price,
            ctx.funding_accrued,
        );

        let total_paid = flag.liquidation_fees_paid.add(keeper_fee);
        let new_position = modification.new_position.clone().map(|mut p| {
            p.flag = Some(FlagState {
                liquidation_fees_paid: total_paid,
                ..flag.clone()
            });
            p
        });
        let remaining_size = new_position.as_ref().map(|p| p.size.value()).unwrap_or(Decimal::ZERO);
        account.set_position(market_id, new_position);

        // bypassed chunks still count against the window
        tx.market.liquidation_window.consume(chunk, now);
        let remaining_capacity = tx.market.liquidation_window.remaining_capacity;

        if keeper_fee.is_positive() {
            tx.instruct(Instruction::PayKeeper {
                keeper,
                market_id,
                amount: keeper_fee,
            });
        }
        tx.emit(EventPayload::PositionLiquidated(PositionLiquidatedEvent {
            market_id,
            account_id,
            keeper,
            liquidated_size: chunk,
            remaining_size,
            oracle_price: tx.oracle_price,
            keeper_fee,
            total_keeper_fees_paid: total_paid,
            remaining_capacity,
            capacity_bypassed: bypass,
            price_pnl: modification.price_pnl,
            accrued_funding: modification.accrued_funding,
            accrued_utilization: modification.accrued_utilization,
            debt_correction,
        }));
        tx.emit_market_updated();

        info!(
            account = account_id.0,
            market = market_id.0,
            keeper = keeper.0,
            chunk = %chunk,
            remaining = %remaining_size,
            fee = %keeper_fee,
            bypass,
            "position liquidated"
        );
        Ok(self.commit(tx, [account]))
    }
}
