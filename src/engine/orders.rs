//! Order lifecycle: commit now, settle later by a keeper, or cancel.

use super::core::{Engine, Tx};
use super::results::EngineError;
use crate::account::Account;
use crate::events::{
    CancelReason, EventPayload, Instruction, OrderCanceledEvent, OrderCommittedEvent,
    OrderSettledEvent, Receipt,
};
use crate::fill_price::{fill_price, limit_price_exceeded, order_fee};
use crate::liquidation::settlement_keeper_fee;
use crate::order::{OrderReadiness, PendingOrder};
use crate::position::{modify_position, FillContext};
use crate::types::{AccountId, CollateralKind, HookId, KeeperId, MarketId, Price, Quote, SignedSize};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

impl Engine {
    pub(super) fn fill_price_for(&self, tx: &Tx, size_delta: Decimal) -> Result<Price, EngineError> {
        fill_price(tx.market.skew, tx.market.config.skew_scale, size_delta, tx.oracle_price).ok_or(
            EngineError::InvalidFillPrice {
                market: tx.market.id(),
                size_delta,
            },
        )
    }

    fn validate_hooks(&self, hooks: &[HookId]) -> Result<(), EngineError> {
        if hooks.len() > self.global.max_hooks_per_order {
            return Err(EngineError::TooManyHooks {
                count: hooks.len(),
                max: self.global.max_hooks_per_order,
            });
        }
        let mut seen = BTreeSet::new();
        for hook in hooks {
            if !self.global.settlement_hooks.contains(hook) {
                return Err(EngineError::HookNotAllowed(*hook));
            }
            if !seen.insert(*hook) {
                return Err(EngineError::DuplicateHook(*hook));
            }
        }
        Ok(())
    }

    /// 9.1: commit an order for later settlement. the order is checked against the margin it
    /// would need if it filled right now, fees and the keeper fee buffer included.
    pub fn commit_order(
        &mut self,
        account_id: AccountId,
        market_id: MarketId,
        size_delta: Decimal,
        limit_price: Price,
        keeper_fee_buffer_usd: Quote,
        hooks: Vec<HookId>,
    ) -> Result<Receipt, EngineError> {
        if size_delta.is_zero() {
            return Err(EngineError::ZeroSize);
        }
        self.validate_hooks(&hooks)?;

        let mut tx = self.begin(market_id)?;
        let mut account = self.staged_account(account_id)?;
        let now = tx.now();

        if let Some(existing) = account.get_order(market_id).cloned() {
            if !existing.is_stale(now, self.global.max_order_age_secs) {
                return Err(EngineError::OrderAlreadyExists {
                    account: account_id,
                    market: market_id,
                    committed_at: existing.commitment_time,
                });
            }
            account.orders.remove(&market_id);
            debug!(account = account_id.0, market = market_id.0, "stale order replaced");
            tx.emit(EventPayload::OrderCanceled(OrderCanceledEvent {
                market_id,
                account_id,
                keeper: None,
                size_delta: existing.size_delta,
                commitment_time: existing.commitment_time,
                reason: CancelReason::Stale,
                fill_price: None,
                keeper_fee: Quote::zero(),
                debt_usd: account.margin(market_id).debt_usd,
            }));
        }

        tx.recompute_accumulators(self.utilization_rate(market_id));

        let position = account.get_position(market_id).cloned();
        if position.as_ref().is_some_and(|p| p.is_flagged()) {
            return Err(EngineError::PositionFlagged {
                account: account_id,
                market: market_id,
            });
        }

        let old_size = position.as_ref().map(|p| p.size.value()).unwrap_or(Decimal::ZERO);
        let new_size = old_size + size_delta;
        let margin = account.margin(market_id);

        if position.is_some() && !new_size.is_zero() {
            let current = self.margin_snapshot(&tx, &margin, position.as_ref())?;
            if current.is_liquidatable(true) {
                return Err(EngineError::PositionLiquidatable {
                    account: account_id,
                    market: market_id,
                    health_factor: current.health_factor,
                });
            }
        }

        if tx.market.exceeds_max_market_size(old_size, new_size) {
            return Err(EngineError::MaxMarketSizeExceeded {
                market: market_id,
                attempted: new_size.abs(),
                max: tx.market.config.max_market_size,
            });
        }

        // predicted outcome at the current oracle price
        let expected_fill = self.fill_price_for(&tx, size_delta)?;
        let estimated_order_fee = order_fee(
            tx.market.skew,
            size_delta,
            expected_fill,
            tx.market.config.maker_fee,
            tx.market.config.taker_fee,
        );
        let estimated_keeper_fee = settlement_keeper_fee(&self.global, &tx.keeper_cost);

        let reduces_only = !new_size.is_zero()
            && SignedSize::new(old_size).same_side_or_flat(SignedSize::new(new_size))
            && new_size.abs() < old_size.abs();
        if !new_size.is_zero() && !reduces_only {
            let ctx = FillContext {
                fill_price: expected_fill,
                oracle_price: tx.oracle_price,
                funding_accrued: tx.market.funding.accrued_last_computed,
                utilization_accrued: tx.market.utilization.accrued_last_computed,
                now,
            };
            let predicted = modify_position(market_id, position.as_ref(), size_delta, &ctx);
            let mut predicted_margin = margin.clone();
            predicted_margin.realize(
                predicted
                    .realized()
                    .sub(estimated_order_fee)
                    .sub(estimated_keeper_fee)
                    .sub(keeper_fee_buffer_usd),
            );
            let after = self.margin_snapshot(&tx, &predicted_margin, predicted.new_position.as_ref())?;
            if !after.meets_initial_margin() {
                warn!(account = account_id.0, market = market_id.0, margin = %after.margin_usd, im = %after.requirement.initial, "commit rejected, initial margin");
                return Err(EngineError::InsufficientMargin {
                    account: account_id,
                    market: market_id,
                    margin_usd: after.margin_usd,
                    required: after.requirement.initial,
                });
            }
        }

        account.orders.insert(
            market_id,
            PendingOrder {
                size_delta,
                limit_price,
                commitment_time: now,
                keeper_fee_buffer_usd,
                hooks: hooks.clone(),
            },
        );

        tx.emit(EventPayload::OrderCommitted(OrderCommittedEvent {
            market_id,
            account_id,
            size_delta,
            limit_price,
            commitment_time: now,
            expected_fill_price: expected_fill,
            estimated_order_fee,
            estimated_keeper_fee,
            keeper_fee_buffer_usd,
            hooks,
        }));

        info!(account = account_id.0, market = market_id.0, size = %size_delta, limit = %limit_price, "order committed");
        Ok(self.commit(tx, [account]))
    }

    fn pending_order(&self, account: &Account, market_id: MarketId) -> Result<PendingOrder, EngineError> {
        account
            .get_order(market_id)
            .cloned()
            .ok_or(EngineError::OrderNotFound {
                account: account.id,
                market: market_id,
            })
    }

    /// 9.2: a keeper settles a ready order. fill price is taken now, not at commit.
    pub fn settle_order(
        &mut self,
        account_id: AccountId,
        market_id: MarketId,
        keeper: KeeperId,
    ) -> Result<Receipt, EngineError> {
        let mut tx = self.begin(market_id)?;
        let mut account = self.staged_account(account_id)?;
        let order = self.pending_order(&account, market_id)?;
        let now = tx.now();

        match order.readiness(
            now,
            self.global.pending_order_min_age_secs,
            self.global.max_order_age_secs,
        ) {
            OrderReadiness::TooEarly { ready_at } => {
                return Err(EngineError::OrderNotReady {
                    account: account_id,
                    market: market_id,
                    ready_at,
                })
            }
            OrderReadiness::Stale => {
                return Err(EngineError::OrderStale {
                    account: account_id,
                    market: market_id,
                    committed_at: order.commitment_time,
                })
            }
            OrderReadiness::Ready => {}
        }

        tx.recompute_accumulators(self.utilization_rate(market_id));

        let fill = self.fill_price_for(&tx, order.size_delta)?;
        if limit_price_exceeded(order.side(), fill, order.limit_price) {
            debug!(account = account_id.0, market = market_id.0, fill = %fill, limit = %order.limit_price, "settle rejected, limit price");
            return Err(EngineError::PriceToleranceExceeded {
                fill_price: fill,
                limit_price: order.limit_price,
            });
        }

        let fee = order_fee(
            tx.market.skew,
            order.size_delta,
            fill,
            tx.market.config.maker_fee,
            tx.market.config.taker_fee,
        );
        let keeper_fee = settlement_keeper_fee(&self.global, &tx.keeper_cost);

        let result = self.open_or_modify(&mut tx, &mut account, order.size_delta, fill, fee.add(keeper_fee))?;
        account.orders.remove(&market_id);

        let margin = account.margin(market_id);
        tx.emit(EventPayload::OrderSettled(OrderSettledEvent {
            market_id,
            account_id,
            keeper,
            size_delta: order.size_delta,
            fill_price: fill,
            oracle_price: tx.oracle_price,
            order_fee: fee,
            keeper_fee,
            price_pnl: result.price_pnl,
            accrued_funding: result.accrued_funding,
            accrued_utilization: result.accrued_utilization,
            new_size: result.new_position.as_ref().map(|p| p.size.value()).unwrap_or(Decimal::ZERO),
            new_entry_price: result.new_position.as_ref().map(|p| p.entry_price),
            usd_collateral: margin.available(CollateralKind::Usd),
            debt_usd: margin.debt_usd,
            debt_correction: result.debt_correction,
        }));
        tx.emit_market_updated();

        if keeper_fee.is_positive() {
            tx.instruct(Instruction::PayKeeper {
                keeper,
                market_id,
                amount: keeper_fee,
            });
        }
        for hook in &order.hooks {
            tx.instruct(Instruction::InvokeSettlementHook {
                hook: *hook,
                account_id,
                market_id,
            });
        }

        info!(
            account = account_id.0,
            market = market_id.0,
            keeper = keeper.0,
            size = %order.size_delta,
            fill = %fill,
            order_fee = %fee,
            keeper_fee = %keeper_fee,
            "order settled"
        );
        Ok(self.commit(tx, [account]))
    }

    /// 9.3: stale orders are dropped for free. a ready order can only be canceled once its
    /// limit price is breached, and the account pays the keeper for the trouble.
    pub fn cancel_order(
        &mut self,
        account_id: AccountId,
        market_id: MarketId,
        keeper: KeeperId,
    ) -> Result<Receipt, EngineError> {
        let mut tx = self.begin(market_id)?;
        let mut account = self.staged_account(account_id)?;
        let order = self.pending_order(&account, market_id)?;
        let now = tx.now();

        let (reason, fill, keeper_fee) = match order.readiness(
            now,
            self.global.pending_order_min_age_secs,
            self.global.max_order_age_secs,
        ) {
            OrderReadiness::TooEarly { ready_at } => {
                return Err(EngineError::OrderNotReady {
                    account: account_id,
                    market: market_id,
                    ready_at,
                })
            }
            OrderReadiness::Stale => (CancelReason::Stale, None, Quote::zero()),
            OrderReadiness::Ready => {
                let fill = self.fill_price_for(&tx, order.size_delta)?;
                if !limit_price_exceeded(order.side(), fill, order.limit_price) {
                    return Err(EngineError::OrderStillFillable {
                        fill_price: fill,
                        limit_price: order.limit_price,
                    });
                }
                let fee = settlement_keeper_fee(&self.global, &tx.keeper_cost);
                let realization = account.margin_mut(market_id).realize(fee.negate());
                super::positions::mirror_realization(&mut tx.market, realization);
                (CancelReason::PriceToleranceExceeded, Some(fill), fee)
            }
        };

        account.orders.remove(&market_id);
        tx.emit(EventPayload::OrderCanceled(OrderCanceledEvent {
            market_id,
            account_id,
            keeper: Some(keeper),
            size_delta: order.size_delta,
            commitment_time: order.commitment_time,
            reason,
            fill_price: fill,
            keeper_fee,
            debt_usd: account.margin(market_id).debt_usd,
        }));
        if keeper_fee.is_positive() {
            tx.instruct(Instruction::PayKeeper {
                keeper,
                market_id,
                amount: keeper_fee,
            });
        }

        info!(account = account_id.0, market = market_id.0, reason = ?reason, keeper_fee = %keeper_fee, "order canceled");
        Ok(self.commit(tx, [account]))
    }
}
