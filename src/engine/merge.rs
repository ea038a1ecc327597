//! Account merging: fold one account's position and margin into another's.

use super::core::{Engine, Tx};
use super::positions::mirror_realization;
use super::results::EngineError;
use crate::account::Account;
use crate::events::{AccountsMergedEvent, EventPayload, Receipt};
use crate::position::{modify_position, FillContext, Position};
use crate::types::{AccountId, MarketId, Quote, SignedSize};
use tracing::{debug, info};

impl Engine {
    /// Realizes both positions at the oracle price, then reopens their combined size on
    /// `to_account`. `from_account` ends with no position, no collateral and no debt in
    /// this market. positions must be on the same side (or either flat).
    pub fn merge_accounts(
        &mut self,
        from_account: AccountId,
        to_account: AccountId,
        market_id: MarketId,
    ) -> Result<Receipt, EngineError> {
        if from_account == to_account {
            return Err(EngineError::SameAccount(from_account));
        }
        let mut tx = self.begin(market_id)?;
        let mut from = self.staged_account(from_account)?;
        let mut to = self.staged_account(to_account)?;

        for account in [&from, &to] {
            if account.get_order(market_id).is_some() {
                return Err(EngineError::OrderPending {
                    account: account.id,
                    market: market_id,
                });
            }
            if account.get_position(market_id).is_some_and(Position::is_flagged) {
                return Err(EngineError::PositionFlagged {
                    account: account.id,
                    market: market_id,
                });
            }
        }

        let from_size = size_of(&from, market_id);
        let to_size = size_of(&to, market_id);
        if !from_size.same_side_or_flat(to_size) {
            return Err(EngineError::MergeSideMismatch {
                from_size: from_size.value(),
                to_size: to_size.value(),
            });
        }

        tx.recompute_accumulators(self.utilization_rate(market_id));

        let from_realized = close_at_oracle(&mut tx, &mut from);
        let to_realized = close_at_oracle(&mut tx, &mut to);

        // source margin moves across. its debt is settled against the destination's
        // settlement collateral where possible.
        let source = from.margin_mut(market_id);
        let moved_debt = source.debt_usd;
        source.debt_usd = Quote::zero();
        let moved = source.take_all();
        let target = to.margin_mut(market_id);
        for (kind, amount) in moved {
            target.deposit(kind, amount);
        }
        tx.market.add_trader_debt(-moved_debt.value());
        let realization = target.realize(moved_debt.negate());
        mirror_realization(&mut tx.market, realization);

        let merged_size = from_size.add(to_size.value());
        let merged = (!merged_size.is_zero()).then(|| {
            Position::new(
                market_id,
                merged_size,
                tx.oracle_price,
                tx.oracle_price,
                tx.market.funding.accrued_last_computed,
                tx.market.utilization.accrued_last_computed,
                tx.now(),
            )
        });
        if let Some(position) = merged.as_ref() {
            let funding = tx.market.funding.accrued_last_computed;
            tx.market
                .apply_position_change(None, Some(position), tx.oracle_price, funding);

            let snapshot = self.margin_snapshot(&tx, &to.margin(market_id), Some(position))?;
            if !snapshot.meets_initial_margin() {
                debug!(from = from_account.0, to = to_account.0, market = market_id.0, margin = %snapshot.margin_usd, im = %snapshot.requirement.initial, "merge rejected, initial margin");
                return Err(EngineError::InsufficientMargin {
                    account: to_account,
                    market: market_id,
                    margin_usd: snapshot.margin_usd,
                    required: snapshot.requirement.initial,
                });
            }
        }
        to.set_position(market_id, merged.clone());

        tx.emit(EventPayload::AccountsMerged(AccountsMergedEvent {
            market_id,
            from_account,
            to_account,
            from_size: from_size.value(),
            to_size: to_size.value(),
            merged_size: merged_size.value(),
            merged_entry_price: merged.as_ref().map(|p| p.entry_price),
            from_realized,
            to_realized,
            debt_usd: to.margin(market_id).debt_usd,
        }));
        tx.emit_market_updated();

        info!(from = from_account.0, to = to_account.0, market = market_id.0, size = %merged_size, "accounts merged");
        Ok(self.commit(tx, [from, to]))
    }
}

fn size_of(account: &Account, market_id: MarketId) -> SignedSize {
    account
        .get_position(market_id)
        .map(|p| p.size)
        .unwrap_or_else(SignedSize::zero)
}

// closes the whole position at the oracle price and realizes it into the account
fn close_at_oracle(tx: &mut Tx, account: &mut Account) -> Quote {
    let market_id = tx.market.id();
    let Some(old) = account.get_position(market_id).cloned() else {
        return Quote::zero();
    };
    let ctx = FillContext {
        fill_price: tx.oracle_price,
        oracle_price: tx.oracle_price,
        funding_accrued: tx.market.funding.accrued_last_computed,
        utilization_accrued: tx.market.utilization.accrued_last_computed,
        now: tx.now(),
    };
    let modification = modify_position(market_id, Some(&old), -old.size.value(), &ctx);
    let realized = modification.realized();

    let realization = account.margin_mut(market_id).realize(realized);
    mirror_realization(&mut tx.market, realization);
    tx.market
        .apply_position_change(Some(&old), None, ctx.fill_price, ctx.funding_accrued);
    account.set_position(market_id, None);
    realized
}
