//! Position and margin ledger: margin projections and the open-or-modify path
//! every fill goes through.

use super::core::{Engine, Tx};
use super::results::{EngineError, SettlementResult};
use crate::account::{Account, AccountMargin, Realization};
use crate::liquidation::KeeperCost;
use crate::margin::{
    calculate_margin_requirement, health_factor, margin_usd, value_collateral, CollateralValuation,
    MarginRequirement,
};
use crate::market::Market;
use crate::position::{modify_position, FillContext, Position};
use crate::types::{CollateralKind, Price, Quote, SignedSize, Timestamp};
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Margin picture of one (account, market) at the oracle price.
#[derive(Debug, Clone)]
pub struct MarginSnapshot {
    pub collateral: CollateralValuation,
    pub price_pnl: Quote,
    pub accrued_funding: Quote,
    pub accrued_utilization: Quote,
    pub debt_usd: Quote,
    pub margin_usd: Quote,
    pub requirement: MarginRequirement,
    pub health_factor: Decimal,
}

impl MarginSnapshot {
    pub fn is_liquidatable(&self, has_position: bool) -> bool {
        has_position && self.health_factor <= Decimal::ONE
    }

    pub fn meets_initial_margin(&self) -> bool {
        self.margin_usd >= self.requirement.initial
    }
}

impl Engine {
    pub(super) fn margin_snapshot(
        &self,
        tx: &Tx,
        margin: &AccountMargin,
        position: Option<&Position>,
    ) -> Result<MarginSnapshot, EngineError> {
        self.margin_snapshot_at(
            &tx.market,
            margin,
            position,
            tx.oracle_price,
            tx.now(),
            &tx.keeper_cost,
        )
    }

    // 8.3: discounted collateral + pnl + funding - utilization - debt, against mm/im
    pub(super) fn margin_snapshot_at(
        &self,
        market: &Market,
        margin: &AccountMargin,
        position: Option<&Position>,
        price: Price,
        now: Timestamp,
        keeper_cost: &KeeperCost,
    ) -> Result<MarginSnapshot, EngineError> {
        let collateral = value_collateral(margin, &self.global, |kind| self.collateral_price(kind))?;

        let funding_now = market.current_funding_accrued(price, now);
        let utilization_now = market.current_utilization_accrued(now);

        let (size, price_pnl, funding, utilization) = match position {
            Some(p) => (
                p.size,
                p.price_pnl(price),
                p.accrued_funding(funding_now),
                p.accrued_utilization(price, utilization_now),
            ),
            None => (SignedSize::zero(), Quote::zero(), Quote::zero(), Quote::zero()),
        };

        let requirement =
            calculate_margin_requirement(size, price, &market.config, &self.global, keeper_cost);
        let total = margin_usd(
            collateral.discounted_collateral_usd,
            price_pnl,
            funding,
            utilization,
            margin.debt_usd,
        );

        Ok(MarginSnapshot {
            health_factor: health_factor(total, requirement.maintenance),
            collateral,
            price_pnl,
            accrued_funding: funding,
            accrued_utilization: utilization,
            debt_usd: margin.debt_usd,
            margin_usd: total,
            requirement,
        })
    }

    /// 8.4: applies a fill to the ledger. realizes funding/utilization (and pnl on the
    /// closed part), charges fees, keeps market totals and debt correction in step,
    /// then checks the result still clears initial margin unless it only de-risks.
    pub(super) fn open_or_modify(
        &self,
        tx: &mut Tx,
        account: &mut Account,
        size_delta: Decimal,
        fill_price: Price,
        fees: Quote,
    ) -> Result<SettlementResult, EngineError> {
        let market_id = tx.market.id();
        let old = account.get_position(market_id).cloned();
        let old_size = old.as_ref().map(|p| p.size.value()).unwrap_or(Decimal::ZERO);
        let new_size = old_size + size_delta;

        if old.as_ref().is_some_and(Position::is_flagged) {
            return Err(EngineError::PositionFlagged {
                account: account.id,
                market: market_id,
            });
        }

        if tx.market.exceeds_max_market_size(old_size, new_size) {
            return Err(EngineError::MaxMarketSizeExceeded {
                market: market_id,
                attempted: new_size.abs(),
                max: tx.market.config.max_market_size,
            });
        }

        // a liquidatable position can only be closed outright
        if old.is_some() && !new_size.is_zero() {
            let before = self.margin_snapshot(tx, &account.margin(market_id), old.as_ref())?;
            if before.is_liquidatable(true) {
                warn!(account = account.id.0, market = market_id.0, health = %before.health_factor, "modify rejected, position liquidatable");
                return Err(EngineError::PositionLiquidatable {
                    account: account.id,
                    market: market_id,
                    health_factor: before.health_factor,
                });
            }
        }

        let ctx = FillContext {
            fill_price,
            oracle_price: tx.oracle_price,
            funding_accrued: tx.market.funding.accrued_last_computed,
            utilization_accrued: tx.market.utilization.accrued_last_computed,
            now: tx.now(),
        };
        let modification = modify_position(market_id, old.as_ref(), size_delta, &ctx);

        let realized = modification.realized().sub(fees);
        let realization = account.margin_mut(market_id).realize(realized);
        mirror_realization(&mut tx.market, realization);

        let debt_correction = tx.market.apply_position_change(
            old.as_ref(),
            modification.new_position.as_ref(),
            fill_price,
            ctx.funding_accrued,
        );
        account.set_position(market_id, modification.new_position.clone());

        let reduces_only = !new_size.is_zero()
            && SignedSize::new(old_size).same_side_or_flat(SignedSize::new(new_size))
            && new_size.abs() < old_size.abs();
        if let Some(new_position) = modification.new_position.as_ref() {
            if !reduces_only {
                let after = self.margin_snapshot(tx, &account.margin(market_id), Some(new_position))?;
                if !after.meets_initial_margin() {
                    debug!(account = account.id.0, market = market_id.0, margin = %after.margin_usd, im = %after.requirement.initial, "modify rejected, initial margin");
                    return Err(EngineError::InsufficientMargin {
                        account: account.id,
                        market: market_id,
                        margin_usd: after.margin_usd,
                        required: after.requirement.initial,
                    });
                }
            }
        }

        debug!(
            account = account.id.0,
            market = market_id.0,
            old_size = %old_size,
            new_size = %new_size,
            fill = %fill_price,
            realized = %realized,
            "position modified"
        );

        Ok(SettlementResult {
            old_position: old,
            new_position: modification.new_position,
            fill_price,
            price_pnl: modification.price_pnl,
            accrued_funding: modification.accrued_funding,
            accrued_utilization: modification.accrued_utilization,
            fees,
            debt_correction,
        })
    }
}

// account-side settlement collateral and debt moves are mirrored into market totals
pub(super) fn mirror_realization(market: &mut Market, realization: Realization) {
    if realization.usd_collateral_delta > Decimal::ZERO {
        market.deposit_collateral(CollateralKind::Usd, realization.usd_collateral_delta);
    } else if realization.usd_collateral_delta < Decimal::ZERO {
        market.withdraw_collateral(CollateralKind::Usd, -realization.usd_collateral_delta);
    }
    market.add_trader_debt(realization.debt_delta);
}
