//! Read-only projections. nothing here mutates; accumulators are projected to `now`
//! instead of recomputed.

use super::core::Engine;
use super::positions::MarginSnapshot;
use super::results::EngineError;
use crate::fill_price::{fill_price, mark_price};
use crate::liquidation::{
    capped_flag_reward, flag_keeper_reward, liquidation_keeper_fee, LiquidationStatus,
};
use crate::margin::{CollateralValue, MarginError};
use crate::order::PendingOrder;
use crate::position::FlagState;
use crate::price_feed::discounted_collateral_price;
use crate::types::{AccountId, CollateralKind, MarketId, Price, Quote, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDigest {
    pub market_id: MarketId,
    pub name: String,
    pub oracle_price: Price,
    pub mark_price: Option<Price>,
    pub skew: Decimal,
    pub size: Decimal,
    pub long_open_interest: Decimal,
    pub short_open_interest: Decimal,
    pub funding_rate: Decimal,
    pub funding_velocity: Decimal,
    pub funding_accrued: Decimal,
    pub utilization_rate: Decimal,
    pub utilization_accrued: Decimal,
    pub debt_correction: Decimal,
    pub total_trader_debt_usd: Quote,
    pub total_collateral_value_usd: Quote,
    pub reported_debt: Quote,
    pub max_liquidatable_capacity: Decimal,
    pub remaining_liquidatable_capacity: Decimal,
    pub last_liquidation_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionDigest {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub size: Decimal,
    pub entry_price: Price,
    pub oracle_price: Price,
    pub notional_value: Quote,
    pub price_pnl: Quote,
    pub accrued_funding: Quote,
    pub accrued_utilization: Quote,
    pub initial_margin: Quote,
    pub maintenance_margin: Quote,
    pub health_factor: Decimal,
    pub status: LiquidationStatus,
    pub flag: Option<FlagState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginDigest {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub collateral: Vec<CollateralValue>,
    pub collateral_usd: Quote,
    pub discounted_collateral_usd: Quote,
    pub debt_usd: Quote,
    pub margin_usd: Quote,
    pub initial_margin: Quote,
    pub maintenance_margin: Quote,
    pub health_factor: Decimal,
    pub status: LiquidationStatus,
}

/// What liquidating this position would pay keepers right now.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidationFees {
    pub flag_reward: Quote,
    // whatever is still owed to liquidators for the rest of the position
    pub liquidation_fee: Quote,
}

impl Engine {
    fn snapshot_now(&self, account_id: AccountId, market_id: MarketId) -> Result<MarginSnapshot, EngineError> {
        let market = self.market(market_id)?;
        let account = self.account(account_id)?;
        let env = self.env();
        let price = self.market_price(market_id)?;
        let cost = self.keeper_cost(&env)?;
        self.margin_snapshot_at(
            market,
            &account.margin(market_id),
            account.get_position(market_id),
            price,
            env.now,
            &cost,
        )
    }

    pub fn get_market_digest(&self, market_id: MarketId) -> Result<MarketDigest, EngineError> {
        let market = self.market(market_id)?;
        let price = self.market_price(market_id)?;
        let now = self.time();
        let collateral_value = market.total_collateral_value(|kind| self.collateral_price(kind))?;

        Ok(MarketDigest {
            market_id,
            name: market.config.name.clone(),
            oracle_price: price,
            mark_price: mark_price(market.skew, market.config.skew_scale, price),
            skew: market.skew,
            size: market.size,
            long_open_interest: market.long_open_interest(),
            short_open_interest: market.short_open_interest(),
            funding_rate: market.current_funding_rate(now),
            funding_velocity: market.current_funding_velocity(),
            funding_accrued: market.current_funding_accrued(price, now),
            utilization_rate: market.utilization.rate,
            utilization_accrued: market.current_utilization_accrued(now),
            debt_correction: market.debt_correction,
            total_trader_debt_usd: market.total_trader_debt_usd,
            total_collateral_value_usd: collateral_value,
            reported_debt: market.reported_debt(collateral_value, price, now),
            max_liquidatable_capacity: market.max_liquidatable_capacity(),
            remaining_liquidatable_capacity: market.remaining_liquidatable_capacity(now),
            last_liquidation_at: market.liquidation_window.last_liquidation_at,
        })
    }

    pub fn get_position_digest(
        &self,
        account_id: AccountId,
        market_id: MarketId,
    ) -> Result<PositionDigest, EngineError> {
        let position = self
            .account(account_id)?
            .get_position(market_id)
            .cloned()
            .ok_or(EngineError::PositionNotFound {
                account: account_id,
                market: market_id,
            })?;
        let price = self.market_price(market_id)?;
        let snapshot = self.snapshot_now(account_id, market_id)?;

        Ok(PositionDigest {
            account_id,
            market_id,
            size: position.size.value(),
            entry_price: position.entry_price,
            oracle_price: price,
            notional_value: position.notional_value(price),
            price_pnl: snapshot.price_pnl,
            accrued_funding: snapshot.accrued_funding,
            accrued_utilization: snapshot.accrued_utilization,
            initial_margin: snapshot.requirement.initial,
            maintenance_margin: snapshot.requirement.maintenance,
            health_factor: snapshot.health_factor,
            status: LiquidationStatus::evaluate(true, position.is_flagged(), snapshot.health_factor),
            flag: position.flag,
        })
    }

    pub fn get_margin_digest(
        &self,
        account_id: AccountId,
        market_id: MarketId,
    ) -> Result<MarginDigest, EngineError> {
        let account = self.account(account_id)?;
        let position = account.get_position(market_id);
        let snapshot = self.snapshot_now(account_id, market_id)?;

        Ok(MarginDigest {
            account_id,
            market_id,
            status: LiquidationStatus::evaluate(
                position.is_some(),
                position.is_some_and(|p| p.is_flagged()),
                snapshot.health_factor,
            ),
            collateral: snapshot.collateral.entries,
            collateral_usd: snapshot.collateral.collateral_usd,
            discounted_collateral_usd: snapshot.collateral.discounted_collateral_usd,
            debt_usd: snapshot.debt_usd,
            margin_usd: snapshot.margin_usd,
            initial_margin: snapshot.requirement.initial,
            maintenance_margin: snapshot.requirement.maintenance,
            health_factor: snapshot.health_factor,
        })
    }

    /// Flag reward and outstanding liquidation fee for the account's position. once
    /// flagged, the reward is already paid and the fee shrinks as chunks are taken.
    pub fn get_liquidation_fees(
        &self,
        account_id: AccountId,
        market_id: MarketId,
    ) -> Result<LiquidationFees, EngineError> {
        let market = self.market(market_id)?;
        let position = self
            .account(account_id)?
            .get_position(market_id)
            .cloned()
            .ok_or(EngineError::PositionNotFound {
                account: account_id,
                market: market_id,
            })?;
        let price = self.market_price(market_id)?;
        let cost = self.keeper_cost(&self.env())?;

        if let Some(flag) = position.flag.as_ref() {
            let total = liquidation_keeper_fee(flag.flagged_size, &market.config, &self.global, &cost);
            return Ok(LiquidationFees {
                flag_reward: Quote::zero(),
                liquidation_fee: total.sub(flag.liquidation_fees_paid).max(Quote::zero()),
            });
        }

        let snapshot = self.snapshot_now(account_id, market_id)?;
        let reward = flag_keeper_reward(position.notional_value(price), &market.config, &self.global, &cost);
        Ok(LiquidationFees {
            flag_reward: capped_flag_reward(reward, snapshot.collateral.collateral_usd),
            liquidation_fee: liquidation_keeper_fee(position.size.abs(), &market.config, &self.global, &cost),
        })
    }

    pub fn get_remaining_liquidatable_size_capacity(&self, market_id: MarketId) -> Result<Decimal, EngineError> {
        Ok(self.market(market_id)?.remaining_liquidatable_capacity(self.time()))
    }

    pub fn get_fill_price(&self, market_id: MarketId, size_delta: Decimal) -> Result<Price, EngineError> {
        let market = self.market(market_id)?;
        let price = self.market_price(market_id)?;
        fill_price(market.skew, market.config.skew_scale, size_delta, price).ok_or(
            EngineError::InvalidFillPrice {
                market: market_id,
                size_delta,
            },
        )
    }

    /// USD per unit after the size-dependent haircut.
    pub fn get_discounted_collateral_price(
        &self,
        kind: CollateralKind,
        amount: Decimal,
    ) -> Result<Decimal, EngineError> {
        let config = self
            .global
            .collateral(kind)
            .ok_or(EngineError::UnsupportedCollateral(kind))?;
        let price = self
            .collateral_price(kind)
            .ok_or(MarginError::MissingCollateralPrice(kind))?;
        Ok(discounted_collateral_price(price, amount, config))
    }

    pub fn get_reported_debt(&self, market_id: MarketId) -> Result<Quote, EngineError> {
        let market = self.market(market_id)?;
        let price = self.market_price(market_id)?;
        let collateral_value = market.total_collateral_value(|kind| self.collateral_price(kind))?;
        Ok(market.reported_debt(collateral_value, price, self.time()))
    }

    pub fn get_health_factor(&self, account_id: AccountId, market_id: MarketId) -> Result<Decimal, EngineError> {
        Ok(self.snapshot_now(account_id, market_id)?.health_factor)
    }

    pub fn get_order(&self, account_id: AccountId, market_id: MarketId) -> Result<Option<PendingOrder>, EngineError> {
        self.market(market_id)?;
        Ok(self.account(account_id)?.get_order(market_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalConfig, MarketConfig};
    use crate::engine::{EngineConfig, ErrorKind};
    use crate::price_feed::{EndorsedKeepers, FixedUtilization, MockOracle};
    use crate::types::KeeperId;
    use rust_decimal_macros::dec;

    const ETH: MarketId = MarketId(1);

    fn setup() -> (Engine, MockOracle, AccountId) {
        let oracle = MockOracle::new();
        oracle.set_market_price(ETH, Price::new_unchecked(dec!(1000)));
        oracle.set_collateral_price(CollateralKind::Eth, Price::new_unchecked(dec!(2000)));
        oracle.set_gas_token_price(Price::new_unchecked(dec!(2000)));
        let mut engine = Engine::new(
            EngineConfig::default(),
            GlobalConfig::default(),
            Box::new(oracle.clone()),
            Box::new(FixedUtilization::new(Decimal::ZERO)),
            Box::new(EndorsedKeepers::default()),
        )
        .unwrap();
        engine.set_time(Timestamp::from_secs(1_000));
        engine.add_market(MarketConfig::eth_perp()).unwrap();
        let account = engine.create_account();
        engine.modify_collateral(account, ETH, CollateralKind::Usd, dec!(5_000)).unwrap();
        (engine, oracle, account)
    }

    fn open(engine: &mut Engine, account: AccountId, size: Decimal) {
        engine
            .commit_order(account, ETH, size, Price::new_unchecked(dec!(2000)), Quote::zero(), vec![])
            .unwrap();
        engine.advance_time(8_000);
        engine.settle_order(account, ETH, KeeperId(1)).unwrap();
    }

    #[test]
    fn empty_market_digest() {
        let (engine, _, _) = setup();
        let digest = engine.get_market_digest(ETH).unwrap();
        assert!(digest.skew.is_zero());
        assert_eq!(digest.mark_price, Some(Price::new_unchecked(dec!(1000))));
        assert_eq!(digest.max_liquidatable_capacity, dec!(800));
        assert_eq!(digest.remaining_liquidatable_capacity, dec!(800));
        assert_eq!(digest.total_collateral_value_usd.value(), dec!(5_000));
        assert_eq!(digest.reported_debt.value(), dec!(5_000));

        let json = serde_json::to_string(&digest).unwrap();
        let back: MarketDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }

    #[test]
    fn position_and_margin_digests() {
        let (mut engine, oracle, account) = setup();
        assert!(matches!(
            engine.get_position_digest(account, ETH),
            Err(EngineError::PositionNotFound { .. })
        ));
        let margin = engine.get_margin_digest(account, ETH).unwrap();
        assert_eq!(margin.status, LiquidationStatus::NoPosition);
        assert_eq!(margin.health_factor, Decimal::MAX);

        open(&mut engine, account, dec!(2));
        oracle.set_market_price(ETH, Price::new_unchecked(dec!(1100)));

        let position = engine.get_position_digest(account, ETH).unwrap();
        assert_eq!(position.size, dec!(2));
        assert_eq!(position.notional_value.value(), dec!(2200));
        assert!(position.price_pnl.is_positive());
        assert_eq!(position.status, LiquidationStatus::Safe);

        let margin = engine.get_margin_digest(account, ETH).unwrap();
        assert_eq!(margin.health_factor, engine.get_health_factor(account, ETH).unwrap());
        assert_eq!(margin.maintenance_margin, position.maintenance_margin);
    }

    #[test]
    fn liquidation_fee_quote() {
        let (mut engine, _, account) = setup();
        open(&mut engine, account, dec!(2));
        let fees = engine.get_liquidation_fees(account, ETH).unwrap();
        // zero base fee: both are the absolute keeper margin
        assert_eq!(fees.flag_reward.value(), dec!(5));
        assert_eq!(fees.liquidation_fee.value(), dec!(5));
    }

    #[test]
    fn pricing_reads() {
        let (engine, _, account) = setup();
        assert_eq!(engine.get_fill_price(ETH, dec!(10)).unwrap().value(), dec!(1000.005));
        assert_eq!(
            engine.get_fill_price(MarketId(7), dec!(1)).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        // 100 eth on a 1M skew scale is under the 1% floor
        assert_eq!(
            engine.get_discounted_collateral_price(CollateralKind::Eth, dec!(100)).unwrap(),
            dec!(1980)
        );
        assert_eq!(
            engine.get_discounted_collateral_price(CollateralKind::Usd, dec!(100)).unwrap(),
            dec!(1)
        );
        assert!(engine.get_order(account, ETH).unwrap().is_none());
        assert_eq!(engine.get_remaining_liquidatable_size_capacity(ETH).unwrap(), dec!(800));
    }
}
