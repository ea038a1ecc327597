//! Collateral deposits, withdrawals and debt repayment.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{CollateralModifiedEvent, DebtPaidEvent, EventPayload, Instruction, Receipt};
use crate::types::{AccountId, CollateralKind, MarketId, Quote};
use rust_decimal::Decimal;
use tracing::{debug, info};

impl Engine {
    /// Positive `amount_delta` deposits, negative withdraws. withdrawals need zero debt, and
    /// against an open position must leave it above initial margin and not liquidatable.
    pub fn modify_collateral(
        &mut self,
        account_id: AccountId,
        market_id: MarketId,
        kind: CollateralKind,
        amount_delta: Decimal,
    ) -> Result<Receipt, EngineError> {
        if amount_delta.is_zero() {
            return Err(EngineError::ZeroAmount);
        }
        let collateral = self
            .global
            .collateral(kind)
            .cloned()
            .ok_or(EngineError::UnsupportedCollateral(kind))?;

        let mut tx = self.begin(market_id)?;
        let mut account = self.staged_account(account_id)?;

        if account.get_order(market_id).is_some() {
            return Err(EngineError::OrderPending {
                account: account_id,
                market: market_id,
            });
        }
        let position = account.get_position(market_id).cloned();
        if position.as_ref().is_some_and(|p| p.is_flagged()) {
            return Err(EngineError::PositionFlagged {
                account: account_id,
                market: market_id,
            });
        }

        tx.recompute_accumulators(self.utilization_rate(market_id));

        if amount_delta > Decimal::ZERO {
            let attempted = tx.market.deposited(kind) + amount_delta;
            if attempted > collateral.max_allowable {
                return Err(EngineError::CollateralCapExceeded {
                    kind,
                    attempted,
                    max: collateral.max_allowable,
                });
            }
            account.margin_mut(market_id).deposit(kind, amount_delta);
            tx.market.deposit_collateral(kind, amount_delta);
            tx.instruct(Instruction::TransferIn {
                account_id,
                market_id,
                kind,
                amount: amount_delta,
            });
        } else {
            let amount = -amount_delta;
            // debt is repaid before anything leaves, position or not
            let debt = account.margin(market_id).debt_usd;
            if debt.is_positive() {
                debug!(account = account_id.0, market = market_id.0, debt = %debt, "withdrawal rejected, outstanding debt");
                return Err(EngineError::OutstandingDebt {
                    account: account_id,
                    market: market_id,
                    debt,
                });
            }
            if position.is_some() {
                let before = self.margin_snapshot(&tx, &account.margin(market_id), position.as_ref())?;
                if before.is_liquidatable(true) {
                    return Err(EngineError::PositionLiquidatable {
                        account: account_id,
                        market: market_id,
                        health_factor: before.health_factor,
                    });
                }
            }

            account.margin_mut(market_id).withdraw(kind, amount)?;
            tx.market.withdraw_collateral(kind, amount);

            if position.is_some() {
                let after = self.margin_snapshot(&tx, &account.margin(market_id), position.as_ref())?;
                if !after.meets_initial_margin() {
                    debug!(account = account_id.0, market = market_id.0, margin = %after.margin_usd, im = %after.requirement.initial, "withdrawal rejected, initial margin");
                    return Err(EngineError::InsufficientMargin {
                        account: account_id,
                        market: market_id,
                        margin_usd: after.margin_usd,
                        required: after.requirement.initial,
                    });
                }
            }
            tx.instruct(Instruction::TransferOut {
                account_id,
                market_id,
                kind,
                amount,
            });
        }

        tx.emit(EventPayload::CollateralModified(CollateralModifiedEvent {
            market_id,
            account_id,
            kind,
            amount_delta,
            new_amount: account.margin(market_id).available(kind),
        }));

        info!(account = account_id.0, market = market_id.0, kind = kind.symbol(), delta = %amount_delta, "collateral modified");
        Ok(self.commit(tx, [account]))
    }

    /// Withdraws everything. only allowed once there is no position, no order and no debt.
    pub fn withdraw_all_collateral(
        &mut self,
        account_id: AccountId,
        market_id: MarketId,
    ) -> Result<Receipt, EngineError> {
        let mut tx = self.begin(market_id)?;
        let mut account = self.staged_account(account_id)?;

        if let Some(position) = account.get_position(market_id) {
            return Err(EngineError::PositionOpen {
                account: account_id,
                market: market_id,
                size: position.size.value(),
            });
        }
        if account.get_order(market_id).is_some() {
            return Err(EngineError::OrderPending {
                account: account_id,
                market: market_id,
            });
        }
        let debt = account.margin(market_id).debt_usd;
        if debt.is_positive() {
            return Err(EngineError::OutstandingDebt {
                account: account_id,
                market: market_id,
                debt,
            });
        }

        let taken = account.margin_mut(market_id).take_all();
        if taken.is_empty() {
            return Err(EngineError::NoCollateral {
                account: account_id,
                market: market_id,
            });
        }

        for (kind, amount) in taken {
            tx.market.withdraw_collateral(kind, amount);
            tx.emit(EventPayload::CollateralModified(CollateralModifiedEvent {
                market_id,
                account_id,
                kind,
                amount_delta: -amount,
                new_amount: Decimal::ZERO,
            }));
            tx.instruct(Instruction::TransferOut {
                account_id,
                market_id,
                kind,
                amount,
            });
        }

        info!(account = account_id.0, market = market_id.0, "all collateral withdrawn");
        Ok(self.commit(tx, [account]))
    }

    /// Repays up to `amount` of debt. deposited settlement collateral is used first, the
    /// rest is pulled in from the account's owner.
    pub fn pay_debt(
        &mut self,
        account_id: AccountId,
        market_id: MarketId,
        amount: Quote,
    ) -> Result<Receipt, EngineError> {
        if !amount.is_positive() {
            return Err(EngineError::ZeroAmount);
        }
        let mut tx = self.begin(market_id)?;
        let mut account = self.staged_account(account_id)?;

        let margin = account.margin_mut(market_id);
        if !margin.debt_usd.is_positive() {
            return Err(EngineError::NoDebt {
                account: account_id,
                market: market_id,
            });
        }

        let paid = amount.min(margin.debt_usd);
        let from_collateral = Quote::new(margin.available(CollateralKind::Usd).min(paid.value()));
        let transferred_in = paid.sub(from_collateral);

        if from_collateral.is_positive() {
            margin.withdraw(CollateralKind::Usd, from_collateral.value())?;
        }
        margin.debt_usd = margin.debt_usd.sub(paid);
        let debt_usd = margin.debt_usd;

        tx.market.withdraw_collateral(CollateralKind::Usd, from_collateral.value());
        tx.market.add_trader_debt(-paid.value());

        if transferred_in.is_positive() {
            tx.instruct(Instruction::TransferIn {
                account_id,
                market_id,
                kind: CollateralKind::Usd,
                amount: transferred_in.value(),
            });
        }
        tx.emit(EventPayload::DebtPaid(DebtPaidEvent {
            market_id,
            account_id,
            amount: paid,
            from_collateral,
            transferred_in,
            debt_usd,
        }));

        info!(account = account_id.0, market = market_id.0, paid = %paid, remaining = %debt_usd, "debt paid");
        Ok(self.commit(tx, [account]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalConfig, MarketConfig};
    use crate::engine::{EngineConfig, ErrorKind};
    use crate::price_feed::{EndorsedKeepers, FixedUtilization, MockOracle};
    use crate::types::{KeeperId, Price, Timestamp};
    use rust_decimal_macros::dec;

    const ETH: MarketId = MarketId(1);

    fn setup() -> (Engine, AccountId) {
        let oracle = MockOracle::new();
        oracle.set_market_price(ETH, Price::new_unchecked(dec!(1000)));
        oracle.set_collateral_price(CollateralKind::Eth, Price::new_unchecked(dec!(1000)));
        oracle.set_gas_token_price(Price::new_unchecked(dec!(2000)));
        let mut engine = Engine::new(
            EngineConfig::default(),
            GlobalConfig::default(),
            Box::new(oracle),
            Box::new(FixedUtilization::new(Decimal::ZERO)),
            Box::new(EndorsedKeepers::default()),
        )
        .unwrap();
        engine.set_time(Timestamp::from_secs(1_000));
        engine.add_market(MarketConfig::eth_perp()).unwrap();
        let account = engine.create_account();
        (engine, account)
    }

    #[test]
    fn deposit_and_withdraw() {
        let (mut engine, account) = setup();
        let receipt = engine
            .modify_collateral(account, ETH, CollateralKind::Eth, dec!(3))
            .unwrap();
        assert_eq!(
            receipt.instructions,
            vec![Instruction::TransferIn {
                account_id: account,
                market_id: ETH,
                kind: CollateralKind::Eth,
                amount: dec!(3),
            }]
        );
        engine
            .modify_collateral(account, ETH, CollateralKind::Eth, dec!(-1))
            .unwrap();
        assert_eq!(engine.get_market(ETH).unwrap().deposited(CollateralKind::Eth), dec!(2));

        let err = engine
            .modify_collateral(account, ETH, CollateralKind::Eth, dec!(-5))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BoundsViolation);
    }

    #[test]
    fn deposit_rules() {
        let (mut engine, account) = setup();
        assert_eq!(
            engine.modify_collateral(account, ETH, CollateralKind::Usd, Decimal::ZERO),
            Err(EngineError::ZeroAmount)
        );
        assert_eq!(
            engine.modify_collateral(account, ETH, CollateralKind::Btc, dec!(1)),
            Err(EngineError::UnsupportedCollateral(CollateralKind::Btc))
        );
        let err = engine
            .modify_collateral(account, ETH, CollateralKind::Eth, dec!(100_001))
            .unwrap_err();
        assert!(matches!(err, EngineError::CollateralCapExceeded { .. }));
    }

    #[test]
    fn withdraw_all_needs_clean_account() {
        let (mut engine, account) = setup();
        assert!(matches!(
            engine.withdraw_all_collateral(account, ETH),
            Err(EngineError::NoCollateral { .. })
        ));

        engine.modify_collateral(account, ETH, CollateralKind::Usd, dec!(500)).unwrap();
        engine.modify_collateral(account, ETH, CollateralKind::Eth, dec!(1)).unwrap();
        let receipt = engine.withdraw_all_collateral(account, ETH).unwrap();
        assert_eq!(receipt.instructions.len(), 2);
        assert!(!engine.get_account(account).unwrap().margin(ETH).has_collateral());
        assert!(engine.get_market(ETH).unwrap().deposited_collateral.is_empty());
    }

    #[test]
    fn withdrawal_blocked_while_debt_outstanding() {
        let oracle = MockOracle::new();
        oracle.set_market_price(ETH, Price::new_unchecked(dec!(1000)));
        oracle.set_collateral_price(CollateralKind::Eth, Price::new_unchecked(dec!(1000)));
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

        // eth only, so fees and the loss on close all land in debt
        engine.modify_collateral(account, ETH, CollateralKind::Eth, dec!(2)).unwrap();
        engine
            .commit_order(account, ETH, dec!(1), Price::new_unchecked(dec!(1_100)), Quote::zero(), vec![])
            .unwrap();
        engine.advance_time(8_000);
        engine.settle_order(account, ETH, KeeperId(1)).unwrap();

        oracle.set_market_price(ETH, Price::new_unchecked(dec!(950)));
        engine
            .commit_order(account, ETH, dec!(-1), Price::new_unchecked(dec!(900)), Quote::zero(), vec![])
            .unwrap();
        engine.advance_time(8_000);
        engine.settle_order(account, ETH, KeeperId(1)).unwrap();
        assert!(engine.get_account(account).unwrap().get_position(ETH).is_none());

        let debt = engine.get_account(account).unwrap().margin(ETH).debt_usd;
        assert!(debt.value() > dec!(50));

        for amount in [dec!(-2), dec!(-0.1)] {
            let err = engine
                .modify_collateral(account, ETH, CollateralKind::Eth, amount)
                .unwrap_err();
            assert!(matches!(err, EngineError::OutstandingDebt { .. }));
            assert_eq!(err.kind(), ErrorKind::MarginViolation);
        }
        assert_eq!(engine.get_market(ETH).unwrap().deposited(CollateralKind::Eth), dec!(2));
        assert_eq!(
            engine.get_account(account).unwrap().margin(ETH).available(CollateralKind::Eth),
            dec!(2)
        );

        engine.pay_debt(account, ETH, debt).unwrap();
        engine
            .modify_collateral(account, ETH, CollateralKind::Eth, dec!(-2))
            .unwrap();
        assert!(engine.get_market(ETH).unwrap().deposited(CollateralKind::Eth).is_zero());
    }

    #[test]
    fn pay_debt_uses_usd_first() {
        let (mut engine, account) = setup();
        engine.modify_collateral(account, ETH, CollateralKind::Usd, dec!(30)).unwrap();
        if let Some(a) = engine.accounts.get_mut(&account) {
            a.margin_mut(ETH).debt_usd = Quote::new(dec!(100));
        }
        if let Some(m) = engine.markets.get_mut(&ETH) {
            m.add_trader_debt(dec!(100));
        }

        assert!(matches!(
            engine.withdraw_all_collateral(account, ETH),
            Err(EngineError::OutstandingDebt { .. })
        ));

        let receipt = engine.pay_debt(account, ETH, Quote::new(dec!(80))).unwrap();
        let margin = engine.get_account(account).unwrap().margin(ETH);
        assert_eq!(margin.debt_usd.value(), dec!(20));
        assert_eq!(margin.available(CollateralKind::Usd), Decimal::ZERO);
        assert_eq!(
            receipt.instructions,
            vec![Instruction::TransferIn {
                account_id: account,
                market_id: ETH,
                kind: CollateralKind::Usd,
                amount: dec!(50),
            }]
        );
        assert_eq!(engine.get_market(ETH).unwrap().total_trader_debt_usd.value(), dec!(20));

        engine.pay_debt(account, ETH, Quote::new(dec!(500))).unwrap();
        assert!(matches!(
            engine.pay_debt(account, ETH, Quote::new(dec!(1))),
            Err(EngineError::NoDebt { .. })
        ));
    }
}
