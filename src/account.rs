//! Account and per-market margin state.
//!
//! Margin is isolated per (account, market): each market keeps its own collateral
//! balances and its own debt. Realized losses draw on settlement-currency collateral
//! first and spill into debt; realized gains pay debt down first.

use crate::order::PendingOrder;
use crate::position::Position;
use crate::types::{AccountId, CollateralKind, MarketId, Quote, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountMargin {
    pub collateral: BTreeMap<CollateralKind, Decimal>,
    pub debt_usd: Quote,
}

/// How a realization moved the account's settlement collateral and debt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Realization {
    pub usd_collateral_delta: Decimal,
    pub debt_delta: Decimal,
}

impl AccountMargin {
    pub fn available(&self, kind: CollateralKind) -> Decimal {
        self.collateral.get(&kind).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn has_collateral(&self) -> bool {
        self.collateral.values().any(|amount| !amount.is_zero())
    }

    pub fn deposit(&mut self, kind: CollateralKind, amount: Decimal) {
        *self.collateral.entry(kind).or_insert(Decimal::ZERO) += amount;
    }

    pub fn withdraw(&mut self, kind: CollateralKind, amount: Decimal) -> Result<(), AccountError> {
        let available = self.available(kind);
        if amount > available {
            return Err(AccountError::InsufficientCollateral {
                kind,
                requested: amount,
                available,
            });
        }
        let remaining = available - amount;
        if remaining.is_zero() {
            self.collateral.remove(&kind);
        } else {
            self.collateral.insert(kind, remaining);
        }
        Ok(())
    }

    /// Empties every balance and returns what was there.
    pub fn take_all(&mut self) -> BTreeMap<CollateralKind, Decimal> {
        let taken = std::mem::take(&mut self.collateral);
        taken.into_iter().filter(|(_, amount)| !amount.is_zero()).collect()
    }

    // gains pay debt first. losses draw settlement collateral first, remainder becomes debt.
    pub fn realize(&mut self, amount: Quote) -> Realization {
        let usd = self.available(CollateralKind::Usd);
        let debt = self.debt_usd.value();

        let (usd_delta, debt_delta) = if amount.value() >= Decimal::ZERO {
            let paid = debt.min(amount.value());
            (amount.value() - paid, -paid)
        } else {
            let loss = -amount.value();
            let taken = usd.min(loss);
            (-taken, loss - taken)
        };

        let new_usd = usd + usd_delta;
        if new_usd.is_zero() {
            self.collateral.remove(&CollateralKind::Usd);
        } else {
            self.collateral.insert(CollateralKind::Usd, new_usd);
        }
        self.debt_usd = Quote::new(debt + debt_delta);

        Realization {
            usd_collateral_delta: usd_delta,
            debt_delta,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub margins: HashMap<MarketId, AccountMargin>,
    pub positions: HashMap<MarketId, Position>,
    pub orders: HashMap<MarketId, PendingOrder>,
    pub created_at: Timestamp,
}

impl Account {
    pub fn new(id: AccountId, timestamp: Timestamp) -> Self {
        Self {
            id,
            margins: HashMap::new(),
            positions: HashMap::new(),
            orders: HashMap::new(),
            created_at: timestamp,
        }
    }

    pub fn margin(&self, market_id: MarketId) -> AccountMargin {
        self.margins.get(&market_id).cloned().unwrap_or_default()
    }

    pub fn margin_mut(&mut self, market_id: MarketId) -> &mut AccountMargin {
        self.margins.entry(market_id).or_default()
    }

    pub fn get_position(&self, market_id: MarketId) -> Option<&Position> {
        self.positions.get(&market_id)
    }

    pub fn get_position_mut(&mut self, market_id: MarketId) -> Option<&mut Position> {
        self.positions.get_mut(&market_id)
    }

    // flat positions are removed, never stored with size 0
    pub fn set_position(&mut self, market_id: MarketId, position: Option<Position>) {
        match position {
            Some(p) if !p.size.is_zero() => {
                self.positions.insert(market_id, p);
            }
            _ => {
                self.positions.remove(&market_id);
            }
        }
    }

    pub fn get_order(&self, market_id: MarketId) -> Option<&PendingOrder> {
        self.orders.get(&market_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("Insufficient {kind:?} collateral: requested {requested}, available {available}")]
    InsufficientCollateral {
        kind: CollateralKind,
        requested: Decimal,
        available: Decimal,
    },
}
