// 8.0.2: result types and errors for engine operations.

use crate::account::AccountError;
use crate::config::ConfigError;
use crate::margin::MarginError;
use crate::market::DebtCorrectionDelta;
use crate::position::Position;
use crate::types::{AccountId, CollateralKind, HookId, MarketId, Price, Quote, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of applying one fill to the position ledger.
#[derive(Debug, Clone)]
pub struct SettlementResult {
    pub old_position: Option<Position>,
    pub new_position: Option<Position>,
    pub fill_price: Price,
    pub price_pnl: Quote,
    pub accrued_funding: Quote,
    pub accrued_utilization: Quote,
    pub fees: Quote,
    pub debt_correction: DebtCorrectionDelta,
}

/// Coarse error taxonomy. lets a caller decide to retry, wait or abandon without
/// matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    StateConflict,
    MarginViolation,
    CapacityExhausted,
    BoundsViolation,
    ConfigurationInvalid,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    // not found
    #[error("Market {0:?} not found")]
    MarketNotFound(MarketId),

    #[error("Account {0:?} not found")]
    AccountNotFound(AccountId),

    #[error("No position for account {account:?} in market {market:?}")]
    PositionNotFound { account: AccountId, market: MarketId },

    #[error("No pending order for account {account:?} in market {market:?}")]
    OrderNotFound { account: AccountId, market: MarketId },

    #[error("No price available for market {0:?}")]
    NoMarketPrice(MarketId),

    #[error("No gas token price available")]
    NoGasTokenPrice,

    // state conflicts
    #[error("Market {0:?} already exists")]
    MarketAlreadyExists(MarketId),

    #[error("Account {account:?} already has an order in market {market:?} committed at {committed_at}")]
    OrderAlreadyExists {
        account: AccountId,
        market: MarketId,
        committed_at: Timestamp,
    },

    #[error("Account {account:?} has a pending order in market {market:?}")]
    OrderPending { account: AccountId, market: MarketId },

    #[error("Order for account {account:?} in market {market:?} not ready until {ready_at}")]
    OrderNotReady {
        account: AccountId,
        market: MarketId,
        ready_at: Timestamp,
    },

    #[error("Order for account {account:?} in market {market:?} committed at {committed_at} is stale")]
    OrderStale {
        account: AccountId,
        market: MarketId,
        committed_at: Timestamp,
    },

    #[error("Order still fillable: fill {fill_price} within limit {limit_price}")]
    OrderStillFillable { fill_price: Price, limit_price: Price },

    #[error("Position for account {account:?} in market {market:?} is flagged for liquidation")]
    PositionFlagged { account: AccountId, market: MarketId },

    #[error("Position for account {account:?} in market {market:?} is not flagged")]
    PositionNotFlagged { account: AccountId, market: MarketId },

    #[error("Position for account {account:?} in market {market:?} is not liquidatable (health {health_factor})")]
    NotLiquidatable {
        account: AccountId,
        market: MarketId,
        health_factor: Decimal,
    },

    #[error("Account {account:?} still has a position of {size} in market {market:?}")]
    PositionOpen {
        account: AccountId,
        market: MarketId,
        size: Decimal,
    },

    #[error("Cannot merge positions on opposite sides: {from_size} into {to_size}")]
    MergeSideMismatch { from_size: Decimal, to_size: Decimal },

    #[error("Cannot merge account {0:?} into itself")]
    SameAccount(AccountId),

    // margin
    #[error("Insufficient margin for account {account:?} in market {market:?}: margin {margin_usd}, required {required}")]
    InsufficientMargin {
        account: AccountId,
        market: MarketId,
        margin_usd: Quote,
        required: Quote,
    },

    #[error("Position for account {account:?} in market {market:?} is liquidatable (health {health_factor})")]
    PositionLiquidatable {
        account: AccountId,
        market: MarketId,
        health_factor: Decimal,
    },

    #[error("Account {account:?} owes {debt} in market {market:?}")]
    OutstandingDebt {
        account: AccountId,
        market: MarketId,
        debt: Quote,
    },

    // capacity
    #[error("Liquidation capacity exhausted in market {market:?}: remaining {remaining} of {max_capacity}, price deviation {price_deviation} above {max_price_deviation}")]
    CapacityExhausted {
        market: MarketId,
        remaining: Decimal,
        max_capacity: Decimal,
        price_deviation: Decimal,
        max_price_deviation: Decimal,
    },

    // bounds
    #[error("Size delta cannot be zero")]
    ZeroSize,

    #[error("Amount cannot be zero")]
    ZeroAmount,

    #[error("Fill price {fill_price} exceeds limit {limit_price}")]
    PriceToleranceExceeded { fill_price: Price, limit_price: Price },

    #[error("No valid fill price in market {market:?} for size {size_delta}")]
    InvalidFillPrice { market: MarketId, size_delta: Decimal },

    #[error("Market {market:?} side would reach {attempted}, max {max}")]
    MaxMarketSizeExceeded {
        market: MarketId,
        attempted: Decimal,
        max: Decimal,
    },

    #[error("Collateral {kind:?} deposits would reach {attempted}, max {max}")]
    CollateralCapExceeded {
        kind: CollateralKind,
        attempted: Decimal,
        max: Decimal,
    },

    #[error("Too many settlement hooks: {count}, max {max}")]
    TooManyHooks { count: usize, max: usize },

    #[error("Settlement hook {0:?} listed twice")]
    DuplicateHook(HookId),

    #[error("Account {account:?} has no collateral in market {market:?}")]
    NoCollateral { account: AccountId, market: MarketId },

    #[error("Account {account:?} has no debt in market {market:?}")]
    NoDebt { account: AccountId, market: MarketId },

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    // configuration
    #[error("Collateral {0:?} is not supported")]
    UnsupportedCollateral(CollateralKind),

    #[error("Settlement hook {0:?} is not whitelisted")]
    HookNotAllowed(HookId),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Margin error: {0}")]
    Margin(#[from] MarginError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        use EngineError::*;
        match self {
            MarketNotFound(_)
            | AccountNotFound(_)
            | PositionNotFound { .. }
            | OrderNotFound { .. }
            | NoMarketPrice(_)
            | NoGasTokenPrice
            | Margin(MarginError::MissingCollateralPrice(_)) => ErrorKind::NotFound,

            MarketAlreadyExists(_)
            | OrderAlreadyExists { .. }
            | OrderPending { .. }
            | OrderNotReady { .. }
            | OrderStale { .. }
            | OrderStillFillable { .. }
            | PositionFlagged { .. }
            | PositionNotFlagged { .. }
            | NotLiquidatable { .. }
            | PositionOpen { .. }
            | MergeSideMismatch { .. }
            | SameAccount(_) => ErrorKind::StateConflict,

            InsufficientMargin { .. } | PositionLiquidatable { .. } | OutstandingDebt { .. } => {
                ErrorKind::MarginViolation
            }

            CapacityExhausted { .. } => ErrorKind::CapacityExhausted,

            ZeroSize
            | ZeroAmount
            | PriceToleranceExceeded { .. }
            | InvalidFillPrice { .. }
            | MaxMarketSizeExceeded { .. }
            | CollateralCapExceeded { .. }
            | TooManyHooks { .. }
            | DuplicateHook(_)
            | NoCollateral { .. }
            | NoDebt { .. }
            | Account(_) => ErrorKind::BoundsViolation,

            UnsupportedCollateral(_)
            | HookNotAllowed(_)
            | Config(_)
            | Margin(MarginError::UnsupportedCollateral(_)) => ErrorKind::ConfigurationInvalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn kinds() {
        assert_eq!(EngineError::MarketNotFound(MarketId(1)).kind(), ErrorKind::NotFound);
        assert_eq!(
            EngineError::PositionNotFlagged {
                account: AccountId(1),
                market: MarketId(1)
            }
            .kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(
            EngineError::from(MarginError::MissingCollateralPrice(CollateralKind::Eth)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            EngineError::from(ConfigError::DuplicateCollateral(CollateralKind::Eth)).kind(),
            ErrorKind::ConfigurationInvalid
        );
        assert_eq!(
            EngineError::from(AccountError::InsufficientCollateral {
                kind: CollateralKind::Usd,
                requested: dec!(2),
                available: dec!(1),
            })
            .kind(),
            ErrorKind::BoundsViolation
        );
    }

    #[test]
    fn errors_carry_context() {
        let err = EngineError::CapacityExhausted {
            market: MarketId(3),
            remaining: Decimal::ZERO,
            max_capacity: dec!(4),
            price_deviation: dec!(0.05),
            max_price_deviation: dec!(0.04),
        };
        let msg = err.to_string();
        assert!(msg.contains("remaining 0 of 4"));
        assert_eq!(err.kind(), ErrorKind::CapacityExhausted);
    }
}
