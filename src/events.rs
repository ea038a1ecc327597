// 11.0: every mutating call returns a Receipt: ordered events plus custody instructions.
// events carry the computed quantities (fees, pnl, funding, utilization, resulting debt and
// sizes) so an indexer can rebuild state without re-deriving anything. instructions are
// intents for the custody collaborator; the engine never moves tokens itself.

use crate::market::DebtCorrectionDelta;
use crate::types::{AccountId, CollateralKind, HookId, KeeperId, MarketId, Price, Quote, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    // Order events
    OrderCommitted(OrderCommittedEvent),
    OrderCanceled(OrderCanceledEvent),
    OrderSettled(OrderSettledEvent),

    // Margin events
    CollateralModified(CollateralModifiedEvent),
    DebtPaid(DebtPaidEvent),

    // Liquidation events
    PositionFlagged(PositionFlaggedEvent),
    PositionLiquidated(PositionLiquidatedEvent),

    AccountsMerged(AccountsMergedEvent),

    // Market events
    FundingRecomputed(FundingRecomputedEvent),
    UtilizationRecomputed(UtilizationRecomputedEvent),
    MarketUpdated(MarketUpdatedEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCommittedEvent {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub size_delta: Decimal,
    pub limit_price: Price,
    pub commitment_time: Timestamp,
    pub expected_fill_price: Price,
    pub estimated_order_fee: Quote,
    pub estimated_keeper_fee: Quote,
    pub keeper_fee_buffer_usd: Quote,
    pub hooks: Vec<HookId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    Stale,
    PriceToleranceExceeded,
    Flagged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCanceledEvent {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub keeper: Option<KeeperId>,
    pub size_delta: Decimal,
    pub commitment_time: Timestamp,
    pub reason: CancelReason,
    pub fill_price: Option<Price>,
    pub keeper_fee: Quote,
    pub debt_usd: Quote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSettledEvent {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub keeper: KeeperId,
    pub size_delta: Decimal,
    pub fill_price: Price,
    pub oracle_price: Price,
    pub order_fee: Quote,
    pub keeper_fee: Quote,
    pub price_pnl: Quote,
    pub accrued_funding: Quote,
    pub accrued_utilization: Quote,
    pub new_size: Decimal,
    pub new_entry_price: Option<Price>,
    // resulting margin state for this (account, market)
    pub usd_collateral: Decimal,
    pub debt_usd: Quote,
    pub debt_correction: DebtCorrectionDelta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralModifiedEvent {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub kind: CollateralKind,
    pub amount_delta: Decimal,
    pub new_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebtPaidEvent {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub amount: Quote,
    pub from_collateral: Quote,
    pub transferred_in: Quote,
    pub debt_usd: Quote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFlaggedEvent {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub keeper: KeeperId,
    pub size: Decimal,
    pub flagged_price: Price,
    pub margin_usd: Quote,
    pub maintenance_margin: Quote,
    pub health_factor: Decimal,
    pub flag_reward: Quote,
    pub collateral_value_usd: Quote,
    pub seized: Vec<(CollateralKind, Decimal)>,
    pub debt_cleared: Quote,
    pub canceled_order: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub keeper: KeeperId,
    pub liquidated_size: Decimal,
    pub remaining_size: Decimal,
    pub oracle_price: Price,
    pub keeper_fee: Quote,
    pub total_keeper_fees_paid: Quote,
    pub remaining_capacity: Decimal,
    pub capacity_bypassed: bool,
    // absorbed by the market, the account's margin was taken at flag time
    pub price_pnl: Quote,
    pub accrued_funding: Quote,
    pub accrued_utilization: Quote,
    pub debt_correction: DebtCorrectionDelta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountsMergedEvent {
    pub market_id: MarketId,
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub from_size: Decimal,
    pub to_size: Decimal,
    pub merged_size: Decimal,
    pub merged_entry_price: Option<Price>,
    pub from_realized: Quote,
    pub to_realized: Quote,
    pub debt_usd: Quote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRecomputedEvent {
    pub market_id: MarketId,
    pub skew: Decimal,
    pub funding_rate: Decimal,
    pub funding_velocity: Decimal,
    pub funding_accrued: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationRecomputedEvent {
    pub market_id: MarketId,
    pub skew: Decimal,
    pub utilization_rate: Decimal,
    pub utilization_accrued: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketUpdatedEvent {
    pub market_id: MarketId,
    pub skew: Decimal,
    pub size: Decimal,
    pub debt_correction: Decimal,
    pub total_trader_debt_usd: Quote,
    pub funding_rate: Decimal,
    pub funding_velocity: Decimal,
}

/// Custody intents. executed by whoever holds the tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    TransferIn {
        account_id: AccountId,
        market_id: MarketId,
        kind: CollateralKind,
        amount: Decimal,
    },
    TransferOut {
        account_id: AccountId,
        market_id: MarketId,
        kind: CollateralKind,
        amount: Decimal,
    },
    // moves an account's margin into liquidation custody
    SeizeCollateral {
        account_id: AccountId,
        market_id: MarketId,
        kind: CollateralKind,
        amount: Decimal,
    },
    PayKeeper {
        keeper: KeeperId,
        market_id: MarketId,
        amount: Quote,
    },
    InvokeSettlementHook {
        hook: HookId,
        account_id: AccountId,
        market_id: MarketId,
    },
}

/// Everything a mutating call produced, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub events: Vec<Event>,
    pub instructions: Vec<Instruction>,
}

impl Receipt {
    pub fn keeper_payout(&self, keeper: KeeperId) -> Quote {
        self.instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::PayKeeper { keeper: k, amount, .. } if *k == keeper => Some(*amount),
                _ => None,
            })
            .sum()
    }

    pub fn find<T>(&self, pick: impl Fn(&EventPayload) -> Option<&T>) -> Option<&T> {
        self.events.iter().find_map(|e| pick(&e.payload))
    }

    pub fn settled(&self) -> Option<&OrderSettledEvent> {
        self.find(|p| match p {
            EventPayload::OrderSettled(e) => Some(e),
            _ => None,
        })
    }

    pub fn liquidated(&self) -> Option<&PositionLiquidatedEvent> {
        self.find(|p| match p {
            EventPayload::PositionLiquidated(e) => Some(e),
            _ => None,
        })
    }

    pub fn flagged(&self) -> Option<&PositionFlaggedEvent> {
        self.find(|p| match p {
            EventPayload::PositionFlagged(e) => Some(e),
            _ => None,
        })
    }
}

pub trait EventEmitter {
    fn emit(&mut self, event: Event);
}

/// Bounded history of committed events. oldest are dropped first.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<Event>,
    next_id: u64,
    max_events: usize,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_id: 1,
            max_events,
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn recent(&self, count: usize) -> Vec<&Event> {
        let start = self.events.len().saturating_sub(count);
        self.events.range(start..).collect()
    }

    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventEmitter for EventLog {
    fn emit(&mut self, event: Event) {
        self.events.push_back(event);
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
    }
}
