// 8.0 engine/core.rs: main engine. holds markets, accounts, collaborators and the event log.
// 8.1 every mutating call runs as a Tx: clone the market, mutate the clone, commit on success.
// an error anywhere drops the clone, so nothing is ever half applied.

use super::config::EngineConfig;
use super::results::EngineError;
use crate::account::Account;
use crate::config::{validate_collaterals, CollateralConfig, ConfigError, GlobalConfig, MarketConfig};
use crate::events::{
    Event, EventEmitter, EventLog, EventPayload, Instruction, MarketUpdatedEvent, Receipt,
};
use crate::liquidation::KeeperCost;
use crate::market::Market;
use crate::price_feed::{KeeperPolicy, PriceSource, UtilizationSource};
use crate::types::{AccountId, CollateralKind, MarketId, Price, Timestamp};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Execution environment for one call. read once, never sampled twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Env {
    pub now: Timestamp,
    pub base_fee_per_gas: Decimal,
}

/** 8.1: staged state for one mutating call */
pub(super) struct Tx {
    pub env: Env,
    pub market: Market,
    pub oracle_price: Price,
    pub keeper_cost: KeeperCost,
    payloads: Vec<EventPayload>,
    instructions: Vec<Instruction>,
}

impl Tx {
    pub fn emit(&mut self, payload: EventPayload) {
        self.payloads.push(payload);
    }

    pub fn instruct(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn now(&self) -> Timestamp {
        self.env.now
    }

    // advance funding and utilization before anything reads them
    pub fn recompute_accumulators(&mut self, utilization_rate: Decimal) {
        let now = self.env.now;
        self.market.recompute_funding(self.oracle_price, now);
        self.market.recompute_utilization(utilization_rate, now);
    }

    pub fn emit_market_updated(&mut self) {
        let now = self.env.now;
        let payload = EventPayload::MarketUpdated(MarketUpdatedEvent {
            market_id: self.market.id(),
            skew: self.market.skew,
            size: self.market.size,
            debt_correction: self.market.debt_correction,
            total_trader_debt_usd: self.market.total_trader_debt_usd,
            funding_rate: self.market.current_funding_rate(now),
            funding_velocity: self.market.current_funding_velocity(),
        });
        self.emit(payload);
    }
}

/** 8.2: main engine struct. all state lives here */
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) global: GlobalConfig,
    pub(super) markets: HashMap<MarketId, Market>,
    pub(super) accounts: HashMap<AccountId, Account>,
    pub(super) prices: Box<dyn PriceSource>,
    pub(super) utilization: Box<dyn UtilizationSource>,
    pub(super) keepers: Box<dyn KeeperPolicy>,
    pub(super) log: EventLog,
    pub(super) next_account_id: u64,
    pub(super) current_time: Timestamp,
    pub(super) base_fee_per_gas: Decimal,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("markets", &self.markets.len())
            .field("accounts", &self.accounts.len())
            .field("events", &self.log.len())
            .field("current_time", &self.current_time)
            .field("base_fee_per_gas", &self.base_fee_per_gas)
            .finish()
    }
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        global: GlobalConfig,
        prices: Box<dyn PriceSource>,
        utilization: Box<dyn UtilizationSource>,
        keepers: Box<dyn KeeperPolicy>,
    ) -> Result<Self, EngineError> {
        global.validate()?;
        let log = EventLog::new(config.max_events);
        Ok(Self {
            config,
            global,
            markets: HashMap::new(),
            accounts: HashMap::new(),
            prices,
            utilization,
            keepers,
            log,
            next_account_id: 1,
            current_time: Timestamp::from_millis(0),
            base_fee_per_gas: Decimal::ZERO,
        })
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = Timestamp::from_millis(self.current_time.as_millis() + millis);
    }

    pub fn set_base_fee(&mut self, base_fee_per_gas: Decimal) {
        self.base_fee_per_gas = base_fee_per_gas.max(Decimal::ZERO);
    }

    pub fn env(&self) -> Env {
        Env {
            now: self.current_time,
            base_fee_per_gas: self.base_fee_per_gas,
        }
    }

    pub fn global_config(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn add_market(&mut self, config: MarketConfig) -> Result<MarketId, EngineError> {
        config.validate()?;
        let market_id = config.id;
        if self.markets.contains_key(&market_id) {
            return Err(EngineError::MarketAlreadyExists(market_id));
        }
        info!(market = market_id.0, name = %config.name, skew_scale = %config.skew_scale, "market added");
        self.markets.insert(market_id, Market::new(config, self.current_time));
        Ok(market_id)
    }

    pub fn get_market(&self, market_id: MarketId) -> Option<&Market> {
        self.markets.get(&market_id)
    }

    pub fn create_account(&mut self) -> AccountId {
        let id = AccountId(self.next_account_id);
        self.next_account_id += 1;
        self.accounts.insert(id, Account::new(id, self.current_time));
        debug!(account = id.0, "account created");
        id
    }

    pub fn get_account(&self, account_id: AccountId) -> Option<&Account> {
        self.accounts.get(&account_id)
    }

    /// Replaces the accepted collateral list. kinds that still hold deposits can't be dropped.
    pub fn configure_collaterals(&mut self, collaterals: Vec<CollateralConfig>) -> Result<(), EngineError> {
        validate_collaterals(&collaterals)?;
        if !collaterals.iter().any(|c| c.kind.is_settlement()) {
            return Err(ConfigError::InvalidCollateral {
                kind: CollateralKind::Usd,
                reason: "settlement currency must stay configured".to_string(),
            }
            .into());
        }
        for market in self.markets.values() {
            for (&kind, amount) in &market.deposited_collateral {
                if !amount.is_zero() && !collaterals.iter().any(|c| c.kind == kind) {
                    warn!(market = market.id().0, kind = kind.symbol(), "collateral still deposited");
                    return Err(ConfigError::CollateralInUse(kind).into());
                }
            }
        }
        info!(count = collaterals.len(), "collaterals configured");
        self.global.collaterals = collaterals;
        Ok(())
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.log.events()
    }

    pub fn recent_events(&self, count: usize) -> Vec<&Event> {
        self.log.recent(count)
    }

    pub(super) fn market(&self, market_id: MarketId) -> Result<&Market, EngineError> {
        self.markets
            .get(&market_id)
            .ok_or(EngineError::MarketNotFound(market_id))
    }

    pub(super) fn account(&self, account_id: AccountId) -> Result<&Account, EngineError> {
        self.accounts
            .get(&account_id)
            .ok_or(EngineError::AccountNotFound(account_id))
    }

    pub(super) fn staged_account(&self, account_id: AccountId) -> Result<Account, EngineError> {
        self.account(account_id).cloned()
    }

    pub(super) fn market_price(&self, market_id: MarketId) -> Result<Price, EngineError> {
        self.prices
            .market_price(market_id)
            .ok_or(EngineError::NoMarketPrice(market_id))
    }

    pub(super) fn collateral_price(&self, kind: CollateralKind) -> Option<Price> {
        if kind.is_settlement() {
            return Some(Price::one());
        }
        self.prices.collateral_price(kind)
    }

    pub(super) fn keeper_cost(&self, env: &Env) -> Result<KeeperCost, EngineError> {
        let gas_token = self
            .prices
            .gas_token_price()
            .ok_or(EngineError::NoGasTokenPrice)?;
        Ok(KeeperCost {
            gas_token_price: gas_token.value(),
            base_fee_per_gas: env.base_fee_per_gas,
        })
    }

    pub(super) fn utilization_rate(&self, market_id: MarketId) -> Decimal {
        self.utilization.utilization_rate(market_id)
    }

    pub(super) fn begin(&self, market_id: MarketId) -> Result<Tx, EngineError> {
        let env = self.env();
        let market = self.market(market_id)?.clone();
        let oracle_price = self.market_price(market_id)?;
        let keeper_cost = self.keeper_cost(&env)?;
        Ok(Tx {
            env,
            market,
            oracle_price,
            keeper_cost,
            payloads: Vec::new(),
            instructions: Vec::new(),
        })
    }

    pub(super) fn commit(&mut self, tx: Tx, accounts: impl IntoIterator<Item = Account>) -> Receipt {
        let Tx {
            env,
            market,
            payloads,
            instructions,
            ..
        } = tx;

        self.markets.insert(market.id(), market);
        for account in accounts {
            self.accounts.insert(account.id, account);
        }

        let mut events = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let event = Event::new(self.log.next_id(), env.now, payload);
            self.log.emit(event.clone());
            events.push(event);
        }

        Receipt {
            events,
            instructions,
        }
    }
}
