// 8.0: risk engine. coordinates order settlement, margin, funding accrual and liquidation.
// deterministic and event-driven with no external I/O: prices, utilization and keeper
// policy come in through collaborator traits, custody goes out as instructions.

mod collateral;
mod config;
mod core;
mod funding;
mod liquidations;
mod merge;
mod orders;
mod positions;
mod queries;
mod results;

pub use config::EngineConfig;
pub use core::{Engine, Env};
pub use positions::MarginSnapshot;
pub use queries::{LiquidationFees, MarginDigest, MarketDigest, PositionDigest};
pub use results::{EngineError, ErrorKind, SettlementResult};
