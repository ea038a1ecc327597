// perps-risk: perpetual futures position risk and liquidation engine.
// risk-first architecture: margin math, debt correction and liquidation take priority.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: MarketId, AccountId, Price, Quote, SignedSize, Timestamp
//   2.x  order.rs: pending orders and their settlement window
//   3.x  market.rs: market aggregate, debt correction identity, reported debt
//   4.x  position.rs: position struct, pnl, increase/reduce/flip
//   5.x  funding.rs: velocity funding and utilization accrual
//   6.x  liquidation.rs: keeper fees, capacity window, chunk sizing
//   7.x  config.rs: global keeper economics, collateral list, market risk params
//   8.x  engine/: orders, positions, collateral, merge, liquidations, funding, queries
//   9.x  price_feed.rs: collaborator traits (prices, utilization, keepers) + in-memory impls
//   10.x account.rs: account + per-market margin
//   11.x events.rs: events, custody instructions, receipts
//   12.x margin.rs: IM/MM requirement, discounted collateral, health factor
//   13.x fill_price.rs: skew-sensitive fill price and order fees

pub mod account;
pub mod config;
pub mod engine;
pub mod events;
pub mod fill_price;
pub mod funding;
pub mod liquidation;
pub mod margin;
pub mod market;
pub mod order;
pub mod position;
pub mod price_feed;
pub mod types;

// re exports for convenience
pub use account::*;
pub use config::*;
pub use engine::*;
pub use events::*;
pub use fill_price::*;
pub use funding::*;
pub use liquidation::*;
pub use margin::*;
pub use market::*;
pub use order::*;
pub use position::*;
pub use price_feed::*;
pub use types::*;
