//! Order book state and snapshot/delta synchronization.
//!
//! This module is split into layers:
//!
//! - [`book`] - sorted price levels for one symbol
//! - [`sync`] - the per-symbol state machine, buffering while a snapshot is
//!   outstanding and detecting sequence gaps
//! - [`events`] - what the synchronizer reports, and where it reports it
//! - [`driver`] - the async loop that reads the stream and fetches snapshots
//!
//! # Example
//!
//! ```rust
//! use book_sync::orderbook::OrderBook;
//! use book_sync::types::{LevelChange, Side};
//! use rust_decimal::Decimal;
//!
//! let mut book = OrderBook::new("BTCUSDT");
//!
//! book.apply_changes(
//!     &[
//!         LevelChange::new(Side::Bid, Decimal::from(100), Decimal::ONE),
//!         LevelChange::new(Side::Ask, Decimal::from(101), Decimal::TWO),
//!     ],
//!     42,
//! );
//!
//! if let Some(bid) = book.best_bid() {
//!     println!("Best bid: {} @ {}", bid.quantity, bid.price);
//! }
//! assert_eq!(book.spread(), Some(Decimal::ONE));
//! ```

pub mod book;
pub mod driver;
pub mod events;
pub mod sync;

pub use book::OrderBook;
pub use driver::{SnapshotSource, SyncDriver};
pub use events::{EventSink, QuoteBoard, SyncEvent, SyncWarning};
pub use sync::{DeltaOutcome, OrderBookSynchronizer, SyncState, SyncStats};
