//! Domain and wire types.
//!
//! - [`book`] - Order book domain types (Side, PriceLevel, DeltaEvent, Snapshot, ...)
//! - [`messages`] - Stream frames, REST depth response and subscribe commands

pub mod book;
pub mod messages;

pub use book::{
    BestQuote, DeltaEvent, LevelChange, PriceLevel, Side, Snapshot, StreamMessage, TradeTick,
};
pub use messages::{decode_frame, Frame, WsCommand};

/// Price as an exact decimal
///
/// The exchange sends prices as decimal strings ("0.00012340"). Parsing to
/// `Decimal` keeps them exact, so two updates for the same level always hit
/// the same map key.
pub type Price = rust_decimal::Decimal;

/// Aggregate resting quantity at a price level
pub type Quantity = rust_decimal::Decimal;

/// Depth sequence number (`U`, `u` and `lastUpdateId` on the wire)
pub type UpdateId = u64;

/// Timestamp in milliseconds since Unix epoch
pub type TimestampMs = u64;
