//! Order book domain types.
//!
//! These are the decoded forms of what the exchange sends: decimal strings
//! have already been parsed and validated, so anything holding a
//! [`DeltaEvent`] or [`Snapshot`] can apply it without further checks.

use super::{Price, Quantity, TimestampMs, UpdateId};

/// Side of the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Resting buy interest
    Bid,
    /// Resting sell interest
    Ask,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

/// A price and the aggregate quantity resting there
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    /// Level price
    pub price: Price,
    /// Total quantity at this price (never zero inside a book)
    pub quantity: Quantity,
}

impl PriceLevel {
    /// Create a new price level
    pub fn new(price: Price, quantity: Quantity) -> Self {
        Self { price, quantity }
    }
}

/// One absolute level change: set `price` on `side` to `quantity`
///
/// A zero quantity removes the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    /// Side the level belongs to
    pub side: Side,
    /// Level price
    pub price: Price,
    /// New total quantity (zero = remove)
    pub quantity: Quantity,
}

impl LevelChange {
    /// Create a level change
    pub fn new(side: Side, price: Price, quantity: Quantity) -> Self {
        Self {
            side,
            price,
            quantity,
        }
    }
}

/// Incremental depth update covering `first_update_id..=final_update_id`
///
/// # Example
///
/// ```rust
/// use book_sync::types::DeltaEvent;
/// use rust_decimal::Decimal;
///
/// let event = DeltaEvent::new("BTCUSDT", 101, 105)
///     .bid(Decimal::new(100, 1), Decimal::from(2))
///     .ask(Decimal::new(105, 1), Decimal::ZERO);
///
/// assert_eq!(event.changes.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaEvent {
    /// Exchange symbol
    pub symbol: String,
    /// First update id in this event (`U`)
    pub first_update_id: UpdateId,
    /// Final update id in this event (`u`)
    pub final_update_id: UpdateId,
    /// Exchange event time, if the feed provided one
    pub event_time: Option<TimestampMs>,
    /// Level changes in feed order
    pub changes: Vec<LevelChange>,
}

impl DeltaEvent {
    /// Create an empty delta for the given update range
    pub fn new(symbol: impl Into<String>, first_update_id: UpdateId, final_update_id: UpdateId) -> Self {
        Self {
            symbol: symbol.into(),
            first_update_id,
            final_update_id,
            event_time: None,
            changes: Vec::new(),
        }
    }

    /// Add a bid level change
    #[must_use]
    pub fn bid(mut self, price: Price, quantity: Quantity) -> Self {
        self.changes.push(LevelChange::new(Side::Bid, price, quantity));
        self
    }

    /// Add an ask level change
    #[must_use]
    pub fn ask(mut self, price: Price, quantity: Quantity) -> Self {
        self.changes.push(LevelChange::new(Side::Ask, price, quantity));
        self
    }
}

/// Full book state at `last_update_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Exchange symbol
    pub symbol: String,
    /// Version of the book at snapshot time
    pub last_update_id: UpdateId,
    /// Every level on both sides
    pub levels: Vec<LevelChange>,
}

impl Snapshot {
    /// Create an empty snapshot at the given version
    pub fn new(symbol: impl Into<String>, last_update_id: UpdateId) -> Self {
        Self {
            symbol: symbol.into(),
            last_update_id,
            levels: Vec::new(),
        }
    }

    /// Add a bid level
    #[must_use]
    pub fn bid(mut self, price: Price, quantity: Quantity) -> Self {
        self.levels.push(LevelChange::new(Side::Bid, price, quantity));
        self
    }

    /// Add an ask level
    #[must_use]
    pub fn ask(mut self, price: Price, quantity: Quantity) -> Self {
        self.levels.push(LevelChange::new(Side::Ask, price, quantity));
        self
    }
}

/// Best bid and best ask of one symbol
///
/// This is the only view of a book handed to consumers. `None` means the
/// side is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestQuote {
    /// Exchange symbol
    pub symbol: String,
    /// Highest bid
    pub bid: Option<PriceLevel>,
    /// Lowest ask
    pub ask: Option<PriceLevel>,
}

impl BestQuote {
    /// Best bid price
    pub fn bid_price(&self) -> Option<Price> {
        self.bid.map(|l| l.price)
    }

    /// Best bid size
    pub fn bid_size(&self) -> Option<Quantity> {
        self.bid.map(|l| l.quantity)
    }

    /// Best ask price
    pub fn ask_price(&self) -> Option<Price> {
        self.ask.map(|l| l.price)
    }

    /// Best ask size
    pub fn ask_size(&self) -> Option<Quantity> {
        self.ask.map(|l| l.quantity)
    }
}

/// Public trade print
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeTick {
    /// Exchange symbol
    pub symbol: String,
    /// Exchange trade id
    pub trade_id: u64,
    /// Trade price
    pub price: Price,
    /// Trade quantity
    pub quantity: Quantity,
    /// Trade time (ms)
    pub trade_time: TimestampMs,
    /// True when the buyer was the resting order
    pub buyer_is_maker: bool,
}

/// A decoded message from the market data stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// Diff depth update
    Depth(DeltaEvent),
    /// Trade print
    Trade(TradeTick),
}

impl StreamMessage {
    /// Symbol the message belongs to
    pub fn symbol(&self) -> &str {
        match self {
            StreamMessage::Depth(event) => &event.symbol,
            StreamMessage::Trade(trade) => &trade.symbol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_delta_builder() {
        let event = DeltaEvent::new("BTCUSDT", 1, 5)
            .bid(Decimal::from(10), Decimal::from(2))
            .ask(Decimal::new(105, 1), Decimal::from(3));

        assert_eq!(event.changes[0].side, Side::Bid);
        assert_eq!(event.changes[1].side, Side::Ask);
        assert_eq!(event.changes[1].price, Decimal::new(105, 1));
    }

    #[test]
    fn test_quote_accessors() {
        let quote = BestQuote {
            symbol: "BTCUSDT".to_string(),
            bid: Some(PriceLevel::new(Decimal::from(10), Decimal::from(2))),
            ask: None,
        };
        assert_eq!(quote.bid_price(), Some(Decimal::from(10)));
        assert_eq!(quote.bid_size(), Some(Decimal::from(2)));
        assert_eq!(quote.ask_price(), None);
    }

    #[test]
    fn test_stream_message_symbol() {
        let msg = StreamMessage::Depth(DeltaEvent::new("ETHUSDT", 1, 1));
        assert_eq!(msg.symbol(), "ETHUSDT");
        assert_eq!(Side::Bid.opposite(), Side::Ask);
    }
}
