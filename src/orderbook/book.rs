//! Core orderbook data structure.
//!
//! This implementation uses `BTreeMap` for sorted price levels, providing:
//!
//! - O(log n) insertion, deletion, and lookup
//! - O(1) access to best bid/ask (cached after every mutation)
//! - Ordered iteration for depth-of-book queries

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::types::{
    BestQuote, LevelChange, Price, PriceLevel, Quantity, Side, Snapshot, UpdateId,
};

/// Limit order book for a single symbol.
///
/// # Design Decisions
///
/// 1. **Decimal prices**: Prices and quantities are `rust_decimal::Decimal`,
///    parsed once from the exchange's strings. Comparisons are exact, so a
///    level is always found again under the same key.
///
/// 2. **BTreeMap**: Both sides are kept ascending. Best bid is the last bid
///    key, best ask the first ask key.
///
/// 3. **Absolute updates**: Every change carries the new total quantity for
///    its level. Zero removes the level; a zero is never stored.
///
/// 4. **Version tracking**: `last_update_id` is the version of the last
///    delta or snapshot applied. Zero means the book has never been
///    initialized (or was reset after a gap).
///
/// # Thread Safety
///
/// This struct is `Send + Sync` but not internally synchronized. The
/// synchronizer owns it exclusively and only hands out shared borrows.
#[derive(Debug, Clone)]
pub struct OrderBook {
    /// Exchange symbol
    symbol: String,

    /// Bid levels: price -> quantity
    /// Sorted ascending by price (best bid = highest = last)
    bids: BTreeMap<Price, Quantity>,

    /// Ask levels: price -> quantity
    /// Sorted ascending by price (best ask = lowest = first)
    asks: BTreeMap<Price, Quantity>,

    /// Version of the last applied delta or snapshot
    last_update_id: UpdateId,

    best_bid: Option<PriceLevel>,
    best_ask: Option<PriceLevel>,
}

impl OrderBook {
    /// Create a new empty orderbook for the given symbol
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            best_bid: None,
            best_ask: None,
        }
    }

    /// Get the symbol
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Get the version of the last applied update
    #[must_use]
    pub const fn last_update_id(&self) -> UpdateId {
        self.last_update_id
    }

    /// Whether a snapshot has been applied since creation or the last reset
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.last_update_id != 0
    }

    /// Apply a batch of level changes and advance to `final_update_id`
    ///
    /// Returns `true` if the best bid or best ask changed.
    pub fn apply_changes(&mut self, changes: &[LevelChange], final_update_id: UpdateId) -> bool {
        for change in changes {
            self.set_level(change.side, change.price, change.quantity);
        }
        self.last_update_id = final_update_id;
        self.refresh_best()
    }

    /// Replace the whole book with a snapshot
    ///
    /// Returns `true` if the best bid or best ask changed.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> bool {
        self.bids.clear();
        self.asks.clear();
        for level in &snapshot.levels {
            self.set_level(level.side, level.price, level.quantity);
        }
        self.last_update_id = snapshot.last_update_id;
        self.refresh_best()
    }

    /// Set a price level directly
    ///
    /// A zero quantity removes the level. The cached best bid/ask is not
    /// refreshed; use [`OrderBook::apply_changes`] for that.
    fn set_level(&mut self, side: Side, price: Price, quantity: Quantity) {
        let book = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };

        if quantity.is_zero() {
            book.remove(&price);
        } else {
            book.insert(price, quantity);
        }
    }

    /// Recompute cached best levels, returning whether either changed
    fn refresh_best(&mut self) -> bool {
        let best_bid = self
            .bids
            .last_key_value()
            .map(|(&p, &q)| PriceLevel::new(p, q));
        let best_ask = self
            .asks
            .first_key_value()
            .map(|(&p, &q)| PriceLevel::new(p, q));

        let changed = best_bid != self.best_bid || best_ask != self.best_ask;
        self.best_bid = best_bid;
        self.best_ask = best_ask;
        changed
    }

    /// Get the best bid (highest bid)
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.best_bid
    }

    /// Get the best ask (lowest ask)
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.best_ask
    }

    /// Best bid and ask as a consumer-facing value
    #[must_use]
    pub fn quote(&self) -> BestQuote {
        BestQuote {
            symbol: self.symbol.clone(),
            bid: self.best_bid,
            ask: self.best_ask,
        }
    }

    /// Get the mid price
    ///
    /// Returns the average of best bid and best ask, or `None` if either is missing.
    #[must_use]
    pub fn mid_price(&self) -> Option<Price> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// Get the spread (best ask - best bid)
    #[must_use]
    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Check if the book is crossed (best bid >= best ask)
    ///
    /// This shouldn't happen in a healthy book but is useful for validation.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }

    /// Get all bid levels, sorted by price descending (best first)
    pub fn bids(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.bids.iter().rev().map(|(&p, &q)| PriceLevel::new(p, q))
    }

    /// Get all ask levels, sorted by price ascending (best first)
    pub fn asks(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.asks.iter().map(|(&p, &q)| PriceLevel::new(p, q))
    }

    /// Quantity resting at `price` on `side`, if the level exists
    #[must_use]
    pub fn level(&self, side: Side, price: Price) -> Option<Quantity> {
        match side {
            Side::Bid => self.bids.get(&price).copied(),
            Side::Ask => self.asks.get(&price).copied(),
        }
    }

    /// Get the top N bid levels
    #[must_use]
    pub fn top_bids(&self, n: usize) -> Vec<PriceLevel> {
        self.bids().take(n).collect()
    }

    /// Get the top N ask levels
    #[must_use]
    pub fn top_asks(&self, n: usize) -> Vec<PriceLevel> {
        self.asks().take(n).collect()
    }

    /// Get total bid quantity
    #[must_use]
    pub fn total_bid_quantity(&self) -> Quantity {
        self.bids.values().sum()
    }

    /// Get total ask quantity
    #[must_use]
    pub fn total_ask_quantity(&self) -> Quantity {
        self.asks.values().sum()
    }

    /// Clear the orderbook and reset its version to zero
    ///
    /// Returns whether a best bid or ask was set before.
    pub fn clear(&mut self) -> bool {
        let had_top = self.best_bid.is_some() || self.best_ask.is_some();
        self.bids.clear();
        self.asks.clear();
        self.last_update_id = 0;
        self.best_bid = None;
        self.best_ask = None;
        had_top
    }

    /// Check if the orderbook is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Get the number of price levels as `(bids, asks)`
    #[must_use]
    pub fn num_levels(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn bid(price: &str, qty: &str) -> LevelChange {
        LevelChange::new(Side::Bid, d(price), d(qty))
    }

    fn ask(price: &str, qty: &str) -> LevelChange {
        LevelChange::new(Side::Ask, d(price), d(qty))
    }

    #[test]
    fn test_new_orderbook() {
        let book = OrderBook::new("BTCUSDT");
        assert_eq!(book.symbol(), "BTCUSDT");
        assert!(book.is_empty());
        assert_eq!(book.last_update_id(), 0);
        assert!(!book.is_initialized());
    }

    #[test]
    fn test_apply_changes() {
        let mut book = OrderBook::new("TEST");

        assert!(book.apply_changes(&[bid("100.0", "2"), bid("99.5", "1"), ask("100.5", "3")], 7));
        assert_eq!(book.last_update_id(), 7);
        assert_eq!(book.best_bid(), Some(PriceLevel::new(d("100.0"), d("2"))));
        assert_eq!(book.best_ask(), Some(PriceLevel::new(d("100.5"), d("3"))));

        // Overwrite, not accumulate
        assert!(book.apply_changes(&[bid("100.0", "5")], 8));
        assert_eq!(book.best_bid().map(|l| l.quantity), Some(d("5")));

        // Change below the top leaves best untouched
        assert!(!book.apply_changes(&[bid("99.5", "4")], 9));
        assert_eq!(book.level(Side::Bid, d("99.5")), Some(d("4")));
    }

    #[test]
    fn test_zero_quantity_removes_level() {
        let mut book = OrderBook::new("TEST");
        book.apply_changes(&[bid("100.0", "2"), bid("99.0", "1")], 1);

        assert!(book.apply_changes(&[bid("100", "0")], 2));
        assert_eq!(book.level(Side::Bid, d("100.0")), None);
        assert_eq!(book.best_bid(), Some(PriceLevel::new(d("99.0"), d("1"))));
        assert_eq!(book.num_levels(), (1, 0));

        // Removing a level that isn't there is harmless
        assert!(!book.apply_changes(&[ask("101", "0")], 3));
    }

    #[test]
    fn test_snapshot_replaces_everything() {
        let mut book = OrderBook::new("TEST");
        book.apply_changes(&[bid("1", "1"), ask("9", "1")], 3);

        let snapshot = Snapshot::new("TEST", 42)
            .bid(d("10.0"), d("2"))
            .ask(d("10.5"), d("3"))
            .ask(d("11"), d("0"));
        book.apply_snapshot(&snapshot);

        assert_eq!(book.last_update_id(), 42);
        assert_eq!(book.top_bids(10), vec![PriceLevel::new(d("10.0"), d("2"))]);
        assert_eq!(book.top_asks(10), vec![PriceLevel::new(d("10.5"), d("3"))]);
    }

    #[test]
    fn test_mid_price_and_spread() {
        let mut book = OrderBook::new("TEST");
        book.apply_changes(&[bid("45", "100"), ask("55", "100")], 1);

        assert_eq!(book.mid_price(), Some(d("50")));
        assert_eq!(book.spread(), Some(d("10")));
        assert!(!book.is_crossed());
    }

    #[test]
    fn test_top_levels_ordering() {
        let mut book = OrderBook::new("TEST");
        book.apply_changes(
            &[bid("45", "100"), bid("44", "200"), bid("43", "300"), ask("46", "1"), ask("47", "2")],
            1,
        );

        let top = book.top_bids(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].price, d("45"));
        assert_eq!(top[1].price, d("44"));

        let asks: Vec<_> = book.asks().map(|l| l.price).collect();
        assert_eq!(asks, vec![d("46"), d("47")]);
        assert_eq!(book.total_bid_quantity(), d("600"));
        assert_eq!(book.total_ask_quantity(), d("3"));
    }

    #[test]
    fn test_crossed_book() {
        let mut book = OrderBook::new("TEST");
        book.apply_changes(&[bid("55", "100"), ask("50", "100")], 1);
        assert!(book.is_crossed());
    }

    #[test]
    fn test_clear() {
        let mut book = OrderBook::new("TEST");
        book.apply_changes(&[bid("50", "100"), ask("55", "100")], 12);
        assert!(!book.is_empty());

        assert!(book.clear());

        assert!(book.is_empty());
        assert_eq!(book.last_update_id(), 0);
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.quote().ask, None);

        // Nothing left to clear
        assert!(!book.clear());
    }
}
