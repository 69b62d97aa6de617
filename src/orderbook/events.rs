//! Notifications emitted by the synchronizer.
//!
//! The synchronizer is handed an [`EventSink`] at construction and pushes
//! [`SyncEvent`]s into it synchronously, from inside delta and snapshot
//! application. Consumers only ever see these values, never the live books.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc::UnboundedSender;

use crate::types::{BestQuote, TradeTick};

/// Snapshot fetch failure, surfaced to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWarning {
    /// Symbol whose book stays uninitialized
    pub symbol: String,
    /// What went wrong
    pub message: String,
}

/// Something a consumer may want to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Best bid or best ask changed
    Quote(BestQuote),
    /// Trade print, forwarded in stream order
    Trade(TradeTick),
    /// Snapshot fetch failed
    Warning(SyncWarning),
    /// Symbol no longer tracked; its book is gone
    Removed(String),
}

/// Receiver of [`SyncEvent`]s
pub trait EventSink {
    /// Deliver one event. Must not block.
    fn emit(&mut self, event: SyncEvent);
}

impl EventSink for UnboundedSender<SyncEvent> {
    fn emit(&mut self, event: SyncEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.send(event);
    }
}

impl EventSink for Vec<SyncEvent> {
    fn emit(&mut self, event: SyncEvent) {
        self.push(event);
    }
}

/// Latest best quote per symbol, readable from any thread
///
/// Also keeps the most recent snapshot warning per symbol. Both are dropped
/// when the symbol is removed. Clones share the same board, so one clone can be given to the
/// synchronizer as its sink while others are read elsewhere.
///
/// # Example
///
/// ```rust
/// use book_sync::orderbook::{EventSink, QuoteBoard, SyncEvent};
/// use book_sync::types::BestQuote;
///
/// let board = QuoteBoard::new();
/// let mut sink = board.clone();
///
/// sink.emit(SyncEvent::Quote(BestQuote {
///     symbol: "BTCUSDT".to_string(),
///     bid: None,
///     ask: None,
/// }));
///
/// assert!(board.get("BTCUSDT").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct QuoteBoard {
    quotes: Arc<RwLock<FxHashMap<String, BestQuote>>>,
    warnings: Arc<RwLock<FxHashMap<String, SyncWarning>>>,
}

impl QuoteBoard {
    /// Create an empty board
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest quote for a symbol
    pub fn get(&self, symbol: &str) -> Option<BestQuote> {
        self.quotes.read().get(symbol).cloned()
    }

    /// All symbols with a quote
    pub fn symbols(&self) -> Vec<String> {
        self.quotes.read().keys().cloned().collect()
    }

    /// Drain the latest snapshot warning of every symbol
    pub fn take_warnings(&self) -> Vec<SyncWarning> {
        self.warnings.write().drain().map(|(_, warning)| warning).collect()
    }

    /// Number of symbols with a quote
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    /// Check if no quote has been received
    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }
}

impl EventSink for QuoteBoard {
    fn emit(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Quote(quote) => {
                self.quotes.write().insert(quote.symbol.clone(), quote);
            }
            SyncEvent::Warning(warning) => {
                self.warnings.write().insert(warning.symbol.clone(), warning);
            }
            SyncEvent::Removed(symbol) => {
                self.quotes.write().remove(&symbol);
                self.warnings.write().remove(&symbol);
            }
            SyncEvent::Trade(_) => {}
        }
    }
}
