//! Order book synchronization state machine.
//!
//! [`OrderBookSynchronizer`] keeps one [`OrderBook`] per symbol consistent
//! with the exchange by combining the diff depth stream with REST snapshots.
//!
//! # Protocol
//!
//! A book starts `Uninitialized`. The first delta seen for it locks the
//! stream and requests a snapshot. While the fetch is outstanding every
//! incoming message, for every symbol, is appended to one FIFO buffer. When
//! the snapshot is completed (successfully or not) the stream unlocks and
//! the buffer is replayed in arrival order through the normal delta rules:
//!
//! - `first_update_id > last_update_id + 1`: gap, the book is cleared and
//!   waits for the next delta to request a new snapshot
//! - `final_update_id < last_update_id`: stale, dropped
//! - otherwise the changes are applied and `last_update_id` advances
//!
//! A failed snapshot leaves the book uninitialized and discards the depth
//! updates buffered for it, so only a delta arriving afterwards asks for the
//! next attempt. Clearing a book that had a best bid or ask emits an empty
//! quote.
//!
//! The synchronizer itself never performs I/O. It reports that a snapshot is
//! required through [`OrderBookSynchronizer::pending_snapshot`]; whoever
//! drives it (normally [`super::SyncDriver`]) fetches the snapshot and hands
//! the outcome back through [`OrderBookSynchronizer::complete_snapshot`].

use std::collections::VecDeque;
use std::fmt;

use rustc_hash::FxHashMap;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::types::{BestQuote, DeltaEvent, Snapshot, StreamMessage};

use super::events::{EventSink, SyncEvent, SyncWarning};
use super::OrderBook;

/// Synchronization state of one book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No usable state (`last_update_id == 0`); the next delta requests a snapshot
    Uninitialized,
    /// Snapshot fetch outstanding; the whole stream is buffered
    SnapshotPending,
    /// Book follows the stream
    Synced,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What [`OrderBookSynchronizer::apply_delta`] did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Changes applied; `quote_changed` tells whether a quote was emitted
    Applied {
        /// Best bid or ask moved
        quote_changed: bool,
    },
    /// Event older than the book, discarded
    Stale,
    /// Missing updates; the book was reset
    Gap {
        /// First update id the book could have accepted
        expected: u64,
        /// First update id of the event
        got: u64,
    },
    /// Book uninitialized; the stream is now locked waiting for a snapshot
    SnapshotRequired,
    /// Stream locked; the event was queued for replay
    Buffered,
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Deltas applied to a book
    pub deltas_applied: u64,
    /// Deltas dropped as stale
    pub stale_dropped: u64,
    /// Sequence gaps detected
    pub gaps: u64,
    /// Snapshots applied
    pub snapshots_applied: u64,
    /// Snapshot fetches that failed
    pub snapshot_failures: u64,
    /// Messages queued while the stream was locked
    pub messages_buffered: u64,
    /// Messages taken back out of the queue
    pub messages_replayed: u64,
    /// Trades forwarded to the sink
    pub trades_forwarded: u64,
    /// Malformed messages dropped before reaching the synchronizer
    pub malformed: u64,
}

#[derive(Debug)]
struct BookEntry {
    book: OrderBook,
    state: SyncState,
}

/// Keeps per-symbol order books in sync with a depth stream.
///
/// # Ownership
///
/// Books are owned here and only ever lent out as `&OrderBook`. Changes of
/// best bid/ask are pushed to the [`EventSink`] given at construction.
///
/// # Example
///
/// ```rust
/// use book_sync::orderbook::{DeltaOutcome, OrderBookSynchronizer, SyncState};
/// use book_sync::types::{DeltaEvent, Snapshot};
/// use rust_decimal::Decimal;
///
/// let mut sync = OrderBookSynchronizer::new(Vec::new());
///
/// let first = DeltaEvent::new("BTCUSDT", 1, 5).bid(Decimal::from(10), Decimal::from(2));
/// assert_eq!(sync.apply_delta(first), DeltaOutcome::SnapshotRequired);
/// assert_eq!(sync.pending_snapshot(), Some("BTCUSDT"));
///
/// let snapshot = Snapshot::new("BTCUSDT", 5).bid(Decimal::from(10), Decimal::from(2));
/// sync.complete_snapshot("BTCUSDT", Ok(snapshot)).unwrap();
///
/// assert_eq!(sync.state("BTCUSDT"), Some(SyncState::Synced));
/// ```
#[derive(Debug)]
pub struct OrderBookSynchronizer<K> {
    books: FxHashMap<String, BookEntry>,
    /// Messages received while a snapshot is outstanding, in arrival order
    buffer: VecDeque<StreamMessage>,
    /// Symbol whose snapshot is outstanding; the stream is locked while set
    pending_snapshot: Option<String>,
    sink: K,
    stats: SyncStats,
}

impl<K: EventSink> OrderBookSynchronizer<K> {
    /// Create a synchronizer that reports to `sink`
    pub fn new(sink: K) -> Self {
        Self {
            books: FxHashMap::default(),
            buffer: VecDeque::new(),
            pending_snapshot: None,
            sink,
            stats: SyncStats::default(),
        }
    }

    /// Feed one stream message
    ///
    /// Buffers it while a snapshot is outstanding, otherwise applies depth
    /// updates and forwards trades.
    pub fn handle_message(&mut self, message: StreamMessage) {
        if self.is_locked() {
            self.buffer_message(message);
            return;
        }
        self.dispatch(message);
    }

    /// Apply one depth update
    pub fn apply_delta(&mut self, event: DeltaEvent) -> DeltaOutcome {
        if self.is_locked() {
            self.buffer_message(StreamMessage::Depth(event));
            return DeltaOutcome::Buffered;
        }

        let entry = self
            .books
            .entry(event.symbol.clone())
            .or_insert_with(|| BookEntry {
                book: OrderBook::new(event.symbol.as_str()),
                state: SyncState::Uninitialized,
            });
        let last = entry.book.last_update_id();

        if last == 0 {
            info!(
                symbol = %event.symbol,
                first_update_id = event.first_update_id,
                "book uninitialized, requesting snapshot"
            );
            entry.state = SyncState::SnapshotPending;
            self.pending_snapshot = Some(event.symbol.clone());
            // Front, not back: during replay this event was just popped from the head
            self.buffer.push_front(StreamMessage::Depth(event));
            self.stats.messages_buffered += 1;
            return DeltaOutcome::SnapshotRequired;
        }

        let expected = last.saturating_add(1);
        if event.first_update_id > expected {
            info!(
                symbol = %event.symbol,
                last_update_id = last,
                first_update_id = event.first_update_id,
                "sequence gap, resetting book"
            );
            let quote_changed = entry.book.clear();
            entry.state = SyncState::Uninitialized;
            self.stats.gaps += 1;
            if quote_changed {
                self.sink.emit(SyncEvent::Quote(entry.book.quote()));
            }
            return DeltaOutcome::Gap {
                expected,
                got: event.first_update_id,
            };
        }

        if event.final_update_id < last {
            debug!(
                symbol = %event.symbol,
                last_update_id = last,
                final_update_id = event.final_update_id,
                "stale delta dropped"
            );
            self.stats.stale_dropped += 1;
            return DeltaOutcome::Stale;
        }

        let quote_changed = entry
            .book
            .apply_changes(&event.changes, event.final_update_id);
        entry.state = SyncState::Synced;
        self.stats.deltas_applied += 1;

        if quote_changed {
            self.sink.emit(SyncEvent::Quote(entry.book.quote()));
        }
        DeltaOutcome::Applied { quote_changed }
    }

    /// Hand back the outcome of the snapshot fetch for `symbol`
    ///
    /// On success the book is replaced by the snapshot. On failure the book
    /// stays uninitialized, the depth updates buffered for it are dropped and
    /// a [`SyncWarning`] is emitted; the next delta for the symbol requests
    /// a new snapshot. Either way the stream unlocks and buffered messages
    /// are replayed in arrival order, until one of them requires another
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] if no snapshot for `symbol` is pending.
    pub fn complete_snapshot(
        &mut self,
        symbol: &str,
        result: Result<Snapshot, Error>,
    ) -> Result<(), Error> {
        match self.pending_snapshot.as_deref() {
            Some(pending) if pending == symbol => {}
            Some(pending) => {
                return Err(Error::Invariant(format!(
                    "snapshot for {} completed while {} is pending",
                    symbol, pending
                )))
            }
            None => {
                return Err(Error::Invariant(format!(
                    "snapshot for {} completed with no fetch pending",
                    symbol
                )))
            }
        }
        self.pending_snapshot = None;

        let outcome = match result {
            Ok(snapshot) if snapshot.last_update_id > 0 => Ok(snapshot),
            Ok(_) => Err("snapshot carried lastUpdateId 0".to_string()),
            Err(err) => Err(err.to_string()),
        };

        match self.books.get_mut(symbol) {
            None => debug!(symbol, "symbol removed while its snapshot was in flight"),
            Some(entry) => match outcome {
                Ok(snapshot) => {
                    let quote_changed = entry.book.apply_snapshot(&snapshot);
                    entry.state = SyncState::Synced;
                    self.stats.snapshots_applied += 1;

                    let (bids, asks) = entry.book.num_levels();
                    info!(
                        symbol,
                        last_update_id = snapshot.last_update_id,
                        bids,
                        asks,
                        buffered = self.buffer.len(),
                        "snapshot applied"
                    );
                    if quote_changed {
                        self.sink.emit(SyncEvent::Quote(entry.book.quote()));
                    }
                }
                Err(message) => {
                    let quote_changed = entry.book.clear();
                    entry.state = SyncState::Uninitialized;
                    self.stats.snapshot_failures += 1;

                    let before = self.buffer.len();
                    self.buffer.retain(|queued| {
                        !(matches!(queued, StreamMessage::Depth(_)) && queued.symbol() == symbol)
                    });

                    warn!(
                        symbol,
                        error = %message,
                        discarded = before - self.buffer.len(),
                        "snapshot fetch failed, book stays uninitialized"
                    );
                    if quote_changed {
                        self.sink.emit(SyncEvent::Quote(entry.book.quote()));
                    }
                    self.sink.emit(SyncEvent::Warning(SyncWarning {
                        symbol: symbol.to_string(),
                        message,
                    }));
                }
            },
        }

        self.replay();
        Ok(())
    }

    /// Drain the buffer until it is empty or the stream locks again
    fn replay(&mut self) {
        let mut replayed = 0usize;
        while !self.is_locked() {
            let Some(message) = self.buffer.pop_front() else {
                break;
            };
            self.stats.messages_replayed += 1;
            replayed += 1;
            self.dispatch(message);
        }

        if replayed > 0 {
            debug!(
                replayed,
                remaining = self.buffer.len(),
                locked = self.is_locked(),
                "replayed buffered messages"
            );
        }
    }

    fn dispatch(&mut self, message: StreamMessage) {
        match message {
            StreamMessage::Depth(event) => {
                self.apply_delta(event);
            }
            StreamMessage::Trade(trade) => {
                self.stats.trades_forwarded += 1;
                self.sink.emit(SyncEvent::Trade(trade));
            }
        }
    }

    fn buffer_message(&mut self, message: StreamMessage) {
        self.stats.messages_buffered += 1;
        self.buffer.push_back(message);
    }

    /// Count and log a message the transport could not decode
    pub fn record_malformed(&mut self, payload: &str, reason: &str) {
        self.stats.malformed += 1;
        error!(payload, reason, "dropping malformed message");
    }

    /// Stop tracking a symbol
    ///
    /// Drops its book and any buffered messages for it, and emits
    /// [`SyncEvent::Removed`]. A snapshot already in flight for the symbol
    /// is discarded when it completes. Returns whether the symbol was
    /// tracked.
    pub fn remove_symbol(&mut self, symbol: &str) -> bool {
        self.buffer.retain(|message| message.symbol() != symbol);
        if self.books.remove(symbol).is_none() {
            return false;
        }
        info!(symbol, "symbol removed");
        self.sink.emit(SyncEvent::Removed(symbol.to_string()));
        true
    }

    /// Force a resynchronization of one book
    ///
    /// The book is cleared and the next delta for it requests a snapshot.
    /// Does nothing (and returns `false`) if the symbol is unknown or its
    /// snapshot is already pending.
    pub fn resync(&mut self, symbol: &str) -> bool {
        if self.pending_snapshot.as_deref() == Some(symbol) {
            return false;
        }
        match self.books.get_mut(symbol) {
            Some(entry) => {
                let quote_changed = entry.book.clear();
                entry.state = SyncState::Uninitialized;
                info!(symbol, "forced resync");
                if quote_changed {
                    self.sink.emit(SyncEvent::Quote(entry.book.quote()));
                }
                true
            }
            None => false,
        }
    }

    /// Whether incoming messages are currently being buffered
    pub fn is_locked(&self) -> bool {
        self.pending_snapshot.is_some()
    }

    /// Symbol whose snapshot must be fetched, if any
    pub fn pending_snapshot(&self) -> Option<&str> {
        self.pending_snapshot.as_deref()
    }

    /// Number of messages waiting for replay
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// State of a symbol's book
    pub fn state(&self, symbol: &str) -> Option<SyncState> {
        self.books.get(symbol).map(|entry| entry.state)
    }

    /// Read-only view of a symbol's book
    pub fn book(&self, symbol: &str) -> Option<&OrderBook> {
        self.books.get(symbol).map(|entry| &entry.book)
    }

    /// Current best bid/ask of a symbol
    pub fn best_quote(&self, symbol: &str) -> Option<BestQuote> {
        self.book(symbol).map(OrderBook::quote)
    }

    /// All tracked symbols
    pub fn symbols(&self) -> Vec<String> {
        self.books.keys().cloned().collect()
    }

    /// Symbols whose book is not synced
    pub fn unsynced_symbols(&self) -> Vec<String> {
        self.books
            .iter()
            .filter(|(_, entry)| entry.state != SyncState::Synced)
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    /// Running counters
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Get the event sink
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Get the event sink mutably
    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    /// Get number of tracked symbols
    pub fn len(&self) -> usize {
        self.books.len()
    }

    /// Check if no symbol is tracked
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}
