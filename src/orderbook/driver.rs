//! Processing loop around [`OrderBookSynchronizer`].
//!
//! [`SyncDriver`] is the single writer of book state. It reads the stream,
//! feeds the synchronizer, and whenever the synchronizer asks for a snapshot
//! it fetches one from a [`SnapshotSource`] while continuing to read the
//! stream into the synchronizer's buffer.
//!
//! Repeat fetches for a symbol back off according to
//! [`Config::snapshot_retry`]. Once its `max_retries` consecutive failures
//! are used up the symbol is removed from the synchronizer and its messages
//! are ignored until [`SyncDriver::restore_symbol`] is called.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, OptionFuture};
use futures_util::{Stream, StreamExt};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, error, info, warn};

use crate::config::{Config, RetryConfig};
use crate::error::Error;
use crate::types::{Snapshot, StreamMessage};

use super::events::EventSink;
use super::sync::OrderBookSynchronizer;

/// Where full book snapshots come from
///
/// Implemented by [`crate::client::RestClient`]; tests provide their own.
pub trait SnapshotSource: Send + Sync {
    /// Fetch the book for `symbol` with up to `limit` levels per side
    fn fetch_snapshot(
        &self,
        symbol: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Snapshot, Error>> + Send;
}

impl<S: SnapshotSource> SnapshotSource for Arc<S> {
    fn fetch_snapshot(
        &self,
        symbol: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Snapshot, Error>> + Send {
        (**self).fetch_snapshot(symbol, limit)
    }
}

type SnapshotFetch = BoxFuture<'static, (String, Result<Snapshot, Error>)>;

/// Drives an [`OrderBookSynchronizer`] from a message stream.
///
/// # Example
///
/// ```rust,no_run
/// use book_sync::{Config, DepthClient};
/// use book_sync::orderbook::QuoteBoard;
///
/// # async fn example() -> book_sync::Result<()> {
/// let client = DepthClient::new(Config::new())?;
/// let board = QuoteBoard::new();
///
/// let stream = client.connect_stream(&["BTCUSDT", "ETHUSDT"]).await?;
/// let mut driver = client.driver(board.clone());
///
/// tokio::spawn(async move { driver.run(stream.into_stream()).await });
///
/// // elsewhere
/// let quote = board.get("BTCUSDT");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SyncDriver<S, K> {
    source: Arc<S>,
    synchronizer: OrderBookSynchronizer<K>,
    depth_limit: u32,
    snapshot_timeout: Duration,
    retry: RetryConfig,
    /// Consecutive failed fetches per symbol
    failures: FxHashMap<String, u32>,
    /// Symbols dropped after running out of snapshot attempts
    abandoned: FxHashSet<String>,
}

impl<S, K> SyncDriver<S, K>
where
    S: SnapshotSource + 'static,
    K: EventSink,
{
    /// Create a driver fetching snapshots from `source` and reporting to `sink`
    pub fn new(source: S, sink: K, config: &Config) -> Self {
        Self {
            source: Arc::new(source),
            synchronizer: OrderBookSynchronizer::new(sink),
            depth_limit: config.depth_limit(),
            snapshot_timeout: config.snapshot_timeout(),
            retry: config.snapshot_retry().clone(),
            failures: FxHashMap::default(),
            abandoned: FxHashSet::default(),
        }
    }

    /// Get the synchronizer
    pub fn synchronizer(&self) -> &OrderBookSynchronizer<K> {
        &self.synchronizer
    }

    /// Get the synchronizer mutably (e.g. to remove a symbol)
    pub fn synchronizer_mut(&mut self) -> &mut OrderBookSynchronizer<K> {
        &mut self.synchronizer
    }

    /// Symbols dropped because their snapshot kept failing
    pub fn abandoned_symbols(&self) -> Vec<String> {
        self.abandoned.iter().cloned().collect()
    }

    /// Start accepting messages for an abandoned symbol again
    ///
    /// Its next delta requests a snapshot with a fresh retry budget.
    /// Returns whether the symbol was abandoned.
    pub fn restore_symbol(&mut self, symbol: &str) -> bool {
        self.failures.remove(symbol);
        let restored = self.abandoned.remove(symbol);
        if restored {
            info!(symbol, "symbol restored");
        }
        restored
    }

    /// Consume the driver, returning the synchronizer
    pub fn into_synchronizer(self) -> OrderBookSynchronizer<K> {
        self.synchronizer
    }

    /// Process `stream` until it ends
    ///
    /// Malformed messages and exchange error replies are logged and
    /// dropped, as are messages for abandoned symbols. When the stream ends,
    /// an outstanding snapshot fetch is still completed and the buffer
    /// drained before returning. A fetch that fails after the stream ended
    /// is not retried.
    ///
    /// # Errors
    ///
    /// Returns connection-level transport errors and invariant violations.
    pub async fn run<St>(&mut self, mut stream: St) -> Result<(), Error>
    where
        St: Stream<Item = Result<StreamMessage, Error>> + Unpin,
    {
        let mut fetch: Option<SnapshotFetch> = None;
        let mut stream_done = false;

        loop {
            if fetch.is_none() {
                match self.synchronizer.pending_snapshot() {
                    Some(symbol) => fetch = Some(self.start_fetch(symbol.to_string())),
                    None if stream_done => return Ok(()),
                    None => {}
                }
            }

            tokio::select! {
                Some((symbol, result)) = OptionFuture::from(fetch.as_mut()), if fetch.is_some() => {
                    fetch = None;
                    self.finish_fetch(&symbol, result)?;
                }
                item = stream.next(), if !stream_done => match item {
                    Some(Ok(message)) if self.abandoned.contains(message.symbol()) => {}
                    Some(Ok(message)) => self.synchronizer.handle_message(message),
                    Some(Err(Error::Malformed { payload, reason })) => {
                        self.synchronizer.record_malformed(&payload, &reason);
                    }
                    Some(Err(err)) if err.is_recoverable() => {
                        warn!(error = %err, "stream error, message dropped");
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        debug!(buffered = self.synchronizer.buffered_len(), "stream ended");
                        stream_done = true;
                    }
                },
            }
        }
    }

    fn start_fetch(&self, symbol: String) -> SnapshotFetch {
        let source = Arc::clone(&self.source);
        let limit = self.depth_limit;
        let timeout = self.snapshot_timeout;
        let backoff = self
            .failures
            .get(&symbol)
            .map(|&attempts| self.retry.delay_for_attempt(attempts.saturating_sub(1)));

        debug!(symbol = %symbol, limit, ?backoff, "fetching snapshot");

        async move {
            if let Some(delay) = backoff {
                tokio::time::sleep(delay).await;
            }
            let result = match tokio::time::timeout(timeout, source.fetch_snapshot(&symbol, limit)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout),
            };
            (symbol, result)
        }
        .boxed()
    }

    fn finish_fetch(&mut self, symbol: &str, result: Result<Snapshot, Error>) -> Result<(), Error> {
        let failed = !matches!(&result, Ok(snapshot) if snapshot.last_update_id > 0);
        self.synchronizer.complete_snapshot(symbol, result)?;

        if !failed {
            self.failures.remove(symbol);
            return Ok(());
        }

        let attempts = self.failures.entry(symbol.to_string()).or_insert(0);
        *attempts += 1;
        let attempts = *attempts;
        if !self.retry.allows(attempts) {
            error!(symbol, attempts, "snapshot attempts exhausted, dropping symbol");
            self.failures.remove(symbol);
            self.synchronizer.remove_symbol(symbol);
            self.abandoned.insert(symbol.to_string());
        }
        Ok(())
    }
}
