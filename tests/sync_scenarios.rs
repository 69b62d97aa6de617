//! End-to-end synchronization scenarios.
//!
//! The driver runs on its own task against an in-memory stream and a
//! snapshot source whose replies are held back until the test releases
//! them, so messages can be interleaved with an outstanding fetch.

use std::future::Future;
use std::time::Duration;

use book_sync::config::RetryConfig;
use book_sync::orderbook::{SnapshotSource, SyncDriver, SyncEvent, SyncState};
use book_sync::types::{DeltaEvent, Snapshot, StreamMessage, TradeTick};
use book_sync::{Config, Error};
use futures_util::stream;
use rust_decimal::Decimal;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::timeout;

type Driver = SyncDriver<GatedSource, UnboundedSender<SyncEvent>>;

/// Snapshot source answering only when the test says so
struct GatedSource {
    requests: UnboundedSender<(String, u32)>,
    results: tokio::sync::Mutex<UnboundedReceiver<Result<Snapshot, Error>>>,
}

impl SnapshotSource for GatedSource {
    fn fetch_snapshot(
        &self,
        symbol: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Snapshot, Error>> + Send {
        let _ = self.requests.send((symbol.to_string(), limit));
        async move {
            self.results
                .lock()
                .await
                .recv()
                .await
                .unwrap_or(Err(Error::ConnectionClosed))
        }
    }
}

struct Harness {
    feed: Option<UnboundedSender<Result<StreamMessage, Error>>>,
    events: UnboundedReceiver<SyncEvent>,
    requests: UnboundedReceiver<(String, u32)>,
    results: UnboundedSender<Result<Snapshot, Error>>,
    task: JoinHandle<(Driver, Result<(), Error>)>,
}

impl Harness {
    fn start(config: Config) -> Self {
        let (feed, mut feed_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (request_tx, requests) = mpsc::unbounded_channel();
        let (results, result_rx) = mpsc::unbounded_channel();

        let source = GatedSource {
            requests: request_tx,
            results: tokio::sync::Mutex::new(result_rx),
        };
        let mut driver = SyncDriver::new(source, event_tx, &config);

        let task = tokio::spawn(async move {
            let stream = stream::poll_fn(move |cx| feed_rx.poll_recv(cx));
            let result = driver.run(stream).await;
            (driver, result)
        });

        Self {
            feed: Some(feed),
            events,
            requests,
            results,
            task,
        }
    }

    fn send(&self, message: StreamMessage) {
        self.feed.as_ref().unwrap().send(Ok(message)).unwrap();
    }

    fn send_err(&self, err: Error) {
        self.feed.as_ref().unwrap().send(Err(err)).unwrap();
    }

    /// End the stream
    fn close(&mut self) {
        self.feed = None;
    }

    async fn expect_request(&mut self) -> (String, u32) {
        timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("no snapshot requested")
            .expect("source dropped")
    }

    fn release(&self, result: Result<Snapshot, Error>) {
        self.results.send(result).unwrap();
    }

    async fn expect_event(&mut self) -> SyncEvent {
        timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("no event emitted")
            .expect("driver dropped")
    }

    /// Close the stream and wait for the driver to wind down
    async fn finish(mut self) -> (Driver, Result<(), Error>, Vec<SyncEvent>) {
        self.close();
        let (driver, result) = timeout(Duration::from_secs(5), self.task)
            .await
            .expect("driver did not stop")
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        (driver, result, events)
    }
}

fn dec(n: i64) -> Decimal {
    Decimal::from(n)
}

fn depth(event: DeltaEvent) -> StreamMessage {
    StreamMessage::Depth(event)
}

fn trade(symbol: &str, id: u64) -> StreamMessage {
    StreamMessage::Trade(TradeTick {
        symbol: symbol.to_string(),
        trade_id: id,
        price: dec(100),
        quantity: Decimal::ONE,
        trade_time: 1_700_000_000_000,
        buyer_is_maker: false,
    })
}

fn fast_retry_config() -> Config {
    Config::new()
        .with_depth_limit(100)
        .with_snapshot_retry(RetryConfig::new().max_retries(0).initial_delay_ms(1).max_delay_ms(5))
}

#[tokio::test]
async fn test_messages_during_fetch_are_replayed_in_order() {
    let mut h = Harness::start(fast_retry_config());

    h.send(depth(DeltaEvent::new("BTCUSDT", 1, 5).bid(dec(100), Decimal::ONE)));
    assert_eq!(h.expect_request().await, ("BTCUSDT".to_string(), 100));

    // All of these arrive while the BTCUSDT snapshot is outstanding
    h.send(depth(DeltaEvent::new("BTCUSDT", 6, 7).ask(dec(101), dec(2))));
    h.send(trade("BTCUSDT", 1));
    h.send(depth(DeltaEvent::new("ETHUSDT", 1, 1).bid(dec(50), Decimal::ONE)));

    h.release(Ok(Snapshot::new("BTCUSDT", 5)
        .bid(dec(100), Decimal::ONE)
        .bid(dec(99), dec(3))));

    // Replay stops at the ETHUSDT delta, which needs its own snapshot
    assert_eq!(h.expect_request().await.0, "ETHUSDT");
    h.release(Ok(Snapshot::new("ETHUSDT", 10).bid(dec(50), Decimal::ONE)));

    let (driver, result, events) = h.finish().await;
    result.unwrap();

    let sync = driver.synchronizer();
    assert_eq!(sync.state("BTCUSDT"), Some(SyncState::Synced));
    assert_eq!(sync.state("ETHUSDT"), Some(SyncState::Synced));
    assert_eq!(sync.book("BTCUSDT").unwrap().last_update_id(), 7);
    assert_eq!(sync.book("ETHUSDT").unwrap().last_update_id(), 10);
    assert_eq!(sync.buffered_len(), 0);
    assert!(!sync.is_locked());

    let btc = sync.best_quote("BTCUSDT").unwrap();
    assert_eq!(btc.bid_price(), Some(dec(100)));
    assert_eq!(btc.ask_price(), Some(dec(101)));

    // Snapshot quote, then the ask from 6..7, then the trade, then ETHUSDT
    assert_eq!(events.len(), 4, "{:?}", events);
    assert!(matches!(&events[0], SyncEvent::Quote(q) if q.symbol == "BTCUSDT" && q.ask.is_none()));
    assert!(matches!(&events[1], SyncEvent::Quote(q) if q.ask_price() == Some(dec(101))));
    assert!(matches!(&events[2], SyncEvent::Trade(t) if t.trade_id == 1));
    assert!(matches!(&events[3], SyncEvent::Quote(q) if q.symbol == "ETHUSDT"));
}

#[tokio::test]
async fn test_gap_triggers_fresh_snapshot() {
    let mut h = Harness::start(fast_retry_config());

    h.send(depth(DeltaEvent::new("BTCUSDT", 1, 1)));
    h.expect_request().await;
    h.release(Ok(Snapshot::new("BTCUSDT", 3).bid(dec(10), Decimal::ONE)));

    // 4 is missing
    h.send(depth(DeltaEvent::new("BTCUSDT", 5, 6).bid(dec(11), Decimal::ONE)));
    h.send(depth(DeltaEvent::new("BTCUSDT", 7, 7).bid(dec(12), Decimal::ONE)));
    assert_eq!(h.expect_request().await.0, "BTCUSDT");
    h.release(Ok(Snapshot::new("BTCUSDT", 7).bid(dec(12), Decimal::ONE)));

    let (driver, result, _events) = h.finish().await;
    result.unwrap();

    let sync = driver.synchronizer();
    let stats = sync.stats();
    assert_eq!(stats.gaps, 1);
    assert_eq!(stats.snapshots_applied, 2);

    let book = sync.book("BTCUSDT").unwrap();
    assert_eq!(book.last_update_id(), 7);
    // The pre-gap level is gone with the reset
    assert_eq!(book.level(book_sync::types::Side::Bid, dec(10)), None);
    assert_eq!(book.best_bid().map(|l| l.price), Some(dec(12)));
}

#[tokio::test]
async fn test_failed_snapshot_is_retried_on_next_delta() {
    let mut h = Harness::start(fast_retry_config());

    h.send(depth(DeltaEvent::new("BTCUSDT", 1, 1)));
    h.expect_request().await;
    h.release(Err(Error::RateLimited {
        retry_after_ms: Some(1000),
    }));

    match h.expect_event().await {
        SyncEvent::Warning(w) => {
            assert_eq!(w.symbol, "BTCUSDT");
            assert!(w.message.contains("Rate limited"), "{}", w.message);
        }
        other => panic!("expected warning, got {:?}", other),
    }

    // The failed attempt's delta is gone; a fresh one asks again
    h.send(depth(DeltaEvent::new("BTCUSDT", 2, 2)));
    assert_eq!(h.expect_request().await.0, "BTCUSDT");
    h.release(Ok(Snapshot::new("BTCUSDT", 2).ask(dec(20), Decimal::ONE)));

    let (driver, result, _events) = h.finish().await;
    result.unwrap();

    assert_eq!(driver.synchronizer().state("BTCUSDT"), Some(SyncState::Synced));
    assert_eq!(driver.synchronizer().stats().snapshot_failures, 1);
    assert!(driver.abandoned_symbols().is_empty());
}

#[tokio::test]
async fn test_slow_snapshot_times_out() {
    let config = fast_retry_config().with_snapshot_timeout(Duration::from_millis(50));
    let mut h = Harness::start(config);

    h.send(depth(DeltaEvent::new("BTCUSDT", 1, 1)));
    h.expect_request().await;
    // Never released
    assert!(matches!(h.expect_event().await, SyncEvent::Warning(w) if w.message.contains("timed out")));

    h.send(depth(DeltaEvent::new("BTCUSDT", 2, 2)));
    h.expect_request().await;
    h.release(Ok(Snapshot::new("BTCUSDT", 2)));

    let (driver, result, _events) = h.finish().await;
    result.unwrap();

    assert_eq!(driver.synchronizer().state("BTCUSDT"), Some(SyncState::Synced));
}

#[tokio::test]
async fn test_exhausted_retries_drop_the_symbol() {
    let config = fast_retry_config()
        .with_snapshot_retry(RetryConfig::new().max_retries(3).initial_delay_ms(1).max_delay_ms(5));
    let mut h = Harness::start(config);

    for id in 1..=3 {
        h.send(depth(DeltaEvent::new("BTCUSDT", id, id)));
        assert_eq!(h.expect_request().await.0, "BTCUSDT");
        h.release(Err(Error::Timeout));
        assert!(matches!(h.expect_event().await, SyncEvent::Warning(_)));
    }
    assert_eq!(h.expect_event().await, SyncEvent::Removed("BTCUSDT".to_string()));

    // BTCUSDT is ignored from now on; ETHUSDT is next to ask
    h.send(depth(DeltaEvent::new("BTCUSDT", 4, 4)));
    h.send(trade("BTCUSDT", 7));
    h.send(depth(DeltaEvent::new("ETHUSDT", 1, 1)));
    assert_eq!(h.expect_request().await.0, "ETHUSDT");
    h.release(Ok(Snapshot::new("ETHUSDT", 1).bid(dec(50), Decimal::ONE)));

    let (driver, result, events) = h.finish().await;
    result.unwrap();

    assert_eq!(driver.abandoned_symbols(), vec!["BTCUSDT".to_string()]);
    let sync = driver.synchronizer();
    assert!(sync.book("BTCUSDT").is_none());
    assert_eq!(sync.state("ETHUSDT"), Some(SyncState::Synced));
    assert_eq!(sync.stats().snapshot_failures, 3);
    assert_eq!(events.len(), 1, "{:?}", events);
    assert!(matches!(&events[0], SyncEvent::Quote(q) if q.symbol == "ETHUSDT"));
}

#[tokio::test]
async fn test_stream_end_waits_for_pending_snapshot() {
    let mut h = Harness::start(fast_retry_config());

    h.send(depth(DeltaEvent::new("BTCUSDT", 1, 1)));
    h.send(trade("BTCUSDT", 9));
    h.expect_request().await;

    // Closing the stream first must not lose the buffered trade
    h.close();
    h.release(Ok(Snapshot::new("BTCUSDT", 1)));

    let (driver, result, events) = h.finish().await;
    result.unwrap();

    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::Trade(t) if t.trade_id == 9)));
    assert_eq!(driver.synchronizer().buffered_len(), 0);
}

#[tokio::test]
async fn test_malformed_messages_do_not_stop_the_driver() {
    let mut h = Harness::start(fast_retry_config());

    h.send_err(Error::malformed("{\"e\":\"depthUpdate\"", "EOF while parsing"));
    h.send(depth(DeltaEvent::new("BTCUSDT", 1, 1)));
    h.expect_request().await;
    h.release(Ok(Snapshot::new("BTCUSDT", 1)));

    let (driver, result, _events) = h.finish().await;
    result.unwrap();

    let stats = driver.synchronizer().stats();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.snapshots_applied, 1);
}

#[tokio::test]
async fn test_connection_loss_ends_the_run() {
    let h = Harness::start(fast_retry_config());

    h.send_err(Error::ConnectionClosed);

    let (_driver, result, events) = h.finish().await;
    assert!(matches!(result, Err(Error::ConnectionClosed)));
    assert!(events.is_empty());
}
