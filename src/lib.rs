//! # book-sync
//!
//! Local order books kept in sync with an exchange's depth stream.
//!
//! The exchange publishes incremental depth updates over a WebSocket and full
//! snapshots over REST. Neither is enough on its own: updates need a starting
//! point and snapshots are stale the moment they arrive. This crate stitches
//! the two together per symbol, buffering the stream while a snapshot is in
//! flight and resynchronizing whenever a sequence gap shows up.
//!
//! ## Features
//!
//! - **Snapshot/delta synchronization** - per-symbol state machine with gap
//!   detection and stale-update filtering
//! - **Best quote events** - pushed to a pluggable sink only when the top of
//!   book changes
//! - **REST and WebSocket clients** - with rate limit handling, subscription
//!   tracking and reconnection
//! - **Exact arithmetic** - prices and quantities are [`rust_decimal::Decimal`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use book_sync::{Config, DepthClient};
//! use book_sync::orderbook::SyncEvent;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), book_sync::Error> {
//!     let client = DepthClient::new(Config::new())?;
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!
//!     let stream = client.connect_stream(&["BTCUSDT"]).await?;
//!     let mut driver = client.driver(tx);
//!     tokio::spawn(async move { driver.run(stream.into_stream()).await });
//!
//!     while let Some(event) = rx.recv().await {
//!         if let SyncEvent::Quote(quote) = event {
//!             println!("{:?} / {:?}", quote.bid_price(), quote.ask_price());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! This crate is organized into several modules:
//!
//! - [`client`] - REST and WebSocket clients for the exchange
//! - [`types`] - Domain types and wire formats
//! - [`orderbook`] - Order books, the synchronizer and its driver
//! - [`config`] - Endpoints, limits and retry policies
//! - [`error`] - Error types for the crate
//!
//! ## Performance
//!
//! - `BTreeMap` for sorted price levels, best levels cached
//! - `FxHashMap` for per-symbol state
//! - `parking_lot` locks for the shared quote board
//! - Snapshot fetches run concurrently with stream reads on one task

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod orderbook;
pub mod types;

// Re-export main types at crate root for convenience
pub use config::Config;
pub use error::Error;

use client::rest::normalize_symbol;
use client::{ReconnectingWebSocket, RestClient};
use orderbook::{EventSink, SyncDriver};

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Entry point tying configuration, clients and the synchronizer together
///
/// # Example
///
/// ```rust,no_run
/// use book_sync::{Config, DepthClient};
///
/// # async fn example() -> book_sync::Result<()> {
/// let client = DepthClient::new(Config::new().with_depth_limit(100))?;
///
/// // One-off snapshot
/// let snapshot = client.rest().get_depth_snapshot("ETHUSDT", 100).await?;
/// println!("ETHUSDT at {}", snapshot.last_update_id);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DepthClient {
    config: Config,
    rest_client: RestClient,
}

impl DepthClient {
    /// Create a new client with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be initialized.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let rest_client = RestClient::new(&config)?;
        Ok(Self {
            config,
            rest_client,
        })
    }

    /// Get a reference to the REST client
    pub fn rest(&self) -> &RestClient {
        &self.rest_client
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a reconnecting stream subscribed to depth and trades of `symbols`
    ///
    /// # Errors
    ///
    /// Returns an error for an empty or invalid symbol list, or if the
    /// connection cannot be established.
    pub async fn connect_stream(&self, symbols: &[&str]) -> Result<ReconnectingWebSocket> {
        if symbols.is_empty() {
            return Err(Error::Config("no symbols to subscribe".to_string()));
        }
        let symbols = symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .collect::<Result<Vec<_>>>()?;
        let refs: Vec<&str> = symbols.iter().map(String::as_str).collect();

        let mut ws = ReconnectingWebSocket::connect(self.config.clone()).await?;
        ws.subscribe_depth(&refs).await?;
        ws.subscribe_trades(&refs).await?;
        Ok(ws)
    }

    /// Build a driver that fetches snapshots through this client's REST client
    pub fn driver<K: EventSink>(&self, sink: K) -> SyncDriver<RestClient, K> {
        SyncDriver::new(self.rest_client.clone(), sink, &self.config)
    }
}
