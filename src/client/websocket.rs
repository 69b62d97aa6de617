//! WebSocket client for real-time market data.
//!
//! This module provides the [`WebSocketClient`] for streaming:
//!
//! - Diff depth updates (`<symbol>@depth` / `<symbol>@depth@100ms`)
//! - Trade prints (`<symbol>@trade`)
//!
//! and [`ReconnectingWebSocket`], which reconnects with backoff and replays
//! its subscriptions. A reconnect loses messages; the synchronizer notices
//! the sequence gap and resynchronizes the affected books.
//!
//! # Example
//!
//! ```rust,no_run
//! use book_sync::Config;
//! use book_sync::client::WebSocketClient;
//!
//! # async fn example() -> book_sync::Result<()> {
//! let config = Config::new();
//! let mut ws = WebSocketClient::connect(&config).await?;
//! ws.subscribe_depth(&["BTCUSDT"]).await?;
//!
//! while let Some(message) = ws.next().await {
//!     println!("{:?}", message?);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeSet, HashMap};

use futures_util::stream::{self, BoxStream, SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::{Config, RetryConfig, UpdateSpeed};
use crate::error::{ApiError, Error};
use crate::types::messages::{decode_frame, Frame, WsCommand, WsMethod};
use crate::types::StreamMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Stream name for trade prints of `symbol`
pub fn trade_stream(symbol: &str) -> String {
    format!("{}@trade", symbol.to_ascii_lowercase())
}

/// Book-keeping of subscribe/unsubscribe requests and their replies
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    /// Streams confirmed by the server
    active: BTreeSet<String>,
    /// Requests awaiting a reply, by request id
    pending: HashMap<u64, (WsMethod, Vec<String>)>,
}

impl SubscriptionTracker {
    /// Record an outgoing command
    pub fn on_request(&mut self, cmd: &WsCommand) {
        self.pending.insert(cmd.id, (cmd.method, cmd.params.clone()));
    }

    /// Apply a successful reply
    pub fn on_response(&mut self, id: u64, result: &serde_json::Value) {
        match self.pending.remove(&id) {
            Some((WsMethod::Subscribe, streams)) => self.active.extend(streams),
            Some((WsMethod::Unsubscribe, streams)) => {
                for stream in &streams {
                    self.active.remove(stream);
                }
            }
            Some((WsMethod::ListSubscriptions, _)) => {
                if let Some(streams) = result.as_array() {
                    self.active = streams
                        .iter()
                        .filter_map(|s| s.as_str().map(str::to_string))
                        .collect();
                }
            }
            None => debug!(id, "response to unknown request"),
        }
    }

    /// Forget a rejected request
    pub fn on_error(&mut self, id: Option<u64>) {
        if let Some(id) = id {
            self.pending.remove(&id);
        }
    }

    /// Streams confirmed by the server
    pub fn active(&self) -> &BTreeSet<String> {
        &self.active
    }

    /// Number of requests without a reply yet
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// WebSocket client for real-time market data
///
/// Tracks subscriptions from the server's replies. Command replies are
/// consumed internally; [`next`](Self::next) only yields market data and
/// errors.
///
/// # Thread Safety
///
/// This client is NOT thread-safe. Hand it to a single task, typically via
/// [`into_stream`](Self::into_stream).
#[derive(Debug)]
pub struct WebSocketClient {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    message_id: u64,
    update_speed: UpdateSpeed,
    subscriptions: SubscriptionTracker,
}

impl WebSocketClient {
    /// Connect to the combined-stream endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(config.websocket_url()).await?;
        let (write, read) = ws_stream.split();
        info!(url = config.websocket_url(), "websocket connected");

        Ok(Self {
            write,
            read,
            message_id: 1,
            update_speed: config.update_speed(),
            subscriptions: SubscriptionTracker::default(),
        })
    }

    /// Send a command to the WebSocket server
    async fn send_command(&mut self, cmd: WsCommand) -> Result<u64, Error> {
        let json = serde_json::to_string(&cmd)?;
        self.subscriptions.on_request(&cmd);
        self.write.send(Message::Text(json)).await?;
        self.message_id += 1;
        Ok(cmd.id)
    }

    /// Get the next message ID without incrementing
    pub fn next_message_id(&self) -> u64 {
        self.message_id
    }

    /// Streams confirmed by the server
    pub fn subscriptions(&self) -> &BTreeSet<String> {
        self.subscriptions.active()
    }

    /// Subscribe to raw stream names
    ///
    /// # Returns
    ///
    /// The request id (use to correlate with the reply)
    pub async fn subscribe(&mut self, streams: Vec<String>) -> Result<u64, Error> {
        debug!(?streams, "subscribing");
        let cmd = WsCommand::subscribe(self.message_id, streams);
        self.send_command(cmd).await
    }

    /// Subscribe to depth updates for the given symbols
    pub async fn subscribe_depth(&mut self, symbols: &[&str]) -> Result<u64, Error> {
        let streams = symbols
            .iter()
            .map(|s| self.update_speed.depth_stream(s))
            .collect();
        self.subscribe(streams).await
    }

    /// Subscribe to trade prints for the given symbols
    pub async fn subscribe_trades(&mut self, symbols: &[&str]) -> Result<u64, Error> {
        let streams = symbols.iter().map(|s| trade_stream(s)).collect();
        self.subscribe(streams).await
    }

    /// Unsubscribe from raw stream names
    pub async fn unsubscribe(&mut self, streams: Vec<String>) -> Result<u64, Error> {
        let cmd = WsCommand::unsubscribe(self.message_id, streams);
        self.send_command(cmd).await
    }

    /// Ask the server for the current subscriptions
    ///
    /// The reply refreshes [`subscriptions`](Self::subscriptions).
    pub async fn list_subscriptions(&mut self) -> Result<u64, Error> {
        let cmd = WsCommand::list_subscriptions(self.message_id);
        self.send_command(cmd).await
    }

    /// Receive the next market data message
    ///
    /// Pings are answered and command replies are applied to the
    /// subscription state along the way.
    ///
    /// # Returns
    ///
    /// The next message, or `None` if the connection is closed.
    pub async fn next(&mut self) -> Option<Result<StreamMessage, Error>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => match decode_frame(&text) {
                    Ok(Frame::Message(message)) => return Some(Ok(message)),
                    Ok(Frame::Response { id, result }) => {
                        self.subscriptions.on_response(id, &result);
                    }
                    Ok(Frame::Error { id, error }) => {
                        self.subscriptions.on_error(id);
                        return Some(Err(Error::Api(ApiError::with_code(0, error.code, error.msg))));
                    }
                    Err(e) => return Some(Err(e)),
                },
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.write.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "close frame received");
                    return Some(Err(Error::ConnectionClosed));
                }
                Ok(_) => {
                    // Binary, Pong and raw frames carry nothing for us
                    continue;
                }
                Err(e) => {
                    return Some(Err(e.into()));
                }
            }
        }
    }

    /// Turn the client into a stream of market data
    pub fn into_stream(self) -> BoxStream<'static, Result<StreamMessage, Error>> {
        stream::unfold(self, |mut client| async move {
            let item = client.next().await?;
            Some((item, client))
        })
        .boxed()
    }

    /// Close the WebSocket connection
    pub async fn close(&mut self) -> Result<(), Error> {
        self.write.close().await?;
        Ok(())
    }
}

/// A subscription request that can be replayed after reconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionRequest {
    /// Depth updates for these symbols
    Depth(Vec<String>),
    /// Trade prints for these symbols
    Trades(Vec<String>),
}

/// WebSocket client with automatic reconnection support.
///
/// This wrapper around [`WebSocketClient`] provides:
/// - Automatic reconnection with exponential backoff ([`Config::reconnect`])
/// - Subscription replay after reconnection
/// - Connection state tracking
///
/// # Example
///
/// ```rust,no_run
/// use book_sync::Config;
/// use book_sync::client::ReconnectingWebSocket;
///
/// # async fn example() -> book_sync::Result<()> {
/// let mut ws = ReconnectingWebSocket::connect(Config::new()).await?;
///
/// // Subscribe - will be automatically replayed on reconnection
/// ws.subscribe_depth(&["BTCUSDT"]).await?;
///
/// loop {
///     match ws.next().await {
///         Some(Ok(msg)) => {
///             // Handle message
///         }
///         Some(Err(e)) => {
///             eprintln!("Error: {}", e);
///         }
///         None => break,
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct ReconnectingWebSocket {
    client: Option<WebSocketClient>,
    config: Config,
    /// Subscriptions to replay after reconnection
    subscription_requests: Vec<SubscriptionRequest>,
    reconnect_attempt: u32,
    is_reconnecting: bool,
}

impl std::fmt::Debug for ReconnectingWebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingWebSocket")
            .field("connected", &self.client.is_some())
            .field("reconnect_attempt", &self.reconnect_attempt)
            .field("is_reconnecting", &self.is_reconnecting)
            .field("subscription_count", &self.subscription_requests.len())
            .finish()
    }
}

impl ReconnectingWebSocket {
    /// Connect with reconnection support
    pub async fn connect(config: Config) -> Result<Self, Error> {
        let client = WebSocketClient::connect(&config).await?;

        Ok(Self {
            client: Some(client),
            config,
            subscription_requests: Vec::new(),
            reconnect_attempt: 0,
            is_reconnecting: false,
        })
    }

    /// Check if currently connected
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Check if currently reconnecting
    pub fn is_reconnecting(&self) -> bool {
        self.is_reconnecting
    }

    /// Get the current reconnection attempt number
    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    /// Streams confirmed on the current connection
    pub fn subscriptions(&self) -> Option<&BTreeSet<String>> {
        self.client.as_ref().map(|c| c.subscriptions())
    }

    /// Subscribe to depth updates
    ///
    /// The subscription will be automatically replayed if the connection is lost.
    pub async fn subscribe_depth(&mut self, symbols: &[&str]) -> Result<u64, Error> {
        self.subscription_requests
            .push(SubscriptionRequest::Depth(to_owned(symbols)));

        match self.client {
            Some(ref mut client) => client.subscribe_depth(symbols).await,
            None => Err(Error::ConnectionClosed),
        }
    }

    /// Subscribe to trade prints
    pub async fn subscribe_trades(&mut self, symbols: &[&str]) -> Result<u64, Error> {
        self.subscription_requests
            .push(SubscriptionRequest::Trades(to_owned(symbols)));

        match self.client {
            Some(ref mut client) => client.subscribe_trades(symbols).await,
            None => Err(Error::ConnectionClosed),
        }
    }

    /// Clear all saved subscriptions
    ///
    /// Subscriptions will no longer be replayed on reconnection.
    pub fn clear_subscriptions(&mut self) {
        self.subscription_requests.clear();
    }

    /// Receive the next message, reconnecting if necessary
    ///
    /// Returns `Some(Err(Error::ConnectionClosed))` once reconnection gives up.
    pub async fn next(&mut self) -> Option<Result<StreamMessage, Error>> {
        loop {
            if let Some(ref mut client) = self.client {
                match client.next().await {
                    Some(Ok(msg)) => {
                        self.reconnect_attempt = 0;
                        return Some(Ok(msg));
                    }
                    Some(Err(Error::ConnectionClosed)) | Some(Err(Error::WebSocket(_))) | None => {
                        warn!("websocket connection lost");
                        self.client = None;
                        if let Err(e) = self.attempt_reconnect().await {
                            return Some(Err(e));
                        }
                        continue;
                    }
                    Some(Err(e)) => {
                        return Some(Err(e));
                    }
                }
            } else if let Err(e) = self.attempt_reconnect().await {
                return Some(Err(e));
            }
        }
    }

    /// Turn the connection into a stream of market data
    ///
    /// The stream ends after reconnection gives up.
    pub fn into_stream(self) -> BoxStream<'static, Result<StreamMessage, Error>> {
        stream::unfold(Some(self), |state| async move {
            let mut ws = state?;
            match ws.next().await? {
                Err(Error::ConnectionClosed) if ws.client.is_none() => {
                    Some((Err(Error::ConnectionClosed), None))
                }
                item => Some((item, Some(ws))),
            }
        })
        .boxed()
    }

    /// Attempt to reconnect with exponential backoff
    async fn attempt_reconnect(&mut self) -> Result<(), Error> {
        self.is_reconnecting = true;
        let policy: RetryConfig = self.config.reconnect().clone();

        loop {
            if !policy.allows(self.reconnect_attempt) {
                warn!(attempts = self.reconnect_attempt, "giving up reconnecting");
                self.is_reconnecting = false;
                return Err(Error::ConnectionClosed);
            }

            let delay = policy.delay_for_attempt(self.reconnect_attempt);
            tokio::time::sleep(delay).await;
            self.reconnect_attempt += 1;

            match WebSocketClient::connect(&self.config).await {
                Ok(mut client) => {
                    if let Err(e) = self.replay_subscriptions(&mut client).await {
                        warn!(error = %e, "failed to replay subscriptions");
                        continue;
                    }

                    info!(attempt = self.reconnect_attempt, "reconnected");
                    self.client = Some(client);
                    self.is_reconnecting = false;
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt = self.reconnect_attempt, ?delay, error = %e, "reconnect failed");
                    continue;
                }
            }
        }
    }

    /// Replay all saved subscriptions on a new connection
    async fn replay_subscriptions(&self, client: &mut WebSocketClient) -> Result<(), Error> {
        for request in &self.subscription_requests {
            match request {
                SubscriptionRequest::Depth(symbols) => {
                    client.subscribe_depth(&as_refs(symbols)).await?;
                }
                SubscriptionRequest::Trades(symbols) => {
                    client.subscribe_trades(&as_refs(symbols)).await?;
                }
            }
        }
        Ok(())
    }

    /// Manually trigger a reconnection
    pub async fn reconnect(&mut self) -> Result<(), Error> {
        if let Some(ref mut client) = self.client {
            let _ = client.close().await;
        }
        self.client = None;
        self.reconnect_attempt = 0;
        self.attempt_reconnect().await
    }

    /// Close the WebSocket connection
    pub async fn close(&mut self) -> Result<(), Error> {
        if let Some(ref mut client) = self.client {
            client.close().await?;
        }
        self.client = None;
        Ok(())
    }
}

fn to_owned(symbols: &[&str]) -> Vec<String> {
    symbols.iter().map(|s| s.to_string()).collect()
}

fn as_refs(symbols: &[String]) -> Vec<&str> {
    symbols.iter().map(String::as_str).collect()
}
