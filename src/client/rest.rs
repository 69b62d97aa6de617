//! HTTP REST client for depth snapshots.
//!
//! This module provides the [`RestClient`] used to fetch full order book
//! snapshots (`GET /api/v3/depth`). Market data endpoints are public, so
//! requests carry no credentials.
//!
//! # Example
//!
//! ```rust,no_run
//! use book_sync::{Config, DepthClient};
//!
//! # async fn example() -> book_sync::Result<()> {
//! let client = DepthClient::new(Config::new())?;
//!
//! let snapshot = client.rest().get_depth_snapshot("BTCUSDT", 100).await?;
//! println!("{} levels at {}", snapshot.levels.len(), snapshot.last_update_id);
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use reqwest::header::{HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::{Config, VALID_DEPTH_LIMITS};
use crate::error::{ApiError, Error};
use crate::orderbook::SnapshotSource;
use crate::types::messages::parse_snapshot;
use crate::types::Snapshot;

/// Path of the order book depth endpoint
pub const DEPTH_PATH: &str = "/api/v3/depth";

/// Error body returned by the exchange (`{"code": -1121, "msg": "Invalid symbol."}`)
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<i64>,
    msg: Option<String>,
}

/// HTTP client for the exchange REST API
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: Url,
}

impl RestClient {
    /// Create a new REST client
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client
    /// cannot be initialized.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            base_url: Url::parse(config.rest_base_url())?,
        })
    }

    /// Fetch a depth snapshot for `symbol` with up to `limit` levels per side
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSymbol`] for an empty symbol,
    /// [`Error::Config`] for a limit the exchange does not accept, and
    /// transport, API or decode errors otherwise.
    pub async fn get_depth_snapshot(&self, symbol: &str, limit: u32) -> Result<Snapshot, Error> {
        let symbol = normalize_symbol(symbol)?;
        if !VALID_DEPTH_LIMITS.contains(&limit) {
            return Err(Error::Config(format!("unsupported depth limit {}", limit)));
        }

        let limit_param = limit.to_string();
        let body = self
            .get_text(DEPTH_PATH, &[("symbol", symbol.as_str()), ("limit", limit_param.as_str())])
            .await?;
        let snapshot = parse_snapshot(&symbol, &body)?;

        debug!(
            symbol = %symbol,
            last_update_id = snapshot.last_update_id,
            levels = snapshot.levels.len(),
            "depth snapshot received"
        );
        Ok(snapshot)
    }

    /// Make a GET request and return the raw body
    ///
    /// # Arguments
    ///
    /// * `path` - API path (without base URL)
    /// * `query` - Query parameters
    pub async fn get_text(&self, path: &str, query: &[(&str, &str)]) -> Result<String, Error> {
        let mut url = self.base_url.join(path)?;
        url.query_pairs_mut().extend_pairs(query);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Handle the HTTP response, checking for errors
    async fn handle_response(response: reqwest::Response) -> Result<String, Error> {
        let status = response.status();

        // 418 means the IP was banned for ignoring 429s
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
            let retry_after_ms = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000);

            return Err(Error::RateLimited { retry_after_ms });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(api_error(status.as_u16(), &body)));
        }

        Ok(response.text().await?)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }
}

impl SnapshotSource for RestClient {
    fn fetch_snapshot(
        &self,
        symbol: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Snapshot, Error>> + Send {
        self.get_depth_snapshot(symbol, limit)
    }
}

/// Uppercase and validate a trading symbol (`btcusdt` -> `BTCUSDT`)
pub fn normalize_symbol(symbol: &str) -> Result<String, Error> {
    let symbol = symbol.trim();
    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::InvalidSymbol(symbol.to_string()));
    }
    Ok(symbol.to_ascii_uppercase())
}

fn api_error(status: u16, body: &str) -> ApiError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            code: Some(code),
            msg,
        }) => ApiError::with_code(status, code, msg.unwrap_or_default()),
        Ok(ErrorBody { msg: Some(msg), .. }) => ApiError::new(status, msg),
        _ => ApiError::new(status, body),
    }
}
