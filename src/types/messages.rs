//! Wire formats.
//!
//! This module contains the JSON shapes of the market data stream, the REST
//! depth response and the subscribe commands, plus the decoding step that
//! turns decimal strings into [`Decimal`]s. Anything that fails to decode
//! becomes [`Error::Malformed`] carrying the raw payload.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::book::{DeltaEvent, LevelChange, Side, Snapshot, StreamMessage, TradeTick};
use super::{TimestampMs, UpdateId};
use crate::error::Error;

/// `[price, quantity]` as sent by the exchange
pub type RawLevel = [String; 2];

/// WebSocket command method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsMethod {
    /// Subscribe to streams
    Subscribe,
    /// Unsubscribe from streams
    Unsubscribe,
    /// List current subscriptions
    ListSubscriptions,
}

/// WebSocket command sent to the server
#[derive(Debug, Clone, Serialize)]
pub struct WsCommand {
    /// Command method
    pub method: WsMethod,
    /// Stream names (`btcusdt@depth@100ms`, `btcusdt@trade`)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    /// Request id, echoed in the response
    pub id: u64,
}

impl WsCommand {
    /// Subscribe command
    pub fn subscribe(id: u64, streams: Vec<String>) -> Self {
        Self {
            method: WsMethod::Subscribe,
            params: streams,
            id,
        }
    }

    /// Unsubscribe command
    pub fn unsubscribe(id: u64, streams: Vec<String>) -> Self {
        Self {
            method: WsMethod::Unsubscribe,
            params: streams,
            id,
        }
    }

    /// List subscriptions command
    pub fn list_subscriptions(id: u64) -> Self {
        Self {
            method: WsMethod::ListSubscriptions,
            params: Vec::new(),
            id,
        }
    }
}

/// Diff depth event
#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdateMsg {
    /// Event time
    #[serde(rename = "E")]
    pub event_time: TimestampMs,
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,
    /// First update id in event
    #[serde(rename = "U")]
    pub first_update_id: UpdateId,
    /// Final update id in event
    #[serde(rename = "u")]
    pub final_update_id: UpdateId,
    /// Bid levels to update
    #[serde(rename = "b", default)]
    pub bids: Vec<RawLevel>,
    /// Ask levels to update
    #[serde(rename = "a", default)]
    pub asks: Vec<RawLevel>,
}

/// Trade event
#[derive(Debug, Clone, Deserialize)]
pub struct TradeMsg {
    /// Event time
    #[serde(rename = "E")]
    pub event_time: TimestampMs,
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,
    /// Trade id
    #[serde(rename = "t")]
    pub trade_id: u64,
    /// Price
    #[serde(rename = "p")]
    pub price: String,
    /// Quantity
    #[serde(rename = "q")]
    pub quantity: String,
    /// Trade time
    #[serde(rename = "T")]
    pub trade_time: TimestampMs,
    /// Is the buyer the market maker?
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

/// Stream event, tagged by `e`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
pub enum StreamEvent {
    /// `depthUpdate`
    #[serde(rename = "depthUpdate")]
    DepthUpdate(DepthUpdateMsg),
    /// `trade`
    #[serde(rename = "trade")]
    Trade(TradeMsg),
}

/// REST depth response (`GET /api/v3/depth`)
#[derive(Debug, Clone, Deserialize)]
pub struct DepthSnapshotMsg {
    /// Book version at snapshot time
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: UpdateId,
    /// Bid levels, best first
    pub bids: Vec<RawLevel>,
    /// Ask levels, best first
    pub asks: Vec<RawLevel>,
}

/// Error details in a WebSocket error response
#[derive(Debug, Clone, Deserialize)]
pub struct WsErrorDetails {
    /// Error code
    pub code: i64,
    /// Error message
    pub msg: String,
}

/// A decoded stream frame
#[derive(Debug, Clone)]
pub enum Frame {
    /// Market data
    Message(StreamMessage),
    /// Reply to a command (`{"result": ..., "id": n}`)
    Response {
        /// Request id
        id: u64,
        /// Result payload (null for subscribe/unsubscribe)
        result: serde_json::Value,
    },
    /// Error reply to a command
    Error {
        /// Request id, if the server could read one
        id: Option<u64>,
        /// Error details
        error: WsErrorDetails,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFrame {
    Combined {
        data: StreamEvent,
    },
    Event(StreamEvent),
    Error {
        error: WsErrorDetails,
        id: Option<u64>,
    },
    Response {
        id: u64,
        #[serde(default)]
        result: serde_json::Value,
    },
}

/// Decode one text frame from the stream
///
/// Accepts raw events as well as combined-stream envelopes
/// (`{"stream": ..., "data": {...}}`).
///
/// # Errors
///
/// Returns [`Error::Malformed`] with the raw text if the frame is not valid
/// JSON, has an unknown event type, or carries an unparseable price or
/// quantity.
pub fn decode_frame(text: &str) -> Result<Frame, Error> {
    let raw: RawFrame = serde_json::from_str(text).map_err(|e| Error::malformed(text, e))?;

    let event = match raw {
        RawFrame::Combined { data } | RawFrame::Event(data) => data,
        RawFrame::Error { error, id } => return Ok(Frame::Error { id, error }),
        RawFrame::Response { id, result } => return Ok(Frame::Response { id, result }),
    };

    let message = match event {
        StreamEvent::DepthUpdate(msg) => msg.into_event().map(StreamMessage::Depth),
        StreamEvent::Trade(msg) => msg.into_tick().map(StreamMessage::Trade),
    }
    .map_err(|reason| Error::malformed(text, reason))?;

    Ok(Frame::Message(message))
}

/// Decode a REST depth response body into a [`Snapshot`]
pub fn parse_snapshot(symbol: &str, body: &str) -> Result<Snapshot, Error> {
    let msg: DepthSnapshotMsg = serde_json::from_str(body).map_err(|e| Error::malformed(body, e))?;
    msg.into_snapshot(symbol)
        .map_err(|reason| Error::malformed(body, reason))
}

impl DepthUpdateMsg {
    /// Validate and convert into a [`DeltaEvent`]
    pub fn into_event(self) -> Result<DeltaEvent, String> {
        if self.first_update_id > self.final_update_id {
            return Err(format!(
                "first update id {} after final update id {}",
                self.first_update_id, self.final_update_id
            ));
        }

        let mut changes = Vec::with_capacity(self.bids.len() + self.asks.len());
        for level in &self.bids {
            changes.push(parse_level(Side::Bid, level)?);
        }
        for level in &self.asks {
            changes.push(parse_level(Side::Ask, level)?);
        }

        Ok(DeltaEvent {
            symbol: self.symbol,
            first_update_id: self.first_update_id,
            final_update_id: self.final_update_id,
            event_time: Some(self.event_time),
            changes,
        })
    }
}

impl TradeMsg {
    /// Validate and convert into a [`TradeTick`]
    pub fn into_tick(self) -> Result<TradeTick, String> {
        let price = parse_decimal("price", &self.price)?;
        let quantity = parse_decimal("quantity", &self.quantity)?;
        if price <= Decimal::ZERO || quantity < Decimal::ZERO {
            return Err(format!("invalid trade {} @ {}", self.quantity, self.price));
        }

        Ok(TradeTick {
            symbol: self.symbol,
            trade_id: self.trade_id,
            price,
            quantity,
            trade_time: self.trade_time,
            buyer_is_maker: self.buyer_is_maker,
        })
    }
}

impl DepthSnapshotMsg {
    /// Validate and convert into a [`Snapshot`] for `symbol`
    pub fn into_snapshot(self, symbol: &str) -> Result<Snapshot, String> {
        let mut levels = Vec::with_capacity(self.bids.len() + self.asks.len());
        for level in &self.bids {
            levels.push(parse_level(Side::Bid, level)?);
        }
        for level in &self.asks {
            levels.push(parse_level(Side::Ask, level)?);
        }

        Ok(Snapshot {
            symbol: symbol.to_string(),
            last_update_id: self.last_update_id,
            levels,
        })
    }
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw).map_err(|e| format!("bad {} {:?}: {}", field, raw, e))
}

fn parse_level(side: Side, level: &RawLevel) -> Result<LevelChange, String> {
    let price = parse_decimal("price", &level[0])?;
    let quantity = parse_decimal("quantity", &level[1])?;

    if price <= Decimal::ZERO {
        return Err(format!("non-positive price {:?}", level[0]));
    }
    if quantity < Decimal::ZERO {
        return Err(format!("negative quantity {:?}", level[1]));
    }

    Ok(LevelChange::new(side, price, quantity))
}
