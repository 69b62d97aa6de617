//! Exchange clients.
//!
//! This module contains:
//!
//! - [`rest`] - HTTP client for depth snapshots
//! - [`websocket`] - WebSocket client for depth and trade streams

pub mod rest;
pub mod websocket;

pub use rest::RestClient;
pub use websocket::{ReconnectingWebSocket, WebSocketClient};
