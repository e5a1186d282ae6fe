//! # movesia-server
//!
//! Axum HTTP + WebSocket server bridging the Unity editor to the agent.
//!
//! The [`websocket`] module owns the editor side: one
//! [`EditorBridge`](websocket::EditorBridge) admits connections under the
//! session-takeover rules, keeps them alive with application-level
//! heartbeats, routes inbound frames, and correlates round-trip command
//! replies. The [`server`] module exposes the bridge over HTTP.

#![deny(unsafe_code)]

pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use server::{MovesiaServer, ServerHandle};
pub use shutdown::ShutdownCoordinator;
pub use websocket::EditorBridge;
