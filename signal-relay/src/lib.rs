//! Real-time message relay for WebSocket clients.
//!
//! Every client holds one duplex connection. The relay keeps a registry of
//! live connections and routes JSON messages among them, either to everybody
//! (broadcast) or point-to-point between two identities (WebRTC-style
//! offer/answer/ICE signaling), with named rooms for peer discovery.
//!
//! The core is transport-agnostic:
//!
//! - [`registry`] maps identities to connection handles.
//! - [`connection`] is the per-connection bounded delivery queue that lets
//!   fan-out shed a slow consumer instead of waiting on it.
//! - [`hub`] is the single task that serializes registration, removal and
//!   outbound delivery.
//! - [`rooms`] keeps room membership and relays directed messages.
//! - [`message`] is the JSON wire protocol.
//! - [`dispatcher`] decodes inbound frames and routes them.
//! - [`relay`] wires the pieces together.
//!
//! The boundary lives in [`server`] and [`session`] (axum WebSocket endpoint
//! plus health probes), [`cli`] and [`config`] (command line and environment),
//! and [`client`] (a terminal client).

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod hub;
pub mod identity;
pub mod message;
pub mod registry;
pub mod relay;
pub mod rooms;
pub mod server;
pub mod session;
