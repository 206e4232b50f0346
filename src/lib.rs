//! WebRTC signaling relay.
//!
//! Authenticated browser peers join named rooms over websockets; the relay
//! forwards offers, answers and ICE candidates between them and announces
//! presence. Media never passes through it.

pub mod app_state;
pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod persistence;
pub mod presence;
pub mod registry;
pub mod room;
pub mod router;
pub mod routes;
pub mod signal;
