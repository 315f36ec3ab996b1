//! Messaging-platform gateway implementations.
//!
//! [`PlatformClient`] is the real REST client for the platform's per-user
//! menu and message-push APIs. [`recording::RecordingGateway`] is an
//! in-memory stand-in for tests and offline development.

mod client;

pub mod recording;

pub use client::{GatewayConfig, PlatformClient};
