//! The messaging-platform collaborator boundary.
//!
//! The platform owns two per-user concerns this core drives: which default
//! menu an account sees, and message push. Implementations live elsewhere
//! (`renkei-gateway` for the real REST client); this crate only defines the
//! contract and the error classification the dispatcher's retry logic
//! depends on.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Result of a menu bind/unbind call that completed at the platform.
///
/// `NotFound` means the platform did not know the target (no menu currently
/// assigned, or an unknown menu ref). For unbind this is success in
/// disguise: there was nothing to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayAck {
  Applied,
  NotFound,
}

/// A gateway call that did not complete.
///
/// `retryable` drives dispatcher bookkeeping: HTTP 429/5xx and timeouts are
/// retryable, other client errors are terminal.
#[derive(Debug, Clone, Error)]
#[error("{message} (retryable: {retryable})")]
pub struct GatewayError {
  pub message:   String,
  pub status:    Option<u16>,
  pub retryable: bool,
}

impl GatewayError {
  pub fn retryable(message: impl Into<String>, status: Option<u16>) -> Self {
    Self { message: message.into(), status, retryable: true }
  }

  pub fn terminal(message: impl Into<String>, status: Option<u16>) -> Self {
    Self { message: message.into(), status, retryable: false }
  }
}

// ─── Payload ─────────────────────────────────────────────────────────────────

/// What gets pushed to an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
  /// Plain text.
  Text { text: String },
  /// A platform-native rich layout with a text fallback for clients that
  /// cannot render it.
  Rich {
    alt_text: String,
    content:  serde_json::Value,
  },
}

impl OutboundMessage {
  pub fn text(body: impl Into<String>) -> Self {
    Self::Text { text: body.into() }
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the external messaging platform.
///
/// All methods return `Send` futures and must complete within a bounded
/// time; implementations carry their own timeout and surface it as a
/// retryable [`GatewayError`].
pub trait MessagingGateway: Send + Sync {
  /// Assign `menu_ref` as the account's default menu.
  fn bind_menu<'a>(
    &'a self,
    account_id: &'a str,
    menu_ref: &'a str,
  ) -> impl Future<Output = Result<GatewayAck, GatewayError>> + Send + 'a;

  /// Remove whatever menu is currently assigned to the account.
  /// A `NotFound` ack means there was nothing to unbind.
  fn unbind_menu<'a>(
    &'a self,
    account_id: &'a str,
  ) -> impl Future<Output = Result<GatewayAck, GatewayError>> + Send + 'a;

  /// Push a message to the account.
  fn send_message<'a>(
    &'a self,
    account_id: &'a str,
    message: &'a OutboundMessage,
  ) -> impl Future<Output = Result<(), GatewayError>> + Send + 'a;
}
