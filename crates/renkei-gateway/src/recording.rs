//! An in-memory [`MessagingGateway`] that records calls instead of making
//! them. Used by tests and offline development setups.

use std::sync::{Mutex, MutexGuard, PoisonError};

use renkei_core::gateway::{
  GatewayAck, GatewayError, MessagingGateway, OutboundMessage,
};

/// One recorded call, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
  BindMenu {
    account_id: String,
    menu_ref:   String,
  },
  UnbindMenu {
    account_id: String,
  },
  SendMessage {
    account_id: String,
    message:    OutboundMessage,
  },
}

/// Scriptable platform fake.
///
/// Every call is recorded and answers success unless a result has been
/// queued for that method; queued results are consumed in FIFO order.
#[derive(Default)]
pub struct RecordingGateway {
  calls:          Mutex<Vec<GatewayCall>>,
  bind_results:   Mutex<Vec<Result<GatewayAck, GatewayError>>>,
  unbind_results: Mutex<Vec<Result<GatewayAck, GatewayError>>>,
  push_results:   Mutex<Vec<Result<(), GatewayError>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next_or<T>(
  queue: &Mutex<Vec<Result<T, GatewayError>>>,
  default: Result<T, GatewayError>,
) -> Result<T, GatewayError> {
  let mut queue = lock(queue);
  if queue.is_empty() { default } else { queue.remove(0) }
}

impl RecordingGateway {
  pub fn new() -> Self {
    Self::default()
  }

  /// Queue the result of the next `bind_menu` call.
  pub fn script_bind(&self, result: Result<GatewayAck, GatewayError>) {
    lock(&self.bind_results).push(result);
  }

  /// Queue the result of the next `unbind_menu` call.
  pub fn script_unbind(&self, result: Result<GatewayAck, GatewayError>) {
    lock(&self.unbind_results).push(result);
  }

  /// Queue the result of the next `send_message` call.
  pub fn script_push(&self, result: Result<(), GatewayError>) {
    lock(&self.push_results).push(result);
  }

  /// Everything called so far, in order.
  pub fn calls(&self) -> Vec<GatewayCall> {
    lock(&self.calls).clone()
  }

  /// The `(account_id, message)` pairs pushed so far.
  pub fn pushes(&self) -> Vec<(String, OutboundMessage)> {
    lock(&self.calls)
      .iter()
      .filter_map(|call| match call {
        GatewayCall::SendMessage { account_id, message } => {
          Some((account_id.clone(), message.clone()))
        }
        _ => None,
      })
      .collect()
  }
}

impl MessagingGateway for RecordingGateway {
  async fn bind_menu(
    &self,
    account_id: &str,
    menu_ref: &str,
  ) -> Result<GatewayAck, GatewayError> {
    lock(&self.calls).push(GatewayCall::BindMenu {
      account_id: account_id.to_owned(),
      menu_ref:   menu_ref.to_owned(),
    });
    next_or(&self.bind_results, Ok(GatewayAck::Applied))
  }

  async fn unbind_menu(
    &self,
    account_id: &str,
  ) -> Result<GatewayAck, GatewayError> {
    lock(&self.calls).push(GatewayCall::UnbindMenu {
      account_id: account_id.to_owned(),
    });
    next_or(&self.unbind_results, Ok(GatewayAck::Applied))
  }

  async fn send_message(
    &self,
    account_id: &str,
    message: &OutboundMessage,
  ) -> Result<(), GatewayError> {
    lock(&self.calls).push(GatewayCall::SendMessage {
      account_id: account_id.to_owned(),
      message:    message.clone(),
    });
    next_or(&self.push_results, Ok(()))
  }
}
