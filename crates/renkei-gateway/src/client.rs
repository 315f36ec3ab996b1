//! Async REST client for the messaging platform's menu and push APIs.

use std::time::Duration;

use renkei_core::gateway::{
  GatewayAck, GatewayError, MessagingGateway, OutboundMessage,
};
use serde::Serialize;
use tracing::debug;

/// Connection settings for the platform API.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
  pub base_url:      String,
  /// Long-lived channel access token, sent as a bearer credential.
  pub channel_token: String,
  pub timeout:       Duration,
}

/// REST client for the messaging platform.
///
/// Cheap to clone — the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct PlatformClient {
  client: reqwest::Client,
  config: GatewayConfig,
}

/// Push endpoint body. The platform accepts a batch; we always send one
/// message per schedule.
#[derive(Serialize)]
struct PushRequest<'a> {
  to:       &'a str,
  messages: [&'a OutboundMessage; 1],
}

impl PlatformClient {
  pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
    let client = reqwest::Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| {
        GatewayError::terminal(format!("failed to build HTTP client: {e}"), None)
      })?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
  }

  fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    req.bearer_auth(&self.config.channel_token)
  }

  /// Classify a completed non-success response. 429 and 5xx leave the
  /// operation worth retrying; other client errors do not.
  async fn error_for(context: &str, resp: reqwest::Response) -> GatewayError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = format!("{context} → {status}: {body}");
    if status.as_u16() == 429 || status.is_server_error() {
      GatewayError::retryable(message, Some(status.as_u16()))
    } else {
      GatewayError::terminal(message, Some(status.as_u16()))
    }
  }

  /// Classify a request that never produced a response. Timeouts and
  /// connection failures are retryable; a request the client refused to
  /// build or send is not.
  fn transport_error(context: &str, err: reqwest::Error) -> GatewayError {
    let message = format!("{context} failed: {err}");
    if err.is_timeout() || err.is_connect() {
      GatewayError::retryable(message, None)
    } else {
      GatewayError::terminal(message, None)
    }
  }
}

impl MessagingGateway for PlatformClient {
  /// `POST /user/{account_id}/menu/{menu_ref}`
  async fn bind_menu(
    &self,
    account_id: &str,
    menu_ref: &str,
  ) -> Result<GatewayAck, GatewayError> {
    let resp = self
      .auth(
        self
          .client
          .post(self.url(&format!("/user/{account_id}/menu/{menu_ref}"))),
      )
      .send()
      .await
      .map_err(|e| Self::transport_error("POST /user/{id}/menu/{ref}", e))?;

    let status = resp.status();
    if status.is_success() {
      debug!(account_id, menu_ref, "bound menu");
      Ok(GatewayAck::Applied)
    } else if status == reqwest::StatusCode::NOT_FOUND {
      Ok(GatewayAck::NotFound)
    } else {
      Err(Self::error_for("POST /user/{id}/menu/{ref}", resp).await)
    }
  }

  /// `DELETE /user/{account_id}/menu`
  async fn unbind_menu(
    &self,
    account_id: &str,
  ) -> Result<GatewayAck, GatewayError> {
    let resp = self
      .auth(self.client.delete(self.url(&format!("/user/{account_id}/menu"))))
      .send()
      .await
      .map_err(|e| Self::transport_error("DELETE /user/{id}/menu", e))?;

    let status = resp.status();
    if status.is_success() {
      debug!(account_id, "unbound menu");
      Ok(GatewayAck::Applied)
    } else if status == reqwest::StatusCode::NOT_FOUND {
      // Nothing was assigned; the desired end state already holds.
      Ok(GatewayAck::NotFound)
    } else {
      Err(Self::error_for("DELETE /user/{id}/menu", resp).await)
    }
  }

  /// `POST /message/push`
  async fn send_message(
    &self,
    account_id: &str,
    message: &OutboundMessage,
  ) -> Result<(), GatewayError> {
    let resp = self
      .auth(self.client.post(self.url("/message/push")))
      .json(&PushRequest { to: account_id, messages: [message] })
      .send()
      .await
      .map_err(|e| Self::transport_error("POST /message/push", e))?;

    if resp.status().is_success() {
      debug!(account_id, "pushed message");
      Ok(())
    } else {
      Err(Self::error_for("POST /message/push", resp).await)
    }
  }
}
