//! Message body rendering.
//!
//! Templates carry `{placeholder}` slots; rendering substitutes the
//! patient/clinic context known at dispatch time. Unknown placeholders are
//! left verbatim rather than erased, so a typo in a template is visible in
//! the delivered message instead of silently vanishing.

use chrono::{DateTime, Utc};

/// Context available to every notification body.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
  pub patient_name: String,
  pub clinic_name:  String,
  pub send_date:    Option<DateTime<Utc>>,
}

impl RenderContext {
  fn substitutions(&self) -> Vec<(&'static str, String)> {
    let mut subs = vec![
      ("{patient_name}", self.patient_name.clone()),
      ("{clinic_name}", self.clinic_name.clone()),
    ];
    if let Some(date) = self.send_date {
      subs.push(("{send_date}", date.format("%Y-%m-%d").to_string()));
    }
    subs
  }
}

/// Substitute every known placeholder in `body`.
pub fn render(body: &str, ctx: &RenderContext) -> String {
  let mut out = body.to_string();
  for (slot, value) in ctx.substitutions() {
    out = out.replace(slot, &value);
  }
  out
}
