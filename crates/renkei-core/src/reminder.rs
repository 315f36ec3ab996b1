//! Auto-reminder rules and the lookback-window arithmetic behind candidate
//! detection.
//!
//! A clinic configures an ordered cycle of intervals (e.g. 3 months,
//! 3 months, 6 months). The k-th interval targets patients whose last
//! appointment sits one cumulative offset back from "now"; the window is
//! widened by a grace span so a daily or weekly evaluation cadence cannot
//! step over anyone.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Intervals ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
  Days,
  Weeks,
  Months,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderInterval {
  pub value: u32,
  pub unit:  IntervalUnit,
}

impl ReminderInterval {
  pub fn new(value: u32, unit: IntervalUnit) -> Self {
    Self { value, unit }
  }

  /// Step `at` backwards by this interval. Months use calendar arithmetic,
  /// not a fixed day count.
  pub fn subtract_from(&self, at: DateTime<Utc>) -> DateTime<Utc> {
    match self.unit {
      IntervalUnit::Days => at - Duration::days(i64::from(self.value)),
      IntervalUnit::Weeks => at - Duration::weeks(i64::from(self.value)),
      IntervalUnit::Months => at - Months::new(self.value),
    }
  }
}

// ─── Rule ────────────────────────────────────────────────────────────────────

/// Per-clinic auto-reminder configuration. One row per clinic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoReminderRule {
  pub clinic_id:         Uuid,
  pub enabled:           bool,
  /// Ordered cycle of gaps between reminders, not absolute offsets.
  pub intervals:         Vec<ReminderInterval>,
  /// Local hour (0–23) at which generated reminders are scheduled to send.
  pub default_send_hour: u8,
  pub updated_at:        DateTime<Utc>,
}

impl AutoReminderRule {
  /// The rule a clinic gets before anyone has configured one: disabled,
  /// with the standard recall cycle of 3, 3, then 6 months.
  pub fn default_for(clinic_id: Uuid) -> Self {
    Self {
      clinic_id,
      enabled: false,
      intervals: vec![
        ReminderInterval::new(3, IntervalUnit::Months),
        ReminderInterval::new(3, IntervalUnit::Months),
        ReminderInterval::new(6, IntervalUnit::Months),
      ],
      default_send_hour: 18,
      updated_at: Utc::now(),
    }
  }

  pub fn validate(&self) -> Result<(), String> {
    if self.default_send_hour > 23 {
      return Err(format!(
        "default_send_hour must be 0-23, got {}",
        self.default_send_hour
      ));
    }
    if self.intervals.iter().any(|i| i.value == 0) {
      return Err("intervals must have a non-zero value".to_string());
    }
    Ok(())
  }

  /// Compute one lookback window per configured interval.
  ///
  /// The k-th window targets `now − Σ(intervals 1..=k)` and extends `grace`
  /// further into the past. Returned in interval order with 1-based
  /// sequence numbers.
  pub fn lookback_windows(
    &self,
    now: DateTime<Utc>,
    grace: Duration,
  ) -> Vec<ReminderWindow> {
    let mut windows = Vec::with_capacity(self.intervals.len());
    let mut anchor = now;
    for (idx, interval) in self.intervals.iter().enumerate() {
      anchor = interval.subtract_from(anchor);
      windows.push(ReminderWindow {
        sequence: (idx + 1) as u32,
        from:     anchor - grace,
        to:       anchor,
      });
    }
    windows
  }
}

/// A half-open-ish lookback window for one interval sequence; candidates are
/// patients whose last appointment falls within `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderWindow {
  pub sequence: u32,
  pub from:     DateTime<Utc>,
  pub to:       DateTime<Utc>,
}
