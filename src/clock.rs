//! Game clock: maps wall-clock time to the day key shared by every player.
//!
//! One fixed UTC offset for everyone, so "today's riddle" flips at the same
//! instant for all users.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use tracing::warn;

use crate::config::env_or;
use crate::domain::DayKey;

pub const DEFAULT_UTC_OFFSET_HOURS: i32 = -8;

#[derive(Clone, Copy, Debug)]
pub struct DayClock {
  offset: FixedOffset,
}

impl DayClock {
  /// `hours` east of UTC; out-of-range values fall back to the default.
  pub fn with_offset_hours(hours: i32) -> Self {
    let offset = hours.checked_mul(3600).and_then(FixedOffset::east_opt).unwrap_or_else(|| {
      warn!(target: "roddle_backend", hours, "UTC offset out of range; using default");
      default_offset()
    });
    Self { offset }
  }

  /// Offset from GAME_UTC_OFFSET_HOURS.
  pub fn from_env() -> Self {
    Self::with_offset_hours(env_or("GAME_UTC_OFFSET_HOURS", DEFAULT_UTC_OFFSET_HOURS))
  }

  pub fn offset(&self) -> FixedOffset {
    self.offset
  }

  pub fn today(&self) -> DayKey {
    self.day_key_at(Utc::now())
  }

  pub fn day_key_at(&self, at: DateTime<Utc>) -> DayKey {
    DayKey(at.with_timezone(&self.offset).date_naive())
  }
}

impl Default for DayClock {
  fn default() -> Self {
    Self { offset: default_offset() }
  }
}

fn default_offset() -> FixedOffset {
  FixedOffset::east_opt(DEFAULT_UTC_OFFSET_HOURS * 3600).unwrap_or_else(|| Utc.fix())
}
