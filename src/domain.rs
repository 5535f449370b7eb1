//! Domain models: difficulty tiers, day keys, riddle requests, generation attempts,
//! riddles and the per-day status entries kept by the ledger.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Five tiers controlling guess budget and requested riddle complexity.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Easy,
  Medium,
  Hard,
  VeryHard,
  Insane,
}

impl Difficulty {
  pub const ALL: [Difficulty; 5] = [
    Difficulty::Easy,
    Difficulty::Medium,
    Difficulty::Hard,
    Difficulty::VeryHard,
    Difficulty::Insane,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Difficulty::Easy => "easy",
      Difficulty::Medium => "medium",
      Difficulty::Hard => "hard",
      Difficulty::VeryHard => "very_hard",
      Difficulty::Insane => "insane",
    }
  }

  /// Guess budget for the fixed-guess-count game loop.
  pub fn max_guesses(self) -> u32 {
    match self {
      Difficulty::Easy => 5,
      Difficulty::Medium => 4,
      Difficulty::Hard => 3,
      Difficulty::VeryHard => 2,
      Difficulty::Insane => 1,
    }
  }

  /// Longest accepted answer, in letters.
  pub fn max_answer_len(self) -> usize {
    match self {
      Difficulty::Easy => 10,
      Difficulty::Medium => 12,
      Difficulty::Hard => 14,
      Difficulty::VeryHard | Difficulty::Insane => 15,
    }
  }

  /// Base points awarded for a correct guess.
  pub fn base_score(self) -> u32 {
    match self {
      Difficulty::Easy => 10,
      Difficulty::Medium => 20,
      Difficulty::Hard => 40,
      Difficulty::VeryHard => 80,
      Difficulty::Insane => 150,
    }
  }
}

impl fmt::Display for Difficulty {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Difficulty {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
      "easy" => Ok(Difficulty::Easy),
      "medium" => Ok(Difficulty::Medium),
      "hard" => Ok(Difficulty::Hard),
      "very_hard" | "veryhard" => Ok(Difficulty::VeryHard),
      "insane" => Ok(Difficulty::Insane),
      other => Err(format!("unknown difficulty '{other}'")),
    }
  }
}

/// Calendar date (in the game timezone) scoping "one riddle per difficulty per day".
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct DayKey(pub NaiveDate);

impl DayKey {
  pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
    NaiveDate::from_ymd_opt(year, month, day).map(DayKey)
  }
}

impl fmt::Display for DayKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.format("%Y-%m-%d"))
  }
}

pub const DEFAULT_THEME: &str = "default";

/// One caller's request for a riddle. Immutable once built.
#[derive(Clone, Debug)]
pub struct RiddleRequest {
  pub difficulty: Difficulty,
  pub theme: String,
  pub requester_id: String,
  pub day_key: DayKey,
}

impl RiddleRequest {
  pub fn new(requester_id: impl Into<String>, difficulty: Difficulty, theme: Option<&str>, day_key: DayKey) -> Self {
    let theme = theme
      .map(str::trim)
      .filter(|t| !t.is_empty())
      .unwrap_or(DEFAULT_THEME)
      .to_ascii_lowercase();
    Self { difficulty, theme, requester_id: requester_id.into(), day_key }
  }

  pub fn slot_key(&self) -> SlotKey {
    SlotKey {
      owner_id: self.requester_id.clone(),
      day_key: self.day_key,
      difficulty: self.difficulty,
    }
  }
}

/// Idempotency key of the ledger: (owner, day, difficulty).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotKey {
  pub owner_id: String,
  pub day_key: DayKey,
  pub difficulty: Difficulty,
}

impl fmt::Display for SlotKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}/{}", self.owner_id, self.day_key, self.difficulty)
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
  Pending,
  Success,
  Failed,
  TimedOut,
}

/// Record of one backend try inside a generation session.
#[derive(Clone, Debug, Serialize)]
pub struct GenerationAttempt {
  pub backend_name: String,
  pub started_at: DateTime<Utc>,
  pub status: AttemptStatus,
  pub raw_output: Option<String>,
  pub error: Option<String>,
  pub elapsed_ms: u64,
}

/// An attempt that has not reached a terminal status yet.
/// Finishing consumes it, so a terminal attempt can't be touched again.
pub struct PendingAttempt {
  backend_name: String,
  started_at: DateTime<Utc>,
  clock: Instant,
}

impl PendingAttempt {
  pub fn start(backend_name: &str) -> Self {
    Self { backend_name: backend_name.to_string(), started_at: Utc::now(), clock: Instant::now() }
  }

  pub fn status(&self) -> AttemptStatus {
    AttemptStatus::Pending
  }

  pub fn succeeded(self, raw_output: String) -> GenerationAttempt {
    self.finish(AttemptStatus::Success, Some(raw_output), None)
  }

  pub fn failed(self, raw_output: Option<String>, error: impl fmt::Display) -> GenerationAttempt {
    self.finish(AttemptStatus::Failed, raw_output, Some(error.to_string()))
  }

  pub fn timed_out(self, error: impl fmt::Display) -> GenerationAttempt {
    self.finish(AttemptStatus::TimedOut, None, Some(error.to_string()))
  }

  fn finish(self, status: AttemptStatus, raw_output: Option<String>, error: Option<String>) -> GenerationAttempt {
    GenerationAttempt {
      elapsed_ms: self.clock.elapsed().as_millis() as u64,
      backend_name: self.backend_name,
      started_at: self.started_at,
      status,
      raw_output,
      error,
    }
  }
}

/// Validated riddle. `answer` is uppercase letters only and `answer_length == answer.len()`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Riddle {
  pub id: String,
  pub riddle_text: String,
  pub answer: String,
  pub answer_length: usize,
  pub max_guesses: u32,
  pub difficulty: Difficulty,
  pub theme: String,
  pub created_by_backend: String,
  pub day_key: DayKey,
  pub owner_id: String,
  pub created_at: DateTime<Utc>,
}

/// Per (owner, day, difficulty) progress.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyStatusEntry {
  pub owner_id: String,
  pub day_key: DayKey,
  pub difficulty: Difficulty,
  pub started: bool,
  pub completed: bool,
  pub riddle_id: Option<String>,
  #[serde(default)]
  pub guesses_used: u32,
}

impl DailyStatusEntry {
  pub fn fresh(key: &SlotKey) -> Self {
    Self {
      owner_id: key.owner_id.clone(),
      day_key: key.day_key,
      difficulty: key.difficulty,
      started: false,
      completed: false,
      riddle_id: None,
      guesses_used: 0,
    }
  }
}
