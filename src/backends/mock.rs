//! Static mock backend: the terminal guarantee of the fallback chain.
//!
//! Entries are stored in the same tagged format the models are asked for, so
//! they go through the response parser like any other output.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use super::RiddleBackend;
use crate::config::MockRiddleCfg;
use crate::domain::{Difficulty, RiddleRequest};
use crate::error::BackendFailure;

pub const MOCK_BACKEND: &str = "mock";

/// Built-in riddles that guarantee the game is playable without any model.
fn seed_riddles() -> Vec<(Difficulty, &'static str)> {
  vec![
    (Difficulty::Easy, "RIDDLE: I have keys but open no locks. I have space but no room. You can enter but can't go inside. What am I?\nANSWER: keyboard"),
    (Difficulty::Easy, "RIDDLE: What has hands and a face but can't hold anything or smile?\nANSWER: clock"),
    (Difficulty::Easy, "RIDDLE: What gets wetter the more it dries?\nANSWER: towel"),
    (Difficulty::Easy, "RIDDLE: I have a neck but no head, and I wear a cap. What am I?\nANSWER: bottle"),
    (Difficulty::Medium, "RIDDLE: The more you take, the more you leave behind. What am I?\nANSWER: footsteps"),
    (Difficulty::Medium, "RIDDLE: I run but never walk, have a mouth but never talk, and a bed but never sleep. What am I?\nANSWER: river"),
    (Difficulty::Medium, "RIDDLE: What can travel around the world while staying in a corner?\nANSWER: stamp"),
    (Difficulty::Medium, "RIDDLE: I have cities but no houses, forests but no trees, and water but no fish. What am I?\nANSWER: map"),
    (Difficulty::Hard, "RIDDLE: I speak without a mouth and hear without ears. I have no body, but I come alive with wind. What am I?\nANSWER: echo"),
    (Difficulty::Hard, "RIDDLE: I am taken from a mine and shut up in a wooden case, from which I am never released, and yet I am used by almost everybody. What am I?\nANSWER: pencil"),
    (Difficulty::Hard, "RIDDLE: The one who makes me sells me. The one who buys me never uses me. The one who uses me never knows. What am I?\nANSWER: coffin"),
    (Difficulty::VeryHard, "RIDDLE: I am always hungry and must be fed; the finger I touch will soon turn red. What am I?\nANSWER: fire"),
    (Difficulty::VeryHard, "RIDDLE: Alive without breath, as cold as death; never thirsty, ever drinking, all in mail never clinking. What am I?\nANSWER: fish"),
    (Difficulty::VeryHard, "RIDDLE: What has roots as nobody sees, is taller than trees, up, up it goes, and yet never grows?\nANSWER: mountain"),
    (Difficulty::Insane, "RIDDLE: This thing all things devours: birds, beasts, trees, flowers; gnaws iron, bites steel, grinds hard stones to meal. What is it?\nANSWER: time"),
    (Difficulty::Insane, "RIDDLE: Voiceless it cries, wingless flutters, toothless bites, mouthless mutters. What is it?\nANSWER: wind"),
    (Difficulty::Insane, "RIDDLE: A box without hinges, key or lid, yet golden treasure inside is hid. What is it?\nANSWER: egg"),
  ]
}

pub struct MockBackend {
  table: HashMap<Difficulty, Vec<String>>,
}

impl MockBackend {
  /// Built-in table plus any configured extras.
  pub fn new(extra: &[MockRiddleCfg]) -> Self {
    let mut table: HashMap<Difficulty, Vec<String>> = HashMap::new();
    for (difficulty, text) in seed_riddles() {
      table.entry(difficulty).or_default().push(text.to_string());
    }
    for cfg in extra {
      table.entry(cfg.difficulty).or_default().push(cfg.text.clone());
    }
    for d in Difficulty::ALL {
      if table.get(&d).map_or(true, Vec::is_empty) {
        warn!(target: "riddle", difficulty = %d, "Mock table has no riddles for this difficulty");
      }
    }
    Self { table }
  }

  /// Only the given entries; for tests and custom banks.
  pub fn from_entries(entries: Vec<(Difficulty, String)>) -> Self {
    let mut table: HashMap<Difficulty, Vec<String>> = HashMap::new();
    for (difficulty, text) in entries {
      table.entry(difficulty).or_default().push(text);
    }
    Self { table }
  }

  pub fn entries(&self, difficulty: Difficulty) -> &[String] {
    self.table.get(&difficulty).map(Vec::as_slice).unwrap_or_default()
  }
}

impl Default for MockBackend {
  fn default() -> Self {
    Self::new(&[])
  }
}

#[async_trait]
impl RiddleBackend for MockBackend {
  fn name(&self) -> &str {
    MOCK_BACKEND
  }

  async fn available(&self) -> bool {
    true
  }

  async fn generate(&self, request: &RiddleRequest, _timeout: Duration) -> Result<String, BackendFailure> {
    let pick = self.entries(request.difficulty).choose(&mut rand::thread_rng()).cloned();
    match pick {
      Some(text) => {
        debug!(target: "riddle", difficulty = %request.difficulty, "Mock riddle selected");
        Ok(text)
      }
      None => Err(BackendFailure::Unavailable(format!(
        "no mock riddles for difficulty {}",
        request.difficulty
      ))),
    }
  }

  fn attempt_timeout(&self) -> Duration {
    Duration::from_secs(1)
  }

  fn guaranteed(&self) -> bool {
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::DayKey;
  use crate::parser::{LeakStrictness, ParserConfig, ResponseParser};

  #[test]
  fn every_builtin_entry_passes_the_strictest_parser() {
    let parser = ResponseParser::new(ParserConfig {
      leak_strictness: LeakStrictness::Compact,
      ..ParserConfig::default()
    });
    let mock = MockBackend::default();
    for d in Difficulty::ALL {
      assert!(!mock.entries(d).is_empty(), "no entries for {d}");
      for text in mock.entries(d) {
        let parsed = parser.parse(text, d);
        assert!(parsed.is_ok(), "{d}: {text} -> {parsed:?}");
      }
    }
  }

  #[tokio::test]
  async fn generates_from_the_requested_difficulty() {
    let mock = MockBackend::from_entries(vec![
      (Difficulty::Easy, "RIDDLE: a?\nANSWER: aa".into()),
      (Difficulty::Hard, "RIDDLE: b?\nANSWER: bb".into()),
    ]);
    let day = DayKey::from_ymd(2026, 1, 1).unwrap();
    let req = RiddleRequest::new("u", Difficulty::Hard, None, day);
    let text = mock.generate(&req, Duration::from_secs(1)).await.unwrap();
    assert!(text.ends_with("bb"));
    assert!(mock.available().await);
    assert!(mock.guaranteed());
  }

  #[tokio::test]
  async fn empty_partition_is_a_failure() {
    let mock = MockBackend::from_entries(vec![]);
    let day = DayKey::from_ymd(2026, 1, 1).unwrap();
    let req = RiddleRequest::new("u", Difficulty::Insane, None, day);
    assert!(matches!(
      mock.generate(&req, Duration::from_secs(1)).await,
      Err(BackendFailure::Unavailable(_))
    ));
  }

  #[test]
  fn configured_extras_are_added() {
    let extra = vec![MockRiddleCfg {
      difficulty: Difficulty::Insane,
      text: "RIDDLE: What is never ahead and never behind?\nANSWER: now".into(),
    }];
    let mock = MockBackend::new(&extra);
    assert!(mock.entries(Difficulty::Insane).iter().any(|t| t.ends_with("now")));
  }
}
