//! Guess handling for the fixed-guess-count game loop.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::domain::{Riddle, SlotKey};
use crate::error::GameError;
use crate::ledger::DailyLedger;
use crate::util::letters_upper;

/// Result of one guess. `answer` is only filled once the riddle is finished.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct GuessOutcome {
  pub riddle_id: String,
  pub correct: bool,
  pub completed: bool,
  pub guesses_used: u32,
  pub guesses_remaining: u32,
  pub score: u32,
  pub answer: Option<String>,
}

/// Points for a correct guess: base + 2 per second left + 50 per unused guess.
pub fn score_for(riddle: &Riddle, guesses_used: u32, time_remaining_secs: u32) -> u32 {
  let unused = riddle.max_guesses.saturating_sub(guesses_used);
  riddle
    .difficulty
    .base_score()
    .saturating_add(time_remaining_secs.saturating_mul(2))
    .saturating_add(unused.saturating_mul(50))
}

pub struct GameService {
  ledger: Arc<dyn DailyLedger>,
}

impl GameService {
  pub fn new(ledger: Arc<dyn DailyLedger>) -> Self {
    Self { ledger }
  }

  #[instrument(level = "info", skip(self, guess), fields(guess_len = guess.len()))]
  pub async fn submit_guess(
    &self,
    owner_id: &str,
    riddle_id: &str,
    guess: &str,
    time_remaining_secs: u32,
  ) -> Result<GuessOutcome, GameError> {
    let riddle = self.ledger.riddle_by_id(riddle_id).await?.ok_or(GameError::RiddleNotFound)?;
    if riddle.owner_id != owner_id {
      return Err(GameError::NotOwner);
    }
    let key = SlotKey { owner_id: riddle.owner_id.clone(), day_key: riddle.day_key, difficulty: riddle.difficulty };

    let normalized = letters_upper(guess);
    if normalized.len() != riddle.answer_length {
      return Err(GameError::WrongLength { expected: riddle.answer_length, got: normalized.len() });
    }

    let correct = normalized == riddle.answer;
    // Counting, the completed check and completion happen in one ledger step.
    let entry = self.ledger.record_guess(&key, correct, riddle.max_guesses).await?;
    let guesses_remaining = riddle.max_guesses.saturating_sub(entry.guesses_used);
    let completed = entry.completed;
    let score = if correct { score_for(&riddle, entry.guesses_used, time_remaining_secs) } else { 0 };

    info!(target: "riddle", %key, correct, completed, guesses_used = entry.guesses_used, score, "Guess evaluated");
    Ok(GuessOutcome {
      riddle_id: riddle.id.clone(),
      correct,
      completed,
      guesses_used: entry.guesses_used,
      guesses_remaining,
      score,
      answer: completed.then(|| riddle.answer.clone()),
    })
  }

  /// Ends the riddle without a score (timer ran out) and reveals the answer.
  #[instrument(level = "info", skip(self))]
  pub async fn give_up(&self, owner_id: &str, riddle_id: &str) -> Result<GuessOutcome, GameError> {
    let riddle = self.ledger.riddle_by_id(riddle_id).await?.ok_or(GameError::RiddleNotFound)?;
    if riddle.owner_id != owner_id {
      return Err(GameError::NotOwner);
    }
    let key = SlotKey { owner_id: riddle.owner_id.clone(), day_key: riddle.day_key, difficulty: riddle.difficulty };
    let entry = self.ledger.mark_completed(&key).await?;
    info!(target: "riddle", %key, guesses_used = entry.guesses_used, "Riddle given up");
    Ok(GuessOutcome {
      riddle_id: riddle.id.clone(),
      correct: false,
      completed: true,
      guesses_used: entry.guesses_used,
      guesses_remaining: riddle.max_guesses.saturating_sub(entry.guesses_used),
      score: 0,
      answer: Some(riddle.answer.clone()),
    })
  }
}
