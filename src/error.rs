//! Error taxonomy.
//!
//! Parse and backend errors are recovered inside the fallback chain; a ledger
//! conflict is recovered by reading the winner. Only `FatalGenerationError`
//! ever reaches the API layer from generation.

use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

use crate::domain::{GenerationAttempt, Riddle};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
  #[error("output is missing the riddle or answer marker")]
  MissingMarkers,
  #[error("invalid content: {0}")]
  InvalidContent(String),
  #[error("answer too short ({len} letters, minimum {min})")]
  AnswerTooShort { len: usize, min: usize },
  #[error("answer too long ({len} letters, maximum {max})")]
  AnswerTooLong { len: usize, max: usize },
  #[error("riddle text leaks its answer '{answer}'")]
  AnswerLeaked { answer: String },
}

#[derive(Debug, Clone, Error)]
pub enum BackendFailure {
  #[error("backend unavailable: {0}")]
  Unavailable(String),
  #[error("network error: {0}")]
  Network(String),
  #[error("timed out after {0:?}")]
  Timeout(Duration),
  #[error("malformed response: {0}")]
  MalformedResponse(String),
}

impl From<reqwest::Error> for BackendFailure {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      BackendFailure::MalformedResponse(e.to_string())
    } else {
      BackendFailure::Network(e.to_string())
    }
  }
}

/// The slot was already committed by another generation.
#[derive(Debug, Clone, Error)]
#[error("slot already committed with riddle {}", winner.id)]
pub struct LedgerConflict {
  pub winner: Box<Riddle>,
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
  #[error(transparent)]
  Conflict(#[from] LedgerConflict),
  #[error("no ledger entry for {0}")]
  NotFound(String),
  #[error("timed out waiting for slot {0}")]
  Busy(String),
  #[error("slot {0} is already completed")]
  Completed(String),
  #[error("ledger storage error: {0}")]
  Storage(String),
}

#[derive(Debug, Error)]
pub enum FatalGenerationError {
  #[error("every configured backend failed ({} attempts)", attempts.len())]
  AllBackendsFailed { attempts: Vec<GenerationAttempt> },
  #[error("generation is misconfigured: {0}")]
  Misconfigured(String),
  #[error(transparent)]
  Ledger(#[from] LedgerError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
  #[error("riddle not found")]
  RiddleNotFound,
  #[error("riddle belongs to another player")]
  NotOwner,
  #[error("this riddle is already finished")]
  AlreadyCompleted,
  #[error("guess must be {expected} letters, got {got}")]
  WrongLength { expected: usize, got: usize },
  #[error("ledger error: {0}")]
  Ledger(String),
}

impl From<LedgerError> for GameError {
  fn from(e: LedgerError) -> Self {
    match e {
      LedgerError::NotFound(_) => GameError::RiddleNotFound,
      LedgerError::Completed(_) => GameError::AlreadyCompleted,
      other => GameError::Ledger(other.to_string()),
    }
  }
}

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("missing X-User-Id header")]
  Unauthenticated,
  #[error("{0}")]
  BadRequest(String),
  #[error(transparent)]
  Generation(#[from] FatalGenerationError),
  #[error(transparent)]
  Game(#[from] GameError),
  #[error(transparent)]
  Ledger(#[from] LedgerError),
  #[error("{0}")]
  Upstream(String),
}

impl IntoResponse for ApiError {
  fn into_response(self) -> axum::response::Response {
    let (status, message) = match &self {
      ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
      ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
      ApiError::Generation(e) => {
        tracing::error!(target: "riddle", error = %e, "Riddle generation failed hard");
        (StatusCode::SERVICE_UNAVAILABLE, "Could not create a riddle right now, try again later.".to_string())
      }
      ApiError::Game(GameError::RiddleNotFound) => (StatusCode::NOT_FOUND, self.to_string()),
      ApiError::Game(GameError::NotOwner) => (StatusCode::FORBIDDEN, self.to_string()),
      ApiError::Game(GameError::Ledger(_)) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
      ApiError::Game(_) => (StatusCode::BAD_REQUEST, self.to_string()),
      ApiError::Ledger(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
      ApiError::Upstream(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
