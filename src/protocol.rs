//! Public protocol structs for the HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backends::local::OllamaModel;
use crate::domain::{AttemptStatus, DailyStatusEntry, DayKey, Difficulty, GenerationAttempt, Riddle};
use crate::orchestrator::GenerationSession;

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub day_key: DayKey,
    pub backends: Vec<BackendHealth>,
}

#[derive(Serialize)]
pub struct BackendHealth {
    pub name: String,
    pub available: bool,
}

#[derive(Debug, Deserialize)]
pub struct GenerateIn {
    pub difficulty: Difficulty,
    #[serde(default)]
    pub theme: Option<String>,
}

/// Riddle as shown to the player. Never carries the answer.
#[derive(Debug, Serialize, Deserialize)]
pub struct RiddleOut {
    pub id: String,
    pub riddle_text: String,
    pub answer_length: usize,
    pub max_guesses: u32,
    pub difficulty: Difficulty,
    pub theme: String,
    pub created_by_backend: String,
    pub day_key: DayKey,
    pub created_at: DateTime<Utc>,
}

impl From<&Riddle> for RiddleOut {
    fn from(r: &Riddle) -> Self {
        Self {
            id: r.id.clone(),
            riddle_text: r.riddle_text.clone(),
            answer_length: r.answer_length,
            max_guesses: r.max_guesses,
            difficulty: r.difficulty,
            theme: r.theme.clone(),
            created_by_backend: r.created_by_backend.clone(),
            day_key: r.day_key,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GuessIn {
    pub riddle_id: String,
    pub guess: String,
    /// Seconds left on the client timer.
    #[serde(default)]
    pub time_remaining: u32,
}

#[derive(Debug, Deserialize)]
pub struct GiveUpIn {
    pub riddle_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DailyStatusOut {
    pub day_key: DayKey,
    pub entries: BTreeMap<Difficulty, DailyStatusEntry>,
}

#[derive(Debug, Deserialize)]
pub struct AttemptsQuery {
    pub difficulty: Difficulty,
}

/// Backend attempts for one slot. Raw model output is left out since it holds the answer.
#[derive(Serialize)]
pub struct AttemptOut {
    pub backend_name: String,
    pub started_at: DateTime<Utc>,
    pub status: AttemptStatus,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl From<&GenerationAttempt> for AttemptOut {
    fn from(a: &GenerationAttempt) -> Self {
        AttemptOut {
            backend_name: a.backend_name.clone(),
            started_at: a.started_at,
            status: a.status,
            error: a.error.clone(),
            elapsed_ms: a.elapsed_ms,
        }
    }
}

#[derive(Serialize)]
pub struct SessionOut {
    pub riddle_id: Option<String>,
    pub attempts: Vec<AttemptOut>,
}

impl From<&GenerationSession> for SessionOut {
    fn from(s: &GenerationSession) -> Self {
        SessionOut {
            riddle_id: s.riddle_id.clone(),
            attempts: s.attempts.iter().map(AttemptOut::from).collect(),
        }
    }
}

#[derive(Serialize)]
pub struct AttemptsOut {
    pub day_key: DayKey,
    pub difficulty: Difficulty,
    pub sessions: Vec<SessionOut>,
}

#[derive(Serialize)]
pub struct ModelsOut {
    pub current: String,
    pub models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
pub struct PullIn {
    pub model_name: String,
}

#[derive(Serialize)]
pub struct PullOut {
    pub ok: bool,
    pub model_name: String,
}
