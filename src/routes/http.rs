//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;
use axum::{
  async_trait,
  extract::{FromRequestParts, Query, State},
  http::request::Parts,
  Json,
};
use tracing::{info, instrument};

use crate::domain::{DailyStatusEntry, Difficulty, RiddleRequest, SlotKey};
use crate::error::ApiError;
use crate::game::GuessOutcome;
use crate::protocol::*;
use crate::state::{AppState, UserSettings};

pub const USER_HEADER: &str = "x-user-id";

/// Caller identity taken from the `X-User-Id` header.
#[derive(Debug, Clone)]
pub struct UserId(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    parts
      .headers
      .get(USER_HEADER)
      .and_then(|v| v.to_str().ok())
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .map(|v| UserId(v.to_string()))
      .ok_or(ApiError::Unauthenticated)
  }
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> Json<HealthOut> {
  let backends = state
    .backend_availability()
    .await
    .into_iter()
    .map(|(name, available)| BackendHealth { name, available })
    .collect();
  Json(HealthOut { ok: true, day_key: state.clock.today(), backends })
}

#[instrument(level = "info", skip(state, body), fields(user = %user.0, difficulty = %body.difficulty))]
pub async fn http_generate_riddle(
  State(state): State<Arc<AppState>>,
  user: UserId,
  Json(body): Json<GenerateIn>,
) -> Result<Json<RiddleOut>, ApiError> {
  let settings = state.settings_for(&user.0).await;
  let theme = body.theme.or(settings.theme);
  let request = RiddleRequest::new(user.0.as_str(), body.difficulty, theme.as_deref(), state.clock.today());
  let riddle = state
    .orchestrator
    .generate_riddle(&request, settings.preferred_backend.as_deref())
    .await?;
  info!(target: "riddle", id = %riddle.id, backend = %riddle.created_by_backend, "HTTP riddle served");
  Ok(Json(RiddleOut::from(&riddle)))
}

#[instrument(level = "info", skip(state, body), fields(user = %user.0, riddle_id = %body.riddle_id))]
pub async fn http_submit_guess(
  State(state): State<Arc<AppState>>,
  user: UserId,
  Json(body): Json<GuessIn>,
) -> Result<Json<GuessOutcome>, ApiError> {
  let out = state
    .game
    .submit_guess(&user.0, &body.riddle_id, &body.guess, body.time_remaining)
    .await?;
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, body), fields(user = %user.0, riddle_id = %body.riddle_id))]
pub async fn http_give_up(
  State(state): State<Arc<AppState>>,
  user: UserId,
  Json(body): Json<GiveUpIn>,
) -> Result<Json<GuessOutcome>, ApiError> {
  Ok(Json(state.game.give_up(&user.0, &body.riddle_id).await?))
}

/// Today's entry for every difficulty; untouched ones come back fresh.
#[instrument(level = "info", skip(state), fields(user = %user.0))]
pub async fn http_daily_status(
  State(state): State<Arc<AppState>>,
  user: UserId,
) -> Result<Json<DailyStatusOut>, ApiError> {
  let day_key = state.clock.today();
  let mut entries = state
    .ledger
    .status(&user.0, day_key)
    .await?;
  for difficulty in Difficulty::ALL {
    entries.entry(difficulty).or_insert_with(|| {
      DailyStatusEntry::fresh(&SlotKey { owner_id: user.0.clone(), day_key, difficulty })
    });
  }
  Ok(Json(DailyStatusOut { day_key, entries }))
}

/// Generation sessions for the caller's slot today, oldest first.
#[instrument(level = "info", skip(state), fields(user = %user.0, difficulty = %query.difficulty))]
pub async fn http_generation_attempts(
  State(state): State<Arc<AppState>>,
  user: UserId,
  Query(query): Query<AttemptsQuery>,
) -> Json<AttemptsOut> {
  let day_key = state.clock.today();
  let key = SlotKey { owner_id: user.0, day_key, difficulty: query.difficulty };
  let sessions = state.orchestrator.sessions_for(&key).await;
  Json(AttemptsOut {
    day_key,
    difficulty: query.difficulty,
    sessions: sessions.iter().map(SessionOut::from).collect(),
  })
}

#[instrument(level = "info", skip(state), fields(user = %user.0))]
pub async fn http_get_settings(State(state): State<Arc<AppState>>, user: UserId) -> Json<UserSettings> {
  Json(state.settings_for(&user.0).await)
}

#[instrument(level = "info", skip(state, body), fields(user = %user.0))]
pub async fn http_patch_settings(
  State(state): State<Arc<AppState>>,
  user: UserId,
  Json(body): Json<UserSettings>,
) -> Result<Json<UserSettings>, ApiError> {
  if let Some(name) = body.preferred_backend.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
    if !state.orchestrator.backend_names().contains(&name) {
      return Err(ApiError::BadRequest(format!("unknown backend '{name}'")));
    }
  }
  Ok(Json(state.update_settings(&user.0, body).await))
}

#[instrument(level = "info", skip(state))]
pub async fn http_models_available(State(state): State<Arc<AppState>>) -> Result<Json<ModelsOut>, ApiError> {
  let local = state.local.as_ref().ok_or_else(|| ApiError::BadRequest("local model is disabled".into()))?;
  let models = local.list_models().await.map_err(|e| ApiError::Upstream(e.to_string()))?;
  Ok(Json(ModelsOut { current: local.model.clone(), models }))
}

#[instrument(level = "info", skip(state, body), fields(model = %body.model_name))]
pub async fn http_pull_model(
  State(state): State<Arc<AppState>>,
  Json(body): Json<PullIn>,
) -> Result<Json<PullOut>, ApiError> {
  let model_name = body.model_name.trim().to_string();
  if model_name.is_empty() {
    return Err(ApiError::BadRequest("model_name is required".into()));
  }
  let local = state.local.as_ref().ok_or_else(|| ApiError::BadRequest("local model is disabled".into()))?;
  local.pull_model(&model_name).await.map_err(|e| ApiError::Upstream(e.to_string()))?;
  info!(target: "riddle", model = %model_name, "Model pulled");
  Ok(Json(PullOut { ok: true, model_name }))
}
