//! Fallback orchestrator: turns a `RiddleRequest` into exactly one committed riddle.
//!
//! Flow per request:
//!   1. ledger claim (returns the existing riddle, or a lease on the slot)
//!   2. backends in order, one at a time: availability check, bounded generate, parse
//!   3. first parsed success is committed; a lost commit race yields the winner
//!
//! Backend and parse failures are recorded as attempts and never surface; the
//! caller sees a `Riddle` or a `FatalGenerationError`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::backends::{RiddleBackend, AVAILABILITY_CHECK};
use crate::config::GenerationCfg;
use crate::domain::{GenerationAttempt, PendingAttempt, Riddle, RiddleRequest, SlotKey};
use crate::error::{BackendFailure, FatalGenerationError, LedgerError};
use crate::ledger::{DailyLedger, SlotClaim};
use crate::parser::{ParsedRiddle, ResponseParser};
use crate::util::trunc_for_log;

const SESSION_HISTORY: usize = 256;
const LOG_PREVIEW: usize = 160;
/// Headroom over the chain budget for parsing and the ledger commit.
const COMMIT_SLACK: Duration = Duration::from_secs(5);

/// Ordered attempts made while generating one slot.
#[derive(Clone, Debug)]
pub struct GenerationSession {
  pub key: SlotKey,
  pub attempts: Vec<GenerationAttempt>,
  pub riddle_id: Option<String>,
}

pub struct FallbackOrchestrator {
  backends: Vec<Arc<dyn RiddleBackend>>,
  ledger: Arc<dyn DailyLedger>,
  parser: ResponseParser,
  sessions: RwLock<VecDeque<GenerationSession>>,
}

impl FallbackOrchestrator {
  /// `backends` is the default priority order. At least one must be guaranteed.
  pub fn new(
    backends: Vec<Arc<dyn RiddleBackend>>,
    ledger: Arc<dyn DailyLedger>,
    parser: ResponseParser,
  ) -> Result<Self, FatalGenerationError> {
    if !backends.iter().any(|b| b.guaranteed()) {
      return Err(FatalGenerationError::Misconfigured(
        "no guaranteed fallback backend configured".into(),
      ));
    }
    for (i, b) in backends.iter().enumerate() {
      if backends[..i].iter().any(|o| o.name() == b.name()) {
        return Err(FatalGenerationError::Misconfigured(format!("backend '{}' listed twice", b.name())));
      }
    }
    Ok(Self { backends, ledger, parser, sessions: RwLock::new(VecDeque::new()) })
  }

  /// Arrange `pool` by `cfg.backend_order`. Unknown names are ignored with a
  /// warning; guaranteed backends missing from the order are appended.
  pub fn from_config(
    cfg: &GenerationCfg,
    pool: Vec<Arc<dyn RiddleBackend>>,
    ledger: Arc<dyn DailyLedger>,
  ) -> Result<Self, FatalGenerationError> {
    let mut ordered: Vec<Arc<dyn RiddleBackend>> = Vec::with_capacity(pool.len());
    for name in cfg.backend_order.iter().map(String::as_str) {
      match pool.iter().find(|b| b.name() == name) {
        Some(b) if !ordered.iter().any(|o| o.name() == name) => ordered.push(b.clone()),
        Some(_) => warn!(target: "riddle", backend = %name, "Backend listed twice in backend_order; ignoring repeat"),
        None => warn!(target: "riddle", backend = %name, "Unknown or disabled backend in backend_order"),
      }
    }
    for b in pool.iter().filter(|b| b.guaranteed()) {
      if !ordered.iter().any(|o| o.name() == b.name()) {
        ordered.push(b.clone());
      }
    }
    Self::new(ordered, ledger, ResponseParser::new(cfg.parser_config()))
  }

  pub fn backends(&self) -> &[Arc<dyn RiddleBackend>] {
    &self.backends
  }

  pub fn backend_names(&self) -> Vec<&str> {
    self.backends.iter().map(|b| b.name()).collect()
  }

  pub fn ledger(&self) -> &Arc<dyn DailyLedger> {
    &self.ledger
  }

  /// Worst-case time for one full pass over the chain: every availability check plus every
  /// backend's largest attempt budget. Waiters on a busy slot wait this long.
  pub fn chain_budget(&self) -> Duration {
    self
      .backends
      .iter()
      .map(|b| AVAILABILITY_CHECK + b.max_attempt_timeout())
      .sum::<Duration>()
      + COMMIT_SLACK
  }

  /// Return the day's riddle for this slot, generating it at most once.
  #[instrument(level = "info", skip(self, request), fields(key = %request.slot_key(), theme = %request.theme))]
  pub async fn generate_riddle(
    &self,
    request: &RiddleRequest,
    preferred: Option<&str>,
  ) -> Result<Riddle, FatalGenerationError> {
    let key = request.slot_key();
    let lease = match self.ledger.get_or_create_slot(&key, self.chain_budget()).await? {
      SlotClaim::Existing(riddle) => {
        debug!(target: "riddle", %key, riddle_id = %riddle.id, "Slot already has a riddle");
        return Ok(riddle);
      }
      SlotClaim::Claimed(lease) => lease,
    };
    if !lease.is_exclusive() {
      warn!(target: "riddle", %key, "Generating without the slot lock; commit may lose to another request");
    }

    let mut session = GenerationSession { key: key.clone(), attempts: Vec::new(), riddle_id: None };
    let winner = self.run_chain(request, preferred, &mut session.attempts).await;

    let result = match winner {
      Some((backend_name, parsed)) => {
        let riddle = build_riddle(request, &backend_name, parsed);
        match self.ledger.commit(lease, riddle).await {
          Ok(riddle) => Ok(riddle),
          Err(LedgerError::Conflict(conflict)) => {
            info!(target: "riddle", %key, winner = %conflict.winner.id, "Another generation won this slot; using its riddle");
            Ok(*conflict.winner)
          }
          Err(e) => Err(e.into()),
        }
      }
      None => {
        drop(lease);
        error!(target: "riddle", %key, attempts = session.attempts.len(), "Every backend failed");
        Err(FatalGenerationError::AllBackendsFailed { attempts: session.attempts.clone() })
      }
    };

    session.riddle_id = result.as_ref().ok().map(|r| r.id.clone());
    self.remember(session).await;
    result
  }

  /// Sessions recorded for `key`, oldest first.
  pub async fn sessions_for(&self, key: &SlotKey) -> Vec<GenerationSession> {
    self.sessions.read().await.iter().filter(|s| &s.key == key).cloned().collect()
  }

  /// Preferred backend first (if configured), then the rest in default order.
  fn ordered(&self, preferred: Option<&str>) -> Vec<&Arc<dyn RiddleBackend>> {
    let mut out: Vec<&Arc<dyn RiddleBackend>> = Vec::with_capacity(self.backends.len());
    if let Some(p) = preferred {
      match self.backends.iter().find(|b| b.name() == p) {
        Some(b) => out.push(b),
        None => debug!(target: "riddle", preferred = %p, "Preferred backend not configured; using default order"),
      }
    }
    out.extend(self.backends.iter().filter(|b| Some(b.name()) != preferred));
    out
  }

  async fn run_chain(
    &self,
    request: &RiddleRequest,
    preferred: Option<&str>,
    attempts: &mut Vec<GenerationAttempt>,
  ) -> Option<(String, ParsedRiddle)> {
    for backend in self.ordered(preferred) {
      let name = backend.name();
      let up = tokio::time::timeout(AVAILABILITY_CHECK, backend.available()).await.unwrap_or(false);
      if !up {
        debug!(target: "riddle", backend = %name, "Backend unavailable; skipping");
        continue;
      }

      let pending = PendingAttempt::start(name);
      let budget = backend.attempt_timeout();
      debug!(target: "riddle", backend = %name, status = ?pending.status(), budget_ms = budget.as_millis() as u64, "Backend attempt started");
      // Dropping the generate future on timeout cancels its in-flight request.
      let attempt = match tokio::time::timeout(budget, backend.generate(request, budget)).await {
        Err(_) => pending.timed_out(BackendFailure::Timeout(budget)),
        Ok(Err(e)) => pending.failed(None, e),
        Ok(Ok(raw)) => match self.parser.parse(&raw, request.difficulty) {
          Ok(parsed) => {
            let attempt = pending.succeeded(raw);
            info!(target: "riddle", backend = %name, elapsed_ms = attempt.elapsed_ms, answer_len = parsed.answer_length, "Backend produced a valid riddle");
            attempts.push(attempt);
            return Some((name.to_string(), parsed));
          }
          Err(e) => {
            warn!(target: "riddle", backend = %name, error = %e, raw = %trunc_for_log(&raw, LOG_PREVIEW), "Backend output rejected by parser");
            pending.failed(Some(raw), e)
          }
        },
      };
      warn!(
        target: "riddle",
        backend = %name,
        status = ?attempt.status,
        elapsed_ms = attempt.elapsed_ms,
        error = attempt.error.as_deref().unwrap_or_default(),
        "Backend attempt failed; falling back"
      );
      attempts.push(attempt);
    }
    None
  }

  async fn remember(&self, session: GenerationSession) {
    let mut sessions = self.sessions.write().await;
    if sessions.len() == SESSION_HISTORY {
      sessions.pop_front();
    }
    sessions.push_back(session);
  }
}

fn build_riddle(request: &RiddleRequest, backend_name: &str, parsed: ParsedRiddle) -> Riddle {
  Riddle {
    id: Uuid::new_v4().to_string(),
    riddle_text: parsed.riddle_text,
    answer: parsed.answer,
    answer_length: parsed.answer_length,
    max_guesses: request.difficulty.max_guesses(),
    difficulty: request.difficulty,
    theme: request.theme.clone(),
    created_by_backend: backend_name.to_string(),
    day_key: request.day_key,
    owner_id: request.requester_id.clone(),
    created_at: Utc::now(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;
  use std::sync::atomic::Ordering;

  use async_trait::async_trait;

  use crate::backends::mock::MOCK_BACKEND;
  use crate::backends::test_support::{Script, ScriptedBackend};
  use crate::backends::MockBackend;
  use crate::domain::{AttemptStatus, DailyStatusEntry, DayKey, Difficulty};
  use crate::ledger::{InMemoryLedger, SlotLease};
  use crate::parser::ParserConfig;

  const GOOD: &str = "RIDDLE: I have a face and two hands but no arms or legs. What am I?\nANSWER: clock";
  const LEAKY: &str = "RIDDLE: A candle of wax, the CANDLE burns down. What am I?\nANSWER: candle";

  fn day() -> DayKey {
    DayKey::from_ymd(2026, 10, 19).unwrap()
  }

  fn request(owner: &str, difficulty: Difficulty) -> RiddleRequest {
    RiddleRequest::new(owner, difficulty, None, day())
  }

  fn orchestrator(backends: Vec<Arc<dyn RiddleBackend>>) -> FallbackOrchestrator {
    let mut backends = backends;
    backends.push(Arc::new(MockBackend::default()));
    FallbackOrchestrator::new(backends, Arc::new(InMemoryLedger::default()), ResponseParser::new(ParserConfig::default()))
      .unwrap()
  }

  #[tokio::test]
  async fn same_slot_twice_generates_once() {
    let remote = ScriptedBackend::new("remote", Script::Reply(GOOD));
    let calls = remote.calls.clone();
    let orch = orchestrator(vec![Arc::new(remote)]);
    let req = request("u1", Difficulty::Easy);

    let first = orch.generate_riddle(&req, None).await.unwrap();
    let second = orch.generate_riddle(&req, None).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(orch.sessions_for(&req.slot_key()).await.len(), 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_requests_converge_on_one_riddle() {
    let remote = ScriptedBackend::new("remote", Script::Reply(GOOD)).slow(Duration::from_millis(80));
    let calls = remote.calls.clone();
    let orch = Arc::new(orchestrator(vec![Arc::new(remote)]));
    let req = request("u1", Difficulty::Medium);

    let tasks: Vec<_> = (0..8)
      .map(|_| {
        let orch = orch.clone();
        let req = req.clone();
        tokio::spawn(async move { orch.generate_riddle(&req, None).await })
      })
      .collect();

    let mut ids = Vec::new();
    for t in tasks {
      ids.push(t.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(orch.sessions_for(&req.slot_key()).await.len(), 1);
  }

  #[tokio::test]
  async fn falls_back_to_mock_when_models_are_down_or_failing() {
    let orch = orchestrator(vec![
      Arc::new(ScriptedBackend::new("remote", Script::Reply(GOOD)).down()),
      Arc::new(ScriptedBackend::new("local", Script::Fail)),
    ]);
    let req = request("u1", Difficulty::Hard);
    let riddle = orch.generate_riddle(&req, None).await.unwrap();

    assert_eq!(riddle.created_by_backend, MOCK_BACKEND);
    assert!(!riddle.riddle_text.is_empty());
    assert!(riddle.answer.chars().all(|c| c.is_ascii_uppercase()));

    let sessions = orch.sessions_for(&req.slot_key()).await;
    let statuses: Vec<_> = sessions[0].attempts.iter().map(|a| (a.backend_name.as_str(), a.status)).collect();
    assert_eq!(statuses, vec![("local", AttemptStatus::Failed), (MOCK_BACKEND, AttemptStatus::Success)]);
  }

  #[tokio::test]
  async fn leaked_answer_counts_as_a_backend_failure() {
    let orch = orchestrator(vec![Arc::new(ScriptedBackend::new("remote", Script::Reply(LEAKY)))]);
    let req = request("u1", Difficulty::Easy);
    let riddle = orch.generate_riddle(&req, None).await.unwrap();
    assert_eq!(riddle.created_by_backend, MOCK_BACKEND);
    assert_ne!(riddle.answer, "CANDLE");

    let attempt = &orch.sessions_for(&req.slot_key()).await[0].attempts[0];
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert_eq!(attempt.raw_output.as_deref(), Some(LEAKY));
    assert!(attempt.error.as_deref().unwrap_or_default().contains("leaks"));
  }

  #[tokio::test]
  async fn hung_backend_times_out_and_falls_through() {
    let orch = orchestrator(vec![Arc::new(ScriptedBackend::new("local", Script::Hang))]);
    let req = request("u1", Difficulty::Insane);
    let started = std::time::Instant::now();
    let riddle = orch.generate_riddle(&req, None).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(riddle.created_by_backend, MOCK_BACKEND);

    let attempt = &orch.sessions_for(&req.slot_key()).await[0].attempts[0];
    assert_eq!(attempt.status, AttemptStatus::TimedOut);
  }

  #[tokio::test]
  async fn preferred_backend_is_tried_first() {
    let remote = ScriptedBackend::new("remote", Script::Reply(GOOD));
    let remote_calls = remote.calls.clone();
    let local = ScriptedBackend::new("local", Script::Reply(GOOD));
    let orch = orchestrator(vec![Arc::new(remote), Arc::new(local)]);

    let riddle = orch.generate_riddle(&request("u1", Difficulty::Easy), Some("local")).await.unwrap();
    assert_eq!(riddle.created_by_backend, "local");
    assert_eq!(remote_calls.load(Ordering::SeqCst), 0);

    let riddle = orch.generate_riddle(&request("u2", Difficulty::Easy), Some("nope")).await.unwrap();
    assert_eq!(riddle.created_by_backend, "remote");
  }

  #[tokio::test]
  async fn unavailable_preferred_backend_falls_back_in_default_order() {
    let orch = orchestrator(vec![
      Arc::new(ScriptedBackend::new("remote", Script::Reply(GOOD))),
      Arc::new(ScriptedBackend::new("local", Script::Reply(GOOD)).down()),
    ]);
    let riddle = orch.generate_riddle(&request("u1", Difficulty::Easy), Some("local")).await.unwrap();
    assert_eq!(riddle.created_by_backend, "remote");
  }

  #[tokio::test]
  async fn every_backend_failing_is_fatal() {
    let empty_mock = MockBackend::from_entries(vec![]);
    let orch = FallbackOrchestrator::new(
      vec![Arc::new(ScriptedBackend::new("remote", Script::Fail)), Arc::new(empty_mock)],
      Arc::new(InMemoryLedger::default()),
      ResponseParser::new(ParserConfig::default()),
    )
    .unwrap();
    let req = request("u1", Difficulty::Easy);
    match orch.generate_riddle(&req, None).await {
      Err(FatalGenerationError::AllBackendsFailed { attempts }) => assert_eq!(attempts.len(), 2),
      other => panic!("expected fatal error, got {other:?}"),
    }

    // The slot stays open for a later retry.
    let status = orch.ledger().status("u1", day()).await.unwrap();
    assert!(!status[&Difficulty::Easy].started);
  }

  #[test]
  fn requires_a_guaranteed_backend() {
    let only_remote: Vec<Arc<dyn RiddleBackend>> = vec![Arc::new(ScriptedBackend::new("remote", Script::Fail))];
    let res = FallbackOrchestrator::new(only_remote, Arc::new(InMemoryLedger::default()), ResponseParser::new(ParserConfig::default()));
    assert!(matches!(res, Err(FatalGenerationError::Misconfigured(_))));
  }

  #[test]
  fn config_order_is_applied_and_mock_appended() {
    let cfg = GenerationCfg { backend_order: vec!["local".into(), "ghost".into(), "remote".into()], ..GenerationCfg::default() };
    let pool: Vec<Arc<dyn RiddleBackend>> = vec![
      Arc::new(ScriptedBackend::new("remote", Script::Fail)),
      Arc::new(MockBackend::default()),
      Arc::new(ScriptedBackend::new("local", Script::Fail)),
    ];
    let orch = FallbackOrchestrator::from_config(&cfg, pool, Arc::new(InMemoryLedger::default())).unwrap();
    assert_eq!(orch.backend_names(), vec!["local", "remote", MOCK_BACKEND]);
  }

  #[tokio::test]
  async fn riddle_shape_follows_the_difficulty() {
    let orch = orchestrator(vec![]);
    for d in Difficulty::ALL {
      let riddle = orch.generate_riddle(&request("u1", d), None).await.unwrap();
      assert_eq!(riddle.max_guesses, d.max_guesses());
      assert_eq!(riddle.answer_length, riddle.answer.len());
      assert!(riddle.answer_length >= 2 && riddle.answer_length <= d.max_answer_len());
      assert_eq!(riddle.day_key, day());
      assert_eq!(riddle.owner_id, "u1");
    }
    let status = orch.ledger().status("u1", day()).await.unwrap();
    assert_eq!(status.len(), 5);
    assert!(status.values().all(|e| e.started && !e.completed));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn short_ledger_waits_still_yield_one_generation() {
    let remote = ScriptedBackend::new("remote", Script::Reply(GOOD)).slow(Duration::from_millis(150));
    let calls = remote.calls.clone();
    let ledger = Arc::new(InMemoryLedger::new(Duration::from_millis(20), Duration::from_millis(50)));
    let backends: Vec<Arc<dyn RiddleBackend>> = vec![Arc::new(remote), Arc::new(MockBackend::default())];
    let orch = Arc::new(FallbackOrchestrator::new(backends, ledger, ResponseParser::new(ParserConfig::default())).unwrap());
    let req = request("u1", Difficulty::Easy);

    let a = {
      let (orch, req) = (orch.clone(), req.clone());
      tokio::spawn(async move { orch.generate_riddle(&req, None).await })
    };
    let b = {
      let (orch, req) = (orch.clone(), req.clone());
      tokio::spawn(async move { orch.generate_riddle(&req, None).await })
    };
    let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
    assert_eq!(a.id, b.id);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(orch.sessions_for(&req.slot_key()).await.len(), 1);
  }

  #[test]
  fn chain_budget_covers_every_backend() {
    let orch = orchestrator(vec![Arc::new(ScriptedBackend::new("remote", Script::Fail))]);
    // scripted 200ms + mock 1s, plus an availability check each and the commit slack
    let expected = Duration::from_millis(200) + Duration::from_secs(1) + AVAILABILITY_CHECK * 2 + COMMIT_SLACK;
    assert_eq!(orch.chain_budget(), expected);
  }

  /// Commits a winner behind the caller's back, then hands out a lease
  /// without the slot lock, as a store without per-key locking might.
  struct RacingLedger {
    inner: InMemoryLedger,
  }

  #[async_trait]
  impl DailyLedger for RacingLedger {
    async fn get_or_create_slot(&self, key: &SlotKey, wait: Duration) -> Result<SlotClaim, LedgerError> {
      if let SlotClaim::Claimed(lease) = self.inner.get_or_create_slot(key, wait).await? {
        let winner = Riddle {
          id: "winner".into(),
          riddle_text: "What has a neck but no head?".into(),
          answer: "BOTTLE".into(),
          answer_length: 6,
          max_guesses: key.difficulty.max_guesses(),
          difficulty: key.difficulty,
          theme: "default".into(),
          created_by_backend: "elsewhere".into(),
          day_key: key.day_key,
          owner_id: key.owner_id.clone(),
          created_at: Utc::now(),
        };
        self.inner.commit(lease, winner).await?;
      }
      Ok(SlotClaim::Claimed(SlotLease::new(key.clone(), None)))
    }

    async fn commit(&self, lease: SlotLease, riddle: Riddle) -> Result<Riddle, LedgerError> {
      self.inner.commit(lease, riddle).await
    }

    async fn mark_completed(&self, key: &SlotKey) -> Result<DailyStatusEntry, LedgerError> {
      self.inner.mark_completed(key).await
    }

    async fn record_guess(&self, key: &SlotKey, correct: bool, max_guesses: u32) -> Result<DailyStatusEntry, LedgerError> {
      self.inner.record_guess(key, correct, max_guesses).await
    }

    async fn status(&self, owner_id: &str, day_key: DayKey) -> Result<BTreeMap<Difficulty, DailyStatusEntry>, LedgerError> {
      self.inner.status(owner_id, day_key).await
    }

    async fn riddle_by_id(&self, riddle_id: &str) -> Result<Option<Riddle>, LedgerError> {
      self.inner.riddle_by_id(riddle_id).await
    }
  }

  #[tokio::test]
  async fn lost_commit_race_returns_the_winner() {
    let backends: Vec<Arc<dyn RiddleBackend>> = vec![
      Arc::new(ScriptedBackend::new("remote", Script::Reply(GOOD))),
      Arc::new(MockBackend::default()),
    ];
    let ledger = Arc::new(RacingLedger { inner: InMemoryLedger::default() });
    let orch = FallbackOrchestrator::new(backends, ledger, ResponseParser::new(ParserConfig::default())).unwrap();
    let req = request("u1", Difficulty::Medium);

    let riddle = orch.generate_riddle(&req, None).await.unwrap();
    assert_eq!(riddle.id, "winner");
    assert_eq!(riddle.answer, "BOTTLE");

    let sessions = orch.sessions_for(&req.slot_key()).await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].riddle_id.as_deref(), Some("winner"));
    assert_eq!(sessions[0].attempts[0].status, AttemptStatus::Success);
    assert_eq!(orch.ledger().riddle_by_id("winner").await.unwrap().unwrap().created_by_backend, "elsewhere");
  }
}
