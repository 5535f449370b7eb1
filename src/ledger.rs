//! Daily riddle ledger: the idempotency and status store for per-user daily riddles.
//!
//! One slot per (owner, day, difficulty). A slot holds at most one committed
//! riddle; the first commit wins and later ones get a `LedgerConflict` carrying
//! the winner. Claims are serialized per key only, so unrelated slots never wait
//! on each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{DailyStatusEntry, DayKey, Difficulty, Riddle, SlotKey};
use crate::error::{LedgerConflict, LedgerError};

/// Result of asking for a slot: either the riddle is already there, or the
/// caller now holds the right to generate one.
#[derive(Debug)]
pub enum SlotClaim {
  Existing(Riddle),
  Claimed(SlotLease),
}

/// Right to commit into one slot. Holding it keeps other callers for the same
/// key waiting; dropping it without committing lets the next one try.
#[derive(Debug)]
pub struct SlotLease {
  pub key: SlotKey,
  pub token: Uuid,
  guard: Option<OwnedMutexGuard<()>>,
}

impl SlotLease {
  pub fn new(key: SlotKey, guard: Option<OwnedMutexGuard<()>>) -> Self {
    Self { key, token: Uuid::new_v4(), guard }
  }

  /// False for a lease built without the slot lock; its commit can still lose.
  pub fn is_exclusive(&self) -> bool {
    self.guard.is_some()
  }
}

/// Persistence seam for the daily slots. The in-memory store below is the
/// default; anything transactional can implement the same contract.
#[async_trait]
pub trait DailyLedger: Send + Sync {
  /// Return the committed riddle for `key`, or a lease to generate it.
  /// A caller that finds the slot busy waits up to `wait` for the winner's
  /// commit and never gets a second lease while the first one is live.
  async fn get_or_create_slot(&self, key: &SlotKey, wait: Duration) -> Result<SlotClaim, LedgerError>;

  /// Commit `riddle` into the leased slot and mark it started.
  async fn commit(&self, lease: SlotLease, riddle: Riddle) -> Result<Riddle, LedgerError>;

  async fn mark_completed(&self, key: &SlotKey) -> Result<DailyStatusEntry, LedgerError>;

  /// Count one guess against the slot and return the updated entry. Rejects a
  /// completed slot; a correct or last guess completes it in the same step.
  async fn record_guess(&self, key: &SlotKey, correct: bool, max_guesses: u32) -> Result<DailyStatusEntry, LedgerError>;

  async fn status(&self, owner_id: &str, day_key: DayKey) -> Result<BTreeMap<Difficulty, DailyStatusEntry>, LedgerError>;

  async fn riddle_by_id(&self, riddle_id: &str) -> Result<Option<Riddle>, LedgerError>;
}

struct SlotState {
  lock: Arc<Mutex<()>>,
  committed: watch::Sender<Option<Riddle>>,
  committed_token: Option<Uuid>,
  entry: DailyStatusEntry,
}

impl SlotState {
  fn new(key: &SlotKey) -> Self {
    let (committed, _) = watch::channel(None);
    Self {
      lock: Arc::new(Mutex::new(())),
      committed,
      committed_token: None,
      entry: DailyStatusEntry::fresh(key),
    }
  }

  fn committed_riddle(&self) -> Option<Riddle> {
    self.committed.borrow().clone()
  }
}

enum Waited {
  Committed(Riddle),
  Lock(OwnedMutexGuard<()>),
}

pub struct InMemoryLedger {
  slots: RwLock<HashMap<SlotKey, SlotState>>,
  riddles: RwLock<HashMap<String, Riddle>>,
  lock_wait: Duration,
  commit_wait: Duration,
}

impl InMemoryLedger {
  /// `lock_wait`: how long to try for the per-key lock before switching to
  /// waiting on the winner. `commit_wait`: lower bound on waiting for the winner,
  /// raised per call by the caller's `wait`.
  pub fn new(lock_wait: Duration, commit_wait: Duration) -> Self {
    Self {
      slots: RwLock::new(HashMap::new()),
      riddles: RwLock::new(HashMap::new()),
      lock_wait,
      commit_wait,
    }
  }

  /// Re-check under the lock: a previous holder may have committed meanwhile.
  async fn claim_or_existing(&self, key: &SlotKey, guard: Option<OwnedMutexGuard<()>>) -> SlotClaim {
    let slots = self.slots.read().await;
    match slots.get(key).and_then(SlotState::committed_riddle) {
      Some(r) => SlotClaim::Existing(r),
      None => SlotClaim::Claimed(SlotLease::new(key.clone(), guard)),
    }
  }
}

impl Default for InMemoryLedger {
  fn default() -> Self {
    Self::new(Duration::from_secs(5), Duration::from_secs(120))
  }
}

#[async_trait]
impl DailyLedger for InMemoryLedger {
  #[instrument(level = "debug", skip(self), fields(%key))]
  async fn get_or_create_slot(&self, key: &SlotKey, wait: Duration) -> Result<SlotClaim, LedgerError> {
    let (lock, mut rx) = {
      let mut slots = self.slots.write().await;
      let slot = slots.entry(key.clone()).or_insert_with(|| SlotState::new(key));
      if let Some(r) = slot.committed_riddle() {
        return Ok(SlotClaim::Existing(r));
      }
      (slot.lock.clone(), slot.committed.subscribe())
    };

    if let Ok(guard) = tokio::time::timeout(self.lock_wait, lock.clone().lock_owned()).await {
      return Ok(self.claim_or_existing(key, Some(guard)).await);
    }

    // Someone else is generating this slot. Wait for their commit, or for the
    // lock if they give up without committing.
    debug!(target: "riddle", %key, "Slot busy; waiting for the winning generation");
    let waited = tokio::time::timeout(self.commit_wait.max(wait), async {
      tokio::select! {
        biased;
        r = rx.wait_for(Option::is_some) => r.ok().and_then(|v| v.clone()).map(Waited::Committed),
        g = lock.clone().lock_owned() => Some(Waited::Lock(g)),
      }
    })
    .await;

    match waited {
      Ok(Some(Waited::Committed(r))) => Ok(SlotClaim::Existing(r)),
      Ok(Some(Waited::Lock(g))) => Ok(self.claim_or_existing(key, Some(g)).await),
      Ok(None) | Err(_) => {
        warn!(target: "riddle", %key, "Gave up waiting on the winning generation");
        Err(LedgerError::Busy(key.to_string()))
      }
    }
  }

  #[instrument(level = "debug", skip(self, lease, riddle), fields(key = %lease.key, riddle_id = %riddle.id))]
  async fn commit(&self, lease: SlotLease, riddle: Riddle) -> Result<Riddle, LedgerError> {
    let key = &lease.key;
    if riddle.owner_id != key.owner_id || riddle.day_key != key.day_key || riddle.difficulty != key.difficulty {
      return Err(LedgerError::Storage(format!("riddle {} does not belong to slot {}", riddle.id, key)));
    }

    {
      let mut slots = self.slots.write().await;
      let slot = slots.entry(key.clone()).or_insert_with(|| SlotState::new(key));
      if let Some(winner) = slot.committed_riddle() {
        if slot.committed_token != Some(lease.token) {
          info!(target: "riddle", %key, winner = %winner.id, "Commit lost the race");
          return Err(LedgerConflict { winner: Box::new(winner) }.into());
        }
      }
      slot.committed_token = Some(lease.token);
      slot.entry.started = true;
      slot.entry.riddle_id = Some(riddle.id.clone());
      slot.committed.send_replace(Some(riddle.clone()));
    }
    self.riddles.write().await.insert(riddle.id.clone(), riddle.clone());
    info!(target: "riddle", %key, riddle_id = %riddle.id, "Riddle committed");
    Ok(riddle)
  }

  #[instrument(level = "debug", skip(self), fields(%key))]
  async fn mark_completed(&self, key: &SlotKey) -> Result<DailyStatusEntry, LedgerError> {
    let mut slots = self.slots.write().await;
    let slot = slots
      .get_mut(key)
      .filter(|s| s.entry.started)
      .ok_or_else(|| LedgerError::NotFound(key.to_string()))?;
    slot.entry.completed = true;
    Ok(slot.entry.clone())
  }

  #[instrument(level = "debug", skip(self), fields(%key))]
  async fn record_guess(&self, key: &SlotKey, correct: bool, max_guesses: u32) -> Result<DailyStatusEntry, LedgerError> {
    let mut slots = self.slots.write().await;
    let slot = slots
      .get_mut(key)
      .filter(|s| s.entry.started)
      .ok_or_else(|| LedgerError::NotFound(key.to_string()))?;
    if slot.entry.completed || slot.entry.guesses_used >= max_guesses {
      return Err(LedgerError::Completed(key.to_string()));
    }
    slot.entry.guesses_used += 1;
    if correct || slot.entry.guesses_used >= max_guesses {
      slot.entry.completed = true;
    }
    Ok(slot.entry.clone())
  }

  async fn status(&self, owner_id: &str, day_key: DayKey) -> Result<BTreeMap<Difficulty, DailyStatusEntry>, LedgerError> {
    let slots = self.slots.read().await;
    Ok(slots
      .iter()
      .filter(|(k, _)| k.owner_id == owner_id && k.day_key == day_key)
      .map(|(k, s)| (k.difficulty, s.entry.clone()))
      .collect())
  }

  async fn riddle_by_id(&self, riddle_id: &str) -> Result<Option<Riddle>, LedgerError> {
    Ok(self.riddles.read().await.get(riddle_id).cloned())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;

  fn key(owner: &str, difficulty: Difficulty) -> SlotKey {
    SlotKey {
      owner_id: owner.into(),
      day_key: DayKey::from_ymd(2026, 10, 19).unwrap(),
      difficulty,
    }
  }

  fn riddle_for(key: &SlotKey, id: &str) -> Riddle {
    Riddle {
      id: id.into(),
      riddle_text: "What has hands but cannot clap?".into(),
      answer: "CLOCK".into(),
      answer_length: 5,
      max_guesses: key.difficulty.max_guesses(),
      difficulty: key.difficulty,
      theme: "default".into(),
      created_by_backend: "mock".into(),
      day_key: key.day_key,
      owner_id: key.owner_id.clone(),
      created_at: Utc::now(),
    }
  }

  fn lease(claim: SlotClaim) -> SlotLease {
    match claim {
      SlotClaim::Claimed(l) => l,
      SlotClaim::Existing(r) => panic!("expected a lease, slot already has {}", r.id),
    }
  }

  const NO_WAIT: Duration = Duration::ZERO;

  #[tokio::test]
  async fn first_claim_then_existing() {
    let ledger = InMemoryLedger::default();
    let k = key("u1", Difficulty::Easy);
    let l = lease(ledger.get_or_create_slot(&k, NO_WAIT).await.unwrap());
    assert!(l.is_exclusive());
    ledger.commit(l, riddle_for(&k, "r1")).await.unwrap();

    match ledger.get_or_create_slot(&k, NO_WAIT).await.unwrap() {
      SlotClaim::Existing(r) => assert_eq!(r.id, "r1"),
      SlotClaim::Claimed(_) => panic!("slot should be committed"),
    }
    assert_eq!(ledger.riddle_by_id("r1").await.unwrap().unwrap().answer, "CLOCK");
  }

  #[tokio::test]
  async fn waiter_converges_on_the_winner() {
    let ledger = Arc::new(InMemoryLedger::new(Duration::from_millis(20), Duration::from_secs(5)));
    let k = key("u1", Difficulty::Hard);
    let l = lease(ledger.get_or_create_slot(&k, NO_WAIT).await.unwrap());

    let waiter = {
      let ledger = ledger.clone();
      let k = k.clone();
      tokio::spawn(async move { ledger.get_or_create_slot(&k, NO_WAIT).await })
    };
    tokio::time::sleep(Duration::from_millis(60)).await;
    ledger.commit(l, riddle_for(&k, "winner")).await.unwrap();

    match waiter.await.unwrap().unwrap() {
      SlotClaim::Existing(r) => assert_eq!(r.id, "winner"),
      SlotClaim::Claimed(_) => panic!("waiter should read the winner"),
    }
  }

  #[tokio::test]
  async fn caller_wait_extends_the_configured_floor() {
    let ledger = Arc::new(InMemoryLedger::new(Duration::from_millis(10), Duration::from_millis(10)));
    let k = key("u1", Difficulty::Easy);
    let l = lease(ledger.get_or_create_slot(&k, NO_WAIT).await.unwrap());

    let waiter = {
      let ledger = ledger.clone();
      let k = k.clone();
      tokio::spawn(async move { ledger.get_or_create_slot(&k, Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    ledger.commit(l, riddle_for(&k, "slow-winner")).await.unwrap();

    match waiter.await.unwrap().unwrap() {
      SlotClaim::Existing(r) => assert_eq!(r.id, "slow-winner"),
      SlotClaim::Claimed(_) => panic!("waiter must not generate while the winner is live"),
    }
  }

  #[tokio::test]
  async fn expired_wait_is_busy_not_a_second_lease() {
    let ledger = InMemoryLedger::new(Duration::from_millis(10), Duration::from_millis(10));
    let k = key("u1", Difficulty::Insane);
    let _held = lease(ledger.get_or_create_slot(&k, NO_WAIT).await.unwrap());
    assert!(matches!(ledger.get_or_create_slot(&k, NO_WAIT).await, Err(LedgerError::Busy(_))));
  }

  #[tokio::test]
  async fn abandoned_lease_passes_the_slot_on() {
    let ledger = Arc::new(InMemoryLedger::new(Duration::from_millis(20), Duration::from_secs(5)));
    let k = key("u1", Difficulty::Medium);
    let l = lease(ledger.get_or_create_slot(&k, NO_WAIT).await.unwrap());

    let waiter = {
      let ledger = ledger.clone();
      let k = k.clone();
      tokio::spawn(async move { ledger.get_or_create_slot(&k, NO_WAIT).await })
    };
    tokio::time::sleep(Duration::from_millis(60)).await;
    drop(l);

    let next = lease(waiter.await.unwrap().unwrap());
    assert!(next.is_exclusive());
  }

  #[tokio::test]
  async fn stale_commit_is_rejected_with_the_winner() {
    let ledger = InMemoryLedger::default();
    let k = key("u1", Difficulty::Insane);
    let first = lease(ledger.get_or_create_slot(&k, NO_WAIT).await.unwrap());
    ledger.commit(first, riddle_for(&k, "first")).await.unwrap();

    let stale = SlotLease::new(k.clone(), None);
    match ledger.commit(stale, riddle_for(&k, "second")).await {
      Err(LedgerError::Conflict(c)) => assert_eq!(c.winner.id, "first"),
      other => panic!("expected conflict, got {other:?}"),
    }
    assert!(ledger.riddle_by_id("second").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn unrelated_keys_do_not_block_each_other() {
    let ledger = InMemoryLedger::new(Duration::from_secs(5), Duration::from_secs(5));
    let _a = lease(ledger.get_or_create_slot(&key("u1", Difficulty::Easy), NO_WAIT).await.unwrap());
    let started = std::time::Instant::now();
    let b = lease(ledger.get_or_create_slot(&key("u1", Difficulty::Hard), NO_WAIT).await.unwrap());
    let c = lease(ledger.get_or_create_slot(&key("u2", Difficulty::Easy), NO_WAIT).await.unwrap());
    assert!(b.is_exclusive() && c.is_exclusive());
    assert!(started.elapsed() < Duration::from_secs(1));
  }

  #[tokio::test]
  async fn commit_rejects_a_riddle_for_another_slot() {
    let ledger = InMemoryLedger::default();
    let k = key("u1", Difficulty::Easy);
    let l = lease(ledger.get_or_create_slot(&k, NO_WAIT).await.unwrap());
    let other = riddle_for(&key("u2", Difficulty::Easy), "r1");
    assert!(matches!(ledger.commit(l, other).await, Err(LedgerError::Storage(_))));
  }

  #[tokio::test]
  async fn status_tracks_started_guesses_and_completion() {
    let ledger = InMemoryLedger::default();
    let k = key("u1", Difficulty::Easy);
    let day = k.day_key;
    assert!(ledger.status("u1", day).await.unwrap().is_empty());

    let l = lease(ledger.get_or_create_slot(&k, NO_WAIT).await.unwrap());
    let pending = ledger.status("u1", day).await.unwrap();
    assert!(!pending[&Difficulty::Easy].started);
    assert!(matches!(ledger.mark_completed(&k).await, Err(LedgerError::NotFound(_))));

    ledger.commit(l, riddle_for(&k, "r1")).await.unwrap();
    let entry = &ledger.status("u1", day).await.unwrap()[&Difficulty::Easy];
    assert!(entry.started && !entry.completed);
    assert_eq!(entry.riddle_id.as_deref(), Some("r1"));

    let guessed = ledger.record_guess(&k, false, 5).await.unwrap();
    assert_eq!(guessed.guesses_used, 1);
    assert!(!guessed.completed);
    assert!(ledger.mark_completed(&k).await.unwrap().completed);
    assert!(ledger.status("u2", day).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn guess_recording_completes_and_then_rejects() {
    let ledger = InMemoryLedger::default();
    let k = key("u1", Difficulty::VeryHard);
    let l = lease(ledger.get_or_create_slot(&k, NO_WAIT).await.unwrap());
    ledger.commit(l, riddle_for(&k, "r1")).await.unwrap();

    let correct = ledger.record_guess(&k, true, 2).await.unwrap();
    assert!(correct.completed);
    assert_eq!(correct.guesses_used, 1);
    assert!(matches!(ledger.record_guess(&k, true, 2).await, Err(LedgerError::Completed(_))));
    assert_eq!(ledger.status("u1", k.day_key).await.unwrap()[&Difficulty::VeryHard].guesses_used, 1);

    let k2 = key("u2", Difficulty::VeryHard);
    let l = lease(ledger.get_or_create_slot(&k2, NO_WAIT).await.unwrap());
    ledger.commit(l, riddle_for(&k2, "r2")).await.unwrap();
    assert!(!ledger.record_guess(&k2, false, 2).await.unwrap().completed);
    assert!(ledger.record_guess(&k2, false, 2).await.unwrap().completed);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_correct_guesses_complete_once() {
    let ledger = Arc::new(InMemoryLedger::default());
    let k = key("u1", Difficulty::Easy);
    let l = lease(ledger.get_or_create_slot(&k, NO_WAIT).await.unwrap());
    ledger.commit(l, riddle_for(&k, "r1")).await.unwrap();

    let tasks: Vec<_> = (0..8)
      .map(|_| {
        let ledger = ledger.clone();
        let k = k.clone();
        tokio::spawn(async move { ledger.record_guess(&k, true, 5).await })
      })
      .collect();
    let mut accepted = 0;
    for t in tasks {
      match t.await.unwrap() {
        Ok(entry) => {
          assert!(entry.completed);
          accepted += 1;
        }
        Err(e) => assert!(matches!(e, LedgerError::Completed(_))),
      }
    }
    assert_eq!(accepted, 1);
  }
}
