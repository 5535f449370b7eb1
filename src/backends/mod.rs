//! Generation backends: pluggable sources of raw riddle text.
//!
//! Every backend answers the same two questions: "can you take a request right
//! now?" (`available`) and "give me raw tagged text for this request"
//! (`generate`). The orchestrator owns ordering, timeouts and parsing, so a
//! fourth backend is just another entry in the list.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::RiddleRequest;
use crate::error::BackendFailure;

pub mod local;
pub mod mock;
pub mod prompt;
pub mod remote;

pub use local::OllamaBackend;
pub use mock::MockBackend;
pub use remote::OpenAiBackend;

/// Upper bound for an `available()` call.
pub const AVAILABILITY_CHECK: Duration = Duration::from_secs(2);

#[async_trait]
pub trait RiddleBackend: Send + Sync {
  /// Stable name used in config ordering, user preferences and logs.
  fn name(&self) -> &str;

  /// Cheap liveness check. Must return within `AVAILABILITY_CHECK`.
  async fn available(&self) -> bool;

  /// Produce raw model output for the request. `timeout` is the budget the
  /// caller will enforce; backends pass it down to their I/O.
  async fn generate(&self, request: &RiddleRequest, timeout: Duration) -> Result<String, BackendFailure>;

  /// Budget for the next attempt. May shrink once a one-time load is done.
  fn attempt_timeout(&self) -> Duration;

  /// Largest budget `attempt_timeout` can ever return.
  fn max_attempt_timeout(&self) -> Duration {
    self.attempt_timeout()
  }

  /// True for the terminal backend that can always answer.
  fn guaranteed(&self) -> bool {
    false
  }

  /// Optional start-up hook (load weights, open connections).
  async fn warm_up(&self) {}

  /// Optional teardown hook, run once at shutdown.
  async fn shutdown(&self) {}
}
