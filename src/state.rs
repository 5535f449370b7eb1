//! Application state: backends, orchestrator, ledger, game service and user settings.
//!
//! This module owns:
//!   - the backend pool, built explicitly from config + env (no globals)
//!   - the fallback orchestrator and the daily ledger it commits into
//!   - the in-memory per-user settings read at request time
//!   - startup availability logging, warm-up and shutdown of backends

use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use serde::{Deserialize, Serialize};

use crate::backends::{MockBackend, OllamaBackend, OpenAiBackend, RiddleBackend, AVAILABILITY_CHECK};
use crate::clock::DayClock;
use crate::config::{load_agent_config_from_env, AgentConfig};
use crate::error::FatalGenerationError;
use crate::game::GameService;
use crate::ledger::{DailyLedger, InMemoryLedger};
use crate::orchestrator::FallbackOrchestrator;

/// Per-user preferences. Both fields are optional; unset means "server default".
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSettings {
    pub theme: Option<String>,
    pub preferred_backend: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<FallbackOrchestrator>,
    pub ledger: Arc<dyn DailyLedger>,
    pub game: Arc<GameService>,
    pub clock: DayClock,
    pub settings: Arc<RwLock<HashMap<String, UserSettings>>>,
    /// Kept separately for model listing and pulls.
    pub local: Option<Arc<OllamaBackend>>,
}

impl AppState {
    /// Build state from env: load config, construct backends, wire the orchestrator.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Result<Self, FatalGenerationError> {
        let cfg = load_agent_config_from_env().unwrap_or_default();
        let gen = &cfg.generation;

        let remote = OpenAiBackend::from_env(cfg.prompts.clone(), Duration::from_secs(gen.remote_timeout_secs));
        if remote.has_key() {
            info!(target: "roddle_backend", base_url = %remote.base_url, model = %remote.model, "Remote backend enabled.");
        } else {
            info!(target: "roddle_backend", "Remote backend disabled (no OPENAI_API_KEY).");
        }

        let local = if local_model_disabled() {
            info!(target: "roddle_backend", "Local model disabled (LOCAL_MODEL_DISABLED).");
            None
        } else {
            let b = OllamaBackend::from_env(
                cfg.prompts.clone(),
                Duration::from_secs(gen.local_timeout_secs),
                Duration::from_secs(gen.local_load_timeout_secs),
            );
            info!(target: "roddle_backend", base_url = %b.base_url, model = %b.model, "Local backend configured.");
            Some(Arc::new(b))
        };

        let mut pool: Vec<Arc<dyn RiddleBackend>> = vec![Arc::new(remote)];
        if let Some(l) = &local {
            pool.push(l.clone());
        }
        Self::from_parts(&cfg, pool, local, DayClock::from_env())
    }

    /// Wire state from already-built pieces. The mock backend is always added.
    pub fn from_parts(
        cfg: &AgentConfig,
        mut pool: Vec<Arc<dyn RiddleBackend>>,
        local: Option<Arc<OllamaBackend>>,
        clock: DayClock,
    ) -> Result<Self, FatalGenerationError> {
        pool.push(Arc::new(MockBackend::new(&cfg.mock_riddles)));

        let gen = &cfg.generation;
        let ledger: Arc<dyn DailyLedger> = Arc::new(InMemoryLedger::new(gen.lock_wait(), gen.commit_wait()));
        let orchestrator = FallbackOrchestrator::from_config(gen, pool, ledger.clone())?;
        info!(target: "roddle_backend", order = ?orchestrator.backend_names(), leak_strictness = ?gen.leak_strictness, utc_offset = %clock.offset(), "Fallback chain ready");

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            game: Arc::new(GameService::new(ledger.clone())),
            ledger,
            clock,
            settings: Arc::new(RwLock::new(HashMap::new())),
            local,
        })
    }

    /// Check every backend once, bounded like the orchestrator's availability check.
    pub async fn backend_availability(&self) -> Vec<(String, bool)> {
        let mut out = Vec::new();
        for b in self.orchestrator.backends() {
            let up = tokio::time::timeout(AVAILABILITY_CHECK, b.available()).await.unwrap_or(false);
            out.push((b.name().to_string(), up));
        }
        out
    }

    pub async fn log_backend_availability(&self) {
        for (name, up) in self.backend_availability().await {
            if up {
                info!(target: "roddle_backend", backend = %name, "Backend available");
            } else {
                warn!(target: "roddle_backend", backend = %name, "Backend not available at startup");
            }
        }
    }

    /// Run every backend's warm-up in the background.
    pub fn spawn_warm_up(&self) {
        for b in self.orchestrator.backends().iter().cloned() {
            tokio::spawn(async move { b.warm_up().await });
        }
    }

    pub async fn shutdown_backends(&self) {
        for b in self.orchestrator.backends() {
            b.shutdown().await;
            info!(target: "roddle_backend", backend = %b.name(), "Backend shut down");
        }
    }

    pub async fn settings_for(&self, user_id: &str) -> UserSettings {
        self.settings.read().await.get(user_id).cloned().unwrap_or_default()
    }

    /// Merge `patch` into the user's settings. Empty strings clear a field.
    #[instrument(level = "debug", skip(self))]
    pub async fn update_settings(&self, user_id: &str, patch: UserSettings) -> UserSettings {
        let mut settings = self.settings.write().await;
        let current = settings.entry(user_id.to_string()).or_default();
        if let Some(theme) = patch.theme {
            current.theme = non_empty(theme);
        }
        if let Some(backend) = patch.preferred_backend {
            current.preferred_backend = non_empty(backend);
        }
        current.clone()
    }
}

fn non_empty(s: String) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn local_model_disabled() -> bool {
    matches!(
        std::env::var("LOCAL_MODEL_DISABLED").map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Ok("1" | "true" | "yes")
    )
}
