//! Loading riddle configuration (prompts, generation tuning, extra mock riddles) from TOML.
//!
//! Every section is optional; missing keys fall back to the defaults below.
//!
//! ```toml
//! [generation]
//! backend_order = ["remote", "local", "mock"]
//! remote_timeout_secs = 30
//! leak_strictness = "substring"
//!
//! [prompts.themes]
//! pirate = "Style: Pirate. Salty sea-dog phrasing."
//!
//! [[mock_riddles]]
//! difficulty = "easy"
//! text = "RIDDLE: What has hands but can't clap?\nANSWER: clock"
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::Difficulty;
use crate::parser::{LeakStrictness, ParserConfig};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub generation: GenerationCfg,
  #[serde(default)]
  pub mock_riddles: Vec<MockRiddleCfg>,
}

/// Extra entry for the static mock table. Must already be in the tagged format.
#[derive(Clone, Debug, Deserialize)]
pub struct MockRiddleCfg {
  pub difficulty: Difficulty,
  pub text: String,
}

/// Fallback chain tuning.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationCfg {
  /// Backend names in priority order. The mock backend is always appended if absent.
  pub backend_order: Vec<String>,
  pub remote_timeout_secs: u64,
  pub local_timeout_secs: u64,
  /// Allowance for the first local call, which may have to load model weights.
  pub local_load_timeout_secs: u64,
  /// How long a request tries for the per-key lock before waiting on the winner instead.
  pub lock_wait_secs: u64,
  /// Minimum wait for a winner's commit; the orchestrator raises it to its chain budget.
  pub commit_wait_secs: u64,
  pub leak_strictness: LeakStrictness,
  pub max_answer_words: usize,
}

impl Default for GenerationCfg {
  fn default() -> Self {
    Self {
      backend_order: vec!["remote".into(), "local".into(), "mock".into()],
      remote_timeout_secs: 30,
      local_timeout_secs: 10,
      local_load_timeout_secs: 120,
      lock_wait_secs: 5,
      commit_wait_secs: 120,
      leak_strictness: LeakStrictness::default(),
      max_answer_words: 3,
    }
  }
}

impl GenerationCfg {
  pub fn parser_config(&self) -> ParserConfig {
    ParserConfig {
      max_answer_words: self.max_answer_words,
      leak_strictness: self.leak_strictness,
      ..ParserConfig::default()
    }
  }

  pub fn lock_wait(&self) -> Duration {
    Duration::from_secs(self.lock_wait_secs)
  }

  pub fn commit_wait(&self) -> Duration {
    Duration::from_secs(self.commit_wait_secs)
  }
}

/// Prompts shared by the model-backed backends. Override in TOML to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub system: String,
  /// Placeholders: {difficulty}, {difficulty_hint}, {theme_style}.
  pub user_template: String,
  pub difficulty_hints: HashMap<Difficulty, String>,
  pub themes: HashMap<String, String>,
}

impl Default for Prompts {
  fn default() -> Self {
    let difficulty_hints = HashMap::from([
      (Difficulty::Easy, "Create a very easy riddle for children. The answer must be a single common word (3-6 letters). Make it simple and fun.".to_string()),
      (Difficulty::Medium, "Create a medium difficulty riddle. The answer must be a single word (4-8 letters). Make it clever but not too hard.".to_string()),
      (Difficulty::Hard, "Create a challenging riddle. The answer must be a single word (5-10 letters). Make it require creative thinking.".to_string()),
      (Difficulty::VeryHard, "Create a very difficult riddle. The answer must be a single uncommon word (6-12 letters). Make it cryptic and complex.".to_string()),
      (Difficulty::Insane, "Create an extremely difficult, mind-bending riddle. The answer must be a single word (7-15 letters). Make it require deep lateral thinking.".to_string()),
    ]);
    let themes = HashMap::from([
      ("default".to_string(), String::new()),
      ("cyberpunk".to_string(), "Style: Cyberpunk. Use high-tech, neon, dystopian or hacking metaphors, as if spoken by a rogue AI. The answer is still an ordinary word.".to_string()),
      ("fantasy".to_string(), "Style: High Fantasy. Archaic language, magic, dragons and dungeons, as if found on an ancient scroll.".to_string()),
      ("horror".to_string(), "Style: Horror. Eerie and unsettling language, acceptable for a general audience.".to_string()),
      ("scifi".to_string(), "Style: Sci-Fi. Use space, alien, physics or cosmic metaphors.".to_string()),
      ("noir".to_string(), "Style: Film Noir. Narrate like a 1940s detective: gritty, rain-soaked and cynical.".to_string()),
    ]);
    Self {
      system: "You are a riddle generator. Output ONLY a riddle and its answer in the specified format. No greetings, no explanations. Never use the answer word inside the riddle.".into(),
      user_template: "{difficulty_hint} {theme_style}\n\nFormat your response EXACTLY as follows:\nRIDDLE: [the riddle question here]\nANSWER: [the one-word answer here]\n\nExample:\nRIDDLE: I speak without a mouth and hear without ears. I have no body, but I come alive with wind. What am I?\nANSWER: echo".into(),
      difficulty_hints,
      themes,
    }
  }
}

/// Attempt to load `AgentConfig` from RIDDLE_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("RIDDLE_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_agent_config(&s) {
      Ok(cfg) => {
        info!(target: "roddle_backend", %path, "Loaded riddle config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "roddle_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "roddle_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

pub fn parse_agent_config(s: &str) -> Result<AgentConfig, toml::de::Error> {
  let mut cfg = toml::from_str::<AgentConfig>(s)?;
  // Partial tables replace the default maps wholesale; put the missing defaults back.
  let defaults = Prompts::default();
  for (d, hint) in defaults.difficulty_hints {
    cfg.prompts.difficulty_hints.entry(d).or_insert(hint);
  }
  for (name, style) in defaults.themes {
    cfg.prompts.themes.entry(name).or_insert(style);
  }
  Ok(cfg)
}

/// Read an env var and parse it, falling back to `default` when unset or malformed.
pub fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
  std::env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
