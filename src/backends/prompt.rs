//! Difficulty- and theme-aware prompt construction shared by model-backed backends.

use crate::config::Prompts;
use crate::domain::Difficulty;
use crate::util::fill_template;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompt {
  pub system: String,
  pub user: String,
}

pub fn build_prompt(prompts: &Prompts, difficulty: Difficulty, theme: &str) -> Prompt {
  let hint = prompts
    .difficulty_hints
    .get(&difficulty)
    .map(String::as_str)
    .unwrap_or("Create a moderately challenging riddle with a single-word answer.");
  // Unknown themes simply get no style line.
  let style = prompts.themes.get(theme).map(String::as_str).unwrap_or("");

  let user = fill_template(
    &prompts.user_template,
    &[("difficulty", difficulty.as_str()), ("difficulty_hint", hint), ("theme_style", style)],
  );
  Prompt {
    system: prompts.system.clone(),
    user: user.replace(" \n", "\n").trim().to_string(),
  }
}
