//! Response parser: turns free-text model output into a validated riddle/answer pair.
//!
//! Backends are prompted to answer in a two-line tagged format:
//!
//! ```text
//! RIDDLE: I speak without a mouth and hear without ears. What am I?
//! ANSWER: echo
//! ```
//!
//! Markers are matched case-insensitively (first occurrence of each). The answer
//! runs from its marker to end-of-line and is collapsed into one uppercase run
//! of letters, since the game shows a single row of tiles.

use serde::Deserialize;

use crate::domain::Difficulty;
use crate::error::ParseError;
use crate::util::letters_upper;

pub const RIDDLE_TAG: &str = "RIDDLE:";
pub const ANSWER_TAG: &str = "ANSWER:";
pub const MIN_ANSWER_LEN: usize = 2;

/// How aggressively a riddle body is searched for its own answer.
/// Ordered from most lenient to strictest.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeakStrictness {
  /// Only whole words (or runs of adjacent words for multi-word answers).
  WholeWord,
  /// Whole words, plus the answer appearing inside any word ("candlelight" leaks CANDLE).
  #[default]
  Substring,
  /// The body's letters with spaces and punctuation removed contain the answer.
  Compact,
}

#[derive(Clone, Debug)]
pub struct ParserConfig {
  pub max_answer_words: usize,
  pub leak_strictness: LeakStrictness,
}

impl Default for ParserConfig {
  fn default() -> Self {
    Self {
      max_answer_words: 3,
      leak_strictness: LeakStrictness::default(),
    }
  }
}

/// Output of a successful parse. The orchestrator turns it into a `Riddle`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedRiddle {
  pub riddle_text: String,
  pub answer: String,
  pub answer_length: usize,
}

#[derive(Clone, Debug, Default)]
pub struct ResponseParser {
  cfg: ParserConfig,
}

impl ResponseParser {
  pub fn new(cfg: ParserConfig) -> Self {
    Self { cfg }
  }

  /// Pure function over text: no retries, no side effects.
  pub fn parse(&self, raw: &str, difficulty: Difficulty) -> Result<ParsedRiddle, ParseError> {
    // ASCII uppercasing keeps byte offsets identical to `raw`.
    let upper = raw.to_ascii_uppercase();

    let (Some(r_pos), Some(a_pos)) = (upper.find(RIDDLE_TAG), upper.find(ANSWER_TAG)) else {
      return Err(ParseError::MissingMarkers);
    };
    let body_start = r_pos + RIDDLE_TAG.len();
    if a_pos < body_start {
      return Err(ParseError::InvalidContent("answer marker comes before the riddle".into()));
    }

    let riddle_text = clean_body(&raw[body_start..a_pos]);
    let answer_line = raw[a_pos + ANSWER_TAG.len()..].lines().next().unwrap_or_default();
    let answer_phrase = clean_answer_phrase(answer_line);

    if riddle_text.is_empty() {
      return Err(ParseError::InvalidContent("riddle text is empty".into()));
    }
    if answer_phrase.chars().any(|c| c.is_alphabetic() && !c.is_ascii_alphabetic()) {
      return Err(ParseError::InvalidContent(format!("answer '{answer_phrase}' uses letters outside A-Z")));
    }
    let words = answer_words(&answer_phrase);
    if words.len() > self.cfg.max_answer_words {
      return Err(ParseError::InvalidContent(format!(
        "answer has {} words, at most {} allowed",
        words.len(),
        self.cfg.max_answer_words
      )));
    }

    let answer = words.concat();
    let len = answer.len();
    if len < MIN_ANSWER_LEN {
      return Err(ParseError::AnswerTooShort { len, min: MIN_ANSWER_LEN });
    }
    let max = difficulty.max_answer_len();
    if len > max {
      return Err(ParseError::AnswerTooLong { len, max });
    }

    if echoes_tag(&riddle_text, RIDDLE_TAG) || echoes_tag(&riddle_text, ANSWER_TAG) {
      return Err(ParseError::InvalidContent("riddle text repeats a format marker".into()));
    }
    if leaks(&riddle_text, &answer, self.cfg.leak_strictness, words.len()) {
      return Err(ParseError::AnswerLeaked { answer });
    }

    Ok(ParsedRiddle { riddle_text, answer_length: len, answer })
  }
}

/// Trim markdown emphasis and stray quotes around the body and fold it onto one line.
fn clean_body(body: &str) -> String {
  let folded = body.split_whitespace().collect::<Vec<_>>().join(" ");
  folded
    .trim_matches(|c: char| c == '*' || c == '_' || c == '"' || c.is_whitespace())
    .to_string()
}

/// Drop anything after an opening parenthesis or a dash explanation ("echo - because ...").
fn clean_answer_phrase(line: &str) -> String {
  let mut phrase = line;
  if let Some(i) = phrase.find('(') {
    phrase = &phrase[..i];
  }
  if let Some(i) = phrase.find(" - ") {
    phrase = &phrase[..i];
  }
  phrase
    .trim_matches(|c: char| c == '*' || c == '_' || c == '"' || c == '\'' || c == '.' || c.is_whitespace())
    .to_string()
}

fn answer_words(phrase: &str) -> Vec<String> {
  phrase
    .split_whitespace()
    .map(letters_upper)
    .filter(|w| !w.is_empty())
    .collect()
}

/// A format marker inside the body: the full tag with its colon in any case,
/// or the bare tag word written in capitals.
fn echoes_tag(body: &str, tag_upper: &str) -> bool {
  if body.to_ascii_uppercase().contains(tag_upper) {
    return true;
  }
  let word = tag_upper.trim_end_matches(':');
  body
    .split(|c: char| !c.is_ascii_alphabetic())
    .any(|w| w == word)
}

fn leaks(body: &str, answer: &str, strictness: LeakStrictness, answer_words: usize) -> bool {
  let words: Vec<String> = body
    .split(|c: char| !c.is_ascii_alphabetic())
    .filter(|w| !w.is_empty())
    .map(|w| w.to_ascii_uppercase())
    .collect();

  let whole_word = (1..=answer_words.max(1)).any(|n| words.windows(n).any(|run| run.concat() == answer));

  match strictness {
    LeakStrictness::WholeWord => whole_word,
    LeakStrictness::Substring => whole_word || body.to_ascii_uppercase().contains(answer),
    LeakStrictness::Compact => letters_upper(body).contains(answer),
  }
}
