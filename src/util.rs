//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Collapse text into one uppercase run of ASCII letters.
/// "ice cream!" -> "ICECREAM". Used for answers, guesses and leak checks.
pub fn letters_upper(s: &str) -> String {
  s.chars()
    .filter(|c| c.is_ascii_alphabetic())
    .map(|c| c.to_ascii_uppercase())
    .collect()
}

/// Log-safe truncation for large strings (counts chars, never splits one).
pub fn trunc_for_log(s: &str, max: usize) -> String {
  match s.char_indices().nth(max) {
    None => s.to_string(),
    Some((cut, _)) => format!("{}… ({} bytes total)", &s[..cut], s.len()),
  }
}
