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

/// True if the char is a CJK unified ideograph (kanji).
pub fn is_kanji(ch: char) -> bool {
  ('\u{4E00}'..='\u{9FFF}').contains(&ch)
    || ('\u{3400}'..='\u{4DBF}').contains(&ch)
    || ('\u{F900}'..='\u{FAFF}').contains(&ch)
}

pub fn has_kanji(s: &str) -> bool {
  s.chars().any(is_kanji)
}

/// Truncate to `max` chars for diagnostics embedded in error messages.
pub fn clip(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    let head: String = s.chars().take(max).collect();
    format!("{}…(truncated)", head)
  }
}

/// Collapse runs of whitespace into a single space and trim.
pub fn collapse_whitespace(s: &str) -> String {
  s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Take at most `max` chars.
pub fn take_chars(s: &str, max: usize) -> String {
  s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fill_template_replaces_all_keys() {
    let out = fill_template("{n}개, {level}, {n}", &[("n", "3"), ("level", "JLPT N3")]);
    assert_eq!(out, "3개, JLPT N3, 3");
  }

  #[test]
  fn clip_is_char_safe() {
    assert_eq!(clip("こんにちは", 10), "こんにちは");
    assert_eq!(clip("こんにちは", 2), "こん…(truncated)");
  }

  #[test]
  fn kanji_detection() {
    assert!(has_kanji("お召し上がり"));
    assert!(!has_kanji("アイスラテ"));
  }

  #[test]
  fn collapse_whitespace_joins_runs() {
    assert_eq!(collapse_whitespace("  카페   주문\n표현 "), "카페 주문 표현");
  }
}
