//! Validation and normalisation of spoken replies.
//!
//! Replies arrive as recognised text. Each [`Expect`] accepts a narrow set of
//! shapes; anything else is a validation failure that sends the driver down
//! the step's fallback path.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{Expect, Reply};

/// A validated answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Answer {
  Scale(u8),
  YesNo(bool),
  Text(String),
  Temperature(f32),
  Date(NaiveDate),
}

/// The reply did not fit what the step expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidAnswer;

/// Validate `reply` against `expects`.
///
/// - `Ok(Some(_))`: a valid answer.
/// - `Ok(None)`: no answer to an optional question.
/// - `Err(InvalidAnswer)`: the reply does not fit `expects`.
pub fn parse_answer(expects: &Expect, reply: &Reply) -> Result<Option<Answer>, InvalidAnswer> {
  let text = match reply {
    Reply::Text(t) if !t.trim().is_empty() => t.trim(),
    _ => {
      return match expects {
        Expect::FreeText { required: false, .. } => Ok(None),
        _ => Err(InvalidAnswer),
      };
    }
  };

  match expects {
    Expect::Scale { min, max } => parse_scale(text)
      .filter(|n| (*min..=*max).contains(n))
      .map(|n| Some(Answer::Scale(n)))
      .ok_or(InvalidAnswer),
    Expect::YesNo { yes, no } => {
      parse_yes_no(text, yes, no).map(|b| Some(Answer::YesNo(b))).ok_or(InvalidAnswer)
    }
    Expect::Temperature { min, max } => parse_temperature(text)
      .filter(|t| *t >= *min && *t <= *max)
      .map(|t| Some(Answer::Temperature(t)))
      .ok_or(InvalidAnswer),
    Expect::Date => parse_date(text).map(|d| Some(Answer::Date(d))).ok_or(InvalidAnswer),
    Expect::FreeText { max_len, .. } => {
      if text.chars().count() > *max_len {
        Err(InvalidAnswer)
      } else {
        Ok(Some(Answer::Text(text.to_owned())))
      }
    }
  }
}

// ─── Scale ───────────────────────────────────────────────────────────────────

const NUMBER_WORDS: &[(&str, u8)] = &[
  ("zero", 0),
  ("zéro", 0),
  ("one", 1),
  ("un", 1),
  ("une", 1),
  ("two", 2),
  ("deux", 2),
  ("three", 3),
  ("trois", 3),
  ("four", 4),
  ("quatre", 4),
  ("five", 5),
  ("cinq", 5),
  ("six", 6),
  ("seven", 7),
  ("sept", 7),
  ("eight", 8),
  ("huit", 8),
  ("nine", 9),
  ("neuf", 9),
  ("ten", 10),
  ("dix", 10),
];

/// First integer in the reply, spelled with digits or as a word.
fn parse_scale(text: &str) -> Option<u8> {
  let lower = text.to_lowercase();
  for token in words(&lower) {
    if let Ok(n) = token.parse::<u8>() {
      return Some(n);
    }
    if let Some((_, n)) = NUMBER_WORDS.iter().find(|(w, _)| *w == token) {
      return Some(*n);
    }
  }
  None
}

// ─── Yes / no ────────────────────────────────────────────────────────────────

/// Keyword match on whole words. Negative keywords are removed from the text
/// before positives are checked, so "pas de fièvre" does not also count as
/// "fièvre". Replies matching both sides, or neither, are invalid.
fn parse_yes_no(text: &str, yes: &[String], no: &[String]) -> Option<bool> {
  let mut rest = format!(" {} ", words(&text.to_lowercase()).join(" "));
  let mut negative = false;
  for kw in no {
    let needle = format!(" {} ", kw.to_lowercase());
    if rest.contains(&needle) {
      negative = true;
      rest = rest.replace(&needle, " ");
    }
  }
  let positive = yes
    .iter()
    .any(|kw| rest.contains(&format!(" {} ", kw.to_lowercase())));

  match (positive, negative) {
    (true, false) => Some(true),
    (false, true) => Some(false),
    _ => None,
  }
}

// ─── Temperature ─────────────────────────────────────────────────────────────

/// First decimal number, accepting `,` as the decimal separator.
fn parse_temperature(text: &str) -> Option<f32> {
  let start = text.find(|c: char| c.is_ascii_digit())?;
  let number: String = text[start..]
    .chars()
    .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
    .map(|c| if c == ',' { '.' } else { c })
    .collect();
  number.trim_end_matches('.').parse().ok()
}

// ─── Date ────────────────────────────────────────────────────────────────────

const DATE_FORMATS: &[&str] =
  &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y-%m-%d", "%d %m %Y"];

fn parse_date(text: &str) -> Option<NaiveDate> {
  let cleaned = words(text).join(" ");
  DATE_FORMATS.iter().find_map(|fmt| {
    NaiveDate::parse_from_str(text, fmt)
      .or_else(|_| NaiveDate::parse_from_str(&cleaned, fmt))
      .ok()
  })
}

/// Split on anything that is not a letter, digit, or apostrophe.
fn words(text: &str) -> Vec<&str> {
  text
    .split(|c: char| !(c.is_alphanumeric() || c == '\''))
    .filter(|w| !w.is_empty())
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn text(s: &str) -> Reply { Reply::Text(s.to_owned()) }

  fn yes_no() -> Expect {
    Expect::YesNo {
      yes: vec!["yes".into(), "oui".into(), "fièvre".into()],
      no:  vec!["no".into(), "non".into(), "pas de fièvre".into()],
    }
  }

  #[test]
  fn scale_accepts_digits_and_words() {
    let e = Expect::Scale { min: 0, max: 10 };
    assert_eq!(parse_answer(&e, &text("about 7 today")), Ok(Some(Answer::Scale(7))));
    assert_eq!(parse_answer(&e, &text("Huit")), Ok(Some(Answer::Scale(8))));
    assert_eq!(parse_answer(&e, &text("11")), Err(InvalidAnswer));
    assert_eq!(parse_answer(&e, &text("quite bad")), Err(InvalidAnswer));
    assert_eq!(parse_answer(&e, &Reply::NoInput), Err(InvalidAnswer));
  }

  #[test]
  fn yes_no_on_whole_words() {
    let e = yes_no();
    assert_eq!(parse_answer(&e, &text("Oui, tout va bien")), Ok(Some(Answer::YesNo(true))));
    assert_eq!(parse_answer(&e, &text("non")), Ok(Some(Answer::YesNo(false))));
    // "nothing" must not match "no".
    assert_eq!(parse_answer(&e, &text("nothing")), Err(InvalidAnswer));
    assert_eq!(parse_answer(&e, &text("pas de fièvre")), Ok(Some(Answer::YesNo(false))));
    assert_eq!(parse_answer(&e, &text("yes no")), Err(InvalidAnswer));
  }

  #[test]
  fn temperature_with_comma() {
    let e = Expect::Temperature { min: 34.0, max: 43.0 };
    assert_eq!(parse_answer(&e, &text("38,5 degrés")), Ok(Some(Answer::Temperature(38.5))));
    assert_eq!(parse_answer(&e, &text("99")), Err(InvalidAnswer));
  }

  #[test]
  fn dates_in_common_formats() {
    let d = NaiveDate::from_ymd_opt(1954, 3, 12).unwrap();
    for s in ["12/03/1954", "12-03-1954", "1954-03-12", "12 03 1954"] {
      assert_eq!(parse_answer(&Expect::Date, &text(s)), Ok(Some(Answer::Date(d))), "{s}");
    }
    assert_eq!(parse_answer(&Expect::Date, &text("in March")), Err(InvalidAnswer));
  }

  #[test]
  fn optional_free_text() {
    let e = Expect::FreeText { max_len: 10, required: false };
    assert_eq!(parse_answer(&e, &Reply::NoInput), Ok(None));
    assert_eq!(parse_answer(&e, &text("  ")), Ok(None));
    assert_eq!(parse_answer(&e, &text("knee")), Ok(Some(Answer::Text("knee".into()))));
    assert_eq!(parse_answer(&e, &text("far too long a reply")), Err(InvalidAnswer));
  }
}
