//! The scoring engine.
//!
//! [`assess`] maps a complete [`DialogueCapture`] to a risk score in
//! `[0, 100]` (higher is worse) and an [`Urgency`] bucket. Every weight and
//! threshold comes from a [`ScoringConfig`]; the function itself holds no
//! tuning constants and has no side effects.

use serde::{Deserialize, Serialize};

use crate::{Error, Result, dialogue::DialogueCapture};

pub const MAX_SCORE: f64 = 100.0;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Points added per worsening factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
  pub pain_per_point:      f64,
  pub pain_high:           f64,
  /// `pain_high` applies strictly above this level.
  pub pain_high_threshold: u8,
  /// Applies when adherence is denied or was never answered.
  pub non_adherence:       f64,
  pub bowel_abnormal:      f64,
  pub low_mood:            f64,
  /// `low_mood` applies strictly below this level.
  pub low_mood_threshold:  u8,
  pub fever:               f64,
  pub high_temperature:    f64,
  pub high_temperature_c:  f32,
  pub urgent_keyword:      f64,
  /// Per question left unanswered after its fallback.
  pub unanswered_question: f64,
}

impl Default for ScoreWeights {
  fn default() -> Self {
    Self {
      pain_per_point:      1.0,
      pain_high:           20.0,
      pain_high_threshold: 5,
      non_adherence:       15.0,
      bowel_abnormal:      10.0,
      low_mood:            15.0,
      low_mood_threshold:  5,
      fever:               20.0,
      high_temperature:    5.0,
      high_temperature_c:  38.5,
      urgent_keyword:      20.0,
      unanswered_question: 2.0,
    }
  }
}

/// Lower bounds (inclusive) of each urgency bucket above `low`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrgencyThresholds {
  pub medium:   f64,
  pub high:     f64,
  pub critical: f64,
}

impl Default for UrgencyThresholds {
  fn default() -> Self { Self { medium: 20.0, high: 40.0, critical: 70.0 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
  pub weights:         ScoreWeights,
  pub thresholds:      UrgencyThresholds,
  /// Matched case-insensitively against the free-text answers.
  pub urgent_keywords: Vec<String>,
}

impl Default for ScoringConfig {
  fn default() -> Self {
    Self {
      weights:         ScoreWeights::default(),
      thresholds:      UrgencyThresholds::default(),
      urgent_keywords: [
        "bleeding",
        "shortness of breath",
        "chest pain",
        "unconscious",
        "fainted",
        "paralysis",
        "seizure",
        "swelling",
        "infection",
        "saignement",
        "essoufflement",
        "douleur thoracique",
        "perte de connaissance",
        "paralysie",
        "convulsion",
        "gonflement",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
    }
  }
}

impl ScoringConfig {
  /// Reject tables that would break the ordering guarantees of [`assess`].
  pub fn validate(&self) -> Result<()> {
    let w = &self.weights;
    let named = [
      ("pain_per_point", w.pain_per_point),
      ("pain_high", w.pain_high),
      ("non_adherence", w.non_adherence),
      ("bowel_abnormal", w.bowel_abnormal),
      ("low_mood", w.low_mood),
      ("fever", w.fever),
      ("high_temperature", w.high_temperature),
      ("urgent_keyword", w.urgent_keyword),
      ("unanswered_question", w.unanswered_question),
    ];
    for (name, value) in named {
      if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidWeights(format!(
          "{name} must be a finite, non-negative number (got {value})"
        )));
      }
    }
    if !w.high_temperature_c.is_finite() {
      return Err(Error::InvalidWeights("high_temperature_c must be finite".into()));
    }

    let t = &self.thresholds;
    let ascending = [0.0, t.medium, t.high, t.critical, MAX_SCORE]
      .windows(2)
      .all(|pair| pair[0].is_finite() && pair[0] <= pair[1]);
    if !ascending {
      return Err(Error::InvalidWeights(format!(
        "thresholds must ascend within 0..=100 (got medium={}, high={}, critical={})",
        t.medium, t.high, t.critical
      )));
    }
    Ok(())
  }

  pub fn classify(&self, score: f64) -> Urgency {
    let t = &self.thresholds;
    if score >= t.critical {
      Urgency::Critical
    } else if score >= t.high {
      Urgency::High
    } else if score >= t.medium {
      Urgency::Medium
    } else {
      Urgency::Low
    }
  }
}

// ─── Output ──────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Urgency {
  Low,
  Medium,
  High,
  Critical,
}

impl Urgency {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownUrgency(s.to_owned()))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
  Pain,
  PainHigh,
  NonAdherence,
  BowelAbnormal,
  LowMood,
  Fever,
  HighTemperature,
  UrgentKeyword,
  Unanswered,
}

/// One line of the score breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
  pub factor: Factor,
  pub points: f64,
}

/// The scoring result persisted alongside a completed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
  pub score:            f64,
  pub urgency:          Urgency,
  /// Non-zero contributions, in evaluation order. Their sum may exceed the
  /// score, which is capped at [`MAX_SCORE`].
  pub breakdown:        Vec<Contribution>,
  #[serde(default)]
  pub matched_keywords: Vec<String>,
}

// ─── Scoring ─────────────────────────────────────────────────────────────────

/// Score a capture. Callers must only pass complete captures.
pub fn assess(capture: &DialogueCapture, config: &ScoringConfig) -> Assessment {
  let w = &config.weights;
  let mut breakdown = Vec::new();
  let mut add = |factor, points: f64| {
    if points > 0.0 {
      breakdown.push(Contribution { factor, points });
    }
  };

  if let Some(pain) = capture.pain_level {
    add(Factor::Pain, w.pain_per_point * f64::from(pain));
    if pain > w.pain_high_threshold {
      add(Factor::PainHigh, w.pain_high);
    }
  }
  if capture.treatment_adherence != Some(true) {
    add(Factor::NonAdherence, w.non_adherence);
  }
  if capture.bowel_normal == Some(false) {
    add(Factor::BowelAbnormal, w.bowel_abnormal);
  }
  if capture.mood_level.is_some_and(|m| m < w.low_mood_threshold) {
    add(Factor::LowMood, w.low_mood);
  }
  if capture.fever == Some(true) {
    add(Factor::Fever, w.fever);
    if capture.temperature_c.is_some_and(|t| t >= w.high_temperature_c) {
      add(Factor::HighTemperature, w.high_temperature);
    }
  }

  let matched_keywords = urgent_keywords(capture, &config.urgent_keywords);
  if !matched_keywords.is_empty() {
    add(Factor::UrgentKeyword, w.urgent_keyword);
  }

  add(
    Factor::Unanswered,
    w.unanswered_question * capture.unanswered.len() as f64,
  );

  let score = breakdown.iter().map(|c| c.points).sum::<f64>().min(MAX_SCORE);
  Assessment {
    score,
    urgency: config.classify(score),
    breakdown,
    matched_keywords,
  }
}

/// Configured keywords found in any free-text answer, deduplicated and in
/// configuration order.
fn urgent_keywords(capture: &DialogueCapture, keywords: &[String]) -> Vec<String> {
  let text = [
    &capture.pain_location,
    &capture.bowel_complication,
    &capture.mood_details,
    &capture.other_complaints,
  ]
  .into_iter()
  .flatten()
  .map(|s| s.to_lowercase())
  .collect::<Vec<_>>()
  .join(" ");

  let mut found: Vec<String> = Vec::new();
  for kw in keywords {
    let kw = kw.to_lowercase();
    if !kw.is_empty() && text.contains(&kw) && !found.contains(&kw) {
      found.push(kw);
    }
  }
  found
}
