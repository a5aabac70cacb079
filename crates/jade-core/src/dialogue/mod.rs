//! The scripted follow-up dialogue.
//!
//! A dialogue is a fixed [`Script`] (a table of steps, each naming its next
//! and fallback step) interpreted by one generic driver, [`run`]. The driver
//! talks to the patient through a [`DialogueChannel`], so the same script runs
//! over a live telephony leg or an in-memory test double.
//!
//! The driver never fails: whatever happens on the line, it returns a
//! [`DialogueCapture`]. Only a capture with `complete == true` may be scored.

mod answer;
mod script;

use std::future::Future;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use answer::{Answer, InvalidAnswer, parse_answer};
pub use script::{
  Condition, Expect, PromptContext, Script, ScriptSettings, Step, StepId,
  StepKind,
};

use crate::patient::Patient;

// ─── Captured fields ─────────────────────────────────────────────────────────

/// A scored question slot in the capture.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Field {
  PainLevel,
  PainLocation,
  TreatmentAdherence,
  BowelNormal,
  BowelComplication,
  MoodLevel,
  MoodDetails,
  Fever,
  Temperature,
  OtherComplaints,
}

/// The structured answers gathered during one dialogue run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogueCapture {
  pub identity_verified:   bool,
  /// 0 (none) to 10 (worst imaginable).
  pub pain_level:          Option<u8>,
  pub pain_location:       Option<String>,
  pub treatment_adherence: Option<bool>,
  pub bowel_normal:        Option<bool>,
  pub bowel_complication:  Option<String>,
  /// 0 (very low) to 10 (very good).
  pub mood_level:          Option<u8>,
  pub mood_details:        Option<String>,
  pub fever:               Option<bool>,
  pub temperature_c:       Option<f32>,
  pub other_complaints:    Option<String>,
  /// Questions that were asked but produced no valid answer after the
  /// fallback path.
  #[serde(default)]
  pub unanswered:          Vec<Field>,
  /// Identity verified and the closing step reached.
  pub complete:            bool,
  /// Why the run stopped before the closing step, if it did.
  pub ended_early:         Option<String>,
}

impl DialogueCapture {
  fn set(&mut self, field: Field, answer: Answer) {
    match (field, answer) {
      (Field::PainLevel, Answer::Scale(n)) => self.pain_level = Some(n),
      (Field::MoodLevel, Answer::Scale(n)) => self.mood_level = Some(n),
      (Field::TreatmentAdherence, Answer::YesNo(b)) => {
        self.treatment_adherence = Some(b)
      }
      (Field::BowelNormal, Answer::YesNo(b)) => self.bowel_normal = Some(b),
      (Field::Fever, Answer::YesNo(b)) => self.fever = Some(b),
      (Field::Temperature, Answer::Temperature(t)) => {
        self.temperature_c = Some(t)
      }
      (Field::PainLocation, Answer::Text(s)) => self.pain_location = Some(s),
      (Field::BowelComplication, Answer::Text(s)) => {
        self.bowel_complication = Some(s)
      }
      (Field::MoodDetails, Answer::Text(s)) => self.mood_details = Some(s),
      (Field::OtherComplaints, Answer::Text(s)) => {
        self.other_complaints = Some(s)
      }
      // A step table pairing a field with the wrong answer kind; ignore
      // rather than corrupt another slot.
      _ => {}
    }
  }

  fn scale(&self, field: Field) -> Option<u8> {
    match field {
      Field::PainLevel => self.pain_level,
      Field::MoodLevel => self.mood_level,
      _ => None,
    }
  }

  fn flag(&self, field: Field) -> Option<bool> {
    match field {
      Field::TreatmentAdherence => self.treatment_adherence,
      Field::BowelNormal => self.bowel_normal,
      Field::Fever => self.fever,
      _ => None,
    }
  }

  fn mark_unanswered(&mut self, field: Field) {
    if !self.unanswered.contains(&field) {
      self.unanswered.push(field);
    }
  }

  fn stop(mut self, reason: impl Into<String>) -> Self {
    self.complete = false;
    self.ended_early = Some(reason.into());
    self
  }
}

// ─── Channel ─────────────────────────────────────────────────────────────────

/// What came back from the patient after a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
  Text(String),
  /// Silence until the channel's reply timeout.
  NoInput,
}

/// A live conversation with the patient.
///
/// Implementations own the transport; a hang-up or transport failure is
/// reported as `Err`, which ends the run early.
pub trait DialogueChannel: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Speak `text` without waiting for an answer.
  fn say(
    &mut self,
    text: &str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send;

  /// Speak `prompt` and wait for the patient's reply.
  fn ask(
    &mut self,
    prompt: &str,
  ) -> impl Future<Output = Result<Reply, Self::Error>> + Send;
}

// ─── Driver ──────────────────────────────────────────────────────────────────

/// Interpret `script` over `channel` for `patient`.
pub async fn run<C: DialogueChannel>(
  script: &Script,
  channel: &mut C,
  patient: &Patient,
) -> DialogueCapture {
  let ctx = PromptContext::for_patient(script.settings(), patient);
  let mut capture = DialogueCapture::default();
  let mut current = Some(script.first());
  let mut reasked: Option<StepId> = None;
  // Every step is visited at most twice; anything more is a cycle in the
  // table.
  let mut budget = script.len() * 2 + 1;

  while let Some(id) = current {
    if budget == 0 {
      return capture.stop("dialogue script did not terminate");
    }
    budget -= 1;

    let Some(step) = script.step(id) else {
      return capture.stop(format!("dialogue script has no step {id}"));
    };
    let is_retry = reasked == Some(id);
    let prompt = ctx.render(match (&step.reprompt, is_retry) {
      (Some(reprompt), true) => reprompt,
      _ => &step.prompt,
    });

    match &step.kind {
      StepKind::Introduction => {
        if let Err(e) = channel.say(&prompt).await {
          return capture.stop(e.to_string());
        }
        current = step.next;
      }

      StepKind::Identity => {
        let Some(on_record) = patient.birth_date else {
          return capture.stop("no birth date on record; identity not verified");
        };
        let reply = match channel.ask(&prompt).await {
          Ok(r) => r,
          Err(e) => return capture.stop(e.to_string()),
        };
        if identity_matches(&reply, on_record) {
          capture.identity_verified = true;
          current = step.next;
        } else if step.fallback == Some(id) && !is_retry {
          reasked = Some(id);
        } else {
          return capture.stop("identity not verified");
        }
      }

      StepKind::Question { field, expects, when } => {
        if !when.holds(&capture) {
          current = step.next;
          continue;
        }
        let reply = match channel.ask(&prompt).await {
          Ok(r) => r,
          Err(e) => return capture.stop(e.to_string()),
        };
        match parse_answer(expects, &reply) {
          Ok(Some(answer)) => {
            capture.set(*field, answer);
            current = step.next;
          }
          // Optional question left blank.
          Ok(None) => current = step.next,
          Err(InvalidAnswer) if step.fallback == Some(id) && !is_retry => {
            reasked = Some(id);
          }
          Err(InvalidAnswer) => {
            capture.mark_unanswered(*field);
            current = match step.fallback {
              Some(f) if f != id => Some(f),
              _ => step.next,
            };
          }
        }
      }

      StepKind::Closing => {
        // The answers are already captured; a hang-up during the goodbye
        // does not invalidate them.
        let _ = channel.say(&prompt).await;
        capture.complete = capture.identity_verified;
        return capture;
      }
    }
  }

  capture.stop("dialogue script ended without a closing step")
}

fn identity_matches(reply: &Reply, on_record: NaiveDate) -> bool {
  matches!(
    parse_answer(&Expect::Date, reply),
    Ok(Some(Answer::Date(given))) if given == on_record
  )
}

#[cfg(test)]
mod tests;
