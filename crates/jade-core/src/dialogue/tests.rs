use std::collections::VecDeque;

use chrono::NaiveDate;

use super::*;
use crate::patient::Patient;

#[derive(Debug, thiserror::Error)]
#[error("hung up")]
struct HungUp;

/// Plays back canned replies; running out of replies is a hang-up.
struct Scripted {
  replies: VecDeque<Reply>,
  heard:   Vec<String>,
}

impl Scripted {
  fn new(replies: &[&str]) -> Self {
    Self {
      replies: replies
        .iter()
        .map(|r| {
          if r.is_empty() { Reply::NoInput } else { Reply::Text((*r).to_owned()) }
        })
        .collect(),
      heard:   Vec::new(),
    }
  }
}

impl DialogueChannel for Scripted {
  type Error = HungUp;

  async fn say(&mut self, text: &str) -> Result<(), HungUp> {
    self.heard.push(text.to_owned());
    Ok(())
  }

  async fn ask(&mut self, prompt: &str) -> Result<Reply, HungUp> {
    self.heard.push(prompt.to_owned());
    self.replies.pop_front().ok_or(HungUp)
  }
}

fn patient() -> Patient {
  Patient {
    patient_id: "P-1".into(),
    first_name: "Marie".into(),
    last_name:  "Durand".into(),
    birth_date: NaiveDate::from_ymd_opt(1954, 3, 12),
    phone:      Some("0601020304".into()),
  }
}

fn script() -> Script {
  Script::standard(ScriptSettings {
    hospital_name:         "Saint-Louis".into(),
    call_duration_minutes: 4,
  })
}

// ─── Happy path ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_run_captures_every_answer() {
  let mut line = Scripted::new(&[
    "12/03/1954",
    "7",
    "my left knee",
    "yes",
    "yes",
    "8",
    "no",
    "nothing else",
  ]);
  let capture = run(&script(), &mut line, &patient()).await;

  assert!(capture.complete);
  assert!(capture.identity_verified);
  assert_eq!(capture.pain_level, Some(7));
  assert_eq!(capture.pain_location.as_deref(), Some("my left knee"));
  assert_eq!(capture.treatment_adherence, Some(true));
  assert_eq!(capture.bowel_normal, Some(true));
  assert_eq!(capture.mood_level, Some(8));
  // Mood of 8 does not trigger the details question.
  assert_eq!(capture.mood_details, None);
  assert_eq!(capture.fever, Some(false));
  assert_eq!(capture.temperature_c, None);
  assert_eq!(capture.other_complaints.as_deref(), Some("nothing else"));
  assert!(capture.unanswered.is_empty());
  assert_eq!(capture.ended_early, None);
}

#[tokio::test]
async fn prompts_are_personalised() {
  let mut line = Scripted::new(&["12/03/1954", "0", "yes", "yes", "9", "no", ""]);
  run(&script(), &mut line, &patient()).await;

  let intro = &line.heard[0];
  assert!(intro.contains("Saint-Louis"), "{intro}");
  assert!(intro.contains("Marie Durand"), "{intro}");
  assert!(intro.contains("4 minutes"), "{intro}");
  assert!(line.heard.last().unwrap().starts_with("Thank you Marie"));
}

// ─── Identity ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn wrong_birth_date_is_reasked_once_then_ends_the_call() {
  let mut line = Scripted::new(&["01/01/2000", "02/02/2000", "5"]);
  let capture = run(&script(), &mut line, &patient()).await;

  assert!(!capture.complete);
  assert!(!capture.identity_verified);
  assert_eq!(capture.ended_early.as_deref(), Some("identity not verified"));
  assert_eq!(capture.pain_level, None);
  // Intro, question, reprompt; nothing after.
  assert_eq!(line.heard.len(), 3);
  assert!(line.heard[2].starts_with("I could not confirm"));
}

#[tokio::test]
async fn silence_on_identity_gets_a_second_chance() {
  let mut line = Scripted::new(&["", "12 03 1954", "0", "yes", "yes", "9", "no", ""]);
  let capture = run(&script(), &mut line, &patient()).await;
  assert!(capture.identity_verified);
  assert!(capture.complete);
}

#[tokio::test]
async fn patient_without_birth_date_is_never_verified() {
  let mut p = patient();
  p.birth_date = None;
  let mut line = Scripted::new(&["01/01/1970", "0", "yes", "yes", "9", "no", ""]);
  let capture = run(&script(), &mut line, &p).await;

  assert!(!capture.complete);
  assert!(!capture.identity_verified);
  assert!(capture.ended_early.unwrap().contains("no birth date on record"));
  // Only the introduction; no date is asked for.
  assert_eq!(line.heard.len(), 1);
}

// ─── Fallbacks and conditions ────────────────────────────────────────────────

#[tokio::test]
async fn unparseable_pain_is_reasked_then_marked_unanswered() {
  let mut line = Scripted::new(&[
    "12/03/1954",
    "a lot",
    "really bad",
    "yes",
    "yes",
    "9",
    "no",
    "",
  ]);
  let capture = run(&script(), &mut line, &patient()).await;

  assert!(capture.complete);
  assert_eq!(capture.pain_level, None);
  assert_eq!(capture.unanswered, vec![Field::PainLevel]);
  // The location question depends on a pain answer and is skipped.
  assert_eq!(capture.pain_location, None);
  assert!(line.heard[3].starts_with("Please answer with a number"));
}

#[tokio::test]
async fn follow_up_questions_fire_on_their_conditions() {
  let mut line = Scripted::new(&[
    "12/03/1954",
    "zero",
    "oui",
    "non, constipé",
    "constipation since Monday",
    "3",
    "tired",
    "oui",
    "38,5",
    "",
  ]);
  let capture = run(&script(), &mut line, &patient()).await;

  assert!(capture.complete);
  assert_eq!(capture.pain_level, Some(0));
  assert_eq!(capture.pain_location, None);
  assert_eq!(capture.bowel_normal, Some(false));
  assert_eq!(
    capture.bowel_complication.as_deref(),
    Some("constipation since Monday")
  );
  assert_eq!(capture.mood_level, Some(3));
  assert_eq!(capture.mood_details.as_deref(), Some("tired"));
  assert_eq!(capture.fever, Some(true));
  assert_eq!(capture.temperature_c, Some(38.5));
  assert_eq!(capture.other_complaints, None);
  assert!(capture.unanswered.is_empty());
}

#[tokio::test]
async fn invalid_temperature_is_reasked_once() {
  let mut line = Scripted::new(&[
    "12/03/1954",
    "0",
    "yes",
    "yes",
    "9",
    "yes",
    "hot",
    "38.9",
    "",
  ]);
  let capture = run(&script(), &mut line, &patient()).await;
  assert!(capture.complete);
  assert_eq!(capture.temperature_c, Some(38.9));
  assert!(capture.unanswered.is_empty());
  assert!(line.heard.iter().any(|h| h.starts_with("Please say your temperature")));
}

#[tokio::test]
async fn temperature_is_unanswered_after_two_bad_replies() {
  let mut line = Scripted::new(&[
    "12/03/1954",
    "0",
    "yes",
    "yes",
    "9",
    "yes",
    "hot",
    "very hot",
    "",
  ]);
  let capture = run(&script(), &mut line, &patient()).await;
  assert!(capture.complete);
  assert_eq!(capture.temperature_c, None);
  assert_eq!(capture.unanswered, vec![Field::Temperature]);
}

#[tokio::test]
async fn overlong_free_text_is_reasked() {
  let rambling = "it hurts ".repeat(40);
  let mut line = Scripted::new(&[
    "12/03/1954",
    "4",
    rambling.as_str(),
    "left knee",
    "yes",
    "yes",
    "9",
    "no",
    "",
  ]);
  let capture = run(&script(), &mut line, &patient()).await;
  assert!(capture.complete);
  assert_eq!(capture.pain_location.as_deref(), Some("left knee"));
  assert!(line.heard.iter().any(|h| h.starts_with("In a few words, where")));
}

// ─── Early termination ───────────────────────────────────────────────────────

#[tokio::test]
async fn hang_up_mid_script_returns_partial_capture() {
  let mut line = Scripted::new(&["12/03/1954", "6", "back"]);
  let capture = run(&script(), &mut line, &patient()).await;

  assert!(!capture.complete);
  assert!(capture.identity_verified);
  assert_eq!(capture.pain_level, Some(6));
  assert_eq!(capture.pain_location.as_deref(), Some("back"));
  assert_eq!(capture.ended_early.as_deref(), Some("hung up"));
}

#[test]
fn dangling_step_reference_is_rejected() {
  let steps = vec![Step {
    id:       1,
    kind:     StepKind::Closing,
    prompt:   "bye".into(),
    reprompt: None,
    next:     Some(9),
    fallback: None,
  }];
  assert!(matches!(
    Script::new(ScriptSettings::default(), steps),
    Err(crate::Error::InvalidScript(_))
  ));
}

#[test]
fn standard_script_is_well_formed() {
  let standard = script();
  let rebuilt = Script::new(standard.settings().clone(), standard.steps().to_vec());
  assert!(rebuilt.is_ok());
  assert_eq!(standard.len(), 13);
}
