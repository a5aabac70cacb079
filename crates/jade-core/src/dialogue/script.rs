//! The step table.
//!
//! Each [`Step`] names its successor and its fallback. A fallback pointing at
//! the step itself means "re-ask once, with the reprompt"; a fallback pointing
//! elsewhere means "give up on this field and jump". New questions are new
//! rows, not new code.

use serde::{Deserialize, Serialize};

use super::{DialogueCapture, Field};
use crate::{Error, Result, patient::Patient};

pub type StepId = u8;

/// What a reply must look like to be accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expect {
  Scale { min: u8, max: u8 },
  YesNo { yes: Vec<String>, no: Vec<String> },
  Temperature { min: f32, max: f32 },
  Date,
  FreeText { max_len: usize, required: bool },
}

/// Guard on a question, evaluated against the answers captured so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "if", content = "args", rename_all = "snake_case")]
pub enum Condition {
  Always,
  /// Scale answer strictly above the bound.
  Above(Field, u8),
  /// Scale answer strictly below the bound.
  Below(Field, u8),
  /// Yes/no answer equal to the value.
  Is(Field, bool),
}

impl Condition {
  pub fn holds(&self, capture: &DialogueCapture) -> bool {
    match *self {
      Self::Always => true,
      Self::Above(f, n) => capture.scale(f).is_some_and(|v| v > n),
      Self::Below(f, n) => capture.scale(f).is_some_and(|v| v < n),
      Self::Is(f, b) => capture.flag(f) == Some(b),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
  /// Greeting; nothing is captured.
  Introduction,
  /// Date-of-birth check. Failing it ends the dialogue.
  Identity,
  Question {
    field:   Field,
    expects: Expect,
    when:    Condition,
  },
  Closing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
  pub id:       StepId,
  pub kind:     StepKind,
  /// Prompt template; see [`PromptContext::render`].
  pub prompt:   String,
  /// Used instead of `prompt` when the step is re-asked.
  pub reprompt: Option<String>,
  /// `None` ends the script.
  pub next:     Option<StepId>,
  pub fallback: Option<StepId>,
}

/// Values substituted into prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
  pub hospital_name:         String,
  /// Expected call length announced in the introduction.
  pub call_duration_minutes: u32,
}

impl Default for ScriptSettings {
  fn default() -> Self {
    Self { hospital_name: "the hospital".into(), call_duration_minutes: 3 }
  }
}

/// Per-call prompt substitutions.
#[derive(Debug, Clone)]
pub struct PromptContext {
  pub first_name: String,
  pub last_name:  String,
  pub hospital:   String,
  pub minutes:    u32,
}

impl PromptContext {
  pub fn for_patient(settings: &ScriptSettings, patient: &Patient) -> Self {
    Self {
      first_name: patient.first_name.clone(),
      last_name:  patient.last_name.clone(),
      hospital:   settings.hospital_name.clone(),
      minutes:    settings.call_duration_minutes,
    }
  }

  /// Replace `{first_name}`, `{last_name}`, `{hospital}` and `{minutes}`.
  pub fn render(&self, template: &str) -> String {
    template
      .replace("{first_name}", &self.first_name)
      .replace("{last_name}", &self.last_name)
      .replace("{hospital}", &self.hospital)
      .replace("{minutes}", &self.minutes.to_string())
  }
}

// ─── Script ──────────────────────────────────────────────────────────────────

/// A validated step table.
#[derive(Debug, Clone)]
pub struct Script {
  settings: ScriptSettings,
  steps:    Vec<Step>,
}

impl Script {
  /// Build a script, rejecting tables with dangling references, duplicate
  /// ids, or no closing step.
  pub fn new(settings: ScriptSettings, steps: Vec<Step>) -> Result<Self> {
    if steps.is_empty() {
      return Err(Error::InvalidScript("no steps".into()));
    }
    for (i, step) in steps.iter().enumerate() {
      if steps[..i].iter().any(|s| s.id == step.id) {
        return Err(Error::InvalidScript(format!("duplicate step {}", step.id)));
      }
      for target in [step.next, step.fallback].into_iter().flatten() {
        if !steps.iter().any(|s| s.id == target) {
          return Err(Error::InvalidScript(format!(
            "step {} points at missing step {target}",
            step.id
          )));
        }
      }
    }
    if !steps.iter().any(|s| s.kind == StepKind::Closing) {
      return Err(Error::InvalidScript("no closing step".into()));
    }
    Ok(Self { settings, steps })
  }

  pub fn first(&self) -> StepId { self.steps[0].id }

  pub fn step(&self, id: StepId) -> Option<&Step> {
    self.steps.iter().find(|s| s.id == id)
  }

  pub fn steps(&self) -> &[Step] { &self.steps }

  pub fn len(&self) -> usize { self.steps.len() }

  pub fn is_empty(&self) -> bool { self.steps.is_empty() }

  pub fn settings(&self) -> &ScriptSettings { &self.settings }

  /// The post-discharge follow-up script.
  pub fn standard(settings: ScriptSettings) -> Self {
    Self { settings, steps: standard_steps() }
  }
}

fn words(list: &[&str]) -> Vec<String> {
  list.iter().map(|w| (*w).to_owned()).collect()
}

fn yes_no(extra_yes: &[&str], extra_no: &[&str]) -> Expect {
  let mut yes = words(&["yes", "yeah", "yep", "correct", "oui", "ouais", "vrai"]);
  let mut no = words(&["no", "nope", "not", "never", "non", "jamais", "faux"]);
  yes.extend(words(extra_yes));
  // Multi-word negatives go first so they are stripped before "not".
  let mut extra = words(extra_no);
  extra.append(&mut no);
  no = extra;
  Expect::YesNo { yes, no }
}

fn question(
  id: StepId,
  field: Field,
  expects: Expect,
  when: Condition,
  prompt: &str,
  reprompt: Option<&str>,
  fallback: StepId,
) -> Step {
  Step {
    id,
    kind: StepKind::Question { field, expects, when },
    prompt: prompt.into(),
    reprompt: reprompt.map(Into::into),
    next: Some(id + 1),
    fallback: Some(fallback),
  }
}

fn standard_steps() -> Vec<Step> {
  use Condition::*;
  use Field::*;

  let scale = Expect::Scale { min: 0, max: 10 };
  let free = |max_len| Expect::FreeText { max_len, required: false };

  vec![
    Step {
      id:       1,
      kind:     StepKind::Introduction,
      prompt:   "Hello, this is Jade, the follow-up assistant of {hospital}. \
                 This call takes about {minutes} minutes and your answers are \
                 shared with your care team. I would like to speak with \
                 {first_name} {last_name}."
        .into(),
      reprompt: None,
      next:     Some(2),
      fallback: None,
    },
    Step {
      id:       2,
      kind:     StepKind::Identity,
      prompt:   "For your security, please tell me your date of birth: day, \
                 month, then year."
        .into(),
      reprompt: Some(
        "I could not confirm that date. Please say your date of birth again, \
         for example twelve, zero three, nineteen fifty-four."
          .into(),
      ),
      next:     Some(3),
      fallback: Some(2),
    },
    question(
      3,
      PainLevel,
      scale.clone(),
      Always,
      "On a scale from 0 to 10, how much pain do you have today?",
      Some("Please answer with a number between 0 and 10."),
      3,
    ),
    question(
      4,
      PainLocation,
      free(200),
      Above(PainLevel, 0),
      "Where does it hurt?",
      Some("In a few words, where does it hurt?"),
      4,
    ),
    question(
      5,
      TreatmentAdherence,
      yes_no(&["always", "toujours"], &[]),
      Always,
      "Are you taking your medication as prescribed? Please answer yes or no.",
      Some("Please answer yes or no: are you taking your medication?"),
      5,
    ),
    question(
      6,
      BowelNormal,
      yes_no(&["normal", "normally", "normalement"], &[
        "not normal",
        "not normally",
        "abnormal",
        "problem",
        "constipated",
        "diarrhea",
        "anormal",
        "problème",
        "constipé",
        "diarrhée",
      ]),
      Always,
      "Are you going to the toilet normally? Yes or no?",
      Some("Please answer yes or no: is your bowel function normal?"),
      6,
    ),
    question(
      7,
      BowelComplication,
      free(200),
      Is(BowelNormal, false),
      "What is the problem?",
      Some("In a few words, what is the problem?"),
      7,
    ),
    question(
      8,
      MoodLevel,
      scale,
      Always,
      "On a scale from 0 to 10, how is your morale today?",
      Some("Please answer with a number between 0 and 10."),
      8,
    ),
    question(
      9,
      MoodDetails,
      free(200),
      Below(MoodLevel, 7),
      "What are you feeling exactly?",
      Some("In a few words, how are you feeling?"),
      9,
    ),
    question(
      10,
      Fever,
      yes_no(&["fever", "fièvre", "feverish"], &[
        "no fever",
        "not feverish",
        "pas de fièvre",
      ]),
      Always,
      "Do you have a fever? Yes or no?",
      Some("Please answer yes or no: do you have a fever?"),
      10,
    ),
    question(
      11,
      Temperature,
      Expect::Temperature { min: 34.0, max: 43.0 },
      Is(Fever, true),
      "What is your temperature, in degrees Celsius?",
      Some(
        "Please say your temperature as a number, for example thirty-eight \
         point five.",
      ),
      11,
    ),
    question(
      12,
      OtherComplaints,
      free(200),
      Always,
      "Is there anything else you would like to report? One sentence is enough.",
      Some("Please keep it to one short sentence: anything else to report?"),
      12,
    ),
    Step {
      id:       13,
      kind:     StepKind::Closing,
      prompt:   "Thank you {first_name}. Your answers are being sent to your \
                 doctor. If needed, you will be contacted within 24 hours. \
                 Goodbye."
        .into(),
      reprompt: None,
      next:     None,
      fallback: None,
    },
  ]
}
