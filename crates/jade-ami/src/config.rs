use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

/// Connection and dialling settings for the telephony manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
  pub host:                   String,
  pub port:                   u16,
  pub username:               String,
  pub secret:                 String,
  /// Dialplan context the answered leg is sent into.
  pub context:                String,
  /// Dial string; `{number}` is replaced by the patient's phone number.
  pub channel_template:       String,
  /// Caller ID name presented to the patient.
  pub caller_id:              String,
  /// Fixed extension. When unset, each call gets `8` followed by the last
  /// six hex digits of its id.
  pub exten:                  Option<String>,
  pub login_timeout_secs:     u64,
  /// How long the far end may ring before the manager gives up.
  pub originate_timeout_secs: u64,
  /// Silence after a prompt before the reply counts as no input.
  pub reply_timeout_secs:     u64,
}

impl Default for ManagerConfig {
  fn default() -> Self {
    Self {
      host:                   "127.0.0.1".into(),
      port:                   5038,
      username:               "jade".into(),
      secret:                 String::new(),
      context:                "jade-followup".into(),
      channel_template:       "SIP/{number}".into(),
      caller_id:              "Jade".into(),
      exten:                  None,
      login_timeout_secs:     10,
      originate_timeout_secs: 30,
      reply_timeout_secs:     15,
    }
  }
}

impl ManagerConfig {
  pub fn login_timeout(&self) -> Duration { Duration::from_secs(self.login_timeout_secs) }

  pub fn originate_timeout(&self) -> Duration {
    Duration::from_secs(self.originate_timeout_secs)
  }

  pub fn reply_timeout(&self) -> Duration { Duration::from_secs(self.reply_timeout_secs) }

  /// Ring time plus the login timeout as slack for call setup.
  pub fn answer_timeout(&self) -> Duration {
    self.originate_timeout() + self.login_timeout()
  }

  pub fn channel_for(&self, number: &str) -> String {
    let digits: String = number.chars().filter(|c| !c.is_whitespace()).collect();
    self.channel_template.replace("{number}", &digits)
  }

  pub fn exten_for(&self, call_id: Uuid) -> String {
    if let Some(exten) = &self.exten {
      return exten.clone();
    }
    let hex = call_id.simple().to_string();
    format!("8{}", &hex[hex.len() - 6..])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dial_string_strips_spaces() {
    let config = ManagerConfig::default();
    assert_eq!(config.channel_for("06 01 02 03 04"), "SIP/0601020304");
  }

  #[test]
  fn extension_derived_from_call_id() {
    let config = ManagerConfig::default();
    let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
    assert_eq!(config.exten_for(id), "85fe0c8");

    let fixed = ManagerConfig { exten: Some("s".into()), ..ManagerConfig::default() };
    assert_eq!(fixed.exten_for(id), "s");
  }
}
