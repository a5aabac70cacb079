//! Typed call events.
//!
//! The manager pushes every event on the system down the same connection.
//! [`classify`] keeps the ones about our leg and folds them into four kinds;
//! everything else, including events with unknown names, is dropped.

use crate::codec::Block;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
  /// The far end is ringing.
  Connected,
  Answered,
  Failed(String),
  HungUp,
}

/// Identifiers of the leg this session originated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leg {
  /// Uniqueid we asked the manager to assign (`ChannelId` on Originate).
  pub channel_id: String,
  /// ActionID of the Originate action; async originate results carry it.
  pub action_id:  String,
  /// Channel name, learned from the first event that names it.
  pub channel:    Option<String>,
}

impl Leg {
  /// Whether `block` is about this leg.
  pub fn owns(&self, block: &Block) -> bool {
    let by_id = ["Uniqueid", "DestUniqueid"]
      .iter()
      .any(|k| block.get(k) == Some(self.channel_id.as_str()));
    let by_action = block.event().is_some()
      && block.action_id() == Some(self.action_id.as_str());
    by_id || by_action
  }

  /// Remember the channel name the first time an event carries one.
  pub(crate) fn learn_channel(&mut self, block: &Block) {
    if self.channel.is_some() {
      return;
    }
    let name = if block.get("DestUniqueid") == Some(self.channel_id.as_str()) {
      block.get("DestChannel")
    } else if block.get("Uniqueid") == Some(self.channel_id.as_str()) {
      block.get("Channel")
    } else {
      None
    };
    self.channel = name.map(str::to_owned);
  }
}

/// Map an event block about our leg to a [`CallEvent`].
pub fn classify(block: &Block) -> Option<CallEvent> {
  match block.event()? {
    "Newstate" => match block.get("ChannelStateDesc")? {
      "Ringing" | "Ring" => Some(CallEvent::Connected),
      "Up" => Some(CallEvent::Answered),
      _ => None,
    },
    "DialBegin" => Some(CallEvent::Connected),
    "DialEnd" => match block.get("DialStatus").unwrap_or("UNKNOWN") {
      "ANSWER" => Some(CallEvent::Answered),
      other => Some(CallEvent::Failed(dial_status_reason(other))),
    },
    "OriginateResponse" => match block.response() {
      Some("Success") => Some(CallEvent::Answered),
      _ => Some(CallEvent::Failed(originate_reason(block.get("Reason")))),
    },
    "Hangup" => Some(CallEvent::HungUp),
    _ => None,
  }
}

fn dial_status_reason(status: &str) -> String {
  match status {
    "NOANSWER" => "no answer".into(),
    "BUSY" => "busy".into(),
    "CONGESTION" => "congestion".into(),
    "CHANUNAVAIL" => "channel unavailable".into(),
    "CANCEL" => "cancelled".into(),
    other => format!("dial ended with {other}"),
  }
}

/// Originate failure reasons are numeric control-frame codes.
fn originate_reason(code: Option<&str>) -> String {
  match code {
    Some("0") => "no such extension or number".into(),
    Some("1") => "hung up before answer".into(),
    Some("3") => "no answer".into(),
    Some("5") => "busy".into(),
    Some("8") => "congestion".into(),
    Some(other) => format!("originate failed (reason {other})"),
    None => "originate failed".into(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn leg() -> Leg {
    Leg { channel_id: "leg-1".into(), action_id: "jade-2".into(), channel: None }
  }

  fn event(name: &str) -> Block { Block::default().with("Event", name) }

  #[test]
  fn state_changes() {
    let ringing = event("Newstate").with("ChannelStateDesc", "Ringing");
    assert_eq!(classify(&ringing), Some(CallEvent::Connected));
    let up = event("Newstate").with("ChannelStateDesc", "Up");
    assert_eq!(classify(&up), Some(CallEvent::Answered));
    let down = event("Newstate").with("ChannelStateDesc", "Down");
    assert_eq!(classify(&down), None);
  }

  #[test]
  fn dial_outcomes() {
    assert_eq!(classify(&event("DialBegin")), Some(CallEvent::Connected));
    assert_eq!(
      classify(&event("DialEnd").with("DialStatus", "ANSWER")),
      Some(CallEvent::Answered)
    );
    assert_eq!(
      classify(&event("DialEnd").with("DialStatus", "BUSY")),
      Some(CallEvent::Failed("busy".into()))
    );
  }

  #[test]
  fn originate_failure_reason() {
    let failure = event("OriginateResponse")
      .with("Response", "Failure")
      .with("Reason", "3");
    assert_eq!(classify(&failure), Some(CallEvent::Failed("no answer".into())));
  }

  #[test]
  fn unknown_events_are_ignored() {
    assert_eq!(classify(&event("VarSet")), None);
    assert_eq!(classify(&event("SomeFutureEvent")), None);
    assert_eq!(classify(&Block::default().with("Response", "Success")), None);
  }

  #[test]
  fn ownership_by_uniqueid_or_action() {
    let leg = leg();
    assert!(leg.owns(&event("Hangup").with("Uniqueid", "leg-1")));
    assert!(leg.owns(&event("DialEnd").with("DestUniqueid", "leg-1")));
    assert!(leg.owns(&event("OriginateResponse").with("ActionID", "jade-2")));
    assert!(!leg.owns(&event("Hangup").with("Uniqueid", "someone-else")));
    // A plain response with our ActionID is not an event about the leg.
    assert!(!leg.owns(&Block::default().with("Response", "Success").with("ActionID", "jade-2")));
  }

  #[test]
  fn channel_name_is_learned_once() {
    let mut leg = leg();
    leg.learn_channel(
      &event("Newstate").with("Uniqueid", "leg-1").with("Channel", "SIP/0601-0001"),
    );
    leg.learn_channel(
      &event("Newstate").with("Uniqueid", "leg-1").with("Channel", "SIP/other"),
    );
    assert_eq!(leg.channel.as_deref(), Some("SIP/0601-0001"));
  }
}
