//! Alerts derived from call and sync state.
//!
//! Nothing here is persisted: an alert exists for as long as its trigger does.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  call::{Call, CallStatus},
  scoring::Urgency,
  sync::{Freshness, MirrorTable},
};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
  Info,
  Warning,
  Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
  /// A completed call scored at or above the alerting urgency.
  PatientUrgency,
  /// A call failed on its last permitted attempt.
  AttemptsExhausted,
  /// A mirrored table is older than the staleness threshold.
  StaleSync,
  /// The telephony manager rejected our credentials; dispatch is suspended.
  ManagerAuthentication,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
  pub kind:            AlertKind,
  pub severity:        Severity,
  pub description:     String,
  pub required_action: String,
  pub raised_at:       DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub call_id:         Option<Uuid>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub patient_id:      Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub table:           Option<MirrorTable>,
}

impl Alert {
  /// Alerts raised by a single call: its urgency when at or above
  /// `threshold`, and exhaustion of its attempt budget.
  pub fn for_call(call: &Call, threshold: Urgency, max_attempts: u32) -> Vec<Self> {
    let mut alerts = Vec::new();

    let alerting = call
      .score
      .as_ref()
      .filter(|a| call.status == CallStatus::Called && a.urgency >= threshold);
    if let Some(assessment) = alerting {
      let severity = match assessment.urgency {
        Urgency::Critical => Severity::Critical,
        _ => Severity::Warning,
      };
      let mut description = format!(
        "follow-up call scored {:.0} ({})",
        assessment.score, assessment.urgency
      );
      if !assessment.matched_keywords.is_empty() {
        description.push_str(&format!(
          "; reported: {}",
          assessment.matched_keywords.join(", ")
        ));
      }
      alerts.push(Self {
        kind: AlertKind::PatientUrgency,
        severity,
        description,
        required_action: match assessment.urgency {
          Urgency::Critical => "Call the patient back immediately.".into(),
          _ => "Have a nurse call the patient back within 24 hours.".into(),
        },
        raised_at: call.updated_at,
        call_id: Some(call.call_id),
        patient_id: Some(call.patient_id.clone()),
        table: None,
      });
    }

    if call.is_exhausted(max_attempts) {
      alerts.push(Self {
        kind:            AlertKind::AttemptsExhausted,
        severity:        Severity::Warning,
        description:     format!(
          "no successful follow-up after {} attempts: {}",
          call.attempt_count,
          call.last_error.as_deref().unwrap_or("unknown error")
        ),
        required_action: "Contact the patient manually.".into(),
        raised_at:       call.updated_at,
        call_id:         Some(call.call_id),
        patient_id:      Some(call.patient_id.clone()),
        table:           None,
      });
    }

    alerts
  }

  pub fn stale_sync(
    table: MirrorTable,
    freshness: Freshness,
    now: DateTime<Utc>,
  ) -> Option<Self> {
    if !freshness.is_stale {
      return None;
    }
    let description = match freshness.age_minutes {
      Some(age) => format!("{table} last synced {age} minutes ago"),
      None => format!("{table} has never synced"),
    };
    Some(Self {
      kind: AlertKind::StaleSync,
      severity: Severity::Warning,
      description,
      required_action: "Check connectivity to the hospital system; scheduling \
                        decisions may be based on outdated admissions."
        .into(),
      raised_at: now,
      call_id: None,
      patient_id: None,
      table: Some(table),
    })
  }

  pub fn manager_authentication(reason: &str, since: DateTime<Utc>) -> Self {
    Self {
      kind:            AlertKind::ManagerAuthentication,
      severity:        Severity::Critical,
      description:     format!("telephony manager rejected login: {reason}"),
      required_action: "Fix the manager credentials, then resume dispatch."
        .into(),
      raised_at:       since,
      call_id:         None,
      patient_id:      None,
      table:           None,
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;
  use crate::scoring::{Assessment, Urgency};

  fn call(status: CallStatus, attempts: u32) -> Call {
    let now = Utc::now();
    Call {
      call_id:         Uuid::new_v4(),
      patient_id:      "P-1".into(),
      admission_id:    "A-1".into(),
      status,
      scheduled_at:    now,
      actual_at:       None,
      attempt_count:   attempts,
      duration_secs:   None,
      dialogue_result: None,
      score:           None,
      last_error:      Some("no answer".into()),
      last_partial:    None,
      created_at:      now,
      updated_at:      now,
    }
  }

  fn scored(urgency: Urgency) -> Call {
    let mut c = call(CallStatus::Called, 1);
    c.score = Some(Assessment {
      score: 75.0,
      urgency,
      breakdown: Vec::new(),
      matched_keywords: vec!["bleeding".into()],
    });
    c
  }

  #[test]
  fn urgency_at_threshold_alerts() {
    let alerts = Alert::for_call(&scored(Urgency::High), Urgency::High, 3);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::PatientUrgency);
    assert_eq!(alerts[0].severity, Severity::Warning);
    assert!(alerts[0].description.contains("bleeding"));

    let alerts = Alert::for_call(&scored(Urgency::Critical), Urgency::High, 3);
    assert_eq!(alerts[0].severity, Severity::Critical);

    assert!(Alert::for_call(&scored(Urgency::Medium), Urgency::High, 3).is_empty());
  }

  #[test]
  fn exhausted_call_alerts_once() {
    let alerts = Alert::for_call(&call(CallStatus::Failed, 3), Urgency::High, 3);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::AttemptsExhausted);
    assert!(alerts[0].description.contains("no answer"));

    assert!(Alert::for_call(&call(CallStatus::Failed, 2), Urgency::High, 3).is_empty());
    assert!(Alert::for_call(&call(CallStatus::Pending, 2), Urgency::High, 3).is_empty());
  }

  #[test]
  fn stale_tables_alert() {
    let now = Utc::now();
    let stale = crate::sync::freshness(
      Some(now - Duration::minutes(30)),
      now,
      Duration::minutes(10),
    );
    let alert = Alert::stale_sync(MirrorTable::Patients, stale, now).unwrap();
    assert_eq!(alert.table, Some(MirrorTable::Patients));
    assert!(alert.description.contains("30 minutes"));

    let fresh = crate::sync::freshness(Some(now), now, Duration::minutes(10));
    assert!(Alert::stale_sync(MirrorTable::Patients, fresh, now).is_none());
  }
}
