//! Mirrored source-system records.
//!
//! Patients and admissions are owned by the hospital system. The operational
//! store holds a read-only copy that the reconciler replaces wholesale on
//! every cycle; nothing in the engine ever edits a single row.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A patient as known to the hospital system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
  /// Source-system identifier; stable across sync cycles.
  pub patient_id: String,
  pub first_name: String,
  pub last_name:  String,
  pub birth_date: Option<NaiveDate>,
  /// Dialable number. Patients without one are mirrored but never called.
  pub phone:      Option<String>,
}

/// A hospital stay. Every call references exactly one admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
  /// Source-system identifier; stable across sync cycles.
  pub admission_id:   String,
  pub patient_id:     String,
  pub discharge_date: NaiveDate,
  /// Attending service, e.g. "Orthopedics".
  pub service:        Option<String>,
  pub physician:      Option<String>,
  pub site:           Option<String>,
}

impl Admission {
  /// Midnight UTC on the discharge date; the anchor for the call offset.
  pub fn discharged_at(&self) -> DateTime<Utc> {
    self.discharge_date.and_time(NaiveTime::MIN).and_utc()
  }
}
