//! [`SqliteSource`]: a read-only [`HospitalSource`] over a SQLite export of
//! the hospital system.
//!
//! The export is expected to carry `patients` and `admissions` tables with the
//! same column names as the local mirrors. Identifiers may be stored as
//! integers or text; dates may carry a time part, which is ignored.

use std::path::Path;

use jade_core::{
  patient::{Admission, Patient},
  sync::HospitalSource,
};
use rusqlite::OpenFlags;

use crate::{
  Error, Result,
  encode::{RawAdmission, RawPatient, decode_date},
};

#[derive(Clone)]
pub struct SqliteSource {
  conn: tokio_rusqlite::Connection,
}

impl SqliteSource {
  /// Open the export read-only. The file must already exist.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_with_flags(
      path,
      OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .await?;
    Ok(Self { conn })
  }

  /// Wrap an already-open connection; used by tests to seed an in-memory
  /// export.
  pub fn from_connection(conn: tokio_rusqlite::Connection) -> Self { Self { conn } }
}

/// Leading `YYYY-MM-DD` of a date or datetime column.
fn source_date(table: &'static str, s: &str) -> Result<chrono::NaiveDate> {
  s.get(..10)
    .and_then(|d| decode_date(d).ok())
    .ok_or_else(|| Error::MalformedSource { table, message: format!("bad date {s:?}") })
}

impl HospitalSource for SqliteSource {
  type Error = Error;

  async fn patients(&self) -> Result<Vec<Patient>> {
    let raws: Vec<RawPatient> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT CAST(patient_id AS TEXT), first_name, last_name,
                  birth_date, CAST(phone AS TEXT)
           FROM patients",
        )?;
        let rows = stmt
          .query_map([], RawPatient::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|raw| {
        let birth_date = raw
          .birth_date
          .as_deref()
          .filter(|d| !d.trim().is_empty())
          .map(|d| source_date("patients", d))
          .transpose()?;
        Ok(Patient {
          patient_id: raw.patient_id,
          first_name: raw.first_name,
          last_name: raw.last_name,
          birth_date,
          phone: raw.phone.filter(|p| !p.trim().is_empty()),
        })
      })
      .collect()
  }

  async fn admissions(&self) -> Result<Vec<Admission>> {
    let raws: Vec<RawAdmission> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT CAST(admission_id AS TEXT), CAST(patient_id AS TEXT),
                  discharge_date, service, physician, site
           FROM admissions",
        )?;
        let rows = stmt
          .query_map([], RawAdmission::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|raw| {
        let discharge_date = source_date("admissions", &raw.discharge_date)?;
        Ok(Admission {
          admission_id: raw.admission_id,
          patient_id: raw.patient_id,
          discharge_date,
          service: raw.service,
          physician: raw.physician,
          site: raw.site,
        })
      })
      .collect()
  }
}
