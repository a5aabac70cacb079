//! Materialises `pending` calls for recent discharges.

use std::sync::Arc;

use chrono::NaiveDate;
use jade_core::{
  call::{Call, NewCall},
  store::FollowupStore,
};
use tracing::{debug, info};

use crate::{Error, Policy, Result};

pub struct Scheduler<S> {
  store:  Arc<S>,
  policy: Arc<Policy>,
}

impl<S: FollowupStore> Scheduler<S> {
  pub fn new(store: Arc<S>, policy: Arc<Policy>) -> Self { Self { store, policy } }

  /// Create a call for every admission discharged inside the policy window
  /// that has none yet. Returns the calls created by this tick.
  ///
  /// Running ticks concurrently is safe: the store admits one call per
  /// admission and reports the losers as already scheduled.
  pub async fn tick(&self, today: NaiveDate) -> Result<Vec<Call>> {
    let (from, to) = self.policy.window(today);
    let admissions = self
      .store
      .unscheduled_admissions(from, to)
      .await
      .map_err(Error::store)?;

    let mut created = Vec::new();
    for admission in admissions {
      let patient = self
        .store
        .get_patient(&admission.patient_id)
        .await
        .map_err(Error::store)?;
      if patient.as_ref().and_then(|p| p.phone.as_ref()).is_none() {
        debug!(
          admission_id = %admission.admission_id,
          patient_id = %admission.patient_id,
          "no dialable patient for admission; skipping"
        );
        continue;
      }

      let input = NewCall {
        patient_id:   admission.patient_id.clone(),
        admission_id: admission.admission_id.clone(),
        scheduled_at: admission.discharged_at() + self.policy.call_offset(),
      };
      match self.store.schedule_call(input).await.map_err(Error::store)? {
        Some(call) => {
          info!(
            call_id = %call.call_id,
            admission_id = %call.admission_id,
            scheduled_at = %call.scheduled_at,
            "call scheduled"
          );
          created.push(call);
        }
        None => debug!(admission_id = %admission.admission_id, "already scheduled"),
      }
    }
    Ok(created)
  }
}
