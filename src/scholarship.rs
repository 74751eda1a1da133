//! Scholarship application lifecycle: pending, then approved or rejected.
//! There is no way back to pending.

use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{ApplicationStatus, Decision, Guarded, ScholarshipApplication};
use crate::store::ScholarshipStore;

pub async fn apply<S: ScholarshipStore>(
    store: &S,
    student_id: Uuid,
    scholarship_id: Uuid,
) -> Result<ScholarshipApplication, LedgerError> {
    if store.fetch_student(student_id).await?.is_none() {
        return Err(LedgerError::not_found("student", student_id));
    }
    if !store.scholarship_exists(scholarship_id).await? {
        return Err(LedgerError::not_found("scholarship", scholarship_id));
    }
    let application = store.insert_application(student_id, scholarship_id).await?;
    tracing::info!(
        application = %application.id,
        student = %student_id,
        scholarship = %scholarship_id,
        "scholarship application filed"
    );
    Ok(application)
}

pub async fn list_applications<S: ScholarshipStore>(
    store: &S,
    student_id: Uuid,
) -> Result<Vec<ScholarshipApplication>, LedgerError> {
    if store.fetch_student(student_id).await?.is_none() {
        return Err(LedgerError::not_found("student", student_id));
    }
    store.fetch_applications(student_id).await
}

pub fn pending_applications(applications: &[ScholarshipApplication]) -> usize {
    applications
        .iter()
        .filter(|app| app.status == ApplicationStatus::Pending)
        .count()
}

pub async fn decide<S: ScholarshipStore>(
    store: &S,
    application_id: Uuid,
    decision: Decision,
    notes: Option<&str>,
) -> Result<ScholarshipApplication, LedgerError> {
    let notes = notes.map(str::trim).filter(|notes| !notes.is_empty());
    match store
        .update_application_status(application_id, decision.status(), notes)
        .await?
    {
        Guarded::Applied(application) => {
            tracing::info!(
                application = %application_id,
                status = %application.status,
                "scholarship application decided"
            );
            Ok(application)
        }
        Guarded::Stale(current) => Err(LedgerError::InvalidState(format!(
            "application {application_id} is already {}",
            current.status
        ))),
    }
}

pub async fn save_notes<S: ScholarshipStore>(
    store: &S,
    application_id: Uuid,
    notes: &str,
) -> Result<ScholarshipApplication, LedgerError> {
    store
        .update_application_notes(application_id, notes.trim())
        .await?
        .ok_or_else(|| LedgerError::not_found("scholarship application", application_id))
}
