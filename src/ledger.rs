//! Certificate verification and points ledger.
//!
//! [`Ledger`] is the only mutation surface for certificates. Each mutation is
//! delegated to a single store transaction that also rewrites the owner's
//! cached total, so a failed write leaves both untouched.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{
    Certificate, Committed, Guarded, NewCertificate, Progress, Student, StudentSummary,
    TotalDrift, VerificationState,
};
use crate::points;
use crate::store::{CertificateStore, ObjectStorage};

pub struct Ledger<S, B> {
    store: S,
    bucket: B,
    required_points: i32,
}

impl<S, B> Ledger<S, B>
where
    S: CertificateStore,
    B: ObjectStorage,
{
    pub fn new(store: S, bucket: B) -> Self {
        Self {
            store,
            bucket,
            required_points: points::REQUIRED_POINTS,
        }
    }

    pub fn with_required_points(mut self, required_points: i32) -> Self {
        self.required_points = required_points;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bucket(&self) -> &B {
        &self.bucket
    }

    pub fn required_points(&self) -> i32 {
        self.required_points
    }

    pub async fn list_certificates(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<Certificate>, LedgerError> {
        self.require_student(student_id).await?;
        self.store.fetch_certificates(student_id).await
    }

    /// Uploads a certificate file and records it as pending. Without explicit
    /// points the file name is classified with [`points::default_points_for`].
    pub async fn submit_certificate(
        &self,
        student_id: Uuid,
        file_name: &str,
        bytes: &[u8],
        explicit_points: Option<i32>,
    ) -> Result<Certificate, LedgerError> {
        let file_name = sanitize_file_name(file_name)?;
        if let Some(points) = explicit_points {
            validate_points(points)?;
        }
        if bytes.is_empty() {
            return Err(LedgerError::Validation(format!("{file_name} is empty")));
        }
        self.require_student(student_id).await?;

        let points = explicit_points.unwrap_or_else(|| points::default_points_for(&file_name));
        let key = format!("{}-{}", Utc::now().timestamp_millis(), file_name);
        let file_url = self.bucket.upload(&key, bytes).await?;

        let inserted = self
            .store
            .insert_certificate(NewCertificate {
                student_id,
                file_url,
                points,
            })
            .await;
        match inserted {
            Ok(committed) => {
                tracing::info!(
                    certificate = %committed.certificate.id,
                    student = %student_id,
                    points,
                    "certificate submitted"
                );
                Ok(committed.certificate)
            }
            Err(err) => {
                if let Err(cleanup) = self.bucket.remove(&key).await {
                    tracing::warn!(object = %key, error = %cleanup, "orphaned certificate upload");
                }
                Err(err)
            }
        }
    }

    pub async fn set_points(
        &self,
        certificate_id: Uuid,
        new_points: i32,
    ) -> Result<Certificate, LedgerError> {
        validate_points(new_points)?;
        match self.store.update_points(certificate_id, new_points).await? {
            Guarded::Applied(committed) => {
                tracing::info!(
                    certificate = %certificate_id,
                    points = new_points,
                    total = committed.total,
                    "certificate points updated"
                );
                Ok(committed.certificate)
            }
            Guarded::Stale(_) => Err(LedgerError::InvalidState(format!(
                "certificate {certificate_id} is verified; its points are frozen"
            ))),
        }
    }

    /// Flips the verification state, provided it is still `expected_prior`.
    /// A caller working from an outdated read gets `Conflict` and nothing is
    /// applied.
    pub async fn toggle_verification(
        &self,
        certificate_id: Uuid,
        expected_prior: VerificationState,
    ) -> Result<Committed, LedgerError> {
        let target = expected_prior.flipped();
        match self
            .store
            .update_verification(certificate_id, expected_prior, target)
            .await?
        {
            Guarded::Applied(committed) => {
                tracing::info!(
                    certificate = %certificate_id,
                    state = %target,
                    total = committed.total,
                    "certificate verification toggled"
                );
                Ok(committed)
            }
            Guarded::Stale(current) => {
                tracing::warn!(
                    certificate = %certificate_id,
                    expected = %expected_prior,
                    found = %current.state,
                    "rejected stale verification toggle"
                );
                Err(LedgerError::Conflict(format!(
                    "certificate {certificate_id} is {}, expected {expected_prior}",
                    current.state
                )))
            }
        }
    }

    /// Moves a certificate to `target`. Already being there is a no-op.
    pub async fn set_verification(
        &self,
        certificate_id: Uuid,
        target: VerificationState,
    ) -> Result<Committed, LedgerError> {
        let current = self.require_certificate(certificate_id).await?;
        if current.state == target {
            return self.unchanged(current).await;
        }
        match self
            .store
            .update_verification(certificate_id, current.state, target)
            .await?
        {
            Guarded::Applied(committed) => {
                tracing::info!(
                    certificate = %certificate_id,
                    state = %target,
                    total = committed.total,
                    "certificate verification set"
                );
                Ok(committed)
            }
            // Someone else moved it to the same place first.
            Guarded::Stale(now) if now.state == target => self.unchanged(now).await,
            Guarded::Stale(now) => Err(LedgerError::Conflict(format!(
                "certificate {certificate_id} changed to {} during update",
                now.state
            ))),
        }
    }

    /// Removes a pending certificate and its stored file.
    pub async fn withdraw_certificate(
        &self,
        certificate_id: Uuid,
    ) -> Result<Committed, LedgerError> {
        match self.store.delete_pending(certificate_id).await? {
            Guarded::Applied(committed) => {
                let key = committed.certificate.storage_key().to_string();
                if let Err(err) = self.bucket.remove(&key).await {
                    tracing::warn!(
                        object = %key,
                        error = %err,
                        "failed to remove certificate file"
                    );
                }
                tracing::info!(
                    certificate = %certificate_id,
                    total = committed.total,
                    "certificate withdrawn"
                );
                Ok(committed)
            }
            Guarded::Stale(_) => Err(LedgerError::InvalidState(format!(
                "certificate {certificate_id} is verified and cannot be withdrawn"
            ))),
        }
    }

    /// Sum of verified points, written over the student's cached total.
    pub async fn recompute_total(&self, student_id: Uuid) -> Result<i32, LedgerError> {
        self.store.refresh_total(student_id).await
    }

    pub async fn progress(&self, student_id: Uuid) -> Result<Progress, LedgerError> {
        let certificates = self.list_certificates(student_id).await?;
        Ok(points::progress(&certificates, self.required_points))
    }

    pub async fn summaries(
        &self,
        class_name: Option<&str>,
    ) -> Result<Vec<StudentSummary>, LedgerError> {
        let students = self.store.fetch_students(class_name).await?;
        let grouped = self.certificates_by_student(&students).await?;
        Ok(students
            .into_iter()
            .map(|student| {
                let certs = grouped.get(&student.id).map(Vec::as_slice).unwrap_or(&[]);
                StudentSummary {
                    student_id: student.id,
                    ktu_id: student.ktu_id,
                    full_name: student.full_name,
                    class_name: student.class_name,
                    total_points: points::verified_total(certs),
                    verified_certificates: points::verified_count(certs),
                    pending_certificates: points::pending_count(certs),
                }
            })
            .collect())
    }

    /// Students whose cached total no longer matches their certificates.
    pub async fn audit_totals(
        &self,
        class_name: Option<&str>,
    ) -> Result<Vec<TotalDrift>, LedgerError> {
        let students = self.store.fetch_students(class_name).await?;
        let grouped = self.certificates_by_student(&students).await?;
        Ok(students
            .into_iter()
            .filter_map(|student| {
                let certs = grouped.get(&student.id).map(Vec::as_slice).unwrap_or(&[]);
                let recomputed = points::verified_total(certs);
                (recomputed != student.total_activity_point).then(|| TotalDrift {
                    student_id: student.id,
                    full_name: student.full_name,
                    cached: student.total_activity_point,
                    recomputed,
                })
            })
            .collect())
    }

    /// Recomputes every drifted total. Returns the drift that was found.
    pub async fn repair_totals(
        &self,
        class_name: Option<&str>,
    ) -> Result<Vec<TotalDrift>, LedgerError> {
        let drift = self.audit_totals(class_name).await?;
        for entry in &drift {
            let total = self.recompute_total(entry.student_id).await?;
            tracing::info!(
                student = %entry.student_id,
                cached = entry.cached,
                total,
                "repaired cached activity total"
            );
        }
        Ok(drift)
    }

    /// Reports a certificate that needs no change, with the total derived
    /// from its owner's current rows. Nothing is written.
    async fn unchanged(&self, certificate: Certificate) -> Result<Committed, LedgerError> {
        let certificates = self.store.fetch_certificates(certificate.student_id).await?;
        Ok(Committed {
            total: points::verified_total(&certificates),
            certificate,
        })
    }

    async fn certificates_by_student(
        &self,
        students: &[Student],
    ) -> Result<HashMap<Uuid, Vec<Certificate>>, LedgerError> {
        let ids: Vec<Uuid> = students.iter().map(|student| student.id).collect();
        let mut grouped: HashMap<Uuid, Vec<Certificate>> = HashMap::new();
        if ids.is_empty() {
            return Ok(grouped);
        }
        for cert in self.store.certificates_for_students(&ids).await? {
            grouped.entry(cert.student_id).or_default().push(cert);
        }
        Ok(grouped)
    }

    async fn require_student(&self, student_id: Uuid) -> Result<Student, LedgerError> {
        self.store
            .fetch_student(student_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("student", student_id))
    }

    async fn require_certificate(&self, certificate_id: Uuid) -> Result<Certificate, LedgerError> {
        self.store
            .fetch_certificate(certificate_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("certificate", certificate_id))
    }
}

fn validate_points(points: i32) -> Result<(), LedgerError> {
    if points < 0 {
        return Err(LedgerError::Validation(format!(
            "points must be non-negative, got {points}"
        )));
    }
    Ok(())
}

/// Keeps the final path component, turns whitespace into underscores and
/// drops anything that is not alphanumeric, `.`, `-` or `_`.
fn sanitize_file_name(raw: &str) -> Result<String, LedgerError> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .trim()
        .chars()
        .filter_map(|c| match c {
            c if c.is_whitespace() => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            _ => None,
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        return Err(LedgerError::Validation(format!(
            "unusable certificate file name `{raw}`"
        )));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBucket, MemoryStore};
    use crate::store::StudentStore;
    use chrono::Duration;

    fn ledger() -> (Ledger<MemoryStore, MemoryBucket>, Uuid) {
        let store = MemoryStore::new();
        let student = store.add_student("MDL22CS075", "Anjali Nair", "CSA");
        (Ledger::new(store, MemoryBucket::new()), student)
    }

    fn put(
        ledger: &Ledger<MemoryStore, MemoryBucket>,
        student: Uuid,
        points: i32,
        state: VerificationState,
        minutes_ago: i64,
    ) -> Uuid {
        ledger.store().put_certificate(
            student,
            &format!("memory://certuploads/{points}-{minutes_ago}.pdf"),
            points,
            state,
            Utc::now() - Duration::minutes(minutes_ago),
        )
    }

    async fn cached_total(ledger: &Ledger<MemoryStore, MemoryBucket>, student: Uuid) -> i32 {
        ledger
            .store()
            .fetch_student(student)
            .await
            .unwrap()
            .unwrap()
            .total_activity_point
    }

    #[tokio::test]
    async fn recompute_sums_only_verified_certificates() {
        let (ledger, student) = ledger();
        put(&ledger, student, 15, VerificationState::Verified, 30);
        put(&ledger, student, 25, VerificationState::Pending, 20);
        put(&ledger, student, 10, VerificationState::Verified, 10);

        assert_eq!(ledger.recompute_total(student).await.unwrap(), 25);
        assert_eq!(cached_total(&ledger, student).await, 25);
        assert_eq!(ledger.progress(student).await.unwrap().percentage, 25);
    }

    #[tokio::test]
    async fn listing_is_oldest_first_and_unfiltered() {
        let (ledger, student) = ledger();
        let newest = put(&ledger, student, 10, VerificationState::Pending, 1);
        let oldest = put(&ledger, student, 20, VerificationState::Verified, 60);
        let middle = put(&ledger, student, 30, VerificationState::Pending, 15);

        let ids: Vec<Uuid> = ledger
            .list_certificates(student)
            .await
            .unwrap()
            .iter()
            .map(|cert| cert.id)
            .collect();
        assert_eq!(ids, vec![oldest, middle, newest]);
    }

    #[tokio::test]
    async fn unknown_student_is_not_found_but_empty_is_fine() {
        let (ledger, student) = ledger();
        assert!(ledger.list_certificates(student).await.unwrap().is_empty());
        let err = ledger.list_certificates(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { kind: "student", .. }));
    }

    #[tokio::test]
    async fn pending_points_edit_counts_once_verified() {
        let (ledger, student) = ledger();
        let cert = put(&ledger, student, 20, VerificationState::Pending, 5);

        let updated = ledger.set_points(cert, 40).await.unwrap();
        assert_eq!(updated.points, 40);
        assert_eq!(cached_total(&ledger, student).await, 0);

        let committed = ledger
            .toggle_verification(cert, VerificationState::Pending)
            .await
            .unwrap();
        assert_eq!(committed.total, 40);
        assert_eq!(cached_total(&ledger, student).await, 40);
    }

    #[tokio::test]
    async fn verified_points_are_frozen() {
        let (ledger, student) = ledger();
        let cert = put(&ledger, student, 15, VerificationState::Verified, 5);
        ledger.recompute_total(student).await.unwrap();

        let err = ledger.set_points(cert, 99).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
        let stored = ledger.store().fetch_certificate(cert).await.unwrap().unwrap();
        assert_eq!(stored.points, 15);
        assert_eq!(cached_total(&ledger, student).await, 15);
    }

    #[tokio::test]
    async fn negative_points_are_rejected_before_the_store() {
        let (ledger, student) = ledger();
        let cert = put(&ledger, student, 20, VerificationState::Pending, 5);
        ledger.store().fail_writes(true);

        let err = ledger.set_points(cert, -5).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn guarded_toggles_round_trip() {
        let (ledger, student) = ledger();
        let cert = put(&ledger, student, 30, VerificationState::Pending, 5);
        put(&ledger, student, 10, VerificationState::Verified, 6);
        let original = ledger.recompute_total(student).await.unwrap();

        let first = ledger
            .toggle_verification(cert, VerificationState::Pending)
            .await
            .unwrap();
        assert_eq!(first.certificate.state, VerificationState::Verified);
        assert_eq!(first.total, 40);

        let second = ledger
            .toggle_verification(cert, VerificationState::Verified)
            .await
            .unwrap();
        assert_eq!(second.certificate.state, VerificationState::Pending);
        assert_eq!(second.total, original);
    }

    #[tokio::test]
    async fn stale_toggle_is_a_conflict() {
        let (ledger, student) = ledger();
        let cert = put(&ledger, student, 25, VerificationState::Pending, 5);

        ledger
            .toggle_verification(cert, VerificationState::Pending)
            .await
            .unwrap();
        let err = ledger
            .toggle_verification(cert, VerificationState::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
        assert!(err.is_retryable());

        let stored = ledger.store().fetch_certificate(cert).await.unwrap().unwrap();
        assert_eq!(stored.state, VerificationState::Verified);
        assert_eq!(cached_total(&ledger, student).await, 25);
    }

    #[tokio::test]
    async fn set_verification_is_idempotent() {
        let (ledger, student) = ledger();
        let cert = put(&ledger, student, 20, VerificationState::Pending, 5);

        let once = ledger
            .set_verification(cert, VerificationState::Verified)
            .await
            .unwrap();
        let twice = ledger
            .set_verification(cert, VerificationState::Verified)
            .await
            .unwrap();
        assert_eq!(once.total, 20);
        assert_eq!(twice.total, 20);
        assert_eq!(twice.certificate.state, VerificationState::Verified);
    }

    #[tokio::test]
    async fn set_verification_no_op_does_not_write() {
        let (ledger, student) = ledger();
        let cert = put(&ledger, student, 20, VerificationState::Verified, 5);
        ledger.store().set_cached_total(student, 55);
        ledger.store().fail_writes(true);

        let committed = ledger
            .set_verification(cert, VerificationState::Verified)
            .await
            .unwrap();
        assert_eq!(committed.certificate.state, VerificationState::Verified);
        assert_eq!(committed.total, 20);
        assert_eq!(cached_total(&ledger, student).await, 55);
    }

    #[tokio::test]
    async fn unknown_certificate_is_not_found() {
        let (ledger, _) = ledger();
        let missing = Uuid::new_v4();

        let err = ledger.set_points(missing, 10).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { kind: "certificate", .. }));
        let err = ledger
            .toggle_verification(missing, VerificationState::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { kind: "certificate", .. }));
        let err = ledger
            .set_verification(missing, VerificationState::Verified)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { kind: "certificate", .. }));
        let err = ledger.withdraw_certificate(missing).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { kind: "certificate", .. }));
    }

    #[tokio::test]
    async fn failed_upload_records_nothing() {
        let (ledger, student) = ledger();
        put(&ledger, student, 15, VerificationState::Verified, 5);
        ledger.recompute_total(student).await.unwrap();
        ledger.bucket().fail_uploads(true);

        let err = ledger
            .submit_certificate(student, "hackathon.pdf", b"%PDF", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
        assert_eq!(ledger.list_certificates(student).await.unwrap().len(), 1);
        assert_eq!(cached_total(&ledger, student).await, 15);
        assert!(ledger.bucket().is_empty());
    }

    #[tokio::test]
    async fn failed_write_leaves_everything_unchanged() {
        let (ledger, student) = ledger();
        let cert = put(&ledger, student, 20, VerificationState::Pending, 5);
        put(&ledger, student, 10, VerificationState::Verified, 6);
        ledger.recompute_total(student).await.unwrap();

        ledger.store().fail_writes(true);
        let err = ledger
            .toggle_verification(cert, VerificationState::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
        assert!(ledger.set_points(cert, 35).await.is_err());
        ledger.store().fail_writes(false);

        let stored = ledger.store().fetch_certificate(cert).await.unwrap().unwrap();
        assert_eq!(stored.state, VerificationState::Pending);
        assert_eq!(stored.points, 20);
        assert_eq!(cached_total(&ledger, student).await, 10);
    }

    #[tokio::test]
    async fn submission_classifies_file_name() {
        let (ledger, student) = ledger();
        let cert = ledger
            .submit_certificate(student, "hackathon_2024.pdf", b"%PDF-1.7", None)
            .await
            .unwrap();
        assert_eq!(cert.points, 25);
        assert_eq!(cert.state, VerificationState::Pending);
        assert!(cert.file_url.starts_with(MemoryBucket::BASE_URL));
        assert!(cert.name().ends_with("-hackathon_2024.pdf"));
        assert!(ledger.bucket().contains(cert.storage_key()));

        let explicit = ledger
            .submit_certificate(student, "hackathon finals.pdf", b"%PDF", Some(40))
            .await
            .unwrap();
        assert_eq!(explicit.points, 40);
        assert!(explicit.name().ends_with("-hackathon_finals.pdf"));
    }

    #[tokio::test]
    async fn submission_validates_before_uploading() {
        let (ledger, student) = ledger();
        let err = ledger
            .submit_certificate(student, "paper.pdf", b"x", Some(-1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(ledger
            .submit_certificate(student, "../..", b"x", None)
            .await
            .is_err());
        let err = ledger
            .submit_certificate(Uuid::new_v4(), "paper.pdf", b"x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
        assert!(ledger.bucket().is_empty());
    }

    #[tokio::test]
    async fn failed_insert_removes_the_upload() {
        let (ledger, student) = ledger();
        ledger.store().fail_writes(true);
        let err = ledger
            .submit_certificate(student, "workshop.pdf", b"x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
        assert!(ledger.bucket().is_empty());
    }

    #[tokio::test]
    async fn only_pending_certificates_can_be_withdrawn() {
        let (ledger, student) = ledger();
        let pending = ledger
            .submit_certificate(student, "workshop.pdf", b"x", None)
            .await
            .unwrap();
        let verified = put(&ledger, student, 30, VerificationState::Verified, 9);

        let committed = ledger.withdraw_certificate(pending.id).await.unwrap();
        assert_eq!(committed.total, 30);
        assert!(!ledger.bucket().contains(pending.storage_key()));

        let err = ledger.withdraw_certificate(verified).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
        assert_eq!(ledger.list_certificates(student).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn summaries_expose_totals_and_pending_counts() {
        let (ledger, anjali) = ledger();
        let rahul = ledger.store().add_student("MDL22CS081", "Rahul Menon", "CSB");
        put(&ledger, anjali, 15, VerificationState::Verified, 3);
        put(&ledger, anjali, 25, VerificationState::Pending, 2);
        put(&ledger, rahul, 30, VerificationState::Pending, 1);

        let all = ledger.summaries(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].full_name, "Anjali Nair");
        assert_eq!(all[0].total_points, 15);
        assert_eq!(all[0].pending_certificates, 1);
        assert_eq!(all[1].total_points, 0);
        assert_eq!(all[1].pending_certificates, 1);

        let csb = ledger.summaries(Some("CSB")).await.unwrap();
        assert_eq!(csb.len(), 1);
        assert_eq!(csb[0].student_id, rahul);
    }

    #[tokio::test]
    async fn audit_finds_and_repairs_drift() {
        let (ledger, student) = ledger();
        put(&ledger, student, 20, VerificationState::Verified, 3);
        ledger.recompute_total(student).await.unwrap();
        assert!(ledger.audit_totals(None).await.unwrap().is_empty());

        ledger.store().set_cached_total(student, 55);
        let drift = ledger.audit_totals(None).await.unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].cached, 55);
        assert_eq!(drift[0].recomputed, 20);

        let repaired = ledger.repair_totals(None).await.unwrap();
        assert_eq!(repaired.len(), 1);
        assert!(ledger.audit_totals(None).await.unwrap().is_empty());
        assert_eq!(cached_total(&ledger, student).await, 20);
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("C:\\scans\\NSS camp.png").unwrap(), "NSS_camp.png");
        assert_eq!(sanitize_file_name("dir/ieee(1).pdf").unwrap(), "ieee1.pdf");
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("   ").is_err());
    }
}
