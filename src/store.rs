//! Collaborator traits for the backing store and object storage.
//!
//! Every mutating certificate method is one transaction: the certificate row
//! and the owner's cached total are written together or not at all. The
//! total is always recomputed with [`crate::points::verified_total`] over the
//! student's rows after the change, never patched.
#![allow(async_fn_in_trait)]

use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{
    ApplicationStatus, Certificate, Committed, Guarded, NewCertificate, ScholarshipApplication,
    Student, VerificationState,
};

pub trait StudentStore {
    async fn fetch_student(&self, student_id: Uuid) -> Result<Option<Student>, LedgerError>;

    /// Students ordered by class then name, optionally restricted to a class.
    async fn fetch_students(&self, class_name: Option<&str>) -> Result<Vec<Student>, LedgerError>;
}

pub trait CertificateStore: StudentStore {
    /// Oldest first, ties broken by id.
    async fn fetch_certificates(&self, student_id: Uuid) -> Result<Vec<Certificate>, LedgerError>;

    async fn fetch_certificate(&self, id: Uuid) -> Result<Option<Certificate>, LedgerError>;

    /// All certificates owned by any of the given students.
    async fn certificates_for_students(
        &self,
        student_ids: &[Uuid],
    ) -> Result<Vec<Certificate>, LedgerError>;

    /// Inserts a pending certificate. `NotFound` if the student is unknown.
    async fn insert_certificate(&self, new: NewCertificate) -> Result<Committed, LedgerError>;

    /// Sets points if the certificate is still pending; `Stale` otherwise.
    async fn update_points(
        &self,
        id: Uuid,
        points: i32,
    ) -> Result<Guarded<Committed, Certificate>, LedgerError>;

    /// Moves the certificate to `target` only if its state is still `expected`.
    async fn update_verification(
        &self,
        id: Uuid,
        expected: VerificationState,
        target: VerificationState,
    ) -> Result<Guarded<Committed, Certificate>, LedgerError>;

    /// Deletes the certificate if it is still pending. The returned
    /// certificate is the removed row.
    async fn delete_pending(
        &self,
        id: Uuid,
    ) -> Result<Guarded<Committed, Certificate>, LedgerError>;

    /// Recomputes and stores the cached total of one student.
    async fn refresh_total(&self, student_id: Uuid) -> Result<i32, LedgerError>;
}

pub trait ScholarshipStore: StudentStore {
    async fn scholarship_exists(&self, scholarship_id: Uuid) -> Result<bool, LedgerError>;

    /// `Conflict` when the student already applied for the scholarship.
    async fn insert_application(
        &self,
        student_id: Uuid,
        scholarship_id: Uuid,
    ) -> Result<ScholarshipApplication, LedgerError>;

    async fn fetch_applications(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<ScholarshipApplication>, LedgerError>;

    /// Moves a pending application to `status`; `Stale` when it was already
    /// decided. `NotFound` if the application does not exist.
    async fn update_application_status(
        &self,
        id: Uuid,
        status: ApplicationStatus,
        notes: Option<&str>,
    ) -> Result<Guarded<ScholarshipApplication, ScholarshipApplication>, LedgerError>;

    async fn update_application_notes(
        &self,
        id: Uuid,
        notes: &str,
    ) -> Result<Option<ScholarshipApplication>, LedgerError>;
}

/// Bucket holding uploaded certificate files.
pub trait ObjectStorage {
    /// Stores `bytes` under `path` and returns the public URL.
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, LedgerError>;

    async fn remove(&self, path: &str) -> Result<(), LedgerError>;
}
