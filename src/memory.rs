//! In-memory store and bucket. Thread-safe; each mutation runs under a single
//! lock so certificate rows and cached totals change together.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{
    ApplicationStatus, Certificate, Committed, Guarded, NewCertificate, ScholarshipApplication,
    Student, VerificationState,
};
use crate::points;
use crate::store::{CertificateStore, ObjectStorage, ScholarshipStore, StudentStore};

#[derive(Default)]
struct State {
    students: HashMap<Uuid, Student>,
    certificates: Vec<Certificate>,
    scholarships: HashSet<Uuid>,
    applications: Vec<ScholarshipApplication>,
}

impl State {
    fn certificate_index(&self, id: Uuid) -> Result<usize, LedgerError> {
        self.certificates
            .iter()
            .position(|cert| cert.id == id)
            .ok_or_else(|| LedgerError::not_found("certificate", id))
    }

    fn recompute(&mut self, student_id: Uuid) -> Result<i32, LedgerError> {
        let total = points::verified_total(
            self.certificates
                .iter()
                .filter(|cert| cert.student_id == student_id),
        );
        let student = self
            .students
            .get_mut(&student_id)
            .ok_or_else(|| LedgerError::not_found("student", student_id))?;
        student.total_activity_point = total;
        Ok(total)
    }

    fn sorted_certificates(&self, student_id: Uuid) -> Vec<Certificate> {
        let mut certs: Vec<Certificate> = self
            .certificates
            .iter()
            .filter(|cert| cert.student_id == student_id)
            .cloned()
            .collect();
        certs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        certs
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// While set, every write is rejected with `StoreUnavailable` before
    /// touching any row.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn add_student(&self, ktu_id: &str, full_name: &str, class_name: &str) -> Uuid {
        let id = Uuid::new_v4();
        if let Ok(mut state) = self.state.lock() {
            state.students.insert(
                id,
                Student {
                    id,
                    ktu_id: ktu_id.to_string(),
                    full_name: full_name.to_string(),
                    class_name: class_name.to_string(),
                    total_activity_point: 0,
                },
            );
        }
        id
    }

    pub fn add_scholarship(&self) -> Uuid {
        let id = Uuid::new_v4();
        if let Ok(mut state) = self.state.lock() {
            state.scholarships.insert(id);
        }
        id
    }

    /// Inserts a certificate row as-is, without touching the cached total.
    pub fn put_certificate(
        &self,
        student_id: Uuid,
        file_url: &str,
        points: i32,
        state: VerificationState,
        submitted_at: DateTime<Utc>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        if let Ok(mut guard) = self.state.lock() {
            guard.certificates.push(Certificate {
                id,
                student_id,
                file_url: file_url.to_string(),
                points,
                state,
                submitted_at,
            });
        }
        id
    }

    /// Overwrites a cached total directly, bypassing recomputation.
    pub fn set_cached_total(&self, student_id: Uuid, total: i32) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(student) = state.students.get_mut(&student_id) {
                student.total_activity_point = total;
            }
        }
    }

    fn read(&self) -> Result<MutexGuard<'_, State>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::StoreUnavailable("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<MutexGuard<'_, State>, LedgerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::StoreUnavailable(
                "write rejected by backing store".to_string(),
            ));
        }
        self.read()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StudentStore for MemoryStore {
    async fn fetch_student(&self, student_id: Uuid) -> Result<Option<Student>, LedgerError> {
        Ok(self.read()?.students.get(&student_id).cloned())
    }

    async fn fetch_students(&self, class_name: Option<&str>) -> Result<Vec<Student>, LedgerError> {
        let state = self.read()?;
        let mut students: Vec<Student> = state
            .students
            .values()
            .filter(|student| class_name.map_or(true, |class| student.class_name == class))
            .cloned()
            .collect();
        students.sort_by(|a, b| {
            a.class_name
                .cmp(&b.class_name)
                .then_with(|| a.full_name.cmp(&b.full_name))
        });
        Ok(students)
    }
}

impl CertificateStore for MemoryStore {
    async fn fetch_certificates(&self, student_id: Uuid) -> Result<Vec<Certificate>, LedgerError> {
        Ok(self.read()?.sorted_certificates(student_id))
    }

    async fn fetch_certificate(&self, id: Uuid) -> Result<Option<Certificate>, LedgerError> {
        Ok(self
            .read()?
            .certificates
            .iter()
            .find(|cert| cert.id == id)
            .cloned())
    }

    async fn certificates_for_students(
        &self,
        student_ids: &[Uuid],
    ) -> Result<Vec<Certificate>, LedgerError> {
        let state = self.read()?;
        Ok(state
            .certificates
            .iter()
            .filter(|cert| student_ids.contains(&cert.student_id))
            .cloned()
            .collect())
    }

    async fn insert_certificate(&self, new: NewCertificate) -> Result<Committed, LedgerError> {
        let mut state = self.write()?;
        if !state.students.contains_key(&new.student_id) {
            return Err(LedgerError::not_found("student", new.student_id));
        }
        let certificate = Certificate {
            id: Uuid::new_v4(),
            student_id: new.student_id,
            file_url: new.file_url,
            points: new.points,
            state: VerificationState::Pending,
            submitted_at: Utc::now(),
        };
        state.certificates.push(certificate.clone());
        let total = state.recompute(certificate.student_id)?;
        Ok(Committed { certificate, total })
    }

    async fn update_points(
        &self,
        id: Uuid,
        points: i32,
    ) -> Result<Guarded<Committed, Certificate>, LedgerError> {
        let mut state = self.write()?;
        let index = state.certificate_index(id)?;
        if state.certificates[index].is_verified() {
            return Ok(Guarded::Stale(state.certificates[index].clone()));
        }
        state.certificates[index].points = points;
        let certificate = state.certificates[index].clone();
        let total = state.recompute(certificate.student_id)?;
        Ok(Guarded::Applied(Committed { certificate, total }))
    }

    async fn update_verification(
        &self,
        id: Uuid,
        expected: VerificationState,
        target: VerificationState,
    ) -> Result<Guarded<Committed, Certificate>, LedgerError> {
        let mut state = self.write()?;
        let index = state.certificate_index(id)?;
        if state.certificates[index].state != expected {
            return Ok(Guarded::Stale(state.certificates[index].clone()));
        }
        state.certificates[index].state = target;
        let certificate = state.certificates[index].clone();
        let total = state.recompute(certificate.student_id)?;
        Ok(Guarded::Applied(Committed { certificate, total }))
    }

    async fn delete_pending(
        &self,
        id: Uuid,
    ) -> Result<Guarded<Committed, Certificate>, LedgerError> {
        let mut state = self.write()?;
        let index = state.certificate_index(id)?;
        if state.certificates[index].is_verified() {
            return Ok(Guarded::Stale(state.certificates[index].clone()));
        }
        let certificate = state.certificates.remove(index);
        let total = state.recompute(certificate.student_id)?;
        Ok(Guarded::Applied(Committed { certificate, total }))
    }

    async fn refresh_total(&self, student_id: Uuid) -> Result<i32, LedgerError> {
        self.write()?.recompute(student_id)
    }
}

impl ScholarshipStore for MemoryStore {
    async fn scholarship_exists(&self, scholarship_id: Uuid) -> Result<bool, LedgerError> {
        Ok(self.read()?.scholarships.contains(&scholarship_id))
    }

    async fn insert_application(
        &self,
        student_id: Uuid,
        scholarship_id: Uuid,
    ) -> Result<ScholarshipApplication, LedgerError> {
        let mut state = self.write()?;
        let duplicate = state
            .applications
            .iter()
            .any(|app| app.student_id == student_id && app.scholarship_id == scholarship_id);
        if duplicate {
            return Err(LedgerError::Conflict(format!(
                "student {student_id} already applied for scholarship {scholarship_id}"
            )));
        }
        let application = ScholarshipApplication {
            id: Uuid::new_v4(),
            student_id,
            scholarship_id,
            status: ApplicationStatus::Pending,
            applied_at: Utc::now(),
            reviewer_notes: None,
        };
        state.applications.push(application.clone());
        Ok(application)
    }

    async fn fetch_applications(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<ScholarshipApplication>, LedgerError> {
        let state = self.read()?;
        let mut applications: Vec<ScholarshipApplication> = state
            .applications
            .iter()
            .filter(|app| app.student_id == student_id)
            .cloned()
            .collect();
        applications.sort_by(|a, b| a.applied_at.cmp(&b.applied_at).then(a.id.cmp(&b.id)));
        Ok(applications)
    }

    async fn update_application_status(
        &self,
        id: Uuid,
        status: ApplicationStatus,
        notes: Option<&str>,
    ) -> Result<Guarded<ScholarshipApplication, ScholarshipApplication>, LedgerError> {
        let mut state = self.write()?;
        let application = state
            .applications
            .iter_mut()
            .find(|app| app.id == id)
            .ok_or_else(|| LedgerError::not_found("scholarship application", id))?;
        if application.status != ApplicationStatus::Pending {
            return Ok(Guarded::Stale(application.clone()));
        }
        application.status = status;
        if let Some(notes) = notes {
            application.reviewer_notes = Some(notes.to_string());
        }
        Ok(Guarded::Applied(application.clone()))
    }

    async fn update_application_notes(
        &self,
        id: Uuid,
        notes: &str,
    ) -> Result<Option<ScholarshipApplication>, LedgerError> {
        let mut state = self.write()?;
        Ok(state
            .applications
            .iter_mut()
            .find(|app| app.id == id)
            .map(|app| {
                app.reviewer_notes = Some(notes.to_string());
                app.clone()
            }))
    }
}

/// Bucket that keeps uploaded objects in memory.
pub struct MemoryBucket {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: AtomicBool,
}

impl MemoryBucket {
    pub const BASE_URL: &'static str = "memory://certuploads";

    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            fail_uploads: AtomicBool::new(false),
        }
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn objects(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>, LedgerError> {
        self.objects
            .lock()
            .map_err(|_| LedgerError::StoreUnavailable("memory bucket lock poisoned".to_string()))
    }
}

impl Default for MemoryBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStorage for MemoryBucket {
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, LedgerError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(LedgerError::StoreUnavailable("upload rejected".to_string()));
        }
        self.objects()?.insert(path.to_string(), bytes.to_vec());
        Ok(format!("{}/{}", Self::BASE_URL, path))
    }

    async fn remove(&self, path: &str) -> Result<(), LedgerError> {
        self.objects()?.remove(path);
        Ok(())
    }
}
