use std::collections::HashMap;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{
    parse_id, ApplicationStatus, Certificate, Committed, Guarded, NewCertificate,
    ScholarshipApplication, Student, VerificationState,
};
use crate::points;
use crate::store::{CertificateStore, ScholarshipStore, StudentStore};

const STUDENT_COLUMNS: &str = "id, ktu_id, full_name, class_name, total_activity_point";
const CERTIFICATE_COLUMNS: &str =
    "id, student_id, certificate, activity_point, verified, created_at";
const APPLICATION_COLUMNS: &str =
    "id, student_id, scholarship_id, status, applied_at, reviewer_notes";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn student_from_row(row: &PgRow) -> Result<Student, sqlx::Error> {
    Ok(Student {
        id: row.try_get("id")?,
        ktu_id: row.try_get("ktu_id")?,
        full_name: row.try_get("full_name")?,
        class_name: row.try_get("class_name")?,
        total_activity_point: row.try_get("total_activity_point")?,
    })
}

/// A NULL point value falls back to the file-name heuristic and a NULL
/// verification flag means pending.
fn certificate_from_row(row: &PgRow) -> Result<Certificate, sqlx::Error> {
    let file_url: String = row.try_get("certificate")?;
    let activity_point: Option<i32> = row.try_get("activity_point")?;
    let verified: Option<bool> = row.try_get("verified")?;
    Ok(Certificate {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        points: activity_point.unwrap_or_else(|| points::default_points_for(&file_url)),
        state: VerificationState::from_flag(verified),
        submitted_at: row.try_get("created_at")?,
        file_url,
    })
}

fn application_from_row(row: &PgRow) -> Result<ScholarshipApplication, LedgerError> {
    let status: String = row.try_get("status")?;
    Ok(ScholarshipApplication {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        scholarship_id: row.try_get("scholarship_id")?,
        status: status.parse()?,
        applied_at: row.try_get("applied_at")?,
        reviewer_notes: row.try_get("reviewer_notes")?,
    })
}

async fn owner_of(conn: &mut PgConnection, certificate_id: Uuid) -> Result<Uuid, LedgerError> {
    sqlx::query("SELECT student_id FROM student_portal.certificates WHERE id = $1")
        .bind(certificate_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| row.try_get::<Uuid, _>("student_id"))
        .transpose()?
        .ok_or_else(|| LedgerError::not_found("certificate", certificate_id))
}

/// Row lock on the student serialises every mutation that rewrites their total.
async fn lock_student(conn: &mut PgConnection, student_id: Uuid) -> Result<(), LedgerError> {
    sqlx::query("SELECT id FROM student_portal.student WHERE id = $1 FOR UPDATE")
        .bind(student_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|_| ())
        .ok_or_else(|| LedgerError::not_found("student", student_id))
}

async fn certificate_in(
    conn: &mut PgConnection,
    certificate_id: Uuid,
) -> Result<Certificate, LedgerError> {
    let sql =
        format!("SELECT {CERTIFICATE_COLUMNS} FROM student_portal.certificates WHERE id = $1");
    let row = sqlx::query(&sql)
        .bind(certificate_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::not_found("certificate", certificate_id))?;
    Ok(certificate_from_row(&row)?)
}

async fn recompute_in(conn: &mut PgConnection, student_id: Uuid) -> Result<i32, LedgerError> {
    let sql = format!(
        "SELECT {CERTIFICATE_COLUMNS} FROM student_portal.certificates WHERE student_id = $1"
    );
    let rows = sqlx::query(&sql)
        .bind(student_id)
        .fetch_all(&mut *conn)
        .await?;
    let certificates = rows
        .iter()
        .map(certificate_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    let total = points::verified_total(&certificates);

    sqlx::query("UPDATE student_portal.student SET total_activity_point = $2 WHERE id = $1")
        .bind(student_id)
        .bind(total)
        .execute(&mut *conn)
        .await?;
    Ok(total)
}

impl StudentStore for PgStore {
    async fn fetch_student(&self, student_id: Uuid) -> Result<Option<Student>, LedgerError> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM student_portal.student WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(student_from_row).transpose()?)
    }

    async fn fetch_students(&self, class_name: Option<&str>) -> Result<Vec<Student>, LedgerError> {
        let mut query = format!("SELECT {STUDENT_COLUMNS} FROM student_portal.student");
        if class_name.is_some() {
            query.push_str(" WHERE class_name = $1");
        }
        query.push_str(" ORDER BY class_name, full_name");

        let mut rows = sqlx::query(&query);
        if let Some(value) = class_name {
            rows = rows.bind(value);
        }

        let records = rows.fetch_all(&self.pool).await?;
        let mut students = Vec::new();
        for row in records.iter() {
            students.push(student_from_row(row)?);
        }
        Ok(students)
    }
}

impl CertificateStore for PgStore {
    async fn fetch_certificates(&self, student_id: Uuid) -> Result<Vec<Certificate>, LedgerError> {
        let sql = format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM student_portal.certificates \
             WHERE student_id = $1 ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(student_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(certificate_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn fetch_certificate(&self, id: Uuid) -> Result<Option<Certificate>, LedgerError> {
        let sql =
            format!("SELECT {CERTIFICATE_COLUMNS} FROM student_portal.certificates WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(certificate_from_row).transpose()?)
    }

    async fn certificates_for_students(
        &self,
        student_ids: &[Uuid],
    ) -> Result<Vec<Certificate>, LedgerError> {
        let sql = format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM student_portal.certificates \
             WHERE student_id = ANY($1) ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(student_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(certificate_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn insert_certificate(&self, new: NewCertificate) -> Result<Committed, LedgerError> {
        let mut tx = self.pool.begin().await?;
        lock_student(&mut tx, new.student_id).await?;

        let sql = format!(
            "INSERT INTO student_portal.certificates \
             (id, student_id, certificate, activity_point, verified) \
             VALUES ($1, $2, $3, $4, FALSE) RETURNING {CERTIFICATE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(new.student_id)
            .bind(&new.file_url)
            .bind(new.points)
            .fetch_one(&mut *tx)
            .await?;
        let certificate = certificate_from_row(&row)?;
        let total = recompute_in(&mut tx, new.student_id).await?;

        tx.commit().await?;
        Ok(Committed { certificate, total })
    }

    async fn update_points(
        &self,
        id: Uuid,
        points: i32,
    ) -> Result<Guarded<Committed, Certificate>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let student_id = owner_of(&mut tx, id).await?;
        lock_student(&mut tx, student_id).await?;

        let sql = format!(
            "UPDATE student_portal.certificates SET activity_point = $2 \
             WHERE id = $1 AND verified IS NOT TRUE RETURNING {CERTIFICATE_COLUMNS}"
        );
        let updated = sqlx::query(&sql)
            .bind(id)
            .bind(points)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = updated else {
            return Ok(Guarded::Stale(certificate_in(&mut tx, id).await?));
        };
        let certificate = certificate_from_row(&row)?;
        let total = recompute_in(&mut tx, student_id).await?;

        tx.commit().await?;
        Ok(Guarded::Applied(Committed { certificate, total }))
    }

    async fn update_verification(
        &self,
        id: Uuid,
        expected: VerificationState,
        target: VerificationState,
    ) -> Result<Guarded<Committed, Certificate>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let student_id = owner_of(&mut tx, id).await?;
        lock_student(&mut tx, student_id).await?;

        // The stored value may be NULL (pending) or a point value computed
        // from the file name; pin the effective points before freezing.
        let sql = format!(
            "UPDATE student_portal.certificates SET verified = $3, \
             activity_point = COALESCE(activity_point, $4) \
             WHERE id = $1 AND COALESCE(verified, FALSE) = $2 RETURNING {CERTIFICATE_COLUMNS}"
        );
        let current = certificate_in(&mut tx, id).await?;
        let updated = sqlx::query(&sql)
            .bind(id)
            .bind(expected.as_flag())
            .bind(target.as_flag())
            .bind(current.points)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = updated else {
            return Ok(Guarded::Stale(current));
        };
        let certificate = certificate_from_row(&row)?;
        let total = recompute_in(&mut tx, student_id).await?;

        tx.commit().await?;
        Ok(Guarded::Applied(Committed { certificate, total }))
    }

    async fn delete_pending(
        &self,
        id: Uuid,
    ) -> Result<Guarded<Committed, Certificate>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let student_id = owner_of(&mut tx, id).await?;
        lock_student(&mut tx, student_id).await?;

        let sql = format!(
            "DELETE FROM student_portal.certificates \
             WHERE id = $1 AND verified IS NOT TRUE RETURNING {CERTIFICATE_COLUMNS}"
        );
        let deleted = sqlx::query(&sql).bind(id).fetch_optional(&mut *tx).await?;
        let Some(row) = deleted else {
            return Ok(Guarded::Stale(certificate_in(&mut tx, id).await?));
        };
        let certificate = certificate_from_row(&row)?;
        let total = recompute_in(&mut tx, student_id).await?;

        tx.commit().await?;
        Ok(Guarded::Applied(Committed { certificate, total }))
    }

    async fn refresh_total(&self, student_id: Uuid) -> Result<i32, LedgerError> {
        let mut tx = self.pool.begin().await?;
        lock_student(&mut tx, student_id).await?;
        let total = recompute_in(&mut tx, student_id).await?;
        tx.commit().await?;
        Ok(total)
    }
}

impl ScholarshipStore for PgStore {
    async fn scholarship_exists(&self, scholarship_id: Uuid) -> Result<bool, LedgerError> {
        let row = sqlx::query("SELECT id FROM student_portal.scholarships WHERE id = $1")
            .bind(scholarship_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_application(
        &self,
        student_id: Uuid,
        scholarship_id: Uuid,
    ) -> Result<ScholarshipApplication, LedgerError> {
        let sql = format!(
            "INSERT INTO student_portal.scholarship_applications \
             (id, student_id, scholarship_id, status) \
             VALUES ($1, $2, $3, 'pending') RETURNING {APPLICATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(student_id)
            .bind(scholarship_id)
            .fetch_one(&self.pool)
            .await?;
        application_from_row(&row)
    }

    async fn fetch_applications(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<ScholarshipApplication>, LedgerError> {
        let sql = format!(
            "SELECT {APPLICATION_COLUMNS} FROM student_portal.scholarship_applications \
             WHERE student_id = $1 ORDER BY applied_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(student_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(application_from_row).collect()
    }

    async fn update_application_status(
        &self,
        id: Uuid,
        status: ApplicationStatus,
        notes: Option<&str>,
    ) -> Result<Guarded<ScholarshipApplication, ScholarshipApplication>, LedgerError> {
        let sql = format!(
            "UPDATE student_portal.scholarship_applications \
             SET status = $2, reviewer_notes = COALESCE($3, reviewer_notes) \
             WHERE id = $1 AND status = 'pending' RETURNING {APPLICATION_COLUMNS}"
        );
        let updated = sqlx::query(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(notes)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = updated {
            return Ok(Guarded::Applied(application_from_row(&row)?));
        }

        let sql = format!(
            "SELECT {APPLICATION_COLUMNS} FROM student_portal.scholarship_applications \
             WHERE id = $1"
        );
        let current = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("scholarship application", id))?;
        Ok(Guarded::Stale(application_from_row(&current)?))
    }

    async fn update_application_notes(
        &self,
        id: Uuid,
        notes: &str,
    ) -> Result<Option<ScholarshipApplication>, LedgerError> {
        let sql = format!(
            "UPDATE student_portal.scholarship_applications SET reviewer_notes = $2 \
             WHERE id = $1 RETURNING {APPLICATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(notes)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(application_from_row).transpose()
    }
}

const SEED_STUDENTS: &[(&str, &str, &str)] = &[
    ("MDL22CS075", "Anjali Nair", "CSA"),
    ("MDL22CS081", "Rahul Menon", "CSA"),
    ("MDL22CS112", "Fathima Rasheed", "CSB"),
];

const SEED_CERTIFICATES: &[(&str, &str, i32, bool)] = &[
    ("MDL22CS075", "1740380592000-ieee_conference.pdf", 15, true),
    ("MDL22CS075", "1740380593000-hackathon_2024.pdf", 25, false),
    ("MDL22CS075", "1740380594000-nss_community_service.png", 10, true),
    ("MDL22CS081", "1740380595000-rust_workshop.pdf", 20, true),
    ("MDL22CS112", "1740380596000-research_paper.pdf", 30, false),
];

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let mut student_ids: HashMap<&str, Uuid> = HashMap::new();

    for (ktu_id, name, class_name) in SEED_STUDENTS.iter().copied() {
        let student_id: Uuid = sqlx::query(
            r#"
            INSERT INTO student_portal.student (id, ktu_id, full_name, class_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (ktu_id) DO UPDATE
            SET full_name = EXCLUDED.full_name, class_name = EXCLUDED.class_name
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ktu_id)
        .bind(name)
        .bind(class_name)
        .fetch_one(pool)
        .await?
        .get("id");
        student_ids.insert(ktu_id, student_id);
    }

    let scholarships = vec![
        (
            "National Merit Scholarship",
            "National Education Foundation",
            NaiveDate::from_ymd_opt(2025, 3, 30).context("invalid date")?,
        ),
        (
            "STEM Excellence Scholarship",
            "Tech Forward Initiative",
            NaiveDate::from_ymd_opt(2025, 4, 15).context("invalid date")?,
        ),
        (
            "Community Leadership Grant",
            "Community Foundation",
            NaiveDate::from_ymd_opt(2025, 5, 1).context("invalid date")?,
        ),
    ];

    for (name, provider, deadline) in scholarships {
        sqlx::query(
            r#"
            INSERT INTO student_portal.scholarships (id, name, provider, deadline)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET provider = EXCLUDED.provider, deadline = EXCLUDED.deadline
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(provider)
        .bind(deadline)
        .execute(pool)
        .await?;
    }

    for (ktu_id, key, points, verified) in SEED_CERTIFICATES.iter().copied() {
        let student_id = *student_ids
            .get(ktu_id)
            .with_context(|| format!("seed certificate for unknown student {ktu_id}"))?;
        let url = format!("file://certuploads/{key}");

        sqlx::query(
            r#"
            INSERT INTO student_portal.certificates
            (id, student_id, certificate, activity_point, verified)
            SELECT $1, $2, $3, $4, $5
            WHERE NOT EXISTS (
                SELECT 1 FROM student_portal.certificates WHERE certificate = $3
            )
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(&url)
        .bind(points)
        .bind(verified)
        .execute(pool)
        .await?;
    }

    let store = PgStore::new(pool.clone());
    for (ktu_id, id) in student_ids.iter() {
        store
            .refresh_total(*id)
            .await
            .with_context(|| format!("failed to recompute total for {ktu_id}"))?;
    }

    Ok(())
}

/// Imports a class roster. Rows without an id get a fresh one; existing
/// register numbers are updated in place.
pub async fn import_students(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        id: Option<String>,
        ktu_id: String,
        full_name: String,
        class_name: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut imported = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let id = match row.id.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => parse_id("student", raw)?,
            None => Uuid::new_v4(),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO student_portal.student (id, ktu_id, full_name, class_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (ktu_id) DO UPDATE
            SET full_name = EXCLUDED.full_name, class_name = EXCLUDED.class_name
            "#,
        )
        .bind(id)
        .bind(row.ktu_id.trim())
        .bind(row.full_name.trim())
        .bind(row.class_name.trim())
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            imported += 1;
        }
    }

    tracing::info!(imported, path = %csv_path.display(), "student roster imported");
    Ok(imported)
}
