use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

/// Review state of a certificate. Stored as a nullable boolean; a missing
/// flag means the certificate has not been reviewed yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationState {
    #[default]
    Pending,
    Verified,
}

impl VerificationState {
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => Self::Verified,
            Some(false) | None => Self::Pending,
        }
    }

    pub fn as_flag(self) -> bool {
        matches!(self, Self::Verified)
    }

    pub fn flipped(self) -> Self {
        match self {
            Self::Pending => Self::Verified,
            Self::Verified => Self::Pending,
        }
    }

    pub fn is_verified(self) -> bool {
        self.as_flag()
    }
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Verified => f.write_str("verified"),
        }
    }
}

impl FromStr for VerificationState {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            other => Err(LedgerError::Validation(format!(
                "unknown verification state `{other}` (expected pending or verified)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: Uuid,
    pub student_id: Uuid,
    pub file_url: String,
    pub points: i32,
    pub state: VerificationState,
    pub submitted_at: DateTime<Utc>,
}

impl Certificate {
    /// Display name: the last path segment of the file reference.
    pub fn name(&self) -> &str {
        last_segment(&self.file_url)
    }

    /// Object key inside the certificate bucket.
    pub fn storage_key(&self) -> &str {
        last_segment(&self.file_url)
    }

    pub fn is_verified(&self) -> bool {
        self.state.is_verified()
    }
}

fn last_segment(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[derive(Debug, Clone)]
pub struct NewCertificate {
    pub student_id: Uuid,
    pub file_url: String,
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub ktu_id: String,
    pub full_name: String,
    pub class_name: String,
    pub total_activity_point: i32,
}

/// Result of a committed certificate mutation: the row as written and the
/// owner's total as recomputed in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Committed {
    pub certificate: Certificate,
    pub total: i32,
}

/// Outcome of a conditional update. `Stale` carries the current row when the
/// precondition did not hold and nothing was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T, C> {
    Applied(T),
    Stale(C),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentSummary {
    #[serde(rename = "student_id")]
    pub student_id: Uuid,
    pub ktu_id: String,
    #[serde(rename = "name")]
    pub full_name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub total_points: i32,
    pub verified_certificates: usize,
    pub pending_certificates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total_points: i32,
    pub required_points: i32,
    pub percentage: i32,
    pub remaining_points: i32,
    pub verified_certificates: usize,
    pub pending_certificates: usize,
}

impl Progress {
    pub fn meets_requirement(&self) -> bool {
        self.remaining_points == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TotalDrift {
    pub student_id: Uuid,
    pub full_name: String,
    pub cached: i32,
    pub recomputed: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(LedgerError::Validation(format!(
                "unknown application status `{other}`"
            ))),
        }
    }
}

/// Reviewer verdict on a pending scholarship application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn status(self) -> ApplicationStatus {
        match self {
            Self::Approve => ApplicationStatus::Approved,
            Self::Reject => ApplicationStatus::Rejected,
        }
    }
}

impl FromStr for Decision {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Self::Approve),
            "reject" | "rejected" => Ok(Self::Reject),
            other => Err(LedgerError::Validation(format!(
                "unknown decision `{other}` (expected approve or reject)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScholarshipApplication {
    pub id: Uuid,
    pub student_id: Uuid,
    pub scholarship_id: Uuid,
    pub status: ApplicationStatus,
    pub applied_at: DateTime<Utc>,
    pub reviewer_notes: Option<String>,
}

/// Parses an identifier supplied by a caller, mapping malformed input to a
/// validation error.
pub fn parse_id(kind: &str, raw: &str) -> Result<Uuid, LedgerError> {
    Uuid::parse_str(raw.trim())
        .map_err(|err| LedgerError::Validation(format!("malformed {kind} id `{raw}`: {err}")))
}
