//! Activity-point aggregation. Every total shown or persisted anywhere is
//! produced by [`verified_total`].

use crate::models::{Certificate, Progress};

pub const REQUIRED_POINTS: i32 = 100;
pub const DEFAULT_POINTS: i32 = 10;

/// Keyword groups checked in order against a lowercased file name or label.
/// The first group with a matching keyword decides the points.
const CATEGORY_POINTS: &[(&[&str], i32)] = &[
    (&["ieee", "conference"], 15),
    (&["hackathon"], 25),
    (&["community", "service"], 10),
    (&["workshop"], 20),
    (&["research", "paper"], 30),
];

pub fn default_points_for(label: &str) -> i32 {
    let label = label.to_lowercase();
    CATEGORY_POINTS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| label.contains(keyword)))
        .map(|(_, points)| *points)
        .unwrap_or(DEFAULT_POINTS)
}

pub fn verified_total<'a, I>(certificates: I) -> i32
where
    I: IntoIterator<Item = &'a Certificate>,
{
    let sum: i64 = certificates
        .into_iter()
        .filter(|cert| cert.is_verified())
        .map(|cert| i64::from(cert.points.max(0)))
        .sum();
    i32::try_from(sum).unwrap_or(i32::MAX)
}

pub fn verified_count<'a, I>(certificates: I) -> usize
where
    I: IntoIterator<Item = &'a Certificate>,
{
    certificates
        .into_iter()
        .filter(|cert| cert.is_verified())
        .count()
}

pub fn pending_count<'a, I>(certificates: I) -> usize
where
    I: IntoIterator<Item = &'a Certificate>,
{
    certificates
        .into_iter()
        .filter(|cert| !cert.is_verified())
        .count()
}

/// `min(round(total / required * 100), 100)`, never below zero. A requirement
/// of zero or less is always met.
pub fn completion_percentage(total_points: i32, required_points: i32) -> i32 {
    if required_points <= 0 {
        return 100;
    }
    let ratio = f64::from(total_points.max(0)) / f64::from(required_points) * 100.0;
    (ratio.round() as i32).min(100)
}

pub fn remaining_points(total_points: i32, required_points: i32) -> i32 {
    (required_points - total_points).max(0)
}

pub fn progress(certificates: &[Certificate], required_points: i32) -> Progress {
    let total_points = verified_total(certificates);
    Progress {
        total_points,
        required_points,
        percentage: completion_percentage(total_points, required_points),
        remaining_points: remaining_points(total_points, required_points),
        verified_certificates: verified_count(certificates),
        pending_certificates: pending_count(certificates),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VerificationState;
    use chrono::Utc;
    use uuid::Uuid;

    fn cert(points: i32, verified: bool) -> Certificate {
        Certificate {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            file_url: "https://bucket.example/certuploads/cert.pdf".to_string(),
            points,
            state: VerificationState::from_flag(Some(verified)),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn only_verified_certificates_count() {
        let certs = vec![cert(15, true), cert(25, false), cert(10, true)];
        assert_eq!(verified_total(&certs), 25);
        assert_eq!(completion_percentage(verified_total(&certs), REQUIRED_POINTS), 25);
        assert_eq!(pending_count(&certs), 1);
        assert_eq!(verified_count(&certs), 2);
    }

    #[test]
    fn unverified_points_contribute_nothing() {
        let certs = vec![cert(500, false), cert(40, false)];
        assert_eq!(verified_total(&certs), 0);
        assert_eq!(verified_total(&Vec::<Certificate>::new()), 0);
    }

    #[test]
    fn percentage_is_clamped() {
        assert_eq!(completion_percentage(0, 100), 0);
        assert_eq!(completion_percentage(100, 100), 100);
        assert_eq!(completion_percentage(150, 100), 100);
        assert_eq!(completion_percentage(33, 200), 17);
        assert_eq!(completion_percentage(10, 0), 100);
    }

    #[test]
    fn percentage_never_decreases_as_points_grow() {
        let mut previous = 0;
        for total in 0..=250 {
            let current = completion_percentage(total, REQUIRED_POINTS);
            assert!(current >= previous, "dropped at {total}");
            previous = current;
        }
    }

    #[test]
    fn classifier_follows_category_table() {
        assert_eq!(default_points_for("hackathon_2024.pdf"), 25);
        assert_eq!(default_points_for("IEEE-Xtreme.png"), 15);
        assert_eq!(default_points_for("national_conference.jpg"), 15);
        assert_eq!(default_points_for("community-drive.pdf"), 10);
        assert_eq!(default_points_for("Workshop on Rust.pdf"), 20);
        assert_eq!(default_points_for("research_paper.pdf"), 30);
        assert_eq!(default_points_for("scan001.png"), DEFAULT_POINTS);
    }

    #[test]
    fn first_matching_category_wins() {
        assert_eq!(default_points_for("ieee_hackathon.pdf"), 15);
    }

    #[test]
    fn progress_reports_remaining_points() {
        let certs = vec![cert(30, true), cert(25, true), cert(20, false)];
        let progress = progress(&certs, REQUIRED_POINTS);
        assert_eq!(progress.total_points, 55);
        assert_eq!(progress.percentage, 55);
        assert_eq!(progress.remaining_points, 45);
        assert_eq!(progress.pending_certificates, 1);
        assert!(!progress.meets_requirement());

        let done = super::progress(&[cert(120, true)], REQUIRED_POINTS);
        assert_eq!(done.remaining_points, 0);
        assert_eq!(done.percentage, 100);
        assert!(done.meets_requirement());
    }
}
