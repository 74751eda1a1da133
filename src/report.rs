use std::fmt::Write;

use crate::models::StudentSummary;
use crate::points;

pub fn build_report(
    class_name: Option<&str>,
    required_points: i32,
    summaries: &[StudentSummary],
) -> String {
    let mut output = String::new();
    let class_label = class_name.unwrap_or("all classes");

    let _ = writeln!(output, "# Activity Points Report");
    let _ = writeln!(
        output,
        "Generated for {} (requirement {} points)",
        class_label, required_points
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Progress");

    if summaries.is_empty() {
        let _ = writeln!(output, "No students found.");
    } else {
        let mut ranked = summaries.to_vec();
        ranked.sort_by(|a, b| {
            b.total_points
                .cmp(&a.total_points)
                .then_with(|| a.full_name.cmp(&b.full_name))
        });
        for summary in ranked.iter() {
            let _ = writeln!(
                output,
                "- {} ({}, {}): {} points, {}% complete",
                summary.full_name,
                summary.ktu_id,
                summary.class_name,
                summary.total_points,
                points::completion_percentage(summary.total_points, required_points)
            );
        }
    }

    let below: Vec<&StudentSummary> = summaries
        .iter()
        .filter(|summary| points::remaining_points(summary.total_points, required_points) > 0)
        .collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Below Requirement");

    if below.is_empty() {
        let _ = writeln!(output, "Every student has met the requirement.");
    } else {
        for summary in below.iter() {
            let _ = writeln!(
                output,
                "- {} ({}) needs {} more points",
                summary.full_name,
                summary.ktu_id,
                points::remaining_points(summary.total_points, required_points)
            );
        }
    }

    let awaiting: Vec<&StudentSummary> = summaries
        .iter()
        .filter(|summary| summary.pending_certificates > 0)
        .collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Awaiting Review");

    if awaiting.is_empty() {
        let _ = writeln!(output, "No certificates awaiting review.");
    } else {
        for summary in awaiting.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): {} pending certificates",
                summary.full_name, summary.ktu_id, summary.pending_certificates
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn summary(name: &str, ktu_id: &str, total: i32, pending: usize) -> StudentSummary {
        StudentSummary {
            student_id: Uuid::new_v4(),
            ktu_id: ktu_id.to_string(),
            full_name: name.to_string(),
            class_name: "CSA".to_string(),
            total_points: total,
            verified_certificates: 2,
            pending_certificates: pending,
        }
    }

    #[test]
    fn report_ranks_and_flags_students() {
        let summaries = vec![
            summary("Rahul Menon", "MDL22CS081", 40, 0),
            summary("Anjali Nair", "MDL22CS075", 120, 2),
        ];
        let report = build_report(Some("CSA"), 100, &summaries);

        assert!(report
            .starts_with("# Activity Points Report\nGenerated for CSA (requirement 100 points)"));
        let anjali = report
            .find("- Anjali Nair (MDL22CS075, CSA): 120 points, 100% complete")
            .unwrap();
        let rahul = report
            .find("- Rahul Menon (MDL22CS081, CSA): 40 points, 40% complete")
            .unwrap();
        assert!(anjali < rahul);
        assert!(report.contains("- Rahul Menon (MDL22CS081) needs 60 more points"));
        assert!(!report.contains("Anjali Nair (MDL22CS075) needs"));
        assert!(report.contains("- Anjali Nair (MDL22CS075): 2 pending certificates"));
    }

    #[test]
    fn empty_report_says_so() {
        let report = build_report(None, 100, &[]);
        assert!(report.contains("Generated for all classes"));
        assert!(report.contains("No students found."));
        assert!(report.contains("Every student has met the requirement."));
        assert!(report.contains("No certificates awaiting review."));
    }
}
