use std::io::Write;

use anyhow::Context;

use crate::models::StudentSummary;

const HEADER: [&str; 7] = [
    "student_id",
    "ktu_id",
    "name",
    "class",
    "total_points",
    "verified_certificates",
    "pending_certificates",
];

/// Writes one spreadsheet row per student: identifiers, total verified points
/// and certificate counts. The header row is always written.
pub fn write_summaries<W: Write>(writer: W, summaries: &[StudentSummary]) -> anyhow::Result<()> {
    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv.write_record(HEADER).context("failed to write header")?;
    for summary in summaries {
        csv.serialize(summary)
            .with_context(|| format!("failed to write row for {}", summary.ktu_id))?;
    }
    csv.flush().context("failed to flush export")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn export_has_header_and_rows() {
        let id = Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2").unwrap();
        let summaries = vec![StudentSummary {
            student_id: id,
            ktu_id: "MDL22CS075".to_string(),
            full_name: "Anjali Nair".to_string(),
            class_name: "CSA".to_string(),
            total_points: 45,
            verified_certificates: 3,
            pending_certificates: 2,
        }];

        let mut out = Vec::new();
        write_summaries(&mut out, &summaries).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(HEADER.join(",").as_str()));
        assert_eq!(
            lines.next(),
            Some("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2,MDL22CS075,Anjali Nair,CSA,45,3,2")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn empty_export_still_has_header() {
        let mut out = Vec::new();
        write_summaries(&mut out, &[]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "student_id,ktu_id,name,class,total_points,verified_certificates,\
             pending_certificates\n"
        );
    }
}
