use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use portal_ledger::bucket::LocalBucket;
use portal_ledger::config::Config;
use portal_ledger::db::{self, PgStore};
use portal_ledger::logging;
use portal_ledger::models::{parse_id, Decision, VerificationState};
use portal_ledger::{export, points, report, scholarship, Ledger};
use sqlx::postgres::PgPoolOptions;

#[derive(Parser)]
#[command(name = "portal-ledger")]
#[command(
    about = "Activity point and scholarship ledger for the student portal",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import a student roster from a CSV file (id, ktu_id, full_name, class_name)
    ImportStudents {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Upload a certificate for a student
    Upload {
        #[arg(long)]
        student: String,
        #[arg(long)]
        file: PathBuf,
        /// Points to award; classified from the file name when omitted
        #[arg(long)]
        points: Option<i32>,
    },
    /// List a student's certificates, oldest first
    List {
        #[arg(long)]
        student: String,
        #[arg(long)]
        json: bool,
    },
    /// Change the points of a pending certificate
    SetPoints {
        #[arg(long)]
        certificate: String,
        #[arg(long)]
        points: i32,
    },
    /// Flip verification, failing if the certificate is no longer in the expected state
    Toggle {
        #[arg(long)]
        certificate: String,
        /// State you last saw: pending or verified
        #[arg(long)]
        expect: VerificationState,
    },
    /// Move a certificate to a verification state (no-op if already there)
    Verify {
        #[arg(long)]
        certificate: String,
        #[arg(long, default_value = "verified")]
        state: VerificationState,
    },
    /// Delete a pending certificate and its file
    Withdraw {
        #[arg(long)]
        certificate: String,
    },
    /// Show total points and completion for a student
    Progress {
        #[arg(long)]
        student: String,
        #[arg(long)]
        json: bool,
    },
    /// Compare cached totals against certificates
    Audit {
        #[arg(long)]
        class: Option<String>,
        /// Recompute every drifted total
        #[arg(long)]
        repair: bool,
    },
    /// Export per-student totals and pending counts as CSV
    Export {
        #[arg(long)]
        class: Option<String>,
        #[arg(long, default_value = "activity_points.csv")]
        out: PathBuf,
    },
    /// Generate a markdown progress report
    Report {
        #[arg(long)]
        class: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// File a scholarship application
    Apply {
        #[arg(long)]
        student: String,
        #[arg(long)]
        scholarship: String,
    },
    /// List a student's scholarship applications
    Applications {
        #[arg(long)]
        student: String,
    },
    /// Approve or reject a pending scholarship application
    Decide {
        #[arg(long)]
        application: String,
        /// approve or reject
        #[arg(long)]
        decision: Decision,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Save reviewer notes on an application
    Notes {
        #[arg(long)]
        application: String,
        #[arg(long)]
        notes: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    logging::init_logging(config.log_format, &config.log_level);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = PgStore::new(pool.clone());
    let bucket = LocalBucket::new(&config.bucket_dir, &config.public_base_url);
    let ledger = Ledger::new(store, bucket).with_required_points(config.required_points);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportStudents { csv } => {
            let imported = db::import_students(&pool, &csv).await?;
            println!("Imported {imported} students from {}.", csv.display());
        }
        Commands::Upload {
            student,
            file,
            points,
        } => {
            let student_id = parse_id("student", &student)?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .and_then(|name| name.to_str())
                .context("certificate path has no usable file name")?;
            let cert = ledger
                .submit_certificate(student_id, file_name, &bytes, points)
                .await?;
            println!(
                "Uploaded {} as {} ({} points, {}).",
                file.display(),
                cert.id,
                cert.points,
                cert.state
            );
        }
        Commands::List { student, json } => {
            let student_id = parse_id("student", &student)?;
            let certificates = ledger.list_certificates(student_id).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&certificates)?);
            } else if certificates.is_empty() {
                println!("No certificates uploaded yet.");
            } else {
                for cert in certificates.iter() {
                    println!(
                        "- {} {} [{}] {} points, submitted {} ({})",
                        cert.id,
                        cert.name(),
                        cert.state,
                        cert.points,
                        cert.submitted_at.format("%Y-%m-%d"),
                        cert.file_url
                    );
                }
            }
        }
        Commands::SetPoints {
            certificate,
            points,
        } => {
            let certificate_id = parse_id("certificate", &certificate)?;
            let cert = ledger.set_points(certificate_id, points).await?;
            println!("{} now carries {} points.", cert.name(), cert.points);
        }
        Commands::Toggle {
            certificate,
            expect,
        } => {
            let certificate_id = parse_id("certificate", &certificate)?;
            let committed = ledger.toggle_verification(certificate_id, expect).await?;
            println!(
                "{} is now {}; student total {} points.",
                committed.certificate.name(),
                committed.certificate.state,
                committed.total
            );
        }
        Commands::Verify { certificate, state } => {
            let certificate_id = parse_id("certificate", &certificate)?;
            let committed = ledger.set_verification(certificate_id, state).await?;
            println!(
                "{} is {}; student total {} points.",
                committed.certificate.name(),
                committed.certificate.state,
                committed.total
            );
        }
        Commands::Withdraw { certificate } => {
            let certificate_id = parse_id("certificate", &certificate)?;
            let committed = ledger.withdraw_certificate(certificate_id).await?;
            println!(
                "Withdrew {}; student total {} points.",
                committed.certificate.name(),
                committed.total
            );
        }
        Commands::Progress { student, json } => {
            let student_id = parse_id("student", &student)?;
            let progress = ledger.progress(student_id).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&progress)?);
            } else {
                println!(
                    "{} of {} points ({}%), {} remaining; {} verified, {} pending.",
                    progress.total_points,
                    progress.required_points,
                    progress.percentage,
                    progress.remaining_points,
                    progress.verified_certificates,
                    progress.pending_certificates
                );
            }
        }
        Commands::Audit { class, repair } => {
            let drift = if repair {
                ledger.repair_totals(class.as_deref()).await?
            } else {
                ledger.audit_totals(class.as_deref()).await?
            };

            if drift.is_empty() {
                println!("All cached totals match their certificates.");
                return Ok(());
            }

            let verb = if repair { "Repaired" } else { "Found" };
            println!("{verb} {} drifted totals:", drift.len());
            for entry in drift.iter() {
                println!(
                    "- {} ({}): cached {} vs recomputed {}",
                    entry.full_name, entry.student_id, entry.cached, entry.recomputed
                );
            }
        }
        Commands::Export { class, out } => {
            let summaries = ledger.summaries(class.as_deref()).await?;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            export::write_summaries(file, &summaries)?;
            println!("Exported {} students to {}.", summaries.len(), out.display());
        }
        Commands::Report { class, out } => {
            let summaries = ledger.summaries(class.as_deref()).await?;
            let report =
                report::build_report(class.as_deref(), ledger.required_points(), &summaries);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Apply {
            student,
            scholarship,
        } => {
            let student_id = parse_id("student", &student)?;
            let scholarship_id = parse_id("scholarship", &scholarship)?;
            let progress = ledger.progress(student_id).await?;
            let application =
                scholarship::apply(ledger.store(), student_id, scholarship_id).await?;
            println!(
                "Application {} filed ({}% of activity requirement).",
                application.id,
                points::completion_percentage(progress.total_points, progress.required_points)
            );
        }
        Commands::Applications { student } => {
            let student_id = parse_id("student", &student)?;
            let applications = scholarship::list_applications(ledger.store(), student_id).await?;

            if applications.is_empty() {
                println!("No scholarship applications.");
                return Ok(());
            }

            println!(
                "{} applications, {} awaiting review:",
                applications.len(),
                scholarship::pending_applications(&applications)
            );
            for application in applications.iter() {
                println!(
                    "- {} scholarship {} [{}] applied {}{}",
                    application.id,
                    application.scholarship_id,
                    application.status,
                    application.applied_at.format("%Y-%m-%d"),
                    application
                        .reviewer_notes
                        .as_deref()
                        .map(|notes| format!(": {notes}"))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Decide {
            application,
            decision,
            notes,
        } => {
            let application_id = parse_id("application", &application)?;
            let decided =
                scholarship::decide(ledger.store(), application_id, decision, notes.as_deref())
                    .await?;
            println!("Application {} {}.", decided.id, decided.status);
        }
        Commands::Notes { application, notes } => {
            let application_id = parse_id("application", &application)?;
            let updated = scholarship::save_notes(ledger.store(), application_id, &notes).await?;
            println!("Notes saved on application {}.", updated.id);
        }
    }

    Ok(())
}
