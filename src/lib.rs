//! Activity-point ledger for the student portal: certificate submission and
//! review, verified-point totals, completion against the required points,
//! and scholarship application tracking.

pub mod bucket;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod ledger;
pub mod logging;
pub mod memory;
pub mod models;
pub mod points;
pub mod report;
pub mod scholarship;
pub mod store;

pub use error::LedgerError;
pub use ledger::Ledger;
pub use models::{Certificate, VerificationState};
