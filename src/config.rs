use std::path::PathBuf;

use anyhow::Context;

use crate::logging::LogFormat;
use crate::points::REQUIRED_POINTS;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub bucket_dir: PathBuf,
    pub public_base_url: String,
    pub required_points: i32,
    pub log_format: LogFormat,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        let max_connections = match lookup("PORTAL_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PORTAL_MAX_CONNECTIONS is not a number: {raw}"))?,
            None => 5,
        };

        let required_points = match lookup("PORTAL_REQUIRED_POINTS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PORTAL_REQUIRED_POINTS is not a number: {raw}"))?,
            None => REQUIRED_POINTS,
        };
        if required_points <= 0 {
            anyhow::bail!("PORTAL_REQUIRED_POINTS must be positive, got {required_points}");
        }

        let bucket_dir = lookup("PORTAL_BUCKET_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("certuploads"));
        let public_base_url = lookup("PORTAL_PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("file://{}", bucket_dir.display()));

        let log_format = match lookup("PORTAL_LOG_FORMAT").as_deref() {
            None | Some("human") => LogFormat::Human,
            Some("json") => LogFormat::Json,
            Some(other) => anyhow::bail!("PORTAL_LOG_FORMAT must be human or json, got {other}"),
        };
        let log_level = lookup("PORTAL_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            database_url,
            max_connections,
            bucket_dir,
            public_base_url,
            required_points,
            log_format,
            log_level,
        })
    }
}
