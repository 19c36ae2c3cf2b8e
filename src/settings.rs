use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Runtime settings, layered from `activity_sync.{toml,yaml,json}` (optional)
/// and `ACTSYNC_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the request emails come from.
    pub sender: String,
    /// Phrases every request email must contain.
    pub phrases: Vec<String>,
    /// Destination document id.
    pub doc_id: String,
    /// OAuth access token for the mail and sheets APIs.
    pub access_token: String,
    pub macro_batch_size: usize,
    pub fetch_concurrency: usize,
    pub page_size: usize,
    pub max_candidates: usize,
    /// Append error outcomes to the sync log. Logged errors are never retried.
    pub log_errors: bool,
    pub link_base_url: String,
    /// SQLite file used by `--local` runs.
    pub db_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            sender: String::new(),
            phrases: vec![
                "Activity Request Form".to_string(),
                "Request for Approval".to_string(),
            ],
            doc_id: "local".to_string(),
            access_token: String::new(),
            macro_batch_size: 10,
            fetch_concurrency: 5,
            page_size: 500,
            max_candidates: 1000,
            log_errors: false,
            link_base_url: "https://example.invalid/documents".to_string(),
            db_path: PathBuf::from("data/activity_sync.db"),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::with_name("activity_sync").required(false))
            .add_source(
                Environment::with_prefix("ACTSYNC")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("phrases"),
            )
            .build()
            .context("Failed to read configuration")?;
        let settings: Settings = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(settings.normalized())
    }

    /// Clamp sizes that would stall the pipeline.
    fn normalized(mut self) -> Self {
        self.macro_batch_size = self.macro_batch_size.max(1);
        self.fetch_concurrency = self.fetch_concurrency.max(1);
        self.page_size = self.page_size.clamp(1, 500);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_sizes() {
        let s = Settings::default();
        assert_eq!(s.macro_batch_size, 10);
        assert_eq!(s.fetch_concurrency, 5);
        assert_eq!(s.page_size, 500);
        assert_eq!(s.max_candidates, 1000);
        assert!(!s.log_errors);
    }

    #[test]
    fn partial_source_keeps_defaults() {
        let cfg = Config::builder()
            .set_override("sender", "osa@school.edu")
            .unwrap()
            .set_override("log_errors", true)
            .unwrap()
            .set_override("page_size", 9000_i64)
            .unwrap()
            .build()
            .unwrap();
        let s: Settings = cfg.try_deserialize::<Settings>().unwrap().normalized();
        assert_eq!(s.sender, "osa@school.edu");
        assert!(s.log_errors);
        assert_eq!(s.page_size, 500);
        assert_eq!(s.macro_batch_size, 10);
    }
}
