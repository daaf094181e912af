use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

pub const DEFAULT_DB_URL: &str = "sqlite://data/properties.sqlite";
pub const DEFAULT_TABLE: &str = "properties";
pub const DEFAULT_FEED_URI: &str = "outputs/data/properties_output.json";
pub const DEFAULT_LOG_FILE: &str = "logs/full_pipeline.log";
pub const DEFAULT_CRAWL_COMMAND: &str = "scrapy crawl";

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

/// Runtime settings. Every field can be overridden through the environment
/// (or a `.env` file) using its upper-case name, e.g. `DB_TABLE=listings`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_url: String,
    pub db_table: String,
    pub concurrent_requests: u32,
    /// Seconds between crawl requests.
    pub download_delay: f64,
    pub feed_uri: PathBuf,
    /// `-` disables the log file.
    pub log_file: String,
    pub project_root: PathBuf,
    pub crawl_command: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        // A missing .env is normal outside development.
        let _ = dotenvy::dotenv();
        Self::build(config::Environment::default())
    }

    #[cfg(test)]
    pub fn from_map(vars: &[(&str, &str)]) -> Result<Self> {
        let map: std::collections::HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::build(config::Environment::default().source(Some(map)))
    }

    fn build(env: config::Environment) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .set_default("db_url", DEFAULT_DB_URL)?
            .set_default("db_table", DEFAULT_TABLE)?
            .set_default("concurrent_requests", 8_i64)?
            .set_default("download_delay", 1.0_f64)?
            .set_default("feed_uri", DEFAULT_FEED_URI)?
            .set_default("log_file", DEFAULT_LOG_FILE)?
            .set_default("project_root", ".")?
            .set_default("crawl_command", DEFAULT_CRAWL_COMMAND)?
            .add_source(env)
            .build()?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if !is_identifier(&self.db_table) {
            bail!("DB_TABLE must be a plain SQL identifier, got {:?}", self.db_table);
        }
        if self.crawl_command.split_whitespace().next().is_none() {
            bail!("CRAWL_COMMAND must not be empty");
        }
        if !self.download_delay.is_finite() || self.download_delay < 0.0 {
            bail!("DOWNLOAD_DELAY must be a non-negative number of seconds");
        }
        Ok(())
    }

    /// Where the crawl writes its artifact. Relative paths are resolved
    /// against the crawl's working directory.
    pub fn artifact_path(&self) -> PathBuf {
        if self.feed_uri.is_absolute() {
            self.feed_uri.clone()
        } else {
            self.project_root.join(&self.feed_uri)
        }
    }

    /// Program and leading arguments of the crawl command.
    pub fn crawl_program(&self) -> (String, Vec<String>) {
        let mut parts = self.crawl_command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        (program, parts.collect())
    }

    /// Environment forwarded to the crawl subprocess.
    pub fn crawl_env(&self) -> Vec<(String, String)> {
        vec![
            ("CONCURRENT_REQUESTS".into(), self.concurrent_requests.to_string()),
            ("DOWNLOAD_DELAY".into(), self.download_delay.to_string()),
            ("FEED_URI".into(), self.artifact_path().display().to_string()),
        ]
    }

    /// Resolve the effective log file, letting a CLI value win over config.
    pub fn log_path(&self, cli_value: Option<&str>) -> Option<PathBuf> {
        match cli_value.unwrap_or(&self.log_file) {
            "-" | "" => None,
            p => Some(PathBuf::from(p)),
        }
    }
}

fn identifier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).expect("valid identifier pattern"))
}

pub fn is_identifier(name: &str) -> bool {
    identifier().is_match(name)
}
