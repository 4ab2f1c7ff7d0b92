use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::collections::HashMap;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    /// When unset the service runs on the in-memory chat store.
    pub database_url: Option<String>,

    /// External NLP capability for requirement extraction. Absent means
    /// the heuristic fallback is used for every request.
    pub nlp_endpoint: Option<String>,
    pub nlp_timeout: Duration,
    /// Confidence recorded on fallback-extracted requirements.
    pub fallback_confidence: f64,

    /// Registration order doubles as the fixed source priority used for
    /// deduplication and ranking tie-breaks.
    pub enabled_sources: Vec<String>,
    /// `name=url` pairs; sources without an endpoint are skipped.
    pub source_endpoints: HashMap<String, String>,
    pub source_timeout: Duration,
    pub request_deadline: Duration,
    pub max_source_concurrency: usize,

    pub score_threshold: f64,
    pub max_results: usize,

    pub session_grace: Duration,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    /// 0 disables the background posting refresh worker.
    pub scrape_interval: Duration,

    pub public_rps: u32,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env_or("SERVER_ADDRESS", "0.0.0.0:8000"),
            database_url: env::var("DATABASE_URL").ok(),
            nlp_endpoint: env::var("NLP_ENDPOINT").ok(),
            nlp_timeout: Duration::from_millis(get_env_parse_or("NLP_TIMEOUT_MS", 2_000)?),
            fallback_confidence: get_env_parse_or("FALLBACK_CONFIDENCE", 0.35)?,
            enabled_sources: parse_list(&get_env_or("ENABLED_SOURCES", "linkedin,indeed,hr_ge")),
            source_endpoints: parse_endpoints(&get_env_or("SOURCE_ENDPOINTS", ""))?,
            source_timeout: Duration::from_millis(get_env_parse_or("SOURCE_TIMEOUT_MS", 10_000)?),
            request_deadline: Duration::from_millis(get_env_parse_or(
                "REQUEST_DEADLINE_MS",
                25_000,
            )?),
            max_source_concurrency: get_env_parse_or("MAX_SOURCE_CONCURRENCY", 4)?,
            score_threshold: get_env_parse_or("SCORE_THRESHOLD", 0.3)?,
            max_results: get_env_parse_or("MAX_RESULTS", 10)?,
            session_grace: Duration::from_secs(get_env_parse_or("SESSION_GRACE_SECS", 120)?),
            heartbeat_interval: Duration::from_secs(get_env_parse_or("HEARTBEAT_SECS", 30)?),
            idle_timeout: Duration::from_secs(get_env_parse_or("IDLE_TIMEOUT_SECS", 90)?),
            scrape_interval: Duration::from_secs(get_env_parse_or("SCRAPE_INTERVAL_SECS", 0)?),
            public_rps: get_env_parse_or("PUBLIC_RPS", 50)?,
        })
    }
}

fn get_env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_endpoints(raw: &str) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (name, url) = pair
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("Invalid SOURCE_ENDPOINTS entry: {}", pair)))?;
        out.insert(name.trim().to_string(), url.trim().to_string());
    }
    Ok(out)
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
