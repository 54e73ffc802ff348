use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

/// JWT secrets shipped in sample env files. Refuse to start with them.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub media_dir: PathBuf,
    pub jwt_secret: String,
    pub session_hours: i64,
    pub remember_days: i64,
    /// Program and arguments, split on whitespace. `None` disables uploads.
    pub classifier_cmd: Option<String>,
    pub classifier_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; tests pass a map instead of the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = lookup("MEDFEED_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("MEDFEED_JWT_SECRET is unset or still a placeholder; set it in .env and restart");
        }

        let classifier_cmd = lookup("MEDFEED_CLASSIFIER_CMD").filter(|c| !c.trim().is_empty());
        let max_upload_mb: usize = parse("MEDFEED_MAX_UPLOAD_MB", &var("MEDFEED_MAX_UPLOAD_MB", "10"))?;

        Ok(Self {
            host: var("MEDFEED_HOST", "0.0.0.0"),
            port: parse("MEDFEED_PORT", &var("MEDFEED_PORT", "5000"))?,
            db_path: var("MEDFEED_DB_PATH", "medfeed.db").into(),
            media_dir: var("MEDFEED_MEDIA_DIR", "./media").into(),
            jwt_secret,
            session_hours: parse("MEDFEED_SESSION_HOURS", &var("MEDFEED_SESSION_HOURS", "24"))?,
            remember_days: parse("MEDFEED_REMEMBER_DAYS", &var("MEDFEED_REMEMBER_DAYS", "30"))?,
            classifier_cmd,
            classifier_timeout: Duration::from_secs(parse(
                "MEDFEED_CLASSIFIER_TIMEOUT_SECS",
                &var("MEDFEED_CLASSIFIER_TIMEOUT_SECS", "30"),
            )?),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{} has invalid value '{}'", key, raw))
}
