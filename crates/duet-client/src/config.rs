use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Client settings, read from `DUET_*` environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub db_path: PathBuf,
    pub blob_dir: PathBuf,
    pub blob_base_url: String,
    pub user_id: String,
    pub partner_id: String,
    /// When unset the conversation is looked up in the user's summaries,
    /// or created.
    pub conversation_id: Option<String>,
    /// How often the SQLite file is checked for the partner's writes.
    pub watch_interval: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        let user_id = required("DUET_USER")?;
        let partner_id = required("DUET_PARTNER")?;
        if user_id == partner_id {
            bail!("DUET_USER and DUET_PARTNER must differ");
        }

        let watch_ms: u64 = std::env::var("DUET_WATCH_MS")
            .unwrap_or_else(|_| "250".into())
            .parse()
            .context("DUET_WATCH_MS must be a number of milliseconds")?;

        Ok(Self {
            db_path: std::env::var("DUET_DB_PATH")
                .unwrap_or_else(|_| "duet.db".into())
                .into(),
            blob_dir: std::env::var("DUET_BLOB_DIR")
                .unwrap_or_else(|_| "./duet-blobs".into())
                .into(),
            blob_base_url: std::env::var("DUET_BLOB_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9000".into()),
            user_id,
            partner_id,
            conversation_id: std::env::var("DUET_CONVERSATION")
                .ok()
                .filter(|id| !id.trim().is_empty()),
            watch_interval: Duration::from_millis(watch_ms.max(10)),
        })
    }
}

fn required(name: &str) -> Result<String> {
    let value = std::env::var(name).with_context(|| format!("{} is not set", name))?;
    if value.trim().is_empty() {
        bail!("{} is empty", name);
    }
    Ok(value.trim().to_string())
}
