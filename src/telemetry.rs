//! Tracing setup: per-session log file under `/tmp/scriptorium/<project>/`.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing_subscriber::EnvFilter;

const LOG_ROOT: &str = "/tmp/scriptorium";

/// Initialize the global subscriber writing to
/// `/tmp/scriptorium/<project>/run_<UTC>.log` at INFO and above.
/// `SCRIPTORIUM_LOG` overrides the filter. Returns the log file path.
pub fn init(project: &str) -> anyhow::Result<PathBuf> {
    let dir = PathBuf::from(LOG_ROOT).join(project);
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let path = dir.join(format!("run_{stamp}.log"));
    let file = fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;

    let filter = EnvFilter::try_from_env("SCRIPTORIUM_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();

    Ok(path)
}
