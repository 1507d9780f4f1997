use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{anyhow, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `SIDECHAT_LOG=debug`.
pub const LOG_ENV: &str = "SIDECHAT_LOG";
pub const LOG_FILE: &str = "sidechat.log";

/// Sends logs to a file in `log_dir`; the terminal belongs to the UI. Keep the
/// returned guard alive until exit so buffered lines are flushed.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let mut log_file_opts = OpenOptions::new();
    log_file_opts.create(true).append(true);

    // The log may contain request errors; keep it private to the user.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        log_file_opts.mode(0o600);
    }

    let log_file = log_file_opts.open(log_dir.join(LOG_FILE))?;
    let (writer, guard) = tracing_appender::non_blocking(log_file);

    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|e| anyhow!("failed to install logger: {}", e))?;

    Ok(guard)
}
