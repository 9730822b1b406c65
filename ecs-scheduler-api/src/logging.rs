//! Logging configuration module.
//!
//! Structured logging to stdout, plus a rotating file log when a log
//! folder is configured. Each host writes under its own subfolder so
//! co-located instances do not clobber each other's files.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Keeps the background log writer alive; drop it only at shutdown.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize logging based on configuration.
pub fn init(config: &LoggingConfig) -> std::io::Result<LogGuard> {
    let filter = config
        .level
        .as_deref()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let file_writer = match &config.log_folder {
        Some(folder) => {
            let host = hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "local".to_string());
            let log_dir = folder.join(host);
            std::fs::create_dir_all(&log_dir)?;
            let appender = tracing_appender::rolling::daily(log_dir, "app.log");
            Some(tracing_appender::non_blocking(appender))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer());
    let guard = match file_writer {
        Some((writer, guard)) => {
            let _ = registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .try_init();
            Some(guard)
        }
        None => {
            let _ = registry.try_init();
            None
        }
    };

    Ok(LogGuard { _file_guard: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_creates_host_log_folder() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: Some("debug".to_string()),
            log_folder: Some(dir.path().to_path_buf()),
        };
        // A second init in the same process is a no-op for the global
        // subscriber but must still create the folder.
        let _ = init(&config);
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
