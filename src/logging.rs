use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_ENV: &str = "FLIX_TUI_LOG";
pub const LOG_LEVEL_ENV: &str = "FLIX_TUI_LOG_LEVEL";

static INSTALLED: OnceCell<Option<PathBuf>> = OnceCell::new();

/// Log file named by `FLIX_TUI_LOG`, if any.
pub fn log_path() -> Option<PathBuf> {
    std::env::var_os(LOG_FILE_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn filter_directive(level: Option<&str>) -> String {
    match level.map(str::trim) {
        Some(level) if !level.is_empty() => level.to_string(),
        _ => "info".to_string(),
    }
}

/// Installs the file subscriber. The terminal owns stdout and stderr, so
/// without `FLIX_TUI_LOG` events are dropped. Returns the active log file.
pub fn init() -> Result<Option<PathBuf>> {
    INSTALLED
        .get_or_try_init(|| {
            let Some(path) = log_path() else {
                return Ok(None);
            };
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log dir {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open log file {}", path.display()))?;

            let level = std::env::var(LOG_LEVEL_ENV).ok();
            let filter = EnvFilter::try_new(filter_directive(level.as_deref()))
                .context("parse log level")?;
            tracing_subscriber::fmt()
                .with_writer(file)
                .with_ansi(false)
                .with_env_filter(filter)
                .try_init()
                .map_err(|err| anyhow::anyhow!(err))
                .context("install log subscriber")?;
            tracing::info!(version = crate::VERSION, "flix-tui starting");
            Ok(Some(path))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_defaults_to_info() {
        assert_eq!(filter_directive(None), "info");
        assert_eq!(filter_directive(Some("  ")), "info");
        assert_eq!(filter_directive(Some("flix_tui=debug")), "flix_tui=debug");
    }

    #[test]
    fn directives_parse() {
        assert!(EnvFilter::try_new(filter_directive(Some("debug"))).is_ok());
    }
}
