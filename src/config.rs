use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "FLIX";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000/".to_string()
}

fn default_user_agent() -> String {
    format!("flix-tui/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LibraryConfig {
    /// Drop listing responses that belong to a superseded navigation.
    #[serde(default)]
    pub latest_request_wins: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    #[serde(default = "default_video_command")]
    pub video_command: Vec<String>,
    #[serde(default = "default_native_formats")]
    pub native_formats: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            video_command: default_video_command(),
            native_formats: default_native_formats(),
        }
    }
}

fn default_video_command() -> Vec<String> {
    vec![
        "mpv".into(),
        "--force-window=yes".into(),
        "--force-media-title=%TITLE%".into(),
        "%URL%".into(),
    ]
}

fn default_native_formats() -> Vec<String> {
    vec!["video/mp4".into(), "video/quicktime".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverlayConfig {
    #[serde(default = "default_overlay_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rain_interval", with = "humantime_serde")]
    pub rain_interval: Duration,
    #[serde(default = "default_ticker_interval", with = "humantime_serde")]
    pub ticker_interval: Duration,
    #[serde(default = "default_display_duration", with = "humantime_serde")]
    pub display_duration: Duration,
    #[serde(default = "default_column_width")]
    pub column_width: u16,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: default_overlay_enabled(),
            rain_interval: default_rain_interval(),
            ticker_interval: default_ticker_interval(),
            display_duration: default_display_duration(),
            column_width: default_column_width(),
        }
    }
}

fn default_overlay_enabled() -> bool {
    true
}

fn default_rain_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_ticker_interval() -> Duration {
    Duration::from_millis(5000)
}

fn default_display_duration() -> Duration {
    Duration::from_secs(4)
}

fn default_column_width() -> u16 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: i64,
    #[serde(default = "default_media_ttl_duration", with = "humantime_serde")]
    pub default_ttl: Duration,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_size_bytes: default_max_size_bytes(),
            default_ttl: default_media_ttl_duration(),
            workers: default_workers(),
        }
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("flix-tui"))
}

fn default_max_size_bytes() -> i64 {
    200 * 1024 * 1024
}

fn default_media_ttl_duration() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_workers() -> usize {
    2
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.server.base_url.trim().is_empty() {
        base.server.base_url = other.server.base_url;
    }
    if !other.server.user_agent.trim().is_empty() {
        base.server.user_agent = other.server.user_agent;
    }
    if !other.server.timeout.is_zero() {
        base.server.timeout = other.server.timeout;
    }

    base.library.latest_request_wins = other.library.latest_request_wins;

    if !other.player.video_command.is_empty() {
        base.player.video_command = other.player.video_command;
    }
    base.player.native_formats = other.player.native_formats;

    base.overlay.enabled = other.overlay.enabled;
    if !other.overlay.rain_interval.is_zero() {
        base.overlay.rain_interval = other.overlay.rain_interval;
    }
    if !other.overlay.ticker_interval.is_zero() {
        base.overlay.ticker_interval = other.overlay.ticker_interval;
    }
    if !other.overlay.display_duration.is_zero() {
        base.overlay.display_duration = other.overlay.display_duration;
    }
    if other.overlay.column_width != 0 {
        base.overlay.column_width = other.overlay.column_width;
    }

    if other.media.cache_dir.is_some() {
        base.media.cache_dir = other.media.cache_dir;
    }
    if other.media.max_size_bytes != 0 {
        base.media.max_size_bytes = other.media.max_size_bytes;
    }
    base.media.default_ttl = other.media.default_ttl;
    if other.media.workers != 0 {
        base.media.workers = other.media.workers;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "server.base_url" => cfg.server.base_url = value,
        "server.user_agent" => cfg.server.user_agent = value,
        "server.timeout" => {
            if let Some(duration) = nonzero_duration(&value) {
                cfg.server.timeout = duration;
            }
        }
        "library.latest_request_wins" => {
            cfg.library.latest_request_wins = env_truthy(&value);
        }
        "player.video_command" => {
            cfg.player.video_command = split_list(&value);
        }
        "player.native_formats" => {
            cfg.player.native_formats = split_list(&value);
        }
        "overlay.enabled" => cfg.overlay.enabled = env_truthy(&value),
        "overlay.rain_interval" => {
            if let Some(duration) = nonzero_duration(&value) {
                cfg.overlay.rain_interval = duration;
            }
        }
        "overlay.ticker_interval" => {
            if let Some(duration) = nonzero_duration(&value) {
                cfg.overlay.ticker_interval = duration;
            }
        }
        "overlay.display_duration" => {
            if let Some(duration) = nonzero_duration(&value) {
                cfg.overlay.display_duration = duration;
            }
        }
        "overlay.column_width" => {
            if let Ok(parsed) = value.parse::<u16>() {
                if parsed > 0 {
                    cfg.overlay.column_width = parsed;
                }
            }
        }
        "media.cache_dir" => cfg.media.cache_dir = Some(PathBuf::from(value)),
        "media.max_size_bytes" => {
            if let Ok(parsed) = value.parse::<i64>() {
                cfg.media.max_size_bytes = parsed;
            }
        }
        "media.default_ttl" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.media.default_ttl = duration;
            }
        }
        "media.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.media.workers = parsed;
            }
        }
        _ => {}
    }
}

/// Zero would turn the tickers into busy loops, so it is ignored like an
/// unparsable value.
fn nonzero_duration(value: &str) -> Option<Duration> {
    humantime::parse_duration(value.trim())
        .ok()
        .filter(|duration| !duration.is_zero())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("flix-tui").join("config.yaml"))
}

/// Writes `server.base_url` into the config file, keeping every other
/// setting already stored there.
pub fn save_server_url(path: Option<PathBuf>, base_url: &str) -> Result<PathBuf> {
    let base_url = base_url.trim();
    anyhow::ensure!(!base_url.is_empty(), "config: server.base_url is required");
    url::Url::parse(base_url)
        .with_context(|| format!("config: server.base_url {base_url:?} is not a valid URL"))?;

    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };
    cfg.server.base_url = base_url.to_string();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    fn isolated(dir: &Path, prefix: &str) -> LoadOptions {
        LoadOptions {
            config_file: Some(dir.join("missing.yaml")),
            env_prefix: Some(prefix.to_string()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(isolated(dir.path(), "FLIX_TEST_DEFAULTS")).unwrap();
        assert_eq!(cfg.server.base_url, default_base_url());
        assert_eq!(cfg.overlay.rain_interval, Duration::from_millis(50));
        assert_eq!(cfg.overlay.ticker_interval, Duration::from_millis(5000));
        assert!(!cfg.library.latest_request_wins);
        assert_eq!(cfg.player.native_formats, default_native_formats());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "server:\n  base_url: http://media.lan:8080/\nlibrary:\n  latest_request_wins: true\noverlay:\n  display_duration: 2s\nplayer:\n  native_formats: [video/mp4, video/x-matroska]\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("FLIX_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.server.base_url, "http://media.lan:8080/");
        assert!(cfg.library.latest_request_wins);
        assert_eq!(cfg.overlay.display_duration, Duration::from_secs(2));
        assert_eq!(cfg.overlay.ticker_interval, Duration::from_millis(5000));
        assert_eq!(
            cfg.player.native_formats,
            vec!["video/mp4".to_string(), "video/x-matroska".to_string()]
        );
    }

    #[test]
    fn save_server_url_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        save_server_url(Some(path.clone()), "http://10.0.0.2:5000/").unwrap();
        let saved = read_config_file(&path).unwrap();
        assert_eq!(saved.server.base_url, "http://10.0.0.2:5000/");
        assert!(save_server_url(Some(path), "not a url").is_err());
    }

    #[test]
    fn env_overrides() {
        let dir = tempdir().unwrap();
        env::set_var("FLIX_TEST_ENV_OVERLAY__TICKER_INTERVAL", "750ms");
        env::set_var("FLIX_TEST_ENV_SERVER__BASE_URL", "http://nas:5000/");
        env::set_var("FLIX_TEST_ENV_LIBRARY__LATEST_REQUEST_WINS", "yes");
        let cfg = load(isolated(dir.path(), "FLIX_TEST_ENV")).unwrap();
        assert_eq!(cfg.overlay.ticker_interval, Duration::from_millis(750));
        assert_eq!(cfg.server.base_url, "http://nas:5000/");
        assert!(cfg.library.latest_request_wins);
        env::remove_var("FLIX_TEST_ENV_OVERLAY__TICKER_INTERVAL");
        env::remove_var("FLIX_TEST_ENV_SERVER__BASE_URL");
        env::remove_var("FLIX_TEST_ENV_LIBRARY__LATEST_REQUEST_WINS");
    }

    #[test]
    fn zero_durations_from_env_are_ignored() {
        let dir = tempdir().unwrap();
        env::set_var("FLIX_TEST_ZERO_OVERLAY__TICKER_INTERVAL", "0s");
        env::set_var("FLIX_TEST_ZERO_OVERLAY__RAIN_INTERVAL", "0ms");
        env::set_var("FLIX_TEST_ZERO_OVERLAY__DISPLAY_DURATION", "0s");
        env::set_var("FLIX_TEST_ZERO_SERVER__TIMEOUT", "0s");
        let cfg = load(isolated(dir.path(), "FLIX_TEST_ZERO")).unwrap();
        let defaults = Config::default();
        assert_eq!(cfg.overlay.ticker_interval, defaults.overlay.ticker_interval);
        assert_eq!(cfg.overlay.rain_interval, defaults.overlay.rain_interval);
        assert_eq!(cfg.overlay.display_duration, defaults.overlay.display_duration);
        assert_eq!(cfg.server.timeout, defaults.server.timeout);
        env::remove_var("FLIX_TEST_ZERO_OVERLAY__TICKER_INTERVAL");
        env::remove_var("FLIX_TEST_ZERO_OVERLAY__RAIN_INTERVAL");
        env::remove_var("FLIX_TEST_ZERO_OVERLAY__DISPLAY_DURATION");
        env::remove_var("FLIX_TEST_ZERO_SERVER__TIMEOUT");
    }
}
