use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::api;
use crate::config;
use crate::data::{self, CommentService, LibraryService, OverlayService};
use crate::logging;
use crate::media;
use crate::playback::NativeFormats;
use crate::session::ResponseOrdering;
use crate::storage;
use crate::ui;

/// Settings taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Browse the built-in sample library instead of a server.
    pub demo: bool,
    /// Base URL used for this run only.
    pub server: Option<String>,
    /// Print the effective configuration and exit.
    pub print_config: bool,
}

pub fn effective_config(opts: &RunOptions) -> Result<config::Config> {
    let mut cfg = config::load(config::LoadOptions::default()).context("load config")?;
    if let Some(server) = opts.server.as_deref() {
        let server = server.trim();
        anyhow::ensure!(!server.is_empty(), "--server needs a URL");
        api::Endpoints::new(server).with_context(|| format!("invalid server URL {server:?}"))?;
        cfg.server.base_url = server.to_string();
    }
    Ok(cfg)
}

pub fn run(opts: RunOptions) -> Result<()> {
    let cfg = effective_config(&opts)?;
    if opts.print_config {
        print!("{}", serde_yaml::to_string(&cfg).context("serialize config")?);
        return Ok(());
    }

    let log_file = logging::init().context("initialize logging")?;
    let config_path = config::default_path();
    let display_path = friendly_path(config_path.as_ref());

    let store =
        Arc::new(storage::Store::open(storage::Options::default()).context("open storage")?);
    let preferences = store.load_preferences().unwrap_or_else(|err| {
        tracing::warn!("failed to load preferences: {err:#}");
        storage::Preferences::default()
    });

    let endpoints = api::Endpoints::new(&cfg.server.base_url)
        .with_context(|| format!("invalid server URL {:?}", cfg.server.base_url))?;

    let library_service: Arc<dyn LibraryService>;
    let comment_service: Arc<dyn CommentService>;
    let overlay_service: Arc<dyn OverlayService>;
    let status: String;

    if opts.demo {
        library_service = Arc::new(data::MockLibraryService::default());
        comment_service = Arc::new(data::MockCommentService::default());
        overlay_service = Arc::new(data::MockOverlayService);
        status = "Demo library. Enter opens, h goes back, / searches, ? shows keys.".to_string();
    } else {
        let client = api::Client::new(api::ClientConfig {
            base_url: cfg.server.base_url.clone(),
            user_agent: cfg.server.user_agent.clone(),
            timeout: Some(cfg.server.timeout).filter(|t| *t > Duration::ZERO),
            http_client: None,
        })
        .context("create media server client")?;
        let client = Arc::new(client);
        library_service = Arc::new(data::HttpLibraryService::new(client.clone()));
        comment_service = Arc::new(data::HttpCommentService::new(client.clone()));
        overlay_service = Arc::new(data::HttpOverlayService::new(client));
        status = format!("Connected to {}", endpoints.base());
    }
    tracing::info!(
        server = %endpoints.base(),
        demo = opts.demo,
        log = ?log_file,
        "starting terminal ui"
    );

    let mut media_cfg = media::Config::from(&cfg.media);
    media_cfg.user_agent = cfg.server.user_agent.clone();
    let media_manager = match media::Manager::new(store.clone(), media_cfg) {
        Ok(manager) => Some(Arc::new(manager)),
        Err(err) => {
            tracing::warn!("thumbnails disabled: {err:#}");
            None
        }
    };

    let options = ui::Options {
        status_message: status,
        library: library_service,
        comments: comment_service,
        overlay: Some(overlay_service),
        endpoints,
        store: store.clone(),
        preferences,
        media: media_manager.clone(),
        native_formats: NativeFormats::new(&cfg.player.native_formats),
        player_command: cfg.player.video_command.clone(),
        ordering: ResponseOrdering::from_config(cfg.library.latest_request_wins),
        overlay_config: cfg.overlay.clone(),
        config_path: display_path,
    };

    let mut model = ui::Model::new(options);
    let result = model.run();
    drop(model);
    drop(media_manager);
    result
}

fn friendly_path(path: Option<&std::path::PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/flix-tui/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friendly_path_falls_back_to_default() {
        assert_eq!(friendly_path(None), "~/.config/flix-tui/config.yaml");
    }

    #[test]
    fn server_override_must_be_a_url() {
        let opts = RunOptions {
            server: Some("not a url".into()),
            ..RunOptions::default()
        };
        assert!(effective_config(&opts).is_err());
    }
}
