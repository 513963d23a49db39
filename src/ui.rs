use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::io::{self, Stdout};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, Borders, Clear, List, ListItem, ListState, Padding, Paragraph, Widget, Wrap,
};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};

use crate::api::Endpoints;
use crate::comments::{self, stars, Comment, ComposeError, Composer, ComposerField};
use crate::config::OverlayConfig;
use crate::data::{CommentService, LibraryService, OverlayService};
use crate::library::{self, Density, DirectoryListing, Tile, TileAction, TileSet};
use crate::media::{self, Preview};
use crate::overlay::{DigitRain, OverlayCell, OverlayView, Ticker};
use crate::path::LibraryPath;
use crate::playback::{self, NativeFormats, PlaybackSource};
use crate::session::{NavigationOutcome, ResponseOrdering, Session};
use crate::storage::{Preferences, Store};
use crate::video::{self, PlayerSession};

const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);
const COLOR_RATING: Color = Color::Rgb(249, 226, 175);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const PREVIEW_ROWS: u16 = 8;
const COMPOSER_HEIGHT: u16 = 7;
const PREVIEW_CACHE_MAX: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Pane {
    Library,
    Comments,
    Composer,
}

impl Pane {
    fn title(self) -> &'static str {
        match self {
            Pane::Library => "Library",
            Pane::Comments => "Comments",
            Pane::Composer => "Add comment",
        }
    }
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

enum AsyncResponse {
    Listing {
        token: u64,
        result: Result<DirectoryListing>,
    },
    Search {
        request_id: u64,
        query: String,
        result: Result<Vec<LibraryPath>>,
    },
    Comments {
        path: LibraryPath,
        result: Result<Vec<Comment>>,
    },
    CommentPosted {
        path: LibraryPath,
        result: Result<Option<Vec<Comment>>>,
    },
    Thumbnail {
        url: String,
        size: (u16, u16),
        result: Result<Option<Preview>>,
    },
}

/// One row of the library list.
enum Entry<'a> {
    Back,
    Tile(&'a Tile),
}

pub struct Options {
    pub status_message: String,
    pub library: Arc<dyn LibraryService>,
    pub comments: Arc<dyn CommentService>,
    pub overlay: Option<Arc<dyn OverlayService>>,
    pub endpoints: Endpoints,
    pub store: Arc<Store>,
    pub preferences: Preferences,
    pub media: Option<Arc<media::Manager>>,
    pub native_formats: NativeFormats,
    pub player_command: Vec<String>,
    pub ordering: ResponseOrdering,
    pub overlay_config: OverlayConfig,
    pub config_path: String,
}

pub struct Model {
    status_message: String,
    needs_redraw: bool,
    spinner: Spinner,
    focused_pane: Pane,

    library_service: Arc<dyn LibraryService>,
    comment_service: Arc<dyn CommentService>,
    overlay_service: Option<Arc<dyn OverlayService>>,
    endpoints: Endpoints,
    store: Arc<Store>,
    media: Option<Arc<media::Manager>>,
    native_formats: NativeFormats,
    player_command: Vec<String>,
    config_path: String,

    session: Session,
    tiles: TileSet,
    selected: usize,
    listings_in_flight: usize,
    listing_snapshot: Option<TileSet>,

    search_input: Option<String>,
    pending_search: Option<u64>,
    next_request_id: u64,

    comments: Vec<Comment>,
    comments_loading: bool,
    comment_offset: usize,
    comment_status: String,
    composer: Composer,
    submitting: bool,

    player: Option<PlayerSession>,
    now_playing: Option<PlaybackSource>,

    previews: HashMap<String, Preview>,
    pending_previews: HashSet<String>,
    preview_size: Cell<(u16, u16)>,

    error_popup: Option<String>,
    help_visible: bool,

    rain: DigitRain,
    overlay_cell: OverlayCell,
    overlay_cfg: OverlayConfig,
    ticker: Option<Ticker>,

    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let (width, height) = crossterm::terminal::size().unwrap_or((80, 24));
        let overlay_cell = OverlayCell::default();
        overlay_cell.set_surface(width, height);

        let mut model = Self {
            status_message: opts.status_message,
            needs_redraw: true,
            spinner: Spinner::new(),
            focused_pane: Pane::Library,
            library_service: opts.library,
            comment_service: opts.comments,
            overlay_service: opts.overlay,
            endpoints: opts.endpoints,
            store: opts.store,
            media: opts.media,
            native_formats: opts.native_formats,
            player_command: opts.player_command,
            config_path: opts.config_path,
            session: Session::new(opts.ordering),
            tiles: TileSet::default(),
            selected: 0,
            listings_in_flight: 0,
            listing_snapshot: None,
            search_input: None,
            pending_search: None,
            next_request_id: 1,
            comments: Vec::new(),
            comments_loading: false,
            comment_offset: 0,
            comment_status: "Open a video to see its comments.".to_string(),
            composer: Composer::from_preferences(&opts.preferences),
            submitting: false,
            player: None,
            now_playing: None,
            previews: HashMap::new(),
            pending_previews: HashSet::new(),
            preview_size: Cell::new((0, 0)),
            error_popup: None,
            help_visible: false,
            rain: DigitRain::new(width, height, opts.overlay_config.column_width),
            overlay_cell,
            overlay_cfg: opts.overlay_config,
            ticker: None,
            response_tx,
            response_rx,
        };
        if model.overlay_cfg.enabled {
            model.start_ticker();
        }
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        self.navigate(LibraryPath::root());
        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        self.shutdown();
        result
    }

    fn shutdown(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
        if let Some(player) = self.player.take() {
            let _ = player.stop_blocking();
        }
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = self.overlay_cfg.rain_interval.max(Duration::from_millis(16));

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or(Duration::from_millis(0));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {}", err);
                            }
                        }
                        self.mark_dirty();
                    }
                    Event::Resize(width, height) => {
                        self.rain.resize(width, height);
                        self.overlay_cell.set_surface(width, height);
                        self.mark_dirty();
                    }
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                self.on_tick();
            }
        }

        Ok(())
    }

    fn on_tick(&mut self) {
        if self.overlay_cfg.enabled {
            self.rain.tick();
            self.mark_dirty();
        }
        if self.is_loading() {
            if self.spinner.advance() {
                self.mark_dirty();
            }
        } else {
            self.spinner.reset();
        }
        self.poll_player();
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.listings_in_flight > 0
            || self.pending_search.is_some()
            || self.comments_loading
            || self.submitting
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Listing { token, result } => {
                self.listings_in_flight = self.listings_in_flight.saturating_sub(1);
                match self.session.complete_navigation(token, result) {
                    NavigationOutcome::Applied(listing) => {
                        self.status_message = if listing.is_empty() {
                            format!("{} is empty", listing.path)
                        } else {
                            format!("{} · {} entries", listing.path, listing.len())
                        };
                        self.tiles = library::render(&listing, &self.endpoints);
                        self.listing_snapshot = None;
                        self.pending_search = None;
                        self.selected = 0;
                        self.request_selected_preview();
                    }
                    NavigationOutcome::Failed(err) => {
                        tracing::warn!("listing failed: {err:#}");
                        self.status_message = "Could not load folder.".to_string();
                        self.error_popup = Some(format!("{err:#}"));
                    }
                    NavigationOutcome::Stale { .. } => {}
                }
            }
            AsyncResponse::Search {
                request_id,
                query,
                result,
            } => {
                if self.pending_search != Some(request_id) {
                    return;
                }
                self.pending_search = None;
                match result {
                    Ok(results) => {
                        self.status_message = format!(
                            "{} result{} for {:?}. Esc returns to {}",
                            results.len(),
                            if results.len() == 1 { "" } else { "s" },
                            query,
                            self.session.current_path()
                        );
                        let snapshot = std::mem::replace(
                            &mut self.tiles,
                            library::render_search(&query, &results, &self.endpoints),
                        );
                        if self.listing_snapshot.is_none() {
                            self.listing_snapshot = Some(snapshot);
                        }
                        self.selected = 0;
                        self.request_selected_preview();
                    }
                    Err(err) => {
                        tracing::warn!("search failed: {err:#}");
                        self.error_popup = Some(format!("{err:#}"));
                    }
                }
            }
            AsyncResponse::Comments { path, result } => {
                if self.session.current_video() != Some(&path) {
                    return;
                }
                self.comments_loading = false;
                match result {
                    Ok(list) => self.set_comments(list),
                    Err(err) => {
                        tracing::warn!("comments unavailable: {err:#}");
                        self.comment_status = "Comments unavailable.".to_string();
                    }
                }
            }
            AsyncResponse::CommentPosted { path, result } => {
                self.submitting = false;
                match result {
                    Ok(reloaded) => {
                        self.composer.clear_text();
                        self.status_message = "Comment posted.".to_string();
                        if self.session.current_video() == Some(&path) {
                            if let Some(list) = reloaded {
                                self.set_comments(list);
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!("comment not posted: {err:#}");
                        self.status_message = "Comment not posted.".to_string();
                    }
                }
            }
            AsyncResponse::Thumbnail { url, size, result } => {
                self.pending_previews.remove(&url);
                match result {
                    Ok(Some(preview)) if size == self.preview_size.get() => {
                        if self.previews.len() >= PREVIEW_CACHE_MAX {
                            self.previews.clear();
                        }
                        self.previews.insert(url, preview);
                    }
                    Ok(_) => {}
                    Err(err) => tracing::debug!(%url, "thumbnail unavailable: {err:#}"),
                }
            }
        }
    }

    fn set_comments(&mut self, list: Vec<Comment>) {
        self.comment_status = match list.len() {
            0 => "No comments yet. Be the first.".to_string(),
            1 => "1 comment".to_string(),
            n => format!("{n} comments"),
        };
        self.comments = list;
        self.comment_offset = 0;
    }

    fn navigate(&mut self, path: LibraryPath) {
        let request = self.session.begin_navigation(path);
        self.spawn_listing(request.token, request.path);
    }

    fn navigate_back(&mut self) {
        if let Some(request) = self.session.navigate_back() {
            self.spawn_listing(request.token, request.path);
        }
    }

    fn spawn_listing(&mut self, token: u64, path: LibraryPath) {
        self.listings_in_flight += 1;
        self.status_message = format!("Loading {path}…");
        let tx = self.response_tx.clone();
        let service = self.library_service.clone();
        thread::spawn(move || {
            let result = service.list_directory(&path);
            let _ = tx.send(AsyncResponse::Listing { token, result });
        });
    }

    fn start_search(&mut self, query: String) {
        let query = query.trim().to_string();
        if query.is_empty() {
            return;
        }
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.pending_search = Some(request_id);
        self.status_message = format!("Searching for {query:?}…");
        let tx = self.response_tx.clone();
        let service = self.library_service.clone();
        thread::spawn(move || {
            let result = service.search(&query);
            let _ = tx.send(AsyncResponse::Search {
                request_id,
                query,
                result,
            });
        });
    }

    fn leave_search(&mut self) {
        if let Some(snapshot) = self.listing_snapshot.take() {
            self.tiles = snapshot;
            self.selected = 0;
            self.status_message = format!("Back in {}", self.session.current_path());
            self.request_selected_preview();
        }
    }

    fn load_comments(&mut self, path: LibraryPath) {
        self.comments_loading = true;
        let tx = self.response_tx.clone();
        let service = self.comment_service.clone();
        thread::spawn(move || {
            let result = service.load_comments(&path);
            let _ = tx.send(AsyncResponse::Comments { path, result });
        });
    }

    fn submit_comment(&mut self) {
        if self.submitting {
            return;
        }
        let Some(path) = self.session.current_video().cloned() else {
            self.status_message = "Open a video before commenting.".to_string();
            return;
        };
        let draft = match self.composer.draft() {
            Ok(draft) => draft,
            Err(err) => {
                self.composer.field = match err {
                    ComposeError::MissingUsername => ComposerField::Username,
                    ComposeError::EmptyText => ComposerField::Text,
                };
                self.status_message = err.to_string();
                return;
            }
        };
        self.submitting = true;
        self.status_message = "Posting comment…".to_string();
        let tx = self.response_tx.clone();
        let service = self.comment_service.clone();
        let store = self.store.clone();
        thread::spawn(move || {
            let result = comments::submit(service.as_ref(), &store, &path, &draft);
            let _ = tx.send(AsyncResponse::CommentPosted { path, result });
        });
    }

    fn persist_identity(&mut self) {
        if let Err(err) = self.store.save_preferences(&self.composer.preferences()) {
            tracing::warn!("failed to save preferences: {err:#}");
        }
    }

    fn entries(&self) -> Vec<Entry<'_>> {
        let mut entries = Vec::with_capacity(self.tiles.tiles.len() + 1);
        if self.tiles.show_back {
            entries.push(Entry::Back);
        }
        entries.extend(self.tiles.tiles.iter().map(Entry::Tile));
        entries
    }

    fn selected_tile(&self) -> Option<&Tile> {
        let offset = usize::from(self.tiles.show_back);
        self.selected
            .checked_sub(offset)
            .and_then(|index| self.tiles.tiles.get(index))
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.entries().len();
        if len == 0 {
            return;
        }
        let next = (self.selected as isize + delta).clamp(0, len as isize - 1) as usize;
        if next != self.selected {
            self.selected = next;
            self.request_selected_preview();
        }
    }

    fn activate_selection(&mut self) {
        let action = match self.entries().get(self.selected) {
            Some(Entry::Back) => None,
            Some(Entry::Tile(tile)) => Some(tile.action.clone()),
            None => return,
        };
        match action {
            None => self.navigate_back(),
            Some(TileAction::Navigate(path)) => self.navigate(path),
            Some(TileAction::Play(path)) => self.play(path),
        }
    }

    fn play(&mut self, path: LibraryPath) {
        let source = playback::negotiate(&path, &self.endpoints, &self.native_formats);
        let title = path.file_name().unwrap_or_default().to_string();

        if let Some(previous) = self.player.take() {
            let _ = previous.stop_blocking();
        }
        match video::spawn_player(video::LaunchOptions {
            command: &self.player_command,
            source: &source,
            title: &title,
        }) {
            Ok(session) => {
                self.status_message = if source.is_transcoded {
                    format!("Playing {title} (transcoded to MP4)")
                } else {
                    format!("Playing {title}")
                };
                self.player = Some(session);
            }
            Err(err) => {
                tracing::warn!("player launch failed: {err:#}");
                self.status_message = format!("Could not start player: {err:#}");
            }
        }

        self.now_playing = Some(source);
        self.session.open_video(path.clone());
        self.comments.clear();
        self.comment_status = "Loading comments…".to_string();
        self.load_comments(path);
    }

    fn close_video(&mut self) {
        if let Some(player) = self.player.take() {
            let _ = player.stop_blocking();
        }
        if let Some(path) = self.session.close_video() {
            self.status_message = format!("Closed {}", path.file_name().unwrap_or_default());
        }
        self.now_playing = None;
        self.comments.clear();
        self.comments_loading = false;
        self.comment_status = "Open a video to see its comments.".to_string();
        if self.focused_pane != Pane::Library {
            self.focused_pane = Pane::Library;
        }
    }

    fn poll_player(&mut self) {
        let Some(player) = self.player.as_mut() else {
            return;
        };
        if let Some(status) = player.try_status() {
            let title = player.title().to_string();
            self.player = None;
            self.status_message = match status {
                Ok(status) if status.success() => format!("Finished {title}"),
                Ok(status) => format!("Player exited ({status})"),
                Err(err) => format!("Player error: {err:#}"),
            };
            self.mark_dirty();
        }
    }

    fn request_selected_preview(&mut self) {
        let url = match self.selected_tile().and_then(|tile| tile.thumbnail_url.clone()) {
            Some(url) => url,
            None => return,
        };
        let Some(manager) = self.media.clone() else {
            return;
        };
        let size = self.preview_size.get();
        if size.0 == 0 || size.1 == 0 {
            return;
        }
        if self.previews.get(&url).is_some_and(|p| (p.cols, p.rows) == size)
            || !self.pending_previews.insert(url.clone())
        {
            return;
        }
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let outcome = manager
                .enqueue(media::Request {
                    url: url.clone(),
                    cols: size.0,
                    rows: size.1,
                    ..media::Request::default()
                })
                .recv()
                .map_err(|_| anyhow!("thumbnail worker stopped"))
                .and_then(|entry| match entry.error {
                    Some(err) => Err(err),
                    None => Ok(entry.preview),
                });
            let _ = tx.send(AsyncResponse::Thumbnail {
                url,
                size,
                result: outcome,
            });
        });
    }

    fn start_ticker(&mut self) {
        let Some(service) = self.overlay_service.clone() else {
            return;
        };
        if self.ticker.is_none() {
            self.ticker = Some(Ticker::spawn(
                service,
                self.overlay_cell.clone(),
                self.overlay_cfg.ticker_interval,
                self.overlay_cfg.display_duration,
            ));
        }
    }

    fn toggle_overlay(&mut self) {
        self.overlay_cfg.enabled = !self.overlay_cfg.enabled;
        if self.overlay_cfg.enabled {
            let (width, height) = self.rain.size();
            self.rain.resize(width, height);
            self.start_ticker();
            self.status_message = "Ambient overlay on".to_string();
        } else {
            if let Some(ticker) = self.ticker.take() {
                ticker.stop();
            }
            self.status_message = "Ambient overlay off".to_string();
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Ok(true);
        }
        if self.error_popup.is_some() {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char('q')) {
                self.error_popup = None;
            }
            return Ok(false);
        }
        if self.help_visible {
            self.help_visible = false;
            return Ok(false);
        }
        if self.search_input.is_some() {
            self.handle_search_key(key.code);
            return Ok(false);
        }
        match self.focused_pane {
            Pane::Composer => {
                self.handle_composer_key(key.code);
                Ok(false)
            }
            Pane::Comments => self.handle_comments_key(key.code),
            Pane::Library => self.handle_library_key(key.code),
        }
    }

    fn handle_search_key(&mut self, code: KeyCode) {
        let Some(input) = self.search_input.as_mut() else {
            return;
        };
        match code {
            KeyCode::Esc => self.search_input = None,
            KeyCode::Enter => {
                let query = std::mem::take(input);
                self.search_input = None;
                self.start_search(query);
            }
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char(ch) => input.push(ch),
            _ => {}
        }
    }

    fn handle_global_key(&mut self, code: KeyCode) -> Option<bool> {
        match code {
            KeyCode::Char('q') => Some(true),
            KeyCode::Char('?') => {
                self.help_visible = true;
                Some(false)
            }
            KeyCode::Char('m') => {
                self.toggle_overlay();
                Some(false)
            }
            KeyCode::Char('x') => {
                self.close_video();
                Some(false)
            }
            KeyCode::Tab => {
                self.focused_pane = self.next_pane();
                Some(false)
            }
            _ => None,
        }
    }

    fn next_pane(&self) -> Pane {
        if self.session.current_video().is_none() {
            return Pane::Library;
        }
        match self.focused_pane {
            Pane::Library => Pane::Comments,
            Pane::Comments => Pane::Composer,
            Pane::Composer => Pane::Library,
        }
    }

    fn handle_library_key(&mut self, code: KeyCode) -> Result<bool> {
        if let Some(quit) = self.handle_global_key(code) {
            return Ok(quit);
        }
        match code {
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::PageDown => self.move_selection(10),
            KeyCode::PageUp => self.move_selection(-10),
            KeyCode::Char('g') | KeyCode::Home => self.move_selection(isize::MIN / 2),
            KeyCode::Char('G') | KeyCode::End => self.move_selection(isize::MAX / 2),
            KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => self.activate_selection(),
            KeyCode::Backspace | KeyCode::Char('h') | KeyCode::Left => {
                if self.listing_snapshot.is_some() {
                    self.leave_search();
                } else {
                    self.navigate_back();
                }
            }
            KeyCode::Esc => self.leave_search(),
            KeyCode::Char('r') => self.navigate(self.session.current_path().clone()),
            KeyCode::Char('/') => self.search_input = Some(String::new()),
            KeyCode::Char('c') if self.session.current_video().is_some() => {
                self.focused_pane = Pane::Composer;
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_comments_key(&mut self, code: KeyCode) -> Result<bool> {
        if let Some(quit) = self.handle_global_key(code) {
            return Ok(quit);
        }
        match code {
            KeyCode::Char('j') | KeyCode::Down => {
                if self.comment_offset + 1 < self.comments.len() {
                    self.comment_offset += 1;
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.comment_offset = self.comment_offset.saturating_sub(1);
            }
            KeyCode::Char('r') => {
                if let Some(path) = self.session.current_video().cloned() {
                    self.load_comments(path);
                }
            }
            KeyCode::Char('c') => self.focused_pane = Pane::Composer,
            KeyCode::Esc | KeyCode::Char('h') | KeyCode::Left => {
                self.focused_pane = Pane::Library
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_composer_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => {
                if self.composer.focus(ComposerField::Text) {
                    self.persist_identity();
                }
                self.focused_pane = Pane::Library;
            }
            KeyCode::Tab | KeyCode::Down => {
                let next = self.composer.field.next();
                if self.composer.focus(next) {
                    self.persist_identity();
                }
            }
            KeyCode::BackTab | KeyCode::Up => {
                let previous = self.composer.field.previous();
                if self.composer.focus(previous) {
                    self.persist_identity();
                }
            }
            KeyCode::Enter => self.submit_comment(),
            KeyCode::Backspace => self.composer.backspace(),
            KeyCode::Left if self.composer.field == ComposerField::Rating => {
                self.composer.adjust_rating(-1)
            }
            KeyCode::Right if self.composer.field == ComposerField::Rating => {
                self.composer.adjust_rating(1)
            }
            KeyCode::Char('-') if self.composer.field == ComposerField::Rating => {
                self.composer.adjust_rating(-1)
            }
            KeyCode::Char('+') if self.composer.field == ComposerField::Rating => {
                self.composer.adjust_rating(1)
            }
            KeyCode::Char(ch) => self.composer.insert_char(ch),
            _ => {}
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(Color::Black)), full);
        if self.overlay_cfg.enabled {
            let event = self.overlay_cell.current(Instant::now());
            frame.render_widget(
                OverlayView {
                    rain: &self.rain,
                    event: event.as_ref(),
                },
                full,
            );
        }

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        frame.render_widget(self.status_line(), layout[0]);

        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(layout[1]);
        self.draw_library(frame, main[0]);

        let details = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(PREVIEW_ROWS + 4),
                Constraint::Min(3),
                Constraint::Length(COMPOSER_HEIGHT),
            ])
            .split(main[1]);
        self.draw_preview(frame, details[0]);
        self.draw_comments(frame, details[1]);
        self.draw_composer(frame, details[2]);

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center);
        frame.render_widget(footer, layout[2]);

        if self.help_visible {
            self.draw_help(frame, layout[1]);
        }
        if let Some(message) = &self.error_popup {
            draw_error(frame, layout[1], message);
        }
    }

    fn status_line(&self) -> Paragraph<'static> {
        let text = if let Some(input) = &self.search_input {
            format!("Search: {input}▏")
        } else if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
        } else {
            self.status_message.clone()
        };
        Paragraph::new(text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        )
    }

    /// Panes leave their background unset so the rain shows through.
    fn pane_block(&self, pane: Pane, title: String) -> Block<'static> {
        let focused = self.focused_pane == pane;
        let border_style = if focused {
            Style::default().fg(COLOR_BORDER_FOCUSED)
        } else {
            Style::default().fg(COLOR_BORDER_IDLE)
        };
        let title_style = if focused {
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(COLOR_TEXT_SECONDARY)
        };
        Block::default()
            .title(Span::styled(title, title_style))
            .borders(Borders::ALL)
            .border_style(border_style)
            .padding(Padding::horizontal(1))
    }

    fn draw_library(&self, frame: &mut Frame<'_>, area: Rect) {
        let heading = if self.tiles.heading.is_empty() {
            Pane::Library.title().to_string()
        } else {
            format!("{} {}", Pane::Library.title(), self.tiles.heading)
        };
        let block = self.pane_block(Pane::Library, heading);
        let entries = self.entries();
        if entries.is_empty() {
            let message = if self.listings_in_flight > 0 {
                "Loading…"
            } else {
                "Nothing here."
            };
            frame.render_widget(
                Paragraph::new(message)
                    .style(Style::default().fg(COLOR_TEXT_SECONDARY))
                    .block(block),
                area,
            );
            return;
        }

        let roomy = self.tiles.density == Density::Few;
        let items: Vec<ListItem> = entries
            .iter()
            .map(|entry| tile_item(entry, roomy))
            .collect();
        let list = List::new(items)
            .block(block)
            .highlight_style(
                Style::default()
                    .bg(COLOR_PANEL_SELECTED_BG)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▌");
        let mut state = ListState::default();
        state.select(Some(self.selected.min(entries.len() - 1)));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_preview(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = Block::default()
            .title(Span::styled(
                "Preview",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .padding(Padding::horizontal(1));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let split = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(PREVIEW_ROWS * 3), Constraint::Min(0)])
            .split(inner);
        let thumb_area = split[0];
        self.preview_size
            .set((thumb_area.width, thumb_area.height.min(PREVIEW_ROWS)));

        if let Some(preview) = self
            .selected_tile()
            .and_then(|tile| tile.thumbnail_url.as_ref())
            .and_then(|url| self.previews.get(url))
        {
            frame.render_widget(ThumbnailView { preview }, thumb_area);
        }

        let mut lines = Vec::new();
        if let Some(tile) = self.selected_tile() {
            lines.push(Line::from(Span::styled(
                tile.label.clone(),
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .add_modifier(Modifier::BOLD),
            )));
            let hint = match &tile.action {
                TileAction::Navigate(_) => "Folder · Enter to open".to_string(),
                TileAction::Play(path) => {
                    let ext = path.extension().unwrap_or_default();
                    let mime = playback::mime_for_extension(&ext);
                    if mime.is_empty() {
                        "Video · Enter to play".to_string()
                    } else {
                        format!("Video ({mime}) · Enter to play")
                    }
                }
            };
            lines.push(Line::from(Span::styled(
                hint,
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
            lines.push(Line::default());
        }
        if let (Some(path), Some(source)) = (self.session.current_video(), &self.now_playing) {
            let state = if self.player.is_some() {
                "Now playing"
            } else {
                "Last played"
            };
            lines.push(Line::from(vec![
                Span::styled(format!("{state}: "), Style::default().fg(COLOR_ACCENT)),
                Span::styled(
                    path.as_server_path(),
                    Style::default().fg(COLOR_TEXT_PRIMARY),
                ),
            ]));
            let mode = if source.is_transcoded {
                "transcoded stream (video/mp4)".to_string()
            } else if source.declared_mime.is_empty() {
                "direct stream".to_string()
            } else {
                format!("direct stream ({})", source.declared_mime)
            };
            lines.push(Line::from(Span::styled(
                mode,
                Style::default().fg(if source.is_transcoded {
                    COLOR_RATING
                } else {
                    COLOR_SUCCESS
                }),
            )));
        }
        frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), split[1]);
    }

    fn draw_comments(&self, frame: &mut Frame<'_>, area: Rect) {
        let status = if self.comments_loading {
            format!("{} {}", self.spinner.frame(), self.comment_status)
        } else {
            self.comment_status.clone()
        };
        let block = self.pane_block(Pane::Comments, format!("{} · {}", Pane::Comments.title(), status));
        let inner = block.inner(area);
        let width = inner.width.max(1) as usize;

        let mut items: Vec<ListItem> = Vec::new();
        for comment in self.comments.iter().skip(self.comment_offset) {
            let mut header = vec![Span::styled(
                comment.username.clone(),
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            )];
            if let Some(emoji) = &comment.emoji {
                header.push(Span::raw(format!(" {emoji}")));
            }
            header.push(Span::styled(
                format!("  {}", stars(comment.rating)),
                Style::default().fg(COLOR_RATING),
            ));
            let mut lines = vec![Line::from(header)];
            for piece in wrap(&comment.text, WrapOptions::new(width)) {
                lines.push(Line::from(Span::styled(
                    piece.into_owned(),
                    Style::default().fg(COLOR_TEXT_PRIMARY),
                )));
            }
            lines.push(Line::default());
            items.push(ListItem::new(lines));
        }
        frame.render_widget(List::new(items).block(block), area);
    }

    fn draw_composer(&self, frame: &mut Frame<'_>, area: Rect) {
        let title = match self.session.current_video() {
            Some(path) => format!(
                "{} on {}",
                Pane::Composer.title(),
                path.file_name().unwrap_or_default()
            ),
            None => Pane::Composer.title().to_string(),
        };
        let block = self.pane_block(Pane::Composer, title);
        let editing = self.focused_pane == Pane::Composer;
        let fields = [
            ComposerField::Username,
            ComposerField::Emoji,
            ComposerField::Rating,
            ComposerField::Text,
        ];
        let lines: Vec<Line> = fields
            .iter()
            .map(|&field| {
                let active = editing && self.composer.field == field;
                let label_style = if active {
                    Style::default()
                        .fg(COLOR_ACCENT)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(COLOR_TEXT_SECONDARY)
                };
                let mut value = self.composer.value(field);
                if active && field != ComposerField::Rating {
                    value.push('▏');
                }
                let value_style = if field == ComposerField::Rating {
                    Style::default().fg(COLOR_RATING)
                } else {
                    Style::default().fg(COLOR_TEXT_PRIMARY)
                };
                Line::from(vec![
                    Span::styled(format!("{:>8}: ", field.title()), label_style),
                    Span::styled(value, value_style),
                ])
            })
            .collect();
        frame.render_widget(
            Paragraph::new(lines).block(block).wrap(Wrap { trim: false }),
            area,
        );
    }

    fn draw_help(&self, frame: &mut Frame<'_>, area: Rect) {
        let popup_area = centered_rect(60, 70, area);
        frame.render_widget(Clear, popup_area);
        let rows = [
            ("j/k", "move selection"),
            ("Enter/l", "open folder or play video"),
            ("Backspace/h", "parent folder"),
            ("/", "search the library"),
            ("r", "reload"),
            ("Tab", "cycle panes when a video is open"),
            ("c", "write a comment"),
            ("x", "stop player and close video"),
            ("m", "toggle ambient overlay"),
            ("q", "quit"),
        ];
        let mut lines: Vec<Line> = rows
            .iter()
            .map(|(key, action)| {
                Line::from(vec![
                    Span::styled(
                        format!("{key:>12}  "),
                        Style::default()
                            .fg(COLOR_ACCENT)
                            .add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(*action, Style::default().fg(COLOR_TEXT_PRIMARY)),
                ])
            })
            .collect();
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            format!("Config: {}", self.config_path),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )));
        let help = Paragraph::new(lines)
            .block(
                Block::default()
                    .title(Span::styled(
                        "Keys",
                        Style::default()
                            .fg(COLOR_ACCENT)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_ACCENT))
                    .style(Style::default().bg(COLOR_PANEL_BG)),
            )
            .wrap(Wrap { trim: false });
        frame.render_widget(help, popup_area);
    }

    fn footer_text(&self) -> String {
        if self.search_input.is_some() {
            return "Enter search · Esc cancel".to_string();
        }
        match self.focused_pane {
            Pane::Library => {
                "j/k move · Enter open · h back · / search · m overlay · ? help · q quit"
                    .to_string()
            }
            Pane::Comments => "j/k scroll · r reload · c comment · Tab next · Esc library".to_string(),
            Pane::Composer => {
                "Tab next field · +/- rating · Enter post · Esc library".to_string()
            }
        }
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn tile_item(entry: &Entry<'_>, roomy: bool) -> ListItem<'static> {
    let (icon, label, hint, color) = match entry {
        Entry::Back => ("↩", "../".to_string(), "parent folder", COLOR_TEXT_SECONDARY),
        Entry::Tile(tile) if tile.is_video() => ("▶", tile.label.clone(), "video", COLOR_TEXT_PRIMARY),
        Entry::Tile(tile) => ("▸", tile.label.clone(), "folder", COLOR_ACCENT),
    };
    let title = Line::from(vec![
        Span::styled(format!("{icon} "), Style::default().fg(color)),
        Span::styled(label, Style::default().fg(color)),
    ]);
    if roomy {
        ListItem::new(vec![
            title,
            Line::from(Span::styled(
                format!("  {hint}"),
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            )),
        ])
    } else {
        ListItem::new(title)
    }
}

fn draw_error(frame: &mut Frame<'_>, area: Rect, message: &str) {
    let popup_area = centered_rect(60, 30, area);
    frame.render_widget(Clear, popup_area);
    let body = Paragraph::new(vec![
        Line::from(Span::styled(
            message.to_string(),
            Style::default().fg(COLOR_TEXT_PRIMARY),
        )),
        Line::default(),
        Line::from(Span::styled(
            "Press Enter to dismiss",
            Style::default()
                .fg(COLOR_TEXT_SECONDARY)
                .add_modifier(Modifier::ITALIC),
        )),
    ])
    .block(
        Block::default()
            .title(Span::styled(
                "Request failed",
                Style::default().fg(COLOR_ERROR).add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_ERROR))
            .style(Style::default().bg(COLOR_PANEL_BG)),
    )
    .wrap(Wrap { trim: true });
    frame.render_widget(body, popup_area);
}

/// Draws a decoded thumbnail with upper half blocks.
struct ThumbnailView<'a> {
    preview: &'a Preview,
}

impl Widget for ThumbnailView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for row in 0..self.preview.rows.min(area.height) {
            for col in 0..self.preview.cols.min(area.width) {
                if let Some(cell) = self.preview.cell(col, row) {
                    let [tr, tg, tb] = cell.top;
                    let [br, bg, bb] = cell.bottom;
                    buf.get_mut(area.x + col, area.y + row)
                        .set_char('▀')
                        .set_fg(Color::Rgb(tr, tg, tb))
                        .set_bg(Color::Rgb(br, bg, bb));
                }
            }
        }
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}
