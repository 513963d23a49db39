//! Ambient background: falling binary digits plus a randomly placed
//! community comment refreshed by a ticker thread.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Sender, TryRecvError};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::Widget;
use unicode_width::UnicodeWidthStr;

use crate::comments::RandomComment;
use crate::data::OverlayService;

/// Share of intensity removed from every glyph per tick.
pub const FADE_ALPHA: f32 = 0.05;
/// Probability threshold a column must beat to restart once past the bottom.
pub const RESET_THRESHOLD: f64 = 0.975;
const INTENSITY_FLOOR: f32 = 0.08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Rgb(rng.gen(), rng.gen(), rng.gen())
    }

    pub fn inverse(self) -> Self {
        Rgb(255 - self.0, 255 - self.1, 255 - self.2)
    }
}

impl From<Rgb> for Color {
    fn from(rgb: Rgb) -> Self {
        Color::Rgb(rgb.0, rgb.1, rgb.2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    pub ch: char,
    pub intensity: f32,
}

/// Rain state. Owned by the UI loop; nothing else writes it.
pub struct DigitRain {
    width: u16,
    height: u16,
    column_width: u16,
    cursors: Vec<u32>,
    canvas: Vec<Option<Glyph>>,
    rng: StdRng,
}

impl DigitRain {
    pub fn new(width: u16, height: u16, column_width: u16) -> Self {
        Self::with_rng(width, height, column_width, StdRng::from_entropy())
    }

    pub fn with_rng(width: u16, height: u16, column_width: u16, rng: StdRng) -> Self {
        let mut rain = Self {
            width: 0,
            height: 0,
            column_width: column_width.max(1),
            cursors: Vec::new(),
            canvas: Vec::new(),
            rng,
        };
        rain.resize(width, height);
        rain
    }

    pub fn columns(&self) -> usize {
        self.cursors.len()
    }

    pub fn cursors(&self) -> &[u32] {
        &self.cursors
    }

    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// Recomputes the column count and sends every column back to the top.
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        let columns = (width / self.column_width) as usize;
        self.cursors = vec![1; columns];
        self.canvas = vec![None; columns * height as usize];
    }

    pub fn glyph(&self, column: usize, row: u16) -> Option<Glyph> {
        if column >= self.columns() || row >= self.height {
            return None;
        }
        self.canvas[row as usize * self.columns() + column]
    }

    pub fn tick(&mut self) {
        self.fade();
        let columns = self.columns();
        let height = self.height as u32;
        for column in 0..columns {
            let ch = if self.rng.gen_bool(0.5) { '0' } else { '1' };
            let row = self.cursors[column].saturating_sub(1);
            if row < height {
                self.canvas[row as usize * columns + column] = Some(Glyph { ch, intensity: 1.0 });
            }
            if self.cursors[column] > height && self.rng.gen::<f64>() > RESET_THRESHOLD {
                self.cursors[column] = 0;
            }
            self.cursors[column] = self.cursors[column].saturating_add(1);
        }
    }

    fn fade(&mut self) {
        for slot in &mut self.canvas {
            if let Some(glyph) = slot {
                glyph.intensity *= 1.0 - FADE_ALPHA;
                if glyph.intensity < INTENSITY_FLOOR {
                    *slot = None;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayEvent {
    pub video_name: String,
    pub username: String,
    pub emoji: Option<String>,
    pub rating: Option<u8>,
    pub text: String,
    pub x: u16,
    pub y: u16,
    pub text_color: Rgb,
    pub name_color: Rgb,
    pub expires_at: Instant,
}

impl OverlayEvent {
    pub fn place<R: Rng + ?Sized>(
        comment: RandomComment,
        surface: (u16, u16),
        now: Instant,
        display: Duration,
        rng: &mut R,
    ) -> Self {
        let username = comment
            .username
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "anonymous".to_string());
        let text_color = Rgb::random(rng);
        let (width, height) = surface;
        let mut event = Self {
            video_name: comment.video,
            username,
            emoji: comment.emoji.filter(|e| !e.trim().is_empty()),
            rating: comment.rating,
            text: comment.text,
            x: 0,
            y: 0,
            text_color,
            name_color: text_color.inverse(),
            expires_at: now + display,
        };
        let span = event.name_label().width() + event.text.width();
        let max_x = (width as usize).saturating_sub(span).min(u16::MAX as usize) as u16;
        event.x = rng.gen_range(0..=max_x);
        event.y = if height == 0 { 0 } else { rng.gen_range(0..height) };
        event
    }

    pub fn name_label(&self) -> String {
        match &self.emoji {
            Some(emoji) => format!("{} {}: ", self.username, emoji),
            None => format!("{}: ", self.username),
        }
    }

    pub fn is_visible(&self, now: Instant) -> bool {
        now <= self.expires_at
    }
}

#[derive(Debug, Default)]
struct Shared {
    surface: (u16, u16),
    event: Option<OverlayEvent>,
}

/// The one slot shared between the draw loop and the ticker thread.
#[derive(Debug, Clone, Default)]
pub struct OverlayCell {
    shared: Arc<Mutex<Shared>>,
}

impl OverlayCell {
    pub fn set_surface(&self, width: u16, height: u16) {
        self.shared.lock().surface = (width, height);
    }

    pub fn surface(&self) -> (u16, u16) {
        self.shared.lock().surface
    }

    pub fn publish(&self, event: OverlayEvent) {
        self.shared.lock().event = Some(event);
    }

    /// Returns the event if still visible, clearing it once expired.
    pub fn current(&self, now: Instant) -> Option<OverlayEvent> {
        let mut shared = self.shared.lock();
        let visible = shared.event.as_ref().map(|event| event.is_visible(now));
        match visible {
            Some(true) => shared.event.clone(),
            Some(false) => {
                shared.event = None;
                None
            }
            None => None,
        }
    }
}

/// Runs one ticker cycle. Returns true when a new event was published.
pub fn cycle<R: Rng + ?Sized>(
    service: &dyn OverlayService,
    cell: &OverlayCell,
    display: Duration,
    rng: &mut R,
) -> bool {
    match service.random_comment() {
        Ok(Some(comment)) => {
            let event = OverlayEvent::place(comment, cell.surface(), Instant::now(), display, rng);
            tracing::trace!(user = %event.username, video = %event.video_name, "overlay comment");
            cell.publish(event);
            true
        }
        Ok(None) => false,
        Err(err) => {
            tracing::debug!("overlay fetch failed: {err:#}");
            false
        }
    }
}

pub struct Ticker {
    stop_tx: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn(
        service: Arc<dyn OverlayService>,
        cell: OverlayCell,
        interval: Duration,
        display: Duration,
    ) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::spawn(move || {
            let ticks = tick(interval);
            let mut rng = StdRng::from_entropy();
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticks) -> _ => {
                        if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                            break;
                        }
                        cycle(service.as_ref(), &cell, display, &mut rng);
                    }
                }
            }
            tracing::debug!("overlay ticker stopped");
        });
        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signals the thread and returns at once. A fetch already in flight
    /// finishes in the background before the thread exits.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.handle.take().is_some() {
            let _ = self.stop_tx.try_send(());
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Draws the rain and then the active event over it.
pub struct OverlayView<'a> {
    pub rain: &'a DigitRain,
    pub event: Option<&'a OverlayEvent>,
}

impl Widget for OverlayView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let column_width = self.rain.column_width;
        for column in 0..self.rain.columns() {
            let x = area.x as u32 + column as u32 * column_width as u32;
            if x >= area.right() as u32 {
                break;
            }
            for row in 0..self.rain.height.min(area.height) {
                if let Some(glyph) = self.rain.glyph(column, row) {
                    let level = (glyph.intensity.clamp(0.0, 1.0) * 255.0) as u8;
                    buf.get_mut(x as u16, area.y + row)
                        .set_char(glyph.ch)
                        .set_fg(Color::Rgb(0, level, 0));
                }
            }
        }

        let Some(event) = self.event else {
            return;
        };
        if event.y >= area.height || event.x >= area.width {
            return;
        }
        let x = area.x + event.x;
        let y = area.y + event.y;
        let label = event.name_label();
        let name_style = Style::default()
            .fg(event.name_color.into())
            .add_modifier(Modifier::BOLD);
        buf.set_stringn(x, y, &label, (area.right() - x) as usize, name_style);
        let text_x = x.saturating_add(label.width() as u16);
        if text_x < area.right() {
            buf.set_stringn(
                text_x,
                y,
                &event.text,
                (area.right() - text_x) as usize,
                Style::default().fg(event.text_color.into()),
            );
        }
    }
}
