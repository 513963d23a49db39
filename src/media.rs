//! Background thumbnail fetching with an on-disk cache indexed in the store.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::imageops::FilterType;
use image::ImageFormat;
use parking_lot::Mutex;
use reqwest::blocking::Client;
use sha1::{Digest, Sha1};

use crate::config::MediaConfig;
use crate::storage::{self, MediaEntry};

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: Option<PathBuf>,
    pub max_size_bytes: i64,
    pub default_ttl: Duration,
    pub workers: usize,
    pub user_agent: String,
    pub http_client: Option<Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from(&MediaConfig::default())
    }
}

impl From<&MediaConfig> for Config {
    fn from(cfg: &MediaConfig) -> Self {
        Self {
            cache_dir: cfg.cache_dir.clone(),
            max_size_bytes: cfg.max_size_bytes,
            default_ttl: cfg.default_ttl,
            workers: cfg.workers,
            user_agent: format!("flix-tui/{}", crate::VERSION),
            http_client: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub url: String,
    /// Preview size in terminal cells.
    pub cols: u16,
    pub rows: u16,
    pub ttl: Option<Duration>,
    pub force: bool,
}

/// Two stacked pixels rendered as one `▀` cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfBlock {
    pub top: [u8; 3],
    pub bottom: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub cols: u16,
    pub rows: u16,
    pub cells: Vec<HalfBlock>,
}

impl Preview {
    pub fn cell(&self, col: u16, row: u16) -> Option<HalfBlock> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        self.cells
            .get(row as usize * self.cols as usize + col as usize)
            .copied()
    }
}

#[derive(Debug)]
pub struct ResultEntry {
    pub url: String,
    pub entry: Option<MediaEntry>,
    pub preview: Option<Preview>,
    pub error: Option<anyhow::Error>,
}

struct Job {
    request: Request,
    tx: Sender<ResultEntry>,
}

struct Inner {
    store: Arc<storage::Store>,
    cfg: Config,
    cache_dir: PathBuf,
    client: Client,
    jobs: Sender<Job>,
    stop: Sender<()>,
    pruning: Mutex<()>,
}

pub struct Manager {
    inner: Arc<Inner>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Manager {
    pub fn new(store: Arc<storage::Store>, cfg: Config) -> Result<Self> {
        let mut cfg = cfg;
        if cfg.workers == 0 {
            cfg.workers = 2;
        }
        let cache_dir = cfg
            .cache_dir
            .clone()
            .context("media: cache dir not configured")?;
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("media: create {}", cache_dir.display()))?;

        let client = if let Some(client) = cfg.http_client.clone() {
            client
        } else {
            Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent(cfg.user_agent.clone())
                .build()
                .context("media: build http client")?
        };

        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let inner = Arc::new(Inner {
            store,
            cfg,
            cache_dir,
            client,
            jobs: job_tx,
            stop: stop_tx,
            pruning: Mutex::new(()),
        });

        let mut handles = Vec::new();
        for _ in 0..inner.cfg.workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker_inner = inner.clone();
            handles.push(thread::spawn(move || worker_inner.worker(rx_jobs, rx_stop)));
        }

        Ok(Self { inner, handles })
    }

    pub fn enqueue(&self, request: Request) -> Receiver<ResultEntry> {
        let (tx, rx) = unbounded();
        let job = Job { request, tx };
        let _ = self.inner.jobs.send(job);
        rx
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.inner.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn worker(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => self.process(job),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn process(&self, job: Job) {
        let url = job.request.url.clone();
        let (cols, rows) = (job.request.cols, job.request.rows);
        let result = match self.fetch(job.request) {
            Ok(entry) => {
                let preview = if cols > 0 && rows > 0 {
                    fs::read(&entry.file_path)
                        .map_err(anyhow::Error::from)
                        .and_then(|bytes| decode_preview(&bytes, cols, rows))
                        .map_err(|err| tracing::debug!(%url, "thumbnail decode failed: {err:#}"))
                        .ok()
                } else {
                    None
                };
                ResultEntry {
                    url,
                    entry: Some(entry),
                    preview,
                    error: None,
                }
            }
            Err(err) => ResultEntry {
                url,
                entry: None,
                preview: None,
                error: Some(err),
            },
        };
        let _ = job.tx.send(result);
    }

    fn fetch(&self, request: Request) -> Result<MediaEntry> {
        if request.url.is_empty() {
            return Err(anyhow!("media: url required"));
        }

        if let Some(entry) = self.store.get_media_entry_by_url(&request.url)? {
            if !request.force
                && self.is_fresh(&entry, request.ttl)
                && Path::new(&entry.file_path).exists()
            {
                tracing::trace!(url = %request.url, "thumbnail cache hit");
                return Ok(entry);
            }
        }

        let response = self
            .client
            .get(&request.url)
            .send()
            .context("media: download")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("media: request failed: {} - {}", status, body));
        }

        let headers = response.headers().clone();
        let bytes = response.bytes().context("media: body")?.to_vec();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .filter(|val| val.starts_with("image/"))
            .map(|s| s.to_string())
            .unwrap_or_else(|| detect_mime(&bytes));

        let file_path = self.write_file(&bytes)?;
        let checksum = sha1_hex(&bytes);
        let ttl = request.ttl.unwrap_or(self.cfg.default_ttl);
        let expires_at = SystemTime::now().checked_add(ttl);

        let media_entry = MediaEntry {
            id: 0,
            url: request.url.clone(),
            media_type: content_type,
            file_path,
            size_bytes: bytes.len() as i64,
            fetched_at: Utc::now(),
            expires_at: expires_at.map(DateTime::<Utc>::from),
            checksum,
        };

        self.prune_if_needed(media_entry.size_bytes)?;
        let id = self.store.upsert_media_entry(media_entry.clone())?;
        tracing::debug!(url = %request.url, bytes = media_entry.size_bytes, "thumbnail cached");
        Ok(MediaEntry { id, ..media_entry })
    }

    fn is_fresh(&self, entry: &MediaEntry, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(self.cfg.default_ttl);
        if ttl.is_zero() {
            return false;
        }
        let expiry = entry.fetched_at.checked_add_signed(
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0)),
        );
        match expiry {
            Some(expiry) => Utc::now() < expiry,
            None => false,
        }
    }

    fn write_file(&self, data: &[u8]) -> Result<String> {
        let filename = format!("{}.bin", sha1_hex(data));
        let path = self.cache_dir.join(filename);
        fs::write(&path, data).context("media: write")?;
        Ok(path.to_string_lossy().to_string())
    }

    fn prune_if_needed(&self, new_bytes: i64) -> Result<()> {
        let _guard = self.pruning.lock();
        let mut total = self.store.total_media_size()? + new_bytes;
        if total <= self.cfg.max_size_bytes {
            return Ok(());
        }

        let mut ids = Vec::new();
        let mut paths = Vec::new();

        for entry in self.store.list_oldest_media(100)? {
            total -= entry.size_bytes;
            ids.push(entry.id);
            paths.push(entry.file_path);
            if total <= self.cfg.max_size_bytes {
                break;
            }
        }

        tracing::debug!(evicted = ids.len(), "pruning thumbnail cache");
        self.store.delete_media_entries(&ids)?;
        for path in paths {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

/// Scales an image to `cols` x `rows` cells, two pixel rows per cell.
pub fn decode_preview(bytes: &[u8], cols: u16, rows: u16) -> Result<Preview> {
    let img = image::load_from_memory(bytes).context("media: decode image")?;
    let resized = img
        .resize_exact(cols as u32, rows as u32 * 2, FilterType::Triangle)
        .to_rgb8();
    let mut cells = Vec::with_capacity(cols as usize * rows as usize);
    for row in 0..rows as u32 {
        for col in 0..cols as u32 {
            cells.push(HalfBlock {
                top: resized.get_pixel(col, row * 2).0,
                bottom: resized.get_pixel(col, row * 2 + 1).0,
            });
        }
    }
    Ok(Preview { cols, rows, cells })
}

fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn detect_mime(bytes: &[u8]) -> String {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg".into(),
        Ok(ImageFormat::Png) => "image/png".into(),
        Ok(ImageFormat::Gif) => "image/gif".into(),
        Ok(ImageFormat::WebP) => "image/webp".into(),
        _ => {
            let mut buffer = [0u8; 512];
            let mut cursor = std::io::Cursor::new(bytes);
            let read = cursor.read(&mut buffer).unwrap_or(0);
            tree_magic_mini::from_u8(&buffer[..read]).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_fn(4, 4, |x, _| {
            if x < 2 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        });
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    /// Serves the same PNG for every request and counts hits.
    fn serve_png(hits: Arc<AtomicUsize>) -> (String, thread::JoinHandle<()>, Arc<tiny_http::Server>) {
        let server = Arc::new(tiny_http::Server::http("127.0.0.1:0").unwrap());
        let addr = server.server_addr().to_ip().unwrap();
        let body = png_bytes();
        let worker = server.clone();
        let handle = thread::spawn(move || {
            for request in worker.incoming_requests() {
                hits.fetch_add(1, Ordering::SeqCst);
                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"image/png"[..]).unwrap();
                let _ = request.respond(tiny_http::Response::from_data(body.clone()).with_header(header));
            }
        });
        (format!("http://{addr}/api/thumb/a.mp4"), handle, server)
    }

    #[test]
    fn preview_splits_pixels_into_half_blocks() {
        let preview = decode_preview(&png_bytes(), 2, 1).unwrap();
        assert_eq!(preview.cells.len(), 2);
        let left = preview.cell(0, 0).unwrap();
        assert!(left.top[0] > left.top[2]);
        assert!(preview.cell(2, 0).is_none());
        assert!(decode_preview(b"nope", 2, 2).is_err());
    }

    #[test]
    fn second_request_is_served_from_cache() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            storage::Store::open(storage::Options {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        let hits = Arc::new(AtomicUsize::new(0));
        let (url, handle, server) = serve_png(hits.clone());
        let manager = Manager::new(
            store.clone(),
            Config {
                cache_dir: Some(dir.path().join("cache")),
                workers: 1,
                ..Config::default()
            },
        )
        .unwrap();

        let first = manager
            .enqueue(Request {
                url: url.clone(),
                cols: 2,
                rows: 2,
                ..Request::default()
            })
            .recv()
            .unwrap();
        assert!(first.error.is_none());
        assert_eq!(first.entry.as_ref().unwrap().media_type, "image/png");
        assert!(first.preview.is_some());

        let second = manager
            .enqueue(Request {
                url: url.clone(),
                ..Request::default()
            })
            .recv()
            .unwrap();
        assert!(second.entry.is_some());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let forced = manager
            .enqueue(Request {
                url,
                force: true,
                ..Request::default()
            })
            .recv()
            .unwrap();
        assert!(forced.entry.is_some());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        drop(manager);
        server.unblock();
        handle.join().unwrap();
    }
}
