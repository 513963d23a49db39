use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;

use crate::api;
use crate::comments::{Comment, NewComment, RandomComment};
use crate::library::DirectoryListing;
use crate::path::LibraryPath;

pub trait LibraryService: Send + Sync {
    fn list_directory(&self, path: &LibraryPath) -> Result<DirectoryListing>;
    fn search(&self, query: &str) -> Result<Vec<LibraryPath>>;
}

pub trait CommentService: Send + Sync {
    fn load_comments(&self, path: &LibraryPath) -> Result<Vec<Comment>>;
    fn submit_comment(&self, path: &LibraryPath, comment: &NewComment) -> Result<()>;
}

pub trait OverlayService: Send + Sync {
    fn random_comment(&self) -> Result<Option<RandomComment>>;
}

pub struct HttpLibraryService {
    client: Arc<api::Client>,
}

impl HttpLibraryService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl LibraryService for HttpLibraryService {
    fn list_directory(&self, path: &LibraryPath) -> Result<DirectoryListing> {
        self.client
            .list_directory(path)
            .with_context(|| format!("list {path}"))
    }

    fn search(&self, query: &str) -> Result<Vec<LibraryPath>> {
        self.client
            .search(query)
            .with_context(|| format!("search for {query:?}"))
    }
}

pub struct HttpCommentService {
    client: Arc<api::Client>,
}

impl HttpCommentService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CommentService for HttpCommentService {
    fn load_comments(&self, path: &LibraryPath) -> Result<Vec<Comment>> {
        self.client
            .comments(path)
            .with_context(|| format!("load comments for {path}"))
    }

    fn submit_comment(&self, path: &LibraryPath, comment: &NewComment) -> Result<()> {
        self.client
            .add_comment(path, comment)
            .with_context(|| format!("submit comment for {path}"))
    }
}

pub struct HttpOverlayService {
    client: Arc<api::Client>,
}

impl HttpOverlayService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl OverlayService for HttpOverlayService {
    fn random_comment(&self) -> Result<Option<RandomComment>> {
        self.client
            .random_comment()
            .context("fetch random comment")
    }
}

/// In-memory library used by `--demo` and by tests.
pub struct MockLibraryService {
    tree: HashMap<LibraryPath, (Vec<String>, Vec<String>)>,
}

impl Default for MockLibraryService {
    fn default() -> Self {
        let mut tree = HashMap::new();
        let dir = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        tree.insert(
            LibraryPath::root(),
            (dir(&["Movies", "Shows"]), dir(&["welcome.mp4"])),
        );
        tree.insert(
            LibraryPath::new(["Movies"]).unwrap_or_default(),
            (dir(&["Classics"]), dir(&["clip.mkv", "trailer.mov", "home video.avi"])),
        );
        tree.insert(
            LibraryPath::new(["Movies", "Classics"]).unwrap_or_default(),
            (Vec::new(), dir(&["nosferatu.mp4"])),
        );
        tree.insert(
            LibraryPath::new(["Shows"]).unwrap_or_default(),
            (Vec::new(), dir(&["pilot.mkv", "finale.webm"])),
        );
        Self { tree }
    }
}

impl MockLibraryService {
    fn all_files(&self) -> Vec<LibraryPath> {
        let mut files: Vec<LibraryPath> = self
            .tree
            .iter()
            .flat_map(|(dir, (_, files))| files.iter().filter_map(|name| dir.join(name).ok()))
            .collect();
        files.sort_by_key(|path| path.as_server_path());
        files
    }
}

impl LibraryService for MockLibraryService {
    fn list_directory(&self, path: &LibraryPath) -> Result<DirectoryListing> {
        let (directories, files) = self
            .tree
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("list {path}: not found"))?;
        Ok(DirectoryListing {
            path: path.clone(),
            directories,
            files,
        })
    }

    fn search(&self, query: &str) -> Result<Vec<LibraryPath>> {
        let needle = query.to_lowercase();
        Ok(self
            .all_files()
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| name.to_lowercase().contains(&needle))
            })
            .collect())
    }
}

#[derive(Default)]
pub struct MockCommentService {
    comments: Mutex<HashMap<LibraryPath, Vec<Comment>>>,
}

impl CommentService for MockCommentService {
    fn load_comments(&self, path: &LibraryPath) -> Result<Vec<Comment>> {
        Ok(self.comments.lock().get(path).cloned().unwrap_or_default())
    }

    fn submit_comment(&self, path: &LibraryPath, comment: &NewComment) -> Result<()> {
        self.comments
            .lock()
            .entry(path.clone())
            .or_default()
            .push(Comment {
                username: comment.username.clone(),
                emoji: comment.emoji.clone(),
                rating: i64::from(comment.rating.get()),
                text: comment.text.clone(),
            });
        Ok(())
    }
}

#[derive(Default)]
pub struct MockOverlayService;

impl OverlayService for MockOverlayService {
    fn random_comment(&self) -> Result<Option<RandomComment>> {
        Ok(Some(RandomComment {
            video: "Movies/clip.mkv".into(),
            username: Some("flix".into()),
            emoji: Some("🎬".into()),
            rating: Some(5),
            text: "Welcome to the demo library".into(),
        }))
    }
}
