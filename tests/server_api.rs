use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use flix_tui::api::{self, ApiError};
use flix_tui::comments::{self, Composer, NewComment, Rating};
use flix_tui::data::{
    CommentService, HttpCommentService, HttpLibraryService, HttpOverlayService, LibraryService,
    OverlayService,
};
use flix_tui::library::{self, TileAction};
use flix_tui::path::LibraryPath;
use flix_tui::playback::{self, NativeFormats};
use flix_tui::session::{NavigationOutcome, Session};
use flix_tui::storage::{self, Store};
use serde_json::{json, Value};
use tiny_http::{Header, Method, Response, Server};

/// In-memory media server speaking the library's JSON API.
struct FakeServer {
    server: Arc<Server>,
    handle: Option<thread::JoinHandle<()>>,
    base: String,
    posted: Arc<Mutex<HashMap<String, Vec<Value>>>>,
}

impl FakeServer {
    fn start() -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let addr = server.server_addr().to_ip().unwrap();
        let posted: Arc<Mutex<HashMap<String, Vec<Value>>>> = Arc::default();
        let random_calls = Arc::new(AtomicUsize::new(0));

        let worker = server.clone();
        let store = posted.clone();
        let handle = thread::spawn(move || {
            for mut request in worker.incoming_requests() {
                let url = request.url().to_string();
                let method = request.method().clone();
                let (status, body) = match (method, url.as_str()) {
                    (Method::Get, "/api/list") => (
                        200,
                        json!({"path": "", "directories": ["Movies"], "files": ["intro.mp4"]})
                            .to_string(),
                    ),
                    (Method::Get, "/api/list/Movies") => (
                        200,
                        json!({"path": "Movies", "directories": [], "files": ["clip.mkv", "talk.mp4"]})
                            .to_string(),
                    ),
                    (Method::Get, "/api/list/Broken") => (500, "boom".to_string()),
                    (Method::Get, "/api/search?query=clip+one") => (
                        200,
                        json!({"results": ["Movies/clip.mkv", "", "../etc/passwd"]}).to_string(),
                    ),
                    (Method::Get, "/api/random_comment") => {
                        if random_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            (200, "{}".to_string())
                        } else {
                            (
                                200,
                                json!({
                                    "video": "Movies/clip.mkv",
                                    "username": "lee",
                                    "emoji": "🍿",
                                    "rating": 5,
                                    "comment": "again!"
                                })
                                .to_string(),
                            )
                        }
                    }
                    (Method::Post, route) if route.starts_with("/api/comments/") => {
                        let mut raw = String::new();
                        let _ = request.as_reader().read_to_string(&mut raw);
                        let value: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
                        store
                            .lock()
                            .unwrap()
                            .entry(route.to_string())
                            .or_default()
                            .push(value);
                        (201, "{\"status\":\"ok\"}".to_string())
                    }
                    (Method::Get, route) if route.starts_with("/api/comments/") => {
                        let list = store
                            .lock()
                            .unwrap()
                            .get(route)
                            .cloned()
                            .unwrap_or_default();
                        (200, json!({ "comments": list }).to_string())
                    }
                    _ => (404, "not found".to_string()),
                };
                let header =
                    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
                let _ = request.respond(
                    Response::from_string(body)
                        .with_status_code(status)
                        .with_header(header),
                );
            }
        });

        FakeServer {
            server,
            handle: Some(handle),
            base: format!("http://{addr}/"),
            posted,
        }
    }

    fn client(&self) -> Arc<api::Client> {
        Arc::new(
            api::Client::new(api::ClientConfig {
                base_url: self.base.clone(),
                user_agent: "flix-tui-tests".into(),
                timeout: None,
                http_client: None,
            })
            .unwrap(),
        )
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn path(raw: &str) -> LibraryPath {
    LibraryPath::parse(raw).unwrap()
}

#[test]
fn browsing_follows_server_paths() {
    let fake = FakeServer::start();
    let service = HttpLibraryService::new(fake.client());
    let mut session = Session::default();

    match session.navigate_to(&service, LibraryPath::root()) {
        NavigationOutcome::Applied(listing) => {
            assert!(listing.path.is_root());
            assert_eq!(listing.directories, ["Movies"]);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    match session.navigate_to(&service, path("Movies")) {
        NavigationOutcome::Applied(listing) => assert_eq!(listing.files.len(), 2),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(session.current_path(), &path("Movies"));
    assert!(session.can_go_back());
}

#[test]
fn failed_listing_keeps_current_path() {
    let fake = FakeServer::start();
    let service = HttpLibraryService::new(fake.client());
    let mut session = Session::default();
    session.navigate_to(&service, path("Movies"));

    match session.navigate_to(&service, path("Broken")) {
        NavigationOutcome::Failed(err) => {
            let status = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<ApiError>())
                .and_then(|api| match api {
                    ApiError::Status { status, .. } => Some(status.as_u16()),
                    _ => None,
                });
            assert_eq!(status, Some(500));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(session.current_path(), &path("Movies"));
}

#[test]
fn matroska_tile_plays_through_transcoder() {
    let fake = FakeServer::start();
    let client = fake.client();
    let listing = client.list_directory(&path("Movies")).unwrap();
    let tiles = library::render(&listing, client.endpoints());

    let clip = tiles
        .tiles
        .iter()
        .find(|tile| tile.label == "clip.mkv")
        .unwrap();
    let TileAction::Play(clip_path) = &clip.action else {
        panic!("clip.mkv should be playable");
    };
    let native = NativeFormats::new(["video/mp4"]);

    let source = playback::negotiate(clip_path, client.endpoints(), &native);
    assert!(source.is_transcoded);
    assert_eq!(source.declared_mime, "video/mp4");
    assert_eq!(source.uri, format!("{}api/transcode/Movies/clip.mkv", fake.base));

    let talk = playback::negotiate(&path("Movies/talk.mp4"), client.endpoints(), &native);
    assert_eq!(talk.uri, format!("{}api/video/Movies/talk.mp4", fake.base));
}

#[test]
fn search_drops_unusable_hits() {
    let fake = FakeServer::start();
    let service = HttpLibraryService::new(fake.client());
    let results = service.search("clip one").unwrap();
    assert_eq!(results, [path("Movies/clip.mkv")]);
}

#[test]
fn posted_comment_is_listed_after_reload() {
    let fake = FakeServer::start();
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(storage::Options {
        path: Some(dir.path().join("state.db")),
    })
    .unwrap();
    let service = HttpCommentService::new(fake.client());
    let clip = path("Movies/clip.mkv");

    assert!(service.load_comments(&clip).unwrap().is_empty());

    let mut composer = Composer::default();
    composer.username = "ana".into();
    composer.text = "loved the ending".into();
    composer.adjust_rating(-2);
    let draft = composer.draft().unwrap();

    let reloaded = comments::submit(&service, &store, &clip, &draft)
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].username, "ana");
    assert_eq!(reloaded[0].rating, 3);
    assert_eq!(reloaded[0].text, "loved the ending");

    let posted = fake.posted.lock().unwrap();
    let body = &posted["/api/comments/Movies/clip.mkv"][0];
    assert_eq!(body["comment"], "loved the ending");
    assert_eq!(body["rating"], 3);
    assert!(body.get("emoji").is_none());
    drop(posted);

    assert_eq!(
        store.load_preferences().unwrap().username.as_deref(),
        Some("ana")
    );
}

#[test]
fn every_rating_survives_the_round_trip() {
    let fake = FakeServer::start();
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(storage::Options {
        path: Some(dir.path().join("state.db")),
    })
    .unwrap();
    let service = HttpCommentService::new(fake.client());
    let video = LibraryPath::new(["Shows", "pilot & finale.mkv"]).unwrap();

    for (index, value) in (1..=5u8).enumerate() {
        let draft = NewComment {
            username: format!("viewer{value}"),
            emoji: Some("🍿".into()),
            text: format!("rated {value} stars"),
            rating: Rating::new(value).unwrap(),
        };
        let reloaded = comments::submit(&service, &store, &video, &draft)
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.len(), index + 1);

        let last = reloaded.last().unwrap();
        assert_eq!(last.username, draft.username);
        assert_eq!(last.emoji.as_deref(), Some("🍿"));
        assert_eq!(last.rating, i64::from(value));
        assert_eq!(last.text, draft.text);
    }

    let prefs = store.load_preferences().unwrap();
    assert_eq!(prefs.username.as_deref(), Some("viewer5"));
    assert_eq!(prefs.emoji.as_deref(), Some("🍿"));
}

#[test]
fn random_comment_may_be_empty() {
    let fake = FakeServer::start();
    let service = HttpOverlayService::new(fake.client());
    assert!(service.random_comment().unwrap().is_none());

    let comment = service.random_comment().unwrap().unwrap();
    assert_eq!(comment.video, "Movies/clip.mkv");
    assert_eq!(comment.username.as_deref(), Some("lee"));
    assert_eq!(comment.text, "again!");
}
