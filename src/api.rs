use std::time::Duration;

use anyhow::{bail, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::form_urlencoded;

use crate::comments::{Comment, NewComment, RandomComment};
use crate::library::DirectoryListing;
use crate::path::LibraryPath;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("media server unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("media server answered {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
    #[error("server reported an unusable path: {0}")]
    Path(#[from] crate::path::PathError),
}

/// Route builder for the media server. Paths are appended as already
/// encoded text so no URL normalization can touch them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let parsed = url::Url::parse(base_url.trim())?;
        if parsed.cannot_be_a_base() {
            return Err(ApiError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }
        let mut base = parsed.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn list(&self, path: &LibraryPath) -> String {
        if path.is_root() {
            format!("{}api/list", self.base)
        } else {
            self.route("list", path)
        }
    }

    pub fn video(&self, path: &LibraryPath) -> String {
        self.route("video", path)
    }

    pub fn transcode(&self, path: &LibraryPath) -> String {
        self.route("transcode", path)
    }

    pub fn thumbnail(&self, path: &LibraryPath) -> String {
        self.route("thumb", path)
    }

    pub fn comments(&self, path: &LibraryPath) -> String {
        self.route("comments", path)
    }

    pub fn search(&self, query: &str) -> String {
        let encoded: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("query", query)
            .finish();
        format!("{}api/search?{}", self.base, encoded)
    }

    pub fn random_comment(&self) -> String {
        format!("{}api/random_comment", self.base)
    }

    fn route(&self, name: &str, path: &LibraryPath) -> String {
        format!("{}api/{}/{}", self.base, name, path.encode())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    endpoints: Endpoints,
}

#[derive(Debug, Deserialize)]
struct ListingPayload {
    #[serde(default)]
    path: String,
    #[serde(default)]
    directories: Vec<String>,
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    #[serde(default)]
    results: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CommentsPayload {
    #[serde(default)]
    comments: Vec<Comment>,
}

#[derive(Debug, Deserialize)]
struct RandomPayload {
    #[serde(default)]
    video: String,
    username: Option<String>,
    emoji: Option<String>,
    rating: Option<u8>,
    comment: Option<String>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("media client user agent required");
        }
        let endpoints = Endpoints::new(&config.base_url)?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            endpoints,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn list_directory(&self, path: &LibraryPath) -> Result<DirectoryListing, ApiError> {
        let payload: ListingPayload = self.get_json(&self.endpoints.list(path), "listing")?;
        Ok(DirectoryListing {
            path: LibraryPath::parse(&payload.path)?,
            directories: payload.directories,
            files: payload.files,
        })
    }

    pub fn search(&self, query: &str) -> Result<Vec<LibraryPath>, ApiError> {
        let payload: SearchPayload = self.get_json(&self.endpoints.search(query), "search")?;
        let mut results = Vec::with_capacity(payload.results.len());
        for raw in payload.results {
            match LibraryPath::parse(&raw) {
                Ok(path) if !path.is_root() => results.push(path),
                Ok(_) => {}
                Err(err) => tracing::warn!(%raw, %err, "dropping search hit"),
            }
        }
        Ok(results)
    }

    pub fn comments(&self, path: &LibraryPath) -> Result<Vec<Comment>, ApiError> {
        let payload: CommentsPayload =
            self.get_json(&self.endpoints.comments(path), "comments")?;
        Ok(payload.comments)
    }

    /// Posts a comment. Any 2xx answer is the acknowledgement; its body is
    /// not inspected.
    pub fn add_comment(&self, path: &LibraryPath, comment: &NewComment) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.endpoints.comments(path))
            .header(USER_AGENT, &self.user_agent)
            .json(comment)
            .send()?;
        check_status(resp)?;
        Ok(())
    }

    pub fn random_comment(&self) -> Result<Option<RandomComment>, ApiError> {
        let body = check_status(self.get(&self.endpoints.random_comment())?)?.text()?;
        parse_random_comment(&body)
    }

    fn get(&self, url: &str) -> Result<Response, ApiError> {
        tracing::trace!(%url, "GET");
        Ok(self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .send()?)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, what: &'static str) -> Result<T, ApiError> {
        let body = check_status(self.get(url)?)?.text()?;
        serde_json::from_str(&body).map_err(|source| ApiError::Decode { what, source })
    }
}

fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(ApiError::Status { status, body })
}

/// Empty bodies, `null`, `{}` and objects without `comment` all mean there
/// is nothing to show.
pub fn parse_random_comment(body: &str) -> Result<Option<RandomComment>, ApiError> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(None);
    }
    let payload: Option<RandomPayload> =
        serde_json::from_str(body).map_err(|source| ApiError::Decode {
            what: "random comment",
            source,
        })?;
    Ok(payload.and_then(|payload| {
        let text = payload.comment?;
        Some(RandomComment {
            video: payload.video,
            username: payload.username,
            emoji: payload.emoji,
            rating: payload.rating,
            text,
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Endpoints {
        Endpoints::new("http://media.test:5000").unwrap()
    }

    #[test]
    fn root_listing_has_no_trailing_slash() {
        assert_eq!(
            endpoints().list(&LibraryPath::root()),
            "http://media.test:5000/api/list"
        );
        assert_eq!(
            endpoints().list(&LibraryPath::parse("Movies/Action").unwrap()),
            "http://media.test:5000/api/list/Movies/Action"
        );
    }

    #[test]
    fn routes_encode_segments() {
        let path = LibraryPath::new(["A & B", "clip?#1.mkv"]).unwrap();
        let e = endpoints();
        assert_eq!(
            e.video(&path),
            "http://media.test:5000/api/video/A%20%26%20B/clip%3F%231.mkv"
        );
        assert!(e.transcode(&path).contains("/api/transcode/A%20%26%20B/"));
        assert!(e.comments(&path).contains("/api/comments/A%20%26%20B/"));
        assert_eq!(
            e.random_comment(),
            "http://media.test:5000/api/random_comment"
        );
    }

    #[test]
    fn search_query_is_form_encoded() {
        assert_eq!(
            endpoints().search("space & time"),
            "http://media.test:5000/api/search?query=space+%26+time"
        );
    }

    #[test]
    fn base_path_is_preserved() {
        let e = Endpoints::new("http://host/media/").unwrap();
        assert_eq!(e.random_comment(), "http://host/media/api/random_comment");
        assert!(Endpoints::new("not a url").is_err());
    }

    #[test]
    fn random_comment_empty_forms() {
        for body in ["", "  ", "null", "{}", r#"{"video":"a.mp4","rating":3}"#] {
            assert_eq!(parse_random_comment(body).unwrap(), None, "body {body:?}");
        }
        let parsed = parse_random_comment(
            r#"{"video":"Movies/a.mp4","username":"lee","emoji":"👀","rating":4,"comment":"wow"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(parsed.video, "Movies/a.mp4");
        assert_eq!(parsed.text, "wow");
        assert_eq!(parsed.rating, Some(4));
        assert!(parse_random_comment("[1,2]").is_err());
    }
}
