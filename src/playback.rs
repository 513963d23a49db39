use std::collections::HashSet;

use crate::api::Endpoints;
use crate::path::LibraryPath;

/// Declared MIME of every transcoded stream.
pub const TRANSCODE_MIME: &str = "video/mp4";

/// Extensions the server can transcode when the player can't handle them.
const TRANSCODABLE: [&str; 2] = ["mkv", "avi"];

/// Answers whether the local player handles a MIME type natively.
pub trait Capabilities {
    fn can_play(&self, mime: &str) -> bool;
}

impl<F> Capabilities for F
where
    F: Fn(&str) -> bool,
{
    fn can_play(&self, mime: &str) -> bool {
        self(mime)
    }
}

/// MIME types the configured player is trusted to play directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFormats {
    mimes: HashSet<String>,
}

impl NativeFormats {
    pub fn new<I, S>(mimes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            mimes: mimes
                .into_iter()
                .map(|m| m.as_ref().trim().to_ascii_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }
}

impl Capabilities for NativeFormats {
    fn can_play(&self, mime: &str) -> bool {
        self.mimes.contains(&mime.to_ascii_lowercase())
    }
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        _ => "",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSource {
    pub uri: String,
    pub declared_mime: String,
    pub is_transcoded: bool,
}

pub fn negotiate(
    path: &LibraryPath,
    endpoints: &Endpoints,
    capabilities: &dyn Capabilities,
) -> PlaybackSource {
    let ext = path.extension().unwrap_or_default();
    let mime = mime_for_extension(&ext);

    let transcode = !mime.is_empty()
        && TRANSCODABLE.contains(&ext.as_str())
        && !capabilities.can_play(mime);

    if transcode {
        tracing::info!(%path, %mime, "player lacks native support, using transcode stream");
        PlaybackSource {
            uri: endpoints.transcode(path),
            declared_mime: TRANSCODE_MIME.to_string(),
            is_transcoded: true,
        }
    } else {
        PlaybackSource {
            uri: endpoints.video(path),
            declared_mime: mime.to_string(),
            is_transcoded: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn endpoints() -> Endpoints {
        Endpoints::new("http://media.test:5000").unwrap()
    }

    fn path(raw: &str) -> LibraryPath {
        LibraryPath::parse(raw).unwrap()
    }

    #[test]
    fn mkv_without_support_is_transcoded() {
        let source = negotiate(&path("Movies/clip.mkv"), &endpoints(), &|_: &str| false);
        assert_eq!(
            source,
            PlaybackSource {
                uri: "http://media.test:5000/api/transcode/Movies/clip.mkv".into(),
                declared_mime: "video/mp4".into(),
                is_transcoded: true,
            }
        );
    }

    #[test]
    fn decision_table() {
        let cases: &[(&str, bool, &str, &str, bool)] = &[
            ("a.mp4", false, "video", "video/mp4", false),
            ("a.MKV", true, "video", "video/x-matroska", false),
            ("a.avi", false, "transcode", "video/mp4", true),
            ("a.avi", true, "video", "video/x-msvideo", false),
            ("a.mov", false, "video", "video/quicktime", false),
            ("a.webm", false, "video", "", false),
            ("noext", false, "video", "", false),
        ];
        for &(name, native, route, mime, transcoded) in cases {
            let source = negotiate(&path(name), &endpoints(), &move |_: &str| native);
            assert!(source.uri.contains(&format!("/api/{route}/")), "{name}");
            assert_eq!(source.declared_mime, mime, "{name}");
            assert_eq!(source.is_transcoded, transcoded, "{name}");
        }
    }

    #[test]
    fn probes_at_most_once_and_never_empty() {
        for (name, expected) in [("a.mkv", 1), ("a.mp4", 0), ("a.bin", 0), ("a.avi", 1)] {
            let calls = Cell::new(0);
            let probe = |mime: &str| {
                assert!(!mime.is_empty());
                calls.set(calls.get() + 1);
                false
            };
            negotiate(&path(name), &endpoints(), &probe);
            assert_eq!(calls.get(), expected, "{name}");
        }
    }

    #[test]
    fn native_formats_match_case_insensitively() {
        let formats = NativeFormats::new(["Video/MP4", " ", "video/quicktime"]);
        assert!(formats.can_play("video/mp4"));
        assert!(!formats.can_play("video/x-matroska"));
        let source = negotiate(&path("x.mkv"), &endpoints(), &formats);
        assert!(source.is_transcoded);
    }
}
