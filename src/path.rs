use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Bytes escaped inside one path segment. Everything except the set that
/// `encodeURIComponent` leaves alone, so `/`, `%`, `?` and `#` never reach
/// the route unescaped.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path segment is empty")]
    EmptySegment,
    #[error("path segment {0:?} contains a separator")]
    Separator(String),
    #[error("path segment {0:?} is a relative component")]
    DotSegment(String),
}

/// Location inside the remote library. The empty sequence is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LibraryPath {
    segments: Vec<String>,
}

impl LibraryPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments
            .into_iter()
            .map(|segment| {
                let segment = segment.into();
                validate_segment(&segment)?;
                Ok(segment)
            })
            .collect::<Result<Vec<_>, PathError>>()?;
        Ok(Self { segments })
    }

    /// Parses a path as reported by the server (`"Movies/Action"`).
    /// Leading, trailing and doubled separators are ignored.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        Self::new(raw.split('/').filter(|piece| !piece.is_empty()))
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    pub fn join(&self, name: &str) -> Result<Self, PathError> {
        validate_segment(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Lowercased text after the final `.` of the last segment.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name()?;
        let (_, ext) = name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }

    /// Route form of the path: every segment escaped on its own, then
    /// joined with `/`. The root encodes to an empty string.
    pub fn encode(&self) -> String {
        self.segments
            .iter()
            .map(|segment| encode_segment(segment))
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Unescaped `a/b/c` form, as the server reports paths.
    pub fn as_server_path(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for LibraryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::EmptySegment);
    }
    if segment.contains('/') {
        return Err(PathError::Separator(segment.to_string()));
    }
    if segment == "." || segment == ".." {
        return Err(PathError::DotSegment(segment.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use percent_encoding::percent_decode_str;

    fn server_split(encoded: &str) -> Vec<String> {
        encoded
            .split('/')
            .map(|piece| percent_decode_str(piece).decode_utf8().unwrap().into_owned())
            .collect()
    }

    #[test]
    fn reserved_characters_survive_server_split() {
        let samples: Vec<Vec<&str>> = vec![
            vec!["Movies", "Action & Adventure", "clip?.mkv"],
            vec!["100% real", "#1 hits", "a+b=c"],
            vec!["Ünïcødé", "日本語", "emoji 🎬.mp4"],
            vec!["(director's cut)", "~tmp*!", "a%2Fb"],
        ];
        for segments in samples {
            let path = LibraryPath::new(segments.clone()).unwrap();
            let encoded = path.encode();
            assert!(!encoded.contains(' '));
            assert_eq!(server_split(&encoded), segments);
        }
    }

    #[test]
    fn unreserved_marks_are_left_alone() {
        let path = LibraryPath::new(["clip-1_final.(v2)!~*'.mp4"]).unwrap();
        assert_eq!(path.encode(), "clip-1_final.(v2)!~*'.mp4");
    }

    #[test]
    fn root_encodes_to_empty() {
        assert_eq!(LibraryPath::root().encode(), "");
        assert_eq!(LibraryPath::root().to_string(), "/");
    }

    #[test]
    fn rejects_invalid_segments() {
        assert_eq!(LibraryPath::new([""]), Err(PathError::EmptySegment));
        assert!(matches!(
            LibraryPath::new(["a/b"]),
            Err(PathError::Separator(_))
        ));
        assert!(matches!(
            LibraryPath::root().join(".."),
            Err(PathError::DotSegment(_))
        ));
    }

    #[test]
    fn parse_drops_empty_pieces() {
        let path = LibraryPath::parse("/Movies//Action/").unwrap();
        assert_eq!(path.segments(), ["Movies", "Action"]);
        assert!(LibraryPath::parse("").unwrap().is_root());
    }

    #[test]
    fn parent_walks_to_root() {
        let path = LibraryPath::parse("a/b").unwrap();
        let parent = path.parent().unwrap();
        assert_eq!(parent.as_server_path(), "a");
        assert!(parent.parent().unwrap().is_root());
        assert!(LibraryPath::root().parent().is_none());
    }

    #[test]
    fn extension_is_lowercased_after_last_dot() {
        let path = LibraryPath::parse("Movies/My.Clip.MKV").unwrap();
        assert_eq!(path.extension().as_deref(), Some("mkv"));
        assert_eq!(LibraryPath::parse("README").unwrap().extension(), None);
    }
}
