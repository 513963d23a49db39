use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

use crate::data::CommentService;
use crate::path::LibraryPath;
use crate::storage::{Preferences, Store};

/// A comment as the server returns it. The server owns ordering and
/// rating range; both are shown verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default, deserialize_with = "lenient_rating")]
    pub rating: i64,
    #[serde(rename = "comment")]
    pub text: String,
}

/// Whole numbers pass through, fractions round, anything else reads as 0.
fn lenient_rating<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// One comment picked by the server for the ambient overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomComment {
    pub video: String,
    pub username: Option<String>,
    pub emoji: Option<String>,
    pub rating: Option<u8>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rating {0} is outside {min}..={max}", min = Rating::MIN, max = Rating::MAX)]
pub struct RatingError(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Result<Self, RatingError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(RatingError(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Moves by `delta`, staying inside the valid range.
    pub fn step(self, delta: i8) -> Self {
        let next = (self.0 as i16 + delta as i16).clamp(Self::MIN as i16, Self::MAX as i16);
        Self(next as u8)
    }
}

impl Default for Rating {
    fn default() -> Self {
        Self(Self::MAX)
    }
}

pub fn stars(rating: i64) -> String {
    let filled = rating.clamp(0, i64::from(Rating::MAX)) as usize;
    let empty = (Rating::MAX as usize).saturating_sub(filled);
    format!("{}{}", "★".repeat(filled), "☆".repeat(empty))
}

/// Request body for a new comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewComment {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(rename = "comment")]
    pub text: String,
    pub rating: Rating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ComposeError {
    #[error("enter a name before posting")]
    MissingUsername,
    #[error("comment text is empty")]
    EmptyText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComposerField {
    Username,
    Emoji,
    Rating,
    #[default]
    Text,
}

impl ComposerField {
    pub fn next(self) -> Self {
        match self {
            ComposerField::Username => ComposerField::Emoji,
            ComposerField::Emoji => ComposerField::Rating,
            ComposerField::Rating => ComposerField::Text,
            ComposerField::Text => ComposerField::Username,
        }
    }

    pub fn previous(self) -> Self {
        match self {
            ComposerField::Username => ComposerField::Text,
            ComposerField::Emoji => ComposerField::Username,
            ComposerField::Rating => ComposerField::Emoji,
            ComposerField::Text => ComposerField::Rating,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ComposerField::Username => "Name",
            ComposerField::Emoji => "Emoji",
            ComposerField::Rating => "Rating",
            ComposerField::Text => "Comment",
        }
    }

    fn is_preference(self) -> bool {
        matches!(self, ComposerField::Username | ComposerField::Emoji)
    }
}

/// Draft state behind the comment form.
#[derive(Debug, Clone, Default)]
pub struct Composer {
    pub username: String,
    pub emoji: String,
    pub rating: Rating,
    pub text: String,
    pub field: ComposerField,
}

impl Composer {
    pub fn from_preferences(prefs: &Preferences) -> Self {
        Self {
            username: prefs.username.clone().unwrap_or_default(),
            emoji: prefs.emoji.clone().unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn preferences(&self) -> Preferences {
        Preferences {
            username: non_blank(&self.username),
            emoji: non_blank(&self.emoji),
        }
    }

    pub fn insert_char(&mut self, ch: char) {
        match self.field {
            ComposerField::Username => self.username.push(ch),
            ComposerField::Emoji => self.emoji.push(ch),
            ComposerField::Text => self.text.push(ch),
            ComposerField::Rating => {
                if let Some(digit) = ch.to_digit(10) {
                    if let Ok(rating) = Rating::new(digit as u8) {
                        self.rating = rating;
                    }
                }
            }
        }
    }

    pub fn backspace(&mut self) {
        match self.field {
            ComposerField::Username => {
                self.username.pop();
            }
            ComposerField::Emoji => {
                self.emoji.pop();
            }
            ComposerField::Text => {
                self.text.pop();
            }
            ComposerField::Rating => {}
        }
    }

    pub fn adjust_rating(&mut self, delta: i8) {
        self.rating = self.rating.step(delta);
    }

    /// Moves focus to `field`. Returns true when the field being left holds
    /// a preference, so the caller can persist the explicit edit.
    pub fn focus(&mut self, field: ComposerField) -> bool {
        let leaving = self.field;
        self.field = field;
        leaving.is_preference() && leaving != field
    }

    pub fn value(&self, field: ComposerField) -> String {
        match field {
            ComposerField::Username => self.username.clone(),
            ComposerField::Emoji => self.emoji.clone(),
            ComposerField::Rating => stars(i64::from(self.rating.get())),
            ComposerField::Text => self.text.clone(),
        }
    }

    pub fn draft(&self) -> Result<NewComment, ComposeError> {
        let username = self.username.trim();
        if username.is_empty() {
            return Err(ComposeError::MissingUsername);
        }
        let text = self.text.trim();
        if text.is_empty() {
            return Err(ComposeError::EmptyText);
        }
        Ok(NewComment {
            username: username.to_string(),
            emoji: non_blank(&self.emoji),
            text: text.to_string(),
            rating: self.rating,
        })
    }

    pub fn clear_text(&mut self) {
        self.text.clear();
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Posts `draft` for `path`. Once the server acknowledges it, the author's
/// name and emoji are stored and the list is fetched again. A failed reload
/// still counts as a successful post and yields `None`.
pub fn submit(
    service: &dyn CommentService,
    store: &Store,
    path: &LibraryPath,
    draft: &NewComment,
) -> Result<Option<Vec<Comment>>> {
    service
        .submit_comment(path, draft)
        .with_context(|| format!("post comment for {path}"))?;
    tracing::info!(%path, user = %draft.username, "comment accepted");

    let prefs = Preferences {
        username: Some(draft.username.clone()),
        emoji: draft.emoji.clone(),
    };
    if let Err(err) = store.save_preferences(&prefs) {
        tracing::warn!("failed to persist comment identity: {err:#}");
    }

    match service.load_comments(path) {
        Ok(comments) => Ok(Some(comments)),
        Err(err) => {
            tracing::warn!(%path, "reload after posting failed: {err:#}");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockCommentService;
    use crate::storage::Options;
    use tempfile::tempdir;

    #[test]
    fn rating_bounds() {
        assert!(Rating::new(0).is_err());
        assert_eq!(Rating::new(3).unwrap().get(), 3);
        assert_eq!(Rating::new(6), Err(RatingError(6)));
        assert_eq!(Rating::new(1).unwrap().step(-1).get(), 1);
        assert_eq!(Rating::new(4).unwrap().step(3).get(), 5);
    }

    #[test]
    fn wire_shape_matches_server() {
        let body = serde_json::to_value(NewComment {
            username: "kim".into(),
            emoji: None,
            text: "great".into(),
            rating: Rating::new(4).unwrap(),
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"username": "kim", "comment": "great", "rating": 4})
        );

        let parsed: Comment =
            serde_json::from_str(r#"{"username":"a","emoji":"🔥","rating":2,"comment":"meh"}"#)
                .unwrap();
        assert_eq!(parsed.text, "meh");
        assert_eq!(parsed.emoji.as_deref(), Some("🔥"));
    }

    #[test]
    fn odd_ratings_do_not_break_the_list() {
        let list: Vec<Comment> = serde_json::from_str(
            r#"[
                {"username":"a","rating":-2,"comment":"x"},
                {"username":"b","rating":4.6,"comment":"y"},
                {"username":"c","rating":"3","comment":"z"},
                {"username":"d","rating":null,"comment":"w"},
                {"username":"e","comment":"v"},
                {"username":"f","rating":9,"comment":"u"}
            ]"#,
        )
        .unwrap();
        let ratings: Vec<i64> = list.iter().map(|c| c.rating).collect();
        assert_eq!(ratings, [-2, 5, 3, 0, 0, 9]);
        assert_eq!(stars(-2), "☆☆☆☆☆");
        assert_eq!(stars(9), "★★★★★");
        assert_eq!(stars(3), "★★★☆☆");
    }

    #[test]
    fn draft_requires_name_and_text() {
        let mut composer = Composer::default();
        assert_eq!(composer.draft(), Err(ComposeError::MissingUsername));
        composer.username = " sam ".into();
        assert_eq!(composer.draft(), Err(ComposeError::EmptyText));
        composer.text = "nice".into();
        composer.emoji = "  ".into();
        let draft = composer.draft().unwrap();
        assert_eq!(draft.username, "sam");
        assert_eq!(draft.emoji, None);
        assert_eq!(draft.rating.get(), 5);
    }

    #[test]
    fn leaving_identity_fields_reports_edit() {
        let mut composer = Composer::default();
        assert!(!composer.focus(ComposerField::Username));
        composer.insert_char('x');
        assert!(composer.focus(ComposerField::Emoji));
        assert!(composer.focus(ComposerField::Rating));
        composer.insert_char('2');
        assert_eq!(composer.rating.get(), 2);
        assert!(!composer.focus(ComposerField::Text));
    }

    #[test]
    fn submit_persists_identity_and_reloads() {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();
        let service = MockCommentService::default();
        let path = LibraryPath::parse("Movies/clip.mkv").unwrap();
        let draft = NewComment {
            username: "ana".into(),
            emoji: Some("🎉".into()),
            text: "loved it".into(),
            rating: Rating::new(5).unwrap(),
        };

        let reloaded = submit(&service, &store, &path, &draft).unwrap().unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].text, "loved it");

        let prefs = store.load_preferences().unwrap();
        assert_eq!(prefs.username.as_deref(), Some("ana"));
        assert_eq!(prefs.emoji.as_deref(), Some("🎉"));
    }
}
