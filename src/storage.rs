use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub const PREF_USERNAME: &str = "username";
pub const PREF_EMOJI: &str = "emoji";

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// Identity attached to submitted comments. Survives restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preferences {
    pub username: Option<String>,
    pub emoji: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub id: i64,
    pub url: String,
    pub media_type: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub checksum: String,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        tracing::debug!(path = %path.display(), "storage opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM preferences WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("storage: query preference {key}"))
    }

    /// Stores `value` under `key`; a missing or blank value removes the key.
    pub fn set_preference(&self, key: &str, value: Option<&str>) -> Result<()> {
        if key.is_empty() {
            bail!("storage: preference key required");
        }
        let conn = self.conn.lock();
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(value) => {
                conn.execute(
                    r#"
INSERT INTO preferences (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#,
                    params![key, value, Utc::now().timestamp()],
                )
                .with_context(|| format!("storage: write preference {key}"))?;
            }
            None => {
                conn.execute("DELETE FROM preferences WHERE key = ?1", params![key])
                    .with_context(|| format!("storage: clear preference {key}"))?;
            }
        }
        Ok(())
    }

    pub fn load_preferences(&self) -> Result<Preferences> {
        Ok(Preferences {
            username: self.get_preference(PREF_USERNAME)?,
            emoji: self.get_preference(PREF_EMOJI)?,
        })
    }

    pub fn save_preferences(&self, prefs: &Preferences) -> Result<()> {
        self.set_preference(PREF_USERNAME, prefs.username.as_deref())?;
        self.set_preference(PREF_EMOJI, prefs.emoji.as_deref())?;
        Ok(())
    }

    pub fn upsert_media_entry(&self, mut entry: MediaEntry) -> Result<i64> {
        if entry.url.is_empty() {
            bail!("storage: media url required");
        }
        if entry.fetched_at.timestamp() == 0 {
            entry.fetched_at = Utc::now();
        }
        let expires = entry.expires_at.map(|dt| dt.timestamp());
        let conn = self.conn.lock();
        let id: i64 = conn.query_row(
            r#"
INSERT INTO media_cache (url, media_type, file_path, size_bytes, fetched_at, expires_at, checksum)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(url) DO UPDATE SET
  media_type = excluded.media_type,
  file_path = excluded.file_path,
  size_bytes = excluded.size_bytes,
  fetched_at = excluded.fetched_at,
  expires_at = excluded.expires_at,
  checksum = excluded.checksum
RETURNING id
"#,
            params![
                entry.url,
                entry.media_type,
                entry.file_path,
                entry.size_bytes,
                entry.fetched_at.timestamp(),
                expires,
                entry.checksum,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_media_entry_by_url(&self, url: &str) -> Result<Option<MediaEntry>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT id, url, media_type, file_path, size_bytes, fetched_at, expires_at, checksum
FROM media_cache
WHERE url = ?1
"#,
            params![url],
            media_entry_from_row,
        )
        .optional()
        .context("storage: query media entry")
    }

    pub fn total_media_size(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let total: Option<i64> = conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM media_cache",
            [],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0))
    }

    pub fn list_oldest_media(&self, limit: usize) -> Result<Vec<MediaEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT id, url, media_type, file_path, size_bytes, fetched_at, expires_at, checksum
FROM media_cache
ORDER BY fetched_at ASC
LIMIT ?1
"#,
        )?;
        let rows = stmt
            .query_map(params![limit as i64], media_entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_media_entries(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = ids
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(",");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "DELETE FROM media_cache WHERE id IN ({})",
            placeholders
        ))?;
        stmt.execute(rusqlite::params_from_iter(ids.iter()))?;
        Ok(())
    }
}

fn media_entry_from_row(row: &Row<'_>) -> rusqlite::Result<MediaEntry> {
    let fetched: i64 = row.get(5)?;
    let expires: Option<i64> = row.get(6)?;
    Ok(MediaEntry {
        id: row.get(0)?,
        url: row.get(1)?,
        media_type: row.get(2)?,
        file_path: row.get(3)?,
        size_bytes: row.get(4)?,
        fetched_at: Utc
            .timestamp_opt(fetched, 0)
            .single()
            .unwrap_or_else(Utc::now),
        expires_at: expires.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        checksum: row.get(7)?,
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
        tracing::info!(version, "storage migration applied");
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS preferences (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS media_cache (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  url TEXT NOT NULL UNIQUE,
  media_type TEXT NOT NULL,
  file_path TEXT NOT NULL,
  size_bytes INTEGER,
  fetched_at INTEGER NOT NULL,
  expires_at INTEGER,
  checksum TEXT
);

CREATE INDEX IF NOT EXISTS idx_media_cache_fetched_at ON media_cache(fetched_at);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("flix-tui").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_at(path: &std::path::Path) -> Store {
        Store::open(Options {
            path: Some(path.to_path_buf()),
        })
        .unwrap()
    }

    #[test]
    fn open_creates_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = open_at(&path);
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn preferences_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = open_at(&path);
        assert_eq!(store.load_preferences().unwrap(), Preferences::default());
        store
            .save_preferences(&Preferences {
                username: Some("chris".into()),
                emoji: Some("🍿".into()),
            })
            .unwrap();
        store.close().unwrap();

        let store = open_at(&path);
        let prefs = store.load_preferences().unwrap();
        assert_eq!(prefs.username.as_deref(), Some("chris"));
        assert_eq!(prefs.emoji.as_deref(), Some("🍿"));
    }

    #[test]
    fn blank_preference_clears_key() {
        let dir = tempdir().unwrap();
        let store = open_at(&dir.path().join("state.db"));
        store.set_preference(PREF_EMOJI, Some("🎬")).unwrap();
        store.set_preference(PREF_EMOJI, Some("   ")).unwrap();
        assert_eq!(store.get_preference(PREF_EMOJI).unwrap(), None);
    }

    #[test]
    fn media_entries_upsert_by_url() {
        let dir = tempdir().unwrap();
        let store = open_at(&dir.path().join("state.db"));
        let entry = MediaEntry {
            id: 0,
            url: "http://media/api/thumb/a.mp4".into(),
            media_type: "image/jpeg".into(),
            file_path: "/tmp/a.bin".into(),
            size_bytes: 10,
            fetched_at: Utc::now(),
            expires_at: None,
            checksum: "abc".into(),
        };
        let first = store.upsert_media_entry(entry.clone()).unwrap();
        let second = store
            .upsert_media_entry(MediaEntry {
                size_bytes: 25,
                ..entry
            })
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.total_media_size().unwrap(), 25);
        store.delete_media_entries(&[first]).unwrap();
        assert!(store
            .get_media_entry_by_url("http://media/api/thumb/a.mp4")
            .unwrap()
            .is_none());
    }
}
