//! Greeting Store - persistent storage for guestbook posts.
//!
//! SQLite-backed storage for greetings and the classifier verdicts attached
//! to them. One table, two operations: insert a greeting, list the most
//! recent greetings of a guestbook. Anything richer is deliberately out of
//! scope.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use guestbook_types::{Greeting, GuestbookName, Sentiment};

/// Persistent store for guestbook greetings.
pub struct GreetingStore {
    db: Connection,
}

impl GreetingStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS greetings (
            id INTEGER PRIMARY KEY,
            guestbook TEXT NOT NULL,
            author TEXT NOT NULL,
            content TEXT NOT NULL,
            posted_at TEXT NOT NULL,
            positive INTEGER NOT NULL,
            language TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_greetings_guestbook
        ON greetings(guestbook, posted_at DESC);
    ";

    /// Open or create the greeting database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let db = Connection::open(path)
            .with_context(|| format!("Failed to open greeting store at {}", path.display()))?;
        Self::initialize(db)
    }

    /// Open an in-memory greeting store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory greeting store")?;
        Self::initialize(db)
    }

    fn initialize(db: Connection) -> Result<Self> {
        db.execute_batch(Self::SCHEMA)
            .context("Failed to initialize greeting store schema")?;
        Ok(Self { db })
    }

    /// Persist a greeting. Returns the new row id.
    pub fn insert(&self, greeting: &Greeting) -> Result<i64> {
        self.db
            .execute(
                "INSERT INTO greetings (guestbook, author, content, posted_at, positive, language)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    greeting.guestbook.as_str(),
                    greeting.author,
                    greeting.content,
                    greeting.posted_at.to_rfc3339(),
                    greeting.sentiment.is_positive(),
                    greeting.language,
                ],
            )
            .context("Failed to insert greeting")?;
        Ok(self.db.last_insert_rowid())
    }

    /// Most recent greetings of a guestbook, newest first.
    pub fn recent(&self, guestbook: &GuestbookName, limit: u32) -> Result<Vec<Greeting>> {
        let mut stmt = self
            .db
            .prepare(
                "SELECT guestbook, author, content, posted_at, positive, language
                 FROM greetings
                 WHERE guestbook = ?1
                 ORDER BY posted_at DESC, id DESC
                 LIMIT ?2",
            )
            .context("Failed to prepare greeting query")?;

        let rows = stmt
            .query_map(params![guestbook.as_str(), i64::from(limit)], |row| {
                Ok(RawGreeting {
                    guestbook: row.get(0)?,
                    author: row.get(1)?,
                    content: row.get(2)?,
                    posted_at: row.get(3)?,
                    positive: row.get(4)?,
                    language: row.get(5)?,
                })
            })
            .context("Failed to query greetings")?;

        let mut greetings = Vec::new();
        for row in rows {
            let raw = row.context("Failed to read greeting row")?;
            greetings.push(raw.into_greeting()?);
        }
        Ok(greetings)
    }
}

/// Row shape as stored; converted back into the domain type after reading.
struct RawGreeting {
    guestbook: String,
    author: String,
    content: String,
    posted_at: String,
    positive: bool,
    language: String,
}

impl RawGreeting {
    fn into_greeting(self) -> Result<Greeting> {
        let guestbook = GuestbookName::new(self.guestbook)
            .context("Stored greeting has an empty guestbook name")?;
        let posted_at = DateTime::parse_from_rfc3339(&self.posted_at)
            .with_context(|| format!("Stored greeting has a bad timestamp: {}", self.posted_at))?
            .with_timezone(&Utc);
        let sentiment = if self.positive {
            Sentiment::Positive
        } else {
            Sentiment::Negative
        };
        Ok(Greeting {
            guestbook,
            author: self.author,
            content: self.content,
            posted_at,
            sentiment,
            language: self.language,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeting(name: &GuestbookName, content: &str, sentiment: Sentiment) -> Greeting {
        Greeting::new(
            name.clone(),
            Some("alice".to_string()),
            content,
            sentiment,
            "english",
        )
        .unwrap()
    }

    #[test]
    fn insert_and_read_back_roundtrip() {
        let store = GreetingStore::open_in_memory().unwrap();
        let name = GuestbookName::new("family").unwrap();
        let original = greeting(&name, "hello", Sentiment::Positive);

        store.insert(&original).unwrap();

        let loaded = store.recent(&name, 10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "hello");
        assert_eq!(loaded[0].author, "alice");
        assert_eq!(loaded[0].sentiment, Sentiment::Positive);
        assert_eq!(loaded[0].language, "english");
        // RFC 3339 roundtrip is lossy below nanoseconds only.
        assert_eq!(
            loaded[0].posted_at.timestamp_micros(),
            original.posted_at.timestamp_micros()
        );
    }

    #[test]
    fn recent_is_scoped_to_guestbook_and_limited() {
        let store = GreetingStore::open_in_memory().unwrap();
        let family = GuestbookName::new("family").unwrap();
        let work = GuestbookName::new("work").unwrap();

        for i in 0..5 {
            store
                .insert(&greeting(&family, &format!("family {i}"), Sentiment::Negative))
                .unwrap();
        }
        store
            .insert(&greeting(&work, "work post", Sentiment::Positive))
            .unwrap();

        let loaded = store.recent(&family, 3).unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(loaded.iter().all(|g| g.guestbook == family));
        // Newest first: identical timestamps fall back to insertion order.
        assert_eq!(loaded[0].content, "family 4");

        let loaded = store.recent(&work, 10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "work post");
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("guestbook.db");

        let store = GreetingStore::open(&path).unwrap();
        let name = GuestbookName::new("family").unwrap();
        store
            .insert(&greeting(&name, "hello", Sentiment::Positive))
            .unwrap();

        drop(store);
        let store = GreetingStore::open(&path).unwrap();
        assert_eq!(store.recent(&name, 10).unwrap().len(), 1);
    }
}
