//! Content-addressed classification cache.
//!
//! Keyed by `sha256(normalized text)` so reformatted copies of the same
//! message share one entry. Writes are upserts; reads ignore expired rows.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};

use slabot_core::types::Category;

use crate::error::Result;
use crate::types::Classification;

pub const MODEL_CACHE: &str = "cache";

#[derive(Clone)]
pub struct ClassificationCache {
    conn: Arc<Mutex<Connection>>,
}

impl ClassificationCache {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS classification_cache (
                text_hash   TEXT NOT NULL PRIMARY KEY,
                category    TEXT NOT NULL,
                confidence  REAL NOT NULL,
                model       TEXT NOT NULL,
                reasoning   TEXT,
                expires_at  TEXT NOT NULL,
                created_at  TEXT NOT NULL
            ) STRICT;",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cache key for normalized message text.
    pub fn key(normalized: &str) -> String {
        hex::encode(Sha256::digest(normalized.as_bytes()))
    }

    /// A non-expired entry, re-labelled as coming from the cache.
    pub fn get(&self, key: &str) -> Result<Option<Classification>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT category, confidence, reasoning FROM classification_cache
                 WHERE text_hash = ?1 AND expires_at > ?2",
                params![key, Utc::now().to_rfc3339()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(row.and_then(|(category, confidence, reasoning)| {
            let category: Category = category.parse().ok()?;
            Some(Classification {
                category,
                confidence,
                model: MODEL_CACHE.to_string(),
                reasoning,
            })
        }))
    }

    /// Upsert an entry with a TTL. The producing model is stored for
    /// observability even though reads re-label hits as `cache`.
    pub fn put(&self, key: &str, classification: &Classification, ttl_minutes: i64) -> Result<()> {
        let now = Utc::now();
        let expires = now + Duration::minutes(ttl_minutes.max(1));
        let conn = self.conn();
        conn.execute(
            "INSERT INTO classification_cache
             (text_hash, category, confidence, model, reasoning, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(text_hash) DO UPDATE SET
                 category = excluded.category,
                 confidence = excluded.confidence,
                 model = excluded.model,
                 reasoning = excluded.reasoning,
                 expires_at = excluded.expires_at",
            params![
                key,
                classification.category.to_string(),
                classification.confidence,
                classification.model,
                classification.reasoning,
                expires.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Drop expired rows. Called opportunistically by the retention sweep.
    pub fn prune_expired(&self) -> Result<usize> {
        let conn = self.conn();
        let n = conn.execute(
            "DELETE FROM classification_cache WHERE expires_at <= ?1",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Classification {
        Classification::new(Category::Request, 0.9, "gpt-4o-mini")
    }

    #[test]
    fn round_trip_relabels_as_cache() {
        let cache = ClassificationCache::open_in_memory().unwrap();
        let key = ClassificationCache::key("где мой счет?");
        cache.put(&key, &sample(), 60).unwrap();

        let hit = cache.get(&key).unwrap().unwrap();
        assert_eq!(hit.category, Category::Request);
        assert!((hit.confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(hit.model, MODEL_CACHE);
    }

    #[test]
    fn miss_on_unknown_key() {
        let cache = ClassificationCache::open_in_memory().unwrap();
        assert!(cache.get("deadbeef").unwrap().is_none());
    }

    #[test]
    fn upsert_replaces_previous_entry() {
        let cache = ClassificationCache::open_in_memory().unwrap();
        let key = ClassificationCache::key("спасибо");
        cache.put(&key, &sample(), 60).unwrap();
        let updated = Classification::new(Category::Gratitude, 0.75, "keyword");
        cache.put(&key, &updated, 60).unwrap();
        assert_eq!(cache.get(&key).unwrap().unwrap().category, Category::Gratitude);
    }

    #[test]
    fn same_normalized_text_same_key() {
        assert_eq!(
            ClassificationCache::key("нужна справка"),
            ClassificationCache::key("нужна справка"),
        );
        assert_ne!(
            ClassificationCache::key("нужна справка"),
            ClassificationCache::key("нужна справка 2-ндфл"),
        );
    }
}
