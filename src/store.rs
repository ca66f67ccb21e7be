//! Row-store abstraction for cached prompts and their facts.
//!
//! The [`FactStore`] trait defines the exact operations the request handlers
//! issue against the database, enabling pluggable backends: the Postgres
//! implementation used in production and an in-memory implementation for
//! handler tests.
//!
//! Implementations must be `Send + Sync` to be shared across requests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::models::{Fact, Prompt};

/// Result of persisting an extraction.
///
/// `Existing` is returned when another request with identical text won the
/// insert race: the prompt row already exists and its stored facts are
/// returned instead of duplicating them.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted { prompt_id: i64 },
    Existing { facts: Vec<String> },
}

/// Abstract storage backend for prompts and facts.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`facts_by_hash`](FactStore::facts_by_hash) | Cache lookup by content hash |
/// | [`insert_extraction`](FactStore::insert_extraction) | Transactional prompt + facts insert |
/// | [`facts_by_context`](FactStore::facts_by_context) | Fact rows filtered by context |
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Fact texts of the first prompt whose hash matches, or `None` on a
    /// cache miss.
    async fn facts_by_hash(&self, hash: &str) -> Result<Option<Vec<String>>>;

    /// Insert one prompt row (`fact_count` = `facts.len()`) and one fact row
    /// per extracted string, atomically.
    ///
    /// If a prompt with the same hash already exists, nothing is written and
    /// the stored facts are returned as [`InsertOutcome::Existing`].
    async fn insert_extraction(
        &self,
        text: &str,
        context: &str,
        hash: &str,
        facts: &[String],
    ) -> Result<InsertOutcome>;

    /// Full fact rows matching the given context. A `None` filter matches
    /// all rows.
    async fn facts_by_context(&self, context: Option<&str>) -> Result<Vec<Fact>>;
}

// ============ Postgres store ============

/// Postgres-backed [`FactStore`].
pub struct PgFactStore {
    pool: PgPool,
}

impl PgFactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FactStore for PgFactStore {
    async fn facts_by_hash(&self, hash: &str) -> Result<Option<Vec<String>>> {
        let prompt_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM prompts WHERE hash = $1 ORDER BY id LIMIT 1")
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;

        let Some(prompt_id) = prompt_id else {
            return Ok(None);
        };

        let facts: Vec<String> =
            sqlx::query_scalar("SELECT text FROM facts WHERE prompt_id = $1 ORDER BY id")
                .bind(prompt_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(Some(facts))
    }

    async fn insert_extraction(
        &self,
        text: &str,
        context: &str,
        hash: &str,
        facts: &[String],
    ) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        // The UNIQUE constraint on hash resolves the race between two
        // concurrent requests with identical text: the loser gets no row
        // back and reads the winner's facts instead.
        let prompt_id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO prompts (text, context, hash, fact_count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(text)
        .bind(context)
        .bind(hash)
        .bind(facts.len() as i32)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(prompt_id) = prompt_id else {
            drop(tx);
            let existing = self
                .facts_by_hash(hash)
                .await?
                .unwrap_or_default();
            return Ok(InsertOutcome::Existing { facts: existing });
        };

        for fact in facts {
            sqlx::query("INSERT INTO facts (text, context, prompt_id) VALUES ($1, $2, $3)")
                .bind(fact)
                .bind(context)
                .bind(prompt_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted { prompt_id })
    }

    async fn facts_by_context(&self, context: Option<&str>) -> Result<Vec<Fact>> {
        let rows = match context {
            Some(ctx) => {
                sqlx::query_as::<_, Fact>(
                    "SELECT id, text, context, prompt_id, inserted_at, updated_at \
                     FROM facts WHERE context = $1 ORDER BY id",
                )
                .bind(ctx)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Fact>(
                    "SELECT id, text, context, prompt_id, inserted_at, updated_at \
                     FROM facts ORDER BY id",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }
}

// ============ In-memory store (test double) ============

/// In-memory [`FactStore`] for handler tests.
///
/// Uses `Vec`s behind `std::sync::RwLock` for thread safety and counts
/// `insert_extraction` calls so tests can assert cache idempotence.
/// [`MemoryStore::failing`] builds a store whose every operation errors,
/// for exercising the upstream-failure paths.
pub struct MemoryStore {
    prompts: RwLock<Vec<Prompt>>,
    facts: RwLock<Vec<Fact>>,
    insert_calls: AtomicUsize,
    fail: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            prompts: RwLock::new(Vec::new()),
            facts: RwLock::new(Vec::new()),
            insert_calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// A store whose every operation returns an error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Snapshot of all stored prompt rows.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.read().unwrap().clone()
    }

    /// Snapshot of all stored fact rows.
    pub fn facts(&self) -> Vec<Fact> {
        self.facts.read().unwrap().clone()
    }

    /// Number of `insert_extraction` calls issued so far.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FactStore for MemoryStore {
    async fn facts_by_hash(&self, hash: &str) -> Result<Option<Vec<String>>> {
        if self.fail {
            bail!("store unavailable");
        }

        let prompts = self.prompts.read().unwrap();
        let Some(prompt) = prompts.iter().find(|p| p.hash == hash) else {
            return Ok(None);
        };

        let facts = self.facts.read().unwrap();
        Ok(Some(
            facts
                .iter()
                .filter(|f| f.prompt_id == prompt.id)
                .map(|f| f.text.clone())
                .collect(),
        ))
    }

    async fn insert_extraction(
        &self,
        text: &str,
        context: &str,
        hash: &str,
        facts: &[String],
    ) -> Result<InsertOutcome> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("store unavailable");
        }

        let duplicate = {
            let prompts = self.prompts.write().unwrap();
            prompts.iter().any(|p| p.hash == hash)
        };
        if duplicate {
            let existing = self.facts_by_hash(hash).await?.unwrap_or_default();
            return Ok(InsertOutcome::Existing { facts: existing });
        }

        let mut prompts = self.prompts.write().unwrap();

        let now = Utc::now();
        let prompt_id = prompts.len() as i64 + 1;
        prompts.push(Prompt {
            id: prompt_id,
            text: text.to_string(),
            context: context.to_string(),
            hash: hash.to_string(),
            fact_count: facts.len() as i32,
            inserted_at: now,
        });

        let mut stored = self.facts.write().unwrap();
        for fact in facts {
            let id = stored.len() as i64 + 1;
            stored.push(Fact {
                id,
                text: fact.clone(),
                context: context.to_string(),
                prompt_id,
                inserted_at: now,
                updated_at: now,
            });
        }

        Ok(InsertOutcome::Inserted { prompt_id })
    }

    async fn facts_by_context(&self, context: Option<&str>) -> Result<Vec<Fact>> {
        if self.fail {
            bail!("store unavailable");
        }

        let facts = self.facts.read().unwrap();
        Ok(facts
            .iter()
            .filter(|f| context.map_or(true, |ctx| f.context == ctx))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_facts() -> Vec<String> {
        vec!["fact one".to_string(), "fact two".to_string()]
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.facts_by_hash("abc").await.unwrap(), None);

        let outcome = store
            .insert_extraction("some text", "Worm", "abc", &two_facts())
            .await
            .unwrap();
        assert!(matches!(outcome, InsertOutcome::Inserted { prompt_id: 1 }));

        let cached = store.facts_by_hash("abc").await.unwrap().unwrap();
        assert_eq!(cached, two_facts());

        let prompts = store.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].fact_count, 2);
    }

    #[tokio::test]
    async fn test_memory_store_duplicate_hash_returns_existing() {
        let store = MemoryStore::new();
        store
            .insert_extraction("some text", "Worm", "abc", &two_facts())
            .await
            .unwrap();

        let outcome = store
            .insert_extraction("some text", "Worm", "abc", &["other".to_string()])
            .await
            .unwrap();
        match outcome {
            InsertOutcome::Existing { facts } => assert_eq!(facts, two_facts()),
            other => panic!("expected Existing, got {:?}", other),
        }

        // No second prompt row, no extra facts.
        assert_eq!(store.prompts().len(), 1);
        assert_eq!(store.facts().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_context_filter() {
        let store = MemoryStore::new();
        store
            .insert_extraction("t1", "Worm", "h1", &["a".to_string()])
            .await
            .unwrap();
        store
            .insert_extraction("t2", "Ward", "h2", &["b".to_string(), "c".to_string()])
            .await
            .unwrap();

        assert_eq!(store.facts_by_context(Some("Worm")).await.unwrap().len(), 1);
        assert_eq!(store.facts_by_context(Some("Ward")).await.unwrap().len(), 2);
        assert_eq!(store.facts_by_context(Some("none")).await.unwrap().len(), 0);
        // No filter matches all rows.
        assert_eq!(store.facts_by_context(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failing_store_errors() {
        let store = MemoryStore::failing();
        assert!(store.facts_by_hash("h").await.is_err());
        assert!(store.facts_by_context(None).await.is_err());
        assert!(store
            .insert_extraction("t", "c", "h", &[])
            .await
            .is_err());
    }
}
