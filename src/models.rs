//! Core data models for the fact extraction pipeline.
//!
//! These types mirror the two Postgres tables: one `Prompt` row per unique
//! submitted text, owning zero or more `Fact` rows.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A cached submission: one row per unique text, keyed by its SHA-256 hash.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[allow(dead_code)]
pub struct Prompt {
    pub id: i64,
    pub text: String,
    pub context: String,
    pub hash: String,
    pub fact_count: i32,
    pub inserted_at: DateTime<Utc>,
}

/// One extracted factual statement, owned by exactly one [`Prompt`].
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Fact {
    pub id: i64,
    pub text: String,
    pub context: String,
    pub prompt_id: i64,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
