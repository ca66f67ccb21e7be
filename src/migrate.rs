use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Create prompts table.
    // hash is UNIQUE: one cached prompt per distinct text, and the
    // check-then-act race between identical submissions resolves at
    // insert time instead of duplicating rows.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prompts (
            id          BIGSERIAL PRIMARY KEY,
            text        TEXT NOT NULL,
            context     TEXT NOT NULL,
            hash        TEXT NOT NULL UNIQUE,
            fact_count  INTEGER NOT NULL,
            inserted_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create facts table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS facts (
            id          BIGSERIAL PRIMARY KEY,
            text        TEXT NOT NULL,
            context     TEXT NOT NULL,
            prompt_id   BIGINT NOT NULL,
            inserted_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            FOREIGN KEY (prompt_id) REFERENCES prompts(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_facts_context ON facts(context)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_facts_prompt_id ON facts(prompt_id)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
