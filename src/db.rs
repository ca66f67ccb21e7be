use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db.url)
        .await?;

    Ok(pool)
}
