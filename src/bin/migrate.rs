//! Applies the bundled SQL migrations to `DATABASE_URL`.

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("DB_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL or DB_URL must be set"))?;
    dealer_financing_api::config::validate_database_url(&database_url)?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;

    tracing::info!("Applying financing schema migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    let missing = dealer_financing_api::db::missing_tables(&pool).await?;
    if !missing.is_empty() {
        anyhow::bail!("migrations ran but tables are still missing: {:?}", missing);
    }
    tracing::info!("Schema is up to date.");

    Ok(())
}
