//! Utility to inspect the financing schema and print table structures.

use dealer_financing_api::config::validate_database_url;
use dealer_financing_api::db::{missing_tables, REQUIRED_TABLES};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;

/// Main entry point for the schema inspection utility.
///
/// Lists the columns of every table the service requires and reports the
/// ones that are absent, so an unmigrated database is obvious before startup.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("DB_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL or DB_URL must be set"))?;
    validate_database_url(&database_url)?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;

    let missing = missing_tables(&pool).await?;

    println!("Required tables:");
    for table in REQUIRED_TABLES {
        if missing.iter().any(|m| m == table) {
            println!("- {} (MISSING)", table);
            continue;
        }
        println!("- {}", table);

        let columns: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT column_name::text, data_type::text, is_nullable::text \
             FROM information_schema.columns \
             WHERE table_name = $1 AND table_schema = ANY (current_schemas(false)) \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&pool)
        .await?;

        for (col, type_, nullable) in columns {
            let marker = if nullable == "YES" { "" } else { " NOT NULL" };
            println!("  - {}: {}{}", col, type_, marker);
        }
        println!();
    }

    if !missing.is_empty() {
        println!(
            "{} table(s) missing; run the migrate binary before starting the API.",
            missing.len()
        );
    }

    Ok(())
}
