use sqlx::{postgres::PgPoolOptions, PgPool};

/// Tables the service cannot run without.
pub const REQUIRED_TABLES: [&str; 6] = [
    "customers",
    "cars",
    "sales",
    "financing_applications",
    "financing_application_details",
    "financing_documents",
];

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Connects and refuses to start unless every required table exists.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        crate::config::validate_database_url(database_url)?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| anyhow::anyhow!("database unreachable: {}", e))?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        let missing = missing_tables(&pool).await?;
        if !missing.is_empty() {
            anyhow::bail!(
                "database schema is not migrated; missing tables: {} (run the migrate binary)",
                missing.join(", ")
            );
        }

        Ok(Self { pool })
    }
}

/// Required tables absent from the current schema search path.
pub async fn missing_tables(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let present: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT table_name::text
        FROM information_schema.tables
        WHERE table_schema = ANY (current_schemas(false))
          AND table_name = ANY ($1)
        "#,
    )
    .bind(&REQUIRED_TABLES[..])
    .fetch_all(pool)
    .await?;

    Ok(REQUIRED_TABLES
        .iter()
        .filter(|table| !present.iter().any(|p| p == *table))
        .map(|table| table.to_string())
        .collect())
}
