use serde::Deserialize;

const LOGGED_URL_CHARS: usize = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Base URL of the session service that decides admin access.
    pub auth_service_url: String,
    /// Base URL fallback document links are built from.
    pub document_base_url: String,
    /// Admin endpoints include storage diagnostics in error bodies.
    pub expose_error_details: bool,
    /// Zero disables the analytics cache.
    pub analytics_cache_ttl_secs: u64,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| validate_database_url(&url).map(|_| url))?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            auth_service_url: std::env::var("AUTH_SERVICE_URL")
                .map_err(|_| anyhow::anyhow!("AUTH_SERVICE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("AUTH_SERVICE_URL cannot be empty");
                    }
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("AUTH_SERVICE_URL must start with http:// or https://");
                    }
                    Ok(url.trim_end_matches('/').to_string())
                })?,
            document_base_url: normalize_base_url(
                &std::env::var("DOCUMENT_BASE_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "http://localhost:3000/uploads/financing/".to_string()),
            )?,
            expose_error_details: std::env::var("APP_ENV")
                .map(|env| env.eq_ignore_ascii_case("development"))
                .unwrap_or(false),
            analytics_cache_ttl_secs: std::env::var("ANALYTICS_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("ANALYTICS_CACHE_TTL_SECS must be a whole number"))?,
            rate_limit_per_second: std::env::var("RATE_LIMIT_PER_SECOND")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RATE_LIMIT_PER_SECOND must be a whole number"))?,
            rate_limit_burst: std::env::var("RATE_LIMIT_BURST")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RATE_LIMIT_BURST must be a whole number"))?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Database URL: {}...", log_prefix(&config.database_url));
        tracing::debug!("Auth service URL: {}", config.auth_service_url);
        tracing::debug!("Document base URL: {}", config.document_base_url);
        tracing::debug!("Server Port: {}", config.port);
        if config.expose_error_details {
            tracing::warn!("APP_ENV=development: admin errors include storage diagnostics");
        }

        Ok(config)
    }
}

/// Rejects connection strings that cannot reach Postgres before any pool is built.
pub fn validate_database_url(url: &str) -> anyhow::Result<()> {
    if url.trim().is_empty() {
        anyhow::bail!("invalid connection string: DATABASE_URL cannot be empty");
    }
    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
        anyhow::bail!(
            "invalid connection string: DATABASE_URL must start with postgresql:// or postgres://"
        );
    }
    let parsed = url::Url::parse(url)
        .map_err(|e| anyhow::anyhow!("invalid connection string: {}", e))?;
    if parsed.host_str().map_or(true, str::is_empty) {
        anyhow::bail!("invalid connection string: DATABASE_URL has no host");
    }
    Ok(())
}

/// First characters of a connection string, cut on a char boundary.
fn log_prefix(url: &str) -> String {
    url.chars().take(LOGGED_URL_CHARS).collect()
}

fn normalize_base_url(url: &str) -> anyhow::Result<String> {
    let parsed = url::Url::parse(url)
        .map_err(|e| anyhow::anyhow!("DOCUMENT_BASE_URL is not a valid URL: {}", e))?;
    // Url::join replaces the last segment unless the base ends with '/'
    if parsed.path().ends_with('/') {
        Ok(parsed.to_string())
    } else {
        Ok(format!("{}/", parsed))
    }
}
