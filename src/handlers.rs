use crate::analytics::{load_analytics, FinancingAnalytics};
use crate::application_view::{shape_application, AdminApplicationView};
use crate::auth_gateway::SessionGateway;
use crate::config::Config;
use crate::errors::AppError;
use crate::financing_storage::FinancingStorage;
use crate::models::{
    ApplicationListQuery, ApplicationListResponse, ApplicationStatus, FinancingApplication,
    StatusDecisionRequest, SubmissionResponse,
};
use crate::validation::{validate_submission, ValidationIssue};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use moka::future::Cache;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const ANALYTICS_CACHE_KEY: &str = "financing-analytics";
const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
    /// Financing application persistence.
    pub storage: FinancingStorage,
    /// Admin gate backed by the external session service.
    pub sessions: SessionGateway,
    /// Parsed `DOCUMENT_BASE_URL`.
    pub document_base: Url,
    /// Last computed analytics, when caching is enabled.
    pub analytics_cache: Option<AnalyticsCache>,
}

/// Analytics cache that refuses fills computed before the latest invalidation.
///
/// Every write path bumps the generation. A load records the generation it
/// started under and its result is only kept while that generation is current.
#[derive(Clone)]
pub struct AnalyticsCache {
    entries: Cache<&'static str, FinancingAnalytics>,
    generation: Arc<AtomicU64>,
}

impl AnalyticsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder().time_to_live(ttl).max_capacity(1).build(),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self) -> Option<FinancingAnalytics> {
        self.entries.get(ANALYTICS_CACHE_KEY).await
    }

    /// Token to pass to [`AnalyticsCache::store_if_current`] once the load finishes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.invalidate(ANALYTICS_CACHE_KEY).await;
    }

    /// Stores `analytics` unless an invalidation happened since `generation` was taken.
    pub async fn store_if_current(&self, generation: u64, analytics: FinancingAnalytics) -> bool {
        if self.generation() != generation {
            return false;
        }
        self.entries.insert(ANALYTICS_CACHE_KEY, analytics).await;
        // an invalidation may have landed between the check and the insert
        if self.generation() != generation {
            self.entries.invalidate(ANALYTICS_CACHE_KEY).await;
            return false;
        }
        true
    }
}

impl AppState {
    pub fn new(db: PgPool, config: Config) -> Result<Self, AppError> {
        let sessions = SessionGateway::new(config.auth_service_url.clone())?;
        let document_base = Url::parse(&config.document_base_url).map_err(|e| {
            AppError::InternalError(format!("Invalid DOCUMENT_BASE_URL: {}", e))
        })?;
        let analytics_cache = (config.analytics_cache_ttl_secs > 0)
            .then(|| AnalyticsCache::new(Duration::from_secs(config.analytics_cache_ttl_secs)));

        Ok(Self {
            storage: FinancingStorage::new(db.clone()),
            db,
            config,
            sessions,
            document_base,
            analytics_cache,
        })
    }
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "dealer-financing-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness probe: the database answers and every required table exists.
pub async fn readiness(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    match crate::db::missing_tables(&state.db).await {
        Ok(missing) if missing.is_empty() => {
            (StatusCode::OK, Json(json!({ "status": "ready" })))
        }
        Ok(missing) => {
            tracing::error!("Schema not ready, missing tables: {:?}", missing);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "schema_not_ready", "missingTables": missing })),
            )
        }
        Err(e) => {
            let failure = crate::errors::StorageFailure::classify(&e);
            tracing::error!(kind = ?failure, "Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "code": failure.code() })),
            )
        }
    }
}

/// POST /api/financing
///
/// Public financing form submission. Validation runs before any storage call;
/// the customer, application, and detail rows are then written together.
///
/// # Returns
///
/// * `201` with `{ id, status: "PENDING" }`, `400` with the issue list, or a
///   storage failure (`500`/`503`) with a generic message.
pub async fn submit_financing_application(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmissionResponse>), AppError> {
    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        AppError::Validation(vec![ValidationIssue::new(
            "",
            format!("Malformed JSON body: {}", e),
        )])
    })?;

    let submission = validate_submission(&payload).map_err(AppError::Validation)?;

    let stored = state.storage.submit(&submission).await?;

    if let Some(cache) = &state.analytics_cache {
        cache.invalidate().await;
    }

    Ok((
        StatusCode::CREATED,
        Json(SubmissionResponse {
            id: stored.application_id,
            status: ApplicationStatus::Pending,
        }),
    ))
}

/// GET /api/admin/financing
///
/// Paged list of applications for staff, newest first, optionally filtered by status.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `headers` - Request headers carrying the staff session credential.
/// * `query` - `status` filter (case-insensitive), `page` (from 1), and `pageSize` (1-100).
///
/// # Returns
///
/// * `Result<Json<ApplicationListResponse>, AppError>` - One page of summaries plus the
///   total count, `400` for an unknown status, or `401`/`502` from the session gate.
pub async fn list_applications(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ApplicationListQuery>,
) -> Result<Json<ApplicationListResponse>, AppError> {
    state.sessions.require_staff(&headers).await?;

    let status = query
        .status
        .as_deref()
        .map(parse_status_filter)
        .transpose()?;
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = i64::from(page - 1) * i64::from(page_size);

    let (items, total) = state
        .storage
        .list_applications(status, i64::from(page_size), offset)
        .await
        .map_err(|e| e.verbose(state.config.expose_error_details))?;

    Ok(Json(ApplicationListResponse {
        items,
        page,
        page_size,
        total,
    }))
}

/// GET /api/admin/financing/:id
///
/// Full admin view of one application with detail, vehicle, and documents merged.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `headers` - Request headers carrying the staff session credential.
/// * `id` - The application id, a positive integer.
///
/// # Returns
///
/// * `Result<Json<AdminApplicationView>, AppError>` - The shaped application, `400` for a
///   malformed id, or `404` when no application has that id.
pub async fn get_application(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<AdminApplicationView>, AppError> {
    state.sessions.require_staff(&headers).await?;
    let id = parse_application_id(&id)?;

    let record = state
        .storage
        .load_admin_record(id)
        .await
        .map_err(|e| e.verbose(state.config.expose_error_details))?
        .ok_or_else(|| AppError::NotFound(format!("Financing application {} not found", id)))?;

    Ok(Json(shape_application(
        record,
        &state.document_base,
        Utc::now(),
    )))
}

/// DELETE /api/admin/financing/:id
///
/// Removes documents and detail before the application itself.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `headers` - Request headers carrying the staff session credential.
/// * `id` - The application id, a positive integer.
///
/// # Returns
///
/// * `Result<Json<Value>, AppError>` - `{ success: true, id }`, or `404` when nothing was
///   deleted.
pub async fn delete_application(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.sessions.require_staff(&headers).await?;
    let id = parse_application_id(&id)?;

    let deleted = state
        .storage
        .delete_application(id)
        .await
        .map_err(|e| e.verbose(state.config.expose_error_details))?;

    if !deleted {
        return Err(AppError::NotFound(format!(
            "Financing application {} not found",
            id
        )));
    }

    if let Some(cache) = &state.analytics_cache {
        cache.invalidate().await;
    }

    Ok(Json(json!({ "success": true, "id": id })))
}

/// PATCH /api/admin/financing/:id/status
///
/// Records the terminal decision for a PENDING application.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `headers` - Request headers carrying the staff session credential.
/// * `id` - The application id, a positive integer.
/// * `body` - JSON `{ "status": "APPROVED" | "REJECTED" }`.
///
/// # Returns
///
/// * `Result<Json<FinancingApplication>, AppError>` - The updated application with its
///   approval date, `400` for any other status, `404` for an unknown id, or `409` when
///   the application was already decided.
pub async fn decide_application(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<FinancingApplication>, AppError> {
    let session = state.sessions.require_staff(&headers).await?;
    let id = parse_application_id(&id)?;

    let request: StatusDecisionRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid decision body: {}", e)))?;
    let decision = match ApplicationStatus::try_from(request.status) {
        Ok(status) if status.is_terminal() => status,
        _ => {
            return Err(AppError::BadRequest(
                "Status must be APPROVED or REJECTED".to_string(),
            ))
        }
    };

    let application = state
        .storage
        .decide(id, decision)
        .await
        .map_err(|e| match e {
            AppError::NotFound(_) | AppError::Conflict(_) | AppError::BadRequest(_) => e,
            other => other.verbose(state.config.expose_error_details),
        })?;

    tracing::info!(
        application_id = id,
        decided_by = ?session.user_id,
        role = ?session.role,
        "Decision recorded"
    );

    if let Some(cache) = &state.analytics_cache {
        cache.invalidate().await;
    }

    Ok(Json(application))
}

/// GET /api/admin/financing/analytics
///
/// Trailing six-month rollups. Served from the short-lived cache when enabled.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `headers` - Request headers carrying the staff session credential.
///
/// # Returns
///
/// * `Result<Json<FinancingAnalytics>, AppError>` - Monthly counts, histograms, approval
///   timeline, and summary, or a storage failure.
pub async fn financing_analytics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<FinancingAnalytics>, AppError> {
    state.sessions.require_staff(&headers).await?;

    let generation = match &state.analytics_cache {
        Some(cache) => {
            if let Some(cached) = cache.get().await {
                tracing::debug!("Analytics cache hit");
                return Ok(Json(cached));
            }
            Some(cache.generation())
        }
        None => None,
    };

    let analytics = load_analytics(&state.storage, Utc::now())
        .await
        .map_err(|e| e.verbose(state.config.expose_error_details))?;

    if let (Some(cache), Some(generation)) = (&state.analytics_cache, generation) {
        if !cache.store_if_current(generation, analytics.clone()).await {
            tracing::debug!("Analytics changed during load, result not cached");
        }
    }

    Ok(Json(analytics))
}

/// Application ids are positive integers.
pub fn parse_application_id(raw: &str) -> Result<i32, AppError> {
    raw.trim()
        .parse::<i32>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid application id '{}'", raw)))
}

fn parse_status_filter(raw: &str) -> Result<ApplicationStatus, AppError> {
    ApplicationStatus::try_from(raw.trim().to_ascii_uppercase())
        .map_err(AppError::BadRequest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_id_must_be_positive_integer() {
        assert_eq!(parse_application_id("42").unwrap(), 42);
        assert!(parse_application_id("0").is_err());
        assert!(parse_application_id("-3").is_err());
        assert!(parse_application_id("abc").is_err());
        assert!(parse_application_id("4.2").is_err());
    }

    fn sample_analytics() -> FinancingAnalytics {
        crate::analytics::compute_analytics(&[], Utc::now())
    }

    #[tokio::test]
    async fn analytics_cache_keeps_fill_without_writes() {
        let cache = AnalyticsCache::new(Duration::from_secs(60));
        let generation = cache.generation();
        assert!(cache.store_if_current(generation, sample_analytics()).await);
        assert!(cache.get().await.is_some());
    }

    #[tokio::test]
    async fn analytics_cache_drops_fill_started_before_invalidation() {
        let cache = AnalyticsCache::new(Duration::from_secs(60));
        let generation = cache.generation();

        // a submission lands while the slow aggregate is still running
        cache.invalidate().await;

        assert!(!cache.store_if_current(generation, sample_analytics()).await);
        assert!(cache.get().await.is_none());

        let fresh = cache.generation();
        assert_ne!(fresh, generation);
        assert!(cache.store_if_current(fresh, sample_analytics()).await);
        assert!(cache.get().await.is_some());
    }

    #[test]
    fn status_filter_is_case_insensitive() {
        assert_eq!(
            parse_status_filter("approved").unwrap(),
            ApplicationStatus::Approved
        );
        assert!(parse_status_filter("archived").is_err());
    }
}
