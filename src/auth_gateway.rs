use crate::errors::AppError;
use axum::http::{header, HeaderMap};
use moka::future::Cache;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

const SESSION_CACHE_TTL: Duration = Duration::from_secs(30);

/// Roles allowed through the admin gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaffRole {
    Admin,
    Manager,
}

impl StaffRole {
    fn parse(role: &str) -> Option<Self> {
        match role.to_ascii_uppercase().as_str() {
            "ADMIN" => Some(StaffRole::Admin),
            "MANAGER" => Some(StaffRole::Manager),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaffSession {
    pub role: StaffRole,
    pub user_id: Option<String>,
}

/// Reply of the session service.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    #[serde(default)]
    pub authenticated: bool,
    pub role: Option<String>,
    pub user_id: Option<String>,
}

impl SessionResponse {
    fn into_staff(self) -> Result<StaffSession, AppError> {
        if !self.authenticated {
            return Err(AppError::Unauthorized("Session not authenticated".to_string()));
        }
        let role = self
            .role
            .as_deref()
            .and_then(StaffRole::parse)
            .ok_or_else(|| {
                AppError::Unauthorized(format!(
                    "Role {:?} may not access financing administration",
                    self.role
                ))
            })?;
        Ok(StaffSession {
            role,
            user_id: self.user_id,
        })
    }
}

/// Client for the external session service that gates admin routes.
///
/// Positive decisions are cached briefly, keyed by a SHA-256 digest of the
/// caller's credential.
#[derive(Clone)]
pub struct SessionGateway {
    client: reqwest::Client,
    base_url: String,
    cache: Cache<String, StaffSession>,
}

impl SessionGateway {
    /// Creates a new `SessionGateway`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the session service.
    pub fn new(base_url: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create session client: {}", e))
            })?;

        let cache = Cache::builder()
            .time_to_live(SESSION_CACHE_TTL)
            .max_capacity(10_000)
            .build();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
        })
    }

    /// Resolves the caller to an ADMIN or MANAGER session, or fails with `Unauthorized`.
    /// Runs before any data access on admin routes.
    pub async fn require_staff(&self, headers: &HeaderMap) -> Result<StaffSession, AppError> {
        let credential = Credential::from_headers(headers).ok_or_else(|| {
            AppError::Unauthorized("Missing Authorization header or session cookie".to_string())
        })?;

        let key = credential.digest();
        if let Some(session) = self.cache.get(&key).await {
            tracing::debug!("Session cache hit");
            return Ok(session);
        }

        let session = self.fetch_session(&credential).await?.into_staff()?;
        self.cache.insert(key, session.clone()).await;
        Ok(session)
    }

    async fn fetch_session(&self, credential: &Credential) -> Result<SessionResponse, AppError> {
        let url = format!("{}/api/session", self.base_url);
        tracing::debug!("Checking session at {}", url);

        let request = match credential {
            Credential::Authorization(value) => {
                self.client.get(&url).header(header::AUTHORIZATION, value)
            }
            Credential::Cookie(value) => self.client.get(&url).header(header::COOKIE, value),
        };

        let response = request
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Session request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AppError::Unauthorized(format!(
                "Session service returned {}",
                status
            )));
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Session service returned {}: {}",
                status, error_text
            )));
        }

        response.json::<SessionResponse>().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse session response: {}", e))
        })
    }
}

enum Credential {
    Authorization(String),
    Cookie(String),
}

impl Credential {
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        read(header::AUTHORIZATION)
            .map(Credential::Authorization)
            .or_else(|| read(header::COOKIE).map(Credential::Cookie))
    }

    fn digest(&self) -> String {
        let (kind, value) = match self {
            Credential::Authorization(v) => ("authorization", v),
            Credential::Cookie(v) => ("cookie", v),
        };
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn only_admin_and_manager_pass() {
        let session = |role: &str| SessionResponse {
            authenticated: true,
            role: Some(role.to_string()),
            user_id: None,
        };
        assert_eq!(session("ADMIN").into_staff().unwrap().role, StaffRole::Admin);
        assert_eq!(session("manager").into_staff().unwrap().role, StaffRole::Manager);
        assert!(session("EMPLOYEE").into_staff().is_err());
        assert!(session("CUSTOMER").into_staff().is_err());
    }

    #[test]
    fn unauthenticated_session_rejected() {
        let session = SessionResponse {
            authenticated: false,
            role: Some("ADMIN".to_string()),
            user_id: None,
        };
        assert!(matches!(session.into_staff(), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn credential_digest_is_hex_sha256() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        let digest = Credential::from_headers(&headers).unwrap().digest();
        assert_eq!(digest.len(), 64);
        assert!(!digest.contains("abc"));
    }

    #[test]
    fn authorization_preferred_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session=1"));
        assert!(matches!(
            Credential::from_headers(&headers),
            Some(Credential::Cookie(_))
        ));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        assert!(matches!(
            Credential::from_headers(&headers),
            Some(Credential::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_network() {
        let gateway = SessionGateway::new("http://127.0.0.1:9".to_string()).unwrap();
        let result = gateway.require_staff(&HeaderMap::new()).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }
}
