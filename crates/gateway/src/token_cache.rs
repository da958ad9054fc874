use crate::error::GatewayError;
use crate::tenant::{Tenant, TenantConfig, TENANTS};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// A token within this margin of its nominal expiry is treated as expired so
/// it cannot die mid-flight.
pub const EXPIRY_SAFETY_MARGIN_MS: u64 = 60_000;

const DEFAULT_EXPIRES_IN_SECS: u64 = 3_600;

/// On-disk shape of a persisted bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub access_token: String,
    /// Absolute expiry, milliseconds since the Unix epoch.
    pub expiry: u64,
    /// Owning tenant id.
    pub environment: String,
}

impl TokenRecord {
    pub fn is_usable_at(&self, now_ms: u64) -> bool {
        now_ms < self.expiry.saturating_sub(EXPIRY_SAFETY_MARGIN_MS)
    }
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

struct TenantSlot {
    token: RwLock<Option<TokenRecord>>,
    /// Serializes token acquisition: at most one grant in flight per tenant.
    refresh: tokio::sync::Mutex<()>,
}

/// Per-tenant bearer token cache backed by per-tenant files.
///
/// Reads are lock-free-ish (shared `RwLock` read); refresh holds the
/// per-tenant async mutex so concurrent callers wait and re-read instead of
/// issuing duplicate grants.
pub struct TokenCache {
    http: reqwest::Client,
    dir: PathBuf,
    slots: HashMap<Tenant, TenantSlot>,
}

impl TokenCache {
    pub fn new(http: reqwest::Client, dir: PathBuf) -> Self {
        let slots = TENANTS
            .into_iter()
            .map(|t| {
                (
                    t,
                    TenantSlot {
                        token: RwLock::new(None),
                        refresh: tokio::sync::Mutex::new(()),
                    },
                )
            })
            .collect();
        Self { http, dir, slots }
    }

    /// Stable location of one tenant's persisted token record.
    pub fn record_path(&self, tenant: Tenant) -> PathBuf {
        self.dir.join(format!("token-cache-{tenant}.json"))
    }

    /// Stored token for `tenant`, if still inside the safety margin.
    pub fn get(&self, tenant: Tenant) -> Option<String> {
        let slot = &self.slots[&tenant];
        let guard = slot.token.read();
        match guard.as_ref() {
            Some(rec) if rec.is_usable_at(now_ms()) => Some(rec.access_token.clone()),
            _ => None,
        }
    }

    /// Store a token with a computed absolute expiry and persist it.
    pub fn put(&self, tenant: Tenant, access_token: String, expires_in_secs: u64) {
        let record = TokenRecord {
            access_token,
            expiry: now_ms() + expires_in_secs * 1_000,
            environment: tenant.to_string(),
        };
        self.persist(tenant, &record);
        *self.slots[&tenant].token.write() = Some(record);
    }

    /// Remove both the in-memory and on-disk records.
    pub fn evict(&self, tenant: Tenant) {
        *self.slots[&tenant].token.write() = None;
        let path = self.record_path(tenant);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(tenant = %tenant, error = %e, "failed to remove token record");
            }
        }
    }

    /// Startup/shutdown hygiene: no tenant keeps a stale bearer across
    /// configuration changes.
    pub fn evict_all(&self) {
        for tenant in TENANTS {
            self.evict(tenant);
        }
    }

    /// Cached token, or a fresh one from the tenant's token endpoint.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailure` when the token endpoint answers non-2xx or
    /// with an unusable body; `Transport` when the exchange never completes.
    pub async fn bearer(
        &self,
        tenant: Tenant,
        config: &TenantConfig,
    ) -> Result<String, GatewayError> {
        if let Some(token) = self.get(tenant) {
            return Ok(token);
        }

        let slot = &self.slots[&tenant];
        let _refresh = slot.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.get(tenant) {
            return Ok(token);
        }

        let record = self.acquire(tenant, config).await?;
        tracing::info!(
            tenant = %tenant,
            expiry_ms = record.expiry,
            "acquired bearer token"
        );
        let token = record.access_token.clone();
        self.persist(tenant, &record);
        *slot.token.write() = Some(record);
        Ok(token)
    }

    async fn acquire(
        &self,
        tenant: Tenant,
        config: &TenantConfig,
    ) -> Result<TokenRecord, GatewayError> {
        let mut form = vec![("grant_type", "client_credentials")];
        if !config.scope.is_empty() {
            form.push(("scope", config.scope.as_str()));
        }

        let resp = self
            .http
            .post(&config.token_url)
            .basic_auth(&config.client_id, Some(&config.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(&e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::from_reqwest(&e))?;
        if !status.is_success() {
            return Err(GatewayError::AuthenticationFailure {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenEndpointResponse =
            serde_json::from_str(&body).map_err(|_| GatewayError::AuthenticationFailure {
                status: status.as_u16(),
                body: "token endpoint returned a non-JSON body".to_string(),
            })?;
        let access_token = parsed.access_token.filter(|t| !t.is_empty()).ok_or(
            GatewayError::AuthenticationFailure {
                status: status.as_u16(),
                body: "token endpoint response missing access_token".to_string(),
            },
        )?;
        let expires_in = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        Ok(TokenRecord {
            access_token,
            expiry: now_ms() + expires_in * 1_000,
            environment: tenant.to_string(),
        })
    }

    /// Atomic write: temp file then rename, so a crash never leaves a
    /// truncated record.
    fn persist(&self, tenant: Tenant, record: &TokenRecord) {
        let path = self.record_path(tenant);
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(&self.dir)?;
            let tmp = path.with_extension("json.tmp");
            let body = serde_json::to_vec_pretty(record)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(&tmp, body)?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        };
        if let Err(e) = write() {
            tracing::warn!(tenant = %tenant, error = %e, "failed to persist token record");
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn cache_in(dir: &std::path::Path) -> TokenCache {
        TokenCache::new(reqwest::Client::new(), dir.to_path_buf())
    }

    #[test]
    fn token_is_unusable_inside_the_safety_margin() {
        let rec = TokenRecord {
            access_token: "t".to_string(),
            expiry: 1_000_000,
            environment: "dev".to_string(),
        };
        assert!(rec.is_usable_at(1_000_000 - EXPIRY_SAFETY_MARGIN_MS - 1));
        assert!(!rec.is_usable_at(1_000_000 - EXPIRY_SAFETY_MARGIN_MS));
        assert!(!rec.is_usable_at(1_000_000));
    }

    #[test]
    fn put_get_evict_round_trip_with_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache_in(dir.path());

        cache.put(Tenant::Dev, "abc".to_string(), 600);
        assert_eq!(cache.get(Tenant::Dev), Some("abc".to_string()));

        let path = cache.record_path(Tenant::Dev);
        assert!(path.exists());
        let body = std::fs::read_to_string(&path).expect("read record");
        let rec: TokenRecord = serde_json::from_str(&body).expect("record json");
        assert_eq!(rec.access_token, "abc");
        assert_eq!(rec.environment, "dev");

        cache.evict(Tenant::Dev);
        assert_eq!(cache.get(Tenant::Dev), None);
        assert!(!path.exists());
    }

    #[test]
    fn short_lived_token_is_never_served() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache_in(dir.path());
        // 30s lifetime sits entirely inside the 60s margin.
        cache.put(Tenant::Qa3, "short".to_string(), 30);
        assert_eq!(cache.get(Tenant::Qa3), None);
    }

    #[tokio::test]
    async fn bearer_hits_the_token_endpoint_once_and_caches() {
        let hits = Arc::new(AtomicUsize::new(0));
        let endpoint_hits = hits.clone();
        let app = Router::new().route(
            "/token",
            post(move || {
                let hits = endpoint_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(serde_json::json!({
                        "access_token": "issued-token",
                        "expires_in": 3600,
                        "token_type": "Bearer"
                    }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache_in(dir.path());
        let config = TenantConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            token_url: format!("http://{addr}/token"),
            ..TenantConfig::default()
        };

        let first = cache.bearer(Tenant::Dev, &config).await.expect("token");
        let second = cache.bearer(Tenant::Dev, &config).await.expect("token");
        assert_eq!(first, "issued-token");
        assert_eq!(second, "issued-token");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_grant_carries_status_and_body() {
        let app = Router::new().route(
            "/token",
            post(|| async {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    "invalid_client".to_string(),
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache_in(dir.path());
        let config = TenantConfig {
            client_id: "id".to_string(),
            client_secret: "bad".to_string(),
            token_url: format!("http://{addr}/token"),
            ..TenantConfig::default()
        };

        let err = cache.bearer(Tenant::Dev, &config).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Authentication failed (401): invalid_client"
        );
    }
}
