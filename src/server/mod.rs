//! HTTP surface: axum router, shared state, error mapping
//!
//! Every endpoint serves either a complete JSON body or one error; partial
//! rows never leave the process. Each view owns a TTL cache keyed by audit
//! target; `refresh=true` bypasses and overwrites the cached value.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use crate::audit::aggregate::{MappingRow, PrincipalReport};
use crate::audit::views::{GroupRow, SubjectRow};
use crate::audit::{self, resolve_params};
use crate::cache::MemoryCache;
use crate::cilium::{collect_cilium_policies, CiliumPolicyRow};
use crate::error::{Error, Result};
use crate::providers::{CloudIdentityApi, ClusterRbacApi};

/// Cache key for the views that audit the local cluster context only.
const LOCAL_SCOPE: &str = "local";

/// Shared handler state; everything is injected from bootstrap.
#[derive(Clone)]
pub struct AppState {
    pub cluster_api: Arc<dyn ClusterRbacApi>,
    pub cloud_api: Arc<dyn CloudIdentityApi>,
    pub table_cache: Arc<MemoryCache<Vec<SubjectRow>>>,
    pub group_cache: Arc<MemoryCache<Vec<GroupRow>>>,
    pub cilium_cache: Arc<MemoryCache<Vec<CiliumPolicyRow>>>,
    pub map_cache: Arc<MemoryCache<Vec<MappingRow>>>,
    pub report_cache: Arc<MemoryCache<Vec<PrincipalReport>>>,
}

impl AppState {
    pub fn new(
        cluster_api: Arc<dyn ClusterRbacApi>,
        cloud_api: Arc<dyn CloudIdentityApi>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cluster_api,
            cloud_api,
            table_cache: Arc::new(MemoryCache::new(cache_ttl)),
            group_cache: Arc::new(MemoryCache::new(cache_ttl)),
            cilium_cache: Arc::new(MemoryCache::new(cache_ttl)),
            map_cache: Arc::new(MemoryCache::new(cache_ttl)),
            report_cache: Arc::new(MemoryCache::new(cache_ttl)),
        }
    }
}

/// Query parameters shared by the audit endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub cluster: Option<String>,
    pub region: Option<String>,
    #[serde(default)]
    pub refresh: bool,
}

/// Error wrapper mapping the audit taxonomy to HTTP statuses.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(error = %self.0, status = %status, "request failed");
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/table", get(get_table))
        .route("/api/groups", get(get_groups))
        .route("/api/cilium", get(get_cilium))
        .route("/api/iam-map", get(get_iam_map))
        .route("/api/iam", get(get_iam))
        .with_state(state)
}

/// Bind and serve until the listener fails.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "kube-guard API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_table(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<SubjectRow>>, ApiError> {
    if !query.refresh {
        if let Some(rows) = state.table_cache.get(LOCAL_SCOPE).await {
            return Ok(Json(rows));
        }
    }
    let rows = audit::views::collect_subject_rows(state.cluster_api.as_ref()).await?;
    state.table_cache.insert(LOCAL_SCOPE, rows.clone()).await;
    Ok(Json(rows))
}

async fn get_groups(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<GroupRow>>, ApiError> {
    if !query.refresh {
        if let Some(rows) = state.group_cache.get(LOCAL_SCOPE).await {
            return Ok(Json(rows));
        }
    }
    let rows = audit::views::collect_group_rows(state.cluster_api.as_ref()).await?;
    state.group_cache.insert(LOCAL_SCOPE, rows.clone()).await;
    Ok(Json(rows))
}

async fn get_cilium(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<CiliumPolicyRow>> {
    if !query.refresh {
        if let Some(rows) = state.cilium_cache.get(LOCAL_SCOPE).await {
            return Json(rows);
        }
    }
    let rows = collect_cilium_policies(state.cluster_api.as_ref()).await;
    state.cilium_cache.insert(LOCAL_SCOPE, rows.clone()).await;
    Json(rows)
}

async fn get_iam_map(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<MappingRow>>, ApiError> {
    let params = resolve_params(query.cluster.as_deref(), query.region.as_deref())?;
    let key = format!("{}|{}", params.cluster, params.region);

    if !query.refresh {
        if let Some(rows) = state.map_cache.get(&key).await {
            return Ok(Json(rows));
        }
    }
    let rows = audit::build_iam_rbac_map(
        state.cluster_api.as_ref(),
        state.cloud_api.as_ref(),
        &params,
    )
    .await?;
    state.map_cache.insert(key, rows.clone()).await;
    Ok(Json(rows))
}

async fn get_iam(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<PrincipalReport>>, ApiError> {
    let params = resolve_params(query.cluster.as_deref(), query.region.as_deref())?;
    let key = format!("{}|{}", params.cluster, params.region);

    if !query.refresh {
        if let Some(rows) = state.report_cache.get(&key).await {
            return Ok(Json(rows));
        }
    }
    let rows = audit::build_principal_reports(
        state.cluster_api.as_ref(),
        state.cloud_api.as_ref(),
        &params,
    )
    .await?;
    state.report_cache.insert(key, rows.clone()).await;
    Ok(Json(rows))
}
