use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use dynamic_scopes::{
    Manifest, ReconcileReport, Scope, ScopeDetails, ScopeDirectory, ScopeRegistry,
};
use serde::Serialize;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ScopeRegistry<ScopeDirectory>>,
    pub manifest_path: PathBuf,
    pub issuer: String,
    /// Held across manifest load and reconcile so reloads apply in order
    reload_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        registry: Arc<ScopeRegistry<ScopeDirectory>>,
        manifest_path: PathBuf,
        issuer: String,
    ) -> Self {
        Self {
            registry,
            manifest_path,
            issuer,
            reload_lock: Arc::new(Mutex::new(())),
        }
    }

    fn directory(&self) -> &ScopeDirectory {
        self.registry.server()
    }
}

/// Head of the incoming request, handed to `Scope::details`.
pub struct RequestHead(pub Parts);

impl<S> FromRequestParts<S> for RequestHead
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let head = parts.clone();
        async move { Ok(RequestHead(head)) }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeView {
    pub config_id: String,
    #[serde(flatten)]
    pub details: ScopeDetails,
}

impl ScopeView {
    fn new(config_id: String, scope: &dyn Scope, request: &Parts) -> dynamic_scopes::Result<Self> {
        Ok(Self {
            config_id,
            details: scope.details(None, Some(request))?,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(handle_metadata),
        )
        .route("/oauth/scopes", get(handle_list_scopes))
        .route("/oauth/scopes/{name}", get(handle_get_scope))
        .route("/admin/reload", post(handle_reload))
        .with_state(state)
}

/// Authorization server metadata advertising the configured scopes
async fn handle_metadata(State(state): State<AppState>) -> Json<serde_json::Value> {
    let issuer = state.issuer.trim_end_matches('/');

    Json(serde_json::json!({
        "issuer": issuer,
        "token_endpoint": format!("{}{}", issuer, dynamic_scopes::TOKEN_ENDPOINT),
        "scopes_supported": state.directory().scope_names(),
    }))
}

fn views(state: &AppState, request: &Parts) -> Vec<ScopeView> {
    // Scopes retired mid-request fail their queries and are skipped.
    state
        .directory()
        .scopes()
        .into_iter()
        .filter_map(|(config_id, scope)| ScopeView::new(config_id, scope.as_ref(), request).ok())
        .collect()
}

async fn handle_list_scopes(
    State(state): State<AppState>,
    RequestHead(request): RequestHead,
) -> Json<Vec<ScopeView>> {
    Json(views(&state, &request))
}

async fn handle_get_scope(
    State(state): State<AppState>,
    Path(name): Path<String>,
    RequestHead(request): RequestHead,
) -> Result<Json<ScopeView>, StatusCode> {
    views(&state, &request)
        .into_iter()
        .find(|view| view.details.name == name)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Re-read the manifest and reconcile the registry against it
async fn handle_reload(State(state): State<AppState>) -> Response {
    match reload(&state).await {
        Ok(report) => {
            let status = if report.is_clean() {
                StatusCode::OK
            } else {
                StatusCode::MULTI_STATUS
            };
            (status, Json(report)).into_response()
        }
        Err(e) => {
            tracing::error!(path = %state.manifest_path.display(), error = %e, "manifest reload failed");
            e.into_response()
        }
    }
}

pub async fn reload(state: &AppState) -> dynamic_scopes::Result<ReconcileReport> {
    let _guard = state.reload_lock.lock().await;
    let manifest = Manifest::load(&state.manifest_path).await?;
    Ok(state.registry.reconcile(&manifest.scopes))
}
