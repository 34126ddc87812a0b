use dynamic_scopes::{ScopeDirectory, ScopeRegistry};
use miette::{Context, IntoDiagnostic, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

mod scopes;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::filter::EnvFilter::new(
                    "scope_server=debug,dynamic_scopes=debug,info",
                )
            }),
        )
        .init();

    let manifest_path = PathBuf::from(
        std::env::var("SCOPE_MANIFEST").unwrap_or_else(|_| "scopes.json".to_string()),
    );
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let issuer =
        std::env::var("ISSUER_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let state = scopes::AppState::new(
        Arc::new(ScopeRegistry::new(Arc::new(ScopeDirectory::new()))),
        manifest_path,
        issuer,
    );

    let report = scopes::reload(&state)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to load {}", state.manifest_path.display()))?;
    for failure in &report.failed {
        tracing::warn!(config_id = %failure.config_id, error = %failure.error, "scope not activated");
    }

    let registry = state.registry.clone();
    let app = scopes::router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .into_diagnostic()
        .wrap_err("failed to bind to address")?;
    tracing::info!("scope server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .into_diagnostic()
        .wrap_err("server error")?;

    let retired = registry.shutdown();
    tracing::info!(retired, "scope registry shut down");
    Ok(())
}
