//! Drive a scope registry from a stream of configuration events.
//!
//! Run with:
//! ```
//! cargo run --example event_stream
//! ```

use dynamic_scopes::{ConfigEvent, ConfigProperties, Scope, ScopeDirectory, ScopeRegistry};
use miette::{Context, IntoDiagnostic};
use std::sync::Arc;
use tokio::sync::mpsc;

fn properties(value: serde_json::Value) -> miette::Result<ConfigProperties> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| miette::miette!("scope properties must be a JSON object"))
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::filter::EnvFilter::new(
                    "event_stream=debug,dynamic_scopes=debug,info",
                )
            }),
        )
        .init();

    let directory = Arc::new(ScopeDirectory::new());
    let registry = Arc::new(ScopeRegistry::new(directory.clone()));

    let (tx, rx) = mpsc::channel(16);
    let worker = tokio::spawn({
        let registry = registry.clone();
        async move { registry.run(rx).await }
    });

    let events = vec![
        ConfigEvent::Create {
            config_id: "pid-1".into(),
            properties: properties(serde_json::json!({
                "scopeName": "content.read",
                "resourcePath": "/content/site",
            }))?,
        },
        ConfigEvent::Create {
            config_id: "pid-2".into(),
            properties: properties(serde_json::json!({
                "scopeName": "content.write",
                "resourcePath": "/content/site",
                "requiredPrivileges": ["jcr:read", "jcr:write"],
            }))?,
        },
        ConfigEvent::Update {
            config_id: "pid-1".into(),
            properties: properties(serde_json::json!({
                "scopeName": "content.read",
                "resourcePath": "/content/site2",
            }))?,
        },
        ConfigEvent::Delete {
            config_id: "pid-2".into(),
        },
    ];

    for event in events {
        tx.send(event)
            .await
            .into_diagnostic()
            .wrap_err("registry stopped consuming events")?;
    }
    drop(tx);
    worker
        .await
        .into_diagnostic()
        .wrap_err("registry event loop panicked")?;

    for (config_id, scope) in directory.scopes() {
        tracing::info!(
            config_id = %config_id,
            name = %scope.name().into_diagnostic()?,
            resource_path = %scope.resource_path(None).into_diagnostic()?,
            privileges = ?scope.privileges().into_diagnostic()?,
            "published scope"
        );
    }

    registry.shutdown();
    Ok(())
}
