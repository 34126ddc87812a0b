//! Factory registry keeping one live scope per configuration.
//!
//! The registry consumes create/update/delete events from the configuration
//! source and keeps the set of scopes registered with the authorization
//! server equal to the set of configuration ids with a live record, each
//! holding the most recently delivered record for its id.

use crate::config::{ConfigProperties, ScopeConfig};
use crate::error::{Error, Result};
use crate::host::{AuthorizationServer, ServiceRegistration};
use crate::scope::DynamicScope;
use crate::source::{ConfigEvent, ConfigId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// What to do when an update delivers an invalid record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidUpdatePolicy {
    /// Keep serving the previous record
    #[default]
    RetainPrevious,
    /// Retire and unregister the scope
    Withdraw,
}

#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    pub invalid_update: InvalidUpdatePolicy,
}

/// Outcome of applying a full configuration snapshot
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub created: Vec<ConfigId>,
    pub updated: Vec<ConfigId>,
    pub unchanged: Vec<ConfigId>,
    pub removed: Vec<ConfigId>,
    pub failed: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileFailure {
    pub config_id: ConfigId,
    #[serde(serialize_with = "serialize_display")]
    pub error: Error,
}

fn serialize_display<S>(error: &Error, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(error)
}

struct ScopeEntry<A: AuthorizationServer + ?Sized> {
    scope: Arc<DynamicScope>,
    registration: ServiceRegistration<A>,
}

/// Lifecycle manager for [`DynamicScope`]s.
///
/// Every instance is owned by the registry; its registration with the
/// authorization server is released on every removal path, including
/// [`ScopeRegistry::shutdown`] and dropping the registry.
pub struct ScopeRegistry<A: AuthorizationServer + ?Sized> {
    server: Arc<A>,
    entries: DashMap<ConfigId, ScopeEntry<A>>,
    options: RegistryOptions,
}

impl<A: AuthorizationServer + ?Sized> ScopeRegistry<A> {
    pub fn new(server: Arc<A>) -> Self {
        Self::with_options(server, RegistryOptions::default())
    }

    pub fn with_options(server: Arc<A>, options: RegistryOptions) -> Self {
        Self {
            server,
            entries: DashMap::new(),
            options,
        }
    }

    pub fn server(&self) -> &Arc<A> {
        &self.server
    }

    /// Construct, activate and register a scope for a new configuration.
    pub fn on_create(
        &self,
        config_id: impl Into<ConfigId>,
        config: ScopeConfig,
    ) -> Result<Arc<DynamicScope>> {
        let config_id = config_id.into();
        let result = match self.entries.entry(config_id.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateConfig(config_id.clone())),
            Entry::Vacant(vacant) => {
                let scope = Arc::new(DynamicScope::new(config_id.clone()));
                scope.activate(config)?;
                match ServiceRegistration::register(
                    self.server.clone(),
                    config_id.clone(),
                    scope.clone(),
                ) {
                    Ok(registration) => {
                        vacant.insert(ScopeEntry {
                            scope: scope.clone(),
                            registration,
                        });
                        Ok(scope)
                    }
                    Err(e) => {
                        scope.deactivate();
                        Err(e)
                    }
                }
            }
        };
        log_failure("create", &config_id, result)
    }

    /// Replace the record of an existing scope.
    pub fn on_update(&self, config_id: &str, config: ScopeConfig) -> Result<()> {
        let result = self
            .scope(config_id)
            .ok_or_else(|| Error::UnknownConfig(config_id.to_string()))
            .and_then(|scope| scope.modify(config));
        log_failure("update", config_id, result)
    }

    /// Retire a scope and withdraw it from the authorization server.
    pub fn on_delete(&self, config_id: &str) -> Result<()> {
        let result = match self.entries.remove(config_id) {
            Some((_, entry)) => retire(entry),
            None => Err(Error::UnknownConfig(config_id.to_string())),
        };
        log_failure("delete", config_id, result)
    }

    /// Apply one event from the configuration source.
    pub fn apply(&self, event: ConfigEvent) -> Result<()> {
        match event {
            ConfigEvent::Create {
                config_id,
                properties,
            } => {
                let config = log_failure(
                    "create",
                    &config_id,
                    ScopeConfig::from_properties(&properties),
                )?;
                self.on_create(config_id, config).map(|_| ())
            }
            ConfigEvent::Update {
                config_id,
                properties,
            } => self.update_from_properties(&config_id, &properties),
            ConfigEvent::Delete { config_id } => self.on_delete(&config_id),
        }
    }

    /// Bring the registry in line with a full configuration snapshot.
    ///
    /// Identical records are left untouched, so applying the same snapshot
    /// twice is a no-op the second time.
    ///
    /// Passes must not overlap: callers reconciling from several tasks
    /// serialize them, or concurrent passes race on the same ids.
    pub fn reconcile(&self, snapshot: &BTreeMap<ConfigId, ConfigProperties>) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        enum Applied {
            Created,
            Updated,
        }

        for (config_id, properties) in snapshot {
            let outcome = match self.scope(config_id) {
                Some(scope) => match ScopeConfig::from_properties(properties) {
                    Ok(config) if scope.snapshot().is_ok_and(|current| *current == config) => {
                        tracing::debug!(config_id = %config_id, "scope configuration unchanged");
                        report.unchanged.push(config_id.clone());
                        continue;
                    }
                    Ok(config) => self
                        .on_update(config_id, config)
                        .map(|()| Applied::Updated),
                    Err(e) => Err(self.reject_update(config_id, e)),
                },
                None => log_failure("create", config_id, ScopeConfig::from_properties(properties))
                    .and_then(|config| self.on_create(config_id.clone(), config))
                    .map(|_| Applied::Created),
            };

            match outcome {
                Ok(Applied::Created) => report.created.push(config_id.clone()),
                Ok(Applied::Updated) => report.updated.push(config_id.clone()),
                Err(error) => report.failed.push(ReconcileFailure {
                    config_id: config_id.clone(),
                    error,
                }),
            }
        }

        for config_id in self.config_ids() {
            if snapshot.contains_key(&config_id) {
                continue;
            }
            match self.on_delete(&config_id) {
                Ok(()) => report.removed.push(config_id),
                Err(error) => report.failed.push(ReconcileFailure { config_id, error }),
            }
        }

        tracing::info!(
            created = report.created.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "reconciled scope configurations"
        );
        report
    }

    /// Consume configuration events until the sender side closes.
    pub async fn run(&self, mut events: mpsc::Receiver<ConfigEvent>) {
        while let Some(event) = events.recv().await {
            // Failures are logged by `apply`; keep serving the other scopes.
            let _ = self.apply(event);
        }
        tracing::info!("configuration event stream closed");
    }

    /// Retire and unregister every scope. Returns how many were retired.
    pub fn shutdown(&self) -> usize {
        let mut retired = 0;
        for config_id in self.config_ids() {
            if let Some((_, entry)) = self.entries.remove(&config_id) {
                let _ = log_failure("shutdown", &config_id, retire(entry));
                retired += 1;
            }
        }
        retired
    }

    pub fn get(&self, config_id: &str) -> Option<Arc<DynamicScope>> {
        self.scope(config_id)
    }

    pub fn contains(&self, config_id: &str) -> bool {
        self.entries.contains_key(config_id)
    }

    /// Registered configuration ids, sorted
    pub fn config_ids(&self) -> Vec<ConfigId> {
        let mut ids: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn scope(&self, config_id: &str) -> Option<Arc<DynamicScope>> {
        self.entries.get(config_id).map(|e| e.scope.clone())
    }

    fn update_from_properties(&self, config_id: &str, properties: &ConfigProperties) -> Result<()> {
        if !self.entries.contains_key(config_id) {
            return log_failure(
                "update",
                config_id,
                Err(Error::UnknownConfig(config_id.to_string())),
            );
        }
        match ScopeConfig::from_properties(properties) {
            Ok(config) => self.on_update(config_id, config),
            Err(e) => Err(self.reject_update(config_id, e)),
        }
    }

    /// Apply the invalid-update policy and hand back the original error.
    fn reject_update(&self, config_id: &str, error: Error) -> Error {
        tracing::error!(
            config_id = %config_id,
            error = %error,
            policy = ?self.options.invalid_update,
            "rejected invalid scope configuration update"
        );
        if self.options.invalid_update == InvalidUpdatePolicy::Withdraw {
            let _ = self.on_delete(config_id);
        }
        error
    }
}

impl<A: AuthorizationServer + ?Sized> Drop for ScopeRegistry<A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn retire<A: AuthorizationServer + ?Sized>(entry: ScopeEntry<A>) -> Result<()> {
    entry.scope.deactivate();
    entry.registration.unregister()
}

fn log_failure<T>(operation: &str, config_id: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        tracing::error!(
            config_id = %config_id,
            operation = operation,
            error = %e,
            "scope lifecycle operation failed"
        );
    }
    result
}
