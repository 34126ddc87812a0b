//! Interfaces to the surrounding authorization server.

use crate::error::{Error, Result};
use crate::scope::Scope;
use crate::source::ConfigId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeSet;
use std::sync::Arc;

/// The user on whose behalf the host resolves a scope's resource path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    id: String,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Outbound registration interface of the authorization server.
///
/// Implementations must not call back into the registry that is
/// registering with them.
pub trait AuthorizationServer: Send + Sync {
    /// Publish `scope` under the binding `config_id`
    fn register(&self, config_id: &str, scope: Arc<dyn Scope>) -> Result<()>;

    /// Withdraw the scope bound to `config_id`
    fn unregister(&self, config_id: &str) -> Result<()>;
}

/// A live binding of one scope in an [`AuthorizationServer`].
///
/// Dropping the registration unregisters the scope.
pub struct ServiceRegistration<A: AuthorizationServer + ?Sized> {
    server: Arc<A>,
    config_id: ConfigId,
    registered: bool,
}

impl<A: AuthorizationServer + ?Sized> ServiceRegistration<A> {
    pub fn register(server: Arc<A>, config_id: ConfigId, scope: Arc<dyn Scope>) -> Result<Self> {
        server.register(&config_id, scope)?;
        Ok(Self {
            server,
            config_id,
            registered: true,
        })
    }

    pub fn config_id(&self) -> &str {
        &self.config_id
    }

    /// Unregister now and report the outcome
    pub fn unregister(mut self) -> Result<()> {
        self.registered = false;
        self.server.unregister(&self.config_id)
    }
}

impl<A: AuthorizationServer + ?Sized> Drop for ServiceRegistration<A> {
    fn drop(&mut self) {
        if self.registered {
            if let Err(e) = self.server.unregister(&self.config_id) {
                tracing::warn!(config_id = %self.config_id, error = %e, "failed to unregister scope");
            }
        }
    }
}

/// In-memory authorization server view of the published scopes.
///
/// Bindings are keyed by configuration id. Scope names are not required to
/// be unique; [`ScopeDirectory::find_by_name`] resolves duplicates to the
/// lowest configuration id.
#[derive(Default)]
pub struct ScopeDirectory {
    scopes: DashMap<ConfigId, Arc<dyn Scope>>,
}

impl ScopeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, config_id: &str) -> Option<Arc<dyn Scope>> {
        self.scopes.get(config_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, config_id: &str) -> bool {
        self.scopes.contains_key(config_id)
    }

    /// All bindings, ordered by configuration id
    pub fn scopes(&self) -> Vec<(ConfigId, Arc<dyn Scope>)> {
        let mut scopes: Vec<_> = self
            .scopes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        scopes.sort_by(|a, b| a.0.cmp(&b.0));
        scopes
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<dyn Scope>> {
        self.scopes()
            .into_iter()
            .find(|(_, scope)| scope.name().is_ok_and(|n| n == name))
            .map(|(_, scope)| scope)
    }

    /// Distinct names of the scopes currently answering queries
    pub fn scope_names(&self) -> Vec<String> {
        self.scopes
            .iter()
            .filter_map(|entry| entry.value().name().ok())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

impl AuthorizationServer for ScopeDirectory {
    fn register(&self, config_id: &str, scope: Arc<dyn Scope>) -> Result<()> {
        match self.scopes.entry(config_id.to_string()) {
            Entry::Occupied(_) => Err(Error::Registration(format!(
                "binding {config_id} already exists"
            ))),
            Entry::Vacant(entry) => {
                entry.insert(scope);
                tracing::debug!(config_id = %config_id, "scope published");
                Ok(())
            }
        }
    }

    fn unregister(&self, config_id: &str) -> Result<()> {
        self.scopes
            .remove(config_id)
            .map(|_| tracing::debug!(config_id = %config_id, "scope withdrawn"))
            .ok_or_else(|| Error::UnknownConfig(config_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScopeConfig;
    use crate::scope::DynamicScope;

    fn scope(config_id: &str, name: &str) -> Arc<DynamicScope> {
        let scope = Arc::new(DynamicScope::new(config_id));
        scope
            .activate(ScopeConfig::new(name, "/content").unwrap())
            .unwrap();
        scope
    }

    #[test]
    fn test_register_and_unregister() {
        let directory = ScopeDirectory::new();
        directory.register("pid-1", scope("pid-1", "a")).unwrap();

        assert_eq!(directory.len(), 1);
        assert!(directory.contains("pid-1"));
        assert_eq!(directory.get("pid-1").unwrap().name().unwrap(), "a");

        directory.unregister("pid-1").unwrap();
        assert!(directory.is_empty());
        assert_eq!(
            directory.unregister("pid-1"),
            Err(Error::UnknownConfig("pid-1".into()))
        );
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let directory = ScopeDirectory::new();
        directory.register("pid-1", scope("pid-1", "a")).unwrap();

        let err = directory.register("pid-1", scope("pid-1", "b")).unwrap_err();
        assert!(matches!(err, Error::Registration(_)));
        assert_eq!(directory.get("pid-1").unwrap().name().unwrap(), "a");
    }

    #[test]
    fn test_duplicate_names_resolve_to_lowest_id() {
        let directory = ScopeDirectory::new();
        directory.register("pid-b", scope("pid-b", "shared")).unwrap();
        directory.register("pid-a", scope("pid-a", "shared")).unwrap();
        directory.register("pid-c", scope("pid-c", "other")).unwrap();

        let found = directory.find_by_name("shared").unwrap();
        assert_eq!(found.resource_path(None).unwrap(), "/content");
        let ids: Vec<_> = directory.scopes().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, ["pid-a", "pid-b", "pid-c"]);
        assert_eq!(directory.scope_names(), ["other", "shared"]);
        assert!(directory.find_by_name("missing").is_none());
    }

    #[test]
    fn test_retired_scopes_have_no_name() {
        let directory = ScopeDirectory::new();
        let retired = scope("pid-1", "gone");
        directory.register("pid-1", retired.clone()).unwrap();
        retired.deactivate();

        assert!(directory.scope_names().is_empty());
        assert!(directory.find_by_name("gone").is_none());
    }

    #[test]
    fn test_registration_drop_unregisters() {
        let directory = Arc::new(ScopeDirectory::new());
        let registration =
            ServiceRegistration::register(directory.clone(), "pid-1".into(), scope("pid-1", "a"))
                .unwrap();
        assert_eq!(registration.config_id(), "pid-1");
        assert!(directory.contains("pid-1"));

        drop(registration);
        assert!(directory.is_empty());
    }

    #[test]
    fn test_explicit_unregister_does_not_repeat_on_drop() {
        let directory = Arc::new(ScopeDirectory::new());
        let registration =
            ServiceRegistration::register(directory.clone(), "pid-1".into(), scope("pid-1", "a"))
                .unwrap();

        registration.unregister().unwrap();
        assert!(directory.is_empty());
    }
}
