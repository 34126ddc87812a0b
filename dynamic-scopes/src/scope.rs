//! The scope object published to the authorization server.

use crate::config::ScopeConfig;
use crate::error::{Error, Result};
use crate::host::Principal;
use crate::source::ConfigId;
use arc_swap::{ArcSwap, Guard};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Token endpoint advertised by every dynamic scope
pub const TOKEN_ENDPOINT: &str = "/oauth/token";

/// Prefix of the human-readable scope description
pub const DESCRIPTION_PREFIX: &str = "Dynamic OAuth Configuration for ";

/// Capability set the authorization server consults during token issuance,
/// introspection and consent rendering.
pub trait Scope: Send + Sync {
    /// OAuth scope identifier
    fn name(&self) -> Result<String>;

    /// Repository privileges granted by holding this scope
    fn privileges(&self) -> Result<Vec<String>>;

    /// Content-tree path the scope authorizes.
    ///
    /// `user` allows per-principal resolution; dynamic scopes ignore it.
    fn resource_path(&self, user: Option<&Principal>) -> Result<String>;

    /// Token endpoint path
    fn endpoint(&self) -> &str;

    /// Human-readable description.
    ///
    /// `request` allows descriptions to vary per HTTP context; dynamic
    /// scopes ignore it.
    fn description(&self, request: Option<&http::request::Parts>) -> Result<String>;

    /// Every query answered from one consistent record.
    ///
    /// Hosts rendering several fields together use this instead of the
    /// individual queries, which may straddle a reconfiguration.
    fn details(
        &self,
        user: Option<&Principal>,
        request: Option<&http::request::Parts>,
    ) -> Result<ScopeDetails>;
}

/// All query answers of a scope, taken from a single record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeDetails {
    pub name: String,
    pub privileges: Vec<String>,
    pub resource_path: String,
    pub endpoint: String,
    pub description: String,
    pub revision: u64,
    pub modified_at: DateTime<Utc>,
}

/// Lifecycle of a [`DynamicScope`]
#[derive(Debug, Clone)]
pub enum ScopeState {
    /// Created, no configuration loaded yet
    Unconfigured,
    /// Serving queries from the current record
    Active(ActiveScope),
    /// Withdrawn by the configuration source. Terminal.
    Retired,
}

/// Current record of an active scope plus bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveScope {
    pub config: Arc<ScopeConfig>,
    /// Starts at 1 on activation, incremented by every replacement
    pub revision: u64,
    pub modified_at: DateTime<Utc>,
}

impl ActiveScope {
    pub fn description(&self) -> String {
        format!("{}{}", DESCRIPTION_PREFIX, self.config.scope_name())
    }
}

/// A scope whose definition comes from one factory configuration.
///
/// The whole lifecycle lives in one atomically swapped cell: readers do a
/// single wait-free load and always see one complete record.
pub struct DynamicScope {
    config_id: ConfigId,
    state: ArcSwap<ScopeState>,
}

impl DynamicScope {
    pub fn new(config_id: impl Into<ConfigId>) -> Self {
        Self {
            config_id: config_id.into(),
            state: ArcSwap::from_pointee(ScopeState::Unconfigured),
        }
    }

    pub fn config_id(&self) -> &str {
        &self.config_id
    }

    /// Load `config` and start answering queries from it.
    pub fn activate(&self, config: ScopeConfig) -> Result<()> {
        let active = self.replace(config)?;
        tracing::info!(
            config_id = %self.config_id,
            scope = %active.config.scope_name(),
            resource_path = %active.config.resource_path(),
            privileges = ?active.config.required_privileges(),
            "activated dynamic OAuth scope"
        );
        Ok(())
    }

    /// Wholesale replacement of the current record.
    pub fn modify(&self, config: ScopeConfig) -> Result<()> {
        let active = self.replace(config)?;
        tracing::info!(
            config_id = %self.config_id,
            scope = %active.config.scope_name(),
            resource_path = %active.config.resource_path(),
            privileges = ?active.config.required_privileges(),
            revision = active.revision,
            "modified dynamic OAuth scope"
        );
        Ok(())
    }

    /// Retire the scope. Every later query fails with `NotConfigured`.
    ///
    /// Returns the record that was active, if any.
    pub fn deactivate(&self) -> Option<Arc<ScopeConfig>> {
        let previous = self.state.swap(Arc::new(ScopeState::Retired));
        match previous.as_ref() {
            ScopeState::Active(active) => {
                tracing::info!(
                    config_id = %self.config_id,
                    scope = %active.config.scope_name(),
                    "retired dynamic OAuth scope"
                );
                Some(active.config.clone())
            }
            _ => None,
        }
    }

    /// The complete current record, for hosts that read several fields.
    pub fn snapshot(&self) -> Result<Arc<ScopeConfig>> {
        self.active().map(|active| active.config.clone())
    }

    /// Lifecycle state including the revision and modification time.
    pub fn status(&self) -> Arc<ScopeState> {
        self.state.load_full()
    }

    fn active(&self) -> Result<ActiveScope> {
        match &**self.state.load() {
            ScopeState::Active(active) => Ok(active.clone()),
            ScopeState::Unconfigured | ScopeState::Retired => Err(Error::NotConfigured),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(**self.state.load(), ScopeState::Active(_))
    }

    fn replace(&self, config: ScopeConfig) -> Result<ActiveScope> {
        let config = Arc::new(config);
        let next = self.transition(|current| match current {
            ScopeState::Retired => Err(Error::NotConfigured),
            ScopeState::Unconfigured => Ok(ScopeState::Active(ActiveScope {
                config: config.clone(),
                revision: 1,
                modified_at: Utc::now(),
            })),
            ScopeState::Active(active) => Ok(ScopeState::Active(ActiveScope {
                config: config.clone(),
                revision: active.revision + 1,
                modified_at: Utc::now(),
            })),
        })?;

        match next.as_ref() {
            ScopeState::Active(active) => Ok(active.clone()),
            _ => Err(Error::NotConfigured),
        }
    }

    /// Compare-and-swap retry loop; a concurrent retirement is never undone.
    fn transition<F>(&self, f: F) -> Result<Arc<ScopeState>>
    where
        F: Fn(&ScopeState) -> Result<ScopeState>,
    {
        let mut current = self.state.load_full();
        loop {
            let next = Arc::new(f(&current)?);
            let previous = self.state.compare_and_swap(&current, next.clone());
            if Arc::ptr_eq(&*previous, &current) {
                return Ok(next);
            }
            current = Guard::into_inner(previous);
        }
    }
}

impl std::fmt::Debug for DynamicScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicScope")
            .field("config_id", &self.config_id)
            .field("state", &self.state.load_full())
            .finish()
    }
}

impl Scope for DynamicScope {
    fn name(&self) -> Result<String> {
        Ok(self.snapshot()?.scope_name().to_string())
    }

    fn privileges(&self) -> Result<Vec<String>> {
        Ok(self.snapshot()?.required_privileges().to_vec())
    }

    fn resource_path(&self, _user: Option<&Principal>) -> Result<String> {
        Ok(self.snapshot()?.resource_path().to_string())
    }

    fn endpoint(&self) -> &str {
        TOKEN_ENDPOINT
    }

    fn description(&self, _request: Option<&http::request::Parts>) -> Result<String> {
        Ok(self.active()?.description())
    }

    fn details(
        &self,
        _user: Option<&Principal>,
        _request: Option<&http::request::Parts>,
    ) -> Result<ScopeDetails> {
        let active = self.active()?;
        Ok(ScopeDetails {
            name: active.config.scope_name().to_string(),
            privileges: active.config.required_privileges().to_vec(),
            resource_path: active.config.resource_path().to_string(),
            endpoint: TOKEN_ENDPOINT.to_string(),
            description: active.description(),
            revision: active.revision,
            modified_at: active.modified_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, path: &str) -> ScopeConfig {
        ScopeConfig::new(name, path).unwrap()
    }

    #[test]
    fn test_unconfigured_queries_fail() {
        let scope = DynamicScope::new("pid-1");

        assert_eq!(scope.name(), Err(Error::NotConfigured));
        assert_eq!(scope.privileges(), Err(Error::NotConfigured));
        assert_eq!(scope.resource_path(None), Err(Error::NotConfigured));
        assert_eq!(scope.description(None), Err(Error::NotConfigured));
        assert_eq!(scope.details(None, None), Err(Error::NotConfigured));
        assert_eq!(scope.endpoint(), TOKEN_ENDPOINT);
        assert!(!scope.is_active());
    }

    #[test]
    fn test_activate_answers_queries() {
        let scope = DynamicScope::new("pid-1");
        scope
            .activate(
                config("content.read", "/content/site")
                    .with_privileges(["jcr:read", "jcr:write"])
                    .unwrap(),
            )
            .unwrap();

        let user = Principal::new("alice");
        assert_eq!(scope.name().unwrap(), "content.read");
        assert_eq!(scope.privileges().unwrap(), ["jcr:read", "jcr:write"]);
        assert_eq!(scope.resource_path(Some(&user)).unwrap(), "/content/site");
        assert_eq!(scope.resource_path(None).unwrap(), "/content/site");
        assert_eq!(
            scope.description(None).unwrap(),
            "Dynamic OAuth Configuration for content.read"
        );
        assert_eq!(scope.endpoint(), "/oauth/token");
    }

    #[test]
    fn test_description_ignores_request() {
        let scope = DynamicScope::new("pid-1");
        scope.activate(config("basic", "/content")).unwrap();

        let (parts, _) = http::Request::builder()
            .uri("/oauth/authorize?scope=basic")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(
            scope.description(Some(&parts)).unwrap(),
            scope.description(None).unwrap()
        );
    }

    #[test]
    fn test_modify_replaces_record_and_bumps_revision() {
        let scope = DynamicScope::new("pid-1");
        scope.activate(config("a", "/one")).unwrap();
        scope.modify(config("a", "/two")).unwrap();
        scope.modify(config("b", "/three")).unwrap();

        assert_eq!(scope.name().unwrap(), "b");
        assert_eq!(scope.resource_path(None).unwrap(), "/three");
        match scope.status().as_ref() {
            ScopeState::Active(active) => assert_eq!(active.revision, 3),
            other => panic!("expected active scope, got {other:?}"),
        }
    }

    #[test]
    fn test_details_come_from_one_record() {
        let scope = DynamicScope::new("pid-1");
        let before = Utc::now();
        scope.activate(config("a", "/one")).unwrap();
        scope
            .modify(config("b", "/two").with_privileges(["jcr:write"]).unwrap())
            .unwrap();

        let details = scope.details(None, None).unwrap();
        assert_eq!(details.name, "b");
        assert_eq!(details.privileges, ["jcr:write"]);
        assert_eq!(details.resource_path, "/two");
        assert_eq!(details.endpoint, TOKEN_ENDPOINT);
        assert_eq!(details.description, "Dynamic OAuth Configuration for b");
        assert_eq!(details.revision, 2);
        assert!(details.modified_at >= before);

        match scope.status().as_ref() {
            ScopeState::Active(active) => assert_eq!(active.modified_at, details.modified_at),
            other => panic!("expected active scope, got {other:?}"),
        }
    }

    #[test]
    fn test_modification_time_advances() {
        let scope = DynamicScope::new("pid-1");
        scope.activate(config("a", "/one")).unwrap();
        let first = scope.details(None, None).unwrap().modified_at;
        scope.modify(config("a", "/two")).unwrap();

        assert!(scope.details(None, None).unwrap().modified_at >= first);
    }

    #[test]
    fn test_retired_is_terminal() {
        let scope = DynamicScope::new("pid-1");
        scope.activate(config("a", "/one")).unwrap();

        let last = scope.deactivate().unwrap();
        assert_eq!(last.scope_name(), "a");

        assert_eq!(scope.name(), Err(Error::NotConfigured));
        assert_eq!(scope.snapshot(), Err(Error::NotConfigured));
        assert_eq!(scope.modify(config("a", "/two")), Err(Error::NotConfigured));
        assert_eq!(scope.activate(config("a", "/two")), Err(Error::NotConfigured));
        assert!(matches!(scope.status().as_ref(), ScopeState::Retired));
        assert!(scope.deactivate().is_none());
    }

    #[test]
    fn test_usable_as_trait_object() {
        let scope = Arc::new(DynamicScope::new("pid-1"));
        scope.activate(config("basic", "/content")).unwrap();

        let published: Arc<dyn Scope> = scope;
        assert_eq!(published.name().unwrap(), "basic");
    }
}
