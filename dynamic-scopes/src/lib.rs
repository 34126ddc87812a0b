//! # dynamic-scopes
//!
//! Configuration-driven OAuth scopes for an authorization server.
//!
//! Each factory configuration record describes one scope: its name, the
//! content-tree path it covers and the repository privileges it grants. A
//! [`ScopeRegistry`] turns a stream of create/update/delete events into live
//! [`DynamicScope`]s and keeps them published to an [`AuthorizationServer`].
//!
//! ## Features
//!
//! - **Validated records**: [`ScopeConfig`] can only hold a complete, non-empty definition
//! - **Live reconfiguration**: records are swapped atomically under concurrent readers
//! - **Reconciliation**: apply whole configuration snapshots idempotently
//! - **Scoped registration**: every removal path unregisters the scope
//!
//! ## Example
//!
//! ```rust
//! use dynamic_scopes::{Scope, ScopeConfig, ScopeDirectory, ScopeRegistry};
//! use std::sync::Arc;
//!
//! # fn example() -> dynamic_scopes::Result<()> {
//! let directory = Arc::new(ScopeDirectory::new());
//! let registry = ScopeRegistry::new(directory.clone());
//!
//! registry.on_create("pid-1", ScopeConfig::new("content.read", "/content/site")?)?;
//!
//! let scope = directory.find_by_name("content.read").expect("registered");
//! assert_eq!(scope.privileges()?, ["jcr:read"]);
//! assert_eq!(scope.endpoint(), "/oauth/token");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod registry;
pub mod scope;
pub mod source;

pub use config::{ConfigProperties, DEFAULT_PRIVILEGE, ScopeConfig};
pub use error::{Error, Result};
pub use host::{AuthorizationServer, Principal, ScopeDirectory, ServiceRegistration};
pub use registry::{
    InvalidUpdatePolicy, ReconcileFailure, ReconcileReport, RegistryOptions, ScopeRegistry,
};
pub use scope::{
    ActiveScope, DESCRIPTION_PREFIX, DynamicScope, Scope, ScopeDetails, ScopeState, TOKEN_ENDPOINT,
};
pub use source::{ConfigEvent, ConfigId, Manifest};
