// src/resources/mod.rs

//! Named connections shared by every run.
//!
//! Operators never hold connections themselves: they look them up by id in
//! a [`ResourceRegistry`] each time they run. The registry is built once at
//! startup from `[connection.<id>]` sections and handed around as an `Arc`.

pub mod memory;
pub mod warehouse;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::config::model::{ConnectionConfig, ConnectionKind};
use crate::errors::{EtlDagError, Result};

pub use memory::MemoryWarehouse;
pub use warehouse::{Statement, Warehouse, WarehouseError};

/// Object-store access keys.
#[derive(Clone, PartialEq, Eq)]
pub struct ObjectStoreCredentials {
    access_key_id: String,
    secret_access_key: String,
    region: Option<String>,
}

impl ObjectStoreCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region,
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
}

impl fmt::Debug for ObjectStoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("region", &self.region)
            .finish()
    }
}

/// What a connection id resolves to.
#[derive(Debug, Clone)]
pub enum ConnectionHandle {
    Warehouse(Arc<dyn Warehouse>),
    Credentials(ObjectStoreCredentials),
}

impl ConnectionHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionHandle::Warehouse(_) => "warehouse",
            ConnectionHandle::Credentials(_) => "credentials",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("connection '{0}' is not registered")]
    NotFound(String),

    #[error("connection '{id}' is a {found} connection, expected {expected}")]
    WrongKind {
        id: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("connection '{id}': environment variable {var} is not set")]
    MissingSecret { id: String, var: String },
}

#[derive(Debug, Clone)]
enum Entry {
    Handle(ConnectionHandle),
    /// Credentials read from the environment on every lookup, so rotated
    /// keys are picked up without a restart.
    EnvCredentials {
        access_key_id_env: String,
        secret_access_key_env: String,
        region: Option<String>,
    },
}

/// Connection lookup by id.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    entries: BTreeMap<String, Entry>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from `[connection.<id>]` sections.
    ///
    /// Only the `memory` warehouse backend can be built from configuration;
    /// other backends are added with [`ResourceRegistry::register`].
    pub fn from_config(connections: &BTreeMap<String, ConnectionConfig>) -> Result<Self> {
        let mut registry = Self::new();

        for (id, conn) in connections {
            let entry = match conn.kind {
                ConnectionKind::Warehouse => {
                    let backend = conn.backend.as_deref().unwrap_or("memory");
                    if backend != "memory" {
                        return Err(EtlDagError::ConfigError(format!(
                            "connection '{id}': backend '{backend}' cannot be built from \
                             configuration (supported: memory)"
                        )));
                    }
                    let mut warehouse = MemoryWarehouse::new();
                    for (table, rows) in &conn.tables {
                        warehouse = warehouse.with_table(table, *rows);
                    }
                    for (key, rows) in &conn.objects {
                        warehouse = warehouse.with_object(key, *rows);
                    }
                    Entry::Handle(ConnectionHandle::Warehouse(Arc::new(warehouse)))
                }
                ConnectionKind::Credentials => {
                    let (Some(key_env), Some(secret_env)) = (
                        conn.access_key_id_env.clone(),
                        conn.secret_access_key_env.clone(),
                    ) else {
                        return Err(EtlDagError::ConfigError(format!(
                            "connection '{id}': credentials need access_key_id_env and \
                             secret_access_key_env"
                        )));
                    };
                    Entry::EnvCredentials {
                        access_key_id_env: key_env,
                        secret_access_key_env: secret_env,
                        region: conn.region.clone(),
                    }
                }
            };
            debug!(connection = %id, kind = ?conn.kind, "registered connection");
            registry.entries.insert(id.clone(), entry);
        }

        Ok(registry)
    }

    /// Add or replace a connection.
    pub fn register(&mut self, id: impl Into<String>, handle: ConnectionHandle) {
        self.entries.insert(id.into(), Entry::Handle(handle));
    }

    /// Builder-style [`ResourceRegistry::register`].
    pub fn with(mut self, id: impl Into<String>, handle: ConnectionHandle) -> Self {
        self.register(id, handle);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn resolve(&self, id: &str) -> std::result::Result<ConnectionHandle, ResolveError> {
        match self.entries.get(id) {
            None => Err(ResolveError::NotFound(id.to_string())),
            Some(Entry::Handle(handle)) => Ok(handle.clone()),
            Some(Entry::EnvCredentials {
                access_key_id_env,
                secret_access_key_env,
                region,
            }) => {
                let read = |var: &str| {
                    std::env::var(var).map_err(|_| ResolveError::MissingSecret {
                        id: id.to_string(),
                        var: var.to_string(),
                    })
                };
                Ok(ConnectionHandle::Credentials(ObjectStoreCredentials::new(
                    read(access_key_id_env)?,
                    read(secret_access_key_env)?,
                    region.clone(),
                )))
            }
        }
    }

    pub fn warehouse(&self, id: &str) -> std::result::Result<Arc<dyn Warehouse>, ResolveError> {
        match self.resolve(id)? {
            ConnectionHandle::Warehouse(w) => Ok(w),
            other => Err(ResolveError::WrongKind {
                id: id.to_string(),
                expected: "warehouse",
                found: other.kind(),
            }),
        }
    }

    pub fn credentials(&self, id: &str) -> std::result::Result<ObjectStoreCredentials, ResolveError> {
        match self.resolve(id)? {
            ConnectionHandle::Credentials(c) => Ok(c),
            other => Err(ResolveError::WrongKind {
                id: id.to_string(),
                expected: "credentials",
                found: other.kind(),
            }),
        }
    }
}
