//! Typed provider registry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use notesync_common::{Error, Result};

use crate::gdrive::{create_gdrive_provider, AuthorizationHandler};
use crate::local::{LocalConfig, LocalProvider};
use crate::memory::MemoryProvider;
use crate::provider::SnapshotStore;

/// Known snapshot store implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Memory,
    Local,
    #[serde(rename = "gdrive")]
    GoogleDrive,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Memory => "memory",
            ProviderKind::Local => "local",
            ProviderKind::GoogleDrive => "gdrive",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(ProviderKind::Memory),
            "local" => Ok(ProviderKind::Local),
            "gdrive" | "google-drive" => Ok(ProviderKind::GoogleDrive),
            other => Err(Error::InvalidInput(format!("Unknown provider: {}", other))),
        }
    }
}

/// Factory function type for creating providers.
pub type ProviderFactory = Box<dyn Fn(Value) -> Result<Arc<dyn SnapshotStore>> + Send + Sync>;

/// Registry mapping provider kinds to factories taking JSON configuration.
pub struct ProviderRegistry {
    factories: HashMap<ProviderKind, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory.
    ///
    /// # Errors
    /// - `AlreadyExists` if `kind` is already registered
    pub fn register(&mut self, kind: ProviderKind, factory: ProviderFactory) -> Result<()> {
        if self.factories.contains_key(&kind) {
            return Err(Error::AlreadyExists(format!(
                "Provider '{}' is already registered",
                kind
            )));
        }
        self.factories.insert(kind, factory);
        Ok(())
    }

    /// Resolve a provider by kind and configuration.
    ///
    /// # Errors
    /// - `NotFound` if the kind is not registered
    /// - `InvalidInput` if the configuration is invalid
    pub fn resolve(&self, kind: ProviderKind, config: Value) -> Result<Arc<dyn SnapshotStore>> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| Error::NotFound(format!("Provider '{}' is not registered", kind)))?;
        factory(config)
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.factories.keys().copied().collect()
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with all built-in providers.
///
/// `handler` is passed to the Google Drive provider for interactive sign-in.
pub fn create_default_registry(
    handler: Option<Arc<dyn AuthorizationHandler>>,
) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    registry.factories.insert(
        ProviderKind::Memory,
        Box::new(|_config| Ok(Arc::new(MemoryProvider::new()))),
    );

    registry.factories.insert(
        ProviderKind::Local,
        Box::new(|config| {
            let config: LocalConfig = serde_json::from_value(config).map_err(|e| {
                Error::InvalidInput(format!("Local provider requires 'root': {}", e))
            })?;
            Ok(Arc::new(LocalProvider::from_config(config)))
        }),
    );

    registry.factories.insert(
        ProviderKind::GoogleDrive,
        Box::new(move |config| create_gdrive_provider(config, handler.clone())),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(
                ProviderKind::Memory,
                Box::new(|_| Ok(Arc::new(MemoryProvider::new()))),
            )
            .unwrap();

        let provider = registry.resolve(ProviderKind::Memory, Value::Null).unwrap();
        assert_eq!(provider.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(
                ProviderKind::Memory,
                Box::new(|_| Ok(Arc::new(MemoryProvider::new()))),
            )
            .unwrap();

        let result = registry.register(
            ProviderKind::Memory,
            Box::new(|_| Ok(Arc::new(MemoryProvider::new()))),
        );
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = ProviderRegistry::new();
        let result = registry.resolve(ProviderKind::Local, Value::Null);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry(None);
        assert_eq!(registry.kinds().len(), 3);

        let local = registry
            .resolve(
                ProviderKind::Local,
                serde_json::json!({ "root": "/tmp/notesync-test" }),
            )
            .unwrap();
        assert_eq!(local.name(), "local");

        let gdrive = registry
            .resolve(
                ProviderKind::GoogleDrive,
                serde_json::json!({ "client_id": "abc" }),
            )
            .unwrap();
        assert_eq!(gdrive.name(), "gdrive");

        assert!(registry
            .resolve(ProviderKind::Local, serde_json::json!({}))
            .is_err());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("gdrive".parse::<ProviderKind>().unwrap(), ProviderKind::GoogleDrive);
        assert_eq!(ProviderKind::Local.to_string(), "local");
        assert!("dropbox".parse::<ProviderKind>().is_err());

        let json = serde_json::to_string(&ProviderKind::GoogleDrive).unwrap();
        assert_eq!(json, "\"gdrive\"");
    }
}
