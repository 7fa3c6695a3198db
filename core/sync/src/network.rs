//! Connectivity and network-class gating.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Kind of network the device is currently attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkClass {
    Wifi,
    Ethernet,
    Cellular,
    Unknown,
    None,
}

/// Which network classes automatic syncs may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    #[default]
    Any,
    /// Unmetered links only (Wi-Fi and Ethernet).
    WifiOnly,
}

impl NetworkPolicy {
    pub fn allows(&self, class: NetworkClass) -> bool {
        match self {
            NetworkPolicy::Any => class != NetworkClass::None,
            NetworkPolicy::WifiOnly => {
                matches!(class, NetworkClass::Wifi | NetworkClass::Ethernet)
            }
        }
    }
}

/// Source of connectivity information. Queried synchronously before each attempt.
pub trait NetworkMonitor: Send + Sync {
    fn is_online(&self) -> bool;

    fn class(&self) -> NetworkClass;
}

/// Monitor whose answers are set explicitly.
///
/// Used by hosts that learn about connectivity through events, and by tests.
#[derive(Debug)]
pub struct StaticNetwork {
    online: AtomicBool,
    class: RwLock<NetworkClass>,
}

impl StaticNetwork {
    pub fn new(online: bool, class: NetworkClass) -> Self {
        Self {
            online: AtomicBool::new(online),
            class: RwLock::new(class),
        }
    }

    /// Online over an unknown link.
    pub fn online() -> Self {
        Self::new(true, NetworkClass::Unknown)
    }

    pub fn offline() -> Self {
        Self::new(false, NetworkClass::None)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_class(&self, class: NetworkClass) {
        if let Ok(mut current) = self.class.write() {
            *current = class;
        }
    }
}

impl Default for StaticNetwork {
    fn default() -> Self {
        Self::online()
    }
}

impl NetworkMonitor for StaticNetwork {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn class(&self) -> NetworkClass {
        self.class
            .read()
            .map(|class| *class)
            .unwrap_or(NetworkClass::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_gating() {
        assert!(NetworkPolicy::Any.allows(NetworkClass::Cellular));
        assert!(NetworkPolicy::Any.allows(NetworkClass::Unknown));
        assert!(!NetworkPolicy::Any.allows(NetworkClass::None));

        assert!(NetworkPolicy::WifiOnly.allows(NetworkClass::Wifi));
        assert!(NetworkPolicy::WifiOnly.allows(NetworkClass::Ethernet));
        assert!(!NetworkPolicy::WifiOnly.allows(NetworkClass::Cellular));
        assert!(!NetworkPolicy::WifiOnly.allows(NetworkClass::Unknown));
    }

    #[test]
    fn test_static_network_setters() {
        let network = StaticNetwork::online();
        assert!(network.is_online());

        network.set_online(false);
        network.set_class(NetworkClass::Cellular);
        assert!(!network.is_online());
        assert_eq!(network.class(), NetworkClass::Cellular);
    }
}
