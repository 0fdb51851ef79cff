//! Capability registry — maps provider names to capability providers.
//!
//! Explicitly constructed at startup and injected into the gateway state and
//! the poller; there is no process-wide singleton. Registration is
//! last-write-wins by name, with a warning when an existing provider is
//! replaced.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;

use gridpulse_core::error::{GridPulseError, Result};

use crate::task::Capability;

/// A named bundle of capabilities plus an availability check.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Provider name (e.g., "statistics", "insight").
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// The capabilities this provider can execute.
    fn capabilities(&self) -> &[Capability];

    /// Whether the provider is usable right now (e.g. API key configured).
    async fn is_available(&self) -> bool;

    /// Run one capability against a parameter bag. The executor has already
    /// verified the capability is listed and its required params are present.
    async fn execute(&self, capability: Capability, params: &serde_json::Value)
    -> Result<serde_json::Value>;
}

/// Introspection view of a registered provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<Capability>,
}

/// Registry of capability providers.
pub struct CapabilityRegistry {
    providers: RwLock<HashMap<String, Arc<dyn CapabilityProvider>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Store or replace a provider by name (last write wins). Providers with
    /// an empty capability list are rejected at registration time.
    pub fn register(&self, provider: Arc<dyn CapabilityProvider>) -> Result<()> {
        if provider.capabilities().is_empty() {
            return Err(GridPulseError::Validation(format!(
                "provider '{}' declares no capabilities",
                provider.name()
            )));
        }
        let name = provider.name().to_string();
        let mut providers = self
            .providers
            .write()
            .map_err(|e| GridPulseError::Execution(format!("registry lock: {e}")))?;
        if providers.insert(name.clone(), provider).is_some() {
            tracing::warn!("⚠️ Provider '{name}' replaced in registry");
        } else {
            tracing::info!("🔌 Provider registered: '{name}'");
        }
        Ok(())
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.providers.read().ok()?.get(name).cloned()
    }

    /// True only if the provider is registered and lists the capability.
    pub fn supports(&self, provider: &str, capability: Capability) -> bool {
        self.get(provider)
            .is_some_and(|p| p.capabilities().contains(&capability))
    }

    /// Introspection listing for the HTTP API.
    pub fn providers(&self) -> Vec<ProviderInfo> {
        let Ok(providers) = self.providers.read() else {
            return Vec::new();
        };
        let mut infos: Vec<ProviderInfo> = providers
            .values()
            .map(|p| ProviderInfo {
                name: p.name().to_string(),
                description: p.description().to_string(),
                capabilities: p.capabilities().to_vec(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider {
        name: &'static str,
        caps: Vec<Capability>,
    }

    #[async_trait]
    impl CapabilityProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "fake"
        }
        fn capabilities(&self) -> &[Capability] {
            &self.caps
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn execute(
            &self,
            _capability: Capability,
            _params: &serde_json::Value,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
    }

    #[test]
    fn test_register_and_supports() {
        let registry = CapabilityRegistry::new();
        registry
            .register(Arc::new(FakeProvider {
                name: "statistics",
                caps: vec![Capability::TrendAnalysis],
            }))
            .unwrap();

        assert!(registry.supports("statistics", Capability::TrendAnalysis));
        assert!(!registry.supports("statistics", Capability::Summarization));
        assert!(!registry.supports("missing", Capability::TrendAnalysis));
    }

    #[test]
    fn test_empty_capability_list_rejected() {
        let registry = CapabilityRegistry::new();
        let err = registry
            .register(Arc::new(FakeProvider {
                name: "hollow",
                caps: vec![],
            }))
            .unwrap_err();
        assert!(matches!(err, GridPulseError::Validation(_)));
        assert!(registry.get("hollow").is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let registry = CapabilityRegistry::new();
        registry
            .register(Arc::new(FakeProvider {
                name: "statistics",
                caps: vec![Capability::TrendAnalysis],
            }))
            .unwrap();
        registry
            .register(Arc::new(FakeProvider {
                name: "statistics",
                caps: vec![Capability::AnomalyDetection],
            }))
            .unwrap();

        let p = registry.get("statistics").unwrap();
        assert_eq!(p.capabilities(), &[Capability::AnomalyDetection]);
        assert_eq!(registry.providers().len(), 1);
    }
}
