//! Tier-based model resolution with downgrade-only fallback.
//!
//! Callers ask for a capability tier, never a model name. Resolution
//! walks the configured providers in order at the requested tier, then
//! steps the tier down one level at a time. It never upgrades: a request
//! for `fast` is either served at `fast` or fails. Resolved handles are
//! cached per (tier, provider) for the process lifetime; a reconfigure
//! drops the cache.

use skilld_core::config::Config;
use skilld_core::tier::ModelTier;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// A resolved model binding. Opaque to callers beyond identification;
/// the provider SDK boundary consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    pub provider: String,
    pub model: String,
    /// Tier actually served, after any downgrade.
    pub tier: ModelTier,
}

/// Maps (provider, tier) to a concrete model name.
pub trait ProviderCatalog: Send + Sync {
    fn model_for(&self, provider: &str, tier: ModelTier) -> Option<String>;
}

/// Built-in tier defaults per provider, overridable from configuration.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    overrides: HashMap<(String, ModelTier), String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog seeded with the default-provider overrides from config.
    pub fn from_config(config: &Config) -> Self {
        let mut catalog = Self::new();
        for tier in [ModelTier::Fast, ModelTier::Thinking, ModelTier::Pro] {
            if let Some(model) = config.model_override(tier) {
                catalog.set(&config.default_provider, tier, model);
            }
        }
        catalog
    }

    pub fn set(&mut self, provider: &str, tier: ModelTier, model: impl Into<String>) {
        self.overrides
            .insert((provider.to_string(), tier), model.into());
    }

    fn builtin(provider: &str, tier: ModelTier) -> Option<&'static str> {
        let model = match (provider, tier) {
            ("anthropic", ModelTier::Fast) => "claude-3-5-haiku-20241022",
            ("anthropic", ModelTier::Thinking) => "claude-sonnet-4-20250514",
            ("anthropic", ModelTier::Pro) => "claude-opus-4-20250514",
            ("openai", ModelTier::Fast) => "gpt-4o-mini",
            ("openai", ModelTier::Thinking) => "gpt-4o",
            ("openai", ModelTier::Pro) => "o1",
            ("google", ModelTier::Fast) => "gemini-2.0-flash-exp",
            ("google", ModelTier::Thinking) => "gemini-2.0-flash-thinking-exp",
            ("google", ModelTier::Pro) => "gemini-2.5-pro-preview-06-05",
            _ => return None,
        };
        Some(model)
    }
}

impl ProviderCatalog for StaticCatalog {
    fn model_for(&self, provider: &str, tier: ModelTier) -> Option<String> {
        self.overrides
            .get(&(provider.to_string(), tier))
            .cloned()
            .or_else(|| Self::builtin(provider, tier).map(String::from))
    }
}

/// Outcome of a resolution, including whether a downgrade happened.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub handle: Arc<ModelHandle>,
    pub requested: ModelTier,
}

impl Resolution {
    pub fn degraded(&self) -> bool {
        self.handle.tier != self.requested
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// No provider can serve the requested tier or anything below it.
    /// Fatal for the turn; there is nothing to degrade to.
    #[error("no model available for tier '{requested}' or below")]
    NoModelAvailable { requested: ModelTier },
}

struct ResolverInner {
    catalog: Arc<dyn ProviderCatalog>,
    providers: Vec<String>,
    cache: HashMap<(ModelTier, String), Arc<ModelHandle>>,
}

/// Resolves capability tiers to model handles.
pub struct TierResolver {
    inner: RwLock<ResolverInner>,
}

impl TierResolver {
    pub fn new(catalog: Arc<dyn ProviderCatalog>, providers: Vec<String>) -> Self {
        Self {
            inner: RwLock::new(ResolverInner {
                catalog,
                providers,
                cache: HashMap::new(),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(StaticCatalog::from_config(config)),
            config.providers.clone(),
        )
    }

    /// Whether the exact tier is servable without a downgrade.
    pub fn tier_available(&self, tier: ModelTier) -> bool {
        let inner = read_unpoisoned(&self.inner);
        inner
            .providers
            .iter()
            .any(|p| inner.catalog.model_for(p, tier).is_some())
    }

    /// Resolve a tier, trying providers in configured order and then
    /// stepping the tier down. Deterministic for a fixed configuration.
    pub fn resolve(&self, requested: ModelTier) -> Result<Resolution, ResolveError> {
        let mut tier = requested;
        loop {
            if let Some(handle) = self.resolve_exact(tier) {
                if tier != requested {
                    warn!(
                        requested = %requested,
                        resolved = %tier,
                        provider = %handle.provider,
                        "model tier degraded"
                    );
                }
                return Ok(Resolution { handle, requested });
            }
            match tier.downgrade() {
                Some(lower) => tier = lower,
                None => return Err(ResolveError::NoModelAvailable { requested }),
            }
        }
    }

    /// Swap catalog and provider order; drops every cached handle.
    pub fn reconfigure(&self, catalog: Arc<dyn ProviderCatalog>, providers: Vec<String>) {
        let mut inner = write_unpoisoned(&self.inner);
        inner.catalog = catalog;
        inner.providers = providers;
        inner.cache.clear();
        debug!("tier resolver reconfigured, handle cache cleared");
    }

    fn resolve_exact(&self, tier: ModelTier) -> Option<Arc<ModelHandle>> {
        {
            let inner = read_unpoisoned(&self.inner);
            for provider in &inner.providers {
                if let Some(handle) = inner.cache.get(&(tier, provider.clone())) {
                    return Some(Arc::clone(handle));
                }
                if inner.catalog.model_for(provider, tier).is_some() {
                    break;
                }
            }
        }

        let mut inner = write_unpoisoned(&self.inner);
        let providers = inner.providers.clone();
        for provider in providers {
            let Some(model) = inner.catalog.model_for(&provider, tier) else {
                continue;
            };
            let handle = inner
                .cache
                .entry((tier, provider.clone()))
                .or_insert_with(|| {
                    debug!(%provider, %model, tier = %tier, "model handle created");
                    Arc::new(ModelHandle {
                        provider,
                        model,
                        tier,
                    })
                });
            return Some(Arc::clone(handle));
        }
        None
    }
}

fn read_unpoisoned<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_unpoisoned<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Catalog that only serves the tiers it was given.
    struct FixedCatalog {
        entries: HashMap<(String, ModelTier), String>,
    }

    impl FixedCatalog {
        fn new(entries: &[(&str, ModelTier, &str)]) -> Arc<Self> {
            Arc::new(Self {
                entries: entries
                    .iter()
                    .map(|(p, t, m)| (((*p).to_string(), *t), (*m).to_string()))
                    .collect(),
            })
        }
    }

    impl ProviderCatalog for FixedCatalog {
        fn model_for(&self, provider: &str, tier: ModelTier) -> Option<String> {
            self.entries.get(&(provider.to_string(), tier)).cloned()
        }
    }

    #[test]
    fn resolves_exact_tier_when_available() {
        let resolver = TierResolver::from_config(&Config::default());
        let resolution = resolver.resolve(ModelTier::Thinking).unwrap();

        assert_eq!(resolution.handle.tier, ModelTier::Thinking);
        assert_eq!(resolution.handle.provider, "anthropic");
        assert_eq!(resolution.handle.model, "claude-sonnet-4-20250514");
        assert!(!resolution.degraded());
    }

    #[test]
    fn degrades_one_tier_when_exact_unavailable() {
        let catalog = FixedCatalog::new(&[
            ("anthropic", ModelTier::Fast, "fast-model"),
            ("anthropic", ModelTier::Thinking, "thinking-model"),
        ]);
        let resolver = TierResolver::new(catalog, vec!["anthropic".to_string()]);

        let resolution = resolver.resolve(ModelTier::Pro).unwrap();
        assert_eq!(resolution.handle.tier, ModelTier::Thinking);
        assert!(resolution.degraded());
    }

    #[test]
    fn degrades_two_tiers_to_fast() {
        let catalog = FixedCatalog::new(&[("anthropic", ModelTier::Fast, "fast-model")]);
        let resolver = TierResolver::new(catalog, vec!["anthropic".to_string()]);

        let resolution = resolver.resolve(ModelTier::Pro).unwrap();
        assert_eq!(resolution.handle.tier, ModelTier::Fast);
        assert_eq!(resolution.handle.model, "fast-model");
        assert!(resolution.degraded());
    }

    #[test]
    fn never_upgrades() {
        let catalog = FixedCatalog::new(&[("anthropic", ModelTier::Pro, "pro-model")]);
        let resolver = TierResolver::new(catalog, vec!["anthropic".to_string()]);

        let err = resolver.resolve(ModelTier::Fast).unwrap_err();
        assert_eq!(
            err,
            ResolveError::NoModelAvailable {
                requested: ModelTier::Fast
            }
        );
    }

    #[test]
    fn empty_provider_set_is_fatal() {
        let catalog = FixedCatalog::new(&[]);
        let resolver = TierResolver::new(catalog, Vec::new());

        let err = resolver.resolve(ModelTier::Pro).unwrap_err();
        assert!(matches!(err, ResolveError::NoModelAvailable { .. }));
    }

    #[test]
    fn provider_order_breaks_ties() {
        let catalog = FixedCatalog::new(&[
            ("openai", ModelTier::Fast, "openai-fast"),
            ("anthropic", ModelTier::Fast, "anthropic-fast"),
        ]);
        let resolver = TierResolver::new(
            catalog,
            vec!["openai".to_string(), "anthropic".to_string()],
        );

        let resolution = resolver.resolve(ModelTier::Fast).unwrap();
        assert_eq!(resolution.handle.provider, "openai");
    }

    #[test]
    fn repeated_resolution_reuses_cached_handle() {
        let resolver = TierResolver::from_config(&Config::default());

        let first = resolver.resolve(ModelTier::Fast).unwrap();
        let second = resolver.resolve(ModelTier::Fast).unwrap();
        assert!(Arc::ptr_eq(&first.handle, &second.handle));
    }

    #[test]
    fn reconfigure_drops_cached_handles() {
        let resolver = TierResolver::from_config(&Config::default());
        let before = resolver.resolve(ModelTier::Fast).unwrap();

        resolver.reconfigure(
            FixedCatalog::new(&[("anthropic", ModelTier::Fast, "new-fast")]),
            vec!["anthropic".to_string()],
        );

        let after = resolver.resolve(ModelTier::Fast).unwrap();
        assert!(!Arc::ptr_eq(&before.handle, &after.handle));
        assert_eq!(after.handle.model, "new-fast");
    }

    #[test]
    fn config_override_beats_builtin_default() {
        let mut config = Config::default();
        config.model_pro = Some("custom-pro-model".to_string());
        let resolver = TierResolver::from_config(&config);

        let resolution = resolver.resolve(ModelTier::Pro).unwrap();
        assert_eq!(resolution.handle.model, "custom-pro-model");
    }
}
