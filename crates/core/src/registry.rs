//! Discriminator → strategy registry.
//!
//! Built once at startup from an explicit list of strategies. Two strategies
//! claiming the same discriminator is a startup error; resolving an unknown
//! discriminator is a usage error. Neither is ever silently ignored.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use thiserror::Error;

/// Registry configuration error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unsupported type: {0}")]
    Unsupported(String),

    #[error("duplicate strategy registered for type: {0}")]
    Duplicate(String),
}

/// Immutable map from a discriminator to the strategy handling it.
#[derive(Debug, Clone)]
pub struct StrategyRegistry<K, S> {
    name: &'static str,
    strategies: HashMap<K, S>,
}

impl<K, S> StrategyRegistry<K, S>
where
    K: Eq + Hash + Ord + Clone + Display,
{
    /// Index `strategies` by the discriminator each one declares.
    pub fn build<I, F>(name: &'static str, strategies: I, key_of: F) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = S>,
        F: Fn(&S) -> K,
    {
        let mut map = HashMap::new();
        for strategy in strategies {
            let key = key_of(&strategy);
            if map.contains_key(&key) {
                return Err(RegistryError::Duplicate(key.to_string()));
            }
            map.insert(key, strategy);
        }

        tracing::info!(
            registry = name,
            count = map.len(),
            "strategy registry initialised"
        );

        Ok(Self {
            name,
            strategies: map,
        })
    }

    pub fn resolve(&self, key: &K) -> Result<&S, RegistryError> {
        self.strategies.get(key).ok_or_else(|| {
            tracing::error!(registry = self.name, discriminator = %key, "no strategy registered");
            RegistryError::Unsupported(key.to_string())
        })
    }

    pub fn is_supported(&self, key: &K) -> bool {
        self.strategies.contains_key(key)
    }

    /// Registered discriminators, sorted.
    pub fn supported(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.strategies.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
