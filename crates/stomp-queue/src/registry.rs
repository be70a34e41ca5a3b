//! Queue registry for running several named queues side by side.
//!
//! [`QueueRegistry`] maps the queue names of a [`QueuesConfig`] to the
//! [`ReliableQueue`] built for each entry. It is assembled once at startup;
//! each queue owns its own connection, so a worker borrows the queue it
//! consumes with [`QueueRegistry::get_mut`] or takes it out entirely.

use crate::adapter::{ReliableQueue, StompQueue};
use crate::config::{QueueSettings, QueuesConfig};
use crate::error::ConfigurationError;
use crate::hook::OutboundHook;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Registry mapping queue names to their adapters
#[derive(Default)]
pub struct QueueRegistry {
    queues: BTreeMap<String, Box<dyn ReliableQueue>>,
}

impl QueueRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one STOMP-backed queue per configured entry, sharing `hook`.
    ///
    /// No broker connection is opened until a queue is first used.
    pub fn from_config(
        config: &QueuesConfig,
        hook: Arc<dyn OutboundHook>,
    ) -> Result<Self, ConfigurationError> {
        Self::build(config, |_, settings| {
            let queue = StompQueue::from_settings(settings)?.with_hook(Arc::clone(&hook));
            Ok(Box::new(queue) as Box<dyn ReliableQueue>)
        })
    }

    /// Build one queue per configured entry using `factory`.
    ///
    /// The configuration is validated first; the first factory error aborts
    /// the build.
    pub fn build<F>(config: &QueuesConfig, mut factory: F) -> Result<Self, ConfigurationError>
    where
        F: FnMut(&str, &QueueSettings) -> Result<Box<dyn ReliableQueue>, ConfigurationError>,
    {
        config.validate()?;

        let mut registry = Self::new();
        for (name, settings) in &config.queues {
            let queue = factory(name, settings)?;
            info!(
                queue = %name,
                destination = settings.destination(),
                brokers = ?settings.brokers(),
                "Registered queue"
            );
            registry.register(name.clone(), queue);
        }
        Ok(registry)
    }

    /// Register a queue under `name`.
    ///
    /// If a queue with the same name is already registered it is replaced.
    /// Returns `&mut Self` to allow method chaining.
    pub fn register(&mut self, name: impl Into<String>, queue: Box<dyn ReliableQueue>) -> &mut Self {
        self.queues.insert(name.into(), queue);
        self
    }

    /// Borrow a queue by name.
    ///
    /// Returns `None` if the queue is not registered.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn ReliableQueue + 'static)> {
        self.queues.get_mut(name).map(|queue| queue.as_mut())
    }

    /// Remove a queue, handing ownership to the caller
    pub fn take(&mut self, name: &str) -> Option<Box<dyn ReliableQueue>> {
        self.queues.remove(name)
    }

    /// Check whether a queue is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    /// Registered queue names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

impl IntoIterator for QueueRegistry {
    type Item = (String, Box<dyn ReliableQueue>);
    type IntoIter = std::collections::btree_map::IntoIter<String, Box<dyn ReliableQueue>>;

    fn into_iter(self) -> Self::IntoIter {
        self.queues.into_iter()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
