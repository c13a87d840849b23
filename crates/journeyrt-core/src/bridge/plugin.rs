//! Native plugin contract and registry.
//!
//! Plugins back `native` steps and page requests (biometric prompts,
//! device checks). Registration is exclusive; resolution is concurrent.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Error surfaced by a plugin invocation.
#[derive(Debug, Error)]
#[error("plugin error: {reason}")]
pub struct PluginError {
    /// Human-readable failure reason, forwarded to the page.
    pub reason: String,
}

impl PluginError {
    /// Creates an error with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A native capability invocable from journey steps and page requests.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable plugin name.
    fn name(&self) -> &str;

    /// Whether this plugin handles the given method.
    fn can_handle(&self, method: &str) -> bool;

    /// Handles a method invocation.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] on failure; the reason is surfaced to the
    /// page as `BRIDGE_ERROR`.
    async fn handle(&self, method: &str, params: &Value) -> Result<Value, PluginError>;
}

/// Registry of installed plugins.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin.
    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        if let Ok(mut plugins) = self.plugins.write() {
            plugins.push(plugin);
        }
    }

    /// Resolves the first plugin claiming a method.
    #[must_use]
    pub fn resolve(&self, method: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .read()
            .ok()?
            .iter()
            .find(|plugin| plugin.can_handle(method))
            .cloned()
    }
}
