//! Tool registration and invocation.
//!
//! Skills declare the tool names they expect; the runtime only checks
//! availability by name and dispatches invocations through [`Tool`].
//! Remote tool transports (MCP and the like) sit behind the same trait.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool not registered: {0}")]
    NotFound(String),
    #[error("tool '{name}' failed: {reason}")]
    Failed { name: String, reason: String },
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    async fn invoke(&self, args: Value) -> Result<Value, ToolError>;
}

/// In-process tool registry.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; a duplicate name replaces the earlier entry.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool = tool.name(), "tool registered");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Whether every named tool is registered.
    pub fn covers(&self, names: &[String]) -> bool {
        names.iter().all(|n| self.has(n))
    }

    /// Names missing from the registry, in declaration order.
    pub fn missing<'a>(&self, names: &'a [String]) -> Vec<&'a str> {
        names
            .iter()
            .filter(|n| !self.has(n))
            .map(String::as_str)
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.invoke(args).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
