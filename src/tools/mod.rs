//! Tools the model may call during a turn

mod search;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{ToolCall, ToolSpec};
use crate::{Error, Result};

pub use search::{GoogleSearchConfig, GoogleSearchTool, SearchResult};

/// A callable function exposed to the model
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call this tool
    fn name(&self) -> &'static str;

    /// Description and argument schema offered to the model
    fn spec(&self) -> ToolSpec;

    /// Run the tool with the model-supplied arguments
    ///
    /// # Errors
    ///
    /// Returns `Error::Tool` for invalid arguments or a failed call
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value>;
}

/// Tools available to the agent, keyed by name
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool registered under the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        tracing::debug!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name(), tool);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }

    /// Execute a model tool call
    ///
    /// # Errors
    ///
    /// Returns `Error::Tool` if no tool has that name or the tool fails
    pub async fn invoke(&self, call: &ToolCall) -> Result<serde_json::Value> {
        let tool = self
            .tools
            .get(call.name.as_str())
            .ok_or_else(|| Error::Tool(format!("unknown tool: {}", call.name)))?;

        tracing::info!(tool = %call.name, id = %call.id, "calling tool");
        tool.call(call.arguments.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".to_string(),
                description: "Repeat the input".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
            Ok(arguments)
        }
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: serde_json::json!({"text": "hi"}),
        }
    }

    #[tokio::test]
    async fn invokes_registered_tool() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(Echo));

        assert_eq!(registry.specs().len(), 1);
        let output = registry.invoke(&call("echo")).await.unwrap();
        assert_eq!(output["text"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        let err = registry.invoke(&call("google_search")).await.unwrap_err();
        assert!(matches!(err, Error::Tool(msg) if msg.contains("google_search")));
    }
}
