//! Diagnostic collector tools.
//!
//! Tools are the engine's only road into the cluster. Every tool is
//! read-only, returns the same `{success, data, error}` envelope, and is
//! looked up by name in a validating registry. The scheduler in this module's
//! submodule fans batches out with a concurrency cap and per-call timeout.

mod kubectl;
mod scheduler;

pub use kubectl::{builtin_tools, register_builtin_tools, ExecTool};
pub use scheduler::ToolScheduler;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ToolError, ToolResult};

/// Uniform result envelope every tool returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Whether the collector ran and produced usable output.
    pub success: bool,
    /// Collected payload; JSON output is parsed, everything else is a string.
    pub data: Value,
    /// Failure detail when `success` is false.
    pub error: Option<String>,
}

impl ToolOutcome {
    /// A successful outcome carrying data.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    /// A failed outcome carrying an error message.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Metadata describing a registered tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Registry name, lowercase snake_case.
    pub name: String,
    /// One-line description for the oracle catalog.
    pub description: String,
    /// Example argument object for the oracle catalog.
    pub args_help: String,
    /// Capability tag attached to evidence this tool produces.
    pub evidence_tag: String,
}

impl ToolSpec {
    /// Create a new spec.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        args_help: impl Into<String>,
        evidence_tag: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args_help: args_help.into(),
            evidence_tag: evidence_tag.into(),
        }
    }
}

/// A callable diagnostic collector.
///
/// `run` returns `Err` only for engine-level problems (bad arguments, spawn
/// failure); a collector that ran but found trouble reports it inside the
/// outcome.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Tool metadata used for registration and the oracle catalog.
    fn spec(&self) -> &ToolSpec;

    /// Run the tool with JSON arguments.
    async fn run(&self, args: &Value) -> ToolResult<ToolOutcome>;
}

/// Validating, name-keyed collection of tools.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolRunner>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool, validating its name.
    pub fn register(&mut self, tool: Arc<dyn ToolRunner>) -> ToolResult<()> {
        let name = tool.spec().name.clone();

        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(ToolError::Registration {
                message: format!("invalid tool name: {:?}", name),
            });
        }
        if self.tools.contains_key(&name) {
            return Err(ToolError::Registration {
                message: format!("duplicate tool name: {}", name),
            });
        }

        self.tools.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolRunner>> {
        self.tools.get(name).cloned()
    }

    /// Evidence tag for a tool name, if registered.
    pub fn evidence_tag(&self, name: &str) -> Option<String> {
        self.tools.get(name).map(|t| t.spec().evidence_tag.clone())
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Render the tool catalog injected into oracle context.
    pub fn catalog(&self) -> String {
        let mut lines = Vec::with_capacity(self.tools.len());
        for tool in self.tools.values() {
            let spec = tool.spec();
            lines.push(format!(
                "- {}: {} Args: {}",
                spec.name, spec.description, spec.args_help
            ));
        }
        lines.join("\n")
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticTool {
        spec: ToolSpec,
    }

    impl StaticTool {
        fn named(name: &str) -> Self {
            Self {
                spec: ToolSpec::new(name, "static test tool.", "{}", "static"),
            }
        }
    }

    #[async_trait]
    impl ToolRunner for StaticTool {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }

        async fn run(&self, _args: &Value) -> ToolResult<ToolOutcome> {
            Ok(ToolOutcome::ok(Value::String("static".to_string())))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool::named("alpha"))).unwrap();
        registry.register(Arc::new(StaticTool::named("beta"))).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("gamma").is_none());
        assert_eq!(registry.names(), vec!["alpha", "beta"]);
        assert_eq!(registry.evidence_tag("alpha").as_deref(), Some("static"));
    }

    #[test]
    fn test_register_rejects_duplicate() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool::named("alpha"))).unwrap();
        let err = registry
            .register(Arc::new(StaticTool::named("alpha")))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_register_rejects_invalid_names() {
        let mut registry = ToolRegistry::new();
        for bad in ["", "Has-Dash", "UPPER", "with space", "semi;colon"] {
            assert!(
                registry.register(Arc::new(StaticTool::named(bad))).is_err(),
                "accepted {:?}",
                bad
            );
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_catalog_render() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool::named("alpha"))).unwrap();
        let catalog = registry.catalog();
        assert!(catalog.contains("- alpha: static test tool. Args: {}"));
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = ToolOutcome::ok(serde_json::json!({"lines": 3}));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let err = ToolOutcome::err("exit status 1");
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("exit status 1"));
        assert!(err.data.is_null());
    }
}
