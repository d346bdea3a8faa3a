//! Tool registry: schema-validated, panic-isolated dispatch.
//!
//! Tools are registered at startup. Each registration compiles the tool's
//! JSON-schema parameter descriptor once; arguments failing validation
//! never reach the tool. Execution failures (errors and panics alike)
//! become error results so the tool loop keeps going.

use std::collections::HashMap;
use std::sync::Arc;

use rtc_domain::error::{Error, Result};
use rtc_domain::tool::ToolDefinition;

use super::cancel::CancelToken;

/// An executable tool. `execute` receives the validated argument object
/// and the turn's cancel token; cooperative tools observe it.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, args: serde_json::Value, cancel: CancelToken)
        -> Result<serde_json::Value>;
}

struct RegisteredTool {
    definition: ToolDefinition,
    schema: jsonschema::Validator,
    tool: Arc<dyn Tool>,
}

/// What a dispatch produced: either the tool's value or an error payload,
/// never a turn-aborting failure.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub result: serde_json::Value,
    pub is_error: bool,
}

impl ToolOutcome {
    fn error(message: impl Into<String>) -> Self {
        Self {
            result: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its parameter schema. Fails on an
    /// invalid schema or a duplicate name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let definition = tool.definition();
        let name = definition.name.clone();
        if self.tools.contains_key(&name) {
            return Err(Error::Tool {
                name,
                message: "already registered".into(),
            });
        }
        let schema = jsonschema::validator_for(&definition.parameters).map_err(|e| Error::Tool {
            name: name.clone(),
            message: format!("invalid parameter schema: {e}"),
        })?;
        self.tools.insert(
            name,
            RegisteredTool {
                definition,
                schema,
                tool,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Definitions for the LLM request. `names` restricts the set (a
    /// playbook stage's tool list); unknown names are skipped with a
    /// warning. `None` exposes the full registry.
    pub fn definitions(&self, names: Option<&[String]>) -> Vec<ToolDefinition> {
        match names {
            None => self.tools.values().map(|t| t.definition.clone()).collect(),
            Some(names) => names
                .iter()
                .filter_map(|n| match self.tools.get(n) {
                    Some(t) => Some(t.definition.clone()),
                    None => {
                        tracing::warn!(tool = %n, "stage references unregistered tool");
                        None
                    }
                })
                .collect(),
        }
    }

    /// Execute one tool call. Schema-invalid arguments synthesize an error
    /// result without touching the tool; execution errors and panics are
    /// captured the same way.
    pub async fn dispatch(
        &self,
        name: &str,
        args: &serde_json::Value,
        cancel: CancelToken,
    ) -> ToolOutcome {
        let Some(registered) = self.tools.get(name) else {
            return ToolOutcome::error(format!("unknown tool '{name}'"));
        };

        if let Err(e) = registered.schema.validate(args) {
            return ToolOutcome::error(format!("invalid arguments: {e}"));
        }

        let tool = registered.tool.clone();
        let args = args.clone();
        // A separate task isolates tool panics from the turn.
        let handle = tokio::spawn(async move { tool.execute(args, cancel).await });
        match handle.await {
            Ok(Ok(value)) => ToolOutcome {
                result: value,
                is_error: false,
            },
            Ok(Err(e)) => ToolOutcome::error(e.to_string()),
            Err(join_err) => ToolOutcome::error(format!("tool crashed: {join_err}")),
        }
    }
}
