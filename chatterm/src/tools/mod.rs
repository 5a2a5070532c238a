mod shell;

pub use shell::{ExecShell, ExecShellArgs, SHELL_CANCELLED};

use tokio_util::sync::CancellationToken;

use crate::chat::ToolCall;

/// Synthetic tool-result content shown when the user rejects a call.
pub const TOOL_CANCELLED: &str = "[Tool execution cancelled by user]";

/// A tool as advertised to the generator.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object.
    pub parameters: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

/// A parsed, ready-to-run tool call awaiting user approval.
#[async_trait::async_trait]
pub trait ToolInvocation: Send + Sync {
    /// One-line description for the confirmation dialog.
    fn summary(&self) -> String;
    /// `Ok` content is returned to the model verbatim; `Err` means the tool could not run
    /// at all or was stopped through `cancel`.
    async fn invoke(&self, cancel: CancellationToken) -> Result<String, String>;
}

pub trait Tool: Send + Sync + 'static {
    fn definition(&self) -> ToolDefinition;
    fn parse(&self, raw_arguments: &str) -> Result<Box<dyn ToolInvocation>, ToolError>;
}

/// The set of tools offered in a session.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with the built-in `exec_shell` tool.
    pub fn builtin() -> Self {
        Self::new().add(ExecShell::new())
    }

    pub fn add(mut self, tool: impl Tool) -> Self {
        self.tools.push(Box::new(tool));
        self
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve a generator tool call to an invocation.
    pub fn parse(&self, call: &ToolCall) -> Result<Box<dyn ToolInvocation>, ToolError> {
        self.tools
            .iter()
            .find(|t| t.definition().name == call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?
            .parse(&call.arguments)
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

    fn call(name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: "t1".into(),
            name: name.into(),
            arguments: args.into(),
        }
    }

    #[test]
    fn builtin_advertises_exec_shell() {
        let defs = ToolRegistry::builtin().definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "exec_shell");
        assert_eq!(defs[0].parameters["required"], serde_json::json!(["command"]));
    }

    #[test]
    fn unknown_tool_is_reported() {
        let err = ToolRegistry::builtin()
            .parse(&call("rm_rf", "{}"))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Unknown tool: rm_rf");
    }

    #[test]
    fn malformed_arguments_are_reported() {
        let err = ToolRegistry::builtin()
            .parse(&call("exec_shell", "{\"command\": "))
            .err()
            .unwrap();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        assert!(err.to_string().starts_with("Invalid arguments for exec_shell"));
    }

    #[test]
    fn empty_registry_rejects_everything() {
        let reg = ToolRegistry::new();
        assert!(reg.is_empty());
        assert!(matches!(
            reg.parse(&call("exec_shell", "{}")),
            Err(ToolError::UnknownTool(_))
        ));
    }

    #[test]
    fn parsed_call_has_summary() {
        let inv = ToolRegistry::builtin()
            .parse(&call("exec_shell", r#"{"command":"ls /tmp"}"#))
            .unwrap();
        assert_eq!(inv.summary(), "$ ls /tmp");
    }
}
