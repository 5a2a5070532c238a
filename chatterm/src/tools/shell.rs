use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;

use super::{Tool, ToolDefinition, ToolError, ToolInvocation};

/// 512 KB output cap per command.
const MAX_OUTPUT: usize = 512_000;

const NAME: &str = "exec_shell";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ExecShellArgs {
    pub command: String,
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// Runs a command through the system shell and returns combined stdout+stderr.
pub struct ExecShell {
    shell_path: String,
}

impl ExecShell {
    pub fn new() -> Self {
        Self {
            shell_path: "sh".into(),
        }
    }

    pub fn with_shell(mut self, shell_path: impl Into<String>) -> Self {
        self.shell_path = shell_path.into();
        self
    }
}

impl Default for ExecShell {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for ExecShell {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: NAME.into(),
            description: "Execute a shell command and return its combined stdout and stderr. \
                          A non-zero exit status is reported ahead of the output."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Command line passed to `sh -c`."
                    },
                    "working_dir": {
                        "type": "string",
                        "description": "Directory to run the command in. Defaults to the current directory."
                    }
                },
                "required": ["command"]
            }),
        }
    }

    fn parse(&self, raw_arguments: &str) -> Result<Box<dyn ToolInvocation>, ToolError> {
        let invalid = |reason: String| ToolError::InvalidArguments {
            tool: NAME.into(),
            reason,
        };
        let args: ExecShellArgs =
            serde_json::from_str(raw_arguments).map_err(|e| invalid(e.to_string()))?;
        if args.command.trim().is_empty() {
            return Err(invalid("command must not be empty".into()));
        }
        Ok(Box::new(ShellInvocation {
            shell_path: self.shell_path.clone(),
            args,
        }))
    }
}

struct ShellInvocation {
    shell_path: String,
    args: ExecShellArgs,
}

/// Error text returned when the run is cancelled.
pub const SHELL_CANCELLED: &str = "Command cancelled by user";

/// Copy lines from a child pipe into the shared buffer until EOF or an I/O
/// error. Invalid UTF-8 is replaced, never treated as the end of output.
async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>, buffer: Arc<Mutex<String>>) {
    let Some(pipe) = pipe else { return };
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();
    loop {
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if let Ok(mut buf) = buffer.lock()
                    && buf.len() < MAX_OUTPUT
                {
                    buf.push_str(&String::from_utf8_lossy(&line));
                }
                line.clear();
            }
            Err(e) => {
                tracing::debug!(error = %e, "exec_shell pipe read failed");
                break;
            }
        }
    }
}

#[async_trait::async_trait]
impl ToolInvocation for ShellInvocation {
    fn summary(&self) -> String {
        match &self.args.working_dir {
            Some(dir) => format!("$ {}  (in {dir})", self.args.command),
            None => format!("$ {}", self.args.command),
        }
    }

    async fn invoke(&self, cancel: CancellationToken) -> Result<String, String> {
        let mut cmd = tokio::process::Command::new(&self.shell_path);
        cmd.arg("-c")
            .arg(&self.args.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.args.working_dir {
            cmd.current_dir(PathBuf::from(dir));
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| format!("Failed to spawn {}: {e}", self.shell_path))?;

        let buffer = Arc::new(Mutex::new(String::new()));
        let stdout = drain(child.stdout.take(), buffer.clone());
        let stderr = drain(child.stderr.take(), buffer.clone());
        let run = async {
            tokio::join!(stdout, stderr);
            child.wait().await
        };

        // Dropping `child` on cancellation kills it (`kill_on_drop`).
        let status = tokio::select! {
            status = run => status.map_err(|e| format!("Failed to wait for command: {e}"))?,
            _ = cancel.cancelled() => {
                tracing::info!(command = %self.args.command, "exec_shell cancelled");
                return Err(SHELL_CANCELLED.to_string());
            }
        };
        let mut output = buffer.lock().map(|b| b.clone()).unwrap_or_default();
        if output.len() >= MAX_OUTPUT {
            output.push_str("\n[output truncated]");
        }
        tracing::debug!(command = %self.args.command, %status, bytes = output.len(), "exec_shell finished");

        if status.success() {
            Ok(output)
        } else {
            let reason = match status.code() {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_string(),
            };
            Ok(format!("Error: {reason}\n{output}"))
        }
    }
}
