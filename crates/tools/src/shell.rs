//! Shell tool: the Command action.
//!
//! Runs one command line through the host shell, gated by a
//! [`CommandPolicy`]. Output is returned trimmed; a non-zero exit is a
//! failed result rather than an error, so the summarizer can explain it.

use async_trait::async_trait;
use rago_config::CommandPolicyConfig;
use rago_core::error::ToolError;
use rago_core::tool::{Tool, ToolResult};
use rago_security::{CommandPolicy, PolicyDecision};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const TOOL_NAME: &str = "executeCommand";

/// Execute shell commands with safety constraints.
pub struct ShellTool {
    policy: CommandPolicy,
    timeout: Option<Duration>,
}

impl ShellTool {
    pub fn new(policy: CommandPolicy) -> Self {
        Self {
            policy,
            timeout: None,
        }
    }

    pub fn from_config(config: &CommandPolicyConfig) -> Self {
        let tool = Self::new(CommandPolicy::from_config(config));
        match config.timeout_secs {
            Some(secs) => tool.with_timeout(Duration::from_secs(secs)),
            None => tool,
        }
    }

    /// Kill the command if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the child process with stderr folded into stdout, so the
    /// captured text keeps the order the command wrote it in.
    fn command_for(line: &str) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(format!("{line} 2>&1"));
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(format!("exec 2>&1\n{line}"));
            c
        };
        // Dropping the future (cancellation, timeout) must not leave the child running.
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Execute a command on the host and return its combined output. Use this to inspect the system or run command-line tools such as kubectl."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The full command line to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn marker_aliases(&self) -> &'static [&'static str] {
        &["Command"]
    }

    fn parse_marker_argument(&self, raw: &str) -> Option<serde_json::Value> {
        let raw = raw.trim();
        if raw.starts_with('{') {
            let value: serde_json::Value = serde_json::from_str(raw).ok()?;
            return value["command"].is_string().then_some(value);
        }

        let command = raw.trim_matches(|c| c == '`' || c == '"' || c == '\'').trim();
        if command.is_empty() {
            return None;
        }
        Some(serde_json::json!({ "command": command }))
    }

    fn describe_call(&self, arguments: &serde_json::Value) -> String {
        match arguments["command"].as_str() {
            Some(command) => command.to_string(),
            None => format!("{TOOL_NAME} {arguments}"),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        if let PolicyDecision::Denied { reason, .. } = self.policy.check(command) {
            warn!(command = %command, reason = %reason, "Command blocked by policy");
            return Err(ToolError::PermissionDenied {
                tool_name: TOOL_NAME.into(),
                reason,
            });
        }

        debug!(command = %command, "Executing shell command");

        let run = Self::command_for(command).output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| ToolError::Timeout {
                tool_name: TOOL_NAME.into(),
                timeout_secs: limit.as_secs(),
            })?,
            None => run.await,
        };

        match output {
            Ok(output) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                // Only the shell's own diagnostics can still land here.
                combined.push_str(&String::from_utf8_lossy(&output.stderr));

                if output.status.success() {
                    Ok(ToolResult::ok(combined.trim()))
                } else {
                    let code = output.status.code().unwrap_or(-1);
                    warn!(command = %command, exit_code = code, "Command failed");
                    let text = format!("[exit code: {code}]\n{combined}");
                    Ok(ToolResult::failed(text.trim(), format!("exit status {code}")))
                }
            }
            Err(e) => Err(ToolError::ExecutionFailed {
                tool_name: TOOL_NAME.into(),
                reason: e.to_string(),
            }),
        }
    }
}
