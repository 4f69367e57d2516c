//! Shell command execution inside the workspace

use crate::tools::permissions::PermissionRequest;
use crate::tools::registry::Tool;
use crate::tools::types::{
    PropertySchema, ToolContext, ToolDefinition, ToolGroup, ToolInputSchema, ToolResult,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_TIMEOUT_SECS: u64 = 600;
/// Output kept from each of stdout/stderr
const MAX_OUTPUT_CHARS: usize = 30_000;

/// Programs that wait for a terminal and would hang the agent
const INTERACTIVE_PROGRAMS: &[&str] = &["vim", "vi", "nano", "emacs", "less", "more", "top", "htop"];

/// Substrings that are refused regardless of the permission gate
const DESTRUCTIVE_PATTERNS: &[&str] = &["rm -rf /", ":(){:|:&};:", "> /dev/sda", "mkfs."];

pub struct ExecTool {
    definition: ToolDefinition,
}

impl ExecTool {
    pub fn new() -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "command".to_string(),
            PropertySchema::string("Shell command to run from the workspace root"),
        );
        properties.insert(
            "timeout".to_string(),
            PropertySchema::integer("Timeout in seconds (max 600)")
                .with_default(json!(DEFAULT_TIMEOUT_SECS)),
        );
        properties.insert(
            "workdir".to_string(),
            PropertySchema::string("Subdirectory to run in, relative to the workspace root"),
        );

        ExecTool {
            definition: ToolDefinition {
                name: "exec".to_string(),
                description: "Run a non-interactive shell command and return its exit code, stdout and stderr. Use it for builds, tests and git.".to_string(),
                input_schema: ToolInputSchema {
                    schema_type: "object".to_string(),
                    properties,
                    required: vec!["command".to_string()],
                },
                group: ToolGroup::Exec,
            },
        }
    }

    /// Reason a command is refused before it reaches the shell
    fn refusal(command: &str) -> Option<String> {
        let trimmed = command.trim();
        if let Some(pattern) = DESTRUCTIVE_PATTERNS.iter().find(|p| trimmed.contains(**p)) {
            return Some(format!("Command contains destructive pattern: {}", pattern));
        }
        let program = trimmed.split_whitespace().next().unwrap_or_default();
        if INTERACTIVE_PROGRAMS.contains(&program) {
            return Some(format!("'{}' is interactive and cannot run here", program));
        }
        None
    }

    fn shell() -> (String, &'static str) {
        let shell = which::which("bash")
            .or_else(|_| which::which("sh"))
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| "sh".to_string());
        (shell, "-c")
    }
}

impl Default for ExecTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ExecParams {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    workdir: Option<String>,
}

fn truncate_output(s: &str) -> String {
    match s.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((idx, _)) => format!("{}\n... (output truncated)", &s[..idx]),
        None => s.to_string(),
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn permission_request(&self, params: &Value, _context: &ToolContext) -> Option<PermissionRequest> {
        let command = params.get("command")?.as_str()?;
        Some(PermissionRequest::shell(command, format!("Run `{}`", command)))
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> ToolResult {
        let params: ExecParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Invalid parameters: {}", e)),
        };

        if params.command.trim().is_empty() {
            return ToolResult::error("Command must not be empty");
        }
        if let Some(reason) = Self::refusal(&params.command) {
            log::warn!("[TOOLS] exec refused: {}", reason);
            return ToolResult::error(reason);
        }

        let workdir = match context.resolve_path(params.workdir.as_deref().unwrap_or(".")) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let timeout = Duration::from_secs(
            params
                .timeout
                .unwrap_or(DEFAULT_TIMEOUT_SECS)
                .clamp(1, MAX_TIMEOUT_SECS),
        );

        let (shell, flag) = Self::shell();
        log::info!("[TOOLS] exec in {}: {}", workdir.display(), params.command);

        let child = Command::new(&shell)
            .arg(flag)
            .arg(&params.command)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to spawn {}: {}", shell, e)),
        };

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::error(format!("Command failed to run: {}", e)),
            Err(_) => {
                return ToolResult::error(format!(
                    "Command timed out after {} seconds",
                    timeout.as_secs()
                ))
            }
        };

        let code = output.status.code();
        let stdout = truncate_output(&String::from_utf8_lossy(&output.stdout));
        let stderr = truncate_output(&String::from_utf8_lossy(&output.stderr));

        let mut text = format!(
            "Exit code: {}\n",
            code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
        );
        if !stdout.is_empty() {
            text.push_str(&format!("\nstdout:\n{}", stdout));
        }
        if !stderr.is_empty() {
            text.push_str(&format!("\nstderr:\n{}", stderr));
        }

        let metadata = json!({ "exit_code": code, "command": params.command });
        let result = if output.status.success() {
            ToolResult::success(text)
        } else {
            ToolResult::error(text)
        };
        result
            .with_title(format!("Ran {}", params.command))
            .with_metadata(metadata)
    }
}
