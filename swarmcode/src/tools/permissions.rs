//! Permission gate for side-effecting tools
//!
//! Every shell command and file write is described as a [`PermissionRequest`]
//! and passed through a [`PermissionGate`] before the tool runs. A denial is
//! never fatal: the agent loop turns it into a failed tool result so the
//! model can pick another approach.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of side effect being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    Shell,
    FileWrite,
}

impl std::fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionKind::Shell => write!(f, "shell"),
            PermissionKind::FileWrite => write!(f, "file_write"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub kind: PermissionKind,
    /// Command line for shell requests, resolved path for file writes
    pub target: String,
    pub description: String,
    /// Resolved path for file writes, used for conflict tracking
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl PermissionRequest {
    pub fn shell(command: impl Into<String>, description: impl Into<String>) -> Self {
        PermissionRequest {
            kind: PermissionKind::Shell,
            target: command.into(),
            description: description.into(),
            path: None,
        }
    }

    pub fn file_write(path: PathBuf, description: impl Into<String>) -> Self {
        PermissionRequest {
            kind: PermissionKind::FileWrite,
            target: path.to_string_lossy().to_string(),
            description: description.into(),
            path: Some(path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PermissionDecision {
    pub fn allow() -> Self {
        PermissionDecision {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        PermissionDecision {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Decide whether the side effect may happen. `auto_approve` comes from
    /// the tool context of the calling agent.
    async fn authorize(&self, request: &PermissionRequest, auto_approve: bool) -> PermissionDecision;
}

/// Allows everything
#[derive(Debug, Default)]
pub struct AutoApproveGate;

#[async_trait]
impl PermissionGate for AutoApproveGate {
    async fn authorize(&self, _request: &PermissionRequest, _auto_approve: bool) -> PermissionDecision {
        PermissionDecision::allow()
    }
}

/// Rule-based gate: shell deny patterns, optional read-only mode, and an
/// approval requirement that only `auto_approve` contexts satisfy.
#[derive(Debug, Clone)]
pub struct PolicyGate {
    /// Glob-style command patterns (`*` any run, `?` one char) that are always refused
    pub denied_commands: Vec<String>,
    /// Refuse every file write
    pub read_only: bool,
    /// Require auto-approval for shell commands
    pub require_approval_for_shell: bool,
}

impl Default for PolicyGate {
    fn default() -> Self {
        PolicyGate {
            denied_commands: vec![
                "rm -rf /*".to_string(),
                "rm -rf ~*".to_string(),
                "mkfs*".to_string(),
                "dd if=*".to_string(),
                "shutdown*".to_string(),
                "reboot*".to_string(),
                ":(){*".to_string(),
            ],
            read_only: false,
            require_approval_for_shell: false,
        }
    }
}

impl PolicyGate {
    pub fn read_only() -> Self {
        PolicyGate {
            read_only: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PermissionGate for PolicyGate {
    async fn authorize(&self, request: &PermissionRequest, auto_approve: bool) -> PermissionDecision {
        match request.kind {
            PermissionKind::FileWrite => {
                if self.read_only {
                    return PermissionDecision::deny(format!(
                        "Workspace is read-only; cannot write {}",
                        request.target
                    ));
                }
                PermissionDecision::allow()
            }
            PermissionKind::Shell => {
                if let Some(pattern) = self
                    .denied_commands
                    .iter()
                    .find(|p| matches_pattern(&request.target, p))
                {
                    return PermissionDecision::deny(format!(
                        "Command '{}' matches forbidden pattern '{}'",
                        request.target, pattern
                    ));
                }
                if self.require_approval_for_shell && !auto_approve {
                    return PermissionDecision::deny(format!(
                        "Command '{}' requires approval",
                        request.target
                    ));
                }
                PermissionDecision::allow()
            }
        }
    }
}

/// Check if a command matches a glob pattern (`*` any run of characters, `?` one character)
pub fn matches_pattern(command: &str, pattern: &str) -> bool {
    let command: Vec<char> = command.trim().chars().collect();
    let pattern: Vec<char> = pattern.trim().chars().collect();

    // Iterative wildcard match with single-star backtracking
    let (mut c, mut p) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_c = 0usize;
    while c < command.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == command[c]) {
            c += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_c = c;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            star_c += 1;
            c = star_c;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
