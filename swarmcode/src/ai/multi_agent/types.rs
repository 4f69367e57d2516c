//! Multi-agent batch types

use crate::ai::types::{ModelTier, Usage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Reason recorded on agents stopped by the abort signal
pub const ABORT_REASON: &str = "execution aborted";

/// What one agent should do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpawnConfig {
    pub task: String,
    #[serde(default)]
    pub tier: ModelTier,
    /// Workspace-relative files the agent should look at first
    #[serde(default)]
    pub context_files: Vec<String>,
    /// Replaces the default system prompt entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl AgentSpawnConfig {
    pub fn new(task: impl Into<String>) -> Self {
        AgentSpawnConfig {
            task: task.into(),
            tier: ModelTier::default(),
            context_files: Vec::new(),
            system_prompt: None,
        }
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_context_files(mut self, files: Vec<String>) -> Self {
        self.context_files = files;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.task.trim().is_empty() {
            return Err("task must not be empty".to_string());
        }
        if self.context_files.iter().any(|f| f.trim().is_empty()) {
            return Err("context file paths must not be empty".to_string());
        }
        if let Some(ref prompt) = self.system_prompt {
            if prompt.trim().is_empty() {
                return Err("system prompt override must not be blank".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Error | AgentStatus::Cancelled
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Pending => write!(f, "pending"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Completed => write!(f, "completed"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What an agent produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the agent ran out of iterations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub iterations: usize,
    pub tool_calls: usize,
    #[serde(default)]
    pub usage: Usage,
}

impl AgentOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        AgentOutcome {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// One agent inside a batch
#[derive(Debug, Clone, Serialize)]
pub struct AgentInstance {
    pub id: String,
    /// Position in the request, used for output ordering
    pub index: usize,
    pub config: AgentSpawnConfig,
    pub status: AgentStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<AgentOutcome>,
    #[serde(skip)]
    started: Option<Instant>,
    #[serde(skip)]
    finished: Option<Instant>,
}

impl AgentInstance {
    pub fn new(index: usize, config: AgentSpawnConfig) -> Self {
        AgentInstance {
            id: format!("agent-{}", Uuid::new_v4()),
            index,
            config,
            status: AgentStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            started: None,
            finished: None,
        }
    }

    /// pending -> running. Returns false for any other starting state.
    pub fn mark_running(&mut self) -> bool {
        if self.status != AgentStatus::Pending {
            return false;
        }
        self.status = AgentStatus::Running;
        self.started_at = Some(Utc::now());
        self.started = Some(Instant::now());
        true
    }

    /// Move to a terminal status. Terminal instances are never changed again.
    pub fn finish(&mut self, status: AgentStatus, outcome: AgentOutcome) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.finished = Some(Instant::now());
        self.result = Some(outcome);
        true
    }

    /// Run interval as monotonic instants, when the agent actually ran
    pub fn run_interval(&self) -> Option<(Instant, Instant)> {
        Some((self.started?, self.finished?))
    }

    pub fn duration(&self) -> Duration {
        match (self.started, self.finished) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    pub fn summary(&self) -> AgentSummary {
        let result = self.result.as_ref();
        AgentSummary {
            id: self.id.clone(),
            task: self.config.task.clone(),
            status: self.status,
            duration: self.duration(),
            run_interval: self.run_interval(),
            iterations: result.map(|r| r.iterations).unwrap_or(0),
            tool_calls: result.map(|r| r.tool_calls).unwrap_or(0),
            error: result.and_then(|r| r.error.clone()),
            warning: result.and_then(|r| r.warning.clone()),
        }
    }
}

/// How the agents of one batch are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One at a time, in request order
    Sequential,
    /// Fixed chunks of `max_concurrent`, each chunk awaited as a whole
    Parallel,
    /// Worker pool that drops to one-at-a-time once contention builds up
    #[default]
    Adaptive,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Adaptive => write!(f, "adaptive"),
        }
    }
}

fn default_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_strategy() -> String {
    "first_writer_wins".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiAgentRequest {
    #[serde(default = "default_request_id")]
    pub id: String,
    pub agents: Vec<AgentSpawnConfig>,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Falls back to the executor's configured bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
    #[serde(default = "default_strategy")]
    pub conflict_strategy: String,
}

impl MultiAgentRequest {
    pub fn new(agents: Vec<AgentSpawnConfig>, mode: ExecutionMode) -> Self {
        MultiAgentRequest {
            id: default_request_id(),
            agents,
            mode,
            max_concurrent: None,
            conflict_strategy: default_strategy(),
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.conflict_strategy = strategy.into();
        self
    }
}

/// Contention on one path between concurrently running agents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConflict {
    pub id: String,
    pub path: PathBuf,
    /// Owner first, then every agent that was refused
    pub agents: Vec<String>,
    pub detected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}

impl FileConflict {
    pub fn new(path: PathBuf, owner: &str, contender: &str) -> Self {
        FileConflict {
            id: Uuid::new_v4().to_string(),
            path,
            agents: vec![owner.to_string(), contender.to_string()],
            detected_at: Utc::now(),
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.as_ref().map(|r| r.resolved).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub strategy: String,
    pub resolved: bool,
    /// Agent whose write stands, if the strategy picked one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    pub note: String,
}

/// Per-agent line in the batch result
#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub task: String,
    pub status: AgentStatus,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Monotonic start and end, for agents that ran
    #[serde(skip)]
    pub run_interval: Option<(Instant, Instant)>,
    pub iterations: usize,
    pub tool_calls: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiAgentResult {
    pub request_id: String,
    pub mode: ExecutionMode,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub conflicts: Vec<FileConflict>,
    /// Wall clock for the whole batch
    #[serde(rename = "total_duration_ms", serialize_with = "serialize_millis")]
    pub total_duration: Duration,
    /// Successful outputs in spawn order
    pub output: String,
    pub agents: Vec<AgentSummary>,
    pub usage: Usage,
    /// Adaptive mode dropped to one-at-a-time execution
    pub escalated: bool,
}

impl MultiAgentResult {
    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &FileConflict> {
        self.conflicts.iter().filter(|c| !c.is_resolved())
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_transitions_are_monotonic() {
        let mut instance = AgentInstance::new(0, AgentSpawnConfig::new("fix the bug"));
        assert!(instance.mark_running());
        assert!(!instance.mark_running());
        assert!(instance.finish(AgentStatus::Completed, AgentOutcome::default()));
        assert!(!instance.finish(AgentStatus::Error, AgentOutcome::failed("late")));
        assert_eq!(instance.status, AgentStatus::Completed);
        assert!(!instance.mark_running());
    }

    #[test]
    fn test_pending_can_be_cancelled_directly() {
        let mut instance = AgentInstance::new(0, AgentSpawnConfig::new("never ran"));
        assert!(instance.finish(AgentStatus::Cancelled, AgentOutcome::failed(ABORT_REASON)));
        assert!(instance.run_interval().is_none());
        assert_eq!(instance.duration(), Duration::ZERO);
    }

    #[test]
    fn test_spawn_config_validation() {
        assert!(AgentSpawnConfig::new("task").validate().is_ok());
        assert!(AgentSpawnConfig::new("  ").validate().is_err());
        assert!(AgentSpawnConfig::new("task")
            .with_context_files(vec!["".to_string()])
            .validate()
            .is_err());
        assert!(AgentSpawnConfig::new("task")
            .with_system_prompt(" ")
            .validate()
            .is_err());
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: MultiAgentRequest =
            serde_json::from_str(r#"{"agents":[{"task":"a"},{"task":"b","tier":"thorough"}]}"#)
                .unwrap();
        assert_eq!(request.mode, ExecutionMode::Adaptive);
        assert_eq!(request.conflict_strategy, "first_writer_wins");
        assert_eq!(request.agents[1].tier, ModelTier::Thorough);
        assert!(!request.id.is_empty());
    }
}
