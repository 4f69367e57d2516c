//! `spawn_agents`: lets a parent agent delegate a batch of subtasks

use super::orchestrator::{ExecutionOptions, MultiAgentExecutor, SPAWN_TOOL_NAME};
use super::store::OrchestrationStore;
use super::types::{AgentSpawnConfig, AgentStatus, ExecutionMode, MultiAgentRequest, MultiAgentResult};
use crate::ai::types::ModelTier;
use crate::tools::registry::Tool;
use crate::tools::{PropertySchema, ToolContext, ToolDefinition, ToolGroup, ToolInputSchema, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub struct SpawnAgentsTool {
    definition: ToolDefinition,
    executor: Arc<MultiAgentExecutor>,
}

impl SpawnAgentsTool {
    pub fn new(executor: Arc<MultiAgentExecutor>) -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "tasks".to_string(),
            PropertySchema::array_of(
                "Independent subtasks, one per agent. Each must be self-contained.",
                PropertySchema::string("Task description"),
            ),
        );
        properties.insert(
            "tier".to_string(),
            PropertySchema::string("Capability tier for every spawned agent")
                .with_enum(&["fast", "balanced", "thorough"])
                .with_default(json!("balanced")),
        );
        properties.insert(
            "mode".to_string(),
            PropertySchema::string("How to schedule the agents")
                .with_enum(&["sequential", "parallel", "adaptive"])
                .with_default(json!("adaptive")),
        );
        properties.insert(
            "conflict_strategy".to_string(),
            PropertySchema::string("What to do when two agents write the same file")
                .with_enum(&["first_writer_wins", "last_writer_wins", "manual"])
                .with_default(json!("first_writer_wins")),
        );
        properties.insert(
            "context_files".to_string(),
            PropertySchema::array_of(
                "Files every agent should read first",
                PropertySchema::string("Workspace-relative path"),
            ),
        );

        SpawnAgentsTool {
            definition: ToolDefinition {
                name: SPAWN_TOOL_NAME.to_string(),
                description: "Run several coding agents on related subtasks and return their combined output. Use for work that splits cleanly into independent parts.".to_string(),
                input_schema: ToolInputSchema {
                    schema_type: "object".to_string(),
                    properties,
                    required: vec!["tasks".to_string()],
                },
                group: ToolGroup::System,
            },
            executor,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpawnAgentsParams {
    tasks: Vec<String>,
    #[serde(default)]
    tier: ModelTier,
    #[serde(default)]
    mode: ExecutionMode,
    #[serde(default)]
    conflict_strategy: Option<String>,
    #[serde(default)]
    context_files: Vec<String>,
}

fn format_report(result: &MultiAgentResult) -> String {
    let mut report = format!(
        "{} of {} agent(s) succeeded ({} failed, {} cancelled) in {:.1}s",
        result.successful,
        result.agents.len(),
        result.failed,
        result.cancelled,
        result.total_duration.as_secs_f64()
    );
    for agent in result.agents.iter().filter(|a| a.status != AgentStatus::Completed) {
        report.push_str(&format!(
            "\n- {} [{}]: {}",
            agent.task,
            agent.status,
            agent.error.as_deref().unwrap_or("no output")
        ));
    }
    let unresolved: Vec<String> = result
        .unresolved_conflicts()
        .map(|c| c.path.display().to_string())
        .collect();
    if !unresolved.is_empty() {
        report.push_str(&format!("\nUnresolved file conflicts: {}", unresolved.join(", ")));
    }
    if !result.output.is_empty() {
        report.push_str("\n\n");
        report.push_str(&result.output);
    }
    report
}

#[async_trait]
impl Tool for SpawnAgentsTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> ToolResult {
        let params: SpawnAgentsParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Invalid parameters: {}", e)),
        };

        let agents = params
            .tasks
            .into_iter()
            .map(|task| {
                AgentSpawnConfig::new(task)
                    .with_tier(params.tier)
                    .with_context_files(params.context_files.clone())
            })
            .collect();
        let mut request = MultiAgentRequest::new(agents, params.mode);
        if let Some(strategy) = params.conflict_strategy {
            request = request.with_strategy(strategy);
        }

        log::info!(
            "[MULTI_AGENT] {} delegating {} task(s) in {} mode",
            context.agent_id.as_deref().unwrap_or("agent"),
            request.agents.len(),
            request.mode
        );

        let store = OrchestrationStore::new();
        let options = ExecutionOptions::default().with_cancel(context.cancel.child_token());
        let result = match self.executor.execute_multi_agent(request, &store, options).await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let metadata = serde_json::to_value(&result).unwrap_or_default();
        context.emit_metadata(SPAWN_TOOL_NAME, metadata.clone());

        let report = format_report(&result);
        let tool_result = if result.successful > 0 {
            ToolResult::success(report)
        } else {
            ToolResult::error(report)
        };
        tool_result
            .with_title(format!("Spawned {} agent(s)", result.agents.len()))
            .with_metadata(metadata)
    }
}
