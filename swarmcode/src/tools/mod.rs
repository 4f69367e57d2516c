pub mod builtin;
pub mod permissions;
pub mod registry;
pub mod types;

pub use permissions::{
    AutoApproveGate, PermissionDecision, PermissionGate, PermissionKind, PermissionRequest,
    PolicyGate,
};
pub use registry::{Tool, ToolRegistry};
pub use types::{
    PropertySchema, ToolConfig, ToolContext, ToolDefinition, ToolGroup, ToolInputSchema,
    ToolProfile, ToolResult,
};

use crate::ai::multi_agent::{MultiAgentExecutor, SpawnAgentsTool};
use std::sync::Arc;

/// Register all built-in tools to a registry
fn register_all_tools(registry: &mut ToolRegistry) {
    // Filesystem tools
    registry.register(Arc::new(builtin::ReadFileTool::new()));
    registry.register(Arc::new(builtin::ListFilesTool::new()));
    registry.register(Arc::new(builtin::WriteFileTool::new()));
    registry.register(Arc::new(builtin::EditFileTool::new()));

    // Search tools
    registry.register(Arc::new(builtin::GlobTool::new()));
    registry.register(Arc::new(builtin::GrepTool::new()));

    // Exec tool
    registry.register(Arc::new(builtin::ExecTool::new()));
}

/// Create a new ToolRegistry with all built-in tools registered
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_all_tools(&mut registry);
    registry
}

/// Create a registry with specific configuration
pub fn create_registry_with_config(config: ToolConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::with_config(config);
    register_all_tools(&mut registry);
    registry
}

/// Registry for a parent agent: the built-in tools plus `spawn_agents`
/// backed by `executor`. The full profile is needed to expose the System group.
pub fn create_registry_with_spawn(executor: Arc<MultiAgentExecutor>) -> ToolRegistry {
    let mut registry = ToolRegistry::with_config(ToolConfig::with_profile(ToolProfile::Full));
    register_all_tools(&mut registry);
    registry.register(Arc::new(SpawnAgentsTool::new(executor)));
    registry
}
