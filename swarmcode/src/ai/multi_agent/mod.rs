//! Multi-agent execution
//!
//! Runs a batch of independent agent loops against one workspace.
//!
//! ## Execution modes
//!
//! - **sequential** - one agent at a time, in request order
//! - **parallel** - fixed chunks of `max_concurrent`, each chunk awaited as a whole
//! - **adaptive** - a worker pool that permanently drops to one-at-a-time once
//!   file conflicts reach [`orchestrator::ESCALATION_THRESHOLD`]
//!
//! ## File conflicts
//!
//! ```text
//! write_file(a.rs) by agent-1  -> claims a.rs
//! write_file(a.rs) by agent-2  -> refused, FileConflict{a.rs, [agent-1, agent-2]}
//! executor                     -> ConflictPolicy::resolve, releases a.rs
//! ```

pub mod conflicts;
pub mod orchestrator;
pub mod policy;
pub mod store;
pub mod tools;
pub mod types;

pub use conflicts::{ConflictTracker, FileClaim};
pub use orchestrator::{
    ExecutionOptions, ExecutorConfig, MultiAgentError, MultiAgentExecutor,
    DEFAULT_MAX_CONCURRENT, ESCALATION_THRESHOLD, OUTPUT_SEPARATOR,
};
pub use policy::{ConflictPolicy, DefaultConflictPolicy};
pub use store::OrchestrationStore;
pub use tools::SpawnAgentsTool;
pub use types::{
    AgentInstance, AgentSpawnConfig, AgentStatus, AgentSummary, ConflictResolution,
    ExecutionMode, FileConflict, MultiAgentRequest, MultiAgentResult,
};
