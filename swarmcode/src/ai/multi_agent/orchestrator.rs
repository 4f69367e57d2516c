//! Multi-agent executor - runs a batch of agent loops under one execution mode

use super::conflicts::{ConflictTracker, FileClaim};
use super::policy::{ConflictPolicy, DefaultConflictPolicy};
use super::store::OrchestrationStore;
use super::types::{
    AgentInstance, AgentOutcome, AgentStatus, ConflictResolution, ExecutionMode, FileConflict,
    MultiAgentRequest, MultiAgentResult, ABORT_REASON,
};
use crate::ai::agent_loop::{
    run_agent_loop, AgentHooks, AgentLoopOptions, AgentResult, NoopHooks, Termination,
    MAX_TOOL_ITERATIONS,
};
use crate::ai::types::{TierModels, Usage};
use crate::ai::{ChatProvider, PromptBuilder};
use crate::tools::permissions::PermissionGate;
use crate::tools::{ToolConfig, ToolContext, ToolRegistry};
use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Concurrency bound when neither request nor config sets one
pub const DEFAULT_MAX_CONCURRENT: usize = 3;
/// Conflicts after which adaptive mode drops to one agent at a time
pub const ESCALATION_THRESHOLD: usize = 2;
/// Agent-count ceiling per request
pub const DEFAULT_MAX_AGENTS: usize = 10;
/// Joins successful agent outputs
pub const OUTPUT_SEPARATOR: &str = "\n\n---\n\n";
/// Tool name children never receive
pub const SPAWN_TOOL_NAME: &str = "spawn_agents";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultiAgentError {
    #[error("Multi-agent request contains no agents")]
    NoAgents,
    #[error("Multi-agent request has {count} agents, exceeding the configured maximum of {max}")]
    TooManyAgents { count: usize, max: usize },
    #[error("Invalid spawn config for agent {index}: {reason}")]
    InvalidAgent { index: usize, reason: String },
    #[error("max_concurrent must be at least 1")]
    InvalidConcurrency,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_agents: usize,
    pub max_concurrent: usize,
    pub max_iterations: usize,
    pub workspace_dir: PathBuf,
    pub auto_approve: bool,
    pub models: TierModels,
    /// Base tool access for every child agent
    pub tool_config: ToolConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            max_agents: DEFAULT_MAX_AGENTS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_iterations: MAX_TOOL_ITERATIONS,
            workspace_dir: PathBuf::from("."),
            auto_approve: false,
            models: TierModels::default(),
            tool_config: ToolConfig::default(),
        }
    }
}

/// Per-call knobs
#[derive(Clone, Default)]
pub struct ExecutionOptions {
    /// Abort signal for the whole batch
    pub cancel: CancellationToken,
    pub hooks: Option<Arc<dyn AgentHooks>>,
    /// Tracker to use instead of a fresh one
    pub tracker: Option<Arc<ConflictTracker>>,
}

impl ExecutionOptions {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<ConflictTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }
}

pub struct MultiAgentExecutor {
    provider: Arc<dyn ChatProvider>,
    tools: Arc<ToolRegistry>,
    gate: Arc<dyn PermissionGate>,
    prompt_builder: Arc<dyn PromptBuilder>,
    policy: Arc<dyn ConflictPolicy>,
    config: ExecutorConfig,
}

impl MultiAgentExecutor {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        tools: Arc<ToolRegistry>,
        gate: Arc<dyn PermissionGate>,
        prompt_builder: Arc<dyn PromptBuilder>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            gate,
            prompt_builder,
            policy: Arc::new(DefaultConflictPolicy),
            config,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn ConflictPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Check a request before anything is created for it
    pub fn validate(&self, request: &MultiAgentRequest) -> Result<usize, MultiAgentError> {
        if request.agents.is_empty() {
            return Err(MultiAgentError::NoAgents);
        }
        if request.agents.len() > self.config.max_agents {
            return Err(MultiAgentError::TooManyAgents {
                count: request.agents.len(),
                max: self.config.max_agents,
            });
        }
        for (index, agent) in request.agents.iter().enumerate() {
            agent
                .validate()
                .map_err(|reason| MultiAgentError::InvalidAgent { index, reason })?;
        }
        let max_concurrent = request.max_concurrent.unwrap_or(self.config.max_concurrent);
        if max_concurrent == 0 {
            return Err(MultiAgentError::InvalidConcurrency);
        }
        Ok(max_concurrent)
    }

    /// Run every agent of `request` under its execution mode.
    ///
    /// Fails only on request validation. Per-agent failures are reported in
    /// the result. All file locks are cleared and the request is removed from
    /// `store` before this returns, on every path including validation errors.
    pub async fn execute_multi_agent(
        &self,
        request: MultiAgentRequest,
        store: &OrchestrationStore,
        options: ExecutionOptions,
    ) -> Result<MultiAgentResult, MultiAgentError> {
        let tracker = options
            .tracker
            .clone()
            .unwrap_or_else(|| Arc::new(ConflictTracker::new()));
        let mut cleanup = CleanupGuard {
            store,
            tracker: tracker.clone(),
            request_id: None,
        };

        let max_concurrent = self.validate(&request)?;
        let started = Instant::now();

        let request_id = request.id.clone();
        let mode = request.mode;
        let strategy = request.conflict_strategy.clone();
        let agent_count = request.agents.len();
        let instances: Vec<AgentInstance> = request
            .agents
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, config)| AgentInstance::new(index, config))
            .collect();

        log::info!(
            "[MULTI_AGENT] Request {}: {} agent(s), mode {}, max_concurrent {}",
            request_id,
            agent_count,
            mode,
            max_concurrent
        );

        store.insert(request, instances);
        cleanup.request_id = Some(request_id.clone());

        let batch = BatchRun {
            executor: self,
            store,
            request_id: request_id.clone(),
            strategy,
            tracker,
            cancel: options.cancel.clone(),
            hooks: options
                .hooks
                .clone()
                .unwrap_or_else(|| Arc::new(NoopHooks) as Arc<dyn AgentHooks>),
            conflicts: Mutex::new(Vec::new()),
        };

        let escalated = match mode {
            ExecutionMode::Sequential => {
                batch.run_sequential(agent_count).await;
                false
            }
            ExecutionMode::Parallel => {
                batch.run_parallel(agent_count, max_concurrent).await;
                false
            }
            ExecutionMode::Adaptive => batch.run_adaptive(agent_count, max_concurrent).await,
        };

        batch.resolve_new_conflicts();
        batch.cancel_unstarted();

        let instances = store.instances(&request_id);
        let conflicts = batch.conflicts.into_inner();
        let result = aggregate(
            &request_id,
            mode,
            &instances,
            conflicts,
            started.elapsed(),
            escalated,
        );

        log::info!(
            "[MULTI_AGENT] Request {} finished in {:?}: {} succeeded, {} failed, {} cancelled, {} conflict(s)",
            request_id,
            result.total_duration,
            result.successful,
            result.failed,
            result.cancelled,
            result.conflicts.len()
        );

        Ok(result)
    }
}

/// Releases request-scoped state on every exit path
struct CleanupGuard<'a> {
    store: &'a OrchestrationStore,
    tracker: Arc<ConflictTracker>,
    /// Set once the request is in the store
    request_id: Option<String>,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.tracker.clear_all_locks();
        if let Some(ref id) = self.request_id {
            self.store.remove(id);
        }
    }
}

/// State for one `execute_multi_agent` call
struct BatchRun<'a> {
    executor: &'a MultiAgentExecutor,
    store: &'a OrchestrationStore,
    request_id: String,
    strategy: String,
    tracker: Arc<ConflictTracker>,
    cancel: CancellationToken,
    hooks: Arc<dyn AgentHooks>,
    /// Conflicts handed to the policy so far
    conflicts: Mutex<Vec<FileConflict>>,
}

impl BatchRun<'_> {
    async fn run_sequential(&self, count: usize) {
        for index in 0..count {
            if self.cancel.is_cancelled() {
                log::info!("[MULTI_AGENT] Aborted before agent {}", index);
                break;
            }
            self.run_agent(index).await;
            self.resolve_new_conflicts();
        }
    }

    async fn run_parallel(&self, count: usize, chunk_size: usize) {
        let indices: Vec<usize> = (0..count).collect();
        for chunk in indices.chunks(chunk_size) {
            if self.cancel.is_cancelled() {
                log::info!("[MULTI_AGENT] Aborted before chunk starting at agent {}", chunk[0]);
                break;
            }
            log::debug!("[MULTI_AGENT] Starting chunk {:?}", chunk);
            join_all(chunk.iter().map(|&index| self.run_agent(index))).await;
            self.resolve_new_conflicts();
        }
    }

    /// Worker pool that escalates to one-at-a-time once conflicts pile up.
    /// Returns whether escalation happened.
    async fn run_adaptive(&self, count: usize, max_concurrent: usize) -> bool {
        let mut queue: VecDeque<usize> = (0..count).collect();
        let mut in_flight = FuturesUnordered::new();
        let mut conflict_count = 0usize;
        let mut escalated = false;

        loop {
            // After escalation nothing starts until the pool is empty
            let limit = if escalated { 1 } else { max_concurrent };
            while in_flight.len() < limit && !self.cancel.is_cancelled() {
                let Some(index) = queue.pop_front() else {
                    break;
                };
                in_flight.push(self.run_agent(index));
            }

            if in_flight.next().await.is_none() {
                break;
            }

            conflict_count += self.resolve_new_conflicts();
            if !escalated && conflict_count >= ESCALATION_THRESHOLD {
                escalated = true;
                log::warn!(
                    "[MULTI_AGENT] {} conflict(s) detected, running remaining {} agent(s) one at a time",
                    conflict_count,
                    queue.len()
                );
            }
        }

        escalated
    }

    /// Full lifecycle of one instance. Always leaves it terminal and its locks released.
    async fn run_agent(&self, index: usize) -> usize {
        let Some(instance) = self.store.instance(&self.request_id, index) else {
            return index;
        };

        if self.cancel.is_cancelled() {
            self.finish(index, AgentStatus::Cancelled, AgentOutcome::failed(ABORT_REASON));
            return index;
        }

        let mut marked = false;
        self.store.update_instance(&self.request_id, index, |i| {
            marked = i.mark_running();
        });
        if !marked {
            return index;
        }

        let executor = self.executor;
        let config = &executor.config;
        let claim = FileClaim::new(self.tracker.clone(), instance.id.clone());
        let context = ToolContext::new()
            .with_session(self.request_id.clone())
            .with_agent(instance.id.clone())
            .with_workspace(config.workspace_dir.clone())
            .with_context_files(instance.config.context_files.clone())
            .with_auto_approve(config.auto_approve)
            .with_cancel(self.cancel.child_token())
            .with_file_claim(claim.clone());
        let model = config.models.model_for(instance.config.tier).to_string();

        log::info!(
            "[MULTI_AGENT] Starting {} ({} tier, model {}): {}",
            instance.id,
            instance.config.tier,
            model,
            instance.config.task
        );

        let run = async {
            let messages = executor.prompt_builder.build(&instance.config, &context).await;
            let options = AgentLoopOptions::new(
                executor.provider.clone(),
                executor.tools.clone(),
                executor.gate.clone(),
                context.clone(),
            )
            .with_model(model)
            .with_max_iterations(config.max_iterations)
            .with_tool_config(config.tool_config.clone().denying(SPAWN_TOOL_NAME))
            .with_hooks(self.hooks.clone());
            run_agent_loop(messages, options).await
        };

        let (status, outcome) = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => outcome_from_result(result),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::warn!("[MULTI_AGENT] {} panicked: {}", instance.id, message);
                (
                    AgentStatus::Error,
                    AgentOutcome::failed(format!("Agent panicked: {}", message)),
                )
            }
        };

        claim.release();
        log::info!("[MULTI_AGENT] {} finished: {}", instance.id, status);
        self.finish(index, status, outcome);
        index
    }

    fn finish(&self, index: usize, status: AgentStatus, outcome: AgentOutcome) {
        self.store.update_instance(&self.request_id, index, |i| {
            i.finish(status, outcome);
        });
    }

    /// Hand new conflicts to the policy and free their paths. Returns how many were new.
    fn resolve_new_conflicts(&self) -> usize {
        let pending = self.tracker.take_pending_conflicts();
        let count = pending.len();
        for mut conflict in pending {
            let resolution = match self.executor.policy.resolve(&conflict, &self.strategy) {
                Ok(resolution) => resolution,
                Err(e) => {
                    log::warn!(
                        "[CONFLICTS] Policy failed for {}: {}",
                        conflict.path.display(),
                        e
                    );
                    ConflictResolution {
                        strategy: self.strategy.clone(),
                        resolved: false,
                        winner: None,
                        note: e,
                    }
                }
            };
            if !resolution.resolved {
                log::warn!(
                    "[CONFLICTS] {} left unresolved: {}",
                    conflict.path.display(),
                    resolution.note
                );
            }
            conflict.resolution = Some(resolution);
            self.tracker.release_path(&conflict.path);
            self.conflicts.lock().push(conflict);
        }
        count
    }

    /// Agents that never started end as cancelled
    fn cancel_unstarted(&self) {
        for instance in self.store.instances(&self.request_id) {
            if instance.status == AgentStatus::Pending {
                self.finish(
                    instance.index,
                    AgentStatus::Cancelled,
                    AgentOutcome::failed(ABORT_REASON),
                );
            }
        }
    }
}

fn outcome_from_result(result: AgentResult) -> (AgentStatus, AgentOutcome) {
    let outcome = AgentOutcome {
        output: result.final_response,
        error: result.error,
        warning: result.warning,
        iterations: result.iterations,
        tool_calls: result.tool_calls.len(),
        usage: result.usage,
    };
    match result.termination {
        Termination::Completed | Termination::MaxIterations => (AgentStatus::Completed, outcome),
        Termination::ProviderError => (AgentStatus::Error, outcome),
        Termination::Cancelled => (
            AgentStatus::Cancelled,
            AgentOutcome {
                error: Some(ABORT_REASON.to_string()),
                ..outcome
            },
        ),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn aggregate(
    request_id: &str,
    mode: ExecutionMode,
    instances: &[AgentInstance],
    conflicts: Vec<FileConflict>,
    total_duration: std::time::Duration,
    escalated: bool,
) -> MultiAgentResult {
    let count = |status: AgentStatus| instances.iter().filter(|i| i.status == status).count();

    let mut ordered: Vec<&AgentInstance> = instances.iter().collect();
    ordered.sort_by_key(|i| i.index);

    let output = ordered
        .iter()
        .filter(|i| i.status == AgentStatus::Completed)
        .filter_map(|i| i.result.as_ref())
        .map(|r| r.output.as_str())
        .collect::<Vec<_>>()
        .join(OUTPUT_SEPARATOR);

    let mut usage = Usage::default();
    for result in instances.iter().filter_map(|i| i.result.as_ref()) {
        usage.add(&result.usage);
    }

    MultiAgentResult {
        request_id: request_id.to_string(),
        mode,
        successful: count(AgentStatus::Completed),
        failed: count(AgentStatus::Error),
        cancelled: count(AgentStatus::Cancelled),
        conflicts,
        total_duration,
        output,
        agents: ordered.iter().map(|i| i.summary()).collect(),
        usage,
        escalated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::mock::{ScriptedProvider, Step};
    use crate::ai::types::ModelTier;
    use crate::ai::{AiResponse, DefaultPromptBuilder, ToolCall};
    use crate::ai::multi_agent::types::AgentSpawnConfig;
    use crate::tools::permissions::AutoApproveGate;
    use crate::tools::create_default_registry;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    fn executor(provider: Arc<ScriptedProvider>, workspace: &Path) -> MultiAgentExecutor {
        MultiAgentExecutor::new(
            provider,
            Arc::new(create_default_registry()),
            Arc::new(AutoApproveGate),
            Arc::new(DefaultPromptBuilder),
            ExecutorConfig {
                workspace_dir: workspace.to_path_buf(),
                ..Default::default()
            },
        )
    }

    fn request(tasks: &[&str], mode: ExecutionMode) -> MultiAgentRequest {
        MultiAgentRequest::new(
            tasks.iter().map(|t| AgentSpawnConfig::new(*t)).collect(),
            mode,
        )
    }

    fn reply_after(text: &str, ms: u64) -> Vec<Step> {
        vec![Step::reply(AiResponse::text(text)).after(Duration::from_millis(ms))]
    }

    fn write_call(id: &str, path: &str) -> ToolCall {
        ToolCall::new(id, "write_file", json!({"path": path, "content": id}))
    }

    #[tokio::test]
    async fn test_rejects_invalid_requests() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(Arc::new(ScriptedProvider::single(vec![])), dir.path());
        let store = OrchestrationStore::new();

        let err = exec
            .execute_multi_agent(request(&[], ExecutionMode::Parallel), &store, ExecutionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, MultiAgentError::NoAgents);

        let tasks: Vec<String> = (0..11).map(|i| format!("task {}", i)).collect();
        let refs: Vec<&str> = tasks.iter().map(|s| s.as_str()).collect();
        let err = exec
            .execute_multi_agent(request(&refs, ExecutionMode::Parallel), &store, ExecutionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, MultiAgentError::TooManyAgents { count: 11, max: 10 });
        assert!(err.to_string().contains("maximum of 10"));

        let err = exec
            .execute_multi_agent(
                request(&["a"], ExecutionMode::Parallel).with_max_concurrent(0),
                &store,
                ExecutionOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, MultiAgentError::InvalidConcurrency);

        let err = exec
            .execute_multi_agent(request(&["a", " "], ExecutionMode::Sequential), &store, ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MultiAgentError::InvalidAgent { index: 1, .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_validation_error_still_clears_injected_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(Arc::new(ScriptedProvider::single(vec![])), dir.path());
        let tracker = Arc::new(ConflictTracker::new());
        tracker.acquire(Path::new("/stale/lock"), "agent-gone").unwrap();
        let store = OrchestrationStore::new();

        let err = exec
            .execute_multi_agent(
                request(&[], ExecutionMode::Adaptive),
                &store,
                ExecutionOptions::default().with_tracker(tracker.clone()),
            )
            .await
            .unwrap_err();

        assert_eq!(err, MultiAgentError::NoAgents);
        assert_eq!(tracker.lock_count(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_runs_one_at_a_time_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::by_task(vec![
            ("alpha", reply_after("alpha out", 30)),
            ("beta", reply_after("beta out", 10)),
            ("gamma", reply_after("gamma out", 20)),
        ]));
        let tracker = Arc::new(ConflictTracker::new());
        let store = OrchestrationStore::new();
        let result = executor(provider, dir.path())
            .execute_multi_agent(
                request(&["alpha", "beta", "gamma"], ExecutionMode::Sequential),
                &store,
                ExecutionOptions::default().with_tracker(tracker.clone()),
            )
            .await
            .unwrap();

        let intervals: Vec<(Instant, Instant)> = result
            .agents
            .iter()
            .map(|a| a.run_interval.unwrap())
            .collect();
        for pair in intervals.windows(2) {
            assert!(pair[1].0 >= pair[0].1);
        }

        assert_eq!(result.successful, 3);
        assert_eq!(result.output, "alpha out\n\n---\n\nbeta out\n\n---\n\ngamma out");
        assert!(result.total_duration >= Duration::from_millis(60));
        assert_eq!(tracker.lock_count(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_awaits_each_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::by_task(vec![
            ("first", reply_after("first out", 50)),
            ("second", reply_after("second out", 10)),
            ("third", reply_after("third out", 10)),
        ]));
        let tracker = Arc::new(ConflictTracker::new());
        let store = OrchestrationStore::new();
        let result = executor(provider, dir.path())
            .execute_multi_agent(
                request(&["first", "second", "third"], ExecutionMode::Parallel).with_max_concurrent(2),
                &store,
                ExecutionOptions::default().with_tracker(tracker.clone()),
            )
            .await
            .unwrap();

        let first = result.agents[0].run_interval.unwrap();
        let second = result.agents[1].run_interval.unwrap();
        let third = result.agents[2].run_interval.unwrap();
        // first and second share a chunk; third waits for the slower of them
        assert!(second.0 < first.1);
        assert!(third.0 >= first.1.max(second.1));

        assert_eq!(result.successful, 3);
        assert_eq!(result.mode, ExecutionMode::Parallel);
        let summed: Duration = result.agents.iter().map(|a| a.duration).sum();
        assert!(result.total_duration < summed);
        assert_eq!(
            result.output,
            "first out\n\n---\n\nsecond out\n\n---\n\nthird out"
        );
        assert_eq!(tracker.lock_count(), 0);
        assert!(store.is_empty());
    }

    fn write_then_reply(call: ToolCall, write_ms: u64, text: &str, reply_ms: u64) -> Vec<Step> {
        vec![
            Step::reply(AiResponse::with_tool_calls("", vec![call]))
                .after(Duration::from_millis(write_ms)),
            Step::reply(AiResponse::text(text)).after(Duration::from_millis(reply_ms)),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_escalates_after_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::by_task(vec![
            ("owner-a", write_then_reply(write_call("oa", "a.rs"), 0, "owner a out", 400)),
            ("owner-b", write_then_reply(write_call("ob", "b.rs"), 0, "owner b out", 400)),
            ("contender-a", write_then_reply(write_call("ca", "a.rs"), 50, "gave up on a", 100)),
            ("contender-b", write_then_reply(write_call("cb", "b.rs"), 50, "gave up on b", 150)),
            ("late-one", reply_after("late one out", 10)),
            ("late-two", reply_after("late two out", 10)),
        ]));
        let tracker = Arc::new(ConflictTracker::new());
        tracker.acquire(Path::new("/stale/lock"), "agent-gone").unwrap();
        let store = OrchestrationStore::new();

        let result = executor(provider, dir.path())
            .execute_multi_agent(
                request(
                    &["owner-a", "owner-b", "contender-a", "contender-b", "late-one", "late-two"],
                    ExecutionMode::Adaptive,
                )
                .with_max_concurrent(4),
                &store,
                ExecutionOptions::default().with_tracker(tracker.clone()),
            )
            .await
            .unwrap();

        assert!(result.escalated);
        assert_eq!(result.successful, 6);
        assert_eq!(result.conflicts.len(), 2);
        for conflict in &result.conflicts {
            let owner_id = if conflict.path.ends_with("a.rs") {
                &result.agents[0].id
            } else {
                &result.agents[1].id
            };
            assert_eq!(&conflict.agents[0], owner_id);
            assert!(conflict.is_resolved());
            assert_eq!(
                conflict.resolution.as_ref().unwrap().winner.as_ref(),
                Some(owner_id)
            );
        }
        assert_eq!(std::fs::read_to_string(dir.path().join("a.rs")).unwrap(), "oa");
        assert_eq!(std::fs::read_to_string(dir.path().join("b.rs")).unwrap(), "ob");

        // Once escalated nothing new starts until the pool drains
        let owner_a = result.agents[0].run_interval.unwrap();
        let owner_b = result.agents[1].run_interval.unwrap();
        let late_one = result.agents[4].run_interval.unwrap();
        let late_two = result.agents[5].run_interval.unwrap();
        assert!(late_one.0 >= owner_a.1.max(owner_b.1));
        assert!(late_two.0 >= late_one.1);

        assert_eq!(tracker.lock_count(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_abort_cancels_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let list_then_reply = |id: &str| {
            vec![
                Step::reply(AiResponse::with_tool_calls(
                    "",
                    vec![ToolCall::new(id, "list_files", json!({"path": "."}))],
                ))
                .after(Duration::from_millis(100)),
                Step::reply(AiResponse::text("never reached")),
            ]
        };
        let provider = Arc::new(ScriptedProvider::by_task(vec![
            ("slow-one", list_then_reply("l1")),
            ("slow-two", list_then_reply("l2")),
            ("queued-one", reply_after("queued one out", 10)),
            ("queued-two", reply_after("queued two out", 10)),
        ]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let store = OrchestrationStore::new();

        let result = executor(provider.clone(), dir.path())
            .execute_multi_agent(
                request(
                    &["slow-one", "slow-two", "queued-one", "queued-two"],
                    ExecutionMode::Adaptive,
                )
                .with_max_concurrent(2),
                &store,
                ExecutionOptions::default().with_cancel(cancel),
            )
            .await
            .unwrap();

        assert_eq!(result.successful, 0);
        assert_eq!(result.cancelled, 4);
        for agent in &result.agents {
            assert_eq!(agent.status, AgentStatus::Cancelled);
            assert_eq!(agent.error.as_deref(), Some(ABORT_REASON));
        }
        assert_eq!(result.agents[0].tool_calls, 0);
        assert_eq!(provider.call_count("queued-one"), 0);
        assert_eq!(provider.call_count("queued-two"), 0);
        assert!(result.agents[2].run_interval.is_none());
        assert!(store.is_empty());
    }

    struct CancelOnText(CancellationToken);

    impl AgentHooks for CancelOnText {
        fn on_text(&self, _context: &ToolContext, _text: &str) {
            self.0.cancel();
        }
    }

    #[tokio::test]
    async fn test_abort_keeps_finished_results() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::by_task(vec![(
            "alpha",
            vec![Step::reply(AiResponse::text("alpha out"))],
        )]));
        let cancel = CancellationToken::new();
        let store = OrchestrationStore::new();

        let result = executor(provider.clone(), dir.path())
            .execute_multi_agent(
                request(&["alpha", "beta", "gamma"], ExecutionMode::Sequential),
                &store,
                ExecutionOptions::default()
                    .with_cancel(cancel.clone())
                    .with_hooks(Arc::new(CancelOnText(cancel))),
            )
            .await
            .unwrap();

        let statuses: Vec<AgentStatus> = result.agents.iter().map(|a| a.status).collect();
        assert_eq!(
            statuses,
            vec![AgentStatus::Completed, AgentStatus::Cancelled, AgentStatus::Cancelled]
        );
        assert_eq!(result.successful, 1);
        assert_eq!(result.cancelled, 2);
        assert_eq!(result.output, "alpha out");
        assert_eq!(result.agents[2].error.as_deref(), Some(ABORT_REASON));
        assert_eq!(provider.call_count("beta"), 0);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_agent() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::by_task(vec![
            ("boom", vec![Step::panic()]),
            ("flaky", vec![Step::fail("upstream 503")]),
        ]));
        let store = OrchestrationStore::new();

        let result = executor(provider, dir.path())
            .execute_multi_agent(
                request(&["fine one", "boom", "flaky", "fine two"], ExecutionMode::Parallel),
                &store,
                ExecutionOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.successful, 2);
        assert_eq!(result.failed, 2);
        assert!(result.agents[1]
            .error
            .as_deref()
            .unwrap()
            .starts_with("Agent panicked"));
        assert_eq!(result.agents[2].error.as_deref(), Some("upstream 503"));
        assert_eq!(result.output, "done\n\n---\n\ndone");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_children_use_tier_model_without_spawn_tool() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::single(vec![Step::reply(AiResponse::text(
            "ok",
        ))]));
        let mut req = request(&["quick look"], ExecutionMode::Sequential);
        req.agents[0].tier = ModelTier::Fast;

        executor(provider.clone(), dir.path())
            .execute_multi_agent(req, &OrchestrationStore::new(), ExecutionOptions::default())
            .await
            .unwrap();

        let events = provider.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].model.as_deref(), Some("gpt-4o-mini"));
        assert!(events[0].tools.iter().all(|t| t != SPAWN_TOOL_NAME));
    }

    #[test]
    fn test_aggregate_keeps_outputs_verbatim() {
        let mut padded = AgentInstance::new(0, AgentSpawnConfig::new("padded"));
        padded.mark_running();
        padded.finish(
            AgentStatus::Completed,
            AgentOutcome {
                output: "  padded\n".to_string(),
                ..AgentOutcome::default()
            },
        );
        let mut empty = AgentInstance::new(1, AgentSpawnConfig::new("empty"));
        empty.mark_running();
        empty.finish(AgentStatus::Completed, AgentOutcome::default());
        let mut failed = AgentInstance::new(2, AgentSpawnConfig::new("failed"));
        failed.mark_running();
        failed.finish(AgentStatus::Error, AgentOutcome::failed("boom"));

        let result = aggregate(
            "req",
            ExecutionMode::Sequential,
            &[failed, empty, padded],
            Vec::new(),
            Duration::ZERO,
            false,
        );

        assert_eq!(result.output, format!("  padded\n{}", OUTPUT_SEPARATOR));
        assert_eq!(result.successful, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.agents[0].task, "padded");
    }
}
