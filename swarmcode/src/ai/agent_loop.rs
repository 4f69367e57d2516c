//! Single-agent tool loop
//!
//! Drives one conversation: call the provider, run any requested tools in
//! order, feed the results back, and stop on a text-only answer, a provider
//! failure, cancellation or the iteration cap.

use crate::ai::types::{ToolCall, Usage};
use crate::ai::{ChatMessage, ChatOptions, ChatProvider};
use crate::tools::permissions::{PermissionGate, PermissionKind};
use crate::tools::{ToolConfig, ToolContext, ToolRegistry, ToolResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default cap on provider calls per agent
pub const MAX_TOOL_ITERATIONS: usize = 25;

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The model answered without tool calls
    Completed,
    /// Ran out of iterations while the model still wanted tools
    MaxIterations,
    ProviderError,
    Cancelled,
}

/// Observer for loop events. All methods default to no-ops.
pub trait AgentHooks: Send + Sync {
    fn on_tool_call(&self, _context: &ToolContext, _call: &ToolCall) {}

    fn on_tool_result(&self, _context: &ToolContext, _call: &ToolCall, _result: &ToolResult) {}

    fn on_text(&self, _context: &ToolContext, _text: &str) {}
}

#[derive(Debug, Default)]
pub struct NoopHooks;

impl AgentHooks for NoopHooks {}

/// One dispatched tool call and what came back
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: ToolResult,
    #[serde(rename = "duration_ms", serialize_with = "millis")]
    pub duration: Duration,
}

fn millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub success: bool,
    /// Final answer, or the last non-empty assistant text when cut short
    pub final_response: String,
    /// Provider calls made, including a failed one
    pub iterations: usize,
    pub tool_calls: Vec<ToolCallRecord>,
    pub termination: Termination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub usage: Usage,
    #[serde(skip)]
    pub messages: Vec<ChatMessage>,
}

/// Everything one loop run needs
#[derive(Clone)]
pub struct AgentLoopOptions {
    pub provider: Arc<dyn ChatProvider>,
    pub tools: Arc<ToolRegistry>,
    pub tool_config: ToolConfig,
    pub gate: Arc<dyn PermissionGate>,
    pub context: ToolContext,
    /// Model override passed to the provider
    pub model: Option<String>,
    pub max_iterations: usize,
    pub hooks: Arc<dyn AgentHooks>,
}

impl AgentLoopOptions {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        tools: Arc<ToolRegistry>,
        gate: Arc<dyn PermissionGate>,
        context: ToolContext,
    ) -> Self {
        AgentLoopOptions {
            provider,
            tool_config: tools.config().clone(),
            tools,
            gate,
            context,
            model: None,
            max_iterations: MAX_TOOL_ITERATIONS,
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tool_config(mut self, tool_config: ToolConfig) -> Self {
        self.tool_config = tool_config;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.hooks = hooks;
        self
    }
}

struct LoopState {
    messages: Vec<ChatMessage>,
    iterations: usize,
    records: Vec<ToolCallRecord>,
    last_text: String,
    usage: Usage,
}

impl LoopState {
    fn finish(self, success: bool, termination: Termination, final_response: String) -> AgentResult {
        AgentResult {
            success,
            final_response,
            iterations: self.iterations,
            tool_calls: self.records,
            termination,
            error: None,
            warning: None,
            usage: self.usage,
            messages: self.messages,
        }
    }

    fn cancelled(self) -> AgentResult {
        let partial = self.last_text.clone();
        let mut result = self.finish(false, Termination::Cancelled, partial);
        result.error = Some("cancelled".to_string());
        result
    }
}

/// Run one agent conversation to completion
pub async fn run_agent_loop(initial_messages: Vec<ChatMessage>, options: AgentLoopOptions) -> AgentResult {
    let label = options
        .context
        .agent_id
        .clone()
        .unwrap_or_else(|| "agent".to_string());
    let cancel = options.context.cancel.clone();

    let mut state = LoopState {
        messages: initial_messages,
        iterations: 0,
        records: Vec::new(),
        last_text: String::new(),
        usage: Usage::default(),
    };

    loop {
        if cancel.is_cancelled() {
            log::info!("[AGENT_LOOP] {} cancelled after {} iteration(s)", label, state.iterations);
            return state.cancelled();
        }

        if state.iterations >= options.max_iterations {
            log::warn!(
                "[AGENT_LOOP] {} exceeded max iterations ({})",
                label,
                options.max_iterations
            );
            let partial = state.last_text.clone();
            let max = options.max_iterations;
            let mut result = state.finish(false, Termination::MaxIterations, partial);
            result.warning = Some(format!(
                "Reached the maximum of {} iterations without a final answer",
                max
            ));
            return result;
        }

        state.iterations += 1;
        log::info!("[AGENT_LOOP] {} iteration {} starting", label, state.iterations);

        let chat_options = ChatOptions {
            model: options.model.clone(),
            tools: options.tools.get_tool_definitions(&options.tool_config),
        };

        let response = match options.provider.chat(&state.messages, &chat_options).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("[AGENT_LOOP] {} provider '{}' failed: {}", label, options.provider.id(), e);
                let partial = state.last_text.clone();
                let mut result = state.finish(false, Termination::ProviderError, partial);
                result.error = Some(e);
                return result;
            }
        };

        state.usage.add(&response.usage);
        log::info!(
            "[AGENT_LOOP] {} response - content_len: {}, tool_calls: {}",
            label,
            response.content.len(),
            response.tool_calls.len()
        );

        if !response.content.trim().is_empty() {
            state.last_text = response.content.clone();
        }

        if response.tool_calls.is_empty() {
            options.hooks.on_text(&options.context, &response.content);
            state.messages.push(ChatMessage::assistant(response.content.clone()));
            return state.finish(true, Termination::Completed, response.content);
        }

        state.messages.push(ChatMessage::assistant_with_tool_calls(
            response.content.clone(),
            response.tool_calls.clone(),
        ));

        for call in response.tool_calls {
            if cancel.is_cancelled() {
                log::info!("[AGENT_LOOP] {} cancelled before dispatching {}", label, call.name);
                return state.cancelled();
            }

            options.hooks.on_tool_call(&options.context, &call);
            let started = Instant::now();
            let result = dispatch_tool(&call, &options).await;
            let duration = started.elapsed();

            log::info!(
                "[AGENT_LOOP] {} tool {} -> success: {}",
                label,
                call.name,
                result.success
            );
            log::debug!("[AGENT_LOOP] {} tool {} output: {}", label, call.name, result.output);

            options.hooks.on_tool_result(&options.context, &call, &result);
            state
                .messages
                .push(ChatMessage::tool_result(call.id.clone(), result.output.clone()));
            state.records.push(ToolCallRecord {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
                result,
                duration,
            });
        }
    }
}

/// Look up, validate, authorize, claim and execute one call.
/// Every failure becomes a failed `ToolResult` for the model to read.
async fn dispatch_tool(call: &ToolCall, options: &AgentLoopOptions) -> ToolResult {
    let Some(tool) = options.tools.get(&call.name) else {
        log::warn!("[AGENT_LOOP] Unknown tool requested: {}", call.name);
        return ToolResult::error(format!("Tool not found: {}", call.name));
    };

    if !options.tools.is_allowed(&call.name, &options.tool_config) {
        return ToolResult::error(format!("Tool '{}' is not enabled for this agent", call.name));
    }

    if let Err(e) = options.tools.validate(&call.name, &call.arguments) {
        return ToolResult::error(e);
    }

    let context = &options.context;
    if let Some(request) = tool.permission_request(&call.arguments, context) {
        let decision = options.gate.authorize(&request, context.auto_approve).await;
        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| format!("{} request was not approved", request.kind));
            log::warn!("[AGENT_LOOP] Permission denied for {}: {}", call.name, reason);
            return ToolResult::error(format!("Permission denied: {}", reason));
        }

        if request.kind == PermissionKind::FileWrite {
            if let (Some(claim), Some(path)) = (context.file_claim(), request.path.as_ref()) {
                if let Err(e) = claim.claim(path) {
                    return ToolResult::error(e);
                }
            }
        }
    }

    tool.execute(call.arguments.clone(), context).await
}
