use crate::ai::multi_agent::types::AgentSpawnConfig;
use crate::ai::ChatMessage;
use crate::tools::ToolContext;
use async_trait::async_trait;

/// Per-file cap on context injected into the first user message
const MAX_CONTEXT_FILE_CHARS: usize = 12_000;

/// Builds the opening messages for an agent
#[async_trait]
pub trait PromptBuilder: Send + Sync {
    async fn build(&self, config: &AgentSpawnConfig, context: &ToolContext) -> Vec<ChatMessage>;
}

/// System prompt from `prompts/agent.md` (or the spawn override) plus a user
/// message carrying the task and the contents of any context files.
#[derive(Debug, Default, Clone)]
pub struct DefaultPromptBuilder;

impl DefaultPromptBuilder {
    fn system_prompt(&self, config: &AgentSpawnConfig, context: &ToolContext) -> String {
        if let Some(ref custom) = config.system_prompt {
            return custom.clone();
        }

        let mut prompt = include_str!("prompts/agent.md").to_string();
        prompt.push_str("\n\n---\n\n");
        prompt.push_str(&format!(
            "**Workspace**: {}\n",
            context.workspace_root().display()
        ));
        if let Some(ref agent_id) = context.agent_id {
            prompt.push_str(&format!("**Agent**: {}\n", agent_id));
        }
        prompt
    }

    async fn render_context_file(&self, raw: &str, context: &ToolContext) -> String {
        let path = match context.resolve_path(raw) {
            Ok(p) => p,
            Err(e) => return format!("### {}\n\n(skipped: {})\n\n", raw, e),
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let (body, truncated) = truncate_chars(&content, MAX_CONTEXT_FILE_CHARS);
                let mut section = format!("### {}\n\n```\n{}\n```\n", raw, body);
                if truncated {
                    section.push_str("(truncated)\n");
                }
                section.push('\n');
                section
            }
            Err(e) => {
                log::warn!("[PROMPT] Could not read context file {}: {}", path.display(), e);
                format!("### {}\n\n(could not read: {})\n\n", raw, e)
            }
        }
    }
}

#[async_trait]
impl PromptBuilder for DefaultPromptBuilder {
    async fn build(&self, config: &AgentSpawnConfig, context: &ToolContext) -> Vec<ChatMessage> {
        let mut user = config.task.clone();

        if !config.context_files.is_empty() {
            user.push_str("\n\n## Context files\n\n");
            for raw in &config.context_files {
                user.push_str(&self.render_context_file(raw, context).await);
            }
        }

        vec![
            ChatMessage::system(self.system_prompt(config, context)),
            ChatMessage::user(user),
        ]
    }
}

fn truncate_chars(s: &str, max: usize) -> (&str, bool) {
    match s.char_indices().nth(max) {
        Some((idx, _)) => (&s[..idx], true),
        None => (s, false),
    }
}
