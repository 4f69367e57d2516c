use crate::ai::multi_agent::ExecutorConfig;
use crate::ai::types::TierModels;
use crate::ai::agent_loop::MAX_TOOL_ITERATIONS;
use crate::ai::multi_agent::orchestrator::{DEFAULT_MAX_AGENTS, DEFAULT_MAX_CONCURRENT};
use std::env;
use std::path::PathBuf;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MAX_TOKENS: u32 = 8192;

#[derive(Clone)]
pub struct Config {
    pub endpoint: String,
    pub api_key: String,
    pub models: TierModels,
    pub max_agents: usize,
    pub max_concurrent: usize,
    pub max_iterations: usize,
    pub workspace_dir: PathBuf,
    pub auto_approve: bool,
    pub max_tokens: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("models", &self.models)
            .field("max_agents", &self.max_agents)
            .field("max_concurrent", &self.max_concurrent)
            .field("max_iterations", &self.max_iterations)
            .field("workspace_dir", &self.workspace_dir)
            .field("auto_approve", &self.auto_approve)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} must be a valid number, got '{}'", name, raw)),
        _ => Ok(default),
    }
}

fn parse_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl Config {
    /// Read configuration from `SWARMCODE_*` environment variables.
    /// Call `dotenv().ok()` first to pick up a local `.env`.
    pub fn from_env() -> Result<Self, String> {
        let api_key = env::var("SWARMCODE_API_KEY")
            .map_err(|_| "SWARMCODE_API_KEY must be set".to_string())?;

        let defaults = TierModels::default();
        let models = TierModels {
            fast: env::var("SWARMCODE_MODEL_FAST").unwrap_or(defaults.fast),
            balanced: env::var("SWARMCODE_MODEL_BALANCED").unwrap_or(defaults.balanced),
            thorough: env::var("SWARMCODE_MODEL_THOROUGH").unwrap_or(defaults.thorough),
        };

        let config = Self {
            endpoint: env::var("SWARMCODE_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            api_key,
            models,
            max_agents: parse_var("SWARMCODE_MAX_AGENTS", DEFAULT_MAX_AGENTS)?,
            max_concurrent: parse_var("SWARMCODE_MAX_CONCURRENT", DEFAULT_MAX_CONCURRENT)?,
            max_iterations: parse_var("SWARMCODE_MAX_ITERATIONS", MAX_TOOL_ITERATIONS)?,
            workspace_dir: env::var("SWARMCODE_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            auto_approve: parse_flag("SWARMCODE_AUTO_APPROVE"),
            max_tokens: parse_var("SWARMCODE_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
        };

        if config.max_concurrent == 0 {
            return Err("SWARMCODE_MAX_CONCURRENT must be at least 1".to_string());
        }
        Ok(config)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_agents: self.max_agents,
            max_concurrent: self.max_concurrent,
            max_iterations: self.max_iterations,
            workspace_dir: self.workspace_dir.clone(),
            auto_approve: self.auto_approve,
            models: self.models.clone(),
            ..Default::default()
        }
    }
}
