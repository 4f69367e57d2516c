use dotenv::dotenv;
use std::sync::Arc;
use swarmcode::ai::multi_agent::{
    ExecutionOptions, MultiAgentExecutor, MultiAgentRequest, OrchestrationStore,
};
use swarmcode::ai::{DefaultPromptBuilder, OpenAIClient};
use swarmcode::config::Config;
use swarmcode::tools::{create_default_registry, PolicyGate};
use tokio_util::sync::CancellationToken;

fn usage() -> ! {
    eprintln!("Usage: swarmcode <request.json>");
    eprintln!();
    eprintln!("The file holds a multi-agent request, e.g.");
    eprintln!(r#"  {{"mode": "adaptive", "agents": [{{"task": "Add tests for src/parser.rs"}}]}}"#);
    std::process::exit(2);
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let Some(path) = std::env::args().nth(1) else {
        usage();
    };

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });
    log::info!("Loaded config: {:?}", config);

    let raw = std::fs::read_to_string(&path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", path, e);
        std::process::exit(1);
    });
    let request: MultiAgentRequest = serde_json::from_str(&raw).unwrap_or_else(|e| {
        eprintln!("Invalid request in {}: {}", path, e);
        std::process::exit(1);
    });

    let provider = OpenAIClient::new_with_tokens(
        &config.api_key,
        Some(&config.endpoint),
        Some(&config.models.balanced),
        Some(config.max_tokens),
    )
    .unwrap_or_else(|e| {
        eprintln!("Failed to create provider: {}", e);
        std::process::exit(1);
    });

    let executor = MultiAgentExecutor::new(
        Arc::new(provider),
        Arc::new(create_default_registry()),
        Arc::new(PolicyGate::default()),
        Arc::new(DefaultPromptBuilder),
        config.executor_config(),
    );

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("[MULTI_AGENT] Interrupt received, aborting batch");
            signal_token.cancel();
        }
    });

    let store = OrchestrationStore::new();
    let options = ExecutionOptions::default().with_cancel(cancel);
    match executor.execute_multi_agent(request, &store, options).await {
        Ok(result) => {
            let json = serde_json::to_string_pretty(&result).unwrap_or_default();
            println!("{}", json);
            if result.successful == 0 {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
