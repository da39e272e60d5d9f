use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use github_agent::agent::AgentDefinition;
use github_agent::config::Cli;
use github_agent::executor::GitHubAgentExecutor;
use github_agent::github::{GitHubClientFactory, GitHubToolset};
use github_agent::llm::OpenRouterModel;
use github_agent::runner::Runner;
use github_agent::server::{self, AppState, APP_NAME};
use github_agent::session::InMemorySessionService;
use github_agent::tools::Toolset;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = cli.into_settings()?;

    let github = GitHubToolset::new(GitHubClientFactory::new(settings.github_token.clone()));
    let tools = Arc::new(Toolset::new(Arc::new(github)));
    let model = OpenRouterModel::new(
        settings.model.clone(),
        settings.openrouter_api_key.clone(),
        Some(settings.llm_base_url.clone()),
    )
    .map_err(|e| anyhow::anyhow!("Failed to create model client: {}", e))?;

    let runner = Runner::new(
        APP_NAME,
        AgentDefinition::default(),
        Arc::new(model),
        tools,
        Arc::new(InMemorySessionService::new()),
    )
    .with_max_turns(settings.max_turns);
    let executor = Arc::new(GitHubAgentExecutor::new(Arc::new(runner)));

    let card = server::build_agent_card(&settings.host, settings.port);
    tracing::info!(
        authenticated = settings.github_token.is_some(),
        model = %settings.model,
        url = %card.url,
        user_tokens = settings.user_tokens.len(),
        "Starting github-agent"
    );

    let state = AppState::new(executor, card, settings.user_tokens.clone());
    server::serve(&settings.host, settings.port, state).await?;

    Ok(())
}
