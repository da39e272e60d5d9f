//! Command-line and environment configuration.

use std::collections::HashMap;

use clap::Parser;

use crate::error::AgentError;
use crate::llm::{DEFAULT_MODEL, OPENROUTER_BASE_URL};
use crate::runner::DEFAULT_MAX_TURNS;

/// A2A agent that answers questions about GitHub repositories
#[derive(Debug, Clone, Parser)]
#[command(name = "github-agent", version, about)]
pub struct Cli {
    /// Interface to bind the HTTP server to
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port to bind the HTTP server to
    #[arg(long, default_value_t = 10007)]
    pub port: u16,

    /// OpenRouter API key used for model calls
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub openrouter_api_key: Option<String>,

    /// GitHub personal access token. Without one, requests are anonymous
    /// and heavily rate limited.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Model identifier on OpenRouter
    #[arg(long, env = "GITHUB_AGENT_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Base URL of the OpenAI-compatible chat completions API
    #[arg(long, default_value = OPENROUTER_BASE_URL)]
    pub llm_base_url: String,

    /// Maximum model calls per agent run
    #[arg(long, default_value_t = DEFAULT_MAX_TURNS)]
    pub max_turns: usize,

    /// Map a bearer token to a username, as name=token. Repeatable.
    #[arg(long = "user-token", value_name = "NAME=TOKEN")]
    pub user_tokens: Vec<String>,
}

/// Validated runtime settings.
#[derive(Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub openrouter_api_key: String,
    pub github_token: Option<String>,
    pub model: String,
    pub llm_base_url: String,
    pub max_turns: usize,
    /// Bearer token -> username.
    pub user_tokens: HashMap<String, String>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("openrouter_api_key", &"[redacted]")
            .field("github_token", &self.github_token.as_ref().map(|_| "[redacted]"))
            .field("model", &self.model)
            .field("llm_base_url", &self.llm_base_url)
            .field("max_turns", &self.max_turns)
            .field("user_tokens", &self.user_tokens.values().collect::<Vec<_>>())
            .finish()
    }
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings, AgentError> {
        let openrouter_api_key = self
            .openrouter_api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AgentError::Config("OPENROUTER_API_KEY environment variable not set".to_string())
            })?;

        if self.max_turns == 0 {
            return Err(AgentError::Config(
                "--max-turns must be at least 1".to_string(),
            ));
        }

        let mut user_tokens = HashMap::new();
        for raw in &self.user_tokens {
            let (name, token) = parse_user_token(raw)?;
            user_tokens.insert(token, name);
        }

        Ok(Settings {
            host: self.host,
            port: self.port,
            openrouter_api_key,
            github_token: self.github_token.filter(|t| !t.is_empty()),
            model: self.model,
            llm_base_url: self.llm_base_url,
            max_turns: self.max_turns,
            user_tokens,
        })
    }
}

/// Split `name=token` into its halves. Both must be non-empty.
pub fn parse_user_token(raw: &str) -> Result<(String, String), AgentError> {
    match raw.split_once('=') {
        Some((name, token)) if !name.trim().is_empty() && !token.trim().is_empty() => {
            Ok((name.trim().to_string(), token.trim().to_string()))
        }
        _ => Err(AgentError::Config(format!(
            "invalid --user-token '{}': expected name=token",
            raw.split_once('=').map(|(name, _)| name).unwrap_or(raw)
        ))),
    }
}
