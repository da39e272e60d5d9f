//! Static tool declarations and dispatch for the GitHub query operations.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::github::{
    GitHubQueries, RecentCommitsParams, SearchReposParams, ToolEnvelope, UserReposParams,
};

pub const GET_USER_REPOSITORIES: &str = "get_user_repositories";
pub const GET_RECENT_COMMITS: &str = "get_recent_commits";
pub const SEARCH_REPOSITORIES: &str = "search_repositories";

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

fn parameters_schema<T: JsonSchema>() -> Value {
    let mut value = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// The fixed capability list, in a stable order.
pub fn declarations() -> Vec<ToolDeclaration> {
    vec![
        ToolDeclaration {
            name: GET_USER_REPOSITORIES,
            description: "Get a user's repositories with recent updates",
            parameters: parameters_schema::<UserReposParams>(),
        },
        ToolDeclaration {
            name: GET_RECENT_COMMITS,
            description: "Get recent commits for a repository",
            parameters: parameters_schema::<RecentCommitsParams>(),
        },
        ToolDeclaration {
            name: SEARCH_REPOSITORIES,
            description: "Search for repositories with recent activity",
            parameters: parameters_schema::<SearchReposParams>(),
        },
    ]
}

/// Routes model tool calls to a [`GitHubQueries`] implementation.
#[derive(Clone)]
pub struct Toolset {
    queries: Arc<dyn GitHubQueries>,
    declarations: Vec<ToolDeclaration>,
}

impl Toolset {
    pub fn new(queries: Arc<dyn GitHubQueries>) -> Self {
        Self {
            queries,
            declarations: declarations(),
        }
    }

    pub fn declarations(&self) -> &[ToolDeclaration] {
        &self.declarations
    }

    /// Invoke a tool by name. Always yields an envelope, even for unknown
    /// tools or arguments that don't match the declared schema.
    pub async fn call(&self, name: &str, args: Value) -> Value {
        debug!(tool = name, %args, "Invoking tool");
        match name {
            GET_USER_REPOSITORIES => match parse_args::<UserReposParams>(name, args) {
                Ok(params) => self.queries.get_user_repositories(params).await.into_value(),
                Err(envelope) => envelope,
            },
            GET_RECENT_COMMITS => match parse_args::<RecentCommitsParams>(name, args) {
                Ok(params) => self.queries.get_recent_commits(params).await.into_value(),
                Err(envelope) => envelope,
            },
            SEARCH_REPOSITORIES => match parse_args::<SearchReposParams>(name, args) {
                Ok(params) => self.queries.search_repositories(params).await.into_value(),
                Err(envelope) => envelope,
            },
            other => {
                warn!(tool = other, "Model requested unknown tool");
                ToolEnvelope::<()>::error(format!("Unknown tool: {}", other)).into_value()
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(name: &str, args: Value) -> Result<T, Value> {
    // Models sometimes send `null` instead of `{}` for no-argument calls.
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| {
        ToolEnvelope::<()>::error(format!("Invalid arguments for {}: {}", name, e)).into_value()
    })
}
