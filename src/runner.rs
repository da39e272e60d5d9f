//! The agent run loop: model turn, tool calls, model turn, ... until the model
//! answers without requesting tools.
//!
//! A run is exposed as an ordered stream of [`Event`]s. Consumers may stop
//! reading at any point; dropping the stream ends the run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tracing::{debug, info};

use crate::agent::AgentDefinition;
use crate::content::{Content, FunctionCall, FunctionResponse, ModelPart};
use crate::error::AgentError;
use crate::llm::{ChatModel, ChatRequest};
use crate::session::SessionService;
use crate::tools::Toolset;

pub const DEFAULT_MAX_TURNS: usize = 10;

/// One step of an agent run.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    pub author: String,
    pub content: Option<Content>,
    /// Streaming fragment of a longer response.
    pub partial: bool,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(invocation_id: &str, author: &str, content: Content) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invocation_id: invocation_id.to_string(),
            author: author.to_string(),
            content: Some(content),
            partial: false,
            timestamp: Utc::now(),
        }
    }

    pub fn parts(&self) -> &[ModelPart] {
        self.content.as_ref().map(|c| c.parts.as_slice()).unwrap_or(&[])
    }

    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.content
            .as_ref()
            .map(|c| c.function_calls())
            .unwrap_or_default()
    }

    pub fn function_responses(&self) -> Vec<&FunctionResponse> {
        self.content
            .as_ref()
            .map(|c| c.function_responses())
            .unwrap_or_default()
    }

    /// True when this event is the agent's answer for the turn.
    pub fn is_final_response(&self) -> bool {
        !self.partial && self.function_calls().is_empty() && self.function_responses().is_empty()
    }
}

pub type EventStream = BoxStream<'static, Result<Event, AgentError>>;

/// Something that can run the agent for one user turn.
pub trait AgentRunner: Send + Sync {
    fn app_name(&self) -> &str;

    fn session_service(&self) -> Arc<dyn SessionService>;

    /// Start a run in an existing session with `new_message` as the user turn.
    fn run(&self, user_id: &str, session_id: &str, new_message: Content) -> EventStream;
}

pub struct Runner {
    app_name: String,
    agent: AgentDefinition,
    model: Arc<dyn ChatModel>,
    tools: Arc<Toolset>,
    sessions: Arc<dyn SessionService>,
    max_turns: usize,
}

impl Runner {
    pub fn new(
        app_name: impl Into<String>,
        agent: AgentDefinition,
        model: Arc<dyn ChatModel>,
        tools: Arc<Toolset>,
        sessions: Arc<dyn SessionService>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            agent,
            model,
            tools,
            sessions,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }
}

impl AgentRunner for Runner {
    fn app_name(&self) -> &str {
        &self.app_name
    }

    fn session_service(&self) -> Arc<dyn SessionService> {
        self.sessions.clone()
    }

    fn run(&self, user_id: &str, session_id: &str, new_message: Content) -> EventStream {
        let app_name = self.app_name.clone();
        let user_id = user_id.to_string();
        let session_id = session_id.to_string();
        let agent = self.agent.clone();
        let model = self.model.clone();
        let tools = self.tools.clone();
        let sessions = self.sessions.clone();
        let max_turns = self.max_turns;

        Box::pin(async_stream::try_stream! {
            let invocation_id = uuid::Uuid::new_v4().to_string();
            info!(%invocation_id, %session_id, %user_id, model = model.model_id(), "Starting agent run");

            sessions
                .append_content(&app_name, &user_id, &session_id, new_message)
                .await?;

            let mut answered = false;
            for turn in 0..max_turns {
                let session = sessions
                    .get_session(&app_name, &user_id, &session_id)
                    .await?
                    .ok_or_else(|| AgentError::Other(format!("session {} vanished", session_id)))?;

                let request = ChatRequest {
                    system_instruction: agent.instruction(Utc::now()),
                    contents: &session.history,
                    tools: tools.declarations(),
                };
                let reply = model.generate(&request).await?;
                sessions
                    .append_content(&app_name, &user_id, &session_id, reply.clone())
                    .await?;

                let calls: Vec<FunctionCall> = reply.function_calls().into_iter().cloned().collect();
                debug!(turn, tool_calls = calls.len(), "Model turn complete");
                yield Event::new(&invocation_id, &agent.name, reply);

                if calls.is_empty() {
                    answered = true;
                    break;
                }

                let mut responses = Vec::with_capacity(calls.len());
                for call in calls {
                    let response = tools.call(&call.name, call.args).await;
                    responses.push(ModelPart::function_response(FunctionResponse {
                        id: call.id,
                        name: call.name,
                        response,
                    }));
                }
                let tool_content = Content::user(responses);
                sessions
                    .append_content(&app_name, &user_id, &session_id, tool_content.clone())
                    .await?;
                yield Event::new(&invocation_id, &agent.name, tool_content);
            }

            if !answered {
                Err::<(), AgentError>(AgentError::Other(format!(
                    "agent did not produce an answer within {} model turns",
                    max_turns
                )))?;
            }
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{call, ScriptedModel};
    use super::*;
    use crate::github::{
        CommitRecord, GitHubQueries, RecentCommitsParams, RepositoryRecord, SearchReposParams,
        ToolEnvelope, UserReposParams,
    };
    use crate::session::InMemorySessionService;
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;

    struct StaticQueries;

    #[async_trait]
    impl GitHubQueries for StaticQueries {
        async fn get_user_repositories(
            &self,
            _params: UserReposParams,
        ) -> ToolEnvelope<RepositoryRecord> {
            ToolEnvelope::error("Username is required when not using authentication token")
        }

        async fn get_recent_commits(
            &self,
            _params: RecentCommitsParams,
        ) -> ToolEnvelope<CommitRecord> {
            ToolEnvelope::success(
                vec![CommitRecord {
                    sha: "01234567".into(),
                    message: "Fix parser".into(),
                    author: "Mona".into(),
                    date: "2026-10-14T12:00:00+00:00".into(),
                    url: "https://github.com/octo/hello/commit/01234567".into(),
                }],
                "Found 1 commits",
            )
        }

        async fn search_repositories(
            &self,
            _params: SearchReposParams,
        ) -> ToolEnvelope<RepositoryRecord> {
            ToolEnvelope::success(vec![], "Found 0 repositories")
        }
    }

    async fn runner_with(model: Arc<ScriptedModel>) -> (Runner, Arc<InMemorySessionService>) {
        let sessions = Arc::new(InMemorySessionService::new());
        sessions.create_session("app", "anonymous", "ctx").await.unwrap();
        let runner = Runner::new(
            "app",
            AgentDefinition::default(),
            model,
            Arc::new(Toolset::new(Arc::new(StaticQueries))),
            sessions.clone(),
        );
        (runner, sessions)
    }

    #[test]
    fn final_response_predicate() {
        let text = Event::new("i", "a", Content::model(vec![ModelPart::text("hi")]));
        assert!(text.is_final_response());

        let calling = Event::new("i", "a", call("c1", "search_repositories", json!({})));
        assert!(!calling.is_final_response());
        assert_eq!(calling.function_calls().len(), 1);

        let mut partial = text.clone();
        partial.partial = true;
        assert!(!partial.is_final_response());
    }

    #[tokio::test]
    async fn run_executes_tools_and_feeds_results_back() {
        let model = Arc::new(ScriptedModel::new(vec![
            call("c1", "get_recent_commits", json!({"repo_name": "octo/hello"})),
            Content::model(vec![ModelPart::text("Latest commit: Fix parser")]),
        ]));
        let (runner, sessions) = runner_with(model.clone()).await;

        let events: Vec<Event> = runner
            .run("anonymous", "ctx", Content::user(vec![ModelPart::text("commits?")]))
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].function_calls().len(), 1);
        let responses = events[1].function_responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, "c1");
        assert_eq!(responses[0].response["status"], "success");
        assert_eq!(responses[0].response["data"][0]["sha"], "01234567");
        assert!(events[2].is_final_response());

        // Second model call sees user turn, tool call, and tool result.
        let seen = model.seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].len(), 3);

        let session = sessions
            .get_session("app", "anonymous", "ctx")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.history.len(), 4);
    }

    #[tokio::test]
    async fn run_fails_after_max_turns() {
        let model = Arc::new(ScriptedModel::new(vec![
            call("c1", "search_repositories", json!({"query": "a"})),
            call("c2", "search_repositories", json!({"query": "b"})),
        ]));
        let (runner, _) = runner_with(model).await;
        let runner = runner.with_max_turns(2);

        let results: Vec<Result<Event, AgentError>> = runner
            .run("anonymous", "ctx", Content::user(vec![ModelPart::text("loop")]))
            .collect()
            .await;
        assert_eq!(results.len(), 5);
        assert!(results[..4].iter().all(|r| r.is_ok()));
        assert!(results[4].is_err());
    }

    #[tokio::test]
    async fn run_requires_existing_session() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let (runner, _) = runner_with(model).await;
        let mut stream = runner.run("someone-else", "ctx", Content::user(vec![]));
        assert!(stream.next().await.unwrap().is_err());
    }
}
