//! Bridges A2A task execution onto agent runs.
//!
//! One `execute` call drives one agent run: it opens the task lifecycle,
//! upserts the caller's session, forwards the user's message, and turns run
//! events into status and artifact updates.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use crate::content::Content;
use crate::error::AgentError;
use crate::parts::{a2a_parts_to_model, model_parts_to_a2a};
use crate::protocol::{Message, Task, TaskState};
use crate::runner::AgentRunner;
use crate::session::Session;
use crate::tasks::{EventQueue, TaskUpdater};

pub const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub username: String,
}

/// Transport-level facts about the caller.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub user: Option<AuthenticatedUser>,
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub task_id: String,
    pub context_id: String,
    pub message: Message,
    /// The stored task when this message continues an existing one.
    pub current_task: Option<Task>,
    pub call_context: CallContext,
}

impl RequestContext {
    pub fn user_id(&self) -> &str {
        self.call_context
            .user
            .as_ref()
            .map(|u| u.username.as_str())
            .unwrap_or(ANONYMOUS_USER)
    }
}

#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, context: RequestContext, queue: EventQueue) -> Result<(), AgentError>;

    async fn cancel(&self, context: RequestContext, queue: EventQueue) -> Result<(), AgentError>;
}

/// Runs the GitHub agent for incoming A2A tasks.
pub struct GitHubAgentExecutor {
    runner: Arc<dyn AgentRunner>,
}

impl GitHubAgentExecutor {
    pub fn new(runner: Arc<dyn AgentRunner>) -> Self {
        Self { runner }
    }

    async fn process_request(
        &self,
        new_message: Content,
        context: &RequestContext,
        updater: &TaskUpdater,
    ) -> Result<(), AgentError> {
        let session = self.upsert_session(context).await?;
        let mut events = self.runner.run(&session.user_id, &session.id, new_message);

        while let Some(event) = events.next().await {
            let event = event?;
            if event.is_final_response() {
                let parts = model_parts_to_a2a(event.parts());
                debug!(task_id = updater.task_id(), ?parts, "Yielding final response");
                updater.add_artifact(parts, None)?;
                updater.complete()?;
                break;
            }
            if event.function_calls().is_empty() {
                debug!(task_id = updater.task_id(), "Yielding update response");
                let message = updater.new_agent_message(model_parts_to_a2a(event.parts()));
                updater.update_status(TaskState::Working, Some(message), false)?;
            } else {
                debug!(task_id = updater.task_id(), "Skipping event");
            }
        }
        Ok(())
    }

    async fn upsert_session(&self, context: &RequestContext) -> Result<Session, AgentError> {
        let sessions = self.runner.session_service();
        let app_name = self.runner.app_name();
        let user_id = context.user_id();

        match sessions
            .get_session(app_name, user_id, &context.context_id)
            .await?
        {
            Some(session) => Ok(session),
            None => {
                sessions
                    .create_session(app_name, user_id, &context.context_id)
                    .await
            }
        }
    }
}

#[async_trait]
impl AgentExecutor for GitHubAgentExecutor {
    async fn execute(&self, context: RequestContext, queue: EventQueue) -> Result<(), AgentError> {
        let updater = TaskUpdater::new(queue, &context.task_id, &context.context_id);
        if context.current_task.is_none() {
            updater.submit()?;
        }
        updater.start_work()?;

        let new_message = Content::user(a2a_parts_to_model(&context.message.parts)?);
        self.process_request(new_message, &context, &updater).await?;
        debug!(task_id = %context.task_id, "execute exiting");
        Ok(())
    }

    async fn cancel(&self, _context: RequestContext, _queue: EventQueue) -> Result<(), AgentError> {
        Err(AgentError::UnsupportedOperation)
    }
}
