//! A2A HTTP surface: agent card discovery, health, and JSON-RPC task methods.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, Method};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::executor::{AgentExecutor, AuthenticatedUser, CallContext, RequestContext};
use crate::protocol::{
    AgentCapabilities, AgentCard, AgentSkill, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    Message, MessageSendParams, StreamResponse, TaskIdParams, TaskQueryParams,
};
use crate::tasks::{EventQueue, InMemoryTaskStore, TaskEvent};

/// Card name; also the application name sessions are filed under.
pub const APP_NAME: &str = "GitHub Agent";
pub const CARD_VERSION: &str = "1.0.0";
pub const PROTOCOL_VERSION: &str = "0.3.0";

pub fn build_agent_card(host: &str, port: u16) -> AgentCard {
    let skill = AgentSkill {
        id: "github_repositories".to_string(),
        name: "GitHub Repositories".to_string(),
        description: "Query GitHub repositories, recent updates, commits, and project activity"
            .to_string(),
        tags: vec![
            "github".to_string(),
            "repositories".to_string(),
            "commits".to_string(),
        ],
        examples: vec![
            "Show my recent repository updates".to_string(),
            "What are the latest commits in my project?".to_string(),
            "Search for popular Python repositories with recent activity".to_string(),
        ],
    };

    AgentCard {
        name: APP_NAME.to_string(),
        description: "An agent that can query GitHub repositories and recent project updates"
            .to_string(),
        url: format!("http://{host}:{port}/"),
        version: CARD_VERSION.to_string(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        default_input_modes: vec!["text".to_string()],
        default_output_modes: vec!["text".to_string()],
        capabilities: AgentCapabilities {
            streaming: true,
            push_notifications: false,
        },
        skills: vec![skill],
    }
}

/// Shared state for the axum handlers.
#[derive(Clone)]
pub struct AppState {
    executor: Arc<dyn AgentExecutor>,
    tasks: Arc<InMemoryTaskStore>,
    card: Arc<AgentCard>,
    /// Bearer token -> username.
    user_tokens: Arc<HashMap<String, String>>,
}

impl AppState {
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        card: AgentCard,
        user_tokens: HashMap<String, String>,
    ) -> Self {
        Self {
            executor,
            tasks: Arc::new(InMemoryTaskStore::new()),
            card: Arc::new(card),
            user_tokens: Arc::new(user_tokens),
        }
    }

    pub fn tasks(&self) -> &InMemoryTaskStore {
        &self.tasks
    }

    /// Resolve the caller from a bearer token. Unknown or missing tokens are
    /// anonymous, not rejected.
    fn caller(&self, headers: &HeaderMap) -> CallContext {
        let user = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .and_then(|token| self.user_tokens.get(token.trim()))
            .map(|username| AuthenticatedUser {
                username: username.clone(),
            });
        CallContext { user }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(AllowOrigin::any());

    Router::new()
        .route("/", post(handle_jsonrpc))
        .route("/.well-known/agent.json", get(agent_card))
        .route("/.well-known/agent-card.json", get(agent_card))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `host:port` and serve until the process is stopped.
pub async fn serve(host: &str, port: u16, state: AppState) -> Result<(), AgentError> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "A2A server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn agent_card(State(state): State<AppState>) -> Json<AgentCard> {
    Json(state.card.as_ref().clone())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn rpc_error(id: Option<Value>, error: JsonRpcError) -> Response {
    Json(JsonRpcResponse::failure(id, error)).into_response()
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, AgentError> {
    serde_json::from_value(params).map_err(|e| AgentError::InvalidParam(e.to_string()))
}

async fn handle_jsonrpc(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let raw: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            return rpc_error(
                None,
                JsonRpcError::new(JsonRpcError::PARSE_ERROR, format!("Parse error: {e}"), None),
            )
        }
    };
    let raw_id = raw.get("id").cloned();
    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => {
            return rpc_error(
                raw_id,
                JsonRpcError::new(
                    JsonRpcError::INVALID_REQUEST,
                    format!("Invalid request: {e}"),
                    None,
                ),
            )
        }
    };
    if request.jsonrpc != "2.0" {
        return rpc_error(
            request.id,
            JsonRpcError::new(JsonRpcError::INVALID_REQUEST, "jsonrpc must be 2.0", None),
        );
    }

    let caller = state.caller(&headers);
    let JsonRpcRequest {
        id, method, params, ..
    } = request;
    debug!(%method, authenticated = caller.user.is_some(), "JSON-RPC request");

    let result = match method.as_str() {
        "message/send" => on_message_send(&state, params, caller).await,
        "message/stream" => return on_message_stream(state, id, params, caller),
        "tasks/get" => on_get_task(&state, params),
        "tasks/cancel" => on_cancel_task(&state, params, caller).await,
        other => {
            return rpc_error(
                id,
                JsonRpcError::new(
                    JsonRpcError::METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                    None,
                ),
            )
        }
    };

    match result {
        Ok(value) => Json(JsonRpcResponse::success(id, value)).into_response(),
        Err(e) => {
            warn!(%method, error = %e, "JSON-RPC request failed");
            rpc_error(id, e.to_jsonrpc_error())
        }
    }
}

/// Build the request context for an inbound message, binding it to a new
/// task or to the existing task it names.
fn prepare(
    state: &AppState,
    params: MessageSendParams,
    caller: CallContext,
) -> Result<RequestContext, AgentError> {
    let mut message = params.message;

    let current_task = match &message.task_id {
        Some(task_id) => {
            let task = state
                .tasks
                .get(task_id)
                .ok_or_else(|| AgentError::TaskNotFound(task_id.clone()))?;
            if task.status.state.is_terminal() {
                return Err(AgentError::TaskTerminal(task_id.clone()));
            }
            Some(task)
        }
        None => None,
    };

    let (task_id, context_id) = match &current_task {
        Some(task) => (task.id.clone(), task.context_id.clone()),
        None => (
            uuid::Uuid::new_v4().to_string(),
            message
                .context_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        ),
    };
    message.task_id = Some(task_id.clone());
    message.context_id = Some(context_id.clone());

    if current_task.is_some() {
        state.tasks.append_history(&task_id, message.clone())?;
    }

    Ok(RequestContext {
        task_id,
        context_id,
        message,
        current_task,
        call_context: caller,
    })
}

fn start_execution(
    state: &AppState,
    context: RequestContext,
) -> (
    mpsc::UnboundedReceiver<TaskEvent>,
    JoinHandle<Result<(), AgentError>>,
) {
    let (queue, events) = EventQueue::new();
    let executor = state.executor.clone();
    let handle = tokio::spawn(async move { executor.execute(context, queue).await });
    (events, handle)
}

async fn finish(handle: JoinHandle<Result<(), AgentError>>) -> Result<(), AgentError> {
    handle
        .await
        .map_err(|e| AgentError::Other(format!("agent execution aborted: {e}")))?
}

async fn on_message_send(
    state: &AppState,
    params: Value,
    caller: CallContext,
) -> Result<Value, AgentError> {
    let context = prepare(state, parse_params(params)?, caller)?;
    let task_id = context.task_id.clone();
    let inbound = context.message.clone();
    info!(%task_id, context_id = %context.context_id, "message/send");

    let (mut events, handle) = start_execution(state, context);
    while let Some(event) = events.recv().await {
        state.tasks.apply(&event, &inbound);
    }
    finish(handle).await?;

    let task = state
        .tasks
        .get(&task_id)
        .ok_or_else(|| AgentError::TaskNotFound(task_id.clone()))?;
    Ok(serde_json::to_value(StreamResponse::Task(task))?)
}

fn sse_event(response: &JsonRpcResponse) -> SseEvent {
    SseEvent::default().data(serde_json::to_string(response).unwrap_or_default())
}

fn on_message_stream(
    state: AppState,
    id: Option<Value>,
    params: Value,
    caller: CallContext,
) -> Response {
    let context = match parse_params(params).and_then(|p| prepare(&state, p, caller)) {
        Ok(context) => context,
        Err(e) => {
            warn!(error = %e, "message/stream rejected");
            return rpc_error(id, e.to_jsonrpc_error());
        }
    };
    let inbound = context.message.clone();
    info!(task_id = %context.task_id, context_id = %context.context_id, "message/stream");

    let (mut events, handle) = start_execution(&state, context);
    let (frames_tx, mut frames) = mpsc::unbounded_channel::<JsonRpcResponse>();
    let tasks = state.tasks.clone();

    // Store updates must not depend on the SSE client staying connected.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tasks.apply(&event, &inbound);
            let result = serde_json::to_value(event.into_response()).unwrap_or_default();
            let _ = frames_tx.send(JsonRpcResponse::success(id.clone(), result));
        }
        if let Err(e) = finish(handle).await {
            warn!(error = %e, "message/stream execution failed");
            let _ = frames_tx.send(JsonRpcResponse::failure(id, e.to_jsonrpc_error()));
        }
    });

    let stream = async_stream::stream! {
        while let Some(frame) = frames.recv().await {
            yield Ok::<_, Infallible>(sse_event(&frame));
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn on_get_task(state: &AppState, params: Value) -> Result<Value, AgentError> {
    let params: TaskQueryParams = parse_params(params)?;
    let mut task = state
        .tasks
        .get(&params.id)
        .ok_or_else(|| AgentError::TaskNotFound(params.id.clone()))?;
    if let Some(n) = params.history_length {
        let skip = task.history.len().saturating_sub(n);
        task.history.drain(..skip);
    }
    Ok(serde_json::to_value(StreamResponse::Task(task))?)
}

async fn on_cancel_task(
    state: &AppState,
    params: Value,
    caller: CallContext,
) -> Result<Value, AgentError> {
    let params: TaskIdParams = parse_params(params)?;
    let task = state
        .tasks
        .get(&params.id)
        .ok_or_else(|| AgentError::TaskNotFound(params.id.clone()))?;

    let context = RequestContext {
        task_id: task.id.clone(),
        context_id: task.context_id.clone(),
        message: task
            .history
            .last()
            .cloned()
            .unwrap_or_else(|| Message::user_text("")),
        current_task: Some(task),
        call_context: caller,
    };
    let (queue, mut events) = EventQueue::new();
    state.executor.cancel(context, queue).await?;

    let inbound = Message::user_text("");
    while let Ok(event) = events.try_recv() {
        state.tasks.apply(&event, &inbound);
    }
    let task = state
        .tasks
        .get(&params.id)
        .ok_or_else(|| AgentError::TaskNotFound(params.id.clone()))?;
    Ok(serde_json::to_value(StreamResponse::Task(task))?)
}
