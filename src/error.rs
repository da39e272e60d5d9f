use serde_json::json;

use crate::protocol::JsonRpcError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("GitHub API error: {0}")]
    GitHub(#[from] octocrab::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Username is required when not using authentication token")]
    Unauthenticated,

    #[error("LLM request failed: {0}")]
    Llm(#[from] reqwest::Error),

    #[error("LLM API error ({status}): {message}")]
    LlmApi { status: u16, message: String },

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Unsupported part type: {0}")]
    UnsupportedPartType(String),

    #[error("Invalid part: {0}")]
    InvalidPart(String),

    #[error("This operation is not supported")]
    UnsupportedOperation,

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {0} is in a terminal state")]
    TaskTerminal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl AgentError {
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            AgentError::TaskNotFound(id) => JsonRpcError::new(
                JsonRpcError::TASK_NOT_FOUND,
                "Task not found",
                Some(json!({ "taskId": id })),
            ),
            AgentError::TaskTerminal(id) => JsonRpcError::new(
                JsonRpcError::TASK_NOT_CANCELABLE,
                self.to_string(),
                Some(json!({ "taskId": id })),
            ),
            AgentError::UnsupportedOperation => JsonRpcError::new(
                JsonRpcError::UNSUPPORTED_OPERATION,
                self.to_string(),
                None,
            ),
            AgentError::InvalidParam(_)
            | AgentError::UnsupportedPartType(_)
            | AgentError::InvalidPart(_) => {
                JsonRpcError::new(JsonRpcError::INVALID_PARAMS, self.to_string(), None)
            }
            AgentError::Config(_)
            | AgentError::GitHub(_)
            | AgentError::Unauthenticated
            | AgentError::Llm(_)
            | AgentError::LlmApi { .. }
            | AgentError::MalformedResponse(_)
            | AgentError::Serialization(_)
            | AgentError::Io(_)
            | AgentError::Other(_) => {
                JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, self.to_string(), None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_operation_maps_to_a2a_code() {
        let err = AgentError::UnsupportedOperation.to_jsonrpc_error();
        assert_eq!(err.code, -32004);
        assert_eq!(err.message, "This operation is not supported");
    }

    #[test]
    fn task_not_found_carries_task_id() {
        let err = AgentError::TaskNotFound("t-1".into()).to_jsonrpc_error();
        assert_eq!(err.code, -32001);
        assert_eq!(err.data, Some(json!({ "taskId": "t-1" })));
    }

    #[test]
    fn part_errors_are_invalid_params() {
        let err = AgentError::UnsupportedPartType("data".into()).to_jsonrpc_error();
        assert_eq!(err.code, -32602);
        assert!(err.message.contains("data"));
    }

    #[test]
    fn upstream_failures_are_internal() {
        let err = AgentError::LlmApi {
            status: 502,
            message: "bad gateway".into(),
        }
        .to_jsonrpc_error();
        assert_eq!(err.code, -32603);
    }
}
