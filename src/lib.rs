//! A2A agent that answers questions about GitHub repositories.
//!
//! Questions arrive as A2A JSON-RPC tasks, an LLM decides which GitHub
//! queries to run through tool calls, and the answer is returned as a task
//! artifact.

pub mod agent;
pub mod config;
pub mod content;
pub mod error;
pub mod executor;
pub mod github;
pub mod llm;
pub mod parts;
pub mod protocol;
pub mod runner;
pub mod server;
pub mod session;
pub mod tasks;
pub mod tools;
