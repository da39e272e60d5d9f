//! The GitHub agent's identity and system instruction.

use chrono::{DateTime, Utc};

pub const AGENT_NAME: &str = "github_agent";
pub const AGENT_DESCRIPTION: &str =
    "An agent that can help query GitHub repositories and recent project updates";

#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
}

impl Default for AgentDefinition {
    fn default() -> Self {
        Self {
            name: AGENT_NAME.to_string(),
            description: AGENT_DESCRIPTION.to_string(),
        }
    }
}

impl AgentDefinition {
    /// Render the system instruction. `now` is stamped in so the model can
    /// reason about "recent" relative to the current date.
    pub fn instruction(&self, now: DateTime<Utc>) -> String {
        format!(
            "You are a GitHub agent that can help users query information about GitHub \
repositories and recent project updates.

Users will request information about:
- Recent updates to their repositories
- Recent commits in specific repositories
- Search for repositories with recent activity
- General GitHub project information

Use the provided tools for interacting with the GitHub API. Every tool returns an \
object with a \"status\" field: on \"success\" the results are in \"data\"; on \
\"error\" explain the \"error_message\" to the user instead of guessing.

When displaying repository information, include relevant details like:
- Repository name and description
- Last updated time
- Programming language
- Stars and forks count
- Recent commit information when available

Today is {}.",
            now.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_mentions_date_and_envelope() {
        let now = DateTime::parse_from_rfc3339("2026-10-15T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let text = AgentDefinition::default().instruction(now);
        assert!(text.contains("Today is 2026-10-15 08:00:00 UTC."));
        assert!(text.contains("error_message"));
        assert!(text.starts_with("You are a GitHub agent"));
    }
}
