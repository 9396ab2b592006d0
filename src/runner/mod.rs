//! Scenario runner: drives one plain-English scenario through the MCP client.
//!
//! This module handles:
//! - Loading `config.jsonc` and `.env` overrides
//! - Building the system prompt for the selected environment
//! - Persisting attachments emitted by the server
//! - Writing the JSON and HTML run reports

pub mod artifacts;
pub mod config;
pub mod errors;
pub mod prompt;
pub mod report;
pub mod run;

pub use config::{load_config, ProjectConfig, RunContext};
pub use errors::RunnerError;
pub use report::{RunResult, RunStatus};
pub use run::{run_scenario, RunOptions};
