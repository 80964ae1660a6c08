//! Planner configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlannerKind {
    /// Built-in parser for literal requests and stacks.
    #[default]
    Literal,
    /// External program: request on stdin, JSON plan on stdout.
    External,
    /// Reject every request.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub kind: PlannerKind,

    /// Program run by the external planner.
    #[serde(default)]
    pub command: Option<PathBuf>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Longest accepted request text, in bytes.
    #[serde(default = "default_max_request_len")]
    pub max_request_len: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            kind: PlannerKind::default(),
            command: None,
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            max_request_len: default_max_request_len(),
        }
    }
}

impl PlannerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_request_len() -> usize {
    1000
}
