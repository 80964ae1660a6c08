//! Planner backed by an external program.
//!
//! The program receives `{"request": ..., "context": ...}` as JSON on stdin
//! and must print a plan proposal as JSON on stdout. Its output is checked
//! against the plan schema before deserialization, then handed on like any
//! other candidate plan. Output past the size limit kills the planner.

use crate::error::PlannerError;
use crate::request::validate_request;
use crate::{PlanContext, Planner};
use async_trait::async_trait;
use cortex_core::{Plan, PlannerConfig, Step};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

const PLAN_SCHEMA: &str = include_str!("../../../schemas/Plan.schema.json");

/// Largest planner output accepted, in bytes.
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Planner stderr kept for error messages; the rest is drained.
const MAX_STDERR_BYTES: usize = 16 * 1024;

/// The subset of a plan a planner is allowed to choose. Identity,
/// timestamps and rollback linkage are always assigned locally.
#[derive(Debug, Deserialize)]
struct PlanProposal {
    target: String,
    steps: Vec<Step>,
}

pub struct ExternalPlanner {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    max_request_len: usize,
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for ExternalPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalPlanner")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ExternalPlanner {
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        timeout: Duration,
        max_request_len: usize,
    ) -> Result<Self, PlannerError> {
        let schema: Value = serde_json::from_str(PLAN_SCHEMA)?;
        let validator = jsonschema::draft202012::options()
            .build(&schema)
            .map_err(|e| PlannerError::Schema(format!("invalid plan schema: {}", e)))?;
        Ok(Self {
            program: program.into(),
            args,
            timeout,
            max_request_len,
            validator,
        })
    }

    pub fn from_config(config: &PlannerConfig) -> Result<Self, PlannerError> {
        let program = config.command.clone().ok_or_else(|| {
            PlannerError::NotConfigured("planner.command is required for kind 'external'".into())
        })?;
        Self::new(
            program,
            config.args.clone(),
            config.timeout(),
            config.max_request_len,
        )
    }

    async fn run(&self, input: &[u8]) -> Result<Vec<u8>, PlannerError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PlannerError::External(format!("failed to start {}: {}", self.program.display(), e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(input).await {
                Ok(()) => {}
                // Planner exited without reading its input.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e.into()),
            }
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let collected = async {
            let (stdout, stderr) = tokio::try_join!(
                read_stdout(stdout, MAX_OUTPUT_BYTES),
                read_stderr(stderr, MAX_STDERR_BYTES)
            )?;
            let status = child.wait().await?;
            Ok::<_, PlannerError>((status, stdout, stderr))
        };
        let outcome = tokio::time::timeout(self.timeout, collected).await;

        let (status, stdout, stderr) = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                kill(&mut child).await;
                return Err(e);
            }
            Err(_) => {
                kill(&mut child).await;
                return Err(PlannerError::Timeout(self.timeout));
            }
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(PlannerError::External(format!(
                "{} exited with {}: {}",
                self.program.display(),
                status,
                stderr.trim()
            )));
        }
        Ok(stdout)
    }

    /// Schema-check and deserialize raw planner output.
    fn parse_output(&self, request: &str, stdout: &[u8]) -> Result<Plan, PlannerError> {
        let value: Value = serde_json::from_slice(stdout)
            .map_err(|e| PlannerError::External(format!("output is not JSON: {}", e)))?;

        let problems: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|error| {
                let path = error.instance_path().to_string();
                let location = if path.is_empty() { "(root)".to_string() } else { path };
                format!("{}: {}", location, error)
            })
            .collect();
        if !problems.is_empty() {
            return Err(PlannerError::Schema(problems.join("; ")));
        }

        let proposal: PlanProposal = serde_json::from_value(value)?;
        Ok(Plan::new(request, proposal.target, proposal.steps))
    }
}

/// Read planner stdout, failing as soon as it grows past `limit`.
async fn read_stdout<R>(reader: Option<R>, limit: usize) -> Result<Vec<u8>, PlannerError>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    if let Some(reader) = reader {
        reader.take(limit as u64 + 1).read_to_end(&mut kept).await?;
    }
    if kept.len() > limit {
        return Err(PlannerError::External(format!(
            "output exceeds {} bytes",
            limit
        )));
    }
    Ok(kept)
}

/// Keep the first `limit` bytes of stderr and drain the rest.
async fn read_stderr<R>(reader: Option<R>, limit: usize) -> Result<Vec<u8>, PlannerError>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    if let Some(mut reader) = reader {
        (&mut reader).take(limit as u64).read_to_end(&mut kept).await?;
        tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    }
    Ok(kept)
}

async fn kill(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!("failed to kill external planner: {}", e);
    }
}

#[async_trait]
impl Planner for ExternalPlanner {
    async fn propose_plan(
        &self,
        request: &str,
        context: &PlanContext,
    ) -> Result<Plan, PlannerError> {
        validate_request(request, self.max_request_len)?;

        let input = serde_json::to_vec(&json!({
            "request": request,
            "context": context,
        }))?;
        tracing::debug!(program = %self.program.display(), "Running external planner");
        let stdout = self.run(&input).await?;
        let plan = self.parse_output(request, &stdout)?;
        tracing::info!(
            plan_id = %plan.plan_id,
            target = %plan.target,
            steps = plan.steps.len(),
            "External planner proposed plan"
        );
        Ok(plan)
    }
}
