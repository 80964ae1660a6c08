//! Confirmation channel for plans with confirm verdicts.
//!
//! The coordinator raises one [`ConfirmationRequest`] per plan, listing every
//! step that needs approval, and waits for a yes/no answer. The wait is
//! bounded by the coordinator; an unanswered request counts as a denial.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortex_core::{Plan, PlanDecision};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use uuid::Uuid;

/// One step awaiting approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationItem {
    pub step_index: usize,
    pub command: String,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    /// Pending-confirmation id; answers are keyed by it.
    pub id: Uuid,
    pub plan_id: Uuid,
    pub target: String,
    pub request: String,
    pub items: Vec<ConfirmationItem>,
    pub created_at: DateTime<Utc>,
}

impl ConfirmationRequest {
    pub fn for_plan(plan: &Plan, decision: &PlanDecision) -> Self {
        let items = decision
            .confirmations()
            .map(|d| ConfirmationItem {
                step_index: d.step_index,
                command: plan
                    .steps
                    .get(d.step_index)
                    .map(|s| s.command.to_string())
                    .unwrap_or_default(),
                justification: d.justification.clone(),
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            plan_id: plan.plan_id,
            target: plan.target.clone(),
            request: plan.request.clone(),
            items,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationAnswer {
    Approved,
    Denied,
}

#[async_trait]
pub trait ConfirmationChannel: Send + Sync {
    /// Block until the request is answered. Dropping the future abandons it.
    async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationAnswer;
}

/// Approves everything. Used for `--yes`.
pub struct AutoApprove;

#[async_trait]
impl ConfirmationChannel for AutoApprove {
    async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationAnswer {
        tracing::info!(confirmation_id = %request.id, "Confirmation auto-approved");
        ConfirmationAnswer::Approved
    }
}

/// Denies everything. Used when no interactive channel exists.
pub struct AutoDeny;

#[async_trait]
impl ConfirmationChannel for AutoDeny {
    async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationAnswer {
        tracing::info!(confirmation_id = %request.id, "Confirmation auto-denied");
        ConfirmationAnswer::Denied
    }
}

/// Asks on the terminal. Anything but `y`/`yes` is a denial.
///
/// The terminal is read on a detached thread. When the coordinator stops
/// waiting, the read is abandoned and never holds up runtime shutdown.
pub struct TerminalPrompt;

#[async_trait]
impl ConfirmationChannel for TerminalPrompt {
    async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationAnswer {
        ask(request, || std::io::stdin().lock()).await
    }
}

/// Prompt on stderr and read the answer from `input`, opened on the prompt
/// thread.
async fn ask<F, R>(request: &ConfirmationRequest, input: F) -> ConfirmationAnswer
where
    F: FnOnce() -> R + Send + 'static,
    R: BufRead,
{
    let request = request.clone();
    let (reply, answer) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("cortex-confirm".to_string())
        .spawn(move || {
            let _ = reply.send(prompt(&request, &mut input()));
        });
    if let Err(e) = spawned {
        tracing::warn!("Failed to start confirmation prompt: {}", e);
        return ConfirmationAnswer::Denied;
    }

    match answer.await {
        Ok(Ok(true)) => ConfirmationAnswer::Approved,
        Ok(Ok(false)) => ConfirmationAnswer::Denied,
        Ok(Err(e)) => {
            tracing::warn!("Confirmation prompt failed: {}", e);
            ConfirmationAnswer::Denied
        }
        Err(_) => {
            tracing::warn!("Confirmation prompt ended without an answer");
            ConfirmationAnswer::Denied
        }
    }
}

fn prompt(request: &ConfirmationRequest, input: &mut impl BufRead) -> std::io::Result<bool> {
    let mut err = std::io::stderr().lock();
    writeln!(err, "\nConfirmation required for '{}':", request.target)?;
    for item in &request.items {
        writeln!(
            err,
            "  step {}: {}\n          {}",
            item.step_index + 1,
            item.command,
            item.justification
        )?;
    }
    write!(err, "Proceed? [y/N] ")?;
    err.flush()?;
    drop(err);

    let mut line = String::new();
    input.read_line(&mut line)?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfirmationError {
    #[error("no pending confirmation with id {0}")]
    NotFound(Uuid),

    #[error("lock error: {0}")]
    Lock(String),
}

struct Pending {
    request: ConfirmationRequest,
    reply: oneshot::Sender<ConfirmationAnswer>,
}

/// Confirmation channel answered from elsewhere (another task, a UI) by
/// pending-confirmation id.
#[derive(Clone, Default)]
pub struct PendingConfirmations {
    pending: Arc<Mutex<HashMap<Uuid, Pending>>>,
}

impl PendingConfirmations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests currently waiting for an answer.
    pub fn pending(&self) -> Result<Vec<ConfirmationRequest>, ConfirmationError> {
        let pending = self.lock()?;
        let mut requests: Vec<_> = pending.values().map(|p| p.request.clone()).collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    pub fn answer(&self, id: Uuid, answer: ConfirmationAnswer) -> Result<(), ConfirmationError> {
        let entry = self.lock()?.remove(&id).ok_or(ConfirmationError::NotFound(id))?;
        // The waiter may have given up already; then the answer is moot.
        let _ = entry.reply.send(answer);
        tracing::info!(confirmation_id = %id, answer = ?answer, "Confirmation answered");
        Ok(())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Pending>>, ConfirmationError> {
        self.pending
            .lock()
            .map_err(|e| ConfirmationError::Lock(format!("Failed to acquire lock: {}", e)))
    }
}

/// Removes an abandoned request when the waiting future is dropped.
struct Registration<'a> {
    owner: &'a PendingConfirmations,
    id: Uuid,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.owner.lock() {
            pending.remove(&self.id);
        }
    }
}

#[async_trait]
impl ConfirmationChannel for PendingConfirmations {
    async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationAnswer {
        let (reply, answer) = oneshot::channel();
        match self.lock() {
            Ok(mut pending) => {
                pending.insert(
                    request.id,
                    Pending {
                        request: request.clone(),
                        reply,
                    },
                );
            }
            Err(e) => {
                tracing::warn!("{}", e);
                return ConfirmationAnswer::Denied;
            }
        }
        let _registration = Registration {
            owner: self,
            id: request.id,
        };
        tracing::info!(
            confirmation_id = %request.id,
            target = %request.target,
            steps = request.items.len(),
            "Waiting for confirmation"
        );
        answer.await.unwrap_or(ConfirmationAnswer::Denied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::{PackageManager, SecurityDecision};
    use std::time::Duration;

    fn request() -> ConfirmationRequest {
        let plan = Plan::new(
            "remove nginx",
            "nginx",
            vec![PackageManager::Apt.remove_step("nginx", "/tmp", None)],
        );
        let decision = PlanDecision {
            decisions: vec![SecurityDecision::confirm(0, "removes software")],
        };
        ConfirmationRequest::for_plan(&plan, &decision)
    }

    #[test]
    fn request_lists_confirm_steps() {
        let request = request();
        assert_eq!(request.items.len(), 1);
        assert_eq!(request.items[0].command, "apt-get remove -y nginx");
        assert_eq!(request.items[0].justification, "removes software");
    }

    #[tokio::test]
    async fn answer_by_id_releases_waiter() {
        let channel = PendingConfirmations::new();
        let request = request();
        let id = request.id;

        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.confirm(&request).await })
        };
        while channel.pending().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        channel.answer(id, ConfirmationAnswer::Approved).unwrap();
        assert_eq!(waiter.await.unwrap(), ConfirmationAnswer::Approved);
        assert!(channel.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abandoned_request_is_withdrawn() {
        let channel = PendingConfirmations::new();
        let request = request();
        let result =
            tokio::time::timeout(Duration::from_millis(20), channel.confirm(&request)).await;
        assert!(result.is_err());
        assert!(channel.pending().unwrap().is_empty());
        assert!(matches!(
            channel.answer(request.id, ConfirmationAnswer::Approved),
            Err(ConfirmationError::NotFound(_))
        ));
    }

    /// Input that never produces a line, like a terminal nobody answers.
    struct Silent;

    impl std::io::Read for Silent {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            loop {
                std::thread::park();
            }
        }
    }

    #[tokio::test]
    async fn prompt_reads_the_answer() {
        let yes = ask(&request(), || std::io::Cursor::new(b"Yes\n".to_vec())).await;
        assert_eq!(yes, ConfirmationAnswer::Approved);
        let no = ask(&request(), || std::io::Cursor::new(b"\n".to_vec())).await;
        assert_eq!(no, ConfirmationAnswer::Denied);
        let closed = ask(&request(), || std::io::Cursor::new(Vec::new())).await;
        assert_eq!(closed, ConfirmationAnswer::Denied);
    }

    #[test]
    fn unanswered_prompt_does_not_hold_the_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(async {
            tokio::time::timeout(
                Duration::from_millis(100),
                ask(&request(), || std::io::BufReader::new(Silent)),
            )
            .await
        });
        assert!(result.is_err());

        let (done, dropped) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(runtime);
            let _ = done.send(());
        });
        assert!(dropped.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[tokio::test]
    async fn auto_channels() {
        assert_eq!(AutoApprove.confirm(&request()).await, ConfirmationAnswer::Approved);
        assert_eq!(AutoDeny.confirm(&request()).await, ConfirmationAnswer::Denied);
    }
}
