//! Transaction store backends.

use crate::error::StoreError;
use crate::inverse::compute_inverse;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortex_core::{
    ExecutionResult, Plan, StepRecord, StepStatus, Transaction, TransactionFilter,
    TransactionId, TransactionStatus, TransactionSummary, VerificationResult,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable, append-only store of transactions.
///
/// `begin`, `record_step` and `seal` return only after the record is on
/// stable storage. Sealed transactions never change.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Open a transaction for an approved plan.
    async fn begin(&self, plan: &Plan) -> Result<TransactionId, StoreError>;

    /// Record the next step of the transaction's plan, computing its
    /// classification and inverse.
    async fn record_step(
        &self,
        id: TransactionId,
        execution: ExecutionResult,
        verification: VerificationResult,
    ) -> Result<StepRecord, StoreError>;

    /// Seal the transaction with its final status.
    async fn seal(
        &self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<Transaction, StoreError>;

    /// Full record, with `rolled_back_by` derived.
    async fn get(&self, id: TransactionId) -> Result<Transaction, StoreError>;

    /// Summaries matching `filter`, newest first.
    async fn list(&self, filter: &TransactionFilter) -> Result<Vec<TransactionSummary>, StoreError>;
}

/// One line of a transaction record file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
enum JournalEntry {
    Begin {
        id: TransactionId,
        plan: Plan,
        started_at: DateTime<Utc>,
    },
    Step {
        record: StepRecord,
    },
    Seal {
        status: TransactionStatus,
        sealed_at: DateTime<Utc>,
    },
}

#[derive(Default)]
struct Index {
    transactions: HashMap<TransactionId, Transaction>,
    /// Original transaction -> first completed rollback of it.
    rolled_back_by: HashMap<TransactionId, TransactionId>,
}

impl Index {
    fn insert(&mut self, txn: Transaction) {
        self.note_rollback(&txn);
        self.transactions.insert(txn.id, txn);
    }

    fn note_rollback(&mut self, txn: &Transaction) {
        if let (Some(original), Some(TransactionStatus::Completed)) =
            (txn.plan.rollback_of, txn.status)
        {
            self.rolled_back_by.entry(original).or_insert(txn.id);
        }
    }

    fn view(&self, txn: &Transaction) -> Transaction {
        let mut txn = txn.clone();
        txn.rolled_back_by = self.rolled_back_by.get(&txn.id).copied();
        txn
    }
}

/// File-backed store: one JSON Lines file per transaction under
/// `<dir>/transactions/<id>.jsonl`.
///
/// Every append is followed by `sync_all` before the in-memory index is
/// updated, so the index never runs ahead of the disk. A single lock
/// serializes all writers.
pub struct FileTransactionStore {
    dir: PathBuf,
    index: Mutex<Index>,
}

impl FileTransactionStore {
    /// Open (or create) a store rooted at `dir` and replay existing records.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().join("transactions");
        fs::create_dir_all(&dir)?;
        restrict_dir_permissions(&dir)?;

        let mut loaded = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "jsonl") {
                if let Some(txn) = replay(&path)? {
                    loaded.push(txn);
                }
            }
        }
        // Rollbacks must be noted in the order they happened.
        loaded.sort_by_key(|t| t.started_at);

        let mut index = Index::default();
        for txn in loaded {
            index.insert(txn);
        }

        tracing::debug!(
            dir = %dir.display(),
            transactions = index.transactions.len(),
            "Opened transaction store"
        );

        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    /// Directory holding the record files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: TransactionId) -> PathBuf {
        self.dir.join(format!("{}.jsonl", id))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Index>, StoreError> {
        self.index
            .lock()
            .map_err(|e| StoreError::Lock(format!("Failed to acquire store lock: {}", e)))
    }
}

#[async_trait]
impl TransactionStore for FileTransactionStore {
    async fn begin(&self, plan: &Plan) -> Result<TransactionId, StoreError> {
        let mut index = self.lock()?;

        let id = TransactionId::new();
        let started_at = Utc::now();
        let entry = JournalEntry::Begin {
            id,
            plan: plan.clone(),
            started_at,
        };

        let path = self.path_for(id);
        let mut file = create_record_file(&path)?;
        write_entry(&mut file, &entry)?;
        sync_dir(&self.dir)?;

        index.insert(Transaction {
            id,
            plan: plan.clone(),
            steps: Vec::new(),
            status: None,
            started_at,
            sealed_at: None,
            rolled_back_by: None,
        });

        tracing::info!(transaction_id = %id, target = %plan.target, "Transaction started");
        Ok(id)
    }

    async fn record_step(
        &self,
        id: TransactionId,
        execution: ExecutionResult,
        verification: VerificationResult,
    ) -> Result<StepRecord, StoreError> {
        let mut index = self.lock()?;
        let txn = index
            .transactions
            .get(&id)
            .ok_or(StoreError::NotFound(id))?;
        if txn.is_sealed() {
            return Err(StoreError::AlreadySealed(id));
        }

        let position = txn.steps.len();
        let step = txn
            .plan
            .steps
            .get(position)
            .cloned()
            .ok_or(StoreError::StepOverflow {
                id,
                plan_steps: txn.plan.steps.len(),
            })?;

        let status = StepStatus::classify(&step, &execution, &verification);
        let inverse = compute_inverse(&step, &status);
        let record = StepRecord {
            index: position,
            step,
            execution,
            verification,
            status,
            inverse,
            recorded_at: Utc::now(),
        };

        let mut file = OpenOptions::new().append(true).open(self.path_for(id))?;
        write_entry(
            &mut file,
            &JournalEntry::Step {
                record: record.clone(),
            },
        )?;

        if let Some(txn) = index.transactions.get_mut(&id) {
            txn.steps.push(record.clone());
        }

        tracing::debug!(
            transaction_id = %id,
            step = position,
            status = %record.status,
            "Step recorded"
        );
        Ok(record)
    }

    async fn seal(
        &self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<Transaction, StoreError> {
        if status == TransactionStatus::RolledBack {
            return Err(StoreError::InvalidSeal { id, status });
        }

        let mut index = self.lock()?;
        let txn = index
            .transactions
            .get(&id)
            .ok_or(StoreError::NotFound(id))?;
        if txn.is_sealed() {
            return Err(StoreError::AlreadySealed(id));
        }

        let sealed_at = Utc::now();
        let mut file = OpenOptions::new().append(true).open(self.path_for(id))?;
        write_entry(&mut file, &JournalEntry::Seal { status, sealed_at })?;

        let mut sealed = txn.clone();
        sealed.status = Some(status);
        sealed.sealed_at = Some(sealed_at);
        index.insert(sealed.clone());

        tracing::info!(transaction_id = %id, status = %status, "Transaction sealed");
        Ok(index.view(&sealed))
    }

    async fn get(&self, id: TransactionId) -> Result<Transaction, StoreError> {
        let index = self.lock()?;
        let txn = index
            .transactions
            .get(&id)
            .ok_or(StoreError::NotFound(id))?;
        Ok(index.view(txn))
    }

    async fn list(&self, filter: &TransactionFilter) -> Result<Vec<TransactionSummary>, StoreError> {
        let index = self.lock()?;
        let mut summaries: Vec<TransactionSummary> = index
            .transactions
            .values()
            .map(|t| index.view(t).summary())
            .filter(|s| filter.matches(s))
            .collect();

        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            summaries.truncate(limit);
        }
        Ok(summaries)
    }
}

fn write_entry(file: &mut File, entry: &JournalEntry) -> Result<(), StoreError> {
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    file.write_all(line.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn create_record_file(path: &Path) -> Result<File, StoreError> {
    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    Ok(opts.open(path)?)
}

/// Persist the directory entry of a newly created record file.
fn sync_dir(dir: &Path) -> Result<(), StoreError> {
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

#[cfg(unix)]
fn restrict_dir_permissions(dir: &Path) -> Result<(), StoreError> {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_dir: &Path) -> Result<(), StoreError> {
    Ok(())
}

/// Rebuild a transaction from its record file.
///
/// A torn final line (crash mid-write) is dropped; a bad line anywhere else
/// is corruption.
fn replay(path: &Path) -> Result<Option<Transaction>, StoreError> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    let last = lines.len().saturating_sub(1);

    let corrupt = |line: usize, reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        line: line + 1,
        reason,
    };

    let mut txn: Option<Transaction> = None;
    for (n, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: JournalEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) if n == last => {
                tracing::warn!(
                    path = %path.display(),
                    line = n + 1,
                    error = %e,
                    "Dropping torn final record line"
                );
                break;
            }
            Err(e) => return Err(corrupt(n, e.to_string())),
        };

        match (entry, txn.as_mut()) {
            (JournalEntry::Begin { id, plan, started_at }, None) => {
                txn = Some(Transaction {
                    id,
                    plan,
                    steps: Vec::new(),
                    status: None,
                    started_at,
                    sealed_at: None,
                    rolled_back_by: None,
                });
            }
            (JournalEntry::Step { record }, Some(t)) if !t.is_sealed() => {
                if record.index != t.steps.len() {
                    return Err(corrupt(
                        n,
                        format!("expected step {}, found {}", t.steps.len(), record.index),
                    ));
                }
                t.steps.push(record);
            }
            (JournalEntry::Seal { status, sealed_at }, Some(t)) if !t.is_sealed() => {
                t.status = Some(status);
                t.sealed_at = Some(sealed_at);
            }
            (_, _) => return Err(corrupt(n, "entry out of order".to_string())),
        }
    }

    if txn.is_none() {
        tracing::warn!(path = %path.display(), "Ignoring record file without a begin entry");
    }
    Ok(txn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::{ExecutionOutcome, PackageManager};
    use uuid::Uuid;

    fn plan(target: &str, packages: &[&str]) -> Plan {
        let steps = packages
            .iter()
            .map(|p| PackageManager::Apt.install_step(p, "/tmp", None))
            .collect();
        Plan::new(format!("install {}", target), target, steps)
    }

    fn exited(code: i32) -> ExecutionResult {
        ExecutionResult {
            sandbox_id: Uuid::new_v4(),
            outcome: ExecutionOutcome::Exited,
            exit_code: Some(code),
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration_ms: 10,
            attempts: 1,
            error: None,
        }
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = FileTransactionStore::open(dir.path()).unwrap();
            let id = store.begin(&plan("nginx", &["nginx"])).await.unwrap();
            store
                .record_step(id, exited(0), VerificationResult::observed(true, "installed"))
                .await
                .unwrap();
            store.seal(id, TransactionStatus::Completed).await.unwrap();
            id
        };

        let store = FileTransactionStore::open(dir.path()).unwrap();
        let txn = store.get(id).await.unwrap();
        assert_eq!(txn.status, Some(TransactionStatus::Completed));
        assert_eq!(txn.steps.len(), 1);
        assert!(txn.steps[0].status.is_success());
        assert!(txn.steps[0].inverse.step().is_some());
    }

    #[tokio::test]
    async fn sealed_transactions_are_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTransactionStore::open(dir.path()).unwrap();
        let id = store.begin(&plan("a", &["a", "b"])).await.unwrap();
        store.seal(id, TransactionStatus::Failed).await.unwrap();

        let err = store
            .record_step(id, exited(0), VerificationResult::observed(true, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadySealed(_)));

        let err = store
            .seal(id, TransactionStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadySealed(_)));
    }

    #[tokio::test]
    async fn cannot_record_more_steps_than_planned() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTransactionStore::open(dir.path()).unwrap();
        let id = store.begin(&plan("a", &["a"])).await.unwrap();
        store
            .record_step(id, exited(0), VerificationResult::observed(true, ""))
            .await
            .unwrap();
        let err = store
            .record_step(id, exited(0), VerificationResult::observed(true, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StepOverflow { .. }));
    }

    #[tokio::test]
    async fn crash_mid_plan_leaves_unsealed_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = FileTransactionStore::open(dir.path()).unwrap();
            let id = store.begin(&plan("ab", &["a", "b"])).await.unwrap();
            store
                .record_step(id, exited(0), VerificationResult::observed(true, ""))
                .await
                .unwrap();
            id
        };

        // Simulate a torn write of the second step.
        let path = dir.path().join("transactions").join(format!("{}.jsonl", id));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"entry\":\"step\",\"rec").unwrap();

        let store = FileTransactionStore::open(dir.path()).unwrap();
        let txn = store.get(id).await.unwrap();
        assert!(!txn.is_sealed());
        assert_eq!(txn.steps.len(), 1);

        let summaries = store.list(&TransactionFilter::new()).await.unwrap();
        assert_eq!(summaries[0].status, None);
    }

    #[tokio::test]
    async fn completed_rollback_marks_original_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTransactionStore::open(dir.path()).unwrap();
        let id = store.begin(&plan("nginx", &["nginx"])).await.unwrap();
        store
            .record_step(id, exited(0), VerificationResult::observed(true, ""))
            .await
            .unwrap();
        let original = store.seal(id, TransactionStatus::Completed).await.unwrap();

        let undo = original.steps[0].inverse.step().cloned().unwrap();
        let rollback_plan = Plan::rollback(&original, vec![undo]);
        let rb = store.begin(&rollback_plan).await.unwrap();
        store
            .record_step(rb, exited(0), VerificationResult::observed(true, ""))
            .await
            .unwrap();
        store.seal(rb, TransactionStatus::Completed).await.unwrap();

        let txn = store.get(id).await.unwrap();
        assert_eq!(txn.status, Some(TransactionStatus::Completed));
        assert_eq!(txn.effective_status(), Some(TransactionStatus::RolledBack));
        assert_eq!(txn.rolled_back_by, Some(rb));

        // Derived again after reopening.
        drop(store);
        let store = FileTransactionStore::open(dir.path()).unwrap();
        let rolled_back = store
            .list(&TransactionFilter::new().status(TransactionStatus::RolledBack))
            .await
            .unwrap();
        assert_eq!(rolled_back.len(), 1);
        assert_eq!(rolled_back[0].id, id);
    }

    #[tokio::test]
    async fn list_filters_and_limits_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTransactionStore::open(dir.path()).unwrap();
        let mut ids = Vec::new();
        for target in ["a", "b", "a"] {
            let id = store.begin(&plan(target, &[target])).await.unwrap();
            store.seal(id, TransactionStatus::Failed).await.unwrap();
            ids.push(id);
        }

        let all = store.list(&TransactionFilter::new()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, ids[2]);

        let only_a = store
            .list(&TransactionFilter::new().target("a").limit(1))
            .await
            .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].id, ids[2]);
    }

    #[tokio::test]
    async fn rolled_back_cannot_be_sealed_directly() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTransactionStore::open(dir.path()).unwrap();
        let id = store.begin(&plan("a", &["a"])).await.unwrap();
        let err = store
            .seal(id, TransactionStatus::RolledBack)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSeal { .. }));
    }

    #[tokio::test]
    async fn missing_transaction_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTransactionStore::open(dir.path()).unwrap();
        let err = store.get(TransactionId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
