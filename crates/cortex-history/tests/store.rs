use cortex_core::{
    ExecutionOutcome, ExecutionResult, PackageManager, Plan, TransactionFilter, TransactionStatus,
    VerificationResult,
};
use cortex_history::{FileTransactionStore, StoreError, TransactionStore};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use uuid::Uuid;

fn plan(target: &str) -> Plan {
    Plan::new(
        format!("install {}", target),
        target,
        vec![
            PackageManager::Apt.install_step(target, "/tmp", None),
            PackageManager::Apt.install_step(&format!("{}-doc", target), "/tmp", None),
        ],
    )
}

fn succeeded() -> ExecutionResult {
    ExecutionResult {
        sandbox_id: Uuid::new_v4(),
        outcome: ExecutionOutcome::Exited,
        exit_code: Some(0),
        stdout: "done".to_string(),
        stderr: String::new(),
        stdout_truncated: false,
        stderr_truncated: false,
        duration_ms: 5,
        attempts: 1,
        error: None,
    }
}

#[tokio::test]
async fn torn_final_line_is_dropped_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileTransactionStore::open(dir.path()).unwrap();
    let id = store.begin(&plan("nginx")).await.unwrap();
    store
        .record_step(id, succeeded(), VerificationResult::observed(true, "installed"))
        .await
        .unwrap();

    let path = store.dir().join(format!("{}.jsonl", id));
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"{\"entry\":\"step\",\"rec").unwrap();
    drop(file);
    drop(store);

    let reopened = FileTransactionStore::open(dir.path()).unwrap();
    let txn = reopened.get(id).await.unwrap();
    assert_eq!(txn.steps.len(), 1);
    assert!(!txn.is_sealed());
}

#[tokio::test]
async fn garbage_before_the_last_line_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileTransactionStore::open(dir.path()).unwrap();
    let id = store.begin(&plan("git")).await.unwrap();
    let path = store.dir().join(format!("{}.jsonl", id));
    drop(store);

    let original = fs::read_to_string(&path).unwrap();
    let begin_line = original.lines().next().unwrap();
    fs::write(&path, format!("{}\nnot json\n{}\n", begin_line, begin_line)).unwrap();

    match FileTransactionStore::open(dir.path()) {
        Err(StoreError::Corrupt { line, .. }) => assert_eq!(line, 2),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("corrupt record was accepted"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transactions_are_recorded_independently() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileTransactionStore::open(dir.path()).unwrap());

    let mut handles = Vec::new();
    for n in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let id = store.begin(&plan(&format!("pkg{}", n))).await.unwrap();
            for _ in 0..2 {
                store
                    .record_step(id, succeeded(), VerificationResult::observed(true, "installed"))
                    .await
                    .unwrap();
            }
            store.seal(id, TransactionStatus::Completed).await.unwrap();
            id
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    drop(store);

    let reopened = FileTransactionStore::open(dir.path()).unwrap();
    let all = reopened.list(&TransactionFilter::default()).await.unwrap();
    assert_eq!(all.len(), 8);
    for id in ids {
        let txn = reopened.get(id).await.unwrap();
        assert_eq!(txn.steps.len(), 2);
        assert_eq!(txn.steps[1].index, 1);
        assert_eq!(txn.status, Some(TransactionStatus::Completed));
    }
}
