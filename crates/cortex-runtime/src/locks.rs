//! Per-target advisory locks.
//!
//! Each lock key maps to a file under the lock directory, held with
//! `flock(LOCK_EX)`. Locks taken through separate file handles conflict even
//! inside one process, so the same mechanism serializes concurrent plans in
//! this process and across processes. Keys are always acquired in sorted
//! order.

use cortex_core::{Effect, Plan};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

const LOCK_POLL: Duration = Duration::from_millis(25);

/// Lock keys for `plan`: its target, every package it touches and every
/// absolute path argument.
pub fn lock_keys(plan: &Plan) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    keys.insert(format!("target:{}", plan.target));
    for step in &plan.steps {
        match &step.effect {
            Effect::Install { manager, package } | Effect::Remove { manager, package } => {
                keys.insert(format!("package:{}:{}", manager, package));
            }
            Effect::Refresh { manager } => {
                keys.insert(format!("index:{}", manager));
            }
            Effect::Command { .. } => {}
        }
        for arg in &step.command.args {
            if arg.starts_with('/') {
                keys.insert(format!("path:{}", arg.trim_end_matches('/')));
            }
        }
    }
    keys
}

#[derive(Debug, Clone)]
pub struct TargetLocks {
    dir: PathBuf,
}

/// Held locks. Released on drop.
#[derive(Debug)]
pub struct TargetGuard {
    held: Vec<(String, File)>,
}

impl TargetGuard {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.held.iter().map(|(key, _)| key.as_str())
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        // Release in reverse acquisition order.
        while let Some((key, file)) = self.held.pop() {
            unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
            tracing::trace!(key = %key, "Released lock");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The key was still held when the deadline passed.
    #[error("timed out waiting for lock on {0}")]
    Timeout(String),

    #[error("lock file error: {0}")]
    Io(#[from] std::io::Error),
}

impl TargetLocks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Acquire every key in `keys`, in order, within `timeout` overall.
    pub async fn acquire(
        &self,
        keys: &BTreeSet<String>,
        timeout: Duration,
    ) -> Result<TargetGuard, LockError> {
        fs::create_dir_all(&self.dir)?;
        let deadline = Instant::now() + timeout;
        let mut guard = TargetGuard {
            held: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            let file = self.open(key)?;
            loop {
                if try_lock(&file)? {
                    break;
                }
                if Instant::now() >= deadline {
                    return Err(LockError::Timeout(key.clone()));
                }
                tokio::time::sleep(LOCK_POLL).await;
            }
            tracing::trace!(key = %key, "Acquired lock");
            guard.held.push((key.clone(), file));
        }
        Ok(guard)
    }

    fn open(&self, key: &str) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .mode(0o600)
            .open(self.dir.join(lock_file_name(key)))
    }
}

/// `Ok(false)` when another handle holds the lock.
fn try_lock(file: &File) -> std::io::Result<bool> {
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

/// Readable, filesystem-safe and unambiguous: a sanitized prefix of the key
/// plus an FNV-1a hash of all of it.
fn lock_file_name(key: &str) -> String {
    let readable: String = key
        .chars()
        .take(48)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    format!("{}-{:016x}.lock", readable, hash)
}
