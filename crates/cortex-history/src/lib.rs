//! Cortex transaction history.
//!
//! Every approved plan becomes a [`Transaction`](cortex_core::Transaction):
//! opened by `begin`, appended to as each step completes, and sealed once the
//! plan finishes. Records are durable before each call returns and never
//! change after sealing; a rollback is a new transaction that references the
//! original.

pub mod error;
pub mod inverse;
pub mod store;

pub use error::StoreError;
pub use inverse::compute_inverse;
pub use store::{FileTransactionStore, TransactionStore};
