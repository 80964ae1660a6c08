//! Transaction history configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistoryConfig {
    /// Directory holding transaction records. Defaults to `<home>/history`.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Default number of rows shown by `history list`.
    #[serde(default)]
    pub list_limit: Option<usize>,
}
