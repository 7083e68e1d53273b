//! Consolidation strategy configuration (spec §4.8 "mode `sync` =
//! immediate, `async` = batched by scheduler on leader").

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationMode {
    /// Every `add`/`sub`/`set` consolidates the transaction it just wrote
    /// before returning.
    Sync,
    /// Transactions accumulate until a scheduler on the current leader
    /// calls `consolidate_all`.
    Async,
}
