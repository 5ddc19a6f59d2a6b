//! Public error type (§7 kinds 4 and 7 — the only two that "propagate to
//! the caller unchanged"). Kinds 1-3, 5, 6 are always represented as data
//! (`#ERR` cells, `RowState` diagnostics) and never raised here.
//!
//! Grounded on `formualizer-workbook` being the one crate in the teacher's
//! own stack whose `Cargo.toml` lists `thiserror` — `-common`/`-parse`/
//! `-eval` hand-roll their error types, same as `docflow-common::CoreError`
//! does here.
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocflowError {
    /// A structural dependency cycle among tables/document variables
    /// (§4.6/§7 kind 4, §8 scenario 4/5). `path` is the arrow-joined
    /// cycle witness, e.g. `"table:A -> table:B -> table:A"`.
    #[error("dependency cycle: {path}")]
    Cycle { path: String },
    #[error("evaluation requires a non-null project")]
    NullProject,
    #[error("evaluation requires a non-null formula context")]
    NullContext,
}

impl From<docflow_eval::PlanError> for DocflowError {
    fn from(err: docflow_eval::PlanError) -> Self {
        // `PlanError::message` is already the fully-rendered
        // `"dependency cycle: ..."` string; strip the prefix back off so
        // it isn't doubled when `DocflowError::Cycle`'s own `#[error]`
        // re-adds it.
        let path = err
            .message
            .strip_prefix("dependency cycle: ")
            .unwrap_or(&err.message)
            .to_string();
        DocflowError::Cycle { path }
    }
}
