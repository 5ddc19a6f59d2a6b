//! Meta crate that re-exports the docflow formula core's layers with
//! sensible defaults. Downstream users can depend on this crate and opt
//! into specific layers via feature flags while keeping access to the
//! underlying crates when deeper integration is required.

#[cfg(feature = "common")]
pub use docflow_common as common;

#[cfg(feature = "parse")]
pub use docflow_parse as parse;

#[cfg(feature = "eval")]
pub use docflow_eval as eval;

#[cfg(feature = "workbook")]
pub use docflow_workbook as workbook;

#[cfg(feature = "workbook")]
pub use docflow_workbook::{DocflowError, Engine, EvaluationMetrics, EvaluationRequest, ProjectContext, ProjectRef};
