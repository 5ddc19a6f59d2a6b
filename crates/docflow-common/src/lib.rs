//! Shared value model, stable ids, the project data model, and the
//! lowest-level error type. The bottom of the dependency stack: no crate
//! here depends on `docflow-parse`, `docflow-eval`, or `docflow-workbook`.

pub mod column_kind;
pub mod error;
pub mod ids;
pub mod model;
pub mod value;

pub use column_kind::{ColumnKind, RowLookup, cell_to_formula_value, convert_to_cell};
pub use error::{CoreError, CoreErrorKind};
pub use ids::{ColumnId, DocumentId, RowId, TableId, VariantId};
pub use model::{
    Block, Column, DerivedConfig, DerivedStep, Document, JoinKind, KeyMapping, Project,
    Projection, Row, Table, TableVariable, Variant,
};
pub use value::{Cell, CellValue, ERR_SENTINEL, FormulaValue, LiteralValue, format_invariant_number};
