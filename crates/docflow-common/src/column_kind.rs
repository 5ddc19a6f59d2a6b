//! Column-kind-driven conversion between `FormulaValue` (what evaluation
//! produces) and `Cell` (what a row stores) — §4.1.
use crate::ids::{RowId, TableId};
use crate::value::{Cell, CellValue, FormulaValue};

/// The full set of column kinds from §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColumnKind {
    Number,
    Text,
    Checkbox,
    Select,
    Id,
    Formula,
    Relation { target_table: TableId },
    TableRef,
    Subtable,
    Spline,
    Vec2,
    Vec3,
    Vec4,
    Color,
    TextureAsset,
    MeshAsset,
    AudioAsset,
    UiAsset,
}

impl ColumnKind {
    fn is_asset(self) -> bool {
        matches!(
            self,
            ColumnKind::TextureAsset
                | ColumnKind::MeshAsset
                | ColumnKind::AudioAsset
                | ColumnKind::UiAsset
        )
    }

    fn is_text_like(self) -> bool {
        matches!(self, ColumnKind::Text | ColumnKind::Select | ColumnKind::Id) || self.is_asset()
    }
}

/// A hook a caller provides so `Relation`/`TableRef` conversion can validate
/// a string against the target table's rows (§4.1: "a String interpreted as
/// a RowId validated against the target table").
pub trait RowLookup {
    fn row_exists(&self, table: TableId, row: RowId) -> bool;
    fn parse_row_id(&self, table: TableId, text: &str) -> Option<RowId>;
}

/// Converts an evaluated `FormulaValue` into what the row should store for a
/// column of the given kind. Unsupported combinations produce the `#ERR`
/// cell, never a panic (§4.1, §7 kind 3).
pub fn convert_to_cell(
    kind: ColumnKind,
    value: &FormulaValue,
    source_text: Option<&str>,
    rows: &dyn RowLookup,
) -> Cell {
    match kind {
        ColumnKind::Number => match value {
            FormulaValue::Number(n) => Cell::value(CellValue::Number(*n)),
            _ => Cell::err(source_text.map(str::to_string)),
        },
        ColumnKind::Checkbox => match value {
            FormulaValue::Bool(b) => Cell::value(CellValue::Bool(*b)),
            _ => Cell::err(source_text.map(str::to_string)),
        },
        ColumnKind::Vec2 => match value {
            FormulaValue::Vec2(x, y) => Cell::value(CellValue::Vec2 { x: *x, y: *y }),
            FormulaValue::Vec3(x, y, _) => Cell::value(CellValue::Vec2 { x: *x, y: *y }),
            FormulaValue::Vec4(x, y, _, _) => Cell::value(CellValue::Vec2 { x: *x, y: *y }),
            FormulaValue::Color(r, g, _, _) => Cell::value(CellValue::Vec2 { x: *r, y: *g }),
            _ => Cell::err(source_text.map(str::to_string)),
        },
        ColumnKind::Vec3 => match value {
            FormulaValue::Vec3(x, y, z) => Cell::value(CellValue::Vec3 {
                x: *x,
                y: *y,
                z: *z,
            }),
            FormulaValue::Vec4(x, y, z, _) => Cell::value(CellValue::Vec3 {
                x: *x,
                y: *y,
                z: *z,
            }),
            FormulaValue::Color(r, g, b, _) => Cell::value(CellValue::Vec3 {
                x: *r,
                y: *g,
                z: *b,
            }),
            _ => Cell::err(source_text.map(str::to_string)),
        },
        ColumnKind::Vec4 => match value {
            FormulaValue::Vec4(x, y, z, w) => Cell::value(CellValue::Vec4 {
                x: *x,
                y: *y,
                z: *z,
                w: *w,
            }),
            FormulaValue::Color(r, g, b, a) => Cell::value(CellValue::Vec4 {
                x: *r,
                y: *g,
                z: *b,
                w: *a,
            }),
            _ => Cell::err(source_text.map(str::to_string)),
        },
        ColumnKind::Color => match value {
            FormulaValue::Color(r, g, b, a) => Cell::value(CellValue::Color {
                r: *r,
                g: *g,
                b: *b,
                a: *a,
            }),
            FormulaValue::Vec4(x, y, z, w) => Cell::value(CellValue::Color {
                r: *x,
                g: *y,
                b: *z,
                a: *w,
            }),
            _ => Cell::err(source_text.map(str::to_string)),
        },
        ColumnKind::Relation { target_table } => match value {
            FormulaValue::Row(row_id) if rows.row_exists(target_table, *row_id) => {
                Cell::value(CellValue::Row(*row_id))
            }
            FormulaValue::Text(s) => match rows.parse_row_id(target_table, s) {
                Some(row_id) => Cell::value(CellValue::Row(row_id)),
                None => Cell::err(source_text.map(str::to_string)),
            },
            _ => Cell::err(source_text.map(str::to_string)),
        },
        ColumnKind::TableRef => match value {
            FormulaValue::Table(table_id) => Cell::value(CellValue::Table(*table_id)),
            FormulaValue::Text(s) => s
                .trim()
                .parse::<u64>()
                .ok()
                .map(|raw| Cell::value(CellValue::Table(TableId::new(raw))))
                .unwrap_or_else(|| Cell::err(source_text.map(str::to_string))),
            _ => Cell::err(source_text.map(str::to_string)),
        },
        ColumnKind::Formula => convert_formula_legacy(value, source_text),
        ColumnKind::Text | ColumnKind::Select | ColumnKind::Id => {
            convert_text_like(value, source_text)
        }
        ColumnKind::TextureAsset
        | ColumnKind::MeshAsset
        | ColumnKind::AudioAsset
        | ColumnKind::UiAsset => convert_text_like(value, source_text),
        ColumnKind::Subtable | ColumnKind::Spline => {
            // Subtable/Spline columns are populated structurally, not via
            // scalar formula conversion; any formula write is a type error.
            Cell::err(source_text.map(str::to_string))
        }
    }
}

fn convert_text_like(value: &FormulaValue, source_text: Option<&str>) -> Cell {
    match value {
        FormulaValue::Text(s) => Cell::value(CellValue::Text(s.clone())),
        FormulaValue::Null => Cell::value(CellValue::Text(String::new())),
        _ => Cell::err(source_text.map(str::to_string)),
    }
}

/// Legacy "Formula" column kind accepts many kinds and stringifies (§4.1).
fn convert_formula_legacy(value: &FormulaValue, source_text: Option<&str>) -> Cell {
    match value {
        FormulaValue::Error => Cell::err(source_text.map(str::to_string)),
        other => Cell::value(CellValue::Text(other.display_value())),
    }
}

/// The reverse direction: what a stored cell means as a `FormulaValue` when
/// read back by `thisRow.Column`/`@column` (§4.7 member dispatch).
pub fn cell_to_formula_value(cell: &Cell) -> FormulaValue {
    if cell.error {
        return FormulaValue::Error;
    }
    match &cell.value {
        CellValue::Empty => FormulaValue::Null,
        CellValue::Number(n) => FormulaValue::Number(*n),
        CellValue::Text(s) => FormulaValue::Text(s.clone()),
        CellValue::Bool(b) => FormulaValue::Bool(*b),
        CellValue::Vec2 { x, y } => FormulaValue::Vec2(*x, *y),
        CellValue::Vec3 { x, y, z } => FormulaValue::Vec3(*x, *y, *z),
        CellValue::Vec4 { x, y, z, w } => FormulaValue::Vec4(*x, *y, *z, *w),
        CellValue::Color { r, g, b, a } => FormulaValue::Color(*r, *g, *b, *a),
        CellValue::Date(d) => {
            FormulaValue::DateTime(d.and_hms_opt(0, 0, 0).expect("midnight is always valid"))
        }
        CellValue::Row(id) => FormulaValue::Row(*id),
        CellValue::Table(id) => FormulaValue::Table(*id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct NoRows;
    impl RowLookup for NoRows {
        fn row_exists(&self, _table: TableId, _row: RowId) -> bool {
            false
        }
        fn parse_row_id(&self, _table: TableId, _text: &str) -> Option<RowId> {
            None
        }
    }

    fn round_trip(kind: ColumnKind, value: &FormulaValue) -> Cell {
        convert_to_cell(kind, value, None, &NoRows)
    }

    #[test]
    fn relation_accepts_a_validated_row_and_rejects_an_unvalidated_one() {
        struct OneRow;
        impl RowLookup for OneRow {
            fn row_exists(&self, _table: TableId, row: RowId) -> bool {
                row == RowId::new(7)
            }
            fn parse_row_id(&self, table: TableId, text: &str) -> Option<RowId> {
                let raw: u64 = text.parse().ok()?;
                let candidate = RowId::new(raw);
                self.row_exists(table, candidate).then_some(candidate)
            }
        }
        let kind = ColumnKind::Relation {
            target_table: TableId::new(1),
        };
        let cell = convert_to_cell(kind, &FormulaValue::Row(RowId::new(7)), None, &OneRow);
        assert_eq!(cell.value, CellValue::Row(RowId::new(7)));

        let cell = convert_to_cell(kind, &FormulaValue::Row(RowId::new(8)), None, &OneRow);
        assert!(cell.error);
    }

    proptest! {
        /// §8: `ConvertToCell(K, ConvertToFormulaValue(K, v)) == v` on valid
        /// values, checked for every kind whose cell representation round-trips
        /// through a `FormulaValue` without loss.
        #[test]
        fn number_round_trips(n in -1e12f64..1e12f64) {
            let cell = round_trip(ColumnKind::Number, &FormulaValue::Number(n));
            prop_assert_eq!(cell.value, CellValue::Number(n));
            prop_assert!(!cell.error);
        }

        #[test]
        fn checkbox_round_trips(b in any::<bool>()) {
            let cell = round_trip(ColumnKind::Checkbox, &FormulaValue::Bool(b));
            prop_assert_eq!(cell.value, CellValue::Bool(b));
        }

        #[test]
        fn text_round_trips(s in "[a-zA-Z0-9 ]{0,32}") {
            let cell = round_trip(ColumnKind::Text, &FormulaValue::Text(s.clone()));
            prop_assert_eq!(cell.value, CellValue::Text(s));
        }

        #[test]
        fn vec3_round_trips(x in -1e6f64..1e6f64, y in -1e6f64..1e6f64, z in -1e6f64..1e6f64) {
            let cell = round_trip(ColumnKind::Vec3, &FormulaValue::Vec3(x, y, z));
            prop_assert_eq!(cell.value, CellValue::Vec3 { x, y, z });
        }

        #[test]
        fn color_round_trips(r in 0f64..1.0, g in 0f64..1.0, b in 0f64..1.0, a in 0f64..1.0) {
            let cell = round_trip(ColumnKind::Color, &FormulaValue::Color(r, g, b, a));
            prop_assert_eq!(cell.value, CellValue::Color { r, g, b, a });
        }

        /// A value of the wrong shape for the kind always yields `#ERR`, never
        /// a panic (§4.1, §7 kind 3).
        #[test]
        fn mismatched_kind_and_value_never_panics(n in -1e6f64..1e6f64) {
            let cell = round_trip(ColumnKind::Checkbox, &FormulaValue::Number(n));
            prop_assert!(cell.error);
        }
    }
}
