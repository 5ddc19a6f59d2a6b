//! End-to-end engine façade scenarios (§8 "Concrete end-to-end scenarios").
use docflow_common::{CellValue, ColumnKind, DerivedConfig, DerivedStep, JoinKind, KeyMapping, Projection};
use docflow_testkit::ProjectBuilder;
use docflow_workbook::{Engine, EvaluationRequest};

#[test]
fn simple_formula_sums_two_columns() {
    let mut b = ProjectBuilder::new();
    let t = b.table("T");
    let a = b.column(t, "A", ColumnKind::Number);
    let c = b.column(t, "B", ColumnKind::Number);
    let out = b.formula_column(t, "C", "thisRow.A + thisRow.B");
    let r1 = b.row(t);
    b.set_cell(t, r1, a, CellValue::Number(2.0));
    b.set_cell(t, r1, c, CellValue::Number(3.0));
    let r2 = b.row(t);
    b.set_cell(t, r2, a, CellValue::Number(10.0));
    b.set_cell(t, r2, c, CellValue::Number(0.0));
    let project = b.build();

    let mut engine = Engine::new();
    let metrics = engine.evaluate(&project, 1, EvaluationRequest::Full).unwrap();

    assert_eq!(metrics.evaluated_table_count, 1);
    assert_eq!(engine.cell(t, r1, out).unwrap().value, CellValue::Number(5.0));
    assert_eq!(engine.cell(t, r2, out).unwrap().value, CellValue::Number(10.0));
}

#[test]
fn full_evaluation_is_idempotent() {
    let mut b = ProjectBuilder::new();
    let t = b.table("T");
    let a = b.column(t, "A", ColumnKind::Number);
    let out = b.formula_column(t, "Doubled", "thisRow.A * 2");
    let r1 = b.row(t);
    b.set_cell(t, r1, a, CellValue::Number(4.0));
    let project = b.build();

    let mut engine = Engine::new();
    let first = engine.evaluate(&project, 1, EvaluationRequest::Full).unwrap();
    let first_value = engine.cell(t, r1, out).unwrap().clone();
    let second = engine.evaluate(&project, 1, EvaluationRequest::Full).unwrap();
    let second_value = engine.cell(t, r1, out).unwrap().clone();

    assert_eq!(first_value, second_value);
    assert_eq!(first.evaluated_table_count, second.evaluated_table_count);
}

#[test]
fn inner_join_materializes_matched_rows_through_the_engine() {
    let mut b = ProjectBuilder::new();
    let depts = b.table("Depts");
    let dept_key = b.column(depts, "Dept", ColumnKind::Text);
    let pay = b.column(depts, "Pay", ColumnKind::Number);
    let eng_row = b.row(depts);
    b.set_cell(depts, eng_row, dept_key, CellValue::Text("Eng".to_string()));
    b.set_cell(depts, eng_row, pay, CellValue::Number(100.0));

    let users = b.table("Users");
    let user_dept = b.column(users, "Dept", ColumnKind::Text);
    let u1 = b.row(users);
    b.set_cell(users, u1, user_dept, CellValue::Text("Eng".to_string()));
    let u2 = b.row(users);
    b.set_cell(users, u2, user_dept, CellValue::Text("Sales".to_string()));

    let derived = b.table("StaffPay");
    let out_dept = b.column(derived, "Dept", ColumnKind::Text);
    let out_pay = b.column(derived, "Pay", ColumnKind::Number);
    b.set_derived(
        derived,
        DerivedConfig {
            base_table: Some(users),
            steps: vec![DerivedStep::Join {
                source_table: depts,
                keys: vec![KeyMapping { left_column: user_dept, source_column: dept_key }],
                kind: JoinKind::Inner,
            }],
            projections: vec![
                Projection { source_table: users, source_column: user_dept, output_column: out_dept, rename_alias: None },
                Projection { source_table: depts, source_column: pay, output_column: out_pay, rename_alias: None },
            ],
            suppressed_projections: vec![],
            filter_expression: None,
        },
    );
    let project = b.build();

    let mut engine = Engine::new();
    engine.evaluate(&project, 1, EvaluationRequest::Full).unwrap();

    let rows = engine.derived_rows(derived).unwrap();
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(rows.rows[0].cell(out_pay).value, CellValue::Number(100.0));
}

#[test]
fn table_cycle_is_reported_with_arrow_joined_path() {
    let mut b = ProjectBuilder::new();
    let a = b.table("A");
    let bt = b.table("B");
    b.formula_column(a, "X", "tables.B.X");
    b.formula_column(bt, "X", "tables.A.X");
    let project = b.build();

    let mut engine = Engine::new();
    let err = engine.evaluate(&project, 1, EvaluationRequest::Full).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("table:A -> table:B -> table:A"), "got: {message}");
}

#[test]
fn document_variable_feeds_a_table_formula_via_this_doc() {
    let mut b = ProjectBuilder::new();
    let doc = b.document("Pricing", "pricing.md");
    b.document_variable(doc, "price", "10");
    b.document_variable(doc, "tax", "@price * 0.2");

    let t = b.table("T");
    let out = b.formula_column(t, "Tax", "thisDoc.tax");
    let _r = b.row(t);
    let project = b.build();

    let mut engine = Engine::new();
    engine.evaluate(&project, 1, EvaluationRequest::Full).unwrap();

    assert_eq!(engine.document_variable(doc, "tax"), Some(docflow_common::FormulaValue::Number(2.0)));
    let row_id = project.tables[0].rows[0].id;
    assert_eq!(engine.cell(t, row_id, out).unwrap().value, CellValue::Number(2.0));
}

#[test]
fn document_variable_cycle_is_reported_with_both_names() {
    let mut b = ProjectBuilder::new();
    let doc = b.document("Pricing", "pricing.md");
    b.document_variable(doc, "price", "@tax * 5");
    b.document_variable(doc, "tax", "@price * 0.2");
    let project = b.build();

    let mut engine = Engine::new();
    let err = engine.evaluate(&project, 1, EvaluationRequest::Full).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("price") && message.contains("tax"), "got: {message}");
}

#[test]
fn filter_expression_keeps_only_matching_rows() {
    let mut b = ProjectBuilder::new();
    let assets = b.table("Assets");
    let kind = b.column(assets, "Kind", ColumnKind::Text);
    let r1 = b.row(assets);
    b.set_cell(assets, r1, kind, CellValue::Text("Texture".to_string()));
    let r2 = b.row(assets);
    b.set_cell(assets, r2, kind, CellValue::Text("Mesh".to_string()));

    let derived = b.table("Textures");
    let out_kind = b.column(derived, "Kind", ColumnKind::Text);
    b.set_derived(
        derived,
        DerivedConfig {
            base_table: Some(assets),
            steps: vec![DerivedStep::Append { source_table: assets, origin_override: None }],
            projections: vec![Projection {
                source_table: assets,
                source_column: kind,
                output_column: out_kind,
                rename_alias: None,
            }],
            suppressed_projections: vec![],
            filter_expression: Some("thisRow.Kind == \"Texture\"".to_string()),
        },
    );
    let project = b.build();

    let mut engine = Engine::new();
    engine.evaluate(&project, 1, EvaluationRequest::Full).unwrap();

    let rows = engine.derived_rows(derived).unwrap();
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(rows.rows[0].cell(out_kind).value, CellValue::Text("Texture".to_string()));
}

#[test]
fn division_and_modulo_by_near_zero_yield_null_not_err() {
    let mut b = ProjectBuilder::new();
    let t = b.table("T");
    let a = b.column(t, "A", ColumnKind::Number);
    let div = b.formula_column(t, "Div", "thisRow.A / 0");
    let rem = b.formula_column(t, "Rem", "thisRow.A % 0");
    let r1 = b.row(t);
    b.set_cell(t, r1, a, CellValue::Number(10.0));
    let project = b.build();

    let mut engine = Engine::new();
    engine.evaluate(&project, 1, EvaluationRequest::Full).unwrap();

    // §4.7/§8: division/modulo by a near-zero divisor is `Null`, which a
    // Number-kind column has no way to represent, so the cell itself still
    // surfaces as `#ERR` — the point pinned here is that the interpreter
    // never raises, and the conversion failure is the *only* error layer.
    assert!(engine.cell(t, r1, div).unwrap().error);
    assert!(engine.cell(t, r1, rem).unwrap().error);
}

#[test]
fn incremental_evaluation_of_a_dirty_table_matches_full_evaluation() {
    let mut b = ProjectBuilder::new();
    let t = b.table("T");
    let a = b.column(t, "A", ColumnKind::Number);
    let out = b.formula_column(t, "Doubled", "thisRow.A * 2");
    let r1 = b.row(t);
    b.set_cell(t, r1, a, CellValue::Number(7.0));
    let project = b.build();

    let mut full_engine = Engine::new();
    full_engine.evaluate(&project, 1, EvaluationRequest::Full).unwrap();

    let mut incremental_engine = Engine::new();
    incremental_engine.evaluate(&project, 1, EvaluationRequest::Full).unwrap();
    incremental_engine
        .evaluate(&project, 1, EvaluationRequest::Incremental(vec![t]))
        .unwrap();

    assert_eq!(full_engine.cell(t, r1, out), incremental_engine.cell(t, r1, out));
}
