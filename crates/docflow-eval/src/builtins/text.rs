//! String functions (§4.7).
use docflow_common::FormulaValue;

use crate::interp::Interpreter;
use crate::registry::FunctionRegistry;

fn text(v: &FormulaValue) -> String {
    v.display_value()
}

pub fn register(registry: &mut FunctionRegistry) {
    registry.register("Upper", false, |args: &[FormulaValue], _: &mut Interpreter| {
        Ok(args.first().map(|v| FormulaValue::Text(text(v).to_uppercase())).unwrap_or(FormulaValue::Null))
    });
    registry.register("Lower", false, |args: &[FormulaValue], _: &mut Interpreter| {
        Ok(args.first().map(|v| FormulaValue::Text(text(v).to_lowercase())).unwrap_or(FormulaValue::Null))
    });
    registry.register("Contains", false, |args: &[FormulaValue], _: &mut Interpreter| {
        Ok(match (args.first(), args.get(1)) {
            (Some(haystack), Some(needle)) => {
                FormulaValue::Bool(text(haystack).to_lowercase().contains(&text(needle).to_lowercase()))
            }
            _ => FormulaValue::Bool(false),
        })
    });
    registry.register("Concat", false, |args: &[FormulaValue], _: &mut Interpreter| {
        Ok(FormulaValue::Text(args.iter().map(text).collect::<String>()))
    });
}
