//! Numeric and vector/color constructors (§4.7).
use docflow_common::FormulaValue;

use crate::interp::Interpreter;
use crate::registry::FunctionRegistry;

fn number(args: &[FormulaValue], i: usize) -> Option<f64> {
    match args.get(i) {
        Some(FormulaValue::Number(n)) => Some(*n),
        _ => None,
    }
}

pub fn register(registry: &mut FunctionRegistry) {
    registry.register("Abs", false, |args: &[FormulaValue], _: &mut Interpreter| {
        Ok(number(args, 0).map(|n| FormulaValue::Number(n.abs())).unwrap_or(FormulaValue::Null))
    });
    registry.register("Pow", false, |args: &[FormulaValue], _: &mut Interpreter| {
        Ok(match (number(args, 0), number(args, 1)) {
            (Some(base), Some(exp)) => FormulaValue::Number(base.powf(exp)),
            _ => FormulaValue::Null,
        })
    });
    registry.register("Exp", false, |args: &[FormulaValue], _: &mut Interpreter| {
        Ok(number(args, 0).map(|n| FormulaValue::Number(n.exp())).unwrap_or(FormulaValue::Null))
    });
    registry.register("Vec2", false, |args: &[FormulaValue], _: &mut Interpreter| {
        Ok(match (number(args, 0), number(args, 1)) {
            (Some(x), Some(y)) => FormulaValue::Vec2(x, y),
            _ => FormulaValue::Null,
        })
    });
    registry.register("Vec3", false, |args: &[FormulaValue], _: &mut Interpreter| {
        Ok(match (number(args, 0), number(args, 1), number(args, 2)) {
            (Some(x), Some(y), Some(z)) => FormulaValue::Vec3(x, y, z),
            _ => FormulaValue::Null,
        })
    });
    registry.register("Vec4", false, |args: &[FormulaValue], _: &mut Interpreter| {
        Ok(
            match (number(args, 0), number(args, 1), number(args, 2), number(args, 3)) {
                (Some(x), Some(y), Some(z), Some(w)) => FormulaValue::Vec4(x, y, z, w),
                _ => FormulaValue::Null,
            },
        )
    });
    registry.register("Color", false, |args: &[FormulaValue], _: &mut Interpreter| {
        Ok(
            match (number(args, 0), number(args, 1), number(args, 2), number(args, 3)) {
                (Some(r), Some(g), Some(b), Some(a)) => FormulaValue::Color(r, g, b, a),
                _ => FormulaValue::Null,
            },
        )
    });
}

