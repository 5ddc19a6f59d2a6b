//! Built-in function registrations (§4.7): "`If`, `Abs`, `Pow`, `Exp`,
//! `Upper`, `Lower`, `Contains`, `Concat`, `Date`, `Today`, `AddDays`,
//! `DaysBetween`, `Vec2`/`Vec3`/`Vec4`/`Color`, `EvalSpline`." `If`,
//! `Lookup`, `CountIf`, and `SumIf` are not registered here — the
//! interpreter dispatches them directly (see `Interpreter::eval_call`)
//! since they need unevaluated argument ASTs, not `FormulaValue`s.
mod datetime;
mod math;
mod spline;
mod text;

pub use spline::{SplineKey, eval_spline};

use crate::registry::FunctionRegistry;

pub fn register_all(registry: &mut FunctionRegistry) {
    math::register(registry);
    text::register(registry);
    datetime::register(registry);
    spline::register(registry);
}
