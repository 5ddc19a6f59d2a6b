//! Function registry (§6 External Interfaces): a mutable, process-scoped
//! table of `(name) -> Function` mapped case-insensitively, trimmed.
//! Grounded on `formualizer_eval::function`/`builtins::mod`'s
//! register-by-name pattern, simplified: no `FnCaps` bitflags, streaming,
//! or fold path (Non-goals: no streaming evaluation) — just
//! `eval(args, ctx) -> FormulaValue` plus the `tracks_first_arg_table` flag
//! §6 calls out for dependency extraction.
use rustc_hash::FxHashMap;

use docflow_common::FormulaValue;
use docflow_parse::TableArgHints;

use crate::interp::{EvalError, Interpreter};

/// A callable built-in or user-registered function. `args` are already
/// evaluated `FormulaValue`s except where the function itself needs lazy
/// evaluation (`If`, `Filter`/`Sum` predicates are handled by the
/// interpreter directly, not through this trait, since they need the AST
/// and frame scoping machinery).
pub trait Function: Send + Sync {
    fn eval(&self, args: &[FormulaValue], interp: &mut Interpreter) -> Result<FormulaValue, EvalError>;
}

impl<F> Function for F
where
    F: Fn(&[FormulaValue], &mut Interpreter) -> Result<FormulaValue, EvalError> + Send + Sync,
{
    fn eval(&self, args: &[FormulaValue], interp: &mut Interpreter) -> Result<FormulaValue, EvalError> {
        self(args, interp)
    }
}

struct Entry {
    tracks_first_arg_table: bool,
    func: Box<dyn Function>,
}

/// Case-insensitive (trimmed) function lookup table (§6: "Names are
/// compared case-insensitively with trim; unknown → evaluation returns
/// Null").
#[derive(Default)]
pub struct FunctionRegistry {
    entries: FxHashMap<String, Entry>,
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry pre-populated with the built-in functions listed
    /// in §4.7 (see `crate::builtins`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtins::register_all(&mut registry);
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        tracks_first_arg_table: bool,
        func: impl Function + 'static,
    ) {
        self.entries.insert(
            normalize_name(&name.into()),
            Entry {
                tracks_first_arg_table,
                func: Box::new(func),
            },
        );
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize_name(name))
    }

    pub fn call(
        &self,
        name: &str,
        args: &[FormulaValue],
        interp: &mut Interpreter,
    ) -> Result<FormulaValue, EvalError> {
        match self.entries.get(&normalize_name(name)) {
            Some(entry) => entry.func.eval(args, interp),
            // Unknown functions return Null (§6).
            None => Ok(FormulaValue::Null),
        }
    }
}

impl TableArgHints for FunctionRegistry {
    fn tracks_first_arg_table(&self, function_name: &str) -> bool {
        self.entries
            .get(&normalize_name(function_name))
            .map(|e| e.tracks_first_arg_table)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_function_name_is_untracked() {
        let reg = FunctionRegistry::new();
        assert!(!reg.tracks_first_arg_table("Lookup"));
    }

    #[test]
    fn registered_name_is_matched_case_insensitively_trimmed() {
        let mut reg = FunctionRegistry::new();
        reg.register("MyFunc", true, |_: &[FormulaValue], _: &mut Interpreter| {
            Ok(FormulaValue::Null)
        });
        assert!(reg.tracks_first_arg_table(" myfunc "));
        assert!(reg.is_registered("MYFUNC"));
    }
}
