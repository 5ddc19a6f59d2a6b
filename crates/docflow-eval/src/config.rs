//! Tunables shared by the evaluator and derived resolver. Kept as plain
//! `Copy` data rather than threaded through every function signature
//! individually, mirroring the teacher's own `EvalConfig` (`formualizer_eval::engine::eval::EvalConfig`).
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Tolerance for numeric/vector equality and ordering comparisons
    /// (§4.7). Two numbers within this distance compare equal.
    pub numeric_epsilon: f64,
    /// A divisor closer to zero than this is treated as division by zero
    /// (§4.7), producing the `#ERR` sentinel rather than `inf`/`NaN`.
    pub division_epsilon: f64,
    /// Newton-refinement iterations for `EvalSpline` (§4.7).
    pub spline_newton_iterations: u32,
    /// Initial bracket samples `EvalSpline` scans before refining (§4.7).
    pub spline_bracket_samples: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            numeric_epsilon: 1e-6,
            division_epsilon: 1e-9,
            spline_newton_iterations: 8,
            spline_bracket_samples: 12,
        }
    }
}
