//! `EvalSpline(json, t)` (§GLOSSARY): a 1-D weighted cubic Bezier keyframe
//! track. Each key's outgoing/incoming tangent is a `(slope, weight)` pair;
//! the weight scales how far the Bezier handle reaches into the segment
//! (normalized by `(t1 - t0) / 3`, the standard cubic-Hermite-to-Bezier
//! handle length). Since a Bezier curve is parametrized by `u`, not `t`
//! directly, evaluation brackets `u` across `spline_bracket_samples`
//! initial samples, then Newton-refines `spline_newton_iterations` times
//! against `f(u) = time(u) - t`.
use serde::Deserialize;

use docflow_common::FormulaValue;

use crate::config::EngineConfig;
use crate::interp::Interpreter;
use crate::registry::FunctionRegistry;

#[derive(Debug, Clone, Deserialize)]
pub struct SplineKey {
    pub t: f64,
    pub v: f64,
    pub ti: f64,
    pub to: f64,
    pub wi: f64,
    pub wo: f64,
}

fn bezier(p0: f64, p1: f64, p2: f64, p3: f64, u: f64) -> f64 {
    let mu = 1.0 - u;
    mu * mu * mu * p0 + 3.0 * mu * mu * u * p1 + 3.0 * mu * u * u * p2 + u * u * u * p3
}

fn bezier_derivative(p0: f64, p1: f64, p2: f64, p3: f64, u: f64) -> f64 {
    let mu = 1.0 - u;
    3.0 * mu * mu * (p1 - p0) + 6.0 * mu * u * (p2 - p1) + 3.0 * u * u * (p3 - p2)
}

/// Evaluates the track at `t`, clamping to the first/last key outside the
/// covered range.
pub fn eval_spline(keys: &[SplineKey], t: f64, cfg: &EngineConfig) -> f64 {
    if keys.is_empty() {
        return 0.0;
    }
    if keys.len() == 1 || t <= keys[0].t {
        return keys[0].v;
    }
    if t >= keys[keys.len() - 1].t {
        return keys[keys.len() - 1].v;
    }
    let segment = keys.windows(2).find(|w| t >= w[0].t && t <= w[1].t);
    let Some([k0, k1]) = segment.map(|w| [&w[0], &w[1]]) else {
        return keys[keys.len() - 1].v;
    };
    let dt = (k1.t - k0.t).max(1e-12);
    let handle = dt / 3.0;

    let t0 = k0.t;
    let t1 = k0.t + k0.wo * handle;
    let t2 = k1.t - k1.wi * handle;
    let t3 = k1.t;

    let v0 = k0.v;
    let v1 = k0.v + k0.to * k0.wo * handle;
    let v2 = k1.v - k1.ti * k1.wi * handle;
    let v3 = k1.v;

    // Bracket: sample `spline_bracket_samples` points in u to find the
    // closest starting guess for Newton refinement.
    let samples = cfg.spline_bracket_samples.max(2);
    let mut best_u = 0.0;
    let mut best_diff = f64::INFINITY;
    for i in 0..=samples {
        let u = i as f64 / samples as f64;
        let diff = (bezier(t0, t1, t2, t3, u) - t).abs();
        if diff < best_diff {
            best_diff = diff;
            best_u = u;
        }
    }

    let mut u = best_u;
    for _ in 0..cfg.spline_newton_iterations {
        let ft = bezier(t0, t1, t2, t3, u) - t;
        let dft = bezier_derivative(t0, t1, t2, t3, u);
        if dft.abs() < 1e-12 {
            break;
        }
        u -= ft / dft;
        u = u.clamp(0.0, 1.0);
    }

    bezier(v0, v1, v2, v3, u)
}

pub fn register(registry: &mut FunctionRegistry) {
    registry.register("EvalSpline", false, |args: &[FormulaValue], interp: &mut Interpreter| {
        let (Some(FormulaValue::Text(json)), Some(FormulaValue::Number(t))) = (args.first(), args.get(1)) else {
            return Ok(FormulaValue::Null);
        };
        let Ok(keys) = serde_json::from_str::<Vec<SplineKey>>(json) else {
            return Ok(FormulaValue::Error);
        };
        Ok(FormulaValue::Number(eval_spline(&keys, *t, &interp.config())))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(t: f64, v: f64) -> SplineKey {
        SplineKey { t, v, ti: 0.0, to: 0.0, wi: 1.0, wo: 1.0 }
    }

    #[test]
    fn endpoints_return_exact_key_values() {
        let keys = vec![key(0.0, 1.0), key(1.0, 5.0)];
        let cfg = EngineConfig::default();
        assert_eq!(eval_spline(&keys, 0.0, &cfg), 1.0);
        assert_eq!(eval_spline(&keys, 1.0, &cfg), 5.0);
    }

    #[test]
    fn flat_tangents_interpolate_monotonically_between_keys() {
        let keys = vec![key(0.0, 0.0), key(1.0, 10.0)];
        let cfg = EngineConfig::default();
        let mid = eval_spline(&keys, 0.5, &cfg);
        assert!((mid - 5.0).abs() < 1e-3);
    }

    #[test]
    fn out_of_range_clamps_to_nearest_key() {
        let keys = vec![key(0.0, 2.0), key(1.0, 9.0)];
        let cfg = EngineConfig::default();
        assert_eq!(eval_spline(&keys, -1.0, &cfg), 2.0);
        assert_eq!(eval_spline(&keys, 2.0, &cfg), 9.0);
    }
}
