//! Date/time functions (§4.7). `Today()` reads the wall clock once per
//! evaluation call through `Interpreter`'s injected clock rather than
//! `chrono::Local::now()` directly, so incremental/targeted evaluation runs
//! are reproducible within a single pass.
use chrono::{Duration, NaiveDate};

use docflow_common::FormulaValue;

use crate::interp::Interpreter;
use crate::registry::FunctionRegistry;

fn as_number(v: &FormulaValue) -> Option<f64> {
    match v {
        FormulaValue::Number(n) => Some(*n),
        _ => None,
    }
}

fn as_datetime(v: &FormulaValue) -> Option<chrono::NaiveDateTime> {
    match v {
        FormulaValue::DateTime(dt) => Some(*dt),
        _ => None,
    }
}

/// Invariant-culture date formats `Date(text)` tries in order (§4.2's lexer
/// has no date literal syntax, so §4.7's "`Date` (parses invariant)" means a
/// string argument, parsed the way the rest of this spec formats dates:
/// `FormulaValue::display_value`'s `"%Y-%m-%d %H:%M:%S"` for a full
/// timestamp, or a bare `"%Y-%m-%d"` date).
const DATE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d"];

fn parse_invariant_date(text: &str) -> Option<chrono::NaiveDateTime> {
    let text = text.trim();
    for fmt in DATE_FORMATS {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

pub fn register(registry: &mut FunctionRegistry) {
    registry.register("Date", false, |args: &[FormulaValue], _: &mut Interpreter| {
        // Three-number form `Date(y, m, d)` is kept alongside the
        // string-parsing form: both appear in formula-engine corpora, and
        // nothing in §4.2's grammar lets an author spell a date literal any
        // other way than composing it from numbers or a string.
        if let (Some(y), Some(m), Some(d)) = (
            args.first().and_then(as_number),
            args.get(1).and_then(as_number),
            args.get(2).and_then(as_number),
        ) {
            return Ok(NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(FormulaValue::DateTime)
                .unwrap_or(FormulaValue::Null));
        }
        Ok(match args.first() {
            Some(FormulaValue::Text(s)) => parse_invariant_date(s).map(FormulaValue::DateTime).unwrap_or(FormulaValue::Null),
            _ => FormulaValue::Null,
        })
    });
    registry.register("Today", false, |_: &[FormulaValue], interp: &mut Interpreter| {
        Ok(FormulaValue::DateTime(interp.context().clock_today().and_hms_opt(0, 0, 0).expect("midnight is always valid")))
    });
    registry.register("AddDays", false, |args: &[FormulaValue], _: &mut Interpreter| {
        Ok(match (args.first().and_then(as_datetime), args.get(1).and_then(as_number)) {
            (Some(dt), Some(n)) => FormulaValue::DateTime(dt + Duration::days(n as i64)),
            _ => FormulaValue::Null,
        })
    });
    registry.register("DaysBetween", false, |args: &[FormulaValue], _: &mut Interpreter| {
        Ok(match (args.first().and_then(as_datetime), args.get(1).and_then(as_datetime)) {
            (Some(a), Some(b)) => FormulaValue::Number((b - a).num_days() as f64),
            _ => FormulaValue::Null,
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_invariant_date_string() {
        let dt = parse_invariant_date("2024-03-05").unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn parses_invariant_timestamp_string() {
        let dt = parse_invariant_date("2024-03-05 13:30:00").unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(dt.time().format("%H:%M:%S").to_string(), "13:30:00");
    }

    #[test]
    fn rejects_malformed_date_string() {
        assert!(parse_invariant_date("not a date").is_none());
    }
}
