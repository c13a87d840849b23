//! Guard expression evaluator.
//!
//! Transitions may carry a small boolean expression over the event payload
//! and session context. The grammar is deliberately tiny and evaluated by
//! hand:
//!
//! - top-level `||` separates alternatives
//! - each alternative is `&&`-joined comparisons, short-circuit
//! - comparison operators, in detection order: `==`, `!=`, `>=`, `<=`,
//!   `>`, `<`
//! - operands: `"string"` literal, integer literal, float literal, or a
//!   dotted path resolved against the context
//!
//! Anything malformed evaluates to `false`; a guard can drop a transition
//! but never abort a journey.

use std::cmp::Ordering;

use serde_json::Value;

/// Operator detection order matters: two-character operators first so that
/// `>=` is not misread as `>`.
const OPERATORS: [&str; 6] = ["==", "!=", ">=", "<=", ">", "<"];

/// Evaluates a guard expression against a context document.
///
/// The context is the mapping `{ payload: <event payload>, session:
/// { resumeToken, idempotencyKey } }`; dotted paths in the expression
/// resolve into it.
#[must_use]
pub fn evaluate(expression: &str, context: &Value) -> bool {
    expression
        .split("||")
        .any(|alternative| alternative.split("&&").all(|cmp| compare(cmp, context)))
}

fn compare(comparison: &str, context: &Value) -> bool {
    let Some((op, lhs, rhs)) = split_comparison(comparison) else {
        return false;
    };
    let (Some(left), Some(right)) = (parse_operand(lhs, context), parse_operand(rhs, context))
    else {
        return false;
    };

    match op {
        "==" => left.equals(&right),
        "!=" => !left.equals(&right),
        ">=" => left.order(&right) != Ordering::Less,
        "<=" => left.order(&right) != Ordering::Greater,
        ">" => left.order(&right) == Ordering::Greater,
        "<" => left.order(&right) == Ordering::Less,
        _ => false,
    }
}

fn split_comparison(comparison: &str) -> Option<(&'static str, &str, &str)> {
    for op in OPERATORS {
        if let Some(idx) = comparison.find(op) {
            let lhs = comparison[..idx].trim();
            let rhs = comparison[idx + op.len()..].trim();
            return Some((op, lhs, rhs));
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Opaque,
}

impl Operand {
    #[allow(clippy::cast_precision_loss, clippy::float_cmp)]
    fn equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => (a - b).abs() < f64::EPSILON,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                (*a as f64 - b).abs() < f64::EPSILON
            },
            (Self::Bool(a), Self::Bool(b)) => a == b,
            _ => false,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn order(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Self::Int(a), Self::Float(b)) => {
                (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal)
            },
            (Self::Float(a), Self::Int(b)) => {
                a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal)
            },
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            // Non-comparable operands order as equal.
            _ => Ordering::Equal,
        }
    }
}

fn parse_operand(text: &str, context: &Value) -> Option<Operand> {
    if text.is_empty() {
        return None;
    }
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        return Some(Operand::Str(text[1..text.len() - 1].to_string()));
    }
    if let Ok(int) = text.parse::<i64>() {
        return Some(Operand::Int(int));
    }
    if let Ok(float) = text.parse::<f64>() {
        return Some(Operand::Float(float));
    }
    lookup_path(context, text).map(|value| match value {
        Value::String(s) => Operand::Str(s.clone()),
        Value::Number(n) => n.as_i64().map_or_else(
            || Operand::Float(n.as_f64().unwrap_or(0.0)),
            Operand::Int,
        ),
        Value::Bool(b) => Operand::Bool(*b),
        _ => Operand::Opaque,
    })
}

/// Resolves a dotted path inside a JSON document. A non-mapping
/// intermediate is a miss.
pub(crate) fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx(payload: Value) -> Value {
        json!({
            "payload": payload,
            "session": {"resumeToken": "tok-1", "idempotencyKey": "idem-1"},
        })
    }

    #[test]
    fn equality_on_ints() {
        assert!(evaluate("payload.value == 2", &ctx(json!({"value": 2}))));
        assert!(!evaluate("payload.value == 2", &ctx(json!({"value": 1}))));
    }

    #[test]
    fn cross_type_numeric_promotion() {
        assert!(evaluate("payload.value == 2.0", &ctx(json!({"value": 2}))));
        assert!(evaluate("payload.value >= 1.5", &ctx(json!({"value": 2}))));
    }

    #[test]
    fn string_comparison() {
        assert!(evaluate(
            "payload.kind == \"approved\"",
            &ctx(json!({"kind": "approved"}))
        ));
        assert!(evaluate("payload.kind < \"b\"", &ctx(json!({"kind": "a"}))));
    }

    #[test]
    fn session_paths_resolve() {
        assert!(evaluate("session.resumeToken == \"tok-1\"", &ctx(json!({}))));
        assert!(evaluate("session.idempotencyKey != \"other\"", &ctx(json!({}))));
    }

    #[test]
    fn alternatives_and_conjunctions() {
        let context = ctx(json!({"a": 1, "b": 5}));
        assert!(evaluate("payload.a == 2 || payload.b == 5", &context));
        assert!(evaluate("payload.a == 1 && payload.b >= 5", &context));
        assert!(!evaluate("payload.a == 1 && payload.b > 5", &context));
    }

    #[test]
    fn missing_path_is_false() {
        assert!(!evaluate("payload.absent == 1", &ctx(json!({}))));
        assert!(!evaluate("payload.a.b == 1", &ctx(json!({"a": 3}))));
    }

    #[test]
    fn missing_operator_is_false() {
        assert!(!evaluate("payload.value", &ctx(json!({"value": true}))));
        assert!(!evaluate("", &ctx(json!({}))));
    }

    #[test]
    fn bools_compare_by_value() {
        assert!(evaluate("payload.flag == payload.flag", &ctx(json!({"flag": true}))));
        assert!(!evaluate("payload.flag == payload.other", &ctx(json!({"flag": true, "other": false}))));
    }

    #[test]
    fn non_scalars_are_never_equal() {
        let context = ctx(json!({"obj": {"a": 1}, "same": {"a": 1}}));
        assert!(!evaluate("payload.obj == payload.same", &context));
    }

    #[test]
    fn non_comparable_operands_order_equal() {
        let context = ctx(json!({"obj": {"a": 1}}));
        assert!(evaluate("payload.obj >= 1", &context));
        assert!(!evaluate("payload.obj > 1", &context));
    }

    #[test]
    fn operator_detection_prefers_two_char_forms() {
        assert!(evaluate("payload.v >= 2", &ctx(json!({"v": 2}))));
        assert!(!evaluate("payload.v > 2", &ctx(json!({"v": 2}))));
    }
}
