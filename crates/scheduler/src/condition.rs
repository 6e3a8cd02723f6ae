//! Loop termination conditions.
//!
//! A closed comparator DSL over fields of the aggregated iteration result:
//! `accuracy > 0.9`, `status == success`, `summary` (bare field =
//! presence). Ordering comparators apply to numbers; equality also covers
//! strings and booleans. An unevaluable condition (missing field, type
//! mismatch) is reported as `None` so the loop treats it as not-met and
//! records a warning.

use serde_json::Value;

use am_domain::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        field: String,
        op: Comparator,
        value: Operand,
    },
    /// Bare field name: satisfied when the field exists and is non-null.
    Present { field: String },
}

impl Condition {
    /// Parse a condition string. Accepted shapes:
    /// `<field> <op> <literal>` and `<field>`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidRequest("empty loop condition".into()));
        }

        let mut parts = raw.split_whitespace();
        let field = parts.next().unwrap_or_default().to_owned();
        let Some(op_token) = parts.next() else {
            if field.split('.').all(is_identifier) {
                return Ok(Condition::Present { field });
            }
            return Err(Error::InvalidRequest(format!(
                "malformed loop condition \"{raw}\""
            )));
        };

        let op = match op_token {
            "<" => Comparator::Lt,
            "<=" => Comparator::Le,
            ">" => Comparator::Gt,
            ">=" => Comparator::Ge,
            "==" => Comparator::Eq,
            other => {
                return Err(Error::InvalidRequest(format!(
                    "unknown comparator \"{other}\" in loop condition"
                )))
            }
        };

        let literal = parts.collect::<Vec<_>>().join(" ");
        let literal = literal.trim();
        if literal.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "loop condition \"{raw}\" is missing a comparison value"
            )));
        }

        let value = parse_literal(literal);
        if !matches!(op, Comparator::Eq) && !matches!(value, Operand::Number(_)) {
            return Err(Error::InvalidRequest(format!(
                "ordering comparator in \"{raw}\" requires a numeric value"
            )));
        }

        Ok(Condition::Compare { field, op, value })
    }

    /// Evaluate against an aggregated result. `None` = unevaluable.
    pub fn evaluate(&self, aggregate: &Value) -> Option<bool> {
        match self {
            Condition::Present { field } => {
                Some(lookup(aggregate, field).is_some_and(|v| !v.is_null()))
            }
            Condition::Compare { field, op, value } => {
                let actual = lookup(aggregate, field)?;
                match (value, op) {
                    (Operand::Number(expected), _) => {
                        let actual = actual.as_f64()?;
                        Some(match op {
                            Comparator::Lt => actual < *expected,
                            Comparator::Le => actual <= *expected,
                            Comparator::Gt => actual > *expected,
                            Comparator::Ge => actual >= *expected,
                            Comparator::Eq => actual == *expected,
                        })
                    }
                    (Operand::Str(expected), Comparator::Eq) => {
                        Some(actual.as_str()? == expected)
                    }
                    (Operand::Bool(expected), Comparator::Eq) => {
                        Some(actual.as_bool()? == *expected)
                    }
                    _ => None,
                }
            }
        }
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn parse_literal(raw: &str) -> Operand {
    if let Ok(n) = raw.parse::<f64>() {
        return Operand::Number(n);
    }
    match raw {
        "true" => Operand::Bool(true),
        "false" => Operand::Bool(false),
        _ => Operand::Str(raw.trim_matches('"').trim_matches('\'').to_owned()),
    }
}

/// Dot-path lookup into a JSON object.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_numeric_comparison() {
        let c = Condition::parse("accuracy > 0.9").unwrap();
        assert_eq!(
            c,
            Condition::Compare {
                field: "accuracy".into(),
                op: Comparator::Gt,
                value: Operand::Number(0.9),
            }
        );
    }

    #[test]
    fn parses_status_marker() {
        let c = Condition::parse("status == success").unwrap();
        assert_eq!(c.evaluate(&json!({ "status": "success" })), Some(true));
        assert_eq!(c.evaluate(&json!({ "status": "failed" })), Some(false));
    }

    #[test]
    fn parses_presence() {
        let c = Condition::parse("summary").unwrap();
        assert_eq!(c.evaluate(&json!({ "summary": "done" })), Some(true));
        assert_eq!(c.evaluate(&json!({ "summary": null })), Some(false));
        assert_eq!(c.evaluate(&json!({})), Some(false));
    }

    #[test]
    fn all_comparators_work() {
        let agg = json!({ "score": 5 });
        for (cond, expected) in [
            ("score < 6", true),
            ("score <= 5", true),
            ("score > 5", false),
            ("score >= 5", true),
            ("score == 5", true),
        ] {
            assert_eq!(
                Condition::parse(cond).unwrap().evaluate(&agg),
                Some(expected),
                "condition: {cond}"
            );
        }
    }

    #[test]
    fn missing_field_is_unevaluable() {
        let c = Condition::parse("accuracy > 0.9").unwrap();
        assert_eq!(c.evaluate(&json!({ "other": 1 })), None);
    }

    #[test]
    fn type_mismatch_is_unevaluable() {
        let c = Condition::parse("accuracy > 0.9").unwrap();
        assert_eq!(c.evaluate(&json!({ "accuracy": "high" })), None);
    }

    #[test]
    fn dotted_path_lookup() {
        let c = Condition::parse("metrics.accuracy >= 0.5").unwrap();
        assert_eq!(
            c.evaluate(&json!({ "metrics": { "accuracy": 0.7 } })),
            Some(true)
        );
    }

    #[test]
    fn boolean_equality() {
        let c = Condition::parse("done == true").unwrap();
        assert_eq!(c.evaluate(&json!({ "done": true })), Some(true));
        assert_eq!(c.evaluate(&json!({ "done": false })), Some(false));
    }

    #[test]
    fn rejects_unknown_comparator() {
        assert!(Condition::parse("accuracy != 0.9").is_err());
        assert!(Condition::parse("accuracy >").is_err());
        assert!(Condition::parse("").is_err());
    }

    #[test]
    fn rejects_ordering_on_string_literal() {
        assert!(Condition::parse("status > success").is_err());
    }
}
