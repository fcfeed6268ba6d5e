//! Compilers from declarative match expressions to predicate clauses.
//!
//! A match expression maps a left-hand field term to a string matcher object
//! or a string-list matcher object. A bare string value is shorthand for
//! `{is: value}` (strings) or `{has: value}` (lists). Compiled clauses are
//! appended to the target body; compiling several matcher objects into the
//! same body yields their conjunction.

use crate::expr::{Body, Clause, ListPredicate, StringPredicate, Term};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CriteriaError {
    #[error("unknown string matcher operator: {0}")]
    UnknownStringOperator(String),
    #[error("unknown string list matcher operator: {0}")]
    UnknownStringListOperator(String),
    #[error("in matcher requires an array of strings")]
    InMatcherNotArray,
    #[error("matcher value must be a string, got {0}")]
    ExpectedString(&'static str),
    #[error("match expression must be an object")]
    ExpectedObject,
    #[error("match expression was present but could not be parsed")]
    UnparsableExpression,
}

/// Compiles a string matcher against `left`, appending clauses to `dst`.
pub fn match_string(dst: &mut Body, left: &Term, right: &Value) -> Result<(), CriteriaError> {
    let shorthand;
    let obj = match right {
        Value::Object(obj) => obj,
        other => {
            let mut map = Map::new();
            map.insert("is".to_string(), other.clone());
            shorthand = map;
            &shorthand
        }
    };

    for (op, value) in sorted(obj) {
        let predicate = match op {
            "is" => StringPredicate::Is(expect_string(value)?),
            "not" => StringPredicate::Not(expect_string(value)?),
            "contains" => StringPredicate::Contains(expect_string(value)?),
            "starts_with" => StringPredicate::StartsWith(expect_string(value)?),
            "ends_with" => StringPredicate::EndsWith(expect_string(value)?),
            "in" => {
                let Value::Array(items) = value else {
                    return Err(CriteriaError::InMatcherNotArray);
                };
                StringPredicate::In(
                    items
                        .iter()
                        .map(expect_string)
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
            other => return Err(CriteriaError::UnknownStringOperator(other.to_string())),
        };
        dst.push(Clause::String {
            left: left.clone(),
            predicate,
        });
    }
    Ok(())
}

/// Compiles a string-list matcher against `left`, appending clauses to `dst`.
pub fn match_string_list(dst: &mut Body, left: &Term, right: &Value) -> Result<(), CriteriaError> {
    let shorthand;
    let obj = match right {
        Value::Object(obj) => obj,
        other => {
            let mut map = Map::new();
            map.insert("has".to_string(), other.clone());
            shorthand = map;
            &shorthand
        }
    };

    for (op, value) in sorted(obj) {
        let element = StringPredicate::Is(expect_string(value)?);
        let predicate = match op {
            "has" => ListPredicate::Has(element),
            "is" => ListPredicate::Is(element),
            "exclude" => ListPredicate::Exclude(element),
            other => return Err(CriteriaError::UnknownStringListOperator(other.to_string())),
        };
        dst.push(Clause::List {
            left: left.clone(),
            predicate,
        });
    }
    Ok(())
}

/// Compiles a whole match expression: an object mapping field names to
/// matcher objects. Fields are compiled in lexicographic key order so the
/// emitted body is identical across processes.
pub fn compile_match_expression(dst: &mut Body, expr: &Value) -> Result<(), CriteriaError> {
    let Value::Object(fields) = expr else {
        return Err(CriteriaError::ExpectedObject);
    };
    for (field, matcher) in sorted(fields) {
        let left = Term::input(field);
        if is_list_field(field) {
            match_string_list(dst, &left, matcher)?;
        } else {
            match_string(dst, &left, matcher)?;
        }
    }
    Ok(())
}

/// Fields whose evaluation input is a list of strings.
fn is_list_field(name: &str) -> bool {
    matches!(name, "groups" | "audiences")
}

fn sorted(obj: &Map<String, Value>) -> impl Iterator<Item = (&str, &Value)> {
    let mut entries = obj.iter().map(|(k, v)| (k.as_str(), v)).collect::<Vec<_>>();
    entries.sort_by_key(|(k, _)| *k);
    entries.into_iter()
}

fn expect_string(value: &Value) -> Result<String, CriteriaError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Err(CriteriaError::ExpectedString("null")),
        Value::Bool(_) => Err(CriteriaError::ExpectedString("a boolean")),
        Value::Number(_) => Err(CriteriaError::ExpectedString("a number")),
        Value::Array(_) => Err(CriteriaError::ExpectedString("an array")),
        Value::Object(_) => Err(CriteriaError::ExpectedString("an object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile_string(value: Value) -> Result<Body, CriteriaError> {
        let mut body = Body::new();
        match_string(&mut body, &Term::input("email"), &value)?;
        Ok(body)
    }

    fn compile_list(value: Value) -> Result<Body, CriteriaError> {
        let mut body = Body::new();
        match_string_list(&mut body, &Term::input("groups"), &value)?;
        Ok(body)
    }

    #[test]
    fn bare_string_is_shorthand_for_is() {
        let explicit = compile_string(json!({"is": "alice@example.com"})).unwrap();
        let shorthand = compile_string(json!("alice@example.com")).unwrap();
        assert_eq!(explicit, shorthand);
        assert_eq!(explicit.len(), 1);
        assert_eq!(
            explicit.to_string(),
            "eq(input.email, \"alice@example.com\")"
        );
    }

    #[test]
    fn string_operators() {
        let input = json!({"email": "alice@example.com"});
        for (matcher, expected) in [
            (json!({"is": "alice@example.com"}), true),
            (json!({"not": "bob@example.com"}), true),
            (json!({"not": "alice@example.com"}), false),
            (json!({"contains": "@example"}), true),
            (json!({"starts_with": "alice"}), true),
            (json!({"ends_with": "@example.com"}), true),
            (json!({"ends_with": "@other.com"}), false),
            (json!({"in": ["alice@example.com", "bob@example.com"]}), true),
            (json!({"in": ["carol@example.com"]}), false),
        ] {
            let body = compile_string(matcher.clone()).unwrap();
            assert_eq!(body.evaluate(&input), expected, "matcher: {matcher}");
        }
    }

    #[test]
    fn unknown_string_operator() {
        assert_eq!(
            compile_string(json!({"matches": "x"})),
            Err(CriteriaError::UnknownStringOperator("matches".to_string()))
        );
    }

    #[test]
    fn in_requires_an_array() {
        assert_eq!(
            compile_string(json!({"in": "alice@example.com"})),
            Err(CriteriaError::InMatcherNotArray)
        );
    }

    #[test]
    fn non_string_values_are_compile_errors() {
        assert_eq!(
            compile_string(json!({"is": 42})),
            Err(CriteriaError::ExpectedString("a number"))
        );
        assert_eq!(
            compile_list(json!({"has": ["eng"]})),
            Err(CriteriaError::ExpectedString("an array"))
        );
    }

    #[test]
    fn bare_string_is_shorthand_for_has() {
        let explicit = compile_list(json!({"has": "eng"})).unwrap();
        let shorthand = compile_list(json!("eng")).unwrap();
        assert_eq!(explicit, shorthand);
        assert_eq!(explicit.to_string(), "any(input.groups, eq($0, \"eng\"))");
    }

    #[test]
    fn list_operators() {
        let two = json!({"groups": ["eng", "ops"]});
        let one = json!({"groups": ["eng"]});
        let none = json!({"groups": []});

        let has = compile_list(json!({"has": "eng"})).unwrap();
        assert!(has.evaluate(&two));
        assert!(has.evaluate(&one));
        assert!(!has.evaluate(&none));

        let is = compile_list(json!({"is": "eng"})).unwrap();
        assert!(!is.evaluate(&two));
        assert!(is.evaluate(&one));
        assert!(!is.evaluate(&none));

        let exclude = compile_list(json!({"exclude": "eng"})).unwrap();
        assert!(!exclude.evaluate(&two));
        assert!(exclude.evaluate(&none));
        assert!(exclude.evaluate(&json!({"groups": ["ops"]})));
    }

    #[test]
    fn unknown_list_operator() {
        assert_eq!(
            compile_list(json!({"all": "eng"})),
            Err(CriteriaError::UnknownStringListOperator("all".to_string()))
        );
    }

    #[test]
    fn compiling_into_one_body_is_conjunction() {
        let mut both = Body::new();
        compile_match_expression(
            &mut both,
            &json!({
                "email": {"ends_with": "@example.com"},
                "groups": {"has": "eng"},
            }),
        )
        .unwrap();

        let mut email_only = Body::new();
        compile_match_expression(&mut email_only, &json!({"email": {"ends_with": "@example.com"}}))
            .unwrap();
        let mut groups_only = Body::new();
        compile_match_expression(&mut groups_only, &json!({"groups": {"has": "eng"}})).unwrap();

        let inputs = [
            json!({"email": "alice@example.com", "groups": ["eng"]}),
            json!({"email": "alice@example.com", "groups": ["ops"]}),
            json!({"email": "mallory@evil.test", "groups": ["eng"]}),
            json!({"email": "mallory@evil.test", "groups": []}),
        ];
        for input in &inputs {
            assert_eq!(
                both.evaluate(input),
                email_only.evaluate(input) && groups_only.evaluate(input),
                "input: {input}"
            );
        }
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut a = Body::new();
        compile_match_expression(
            &mut a,
            &json!({"groups": {"has": "eng"}, "email": {"is": "alice@example.com"}}),
        )
        .unwrap();
        let mut b = Body::new();
        compile_match_expression(
            &mut b,
            &json!({"email": {"is": "alice@example.com"}, "groups": {"has": "eng"}}),
        )
        .unwrap();
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(
            a.to_string(),
            "eq(input.email, \"alice@example.com\")\nany(input.groups, eq($0, \"eng\"))"
        );
    }

    #[test]
    fn operators_within_a_matcher_compile_in_sorted_order() {
        let body = compile_string(json!({
            "starts_with": "alice",
            "ends_with": "@example.com",
        }))
        .unwrap();
        assert_eq!(
            body.to_string(),
            "ends_with(input.email, \"@example.com\")\nstarts_with(input.email, \"alice\")"
        );
    }
}
