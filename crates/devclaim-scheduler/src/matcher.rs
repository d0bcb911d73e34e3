//! Selector matching against device attributes.
//!
//! A selector matches when every exact-match label is present with an
//! equal value AND every set-based expression holds for the attribute map
//! interpreted as a label set.

use devclaim_state::{Attributes, Selector, SelectorRequirement};
use tracing::debug;

use crate::error::SelectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

fn parse_requirement(req: &SelectorRequirement) -> Result<Operator, SelectorError> {
    if req.key.is_empty() {
        return Err(SelectorError::EmptyKey);
    }
    let op = match req.operator.as_str() {
        "In" => Operator::In,
        "NotIn" => Operator::NotIn,
        "Exists" => Operator::Exists,
        "DoesNotExist" => Operator::DoesNotExist,
        other => {
            return Err(SelectorError::UnknownOperator {
                key: req.key.clone(),
                operator: other.to_string(),
            });
        }
    };
    match op {
        Operator::In | Operator::NotIn if req.values.is_empty() => {
            Err(SelectorError::MissingValues {
                key: req.key.clone(),
                operator: req.operator.clone(),
            })
        }
        Operator::Exists | Operator::DoesNotExist if !req.values.is_empty() => {
            Err(SelectorError::UnexpectedValues {
                key: req.key.clone(),
                operator: req.operator.clone(),
            })
        }
        _ => Ok(op),
    }
}

fn requirement_holds(req: &SelectorRequirement, op: Operator, attrs: &Attributes) -> bool {
    let value = attrs.get(&req.key);
    match op {
        Operator::In => value.is_some_and(|v| req.values.contains(v)),
        Operator::NotIn => value.is_none_or(|v| !req.values.contains(v)),
        Operator::Exists => value.is_some(),
        Operator::DoesNotExist => value.is_none(),
    }
}

/// Evaluate a selector, reporting malformed expressions.
pub fn try_matches(selector: &Selector, attrs: &Attributes) -> Result<bool, SelectorError> {
    // Validate every expression first so a malformed selector never
    // matches, whatever the labels say.
    let ops = selector
        .match_expressions
        .iter()
        .map(parse_requirement)
        .collect::<Result<Vec<_>, _>>()?;

    let labels_hold = selector
        .match_labels
        .iter()
        .all(|(k, v)| attrs.get(k) == Some(v));
    if !labels_hold {
        return Ok(false);
    }

    Ok(selector
        .match_expressions
        .iter()
        .zip(ops)
        .all(|(req, op)| requirement_holds(req, op, attrs)))
}

/// Whether `attrs` satisfies `selector`. Malformed selectors fail closed.
pub fn matches(selector: &Selector, attrs: &Attributes) -> bool {
    match try_matches(selector, attrs) {
        Ok(matched) => matched,
        Err(e) => {
            debug!(error = %e, "malformed selector, treating as non-match");
            false
        }
    }
}
