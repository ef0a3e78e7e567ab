// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Condition Evaluator: single conditions and AND/OR trees over
//! `params`/`response` sources.

use crate::resolver::{walk, Bindings, Path};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionSource {
    Params,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    Contains,
    NotContains,
    IsEmpty,
    IsNotEmpty,
    Exists,
}

/// A single leaf condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub source: ConditionSource,
    /// Required when `source == Response`: which step's saved response
    /// (by alias or step id) to read `field` from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Path expression, evaluated within the selected source's value.
    pub field: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BoolOp {
    And,
    Or,
}

/// Either a single condition or a group combining children with
/// AND/OR. Short-circuits: AND stops on first false, OR on first
/// true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionExpression {
    Single(Condition),
    Group(ConditionGroup),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionGroup {
    pub operator: BoolOp,
    pub children: Vec<ConditionExpression>,
}

impl ConditionExpression {
    pub fn evaluate(&self, bindings: &Bindings) -> bool {
        match self {
            ConditionExpression::Single(c) => c.evaluate(bindings),
            ConditionExpression::Group(g) => g.evaluate(bindings),
        }
    }
}

impl ConditionGroup {
    pub fn evaluate(&self, bindings: &Bindings) -> bool {
        match self.operator {
            BoolOp::And => self.children.iter().all(|c| c.evaluate(bindings)),
            BoolOp::Or => self.children.iter().any(|c| c.evaluate(bindings)),
        }
    }
}

impl Condition {
    /// Resolves the LHS operand by selecting the source namespace and
    /// applying `field`. A missing `response.<stepId>` binding
    /// evaluates false (not throw), logged at debug.
    fn lhs<'a>(&self, bindings: &'a Bindings) -> Option<&'a Value> {
        let path = Path::parse(&self.field);
        match self.source {
            ConditionSource::Params => walk(&bindings.params, &path.0),
            ConditionSource::Response => {
                let step_id = self.step_id.as_deref()?;
                match bindings.responses.get(step_id) {
                    Some(v) => walk(v, &path.0),
                    None => {
                        debug!(step_id, "condition references unsaved response binding");
                        None
                    }
                }
            }
        }
    }

    pub fn evaluate(&self, bindings: &Bindings) -> bool {
        if self.source == ConditionSource::Response
            && self
                .step_id
                .as_deref()
                .map(|id| !bindings.responses.contains_key(id))
                .unwrap_or(true)
        {
            return false;
        }

        let lhs = self.lhs(bindings);
        match self.operator {
            Operator::Exists => lhs.is_some(),
            Operator::IsEmpty => lhs.map(is_empty_value).unwrap_or(true),
            Operator::IsNotEmpty => lhs.map(|v| !is_empty_value(v)).unwrap_or(false),
            Operator::Eq => match lhs {
                Some(lhs) => self.value.as_ref().map(|rhs| deep_equal(lhs, rhs)).unwrap_or(false),
                None => self.value.is_none(),
            },
            Operator::Ne => !Condition {
                operator: Operator::Eq,
                ..self.clone()
            }
            .evaluate(bindings),
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                match (lhs.and_then(Value::as_f64), self.value.as_ref().and_then(Value::as_f64)) {
                    (Some(l), Some(r)) => match self.operator {
                        Operator::Gt => l > r,
                        Operator::Gte => l >= r,
                        Operator::Lt => l < r,
                        Operator::Lte => l <= r,
                        _ => unreachable!(),
                    },
                    _ => false,
                }
            }
            Operator::Contains => match (lhs, &self.value) {
                (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle.as_str()),
                (Some(Value::Array(items)), Some(needle)) => items.iter().any(|v| deep_equal(v, needle)),
                (Some(Value::Object(map)), Some(Value::String(key))) => map.contains_key(key),
                _ => false,
            },
            Operator::NotContains => !Condition {
                operator: Operator::Contains,
                ..self.clone()
            }
            .evaluate(bindings),
        }
    }
}

/// Language-neutral "deep-equal" for structured values.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| deep_equal(a, b))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).map(|bv| deep_equal(v, bv)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// True for `null`/missing/empty string/empty array/empty object.
pub fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
