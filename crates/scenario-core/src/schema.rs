// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parameter Schema Validator: validates and coerces caller-supplied
//! `{ [paramName]: value }` against the scenario's typed
//! `ParameterSchema` tree before a run starts.
//! Validation errors prevent the run from starting entirely.

use crate::error::{Result, ScenarioError};
use crate::model::{ParamType, ParameterSchema};
use serde_json::{Map, Value};

/// Validates `inputs` against `schemas`, applying `defaultValue` for
/// missing optional fields, and returns the resolved `params` object
/// the run should see. Returns the first validation failure
/// encountered (missing required, wrong type, out of range, pattern
/// mismatch, enum violation) as a `ScenarioError::Validation`.
pub fn validate(schemas: &[ParameterSchema], inputs: &Value) -> Result<Value> {
    let empty = Map::new();
    let input_map = inputs.as_object().unwrap_or(&empty);

    let mut resolved = Map::new();
    for schema in schemas {
        let value = validate_one(schema, input_map.get(&schema.name))?;
        if let Some(value) = value {
            resolved.insert(schema.name.clone(), value);
        }
    }
    Ok(Value::Object(resolved))
}

fn validate_one(schema: &ParameterSchema, input: Option<&Value>) -> Result<Option<Value>> {
    let value = match input {
        Some(v) => v.clone(),
        None => match &schema.default_value {
            Some(default) => default.clone(),
            None => {
                if schema.required {
                    return Err(ScenarioError::Validation {
                        param: schema.name.clone(),
                        reason: "missing required parameter".to_string(),
                    });
                }
                return Ok(None);
            }
        },
    };

    check_type(schema, &value)?;
    check_validation(schema, &value)?;

    let value = match (schema.param_type, &value) {
        (ParamType::Object, Value::Object(map)) => {
            let mut validated = Map::new();
            for prop in &schema.properties {
                if let Some(v) = validate_one(prop, map.get(&prop.name))? {
                    validated.insert(prop.name.clone(), v);
                }
            }
            Value::Object(validated)
        }
        (ParamType::Array, Value::Array(items)) => {
            if let Some(item_schema) = &schema.item_schema {
                let mut validated = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match validate_one(item_schema, Some(item)) {
                        Ok(Some(v)) => validated.push(v),
                        Ok(None) => {}
                        Err(ScenarioError::Validation { reason, .. }) => {
                            return Err(ScenarioError::Validation {
                                param: format!("{}[{}]", schema.name, i),
                                reason,
                            })
                        }
                        Err(other) => return Err(other),
                    }
                }
                Value::Array(validated)
            } else {
                value
            }
        }
        _ => value,
    };

    Ok(Some(value))
}

fn check_type(schema: &ParameterSchema, value: &Value) -> Result<()> {
    let matches = match schema.param_type {
        ParamType::Any => true,
        ParamType::String => value.is_string(),
        ParamType::Number => value.is_number(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Object => value.is_object(),
        ParamType::Array => value.is_array(),
    };
    if !matches {
        return Err(ScenarioError::Validation {
            param: schema.name.clone(),
            reason: format!("expected {:?}, got {}", schema.param_type, type_name(value)),
        });
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_validation(schema: &ParameterSchema, value: &Value) -> Result<()> {
    let Some(validation) = &schema.validation else {
        return Ok(());
    };

    if let Some(min) = validation.min {
        let actual = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => Some(s.len() as f64),
            Value::Array(a) => Some(a.len() as f64),
            _ => None,
        };
        if let Some(actual) = actual {
            if actual < min {
                return Err(ScenarioError::Validation {
                    param: schema.name.clone(),
                    reason: format!("value {actual} is below minimum {min}"),
                });
            }
        }
    }

    if let Some(max) = validation.max {
        let actual = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => Some(s.len() as f64),
            Value::Array(a) => Some(a.len() as f64),
            _ => None,
        };
        if let Some(actual) = actual {
            if actual > max {
                return Err(ScenarioError::Validation {
                    param: schema.name.clone(),
                    reason: format!("value {actual} is above maximum {max}"),
                });
            }
        }
    }

    if let Some(pattern) = &validation.pattern {
        if let Value::String(s) = value {
            let re = regex::Regex::new(pattern).map_err(|e| ScenarioError::Validation {
                param: schema.name.clone(),
                reason: format!("invalid pattern '{pattern}': {e}"),
            })?;
            if !re.is_match(s) {
                return Err(ScenarioError::Validation {
                    param: schema.name.clone(),
                    reason: format!("value does not match pattern '{pattern}'"),
                });
            }
        }
    }

    if let Some(enum_values) = &validation.enum_values {
        if !enum_values.iter().any(|v| crate::condition::deep_equal(v, value)) {
            return Err(ScenarioError::Validation {
                param: schema.name.clone(),
                reason: "value is not one of the allowed enum values".to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Validation;
    use serde_json::json;

    fn schema(name: &str, param_type: ParamType, required: bool) -> ParameterSchema {
        ParameterSchema {
            name: name.to_string(),
            param_type,
            required,
            default_value: None,
            validation: None,
            properties: vec![],
            item_schema: None,
        }
    }

    #[test]
    fn missing_required_fails() {
        let schemas = vec![schema("id", ParamType::Number, true)];
        let err = validate(&schemas, &json!({})).unwrap_err();
        assert!(matches!(err, ScenarioError::Validation { .. }));
    }

    #[test]
    fn default_value_fills_in_missing_optional() {
        let mut s = schema("retries", ParamType::Number, false);
        s.default_value = Some(json!(3));
        let resolved = validate(&[s], &json!({})).unwrap();
        assert_eq!(resolved["retries"], json!(3));
    }

    #[test]
    fn wrong_type_fails() {
        let schemas = vec![schema("id", ParamType::Number, true)];
        let err = validate(&schemas, &json!({"id": "seven"})).unwrap_err();
        assert!(matches!(err, ScenarioError::Validation { .. }));
    }

    #[test]
    fn pattern_and_enum_validation() {
        let mut s = schema("code", ParamType::String, true);
        s.validation = Some(Validation {
            min: None,
            max: None,
            pattern: Some("^[A-Z]{3}$".to_string()),
            enum_values: None,
        });
        assert!(validate(&[s.clone()], &json!({"code": "ABC"})).is_ok());
        assert!(validate(&[s], &json!({"code": "abc"})).is_err());

        let mut e = schema("level", ParamType::String, true);
        e.validation = Some(Validation {
            min: None,
            max: None,
            pattern: None,
            enum_values: Some(vec![json!("low"), json!("high")]),
        });
        assert!(validate(&[e.clone()], &json!({"level": "low"})).is_ok());
        assert!(validate(&[e], &json!({"level": "medium"})).is_err());
    }

    #[test]
    fn nested_object_properties_validate_recursively() {
        let mut inner = schema("id", ParamType::Number, true);
        inner.validation = None;
        let mut outer = schema("user", ParamType::Object, true);
        outer.properties = vec![inner];
        let err = validate(&[outer], &json!({"user": {}})).unwrap_err();
        assert!(matches!(err, ScenarioError::Validation { .. }));
    }
}
