// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Value Resolver: parses `${path}` templates and resolves
//! dotted/indexed paths against a layered binding set
//! (`params.*`, `responses.*`, `loop.*`).
//!
//! Placeholder scanning is a manual scan over `&str`, and the path
//! grammar is parsed into a small AST (`PathSegment`) rather than by
//! string splitting. No regex, no arithmetic, no method calls:
//! `${...}` syntax that isn't a bare path is a literal substring.

use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// One segment of a resolved path: a named field or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A parsed `${...}` path, e.g. `responses.user.address.city` or
/// `params.list[0].count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path(pub Vec<PathSegment>);

impl Path {
    pub fn parse(src: &str) -> Self {
        let mut segments = Vec::new();
        let mut chars = src.chars().peekable();
        let mut current = String::new();

        let flush = |current: &mut String, segments: &mut Vec<PathSegment>| {
            if !current.is_empty() {
                segments.push(PathSegment::Field(std::mem::take(current)));
            }
        };

        while let Some(c) = chars.next() {
            match c {
                '.' => flush(&mut current, &mut segments),
                '[' => {
                    flush(&mut current, &mut segments);
                    let mut index_src = String::new();
                    for c in chars.by_ref() {
                        if c == ']' {
                            break;
                        }
                        index_src.push(c);
                    }
                    match index_src.trim().parse::<usize>() {
                        Ok(n) => segments.push(PathSegment::Index(n)),
                        Err(_) if !index_src.trim().is_empty() => {
                            segments.push(PathSegment::Field(index_src.trim().to_string()))
                        }
                        Err(_) => {}
                    }
                }
                _ => current.push(c),
            }
        }
        flush(&mut current, &mut segments);
        Path(segments)
    }

    pub fn root(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathSegment::Field(name)) => Some(name),
            _ => None,
        }
    }
}

/// Walks a JSON value following a sequence of path segments. Missing
/// intermediate keys short-circuit to `None` rather than erroring.
pub fn walk<'a>(value: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Field(name), Value::Object(map)) => map.get(name)?,
            (PathSegment::Index(i), Value::Array(arr)) => arr.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// The `loop.*` namespace for one active loop frame, and the aliases
/// (`itemAlias`/`indexAlias`) it additionally seeds at the top level.
#[derive(Debug, Clone, Default)]
pub struct LoopBindings {
    pub fields: serde_json::Map<String, Value>,
}

/// The three layered namespaces the Resolver consults, plus any
/// itemAlias/indexAlias names bound directly at the top level by the
/// innermost active loop frame.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    pub params: Value,
    pub responses: HashMap<String, Value>,
    pub loop_ns: LoopBindings,
    pub aliases: HashMap<String, Value>,
}

impl Bindings {
    pub fn new(params: Value) -> Self {
        Self {
            params,
            responses: HashMap::new(),
            loop_ns: LoopBindings::default(),
            aliases: HashMap::new(),
        }
    }

    /// Resolves a parsed path against the layered namespaces. Returns
    /// `None` if any segment is missing (soft failure: callers log).
    pub fn resolve_path<'a>(&'a self, path: &Path) -> Option<&'a Value> {
        let root = path.root()?;
        let rest = &path.0[1..];
        match root {
            "params" => walk(&self.params, rest),
            "responses" => {
                let (alias, rest2) = split_first_field(rest)?;
                walk(self.responses.get(alias)?, rest2)
            }
            "loop" => {
                let (field, rest2) = split_first_field(rest)?;
                walk(self.loop_ns.fields.get(field)?, rest2)
            }
            other => walk(self.aliases.get(other)?, rest),
        }
    }
}

fn split_first_field(segments: &[PathSegment]) -> Option<(&str, &[PathSegment])> {
    match segments.first() {
        Some(PathSegment::Field(name)) => Some((name.as_str(), &segments[1..])),
        _ => None,
    }
}

/// Resolves a single `${path}` template occurrence, returning a
/// reference into the owned bindings. Used by both `resolve_string`
/// and `resolve_value`.
fn resolve_one<'a>(bindings: &'a Bindings, path_src: &str) -> Option<&'a Value> {
    let path = Path::parse(path_src);
    bindings.resolve_path(&path)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Finds the span `(start, end)` of the next `${...}` occurrence in
/// `template`, where `start`/`end` bound the inner path text
/// (exclusive of the `${`/`}` delimiters). Returns `None` if there is
/// no well-formed placeholder left.
fn next_placeholder(template: &str, from: usize) -> Option<(usize, usize, usize, usize)> {
    let bytes = template.as_bytes();
    let mut i = from;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'{' {
            if let Some(close) = template[i + 2..].find('}') {
                let inner_start = i + 2;
                let inner_end = inner_start + close;
                return Some((i, inner_end + 1, inner_start, inner_end));
            } else {
                return None;
            }
        }
        i += 1;
    }
    None
}

/// `resolveString(template, bindings) -> string`: substitutes every
/// `${...}` with the stringified value of its path. Unresolved paths
/// substitute empty and log a warning; resolution never panics or
/// returns an error.
pub fn resolve_string(template: &str, bindings: &Bindings) -> String {
    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;
    while let Some((outer_start, outer_end, inner_start, inner_end)) =
        next_placeholder(template, cursor)
    {
        out.push_str(&template[cursor..outer_start]);
        let path_src = &template[inner_start..inner_end];
        match resolve_one(bindings, path_src) {
            Some(v) => out.push_str(&stringify(v)),
            None => {
                warn!(path = %path_src, "unresolved ${{...}} placeholder, substituting empty string");
            }
        }
        cursor = outer_end;
    }
    out.push_str(&template[cursor..]);
    out
}

/// If `template` is exactly one `${path}` placeholder and nothing
/// else, returns the raw resolved value (so JSON bodies can carry
/// numbers/booleans/objects, not just strings).
fn as_sole_placeholder(template: &str) -> Option<&str> {
    let stripped = template.strip_prefix("${")?;
    let inner = stripped.strip_suffix('}')?;
    if inner.contains("${") {
        return None;
    }
    Some(inner)
}

/// `resolveValue(node, bindings) -> unknown`: deep-walks a JSON-shaped
/// value, substituting strings and recursing into arrays/objects.
pub fn resolve_value(node: &Value, bindings: &Bindings) -> Value {
    match node {
        Value::String(s) => {
            if let Some(path_src) = as_sole_placeholder(s) {
                match resolve_one(bindings, path_src) {
                    Some(v) => return v.clone(),
                    None => {
                        warn!(path = %path_src, "unresolved ${{...}} placeholder, substituting empty string");
                        return Value::String(String::new());
                    }
                }
            }
            Value::String(resolve_string(s, bindings))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, bindings)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, bindings)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings() -> Bindings {
        let mut b = Bindings::new(json!({"id": 7, "list": [{"count": 2}]}));
        b.responses
            .insert("user".to_string(), json!({"name": "Ann", "address": {"city": "Oslo"}}));
        b
    }

    #[test]
    fn resolves_dotted_and_indexed_paths() {
        let b = bindings();
        assert_eq!(resolve_string("${params.id}", &b), "7");
        assert_eq!(resolve_string("id=${params.list[0].count}", &b), "id=2");
        assert_eq!(
            resolve_string("${responses.user.address.city}", &b),
            "Oslo"
        );
    }

    #[test]
    fn unresolved_path_substitutes_empty() {
        let b = bindings();
        assert_eq!(resolve_string("x${params.missing}y", &b), "xy");
    }

    #[test]
    fn resolve_value_round_trips_non_string_values() {
        let b = bindings();
        let v = json!({"a": 1, "b": [true, null]});
        assert_eq!(resolve_value(&v, &Bindings::default()), v);
        assert_eq!(resolve_value(&json!("${params.id}"), &b), json!(7));
    }

    #[test]
    fn resolve_value_recurses_into_nested_strings() {
        let b = bindings();
        let body = json!({"userId": "${params.id}", "note": "hello ${responses.user.name}"});
        let resolved = resolve_value(&body, &b);
        assert_eq!(resolved["userId"], json!(7));
        assert_eq!(resolved["note"], json!("hello Ann"));
    }

    #[test]
    fn loop_namespace_resolves_item_and_index() {
        let mut b = bindings();
        b.loop_ns.fields.insert("index".to_string(), json!(2));
        b.loop_ns.fields.insert("total".to_string(), json!(6));
        b.loop_ns.fields.insert("item".to_string(), json!({"id": 3}));
        assert_eq!(resolve_string("${loop.index}/${loop.total}", &b), "2/6");
        assert_eq!(resolve_string("${loop.item.id}", &b), "3");
    }

    #[test]
    fn aliases_resolve_at_top_level() {
        let mut b = bindings();
        b.aliases.insert("user".to_string(), json!({"id": 9}));
        // Note: this shadows the `responses.user` alias namespace only
        // when referenced without the `responses.` prefix.
        assert_eq!(resolve_string("${user.id}", &b), "9");
    }
}
