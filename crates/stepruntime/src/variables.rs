//! Variable resolution and property processing.
//!
//! Inputs reference earlier step outputs with `{{ step.path[0] }}`
//! templates and stored credentials with `{{ connections.name }}`. The
//! resolver produces both the resolved value and a censored copy with every
//! credential replaced, which is what ends up in the trace.

use crate::connections::ConnectionResolver;
use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use stepcore::{EngineError, ExecutionState};

pub const REDACTED: &str = "**REDACTED**";
const CONNECTIONS_ROOT: &str = "connections";

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub resolved: Value,
    pub censored: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    pub processed: Value,
    /// Property name to the list of validation messages.
    pub errors: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyType {
    ShortText,
    LongText,
    Number,
    Checkbox,
    Json,
    Object,
    Array,
    Dropdown,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    pub display_name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
}

impl PropertyDefinition {
    pub fn new(display_name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            display_name: display_name.into(),
            property_type,
            required: false,
            default_value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Declared input properties of an integration action, in display order.
pub type PropertySchema = IndexMap<String, PropertyDefinition>;

#[async_trait]
pub trait VariableResolver: Send + Sync {
    async fn resolve(&self, unresolved: &Value, state: &ExecutionState) -> Result<Resolved, EngineError>;

    fn apply_processors_and_validators(
        &self,
        resolved: &Value,
        props: &PropertySchema,
        auth: Option<&PropertyDefinition>,
    ) -> Processed {
        process_properties(resolved, props, auth)
    }
}

/// Resolves `{{ }}` templates against the steps visible at the state's
/// current path.
pub struct TemplateResolver {
    connections: Arc<dyn ConnectionResolver>,
}

impl TemplateResolver {
    pub fn new(connections: Arc<dyn ConnectionResolver>) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl VariableResolver for TemplateResolver {
    async fn resolve(&self, unresolved: &Value, state: &ExecutionState) -> Result<Resolved, EngineError> {
        let mut names = HashSet::new();
        collect_connection_names(unresolved, &mut names);

        let mut connections = HashMap::new();
        for name in names {
            let value = self
                .connections
                .get(&name)
                .await
                .map_err(|e| EngineError::Resolution(e.to_string()))?
                .ok_or_else(|| EngineError::Resolution(format!("Connection '{}' not found", name)))?;
            connections.insert(name, value);
        }

        let scope = Scope::new(state, connections);
        Ok(Resolved {
            resolved: scope.resolve_value(unresolved, false),
            censored: scope.resolve_value(unresolved, true),
        })
    }
}

struct Scope {
    steps: HashMap<String, Value>,
    connections: HashMap<String, Value>,
}

impl Scope {
    fn new(state: &ExecutionState, connections: HashMap<String, Value>) -> Self {
        let steps = state
            .steps_in_scope()
            .into_iter()
            .map(|(name, step)| (name.to_string(), step.output.clone().unwrap_or(Value::Null)))
            .collect();
        Self { steps, connections }
    }

    fn resolve_value(&self, value: &Value, censor: bool) -> Value {
        match value {
            Value::String(s) => self.resolve_string(s, censor),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v, censor)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v, censor)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve_string(&self, input: &str, censor: bool) -> Value {
        let templates = find_templates(input);
        if templates.is_empty() {
            return Value::String(input.to_string());
        }

        if let [(start, end, expr)] = templates.as_slice() {
            if *start == 0 && *end == input.len() {
                return self.evaluate(expr, censor);
            }
        }

        let mut out = String::with_capacity(input.len());
        let mut cursor = 0;
        for (start, end, expr) in &templates {
            out.push_str(&input[cursor..*start]);
            match self.evaluate(expr, censor) {
                Value::String(s) => out.push_str(&s),
                Value::Null => {}
                other => out.push_str(&other.to_string()),
            }
            cursor = *end;
        }
        out.push_str(&input[cursor..]);
        Value::String(out)
    }

    fn evaluate(&self, expr: &str, censor: bool) -> Value {
        let Some(segments) = parse_path(expr) else {
            return Value::Null;
        };
        let Some((PathSegment::Key(root), rest)) = segments.split_first() else {
            return Value::Null;
        };

        if root == CONNECTIONS_ROOT {
            if censor {
                return Value::String(REDACTED.to_string());
            }
            let Some((PathSegment::Key(name), rest)) = rest.split_first() else {
                return Value::Null;
            };
            return self
                .connections
                .get(name)
                .map(|v| walk(v, rest))
                .unwrap_or(Value::Null);
        }

        self.steps
            .get(root)
            .map(|v| walk(v, rest))
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

fn walk(value: &Value, segments: &[PathSegment]) -> Value {
    let mut current = value;
    for segment in segments {
        let next = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key),
            (PathSegment::Index(i), Value::Array(items)) => items.get(*i),
            (PathSegment::Key(key), Value::Array(items)) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

static TEMPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{\{\s*(.*?)\s*\}\}").expect("template pattern is valid"));

static PATH_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([^.\[\]\s]+)|\[\s*(\d+|"[^"]*"|'[^']*')\s*\]"#).expect("path pattern is valid")
});

/// `(start, end, expression)` for every `{{ expression }}` in `input`.
fn find_templates(input: &str) -> Vec<(usize, usize, String)> {
    TEMPLATE
        .captures_iter(input)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let expr = caps.get(1).map_or("", |m| m.as_str());
            Some((whole.start(), whole.end(), expr.to_string()))
        })
        .collect()
}

fn is_separator_gap(gap: &str) -> bool {
    gap.chars().all(|c| c == '.' || c.is_whitespace())
}

/// Split `step.items[0]["key name"]` into keys and indexes. Anything the
/// segment pattern does not cover makes the whole path invalid.
fn parse_path(expr: &str) -> Option<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    for caps in PATH_SEGMENT.captures_iter(expr) {
        let whole = caps.get(0)?;
        if !is_separator_gap(&expr[cursor..whole.start()]) {
            return None;
        }
        cursor = whole.end();

        if let Some(key) = caps.get(1) {
            segments.push(PathSegment::Key(key.as_str().to_string()));
        } else if let Some(inner) = caps.get(2) {
            let inner = inner.as_str();
            let quoted = inner
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .or_else(|| inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
            match quoted {
                Some(name) => segments.push(PathSegment::Key(name.to_string())),
                None => segments.push(PathSegment::Index(inner.parse().ok()?)),
            }
        }
    }

    if !is_separator_gap(&expr[cursor..]) || segments.is_empty() {
        return None;
    }
    Some(segments)
}

fn collect_connection_names(value: &Value, names: &mut HashSet<String>) {
    match value {
        Value::String(s) => {
            for (_, _, expr) in find_templates(s) {
                if let Some(segments) = parse_path(&expr) {
                    if let [PathSegment::Key(root), PathSegment::Key(name), ..] = segments.as_slice() {
                        if root == CONNECTIONS_ROOT {
                            names.insert(name.clone());
                        }
                    }
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_connection_names(v, names)),
        Value::Object(map) => map.values().for_each(|v| collect_connection_names(v, names)),
        _ => {}
    }
}

/// Coerce resolved values to their declared types and report violations.
pub fn process_properties(
    resolved: &Value,
    props: &PropertySchema,
    auth: Option<&PropertyDefinition>,
) -> Processed {
    let mut processed = resolved.as_object().cloned().unwrap_or_default();
    let mut errors = Map::new();

    for (name, definition) in props {
        let raw = processed
            .get(name)
            .cloned()
            .filter(|v| !v.is_null())
            .or_else(|| definition.default_value.clone())
            .unwrap_or(Value::Null);
        let value = coerce(raw, definition.property_type);

        let mut messages = Vec::new();
        if is_blank(&value) {
            if definition.required {
                messages.push(Value::String("Expected a value, but found nothing".to_string()));
            }
        } else if let Some(message) = type_mismatch(&value, definition.property_type) {
            messages.push(Value::String(message));
        }

        if !messages.is_empty() {
            errors.insert(name.clone(), Value::Array(messages));
        }
        processed.insert(name.clone(), value);
    }

    if let Some(auth) = auth {
        let missing = processed.get("auth").map_or(true, is_blank);
        if auth.required && missing {
            errors.insert(
                "auth".to_string(),
                Value::Array(vec![Value::String("Expected a connection, but found nothing".to_string())]),
            );
        }
    }

    Processed {
        processed: Value::Object(processed),
        errors,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn coerce(value: Value, property_type: PropertyType) -> Value {
    match (property_type, value) {
        (PropertyType::Number, Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::Null
            } else if let Ok(int) = trimmed.parse::<i64>() {
                Value::from(int)
            } else {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::String(s))
            }
        }
        (PropertyType::Checkbox, Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(s),
        },
        (PropertyType::Json | PropertyType::Object | PropertyType::Array, Value::String(s)) => {
            serde_json::from_str(&s).unwrap_or(Value::String(s))
        }
        (_, value) => value,
    }
}

fn type_mismatch(value: &Value, property_type: PropertyType) -> Option<String> {
    let ok = match property_type {
        PropertyType::Number => value.is_number(),
        PropertyType::Checkbox => value.is_boolean(),
        PropertyType::Object => value.is_object(),
        PropertyType::Array => value.is_array(),
        _ => true,
    };
    if ok {
        None
    } else {
        Some(format!("Expected {:?}, but found {}", property_type, value))
    }
}
