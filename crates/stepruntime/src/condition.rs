//! Boolean condition language shared by Branch and Split.
//!
//! Input is a list of AND-groups; the result is the OR across groups. All
//! operators are validated before anything is evaluated, so an unknown
//! operator fails deterministically regardless of where it appears.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use stepcore::ConditionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    TextContains,
    TextNotContains,
    TextExactlyMatches,
    TextNotExactlyMatches,
    TextStartsWith,
    TextNotStartsWith,
    TextEndsWith,
    TextNotEndsWith,
    NumberGreaterThan,
    NumberLessThan,
    NumberEqualTo,
    BooleanIsTrue,
    BooleanIsFalse,
    Exists,
    DoesNotExist,
    DateIsAfter,
    DateIsBefore,
    ListIsEmpty,
    ListIsNotEmpty,
    ListCountGreaterThan,
    ListCountLessThan,
    ListCountEqualTo,
    ListContains,
    ListNotContains,
}

impl FromStr for ConditionOperator {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ConditionOperator::*;
        let op = match s {
            "TEXT_CONTAINS" => TextContains,
            "TEXT_DOES_NOT_CONTAIN" | "TEXT_NOT_CONTAINS" => TextNotContains,
            "TEXT_EXACTLY_MATCHES" => TextExactlyMatches,
            "TEXT_DOES_NOT_EXACTLY_MATCH" | "TEXT_NOT_EXACTLY_MATCHES" => TextNotExactlyMatches,
            "TEXT_STARTS_WITH" => TextStartsWith,
            "TEXT_DOES_NOT_START_WITH" | "TEXT_NOT_STARTS_WITH" => TextNotStartsWith,
            "TEXT_ENDS_WITH" => TextEndsWith,
            "TEXT_DOES_NOT_END_WITH" | "TEXT_NOT_ENDS_WITH" => TextNotEndsWith,
            "NUMBER_IS_GREATER_THAN" | "NUMBER_GREATER_THAN" => NumberGreaterThan,
            "NUMBER_IS_LESS_THAN" | "NUMBER_LESS_THAN" => NumberLessThan,
            "NUMBER_IS_EQUAL_TO" | "NUMBER_EQUAL_TO" => NumberEqualTo,
            "BOOLEAN_IS_TRUE" => BooleanIsTrue,
            "BOOLEAN_IS_FALSE" => BooleanIsFalse,
            "EXISTS" => Exists,
            "DOES_NOT_EXIST" => DoesNotExist,
            "DATE_IS_AFTER" => DateIsAfter,
            "DATE_IS_BEFORE" => DateIsBefore,
            "LIST_IS_EMPTY" => ListIsEmpty,
            "LIST_IS_NOT_EMPTY" => ListIsNotEmpty,
            "LIST_COUNT_IS_GREATER_THAN" | "LIST_COUNT_GREATER_THAN" => ListCountGreaterThan,
            "LIST_COUNT_IS_LESS_THAN" | "LIST_COUNT_LESS_THAN" => ListCountLessThan,
            "LIST_COUNT_IS_EQUAL_TO" | "LIST_COUNT_EQUAL_TO" => ListCountEqualTo,
            "LIST_CONTAINS" => ListContains,
            "LIST_DOES_NOT_CONTAIN" | "LIST_NOT_CONTAINS" => ListNotContains,
            other => return Err(ConditionError::InvalidOperator(other.to_string())),
        };
        Ok(op)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub operator: ConditionOperator,
    pub first_value: Value,
    pub second_value: Value,
    pub case_sensitive: bool,
}

impl Condition {
    pub fn new(operator: ConditionOperator, first_value: Value, second_value: Value) -> Self {
        Self {
            operator,
            first_value,
            second_value,
            case_sensitive: false,
        }
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCondition {
    #[serde(default)]
    operator: Option<String>,
    #[serde(default)]
    first_value: Value,
    #[serde(default)]
    second_value: Value,
    #[serde(default)]
    case_sensitive: bool,
}

/// Parse resolved condition groups, rejecting unknown operators.
pub fn parse_condition_groups(resolved: &Value) -> Result<Vec<Vec<Condition>>, ConditionError> {
    if resolved.is_null() {
        return Ok(Vec::new());
    }
    let raw: Vec<Vec<RawCondition>> =
        serde_json::from_value(resolved.clone()).map_err(|e| ConditionError::Malformed(e.to_string()))?;

    raw.into_iter()
        .map(|group| {
            group
                .into_iter()
                .map(|c| -> Result<Condition, ConditionError> {
                    let operator = c.operator.as_deref().unwrap_or_default().parse()?;
                    Ok(Condition {
                        operator,
                        first_value: c.first_value,
                        second_value: c.second_value,
                        case_sensitive: c.case_sensitive,
                    })
                })
                .collect()
        })
        .collect()
}

/// OR across groups, AND within a group.
pub fn evaluate_conditions(groups: &[Vec<Condition>]) -> bool {
    groups
        .iter()
        .any(|group| group.iter().all(evaluate_condition))
}

/// Resolve-and-evaluate shortcut used by the handlers.
pub fn evaluate_resolved(resolved: &Value) -> Result<bool, ConditionError> {
    parse_condition_groups(resolved).map(|groups| evaluate_conditions(&groups))
}

pub fn evaluate_condition(condition: &Condition) -> bool {
    use ConditionOperator::*;
    let first = &condition.first_value;
    let second = &condition.second_value;

    match condition.operator {
        TextContains | TextNotContains | TextExactlyMatches | TextNotExactlyMatches | TextStartsWith
        | TextNotStartsWith | TextEndsWith | TextNotEndsWith => {
            let a = text_operand(first, condition.case_sensitive);
            let b = text_operand(second, condition.case_sensitive);
            match condition.operator {
                TextContains => a.contains(&b),
                TextNotContains => !a.contains(&b),
                TextExactlyMatches => a == b,
                TextNotExactlyMatches => a != b,
                TextStartsWith => a.starts_with(&b),
                TextNotStartsWith => !a.starts_with(&b),
                TextEndsWith => a.ends_with(&b),
                _ => !a.ends_with(&b),
            }
        }
        NumberGreaterThan | NumberLessThan | NumberEqualTo => compare_numbers(condition.operator, first, second),
        BooleanIsTrue => is_truthy(first),
        BooleanIsFalse => !is_truthy(first),
        Exists => exists(first),
        DoesNotExist => !exists(first),
        DateIsAfter => match (parse_date(first), parse_date(second)) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        DateIsBefore => match (parse_date(first), parse_date(second)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        ListIsEmpty => as_list(first).is_some_and(|l| l.is_empty()),
        ListIsNotEmpty => as_list(first).is_some_and(|l| !l.is_empty()),
        ListCountGreaterThan | ListCountLessThan | ListCountEqualTo => {
            let (Some(list), Some(count)) = (as_list(first), parse_number(second)) else {
                return false;
            };
            let len = list.len() as f64;
            match condition.operator {
                ListCountGreaterThan => len > count,
                ListCountLessThan => len < count,
                _ => len == count,
            }
        }
        ListContains => as_list(first).is_some_and(|l| list_contains(&l, second)),
        ListNotContains => as_list(first).is_some_and(|l| !list_contains(&l, second)),
    }
}

/// Canonical string form: strings as-is, everything else JSON-encoded.
/// A missing operand is the empty string.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn text_operand(value: &Value, case_sensitive: bool) -> String {
    let s = stringify(value);
    if case_sensitive {
        s
    } else {
        s.to_lowercase()
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok().filter(|n| !n.is_nan()),
        _ => None,
    }
}

/// Numeric comparison; when either side is not a number the raw strings
/// are compared instead.
fn compare_numbers(operator: ConditionOperator, first: &Value, second: &Value) -> bool {
    match (parse_number(first), parse_number(second)) {
        (Some(a), Some(b)) => match operator {
            ConditionOperator::NumberGreaterThan => a > b,
            ConditionOperator::NumberLessThan => a < b,
            _ => a == b,
        },
        _ => {
            let (a, b) = (stringify(first), stringify(second));
            match operator {
                ConditionOperator::NumberGreaterThan => a > b,
                ConditionOperator::NumberLessThan => a < b,
                _ => a == b,
            }
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn exists(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(naive.and_utc());
                }
            }
            for format in ["%Y-%m-%d", "%m/%d/%Y"] {
                if let Ok(date) = NaiveDate::parse_from_str(s, format) {
                    return date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
                }
            }
            s.parse::<i64>()
                .ok()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        }
        _ => None,
    }
}

/// An actual list, or a string holding a JSON-encoded list.
fn as_list(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

fn list_contains(list: &[Value], target: &Value) -> bool {
    match target {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(decoded) => list.iter().any(|item| *item == decoded || item.as_str() == Some(raw)),
            Err(_) => list.iter().any(|item| item.as_str() == Some(raw)),
        },
        other => list.iter().any(|item| item == other),
    }
}
