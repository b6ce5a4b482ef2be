//! In-process filter evaluation, `$set` application and value ordering.
//!
//! Filter keys are dot paths. A condition is an equality match unless it is
//! an object whose keys all start with `$`, in which case every operator
//! must hold: `$eq`, `$ne`, `$in`, `$nin`, `$exists`, `$gt`, `$gte`, `$lt`,
//! `$lte`. Equality against an array field matches when any element is equal.
//! Missing fields compare as `null`.

use super::{Document, StoreError, StoreResult, ID_KEY};
use crate::model::page::SortPair;
use serde_json::Value;
use std::cmp::Ordering;

/// Resolves a dot path inside a document.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Whether `doc` satisfies every condition of `filter`.
pub fn matches(doc: &Document, filter: &Document) -> StoreResult<bool> {
    for (path, condition) in filter {
        if !condition_holds(lookup(doc, path), condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn is_operator_object(map: &serde_json::Map<String, Value>) -> StoreResult<bool> {
    let operators = map.keys().filter(|key| key.starts_with('$')).count();
    if operators == 0 {
        return Ok(false);
    }
    if operators != map.len() {
        return Err(StoreError::InvalidFilter(
            "operators cannot be mixed with plain fields".to_string(),
        ));
    }
    Ok(true)
}

fn condition_holds(actual: Option<&Value>, condition: &Value) -> StoreResult<bool> {
    if let Value::Object(ops) = condition {
        if is_operator_object(ops)? {
            for (op, operand) in ops {
                if !operator_holds(actual, op, operand)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
    }
    Ok(matches_equal(actual, condition))
}

fn operator_holds(actual: Option<&Value>, op: &str, operand: &Value) -> StoreResult<bool> {
    match op {
        "$eq" => Ok(matches_equal(actual, operand)),
        "$ne" => Ok(!matches_equal(actual, operand)),
        "$in" => Ok(operand_list(op, operand)?
            .iter()
            .any(|candidate| matches_equal(actual, candidate))),
        "$nin" => Ok(!operand_list(op, operand)?
            .iter()
            .any(|candidate| matches_equal(actual, candidate))),
        "$exists" => match operand {
            Value::Bool(expected) => Ok(actual.is_some() == *expected),
            other => Err(StoreError::InvalidFilter(format!(
                "`$exists` expects a boolean, got {other}"
            ))),
        },
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let Some(actual) = actual else {
                return Ok(false);
            };
            if type_rank(Some(actual)) != type_rank(Some(operand)) {
                return Ok(false);
            }
            let ordering = compare_values(Some(actual), Some(operand));
            Ok(match op {
                "$gt" => ordering == Ordering::Greater,
                "$gte" => ordering != Ordering::Less,
                "$lt" => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
        other => Err(StoreError::InvalidFilter(format!(
            "unsupported operator `{other}`"
        ))),
    }
}

fn operand_list<'a>(op: &str, operand: &'a Value) -> StoreResult<&'a Vec<Value>> {
    match operand {
        Value::Array(items) => Ok(items),
        other => Err(StoreError::InvalidFilter(format!(
            "`{op}` expects an array, got {other}"
        ))),
    }
}

fn matches_equal(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None, Value::Null) => true,
        (None, _) => false,
        (Some(Value::Array(items)), expected) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        (Some(actual), expected) => values_equal(actual, expected),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            compare_values(Some(left), Some(right)) == Ordering::Equal
        }
        _ => left == right,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order used for sorting: null < bool < number < string < array < object.
pub fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }
    match (left, right) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return a.cmp(&b);
            }
            if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
                return a.cmp(&b);
            }
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Array(a)), Some(Value::Array(b))) => {
            for (x, y) in a.iter().zip(b.iter()) {
                let ordering = compare_values(Some(x), Some(y));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            for ((key_a, x), (key_b, y)) in a.iter().zip(b.iter()) {
                let ordering = key_a
                    .cmp(key_b)
                    .then_with(|| compare_values(Some(x), Some(y)));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        _ => Ordering::Equal,
    }
}

/// Stable multi-key sort.
pub fn sort_documents(docs: &mut [Document], sort: &[SortPair]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|left, right| {
        for pair in sort {
            let mut ordering =
                compare_values(lookup(left, &pair.field), lookup(right, &pair.field));
            if pair.descending {
                ordering = ordering.reverse();
            }
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Applies `path → value` assignments, creating intermediate objects.
///
/// Returns whether the document changed.
pub fn apply_set(doc: &mut Document, set: &Document) -> StoreResult<bool> {
    let mut changed = false;
    for (path, value) in set {
        if path == ID_KEY {
            if doc.get(ID_KEY) != Some(value) {
                return Err(StoreError::ImmutableId);
            }
            continue;
        }
        changed |= set_path(doc, path, value.clone())?;
    }
    Ok(changed)
}

fn set_path(doc: &mut Document, path: &str, value: Value) -> StoreResult<bool> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| StoreError::InvalidUpdate("empty field path".to_string()))?;

    let mut current = doc;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Document::new()));
        if entry.is_null() {
            *entry = Value::Object(Document::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::InvalidUpdate(format!(
                    "cannot set `{path}`: `{segment}` is not an object"
                )))
            }
        };
    }

    if current.get(*last) == Some(&value) {
        return Ok(false);
    }
    current.insert(last.to_string(), value);
    Ok(true)
}

/// Plain equality value for `key` in a filter, ignoring operator conditions.
pub fn equality_value<'a>(filter: &'a Document, key: &str) -> Option<&'a Value> {
    match filter.get(key)? {
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
            map.get("$eq").filter(|value| !value.is_object())
        }
        value => Some(value),
    }
}
