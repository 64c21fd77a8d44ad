//! In-process evaluation of filters and updates against JSON documents
//!
//! The memory backend evaluates everything here. The Postgres backend uses
//! the update half: rows are locked, updated in Rust and written back.

use super::query::{Filter, IndexSpec, SortDirection, Update, UpdateOp};
use super::StoreError;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Document body as stored
pub type Document = Value;

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

fn array_index(segment: &str) -> Option<usize> {
    if segment.chars().all(|c| c.is_ascii_digit()) {
        segment.parse().ok()
    } else {
        None
    }
}

/// Values reachable through `path`, descending into array elements for
/// non-numeric segments
pub fn values_at<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = segments(path).collect();
    let mut out = Vec::new();
    collect(doc, &segments, &mut out);
    out
}

fn collect<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };

    match value {
        Value::Object(map) => {
            if let Some(next) = map.get(*head) {
                collect(next, rest, out);
            }
        }
        Value::Array(items) => match array_index(head) {
            Some(idx) => {
                if let Some(next) = items.get(idx) {
                    collect(next, rest, out);
                }
            }
            None => {
                for item in items {
                    if item.is_object() {
                        collect(item, segments, out);
                    }
                }
            }
        },
        _ => {}
    }
}

/// Single value at `path` without array fan-out
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => array_index(segment).and_then(|idx| items.get(idx)),
        _ => None,
    })
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values: first by type, then by value
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => Ordering::Equal,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b) && compare_values(a, b) == Ordering::Equal
}

/// Candidate values for comparison: each resolved value plus, for arrays,
/// each element
fn comparison_candidates<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    for value in values_at(doc, path) {
        out.push(value);
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

fn eq_matches(doc: &Value, path: &str, expected: &Value) -> bool {
    let candidates = comparison_candidates(doc, path);
    if candidates.is_empty() {
        return expected.is_null();
    }
    candidates.iter().any(|c| values_equal(c, expected))
}

fn range_matches(doc: &Value, path: &str, bound: &Value, accept: fn(Ordering) -> bool) -> bool {
    comparison_candidates(doc, path)
        .into_iter()
        .filter(|c| type_rank(c) == type_rank(bound))
        .any(|c| accept(compare_values(c, bound)))
}

/// Evaluates `filter` against `doc`
pub fn matches(doc: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::All => true,
        Filter::Eq(path, value) => eq_matches(doc, path, value),
        Filter::Ne(path, value) => !eq_matches(doc, path, value),
        Filter::In(path, values) => values.iter().any(|v| eq_matches(doc, path, v)),
        Filter::Gt(path, v) => range_matches(doc, path, v, |o| o == Ordering::Greater),
        Filter::Gte(path, v) => range_matches(doc, path, v, |o| o != Ordering::Less),
        Filter::Lt(path, v) => range_matches(doc, path, v, |o| o == Ordering::Less),
        Filter::Lte(path, v) => range_matches(doc, path, v, |o| o != Ordering::Greater),
        Filter::Exists(path, expected) => !values_at(doc, path).is_empty() == *expected,
        Filter::And(filters) => filters.iter().all(|f| matches(doc, f)),
        Filter::Or(filters) => filters.iter().any(|f| matches(doc, f)),
    }
}

/// Compares two documents by the given sort keys; missing values sort first
pub fn compare_by(a: &Value, b: &Value, sort: &[(String, SortDirection)]) -> Ordering {
    for (path, direction) in sort {
        let left = get_path(a, path).unwrap_or(&Value::Null);
        let right = get_path(b, path).unwrap_or(&Value::Null);
        let ord = compare_values(left, right);
        let ord = match direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn invalid(path: &str, reason: &str) -> StoreError {
    StoreError::InvalidDocument(format!("{path}: {reason}"))
}

fn parent_mut<'a>(doc: &'a mut Value, path: &str, create: bool) -> Result<Option<(&'a mut Value, String)>, StoreError> {
    let parts: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = parts.split_last() else {
        return Err(invalid(path, "empty path"));
    };

    let mut current = doc;
    for segment in parents {
        current = match current {
            Value::Object(map) => {
                if !map.contains_key(*segment) {
                    if !create {
                        return Ok(None);
                    }
                    map.insert(segment.to_string(), Value::Object(Map::new()));
                }
                match map.get_mut(*segment) {
                    Some(next) => next,
                    None => return Ok(None),
                }
            }
            Value::Array(items) => match array_index(segment).and_then(|idx| items.get_mut(idx)) {
                Some(next) => next,
                None if create => return Err(invalid(path, "array index out of bounds")),
                None => return Ok(None),
            },
            _ if create => return Err(invalid(path, "cannot traverse a scalar")),
            _ => return Ok(None),
        };
    }

    Ok(Some((current, last.to_string())))
}

/// Sets `path` to `value`, creating intermediate objects
pub fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<(), StoreError> {
    let Some((parent, key)) = parent_mut(doc, path, true)? else {
        return Err(invalid(path, "unreachable path"));
    };

    match parent {
        Value::Object(map) => {
            map.insert(key, value);
            Ok(())
        }
        Value::Array(items) => match array_index(&key).and_then(|idx| items.get_mut(idx)) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(invalid(path, "array index out of bounds")),
        },
        _ => Err(invalid(path, "cannot set a field on a scalar")),
    }
}

/// Removes `path` if present
pub fn unset_path(doc: &mut Value, path: &str) -> Result<(), StoreError> {
    if let Some((Value::Object(map), key)) = parent_mut(doc, path, false)? {
        map.remove(&key);
    }
    Ok(())
}

fn array_mut<'a>(doc: &'a mut Value, path: &str, create: bool) -> Result<Option<&'a mut Vec<Value>>, StoreError> {
    if create && get_path(doc, path).is_none() {
        set_path(doc, path, Value::Array(Vec::new()))?;
    }

    let Some((parent, key)) = parent_mut(doc, path, false)? else {
        return Ok(None);
    };

    let target = match parent {
        Value::Object(map) => map.get_mut(&key),
        Value::Array(items) => array_index(&key).and_then(|idx| items.get_mut(idx)),
        _ => None,
    };

    match target {
        None => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(_) => Err(invalid(path, "not an array")),
    }
}

/// Applies every operation of `update` in order
///
/// `inserting` enables `SetOnInsert` operations.
pub fn apply_update(doc: &mut Value, update: &Update, inserting: bool) -> Result<(), StoreError> {
    for op in &update.ops {
        match op {
            UpdateOp::Set(path, value) => set_path(doc, path, value.clone())?,
            UpdateOp::Unset(path) => unset_path(doc, path)?,
            UpdateOp::SetOnInsert(path, value) => {
                if inserting {
                    set_path(doc, path, value.clone())?;
                }
            }
            UpdateOp::Push { path, values, slice } => {
                if let Some(items) = array_mut(doc, path, true)? {
                    items.extend(values.iter().cloned());
                    if let Some(keep) = slice {
                        let excess = items.len().saturating_sub(*keep);
                        items.drain(..excess);
                    }
                }
            }
            UpdateOp::Pull { path, filter } => {
                if let Some(items) = array_mut(doc, path, false)? {
                    items.retain(|item| !matches(item, filter));
                }
            }
            UpdateOp::SetElement {
                path,
                matching,
                field,
                value,
            } => {
                if let Some(items) = array_mut(doc, path, false)? {
                    if let Some(item) = items.iter_mut().find(|item| matches(item, matching)) {
                        set_path(item, field, value.clone())?;
                    }
                }
            }
            UpdateOp::UnsetElement { path, matching, field } => {
                if let Some(items) = array_mut(doc, path, false)? {
                    if let Some(item) = items.iter_mut().find(|item| matches(item, matching)) {
                        unset_path(item, field)?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Starting document for an upsert: the equality fields of its filter
pub fn seed_from_filter(filter: &Filter) -> Result<Value, StoreError> {
    let mut doc = Value::Object(Map::new());
    for (path, value) in filter.equality_fields() {
        set_path(&mut doc, path, value.clone())?;
    }
    Ok(doc)
}

/// Keys a document contributes to a unique index
///
/// Returns an empty set when a sparse index skips the document. Array
/// values contribute one key per element, so uniqueness holds across
/// documents for every element.
pub fn index_keys(doc: &Value, spec: &IndexSpec) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();

    if let [key] = spec.keys.as_slice() {
        let mut values: Vec<&Value> = Vec::new();
        for value in values_at(doc, key) {
            match value {
                Value::Array(items) => values.extend(items.iter()),
                other => values.push(other),
            }
        }

        if values.is_empty() {
            if !spec.sparse {
                keys.insert(Value::Null.to_string());
            }
            return keys;
        }

        keys.extend(values.into_iter().map(Value::to_string));
        return keys;
    }

    let tuple: Vec<Value> = spec
        .keys
        .iter()
        .map(|key| get_path(doc, key).cloned().unwrap_or(Value::Null))
        .collect();

    if spec.sparse && tuple.iter().all(Value::is_null) {
        return keys;
    }

    keys.insert(Value::Array(tuple).to_string());
    keys
}

/// Primary key of a stored document
pub fn document_id(doc: &Value) -> Option<&str> {
    doc.get("_id").and_then(Value::as_str).filter(|id| !id.is_empty())
}
