//! Filter and update algebra shared by every store backend
//!
//! Paths are dotted (`services.resume.refreshTokens`). A numeric segment
//! indexes into an array. Any other segment applied to an array is matched
//! against each element, so `emails.address` matches a user when any of its
//! email entries has that address.

use serde_json::Value;
use std::time::Duration;

/// Document filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document
    All,
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// `true` when the path must resolve, `false` when it must not
    Exists(String, bool),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(path.into(), value.into())
    }

    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(path.into(), value.into())
    }

    pub fn is_in(path: impl Into<String>, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Filter::In(path.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn gt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(path.into(), value.into())
    }

    pub fn gte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(path.into(), value.into())
    }

    pub fn lt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(path.into(), value.into())
    }

    pub fn lte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(path.into(), value.into())
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Filter::Exists(path.into(), true)
    }

    pub fn missing(path: impl Into<String>) -> Self {
        Filter::Exists(path.into(), false)
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Filter::Eq("_id".to_string(), Value::String(id.into()))
    }

    /// Conjunction of `self` and `other`, flattening nested `And`s
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), f) => {
                left.push(f);
                Filter::And(left)
            }
            (f, Filter::And(mut right)) => {
                right.insert(0, f);
                Filter::And(right)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Equality pairs that an upsert copies into the inserted document
    pub(crate) fn equality_fields(&self) -> Vec<(&str, &Value)> {
        match self {
            Filter::Eq(path, value) => vec![(path.as_str(), value)],
            Filter::And(filters) => filters.iter().flat_map(Filter::equality_fields).collect(),
            _ => Vec::new(),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn reverse(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

/// Options for a windowed read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort keys applied in order
    pub sort: Vec<(String, SortDirection)>,
    pub limit: Option<usize>,
}

/// A single update operation
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(String, Value),
    Unset(String),
    /// Appends `values`. With a `slice`, only the last `slice` entries survive.
    Push {
        path: String,
        values: Vec<Value>,
        slice: Option<usize>,
    },
    /// Removes array elements matching `filter` (paths relative to the element)
    Pull { path: String, filter: Filter },
    /// Sets `field` on the first array element matching `matching`
    SetElement {
        path: String,
        matching: Filter,
        field: String,
        value: Value,
    },
    /// Removes `field` from the first array element matching `matching`
    UnsetElement {
        path: String,
        matching: Filter,
        field: String,
    },
    /// Only applied when an upsert inserts a new document
    SetOnInsert(String, Value),
}

/// Ordered list of update operations, applied atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(path.into(), value.into()));
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(path.into()));
        self
    }

    pub fn push(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Push {
            path: path.into(),
            values: vec![value.into()],
            slice: None,
        });
        self
    }

    /// Push that keeps at most `keep` of the newest entries
    pub fn push_bounded(mut self, path: impl Into<String>, values: Vec<Value>, keep: usize) -> Self {
        self.ops.push(UpdateOp::Push {
            path: path.into(),
            values,
            slice: Some(keep),
        });
        self
    }

    pub fn pull(mut self, path: impl Into<String>, filter: Filter) -> Self {
        self.ops.push(UpdateOp::Pull {
            path: path.into(),
            filter,
        });
        self
    }

    pub fn set_element(
        mut self,
        path: impl Into<String>,
        matching: Filter,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.ops.push(UpdateOp::SetElement {
            path: path.into(),
            matching,
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn unset_element(mut self, path: impl Into<String>, matching: Filter, field: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::UnsetElement {
            path: path.into(),
            matching,
            field: field.into(),
        });
        self
    }

    pub fn set_on_insert(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::SetOnInsert(path.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Index definition
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<String>,
    pub unique: bool,
    /// Documents without the indexed field are left out of the index
    pub sparse: bool,
    /// Documents expire this long after the timestamp stored in the first key
    pub expire_after: Option<Duration>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: vec![key.into()],
            unique: false,
            sparse: false,
            expire_after: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_and_flattens() {
        let filter = Filter::by_id("a")
            .and(Filter::exists("b"))
            .and(Filter::All)
            .and(Filter::eq("c", 1));

        match filter {
            Filter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected filter {other:?}"),
        }
    }

    #[test]
    fn test_equality_fields() {
        let filter = Filter::eq("name", "cleanup").and(Filter::missing("started"));
        assert_eq!(filter.equality_fields(), vec![("name", &json!("cleanup"))]);
    }

    #[test]
    fn test_update_builder_preserves_order() {
        let update = Update::new()
            .pull("tokens", Filter::eq("token", "old"))
            .push_bounded("tokens", vec![json!({"token": "new"})], 5);

        assert!(matches!(update.ops[0], UpdateOp::Pull { .. }));
        assert!(matches!(update.ops[1], UpdateOp::Push { slice: Some(5), .. }));
    }

    #[test]
    fn test_index_spec_builder() {
        let spec = IndexSpec::new("job-ttl", "started").expire_after(Duration::from_secs(300));
        assert_eq!(spec.expire_after, Some(Duration::from_secs(300)));
        assert!(!spec.unique);
    }
}
