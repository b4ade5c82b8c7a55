//! Document, filter and update types shared by every gateway backend
//!
//! Documents are JSON objects. Fields are addressed by dot-separated paths
//! (`mess_props.from_user`). Matching, sorting and increment semantics are
//! implemented once here so the memory and SQLite backends agree.

use super::errors::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// Backend-assigned identity of a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub i64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document as read back from a collection
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub body: Value,
}

impl StoredDocument {
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| StoreError::Corrupted(format!("document {}: {}", self.id, e)))
    }
}

/// Serialize a value into a document body, rejecting non-objects
pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Value> {
    let body = serde_json::to_value(value)?;
    if !body.is_object() {
        return Err(StoreError::InvalidOperation(
            "documents must serialize to JSON objects".to_string(),
        ));
    }
    Ok(body)
}

/// Resolve a dot-separated path inside a document
pub fn lookup<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(body, |node, segment| node.as_object()?.get(segment))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    /// `true` requires the field to be present, `false` requires it absent
    Exists(bool),
}

impl Condition {
    fn holds(&self, field: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => field.map_or(false, |v| values_equal(v, expected)),
            Condition::Exists(wanted) => field.is_some() == *wanted,
        }
    }
}

/// Conjunction of field conditions, optionally pinned to one document id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    id: Option<DocumentId>,
    conditions: Vec<(String, Condition)>,
}

impl Filter {
    /// Matches every document
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: DocumentId) -> Self {
        Self {
            id: Some(id),
            conditions: Vec::new(),
        }
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(path, value)
    }

    pub fn exists(path: impl Into<String>, present: bool) -> Self {
        Self::all().and_exists(path, present)
    }

    pub fn and_eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push((path.into(), Condition::Eq(value.into())));
        self
    }

    pub fn and_exists(mut self, path: impl Into<String>, present: bool) -> Self {
        self.conditions
            .push((path.into(), Condition::Exists(present)));
        self
    }

    pub fn id(&self) -> Option<DocumentId> {
        self.id
    }

    pub fn conditions(&self) -> &[(String, Condition)] {
        &self.conditions
    }

    pub fn matches(&self, id: DocumentId, body: &Value) -> bool {
        if self.id.map_or(false, |wanted| wanted != id) {
            return false;
        }
        self.conditions
            .iter()
            .all(|(path, condition)| condition.holds(lookup(body, path)))
    }

    /// Seed document for an upsert: every equality condition becomes a field
    pub fn seed_document(&self) -> Value {
        let mut seed = Value::Object(Map::new());
        for (path, condition) in &self.conditions {
            if let Condition::Eq(value) = condition {
                set_path(&mut seed, path, value.clone());
            }
        }
        seed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Descending,
        }
    }

    /// Stable sort; documents missing the field, or holding null, go last
    /// in either order
    pub fn apply(&self, documents: &mut [StoredDocument]) {
        documents.sort_by(|a, b| {
            match (sort_key(a, &self.field), sort_key(b, &self.field)) {
                (Some(x), Some(y)) => {
                    let ord = compare_values(x, y);
                    match self.order {
                        SortOrder::Ascending => ord,
                        SortOrder::Descending => ord.reverse(),
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });
    }
}

/// Numeric increment applied by `find_one_and_update`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Increment {
    pub field: String,
    pub by: i64,
}

impl Increment {
    pub fn new(field: impl Into<String>, by: i64) -> Self {
        Self {
            field: field.into(),
            by,
        }
    }

    /// Apply to `body` in place, returning (before, after)
    pub fn apply(&self, body: &mut Value) -> StoreResult<(Option<i64>, i64)> {
        let before = match lookup(body, &self.field) {
            None => None,
            Some(v) => Some(v.as_i64().ok_or_else(|| {
                StoreError::InvalidOperation(format!(
                    "cannot increment non-integer field '{}'",
                    self.field
                ))
            })?),
        };
        let after = before
            .unwrap_or(0)
            .checked_add(self.by)
            .ok_or_else(|| StoreError::InvalidOperation(format!("counter '{}' overflowed", self.field)))?;
        set_path(body, &self.field, Value::from(after));
        Ok((before, after))
    }
}

/// Which side of an atomic update `find_one_and_update` reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnDocument {
    Before,
    After,
}

impl ReturnDocument {
    pub fn pick(self, before: Option<i64>, after: i64) -> Option<i64> {
        match self {
            ReturnDocument::Before => before,
            ReturnDocument::After => Some(after),
        }
    }
}

/// Result of `replace_one`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaceOutcome {
    pub matched: u64,
    pub upserted: Option<DocumentId>,
}

/// Cursor over the documents a `find` produced
#[derive(Debug)]
pub struct Cursor {
    inner: std::vec::IntoIter<StoredDocument>,
}

impl Cursor {
    pub fn new(documents: Vec<StoredDocument>) -> Self {
        Self {
            inner: documents.into_iter(),
        }
    }
}

impl Iterator for Cursor {
    type Item = StoredDocument;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

fn set_path(body: &mut Value, path: &str, value: Value) {
    let mut node = body;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

// Integers and floats compare numerically so 3 == 3.0 across backends
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

fn sort_key<'a>(doc: &'a StoredDocument, field: &str) -> Option<&'a Value> {
    lookup(&doc.body, field).filter(|value| !value.is_null())
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: i64, body: Value) -> StoredDocument {
        StoredDocument {
            id: DocumentId(id),
            body,
        }
    }

    #[test]
    fn test_sort_puts_null_after_numbers() {
        let mut docs = vec![
            doc(1, json!({"sequence_num": null})),
            doc(2, json!({"sequence_num": 2})),
            doc(3, json!({})),
            doc(4, json!({"sequence_num": 1})),
        ];
        Sort::ascending("sequence_num").apply(&mut docs);
        let ids: Vec<i64> = docs.iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![4, 2, 1, 3]);
    }

    #[test]
    fn test_filter_nested_eq_and_exists() {
        let body = json!({"message": "hi", "mess_props": {"from_user": "alice"}});
        assert!(Filter::eq("mess_props.from_user", "alice").matches(DocumentId(1), &body));
        assert!(!Filter::eq("mess_props.from_user", "bob").matches(DocumentId(1), &body));
        assert!(Filter::exists("room_name", false).matches(DocumentId(1), &body));
        assert!(!Filter::exists("message", false).matches(DocumentId(1), &body));
    }

    #[test]
    fn test_filter_by_id() {
        let body = json!({"a": 1});
        assert!(Filter::by_id(DocumentId(7)).matches(DocumentId(7), &body));
        assert!(!Filter::by_id(DocumentId(7)).matches(DocumentId(8), &body));
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        let body = json!({"seq": 3.0});
        assert!(Filter::eq("seq", 3).matches(DocumentId(1), &body));
    }

    #[test]
    fn test_sort_puts_missing_fields_last() {
        let mut docs = vec![
            doc(1, json!({"sequence_num": 3})),
            doc(2, json!({"room_name": "general"})),
            doc(3, json!({"sequence_num": 1})),
        ];
        Sort::ascending("sequence_num").apply(&mut docs);
        let ids: Vec<i64> = docs.iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![3, 1, 2]);

        Sort::descending("sequence_num").apply(&mut docs);
        let ids: Vec<i64> = docs.iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn test_increment_seeds_missing_field() {
        let mut body = Filter::eq("counter", "general").seed_document();
        let (before, after) = Increment::new("seq", 1).apply(&mut body).unwrap();
        assert_eq!(before, None);
        assert_eq!(after, 1);
        assert_eq!(body, json!({"counter": "general", "seq": 1}));
    }

    #[test]
    fn test_increment_rejects_non_integer() {
        let mut body = json!({"seq": "three"});
        assert!(Increment::new("seq", 1).apply(&mut body).is_err());
    }

    #[test]
    fn test_to_document_rejects_scalars() {
        assert!(to_document(&42).is_err());
        assert!(to_document(&json!({"ok": true})).is_ok());
    }
}
