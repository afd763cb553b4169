//! In-memory document store.
//!
//! Collections hold JSON documents keyed by a string `_id`. Filters are
//! equality checks on dotted paths; a scalar filter value also matches any
//! element of an array field.

use crate::error::{SdkError, SdkResult};
use indexmap::IndexMap;
use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock as StdRwLock};
use tokio::sync::RwLock;
use tracing::debug;

/// Characters used for generated document ids.
const ID_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTWXYZabcdefghijkmnopqrstuvwxyz";
const ID_LENGTH: usize = 17;

/// Generates a 17 character document id from the thread-local RNG.
pub fn random_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LENGTH)
        .map(|_| char::from(ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())]))
        .collect()
}

/// Options for [`Collection::find`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FindOptions {
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    /// Field path to direction: `1` ascending, `-1` descending.
    pub sort: IndexMap<String, i32>,
}

impl FindOptions {
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    #[must_use]
    pub fn sort(mut self, field: impl Into<String>, direction: i32) -> Self {
        self.sort.insert(field.into(), direction);
        self
    }
}

/// The database handle.
#[derive(Debug, Clone, Default)]
pub struct Db {
    collections: Arc<StdRwLock<HashMap<String, Collection>>>,
}

impl Db {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the named collection, creating it if needed.
    pub fn collection(&self, name: &str) -> Collection {
        if let Some(existing) = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return existing.clone();
        }

        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Collection::new(name))
            .clone()
    }

    /// Names of the collections created so far.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// The process-wide database handle.
pub fn db() -> &'static Db {
    static DB: OnceLock<Db> = OnceLock::new();
    DB.get_or_init(Db::new)
}

/// A named collection of documents. Clones share storage.
#[derive(Debug, Clone)]
pub struct Collection {
    name: Arc<str>,
    documents: Arc<RwLock<IndexMap<String, Value>>>,
}

impl Collection {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            documents: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    /// The collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns the first document matching `filter`.
    pub async fn find_one(&self, filter: &Value) -> Option<Value> {
        let documents = self.documents.read().await;
        documents.values().find(|doc| matches_filter(doc, filter)).cloned()
    }

    /// Returns the documents matching `filter`, sorted and paginated.
    pub async fn find(&self, filter: &Value, options: &FindOptions) -> Vec<Value> {
        let documents = self.documents.read().await;
        let mut found: Vec<&Value> = documents
            .values()
            .filter(|doc| matches_filter(doc, filter))
            .collect();

        if !options.sort.is_empty() {
            found.sort_by(|a, b| {
                options
                    .sort
                    .iter()
                    .map(|(path, direction)| {
                        let ord = compare_values(
                            lookup(a, path).unwrap_or(&Value::Null),
                            lookup(b, path).unwrap_or(&Value::Null),
                        );
                        if *direction < 0 {
                            ord.reverse()
                        } else {
                            ord
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        found
            .into_iter()
            .skip(options.skip.unwrap_or(0))
            .take(options.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Counts the documents matching `filter`.
    pub async fn count(&self, filter: &Value) -> usize {
        let documents = self.documents.read().await;
        documents
            .values()
            .filter(|doc| matches_filter(doc, filter))
            .count()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts a document and returns its `_id`, generating one when missing.
    pub async fn insert(&self, document: Value) -> SdkResult<String> {
        let Value::Object(mut fields) = document else {
            return Err(SdkError::validation("Documents must be JSON objects"));
        };

        let id = match fields.get("_id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => {
                return Err(SdkError::validation(format!(
                    "Document _id must be a string, got {other}"
                )))
            }
            None => random_id(),
        };

        let mut documents = self.documents.write().await;
        if documents.contains_key(&id) {
            return Err(SdkError::conflict(format!(
                "Duplicate _id \"{id}\" in collection \"{}\"",
                self.name
            )));
        }

        // Keep `_id` first so documents read back in a stable shape.
        let mut stored = Map::with_capacity(fields.len() + 1);
        stored.insert("_id".to_string(), Value::String(id.clone()));
        fields.shift_remove("_id");
        stored.extend(fields);
        documents.insert(id.clone(), Value::Object(stored));

        debug!(collection = %self.name, id = %id, "inserted document");
        Ok(id)
    }

    /// Applies `modifier` to the document with `id`.
    ///
    /// `$set`, `$unset`, `$inc` and `$push` operators are supported; a modifier
    /// without operators replaces the document (keeping its `_id`). Returns
    /// `Ok(false)` when no document has that id.
    pub async fn update(&self, id: &str, modifier: &Value) -> SdkResult<bool> {
        let Value::Object(ops) = modifier else {
            return Err(SdkError::validation("Modifier must be a JSON object"));
        };

        let mut documents = self.documents.write().await;
        let Some(document) = documents.get_mut(id) else {
            return Ok(false);
        };

        let updated = if ops.keys().any(|k| k.starts_with('$')) {
            apply_operators(document, ops)?
        } else {
            let mut replacement = Map::with_capacity(ops.len() + 1);
            replacement.insert("_id".to_string(), Value::String(id.to_string()));
            replacement.extend(ops.iter().filter(|(k, _)| *k != "_id").map(|(k, v)| (k.clone(), v.clone())));
            Value::Object(replacement)
        };
        *document = updated;

        debug!(collection = %self.name, id, "updated document");
        Ok(true)
    }

    /// Removes the document with `id`. Returns whether one was removed.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.documents.write().await.shift_remove(id).is_some();
        if removed {
            debug!(collection = %self.name, id, "removed document");
        }
        removed
    }
}

/// Applies update operators to a copy of `document`; the original is left
/// untouched when an operator fails.
fn apply_operators(document: &Value, ops: &Map<String, Value>) -> SdkResult<Value> {
    let mut doc = document.clone();

    for (op, fields) in ops {
        let Value::Object(fields) = fields else {
            return Err(SdkError::validation(format!("{op} expects an object")));
        };
        for (path, value) in fields {
            if path == "_id" {
                return Err(SdkError::validation("The _id field cannot be modified"));
            }
            match op.as_str() {
                "$set" => *slot(&mut doc, path)? = value.clone(),
                "$unset" => unset(&mut doc, path),
                "$inc" => {
                    let target = slot(&mut doc, path)?;
                    *target = increment(target, value, path)?;
                }
                "$push" => {
                    let target = slot(&mut doc, path)?;
                    if target.is_null() {
                        *target = Value::Array(Vec::new());
                    }
                    let Value::Array(items) = target else {
                        return Err(SdkError::validation(format!(
                            "Cannot $push to non-array field \"{path}\""
                        )));
                    };
                    items.push(value.clone());
                }
                other => {
                    return Err(SdkError::validation(format!("Unsupported update operator {other}")))
                }
            }
        }
    }

    Ok(doc)
}

fn increment(current: &Value, by: &Value, path: &str) -> SdkResult<Value> {
    let zero = Value::from(0);
    let current = if current.is_null() { &zero } else { current };
    let (Value::Number(a), Value::Number(b)) = (current, by) else {
        return Err(SdkError::validation(format!(
            "Cannot $inc non-numeric field \"{path}\""
        )));
    };
    let sum = match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => a.checked_add(b).map(Value::from),
        _ => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| serde_json::Number::from_f64(a + b))
            .map(Value::Number),
    };
    sum.ok_or_else(|| SdkError::validation(format!("$inc overflows field \"{path}\"")))
}

/// Returns a mutable slot at a dotted path, creating intermediate objects.
fn slot<'v>(doc: &'v mut Value, path: &str) -> SdkResult<&'v mut Value> {
    let mut current = doc;
    for segment in path.split('.') {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i))
                .ok_or_else(|| SdkError::validation(format!("Invalid array path \"{path}\"")))?,
            _ => {
                return Err(SdkError::validation(format!(
                    "Cannot traverse scalar value at \"{path}\""
                )))
            }
        };
    }
    Ok(current)
}

fn unset(doc: &mut Value, path: &str) {
    let (parent, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (lookup_mut(doc, parent), last),
        None => (Some(doc), path),
    };
    if let Some(Value::Object(map)) = parent {
        map.shift_remove(last);
    }
}

fn lookup_mut<'v>(doc: &'v mut Value, path: &str) -> Option<&'v mut Value> {
    path.split('.').try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?),
        _ => None,
    })
}

/// Reads a dotted path.
fn lookup<'v>(doc: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
        _ => None,
    })
}

/// A string filter selects by `_id`; `null` or `{}` selects everything.
fn matches_filter(doc: &Value, filter: &Value) -> bool {
    match filter {
        Value::Null => true,
        Value::String(id) => doc.get("_id").and_then(Value::as_str) == Some(id.as_str()),
        Value::Object(conditions) => conditions.iter().all(|(path, expected)| {
            let segments: Vec<&str> = path.split('.').collect();
            path_matches(doc, &segments, expected)
        }),
        _ => false,
    }
}

fn path_matches(value: &Value, segments: &[&str], expected: &Value) -> bool {
    let Some((segment, rest)) = segments.split_first() else {
        return value == expected
            || matches!(value, Value::Array(items) if items.contains(expected));
    };

    match value {
        Value::Object(map) => match map.get(*segment) {
            Some(child) => path_matches(child, rest, expected),
            None => expected.is_null(),
        },
        Value::Array(items) => {
            if let Some(child) = segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                if path_matches(child, rest, expected) {
                    return true;
                }
            }
            items.iter().any(|item| {
                item.is_object() && path_matches(item, segments, expected)
            })
        }
        _ => false,
    }
}

/// Orders values: null, numbers, strings, objects, arrays, booleans.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Object(_) => 3,
            Value::Array(_) => 4,
            Value::Bool(_) => 5,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
