//! Query model and the document engine shared by the bundled backends.

use super::{Result, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// The field is an array holding the value.
    Contains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Field name; dotted paths reach into nested objects (`market_context.sentiment`).
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Gte, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Lte, value)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Contains, value)
    }

    pub fn matches(&self, document: &Value) -> bool {
        let field = field_value(document, &self.field);
        match self.op {
            FilterOp::Eq => match field {
                Some(v) => values_equal(v, &self.value),
                None => self.value.is_null(),
            },
            FilterOp::Ne => match field {
                Some(v) => !values_equal(v, &self.value),
                None => !self.value.is_null(),
            },
            FilterOp::Gt => self.compare(field, |o| o == Ordering::Greater),
            FilterOp::Gte => self.compare(field, |o| o != Ordering::Less),
            FilterOp::Lt => self.compare(field, |o| o == Ordering::Less),
            FilterOp::Lte => self.compare(field, |o| o != Ordering::Greater),
            FilterOp::Contains => field
                .and_then(Value::as_array)
                .map(|items| items.iter().any(|item| values_equal(item, &self.value)))
                .unwrap_or(false),
        }
    }

    fn compare(&self, field: Option<&Value>, accept: impl Fn(Ordering) -> bool) -> bool {
        field
            .and_then(|v| compare_values(v, &self.value))
            .map(accept)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, document: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(document))
    }
}

/// Resolve a dotted field path inside a JSON document.
pub fn field_value<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

/// Order two JSON values: numbers numerically, strings as RFC 3339 timestamps
/// when both parse, otherwise lexicographically.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(dx), Ok(dy)) => Some(dx.cmp(&dy)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || compare_values(a, b) == Some(Ordering::Equal)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub data: Value,
    pub stored_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredDocument {
    fn new(data: Value, ttl: Option<Duration>, now: DateTime<Utc>) -> Self {
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl);
        Self {
            data,
            stored_at: now,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

pub type Collection = BTreeMap<String, StoredDocument>;

/// In-process document engine: named collections of id-keyed documents.
#[derive(Debug, Clone, Default)]
pub struct CollectionSet {
    collections: HashMap<String, Collection>,
}

impl CollectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: &str, id: &str, data: Value, ttl: Option<Duration>) {
        let document = StoredDocument::new(data, ttl, Utc::now());
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Value> {
        let now = Utc::now();
        self.collections
            .get(collection)
            .and_then(|c| c.get(id))
            .filter(|doc| !doc.is_expired(now))
            .map(|doc| doc.data.clone())
    }

    pub fn query(&self, collection: &str, query: &Query) -> Vec<Value> {
        let now = Utc::now();
        let Some(documents) = self.collections.get(collection) else {
            return Vec::new();
        };

        let mut results: Vec<Value> = documents
            .values()
            .filter(|doc| !doc.is_expired(now))
            .filter(|doc| query.matches(&doc.data))
            .map(|doc| doc.data.clone())
            .collect();

        if let Some(order) = &query.order_by {
            results.sort_by(|a, b| {
                let ordering = match (field_value(a, &order.field), field_value(b, &order.field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                };
                match order.direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        results
    }

    pub fn update(&mut self, collection: &str, id: &str, patch: Value) -> Result<()> {
        let now = Utc::now();
        let not_found = || StorageError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        };

        let document = self
            .collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .filter(|doc| !doc.is_expired(now))
            .ok_or_else(not_found)?;

        let Value::Object(fields) = patch else {
            return Err(StorageError::Backend(format!(
                "patch for {collection}/{id} must be a JSON object"
            )));
        };
        match &mut document.data {
            Value::Object(existing) => {
                for (key, value) in fields {
                    existing.insert(key, value);
                }
                Ok(())
            }
            _ => Err(StorageError::Backend(format!(
                "document {collection}/{id} is not a JSON object"
            ))),
        }
    }

    pub fn remove(&mut self, collection: &str, id: &str) -> bool {
        self.collections
            .get_mut(collection)
            .map(|c| c.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Drop expired documents; returns the names of collections that changed.
    pub fn purge_expired(&mut self) -> Vec<String> {
        let now = Utc::now();
        let mut changed = Vec::new();
        for (name, documents) in self.collections.iter_mut() {
            let before = documents.len();
            documents.retain(|_, doc| !doc.is_expired(now));
            if documents.len() != before {
                changed.push(name.clone());
            }
        }
        changed
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    pub fn replace_collection(&mut self, name: &str, documents: Collection) {
        self.collections.insert(name.to_string(), documents);
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }
}
