//! Stable query keys.

use crate::error::Result;
use crate::types::{Filter, Target};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a logical query, independent of descriptor object identity.
///
/// The key is the SHA-256 of the target's canonical JSON form: object keys
/// sorted at every level, query filters sorted. Two descriptors that select
/// the same data map to the same key.
#[derive(Clone)]
pub struct QueryKey {
    hash: String,
    label: String,
}

impl QueryKey {
    pub fn for_target(target: &Target) -> Result<Self> {
        let canonical = canonical_json(target)?;
        let hash = hex::encode(Sha256::digest(canonical.as_bytes()));
        Ok(Self {
            hash,
            label: label_for(target),
        })
    }

    /// Hex digest.
    pub fn as_str(&self) -> &str {
        &self.hash
    }

    /// Human-readable description for logs.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey({} {}...)", self.label, &self.hash[..8])
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

fn canonical_json(target: &Target) -> Result<String> {
    let mut target = target.clone();
    if let Target::Query(ref mut query) = target {
        query.filters.sort_by_key(filter_sort_key);
    }
    let value = sort_keys(serde_json::to_value(&target)?);
    Ok(value.to_string())
}

fn filter_sort_key(filter: &Filter) -> (String, String, String) {
    (
        filter.field.clone(),
        format!("{:?}", filter.op),
        filter.value.to_string(),
    )
}

/// Rebuild objects with keys inserted in sorted order, so the output is
/// stable whether or not the map preserves insertion order.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

fn label_for(target: &Target) -> String {
    match target {
        Target::Document(doc) => format!("doc:{}", doc),
        Target::Query(query) => {
            let mut label = format!("query:{}", query.collection);
            for filter in &query.filters {
                label.push_str(&format!(" {}~{}", filter.field, filter.value));
            }
            if let Some(ref order) = query.order_by {
                label.push_str(&format!(" by {} {:?}", order.field, order.direction));
            }
            label
        }
    }
}
