//! Core types for documents, references and queries.

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Field name under which a document's id is exposed in its plain form.
pub const ID_FIELD: &str = "id";

/// Field the store stamps with the server-side creation time.
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Field map of a stored document.
pub type Fields = serde_json::Map<String, Value>;

/// Opaque document identifier, assigned by the store on creation.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId(s)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    /// Whole seconds since Unix epoch.
    pub fn as_secs(&self) -> i64 {
        self.0.div_euclid(1_000_000)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Logical reference to a single document: collection name + id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocRef {
    pub collection: String,
    pub id: DocumentId,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<DocumentId>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Filter comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Field equals value.
    Eq,
    /// Field is an array containing value.
    ArrayContains,
}

/// A single field filter in a query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    fn matches(&self, fields: &Fields) -> bool {
        match (self.op, fields.get(&self.field)) {
            (FilterOp::Eq, Some(v)) => v == &self.value,
            (FilterOp::ArrayContains, Some(Value::Array(items))) => items.contains(&self.value),
            _ => false,
        }
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ascending,
    Descending,
}

/// Ordering clause of a query.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Collection query descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    /// Query every document in a collection.
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        });
        self
    }

    pub fn where_array_contains(
        mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op: FilterOp::ArrayContains,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
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

    /// Whether a document's fields pass every filter.
    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters.iter().all(|f| f.matches(fields))
    }

    /// Filter, sort and limit a set of documents from this query's collection.
    ///
    /// Documents missing the order-by field are excluded from ordered results.
    /// Ties keep their input order.
    pub fn apply(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs
            .into_iter()
            .filter(|d| self.matches(&d.fields))
            .collect();

        if let Some(ref order) = self.order_by {
            out.retain(|d| d.fields.contains_key(&order.field));
            out.sort_by(|a, b| {
                let ord = compare_values(&a.fields[&order.field], &b.fields[&order.field]);
                match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

/// What a subscription or cache entry points at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    Document(DocRef),
    Query(Query),
}

impl Target {
    pub fn document(collection: impl Into<String>, id: impl Into<DocumentId>) -> Self {
        Target::Document(DocRef::new(collection, id))
    }

    pub fn collection(&self) -> &str {
        match self {
            Target::Document(doc) => &doc.collection,
            Target::Query(query) => &query.collection,
        }
    }

    /// Whether a write to `doc` can change what this target observes.
    pub fn is_affected_by(&self, doc: &DocRef) -> bool {
        match self {
            Target::Document(own) => own == doc,
            Target::Query(query) => query.collection == doc.collection,
        }
    }
}

impl From<DocRef> for Target {
    fn from(doc: DocRef) -> Self {
        Target::Document(doc)
    }
}

impl From<Query> for Target {
    fn from(query: Query) -> Self {
        Target::Query(query)
    }
}

/// A stored document.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub reference: DocRef,
    pub fields: Fields,
}

impl Document {
    pub fn new(reference: DocRef, fields: Fields) -> Self {
        Self { reference, fields }
    }

    pub fn id(&self) -> &DocumentId {
        &self.reference.id
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Plain mapping of the document's fields with `id` injected.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(ID_FIELD.to_string(), Value::String(self.id().0.clone()));
        Value::Object(map)
    }

    /// Decode into a typed structure, validating its shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.to_value()).map_err(|e| StoreError::InvalidDocument {
            doc: self.reference.clone(),
            reason: e.to_string(),
        })
    }
}

/// The data a subscription delivers.
#[derive(Clone, Debug, PartialEq)]
pub enum Snapshot {
    /// Single document; `None` if it does not exist.
    Document(Option<Document>),
    /// Query results in the query's sort order.
    Collection(Vec<Document>),
}

impl Snapshot {
    pub fn document(&self) -> Option<&Document> {
        match self {
            Snapshot::Document(doc) => doc.as_ref(),
            Snapshot::Collection(_) => None,
        }
    }

    pub fn documents(&self) -> &[Document] {
        match self {
            Snapshot::Document(_) => &[],
            Snapshot::Collection(docs) => docs,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Snapshot::Document(Some(doc)) => doc.to_value(),
            Snapshot::Document(None) => Value::Null,
            Snapshot::Collection(docs) => Value::Array(docs.iter().map(|d| d.to_value()).collect()),
        }
    }

    /// Decode a single-document snapshot.
    pub fn decode_document<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self {
            Snapshot::Document(doc) => doc.as_ref().map(|d| d.decode()).transpose(),
            Snapshot::Collection(_) => Err(StoreError::InvalidArgument(
                "expected a document snapshot, got a collection".into(),
            )),
        }
    }

    /// Decode a collection snapshot, preserving order.
    pub fn decode_collection<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        match self {
            Snapshot::Collection(docs) => docs.iter().map(|d| d.decode()).collect(),
            Snapshot::Document(_) => Err(StoreError::InvalidArgument(
                "expected a collection snapshot, got a document".into(),
            )),
        }
    }
}

/// Total order over JSON values used for query sorting.
///
/// null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, fields: Value) -> Document {
        let fields = match fields {
            Value::Object(map) => map,
            _ => panic!("fields must be an object"),
        };
        Document::new(DocRef::new("items", id), fields)
    }

    #[test]
    fn test_query_filters_and_orders() {
        let docs = vec![
            doc("a", json!({"owner": "u1", "createdAt": 3})),
            doc("b", json!({"owner": "u2", "createdAt": 2})),
            doc("c", json!({"owner": "u1", "createdAt": 5})),
            doc("d", json!({"owner": "u1"})),
        ];

        let query = Query::collection("items")
            .where_eq("owner", "u1")
            .order_by("createdAt", Direction::Descending);
        let ids: Vec<_> = query
            .apply(docs)
            .into_iter()
            .map(|d| d.id().0.clone())
            .collect();

        // "d" lacks the order-by field and is dropped
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn test_query_limit_and_array_contains() {
        let docs = vec![
            doc("a", json!({"tags": ["x", "y"]})),
            doc("b", json!({"tags": ["y"]})),
            doc("c", json!({"tags": "y"})),
        ];
        let query = Query::collection("items")
            .where_array_contains("tags", "y")
            .limit(1);
        let out = query.apply(docs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id().as_str(), "a");
    }

    #[test]
    fn test_document_value_injects_id() {
        let d = doc("abc", json!({"name": "Ada"}));
        assert_eq!(d.to_value(), json!({"id": "abc", "name": "Ada"}));
    }

    #[test]
    fn test_decode_reports_invalid_document() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Named {
            id: String,
            name: String,
        }

        let d = doc("abc", json!({"name": 7}));
        let err = d.decode::<Named>().unwrap_err();
        match err {
            StoreError::InvalidDocument { doc, .. } => assert_eq!(doc, DocRef::new("items", "abc")),
            other => panic!("expected InvalidDocument, got {:?}", other),
        }
    }

    #[test]
    fn test_compare_values_mixed() {
        assert_eq!(compare_values(&json!(0.5), &json!(1)), Ordering::Less);
        assert_eq!(compare_values(&json!(null), &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
    }

    #[test]
    fn test_target_affected_by() {
        let doc_ref = DocRef::new("sessions", "s1");
        assert!(Target::from(doc_ref.clone()).is_affected_by(&doc_ref));
        assert!(!Target::document("sessions", "s2").is_affected_by(&doc_ref));
        assert!(Target::from(Query::collection("sessions")).is_affected_by(&doc_ref));
        assert!(!Target::from(Query::collection("users")).is_affected_by(&doc_ref));
    }
}
