//! Core types for documents and live queries.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document in a backend collection: server-assigned id plus a JSON
/// field map. Typed records are decoded from `fields` at the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Decode the field map into a typed record.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.fields.clone())
    }
}

/// A complete ordered result set delivered by a subscription at one
/// point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySnapshot {
    pub documents: Vec<Document>,
}

impl QuerySnapshot {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Equality filter applied to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum QueryFilter {
    /// Match a single document by id.
    DocumentId { id: String },
    /// Match documents whose field equals the given value.
    Field { name: String, value: Value },
}

/// Sort direction for an ordered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Sort key for an ordered query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Describes a live query: source collection, optional equality filter,
/// optional sort key, optional result-count limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<QueryFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl QueryDescriptor {
    /// Start a descriptor for the given collection.
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filter: None,
            order_by: None,
            limit: None,
        }
    }

    /// Restrict the query to documents whose field equals `value`.
    pub fn where_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some(QueryFilter::Field {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Restrict the query to a single document.
    pub fn where_document(mut self, id: impl Into<String>) -> Self {
        self.filter = Some(QueryFilter::DocumentId { id: id.into() });
        self
    }

    /// Order results by a field.
    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Cap the result set size.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Whether a document matches this descriptor's filter.
    pub fn matches(&self, doc: &Document) -> bool {
        match &self.filter {
            None => true,
            Some(QueryFilter::DocumentId { id }) => doc.id == *id,
            Some(QueryFilter::Field { name, value }) => {
                doc.fields.get(name).is_some_and(|v| v == value)
            }
        }
    }

    /// Evaluate this descriptor against an unordered set of documents,
    /// producing the snapshot the backend would deliver: filter, sort,
    /// then limit.
    pub fn evaluate(&self, documents: impl IntoIterator<Item = Document>) -> QuerySnapshot {
        let mut matched: Vec<Document> = documents
            .into_iter()
            .filter(|doc| self.matches(doc))
            .collect();

        if let Some(order) = &self.order_by {
            matched.sort_by(|a, b| {
                let ord = compare_json(
                    a.fields.get(&order.field).unwrap_or(&Value::Null),
                    b.fields.get(&order.field).unwrap_or(&Value::Null),
                );
                match order.direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }

        QuerySnapshot::new(matched)
    }
}

/// Total order over JSON values for sorting query results.
///
/// Null < numbers < strings < everything else; numbers compare as f64,
/// strings lexicographically. Non-comparable values tie.
fn compare_json(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            _ => 3,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// A reference to a stored blob (its storage path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(pub String);

impl BlobRef {
    pub fn path(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlobRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(id: &str, fields: Value) -> Document {
        Document::new(id, fields)
    }

    #[test]
    fn test_field_filter_matches() {
        let descriptor =
            QueryDescriptor::collection("tweets").where_field("userId", "u1");

        assert!(descriptor.matches(&doc("t1", json!({"userId": "u1"}))));
        assert!(!descriptor.matches(&doc("t2", json!({"userId": "u2"}))));
        assert!(!descriptor.matches(&doc("t3", json!({}))));
    }

    #[test]
    fn test_document_id_filter_matches() {
        let descriptor = QueryDescriptor::collection("users").where_document("u1");

        assert!(descriptor.matches(&doc("u1", json!({}))));
        assert!(!descriptor.matches(&doc("u2", json!({}))));
    }

    #[test]
    fn test_evaluate_sorts_descending_and_limits() {
        let descriptor = QueryDescriptor::collection("tweets")
            .order_by("createdAt", SortDirection::Descending)
            .limit(2);

        let snapshot = descriptor.evaluate(vec![
            doc("a", json!({"createdAt": 100})),
            doc("b", json!({"createdAt": 300})),
            doc("c", json!({"createdAt": 200})),
        ]);

        let ids: Vec<_> = snapshot.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_evaluate_missing_sort_field_sorts_first_descending() {
        let descriptor = QueryDescriptor::collection("tweets")
            .order_by("createdAt", SortDirection::Descending);

        let snapshot = descriptor.evaluate(vec![
            doc("a", json!({})),
            doc("b", json!({"createdAt": 100})),
        ]);

        // Null ranks below numbers, so descending puts the timestamped doc first.
        assert_eq!(snapshot.documents[0].id, "b");
    }

    #[test]
    fn test_descriptor_serde_roundtrip() {
        let descriptor = QueryDescriptor::collection("tweets")
            .where_field("userId", "u1")
            .order_by("createdAt", SortDirection::Descending)
            .limit(25);

        let json = serde_json::to_string(&descriptor).unwrap();
        let decoded: QueryDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, descriptor);
    }

    #[test]
    fn test_document_decode() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Named {
            name: String,
        }

        let d = doc("x", json!({"name": "Alice"}));
        let named: Named = d.decode().unwrap();
        assert_eq!(named.name, "Alice");
    }
}
