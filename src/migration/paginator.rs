//! Cursor-driven retrieval of source records.

use crate::client::{QueryRequest, RecordStore};
use crate::error::Result;
use crate::types::{PropertyKind, SourceRecord};
use async_stream::try_stream;
use futures::{Stream, TryStreamExt};
use serde_json::{json, Value};
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// One conjunctive filter clause: `{property, kind, value}`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub property_name: String,
    pub property_kind: PropertyKind,
    pub value: String,
}

impl FilterClause {
    pub fn new(
        property_name: impl Into<String>,
        property_kind: PropertyKind,
        value: impl Into<String>,
    ) -> Self {
        Self {
            property_name: property_name.into(),
            property_kind,
            value: value.into(),
        }
    }

    /// Comparison predicate for this clause's kind.
    pub fn predicate(&self) -> Value {
        match self.property_kind {
            PropertyKind::Rollup => json!({ "any": { "rich_text": { "contains": self.value } } }),
            PropertyKind::Select => json!({ "equals": self.value }),
            _ => json!({ "contains": self.value }),
        }
    }

    pub fn to_filter(&self) -> Value {
        let mut clause = serde_json::Map::new();
        clause.insert("property".to_string(), Value::String(self.property_name.clone()));
        clause.insert(self.property_kind.as_str().to_string(), self.predicate());
        Value::Object(clause)
    }
}

/// Combine clauses into an `and` filter; no clauses means no filter.
pub fn build_filter(clauses: &[FilterClause]) -> Option<Value> {
    if clauses.is_empty() {
        return None;
    }
    let and: Vec<Value> = clauses.iter().map(FilterClause::to_filter).collect();
    Some(json!({ "and": and }))
}

/// Reads every record of a data source matching a filter.
pub struct Paginator<'a> {
    store: &'a dyn RecordStore,
    page_size: u32,
}

impl<'a> Paginator<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self {
            store,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Stream records page by page, following the cursor until exhausted.
    pub fn records<'s>(
        &'s self,
        store_id: &'s str,
        filter: Option<Value>,
    ) -> impl Stream<Item = Result<SourceRecord>> + 's {
        try_stream! {
            let mut cursor: Option<String> = None;
            let mut loaded = 0usize;

            loop {
                let request = QueryRequest {
                    start_cursor: cursor.take(),
                    page_size: self.page_size,
                    filter: filter.clone(),
                };
                let page = self.store.query_data_source(store_id, &request).await?;
                loaded += page.results.len();
                debug!(store_id, loaded, "loaded records");

                for record in page.results {
                    yield record;
                }

                match (page.has_more, page.next_cursor) {
                    (true, Some(next)) => cursor = Some(next),
                    _ => break,
                }
            }
        }
    }

    /// Collect every record matching `clauses`.
    pub async fn fetch(&self, store_id: &str, clauses: &[FilterClause]) -> Result<Vec<SourceRecord>> {
        self.records(store_id, build_filter(clauses))
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockStore, StoreCall};

    fn records(count: usize) -> Vec<SourceRecord> {
        (0..count)
            .map(|i| SourceRecord {
                id: format!("rec-{i}"),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_predicates_by_kind() {
        let rollup = FilterClause::new("Projeto", PropertyKind::Rollup, "X");
        let select = FilterClause::new("Tipo", PropertyKind::Select, "Bug");
        let text = FilterClause::new("Nome", PropertyKind::RichText, "X");

        assert_eq!(rollup.predicate(), json!({ "any": { "rich_text": { "contains": "X" } } }));
        assert_eq!(select.predicate(), json!({ "equals": "Bug" }));
        assert_eq!(text.predicate(), json!({ "contains": "X" }));
    }

    #[test]
    fn test_build_filter_is_conjunctive() {
        let filter = build_filter(&[
            FilterClause::new("Projeto", PropertyKind::Relation, "p-1"),
            FilterClause::new("Tipo", PropertyKind::Select, "Bug"),
        ])
        .unwrap();

        assert_eq!(
            filter,
            json!({ "and": [
                { "property": "Projeto", "relation": { "contains": "p-1" } },
                { "property": "Tipo", "select": { "equals": "Bug" } }
            ] })
        );
        assert!(build_filter(&[]).is_none());
    }

    #[tokio::test]
    async fn test_fetch_follows_cursor() {
        let store = MockStore::new().with_records("src", records(250));
        let paginator = Paginator::new(&store);

        let fetched = paginator.fetch("src", &[]).await.unwrap();

        assert_eq!(fetched.len(), 250);
        assert_eq!(fetched[249].id, "rec-249");
        let queries = store
            .calls()
            .into_iter()
            .filter(|call| matches!(call, StoreCall::Query { .. }))
            .count();
        assert_eq!(queries, 3);
    }

    #[tokio::test]
    async fn test_fetch_passes_filter() {
        let store = MockStore::new().with_records("src", records(1));
        let paginator = Paginator::new(&store).with_page_size(10);
        let clauses = [FilterClause::new("Tipo", PropertyKind::Select, "Bug")];

        paginator.fetch("src", &clauses).await.unwrap();

        match &store.calls()[0] {
            StoreCall::Query { filter, .. } => assert_eq!(filter, &build_filter(&clauses)),
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_empty_store() {
        let store = MockStore::new();
        let fetched = Paginator::new(&store).fetch("missing", &[]).await.unwrap();
        assert!(fetched.is_empty());
    }
}
