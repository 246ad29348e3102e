//! In-memory record store for testing
//!
//! Holds seeded data sources, records, blocks and comments, and records every
//! call so tests can assert on what was written and in which order. Record
//! creation is rejected when it names a property the data source does not have,
//! mirroring the validation the real API performs.

use super::{
    CommentTarget, CreateDatabase, CreatePage, CreatedComment, FileUpload, ListPage, QueryPage,
    QueryRequest, RecordStore,
};
use crate::error::{MigrateError, Result};
use crate::types::{DataSource, PropertyDefinition, PropertyKind, SourceRecord};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A call made against the mock, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Query {
        data_source_id: String,
        filter: Option<Value>,
    },
    RetrieveDataSource(String),
    CreateDatabase {
        parent_page_id: String,
        title: String,
        title_property: String,
    },
    UpdateDataSource {
        data_source_id: String,
        properties: Vec<String>,
    },
    CreatePage {
        page_id: String,
        properties: Vec<String>,
    },
    UpdatePage {
        page_id: String,
        properties: Map<String, Value>,
    },
    AppendBlocks {
        parent_id: String,
        count: usize,
    },
    CreateComment(CommentTarget),
    CreateFileUpload(String),
    SendFileUpload(String),
    Download(String),
}

impl StoreCall {
    /// Whether the call changes state in the store.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            StoreCall::Query { .. } | StoreCall::RetrieveDataSource(_) | StoreCall::Download(_)
        )
    }
}

#[derive(Default)]
struct MockState {
    data_sources: HashMap<String, DataSource>,
    records: HashMap<String, Vec<SourceRecord>>,
    pages: HashMap<String, CreatePage>,
    blocks: HashMap<String, Vec<Value>>,
    comments: HashMap<String, Vec<Value>>,
    created_comments: Vec<(CommentTarget, Vec<Value>, Vec<String>)>,
    downloads: HashMap<String, Vec<u8>>,
    failing_titles: HashSet<String>,
    calls: Vec<StoreCall>,
}

/// In-memory [`RecordStore`]
pub struct MockStore {
    state: Mutex<MockState>,
    next_id: AtomicU64,
    upload_status: String,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            next_id: AtomicU64::new(1),
            upload_status: "uploaded".to_string(),
        }
    }

    /// Seed a data source schema
    pub fn with_data_source(self, data_source: DataSource) -> Self {
        self.lock()
            .data_sources
            .insert(data_source.id.clone(), data_source);
        self
    }

    /// Seed the records returned by queries against `data_source_id`
    pub fn with_records(self, data_source_id: &str, records: Vec<SourceRecord>) -> Self {
        self.lock()
            .records
            .insert(data_source_id.to_string(), records);
        self
    }

    /// Seed the child blocks of a page or block
    pub fn with_children(self, block_id: &str, children: Vec<Value>) -> Self {
        self.lock().blocks.insert(block_id.to_string(), children);
        self
    }

    /// Seed the comments of a page
    pub fn with_comments(self, block_id: &str, comments: Vec<Value>) -> Self {
        self.lock().comments.insert(block_id.to_string(), comments);
        self
    }

    /// Make `url` downloadable; any other URL fails to download
    pub fn with_download(self, url: &str, bytes: &[u8]) -> Self {
        self.lock().downloads.insert(url.to_string(), bytes.to_vec());
        self
    }

    /// Status every upload session reports after sending bytes
    pub fn with_upload_status(mut self, status: &str) -> Self {
        self.upload_status = status.to_string();
        self
    }

    /// Reject creation of records whose title equals `title`
    pub fn failing_on_title(self, title: &str) -> Self {
        self.lock().failing_titles.insert(title.to_string());
        self
    }

    /// All calls made so far
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Schema of a data source as currently stored
    pub fn data_source(&self, data_source_id: &str) -> Option<DataSource> {
        self.lock().data_sources.get(data_source_id).cloned()
    }

    /// Properties a created record currently holds
    pub fn page_properties(&self, page_id: &str) -> Option<Map<String, Value>> {
        self.lock()
            .pages
            .get(page_id)
            .map(|page| page.properties.clone())
    }

    /// The full creation request of a record
    pub fn page(&self, page_id: &str) -> Option<CreatePage> {
        self.lock().pages.get(page_id).cloned()
    }

    /// Ids of every record created, in creation order
    pub fn created_page_ids(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                StoreCall::CreatePage { page_id, .. } => Some(page_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Blocks stored under a parent (seeded or appended)
    pub fn children(&self, block_id: &str) -> Vec<Value> {
        self.lock().blocks.get(block_id).cloned().unwrap_or_default()
    }

    /// Comments created, with their target and attached upload ids
    pub fn created_comments(&self) -> Vec<(CommentTarget, Vec<Value>, Vec<String>)> {
        self.lock().created_comments.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Give each block an id and file embedded children under their parent,
    /// the way the API reports them when listed.
    fn store_blocks(
        &self,
        blocks: &mut HashMap<String, Vec<Value>>,
        parent_id: &str,
        children: &[Value],
    ) -> Vec<Value> {
        let mut created = Vec::with_capacity(children.len());
        for child in children {
            let mut block = child.clone();
            let id = self.next_id("block");
            block["id"] = Value::String(id.clone());

            let kind = block
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let nested = block
                .get_mut(kind.as_str())
                .and_then(Value::as_object_mut)
                .and_then(|body| body.remove("children"));
            if let Some(Value::Array(nested)) = nested {
                block["has_children"] = Value::Bool(!nested.is_empty());
                self.store_blocks(blocks, &id, &nested);
            }
            created.push(block);
        }
        blocks
            .entry(parent_id.to_string())
            .or_default()
            .extend(created.iter().cloned());
        created
    }
}

/// Nesting levels of `children` the API accepts in one append request.
const MAX_NESTING: usize = 2;

/// Levels of embedded `children` below `block`.
fn nesting_depth(block: &Value) -> usize {
    let kind = block.get("type").and_then(Value::as_str).unwrap_or_default();
    block
        .get(kind)
        .and_then(|body| body.get("children"))
        .and_then(Value::as_array)
        .filter(|children| !children.is_empty())
        .map(|children| 1 + children.iter().map(nesting_depth).max().unwrap_or(0))
        .unwrap_or(0)
}

fn paginate(items: &[Value], cursor: Option<&str>, page_size: usize) -> ListPage {
    let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
    let end = (start + page_size).min(items.len());
    let has_more = end < items.len();
    ListPage {
        results: items.get(start..end).unwrap_or_default().to_vec(),
        has_more,
        next_cursor: has_more.then(|| end.to_string()),
    }
}

fn record_title(properties: &Map<String, Value>) -> String {
    properties
        .values()
        .filter_map(|value| value.get("title").and_then(Value::as_array))
        .flatten()
        .filter_map(|fragment| {
            fragment
                .get("plain_text")
                .or_else(|| fragment.pointer("/text/content"))
                .and_then(Value::as_str)
        })
        .collect()
}

#[async_trait]
impl RecordStore for MockStore {
    async fn query_data_source(
        &self,
        data_source_id: &str,
        request: &QueryRequest,
    ) -> Result<QueryPage> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Query {
            data_source_id: data_source_id.to_string(),
            filter: request.filter.clone(),
        });
        let records = state.records.get(data_source_id).cloned().unwrap_or_default();
        let start = request
            .start_cursor
            .as_deref()
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let end = (start + request.page_size.max(1) as usize).min(records.len());
        let has_more = end < records.len();
        Ok(QueryPage {
            results: records.get(start..end).unwrap_or_default().to_vec(),
            has_more,
            next_cursor: has_more.then(|| end.to_string()),
        })
    }

    async fn retrieve_data_source(&self, data_source_id: &str) -> Result<DataSource> {
        let mut state = self.lock();
        state
            .calls
            .push(StoreCall::RetrieveDataSource(data_source_id.to_string()));
        state
            .data_sources
            .get(data_source_id)
            .cloned()
            .ok_or_else(|| MigrateError::NotFound {
                message: format!("Could not find data source with ID: {data_source_id}"),
            })
    }

    async fn create_database(&self, request: &CreateDatabase) -> Result<DataSource> {
        let id = self.next_id("ds");
        let mut properties = BTreeMap::new();
        properties.insert(
            request.title_property.clone(),
            PropertyDefinition {
                id: Some("title".to_string()),
                name: Some(request.title_property.clone()),
                kind: PropertyKind::Title,
                config: json!({}),
            },
        );
        let data_source = DataSource {
            id: id.clone(),
            title: vec![json!({ "plain_text": request.title })],
            properties,
        };

        let mut state = self.lock();
        state.calls.push(StoreCall::CreateDatabase {
            parent_page_id: request.parent_page_id.clone(),
            title: request.title.clone(),
            title_property: request.title_property.clone(),
        });
        state.data_sources.insert(id, data_source.clone());
        Ok(data_source)
    }

    async fn update_data_source(
        &self,
        data_source_id: &str,
        properties: &BTreeMap<String, PropertyDefinition>,
    ) -> Result<DataSource> {
        let mut state = self.lock();
        state.calls.push(StoreCall::UpdateDataSource {
            data_source_id: data_source_id.to_string(),
            properties: properties.keys().cloned().collect(),
        });
        let data_source = state
            .data_sources
            .get_mut(data_source_id)
            .ok_or_else(|| MigrateError::NotFound {
                message: format!("Could not find data source with ID: {data_source_id}"),
            })?;

        for (key, definition) in properties {
            let name = definition.name.clone().unwrap_or_else(|| key.clone());
            if name != *key {
                data_source.properties.remove(key);
            }
            let mut stored = definition.clone();
            stored.name = Some(name.clone());
            stored.id.get_or_insert_with(|| format!("prop-{name}"));

            if let Some(synced) = definition
                .config
                .pointer("/dual_property/synced_property_name")
                .and_then(Value::as_str)
            {
                let back = PropertyDefinition::new(
                    PropertyKind::Relation,
                    json!({
                        "data_source_id": data_source_id,
                        "dual_property": { "synced_property_name": name },
                    }),
                )
                .with_name(synced);
                data_source.properties.insert(synced.to_string(), back);
            }
            data_source.properties.insert(name, stored);
        }
        Ok(data_source.clone())
    }

    async fn create_page(&self, request: &CreatePage) -> Result<String> {
        let id = self.next_id("page");
        let mut state = self.lock();

        let schema = state
            .data_sources
            .get(&request.data_source_id)
            .ok_or_else(|| MigrateError::NotFound {
                message: format!("Could not find data source with ID: {}", request.data_source_id),
            })?;
        if let Some(unknown) = request
            .properties
            .keys()
            .find(|name| !schema.properties.contains_key(*name))
        {
            return Err(MigrateError::Api {
                status: 400,
                code: "validation_error".to_string(),
                message: format!("{unknown} is not a property that exists."),
            });
        }
        if state.failing_titles.contains(&record_title(&request.properties)) {
            return Err(MigrateError::Api {
                status: 500,
                code: "internal_server_error".to_string(),
                message: "Unexpected error".to_string(),
            });
        }

        state.calls.push(StoreCall::CreatePage {
            page_id: id.clone(),
            properties: request.properties.keys().cloned().collect(),
        });
        state.pages.insert(id.clone(), request.clone());
        Ok(id)
    }

    async fn update_page(&self, page_id: &str, properties: &Map<String, Value>) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(StoreCall::UpdatePage {
            page_id: page_id.to_string(),
            properties: properties.clone(),
        });
        let page = state
            .pages
            .get_mut(page_id)
            .ok_or_else(|| MigrateError::NotFound {
                message: format!("Could not find page with ID: {page_id}"),
            })?;
        for (name, value) in properties {
            page.properties.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    async fn list_block_children(&self, block_id: &str, cursor: Option<&str>) -> Result<ListPage> {
        let state = self.lock();
        let children = state.blocks.get(block_id).cloned().unwrap_or_default();
        Ok(paginate(&children, cursor, 100))
    }

    async fn append_block_children(
        &self,
        block_id: &str,
        children: &[Value],
    ) -> Result<Vec<Value>> {
        if let Some(depth) = children
            .iter()
            .map(nesting_depth)
            .find(|depth| *depth > MAX_NESTING)
        {
            return Err(MigrateError::Api {
                status: 400,
                code: "validation_error".to_string(),
                message: format!("children are nested {depth} levels deep, at most {MAX_NESTING} allowed"),
            });
        }

        let mut state = self.lock();
        state.calls.push(StoreCall::AppendBlocks {
            parent_id: block_id.to_string(),
            count: children.len(),
        });
        Ok(self.store_blocks(&mut state.blocks, block_id, children))
    }

    async fn list_comments(&self, block_id: &str, cursor: Option<&str>) -> Result<ListPage> {
        let state = self.lock();
        let comments = state.comments.get(block_id).cloned().unwrap_or_default();
        Ok(paginate(&comments, cursor, 100))
    }

    async fn create_comment(
        &self,
        target: &CommentTarget,
        rich_text: &[Value],
        attachments: &[String],
    ) -> Result<CreatedComment> {
        let id = self.next_id("comment");
        let discussion_id = match target {
            CommentTarget::Page(_) => self.next_id("discussion"),
            CommentTarget::Discussion(discussion_id) => discussion_id.clone(),
        };

        let mut state = self.lock();
        state.calls.push(StoreCall::CreateComment(target.clone()));
        state
            .created_comments
            .push((target.clone(), rich_text.to_vec(), attachments.to_vec()));
        Ok(CreatedComment { id, discussion_id })
    }

    async fn create_file_upload(&self, filename: &str, _content_type: &str) -> Result<FileUpload> {
        let id = self.next_id("upload");
        self.lock()
            .calls
            .push(StoreCall::CreateFileUpload(filename.to_string()));
        Ok(FileUpload {
            id,
            status: "pending".to_string(),
        })
    }

    async fn send_file_upload(
        &self,
        upload_id: &str,
        _filename: &str,
        _content_type: &str,
        _bytes: Vec<u8>,
    ) -> Result<FileUpload> {
        self.lock()
            .calls
            .push(StoreCall::SendFileUpload(upload_id.to_string()));
        Ok(FileUpload {
            id: upload_id.to_string(),
            status: self.upload_status.clone(),
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Download(url.to_string()));
        state
            .downloads
            .get(url)
            .cloned()
            .ok_or_else(|| MigrateError::MediaDownload {
                url: url.to_string(),
                reason: "status 404 Not Found".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_rejects_unknown_properties() {
        let store = MockStore::new();
        let data_source = store
            .create_database(&CreateDatabase {
                parent_page_id: "parent".into(),
                title: "Copy".into(),
                title_property: "Name".into(),
            })
            .await
            .unwrap();

        let mut properties = Map::new();
        properties.insert("Missing".into(), json!({ "number": 1 }));
        let result = store
            .create_page(&CreatePage {
                data_source_id: data_source.id.clone(),
                properties,
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(MigrateError::Api { .. })));
    }

    #[tokio::test]
    async fn test_mock_update_renames_and_adds_dual() {
        let store = MockStore::new();
        let data_source = store
            .create_database(&CreateDatabase {
                parent_page_id: "parent".into(),
                title: "Copy".into(),
                title_property: "Name".into(),
            })
            .await
            .unwrap();

        let mut patch = BTreeMap::new();
        patch.insert(
            "Name".to_string(),
            PropertyDefinition::empty(PropertyKind::Title).with_name("Nome"),
        );
        patch.insert(
            "Parent item".to_string(),
            PropertyDefinition::new(
                PropertyKind::Relation,
                json!({
                    "data_source_id": data_source.id,
                    "dual_property": { "synced_property_name": "Sub-item" }
                }),
            ),
        );
        let updated = store
            .update_data_source(&data_source.id, &patch)
            .await
            .unwrap();

        assert!(updated.properties.contains_key("Nome"));
        assert!(!updated.properties.contains_key("Name"));
        assert!(updated.properties.contains_key("Parent item"));
        assert!(updated.properties.contains_key("Sub-item"));
    }

    #[tokio::test]
    async fn test_mock_rejects_deep_nesting() {
        let store = MockStore::new();
        let paragraph = json!({ "type": "paragraph", "paragraph": { "rich_text": [] } });
        let toggle = json!({ "type": "toggle", "toggle": { "rich_text": [], "children": [paragraph] } });
        let column = json!({ "type": "column", "column": { "children": [toggle.clone()] } });
        let columns = json!({ "type": "column_list", "column_list": { "children": [column] } });

        let result = store.append_block_children("page", &[columns]).await;
        assert!(matches!(result, Err(MigrateError::Api { .. })));

        let created = store.append_block_children("page", &[toggle]).await.unwrap();
        let toggle_id = created[0]["id"].as_str().unwrap();
        assert_eq!(created[0]["has_children"], true);
        assert_eq!(store.children(toggle_id)[0]["type"], "paragraph");
    }

    #[tokio::test]
    async fn test_mock_paginates_queries() {
        let records = (0..5)
            .map(|i| SourceRecord {
                id: format!("r{i}"),
                ..Default::default()
            })
            .collect();
        let store = MockStore::new().with_records("src", records);

        let first = store
            .query_data_source(
                "src",
                &QueryRequest {
                    page_size: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.results.len(), 2);
        assert!(first.has_more);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));
    }
}
