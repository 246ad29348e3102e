//! Record store client abstraction
//!
//! The migration engine only talks to a [`RecordStore`]. [`NotionClient`] is the
//! production implementation; [`MockStore`] keeps everything in memory and
//! records each mutation so tests can assert on ordering.

pub mod mock;
pub mod notion;

pub use mock::{MockStore, StoreCall};
pub use notion::NotionClient;

use crate::error::Result;
use crate::types::{DataSource, PropertyDefinition, SourceRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One page of a data source query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryPage {
    #[serde(default)]
    pub results: Vec<SourceRecord>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Query body for a data source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<String>,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

/// A cursor-paginated list of raw objects (blocks or comments).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPage {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Request to create a new database under a parent page.
#[derive(Debug, Clone, Serialize)]
pub struct CreateDatabase {
    pub parent_page_id: String,
    pub title: String,
    /// Name of the single title property the database starts with
    pub title_property: String,
}

impl CreateDatabase {
    /// Wire payload for the create call.
    pub fn payload(&self) -> Value {
        let mut properties = Map::new();
        properties.insert(self.title_property.clone(), serde_json::json!({ "title": {} }));
        serde_json::json!({
            "parent": { "type": "page_id", "page_id": self.parent_page_id },
            "title": [{ "type": "text", "text": { "content": self.title } }],
            "initial_data_source": { "properties": properties }
        })
    }
}

/// Request to create a record in a data source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreatePage {
    pub data_source_id: String,
    pub properties: Map<String, Value>,
    pub icon: Option<Value>,
    pub cover: Option<Value>,
}

impl CreatePage {
    pub fn payload(&self) -> Value {
        let mut body = serde_json::json!({
            "parent": { "data_source_id": self.data_source_id },
            "properties": self.properties,
        });
        if let Some(icon) = &self.icon {
            body["icon"] = icon.clone();
        }
        if let Some(cover) = &self.cover {
            body["cover"] = cover.clone();
        }
        body
    }
}

/// Where a new comment goes: a fresh discussion on a page, or a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentTarget {
    Page(String),
    Discussion(String),
}

/// Comment as returned after creation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatedComment {
    pub id: String,
    #[serde(default)]
    pub discussion_id: String,
}

/// State of a file upload session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileUpload {
    pub id: String,
    #[serde(default)]
    pub status: String,
}

impl FileUpload {
    pub fn is_uploaded(&self) -> bool {
        self.status == "uploaded"
    }
}

/// Remote operations the migration engine depends on.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Query one page of records from a data source.
    async fn query_data_source(&self, data_source_id: &str, request: &QueryRequest)
        -> Result<QueryPage>;

    /// Retrieve a data source with its schema.
    async fn retrieve_data_source(&self, data_source_id: &str) -> Result<DataSource>;

    /// Create a database and return its initial data source.
    async fn create_database(&self, request: &CreateDatabase) -> Result<DataSource>;

    /// Add or change properties on a data source, returning the updated schema.
    async fn update_data_source(
        &self,
        data_source_id: &str,
        properties: &BTreeMap<String, PropertyDefinition>,
    ) -> Result<DataSource>;

    /// Create a record and return its id.
    async fn create_page(&self, request: &CreatePage) -> Result<String>;

    /// Overwrite properties of an existing record.
    async fn update_page(&self, page_id: &str, properties: &Map<String, Value>) -> Result<()>;

    /// List one page of a block's children.
    async fn list_block_children(&self, block_id: &str, cursor: Option<&str>) -> Result<ListPage>;

    /// Append blocks under a parent, returning the created blocks.
    async fn append_block_children(&self, block_id: &str, children: &[Value])
        -> Result<Vec<Value>>;

    /// List one page of comments on a block or page.
    async fn list_comments(&self, block_id: &str, cursor: Option<&str>) -> Result<ListPage>;

    /// Create a comment, attaching previously uploaded files by upload id.
    async fn create_comment(
        &self,
        target: &CommentTarget,
        rich_text: &[Value],
        attachments: &[String],
    ) -> Result<CreatedComment>;

    /// Open a single-part file upload session.
    async fn create_file_upload(&self, filename: &str, content_type: &str) -> Result<FileUpload>;

    /// Transmit the bytes of an upload session.
    async fn send_file_upload(
        &self,
        upload_id: &str,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<FileUpload>;

    /// Download bytes from a (possibly external) URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}
