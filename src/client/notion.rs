//! Notion API client
//!
//! HTTP implementation of [`RecordStore`] against the Notion data source API.

use super::{
    CommentTarget, CreateDatabase, CreatePage, CreatedComment, FileUpload, ListPage, QueryPage,
    QueryRequest, RecordStore,
};
use crate::error::{ApiErrorBody, MigrateError, Result};
use crate::types::{DataSource, PropertyDefinition};
use async_trait::async_trait;
use reqwest::{multipart, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.notion.com/v1";
pub const DEFAULT_API_VERSION: &str = "2025-09-03";

const LIST_PAGE_SIZE: u32 = 100;

/// Database object as returned by the create call
#[derive(Debug, Deserialize)]
struct DatabaseResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    data_sources: Vec<DataSourceRef>,
}

#[derive(Debug, Deserialize)]
struct DataSourceRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreatedObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AppendResponse {
    #[serde(default)]
    results: Vec<Value>,
}

/// Notion API client
#[derive(Debug, Clone)]
pub struct NotionClient {
    /// HTTP client for API requests
    client: reqwest::Client,
    /// Base URL for the API, without trailing slash
    base_url: String,
    /// Integration token
    api_key: String,
    /// Value sent in the `Notion-Version` header
    version: String,
}

impl NotionClient {
    /// Create a client for the public API with the given integration token
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_API_URL.to_string(),
            api_key: api_key.into(),
            version: DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Point the client at a different API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the API version header
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", &self.version)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(api_error(status, &text));
        }

        Ok(response.json::<T>().await?)
    }
}

/// Turn a non-success response body into a classified error.
fn api_error(status: u16, body: &str) -> MigrateError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => MigrateError::from_api(status, &parsed.code, parsed.message),
        Err(_) => MigrateError::Api {
            status,
            code: String::new(),
            message: body.to_string(),
        },
    }
}

#[async_trait]
impl RecordStore for NotionClient {
    async fn query_data_source(
        &self,
        data_source_id: &str,
        request: &QueryRequest,
    ) -> Result<QueryPage> {
        debug!(data_source_id, cursor = ?request.start_cursor, "querying data source");
        self.send(
            self.request(Method::POST, &format!("data_sources/{data_source_id}/query"))
                .json(request),
        )
        .await
    }

    async fn retrieve_data_source(&self, data_source_id: &str) -> Result<DataSource> {
        self.send(self.request(Method::GET, &format!("data_sources/{data_source_id}")))
            .await
    }

    async fn create_database(&self, request: &CreateDatabase) -> Result<DataSource> {
        let database: DatabaseResponse = self
            .send(self.request(Method::POST, "databases").json(&request.payload()))
            .await?;
        debug!(database_id = %database.id, url = ?database.url, "database created");

        let data_source = database.data_sources.first().ok_or_else(|| {
            MigrateError::InvalidResponse(format!(
                "database {} was created without a data source",
                database.id
            ))
        })?;
        self.retrieve_data_source(&data_source.id).await
    }

    async fn update_data_source(
        &self,
        data_source_id: &str,
        properties: &BTreeMap<String, PropertyDefinition>,
    ) -> Result<DataSource> {
        self.send(
            self.request(Method::PATCH, &format!("data_sources/{data_source_id}"))
                .json(&json!({ "properties": properties })),
        )
        .await
    }

    async fn create_page(&self, request: &CreatePage) -> Result<String> {
        let page: CreatedObject = self
            .send(self.request(Method::POST, "pages").json(&request.payload()))
            .await?;
        Ok(page.id)
    }

    async fn update_page(&self, page_id: &str, properties: &Map<String, Value>) -> Result<()> {
        let _: Value = self
            .send(
                self.request(Method::PATCH, &format!("pages/{page_id}"))
                    .json(&json!({ "properties": properties })),
            )
            .await?;
        Ok(())
    }

    async fn list_block_children(&self, block_id: &str, cursor: Option<&str>) -> Result<ListPage> {
        let mut builder = self
            .request(Method::GET, &format!("blocks/{block_id}/children"))
            .query(&[("page_size", LIST_PAGE_SIZE.to_string())]);
        if let Some(cursor) = cursor {
            builder = builder.query(&[("start_cursor", cursor)]);
        }
        self.send(builder).await
    }

    async fn append_block_children(
        &self,
        block_id: &str,
        children: &[Value],
    ) -> Result<Vec<Value>> {
        let response: AppendResponse = self
            .send(
                self.request(Method::PATCH, &format!("blocks/{block_id}/children"))
                    .json(&json!({ "children": children })),
            )
            .await?;
        Ok(response.results)
    }

    async fn list_comments(&self, block_id: &str, cursor: Option<&str>) -> Result<ListPage> {
        let mut builder = self.request(Method::GET, "comments").query(&[
            ("block_id", block_id.to_string()),
            ("page_size", LIST_PAGE_SIZE.to_string()),
        ]);
        if let Some(cursor) = cursor {
            builder = builder.query(&[("start_cursor", cursor)]);
        }
        self.send(builder).await
    }

    async fn create_comment(
        &self,
        target: &CommentTarget,
        rich_text: &[Value],
        attachments: &[String],
    ) -> Result<CreatedComment> {
        let mut body = match target {
            CommentTarget::Page(page_id) => {
                json!({ "parent": { "page_id": page_id }, "rich_text": rich_text })
            }
            CommentTarget::Discussion(discussion_id) => {
                json!({ "discussion_id": discussion_id, "rich_text": rich_text })
            }
        };
        if !attachments.is_empty() {
            body["attachments"] = attachments
                .iter()
                .map(|id| json!({ "type": "file_upload", "file_upload_id": id }))
                .collect();
        }
        self.send(self.request(Method::POST, "comments").json(&body))
            .await
    }

    async fn create_file_upload(&self, filename: &str, content_type: &str) -> Result<FileUpload> {
        self.send(self.request(Method::POST, "file_uploads").json(&json!({
            "mode": "single_part",
            "filename": filename,
            "content_type": content_type,
        })))
        .await
    }

    async fn send_file_upload(
        &self,
        upload_id: &str,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<FileUpload> {
        let part = multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(content_type)?;
        let form = multipart::Form::new().part("file", part);

        self.send(
            self.request(Method::POST, &format!("file_uploads/{upload_id}/send"))
                .multipart(form),
        )
        .await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(MigrateError::MediaDownload {
                url: url.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
