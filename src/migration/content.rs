//! Content tree transfer
//!
//! Fetches a record's block tree, rewrites what the destination would reject
//! (hosted media, link previews, server-only fields) and replays the result
//! block by block under the new record. Comments are replayed per discussion.

use crate::client::{CommentTarget, RecordStore};
use crate::error::{MigrateError, Result};
use crate::events::{EventSink, MigrationEvent};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Block kinds whose payload references an uploaded or external file.
const MEDIA_TYPES: &[&str] = &["file", "image", "pdf", "video", "audio"];

/// Block kinds the API refuses to create.
const SKIPPED_TYPES: &[&str] = &["child_page", "child_database", "unsupported"];

/// Block kinds that must be created together with their children.
const INLINE_TYPES: &[&str] = &["table", "column_list"];

/// Levels of children the API accepts embedded in one create request.
const MAX_INLINE_DEPTH: usize = 2;

/// Label used in media events for comment attachments.
const COMMENT_ATTACHMENT: &str = "comment_attachment";

/// Read-only fields the API reports but rejects on create.
const SERVER_FIELDS: &[&str] = &[
    "id",
    "object",
    "parent",
    "created_time",
    "last_edited_time",
    "created_by",
    "last_edited_by",
    "has_children",
    "archived",
    "in_trash",
    "request_id",
];

/// A block ready to be replayed onto the destination.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentNode {
    /// Created on its own; children are appended under the created block
    Block { block: Value, children: Vec<ContentNode> },
    /// Created with its children embedded, up to [`MAX_INLINE_DEPTH`] levels
    Inline { block: Value, children: Vec<ContentNode> },
}

impl ContentNode {
    pub fn block(&self) -> &Value {
        match self {
            ContentNode::Block { block, .. } | ContentNode::Inline { block, .. } => block,
        }
    }

    pub fn children(&self) -> &[ContentNode] {
        match self {
            ContentNode::Block { children, .. } | ContentNode::Inline { children, .. } => children,
        }
    }

    pub fn block_type(&self) -> &str {
        block_type(self.block())
    }

    /// Blocks in this subtree.
    pub fn count(&self) -> usize {
        1 + self.children().iter().map(ContentNode::count).sum::<usize>()
    }

    /// Levels of descendants below this node.
    pub fn depth(&self) -> usize {
        self.children()
            .iter()
            .map(|child| 1 + child.depth())
            .max()
            .unwrap_or(0)
    }

    /// Body of the create request for this node.
    pub fn payload(&self) -> Value {
        match self {
            ContentNode::Block { block, .. } => block.clone(),
            ContentNode::Inline { block, children } => embed(block, children, MAX_INLINE_DEPTH),
        }
    }
}

enum Listing {
    Children,
    Comments,
}

enum Transfer {
    Uploaded(String),
    Simulated,
    Failed,
}

/// Moves content trees, media and comments between records.
pub struct ContentMigrator<'a> {
    store: &'a dyn RecordStore,
    sink: &'a dyn EventSink,
    dry_run: bool,
}

impl<'a> ContentMigrator<'a> {
    pub fn new(store: &'a dyn RecordStore, sink: &'a dyn EventSink, dry_run: bool) -> Self {
        Self {
            store,
            sink,
            dry_run,
        }
    }

    /// Fetch and rewrite the content tree under `block_id`.
    ///
    /// Siblings are classified concurrently; a node's children are fetched once
    /// the node itself has been classified.
    pub fn fetch_tree<'s>(&'s self, block_id: &'s str) -> BoxFuture<'s, Result<Vec<ContentNode>>> {
        async move {
            let children = self.list_all(Listing::Children, block_id).await?;
            let classified = try_join_all(children.into_iter().map(|block| self.classify(block))).await?;
            Ok(classified.into_iter().flatten().collect())
        }
        .boxed()
    }

    async fn classify(&self, mut block: Value) -> Result<Option<ContentNode>> {
        let kind = block_type(&block).to_string();
        if SKIPPED_TYPES.contains(&kind.as_str()) {
            self.skip(&kind, "block type cannot be created through the API");
            return Ok(None);
        }

        let id = block.get("id").and_then(Value::as_str).map(str::to_string);
        let has_children = block
            .get("has_children")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if kind == "link_preview" {
            let url = block
                .pointer("/link_preview/url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            block = link_preview_paragraph(&url);
        } else if MEDIA_TYPES.contains(&kind.as_str()) {
            let rehosted = self.rehost_media(&kind, &block[kind.as_str()]).await?;
            match rehosted {
                Some(media) => block[kind.as_str()] = media,
                None => return Ok(None),
            }
        }
        normalize_block_text(&mut block);
        strip_server_fields(&mut block);

        let children = match (has_children, id) {
            (true, Some(id)) => self.fetch_tree(&id).await?,
            _ => Vec::new(),
        };

        if INLINE_TYPES.contains(&kind.as_str()) {
            return Ok(Some(ContentNode::Inline { block, children }));
        }
        Ok(Some(ContentNode::Block { block, children }))
    }

    /// Re-host a media payload. `None` means the block should be dropped.
    async fn rehost_media(&self, block_type: &str, media: &Value) -> Result<Option<Value>> {
        if media.get("type").and_then(Value::as_str) != Some("file") {
            return Ok(Some(media.clone()));
        }
        let Some(url) = media.pointer("/file/url").and_then(Value::as_str) else {
            self.skip(block_type, "hosted file without a URL");
            return Ok(None);
        };

        match self.transfer(block_type, url).await? {
            Transfer::Uploaded(upload_id) => {
                let mut rehosted = media.clone();
                if let Some(fields) = rehosted.as_object_mut() {
                    fields.remove("file");
                    fields.insert("type".to_string(), json!("file_upload"));
                    fields.insert("file_upload".to_string(), json!({ "id": upload_id }));
                }
                Ok(Some(rehosted))
            }
            Transfer::Simulated => Ok(Some(media.clone())),
            Transfer::Failed => Ok(None),
        }
    }

    /// Re-host a record icon or cover. Emoji and external references pass
    /// through; `None` means the reference should be left off.
    pub async fn rehost_reference(&self, slot: &str, reference: &Value) -> Result<Option<Value>> {
        if reference.get("type").and_then(Value::as_str) != Some("file") {
            return Ok(Some(reference.clone()));
        }
        let Some(url) = reference.pointer("/file/url").and_then(Value::as_str) else {
            return Ok(None);
        };

        Ok(match self.transfer(slot, url).await? {
            Transfer::Uploaded(id) => Some(json!({ "type": "file_upload", "file_upload": { "id": id } })),
            Transfer::Simulated => Some(reference.clone()),
            Transfer::Failed => None,
        })
    }

    /// Download `url` and upload it to the destination.
    async fn transfer(&self, label: &str, url: &str) -> Result<Transfer> {
        let bytes = match self.store.download(url).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%url, error = %err, "media download failed, attaching nothing");
                self.skip(label, &format!("download failed: {err}"));
                return Ok(Transfer::Failed);
            }
        };
        if self.dry_run {
            debug!(%url, bytes = bytes.len(), "[dry-run] media upload skipped");
            return Ok(Transfer::Simulated);
        }

        let filename = media_filename(url);
        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string();
        let session = self.store.create_file_upload(&filename, &content_type).await?;
        let sent = self
            .store
            .send_file_upload(&session.id, &filename, &content_type, bytes)
            .await?;
        if !sent.is_uploaded() {
            return Err(MigrateError::MediaUpload {
                upload_id: sent.id,
                status: sent.status,
            });
        }

        self.sink.emit(MigrationEvent::MediaRehosted {
            source_url: url.to_string(),
            upload_id: sent.id.clone(),
        });
        Ok(Transfer::Uploaded(sent.id))
    }

    /// Append `tree` under `parent_id` one block at a time, in order.
    /// Returns the number of create requests made.
    pub fn replay<'s>(&'s self, parent_id: &'s str, tree: &'s [ContentNode]) -> BoxFuture<'s, Result<usize>> {
        async move {
            if self.dry_run {
                debug!(parent_id, blocks = tree.len(), "[dry-run] content replay skipped");
                return Ok(0);
            }

            let mut created = 0;
            for node in tree {
                let response = self
                    .store
                    .append_block_children(parent_id, &[node.payload()])
                    .await?;
                created += 1;

                if node.children().is_empty() {
                    continue;
                }
                let created_id = block_id(response.first())?;
                created += match node {
                    ContentNode::Block { children, .. } => self.replay(created_id, children).await?,
                    ContentNode::Inline { children, .. } => {
                        self.replay_overflow(created_id, children, 1).await?
                    }
                };
            }
            Ok(created)
        }
        .boxed()
    }

    /// Append the descendants an inline create request could not carry.
    ///
    /// `nodes` were created embedded under `parent_id`, `level` levels below
    /// the inline block. Their created ids are listed back and matched by
    /// position; children below [`MAX_INLINE_DEPTH`] are replayed under them.
    fn replay_overflow<'s>(
        &'s self,
        parent_id: &'s str,
        nodes: &'s [ContentNode],
        level: usize,
    ) -> BoxFuture<'s, Result<usize>> {
        async move {
            if nodes.iter().all(|node| level + node.depth() <= MAX_INLINE_DEPTH) {
                return Ok(0);
            }

            let created_blocks = self.list_all(Listing::Children, parent_id).await?;
            if created_blocks.len() != nodes.len() {
                return Err(MigrateError::InvalidResponse(format!(
                    "block {parent_id} lists {} children, {} were created",
                    created_blocks.len(),
                    nodes.len()
                )));
            }

            let mut created = 0;
            for (node, block) in nodes.iter().zip(&created_blocks) {
                if node.children().is_empty() {
                    continue;
                }
                let created_id = block_id(Some(block))?;
                created += if level < MAX_INLINE_DEPTH {
                    self.replay_overflow(created_id, node.children(), level + 1).await?
                } else {
                    self.replay(created_id, node.children()).await?
                };
            }
            Ok(created)
        }
        .boxed()
    }

    /// Copy the comments of `source_id` onto `target_id`, keeping replies in
    /// the same discussion. Hosted attachments are re-uploaded. Returns the
    /// number of comments created.
    pub async fn replay_comments(&self, target_id: &str, source_id: &str) -> Result<usize> {
        let comments = self.list_all(Listing::Comments, source_id).await?;
        if self.dry_run {
            debug!(source_id, count = comments.len(), "[dry-run] comment replay skipped");
            return Ok(0);
        }

        let mut discussions: HashMap<String, String> = HashMap::new();
        let mut created = 0;
        for comment in &comments {
            let rich_text = comment
                .get("rich_text")
                .and_then(Value::as_array)
                .map(|fragments| normalize_rich_text(fragments))
                .unwrap_or_default();
            if rich_text.is_empty() {
                continue;
            }
            let attachments = self.rehost_attachments(comment).await?;

            let source_discussion = comment.get("discussion_id").and_then(Value::as_str);
            let target = match source_discussion.and_then(|id| discussions.get(id)) {
                Some(discussion) => CommentTarget::Discussion(discussion.clone()),
                None => CommentTarget::Page(target_id.to_string()),
            };
            let reply = self
                .store
                .create_comment(&target, &rich_text, &attachments)
                .await?;
            if let Some(id) = source_discussion {
                discussions
                    .entry(id.to_string())
                    .or_insert(reply.discussion_id);
            }
            created += 1;
        }
        Ok(created)
    }

    /// Upload ids for a comment's attachments. Attachments that cannot be
    /// transferred are left off.
    async fn rehost_attachments(&self, comment: &Value) -> Result<Vec<String>> {
        let Some(attachments) = comment.get("attachments").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        let mut uploaded = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let Some(url) = attachment.pointer("/file/url").and_then(Value::as_str) else {
                self.skip(COMMENT_ATTACHMENT, "attachment without a URL");
                continue;
            };
            if let Transfer::Uploaded(id) = self.transfer(COMMENT_ATTACHMENT, url).await? {
                uploaded.push(id);
            }
        }
        Ok(uploaded)
    }

    async fn list_all(&self, listing: Listing, id: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = match listing {
                Listing::Children => self.store.list_block_children(id, cursor.as_deref()).await?,
                Listing::Comments => self.store.list_comments(id, cursor.as_deref()).await?,
            };
            items.extend(page.results);
            match (page.has_more, page.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(items)
    }

    fn skip(&self, block_type: &str, reason: &str) {
        self.sink.emit(MigrationEvent::MediaSkipped {
            block_type: block_type.to_string(),
            reason: reason.to_string(),
        });
    }
}

pub fn block_type(block: &Value) -> &str {
    block.get("type").and_then(Value::as_str).unwrap_or("unsupported")
}

/// Remove fields the API reports but rejects on create.
pub fn strip_server_fields(block: &mut Value) {
    if let Some(fields) = block.as_object_mut() {
        for field in SERVER_FIELDS {
            fields.remove(*field);
        }
    }
}

/// Rewrite link preview mentions into plain linked text, keeping annotations.
pub fn normalize_rich_text(fragments: &[Value]) -> Vec<Value> {
    fragments
        .iter()
        .map(|fragment| {
            let is_preview = fragment.get("type").and_then(Value::as_str) == Some("mention")
                && fragment.pointer("/mention/type").and_then(Value::as_str) == Some("link_preview");
            if !is_preview {
                return fragment.clone();
            }

            let url = fragment
                .pointer("/mention/link_preview/url")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let mut span = link_text(url);
            if let Some(annotations) = fragment.get("annotations") {
                span["annotations"] = annotations.clone();
            }
            span
        })
        .collect()
}

fn normalize_block_text(block: &mut Value) {
    let kind = block_type(block).to_string();
    let Some(body) = block.get_mut(kind.as_str()) else {
        return;
    };

    let normalized = body
        .get("rich_text")
        .and_then(Value::as_array)
        .map(|fragments| normalize_rich_text(fragments));
    if let Some(fragments) = normalized {
        body["rich_text"] = Value::Array(fragments);
    }
    if let Some(cells) = body.get_mut("cells").and_then(Value::as_array_mut) {
        for cell in cells.iter_mut() {
            let normalized = cell.as_array().map(|fragments| normalize_rich_text(fragments));
            if let Some(fragments) = normalized {
                *cell = Value::Array(fragments);
            }
        }
    }
}

fn link_text(url: &str) -> Value {
    json!({
        "type": "text",
        "text": { "content": url, "link": { "url": url } }
    })
}

/// Paragraph carrying a link preview's URL as linked text.
pub fn link_preview_paragraph(url: &str) -> Value {
    json!({
        "type": "paragraph",
        "paragraph": { "rich_text": [link_text(url)] }
    })
}

/// `block` with `children` embedded, `depth` levels deep at most.
fn embed(block: &Value, children: &[ContentNode], depth: usize) -> Value {
    let mut block = block.clone();
    if depth == 0 || children.is_empty() {
        return block;
    }
    let inline: Vec<Value> = children
        .iter()
        .map(|child| embed(child.block(), child.children(), depth - 1))
        .collect();
    let kind = block_type(&block).to_string();
    if let Some(body) = block.get_mut(kind.as_str()).and_then(Value::as_object_mut) {
        body.insert("children".to_string(), Value::Array(inline));
    }
    block
}

fn block_id(block: Option<&Value>) -> Result<&str> {
    block
        .and_then(|block| block.get("id"))
        .and_then(Value::as_str)
        .ok_or_else(|| MigrateError::InvalidResponse("created block has no id".to_string()))
}

/// File name for an upload, taken from the last path segment of `url`.
pub fn media_filename(url: &str) -> String {
    url.split(|c| c == '?' || c == '#')
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("upload")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockStore, StoreCall};
    use crate::events::RecordingSink;

    const HOSTED: &str = "https://files.example.com/space/diagram.png?X-Amz-Signature=abc";

    fn paragraph(id: &str, text: &str, has_children: bool) -> Value {
        json!({
            "object": "block",
            "id": id,
            "type": "paragraph",
            "has_children": has_children,
            "created_time": "2024-01-01T00:00:00.000Z",
            "paragraph": { "rich_text": [{ "type": "text", "text": { "content": text }, "plain_text": text }] }
        })
    }

    fn hosted_image(id: &str) -> Value {
        json!({
            "object": "block",
            "id": id,
            "type": "image",
            "has_children": false,
            "image": {
                "caption": [],
                "type": "file",
                "file": { "url": HOSTED, "expiry_time": "2024-01-01T01:00:00.000Z" }
            }
        })
    }

    #[test]
    fn test_media_filename() {
        assert_eq!(media_filename(HOSTED), "diagram.png");
        assert_eq!(media_filename("https://example.com/"), "upload");
    }

    #[test]
    fn test_normalize_link_preview_mention() {
        let fragments = vec![json!({
            "type": "mention",
            "mention": { "type": "link_preview", "link_preview": { "url": "https://github.com/x" } },
            "annotations": { "bold": true },
            "plain_text": "https://github.com/x"
        })];

        let normalized = normalize_rich_text(&fragments);
        assert_eq!(normalized[0]["type"], "text");
        assert_eq!(normalized[0]["text"]["link"]["url"], "https://github.com/x");
        assert_eq!(normalized[0]["annotations"]["bold"], true);
    }

    #[test]
    fn test_strip_server_fields() {
        let mut block = paragraph("b1", "x", true);
        strip_server_fields(&mut block);
        assert!(block.get("id").is_none());
        assert!(block.get("has_children").is_none());
        assert!(block.get("created_time").is_none());
        assert_eq!(block["type"], "paragraph");
    }

    #[tokio::test]
    async fn test_fetch_tree_recurses_into_children() {
        let store = MockStore::new()
            .with_children("page", vec![paragraph("b1", "parent", true), paragraph("b2", "sibling", false)])
            .with_children(
                "b1",
                vec![json!({
                    "id": "b3",
                    "type": "bulleted_list_item",
                    "has_children": false,
                    "bulleted_list_item": { "rich_text": [] }
                })],
            );
        let sink = RecordingSink::new();
        let tree = ContentMigrator::new(&store, &sink, false)
            .fetch_tree("page")
            .await
            .unwrap();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].count(), 2);
        match &tree[0] {
            ContentNode::Block { block, children } => {
                assert!(block.get("id").is_none());
                assert_eq!(children[0].block_type(), "bulleted_list_item");
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_link_preview_block_becomes_paragraph() {
        let store = MockStore::new().with_children(
            "page",
            vec![json!({
                "id": "lp",
                "type": "link_preview",
                "has_children": false,
                "link_preview": { "url": "https://figma.com/file/1" }
            })],
        );
        let sink = RecordingSink::new();
        let tree = ContentMigrator::new(&store, &sink, false)
            .fetch_tree("page")
            .await
            .unwrap();

        assert_eq!(tree[0].block_type(), "paragraph");
        assert_eq!(
            tree[0].block()["paragraph"]["rich_text"][0]["text"]["content"],
            "https://figma.com/file/1"
        );
    }

    #[tokio::test]
    async fn test_hosted_media_is_rehosted() {
        let store = MockStore::new()
            .with_children("page", vec![hosted_image("img")])
            .with_download(HOSTED, b"png-bytes");
        let sink = RecordingSink::new();
        let tree = ContentMigrator::new(&store, &sink, false)
            .fetch_tree("page")
            .await
            .unwrap();

        let image = &tree[0].block()["image"];
        assert_eq!(image["type"], "file_upload");
        assert!(image.get("file").is_none());
        assert!(image["file_upload"]["id"].as_str().unwrap().starts_with("upload-"));
        assert!(store
            .calls()
            .contains(&StoreCall::CreateFileUpload("diagram.png".to_string())));
        assert!(sink
            .events()
            .iter()
            .any(|event| matches!(event, MigrationEvent::MediaRehosted { .. })));
    }

    #[tokio::test]
    async fn test_failed_download_drops_block() {
        let store = MockStore::new().with_children("page", vec![hosted_image("img"), paragraph("b", "kept", false)]);
        let sink = RecordingSink::new();
        let tree = ContentMigrator::new(&store, &sink, false)
            .fetch_tree("page")
            .await
            .unwrap();

        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].block_type(), "paragraph");
        assert!(sink
            .events()
            .iter()
            .any(|event| matches!(event, MigrationEvent::MediaSkipped { block_type, .. } if block_type == "image")));
    }

    #[tokio::test]
    async fn test_failed_upload_is_fatal() {
        let store = MockStore::new()
            .with_children("page", vec![hosted_image("img")])
            .with_download(HOSTED, b"png-bytes")
            .with_upload_status("failed");
        let sink = RecordingSink::new();
        let result = ContentMigrator::new(&store, &sink, false)
            .fetch_tree("page")
            .await;

        assert!(matches!(result, Err(MigrateError::MediaUpload { .. })));
    }

    #[tokio::test]
    async fn test_external_media_passes_through() {
        let store = MockStore::new().with_children(
            "page",
            vec![json!({
                "id": "vid",
                "type": "video",
                "has_children": false,
                "video": { "type": "external", "external": { "url": "https://youtu.be/x" } }
            })],
        );
        let sink = RecordingSink::new();
        let tree = ContentMigrator::new(&store, &sink, false)
            .fetch_tree("page")
            .await
            .unwrap();

        assert_eq!(tree[0].block()["video"]["external"]["url"], "https://youtu.be/x");
        assert!(!store
            .calls()
            .iter()
            .any(|call| matches!(call, StoreCall::Download(_))));
    }

    #[tokio::test]
    async fn test_child_pages_are_skipped() {
        let store = MockStore::new().with_children(
            "page",
            vec![json!({ "id": "cp", "type": "child_page", "has_children": true, "child_page": { "title": "Sub" } })],
        );
        let sink = RecordingSink::new();
        let tree = ContentMigrator::new(&store, &sink, false)
            .fetch_tree("page")
            .await
            .unwrap();

        assert!(tree.is_empty());
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_table_rows_are_inlined() {
        let store = MockStore::new()
            .with_children(
                "page",
                vec![json!({
                    "id": "t",
                    "type": "table",
                    "has_children": true,
                    "table": { "table_width": 1, "has_column_header": false, "has_row_header": false }
                })],
            )
            .with_children(
                "t",
                vec![json!({
                    "id": "r1",
                    "type": "table_row",
                    "has_children": false,
                    "table_row": { "cells": [[{ "type": "text", "text": { "content": "a" } }]] }
                })],
            );
        let sink = RecordingSink::new();
        let migrator = ContentMigrator::new(&store, &sink, false);
        let tree = migrator.fetch_tree("page").await.unwrap();

        assert!(matches!(tree[0], ContentNode::Inline { .. }));
        let payload = tree[0].payload();
        let rows = payload["table"]["children"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].get("id").is_none());

        let created = migrator.replay("target", &tree).await.unwrap();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_deep_column_content_is_appended_after_inline_create() {
        let node = |kind: &str, children: Vec<ContentNode>| {
            let block = json!({ "type": kind, kind: {} });
            if INLINE_TYPES.contains(&kind) {
                ContentNode::Inline { block, children }
            } else {
                ContentNode::Block { block, children }
            }
        };
        let tree = vec![node(
            "column_list",
            vec![node("column", vec![node("toggle", vec![node("paragraph", Vec::new())])])],
        )];
        assert_eq!(tree[0].depth(), 3);
        assert_eq!(tree[0].count(), 4);

        let payload = tree[0].payload();
        let toggle = &payload["column_list"]["children"][0]["column"]["children"][0];
        assert_eq!(toggle["type"], "toggle");
        assert!(toggle["toggle"].get("children").is_none());

        let store = MockStore::new();
        let sink = RecordingSink::new();
        let created = ContentMigrator::new(&store, &sink, false)
            .replay("target", &tree)
            .await
            .unwrap();

        assert_eq!(created, 2);
        let list = store.children("target");
        let columns = store.children(list[0]["id"].as_str().unwrap());
        let toggles = store.children(columns[0]["id"].as_str().unwrap());
        assert_eq!(toggles[0]["type"], "toggle");
        let paragraphs = store.children(toggles[0]["id"].as_str().unwrap());
        assert_eq!(paragraphs[0]["type"], "paragraph");
    }

    #[tokio::test]
    async fn test_replay_attaches_children_under_created_block() {
        let store = MockStore::new();
        let sink = RecordingSink::new();
        let tree = vec![ContentNode::Block {
            block: json!({ "type": "bulleted_list_item", "bulleted_list_item": { "rich_text": [] } }),
            children: vec![ContentNode::Block {
                block: json!({ "type": "paragraph", "paragraph": { "rich_text": [] } }),
                children: Vec::new(),
            }],
        }];

        let created = ContentMigrator::new(&store, &sink, false)
            .replay("target", &tree)
            .await
            .unwrap();

        assert_eq!(created, 2);
        let top = store.children("target");
        assert_eq!(top.len(), 1);
        let item_id = top[0]["id"].as_str().unwrap();
        assert_eq!(store.children(item_id)[0]["type"], "paragraph");
    }

    #[tokio::test]
    async fn test_replay_comments_keeps_threads() {
        let comment = |id: &str, discussion: &str, text: &str| {
            json!({
                "object": "comment",
                "id": id,
                "discussion_id": discussion,
                "rich_text": [{ "type": "text", "text": { "content": text }, "plain_text": text }]
            })
        };
        let store = MockStore::new().with_comments(
            "source",
            vec![
                comment("c1", "d1", "first"),
                comment("c2", "d1", "reply"),
                comment("c3", "d2", "other thread"),
            ],
        );
        let sink = RecordingSink::new();
        let created = ContentMigrator::new(&store, &sink, false)
            .replay_comments("target", "source")
            .await
            .unwrap();

        assert_eq!(created, 3);
        let targets: Vec<CommentTarget> = store
            .created_comments()
            .into_iter()
            .map(|(target, _, _)| target)
            .collect();
        assert_eq!(targets[0], CommentTarget::Page("target".into()));
        assert!(matches!(&targets[1], CommentTarget::Discussion(id) if id.starts_with("discussion-")));
        assert_eq!(targets[2], CommentTarget::Page("target".into()));
    }

    #[tokio::test]
    async fn test_comment_attachments_are_reuploaded() {
        let store = MockStore::new()
            .with_comments(
                "source",
                vec![json!({
                    "object": "comment",
                    "id": "c1",
                    "discussion_id": "d1",
                    "rich_text": [{ "type": "text", "text": { "content": "see file" }, "plain_text": "see file" }],
                    "attachments": [
                        { "category": "image", "file": { "url": HOSTED, "expiry_time": "2024-01-01T01:00:00.000Z" } },
                        { "category": "image", "file": { "url": "https://gone.example.com/old.png" } }
                    ]
                })],
            )
            .with_download(HOSTED, b"png-bytes");
        let sink = RecordingSink::new();
        let created = ContentMigrator::new(&store, &sink, false)
            .replay_comments("target", "source")
            .await
            .unwrap();

        assert_eq!(created, 1);
        assert!(store
            .calls()
            .contains(&StoreCall::CreateFileUpload("diagram.png".to_string())));
        let (_, _, attachments) = &store.created_comments()[0];
        assert_eq!(attachments.len(), 1);
        assert!(attachments[0].starts_with("upload-"));
        assert!(sink.events().iter().any(|event| matches!(
            event,
            MigrationEvent::MediaSkipped { block_type, .. } if block_type == COMMENT_ATTACHMENT
        )));
    }

    #[tokio::test]
    async fn test_dry_run_skips_writes() {
        let store = MockStore::new()
            .with_children("page", vec![hosted_image("img")])
            .with_download(HOSTED, b"png-bytes");
        let sink = RecordingSink::new();
        let migrator = ContentMigrator::new(&store, &sink, true);

        let tree = migrator.fetch_tree("page").await.unwrap();
        let created = migrator.replay("target", &tree).await.unwrap();

        assert_eq!(created, 0);
        assert_eq!(tree[0].block()["image"]["type"], "file");
        assert!(store.calls().iter().all(|call| !call.is_mutation()));
    }

    #[tokio::test]
    async fn test_rehost_icon() {
        let store = MockStore::new().with_download(HOSTED, b"png");
        let sink = RecordingSink::new();
        let migrator = ContentMigrator::new(&store, &sink, false);

        let emoji = json!({ "type": "emoji", "emoji": "🚀" });
        assert_eq!(migrator.rehost_reference("icon", &emoji).await.unwrap(), Some(emoji.clone()));

        let hosted = json!({ "type": "file", "file": { "url": HOSTED } });
        let rehosted = migrator.rehost_reference("icon", &hosted).await.unwrap().unwrap();
        assert_eq!(rehosted["type"], "file_upload");

        let missing = json!({ "type": "file", "file": { "url": "https://gone.example.com/a.png" } });
        assert!(migrator.rehost_reference("cover", &missing).await.unwrap().is_none());
    }
}
