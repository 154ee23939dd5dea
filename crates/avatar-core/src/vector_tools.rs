use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use avatar_provider::ToolDef;

use super::tool::{empty_schema, int_arg, str_arg, ToolExecutor, ToolOutput};
use super::vector::VectorIndex;

const DEFAULT_RESULTS: i64 = 5;
const MAX_RESULTS: i64 = 20;

pub struct VectorSaveTool {
    index: Arc<VectorIndex>,
}

impl VectorSaveTool {
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl ToolExecutor for VectorSaveTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "vector_save",
            "Save text to the vector database for semantic search later. Updates the entry if the ID already exists.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "A unique identifier for this entry."},
                    "content": {"type": "string", "description": "The text content to store and embed."},
                    "metadata": {
                        "type": "object",
                        "description": "Optional metadata to attach (e.g. {\"topic\": \"hobbies\"})."
                    }
                },
                "required": ["id", "content"]
            }),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let id = str_arg(&input, "id").trim();
        let content = str_arg(&input, "content").trim();
        if id.is_empty() {
            return Ok(ToolOutput::error("Error: id is required."));
        }
        if content.is_empty() {
            return Ok(ToolOutput::error("Error: content is required."));
        }
        let metadata = input
            .get("metadata")
            .and_then(|m| m.as_object())
            .cloned()
            .unwrap_or_default();

        match self.index.save(id, content, &metadata).await {
            Ok(()) => Ok(ToolOutput::ok(format!(
                "Saved entry '{id}' to vector database."
            ))),
            Err(e) => Ok(ToolOutput::error(format!(
                "Error saving to vector database: {e}"
            ))),
        }
    }
}

pub struct VectorSearchTool {
    index: Arc<VectorIndex>,
}

impl VectorSearchTool {
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self { index }
    }

    async fn search(&self, query: &str, limit: usize) -> Result<String> {
        if self.index.store().count().await? == 0 {
            return Ok("Vector database is empty.".to_string());
        }
        let hits = self.index.search(query, limit).await?;
        if hits.is_empty() {
            return Ok(format!("No results found for: {query}"));
        }
        let blocks: Vec<String> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let mut block = format!(
                    "**{}. [{}]** (distance: {:.4})",
                    i + 1,
                    hit.id,
                    hit.distance
                );
                if !hit.metadata.is_empty() {
                    let meta = serde_json::Value::Object(hit.metadata.clone());
                    block.push_str(&format!("\n  metadata: {meta}"));
                }
                block.push_str(&format!("\n  {}", hit.content));
                block
            })
            .collect();
        Ok(blocks.join("\n\n"))
    }
}

#[async_trait]
impl ToolExecutor for VectorSearchTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "vector_search",
            "Search the vector database by meaning. Returns the most relevant entries for the query.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The search query."},
                    "n": {"type": "integer", "description": "Number of results to return (default 5)."}
                },
                "required": ["query"]
            }),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let query = str_arg(&input, "query").trim();
        if query.is_empty() {
            return Ok(ToolOutput::error("Error: query is required."));
        }
        let n = int_arg(&input, "n")
            .unwrap_or(DEFAULT_RESULTS)
            .clamp(1, MAX_RESULTS) as usize;

        match self.search(query, n).await {
            Ok(text) => Ok(ToolOutput::ok(text)),
            Err(e) => Ok(ToolOutput::error(format!(
                "Error searching vector database: {e}"
            ))),
        }
    }
}

pub struct VectorDeleteTool {
    index: Arc<VectorIndex>,
}

impl VectorDeleteTool {
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl ToolExecutor for VectorDeleteTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "vector_delete",
            "Delete an entry from the vector database by ID.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "The ID of the entry to delete."}
                },
                "required": ["id"]
            }),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let id = str_arg(&input, "id").trim();
        if id.is_empty() {
            return Ok(ToolOutput::error("Error: id is required."));
        }
        // Deleting an absent id is not an error.
        match self.index.store().delete(id).await {
            Ok(_) => Ok(ToolOutput::ok(format!(
                "Deleted entry '{id}' from vector database."
            ))),
            Err(e) => Ok(ToolOutput::error(format!(
                "Error deleting from vector database: {e}"
            ))),
        }
    }
}

pub struct VectorListTool {
    index: Arc<VectorIndex>,
}

impl VectorListTool {
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl ToolExecutor for VectorListTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "vector_list",
            "List all entry IDs in the vector database.",
            empty_schema(),
        )
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<ToolOutput> {
        match self.index.store().ids().await {
            Ok(ids) if ids.is_empty() => Ok(ToolOutput::ok("Vector database is empty.")),
            Ok(ids) => {
                let lines: Vec<String> = ids.iter().map(|id| format!("- {id}")).collect();
                Ok(ToolOutput::ok(format!(
                    "Vector database entries ({}):\n{}",
                    ids.len(),
                    lines.join("\n")
                )))
            }
            Err(e) => Ok(ToolOutput::error(format!(
                "Error listing vector database: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{Embedder, VectorStore};

    /// Maps a handful of words onto fixed axes.
    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        if t.contains("cat") { 1.0 } else { 0.0 },
                        if t.contains("dog") { 1.0 } else { 0.0 },
                        if t.contains("rust") { 1.0 } else { 0.1 },
                    ]
                })
                .collect())
        }

        fn model_id(&self) -> &str {
            "axis"
        }
    }

    fn index() -> Arc<VectorIndex> {
        let store = VectorStore::open_in_memory("test").unwrap();
        Arc::new(VectorIndex::new(store, Arc::new(AxisEmbedder)))
    }

    #[tokio::test]
    async fn save_search_list_delete() {
        let index = index();
        let save = VectorSaveTool::new(index.clone());
        let search = VectorSearchTool::new(index.clone());
        let list = VectorListTool::new(index.clone());
        let delete = VectorDeleteTool::new(index.clone());

        let out = search
            .execute(serde_json::json!({"query": "cat"}))
            .await
            .unwrap();
        assert_eq!(out.content, "Vector database is empty.");

        let out = save
            .execute(serde_json::json!({
                "id": "pets",
                "content": "The user has a cat",
                "metadata": {"topic": "hobbies"}
            }))
            .await
            .unwrap();
        assert_eq!(out.content, "Saved entry 'pets' to vector database.");
        save.execute(serde_json::json!({"id": "lang", "content": "Writes Rust daily"}))
            .await
            .unwrap();

        let out = search
            .execute(serde_json::json!({"query": "my cat", "n": 1}))
            .await
            .unwrap();
        assert_eq!(
            out.content,
            "**1. [pets]** (distance: 0.0000)\n  metadata: {\"topic\":\"hobbies\"}\n  The user has a cat"
        );

        let out = list.execute(serde_json::json!({})).await.unwrap();
        assert_eq!(out.content, "Vector database entries (2):\n- lang\n- pets");

        let out = delete
            .execute(serde_json::json!({"id": "pets"}))
            .await
            .unwrap();
        assert_eq!(out.content, "Deleted entry 'pets' from vector database.");
        let out = list.execute(serde_json::json!({})).await.unwrap();
        assert_eq!(out.content, "Vector database entries (1):\n- lang");
    }

    #[tokio::test]
    async fn missing_arguments() {
        let index = index();
        let save = VectorSaveTool::new(index.clone());
        let out = save
            .execute(serde_json::json!({"content": "x"}))
            .await
            .unwrap();
        assert_eq!(out.content, "Error: id is required.");
        let out = save
            .execute(serde_json::json!({"id": "x", "content": "  "}))
            .await
            .unwrap();
        assert_eq!(out.content, "Error: content is required.");

        let out = VectorSearchTool::new(index.clone())
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(out.content, "Error: query is required.");

        let out = VectorDeleteTool::new(index)
            .execute(serde_json::json!({"id": ""}))
            .await
            .unwrap();
        assert_eq!(out.content, "Error: id is required.");
    }
}
