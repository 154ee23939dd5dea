//! Markdown memory files under `<state>/memories`.
//!
//! Filenames are sanitised to a single path component with a `.md`
//! extension, so the model can never address anything outside the directory.
//! Every successful write commits the state directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use avatar_provider::ToolDef;

use crate::git::git_commit;
use crate::tool::{empty_schema, str_arg, ToolExecutor, ToolOutput};

/// Shared location for all memory tools.
pub struct MemoryDir {
    dir: PathBuf,
    state_dir: PathBuf,
}

impl MemoryDir {
    pub fn new(dir: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            state_dir: state_dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `notes`, `notes.md` and `../../notes.md` all map to `<dir>/notes.md`.
    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        let stem = filename.strip_suffix(".md").unwrap_or(filename);
        let name = Path::new(stem).file_name()?.to_str()?;
        if name.is_empty() {
            return None;
        }
        Some(self.dir.join(format!("{name}.md")))
    }

    async fn commit(&self, message: String) {
        git_commit(&self.state_dir, &message).await;
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn filename_schema(description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "filename": {"type": "string", "description": description}
        },
        "required": ["filename"]
    })
}

/// Validated target of a memory operation, or the text to hand back.
fn target(memory: &MemoryDir, input: &serde_json::Value) -> Result<(String, PathBuf), ToolOutput> {
    let filename = str_arg(input, "filename");
    if filename.is_empty() {
        return Err(ToolOutput::error("Error: filename is required."));
    }
    match memory.resolve(filename) {
        Some(path) => Ok((filename.to_string(), path)),
        None => Err(ToolOutput::error(format!(
            "Error: invalid filename '{filename}'."
        ))),
    }
}

pub struct MemoryReadTool {
    memory: Arc<MemoryDir>,
}

impl MemoryReadTool {
    pub fn new(memory: Arc<MemoryDir>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl ToolExecutor for MemoryReadTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "memory_read",
            "Read a memory file. Use this to recall previously stored information.",
            filename_schema("Name of the memory file to read (without .md extension)."),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let (filename, path) = match target(&self.memory, &input) {
            Ok(t) => t,
            Err(out) => return Ok(out),
        };
        if !path.exists() {
            return Ok(ToolOutput::error(format!("Memory '{filename}' not found.")));
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", file_name(&path)))?;
        Ok(ToolOutput::ok(content))
    }
}

pub struct MemoryListTool {
    memory: Arc<MemoryDir>,
}

impl MemoryListTool {
    pub fn new(memory: Arc<MemoryDir>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl ToolExecutor for MemoryListTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "memory_list",
            "List all saved memory files by name.",
            empty_schema(),
        )
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<ToolOutput> {
        tokio::fs::create_dir_all(self.memory.dir()).await?;
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(self.memory.dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "md") {
                if let Some(stem) = path.file_stem() {
                    names.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        if names.is_empty() {
            return Ok(ToolOutput::ok("No memories found."));
        }
        names.sort();
        let lines: Vec<String> = names.iter().map(|n| format!("- {n}")).collect();
        Ok(ToolOutput::ok(format!("Memories:\n{}", lines.join("\n"))))
    }
}

pub struct MemoryCreateTool {
    memory: Arc<MemoryDir>,
}

impl MemoryCreateTool {
    pub fn new(memory: Arc<MemoryDir>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl ToolExecutor for MemoryCreateTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "memory_create",
            "Create a new memory as a markdown file. Use this to remember important information about the user or conversations.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "filename": {
                        "type": "string",
                        "description": "Name for the memory file (without .md extension)."
                    },
                    "content": {
                        "type": "string",
                        "description": "Markdown content to write to the memory file."
                    }
                },
                "required": ["filename", "content"]
            }),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let (filename, path) = match target(&self.memory, &input) {
            Ok(t) => t,
            Err(out) => return Ok(out),
        };
        if path.exists() {
            return Ok(ToolOutput::error(format!(
                "Memory '{filename}' already exists. Use memory_edit to update it."
            )));
        }
        tokio::fs::create_dir_all(self.memory.dir()).await?;
        tokio::fs::write(&path, str_arg(&input, "content")).await?;
        self.memory.commit(format!("Added {}", file_name(&path))).await;
        Ok(ToolOutput::ok(format!("Memory '{filename}' created.")))
    }
}

pub struct MemoryEditTool {
    memory: Arc<MemoryDir>,
}

impl MemoryEditTool {
    pub fn new(memory: Arc<MemoryDir>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl ToolExecutor for MemoryEditTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "memory_edit",
            "Edit an existing memory file by replacing its content.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "filename": {
                        "type": "string",
                        "description": "Name of the memory file to edit (without .md extension)."
                    },
                    "content": {
                        "type": "string",
                        "description": "New markdown content for the memory file."
                    }
                },
                "required": ["filename", "content"]
            }),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let (filename, path) = match target(&self.memory, &input) {
            Ok(t) => t,
            Err(out) => return Ok(out),
        };
        if !path.exists() {
            return Ok(ToolOutput::error(format!(
                "Memory '{filename}' not found. Use memory_create to create it."
            )));
        }
        tokio::fs::write(&path, str_arg(&input, "content")).await?;
        self.memory.commit(format!("Updated {}", file_name(&path))).await;
        Ok(ToolOutput::ok(format!("Memory '{filename}' updated.")))
    }
}

pub struct MemoryDeleteTool {
    memory: Arc<MemoryDir>,
}

impl MemoryDeleteTool {
    pub fn new(memory: Arc<MemoryDir>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl ToolExecutor for MemoryDeleteTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "memory_delete",
            "Delete a memory file.",
            filename_schema("Name of the memory file to delete (without .md extension)."),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let (filename, path) = match target(&self.memory, &input) {
            Ok(t) => t,
            Err(out) => return Ok(out),
        };
        if !path.exists() {
            return Ok(ToolOutput::error(format!("Memory '{filename}' not found.")));
        }
        tokio::fs::remove_file(&path).await?;
        self.memory.commit(format!("Deleted {}", file_name(&path))).await;
        Ok(ToolOutput::ok(format!("Memory '{filename}' deleted.")))
    }
}

pub struct MemoryPatchTool {
    memory: Arc<MemoryDir>,
}

impl MemoryPatchTool {
    pub fn new(memory: Arc<MemoryDir>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl ToolExecutor for MemoryPatchTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "memory_patch",
            "Patch a memory file by replacing a specific substring with new text. Use this for small edits instead of rewriting the whole file.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "filename": {
                        "type": "string",
                        "description": "Name of the memory file to patch (without .md extension)."
                    },
                    "old_string": {
                        "type": "string",
                        "description": "The exact text to find and replace."
                    },
                    "new_string": {
                        "type": "string",
                        "description": "The text to replace it with."
                    }
                },
                "required": ["filename", "old_string", "new_string"]
            }),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let (filename, path) = match target(&self.memory, &input) {
            Ok(t) => t,
            Err(out) => return Ok(out),
        };
        let old = str_arg(&input, "old_string");
        let new = str_arg(&input, "new_string");
        if old.is_empty() {
            return Ok(ToolOutput::error("Error: old_string is required."));
        }
        if !path.exists() {
            return Ok(ToolOutput::error(format!("Memory '{filename}' not found.")));
        }

        let content = tokio::fs::read_to_string(&path).await?;
        match content.matches(old).count() {
            0 => Ok(ToolOutput::error(format!(
                "Error: old_string not found in memory '{filename}'."
            ))),
            1 => {
                tokio::fs::write(&path, content.replacen(old, new, 1)).await?;
                self.memory.commit(format!("Updated {}", file_name(&path))).await;
                Ok(ToolOutput::ok(format!("Memory '{filename}' patched.")))
            }
            n => Ok(ToolOutput::error(format!(
                "Error: old_string matches {n} times in memory '{filename}'. Provide a more specific string."
            ))),
        }
    }
}
