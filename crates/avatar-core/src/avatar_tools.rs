//! Animation and background tools. Both only validate a name against the
//! asset listing and then publish an event for connected clients.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use avatar_bus::{AvatarEvent, BusPublisher};
use avatar_provider::ToolDef;

use super::tool::{empty_schema, str_arg, ToolExecutor, ToolOutput};

const BACKGROUND_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Sorted stems of `*.fbx` files in `dir`. Missing dir means none.
pub fn list_animations(dir: &Path) -> Vec<String> {
    list_assets(dir, |ext| ext.eq_ignore_ascii_case("fbx"), true)
}

/// Sorted image file names in `dir`, extension included.
pub fn list_backgrounds(dir: &Path) -> Vec<String> {
    list_assets(
        dir,
        |ext| {
            BACKGROUND_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        },
        false,
    )
}

fn list_assets(dir: &Path, accept: impl Fn(&str) -> bool, stem_only: bool) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(&accept)
        })
        .filter_map(|path| {
            let name = if stem_only {
                path.file_stem()
            } else {
                path.file_name()
            };
            name.and_then(|n| n.to_str()).map(str::to_string)
        })
        .collect();
    names.sort();
    names
}

pub struct GetAnimationsTool {
    names: Arc<Vec<String>>,
}

impl GetAnimationsTool {
    pub fn new(names: Arc<Vec<String>>) -> Self {
        Self { names }
    }
}

#[async_trait]
impl ToolExecutor for GetAnimationsTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "get_animations",
            "List all available animations for the 3D avatar.",
            empty_schema(),
        )
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<ToolOutput> {
        Ok(ToolOutput::ok(format!(
            "Available animations: {}",
            self.names.join(", ")
        )))
    }
}

pub struct PlayAnimationTool {
    names: Arc<Vec<String>>,
    publisher: BusPublisher,
}

impl PlayAnimationTool {
    pub fn new(names: Arc<Vec<String>>, publisher: BusPublisher) -> Self {
        Self { names, publisher }
    }
}

#[async_trait]
impl ToolExecutor for PlayAnimationTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "play_animation",
            "Play an animation on the 3D avatar. Use this to express emotions or actions visually. Call get_animations first if you don't know the available names.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "The animation to play."}
                },
                "required": ["name"]
            }),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let name = str_arg(&input, "name");
        if !self.names.iter().any(|n| n == name) {
            return Ok(ToolOutput::error(format!(
                "Unknown animation: {name}. Available: {}",
                self.names.join(", ")
            )));
        }
        self.publisher
            .publish(AvatarEvent::Play {
                animation: name.to_string(),
            })
            .await?;
        Ok(ToolOutput::ok(format!("Now playing animation: {name}")))
    }
}

pub struct GetBackgroundsTool {
    names: Arc<Vec<String>>,
}

impl GetBackgroundsTool {
    pub fn new(names: Arc<Vec<String>>) -> Self {
        Self { names }
    }
}

#[async_trait]
impl ToolExecutor for GetBackgroundsTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "get_backgrounds",
            "List all available background images for the 3D scene.",
            empty_schema(),
        )
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<ToolOutput> {
        if self.names.is_empty() {
            return Ok(ToolOutput::ok("No backgrounds available."));
        }
        Ok(ToolOutput::ok(format!(
            "Available backgrounds: {}",
            self.names.join(", ")
        )))
    }
}

pub struct SetBackgroundTool {
    names: Arc<Vec<String>>,
    publisher: BusPublisher,
}

impl SetBackgroundTool {
    pub fn new(names: Arc<Vec<String>>, publisher: BusPublisher) -> Self {
        Self { names, publisher }
    }
}

#[async_trait]
impl ToolExecutor for SetBackgroundTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "set_background",
            "Change the background image of the 3D scene. Call get_backgrounds first if you don't know the available names.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "The background image to display."}
                },
                "required": ["name"]
            }),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let name = str_arg(&input, "name");
        if !self.names.iter().any(|n| n == name) {
            return Ok(ToolOutput::error(format!(
                "Unknown background: {name}. Available: {}",
                self.names.join(", ")
            )));
        }
        self.publisher
            .publish(AvatarEvent::Background {
                name: name.to_string(),
            })
            .await?;
        Ok(ToolOutput::ok(format!("Background changed to: {name}")))
    }
}
