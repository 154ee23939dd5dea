//! Key/value state persisted as a single JSON object in `state.json`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use avatar_provider::ToolDef;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::tool::{empty_schema, str_arg, ToolExecutor, ToolOutput};

pub struct StateFile {
    path: PathBuf,
    // Serialises read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// A missing or corrupt file reads as an empty object.
    pub async fn load(&self) -> Map<String, Value> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            Err(_) => Map::new(),
        }
    }

    async fn save(&self, state: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(state)?).await?;
        Ok(())
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load().await;
        state.insert(key.to_string(), value);
        self.save(&state).await
    }
}

fn key_arg(input: &Value) -> Option<String> {
    let key = match &input["key"] {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    (!key.is_empty()).then_some(key)
}

fn key_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "key": {"type": "string", "description": description}
        },
        "required": ["key"]
    })
}

fn render(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

pub struct StateSetTool {
    state: Arc<StateFile>,
}

impl StateSetTool {
    pub fn new(state: Arc<StateFile>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolExecutor for StateSetTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "state_set",
            "Set a key in the persistent state store. Value can be any type (string, number, boolean, array, object). Use the string 'now' to store the current timestamp.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "key": {
                        "type": "string",
                        "description": "The state name / key to set."
                    },
                    "value": {
                        "description": "The value to store. Can be any JSON type (string, number, boolean, array, object). Use the string 'now' to store the current timestamp."
                    }
                },
                "required": ["key", "value"]
            }),
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let Some(key) = key_arg(&input) else {
            return Ok(ToolOutput::error("Error: key is required."));
        };
        let mut value = input.get("value").cloned().unwrap_or(Value::Null);
        if value == "now" {
            value = Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false));
        }
        self.state.set(&key, value.clone()).await?;
        Ok(ToolOutput::ok(format!(
            "State '{key}' set to {}.",
            render(&value)
        )))
    }
}

pub struct StateGetTool {
    state: Arc<StateFile>,
}

impl StateGetTool {
    pub fn new(state: Arc<StateFile>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolExecutor for StateGetTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "state_get",
            "Get a single value from the persistent state store.",
            key_schema("The key to look up."),
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let Some(key) = key_arg(&input) else {
            return Ok(ToolOutput::error("Error: key is required."));
        };
        let state = self.state.load().await;
        Ok(match state.get(&key) {
            Some(value) => ToolOutput::ok(format!("{key}: {}", render(value))),
            None => ToolOutput::error(format!("Key '{key}' not found.")),
        })
    }
}

pub struct StateListTool {
    state: Arc<StateFile>,
}

impl StateListTool {
    pub fn new(state: Arc<StateFile>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolExecutor for StateListTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "state_list",
            "List all keys and values in the persistent state store.",
            empty_schema(),
        )
    }

    async fn execute(&self, _input: Value) -> Result<ToolOutput> {
        let state = self.state.load().await;
        if state.is_empty() {
            return Ok(ToolOutput::ok("State is empty."));
        }
        let lines: Vec<String> = state
            .iter()
            .map(|(k, v)| format!("- {k}: {}", render(v)))
            .collect();
        Ok(ToolOutput::ok(format!("State:\n{}", lines.join("\n"))))
    }
}

pub struct StateCheckTimeTool {
    state: Arc<StateFile>,
}

impl StateCheckTimeTool {
    pub fn new(state: Arc<StateFile>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolExecutor for StateCheckTimeTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "state_check_time",
            "Check how long ago a timestamp was stored for a key. Returns elapsed time in human-readable form and seconds.",
            key_schema("The key holding a timestamp value."),
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let key = str_arg(&input, "key").trim();
        if key.is_empty() {
            return Ok(ToolOutput::error("Error: key is required."));
        }
        let state = self.state.load().await;
        let Some(value) = state.get(key) else {
            return Ok(ToolOutput::error(format!("Key '{key}' not found.")));
        };
        let raw = match value {
            Value::String(s) => s.clone(),
            other => render(other),
        };
        let Some(ts) = parse_timestamp(&raw) else {
            return Ok(ToolOutput::error(format!(
                "Error: '{key}' value '{raw}' is not a valid timestamp."
            )));
        };
        let elapsed = (Utc::now() - ts).num_seconds();
        Ok(ToolOutput::ok(format!(
            "'{key}' was {} ago ({elapsed} seconds). Timestamp: {raw}",
            humanize(elapsed)
        )))
    }
}

/// ISO-8601 with or without an offset; naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// `1h 2m 3s`; zero hours and minutes are left out, seconds never are.
pub fn humanize(total_seconds: i64) -> String {
    let abs = total_seconds.unsigned_abs();
    let (hours, rest) = (abs / 3600, abs % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<StateFile>) {
        let tmp = TempDir::new().unwrap();
        let state = Arc::new(StateFile::new(tmp.path().join("state.json")));
        (tmp, state)
    }

    #[test]
    fn humanize_formats() {
        assert_eq!(humanize(0), "0s");
        assert_eq!(humanize(59), "59s");
        assert_eq!(humanize(3723), "1h 2m 3s");
        assert_eq!(humanize(3600), "1h 0s");
        assert_eq!(humanize(-61), "1m 1s");
    }

    #[test]
    fn parses_common_timestamp_shapes() {
        let expected = DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_timestamp("2025-03-01T10:00:00+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01 10:00:00"), Some(expected));
        assert!(parse_timestamp("2025-03-01").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[tokio::test]
    async fn set_now_then_check_time_is_zero() {
        let (_tmp, state) = setup();
        let out = StateSetTool::new(state.clone())
            .execute(json!({"key": "last_walk", "value": "now"}))
            .await
            .unwrap();
        assert!(out.content.starts_with("State 'last_walk' set to \""));

        let out = StateCheckTimeTool::new(state.clone())
            .execute(json!({"key": "last_walk"}))
            .await
            .unwrap();
        assert!(!out.is_error, "{}", out.content);
        let seconds: i64 = out
            .content
            .split('(')
            .nth(1)
            .and_then(|s| s.split(' ').next())
            .unwrap()
            .parse()
            .unwrap();
        assert!((0..=2).contains(&seconds), "{}", out.content);

        let stored = state.load().await;
        let raw = stored["last_walk"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(raw).is_ok());
    }

    #[tokio::test]
    async fn get_list_and_missing() {
        let (_tmp, state) = setup();
        let set = StateSetTool::new(state.clone());
        set.execute(json!({"key": "mood", "value": "happy"}))
            .await
            .unwrap();
        let out = set
            .execute(json!({"key": " count ", "value": 3}))
            .await
            .unwrap();
        assert_eq!(out.content, "State 'count' set to 3.");

        let get = StateGetTool::new(state.clone());
        assert_eq!(
            get.execute(json!({"key": "mood"})).await.unwrap().content,
            "mood: \"happy\""
        );
        assert_eq!(
            get.execute(json!({"key": "nope"})).await.unwrap().content,
            "Key 'nope' not found."
        );
        assert_eq!(
            get.execute(json!({})).await.unwrap().content,
            "Error: key is required."
        );

        let list = StateListTool::new(state.clone());
        let out = list.execute(json!({})).await.unwrap();
        assert_eq!(out.content, "State:\n- count: 3\n- mood: \"happy\"");
    }

    #[tokio::test]
    async fn check_time_rejects_non_timestamps() {
        let (_tmp, state) = setup();
        StateSetTool::new(state.clone())
            .execute(json!({"key": "mood", "value": "happy"}))
            .await
            .unwrap();
        let out = StateCheckTimeTool::new(state)
            .execute(json!({"key": "mood"}))
            .await
            .unwrap();
        assert_eq!(
            out.content,
            "Error: 'mood' value 'happy' is not a valid timestamp."
        );
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty() {
        let (tmp, state) = setup();
        std::fs::write(tmp.path().join("state.json"), "{not json").unwrap();
        let out = StateListTool::new(state).execute(json!({})).await.unwrap();
        assert_eq!(out.content, "State is empty.");
    }
}
