//! Chat sessions persisted as one pretty-printed JSON file each under
//! `<state>/chats/<id>.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

const ID_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";
const TITLE_FORMAT: &str = "%b %d, %Y %H:%M";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum SessionMessage {
    User {
        content: String,
    },
    Assistant {
        content: String,
    },
    /// Audit record of a dispatched tool call; never replayed to the model.
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
}

impl SessionMessage {
    pub fn is_audit(&self) -> bool {
        matches!(self, SessionMessage::ToolCall { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
}

impl Session {
    pub fn started(now: DateTime<Utc>) -> Self {
        let id = now.format(ID_FORMAT).to_string();
        Self {
            started_at: started_at_from_id(&id),
            title: now.format(TITLE_FORMAT).to_string(),
            id,
            messages: Vec::new(),
        }
    }
}

/// `2025-01-02T03-04-05` becomes `2025-01-02T03:04:05+00:00`. Ids that do not
/// look like that are returned unchanged.
fn started_at_from_id(id: &str) -> String {
    match id.split_once('T') {
        Some((date, time)) => format!("{date}T{}+00:00", time.replace('-', ":")),
        None => id.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub started_at: String,
    pub message_count: usize,
}

#[derive(Deserialize)]
struct SummaryFile {
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    started_at: String,
    #[serde(default)]
    messages: Vec<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Chat session '{0}' not found.")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn new_session(&self) -> Session {
        Session::started(Utc::now())
    }

    /// Write the session. A session without messages is not written.
    pub async fn save(&self, session: &Session) -> Result<()> {
        if session.messages.is_empty() {
            return Ok(());
        }
        let raw = serde_json::to_string_pretty(session)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path_for(&session.id);
        tokio::fs::write(&path, raw)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(session = %session.id, messages = session.messages.len(), "session saved");
        Ok(())
    }

    /// Newest first. Unreadable files are skipped.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.dir.display()))
            }
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        paths.reverse();

        let mut sessions = Vec::with_capacity(paths.len());
        for path in paths {
            let Ok(raw) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let Ok(file) = serde_json::from_str::<SummaryFile>(&raw) else {
                continue;
            };
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            sessions.push(SessionSummary {
                id: file.id.unwrap_or(stem),
                title: file.title,
                started_at: file.started_at,
                message_count: file.messages.len(),
            });
        }
        Ok(sessions)
    }

    /// Only the last path component of `id` is used.
    pub async fn load_session(&self, id: &str) -> Result<Session, SessionError> {
        let safe_id = Path::new(id)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let path = self.path_for(safe_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(id.to_string()))
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to read {}", path.display()))
                    .into())
            }
        };
        let mut session: Session = serde_json::from_str(&raw)
            .with_context(|| format!("invalid session file {}", path.display()))?;
        session.id = safe_id.to_string();
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn ids_and_titles() {
        let now = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 1).unwrap();
        let session = Session::started(now);
        assert_eq!(session.id, "2025-03-07T09-05-01");
        assert_eq!(session.title, "Mar 07, 2025 09:05");
        assert_eq!(session.started_at, "2025-03-07T09:05:01+00:00");
    }

    #[tokio::test]
    async fn empty_session_is_not_written() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().join("chats"));
        store.save(&store.new_session()).await.unwrap();
        assert!(store.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_list_load() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().join("chats"));

        let mut older = Session::started(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        older.messages.push(SessionMessage::User {
            content: "hi".into(),
        });
        store.save(&older).await.unwrap();

        let mut newer = Session::started(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
        newer.messages.extend([
            SessionMessage::User {
                content: "wave please".into(),
            },
            SessionMessage::ToolCall {
                name: "play_animation".into(),
                arguments: serde_json::json!({"name": "wave"}),
            },
            SessionMessage::Assistant {
                content: "Done!".into(),
            },
        ]);
        store.save(&newer).await.unwrap();
        std::fs::write(store.dir().join("broken.json"), "{not json").unwrap();

        let listed = store.list_sessions().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "2025-02-01T00-00-00");
        assert_eq!(listed[0].message_count, 3);
        assert_eq!(listed[1].title, "Jan 01, 2025 00:00");

        let raw = std::fs::read_to_string(store.dir().join("2025-02-01T00-00-00.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["messages"][1]["role"], "tool_call");
        assert_eq!(json["messages"][1]["arguments"]["name"], "wave");

        let loaded = store.load_session("../../2025-02-01T00-00-00").await.unwrap();
        assert_eq!(loaded, newer);
    }

    #[tokio::test]
    async fn missing_session() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path());
        let err = store.load_session("nope").await.unwrap_err();
        assert_eq!(err.to_string(), "Chat session 'nope' not found.");
    }
}
