use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Bookkeeping for one AI-created server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default)]
    pub auto_start: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl ServerRecord {
    pub fn new(description: impl Into<String>, allow_network: bool, auto_start: bool) -> Self {
        let now = Utc::now();
        Self {
            description: description.into(),
            allow_network,
            auto_start,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}

/// `manifest.json` next to the server directories. Read and written whole.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    path: PathBuf,
    pub servers: BTreeMap<String, ServerRecord>,
}

impl Manifest {
    pub fn path_in(servers_dir: &Path) -> PathBuf {
        servers_dir.join(MANIFEST_FILE)
    }

    /// A missing file is an empty manifest.
    pub fn load(servers_dir: &Path) -> Result<Self> {
        let path = Self::path_in(servers_dir);
        let servers = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("invalid manifest {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        Ok(Self { path, servers })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.servers)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    pub fn get(&self, name: &str) -> Option<&ServerRecord> {
        self.servers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ServerRecord> {
        self.servers.get_mut(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, record: ServerRecord) {
        self.servers.insert(name.into(), record);
    }

    pub fn remove(&mut self, name: &str) -> Option<ServerRecord> {
        self.servers.remove(name)
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
