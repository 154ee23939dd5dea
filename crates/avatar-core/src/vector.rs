//! Semantic store: Ollama embeddings kept in SQLite, ranked by cosine distance.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{error, info};

use crate::config::VectorSearchConfig;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn model_id(&self) -> &str;
}

#[derive(Clone)]
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let endpoint = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("ollama embed failed ({status}): {body}");
        }
        let parsed: EmbedResponse = resp.json().await?;
        if parsed.embeddings.len() != texts.len() {
            bail!(
                "ollama returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            );
        }
        Ok(parsed.embeddings)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub distance: f32,
}

/// One collection, stored as one table.
#[derive(Clone)]
pub struct VectorStore {
    db: Arc<Mutex<Connection>>,
    table: String,
}

fn table_name(collection: &str) -> String {
    let clean: String = collection
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("vec_{clean}")
}

impl VectorStore {
    pub fn open(path: &Path, collection: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?, collection)
    }

    pub fn open_in_memory(collection: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, collection)
    }

    fn with_connection(conn: Connection, collection: &str) -> Result<Self> {
        let table = table_name(collection);
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{{}}',
                embedding TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#
        ))?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            table,
        })
    }

    pub async fn upsert(
        &self,
        id: &str,
        content: &str,
        metadata: &serde_json::Map<String, serde_json::Value>,
        embedding: &[f32],
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        let sql = format!(
            "INSERT INTO {} (id, content, metadata, embedding, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                metadata = excluded.metadata,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at",
            self.table
        );
        let id = id.to_string();
        let content = content.to_string();
        let metadata = serde_json::to_string(metadata)?;
        let embedding = serde_json::to_string(embedding)?;
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                &sql,
                params![id, content, metadata, embedding, Utc::now().to_rfc3339()],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.table);
        let id = id.to_string();
        let removed = task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            Ok::<usize, anyhow::Error>(conn.execute(&sql, params![id])?)
        })
        .await??;
        Ok(removed > 0)
    }

    pub async fn ids(&self) -> Result<Vec<String>> {
        let db = Arc::clone(&self.db);
        let sql = format!("SELECT id FROM {} ORDER BY id", self.table);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(&sql)?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<Vec<String>, anyhow::Error>(ids)
        })
        .await?
    }

    pub async fn count(&self) -> Result<usize> {
        let db = Arc::clone(&self.db);
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok::<usize, anyhow::Error>(n as usize)
        })
        .await?
    }

    pub async fn get(&self, id: &str) -> Result<Option<String>> {
        let db = Arc::clone(&self.db);
        let sql = format!("SELECT content FROM {} WHERE id = ?1", self.table);
        let id = id.to_string();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let content = conn
                .query_row(&sql, params![id], |row| row.get::<_, String>(0))
                .optional()?;
            Ok::<Option<String>, anyhow::Error>(content)
        })
        .await?
    }

    /// Nearest `limit` entries to `query`, closest first.
    pub async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        let db = Arc::clone(&self.db);
        let sql = format!("SELECT id, content, metadata, embedding FROM {}", self.table);
        let query = query.to_vec();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;

            let mut hits = Vec::new();
            for row in rows {
                let (id, content, metadata, embedding) = row?;
                let embedding: Vec<f32> = serde_json::from_str(&embedding)?;
                let metadata = match serde_json::from_str(&metadata)? {
                    serde_json::Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                hits.push(VectorHit {
                    id,
                    content,
                    metadata,
                    distance: cosine_distance(&query, &embedding),
                });
            }
            hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            hits.truncate(limit);
            Ok::<Vec<VectorHit>, anyhow::Error>(hits)
        })
        .await?
    }
}

/// `1 - cosine similarity`; mismatched or zero vectors are maximally far.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 2.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 2.0;
    }

    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    1.0 - similarity
}

/// Store plus the embedder that feeds it.
pub struct VectorIndex {
    store: VectorStore,
    embedder: Arc<dyn Embedder>,
}

impl VectorIndex {
    pub fn new(store: VectorStore, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedder returned no vector"))
    }

    pub async fn save(
        &self,
        id: &str,
        content: &str,
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let embedding = self.embed_one(content).await?;
        self.store.upsert(id, content, metadata, &embedding).await
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<VectorHit>> {
        let embedding = self.embed_one(query).await?;
        self.store.search(&embedding, limit).await
    }
}

/// Open the configured collection. `None` when disabled or on failure.
pub async fn init_vector_search(
    config: &VectorSearchConfig,
    db_path: &Path,
) -> Option<Arc<VectorIndex>> {
    if !config.enabled {
        return None;
    }
    let store = match VectorStore::open(db_path, &config.collection) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialize vector search: {e:#}");
            return None;
        }
    };
    let entries = store.count().await.unwrap_or(0);
    info!(
        collection = %config.collection,
        model = %config.model,
        entries,
        "Vector search initialized"
    );
    let embedder = Arc::new(OllamaEmbedder::new(&config.ollama_url, &config.model));
    Some(Arc::new(VectorIndex::new(store, embedder)))
}
