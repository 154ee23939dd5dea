use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use avatar_mcp::StaticServerConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.yaml";
const DEFAULT_PYTHON: &str = "python3";

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "http://localhost:1234/v1".to_string()
}

fn default_api_key() -> String {
    "unused".to_string()
}

fn default_model() -> String {
    "default".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_interval() -> u64 {
    600
}

fn default_idle_threshold() -> u64 {
    1200
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_collection() -> String {
    "memories".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Unset means no timeout on model calls.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: default_api_key(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval", alias = "interval")]
    pub interval_secs: u64,
    #[serde(default = "default_idle_threshold", alias = "idle_threshold")]
    pub idle_threshold_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval(),
            idle_threshold_secs: default_idle_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BashConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BraveConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "WebSearchRaw")]
pub struct WebSearchConfig {
    pub enabled: bool,
    pub brave: BraveConfig,
}

/// Older configs used a bare boolean for `web_search`.
#[derive(Deserialize)]
#[serde(untagged)]
enum WebSearchRaw {
    Flag(bool),
    Full {
        #[serde(default)]
        enabled: bool,
        #[serde(default)]
        brave: BraveConfig,
    },
}

impl From<WebSearchRaw> for WebSearchConfig {
    fn from(raw: WebSearchRaw) -> Self {
        match raw {
            WebSearchRaw::Flag(enabled) => Self {
                enabled,
                brave: BraveConfig::default(),
            },
            WebSearchRaw::Full { enabled, brave } => Self { enabled, brave },
        }
    }
}

impl WebSearchConfig {
    /// The key is only usable when both switches are on and it is non-empty.
    pub fn brave_api_key(&self) -> Option<&str> {
        if !self.enabled || !self.brave.enabled {
            return None;
        }
        self.brave.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSearchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for VectorSearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ollama_url: default_ollama_url(),
            model: default_embed_model(),
            collection: default_collection(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinToolsConfig {
    #[serde(default = "default_true")]
    pub animation: bool,
    #[serde(default = "default_true")]
    pub memory: bool,
    #[serde(default)]
    pub memory_readonly: bool,
    #[serde(default = "default_true")]
    pub state: bool,
    #[serde(default = "default_true")]
    pub bash: bool,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub vector_search: VectorSearchConfig,
    #[serde(default)]
    pub mcp_servers: bool,
    #[serde(default)]
    pub mcp_servers_allow_network: bool,
}

impl Default for BuiltinToolsConfig {
    fn default() -> Self {
        Self {
            animation: true,
            memory: true,
            memory_readonly: false,
            state: true,
            bash: true,
            web_search: WebSearchConfig::default(),
            vector_search: VectorSearchConfig::default(),
            mcp_servers: false,
            mcp_servers_allow_network: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvatarConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub bash: BashConfig,
    #[serde(default)]
    pub builtin_tools: BuiltinToolsConfig,
    #[serde(default, alias = "mcpServers")]
    pub mcp_servers: BTreeMap<String, StaticServerConfig>,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub assets_dir: Option<PathBuf>,
    /// Interpreter for AI-created servers.
    #[serde(default)]
    pub python: Option<String>,
}

impl AvatarConfig {
    /// Load `<root>/config.yaml`, falling back to `config.json`, then defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let yaml = root.join(CONFIG_FILE);
        if yaml.exists() {
            return Self::from_file(&yaml);
        }
        let json = root.join("config.json");
        if json.exists() {
            return Self::from_file(&json);
        }
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid config {}", path.display()))?
        } else {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("invalid config {}", path.display()))?
        };
        Ok(config)
    }

    pub fn python(&self) -> &str {
        self.python.as_deref().unwrap_or(DEFAULT_PYTHON)
    }

    /// Resolved directories, relative paths taken from `root`.
    pub fn paths(&self, root: &Path) -> Paths {
        let resolve = |p: &Option<PathBuf>, default: &str| match p {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => root.join(p),
            None => root.join(default),
        };
        Paths::new(resolve(&self.state_dir, "state"), resolve(&self.assets_dir, "assets"))
    }
}

/// Every on-disk location the core touches.
#[derive(Debug, Clone)]
pub struct Paths {
    pub state_dir: PathBuf,
    pub assets_dir: PathBuf,
}

impl Paths {
    pub fn new(state_dir: impl Into<PathBuf>, assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            assets_dir: assets_dir.into(),
        }
    }

    pub fn memories_dir(&self) -> PathBuf {
        self.state_dir.join("memories")
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    pub fn chats_dir(&self) -> PathBuf {
        self.state_dir.join("chats")
    }

    pub fn soul_dir(&self) -> PathBuf {
        self.state_dir.join("soul")
    }

    pub fn mcp_servers_dir(&self) -> PathBuf {
        self.state_dir.join("mcp_servers")
    }

    pub fn vector_db(&self) -> PathBuf {
        self.state_dir.join("vectors.db")
    }

    pub fn anims_dir(&self) -> PathBuf {
        self.assets_dir.join("anims")
    }

    pub fn backgrounds_dir(&self) -> PathBuf {
        self.assets_dir.join("backgrounds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config: AvatarConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.llm.base_url, "http://localhost:1234/v1");
        assert_eq!(config.llm.api_key, "unused");
        assert_eq!(config.llm.max_tokens, 2048);
        assert!(config.llm.request_timeout_secs.is_none());
        assert!(!config.heartbeat.enabled);
        assert_eq!(config.heartbeat.interval_secs, 600);
        assert_eq!(config.heartbeat.idle_threshold_secs, 1200);
        assert!(config.builtin_tools.animation);
        assert!(config.builtin_tools.bash);
        assert!(!config.bash.enabled);
        assert!(!config.builtin_tools.mcp_servers);
        assert_eq!(config.python(), "python3");
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AvatarConfig::load(dir.path()).unwrap();
        assert_eq!(config.llm.model, "default");
    }

    #[test]
    fn brave_key_needs_both_switches() {
        let yaml = r#"
builtin_tools:
  web_search:
    enabled: true
    brave:
      enabled: false
      api_key: "k"
"#;
        let config: AvatarConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.builtin_tools.web_search.brave_api_key(), None);

        let yaml = yaml.replace("enabled: false", "enabled: true");
        let config: AvatarConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.builtin_tools.web_search.brave_api_key(), Some("k"));
    }

    #[test]
    fn web_search_accepts_bare_bool() {
        let config: AvatarConfig =
            serde_yaml::from_str("builtin_tools:\n  web_search: true\n").unwrap();
        assert!(config.builtin_tools.web_search.enabled);
        assert_eq!(config.builtin_tools.web_search.brave_api_key(), None);
    }

    #[test]
    fn json_config_with_camel_case_servers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"heartbeat": {"enabled": true, "interval": 30, "idle_threshold": 60},
                "mcpServers": {"fs": {"command": "npx", "args": ["-y", "server-fs"]}}}"#,
        )
        .unwrap();
        let config = AvatarConfig::load(dir.path()).unwrap();
        assert_eq!(config.heartbeat.interval_secs, 30);
        assert_eq!(config.heartbeat.idle_threshold_secs, 60);
        assert_eq!(config.mcp_servers["fs"].args, ["-y", "server-fs"]);
    }

    #[test]
    fn relative_dirs_resolve_against_root() {
        let config: AvatarConfig =
            serde_yaml::from_str("state_dir: data\nassets_dir: /opt/assets\n").unwrap();
        let paths = config.paths(Path::new("/home/me/.avatar"));
        assert_eq!(paths.state_dir, Path::new("/home/me/.avatar/data"));
        assert_eq!(paths.anims_dir(), Path::new("/opt/assets/anims"));
        assert_eq!(
            paths.mcp_servers_dir(),
            Path::new("/home/me/.avatar/data/mcp_servers")
        );
    }
}
