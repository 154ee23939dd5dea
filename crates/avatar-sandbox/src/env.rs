use std::collections::BTreeMap;
use std::path::Path;

pub const SANDBOX_DIR_VAR: &str = "MCP_SANDBOX_DIR";

/// Host variables the interpreter needs; nothing else is inherited.
const INHERITED: &[&str] = &["PATH", "VIRTUAL_ENV", "LD_LIBRARY_PATH", "HOME"];

/// Minimal environment for a sandboxed server living in `server_dir`.
pub fn build_sandbox_env(server_dir: &Path) -> BTreeMap<String, String> {
    build_sandbox_env_from(server_dir, |key| std::env::var(key).ok())
}

pub fn build_sandbox_env_from(
    server_dir: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string());
    env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
    env.insert(
        SANDBOX_DIR_VAR.to_string(),
        server_dir.join("sandbox").to_string_lossy().into_owned(),
    );
    for key in INHERITED {
        if let Some(value) = lookup(key) {
            env.insert((*key).to_string(), value);
        }
    }
    env
}
