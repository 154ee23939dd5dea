use std::path::Path;

use anyhow::{Context, Result};

pub const DEFAULT_SOUL: &str = "You are a helpful assistant.";
pub const HEARTBEAT_FILE: &str = "heartbeat.md";

/// Concatenate every `*.md` fragment in `soul_dir` by name, skipping the
/// heartbeat prompt. Falls back to [`DEFAULT_SOUL`].
pub fn load_soul(soul_dir: &Path) -> Result<String> {
    let entries = match std::fs::read_dir(soul_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(DEFAULT_SOUL.to_string())
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", soul_dir.display()))
        }
    };

    let mut paths: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
        .filter(|p| p.file_name().is_some_and(|n| n != HEARTBEAT_FILE))
        .collect();
    paths.sort();

    let mut parts = Vec::with_capacity(paths.len());
    for path in &paths {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        parts.push(text.trim().to_string());
    }
    if parts.is_empty() {
        return Ok(DEFAULT_SOUL.to_string());
    }
    Ok(parts.join("\n\n"))
}

/// The heartbeat prompt, or `None` if it is missing or blank.
pub fn load_heartbeat_prompt(soul_dir: &Path) -> Option<String> {
    let text = std::fs::read_to_string(soul_dir.join(HEARTBEAT_FILE)).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fragments_sorted_and_heartbeat_excluded() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b_style.md"), "Be brief.\n").unwrap();
        std::fs::write(tmp.path().join("a_identity.md"), "  You are Mika.  ").unwrap();
        std::fs::write(tmp.path().join("heartbeat.md"), "Check in.").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(load_soul(tmp.path()).unwrap(), "You are Mika.\n\nBe brief.");
        assert_eq!(load_heartbeat_prompt(tmp.path()).as_deref(), Some("Check in."));
    }

    #[test]
    fn defaults_when_empty() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(load_soul(&tmp.path().join("missing")).unwrap(), DEFAULT_SOUL);
        std::fs::write(tmp.path().join("heartbeat.md"), "  \n").unwrap();
        assert_eq!(load_soul(tmp.path()).unwrap(), DEFAULT_SOUL);
        assert_eq!(load_heartbeat_prompt(tmp.path()), None);
    }
}
