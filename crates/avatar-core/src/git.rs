use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, warn};

const GIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Stage everything under `state_dir` and commit. Failures are only logged.
pub async fn git_commit(state_dir: &Path, message: &str) {
    match try_commit(state_dir, message).await {
        Ok(()) => debug!(message, "state committed"),
        Err(e) => warn!("Git commit failed in state dir: {e:#}"),
    }
}

async fn try_commit(state_dir: &Path, message: &str) -> Result<()> {
    run_git(state_dir, &["add", "-A"]).await?;
    run_git(state_dir, &["commit", "-m", message, "--allow-empty"]).await
}

async fn run_git(cwd: &Path, args: &[&str]) -> Result<()> {
    let child = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to run git")?;

    let output = tokio::time::timeout(GIT_TIMEOUT, child.wait_with_output())
        .await
        .with_context(|| format!("git {} timed out", args[0]))??;
    if !output.status.success() {
        bail!(
            "git {} exited with {}: {}",
            args[0],
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
