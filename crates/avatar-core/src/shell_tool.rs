use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use avatar_provider::ToolDef;
use tokio::process::Command;
use tracing::{info, warn};

use super::tool::{str_arg, ToolExecutor, ToolOutput};

const MAX_OUTPUT_CHARS: usize = 4000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RunCommandTool {
    workdir: Option<PathBuf>,
    timeout: Duration,
}

impl RunCommandTool {
    pub fn new(workdir: Option<PathBuf>) -> Self {
        Self {
            workdir,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Kill the whole process group so grandchildren die with the shell.
#[cfg(unix)]
fn kill_group(pid: u32) {
    // SAFETY: plain syscall; the child was spawned as leader of group `pid`.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        warn!(pid, "killpg failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

fn truncate_output(output: &str) -> String {
    match output.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((cut, _)) => format!("{}\n... (truncated)", &output[..cut]),
        None => output.to_string(),
    }
}

#[async_trait]
impl ToolExecutor for RunCommandTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "run_command",
            "Execute a bash command on the server and return its output.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The bash command to execute."
                    }
                },
                "required": ["command"]
            }),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let command = str_arg(&input, "command").trim();
        if command.is_empty() {
            return Ok(ToolOutput::error("Error: command is required."));
        }
        info!(command, "run_command");

        // stderr is folded into the same pipe as stdout.
        let script = format!("exec 2>&1\n{command}");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return Ok(ToolOutput::error(format!("Error running command: {e}"))),
        };
        let pid = child.id();

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let text = String::from_utf8_lossy(&output.stdout);
                let text = text.trim();
                if text.is_empty() {
                    return Ok(ToolOutput::ok(format!(
                        "Command exited with code {} (no output).",
                        exit_code(output.status)
                    )));
                }
                Ok(ToolOutput::ok(truncate_output(text)))
            }
            Ok(Err(e)) => Ok(ToolOutput::error(format!("Error running command: {e}"))),
            Err(_) => {
                if let Some(pid) = pid {
                    kill_group(pid);
                }
                warn!(command, "run_command timed out");
                Ok(ToolOutput::error(format!(
                    "Error: command timed out after {} seconds.",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

/// Death by signal `n` reads as `-n`.
fn exit_code(status: std::process::ExitStatus) -> String {
    if let Some(code) = status.code() {
        return code.to_string();
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("-{signal}");
        }
    }
    "None".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn echo_command() {
        let tool = RunCommandTool::new(None);
        let result = tool
            .execute(serde_json::json!({"command": "echo hello"}))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, "hello");
    }

    #[tokio::test]
    async fn stderr_is_merged() {
        let tool = RunCommandTool::new(None);
        let result = tool
            .execute(serde_json::json!({"command": "echo out; echo err >&2"}))
            .await
            .unwrap();
        assert_eq!(result.content, "out\nerr");
    }

    #[tokio::test]
    async fn silent_failure_reports_exit_code() {
        let tool = RunCommandTool::new(None);
        let result = tool
            .execute(serde_json::json!({"command": "exit 3"}))
            .await
            .unwrap();
        assert_eq!(result.content, "Command exited with code 3 (no output).");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn killed_by_signal_reports_negative_code() {
        let tool = RunCommandTool::new(None);
        let result = tool
            .execute(serde_json::json!({"command": "kill -9 $$"}))
            .await
            .unwrap();
        assert_eq!(result.content, "Command exited with code -9 (no output).");
    }

    #[tokio::test]
    async fn long_output_is_truncated() {
        let tool = RunCommandTool::new(None);
        let result = tool
            .execute(serde_json::json!({"command": "i=0; while [ $i -lt 1000 ]; do printf 'abcdefgh'; i=$((i+1)); done"}))
            .await
            .unwrap();
        assert!(result.content.ends_with("\n... (truncated)"));
        assert_eq!(
            result.content.chars().count(),
            MAX_OUTPUT_CHARS + "\n... (truncated)".len()
        );
    }

    #[tokio::test]
    async fn runs_in_workdir() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "found").unwrap();
        let tool = RunCommandTool::new(Some(tmp.path().to_path_buf()));
        let result = tool
            .execute(serde_json::json!({"command": "cat marker.txt"}))
            .await
            .unwrap();
        assert_eq!(result.content, "found");
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let tool = RunCommandTool::new(None);
        let result = tool
            .execute(serde_json::json!({"command": "   "}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.content, "Error: command is required.");
    }

    #[test]
    fn default_timeout_is_thirty_seconds() {
        assert_eq!(RunCommandTool::new(None).timeout, Duration::from_secs(30));
    }

    #[cfg(target_os = "linux")]
    fn is_dead(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            // Field 3 is the state; a zombie has already exited.
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .is_some_and(|state| state == "Z" || state == "X"),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_the_process_group() {
        let tmp = TempDir::new().unwrap();
        let pidfile = tmp.path().join("sleeper.pid");
        let tool = RunCommandTool::new(Some(tmp.path().to_path_buf()))
            .with_timeout(Duration::from_secs(1));

        let started = std::time::Instant::now();
        let result = tool
            .execute(serde_json::json!({"command": "sleep 60 & echo $! > sleeper.pid; wait"}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.content, "Error: command timed out after 1 seconds.");
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid: u32 = std::fs::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut dead = false;
        for _ in 0..40 {
            if is_dead(pid) {
                dead = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(dead, "background sleep {pid} survived the timeout");
    }
}
