use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use avatar_bus::{AvatarEvent, EventBus};
use avatar_core::{provider_from_config, AppContext, AvatarConfig, SessionStore};
use avatar_sandbox::validate_code;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "avatar", version, about = "Avatar assistant core")]
struct Cli {
    #[arg(long, help = "Root directory holding config.yaml, state/ and assets/ (default ~/.avatar)")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Local REPL against the configured model")]
    Chat,
    #[command(about = "Run the sandbox validator over an MCP server source file")]
    ValidateCode {
        #[arg(help = "Python source file")]
        file: PathBuf,
        #[arg(long, help = "Also allow network modules")]
        allow_network: bool,
    },
    #[command(about = "List stored chat sessions")]
    Sessions,
    #[command(about = "Load config and print the effective values")]
    CheckConfig,
}

fn default_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".avatar")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = cli.root.clone().unwrap_or_else(default_root);

    let log_dir = root.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "avatar.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    match cli.command {
        Commands::Chat => run_repl(&root).await,
        Commands::ValidateCode {
            file,
            allow_network,
        } => validate_file(&file, allow_network),
        Commands::Sessions => list_sessions(&root).await,
        Commands::CheckConfig => check_config(&root),
    }
}

fn validate_file(file: &Path, allow_network: bool) -> Result<()> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    match validate_code(&code, allow_network) {
        Ok(()) => {
            println!("OK: {} passes validation", file.display());
            Ok(())
        }
        Err(e) => {
            println!("Code validation failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn list_sessions(root: &Path) -> Result<()> {
    let config = AvatarConfig::load(root)?;
    let store = SessionStore::new(config.paths(root).chats_dir());
    let sessions = store.list_sessions().await?;
    if sessions.is_empty() {
        println!("No chat sessions.");
        return Ok(());
    }
    for s in sessions {
        println!("{}  {}  ({} messages)", s.id, s.title, s.message_count);
    }
    Ok(())
}

fn check_config(root: &Path) -> Result<()> {
    let config = AvatarConfig::load(root)?;
    let paths = config.paths(root);
    println!("{}", serde_yaml::to_string(&config)?);
    println!("state_dir: {}", paths.state_dir.display());
    println!("assets_dir: {}", paths.assets_dir.display());
    println!(
        "web_search: {}",
        if config.builtin_tools.web_search.brave_api_key().is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );
    Ok(())
}

async fn run_repl(root: &Path) -> Result<()> {
    let config = AvatarConfig::load(root)?;
    let provider = provider_from_config(&config);
    let bus = EventBus::default();
    let mut events = bus.subscribe_all().await;
    let app = AppContext::start(root, config, provider, bus).await?;
    let session = app.engine.current_session_id().await;
    info!(root = %root.display(), %session, "avatar started");

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                AvatarEvent::Chat { content } => println!("\n[heartbeat] {content}"),
                AvatarEvent::ToolCall { name, arguments } => println!("  [tool] {name}({arguments})"),
                AvatarEvent::Play { animation } => println!("  [play] {animation}"),
                AvatarEvent::Background { name } => println!("  [background] {name}"),
                AvatarEvent::Heartbeat { .. } => {}
            }
        }
    });

    println!("avatar REPL. Commands: /new, /sessions, /load <id>, quit");
    println!("---");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input == "quit" || input == "exit" {
            break;
        }
        if input.is_empty() {
            continue;
        }

        if input == "/new" {
            let id = app.engine.new_session().await;
            println!("Started session {id}");
            continue;
        }
        if input == "/sessions" {
            match app.engine.list_sessions().await {
                Ok(sessions) => {
                    for s in sessions {
                        println!("{}  {}  ({} messages)", s.id, s.title, s.message_count);
                    }
                }
                Err(e) => eprintln!("Error: {e:#}"),
            }
            continue;
        }
        if let Some(id) = input.strip_prefix("/load ") {
            match app.engine.load_session(id.trim()).await {
                Ok(messages) => println!("Loaded {} messages.", messages.len()),
                Err(e) => eprintln!("{e}"),
            }
            continue;
        }

        match app.chat(input).await {
            Ok(reply) => println!("{reply}"),
            Err(e) => eprintln!("Error: {e:#}"),
        }
    }

    app.shutdown().await;
    printer.abort();
    info!("avatar stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_validate_code() {
        let cli = Cli::try_parse_from(["avatar", "validate-code", "server.py", "--allow-network"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::ValidateCode { allow_network: true, .. }
        ));
    }

    #[test]
    fn parses_root_and_chat() {
        let cli = Cli::try_parse_from(["avatar", "--root", "/tmp/x", "chat"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(cli.command, Commands::Chat));
    }

    #[test]
    fn default_root_ends_with_dot_avatar() {
        assert!(default_root().ends_with(".avatar"));
    }

    #[tokio::test]
    async fn sessions_on_empty_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        list_sessions(tmp.path()).await.unwrap();
    }
}
