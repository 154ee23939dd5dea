use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use avatar_bus::EventBus;
use avatar_core::*;
use avatar_provider::{LlmProvider, LlmRequest, LlmResponse};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Parrot;

#[async_trait]
impl LlmProvider for Parrot {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let last = request.messages.last().map(|m| m.text()).unwrap_or_default();
        Ok(LlmResponse::text(format!("you said: {last}")))
    }
}

#[tokio::test]
async fn start_chat_shutdown() {
    let root = TempDir::new().unwrap();
    std::fs::create_dir_all(root.path().join("assets/anims")).unwrap();
    std::fs::write(root.path().join("assets/anims/wave.fbx"), b"").unwrap();
    std::fs::create_dir_all(root.path().join("state/soul")).unwrap();
    std::fs::write(root.path().join("state/soul/identity.md"), "You are Mika.").unwrap();

    let mut config = AvatarConfig::default();
    config.heartbeat.enabled = true;
    config.heartbeat.interval_secs = 3600;

    let app = AppContext::start(root.path(), config, Arc::new(Parrot), EventBus::default())
        .await
        .unwrap();
    assert_eq!(app.engine.soul(), "You are Mika.");
    assert!(app.engine.dispatcher().registry().contains("play_animation"));
    assert_eq!(
        app.engine
            .dispatcher()
            .handle_tool_call("get_animations", serde_json::json!({}))
            .await,
        "Available animations: wave"
    );

    let reply = app.chat("hi").await.unwrap();
    assert_eq!(reply, "you said: hi");
    assert!(root.path().join("state/chats").is_dir());

    // Must return promptly even though the heartbeat interval is an hour.
    tokio::time::timeout(std::time::Duration::from_secs(5), app.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn configured_provider_talks_openai() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{
                "message": {"role": "assistant", "content": "hello from the model"},
                "finish_reason": "stop"
            }]
        })))
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let mut config = AvatarConfig::default();
    config.llm.base_url = format!("{}/v1", server.uri());
    config.llm.request_timeout_secs = Some(10);
    let provider = provider_from_config(&config);

    let app = AppContext::start(root.path(), config, provider, EventBus::default())
        .await
        .unwrap();
    assert_eq!(app.chat("hello").await.unwrap(), "hello from the model");
    app.shutdown().await;
}
