//! The conversation loop: one user turn becomes model rounds, tool calls and
//! a single reply.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use avatar_bus::{AvatarEvent, BusPublisher};
use avatar_provider::{LlmMessage, LlmProvider, LlmRequest, ToolDef};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::dispatch::ToolDispatcher;
use crate::persona::load_heartbeat_prompt;
use crate::session::{Session, SessionError, SessionMessage, SessionStore, SessionSummary};

pub const MAX_TOOL_ROUNDS: usize = 10;
pub const FALLBACK_REPLY: &str = "I'm having trouble processing that request. Please try again.";
pub const SEND_MESSAGE_TOOL: &str = "send_message";
const MESSAGE_SENT: &str = "Message sent.";

/// Tool offered only during heartbeats; calls are collected, never dispatched.
pub fn send_message_tool() -> ToolDef {
    ToolDef::new(
        SEND_MESSAGE_TOOL,
        "Send a message to the user. Only call this if you have something meaningful to say.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "The message to send to the user."}
            },
            "required": ["text"]
        }),
    )
}

pub struct ConversationEngine {
    provider: Arc<dyn LlmProvider>,
    dispatcher: Arc<ToolDispatcher>,
    publisher: BusPublisher,
    store: SessionStore,
    session: Mutex<Session>,
    soul: String,
    soul_dir: PathBuf,
    model: String,
    max_tokens: u32,
}

pub struct EngineOptions {
    pub soul: String,
    pub soul_dir: PathBuf,
    pub chats_dir: PathBuf,
    pub model: String,
    pub max_tokens: u32,
}

/// Tool-call arguments that are not an object are treated as empty.
fn object_or_empty(input: &serde_json::Value) -> serde_json::Value {
    if input.is_object() {
        input.clone()
    } else {
        serde_json::json!({})
    }
}

impl ConversationEngine {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        dispatcher: Arc<ToolDispatcher>,
        publisher: BusPublisher,
        options: EngineOptions,
    ) -> Self {
        let store = SessionStore::new(options.chats_dir);
        let session = Mutex::new(store.new_session());
        Self {
            provider,
            dispatcher,
            publisher,
            store,
            session,
            soul: options.soul,
            soul_dir: options.soul_dir,
            model: options.model,
            max_tokens: options.max_tokens,
        }
    }

    pub fn soul(&self) -> &str {
        &self.soul
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }

    /// Append to the current session and persist, under the session lock.
    async fn record(&self, messages: impl IntoIterator<Item = SessionMessage>) -> Result<()> {
        let mut session = self.session.lock().await;
        session.messages.extend(messages);
        self.store.save(&session).await
    }

    fn request(&self, messages: &[LlmMessage], tools: &[ToolDef]) -> LlmRequest {
        LlmRequest {
            model: self.model.clone(),
            system: Some(self.soul.clone()),
            messages: messages.to_vec(),
            max_tokens: self.max_tokens,
            tools: tools.to_vec(),
        }
    }

    /// Run one user turn. Model errors propagate to the caller.
    pub async fn send_message(&self, text: &str) -> Result<String> {
        let mut messages: Vec<LlmMessage> = {
            let mut session = self.session.lock().await;
            session.messages.push(SessionMessage::User {
                content: text.to_string(),
            });
            self.store.save(&session).await?;
            session
                .messages
                .iter()
                .filter_map(|m| match m {
                    SessionMessage::User { content } => Some(LlmMessage::user(content.clone())),
                    SessionMessage::Assistant { content } => {
                        Some(LlmMessage::assistant(content.clone()))
                    }
                    SessionMessage::ToolCall { .. } => None,
                })
                .collect()
        };
        let tools = self.dispatcher.all_tool_defs().await;

        for _round in 0..MAX_TOOL_ROUNDS {
            let response = self.provider.chat(self.request(&messages, &tools)).await?;

            if !response.has_tool_calls() {
                let reply = response.text.clone();
                self.record([SessionMessage::Assistant {
                    content: reply.clone(),
                }])
                .await?;
                return Ok(reply);
            }

            let assistant = response.to_message();
            messages.push(assistant.clone());
            for (id, name, input) in assistant.tool_uses() {
                let arguments = object_or_empty(input);
                info!(tool = name, %arguments, "Tool call");
                self.record([SessionMessage::ToolCall {
                    name: name.to_string(),
                    arguments: arguments.clone(),
                }])
                .await?;
                if let Err(e) = self
                    .publisher
                    .publish(AvatarEvent::ToolCall {
                        name: name.to_string(),
                        arguments: arguments.clone(),
                    })
                    .await
                {
                    warn!("failed to publish tool call: {e}");
                }
                let result = self.dispatcher.handle_tool_call(name, arguments).await;
                messages.push(LlmMessage::tool_result(id, result));
            }
        }

        warn!("tool rounds exhausted after {MAX_TOOL_ROUNDS} rounds");
        Ok(FALLBACK_REPLY.to_string())
    }

    /// A turn with no user input. Returns the texts the model chose to send,
    /// or `None` when it stayed silent or no heartbeat prompt exists.
    pub async fn heartbeat(&self) -> Option<Vec<String>> {
        let prompt = load_heartbeat_prompt(&self.soul_dir)?;

        let mut sent = Vec::new();
        if let Err(e) = self.heartbeat_rounds(&prompt, &mut sent).await {
            error!("Heartbeat error: {e:#}");
        }
        if sent.is_empty() {
            return None;
        }

        let replies = sent.iter().map(|text| SessionMessage::Assistant {
            content: text.clone(),
        });
        if let Err(e) = self.record(replies).await {
            error!("failed to persist heartbeat messages: {e:#}");
        }
        Some(sent)
    }

    async fn heartbeat_rounds(&self, prompt: &str, sent: &mut Vec<String>) -> Result<()> {
        let mut messages = vec![LlmMessage::user(prompt)];
        let mut tools = self.dispatcher.all_tool_defs().await;
        tools.push(send_message_tool());

        for _round in 0..MAX_TOOL_ROUNDS {
            let response = self.provider.chat(self.request(&messages, &tools)).await?;
            if !response.has_tool_calls() {
                break;
            }

            let assistant = response.to_message();
            messages.push(assistant.clone());
            for (id, name, input) in assistant.tool_uses() {
                let arguments = object_or_empty(input);
                let result = if name == SEND_MESSAGE_TOOL {
                    let text = arguments["text"].as_str().unwrap_or("").trim();
                    if !text.is_empty() {
                        info!(chars = text.len(), "Heartbeat send_message");
                        sent.push(text.to_string());
                    }
                    MESSAGE_SENT.to_string()
                } else {
                    info!(tool = name, %arguments, "Heartbeat tool call");
                    self.dispatcher.handle_tool_call(name, arguments).await
                };
                messages.push(LlmMessage::tool_result(id, result));
            }
        }
        Ok(())
    }

    /// Start a fresh session. The previous one stays on disk.
    pub async fn new_session(&self) -> String {
        let mut session = self.session.lock().await;
        *session = self.store.new_session();
        session.id.clone()
    }

    /// Make a stored session current and return its messages.
    pub async fn load_session(&self, id: &str) -> Result<Vec<SessionMessage>, SessionError> {
        let loaded = self.store.load_session(id).await?;
        let messages = loaded.messages.clone();
        *self.session.lock().await = loaded;
        Ok(messages)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.store.list_sessions().await
    }

    pub async fn current_session_id(&self) -> String {
        self.session.lock().await.id.clone()
    }

    pub async fn session_snapshot(&self) -> Session {
        self.session.lock().await.clone()
    }
}
