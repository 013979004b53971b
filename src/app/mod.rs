//! Per-invocation orchestration: runs one agent turn in the background and
//! streams its progress back to the caller.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_stream::stream;
use futures_util::FutureExt;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::agent::Agent;
use crate::auth::{AuthUrlHandler, RelayAuthUrlHandler};
use crate::relay::{self, RelaySender};
use crate::tools::DependencyMap;

pub const BEGIN_MARKER: &str = "Begin agent execution";
pub const MISSING_PROMPT_GUIDANCE: &str =
    "No prompt found in input, please guide customer to create a json payload with prompt key";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

/// Final answer of a turn, shaped like a chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: Vec<TextContent>,
}

impl AssistantMessage {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: vec![TextContent { text: text.into() }],
        }
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One element of an invocation stream. Serializes as a bare string or as
/// the message object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamItem {
    Status(String),
    Message(AssistantMessage),
}

impl From<String> for StreamItem {
    fn from(status: String) -> Self {
        StreamItem::Status(status)
    }
}

pub type InvocationStream = BoxStream<'static, StreamItem>;

/// Reads `prompt` from an invocation payload.
///
/// A missing or non-string prompt is replaced by guidance text so the model
/// can tell the caller how to form the request.
pub fn prompt_from_payload(payload: &Value) -> String {
    payload
        .get("prompt")
        .and_then(Value::as_str)
        .unwrap_or(MISSING_PROMPT_GUIDANCE)
        .to_string()
}

/// Serves invocations against a single agent. Turns run one at a time and
/// share the agent's conversation history.
#[derive(Clone)]
pub struct AgentApp {
    agent: Arc<Mutex<Agent>>,
}

impl AgentApp {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent: Arc::new(Mutex::new(agent)),
        }
    }

    /// Starts a turn for `payload` and returns its output stream.
    ///
    /// The turn runs on a spawned task, so this must be called from within a
    /// tokio runtime. The stream yields the start marker, any authorization
    /// URLs, then the final message or an `Error: ...` line, and ends after
    /// the task has completed.
    pub fn invoke(&self, payload: &Value) -> InvocationStream {
        let prompt = prompt_from_payload(payload);
        let (relay, mut receiver) = relay::channel::<StreamItem>();
        let task = tokio::spawn(agent_task(self.agent.clone(), prompt, relay));

        Box::pin(stream! {
            while let Some(item) = receiver.recv().await {
                yield item;
            }
            if let Err(err) = task.await {
                tracing::error!(error = %err, "agent task did not complete");
            }
        })
    }
}

async fn agent_task(agent: Arc<Mutex<Agent>>, prompt: String, relay: RelaySender<StreamItem>) {
    let _finish = relay.finish_on_drop();
    send(&relay, StreamItem::Status(BEGIN_MARKER.to_string()));

    let turn_dependencies = DependencyMap::new();
    turn_dependencies
        .insert::<Arc<dyn AuthUrlHandler>>(Arc::new(RelayAuthUrlHandler::new(relay.clone())));

    let mut agent = agent.lock().await;
    let checkpoint = agent.messages_len();
    let outcome = AssertUnwindSafe(agent.query_with(prompt, turn_dependencies))
        .catch_unwind()
        .await;
    if !matches!(outcome, Ok(Ok(_))) {
        // A failed turn can leave a tool call without its result.
        agent.truncate_history(checkpoint);
    }
    drop(agent);

    let last = match outcome {
        Ok(Ok(response)) => StreamItem::Message(AssistantMessage::from_text(response)),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "agent turn failed");
            StreamItem::Status(format!("Error: {err}"))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(%message, "agent turn panicked");
            StreamItem::Status(format!("Error: {message}"))
        }
    };
    send(&relay, last);
}

fn send(relay: &RelaySender<StreamItem>, item: StreamItem) {
    if let Err(err) = relay.put(item) {
        tracing::debug!(%err, "stream item dropped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "agent task panicked".to_string()
    }
}
