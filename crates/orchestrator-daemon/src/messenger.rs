//! Messenger: the agent's one communication channel back to the chat that
//! started its session. Grounded in `original_source/agent/messenger.py`'s
//! `BossMessenger`/`BackgroundTask` pair — the acknowledgment-watchdog timer
//! and `has_communicated()` guard are reproduced as-is, over a `Sender`
//! trait object instead of a bound Telegram callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::bridge::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Result,
    Acknowledgment,
    Error,
}

#[derive(Debug, Clone)]
struct MessageRecord {
    #[allow(dead_code)]
    content: String,
    #[allow(dead_code)]
    message_type: MessageType,
}

/// Communication channel for one session. The agent (worker loop, on its
/// behalf) sends results through here; the bridge's `Sender` does the
/// actual delivery.
pub struct Messenger {
    sender: Arc<dyn Sender>,
    pub chat_id: String,
    pub session_id: String,
    reply_to_msg_id: Option<i64>,
    messages_sent: Mutex<Vec<MessageRecord>>,
    acknowledgment_sent: AtomicBool,
}

impl Messenger {
    pub fn new(
        sender: Arc<dyn Sender>,
        chat_id: impl Into<String>,
        session_id: impl Into<String>,
        reply_to_msg_id: Option<i64>,
    ) -> Self {
        Self {
            sender,
            chat_id: chat_id.into(),
            session_id: session_id.into(),
            reply_to_msg_id,
            messages_sent: Mutex::new(Vec::new()),
            acknowledgment_sent: AtomicBool::new(false),
        }
    }

    /// Send a message to the chat. Empty/whitespace-only text is skipped
    /// rather than delivered as a blank message.
    pub async fn send(&self, text: &str, message_type: MessageType) -> bool {
        if text.trim().is_empty() {
            tracing::debug!(session_id = %self.session_id, "skipping empty message");
            return false;
        }
        self.sender.send(&self.chat_id, text, self.reply_to_msg_id).await;
        self.messages_sent.lock().await.push(MessageRecord {
            content: text.chars().take(200).collect(),
            message_type,
        });
        tracing::info!(
            session_id = %self.session_id,
            chat_id = %self.chat_id,
            chars = text.len(),
            ?message_type,
            "sent message to chat"
        );
        true
    }

    /// Send the one-time "I'm working on this." acknowledgment. Only sends
    /// if nothing has been sent yet at all (a result or an error also
    /// counts as having communicated).
    pub async fn send_acknowledgment(&self, text: &str) -> bool {
        let already_sent = self.acknowledgment_sent.swap(true, Ordering::SeqCst);
        if already_sent || self.has_communicated().await {
            tracing::debug!(session_id = %self.session_id, "skipping acknowledgment, already communicated");
            return false;
        }
        self.send(text, MessageType::Acknowledgment).await
    }

    pub async fn has_communicated(&self) -> bool {
        !self.messages_sent.lock().await.is_empty()
    }
}

/// Watches a background agent task and sends a one-time acknowledgment if
/// it's still running and hasn't communicated after `timeout`. Mirrors
/// `BackgroundTask._watchdog` — spawned alongside the agent task, cancelled
/// once that task completes.
pub struct AckWatchdog {
    handle: JoinHandle<()>,
}

impl AckWatchdog {
    pub fn spawn(messenger: Arc<Messenger>, timeout: Duration, ack_message: String) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !messenger.has_communicated().await {
                messenger.send_acknowledgment(&ack_message).await;
            }
        });
        Self { handle }
    }

    /// Cancel the watchdog; called once the main agent task completes so a
    /// just-finished session never gets a stray acknowledgment.
    pub fn cancel(self) {
        self.handle.abort();
    }
}
