//! Bridge-to-core callback traits (spec §6): the chat platform client is an
//! external collaborator out of scope for this repo, but the worker loop
//! needs a typed seam to call back into it. Three traits, registered per
//! project, replace the source's dynamic callback registries with
//! interfaces — no reflection, no dict-of-callables.

use std::path::Path;

use async_trait::async_trait;

/// Sends a message to a chat, optionally threaded as a reply.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, chat_id: &str, text: &str, reply_to_msg_id: Option<i64>);
}

/// Sets (or clears, with `None`) a reaction emoji on a message.
#[async_trait]
pub trait Reactor: Send + Sync {
    async fn set_reaction(&self, chat_id: &str, msg_id: i64, emoji: Option<&'static str>);
}

/// Delivers a response alongside a file attachment (e.g. the full output of
/// a response that was summarized for the chat body). Optional: a bridge
/// that can't attach files simply doesn't implement it.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond_with_files(&self, text: &str, chat_id: &str, msg_id: i64, file: Option<&Path>);
}

/// Reaction emojis the platform accepts. `❌` is explicitly excluded by the
/// platform — the error reaction is `😱` instead.
pub const VALID_REACTIONS: &[&str] = &["👀", "⏳", "👍", "🏆", "😱"];

pub const REACTION_WORKING: &str = "⏳";
pub const REACTION_SEEN: &str = "👀";
pub const REACTION_SUCCESS: &str = "🏆";
pub const REACTION_ACK: &str = "👍";
pub const REACTION_ERROR: &str = "😱";

/// Filters a caller-supplied reaction name down to a known-valid emoji, or
/// `None` if it isn't recognized. Used as the last line of defense before
/// any reaction reaches a `Reactor`.
pub fn validate_reaction(emoji: &str) -> Option<&'static str> {
    VALID_REACTIONS.iter().find(|&&valid| valid == emoji).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_reactions_validate() {
        assert_eq!(validate_reaction("🏆"), Some(REACTION_SUCCESS));
        assert_eq!(validate_reaction("😱"), Some(REACTION_ERROR));
    }

    #[test]
    fn disallowed_reaction_is_rejected() {
        assert_eq!(validate_reaction("❌"), None);
        assert_eq!(validate_reaction("🎉"), None);
    }
}
