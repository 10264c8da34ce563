//! History backfill and live-stream reconciliation
//!
//! On entering a channel the client requests a bounded backfill window
//! and merges it with any messages that arrive concurrently, producing
//! one gap-free, duplicate-free, chronologically ordered list.

use std::collections::HashSet;

use crate::protocol::messages::{ChatMessage, MessageId, ReactionEntry};

/// The client's projection of a channel's message stream
///
/// Live messages that arrive before the sync response completes are
/// buffered, not dropped, and appended after the backfill is adopted;
/// de-duplication by id makes re-delivery invisible.
#[derive(Debug, Default)]
pub struct MessageList {
    /// Visible messages in ascending id order
    messages: Vec<ChatMessage>,
    /// Ids of every visible message
    ids: HashSet<MessageId>,
    /// Live arrivals buffered until the backfill is adopted
    pending: Vec<ChatMessage>,
    /// Whether the backfill has been adopted
    synced: bool,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the backfill has been adopted
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Apply a live broadcast
    ///
    /// Returns true when the message became visible; false when it was
    /// buffered for the pending merge or dropped as a duplicate.
    pub fn apply_live(&mut self, message: ChatMessage) -> bool {
        if !self.synced {
            self.pending.push(message);
            return false;
        }
        self.insert(message)
    }

    /// Adopt the backfill window (most recent first, as received) and
    /// drain the buffer of concurrently delivered live messages
    pub fn adopt_backfill(&mut self, mut window: Vec<ChatMessage>) {
        window.reverse();
        for message in window {
            self.insert(message);
        }
        self.synced = true;

        let pending = std::mem::take(&mut self.pending);
        for message in pending {
            self.insert(message);
        }
    }

    /// Replace a message's reaction state with the server's broadcast
    ///
    /// Returns false when the message is not visible (yet).
    pub fn apply_reactions(
        &mut self,
        message_id: MessageId,
        reactions: Vec<ReactionEntry>,
    ) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.reactions = reactions;
                true
            }
            None => false,
        }
    }

    /// The visible messages, oldest first
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of visible messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn insert(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{ChannelKey, MessageKind, UserInfo};

    fn msg(id: MessageId) -> ChatMessage {
        ChatMessage {
            id,
            channel: ChannelKey::chatroom(42),
            sender: UserInfo {
                user_id: 1,
                username: "alice".to_string(),
            },
            content: format!("message {}", id),
            kind: MessageKind::Text,
            reply_to: None,
            reactions: Vec::new(),
            created_at: 1000 + id,
        }
    }

    #[test]
    fn test_backfill_is_reversed_into_chronological_order() {
        let mut list = MessageList::new();

        // Window arrives newest-first
        list.adopt_backfill(vec![msg(3), msg(2), msg(1)]);

        let ids: Vec<MessageId> = list.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(list.is_synced());
    }

    #[test]
    fn test_live_message_before_sync_is_buffered_not_dropped() {
        let mut list = MessageList::new();

        // A live broadcast races ahead of the sync response
        assert!(!list.apply_live(msg(4)));
        assert!(list.is_empty());

        list.adopt_backfill(vec![msg(3), msg(2), msg(1)]);

        // The buffered message lands after the backfill, once
        let ids: Vec<MessageId> = list.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_live_message_already_in_backfill_is_deduplicated() {
        let mut list = MessageList::new();

        // The broadcast for id 3 arrives, then the window also contains it
        list.apply_live(msg(3));
        list.adopt_backfill(vec![msg(3), msg(2), msg(1)]);

        let ids: Vec<MessageId> = list.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_redelivered_broadcast_is_invisible() {
        let mut list = MessageList::new();
        list.adopt_backfill(vec![]);

        assert!(list.apply_live(msg(7)));
        // A reconnect racing a pending broadcast can deliver the id twice
        assert!(!list.apply_live(msg(7)));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_apply_reactions_targets_the_visible_message() {
        let mut list = MessageList::new();
        list.adopt_backfill(vec![msg(1)]);

        let reactions = vec![ReactionEntry {
            emoji: "❤️".to_string(),
            user_ids: vec![2],
        }];
        assert!(list.apply_reactions(1, reactions.clone()));
        assert_eq!(list.messages()[0].reactions, reactions);

        assert!(!list.apply_reactions(99, vec![]));
    }
}
