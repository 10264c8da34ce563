//! Server-authoritative reaction projection
//!
//! The client never predicts a toggle's outcome; rendered counts always
//! come from the last reaction state the server broadcast for the
//! message.

use crate::protocol::messages::{ReactionEntry, UserId};

/// One rendered reaction chip: the emoji, its count, and whether the
/// viewer is in the set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionBadge {
    pub emoji: String,
    pub count: usize,
    pub reacted: bool,
}

/// Build render badges from the last broadcast reaction state
///
/// Entries arrive in first-occurrence order and keep it, so the chip
/// row never flickers; emoji with no remaining members are not shown.
pub fn reaction_badges(entries: &[ReactionEntry], viewer: UserId) -> Vec<ReactionBadge> {
    entries
        .iter()
        .filter(|entry| !entry.user_ids.is_empty())
        .map(|entry| ReactionBadge {
            emoji: entry.emoji.clone(),
            count: entry.user_ids.len(),
            reacted: entry.user_ids.contains(&viewer),
        })
        .collect()
}
