//! Channel state for the chat engine
//!
//! This module owns the authoritative state of every conversation: the
//! message stream, the member roster, and the mute records. Clients only
//! ever hold projections of it, mutated through accepted broadcasts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::current_timestamp;
use crate::error::{ChatError, Result};
use crate::protocol::messages::{
    ChannelKey, ChatMessage, MemberInfo, MessageId, MessageKind, ReactionEntry, Role, UserId,
    UserInfo,
};

/// Maximum accepted message content length in bytes
pub const MAX_CONTENT_LEN: usize = 4096;

/// Messages retained per channel for backfill
const MAX_RETAINED_MESSAGES: usize = 500;

/// Who may subscribe to a channel
#[derive(Debug, Clone)]
pub enum ChannelAccess {
    /// Public chatroom, open to any authenticated user
    Open,
    /// Private chatroom, restricted to accepted invites
    InviteOnly(HashSet<UserId>),
    /// Event/meetup chat, restricted to RSVP/join records
    Rsvp(HashSet<UserId>),
    /// Two-party direct conversation
    Direct(UserId, UserId),
}

impl ChannelAccess {
    fn permits(&self, user_id: UserId) -> bool {
        match self {
            ChannelAccess::Open => true,
            ChannelAccess::InviteOnly(invited) => invited.contains(&user_id),
            ChannelAccess::Rsvp(attendees) => attendees.contains(&user_id),
            ChannelAccess::Direct(a, b) => user_id == *a || user_id == *b,
        }
    }
}

/// A member of a channel
#[derive(Debug, Clone)]
pub struct Member {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
    pub is_muted: bool,
    pub joined_at: u64,
}

impl Member {
    pub fn new(user_id: UserId, username: String) -> Self {
        Self {
            user_id,
            username,
            role: Role::Member,
            is_muted: false,
            joined_at: current_timestamp(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn to_info(&self) -> MemberInfo {
        MemberInfo {
            user_id: self.user_id,
            username: self.username.clone(),
            role: self.role,
            is_muted: self.is_muted,
            joined_at: self.joined_at,
        }
    }
}

/// An active mute; its presence is what makes a member muted
#[derive(Debug, Clone)]
pub struct MuteRecord {
    pub target_user_id: UserId,
    pub reason: Option<String>,
    pub muted_by: UserId,
    pub muted_at: u64,
}

/// Message stream with the per-channel id counter
///
/// The counter lives inside the same lock as the stream so two
/// concurrent sends can never draw the same id.
#[derive(Debug)]
struct MessageLog {
    messages: Vec<ChatMessage>,
    next_id: MessageId,
}

impl MessageLog {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_id: 1,
        }
    }
}

/// A conversation channel
#[derive(Debug)]
pub struct Channel {
    /// Channel key: (chat type, chatroom id)
    pub key: ChannelKey,
    /// Channel name
    pub name: String,
    /// Subscription rule for this channel
    access: ChannelAccess,
    /// The creator; always admin
    owner_id: UserId,
    /// Unix ms past which the channel rejects traffic (event/meetup only)
    expires_at: Option<u64>,
    /// Roster indexed by user ID
    members: RwLock<HashMap<UserId, Member>>,
    /// Active mutes indexed by target user ID
    mutes: RwLock<HashMap<UserId, MuteRecord>>,
    /// Message stream and id counter
    log: RwLock<MessageLog>,
    /// Channel creation timestamp
    pub created_at: u64,
}

impl Channel {
    /// Create a new channel
    pub fn new(key: ChannelKey, name: String, access: ChannelAccess, owner_id: UserId) -> Self {
        Self {
            key,
            name,
            access,
            owner_id,
            expires_at: None,
            members: RwLock::new(HashMap::new()),
            mutes: RwLock::new(HashMap::new()),
            log: RwLock::new(MessageLog::new()),
            created_at: current_timestamp(),
        }
    }

    /// Set an expiry deadline (time-bounded chat types)
    pub fn with_expiry(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check whether the channel has expired
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map(|deadline| now >= deadline).unwrap_or(false)
    }

    /// Gate a sync/subscription request
    pub fn authorize_sync(&self, user_id: UserId, now: u64) -> Result<()> {
        if self.is_expired(now) {
            return Err(ChatError::authorization(format!(
                "{} has expired",
                self.key
            )));
        }
        if !self.access.permits(user_id) {
            return Err(ChatError::authorization(format!(
                "not a member of {}",
                self.key
            )));
        }
        Ok(())
    }

    /// Add a user to the roster, or return the existing entry
    ///
    /// Returns the roster entry and whether it was newly created. The
    /// owner always enters as admin.
    pub async fn join(&self, user_id: UserId, username: String) -> (MemberInfo, bool) {
        let mut members = self.members.write().await;
        if let Some(member) = members.get(&user_id) {
            return (member.to_info(), false);
        }

        let role = if user_id == self.owner_id {
            Role::Admin
        } else {
            Role::Member
        };
        let member = Member::new(user_id, username).with_role(role);
        let info = member.to_info();
        members.insert(user_id, member);
        (info, true)
    }

    /// Check if a user is on the roster
    pub async fn is_member(&self, user_id: UserId) -> bool {
        self.members.read().await.contains_key(&user_id)
    }

    /// Get a roster entry
    pub async fn get_member(&self, user_id: UserId) -> Option<MemberInfo> {
        self.members.read().await.get(&user_id).map(Member::to_info)
    }

    /// Check if a user holds the admin role here
    pub async fn is_admin(&self, user_id: UserId) -> bool {
        self.members
            .read()
            .await
            .get(&user_id)
            .map(|m| m.role.can_moderate())
            .unwrap_or(false)
    }

    /// Get the full roster, ordered by join time
    pub async fn roster(&self) -> Vec<MemberInfo> {
        let members = self.members.read().await;
        let mut roster: Vec<MemberInfo> = members.values().map(Member::to_info).collect();
        roster.sort_by_key(|m| (m.joined_at, m.user_id));
        roster
    }

    /// Get member count
    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// Mute a member, creating the mute record
    ///
    /// The admin gate on `muted_by` is the caller's responsibility; any
    /// admin may mute any member, including another admin.
    pub async fn mute(
        &self,
        target_user_id: UserId,
        muted_by: UserId,
        reason: Option<String>,
    ) -> Result<MuteRecord> {
        let record = MuteRecord {
            target_user_id,
            reason,
            muted_by,
            muted_at: current_timestamp(),
        };

        {
            let mut members = self.members.write().await;
            let member = members.get_mut(&target_user_id).ok_or_else(|| {
                ChatError::not_found(format!("member {} in {}", target_user_id, self.key))
            })?;
            member.is_muted = true;
        }

        self.mutes.write().await.insert(target_user_id, record.clone());
        Ok(record)
    }

    /// Unmute a member, deleting the mute record
    pub async fn unmute(&self, target_user_id: UserId) -> Result<()> {
        {
            let mut members = self.members.write().await;
            if let Some(member) = members.get_mut(&target_user_id) {
                member.is_muted = false;
            }
        }

        let removed = self.mutes.write().await.remove(&target_user_id);
        if removed.is_none() {
            return Err(ChatError::not_found(format!(
                "mute record for {} in {}",
                target_user_id, self.key
            )));
        }
        Ok(())
    }

    /// Check if a user is currently muted
    pub async fn is_muted(&self, user_id: UserId) -> bool {
        self.mutes.read().await.contains_key(&user_id)
    }

    /// Apply the message-acceptance rule and append on success
    ///
    /// A rejected message never enters the stream; an accepted one gets
    /// the next per-channel id and the server timestamp, and is what the
    /// caller broadcasts (the sender learns id/timestamp from the echo).
    pub async fn accept_message(
        &self,
        sender: UserInfo,
        content: String,
        reply_to: Option<MessageId>,
        now: u64,
    ) -> Result<ChatMessage> {
        if self.is_expired(now) {
            return Err(ChatError::authorization(format!(
                "{} has expired",
                self.key
            )));
        }
        if !self.is_member(sender.user_id).await {
            return Err(ChatError::authorization(format!(
                "not a member of {}",
                self.key
            )));
        }
        if self.is_muted(sender.user_id).await {
            return Err(ChatError::authorization(format!(
                "you are muted in {}",
                self.key
            )));
        }
        if content.trim().is_empty() {
            return Err(ChatError::validation("message content is empty"));
        }
        if content.len() > MAX_CONTENT_LEN {
            return Err(ChatError::validation(format!(
                "message content exceeds {} bytes",
                MAX_CONTENT_LEN
            )));
        }

        let mut log = self.log.write().await;

        if let Some(reply_id) = reply_to {
            if !log.messages.iter().any(|m| m.id == reply_id) {
                return Err(ChatError::not_found(format!(
                    "reply target {} in {}",
                    reply_id, self.key
                )));
            }
        }

        let message = ChatMessage {
            id: log.next_id,
            channel: self.key,
            sender,
            content,
            kind: MessageKind::Text,
            reply_to,
            reactions: Vec::new(),
            created_at: now,
        };
        log.next_id += 1;
        log.messages.push(message.clone());

        if log.messages.len() > MAX_RETAINED_MESSAGES {
            log.messages.remove(0);
        }

        Ok(message)
    }

    /// Append a server-authored notice to the stream
    ///
    /// Subject to expiry but not to membership or mute gates; the system
    /// is not a member.
    pub async fn append_system_notice(&self, content: String, now: u64) -> Result<ChatMessage> {
        if self.is_expired(now) {
            return Err(ChatError::authorization(format!(
                "{} has expired",
                self.key
            )));
        }

        let mut log = self.log.write().await;
        let message = ChatMessage {
            id: log.next_id,
            channel: self.key,
            sender: UserInfo {
                user_id: 0,
                username: "system".to_string(),
            },
            content,
            kind: MessageKind::System,
            reply_to: None,
            reactions: Vec::new(),
            created_at: now,
        };
        log.next_id += 1;
        log.messages.push(message.clone());

        if log.messages.len() > MAX_RETAINED_MESSAGES {
            log.messages.remove(0);
        }

        Ok(message)
    }

    /// Flip the user's membership in the message's reaction set for the
    /// given emoji, returning the entire recomputed reaction list
    ///
    /// Entries keep first-occurrence order; an emoji whose set empties
    /// is dropped, so toggling twice restores the prior state.
    pub async fn toggle_reaction(
        &self,
        message_id: MessageId,
        emoji: &str,
        user_id: UserId,
    ) -> Result<Vec<ReactionEntry>> {
        let mut log = self.log.write().await;
        let message = log
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| {
                ChatError::not_found(format!("message {} in {}", message_id, self.key))
            })?;

        match message
            .reactions
            .iter_mut()
            .position(|entry| entry.emoji == emoji)
        {
            Some(idx) => {
                let entry = &mut message.reactions[idx];
                match entry.user_ids.iter().position(|&id| id == user_id) {
                    Some(pos) => {
                        entry.user_ids.remove(pos);
                        if entry.user_ids.is_empty() {
                            message.reactions.remove(idx);
                        }
                    }
                    None => entry.user_ids.push(user_id),
                }
            }
            None => message.reactions.push(ReactionEntry {
                emoji: emoji.to_string(),
                user_ids: vec![user_id],
            }),
        }

        Ok(message.reactions.clone())
    }

    /// Get the most recent messages, newest first (the backfill window)
    pub async fn recent_messages(&self, limit: usize) -> Vec<ChatMessage> {
        let log = self.log.read().await;
        log.messages.iter().rev().take(limit).cloned().collect()
    }

    /// Get total retained message count
    pub async fn message_count(&self) -> usize {
        self.log.read().await.messages.len()
    }
}

/// Registry of all live channels, keyed by (chat type, chatroom id)
pub struct ChannelRegistry {
    channels: RwLock<HashMap<ChannelKey, Arc<Channel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register a channel, replacing any previous one under the same key
    pub async fn register(&self, channel: Channel) -> Arc<Channel> {
        let channel = Arc::new(channel);
        self.channels
            .write()
            .await
            .insert(channel.key, Arc::clone(&channel));
        channel
    }

    /// Get a channel by key
    pub async fn get(&self, key: ChannelKey) -> Option<Arc<Channel>> {
        self.channels.read().await.get(&key).cloned()
    }

    /// Remove a channel (cascading deletion of its messages)
    pub async fn remove(&self, key: ChannelKey) -> Option<Arc<Channel>> {
        self.channels.write().await.remove(&key)
    }

    /// Get channel count
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::ChatType;

    fn alice() -> UserInfo {
        UserInfo {
            user_id: 1,
            username: "alice".to_string(),
        }
    }

    fn bob() -> UserInfo {
        UserInfo {
            user_id: 2,
            username: "bob".to_string(),
        }
    }

    fn open_channel() -> Channel {
        Channel::new(
            ChannelKey::chatroom(42),
            "Lobby".to_string(),
            ChannelAccess::Open,
            1,
        )
    }

    async fn joined_channel() -> Channel {
        let channel = open_channel();
        channel.join(1, "alice".to_string()).await;
        channel.join(2, "bob".to_string()).await;
        channel
    }

    #[tokio::test]
    async fn test_owner_joins_as_admin() {
        let channel = open_channel();

        let (owner, new) = channel.join(1, "alice".to_string()).await;
        assert!(new);
        assert_eq!(owner.role, Role::Admin);

        let (member, _) = channel.join(2, "bob".to_string()).await;
        assert_eq!(member.role, Role::Member);

        // Re-joining is idempotent
        let (again, new) = channel.join(2, "bob".to_string()).await;
        assert!(!new);
        assert_eq!(again.joined_at, member.joined_at);
    }

    #[tokio::test]
    async fn test_message_ids_are_sequential_per_channel() {
        let channel = joined_channel().await;
        let now = current_timestamp();

        let m1 = channel
            .accept_message(alice(), "first".to_string(), None, now)
            .await
            .unwrap();
        let m2 = channel
            .accept_message(bob(), "second".to_string(), None, now)
            .await
            .unwrap();

        assert_eq!(m1.id, 1);
        assert_eq!(m2.id, 2);
    }

    #[tokio::test]
    async fn test_concurrent_sends_never_share_an_id() {
        let channel = Arc::new(joined_channel().await);
        let now = current_timestamp();

        let mut handles = Vec::new();
        for i in 0..20 {
            let ch = Arc::clone(&channel);
            handles.push(tokio::spawn(async move {
                ch.accept_message(alice(), format!("msg {}", i), None, now)
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()));
        }
        assert_eq!(ids.len(), 20);
    }

    #[tokio::test]
    async fn test_muted_member_cannot_author() {
        let channel = joined_channel().await;
        let now = current_timestamp();

        channel.mute(2, 1, Some("spam".to_string())).await.unwrap();
        assert!(channel.is_muted(2).await);

        let result = channel
            .accept_message(bob(), "let me in".to_string(), None, now)
            .await;
        assert!(matches!(result, Err(ChatError::Authorization(_))));

        // The stream never saw the rejected message
        assert_eq!(channel.message_count().await, 0);

        // Unmute restores authoring
        channel.unmute(2).await.unwrap();
        assert!(!channel.is_muted(2).await);
        assert!(channel
            .accept_message(bob(), "back".to_string(), None, now)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_mute_sets_roster_flag_and_unmute_clears_it() {
        let channel = joined_channel().await;

        let record = channel.mute(2, 1, Some("spam".to_string())).await.unwrap();
        assert_eq!(record.muted_by, 1);
        assert_eq!(record.reason.as_deref(), Some("spam"));

        let roster = channel.roster().await;
        let bob_entry = roster.iter().find(|m| m.user_id == 2).unwrap();
        assert!(bob_entry.is_muted);

        channel.unmute(2).await.unwrap();
        let roster = channel.roster().await;
        assert!(!roster.iter().find(|m| m.user_id == 2).unwrap().is_muted);

        // Deleting an absent record is an error, not a silent no-op
        assert!(channel.unmute(2).await.is_err());
    }

    #[tokio::test]
    async fn test_admin_may_mute_another_admin() {
        let channel = open_channel();
        channel.join(1, "alice".to_string()).await;
        channel.join(2, "bob".to_string()).await;
        {
            let mut members = channel.members.write().await;
            if let Some(m) = members.get_mut(&2) {
                m.role = Role::Admin;
            }
        }

        assert!(channel.is_admin(2).await);
        assert!(channel.mute(2, 1, None).await.is_ok());
        assert!(channel.is_muted(2).await);
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let channel = joined_channel().await;
        let now = current_timestamp();

        let result = channel
            .accept_message(alice(), "   ".to_string(), None, now)
            .await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn test_dangling_reply_rejected() {
        let channel = joined_channel().await;
        let now = current_timestamp();

        let result = channel
            .accept_message(alice(), "reply".to_string(), Some(999), now)
            .await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));

        let first = channel
            .accept_message(alice(), "root".to_string(), None, now)
            .await
            .unwrap();
        let reply = channel
            .accept_message(bob(), "reply".to_string(), Some(first.id), now)
            .await
            .unwrap();
        assert_eq!(reply.reply_to, Some(first.id));
    }

    #[tokio::test]
    async fn test_expired_channel_rejects_sync_and_messages() {
        let channel = Channel::new(
            ChannelKey::meetup(5),
            "Friday Meetup".to_string(),
            ChannelAccess::Rsvp(HashSet::from([1, 2])),
            1,
        )
        .with_expiry(1000);
        channel.join(1, "alice".to_string()).await;

        assert!(channel.authorize_sync(1, 999).is_ok());
        assert!(matches!(
            channel.authorize_sync(1, 1000),
            Err(ChatError::Authorization(_))
        ));
        assert!(matches!(
            channel
                .accept_message(alice(), "late".to_string(), None, 1000)
                .await,
            Err(ChatError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_access_rules_by_chat_type() {
        let open = open_channel();
        assert!(open.authorize_sync(99, 0).is_ok());

        let private = Channel::new(
            ChannelKey::chatroom(7),
            "Private".to_string(),
            ChannelAccess::InviteOnly(HashSet::from([1])),
            1,
        );
        assert!(private.authorize_sync(1, 0).is_ok());
        assert!(private.authorize_sync(2, 0).is_err());

        let event = Channel::new(
            ChannelKey::event(9),
            "Launch Party".to_string(),
            ChannelAccess::Rsvp(HashSet::from([1, 2])),
            1,
        );
        assert!(event.authorize_sync(2, 0).is_ok());
        assert!(event.authorize_sync(3, 0).is_err());

        let dm = Channel::new(
            ChannelKey::direct_message(3),
            "dm".to_string(),
            ChannelAccess::Direct(1, 2),
            1,
        );
        assert!(dm.authorize_sync(1, 0).is_ok());
        assert!(dm.authorize_sync(2, 0).is_ok());
        assert!(dm.authorize_sync(3, 0).is_err());
    }

    #[tokio::test]
    async fn test_system_notice_shares_the_id_sequence() {
        let channel = joined_channel().await;
        let now = current_timestamp();

        let first = channel
            .accept_message(alice(), "hello".to_string(), None, now)
            .await
            .unwrap();
        let notice = channel
            .append_system_notice("alice was muted".to_string(), now)
            .await
            .unwrap();

        assert_eq!(notice.id, first.id + 1);
        assert_eq!(notice.kind, MessageKind::System);
        assert_eq!(notice.sender.username, "system");
        assert_eq!(channel.message_count().await, 2);
    }

    #[tokio::test]
    async fn test_reaction_toggle_is_its_own_inverse() {
        let channel = joined_channel().await;
        let now = current_timestamp();
        let msg = channel
            .accept_message(alice(), "hello".to_string(), None, now)
            .await
            .unwrap();

        // {} -> {"❤️": [1]}
        let reactions = channel.toggle_reaction(msg.id, "❤️", 1).await.unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "❤️");
        assert_eq!(reactions[0].user_ids, vec![1]);

        // {"❤️": [1]} -> {}, net effect is the empty map
        let reactions = channel.toggle_reaction(msg.id, "❤️", 1).await.unwrap();
        assert!(reactions.is_empty());
    }

    #[tokio::test]
    async fn test_reaction_order_is_first_occurrence() {
        let channel = joined_channel().await;
        let now = current_timestamp();
        let msg = channel
            .accept_message(alice(), "hello".to_string(), None, now)
            .await
            .unwrap();

        channel.toggle_reaction(msg.id, "👍", 1).await.unwrap();
        channel.toggle_reaction(msg.id, "❤️", 1).await.unwrap();
        let reactions = channel.toggle_reaction(msg.id, "👍", 2).await.unwrap();

        let order: Vec<&str> = reactions.iter().map(|e| e.emoji.as_str()).collect();
        assert_eq!(order, vec!["👍", "❤️"]);
        assert_eq!(reactions[0].user_ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_reaction_on_unknown_message() {
        let channel = joined_channel().await;
        let result = channel.toggle_reaction(999, "❤️", 1).await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_recent_messages_newest_first() {
        let channel = joined_channel().await;
        let now = current_timestamp();

        for i in 0..5 {
            channel
                .accept_message(alice(), format!("msg {}", i), None, now)
                .await
                .unwrap();
        }

        let recent = channel.recent_messages(3).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "msg 4");
        assert_eq!(recent[2].content, "msg 2");
    }

    #[tokio::test]
    async fn test_registry_keys_by_chat_type_and_id() {
        let registry = ChannelRegistry::new();

        registry
            .register(Channel::new(
                ChannelKey::event(5),
                "Event 5".to_string(),
                ChannelAccess::Rsvp(HashSet::new()),
                1,
            ))
            .await;
        registry
            .register(Channel::new(
                ChannelKey::meetup(5),
                "Meetup 5".to_string(),
                ChannelAccess::Rsvp(HashSet::new()),
                1,
            ))
            .await;

        assert_eq!(registry.channel_count().await, 2);
        let event = registry.get(ChannelKey::event(5)).await.unwrap();
        let meetup = registry.get(ChannelKey::meetup(5)).await.unwrap();
        assert_eq!(event.name, "Event 5");
        assert_eq!(meetup.name, "Meetup 5");
        assert_eq!(
            registry.get(ChannelKey::new(ChatType::Chatroom, 5)).await.map(|_| ()),
            None
        );
    }
}
