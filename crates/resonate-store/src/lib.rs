//! Profile store: the typed repository the core uses in place of a real
//! Postgres database. [`Store`] is the narrow interface; [`SledStore`] is
//! the one embedded implementation, one `sled::Tree` per entity, JSON
//! encoded (entities carry `serde_json::Value`-shaped fields that aren't
//! `bincode`-roundtrippable).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resonate_errors::StoreError;
use resonate_types::{
    BehavioralEvent, BlockReport, Conversation, Match, Message, ResonanceProfile, User,
};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;
    async fn put_user(&self, user: &User) -> Result<(), StoreError>;

    /// Every non-deleted, onboarded user last active within `within_days`.
    async fn scan_active_users(
        &self,
        now: DateTime<Utc>,
        within_days: i64,
    ) -> Result<Vec<User>, StoreError>;

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<ResonanceProfile>, StoreError>;
    async fn put_profile(&self, profile: &ResonanceProfile) -> Result<(), StoreError>;

    async fn append_event(&self, event: &BehavioralEvent) -> Result<(), StoreError>;
    async fn list_events_for_user(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<BehavioralEvent>, StoreError>;

    async fn get_message(&self, message_id: Uuid) -> Result<Option<Message>, StoreError>;
    async fn put_message(&self, message: &Message) -> Result<(), StoreError>;
    async fn list_recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;
    /// Most recent `limit` messages sent by `user_id`, descending by sent
    /// time. Used by the RPB messaging signal aggregator.
    async fn list_recent_messages_by_sender(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>, StoreError>;
    async fn get_conversation_by_match(
        &self,
        match_id: Uuid,
    ) -> Result<Option<Conversation>, StoreError>;
    async fn put_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;
    async fn list_all_conversations(&self) -> Result<Vec<Conversation>, StoreError>;

    async fn get_match(&self, match_id: Uuid) -> Result<Option<Match>, StoreError>;
    async fn put_match(&self, m: &Match) -> Result<(), StoreError>;
    async fn list_matches_for_user(&self, user_id: Uuid) -> Result<Vec<Match>, StoreError>;

    async fn put_block_report(&self, record: &BlockReport) -> Result<(), StoreError>;
    async fn blocks_and_reports_involving(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<BlockReport>, StoreError>;
    async fn is_blocked_pair(&self, a: Uuid, b: Uuid) -> Result<bool, StoreError>;
}

fn ts_key(ts: DateTime<Utc>) -> String {
    format!("{:020}", ts.timestamp_nanos_opt().unwrap_or(0).max(0) as u64)
}

fn put_json<T: Serialize>(tree: &sled::Tree, key: &[u8], value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)?;
    tree.insert(key, bytes)?;
    Ok(())
}

fn get_json<T: DeserializeOwned>(tree: &sled::Tree, key: &[u8]) -> Result<Option<T>, StoreError> {
    match tree.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn scan_values<T: DeserializeOwned>(tree: &sled::Tree, prefix: &[u8]) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for kv in tree.scan_prefix(prefix) {
        let (_, v) = kv?;
        out.push(serde_json::from_slice(&v)?);
    }
    Ok(out)
}

pub struct SledStore {
    users: sled::Tree,
    profiles: sled::Tree,
    events: sled::Tree,
    messages: sled::Tree,
    conversations: sled::Tree,
    conversations_by_match: sled::Tree,
    matches: sled::Tree,
    matches_by_user: sled::Tree,
    block_reports: sled::Tree,
    block_reports_by_user: sled::Tree,
}

impl SledStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            users: db.open_tree("users")?,
            profiles: db.open_tree("profiles")?,
            events: db.open_tree("events")?,
            messages: db.open_tree("messages")?,
            conversations: db.open_tree("conversations")?,
            conversations_by_match: db.open_tree("conversations_by_match")?,
            matches: db.open_tree("matches")?,
            matches_by_user: db.open_tree("matches_by_user")?,
            block_reports: db.open_tree("block_reports")?,
            block_reports_by_user: db.open_tree("block_reports_by_user")?,
        })
    }

    fn append_user_index(
        &self,
        tree: &sled::Tree,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<(), StoreError> {
        let key = user_id.as_bytes().to_vec();
        let mut ids: Vec<Uuid> = match tree.get(&key)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };
        if !ids.contains(&item_id) {
            ids.push(item_id);
            let bytes = serde_json::to_vec(&ids)?;
            tree.insert(key, bytes)?;
        }
        Ok(())
    }

    fn read_user_index(&self, tree: &sled::Tree, user_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        match tree.get(user_id.as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Store for SledStore {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        get_json(&self.users, user_id.as_bytes())
    }

    async fn put_user(&self, user: &User) -> Result<(), StoreError> {
        put_json(&self.users, user.id.as_bytes(), user)
    }

    async fn scan_active_users(
        &self,
        now: DateTime<Utc>,
        within_days: i64,
    ) -> Result<Vec<User>, StoreError> {
        let mut out = Vec::new();
        for kv in self.users.iter() {
            let (_, v) = kv?;
            let user: User = serde_json::from_slice(&v)?;
            if user.is_active(now, within_days) {
                out.push(user);
            }
        }
        Ok(out)
    }

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<ResonanceProfile>, StoreError> {
        get_json(&self.profiles, user_id.as_bytes())
    }

    async fn put_profile(&self, profile: &ResonanceProfile) -> Result<(), StoreError> {
        put_json(&self.profiles, profile.user_id.as_bytes(), profile)
    }

    async fn append_event(&self, event: &BehavioralEvent) -> Result<(), StoreError> {
        let key = format!(
            "{}:{}:{}",
            event.user_id,
            ts_key(event.server_ts),
            event.id
        );
        put_json(&self.events, key.as_bytes(), event)
    }

    async fn list_events_for_user(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<BehavioralEvent>, StoreError> {
        let prefix = format!("{user_id}:");
        let mut events: Vec<BehavioralEvent> = scan_values(&self.events, prefix.as_bytes())?;
        if let Some(since) = since {
            events.retain(|e| e.server_ts >= since);
        }
        Ok(events)
    }

    async fn get_message(&self, message_id: Uuid) -> Result<Option<Message>, StoreError> {
        get_json(&self.messages, message_id.as_bytes())
    }

    async fn put_message(&self, message: &Message) -> Result<(), StoreError> {
        put_json(&self.messages, message.id.as_bytes(), message)
    }

    async fn list_recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter_map(|kv| kv.ok())
            .filter_map(|(_, v)| serde_json::from_slice::<Message>(&v).ok())
            .filter(|m| m.conversation_id == conversation_id)
            .collect();
        messages.sort_by_key(|m| m.sent_at);
        if messages.len() > limit {
            let skip = messages.len() - limit;
            messages.drain(0..skip);
        }
        Ok(messages)
    }

    async fn list_recent_messages_by_sender(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter_map(|kv| kv.ok())
            .filter_map(|(_, v)| serde_json::from_slice::<Message>(&v).ok())
            .filter(|m| m.sender_id == Some(user_id))
            .collect();
        messages.sort_by_key(|m| std::cmp::Reverse(m.sent_at));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>, StoreError> {
        get_json(&self.conversations, conversation_id.as_bytes())
    }

    async fn get_conversation_by_match(
        &self,
        match_id: Uuid,
    ) -> Result<Option<Conversation>, StoreError> {
        let Some(conversation_id) = get_json::<Uuid>(&self.conversations_by_match, match_id.as_bytes())?
        else {
            return Ok(None);
        };
        self.get_conversation(conversation_id).await
    }

    async fn put_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        put_json(
            &self.conversations,
            conversation.id.as_bytes(),
            conversation,
        )?;
        put_json(
            &self.conversations_by_match,
            conversation.match_id.as_bytes(),
            &conversation.id,
        )
    }

    async fn list_all_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        scan_values(&self.conversations, &[])
    }

    async fn get_match(&self, match_id: Uuid) -> Result<Option<Match>, StoreError> {
        get_json(&self.matches, match_id.as_bytes())
    }

    async fn put_match(&self, m: &Match) -> Result<(), StoreError> {
        put_json(&self.matches, m.id.as_bytes(), m)?;
        self.append_user_index(&self.matches_by_user, m.user_a_id, m.id)?;
        self.append_user_index(&self.matches_by_user, m.user_b_id, m.id)?;
        Ok(())
    }

    async fn list_matches_for_user(&self, user_id: Uuid) -> Result<Vec<Match>, StoreError> {
        let ids = self.read_user_index(&self.matches_by_user, user_id)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(m) = get_json(&self.matches, id.as_bytes())? {
                out.push(m);
            }
        }
        Ok(out)
    }

    async fn put_block_report(&self, record: &BlockReport) -> Result<(), StoreError> {
        put_json(&self.block_reports, record.id.as_bytes(), record)?;
        self.append_user_index(
            &self.block_reports_by_user,
            record.reporter_id,
            record.id,
        )?;
        self.append_user_index(
            &self.block_reports_by_user,
            record.reported_id,
            record.id,
        )?;
        Ok(())
    }

    async fn blocks_and_reports_involving(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<BlockReport>, StoreError> {
        let ids = self.read_user_index(&self.block_reports_by_user, user_id)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(r) = get_json(&self.block_reports, id.as_bytes())? {
                out.push(r);
            }
        }
        Ok(out)
    }

    async fn is_blocked_pair(&self, a: Uuid, b: Uuid) -> Result<bool, StoreError> {
        let records = self.blocks_and_reports_involving(a).await?;
        Ok(records.iter().any(|r| {
            matches!(r.kind, resonate_types::BlockReportType::Block)
                && ((r.reporter_id == a && r.reported_id == b)
                    || (r.reporter_id == b && r.reported_id == a))
        }))
    }
}
