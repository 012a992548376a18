//! Shared data model for the resonance-matching core.
//!
//! These types are the typed shape of the relational rows, vector-store
//! metadata, and cache payloads the core reads and writes. They carry no
//! behavior; the engine crates (`resonate-rpb`, `resonate-ers`,
//! `resonate-dfre`, `resonate-chm`) own the logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Energy archetype classified from behavioral signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Archetype {
    Spark,
    Anchor,
    Wave,
    Ember,
    Storm,
}

impl Archetype {
    pub const ALL: [Archetype; 5] = [
        Archetype::Spark,
        Archetype::Anchor,
        Archetype::Wave,
        Archetype::Ember,
        Archetype::Storm,
    ];

    /// Fixed hex palette from the glossary.
    pub fn color_hex(&self) -> &'static str {
        match self {
            Archetype::Spark => "#FFD700",
            Archetype::Anchor => "#4A90D9",
            Archetype::Wave => "#4AF7C4",
            Archetype::Ember => "#FF6B35",
            Archetype::Storm => "#C77DFF",
        }
    }
}

impl std::fmt::Display for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Archetype::Spark => "spark",
            Archetype::Anchor => "anchor",
            Archetype::Wave => "wave",
            Archetype::Ember => "ember",
            Archetype::Storm => "storm",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Archetype {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spark" => Ok(Archetype::Spark),
            "anchor" => Ok(Archetype::Anchor),
            "wave" => Ok(Archetype::Wave),
            "ember" => Ok(Archetype::Ember),
            "storm" => Ok(Archetype::Storm),
            other => Err(format!("unknown archetype: {other}")),
        }
    }
}

/// Communication style classified from messaging/bio/voice signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommunicationStyle {
    Expressive,
    Precise,
    Poetic,
    Minimal,
    Witty,
}

impl CommunicationStyle {
    pub const ALL: [CommunicationStyle; 5] = [
        CommunicationStyle::Expressive,
        CommunicationStyle::Precise,
        CommunicationStyle::Poetic,
        CommunicationStyle::Minimal,
        CommunicationStyle::Witty,
    ];
}

impl std::fmt::Display for CommunicationStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommunicationStyle::Expressive => "expressive",
            CommunicationStyle::Precise => "precise",
            CommunicationStyle::Poetic => "poetic",
            CommunicationStyle::Minimal => "minimal",
            CommunicationStyle::Witty => "witty",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for CommunicationStyle {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expressive" => Ok(CommunicationStyle::Expressive),
            "precise" => Ok(CommunicationStyle::Precise),
            "poetic" => Ok(CommunicationStyle::Poetic),
            "minimal" => Ok(CommunicationStyle::Minimal),
            "witty" => Ok(CommunicationStyle::Witty),
            other => Err(format!("unknown communication style: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionTier {
    Free,
    Plus,
    Premium,
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Plus => "plus",
            SubscriptionTier::Premium => "premium",
        };
        f.write_str(s)
    }
}

/// Identity + account-level fields. Owned by the (external) auth flow;
/// mutated by the user; soft-deleted on account closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub bio: Option<String>,
    pub pronouns: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub voice_url: Option<String>,
    pub last_active: DateTime<Utc>,
    pub subscription_tier: SubscriptionTier,
    pub onboarding_complete: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_active(&self, now: DateTime<Utc>, within_days: i64) -> bool {
        self.deleted_at.is_none()
            && self.onboarding_complete
            && (now - self.last_active).num_days() <= within_days
    }

    pub fn days_since_active(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_active).num_seconds() as f64 / 86_400.0
    }
}

/// One resonance profile per user. Exists iff the user completed onboarding
/// and has at least one RPB pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResonanceProfile {
    pub user_id: Uuid,
    pub archetype: Option<Archetype>,
    pub style: CommunicationStyle,
    pub dominant_emotion_tags: Vec<String>,
    /// 24-slot hourly activity score, each in [0,1].
    pub hourly_activity: [f64; 24],
    pub vocabulary_richness: f64,
    pub humor_detection: f64,
    pub depth_seeking: f64,
    pub completeness: f64,
    pub embedding_generated: bool,
    pub last_recalculated: DateTime<Utc>,
    pub model_version: String,
}

impl ResonanceProfile {
    pub fn is_stale(&self, now: DateTime<Utc>, hours: i64) -> bool {
        (now - self.last_recalculated).num_hours() >= hours
    }
}

/// Recognized behavioral event types. Unknown types are preserved but
/// ignored by the RPB aggregators (spec §9: "open JSON shape").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "eventData")]
pub enum EventPayload {
    VoiceNoteAnalyzed(VoiceAnalysisPayload),
    BioEdited,
    TypingStarted,
    TypingStopped,
    AppOpened,
    AppClosed,
    ProfileViewed { viewed_user_id: Option<Uuid> },
    PhotoViewed { viewed_user_id: Option<Uuid> },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceAnalysisPayload {
    pub word_count: u32,
    pub unique_word_count: u32,
    pub sentiment: f64,
    pub dominant_emotions: Vec<String>,
    pub pace: SpeakingPace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeakingPace {
    Fast,
    Moderate,
    Slow,
}

/// Immutable, append-only behavioral event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub payload: EventPayload,
    pub client_ts: DateTime<Utc>,
    pub server_ts: DateTime<Utc>,
}

/// A single message within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    /// Opaque encrypted content; the core never decrypts message bodies
    /// except to measure length/tokens on the plaintext the caller passes in.
    pub content: String,
    pub content_type: String,
    pub sentiment: Option<f64>,
    pub emotion_tag: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationHealthState {
    Warming,
    Active,
    Cooling,
    Dormant,
    Revived,
}

impl std::fmt::Display for ConversationHealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConversationHealthState::Warming => "warming",
            ConversationHealthState::Active => "active",
            ConversationHealthState::Cooling => "cooling",
            ConversationHealthState::Dormant => "dormant",
            ConversationHealthState::Revived => "revived",
        };
        f.write_str(s)
    }
}

/// One per match. At most one pending nudge at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub match_id: Uuid,
    pub last_message_at: Option<DateTime<Utc>>,
    pub health_state: ConversationHealthState,
    pub pending_nudge: Option<String>,
    pub nudge_generated_at: Option<DateTime<Utc>>,
    pub archived_by_a: bool,
    pub archived_by_b: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchState {
    Pending,
    Matched,
    ConversationStarted,
    Dormant,
    Unmatched,
}

/// 64-bin visualization payload for a pair's ERS result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveformPayload {
    pub bins_a: Vec<f64>,
    pub bins_b: Vec<f64>,
    pub blended_color_hex: String,
}

/// Pair of user ids in canonical (sorted) order, one row per match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub user_a_id: Uuid,
    pub user_b_id: Uuid,
    pub resonance_score: Option<u8>,
    pub waveform: Option<WaveformPayload>,
    pub state: MatchState,
    pub liked_at_a: Option<DateTime<Utc>>,
    pub liked_at_b: Option<DateTime<Utc>>,
    pub conversation_started_at: Option<DateTime<Utc>>,
    pub unmatched_by: Option<Uuid>,
}

impl Match {
    /// Canonical (sorted) pair key, matching the uniqueness constraint.
    pub fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.user_a_id == user_id || self.user_b_id == user_id
    }

    pub fn other(&self, user_id: Uuid) -> Option<Uuid> {
        if self.user_a_id == user_id {
            Some(self.user_b_id)
        } else if self.user_b_id == user_id {
            Some(self.user_a_id)
        } else {
            None
        }
    }

    /// A "ghost": matched but the conversation never started.
    pub fn is_ghost(&self) -> bool {
        matches!(self.state, MatchState::Matched) && self.conversation_started_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReportType {
    Block,
    Report,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockReport {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub reported_id: Uuid,
    pub kind: BlockReportType,
    pub reason: Option<String>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Metadata stored alongside a user's dense vector, used for ANN filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub user_id: Uuid,
    pub archetype: Option<Archetype>,
    pub style: Option<CommunicationStyle>,
    pub city: Option<String>,
    pub subscription_tier: SubscriptionTier,
    pub last_active_iso: String,
    pub age_range: Option<(u8, u8)>,
}
