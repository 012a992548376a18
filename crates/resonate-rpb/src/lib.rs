//! Resonance Profile Builder.
//!
//! Turns a user's behavioral events, bio, and messages into a
//! [`ResonanceProfile`] row plus a dense embedding in the vector store.
//! [`rebuild_profile`] is the single entry point, invoked from the
//! `resonate/voice-note-uploaded` event trigger (retried up to 3 times on
//! upstream failure) and from the daily 03:00 UTC sweep over active users
//! that skips anyone whose profile is fresher than 48h.

pub mod classify;
pub mod signals;

use chrono::Utc;
use resonate_cache::CacheAdapter;
use resonate_errors::{CoreError, CoreResult};
use resonate_llm::Embedder;
use resonate_store::Store;
use resonate_types::{ResonanceProfile, VectorMetadata};
use resonate_vector_store::VectorStore;
use uuid::Uuid;

use signals::{extract_bio, extract_browsing, extract_messaging, extract_session, extract_typing, extract_voice, Signals};

pub const MODEL_VERSION: &str = "rpb-v1";
const REBUILD_STALE_AFTER_HOURS: i64 = 48;
const MESSAGE_WINDOW: usize = 500;

/// Rebuilds one user's resonance profile end to end: gather the six signal
/// bundles, classify, build an embedding prompt, embed it, upsert the
/// vector, persist the profile row, and invalidate that user's cache
/// namespace. Returns the freshly written profile.
pub async fn rebuild_profile(
    store: &dyn Store,
    vector_store: &dyn VectorStore,
    cache: &dyn CacheAdapter,
    embedder: &dyn Embedder,
    user_id: Uuid,
) -> CoreResult<ResonanceProfile> {
    let user = store
        .get_user(user_id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("user:{user_id}")))?;

    let (events, messages) = tokio::join!(
        store.list_events_for_user(user_id, None),
        store.list_recent_messages_by_sender(user_id, MESSAGE_WINDOW),
    );
    let events = events?;
    let messages = messages?;

    let signals = Signals {
        voice: extract_voice(&user, &events),
        bio: extract_bio(&user, &events),
        messaging: extract_messaging(&messages),
        typing: extract_typing(&events),
        session: extract_session(&events),
        browsing: extract_browsing(&events),
    };

    let message_emotion_tags: Vec<String> = messages.iter().filter_map(|m| m.emotion_tag.clone()).collect();

    let archetype = classify::classify_archetype(&signals);
    let style = classify::classify_style(&signals);
    let emotion_tags = classify::dominant_emotion_tags(&signals, &message_emotion_tags);
    let depth = classify::depth_score(&signals);
    let completeness = signals::completeness_score(&signals);
    let humor = classify::humor_detection(&signals);
    let vocabulary_richness = classify::vocabulary_richness(&signals);

    let hourly_activity = signals
        .session
        .as_ref()
        .map(|s| s.hourly_activity)
        .unwrap_or([0.0; 24]);

    let prompt = classify::embedding_prompt(archetype, style, &emotion_tags, depth);
    let embedding = embedder
        .embed(&prompt)
        .await
        .map_err(|e| CoreError::Upstream(e.to_string()))?;

    let metadata = VectorMetadata {
        user_id,
        archetype: Some(archetype),
        style: Some(style),
        city: user.city.clone(),
        subscription_tier: user.subscription_tier,
        last_active_iso: user.last_active.to_rfc3339(),
        age_range: None,
    };
    vector_store
        .upsert(user_id, embedding, metadata)
        .await
        .map_err(|e| CoreError::Upstream(e.to_string()))?;

    let profile = ResonanceProfile {
        user_id,
        archetype: Some(archetype),
        style,
        dominant_emotion_tags: emotion_tags,
        hourly_activity,
        vocabulary_richness,
        humor_detection: humor,
        depth_seeking: depth,
        completeness,
        embedding_generated: true,
        last_recalculated: Utc::now(),
        model_version: MODEL_VERSION.to_string(),
    };
    store.put_profile(&profile).await?;

    cache
        .scan_delete(&format!("user:{user_id}:"))
        .await
        .map_err(|e| CoreError::Upstream(e.to_string()))?;

    Ok(profile)
}

/// Outcome of the daily sweep, for logging/observability.
#[derive(Debug, Default, Clone, Copy)]
pub struct RebuildSweepReport {
    pub scanned: usize,
    pub rebuilt: usize,
    pub skipped_fresh: usize,
    pub failed: usize,
}

/// Daily 03:00 UTC pass: every active user whose profile is missing or
/// stale (>48h since last recalculation) gets rebuilt. A single user's
/// failure is logged and does not abort the sweep.
pub async fn rebuild_stale_profiles(
    store: &dyn Store,
    vector_store: &dyn VectorStore,
    cache: &dyn CacheAdapter,
    embedder: &dyn Embedder,
    active_within_days: i64,
) -> CoreResult<RebuildSweepReport> {
    let now = Utc::now();
    let users = store.scan_active_users(now, active_within_days).await?;

    let mut report = RebuildSweepReport {
        scanned: users.len(),
        ..Default::default()
    };

    for user in users {
        let existing = store.get_profile(user.id).await?;
        let is_fresh = existing
            .as_ref()
            .is_some_and(|p| !p.is_stale(now, REBUILD_STALE_AFTER_HOURS));
        if is_fresh {
            report.skipped_fresh += 1;
            continue;
        }

        match rebuild_profile(store, vector_store, cache, embedder, user.id).await {
            Ok(_) => report.rebuilt += 1,
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "resonance profile rebuild failed");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use resonate_cache::SledCache;
    use resonate_llm::OfflineEmbedder;
    use resonate_store::SledStore;
    use resonate_types::{BehavioralEvent, EventPayload, SpeakingPace, SubscriptionTier, User, VoiceAnalysisPayload};
    use resonate_vector_store::SledVectorStore;

    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn sample_user(bio: &str) -> User {
        User {
            id: Uuid::new_v4(),
            display_name: "Test".into(),
            bio: Some(bio.into()),
            pronouns: None,
            city: Some("Austin".into()),
            country: None,
            latitude: None,
            longitude: None,
            voice_url: Some("https://example.com/v.mp3".into()),
            last_active: Utc::now(),
            subscription_tier: SubscriptionTier::Free,
            onboarding_complete: true,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn rebuild_profile_persists_archetype_and_embedding() {
        let store = SledStore::open(tmp_dir().path().to_str().unwrap()).unwrap();
        let vector_store = SledVectorStore::open(tmp_dir().path().to_str().unwrap(), 64).unwrap();
        let cache = SledCache::open(tmp_dir().path().to_str().unwrap()).unwrap();
        let embedder = OfflineEmbedder::new(64);

        let user = sample_user("Sound engineer by day");
        store.put_user(&user).await.unwrap();
        store
            .append_event(&BehavioralEvent {
                id: Uuid::new_v4(),
                user_id: user.id,
                session_id: Uuid::new_v4(),
                payload: EventPayload::VoiceNoteAnalyzed(VoiceAnalysisPayload {
                    word_count: 20,
                    unique_word_count: 16,
                    sentiment: 0.2,
                    dominant_emotions: vec!["curious".into()],
                    pace: SpeakingPace::Fast,
                }),
                client_ts: Utc::now(),
                server_ts: Utc::now(),
            })
            .await
            .unwrap();

        let profile = rebuild_profile(&store, &vector_store, &cache, &embedder, user.id)
            .await
            .unwrap();

        assert!(profile.embedding_generated);
        assert!(profile.archetype.is_some());
        assert_eq!(profile.model_version, MODEL_VERSION);

        let vector = vector_store.get(user.id).await.unwrap();
        assert!(vector.is_some());
    }

    #[tokio::test]
    async fn rebuild_profile_errors_on_unknown_user() {
        let store = SledStore::open(tmp_dir().path().to_str().unwrap()).unwrap();
        let vector_store = SledVectorStore::open(tmp_dir().path().to_str().unwrap(), 64).unwrap();
        let cache = SledCache::open(tmp_dir().path().to_str().unwrap()).unwrap();
        let embedder = OfflineEmbedder::new(64);

        let result = rebuild_profile(&store, &vector_store, &cache, &embedder, Uuid::new_v4()).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn sweep_skips_fresh_profiles() {
        let store = SledStore::open(tmp_dir().path().to_str().unwrap()).unwrap();
        let vector_store = SledVectorStore::open(tmp_dir().path().to_str().unwrap(), 64).unwrap();
        let cache = SledCache::open(tmp_dir().path().to_str().unwrap()).unwrap();
        let embedder = OfflineEmbedder::new(64);

        let user = sample_user("Sound engineer by day");
        store.put_user(&user).await.unwrap();
        let profile = rebuild_profile(&store, &vector_store, &cache, &embedder, user.id)
            .await
            .unwrap();
        store.put_profile(&profile).await.unwrap();

        let report = rebuild_stale_profiles(&store, &vector_store, &cache, &embedder, 30)
            .await
            .unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.skipped_fresh, 1);
        assert_eq!(report.rebuilt, 0);
    }
}
