//! Dynamic Feed Ranking Engine.
//!
//! Five stages turn a viewer id into a page of ranked candidates: vector
//! candidate retrieval (falling back to a full active-user scan), safety
//! filtering against blocks/reports, soft scoring, diversity injection, and
//! paginated, cached results.

use chrono::Utc;
use resonate_cache::CacheAdapter;
use resonate_errors::{CoreError, CoreResult};
use resonate_store::Store;
use resonate_types::{Archetype, ResonanceProfile, SubscriptionTier, User};
use resonate_vector_store::{Filter, VectorStore};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

pub const PAGE_SIZE: usize = 30;
const CANDIDATE_POOL_MULTIPLIER: usize = 4;
const CACHE_TTL: Duration = Duration::from_secs(300);
const DIVERSITY_BONUS: f64 = 0.1;
const DIVERSITY_TARGET_RATIO: f64 = 0.20;

const W_ERS: f64 = 0.40;
const W_FRESHNESS: f64 = 0.15;
/// Reserved weight with no contributing term in the current scoring model;
/// kept at zero rather than redistributed so the five-term shape matches the
/// documented formula exactly.
const W_RESERVED: f64 = 0.15;
const W_GHOST_PENALTY: f64 = 0.15;
const W_SUB_BOOST: f64 = 0.15;

#[derive(Debug, Clone)]
pub struct FeedCandidate {
    pub user_id: Uuid,
    pub score: f64,
    pub archetype: Option<Archetype>,
    pub diversity_bonus_applied: bool,
}

/// `1.0` if active within 1h; `0.9` within 24h; `0.7` within 72h; else
/// `max(0.3, 0.7 - (hours-72)/168)`.
fn freshness(user: &User, now: chrono::DateTime<Utc>) -> f64 {
    let hours = (now - user.last_active).num_seconds() as f64 / 3600.0;
    if hours <= 1.0 {
        1.0
    } else if hours <= 24.0 {
        0.9
    } else if hours <= 72.0 {
        0.7
    } else {
        (0.7 - (hours - 72.0) / 168.0).max(0.3)
    }
}

/// `ghostRate` over the candidate's own match history: matches reached a
/// matched state with no conversation ever started, divided by all matches
/// that reached a matched state, considering up to 20 most recent matches.
fn ghost_rate(matches: &[resonate_types::Match]) -> f64 {
    let recent = &matches[matches.len().saturating_sub(20)..];
    let matched: Vec<&resonate_types::Match> = recent
        .iter()
        .filter(|m| !matches!(m.state, resonate_types::MatchState::Pending))
        .collect();
    if matched.is_empty() {
        return 0.0;
    }
    let ghosted = matched.iter().filter(|m| m.is_ghost()).count();
    ghosted as f64 / matched.len() as f64
}

fn subscription_boost(tier: SubscriptionTier) -> f64 {
    match tier {
        SubscriptionTier::Free => 0.0,
        SubscriptionTier::Plus => 0.05,
        SubscriptionTier::Premium => 0.10,
    }
}

fn ers_normalized(score: u8) -> f64 {
    score as f64 / 100.0
}

/// Stage 1: vector-query candidates using the viewer's own embedding (the
/// resolved "self-query" design — the viewer is both the query point and the
/// excluded id), falling back to a scan of active users when the viewer has
/// no vector yet (fresh signups pre-RPB).
async fn retrieve_candidates(
    store: &dyn Store,
    vector_store: &dyn VectorStore,
    viewer_id: Uuid,
    pool_size: usize,
) -> CoreResult<Vec<Uuid>> {
    if let Some((embedding, _)) = vector_store
        .get(viewer_id)
        .await
        .map_err(|e| CoreError::Upstream(e.to_string()))?
    {
        let results = vector_store
            .query(&embedding, pool_size + 1, &Filter::new())
            .await
            .map_err(|e| CoreError::Upstream(e.to_string()))?;
        let ids: Vec<Uuid> = results
            .into_iter()
            .map(|r| r.user_id)
            .filter(|id| *id != viewer_id)
            .take(pool_size)
            .collect();
        if !ids.is_empty() {
            return Ok(ids);
        }
    }

    let now = Utc::now();
    let active = store.scan_active_users(now, 30).await?;
    Ok(active
        .into_iter()
        .map(|u| u.id)
        .filter(|id| *id != viewer_id)
        .take(pool_size)
        .collect())
}

/// Stage 2: drop candidates blocked/reported in either direction, or present
/// in the viewer's cached `blocked:{viewerId}` set (fast path before the
/// authoritative store read).
async fn filter_safety(
    store: &dyn Store,
    cache: &dyn CacheAdapter,
    viewer_id: Uuid,
    candidates: Vec<Uuid>,
) -> CoreResult<Vec<Uuid>> {
    let cached_blocked: HashSet<String> = cache
        .smembers(&format!("blocked:{viewer_id}"))
        .await
        .map_err(|e| CoreError::Upstream(e.to_string()))?
        .into_iter()
        .collect();

    let mut out = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if cached_blocked.contains(&candidate.to_string()) {
            continue;
        }
        if store.is_blocked_pair(viewer_id, candidate).await? {
            continue;
        }
        out.push(candidate);
    }
    Ok(out)
}

/// Stage 3: weighted soft score per candidate, using each candidate's own
/// match history for their ghost rate (not the viewer's).
async fn score_candidates(
    store: &dyn Store,
    _viewer_id: Uuid,
    candidates: Vec<Uuid>,
    ers_scores: &std::collections::HashMap<Uuid, u8>,
) -> CoreResult<Vec<FeedCandidate>> {
    let mut scored = Vec::with_capacity(candidates.len());
    for candidate_id in candidates {
        let Some(user) = store.get_user(candidate_id).await? else {
            continue;
        };
        let profile: Option<ResonanceProfile> = store.get_profile(candidate_id).await?;
        let ers = ers_scores.get(&candidate_id).copied().unwrap_or(0);
        let candidate_matches = store.list_matches_for_user(candidate_id).await?;
        let ghost_penalty = (ghost_rate(&candidate_matches) * 0.7).min(0.5);

        let score = ers_normalized(ers) * W_ERS
            + freshness(&user, Utc::now()) * W_FRESHNESS
            + 0.0 * W_RESERVED
            + (1.0 - ghost_penalty) * W_GHOST_PENALTY
            + (1.0 + subscription_boost(user.subscription_tier)) * W_SUB_BOOST;

        scored.push(FeedCandidate {
            user_id: candidate_id,
            score,
            archetype: profile.and_then(|p| p.archetype),
            diversity_bonus_applied: false,
        });
    }
    Ok(scored)
}

/// Stage 4: ensure at least `DIVERSITY_TARGET_RATIO` of the page is drawn
/// from archetypes other than the single most common one in the scored
/// pool. Reserves that many slots for the best-scoring non-dominant
/// candidates rather than relying on a score bump that dominant candidates
/// could simply outscore.
fn inject_diversity(mut scored: Vec<FeedCandidate>, limit: usize) -> Vec<FeedCandidate> {
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut counts = std::collections::HashMap::new();
    for c in &scored {
        if let Some(a) = c.archetype {
            *counts.entry(a).or_insert(0usize) += 1;
        }
    }
    let dominant = counts.iter().max_by_key(|(_, count)| **count).map(|(a, _)| *a);

    let Some(dominant) = dominant else {
        scored.truncate(limit);
        return scored;
    };

    let reserved = (((limit as f64) * DIVERSITY_TARGET_RATIO).ceil() as usize).min(limit);

    let mut non_dominant: Vec<FeedCandidate> = Vec::new();
    let mut rest: Vec<FeedCandidate> = Vec::new();
    for candidate in scored {
        if candidate.archetype != Some(dominant) {
            non_dominant.push(candidate);
        } else {
            rest.push(candidate);
        }
    }

    let reserved_count = reserved.min(non_dominant.len());
    let mut diversity_picks: Vec<FeedCandidate> = non_dominant.drain(0..reserved_count).collect();
    for c in diversity_picks.iter_mut() {
        c.score += DIVERSITY_BONUS;
        c.diversity_bonus_applied = true;
    }

    let remaining_slots = limit.saturating_sub(diversity_picks.len());
    let mut leftover: Vec<FeedCandidate> = rest.into_iter().chain(non_dominant).collect();
    leftover.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    leftover.truncate(remaining_slots);

    let mut out: Vec<FeedCandidate> = diversity_picks;
    out.extend(leftover);
    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    out.truncate(limit);
    out
}

fn feed_cache_key(viewer_id: Uuid, page: usize) -> String {
    format!("feed:{viewer_id}:page:{page}")
}

/// Stage 5 entry point: the full pipeline for one page of a viewer's feed.
/// Results for `(viewer, page)` are cached for 5 minutes.
pub async fn discover_feed(
    store: &dyn Store,
    vector_store: &dyn VectorStore,
    cache: &dyn CacheAdapter,
    ers_lookup: impl Fn(Uuid, Uuid) -> std::pin::Pin<Box<dyn std::future::Future<Output = CoreResult<u8>> + Send>>,
    viewer_id: Uuid,
    page: usize,
) -> CoreResult<Vec<FeedCandidate>> {
    let cache_key = feed_cache_key(viewer_id, page);
    if let Some(cached) = cache
        .get(&cache_key)
        .await
        .map_err(|e| CoreError::Upstream(e.to_string()))?
    {
        if let Ok(ids) = serde_json::from_slice::<Vec<(Uuid, f64, Option<Archetype>, bool)>>(&cached) {
            return Ok(ids
                .into_iter()
                .map(|(user_id, score, archetype, diversity_bonus_applied)| FeedCandidate {
                    user_id,
                    score,
                    archetype,
                    diversity_bonus_applied,
                })
                .collect());
        }
    }

    let pool_size = PAGE_SIZE * CANDIDATE_POOL_MULTIPLIER;
    let candidates = retrieve_candidates(store, vector_store, viewer_id, pool_size).await?;
    let safe_candidates = filter_safety(store, cache, viewer_id, candidates).await?;

    let mut ers_scores = std::collections::HashMap::new();
    for candidate_id in &safe_candidates {
        if let Ok(score) = ers_lookup(viewer_id, *candidate_id).await {
            ers_scores.insert(*candidate_id, score);
        }
    }

    let scored = score_candidates(store, viewer_id, safe_candidates, &ers_scores).await?;
    let page_results = inject_diversity(scored, PAGE_SIZE);

    let encoded: Vec<(Uuid, f64, Option<Archetype>, bool)> = page_results
        .iter()
        .map(|c| (c.user_id, c.score, c.archetype, c.diversity_bonus_applied))
        .collect();
    let bytes = serde_json::to_vec(&encoded).map_err(|e| CoreError::Upstream(e.to_string()))?;
    cache
        .set(&cache_key, &bytes, Some(CACHE_TTL))
        .await
        .map_err(|e| CoreError::Upstream(e.to_string()))?;

    Ok(page_results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use resonate_cache::SledCache;
    use resonate_store::SledStore;
    use resonate_types::{CommunicationStyle, SubscriptionTier};

    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            display_name: "Test".into(),
            bio: None,
            pronouns: None,
            city: None,
            country: None,
            latitude: None,
            longitude: None,
            voice_url: None,
            last_active: Utc::now(),
            subscription_tier: SubscriptionTier::Free,
            onboarding_complete: true,
            deleted_at: None,
        }
    }

    fn profile(user_id: Uuid, archetype: Archetype) -> ResonanceProfile {
        ResonanceProfile {
            user_id,
            archetype: Some(archetype),
            style: CommunicationStyle::Witty,
            dominant_emotion_tags: vec![],
            hourly_activity: [0.0; 24],
            vocabulary_richness: 0.0,
            humor_detection: 0.0,
            depth_seeking: 0.5,
            completeness: 50.0,
            embedding_generated: false,
            last_recalculated: Utc::now(),
            model_version: "test".into(),
        }
    }

    #[tokio::test]
    async fn discover_feed_excludes_blocked_candidates() {
        let store = SledStore::open(tmp_dir().path().to_str().unwrap()).unwrap();
        let vector_store = resonate_vector_store::SledVectorStore::open(tmp_dir().path().to_str().unwrap(), 8).unwrap();
        let cache = SledCache::open(tmp_dir().path().to_str().unwrap()).unwrap();

        let viewer = user();
        let blocked = user();
        let allowed = user();
        store.put_user(&viewer).await.unwrap();
        store.put_user(&blocked).await.unwrap();
        store.put_user(&allowed).await.unwrap();
        store.put_profile(&profile(blocked.id, Archetype::Spark)).await.unwrap();
        store.put_profile(&profile(allowed.id, Archetype::Anchor)).await.unwrap();

        store
            .put_block_report(&resonate_types::BlockReport {
                id: Uuid::new_v4(),
                reporter_id: viewer.id,
                reported_id: blocked.id,
                kind: resonate_types::BlockReportType::Block,
                reason: None,
                details: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let ers_lookup = |_a: Uuid, _b: Uuid| -> std::pin::Pin<Box<dyn std::future::Future<Output = CoreResult<u8>> + Send>> {
            Box::pin(async { Ok(70u8) })
        };

        let page = discover_feed(&store, &vector_store, &cache, ers_lookup, viewer.id, 0)
            .await
            .unwrap();
        assert!(page.iter().all(|c| c.user_id != blocked.id));
        assert!(page.iter().any(|c| c.user_id == allowed.id));
    }

    #[test]
    fn diversity_injection_boosts_non_dominant_archetypes() {
        let mut candidates = Vec::new();
        for _ in 0..20 {
            candidates.push(FeedCandidate {
                user_id: Uuid::new_v4(),
                score: 0.8,
                archetype: Some(Archetype::Spark),
                diversity_bonus_applied: false,
            });
        }
        candidates.push(FeedCandidate {
            user_id: Uuid::new_v4(),
            score: 0.5,
            archetype: Some(Archetype::Storm),
            diversity_bonus_applied: false,
        });

        let page = inject_diversity(candidates, 10);
        assert!(page.iter().any(|c| c.archetype == Some(Archetype::Storm)));
    }

    #[test]
    fn freshness_matches_spec_buckets() {
        let now = Utc::now();
        let mut u = user();
        u.last_active = now - chrono::Duration::minutes(30);
        assert_eq!(freshness(&u, now), 1.0);
        u.last_active = now - chrono::Duration::hours(12);
        assert_eq!(freshness(&u, now), 0.9);
        u.last_active = now - chrono::Duration::hours(48);
        assert_eq!(freshness(&u, now), 0.7);
        u.last_active = now - chrono::Duration::hours(72 + 168);
        assert_eq!(freshness(&u, now), 0.3);
    }

    #[test]
    fn ghost_rate_ignores_pending_and_caps_window() {
        use resonate_types::{Match, MatchState};
        let make = |state: MatchState, started: Option<chrono::DateTime<Utc>>| Match {
            id: Uuid::new_v4(),
            user_a_id: Uuid::new_v4(),
            user_b_id: Uuid::new_v4(),
            resonance_score: Some(70),
            waveform: None,
            state,
            liked_at_a: None,
            liked_at_b: None,
            conversation_started_at: started,
            unmatched_by: None,
        };
        let matches = vec![
            make(MatchState::Pending, None),
            make(MatchState::Matched, None),
            make(MatchState::Matched, Some(Utc::now())),
        ];
        assert_eq!(ghost_rate(&matches), 0.5);
        assert_eq!(ghost_rate(&[]), 0.0);
    }
}
