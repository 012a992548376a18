//! Emotional Resonance Score engine.
//!
//! Computes a single `0..=100` compatibility score for a user pair from five
//! weighted components (vector similarity 30, chronotype overlap 15,
//! communication compatibility 20, depth differential 15, archetype
//! complementarity 20), then applies four multiplicative modifiers
//! (geographic, recency, completeness, mutual interest). Results are cached
//! under `ers:{minId}:{maxId}:score` for an hour; a waveform visualization
//! payload is synthesized alongside the score.

use chrono::Utc;
use once_cell::sync::Lazy;
use resonate_cache::CacheAdapter;
use resonate_errors::{CoreError, CoreResult};
use resonate_store::Store;
use resonate_types::{Archetype, CommunicationStyle, Match, ResonanceProfile, User, WaveformPayload};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

const CACHE_TTL: Duration = Duration::from_secs(3600);
const WAVEFORM_BINS: usize = 64;

const W_VECTOR_SIM: f64 = 30.0;
const W_CHRONO_OVERLAP: f64 = 15.0;
const W_COMM_COMPAT: f64 = 20.0;
const W_DEPTH_DIFF: f64 = 15.0;
const W_ARCHETYPE_COMPLEMENT: f64 = 20.0;

/// Communication-style compatibility, symmetric, `[0,1]`. Same-style pairs
/// score `0.85`; off-diagonal pairs vary by how differently the two styles
/// read in conversation.
static STYLE_MATRIX: Lazy<HashMap<(CommunicationStyle, CommunicationStyle), f64>> = Lazy::new(|| {
    use CommunicationStyle::*;
    let rows: [(CommunicationStyle, [f64; 5]); 5] = [
        (Expressive, [0.85, 0.55, 0.75, 0.35, 0.70]),
        (Precise, [0.55, 0.85, 0.40, 0.70, 0.60]),
        (Poetic, [0.75, 0.40, 0.85, 0.45, 0.65]),
        (Minimal, [0.35, 0.70, 0.45, 0.85, 0.50]),
        (Witty, [0.70, 0.60, 0.65, 0.50, 0.85]),
    ];
    let order = [Expressive, Precise, Poetic, Minimal, Witty];
    let mut map = HashMap::new();
    for (a, scores) in rows.iter() {
        for (b, score) in order.iter().zip(scores.iter()) {
            map.insert((*a, *b), *score);
        }
    }
    map
});

/// Archetype complementarity, symmetric, `[0,1]`. Same-archetype pairs score
/// `0.85`; complementary opposites (Spark/Anchor, Ember/Storm) score as high
/// or higher.
static ARCHETYPE_MATRIX: Lazy<HashMap<(Archetype, Archetype), f64>> = Lazy::new(|| {
    use Archetype::*;
    let rows: [(Archetype, [f64; 5]); 5] = [
        (Spark, [0.85, 0.90, 0.60, 0.75, 0.50]),
        (Anchor, [0.90, 0.85, 0.60, 0.45, 0.55]),
        (Wave, [0.60, 0.60, 0.85, 0.60, 0.60]),
        (Ember, [0.75, 0.45, 0.60, 0.85, 0.90]),
        (Storm, [0.50, 0.55, 0.60, 0.90, 0.85]),
    ];
    let order = [Spark, Anchor, Wave, Ember, Storm];
    let mut map = HashMap::new();
    for (a, scores) in rows.iter() {
        for (b, score) in order.iter().zip(scores.iter()) {
            map.insert((*a, *b), *score);
        }
    }
    map
});

fn style_compat(a: CommunicationStyle, b: CommunicationStyle) -> f64 {
    *STYLE_MATRIX.get(&(a, b)).unwrap_or(&0.5)
}

fn archetype_complement(a: Archetype, b: Archetype) -> f64 {
    *ARCHETYPE_MATRIX.get(&(a, b)).unwrap_or(&0.5)
}

/// Per-hour `min(a,b)` summed over `max(a,b)` summed; `0.5` if both curves
/// are entirely flat (no recorded activity to compare).
fn chrono_overlap(a: &[f64; 24], b: &[f64; 24]) -> f64 {
    let min_sum: f64 = a.iter().zip(b.iter()).map(|(x, y)| x.min(*y)).sum();
    let max_sum: f64 = a.iter().zip(b.iter()).map(|(x, y)| x.max(*y)).sum();
    if max_sum <= 0.0 {
        0.5
    } else {
        (min_sum / max_sum).clamp(0.0, 1.0)
    }
}

fn depth_differential(a: f64, b: f64) -> f64 {
    (1.0 - 2.0 * (a - b).abs()).max(0.0)
}

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const R: f64 = 6371.0;
    let (lat1, lon1, lat2, lon2) = (lat1.to_radians(), lon1.to_radians(), lat2.to_radians(), lon2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * R * h.sqrt().asin()
}

/// Haversine distance `d` km. `<=50` -> 1.0; `<=200` -> `0.95 - (d-50)*0.0005`;
/// beyond that the same linear formula, floored at 0.7. 1.0 if either
/// location is unknown.
fn geographic_modifier(a: &User, b: &User) -> f64 {
    if let (Some(city_a), Some(city_b)) = (&a.city, &b.city) {
        if city_a.eq_ignore_ascii_case(city_b) {
            return 1.0;
        }
    }
    let (Some(lat_a), Some(lon_a), Some(lat_b), Some(lon_b)) = (a.latitude, a.longitude, b.latitude, b.longitude)
    else {
        return 1.0;
    };
    let d = haversine_km(lat_a, lon_a, lat_b, lon_b);
    if d <= 50.0 {
        1.0
    } else {
        (0.95 - (d - 50.0) * 0.0005).max(0.7)
    }
}

/// `m = max(daysSinceActive(A), daysSinceActive(B))`. `<=3` -> 1.0;
/// `<=7` -> `1.0 - (m-3)*0.05`; beyond that the same linear formula,
/// floored at 0.6.
fn recency_modifier(a: &User, b: &User, now: chrono::DateTime<Utc>) -> f64 {
    let m = a.days_since_active(now).max(b.days_since_active(now));
    if m <= 3.0 {
        1.0
    } else if m <= 7.0 {
        1.0 - (m - 3.0) * 0.05
    } else {
        (0.8 - (m - 7.0) * 0.03).max(0.6)
    }
}

/// `0.5` if either user's archetype is null (profile not yet classified),
/// else `1.0`.
fn completeness_modifier(a: &ResonanceProfile, b: &ResonanceProfile) -> f64 {
    if a.archetype.is_none() || b.archetype.is_none() {
        0.5
    } else {
        1.0
    }
}

/// Neutral `1.0`, reserved for a future match-history signal.
fn mutual_interest_modifier(_existing_match: Option<&Match>) -> f64 {
    1.0
}

/// Per-archetype waveform shape factor: how "spiky" (high-frequency) vs
/// "smooth" (low-frequency) a user's bins should look.
fn archetype_wave_factor(archetype: Archetype) -> f64 {
    match archetype {
        Archetype::Spark => 3.0,
        Archetype::Anchor => 1.0,
        Archetype::Wave => 2.0,
        Archetype::Ember => 2.5,
        Archetype::Storm => 4.0,
    }
}

fn fxhash64(a: Uuid, b: Uuid) -> u64 {
    let (lo, hi) = Match::pair_key(a, b);
    let mut h: u64 = 1469598103934665603;
    for byte in lo.as_bytes().iter().chain(hi.as_bytes().iter()) {
        h ^= *byte as u64;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

/// Deterministic per-pair bin generator: `storm` archetype pairs (the
/// highest-entropy case) are seeded from the sorted user-id pair so the same
/// pair always renders the same waveform, rather than needing a random seed
/// persisted alongside the match row.
fn waveform_bins(archetype: Archetype, seed: u64, phase_offset: f64) -> Vec<f64> {
    let factor = archetype_wave_factor(archetype);
    let seed_phase = (seed % 1000) as f64 / 1000.0 * std::f64::consts::TAU;
    (0..WAVEFORM_BINS)
        .map(|i| {
            let t = i as f64 / WAVEFORM_BINS as f64;
            let v = (t * std::f64::consts::TAU * factor + seed_phase + phase_offset).sin();
            (v + 1.0) / 2.0
        })
        .collect()
}

fn blend_hex(a: &str, b: &str) -> String {
    let parse = |s: &str| -> (u8, u8, u8) {
        let s = s.trim_start_matches('#');
        let r = u8::from_str_radix(&s[0..2], 16).unwrap_or(0);
        let g = u8::from_str_radix(&s[2..4], 16).unwrap_or(0);
        let b = u8::from_str_radix(&s[4..6], 16).unwrap_or(0);
        (r, g, b)
    };
    let (ar, ag, ab) = parse(a);
    let (br, bg, bb) = parse(b);
    format!(
        "#{:02X}{:02X}{:02X}",
        ((ar as u16 + br as u16) / 2) as u8,
        ((ag as u16 + bg as u16) / 2) as u8,
        ((ab as u16 + bb as u16) / 2) as u8,
    )
}

fn cache_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = Match::pair_key(a, b);
    format!("ers:{lo}:{hi}:score")
}

/// Computes (and caches) the ERS for a user pair. Raises `NotFound` if
/// either user or either profile row is missing — ERS requires a completed
/// RPB pass for both sides. `vector_sim_override` is the ANN-reported
/// cosine similarity from the caller's candidate retrieval stage, when
/// available; absent that, the vector-similarity component defaults to 0.5.
pub async fn compute_ers(
    store: &dyn Store,
    cache: &dyn CacheAdapter,
    user_a_id: Uuid,
    user_b_id: Uuid,
    vector_sim_override: Option<f64>,
) -> CoreResult<(u8, WaveformPayload)> {
    let key = cache_key(user_a_id, user_b_id);
    if let Some(cached) = cache.get(&key).await.map_err(|e| CoreError::Upstream(e.to_string()))? {
        if let Ok(score) = serde_json::from_slice::<u8>(&cached) {
            let waveform = build_waveform(store, user_a_id, user_b_id).await?;
            return Ok((score, waveform));
        }
    }

    let user_a = store
        .get_user(user_a_id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("user:{user_a_id}")))?;
    let user_b = store
        .get_user(user_b_id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("user:{user_b_id}")))?;
    let profile_a = store
        .get_profile(user_a_id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("profile:{user_a_id}")))?;
    let profile_b = store
        .get_profile(user_b_id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("profile:{user_b_id}")))?;

    let archetype_a = profile_a.archetype.unwrap_or(Archetype::Wave);
    let archetype_b = profile_b.archetype.unwrap_or(Archetype::Wave);

    let chrono = chrono_overlap(&profile_a.hourly_activity, &profile_b.hourly_activity);
    let comm = style_compat(profile_a.style, profile_b.style);
    let depth = depth_differential(profile_a.depth_seeking, profile_b.depth_seeking);
    let archetype_score = archetype_complement(archetype_a, archetype_b);
    let vector_sim = vector_sim_override.unwrap_or(0.5);

    let base = vector_sim * W_VECTOR_SIM
        + chrono * W_CHRONO_OVERLAP
        + comm * W_COMM_COMPAT
        + depth * W_DEPTH_DIFF
        + archetype_score * W_ARCHETYPE_COMPLEMENT;

    let existing_match = find_existing_match(store, user_a_id, user_b_id).await?;

    let geo = geographic_modifier(&user_a, &user_b);
    let recency = recency_modifier(&user_a, &user_b, Utc::now());
    let completeness = completeness_modifier(&profile_a, &profile_b);
    let mutual = mutual_interest_modifier(existing_match.as_ref());

    let score = (base * geo * recency * completeness * mutual).round().clamp(0.0, 100.0) as u8;

    let bytes = serde_json::to_vec(&score).map_err(|e| CoreError::Upstream(e.to_string()))?;
    cache
        .set(&key, &bytes, Some(CACHE_TTL))
        .await
        .map_err(|e| CoreError::Upstream(e.to_string()))?;

    let waveform = waveform_from_archetypes(archetype_a, archetype_b, user_a_id, user_b_id);
    Ok((score, waveform))
}

async fn find_existing_match(store: &dyn Store, a: Uuid, b: Uuid) -> CoreResult<Option<Match>> {
    let matches = store.list_matches_for_user(a).await?;
    Ok(matches.into_iter().find(|m| m.involves(b)))
}

async fn build_waveform(store: &dyn Store, user_a_id: Uuid, user_b_id: Uuid) -> CoreResult<WaveformPayload> {
    let profile_a = store.get_profile(user_a_id).await?;
    let profile_b = store.get_profile(user_b_id).await?;
    let archetype_a = profile_a.and_then(|p| p.archetype).unwrap_or(Archetype::Wave);
    let archetype_b = profile_b.and_then(|p| p.archetype).unwrap_or(Archetype::Wave);
    Ok(waveform_from_archetypes(archetype_a, archetype_b, user_a_id, user_b_id))
}

fn waveform_from_archetypes(archetype_a: Archetype, archetype_b: Archetype, user_a_id: Uuid, user_b_id: Uuid) -> WaveformPayload {
    let seed = fxhash64(user_a_id, user_b_id);
    let bins_a = waveform_bins(archetype_a, seed, 0.0);
    let bins_b = waveform_bins(archetype_b, seed, std::f64::consts::PI / 4.0);
    WaveformPayload {
        bins_a,
        bins_b,
        blended_color_hex: blend_hex(archetype_a.color_hex(), archetype_b.color_hex()),
    }
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

    fn user(city: &str) -> User {
        User {
            id: Uuid::new_v4(),
            display_name: "Test".into(),
            bio: None,
            pronouns: None,
            city: Some(city.into()),
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

    fn profile(user_id: Uuid, archetype: Archetype, style: CommunicationStyle) -> ResonanceProfile {
        ResonanceProfile {
            user_id,
            archetype: Some(archetype),
            style,
            dominant_emotion_tags: vec![],
            hourly_activity: [0.5; 24],
            vocabulary_richness: 0.5,
            humor_detection: 0.5,
            depth_seeking: 0.5,
            completeness: 80.0,
            embedding_generated: true,
            last_recalculated: Utc::now(),
            model_version: "test".into(),
        }
    }

    fn profile_with_hours(user_id: Uuid, archetype: Archetype, style: CommunicationStyle, depth: f64, hourly: [f64; 24]) -> ResonanceProfile {
        let mut p = profile(user_id, archetype, style);
        p.depth_seeking = depth;
        p.hourly_activity = hourly;
        p
    }

    #[tokio::test]
    async fn compute_ers_is_symmetric_and_cached() {
        let store = SledStore::open(tmp_dir().path().to_str().unwrap()).unwrap();
        let cache = SledCache::open(tmp_dir().path().to_str().unwrap()).unwrap();

        let a = user("Austin");
        let b = user("Austin");
        store.put_user(&a).await.unwrap();
        store.put_user(&b).await.unwrap();
        store
            .put_profile(&profile(a.id, Archetype::Spark, CommunicationStyle::Witty))
            .await
            .unwrap();
        store
            .put_profile(&profile(b.id, Archetype::Anchor, CommunicationStyle::Expressive))
            .await
            .unwrap();

        let (score_ab, _) = compute_ers(&store, &cache, a.id, b.id, None).await.unwrap();
        let (score_ba, _) = compute_ers(&store, &cache, b.id, a.id, None).await.unwrap();
        assert_eq!(score_ab, score_ba);
        assert!(score_ab > 0);
    }

    #[tokio::test]
    async fn compute_ers_errors_when_profile_missing() {
        let store = SledStore::open(tmp_dir().path().to_str().unwrap()).unwrap();
        let cache = SledCache::open(tmp_dir().path().to_str().unwrap()).unwrap();
        let a = user("Austin");
        let b = user("Denver");
        store.put_user(&a).await.unwrap();
        store.put_user(&b).await.unwrap();

        let result = compute_ers(&store, &cache, a.id, b.id, None).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn scenario_identical_twins_scores_93() {
        let store = SledStore::open(tmp_dir().path().to_str().unwrap()).unwrap();
        let cache = SledCache::open(tmp_dir().path().to_str().unwrap()).unwrap();

        let a = user("Brooklyn");
        let b = user("Brooklyn");
        store.put_user(&a).await.unwrap();
        store.put_user(&b).await.unwrap();

        let hours = {
            let mut h = [0.1; 24];
            h[9] = 0.1;
            h
        };
        store
            .put_profile(&profile_with_hours(a.id, Archetype::Wave, CommunicationStyle::Poetic, 0.8, hours))
            .await
            .unwrap();
        store
            .put_profile(&profile_with_hours(b.id, Archetype::Wave, CommunicationStyle::Poetic, 0.8, hours))
            .await
            .unwrap();

        let (score, _) = compute_ers(&store, &cache, a.id, b.id, Some(0.95)).await.unwrap();
        assert_eq!(score, 93);
    }

    #[tokio::test]
    async fn scenario_no_overlap_schedule_scores_64() {
        let store = SledStore::open(tmp_dir().path().to_str().unwrap()).unwrap();
        let cache = SledCache::open(tmp_dir().path().to_str().unwrap()).unwrap();

        let a = user("Austin");
        let b = user("Denver");
        store.put_user(&a).await.unwrap();
        store.put_user(&b).await.unwrap();

        let mut hours_a = [0.0; 24];
        hours_a[2] = 1.0;
        let mut hours_b = [0.0; 24];
        hours_b[14] = 1.0;

        store
            .put_profile(&profile_with_hours(a.id, Archetype::Wave, CommunicationStyle::Poetic, 0.5, hours_a))
            .await
            .unwrap();
        store
            .put_profile(&profile_with_hours(b.id, Archetype::Wave, CommunicationStyle::Poetic, 0.5, hours_b))
            .await
            .unwrap();

        let (score, _) = compute_ers(&store, &cache, a.id, b.id, None).await.unwrap();
        assert_eq!(score, 64);
    }

    #[test]
    fn depth_differential_matches_spec_formula() {
        assert_eq!(depth_differential(0.5, 0.5), 1.0);
        assert_eq!(depth_differential(0.8, 0.3), 0.0);
    }

    #[test]
    fn waveform_has_64_bins_and_deterministic_seed() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let w1 = waveform_from_archetypes(Archetype::Storm, Archetype::Storm, a, b);
        let w2 = waveform_from_archetypes(Archetype::Storm, Archetype::Storm, a, b);
        assert_eq!(w1.bins_a.len(), WAVEFORM_BINS);
        assert_eq!(w1.bins_a, w2.bins_a);
    }
}
