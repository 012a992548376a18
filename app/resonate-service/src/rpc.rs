//! The five RPC-shaped procedures the core exposes: `getMe`, `updateProfile`,
//! `completeOnboarding`, `events.track`, and `feed.discover`. No HTTP
//! transport is wired up here — the core is transport-agnostic, callable
//! directly as async functions by whatever binds a wire protocol to them.

use chrono::Utc;
use resonate_dfre::{discover_feed, FeedCandidate};
use resonate_errors::{CoreError, CoreResult};
use resonate_types::{BehavioralEvent, EventPayload, User};
use uuid::Uuid;

use crate::context::AppContext;

pub async fn get_me(ctx: &AppContext, user_id: Uuid) -> CoreResult<(User, Option<resonate_types::ResonanceProfile>)> {
    let user = ctx
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("user:{user_id}")))?;
    let profile = ctx.store.get_profile(user_id).await?;
    Ok((user, profile))
}

/// Bio/city/voice-url edits go straight to the store; the profile itself is
/// only rebuilt on the next scheduled or event-triggered RPB pass.
pub async fn update_profile(
    ctx: &AppContext,
    user_id: Uuid,
    bio: Option<String>,
    city: Option<String>,
    voice_url: Option<String>,
) -> CoreResult<User> {
    let mut user = ctx
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("user:{user_id}")))?;

    if let Some(bio) = bio {
        user.bio = Some(bio);
    }
    if let Some(city) = city {
        user.city = Some(city);
    }
    if let Some(voice_url) = voice_url {
        user.voice_url = Some(voice_url);
    }

    ctx.store.put_user(&user).await?;
    Ok(user)
}

/// Marks onboarding complete and kicks off the first RPB pass inline so the
/// user has a profile (even a sparse one) the moment they enter the feed.
pub async fn complete_onboarding(ctx: &AppContext, user_id: Uuid) -> CoreResult<User> {
    let mut user = ctx
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("user:{user_id}")))?;
    user.onboarding_complete = true;
    ctx.store.put_user(&user).await?;

    resonate_rpb::rebuild_profile(
        ctx.store.as_ref(),
        ctx.vector_store.as_ref(),
        ctx.cache.as_ref(),
        ctx.embedder.as_ref(),
        user_id,
    )
    .await?;

    Ok(user)
}

/// Appends a behavioral event. `voice_note_analyzed` events additionally
/// trigger an inline RPB rebuild (retried up to 3 times), matching the
/// `resonate/voice-note-uploaded` scheduler trigger for callers that don't
/// go through the scheduler.
pub async fn track_event(ctx: &AppContext, event: BehavioralEvent) -> CoreResult<()> {
    let is_voice_note = matches!(event.payload, EventPayload::VoiceNoteAnalyzed(_));
    let user_id = event.user_id;
    ctx.store.append_event(&event).await?;

    if is_voice_note {
        rebuild_with_retry(ctx, user_id, 3).await?;
    }

    Ok(())
}

async fn rebuild_with_retry(ctx: &AppContext, user_id: Uuid, max_attempts: u32) -> CoreResult<()> {
    let mut last_err = None;
    for attempt in 0..max_attempts {
        match resonate_rpb::rebuild_profile(
            ctx.store.as_ref(),
            ctx.vector_store.as_ref(),
            ctx.cache.as_ref(),
            ctx.embedder.as_ref(),
            user_id,
        )
        .await
        {
            Ok(_) => return Ok(()),
            Err(e) if e.is_retryable() => {
                tracing::warn!(user_id = %user_id, attempt, error = %e, "rpb rebuild attempt failed, retrying");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| CoreError::Upstream("rebuild retries exhausted".into())))
}

pub async fn discover(ctx: &AppContext, viewer_id: Uuid, page: usize) -> CoreResult<Vec<FeedCandidate>> {
    let store = ctx.store.clone();
    let cache = ctx.cache.clone();
    let ers_lookup = move |a: Uuid, b: Uuid| -> std::pin::Pin<Box<dyn std::future::Future<Output = CoreResult<u8>> + Send>> {
        let store = store.clone();
        let cache = cache.clone();
        Box::pin(async move {
            // DFRE's candidate pipeline doesn't currently thread an ANN cosine
            // score through this closure, so the vector-similarity component
            // falls back to its spec-given default of 0.5.
            let (score, _) = resonate_ers::compute_ers(store.as_ref(), cache.as_ref(), a, b, None).await?;
            Ok(score)
        })
    };

    discover_feed(
        ctx.store.as_ref(),
        ctx.vector_store.as_ref(),
        ctx.cache.as_ref(),
        ers_lookup,
        viewer_id,
        page,
    )
    .await
}

pub fn now_event(user_id: Uuid, session_id: Uuid, payload: EventPayload) -> BehavioralEvent {
    BehavioralEvent {
        id: Uuid::new_v4(),
        user_id,
        session_id,
        payload,
        client_ts: Utc::now(),
        server_ts: Utc::now(),
    }
}
