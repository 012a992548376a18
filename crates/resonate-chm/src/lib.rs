//! Conversation Health Monitor.
//!
//! Tracks the trajectory of an active conversation from five signals
//! (response-latency trend, message-length trend, sentiment trajectory,
//! initiative ratio, topic diversity), derives an overall health score,
//! drives the five-state health state machine, and generates a
//! conversation-starter nudge for the quieter party when a conversation
//! needs a push.

use chrono::{DateTime, Duration, Utc};
use resonate_errors::{CoreError, CoreResult};
use resonate_llm::Completer;
use resonate_store::Store;
use resonate_types::{Archetype, CommunicationStyle, Conversation, ConversationHealthState, Message};
use uuid::Uuid;

const NUDGE_SYSTEM_PROMPT: &str = "You are a conversation catalyst for a dating app. \
Your job is to generate ONE specific, curious question that could naturally restart a \
cooling conversation. Rules: Under 25 words; Must be a question (end with ?); Reference \
ONE of the provided interest tags if possible; Never generic; Never guilt-trippy; Should \
spark genuine curiosity; Match the energy of the archetype provided.";

const SWEEP_WINDOW_DAYS: i64 = 7;
const LATENCY_WINDOW: usize = 50;
const LENGTH_WINDOW: usize = 50;
const SENTIMENT_WINDOW: usize = 30;
const INITIATIVE_WINDOW: usize = 100;
const DIVERSITY_WINDOW: usize = 30;
const SESSION_GAP_HOURS: i64 = 2;
const NUDGE_TARGET_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct HealthSignals {
    /// `[-1,1]`, positive means responses are speeding up.
    pub latency: f64,
    /// `[-1,1]`, positive means messages are getting longer.
    pub length: f64,
    /// `[-1,1]`, positive means sentiment is improving.
    pub sentiment: f64,
    /// `[0,1]`, how evenly both parties start new sessions. 0.2 with a
    /// single starter, 0.5 with insufficient data.
    pub initiative: f64,
    /// `[0,1]`, lexical variety across the recent window.
    pub diversity: f64,
}

/// Chronological slice of up to `n` most recent messages, oldest first.
fn recent_window(messages: &[Message], n: usize) -> Vec<&Message> {
    let mut sorted: Vec<&Message> = messages.iter().collect();
    sorted.sort_by_key(|m| m.sent_at);
    let start = sorted.len().saturating_sub(n);
    sorted[start..].to_vec()
}

fn midpoint_split<'a>(items: &[&'a Message]) -> (&'a [&'a Message], &'a [&'a Message]) {
    let mid = items.len() / 2;
    items.split_at(mid)
}

/// Inter-response gaps (hours) between adjacent messages with different
/// senders, in chronological order.
fn response_gaps(messages: &[&Message]) -> Vec<f64> {
    let mut gaps = Vec::new();
    for pair in messages.windows(2) {
        if pair[0].sender_id.is_some() && pair[0].sender_id == pair[1].sender_id {
            continue;
        }
        let hours = (pair[1].sent_at - pair[0].sent_at).num_minutes() as f64 / 60.0;
        gaps.push(hours.max(0.0));
    }
    gaps
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn latency_trend(messages: &[Message]) -> f64 {
    let window = recent_window(messages, LATENCY_WINDOW);
    if window.len() < 4 {
        return 0.0;
    }
    let gaps = response_gaps(&window);
    if gaps.len() < 3 {
        return 0.0;
    }
    let (older, recent) = midpoint_split_f64(&gaps);
    let older_mean = mean(older);
    let recent_mean = mean(recent);
    if older_mean <= 0.0 {
        return 0.0;
    }
    (1.0 - recent_mean / older_mean).clamp(-1.0, 1.0)
}

fn midpoint_split_f64(values: &[f64]) -> (&[f64], &[f64]) {
    let mid = values.len() / 2;
    values.split_at(mid)
}

fn length_trend(messages: &[Message]) -> f64 {
    let window = recent_window(messages, LENGTH_WINDOW);
    if window.len() < 6 {
        return 0.0;
    }
    let (older, recent) = midpoint_split(&window);
    let older_mean = mean(&older.iter().map(|m| m.content.chars().count() as f64).collect::<Vec<_>>());
    let recent_mean = mean(&recent.iter().map(|m| m.content.chars().count() as f64).collect::<Vec<_>>());
    if older_mean <= 0.0 {
        return 0.0;
    }
    (recent_mean / older_mean - 1.0).clamp(-1.0, 1.0)
}

fn sentiment_trajectory(messages: &[Message]) -> f64 {
    let window = recent_window(messages, SENTIMENT_WINDOW);
    let scored: Vec<&&Message> = window.iter().filter(|m| m.sentiment.is_some()).collect();
    if scored.len() < 4 {
        return 0.0;
    }
    let values: Vec<f64> = scored.iter().map(|m| m.sentiment.unwrap()).collect();
    let (older, recent) = midpoint_split_f64(&values);
    (mean(recent) - mean(older)).clamp(-1.0, 1.0)
}

fn initiative_ratio(messages: &[Message]) -> f64 {
    let window = recent_window(messages, INITIATIVE_WINDOW);
    let mut counts: std::collections::HashMap<Uuid, usize> = std::collections::HashMap::new();
    let mut prev_ts: Option<DateTime<Utc>> = None;

    for message in &window {
        let is_session_start = match prev_ts {
            None => true,
            Some(prev) => (message.sent_at - prev).num_minutes() as f64 / 60.0 > SESSION_GAP_HOURS as f64,
        };
        if is_session_start {
            if let Some(sender_id) = message.sender_id {
                *counts.entry(sender_id).or_insert(0) += 1;
            }
        }
        prev_ts = Some(message.sent_at);
    }

    match counts.len() {
        0 => 0.5,
        1 => 0.2,
        _ => {
            let mut values: Vec<usize> = counts.values().copied().collect();
            values.sort_unstable();
            let min = *values.first().unwrap() as f64;
            let max = *values.last().unwrap() as f64;
            if max <= 0.0 {
                0.5
            } else {
                min / max
            }
        }
    }
}

fn topic_diversity(messages: &[Message]) -> f64 {
    let window = recent_window(messages, DIVERSITY_WINDOW);
    if window.len() < 5 {
        return 0.5;
    }
    let mut unique = std::collections::HashSet::new();
    let mut total = 0usize;
    for message in &window {
        for token in message.content.to_lowercase().split_whitespace() {
            if token.len() > 3 {
                unique.insert(token.to_string());
                total += 1;
            }
        }
    }
    if total == 0 {
        return 0.5;
    }
    let raw = unique.len() as f64 / total as f64;
    ((raw - 0.2) / 0.5).clamp(0.0, 1.0)
}

/// Extracts the five signals from a conversation's message history.
/// Returns `None` only when there are no messages at all.
pub fn extract_signals(messages: &[Message]) -> Option<HealthSignals> {
    if messages.is_empty() {
        return None;
    }
    Some(HealthSignals {
        latency: latency_trend(messages),
        length: length_trend(messages),
        sentiment: sentiment_trajectory(messages),
        initiative: initiative_ratio(messages),
        diversity: topic_diversity(messages),
    })
}

/// `round(((latency+1)/2)*25 + ((length+1)/2)*20 + ((sentiment+1)/2)*20
/// + initiative*20 + diversity*15)`, clamped to `[0,100]`.
pub fn health_score(signals: &HealthSignals) -> f64 {
    let score = ((signals.latency + 1.0) / 2.0) * 25.0
        + ((signals.length + 1.0) / 2.0) * 20.0
        + ((signals.sentiment + 1.0) / 2.0) * 20.0
        + signals.initiative * 20.0
        + signals.diversity * 15.0;
    score.round().clamp(0.0, 100.0)
}

/// State machine over `warming, active, cooling, dormant, revived`.
pub fn next_state(
    current: ConversationHealthState,
    signals: &HealthSignals,
    days_since_last_message: f64,
) -> ConversationHealthState {
    use ConversationHealthState::*;

    if days_since_last_message >= 3.0 {
        return Dormant;
    }
    if current == Dormant && days_since_last_message < 1.0 {
        return Revived;
    }

    let neg = [
        signals.latency < -0.3,
        signals.length < -0.3,
        signals.sentiment < -0.2,
        signals.initiative < 0.3,
        signals.diversity < 0.3,
    ]
    .into_iter()
    .filter(|x| *x)
    .count();
    if neg >= 2 {
        return Cooling;
    }

    let pos = [
        signals.latency > 0.2,
        signals.length > 0.0,
        signals.sentiment > 0.0,
        signals.initiative > 0.5,
        signals.diversity > 0.5,
    ]
    .into_iter()
    .filter(|x| *x)
    .count();
    if pos >= 3 {
        return Active;
    }

    if current == Warming {
        return if pos >= 2 { Active } else { Warming };
    }

    current
}

/// The participant who sent fewer of the last 10 messages. Ties resolve to
/// `user_a_id`.
pub fn identify_quiet_party(messages: &[Message], user_a_id: Uuid, user_b_id: Uuid) -> Uuid {
    let window = recent_window(messages, NUDGE_TARGET_WINDOW);
    let mut counts: std::collections::HashMap<Uuid, usize> = std::collections::HashMap::new();
    for message in &window {
        if let Some(sender_id) = message.sender_id {
            *counts.entry(sender_id).or_insert(0) += 1;
        }
    }
    let a_count = counts.get(&user_a_id).copied().unwrap_or(0);
    let b_count = counts.get(&user_b_id).copied().unwrap_or(0);
    if b_count < a_count {
        user_b_id
    } else {
        user_a_id
    }
}

/// One participant's profile shape relevant to nudge generation.
#[derive(Debug, Clone, Copy)]
pub struct NudgeParticipant {
    pub archetype: Archetype,
    pub style: CommunicationStyle,
}

/// Generates a nudge for the quiet party via the completion interface, using
/// the fixed system prompt and a structured user prompt carrying both
/// participants' interest tags and archetype/style, plus the last 3
/// messages' content.
pub async fn generate_nudge(
    completer: &dyn Completer,
    interest_tags: &[String],
    quiet_party: NudgeParticipant,
    other_party: NudgeParticipant,
    recent_messages: &[String],
) -> CoreResult<String> {
    let tags = if interest_tags.is_empty() {
        "no shared interest tags on file".to_string()
    } else {
        interest_tags.join(", ")
    };
    let recent = if recent_messages.is_empty() {
        "no recent messages".to_string()
    } else {
        recent_messages.join(" | ")
    };
    let user_prompt = format!(
        "Interest tags: {tags}. Quiet party energy: {} archetype, {} style. \
         Other party energy: {} archetype, {} style. Recent messages: {recent}.",
        quiet_party.archetype, quiet_party.style, other_party.archetype, other_party.style
    );
    completer
        .complete(NUDGE_SYSTEM_PROMPT, &user_prompt)
        .await
        .map_err(|e| CoreError::Upstream(e.to_string()))
        .map(|s| s.trim().to_string())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub scanned: usize,
    pub state_changed: usize,
    pub nudges_generated: usize,
    pub failed: usize,
}

/// Serially walks every conversation active within the last 7 days,
/// recomputes health, advances the state machine, and generates a nudge for
/// any conversation that just transitioned into `Cooling` and doesn't
/// already have a pending one.
pub async fn run_health_sweep(
    store: &dyn Store,
    completer: &dyn Completer,
    interest_tags_for: impl Fn(Uuid) -> Vec<String>,
) -> CoreResult<SweepReport> {
    let now = Utc::now();
    let conversations = store.list_all_conversations().await?;
    let mut report = SweepReport::default();

    for mut conversation in conversations {
        let Some(last_message_at) = conversation.last_message_at else {
            continue;
        };
        if (now - last_message_at) > Duration::days(SWEEP_WINDOW_DAYS) {
            continue;
        }
        report.scanned += 1;

        let messages = match store.list_recent_messages(match_id_for(&conversation), 200).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(conversation_id = %conversation.id, error = %e, "chm sweep: failed to load messages");
                report.failed += 1;
                continue;
            }
        };

        let Some(signals) = extract_signals(&messages) else {
            continue;
        };
        let days_since_last = (now - last_message_at).num_minutes() as f64 / (60.0 * 24.0);
        let new_state = next_state(conversation.health_state, &signals, days_since_last);

        if new_state != conversation.health_state {
            report.state_changed += 1;
            let became_cooling = new_state == ConversationHealthState::Cooling;
            conversation.health_state = new_state;

            if became_cooling && conversation.pending_nudge.is_none() {
                match store.get_match(conversation.match_id).await {
                    Ok(Some(m)) => {
                        let quiet_party_id = identify_quiet_party(&messages, m.user_a_id, m.user_b_id);
                        let other_party_id = if quiet_party_id == m.user_a_id { m.user_b_id } else { m.user_a_id };

                        let quiet_profile = store.get_profile(quiet_party_id).await.ok().flatten();
                        let other_profile = store.get_profile(other_party_id).await.ok().flatten();
                        let quiet_party = NudgeParticipant {
                            archetype: quiet_profile.as_ref().and_then(|p| p.archetype).unwrap_or(Archetype::Wave),
                            style: quiet_profile.as_ref().map(|p| p.style).unwrap_or(CommunicationStyle::Expressive),
                        };
                        let other_party = NudgeParticipant {
                            archetype: other_profile.as_ref().and_then(|p| p.archetype).unwrap_or(Archetype::Wave),
                            style: other_profile.as_ref().map(|p| p.style).unwrap_or(CommunicationStyle::Expressive),
                        };

                        let mut tags = interest_tags_for(quiet_party_id);
                        tags.extend(interest_tags_for(other_party_id));
                        tags.sort();
                        tags.dedup();

                        let recent_messages: Vec<String> = recent_window(&messages, 3)
                            .into_iter()
                            .map(|m| m.content.clone())
                            .collect();

                        match generate_nudge(completer, &tags, quiet_party, other_party, &recent_messages).await {
                            Ok(nudge) => {
                                conversation.pending_nudge = Some(nudge);
                                conversation.nudge_generated_at = Some(now);
                                report.nudges_generated += 1;
                            }
                            Err(e) => {
                                tracing::warn!(conversation_id = %conversation.id, error = %e, "chm sweep: nudge generation failed");
                                report.failed += 1;
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::warn!(conversation_id = %conversation.id, "chm sweep: underlying match not found");
                    }
                    Err(e) => {
                        tracing::warn!(conversation_id = %conversation.id, error = %e, "chm sweep: failed to load match");
                        report.failed += 1;
                    }
                }
            }
        }

        store.put_conversation(&conversation).await?;
    }

    Ok(report)
}

/// The conversation row only carries `match_id`; `list_recent_messages`
/// keys off `conversation_id`, which in this store equals the conversation's
/// own id (one conversation per match, created together).
fn match_id_for(conversation: &Conversation) -> Uuid {
    conversation.id
}

#[cfg(test)]
mod tests {
    use super::*;
    use resonate_llm::OfflineCompleter;
    use resonate_store::SledStore;
    use resonate_types::{Match, MatchState};

    fn message(conversation_id: Uuid, sender: Uuid, content: &str, sent_at: DateTime<Utc>, sentiment: Option<f64>) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: Some(sender),
            content: content.into(),
            content_type: "text".into(),
            sentiment,
            emotion_tag: None,
            sent_at,
            read_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn no_messages_yields_no_signals() {
        assert!(extract_signals(&[]).is_none());
    }

    #[test]
    fn cooling_trend_lowers_health_score() {
        let conversation_id = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let base = Utc::now() - Duration::days(3);
        let mut messages = Vec::new();
        for i in 0..20 {
            let sender = if i % 2 == 0 { a } else { b };
            let gap = Duration::minutes(5) + Duration::minutes(i * 60);
            let content = if i < 10 { "a reasonably long message about our shared hobbies" } else { "k" };
            messages.push(message(conversation_id, sender, content, base + gap, Some(if i < 10 { 0.4 } else { -0.2 })));
        }
        let signals = extract_signals(&messages).unwrap();
        let score = health_score(&signals);
        assert!(score < 50.0, "expected cooling score, got {score}");
    }

    #[test]
    fn scenario_cooling_to_nudge_target_matches_spec() {
        // 20 messages, recent latency doubling older latency, length halved,
        // low initiative — expected: new state cooling.
        let conversation_id = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let base = Utc::now() - Duration::hours(40);
        let mut messages = Vec::new();
        let mut t = base;
        for i in 0..10 {
            messages.push(message(conversation_id, if i % 2 == 0 { a } else { b }, "a long warm message about our weekend plans together", t, Some(0.3)));
            t += Duration::minutes(10);
        }
        for i in 0..10 {
            messages.push(message(conversation_id, if i % 2 == 0 { a } else { b }, "k", t, Some(-0.1)));
            t += Duration::minutes(20);
        }
        let signals = extract_signals(&messages).unwrap();
        let new_state = next_state(ConversationHealthState::Active, &signals, 0.1);
        assert_eq!(new_state, ConversationHealthState::Cooling);

        let quiet = identify_quiet_party(&messages, a, b);
        assert!(quiet == a || quiet == b);
    }

    #[test]
    fn scenario_dormant_after_four_days() {
        let signals = HealthSignals::default();
        let new_state = next_state(ConversationHealthState::Active, &signals, 4.0);
        assert_eq!(new_state, ConversationHealthState::Dormant);
    }

    #[test]
    fn quiet_party_ties_resolve_to_user_a() {
        let conversation_id = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let base = Utc::now();
        let messages = vec![
            message(conversation_id, a, "hey", base, None),
            message(conversation_id, b, "hi", base + Duration::minutes(1), None),
        ];
        assert_eq!(identify_quiet_party(&messages, a, b), a);
    }

    #[test]
    fn quiet_party_is_the_one_who_sent_fewer_of_the_last_ten() {
        let conversation_id = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let base = Utc::now();
        let mut messages = Vec::new();
        for i in 0..9 {
            messages.push(message(conversation_id, a, "hey", base + Duration::minutes(i), None));
        }
        messages.push(message(conversation_id, b, "hi", base + Duration::minutes(9), None));
        assert_eq!(identify_quiet_party(&messages, a, b), b);
    }

    #[test]
    fn state_machine_warming_needs_two_positive_signals_to_advance() {
        // Only one signal crosses a positive threshold, none cross a
        // negative one: stays `warming`.
        let weak = HealthSignals { latency: 0.3, length: 0.0, sentiment: 0.0, initiative: 0.4, diversity: 0.4 };
        assert_eq!(next_state(ConversationHealthState::Warming, &weak, 0.1), ConversationHealthState::Warming);

        // Two signals cross the positive threshold: advances to `active`.
        let strong = HealthSignals { latency: 0.3, length: 0.1, sentiment: 0.0, initiative: 0.4, diversity: 0.4 };
        assert_eq!(next_state(ConversationHealthState::Warming, &strong, 0.1), ConversationHealthState::Active);
    }

    #[tokio::test]
    async fn generate_nudge_uses_fixed_system_prompt_and_is_a_question() {
        let completer = OfflineCompleter::default();
        let quiet = NudgeParticipant { archetype: Archetype::Spark, style: CommunicationStyle::Witty };
        let other = NudgeParticipant { archetype: Archetype::Anchor, style: CommunicationStyle::Precise };
        let nudge = generate_nudge(
            &completer,
            &["hiking".to_string()],
            quiet,
            other,
            &["hey!".to_string(), "how's it going".to_string()],
        )
        .await
        .unwrap();
        assert!(nudge.split_whitespace().count() < 30);
    }

    #[tokio::test]
    async fn sweep_skips_conversations_outside_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().to_str().unwrap()).unwrap();
        let completer = OfflineCompleter::default();

        let conversation = Conversation {
            id: Uuid::new_v4(),
            match_id: Uuid::new_v4(),
            last_message_at: Some(Utc::now() - Duration::days(30)),
            health_state: ConversationHealthState::Active,
            pending_nudge: None,
            nudge_generated_at: None,
            archived_by_a: false,
            archived_by_b: false,
        };
        store.put_conversation(&conversation).await.unwrap();

        let report = run_health_sweep(&store, &completer, |_| vec![]).await.unwrap();
        assert_eq!(report.scanned, 0);
    }

    #[tokio::test]
    async fn sweep_generates_nudge_on_transition_into_cooling() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().to_str().unwrap()).unwrap();
        let completer = OfflineCompleter::default();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let m = Match {
            id: Uuid::new_v4(),
            user_a_id: a,
            user_b_id: b,
            resonance_score: Some(80),
            waveform: None,
            state: MatchState::ConversationStarted,
            liked_at_a: Some(Utc::now() - Duration::days(2)),
            liked_at_b: Some(Utc::now() - Duration::days(2)),
            conversation_started_at: Some(Utc::now() - Duration::days(2)),
            unmatched_by: None,
        };
        store.put_match(&m).await.unwrap();

        let conversation_id = Uuid::new_v4();
        let base = Utc::now() - Duration::hours(40);
        let mut t = base;
        for i in 0..10 {
            store
                .put_message(&message(
                    conversation_id,
                    if i % 2 == 0 { a } else { b },
                    "a long warm message about our weekend plans together",
                    t,
                    Some(0.3),
                ))
                .await
                .unwrap();
            t += Duration::minutes(10);
        }
        for i in 0..10 {
            store
                .put_message(&message(conversation_id, if i % 2 == 0 { a } else { b }, "k", t, Some(-0.1)))
                .await
                .unwrap();
            t += Duration::minutes(20);
        }

        let conversation = Conversation {
            id: conversation_id,
            match_id: m.id,
            last_message_at: Some(t - Duration::minutes(20)),
            health_state: ConversationHealthState::Active,
            pending_nudge: None,
            nudge_generated_at: None,
            archived_by_a: false,
            archived_by_b: false,
        };
        store.put_conversation(&conversation).await.unwrap();

        let report = run_health_sweep(&store, &completer, |_| vec!["hiking".to_string()]).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.state_changed, 1);
        assert_eq!(report.nudges_generated, 1);

        let persisted = store.get_conversation(conversation_id).await.unwrap().unwrap();
        assert_eq!(persisted.health_state, ConversationHealthState::Cooling);
        assert!(persisted.pending_nudge.is_some());
    }
}
