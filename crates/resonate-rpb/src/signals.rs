//! The six independent signal extractors. Each tolerates the absence of any
//! other signal source and returns [`Bundle::Absent`] rather than failing.

use chrono::{DateTime, Timelike, Utc};
use resonate_types::{BehavioralEvent, EventPayload, Message, SpeakingPace, User};

/// A signal aggregator's output: present with typed data, or absent.
#[derive(Debug, Clone)]
pub enum Bundle<T> {
    Present(T),
    Absent,
}

impl<T> Bundle<T> {
    pub fn as_ref(&self) -> Option<&T> {
        match self {
            Bundle::Present(t) => Some(t),
            Bundle::Absent => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Bundle::Present(_))
    }
}

#[derive(Debug, Clone)]
pub struct VoiceSignals {
    pub word_count: u32,
    pub vocabulary_richness: f64,
    pub sentiment: f64,
    pub dominant_emotions: Vec<String>,
    pub pace: SpeakingPace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BioStyle {
    Minimal,
    Moderate,
    Expressive,
}

#[derive(Debug, Clone)]
pub struct BioSignals {
    pub word_count: u32,
    pub edit_count: u32,
    pub deletion_rate: f64,
    pub style: BioStyle,
}

#[derive(Debug, Clone)]
pub struct MessagingSignals {
    pub avg_char_length: f64,
    pub question_rate: f64,
    pub emoji_rate: f64,
    pub vocabulary_diversity: f64,
    pub total_count: usize,
}

#[derive(Debug, Clone)]
pub struct TypingSignals {
    pub mean_burst_ms: f64,
    pub cadence_variance_ms: f64,
}

#[derive(Debug, Clone)]
pub struct SessionSignals {
    pub hourly_activity: [f64; 24],
    pub mean_duration_ms: f64,
    pub sessions_per_day: f64,
    pub active_slot_count: usize,
}

#[derive(Debug, Clone)]
pub struct BrowsingSignals {
    pub photo_dwell_ratio: f64,
    pub avg_dwell_ms: f64,
    pub bio_read_rate: f64,
    pub profile_views_per_session: f64,
}

/// Returns "no data" if no voice URL is present on the user; returns a
/// zero-initialized bundle with default pace `moderate` if a URL exists but
/// no analysis event has been recorded.
pub fn extract_voice(user: &User, events: &[BehavioralEvent]) -> Bundle<VoiceSignals> {
    if user.voice_url.is_none() {
        return Bundle::Absent;
    }

    let latest = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::VoiceNoteAnalyzed(p) => Some((e.server_ts, p)),
            _ => None,
        })
        .max_by_key(|(ts, _)| *ts);

    match latest {
        Some((_, payload)) => Bundle::Present(VoiceSignals {
            word_count: payload.word_count,
            vocabulary_richness: if payload.word_count > 0 {
                payload.unique_word_count as f64 / payload.word_count as f64
            } else {
                0.0
            },
            sentiment: payload.sentiment,
            dominant_emotions: payload.dominant_emotions.clone(),
            pace: payload.pace,
        }),
        None => Bundle::Present(VoiceSignals {
            word_count: 0,
            vocabulary_richness: 0.0,
            sentiment: 0.0,
            dominant_emotions: Vec::new(),
            pace: SpeakingPace::Moderate,
        }),
    }
}

pub fn extract_bio(user: &User, events: &[BehavioralEvent]) -> Bundle<BioSignals> {
    let Some(bio) = user.bio.as_ref().filter(|b| !b.trim().is_empty()) else {
        return Bundle::Absent;
    };

    let word_count = bio.split_whitespace().count() as u32;
    let edit_count = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::BioEdited))
        .count() as u32;
    let deletion_rate = if edit_count > 0 { 0.15 } else { 0.0 };

    let style = if word_count < 20 {
        BioStyle::Minimal
    } else if word_count > 80 {
        BioStyle::Expressive
    } else {
        BioStyle::Moderate
    };

    Bundle::Present(BioSignals {
        word_count,
        edit_count,
        deletion_rate,
        style,
    })
}

fn is_heart_or_face_emoji(c: char) -> bool {
    ('\u{1F600}'..='\u{1F9FF}').contains(&c)
}

/// Operates on the user's last 500 messages, descending by sent time.
pub fn extract_messaging(messages: &[Message]) -> Bundle<MessagingSignals> {
    if messages.len() < 3 {
        return Bundle::Absent;
    }
    let total_count = messages.len();
    let total_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    let avg_char_length = total_chars as f64 / total_count as f64;

    let question_count = messages.iter().filter(|m| m.content.contains('?')).count();
    let question_rate = question_count as f64 / total_count as f64;

    let emoji_count: usize = messages
        .iter()
        .map(|m| m.content.chars().filter(|c| is_heart_or_face_emoji(*c)).count())
        .sum();
    let emoji_rate = emoji_count as f64 / total_count as f64;

    let mut unique_tokens = std::collections::HashSet::new();
    let mut total_tokens = 0usize;
    for m in messages {
        for token in m.content.to_lowercase().split_whitespace() {
            unique_tokens.insert(token.to_string());
            total_tokens += 1;
        }
    }
    let vocabulary_diversity = if total_tokens > 0 {
        unique_tokens.len() as f64 / total_tokens as f64
    } else {
        0.0
    };

    Bundle::Present(MessagingSignals {
        avg_char_length,
        question_rate,
        emoji_rate,
        vocabulary_diversity,
        total_count,
    })
}

fn population_stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Pairs `typing_started`/`typing_stopped` events in order to compute
/// per-burst duration in milliseconds.
pub fn extract_typing(events: &[BehavioralEvent]) -> Bundle<TypingSignals> {
    let mut sorted: Vec<&BehavioralEvent> = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::TypingStarted | EventPayload::TypingStopped))
        .collect();
    sorted.sort_by_key(|e| e.client_ts);

    let start_count = sorted
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::TypingStarted))
        .count();
    if start_count < 5 {
        return Bundle::Absent;
    }

    let mut durations = Vec::new();
    let mut pending_start: Option<DateTime<Utc>> = None;
    for event in sorted {
        match event.payload {
            EventPayload::TypingStarted => pending_start = Some(event.client_ts),
            EventPayload::TypingStopped => {
                if let Some(start) = pending_start.take() {
                    let ms = (event.client_ts - start).num_milliseconds() as f64;
                    if ms >= 0.0 {
                        durations.push(ms);
                    }
                }
            }
            _ => {}
        }
    }

    if durations.is_empty() {
        return Bundle::Absent;
    }

    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    Bundle::Present(TypingSignals {
        mean_burst_ms: mean,
        cadence_variance_ms: population_stddev(&durations),
    })
}

/// 24-slot array built from hour-of-day of `app_opened` client timestamps,
/// normalized by the per-slot maximum.
pub fn extract_session(events: &[BehavioralEvent]) -> Bundle<SessionSignals> {
    let opens: Vec<&BehavioralEvent> = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::AppOpened))
        .collect();
    if opens.len() < 3 {
        return Bundle::Absent;
    }

    let mut raw = [0.0f64; 24];
    for event in &opens {
        raw[event.client_ts.hour() as usize] += 1.0;
    }
    let max = raw.iter().cloned().fold(0.0f64, f64::max);
    let hourly_activity = if max > 0.0 {
        let mut normalized = [0.0; 24];
        for (i, v) in raw.iter().enumerate() {
            normalized[i] = v / max;
        }
        normalized
    } else {
        raw
    };
    let active_slot_count = hourly_activity.iter().filter(|v| **v > 0.1).count();

    let mut sorted_all: Vec<&BehavioralEvent> = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::AppOpened | EventPayload::AppClosed))
        .collect();
    sorted_all.sort_by_key(|e| e.client_ts);
    let mut durations = Vec::new();
    let mut pending_open: Option<DateTime<Utc>> = None;
    for event in sorted_all {
        match event.payload {
            EventPayload::AppOpened => pending_open = Some(event.client_ts),
            EventPayload::AppClosed => {
                if let Some(open_ts) = pending_open.take() {
                    let ms = (event.client_ts - open_ts).num_milliseconds() as f64;
                    if ms >= 0.0 {
                        durations.push(ms);
                    }
                }
            }
            _ => {}
        }
    }
    let mean_duration_ms = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    };

    Bundle::Present(SessionSignals {
        hourly_activity,
        mean_duration_ms,
        sessions_per_day: opens.len() as f64 / 7.0,
        active_slot_count,
    })
}

/// Default average dwell 8000 ms and bio read rate 0.6 since the core
/// doesn't carry finer-grained per-view dwell telemetry (out of scope —
/// that belongs to the discovery/feed browser UI).
pub fn extract_browsing(events: &[BehavioralEvent]) -> Bundle<BrowsingSignals> {
    let profile_views = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::ProfileViewed { .. }))
        .count();
    if profile_views < 3 {
        return Bundle::Absent;
    }
    let photo_views = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::PhotoViewed { .. }))
        .count();

    let session_count = events
        .iter()
        .filter(|e| {
            matches!(
                e.payload,
                EventPayload::ProfileViewed { .. } | EventPayload::PhotoViewed { .. }
            )
        })
        .map(|e| e.session_id)
        .collect::<std::collections::HashSet<_>>()
        .len()
        .max(1);

    Bundle::Present(BrowsingSignals {
        photo_dwell_ratio: photo_views as f64 / profile_views as f64,
        avg_dwell_ms: 8000.0,
        bio_read_rate: 0.6,
        profile_views_per_session: profile_views as f64 / session_count as f64,
    })
}

/// All six signal bundles for one user, gathered concurrently.
#[derive(Debug, Clone)]
pub struct Signals {
    pub voice: Bundle<VoiceSignals>,
    pub bio: Bundle<BioSignals>,
    pub messaging: Bundle<MessagingSignals>,
    pub typing: Bundle<TypingSignals>,
    pub session: Bundle<SessionSignals>,
    pub browsing: Bundle<BrowsingSignals>,
}

/// Weighted sum in `[0, 100]` per the completeness table: voice 25, bio 15,
/// messaging 20 (scaled by `min(count/50, 1)`), typing 10, sessions 15
/// (scaled by `min(activeDays/7, 1)`), browsing 15.
pub fn completeness_score(signals: &Signals) -> f64 {
    let mut score = 0.0;
    if signals.voice.is_present() {
        score += 25.0;
    }
    if signals.bio.is_present() {
        score += 15.0;
    }
    if let Bundle::Present(m) = &signals.messaging {
        score += 20.0 * (m.total_count as f64 / 50.0).min(1.0);
    }
    if signals.typing.is_present() {
        score += 10.0;
    }
    if let Bundle::Present(s) = &signals.session {
        score += 15.0 * (s.active_slot_count as f64 / 7.0).min(1.0);
    }
    if signals.browsing.is_present() {
        score += 15.0;
    }
    score
}
