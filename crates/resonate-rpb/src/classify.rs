//! Archetype/style classification, depth scoring, and embedding-prompt
//! construction built from the six signal bundles in [`crate::signals`].

use once_cell::sync::Lazy;
use resonate_types::{Archetype, CommunicationStyle};
use std::collections::HashMap;

use crate::signals::{BioStyle, Bundle, Signals};

type Indicator = (fn(&Signals) -> bool, f64);

/// Additive indicator-predicate table: each archetype accumulates points for
/// every indicator its bundles satisfy. Ties broken by [`Archetype::ALL`]
/// iteration order (spark, anchor, wave, ember, storm); `wave` wins when no
/// bundle produces a nonzero score for any archetype.
static ARCHETYPE_TABLE: Lazy<HashMap<Archetype, Vec<Indicator>>> = Lazy::new(|| {
    let mut table: HashMap<Archetype, Vec<Indicator>> = HashMap::new();

    table.insert(
        Archetype::Spark,
        vec![
            (
                |s| matches!(&s.voice, Bundle::Present(v) if v.pace == resonate_types::SpeakingPace::Fast),
                0.3,
            ),
            (
                |s| matches!(&s.messaging, Bundle::Present(m) if m.emoji_rate > 0.5),
                0.2,
            ),
            (
                |s| matches!(&s.session, Bundle::Present(sess) if sess.sessions_per_day > 2.0),
                0.15,
            ),
            (
                |s| matches!(&s.typing, Bundle::Present(t) if t.mean_burst_ms < 4000.0),
                0.1,
            ),
        ],
    );

    table.insert(
        Archetype::Anchor,
        vec![
            (
                |s| matches!(&s.voice, Bundle::Present(v) if v.pace == resonate_types::SpeakingPace::Slow),
                0.3,
            ),
            (
                |s| matches!(&s.session, Bundle::Present(sess) if sess.mean_duration_ms > 600_000.0),
                0.25,
            ),
            (
                |s| matches!(&s.bio, Bundle::Present(b) if b.style == BioStyle::Expressive),
                0.2,
            ),
            (
                |s| matches!(&s.messaging, Bundle::Present(m) if m.avg_char_length > 120.0),
                0.15,
            ),
        ],
    );

    table.insert(
        Archetype::Wave,
        vec![
            (
                |s| matches!(&s.session, Bundle::Present(sess) if sess.active_slot_count >= 4 && sess.active_slot_count <= 10),
                0.2,
            ),
            (
                |s| matches!(&s.messaging, Bundle::Present(m) if m.question_rate > 0.2 && m.question_rate < 0.5),
                0.15,
            ),
        ],
    );

    table.insert(
        Archetype::Ember,
        vec![
            (
                |s| matches!(&s.voice, Bundle::Present(v) if v.sentiment > 0.4),
                0.3,
            ),
            (
                |s| matches!(&s.messaging, Bundle::Present(m) if m.vocabulary_diversity > 0.6),
                0.25,
            ),
            (
                |s| matches!(&s.bio, Bundle::Present(b) if b.style == BioStyle::Expressive),
                0.15,
            ),
            (
                |s| matches!(&s.browsing, Bundle::Present(b) if b.bio_read_rate > 0.5),
                0.1,
            ),
        ],
    );

    table.insert(
        Archetype::Storm,
        vec![
            (
                |s| matches!(&s.voice, Bundle::Present(v) if v.sentiment < -0.2),
                0.3,
            ),
            (
                |s| matches!(&s.typing, Bundle::Present(t) if t.cadence_variance_ms > 3000.0),
                0.25,
            ),
            (
                |s| matches!(&s.messaging, Bundle::Present(m) if m.question_rate > 0.5),
                0.15,
            ),
        ],
    );

    table
});

/// For each archetype, sum the points of every satisfied indicator. Ties
/// broken by [`Archetype::ALL`] order; `wave` is the default when every
/// archetype scores exactly `0.0` (no bundles present, or no indicator hit).
pub fn classify_archetype(signals: &Signals) -> Archetype {
    let mut best = Archetype::Wave;
    let mut best_score = f64::MIN;

    for archetype in Archetype::ALL {
        let score: f64 = ARCHETYPE_TABLE
            .get(&archetype)
            .map(|indicators| {
                indicators
                    .iter()
                    .filter(|(pred, _)| pred(signals))
                    .map(|(_, weight)| weight)
                    .sum()
            })
            .unwrap_or(0.0);

        if score > best_score {
            best_score = score;
            best = archetype;
        }
    }

    if best_score <= 0.0 {
        Archetype::Wave
    } else {
        best
    }
}

/// Cascade: minimal if short average message length and an actually-minimal
/// bio; else precise if vocabulary diversity, emoji rate, and avg length
/// clear their thresholds; else poetic if vocabulary diversity, avg length,
/// and voice vocabulary richness clear theirs; else witty if question rate
/// and emoji rate clear theirs; else expressive. Messaging-derived fields
/// default to `0.0` when no messaging bundle exists, so a user with no
/// messaging and no bio falls through every branch to `expressive`.
pub fn classify_style(signals: &Signals) -> CommunicationStyle {
    let avg_len = signals.messaging.as_ref().map(|m| m.avg_char_length).unwrap_or(0.0);
    let emoji_rate = signals.messaging.as_ref().map(|m| m.emoji_rate).unwrap_or(0.0);
    let vocabulary_diversity = signals.messaging.as_ref().map(|m| m.vocabulary_diversity).unwrap_or(0.0);
    let question_rate = signals.messaging.as_ref().map(|m| m.question_rate).unwrap_or(0.0);
    let voice_vocabulary_richness = signals.voice.as_ref().map(|v| v.vocabulary_richness).unwrap_or(0.0);

    let bio_is_minimal = matches!(&signals.bio, Bundle::Present(b) if b.style == BioStyle::Minimal);

    if avg_len < 30.0 && bio_is_minimal {
        return CommunicationStyle::Minimal;
    }
    if vocabulary_diversity > 0.6 && emoji_rate < 0.2 && avg_len > 40.0 {
        return CommunicationStyle::Precise;
    }
    if vocabulary_diversity > 0.7 && avg_len > 60.0 && voice_vocabulary_richness > 0.7 {
        return CommunicationStyle::Poetic;
    }
    if question_rate > 0.3 && emoji_rate > 0.3 {
        return CommunicationStyle::Witty;
    }
    CommunicationStyle::Expressive
}

/// Dominant emotions contributed by voice analysis and message emotion tags,
/// deduplicated, most-frequent first, capped at 5.
pub fn dominant_emotion_tags(signals: &Signals, message_emotion_tags: &[String]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    if let Bundle::Present(voice) = &signals.voice {
        for tag in &voice.dominant_emotions {
            *counts.entry(tag.clone()).or_insert(0) += 1;
        }
    }
    for tag in message_emotion_tags {
        *counts.entry(tag.clone()).or_insert(0) += 1;
    }

    let mut tags: Vec<(String, usize)> = counts.into_iter().collect();
    tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    tags.into_iter().take(5).map(|(tag, _)| tag).collect()
}

/// Average of depth-relevant signals present (messaging question rate, voice
/// sentiment magnitude, browsing bio-read rate); `0.5` when none contribute.
pub fn depth_score(signals: &Signals) -> f64 {
    let mut contributions = Vec::new();
    if let Bundle::Present(m) = &signals.messaging {
        contributions.push(m.question_rate.min(1.0));
    }
    if let Bundle::Present(v) = &signals.voice {
        contributions.push(v.sentiment.abs().min(1.0));
    }
    if let Bundle::Present(b) = &signals.browsing {
        contributions.push(b.bio_read_rate.min(1.0));
    }

    if contributions.is_empty() {
        0.5
    } else {
        contributions.iter().sum::<f64>() / contributions.len() as f64
    }
}

/// Humor detection proxy: messaging emoji rate and voice positive sentiment.
pub fn humor_detection(signals: &Signals) -> f64 {
    let emoji = signals.messaging.as_ref().map(|m| m.emoji_rate).unwrap_or(0.0);
    let sentiment = signals
        .voice
        .as_ref()
        .map(|v| v.sentiment.max(0.0))
        .unwrap_or(0.0);
    (emoji * 0.6 + sentiment * 0.4).min(1.0)
}

/// Aggregate vocabulary richness across voice and messaging bundles.
pub fn vocabulary_richness(signals: &Signals) -> f64 {
    let mut values = Vec::new();
    if let Bundle::Present(v) = &signals.voice {
        values.push(v.vocabulary_richness);
    }
    if let Bundle::Present(m) = &signals.messaging {
        values.push(m.vocabulary_diversity);
    }
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Natural-language prompt fed to the embedding provider; deterministic, so
/// the same signals always produce the same prompt text (and hence vector).
pub fn embedding_prompt(
    archetype: Archetype,
    style: CommunicationStyle,
    emotion_tags: &[String],
    depth: f64,
) -> String {
    let tags = if emotion_tags.is_empty() {
        "no strong emotional signal".to_string()
    } else {
        emotion_tags.join(", ")
    };
    format!(
        "A {archetype} archetype with a {style} communication style. \
         Dominant emotional tags: {tags}. Depth-seeking score: {depth:.2}."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{BioSignals, MessagingSignals, VoiceSignals};
    use resonate_types::SpeakingPace;

    fn base_signals() -> Signals {
        Signals {
            voice: Bundle::Absent,
            bio: Bundle::Absent,
            messaging: Bundle::Absent,
            typing: Bundle::Absent,
            session: Bundle::Absent,
            browsing: Bundle::Absent,
        }
    }

    #[test]
    fn cold_start_scenario_classifies_as_spark_minimal() {
        let mut signals = base_signals();
        signals.voice = Bundle::Present(VoiceSignals {
            word_count: 20,
            vocabulary_richness: 0.8,
            sentiment: 0.1,
            dominant_emotions: vec!["curious".into()],
            pace: SpeakingPace::Fast,
        });
        signals.messaging = Bundle::Present(MessagingSignals {
            avg_char_length: 10.0,
            question_rate: 0.0,
            emoji_rate: 0.6,
            vocabulary_diversity: 0.5,
            total_count: 10,
        });
        signals.bio = Bundle::Present(BioSignals {
            word_count: 4,
            edit_count: 0,
            deletion_rate: 0.0,
            style: BioStyle::Minimal,
        });

        assert_eq!(classify_archetype(&signals), Archetype::Spark);
    }

    #[test]
    fn no_bundles_defaults_to_wave() {
        let signals = base_signals();
        assert_eq!(classify_archetype(&signals), Archetype::Wave);
    }

    #[test]
    fn style_degrades_to_minimal_without_messaging() {
        let mut signals = base_signals();
        signals.bio = Bundle::Present(BioSignals {
            word_count: 4,
            edit_count: 0,
            deletion_rate: 0.0,
            style: BioStyle::Minimal,
        });
        assert_eq!(classify_style(&signals), CommunicationStyle::Minimal);
    }

    #[test]
    fn no_messaging_and_no_bio_defaults_to_expressive() {
        let signals = base_signals();
        assert_eq!(classify_style(&signals), CommunicationStyle::Expressive);
    }

    #[test]
    fn high_emoji_rate_alone_is_not_witty_without_question_rate() {
        let mut signals = base_signals();
        signals.messaging = Bundle::Present(MessagingSignals {
            avg_char_length: 50.0,
            question_rate: 0.0,
            emoji_rate: 0.4,
            vocabulary_diversity: 0.3,
            total_count: 10,
        });
        assert_eq!(classify_style(&signals), CommunicationStyle::Expressive);
    }

    #[test]
    fn precise_requires_all_three_thresholds() {
        let mut signals = base_signals();
        signals.messaging = Bundle::Present(MessagingSignals {
            avg_char_length: 45.0,
            question_rate: 0.2,
            emoji_rate: 0.1,
            vocabulary_diversity: 0.65,
            total_count: 10,
        });
        assert_eq!(classify_style(&signals), CommunicationStyle::Precise);
    }

    #[test]
    fn poetic_requires_voice_vocabulary_richness() {
        let mut signals = base_signals();
        signals.messaging = Bundle::Present(MessagingSignals {
            avg_char_length: 65.0,
            question_rate: 0.1,
            emoji_rate: 0.1,
            vocabulary_diversity: 0.75,
            total_count: 10,
        });
        signals.voice = Bundle::Present(VoiceSignals {
            word_count: 40,
            vocabulary_richness: 0.8,
            sentiment: 0.0,
            dominant_emotions: vec![],
            pace: SpeakingPace::Fast,
        });
        assert_eq!(classify_style(&signals), CommunicationStyle::Poetic);
    }

    #[test]
    fn depth_score_defaults_to_half_with_no_contributors() {
        let signals = base_signals();
        assert_eq!(depth_score(&signals), 0.5);
    }
}
