//! Embedding and completion interfaces.
//!
//! The core never calls an LLM provider directly; it goes through
//! [`Embedder`]/[`Completer`], matching the provider-abstraction shape in
//! `LlmProvider`. The default implementations (`OfflineEmbedder`,
//! `OfflineCompleter`) are deterministic and offline, suitable for tests and
//! local development; a real HTTP-backed provider is left for later wiring
//! behind the same traits (`reqwest` is already a dependency).

use async_trait::async_trait;
use resonate_config::LlmSettings;
use resonate_errors::LlmError;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError>;
}

/// Sliding-window call limiter shared across embedder/completer calls.
pub struct RateLimiter {
    max_calls: u32,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self::new(
            settings.rate_limit_max_calls,
            Duration::from_secs(settings.rate_limit_window_secs),
        )
    }

    pub async fn acquire(&self) -> Result<(), LlmError> {
        let mut ts = self.timestamps.lock().await;
        let now = Instant::now();
        while let Some(&front) = ts.front() {
            if now.duration_since(front) > self.window {
                ts.pop_front();
            } else {
                break;
            }
        }
        if ts.len() as u32 >= self.max_calls {
            return Err(LlmError::RateLimited);
        }
        ts.push_back(now);
        Ok(())
    }
}

/// Wraps an [`Embedder`]/[`Completer`] pair with a shared rate limiter.
pub struct RateLimited<T> {
    inner: T,
    limiter: Arc<RateLimiter>,
}

impl<T> RateLimited<T> {
    pub fn new(inner: T, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl<T: Embedder> Embedder for RateLimited<T> {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.limiter.acquire().await?;
        self.inner.embed(text).await
    }
}

#[async_trait]
impl<T: Completer> Completer for RateLimited<T> {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        self.limiter.acquire().await?;
        self.inner.complete(system_prompt, user_prompt).await
    }
}

fn fxhash32(bytes: &[u8]) -> u32 {
    let mut h: u32 = 2166136261;
    for &b in bytes {
        h ^= b as u32;
        h = h.wrapping_mul(16777619);
    }
    h
}

fn l2_normalize(v: &mut [f32]) {
    let sum: f32 = v.iter().map(|x| x * x).sum();
    let norm = sum.sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Deterministic hashing-trick embedder. Not semantically meaningful, but
/// stable: same text always yields the same vector, which is all the RPB
/// embedding builder and DFRE candidate retrieval need for tests.
pub struct OfflineEmbedder {
    dim: usize,
}

impl OfflineEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl Embedder for OfflineEmbedder {
    fn dimensions(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut v = vec![0.0f32; self.dim];
        let lower = text.to_ascii_lowercase();
        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let idx = (fxhash32(token.as_bytes()) as usize) % self.dim;
            v[idx] += 1.0;
        }
        l2_normalize(&mut v);
        Ok(v)
    }
}

/// Deterministic completer for the one completion use case the core has:
/// CHM conversation-starter nudges. Picks from a small fixed pool of
/// templates, selected by hashing the user prompt, so the same conversation
/// state always yields the same nudge in tests.
pub struct OfflineCompleter {
    templates: Vec<&'static str>,
}

impl Default for OfflineCompleter {
    fn default() -> Self {
        Self {
            templates: vec![
                "Ask about {topic} — it came up and neither of you followed up on it.",
                "Bring up {topic} again; it's the thread with the most room left to pull.",
                "A light, low-stakes question about {topic} could restart the rhythm here.",
            ],
        }
    }
}

impl OfflineCompleter {
    fn extract_topic(user_prompt: &str) -> String {
        user_prompt
            .split_whitespace()
            .find(|w| w.len() > 4)
            .unwrap_or("the last thing you talked about")
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_string()
    }
}

#[async_trait]
impl Completer for OfflineCompleter {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        if self.templates.is_empty() {
            return Err(LlmError::MalformedResponse("no templates configured".into()));
        }
        let mut combined = system_prompt.to_string();
        combined.push('\n');
        combined.push_str(user_prompt);
        let idx = (fxhash32(combined.as_bytes()) as usize) % self.templates.len();
        let topic = Self::extract_topic(user_prompt);
        Ok(self.templates[idx].replace("{topic}", &topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_embedder_is_deterministic() {
        let e = OfflineEmbedder::new(64);
        let a = e.embed("hello world").await.unwrap();
        let b = e.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn offline_completer_is_deterministic_given_same_inputs() {
        let c = OfflineCompleter::default();
        let a = c.complete("sys", "we talked about hiking last week").await.unwrap();
        let b = c.complete("sys", "we talked about hiking last week").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn rate_limiter_rejects_once_window_is_exhausted() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
        assert!(matches!(limiter.acquire().await, Err(LlmError::RateLimited)));
    }
}
