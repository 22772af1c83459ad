//! Backoff policy owned by the provider-facing wrapper.
//!
//! The retrieval core never retries: it sees either the final vectors or the
//! last error returned by [`RetryingEmbedder`].

use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tracing::warn;

use docrag_core::config::RetrySettings;
use docrag_core::traits::Embedder;

use crate::EmbedError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomized in both directions, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self::from_settings(&RetrySettings::default()) }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter.clamp(0.0, 1.0),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self { max_attempts: 1, base_delay: Duration::ZERO, max_delay: Duration::ZERO, jitter: 0.0 }
    }

    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`, then scaled by a random factor in `1 ± jitter`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30);
        let raw = self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay);
        if self.jitter == 0.0 || raw.is_zero() {
            return raw;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        raw.mul_f64(factor)
    }

    /// Only provider failures flagged as transient are retried.
    pub fn is_retryable(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<EmbedError>(), Some(EmbedError::Transient(_)))
    }
}

/// Wraps a provider and re-issues transient failures per [`RetryPolicy`].
/// Sleeps on the calling thread; callers already run providers off the
/// async executor.
pub struct RetryingEmbedder<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E: Embedder> RetryingEmbedder<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self { Self { inner, policy } }

    pub fn policy(&self) -> &RetryPolicy { &self.policy }
}

impl<E: Embedder> Embedder for RetryingEmbedder<E> {
    fn dim(&self) -> usize { self.inner.dim() }
    fn max_len(&self) -> usize { self.inner.max_len() }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 1;
        loop {
            match self.inner.embed_many(texts) {
                Ok(vectors) => return Ok(vectors),
                Err(err) if attempt < self.policy.max_attempts && RetryPolicy::is_retryable(&err) => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(attempt, max = self.policy.max_attempts, ?delay, error = %err, "embedding failed, retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
