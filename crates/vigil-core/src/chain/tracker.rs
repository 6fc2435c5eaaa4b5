//! Head tracker loop.
//!
//! ```text
//!            ┌──────────────────────────┐
//!            │ GET blocks/best          │◄─────────────┐
//!            └────────────┬─────────────┘              │
//!                         │ accept? ─► cache + notify  │ sleep poll_interval
//!                         ▼                            │
//!            near real-time streak >= promotion? ── no ┘
//!                         │ yes
//!                         ▼
//!            ┌──────────────────────────┐
//!            │ subscriptions/beat?pos=  │ beats ─► accept ─► cache (with filter) + notify
//!            └────────────┬─────────────┘
//!                         │ error / close
//!                         ▼
//!              sleep stream_fallback_delay, poll again
//! ```
//!
//! Every network call and sleep is wrapped by the driver's [`InterruptToken`];
//! an interrupt is the only way out of the loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{
    beat::{Beat, BeatBloom},
    state::{current_unix_timestamp, HeadState},
};
use crate::{
    cache::{CacheKind, RevisionCache},
    interrupt::{InterruptToken, Interrupted},
    transport::{
        GenesisValidator, Method, RequestOptions, ResponseValidator, StreamFailureTracker,
        Transport, TransportError,
    },
    types::{Block, Head},
};

/// Head tracker timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Delay between `blocks/best` polls.
    pub poll_interval_ms: u64,
    /// A head younger than this is considered near real-time.
    pub near_realtime_window_seconds: u64,
    /// Consecutive near real-time heads required before opening the beat stream.
    pub beat_promotion_streak: u32,
    /// Delay before polling again after the beat stream ends.
    pub stream_fallback_delay_ms: u64,
    /// Consecutive stream failures after which promotion is suspended.
    pub stream_max_failures: u32,
    /// How long promotion stays suspended.
    pub stream_failure_cooldown_seconds: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 8_000,
            near_realtime_window_seconds: 60,
            beat_promotion_streak: 3,
            stream_fallback_delay_ms: 1_000,
            stream_max_failures: 3,
            stream_failure_cooldown_seconds: 300,
        }
    }
}

impl TrackerConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn stream_fallback_delay(&self) -> Duration {
        Duration::from_millis(self.stream_fallback_delay_ms)
    }

    /// Returns `true` if `head` is recent enough to count toward promotion.
    #[must_use]
    pub fn is_near_realtime(&self, head: &Head) -> bool {
        current_unix_timestamp().saturating_sub(head.timestamp) < self.near_realtime_window_seconds
    }
}

/// Failure of one tracker step.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("undecodable head payload: {0}")]
    Decode(String),
}

/// Owns the tracking loop of one driver.
#[derive(Debug)]
pub struct HeadTracker {
    transport: Arc<dyn Transport>,
    state: Arc<HeadState>,
    cache: Arc<RevisionCache>,
    token: InterruptToken,
    validator: Option<GenesisValidator>,
    config: TrackerConfig,
}

impl HeadTracker {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        state: Arc<HeadState>,
        cache: Arc<RevisionCache>,
        token: InterruptToken,
        config: TrackerConfig,
    ) -> Self {
        Self { transport, state, cache, token, validator: None, config }
    }

    /// Validates the genesis header of every polled response.
    #[must_use]
    pub fn with_validator(mut self, validator: GenesisValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Spawns the loop on the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs the loop until the interrupt token fires.
    pub async fn run(self) {
        info!(head = %self.state.current().id, "head tracker started");

        let mut streak = 0u32;
        let mut stream_failures = StreamFailureTracker::new(
            self.config.stream_max_failures,
            Duration::from_secs(self.config.stream_failure_cooldown_seconds),
        );

        loop {
            match self.poll_best().await {
                Ok(Some(head)) if self.config.is_near_realtime(&head) => streak += 1,
                Ok(_) => {}
                Err(TrackError::Interrupted(_)) => break,
                Err(e) => {
                    streak = 0;
                    warn!(error = %e, "best block poll failed");
                }
            }

            if streak >= self.config.beat_promotion_streak {
                streak = 0;
                if stream_failures.should_stop_retrying() {
                    debug!(
                        failures = stream_failures.failure_count(),
                        "beat stream suspended after repeated failures"
                    );
                } else {
                    match self.follow_beats(&mut stream_failures).await {
                        Ok(()) => debug!("beat stream ended, falling back to polling"),
                        Err(TrackError::Interrupted(_)) => break,
                        Err(e) => {
                            stream_failures.record_failure();
                            warn!(
                                error = %e,
                                failures = stream_failures.failure_count(),
                                "beat stream failed, falling back to polling"
                            );
                        }
                    }
                    if self.token.sleep(self.config.stream_fallback_delay()).await.is_err() {
                        break;
                    }
                    continue;
                }
            }

            if self.token.sleep(self.config.poll_interval()).await.is_err() {
                break;
            }
        }

        info!("head tracker stopped");
    }

    fn validator(&self) -> Option<&dyn ResponseValidator> {
        self.validator.as_ref().map(|v| v as &dyn ResponseValidator)
    }

    /// Polls `blocks/best` once; returns the head if it was accepted.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackError`] if the request fails or is interrupted.
    pub async fn poll_best(&self) -> Result<Option<Arc<Head>>, TrackError> {
        let options = RequestOptions { validator: self.validator(), ..Default::default() };
        let value =
            self.token.wrap(self.transport.request(Method::Get, "blocks/best", options)).await??;
        let block: Block =
            serde_json::from_value(value.clone()).map_err(|e| TrackError::Decode(e.to_string()))?;

        Ok(self.accept(block.to_head(), None, Some(value), "poll"))
    }

    /// Reads beats until the stream closes.
    async fn follow_beats(&self, failures: &mut StreamFailureTracker) -> Result<(), TrackError> {
        let path = format!("subscriptions/beat?pos={}", self.state.current().parent_id);
        let mut reader = self.token.wrap(self.transport.open_stream(&path)).await??;
        info!(path = %path, "beat stream opened");

        loop {
            let Some(message) = self.token.wrap(reader.next_message()).await?? else {
                return Ok(());
            };
            failures.record_success();

            let beat: Beat =
                serde_json::from_str(&message).map_err(|e| TrackError::Decode(e.to_string()))?;
            if beat.obsolete {
                trace!(beat = %beat.id, "obsolete beat ignored");
                continue;
            }

            let filter = beat.filter();
            if filter.is_none() {
                warn!(beat = %beat.id, "beat carried an undecodable bloom filter");
            }
            self.accept(beat.head(), filter.as_ref(), None, "beat");
        }
    }

    /// Offers `candidate` to the head state; the cache moves with the head.
    fn accept(
        &self,
        candidate: Head,
        filter: Option<&BeatBloom>,
        block: Option<Value>,
        source: &'static str,
    ) -> Option<Arc<Head>> {
        let accepted = self.state.advance(candidate, |head| {
            self.cache.handle_new_head(head, filter);
            if let Some(block) = block {
                self.cache.insert_tied(CacheKind::Block, &head.id, &head.id, Arc::new(block), None);
            }
        })?;

        debug!(head = %accepted.id, number = accepted.number, source, "head accepted");
        Some(accepted)
    }
}
