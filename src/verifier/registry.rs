//! In-flight challenge registry.
//!
//! Entries live here only while `Issued`; they are removed on response or
//! expiry, either lazily at verify time or by the background sweeper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::verifier::challenge::{Challenge, ChallengeState};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct ChallengeRegistry {
    inner: Mutex<HashMap<Uuid, Challenge>>,
}

impl ChallengeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, challenge: Challenge) {
        self.inner.lock().insert(challenge.id, challenge);
    }

    /// `None` once the challenge has been consumed, swept, or was never issued.
    pub fn state(&self, id: &Uuid, now_ms: u64) -> Option<ChallengeState> {
        self.inner.lock().get(id).map(|c| {
            if c.is_expired(now_ms) {
                ChallengeState::Expired
            } else {
                ChallengeState::Issued
            }
        })
    }

    /// Fail unless `challenge` is registered, unchanged, and not expired.
    ///
    /// An expired entry is evicted before the error is returned.
    pub fn check_live(&self, challenge: &Challenge, now_ms: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let stored = inner
            .get(&challenge.id)
            .ok_or_else(|| EngineError::ChallengeMismatch {
                reason: format!("challenge {} is not outstanding", challenge.id),
            })?;
        if stored != challenge {
            return Err(EngineError::ChallengeMismatch {
                reason: format!("challenge {} does not match the issued one", challenge.id),
            });
        }
        if stored.is_expired(now_ms) {
            let expired_at_ms = stored.expires_at_ms;
            inner.remove(&challenge.id);
            warn!(id = %challenge.id, expired_at_ms, now_ms, "Challenge expired");
            return Err(EngineError::ChallengeExpired {
                id: challenge.id,
                expired_at_ms,
                now_ms,
            });
        }
        Ok(())
    }

    /// Remove and return a live challenge, moving it to `Responded`.
    pub fn claim(&self, challenge: &Challenge, now_ms: u64) -> Result<Challenge> {
        self.check_live(challenge, now_ms)?;
        self.inner
            .lock()
            .remove(&challenge.id)
            .ok_or_else(|| EngineError::ChallengeMismatch {
                reason: format!("challenge {} was consumed concurrently", challenge.id),
            })
    }

    /// Drop every challenge that expired before `now_ms`; returns how many.
    pub fn sweep_expired(&self, now_ms: u64) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|_, c| !c.is_expired(now_ms));
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Periodically sweep expired challenges until the handle is aborted.
pub fn spawn_sweeper(registry: Arc<ChallengeRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let swept = registry.sweep_expired(now_ms());
            if swept > 0 {
                debug!(swept, outstanding = registry.len(), "Swept expired challenges");
            }
        }
    })
}
