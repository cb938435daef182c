//! Asynchronous admission control for in-flight remote jobs.
//!
//! [`AsyncSemaphore`] caps how many remote jobs may be outstanding at
//! once. `acquire` never blocks a thread: when no token is available
//! the caller is parked on a FIFO queue and woken by a later `release`.
//! All counter and queue mutation happens under one lock; the lock, not
//! counter atomicity, is what prevents lost wake-ups.
//!
//! Mis-paired calls (a release without a matching acquire, or a
//! corrupted token count) are bookkeeping violations: reported loudly
//! as errors, never papered over and never a panic.

use std::collections::VecDeque;

use tokio::sync::{oneshot, Mutex};

/// Admission bookkeeping violations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SemaphoreError {
    /// The token count was observed below zero; some release/acquire
    /// pairing has gone wrong.
    #[error("Token count {available} is below zero")]
    NegativeTokens {
        /// Observed token count.
        available: i64,
    },

    /// `release` was called with every token already available.
    #[error("Release with {available} of {limit} tokens already available; release without matching acquire")]
    ReleaseWithoutAcquire {
        /// Observed token count.
        available: i64,
        /// Configured limit.
        limit: usize,
    },

    /// The semaphore was dropped while this caller was waiting.
    #[error("Semaphore dropped while waiting for a token")]
    Closed,
}

struct State {
    available: i64,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Counting semaphore with future-based acquisition and FIFO fairness.
pub struct AsyncSemaphore {
    limit: usize,
    state: Mutex<State>,
}

impl AsyncSemaphore {
    /// Create a semaphore with `limit` tokens, all initially available.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            state: Mutex::new(State {
                available: limit as i64,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Configured token limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of tokens currently available.
    pub async fn available(&self) -> i64 {
        self.state.lock().await.available
    }

    /// Number of callers parked waiting for a token.
    pub async fn waiting(&self) -> usize {
        self.state.lock().await.waiters.len()
    }

    /// Acquire one token, suspending until one is available.
    pub async fn acquire(&self) -> Result<(), SemaphoreError> {
        let receiver = {
            let mut state = self.state.lock().await;

            if state.available < 0 {
                let err = SemaphoreError::NegativeTokens {
                    available: state.available,
                };
                tracing::error!(available = state.available, "Admission bookkeeping violation");
                return Err(err);
            }

            if state.available == 0 {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                tracing::trace!(
                    available = state.available,
                    waiting = state.waiters.len(),
                    "Waiting for admission token",
                );
                Some(rx)
            } else {
                state.available -= 1;
                tracing::trace!(
                    available = state.available,
                    waiting = state.waiters.len(),
                    "Admission token acquired",
                );
                None
            }
        };

        match receiver {
            None => Ok(()),
            // A dropped sender means the semaphore went away with this
            // caller still queued.
            Some(rx) => rx.await.map_err(|_| SemaphoreError::Closed),
        }
    }

    /// Release one token, waking the oldest waiter if any.
    pub async fn release(&self) -> Result<(), SemaphoreError> {
        let mut state = self.state.lock().await;

        if state.available >= self.limit as i64 {
            let err = SemaphoreError::ReleaseWithoutAcquire {
                available: state.available,
                limit: self.limit,
            };
            tracing::error!(
                available = state.available,
                limit = self.limit,
                "Admission bookkeeping violation",
            );
            return Err(err);
        }

        // Hand the token straight to the oldest live waiter; the count
        // only grows when nobody is queued. Waiters whose receiving
        // side was dropped (cancelled acquirers) are skipped so their
        // token is not lost.
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                tracing::trace!(
                    available = state.available,
                    waiting = state.waiters.len(),
                    "Admission token handed to waiter",
                );
                return Ok(());
            }
        }

        state.available += 1;
        tracing::trace!(
            available = state.available,
            waiting = state.waiters.len(),
            "Admission token returned",
        );
        Ok(())
    }

    /// Corrupt the token count directly, for violation-path tests.
    #[cfg(test)]
    async fn force_available(&self, value: i64) {
        self.state.lock().await.available = value;
    }
}
