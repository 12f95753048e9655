use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Turns a configured timeout into per-call deadlines. A zero duration never
/// expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    timeout: Duration,
}

impl TimeoutPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn infinite() -> Self {
        Self { timeout: Duration::ZERO }
    }

    pub fn is_infinite(&self) -> bool {
        self.timeout.is_zero()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deadline for an operation entered now
    pub fn start(&self) -> Deadline {
        self.start_at(Instant::now())
    }

    pub fn start_at(&self, started: Instant) -> Deadline {
        let expires_at = if self.is_infinite() { None } else { Some(started + self.timeout) };
        Deadline { started, expires_at }
    }
}

/// Wall-clock deadline of a single call. Partial progress never extends it.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    expires_at: Option<Instant>,
}

impl Deadline {
    pub fn is_elapsed(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// `None` for an infinite deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Drive `fut` until it completes or the deadline passes. Returns `None` on
    /// expiry; the future is dropped at that point.
    pub async fn wait<F: Future>(&self, fut: F) -> Option<F::Output> {
        match self.expires_at {
            Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
            None => Some(fut.await),
        }
    }
}
