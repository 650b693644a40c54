//! # Stage: Poll Scheduler
//!
//! ## Responsibility
//! Decides when the next tunnel status check fires and when polling stops.
//! Owns at most one [`PollSession`] and the task that drives it.
//!
//! ## Cadence
//! - Active session (right after a start request): first tick immediately,
//!   then every `fast_interval` (2 s), bounded by `max_attempts` (30).
//! - Passive session (someone is viewing status): every `slow_interval`
//!   (3 s), unbounded.
//! - Once a public URL is seen: exactly one grace poll after `grace_delay`
//!   (3 s), then the session ends.
//!
//! ## Guarantees
//! - Single-flight: arming a session cancels the previous one first
//! - Deterministic: all waiting goes through the injected [`Scheduler`]
//! - Cancellation is explicit and synchronous ([`PollScheduler::cancel`])
//!
//! ## NOT Responsible For
//! - Talking to the backend or mutating controller state; the tick callback
//!   supplied by the controller does both.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::TunnelError;
use crate::types::TunnelStatus;

// ---------------------------------------------------------------------------
// Timer capability
// ---------------------------------------------------------------------------

/// Source of delays for the poll loop.
pub trait Scheduler: Send + Sync + 'static {
    /// A future that completes once `delay` has elapsed.
    fn after(&self, delay: Duration) -> impl Future<Output = ()> + Send;
}

/// [`Scheduler`] backed by `tokio::time`, which honours a paused test clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn after(&self, delay: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(delay)
    }
}

impl<T: Scheduler> Scheduler for Arc<T> {
    fn after(&self, delay: Duration) -> impl Future<Output = ()> + Send {
        (**self).after(delay)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Cadence and bounds for poll sessions. Loaded from the `[polling]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub fast_interval_ms: u64,
    pub slow_interval_ms: u64,
    pub grace_delay_ms: u64,
    /// Tick bound for active sessions.
    pub max_attempts: u32,
    /// Consecutive failed ticks that end a session. 0 (the default) disables
    /// the bound, so failed ticks only count toward `max_attempts`.
    pub failure_threshold: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            fast_interval_ms: 2_000,
            slow_interval_ms: 3_000,
            grace_delay_ms: 3_000,
            max_attempts: 30,
            failure_threshold: 0,
        }
    }
}

impl PollConfig {
    pub fn fast_interval(&self) -> Duration {
        Duration::from_millis(self.fast_interval_ms)
    }

    pub fn slow_interval(&self) -> Duration {
        Duration::from_millis(self.slow_interval_ms)
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Why a session was armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Armed by a start request; latency-sensitive and bounded.
    Active,
    /// Armed by someone viewing status; slower and unbounded.
    Passive,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The grace poll after the URL appeared completed.
    Confirmed,
    /// The backend reported the tunnel stopped.
    TunnelDown,
    /// `max_attempts` ticks passed without a URL.
    TimedOut { attempts: u32 },
    /// `failure_threshold` consecutive ticks failed; carries the last error.
    Failed(TunnelError),
    /// The session was cancelled before the tick was applied.
    Cancelled,
}

/// What to do after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision {
    /// Tick again after the given delay.
    Next(Duration),
    Finish(SessionEnd),
}

/// Bookkeeping for one run of status polling.
#[derive(Debug, Clone)]
pub struct PollSession {
    pub mode: PollMode,
    pub interval: Duration,
    pub grace_delay: Duration,
    pub elapsed_attempts: u32,
    /// `None` means unbounded.
    pub max_attempts: Option<u32>,
    pub active: bool,
    grace_pending: bool,
    consecutive_failures: u32,
    failure_threshold: u32,
}

impl PollSession {
    pub fn new(mode: PollMode, config: &PollConfig) -> Self {
        let (interval, max_attempts) = match mode {
            PollMode::Active => (config.fast_interval(), Some(config.max_attempts)),
            PollMode::Passive => (config.slow_interval(), None),
        };
        Self {
            mode,
            interval,
            grace_delay: config.grace_delay(),
            elapsed_attempts: 0,
            max_attempts,
            active: true,
            grace_pending: false,
            consecutive_failures: 0,
            failure_threshold: config.failure_threshold,
        }
    }

    /// Delay before the first tick.
    pub fn first_delay(&self) -> Duration {
        match self.mode {
            PollMode::Active => Duration::ZERO,
            PollMode::Passive => self.interval,
        }
    }

    /// The URL has been seen and the next tick is the grace poll.
    pub fn is_grace_pending(&self) -> bool {
        self.grace_pending
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn cancel(&mut self) {
        self.active = false;
    }

    /// Fold one tick's outcome into the session and decide what happens next.
    ///
    /// Termination is checked in priority order: cancellation, URL seen
    /// (grace poll, then stop), tunnel stopped, persistent failure, attempt
    /// bound.
    pub fn observe(&mut self, outcome: Result<&TunnelStatus, &TunnelError>) -> PollDecision {
        if !self.active {
            return PollDecision::Finish(SessionEnd::Cancelled);
        }
        self.elapsed_attempts = self.elapsed_attempts.saturating_add(1);

        if self.grace_pending {
            self.active = false;
            return PollDecision::Finish(match outcome {
                Ok(status) if !status.is_running() => SessionEnd::TunnelDown,
                _ => SessionEnd::Confirmed,
            });
        }

        match outcome {
            Ok(status) if status.has_public_url() => {
                self.consecutive_failures = 0;
                self.grace_pending = true;
                return PollDecision::Next(self.grace_delay);
            }
            Ok(status) if !status.is_running() => {
                self.active = false;
                return PollDecision::Finish(SessionEnd::TunnelDown);
            }
            Ok(_) => self.consecutive_failures = 0,
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.failure_threshold > 0 && self.consecutive_failures >= self.failure_threshold {
                    self.active = false;
                    return PollDecision::Finish(SessionEnd::Failed(e.clone()));
                }
            }
        }

        if let Some(max) = self.max_attempts {
            if self.elapsed_attempts >= max {
                self.active = false;
                return PollDecision::Finish(SessionEnd::TimedOut {
                    attempts: self.elapsed_attempts,
                });
            }
        }

        PollDecision::Next(self.interval)
    }
}

// ---------------------------------------------------------------------------
// Scheduler-owned task
// ---------------------------------------------------------------------------

/// Identifies one armed session; ticks from older sessions are discarded.
pub type SessionId = u64;

#[derive(Debug)]
struct ArmedSession {
    id: SessionId,
    session: PollSession,
    task: JoinHandle<()>,
    done: watch::Receiver<bool>,
}

/// Owner of the single active [`PollSession`] and its timer task.
#[derive(Debug, Default)]
pub struct PollScheduler {
    next_id: SessionId,
    current: Option<ArmedSession>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any running session, then spawn a new one.
    ///
    /// The loop waits `session.first_delay()`, calls `tick(id)`, and keeps
    /// going with the delay the tick returns until it returns `None`. Must be
    /// called from within a tokio runtime.
    pub fn arm<S, F, Fut>(&mut self, timer: Arc<S>, session: PollSession, mut tick: F) -> SessionId
    where
        S: Scheduler,
        F: FnMut(SessionId) -> Fut + Send + 'static,
        Fut: Future<Output = Option<Duration>> + Send + 'static,
    {
        self.cancel();
        self.next_id += 1;
        let id = self.next_id;
        let first = session.first_delay();
        let (done_tx, done_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut delay = first;
            loop {
                timer.after(delay).await;
                match tick(id).await {
                    Some(next) => delay = next,
                    None => break,
                }
            }
            let _ = done_tx.send(true);
        });

        self.current = Some(ArmedSession {
            id,
            session,
            task,
            done: done_rx,
        });
        id
    }

    /// Abort the running session, if any. Returns whether one was active.
    pub fn cancel(&mut self) -> bool {
        match self.current.take() {
            Some(mut armed) => {
                armed.session.cancel();
                armed.task.abort();
                true
            }
            None => false,
        }
    }

    /// Release a session that ended on its own. Stale ids are ignored.
    pub fn finish(&mut self, id: SessionId) {
        if self.is_current(id) {
            self.current = None;
        }
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_current(&self, id: SessionId) -> bool {
        self.current.as_ref().is_some_and(|a| a.id == id)
    }

    pub fn session(&self) -> Option<&PollSession> {
        self.current.as_ref().map(|a| &a.session)
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut PollSession> {
        self.current
            .as_mut()
            .filter(|a| a.id == id)
            .map(|a| &mut a.session)
    }

    /// Receiver that flips to `true` (or closes, on abort) when the current
    /// session ends.
    pub fn done_signal(&self) -> Option<watch::Receiver<bool>> {
        self.current.as_ref().map(|a| a.done.clone())
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Wait until a [`PollScheduler::done_signal`] receiver reports completion.
pub async fn wait_done(mut done: watch::Receiver<bool>) {
    while !*done.borrow_and_update() {
        if done.changed().await.is_err() {
            break;
        }
    }
}
