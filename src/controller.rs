//! # Stage: Tunnel Controller
//!
//! ## Responsibility
//! The tunnel lifecycle state machine. Issues start/stop requests to the
//! backend, arms the [`PollScheduler`] after a start, folds every status
//! tick into a single consistent [`TunnelState`], and broadcasts a
//! [`StatusChanged`] event whenever that view changes.
//!
//! ```text
//!            start               tick: running + url
//!   Idle ───────────▶ Starting ───────────────────────▶ Running
//!    ▲  ▲               │  │                              │
//!    │  │ stopped/      │  │ start request fails          │ stop
//!    │  │ timeout       │  ▼                              ▼
//!    │  └───────────────┘ Errored ──── stop ────────▶ Stopping ──▶ Idle
//! ```
//!
//! ## Guarantees
//! - Serialized: overlapping start/stop/refresh/watch calls fail with `Busy`
//! - Single-flight polling: at most one session, at most one status request
//! - Stop cancels polling before the stop request leaves the process
//! - Non-panicking: a poisoned state lock is recovered, never unwrapped
//! - Polling never outlives the controller: dropping the last clone ends it
//!
//! ## NOT Responsible For
//! - Rendering (subscribers decide how to show a [`StatusChanged`])
//! - Running the tunnel itself (that is the backend behind [`TunnelBackend`])

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::backend::TunnelBackend;
use crate::config::SettingsStore;
use crate::error::{Result, TunnelError};
use crate::poll::{
    self, PollConfig, PollDecision, PollMode, PollScheduler, PollSession, Scheduler, SessionEnd,
    SessionId, TokioScheduler,
};
use crate::types::{Ack, TunnelProvider, TunnelSettings, TunnelState, TunnelStatus};

/// Broadcast channel capacity (number of events in flight per subscriber).
pub const EVENT_CHANNEL_CAP: usize = 64;

// ---------------------------------------------------------------------------
// Public event and snapshot types
// ---------------------------------------------------------------------------

/// Emitted after every change of state or status, and whenever an error is
/// recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChanged {
    pub state: TunnelState,
    /// Last status reported by the backend; `None` before the first
    /// successful poll and after a stop.
    pub status: Option<TunnelStatus>,
    pub error: Option<TunnelError>,
}

/// Point-in-time view returned by [`TunnelController::current_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub state: TunnelState,
    pub status: Option<TunnelStatus>,
    pub last_error: Option<TunnelError>,
    pub polling: bool,
    /// Ticks taken by the active session, if one is running.
    pub attempts: Option<u32>,
}

impl ControllerSnapshot {
    pub fn public_url(&self) -> Option<&str> {
        self.status
            .as_ref()
            .filter(|s| s.is_running())
            .and_then(|s| s.url.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    state: TunnelState,
    status: Option<TunnelStatus>,
    last_error: Option<TunnelError>,
    poller: PollScheduler,
}

/// State reachable from both controller calls and the poll task.
struct Shared<C, S> {
    backend: C,
    timer: Arc<S>,
    poll_config: PollConfig,
    inner: Mutex<Inner>,
    events: broadcast::Sender<StatusChanged>,
}

impl<C: TunnelBackend, S: Scheduler> Shared<C, S> {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move to `state`/`status`, recording `error`, and notify subscribers if
    /// anything observable changed.
    fn commit(
        &self,
        inner: &mut Inner,
        state: TunnelState,
        status: Option<TunnelStatus>,
        error: Option<TunnelError>,
    ) {
        let changed = inner.state != state || inner.status != status;
        if inner.state != state {
            info!(from = %inner.state, to = %state, "tunnel state changed");
        }
        inner.state = state;
        inner.status = status;
        if let Some(e) = &error {
            inner.last_error = Some(e.clone());
        }

        if changed || error.is_some() {
            // No subscribers is fine.
            let _ = self.events.send(StatusChanged {
                state,
                status: inner.status.clone(),
                error,
            });
        }
    }

    fn arm(self: &Arc<Self>, inner: &mut Inner, mode: PollMode) -> SessionId {
        let session = PollSession::new(mode, &self.poll_config);
        // The task only holds a weak handle: once the last controller clone
        // is gone, `Inner` drops, the poller aborts the task, and a tick
        // racing that drop ends the session.
        let shared: Weak<Self> = Arc::downgrade(self);
        let id = inner.poller.arm(Arc::clone(&self.timer), session, move |id| {
            let shared = shared.upgrade();
            async move {
                match shared {
                    Some(shared) => shared.poll_tick(id).await,
                    None => None,
                }
            }
        });
        debug!(session = id, ?mode, "armed tunnel status polling");
        id
    }

    /// One scheduled status check. Returns the delay before the next one, or
    /// `None` when the session is over.
    async fn poll_tick(self: Arc<Self>, id: SessionId) -> Option<Duration> {
        let current = self.lock().poller.is_current(id);
        if !current {
            return None;
        }

        let result = self.backend.request_status().await;

        let mut guard = self.lock();
        let inner = &mut *guard;
        // Cancelled while the request was in flight: drop the result.
        let session = inner.poller.session_mut(id)?;
        let grace = session.is_grace_pending();
        let decision = session.observe(result.as_ref());
        let attempt = session.elapsed_attempts;
        let failures = session.consecutive_failures();
        let gave_up = matches!(decision, PollDecision::Finish(SessionEnd::Failed(_)));

        let mut state = inner.state;
        let mut status = inner.status.clone();
        match &result {
            Ok(s) => {
                debug!(session = id, attempt, grace, running = s.is_running(), url = ?s.url, "tunnel status poll");
                if !s.is_running() {
                    state = TunnelState::Idle;
                } else if s.url.is_some() || state == TunnelState::Running {
                    state = TunnelState::Running;
                }
                status = Some(s.clone());
            }
            Err(e) if gave_up => {
                error!(error = %e, session = id, attempt, consecutive_failures = failures, "tunnel status poll failed repeatedly, giving up");
            }
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), session = id, attempt, "tunnel status poll failed, will retry next tick");
            }
        }

        let mut error = None;
        let next = match decision {
            PollDecision::Next(delay) => Some(delay),
            PollDecision::Finish(end) => {
                inner.poller.finish(id);
                match &end {
                    SessionEnd::TimedOut { attempts } => {
                        warn!(attempts, "no public tunnel URL before poll limit");
                        state = TunnelState::Idle;
                        error = Some(TunnelError::Timeout { attempts: *attempts });
                    }
                    SessionEnd::Failed(e) => {
                        state = TunnelState::Errored;
                        error = Some(e.clone());
                    }
                    SessionEnd::Confirmed | SessionEnd::TunnelDown | SessionEnd::Cancelled => {}
                }
                info!(session = id, attempts = attempt, ?end, "tunnel status polling finished");
                None
            }
        };

        self.commit(inner, state, status, error);
        next
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Lifecycle controller for one tunnel.
///
/// Cheap to clone; clones share the same state machine.
pub struct TunnelController<C, K, S = TokioScheduler> {
    shared: Arc<Shared<C, S>>,
    store: Arc<K>,
    op_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<C, K, S> Clone for TunnelController<C, K, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            store: Arc::clone(&self.store),
            op_lock: Arc::clone(&self.op_lock),
        }
    }
}

impl<C: TunnelBackend, K: SettingsStore> TunnelController<C, K, TokioScheduler> {
    /// Controller with default cadence and the tokio timer.
    pub fn new(backend: C, store: K) -> Self {
        TunnelControllerBuilder::new(backend, store).build()
    }

    pub fn builder(backend: C, store: K) -> TunnelControllerBuilder<C, K, TokioScheduler> {
        TunnelControllerBuilder::new(backend, store)
    }
}

impl<C: TunnelBackend, K: SettingsStore, S: Scheduler> TunnelController<C, K, S> {
    fn begin_op(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        self.op_lock.try_lock().map_err(|_| TunnelError::Busy)
    }

    /// Start a tunnel with `settings`.
    ///
    /// Returns once the backend has accepted the request; the public URL
    /// arrives later through [`subscribe`](Self::subscribe) as polling
    /// progresses.
    ///
    /// # Errors
    /// - `Busy` when another operation is in flight or a tunnel is already up.
    /// - `InvalidConfig` when no provider is chosen or the port is 0.
    /// - Any backend error from the start request (the controller is then `Errored`).
    pub async fn start(&self, settings: TunnelSettings) -> Result<Ack> {
        let _op = self.begin_op()?;

        {
            let mut inner = self.shared.lock();
            if matches!(
                inner.state,
                TunnelState::Starting | TunnelState::Running | TunnelState::Stopping
            ) {
                return Err(TunnelError::Busy);
            }
            validate(&settings)?;
            inner.poller.cancel();
            inner.last_error = None;
            self.shared.commit(&mut inner, TunnelState::Starting, None, None);
        }

        match self.store.save_settings(&settings) {
            Ok(_) => debug!(provider = %settings.provider, "tunnel settings saved"),
            Err(e) => warn!(error = %e, "could not persist tunnel settings, starting anyway"),
        }

        info!(provider = %settings.provider, local_port = settings.local_port, "requesting tunnel start");
        let result = self.shared.backend.request_start(&settings).await;

        let mut inner = self.shared.lock();
        match result {
            Ok(ack) => {
                info!(message = ?ack.message, "tunnel backend accepted start");
                self.shared.arm(&mut inner, PollMode::Active);
                Ok(ack)
            }
            Err(e) => {
                warn!(error = %e, "tunnel start request failed");
                self.shared
                    .commit(&mut inner, TunnelState::Errored, None, Some(e.clone()));
                Err(e)
            }
        }
    }

    /// Stop the tunnel. A no-op in `Idle`.
    ///
    /// Polling is cancelled before the request is sent, and the controller
    /// ends `Idle` even if the backend reports an error (the tunnel may
    /// already be gone); that error is still returned.
    pub async fn stop(&self) -> Result<Ack> {
        let _op = self.begin_op()?;

        {
            let mut inner = self.shared.lock();
            if inner.poller.cancel() {
                debug!("tunnel status polling cancelled for stop");
            }
            if inner.state == TunnelState::Idle {
                return Ok(Ack::default());
            }
            let status = inner.status.clone();
            self.shared.commit(&mut inner, TunnelState::Stopping, status, None);
        }

        info!("requesting tunnel stop");
        let result = self.shared.backend.request_stop().await;

        let mut inner = self.shared.lock();
        match result {
            Ok(ack) => {
                info!(message = ?ack.message, "tunnel stopped");
                inner.last_error = None;
                self.shared.commit(&mut inner, TunnelState::Idle, None, None);
                Ok(ack)
            }
            Err(e) => {
                warn!(error = %e, "tunnel stop request failed, treating tunnel as stopped");
                self.shared
                    .commit(&mut inner, TunnelState::Idle, None, Some(e.clone()));
                Err(e)
            }
        }
    }

    /// Fetch status once and reconcile local state with it.
    ///
    /// Lets a fresh controller pick up a tunnel that outlived a previous
    /// process. Returns `Busy` while a poll session owns the status endpoint.
    pub async fn refresh(&self) -> Result<TunnelStatus> {
        let _op = self.begin_op()?;
        let polling = self.shared.lock().poller.is_active();
        if polling {
            return Err(TunnelError::Busy);
        }

        let status = self.shared.backend.request_status().await?;

        let mut inner = self.shared.lock();
        let state = reconciled_state(inner.state, &status);
        self.shared.commit(&mut inner, state, Some(status.clone()), None);
        Ok(status)
    }

    /// Begin watching status: cancel any current session, refresh once, and
    /// keep polling passively while the tunnel is up without a URL.
    pub async fn watch_status(&self) -> Result<ControllerSnapshot> {
        let _op = self.begin_op()?;
        {
            let mut inner = self.shared.lock();
            inner.poller.cancel();
        }

        let result = self.shared.backend.request_status().await;

        let mut inner = self.shared.lock();
        match result {
            Ok(status) => {
                let state = reconciled_state(inner.state, &status);
                let wants_polling = status.is_running() && status.url.is_none();
                self.shared.commit(&mut inner, state, Some(status), None);
                if wants_polling {
                    self.shared.arm(&mut inner, PollMode::Passive);
                }
                Ok(snapshot(&inner))
            }
            Err(e) => {
                // Keep a live tunnel under observation; the next tick may succeed.
                if inner.state.is_live() {
                    self.shared.arm(&mut inner, PollMode::Passive);
                }
                Err(e)
            }
        }
    }

    /// Stop a passive watch. Active (post-start) sessions are left running.
    /// Returns whether a session was cancelled.
    pub fn cancel_polling(&self) -> bool {
        let mut inner = self.shared.lock();
        let passive = inner
            .poller
            .session()
            .is_some_and(|s| s.mode == PollMode::Passive);
        passive && inner.poller.cancel()
    }

    /// Wait for the current poll session, if any, to end.
    pub async fn wait_for_poll(&self) {
        let done = self.shared.lock().poller.done_signal();
        if let Some(done) = done {
            poll::wait_done(done).await;
        }
    }

    pub fn current_status(&self) -> ControllerSnapshot {
        snapshot(&self.shared.lock())
    }

    pub fn state(&self) -> TunnelState {
        self.shared.lock().state
    }

    pub fn is_polling(&self) -> bool {
        self.shared.lock().poller.is_active()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChanged> {
        self.shared.events.subscribe()
    }

    /// Settings last saved through the store, to prefill a start.
    pub fn load_settings(&self) -> Result<TunnelSettings> {
        self.store.load_settings()
    }
}

fn validate(settings: &TunnelSettings) -> Result<()> {
    if settings.provider == TunnelProvider::None {
        return Err(TunnelError::InvalidConfig(
            "please select a tunnel provider".to_string(),
        ));
    }
    if settings.local_port == 0 {
        return Err(TunnelError::InvalidConfig(
            "local port must be between 1 and 65535".to_string(),
        ));
    }
    Ok(())
}

/// State implied by a one-shot status read outside a poll session.
fn reconciled_state(current: TunnelState, status: &TunnelStatus) -> TunnelState {
    match (current, status.is_running()) {
        (_, false) => TunnelState::Idle,
        (TunnelState::Starting, true) if status.url.is_none() => TunnelState::Starting,
        (_, true) => TunnelState::Running,
    }
}

fn snapshot(inner: &Inner) -> ControllerSnapshot {
    ControllerSnapshot {
        state: inner.state,
        status: inner.status.clone(),
        last_error: inner.last_error.clone(),
        polling: inner.poller.is_active(),
        attempts: inner.poller.session().map(|s| s.elapsed_attempts),
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`TunnelController`].
///
/// # Example
/// ```rust,ignore
/// let controller = TunnelController::builder(client, store)
///     .poll_config(PollConfig { max_attempts: 10, ..PollConfig::default() })
///     .build();
/// ```
pub struct TunnelControllerBuilder<C, K, S = TokioScheduler> {
    backend: C,
    store: K,
    timer: S,
    poll_config: PollConfig,
    event_capacity: usize,
}

impl<C: TunnelBackend, K: SettingsStore> TunnelControllerBuilder<C, K, TokioScheduler> {
    pub fn new(backend: C, store: K) -> Self {
        Self {
            backend,
            store,
            timer: TokioScheduler,
            poll_config: PollConfig::default(),
            event_capacity: EVENT_CHANNEL_CAP,
        }
    }
}

impl<C: TunnelBackend, K: SettingsStore, S: Scheduler> TunnelControllerBuilder<C, K, S> {
    /// Override poll cadence and bounds.
    pub fn poll_config(mut self, config: PollConfig) -> Self {
        self.poll_config = config;
        self
    }

    /// Override the event channel capacity (default 64, minimum 1).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Swap the timer used between ticks.
    pub fn scheduler<S2: Scheduler>(self, timer: S2) -> TunnelControllerBuilder<C, K, S2> {
        TunnelControllerBuilder {
            backend: self.backend,
            store: self.store,
            timer,
            poll_config: self.poll_config,
            event_capacity: self.event_capacity,
        }
    }

    pub fn build(self) -> TunnelController<C, K, S> {
        let (events, _) = broadcast::channel(self.event_capacity);
        TunnelController {
            shared: Arc::new(Shared {
                backend: self.backend,
                timer: Arc::new(self.timer),
                poll_config: self.poll_config,
                inner: Mutex::new(Inner::default()),
                events,
            }),
            store: Arc::new(self.store),
            op_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}
