//! Shared fixtures for controller integration tests: a scripted backend and
//! a timer that records every delay it is asked for.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use tunnelctl::{
    Ack, BackendState, MemorySettingsStore, PollConfig, Result, Scheduler, StatusChanged,
    TunnelBackend, TunnelController, TunnelError, TunnelProvider, TunnelSettings, TunnelStatus,
};

pub type TestController =
    TunnelController<Arc<ScriptedBackend>, MemorySettingsStore, Arc<RecordingScheduler>>;

// -- Backend ----------------------------------------------------------------

/// Backend whose status replies are played back from a queue. Once the
/// queue runs dry every call gets `fallback`.
pub struct ScriptedBackend {
    statuses: Mutex<VecDeque<Result<TunnelStatus>>>,
    fallback: Mutex<Result<TunnelStatus>>,
    start: Mutex<Result<Ack>>,
    stop: Mutex<Result<Ack>>,
    start_delay: Mutex<Duration>,
    status_delay: Mutex<Duration>,
    last_settings: Mutex<Option<TunnelSettings>>,
    start_calls: AtomicUsize,
    status_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            statuses: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(TunnelStatus::stopped())),
            start: Mutex::new(Ok(Ack::with_message("Tunnel started"))),
            stop: Mutex::new(Ok(Ack::with_message("Tunnel stopped"))),
            start_delay: Mutex::new(Duration::ZERO),
            status_delay: Mutex::new(Duration::ZERO),
            last_settings: Mutex::new(None),
            start_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_status(&self, reply: Result<TunnelStatus>) -> &Self {
        self.statuses.lock().unwrap().push_back(reply);
        self
    }

    pub fn set_fallback(&self, reply: Result<TunnelStatus>) -> &Self {
        *self.fallback.lock().unwrap() = reply;
        self
    }

    pub fn set_start(&self, reply: Result<Ack>) -> &Self {
        *self.start.lock().unwrap() = reply;
        self
    }

    pub fn set_stop(&self, reply: Result<Ack>) -> &Self {
        *self.stop.lock().unwrap() = reply;
        self
    }

    pub fn set_start_delay(&self, delay: Duration) -> &Self {
        *self.start_delay.lock().unwrap() = delay;
        self
    }

    pub fn set_status_delay(&self, delay: Duration) -> &Self {
        *self.status_delay.lock().unwrap() = delay;
        self
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn last_settings(&self) -> Option<TunnelSettings> {
        self.last_settings.lock().unwrap().clone()
    }
}

impl TunnelBackend for ScriptedBackend {
    async fn request_start(&self, settings: &TunnelSettings) -> Result<Ack> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_settings.lock().unwrap() = Some(settings.clone());
        let delay = *self.start_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.start.lock().unwrap().clone()
    }

    async fn request_status(&self) -> Result<TunnelStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let reply = {
            let queued = self.statuses.lock().unwrap().pop_front();
            queued.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
        };
        let delay = *self.status_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reply
    }

    async fn request_stop(&self) -> Result<Ack> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stop.lock().unwrap().clone()
    }
}

// -- Timer ------------------------------------------------------------------

/// Tokio-backed timer that remembers each requested delay.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingScheduler {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Scheduler for RecordingScheduler {
    fn after(&self, delay: Duration) -> impl Future<Output = ()> + Send {
        self.delays.lock().unwrap().push(delay);
        tokio::time::sleep(delay)
    }
}

// -- Helpers ----------------------------------------------------------------

pub fn controller(
    backend: &Arc<ScriptedBackend>,
    timer: &Arc<RecordingScheduler>,
    config: PollConfig,
) -> TestController {
    TunnelController::builder(Arc::clone(backend), MemorySettingsStore::default())
        .poll_config(config)
        .scheduler(Arc::clone(timer))
        .build()
}

pub fn running(provider: &str, url: Option<&str>) -> TunnelStatus {
    TunnelStatus {
        state: BackendState::Running,
        provider: Some(provider.to_string()),
        local_port: Some(5000),
        url: url.map(str::to_string),
    }
}

pub fn pinggy_settings() -> TunnelSettings {
    TunnelSettings::new(TunnelProvider::Pinggy, 5000).with_pinggy_token("abc")
}

pub fn unreachable() -> TunnelError {
    TunnelError::BackendUnreachable {
        url: "http://127.0.0.1:5000/api/tunnel/status".into(),
        detail: "connection refused".into(),
    }
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Everything broadcast so far, without waiting.
pub fn drain(events: &mut broadcast::Receiver<StatusChanged>) -> Vec<StatusChanged> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
