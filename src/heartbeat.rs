//! Keep-alive ticker held across long-running work.
//!
//! Rebuilds and large batch updates can run for minutes. Holding a
//! [`HeartbeatGuard`] keeps a background ticker recording a beat at a fixed
//! interval, which the status surface reports as liveness. The guard
//! releases on drop, so the ticker stops on the error path as reliably as
//! on success.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Heartbeat {
    state: Arc<HeartbeatState>,
}

struct HeartbeatState {
    interval: Duration,
    active: AtomicUsize,
    last_beat: Mutex<Option<Instant>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            state: Arc::new(HeartbeatState {
                interval,
                active: AtomicUsize::new(0),
                last_beat: Mutex::new(None),
            }),
        }
    }

    /// Start beating until the returned guard is dropped.
    pub fn hold(&self, label: &str) -> HeartbeatGuard {
        self.state.active.fetch_add(1, Ordering::SeqCst);
        self.state.beat(label);

        let stop = Arc::new(AtomicBool::new(false));
        let ticker_stop = Arc::clone(&stop);
        let ticker_state = Arc::clone(&self.state);
        let label = label.to_string();
        let handle = std::thread::spawn(move || loop {
            std::thread::park_timeout(ticker_state.interval);
            if ticker_stop.load(Ordering::Relaxed) {
                break;
            }
            ticker_state.beat(&label);
        });

        HeartbeatGuard {
            state: Arc::clone(&self.state),
            stop,
            handle: Some(handle),
        }
    }

    /// Whether any guard is currently held.
    pub fn is_busy(&self) -> bool {
        self.state.active.load(Ordering::SeqCst) > 0
    }

    pub fn last_beat(&self) -> Option<Instant> {
        self.state.last_beat.lock().ok().and_then(|guard| *guard)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    fn beat(&self, label: &str) {
        log::trace!("heartbeat: {label}");
        if let Ok(mut guard) = self.last_beat.lock() {
            *guard = Some(Instant::now());
        }
    }
}

pub struct HeartbeatGuard {
    state: Arc<HeartbeatState>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            handle.join().ok();
        }
        self.state.active.fetch_sub(1, Ordering::SeqCst);
    }
}
