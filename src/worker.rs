//! Single worker loop owning the engine.
//!
//! All operations arrive as tagged requests over one channel and are
//! handled strictly in order, so sync and search never run concurrently;
//! they only interleave at message boundaries. Sync has no reply channel:
//! its progress is pushed into the shared [`StatusJournal`], and a
//! terminal entry signals completion or failure.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::engine::{Engine, EngineStats};
use crate::heartbeat::Heartbeat;
use crate::results::SearchHit;

/// Journal entries kept before the oldest ones are dropped
const JOURNAL_CAP: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker is gone")]
    Gone,

    #[error("{0}")]
    Engine(String),
}

/// The closed set of operations the worker handles.
pub enum Request {
    Sync {
        folders: Vec<String>,
    },
    Search {
        query: String,
        reply: oneshot::Sender<Result<Vec<SearchHit>, String>>,
    },
    MoreResults {
        page: usize,
        reply: oneshot::Sender<Vec<SearchHit>>,
    },
    ClearAll {
        reply: oneshot::Sender<Result<(), String>>,
    },
    Stats {
        reply: oneshot::Sender<Result<EngineStats, String>>,
    },
}

/// One pushed status line. `seq` grows monotonically so pollers can ask
/// for "everything after what I have seen".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub seq: u64,
    pub text: String,
    pub terminal: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub syncing: bool,
    pub busy: bool,
    pub updates: Vec<StatusUpdate>,
}

/// Bounded, shared log of sync progress lines.
#[derive(Clone, Default)]
pub struct StatusJournal {
    inner: Arc<Mutex<JournalInner>>,
}

#[derive(Default)]
struct JournalInner {
    entries: VecDeque<StatusUpdate>,
    next_seq: u64,
    syncing: bool,
}

impl StatusJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, text: &str) {
        self.append(text, false);
    }

    fn append(&self, text: &str, terminal: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_seq += 1;
        let update = StatusUpdate {
            seq: inner.next_seq,
            text: text.to_string(),
            terminal,
        };
        inner.entries.push_back(update);
        while inner.entries.len() > JOURNAL_CAP {
            inner.entries.pop_front();
        }
    }

    fn begin_sync(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.syncing = true;
    }

    fn finish_sync(&self, text: &str) {
        self.append(text, true);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.syncing = false;
    }

    pub fn is_syncing(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.syncing)
            .unwrap_or(false)
    }

    /// Every update with a sequence number greater than `after`.
    pub fn since(&self, after: u64) -> Vec<StatusUpdate> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .entries
            .iter()
            .filter(|u| u.seq > after)
            .cloned()
            .collect()
    }
}

/// Cloneable front of the worker: sends requests, reads status.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::UnboundedSender<Request>,
    journal: StatusJournal,
    heartbeat: Heartbeat,
}

impl WorkerHandle {
    /// Queue a sync pass. Returns false if the worker is gone. Progress
    /// arrives through the status journal, not a reply.
    pub fn request_sync(&self, folders: Vec<String>) -> bool {
        self.sender.send(Request::Sync { folders }).is_ok()
    }

    pub async fn search(&self, query: String) -> Result<Vec<SearchHit>, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(Request::Search { query, reply })
            .map_err(|_| WorkerError::Gone)?;
        rx.await
            .map_err(|_| WorkerError::Gone)?
            .map_err(WorkerError::Engine)
    }

    pub async fn more_results(&self, page: usize) -> Result<Vec<SearchHit>, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(Request::MoreResults { page, reply })
            .map_err(|_| WorkerError::Gone)?;
        rx.await.map_err(|_| WorkerError::Gone)
    }

    pub async fn clear_all(&self) -> Result<(), WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(Request::ClearAll { reply })
            .map_err(|_| WorkerError::Gone)?;
        rx.await
            .map_err(|_| WorkerError::Gone)?
            .map_err(WorkerError::Engine)
    }

    pub async fn stats(&self) -> Result<EngineStats, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(Request::Stats { reply })
            .map_err(|_| WorkerError::Gone)?;
        rx.await
            .map_err(|_| WorkerError::Gone)?
            .map_err(WorkerError::Engine)
    }

    /// Journal state after `after`, answered without a worker round-trip
    /// so it stays responsive during a long sync.
    pub fn status(&self, after: u64) -> StatusSnapshot {
        StatusSnapshot {
            syncing: self.journal.is_syncing(),
            busy: self.heartbeat.is_busy(),
            updates: self.journal.since(after),
        }
    }
}

/// Move the engine onto its own thread and start draining requests.
/// Dropping every handle closes the channel and ends the loop; join the
/// returned thread handle to wait for it.
pub fn spawn(engine: Engine) -> (WorkerHandle, JoinHandle<()>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let journal = StatusJournal::new();
    let heartbeat = engine.heartbeat();

    let thread = std::thread::spawn({
        let journal = journal.clone();
        move || run(engine, receiver, journal)
    });

    (
        WorkerHandle {
            sender,
            journal,
            heartbeat,
        },
        thread,
    )
}

/// A handle whose worker is gone from birth: the receiving side of the
/// channel is dropped before any request can be sent.
#[cfg(test)]
pub(crate) fn dead_handle() -> WorkerHandle {
    let (sender, receiver) = mpsc::unbounded_channel();
    drop(receiver);
    WorkerHandle {
        sender,
        journal: StatusJournal::new(),
        heartbeat: Heartbeat::new(),
    }
}

fn run(mut engine: Engine, mut receiver: mpsc::UnboundedReceiver<Request>, journal: StatusJournal) {
    while let Some(request) = receiver.blocking_recv() {
        match request {
            Request::Sync { folders } => {
                journal.begin_sync();
                let result = engine.sync(&folders, &mut |text| journal.push(text));
                match result {
                    Ok(summary) => journal.finish_sync(&format!(
                        "sync complete: {} added, {} removed, {} dead links",
                        summary.added, summary.removed, summary.dead_links
                    )),
                    Err(err) => {
                        log::error!("sync failed: {err}");
                        journal.finish_sync(&format!("sync failed: {err}"));
                    }
                }
            }
            Request::Search { query, reply } => {
                let result = engine.search(&query).map_err(|e| e.to_string());
                reply.send(result).ok();
            }
            Request::MoreResults { page, reply } => {
                reply.send(engine.more_results(page)).ok();
            }
            Request::ClearAll { reply } => {
                let result = engine.clear_all().map_err(|e| e.to_string());
                reply.send(result).ok();
            }
            Request::Stats { reply } => {
                let result = engine.stats().map_err(|e| e.to_string());
                reply.send(result).ok();
            }
        }
    }
    log::debug!("worker loop finished");
}
