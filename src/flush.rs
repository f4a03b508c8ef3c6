//! Background flush coordinator (§4.4) and snapshot coordinator (§4.5).
//!
//! The original design forks a child process to drain the dirty set
//! while the parent keeps serving. This implementation instead follows
//! a thread/snapshot-iterator alternative suited to managed runtimes:
//! the foreground rotates the dirty sets and pre-encodes every value a
//! flush will write *before* handing
//! anything to a worker thread, so the worker only ever touches bytes
//! that are already immutable, and the `DiskEngine` handle it receives
//! is a cheap, thread-safe clone rather than a freshly reopened
//! environment.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::JoinHandle;

use log::{error, info, warn};

use crate::disk::DiskEngine;
use crate::error::NdsError;

/// Opaque identifier for the client awaiting a deferred reply. NDS does
/// not know or care what it means; the command dispatcher (out of
/// scope) mints and interprets these.
pub type RequestorId = u64;

/// A single logical DB's contribution to a flush batch: either a value
/// to write, or a tombstone (the key was deleted in memory since it was
/// marked dirty).
pub(crate) struct PendingWrite {
    pub key: Vec<u8>,
    pub encoded: Option<Vec<u8>>,
}

pub(crate) struct FlushBatch {
    pub db_id: u32,
    pub writes: Vec<PendingWrite>,
}

enum FlushOutcome {
    Success,
    Failure(String),
}

/// What a completed (or failed) background operation resolves to, for
/// the command surface to turn into a client reply.
#[derive(Debug, PartialEq, Eq)]
pub enum BgCompletion {
    Flushed { requestor: Option<RequestorId> },
    FlushFailed { requestor: Option<RequestorId> },
    Snapshotted { requestor: Option<RequestorId> },
    SnapshotFailed { requestor: Option<RequestorId> },
}

/// The state machine of §4.4: `Idle` / `Flushing` / `Snapshotting` /
/// `SnapshotPending`, expressed as plain fields rather than an explicit
/// enum, since several of them (`bg_requestor`, `dirty_before_bgsave`)
/// carry data the state alone doesn't.
pub(crate) struct FlushState {
    worker: Option<RunningWorker>,
    snapshot_in_progress: bool,
    snapshot_pending: bool,
    snapshot_pending_requestor: Option<RequestorId>,
    bg_requestor: Option<RequestorId>,
    dirty_before_bgsave: usize,
}

struct RunningWorker {
    handle: JoinHandle<()>,
    receiver: Receiver<FlushOutcome>,
}

impl FlushState {
    pub(crate) fn new() -> FlushState {
        FlushState {
            worker: None,
            snapshot_in_progress: false,
            snapshot_pending: false,
            snapshot_pending_requestor: None,
            bg_requestor: None,
            dirty_before_bgsave: 0,
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.worker.is_none()
    }

    /// True if a snapshot is already in progress or already queued
    /// behind the running flush -- a second `NDS SNAPSHOT` must be
    /// rejected rather than silently overwriting the queued requestor.
    pub(crate) fn snapshot_already_requested(&self) -> bool {
        self.snapshot_in_progress || self.snapshot_pending
    }

    /// Spawns a worker thread to drain `batches` to `disk`, optionally
    /// copying the environment to `snapshot_dest` on success. Returns an
    /// error (without mutating any dirty-set state -- the caller is
    /// expected to have already merged `flushing` back on this path) if
    /// the worker thread itself could not be spawned.
    pub(crate) fn start(
        &mut self,
        disk: DiskEngine,
        batches: Vec<FlushBatch>,
        snapshot: bool,
        snapshot_dest: Option<std::path::PathBuf>,
        requestor: Option<RequestorId>,
        dirty_before_bgsave: usize,
    ) -> Result<(), NdsError> {
        let (tx, rx) = mpsc::channel();
        let builder = std::thread::Builder::new().name("nds-flush".into());
        let handle = builder
            .spawn(move || {
                let outcome = run_flush(&disk, &batches, snapshot, snapshot_dest.as_deref());
                // The receiver may already be gone if the foreground was torn
                // down; that is not this thread's problem to report.
                let _ = tx.send(outcome);
            })
            .map_err(|err| NdsError::Background(format!("failed to spawn flush worker: {}", err)))?;

        self.worker = Some(RunningWorker { handle, receiver: rx });
        self.snapshot_in_progress = snapshot;
        self.bg_requestor = requestor;
        self.dirty_before_bgsave = dirty_before_bgsave;
        info!(
            "started {} flush ({} keys captured)",
            if snapshot { "snapshotting" } else { "plain" },
            dirty_before_bgsave
        );
        Ok(())
    }

    /// Queues a snapshot behind the currently-running flush.
    pub(crate) fn queue_snapshot(&mut self, requestor: Option<RequestorId>) {
        self.snapshot_pending = true;
        self.snapshot_pending_requestor = requestor;
    }

    /// If a snapshot is queued, clears the queue and returns its
    /// requestor (which may itself be absent, if the snapshot was
    /// queued without one). Returns `None` only when nothing was
    /// queued at all.
    pub(crate) fn take_snapshot_pending(&mut self) -> Option<Option<RequestorId>> {
        if !self.snapshot_pending {
            return None;
        }
        self.snapshot_pending = false;
        Some(self.snapshot_pending_requestor.take())
    }

    /// Non-blocking poll of the running worker, if any. Returns `None`
    /// if no worker is running or it has not finished yet.
    pub(crate) fn poll(&mut self) -> Option<(FlushResult, Option<RequestorId>, bool)> {
        let worker = self.worker.as_mut()?;
        match worker.receiver.try_recv() {
            Ok(FlushOutcome::Success) => Some(self.finish(FlushResult::Success)),
            Ok(FlushOutcome::Failure(msg)) => {
                warn!("background flush failed: {}", msg);
                Some(self.finish(FlushResult::Failure))
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                error!("flush worker thread vanished without reporting a result");
                Some(self.finish(FlushResult::Failure))
            }
        }
    }

    fn finish(&mut self, result: FlushResult) -> (FlushResult, Option<RequestorId>, bool) {
        let worker = self.worker.take().expect("finish called without a worker");
        let _ = worker.handle.join();
        let requestor = self.bg_requestor.take();
        let snapshot = self.snapshot_in_progress;
        self.snapshot_in_progress = false;
        self.dirty_before_bgsave = 0;
        (result, requestor, snapshot)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FlushResult {
    Success,
    Failure,
}

fn run_flush(
    disk: &DiskEngine,
    batches: &[FlushBatch],
    snapshot: bool,
    snapshot_dest: Option<&std::path::Path>,
) -> FlushOutcome {
    for batch in batches {
        if batch.writes.is_empty() {
            continue;
        }
        let entries = batch
            .writes
            .iter()
            .map(|w| (w.key.as_slice(), w.encoded.as_deref()));
        if let Err(err) = disk.apply_batch(batch.db_id, entries) {
            return FlushOutcome::Failure(format!("db {} batch write failed: {}", batch.db_id, err));
        }
    }
    if snapshot {
        if let Some(dest) = snapshot_dest {
            if let Err(err) = disk.copy_to(dest) {
                return FlushOutcome::Failure(format!("snapshot copy failed: {}", err));
            }
        }
    }
    FlushOutcome::Success
}
