//! `NdsRuntime`: the single context object that collects the process-wide
//! state the original design kept as globals (§9) -- the environment
//! handle, the flush state machine, and per-DB dirty-sets and caches --
//! and exposes the read-through/write-back API (§4.3) plus the flush,
//! snapshot, preload, and command surfaces built on top of it.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::codec::{Codec, Value};
use crate::config::NdsConfig;
use crate::disk::{DeleteOutcome, DiskEngine};
use crate::dirty::DirtyTracker;
use crate::error::{NdsError, NdsResult};
use crate::flush::{BgCompletion, FlushBatch, FlushResult, FlushState, PendingWrite, RequestorId};
use crate::memstore::MemStore;
use crate::stats::NdsStats;

/// Per-logical-DB state: the in-memory dictionary (an external
/// collaborator supplied by the caller) and this DB's dirty/flushing
/// sets.
struct LogicalDb {
    mem: Box<dyn MemStore>,
    dirty: Mutex<DirtyTracker>,
}

/// Outcome of `delNDS` (§4.3).
#[derive(Debug, PartialEq, Eq)]
pub enum DelOutcome {
    Deleted,
    NotFound,
}

/// Whether a `walkNDS` callback asked to stop early.
#[derive(Debug, PartialEq, Eq)]
pub enum WalkOutcome {
    Completed,
    Aborted,
}

pub enum WalkControl {
    Continue,
    Stop,
}

/// The NDS context: one per keyspace, holding `num_dbs` logical DBs.
pub struct NdsRuntime {
    config: NdsConfig,
    disk: DiskEngine,
    codec: Box<dyn Codec>,
    stats: NdsStats,
    dbs: Vec<LogicalDb>,
    flush: Mutex<FlushState>,
    preload_in_progress: AtomicBool,
    preload_complete: AtomicBool,
}

impl NdsRuntime {
    /// Opens the disk environment and wires up `mem_stores`, one per
    /// logical DB, in DB-id order. `mem_stores.len()` must equal
    /// `config.num_dbs()`.
    pub fn open(
        config: NdsConfig,
        codec: Box<dyn Codec>,
        mem_stores: Vec<Box<dyn MemStore>>,
    ) -> NdsResult<NdsRuntime> {
        assert_eq!(
            mem_stores.len(),
            config.num_dbs() as usize,
            "one MemStore must be supplied per logical db"
        );
        let disk = DiskEngine::open(&config)?;
        let dbs = mem_stores
            .into_iter()
            .map(|mem| LogicalDb {
                mem,
                dirty: Mutex::new(DirtyTracker::new()),
            })
            .collect();
        Ok(NdsRuntime {
            config,
            disk,
            codec,
            stats: NdsStats::new(),
            dbs,
            flush: Mutex::new(FlushState::new()),
            preload_in_progress: AtomicBool::new(false),
            preload_complete: AtomicBool::new(false),
        })
    }

    pub fn stats(&self) -> &NdsStats {
        &self.stats
    }

    fn db(&self, db_id: u32) -> &LogicalDb {
        &self.dbs[db_id as usize]
    }

    /// Called by the cache layer on every foreground mutation: marks
    /// `key` dirty in logical DB `db_id`. `mem` is expected to already
    /// hold the authoritative value (or have removed it, for a delete).
    pub fn touch(&self, db_id: u32, key: &[u8]) {
        self.db(db_id).dirty.lock().touch(key);
    }

    fn is_dirty(&self, db_id: u32, key: &[u8]) -> bool {
        self.db(db_id).dirty.lock().is_dirty(key)
    }

    /// `getNDS` (§4.3): dirty keys shadow disk; otherwise probe disk and
    /// verify the checksum before decoding.
    pub fn get_nds(&self, db_id: u32, key: &[u8]) -> NdsResult<Option<Value>> {
        if self.is_dirty(db_id, key) {
            self.stats.record_miss();
            return Ok(None);
        }
        match self.disk.get(db_id, key)? {
            None => {
                self.stats.record_miss();
                Ok(None)
            }
            Some(bytes) => Ok(self.decode_record(db_id, key, &bytes)),
        }
    }

    /// Verifies and decodes a raw on-disk record already in hand,
    /// logging and counting a miss on checksum or decode failure rather
    /// than ever surfacing corruption as an error. Shared by `get_nds`
    /// (which fetches the bytes itself) and `preload` (which already has
    /// them from the walk and should not re-read disk to get them).
    fn decode_record(&self, db_id: u32, key: &[u8], bytes: &[u8]) -> Option<Value> {
        if !self.codec.verify(bytes) {
            warn!(
                "corrupt record for db {} key {:?}: checksum failed, treating as absent",
                db_id, key
            );
            self.stats.record_miss();
            return None;
        }
        match self.codec.decode(bytes) {
            Ok(value) => {
                self.stats.record_hit();
                Some(value)
            }
            Err(err) => {
                warn!("corrupt record for db {} key {:?}: {}", db_id, key, err);
                self.stats.record_miss();
                None
            }
        }
    }

    /// `setNDS` (§4.3): a write-through path independent of the dirty
    /// workflow, used by the cache layer when evicting or persisting a
    /// value outside of normal dirty accounting. `None` is a no-op (the
    /// key was deleted between lookup and this call).
    pub fn set_nds(&self, db_id: u32, key: &[u8], value: Option<&Value>) -> NdsResult<()> {
        let value = match value {
            Some(v) => v,
            None => return Ok(()),
        };
        let encoded = self.codec.encode(value);
        self.disk.put(db_id, key, &encoded)?;
        // `encoded` is an owned Vec, dropped here -- the original source's
        // `setNDS` leaks this buffer (§9); ownership makes the release
        // explicit instead of relying on a GC-less language's discipline.
        drop(encoded);
        Ok(())
    }

    /// `delNDS` (§4.3).
    pub fn del_nds(&self, db_id: u32, key: &[u8]) -> NdsResult<DelOutcome> {
        match self.disk.del(db_id, key)? {
            DeleteOutcome::Deleted => Ok(DelOutcome::Deleted),
            DeleteOutcome::NotFound => Ok(DelOutcome::NotFound),
        }
    }

    /// `existsNDS` (§4.3).
    pub fn exists_nds(&self, db_id: u32, key: &[u8]) -> NdsResult<bool> {
        if self.is_dirty(db_id, key) {
            return Ok(false);
        }
        Ok(self.disk.get(db_id, key)?.is_some())
    }

    /// `walkNDS` (§4.3): a single forward pass over db_id's disk table,
    /// yielding to `yield_fn` every `config.yield_every()` keys so a
    /// caller embedded in a cooperative event loop can service other
    /// work. `callback` may request early termination via
    /// `WalkControl::Stop`.
    pub fn walk_nds<C, Y>(&self, db_id: u32, mut callback: C, mut yield_fn: Y) -> NdsResult<WalkOutcome>
    where
        C: FnMut(&[u8], &[u8]) -> WalkControl,
        Y: FnMut(),
    {
        let entries = self.disk.cursor_iterate(db_id)?;
        for (i, (key, value)) in entries.iter().enumerate() {
            match callback(key, value) {
                WalkControl::Continue => {}
                WalkControl::Stop => return Ok(WalkOutcome::Aborted),
            }
            if (i + 1) % self.config.yield_every() == 0 {
                yield_fn();
            }
        }
        Ok(WalkOutcome::Completed)
    }

    fn global_dirty_count(&self) -> usize {
        self.dbs.iter().map(|db| db.dirty.lock().dirty_count()).sum()
    }

    /// `NDS FLUSH` / `NDS SNAPSHOT` start transition (§4.4). `snapshot`
    /// selects whether the environment is copied after the flush
    /// completes. If a flush is already running, a plain flush request
    /// is rejected outright (only one background operation may have an
    /// outstanding requestor at a time, §4.7); a snapshot request is
    /// queued behind it, unless a snapshot is already in progress or
    /// already queued, in which case it is rejected too rather than
    /// silently replacing the queued requestor.
    pub fn start_flush(&self, requestor: Option<RequestorId>, snapshot: bool) -> NdsResult<()> {
        let mut flush = self.flush.lock();
        if !flush.is_idle() {
            if snapshot {
                if flush.snapshot_already_requested() {
                    return Err(NdsError::Invariant(
                        "a snapshot is already in progress or queued".into(),
                    ));
                }
                flush.queue_snapshot(requestor);
                return Ok(());
            }
            return Err(NdsError::Invariant(
                "a background flush is already running".into(),
            ));
        }
        self.start_flush_locked(&mut flush, requestor, snapshot)
    }

    fn start_flush_locked(
        &self,
        flush: &mut FlushState,
        requestor: Option<RequestorId>,
        snapshot: bool,
    ) -> NdsResult<()> {
        // Invariant check (§7): this is the "isn't supposed to happen" case.
        for (db_id, db) in self.dbs.iter().enumerate() {
            if db.dirty.lock().flushing_count() != 0 {
                return Err(NdsError::Invariant(format!(
                    "db {} already has an in-flight flushing set",
                    db_id
                )));
            }
        }

        let dirty_before_bgsave = self.global_dirty_count();
        let mut batches = Vec::with_capacity(self.dbs.len());
        for (db_id, db) in self.dbs.iter().enumerate() {
            let keys = db.dirty.lock().rotate();
            let writes = keys
                .into_iter()
                .map(|key| {
                    let encoded = db.mem.get(&key).map(|v| self.codec.encode(&v));
                    PendingWrite { key, encoded }
                })
                .collect();
            batches.push(FlushBatch {
                db_id: db_id as u32,
                writes,
            });
        }

        let snapshot_dest = snapshot.then(|| self.config.snapshot_root().to_path_buf());
        match flush.start(
            self.disk.clone(),
            batches,
            snapshot,
            snapshot_dest,
            requestor,
            dirty_before_bgsave,
        ) {
            Ok(()) => Ok(()),
            Err(err) => {
                // Spawn failed: nothing was written, so merge flushing back
                // into dirty for every db before surfacing the error.
                for db in &self.dbs {
                    db.dirty.lock().merge_back();
                }
                Err(err)
            }
        }
    }

    /// Non-blocking reap of a completed background flush/snapshot
    /// (§4.4 "Transition: worker completion"). Intended to be called
    /// periodically from the host event loop. May return more than one
    /// completion if reaping the current worker immediately promotes a
    /// pending snapshot whose own start then fails.
    pub fn poll_background(&self) -> Vec<BgCompletion> {
        let mut completions = Vec::new();
        let (result, requestor, was_snapshot) = {
            let mut flush = self.flush.lock();
            match flush.poll() {
                Some(outcome) => outcome,
                None => return completions,
            }
        };

        match result {
            FlushResult::Success => {
                for db in &self.dbs {
                    db.dirty.lock().clear_flushing();
                }
                self.stats.record_flush_success();
                debug!("flush completed successfully");
                completions.push(if was_snapshot {
                    BgCompletion::Snapshotted { requestor }
                } else {
                    BgCompletion::Flushed { requestor }
                });
            }
            FlushResult::Failure => {
                for db in &self.dbs {
                    db.dirty.lock().merge_back();
                }
                self.stats.record_flush_failure();
                completions.push(if was_snapshot {
                    BgCompletion::SnapshotFailed { requestor }
                } else {
                    BgCompletion::FlushFailed { requestor }
                });
            }
        }

        let promoted = {
            let mut flush = self.flush.lock();
            flush.take_snapshot_pending()
        };
        if let Some(pending_requestor) = promoted {
            let mut flush = self.flush.lock();
            if let Err(err) = self.start_flush_locked(&mut flush, pending_requestor, true) {
                warn!("failed to promote queued snapshot: {}", err);
                completions.push(BgCompletion::SnapshotFailed {
                    requestor: pending_requestor,
                });
            }
        }

        completions
    }

    /// `NDS PRELOAD` (§4.6): idempotent bulk population of memory from
    /// disk. Safe to call more than once; only the first call does any
    /// work. `yield_fn` is the host's "process pending file events"
    /// primitive, invoked every `config.yield_every()` keys per DB via
    /// `walk_nds` -- the one real suspension point in the whole system
    /// (§5) -- so a full-keyspace preload does not starve foreground
    /// traffic.
    pub fn preload<Y: FnMut()>(&self, mut yield_fn: Y) -> NdsResult<()> {
        if self.preload_complete.load(Ordering::Acquire) {
            return Ok(());
        }
        if self
            .preload_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let result = self.preload_all_dbs(&mut yield_fn);
        self.preload_in_progress.store(false, Ordering::Release);
        result?;
        self.preload_complete.store(true, Ordering::Release);
        Ok(())
    }

    fn preload_all_dbs(&self, yield_fn: &mut dyn FnMut()) -> NdsResult<()> {
        for (db_id, db) in self.dbs.iter().enumerate() {
            self.walk_nds(
                db_id as u32,
                |key, bytes| {
                    if !db.mem.contains(key) && !self.is_dirty(db_id as u32, key) {
                        if let Some(value) = self.decode_record(db_id as u32, key, bytes) {
                            db.mem.set(key, value);
                        }
                    }
                    WalkControl::Continue
                },
                &mut *yield_fn,
            )?;
        }
        Ok(())
    }

    pub fn config(&self) -> &NdsConfig {
        &self.config
    }

    /// Direct access to the disk backend, for tooling that needs to
    /// bypass the codec (e.g. corruption injection in tests, or
    /// inspection utilities).
    pub fn disk(&self) -> &DiskEngine {
        &self.disk
    }
}
