//! Integration tests exercising the six concrete persistence scenarios
//! this crate is built to satisfy (see `DESIGN.md`).

use std::time::{Duration, Instant};

use nds::{
    BgCompletion, ChecksummedCodec, InMemoryStore, NdsCommand, NdsConfig, NdsRuntime, Value,
};

fn open_runtime(dir: &std::path::Path, num_dbs: u32) -> NdsRuntime {
    let config = NdsConfig::builder(dir).num_dbs(num_dbs).build();
    let mem_stores = (0..num_dbs)
        .map(|_| Box::new(InMemoryStore::new()) as Box<dyn nds::MemStore>)
        .collect();
    NdsRuntime::open(config, Box::new(ChecksummedCodec::default()), mem_stores).unwrap()
}

fn wait_for_completion(runtime: &NdsRuntime) -> Vec<BgCompletion> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let completions = runtime.poll_background();
        if !completions.is_empty() {
            return completions;
        }
        assert!(Instant::now() < deadline, "background flush never completed");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn simple_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = open_runtime(dir.path(), 1);

    runtime
        .set_nds(0, b"a", Some(&Value(b"1".to_vec())))
        .unwrap();
    assert_eq!(runtime.get_nds(0, b"a").unwrap(), Some(Value(b"1".to_vec())));

    assert_eq!(
        runtime.del_nds(0, b"a").unwrap(),
        nds::DelOutcome::Deleted
    );
    assert_eq!(runtime.get_nds(0, b"a").unwrap(), None);
}

#[test]
fn dirty_shadowing() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = open_runtime(dir.path(), 1);

    // Put "a"="1" on disk directly.
    runtime
        .set_nds(0, b"a", Some(&Value(b"1".to_vec())))
        .unwrap();

    // In memory the key is gone, but it is marked dirty (the key was
    // deleted from the cache and the deletion has not been flushed yet).
    runtime.touch(0, b"a");

    assert_eq!(runtime.get_nds(0, b"a").unwrap(), None);
}

#[test]
fn flush_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let mem = InMemoryStore::new();
    mem.set(b"a", Value(b"1".to_vec()));
    // "b" is touched dirty but absent from mem -- a pending delete.
    let mem_stores: Vec<Box<dyn nds::MemStore>> = vec![Box::new(mem)];
    let config = NdsConfig::builder(dir.path()).num_dbs(1).build();
    let runtime =
        NdsRuntime::open(config, Box::new(ChecksummedCodec::default()), mem_stores).unwrap();

    runtime.touch(0, b"a");
    runtime.touch(0, b"b");

    let reply = nds::dispatch(&runtime, NdsCommand::Flush, 42, || {});
    assert_eq!(reply, nds::CommandReply::Deferred);

    let completions = wait_for_completion(&runtime);
    assert_eq!(completions, vec![BgCompletion::Flushed { requestor: Some(42) }]);

    assert_eq!(runtime.get_nds(0, b"a").unwrap(), Some(Value(b"1".to_vec())));
    assert_eq!(runtime.get_nds(0, b"b").unwrap(), None);
    assert_eq!(runtime.stats().flush_successes(), 1);
}

#[test]
fn snapshot_queued_behind_flush() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = open_runtime(dir.path(), 1);
    runtime
        .set_nds(0, b"a", Some(&Value(b"1".to_vec())))
        .unwrap();
    runtime.touch(0, b"a");

    let reply = nds::dispatch(&runtime, NdsCommand::Flush, 1, || {});
    assert_eq!(reply, nds::CommandReply::Deferred);

    let reply = nds::dispatch(&runtime, NdsCommand::Snapshot, 2, || {});
    assert_eq!(reply, nds::CommandReply::Deferred);

    // Drain completions until we've seen both the flush and the
    // promoted snapshot resolve.
    let mut saw_flush = false;
    let mut saw_snapshot = false;
    let deadline = Instant::now() + Duration::from_secs(5);
    while !(saw_flush && saw_snapshot) {
        for completion in runtime.poll_background() {
            match completion {
                BgCompletion::Flushed { requestor: Some(1) } => saw_flush = true,
                BgCompletion::Snapshotted { requestor: Some(2) } => saw_snapshot = true,
                other => panic!("unexpected completion: {:?}", other),
            }
        }
        assert!(Instant::now() < deadline, "snapshot never completed");
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(runtime.config().snapshot_root().join("data.mdb").exists()
        || runtime.config().snapshot_root().exists());
}

#[test]
fn flush_failure_merges_dirty_back() {
    let dir = tempfile::tempdir().unwrap();

    // Block the snapshot destination with a plain file, so the worker's
    // post-write environment copy fails deterministically regardless of
    // platform: the writes themselves succeed, but the overall flush is
    // still reported as failed, which is the same reconciliation path
    // (merge_back, failure stat) a plain flush failure would take.
    let blocked_dest = dir.path().join("blocked-snapshot-dest");
    std::fs::write(&blocked_dest, b"not a directory").unwrap();
    let config = NdsConfig::builder(dir.path().join("data"))
        .num_dbs(1)
        .snapshot_root(blocked_dest)
        .build();
    let mem = InMemoryStore::new();
    mem.set(b"a", Value(b"1".to_vec()));
    // "b" is touched dirty but absent from mem -- a pending delete.
    let mem_stores: Vec<Box<dyn nds::MemStore>> = vec![Box::new(mem)];
    let runtime =
        NdsRuntime::open(config, Box::new(ChecksummedCodec::default()), mem_stores).unwrap();

    runtime.touch(0, b"a");
    runtime.touch(0, b"b");

    let reply = nds::dispatch(&runtime, NdsCommand::Snapshot, 7, || {});
    assert_eq!(reply, nds::CommandReply::Deferred);

    let completions = wait_for_completion(&runtime);
    assert_eq!(
        completions,
        vec![BgCompletion::SnapshotFailed { requestor: Some(7) }]
    );
    assert_eq!(runtime.stats().flush_failures(), 1);

    // Both keys are merged back into dirty, so they shadow disk again
    // even though "a"'s put and "b"'s delete both landed on disk before
    // the snapshot copy step failed.
    assert_eq!(runtime.get_nds(0, b"a").unwrap(), None);
    assert_eq!(runtime.get_nds(0, b"b").unwrap(), None);
}

#[test]
fn corruption_is_treated_as_absent() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = open_runtime(dir.path(), 1);

    // Write raw, non-checksummed bytes directly through the disk engine,
    // bypassing the codec -- simulating a corrupt on-disk record.
    runtime.disk().put(0, b"k", b"not-checksummed").unwrap();

    assert_eq!(runtime.get_nds(0, b"k").unwrap(), None);
}
