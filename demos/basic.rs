//! Minimal end-to-end usage of the Naive Disk Store, in the spirit of
//! the reference wrapper's own `examples/simple.rs`.

use nds::{ChecksummedCodec, InMemoryStore, MemStore, NdsConfig, NdsRuntime, Value};

fn main() {
    let dir = std::env::temp_dir().join("nds-demo");
    let config = NdsConfig::builder(&dir).num_dbs(1).build();
    let mem_stores: Vec<Box<dyn MemStore>> = vec![Box::new(InMemoryStore::new())];
    let runtime =
        NdsRuntime::open(config, Box::new(ChecksummedCodec::default()), mem_stores).unwrap();

    runtime
        .set_nds(0, b"Smith", Some(&Value(b"Albert Einstein".to_vec())))
        .unwrap();

    match runtime.get_nds(0, b"Smith").unwrap() {
        Some(value) => println!(
            "It's {} Smith",
            String::from_utf8_lossy(value.as_bytes())
        ),
        None => println!("no such Smith"),
    }
}
