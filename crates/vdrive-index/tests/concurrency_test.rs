use std::sync::Arc;
use std::thread;

use tempfile::TempDir;
use vdrive_cas::CasStore;
use vdrive_index::{IndexAddress, LmdbIndex, MetadataIndex};

#[test]
fn concurrent_puts_on_distinct_keys_all_land() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;

    let temp = TempDir::new().unwrap();
    let content = Arc::new(CasStore::new(temp.path().join("cas")).unwrap());
    let index = Arc::new(
        LmdbIndex::open(
            temp.path().join("index"),
            IndexAddress::determine("shared").unwrap(),
            true,
            content.clone(),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    index
                        .put(&format!("t{t}/k{i}"), format!("{t}:{i}").into_bytes())
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let all = index.all().unwrap();
    assert_eq!(all.len(), THREADS * PER_THREAD);
    assert_eq!(index.log_len().unwrap(), (THREADS * PER_THREAD) as u64);

    // Snapshot + empty replay reproduces the same view after reopen.
    index.save_snapshot().unwrap();
    index.close().unwrap();
    drop(index);

    let reopened = LmdbIndex::open(
        temp.path().join("index"),
        IndexAddress::determine("shared").unwrap(),
        false,
        content,
    )
    .unwrap();
    reopened.load_snapshot().unwrap();
    assert_eq!(reopened.replay(None).unwrap(), 0);
    assert_eq!(reopened.all().unwrap(), all);
}
