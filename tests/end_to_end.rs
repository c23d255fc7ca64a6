//! Whole-surface walkthrough via the `axon` facade: one repository's life
//! from creation through branching, iteration, and shutdown.

use axon::{
    CancelToken, ChunkOp, DataConfig, DatastoreConfig, ErrorKind, KeyValueGetter,
    KeyValueSetter, Op, Service, TKey,
};

const KV_CLASS: u8 = 0x20;

fn tk(body: &[u8]) -> TKey {
    TKey::new(KV_CLASS, body)
}

#[test]
fn test_versioned_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let service = Service::open(&DatastoreConfig::new(dir.path())).unwrap();

    // Create, populate, lock, branch
    let (v1, _) = service.new_repo("lifecycle", "end to end").unwrap();
    service
        .new_data(v1, "keyvalue", "annotations", DataConfig::new())
        .unwrap();
    let kv = service.key_value_db().unwrap();
    let ctx1 = service.data_context(v1, "annotations").unwrap();
    kv.put(&ctx1, &tk(b"foo"), &[0x01]).unwrap();

    service.lock(v1).unwrap();
    let v2 = service.new_version(v1).unwrap();
    let ctx2 = service.data_context(v2, "annotations").unwrap();

    // Inherited, overwritten, then tombstoned
    assert_eq!(kv.get(&ctx2, &tk(b"foo")).unwrap(), Some(vec![0x01]));
    kv.put(&ctx2, &tk(b"foo"), &[0x02]).unwrap();
    assert_eq!(kv.get(&ctx2, &tk(b"foo")).unwrap(), Some(vec![0x02]));
    assert_eq!(kv.get(&ctx1, &tk(b"foo")).unwrap(), Some(vec![0x01]));

    kv.delete(&ctx2, &tk(b"foo")).unwrap();
    assert_eq!(kv.get(&ctx2, &tk(b"foo")).unwrap(), None);
    assert_eq!(kv.get(&ctx1, &tk(b"foo")).unwrap(), Some(vec![0x01]));

    // Resolution by prefix of the root UUID
    let v1_hex = v1.hex();
    let (resolved, _, _) = service.resolve_uuid(&v1_hex).unwrap();
    assert_eq!(resolved, v1);

    service.shutdown();
}

#[test]
fn test_chunked_iteration_through_facade() {
    let dir = tempfile::tempdir().unwrap();
    let service = Service::open(&DatastoreConfig::new(dir.path())).unwrap();

    let (root, _) = service.new_repo("iteration", "").unwrap();
    service
        .new_data(root, "keyvalue", "blocks", DataConfig::new())
        .unwrap();
    let kv = service.key_value_db().unwrap();
    let ordered = service.ordered_key_value_db().unwrap();
    let ctx = service.data_context(root, "blocks").unwrap();

    let n = 2000usize;
    for i in 0..n {
        let body = format!("{i:06}");
        kv.put(&ctx, &tk(body.as_bytes()), &[1]).unwrap();
    }

    // Full sweep arrives in order, exactly once each, workers bounded by
    // the service's handler pool
    let pool = service.handler_pool().clone();
    let mut seen = Vec::with_capacity(n);
    let mut handler = |chunk: axon::Chunk| {
        let _token = pool.acquire();
        seen.push(chunk.tkey.body(KV_CLASS).unwrap().to_vec());
        Ok(())
    };
    ordered
        .process_range(
            &ctx,
            &TKey::min_of_class(KV_CLASS),
            &TKey::max_of_class(KV_CLASS),
            &ChunkOp::new(Op::Get),
            &mut handler,
        )
        .unwrap();
    assert_eq!(seen.len(), n);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));

    // Cancellation midway stops further invocations
    let cancel = CancelToken::new();
    let op = ChunkOp::with_cancel(Op::Get, cancel.clone());
    let mut count = 0usize;
    let mut cancelling = |_chunk: axon::Chunk| {
        count += 1;
        if count == 500 {
            cancel.cancel();
        }
        Ok(())
    };
    let err = ordered
        .process_range(
            &ctx,
            &TKey::min_of_class(KV_CLASS),
            &TKey::max_of_class(KV_CLASS),
            &op,
            &mut cancelling,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(count, 500);

    service.shutdown();
}

#[test]
fn test_range_shrinks_after_delete() {
    let dir = tempfile::tempdir().unwrap();
    let service = Service::open(&DatastoreConfig::new(dir.path())).unwrap();
    let (root, _) = service.new_repo("shrink", "").unwrap();
    service
        .new_data(root, "keyvalue", "d1", DataConfig::new())
        .unwrap();
    let kv = service.key_value_db().unwrap();
    let ordered = service.ordered_key_value_db().unwrap();
    let ctx = service.data_context(root, "d1").unwrap();

    for body in [b"t1" as &[u8], b"t2", b"t3", b"t4", b"t5"] {
        kv.put(&ctx, &tk(body), body).unwrap();
    }
    let all = ordered
        .get_range(
            &ctx,
            &TKey::min_of_class(KV_CLASS),
            &TKey::max_of_class(KV_CLASS),
        )
        .unwrap();
    assert_eq!(all.len(), 5);

    kv.delete(&ctx, &tk(b"t3")).unwrap();
    let remaining = ordered
        .get_range(
            &ctx,
            &TKey::min_of_class(KV_CLASS),
            &TKey::max_of_class(KV_CLASS),
        )
        .unwrap();
    assert_eq!(remaining.len(), 4);
    assert!(remaining.iter().all(|kv| kv.tkey != tk(b"t3")));

    service.shutdown();
}
