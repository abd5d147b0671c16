//! Root registry behavior: churn, out-of-order release, compaction.

use sparsegc::{GcConfig, GcContext, Root};

fn small_registry() -> GcContext {
    // A tiny first growth target forces frequent compaction rounds.
    GcContext::with_config(GcConfig {
        initial_root_capacity: 8,
        ..GcConfig::default()
    })
}

#[test]
fn roots_release_out_of_lifo_order() {
    let gc = GcContext::new();
    let a = gc.alloc(1u32).unwrap();
    let b = gc.alloc(2u32).unwrap();
    let c = gc.alloc(3u32).unwrap();
    assert_eq!(gc.live_roots(), 3);

    // Middle first: the registry tolerates holes.
    drop(b);
    assert_eq!(gc.live_roots(), 2);
    gc.collect();
    assert_eq!(*a, 1);
    assert_eq!(*c, 3);
    assert_eq!(gc.live_objects(), 2);

    drop(a);
    drop(c);
    assert_eq!(gc.live_roots(), 0);
}

#[test]
fn churn_with_long_lived_roots() {
    let gc = small_registry();

    // A few long-lived roots sit in the registry while a thousand
    // short-lived ones come and go around them, freeing their slots out of
    // order. Compaction keeps relocating the survivors; their handles must
    // keep protecting the right objects throughout.
    let pinned: Vec<Root<'_, u64>> = (0..4).map(|i| gc.alloc(1000 + i).unwrap()).collect();

    let mut batch = Vec::new();
    for round in 0..250u64 {
        for lane in 0..4u64 {
            batch.push(gc.alloc(round * 10 + lane).unwrap());
        }
        // Release out of order: evens first, then odds.
        let odds: Vec<_> = {
            let mut odds = Vec::new();
            for (i, root) in batch.drain(..).enumerate() {
                if i % 2 == 1 {
                    odds.push(root);
                }
            }
            odds
        };
        drop(odds);
        assert_eq!(gc.live_roots(), 4);
    }

    for (i, root) in pinned.iter().enumerate() {
        assert_eq!(**root, 1000 + i as u64);
    }

    gc.collect();
    assert_eq!(gc.live_objects(), 4);
    assert_eq!(gc.live_roots(), 4);
}

#[test]
fn compaction_preserves_clone_identity() {
    let gc = small_registry();
    let original = gc.alloc(77u8).unwrap();

    // Push enough registrations through to force several compactions with
    // the clone's slot moving around.
    let clone = original.clone();
    for i in 0..100u32 {
        drop(gc.alloc(i).unwrap());
    }

    drop(original);
    gc.collect();
    assert_eq!(*clone, 77);
    assert!(Root::ptr_eq(&clone, &clone.clone()));
    assert_eq!(gc.live_objects(), 1);
}

#[test]
fn many_roots_to_one_object() {
    let gc = GcContext::new();
    let first = gc.alloc(5i64).unwrap();
    let mut handles: Vec<_> = (0..50).map(|_| first.clone()).collect();
    assert_eq!(gc.live_roots(), 51);
    assert_eq!(gc.live_objects(), 1);

    let last = handles.pop().unwrap();
    drop(first);
    drop(handles);
    gc.collect();
    assert_eq!(gc.live_objects(), 1, "one handle still protects the object");
    assert_eq!(*last, 5);
}

#[test]
fn nested_scopes_release_on_every_path() {
    let gc = GcContext::new();
    let outer = gc.alloc(1u32).unwrap();
    {
        let inner = gc.alloc(2u32).unwrap();
        {
            let innermost = gc.alloc(3u32).unwrap();
            assert_eq!(gc.live_roots(), 3);
            drop(innermost);
        }
        assert_eq!(gc.live_roots(), 2);
        drop(inner);
    }
    assert_eq!(gc.live_roots(), 1);

    gc.collect();
    assert_eq!(gc.live_objects(), 1);
    assert_eq!(*outer, 1);
}
