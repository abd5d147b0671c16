//! Cycle collection and transitive marking tests.

use sparsegc::{GcContext, GcRef, Trace};
use std::cell::Cell;
use std::rc::Rc;

#[derive(Trace)]
struct Node {
    value: usize,
    next: Cell<Option<GcRef<Node>>>,
    drops: Rc<Cell<usize>>,
}

impl Node {
    fn new(value: usize, drops: &Rc<Cell<usize>>) -> Self {
        Self {
            value,
            next: Cell::new(None),
            drops: Rc::clone(drops),
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn two_node_cycle_is_reclaimed() {
    let drops = Rc::new(Cell::new(0));
    let gc = GcContext::new();

    let a = gc.alloc(Node::new(1, &drops)).unwrap();
    let b = gc.alloc(Node::new(2, &drops)).unwrap();
    a.next.set(Some(b.as_gc()));
    b.next.set(Some(a.as_gc()));

    drop(a);
    drop(b);
    gc.collect();

    assert_eq!(drops.get(), 2);
    assert_eq!(gc.allocated_bytes(), 0);
    assert_eq!(gc.live_objects(), 0);
}

#[test]
fn rooted_cycle_survives() {
    let drops = Rc::new(Cell::new(0));
    let gc = GcContext::new();

    let a = gc.alloc(Node::new(1, &drops)).unwrap();
    let b = gc.alloc(Node::new(2, &drops)).unwrap();
    a.next.set(Some(b.as_gc()));
    b.next.set(Some(a.as_gc()));

    drop(b);
    gc.collect();

    assert_eq!(drops.get(), 0);
    assert_eq!(a.next.get().unwrap().value, 2);
    assert_eq!(a.next.get().unwrap().next.get().unwrap().value, 1);

    drop(a);
    gc.collect();
    assert_eq!(drops.get(), 2);
}

#[test]
fn self_reference_is_reclaimed() {
    let drops = Rc::new(Cell::new(0));
    let gc = GcContext::new();

    let a = gc.alloc(Node::new(1, &drops)).unwrap();
    a.next.set(Some(a.as_gc()));

    drop(a);
    gc.collect();
    assert_eq!(drops.get(), 1);
}

#[test]
fn triangle_cycle_is_reclaimed() {
    let drops = Rc::new(Cell::new(0));
    let gc = GcContext::new();

    let a = gc.alloc(Node::new(1, &drops)).unwrap();
    let b = gc.alloc(Node::new(2, &drops)).unwrap();
    let c = gc.alloc(Node::new(3, &drops)).unwrap();
    a.next.set(Some(b.as_gc()));
    b.next.set(Some(c.as_gc()));
    c.next.set(Some(a.as_gc()));

    drop(a);
    drop(b);
    drop(c);
    gc.collect();
    assert_eq!(drops.get(), 3);
}

#[derive(Trace)]
struct Fan {
    children: Cell<[Option<GcRef<Fan>>; 2]>,
    drops: Rc<Cell<usize>>,
}

impl Fan {
    fn new(drops: &Rc<Cell<usize>>) -> Self {
        Self {
            children: Cell::new([None, None]),
            drops: Rc::clone(drops),
        }
    }
}

impl Drop for Fan {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn diamond_with_back_edge() {
    let drops = Rc::new(Cell::new(0));
    let gc = GcContext::new();

    // a -> {b, c}, b -> c (diamond), c -> a (back edge).
    let a = gc.alloc(Fan::new(&drops)).unwrap();
    let b = gc.alloc(Fan::new(&drops)).unwrap();
    let c = gc.alloc(Fan::new(&drops)).unwrap();
    a.children.set([Some(b.as_gc()), Some(c.as_gc())]);
    b.children.set([Some(c.as_gc()), None]);
    c.children.set([Some(a.as_gc()), None]);

    drop(b);
    drop(c);
    gc.collect();
    assert_eq!(drops.get(), 0, "everything is reachable from a");

    drop(a);
    gc.collect();
    assert_eq!(drops.get(), 3);
}

#[test]
fn shared_child_is_destroyed_once() {
    let drops = Rc::new(Cell::new(0));
    let gc = GcContext::new();

    // Two parents report the same child; marking it twice is harmless and
    // sweeping destroys it exactly once.
    let child = gc.alloc(Node::new(9, &drops)).unwrap();
    let p1 = gc.alloc(Node::new(1, &drops)).unwrap();
    let p2 = gc.alloc(Node::new(2, &drops)).unwrap();
    p1.next.set(Some(child.as_gc()));
    p2.next.set(Some(child.as_gc()));
    drop(child);

    gc.collect();
    assert_eq!(drops.get(), 0);

    drop(p1);
    drop(p2);
    gc.collect();
    assert_eq!(drops.get(), 3);
}

#[test]
fn deep_chain_marks_transitively() {
    const CHAIN_LENGTH: usize = 1000;

    let drops = Rc::new(Cell::new(0));
    let gc = GcContext::new();

    // Only the head is rooted; every other node is reachable through the
    // chain of references alone. Marking appends each link to the worklist
    // while the worklist is being walked.
    let head = gc.alloc(Node::new(0, &drops)).unwrap();
    let mut tail = head.as_gc();
    for value in 1..CHAIN_LENGTH {
        let next = gc.alloc(Node::new(value, &drops)).unwrap();
        tail.next.set(Some(next.as_gc()));
        tail = next.as_gc();
    }

    gc.collect();
    assert_eq!(drops.get(), 0);
    assert_eq!(gc.live_objects(), CHAIN_LENGTH);

    // Walk the chain to make sure nothing was scrambled.
    let mut cursor = head.as_gc();
    for expected in 0..CHAIN_LENGTH {
        assert_eq!(cursor.value, expected);
        match cursor.next.get() {
            Some(next) => cursor = next,
            None => assert_eq!(expected, CHAIN_LENGTH - 1),
        }
    }

    drop(head);
    gc.collect();
    assert_eq!(drops.get(), CHAIN_LENGTH);
    assert_eq!(gc.allocated_bytes(), 0);
}

#[test]
fn unlinking_makes_the_tail_collectable() {
    let drops = Rc::new(Cell::new(0));
    let gc = GcContext::new();

    let a = gc.alloc(Node::new(1, &drops)).unwrap();
    let b = gc.alloc(Node::new(2, &drops)).unwrap();
    let c = gc.alloc(Node::new(3, &drops)).unwrap();
    a.next.set(Some(b.as_gc()));
    b.next.set(Some(c.as_gc()));
    drop(b);
    drop(c);

    gc.collect();
    assert_eq!(drops.get(), 0);

    // Cut the chain after a: b and c become unreachable.
    a.next.set(None);
    gc.collect();
    assert_eq!(drops.get(), 2);
    assert_eq!(gc.live_objects(), 1);
}
