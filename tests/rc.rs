use refcounted_ptr::Rc;

use std::mem::drop;
use std::sync::{Arc, Mutex};

/// Records the ids of payloads in the order they were dropped.
#[derive(Clone, Default)]
struct DropLog(Arc<Mutex<Vec<usize>>>);

impl DropLog {
    fn dropped(&self) -> Vec<usize> {
        self.0.lock().unwrap().clone()
    }
}

struct Node {
    id: usize,
    log: DropLog,
}

impl Node {
    fn new(id: usize, log: &DropLog) -> Self {
        Self {
            id,
            log: log.clone(),
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.log.0.lock().unwrap().push(self.id);
    }
}

fn id_of(rc: &Rc<Node>) -> Option<usize> {
    rc.as_ref().map(|node| node.id)
}

#[test]
fn solo_lifetime() {
    let log = DropLog::default();
    let h1 = Rc::new_with(|| Node::new(7, &log));
    assert!(!h1.as_ptr().is_null());
    assert_eq!(unsafe { (*h1.as_ptr()).id }, 7);
    assert_eq!(h1.ref_count(), 1);

    drop(h1);
    assert_eq!(log.dropped(), vec![7]);
}

#[test]
fn shared_pair() {
    let log = DropLog::default();
    let h1 = Rc::new(Node::new(11, &log));
    let h2 = h1.clone();
    assert_eq!(h1.as_ptr(), h2.as_ptr());
    assert_eq!(h2.ref_count(), 2);

    drop(h1);
    assert_eq!(id_of(&h2), Some(11));
    assert_eq!(h2.ref_count(), 1);
    assert!(log.dropped().is_empty());

    drop(h2);
    assert_eq!(log.dropped(), vec![11]);
}

#[test]
fn assignment_rebind() {
    let log = DropLog::default();
    let mut h1 = Rc::new(Node::new(1, &log));
    let h2 = Rc::new(Node::new(2, &log));

    h1.assign(&h2);
    assert_eq!(log.dropped(), vec![1]);
    assert_eq!(id_of(&h1), Some(2));
    assert_eq!(h2.ref_count(), 2);

    drop(h1);
    drop(h2);
    assert_eq!(log.dropped(), vec![1, 2]);
}

#[test]
fn self_assignment() {
    let log = DropLog::default();
    let mut h1 = Rc::new(Node::new(5, &log));
    let alias = h1.clone();

    h1.assign(&alias);
    assert_eq!(id_of(&h1), Some(5));
    assert_eq!(h1.ref_count(), 2);

    drop(alias);
    assert_eq!(h1.ref_count(), 1);
    h1.clone_from(&h1.clone());
    assert_eq!(h1.ref_count(), 1);
    assert!(log.dropped().is_empty());

    drop(h1);
    assert_eq!(log.dropped(), vec![5]);
}

#[test]
fn assign_then_reassign_same() {
    let log = DropLog::default();
    let mut a = Rc::new(Node::new(1, &log));
    let b = Rc::new(Node::new(2, &log));

    a.assign(&b);
    a.assign(&a.clone());
    assert!(a.ptr_eq(&b));
    assert_eq!(b.ref_count(), 2);
    assert_eq!(log.dropped(), vec![1]);
}

#[test]
fn empty_handle() {
    let h1 = Rc::<Node>::default();
    assert!(h1.is_null());
    assert!(h1.as_ptr().is_null());
    assert!(h1.as_ref().is_none());
    assert_eq!(h1.ref_count(), 0);
    drop(h1);

    let mut h2 = Rc::<Node>::null();
    h2.assign(&Rc::null());
    assert!(h2.is_null());
}

#[test]
fn empty_handle_binds_by_assignment() {
    let log = DropLog::default();
    let source = Rc::new(Node::new(3, &log));
    let mut h = Rc::null();

    h.assign(&source);
    assert_eq!(id_of(&h), Some(3));
    assert_eq!(source.ref_count(), 2);

    drop(source);
    assert_eq!(h.ref_count(), 1);
    assert!(log.dropped().is_empty());
}

#[test]
fn raw_pointer_round() {
    let log = DropLog::default();
    let raw = Box::into_raw(Box::new(Node::new(9, &log)));
    let h = unsafe { Rc::from_raw(raw) };
    assert_eq!(h.as_ptr(), raw as *const Node);
    assert_eq!(h.ref_count(), 1);

    drop(h);
    assert_eq!(log.dropped(), vec![9]);
}

#[test]
fn from_box() {
    let log = DropLog::default();
    let h: Rc<Node> = Box::new(Node::new(4, &log)).into();
    let copies = (0..3).map(|_| h.clone()).collect::<Vec<_>>();
    assert_eq!(h.ref_count(), 4);

    drop(h);
    drop(copies);
    assert_eq!(log.dropped(), vec![4]);
}

#[test]
fn copy_then_drop_restores_count() {
    let h = Rc::new(0u64);
    for expected in 1..=8 {
        let copy = h.clone();
        assert_eq!(h.ref_count(), 2);
        drop(copy);
        assert_eq!(h.ref_count(), 1, "round {}", expected);
    }
}

#[test]
fn count_matches_live_handles() {
    let log = DropLog::default();
    let root = Rc::new(Node::new(0, &log));
    let mut handles = Vec::new();

    for i in 0..32 {
        if i % 3 == 2 {
            handles.swap_remove(i % handles.len());
        } else {
            handles.push(root.clone());
        }
        assert_eq!(root.ref_count(), handles.len() + 1);
    }

    drop(handles);
    assert_eq!(root.ref_count(), 1);
    assert!(log.dropped().is_empty());
}

#[test]
fn nested_assign_chain() {
    let log = DropLog::default();
    let mut chain = (0..6)
        .map(|id| Rc::new(Node::new(id, &log)))
        .collect::<Vec<_>>();

    // chain[i] <- chain[i + 1], front to back.
    for i in 0..chain.len() - 1 {
        let (front, back) = chain.split_at_mut(i + 1);
        front[i].assign(&back[0]);
    }
    assert_eq!(log.dropped(), vec![0]);

    let ids = chain.iter().map(id_of).collect::<Vec<_>>();
    assert_eq!(ids, vec![Some(1), Some(2), Some(3), Some(4), Some(5), Some(5)]);
    let counts = chain.iter().map(Rc::ref_count).collect::<Vec<_>>();
    assert_eq!(counts, vec![1, 1, 1, 1, 2, 2]);

    drop(chain);
    let mut dropped = log.dropped();
    dropped.sort_unstable();
    assert_eq!(dropped, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn nested_assign_fan_in() {
    let log = DropLog::default();
    let a = Rc::new(Node::new(1, &log));
    let b = Rc::new(Node::new(2, &log));
    let mut handles = (0..10).map(|_| Rc::null()).collect::<Vec<_>>();

    for (i, h) in handles.iter_mut().enumerate() {
        h.assign(if i < 7 { &a } else { &b });
    }
    assert_eq!(a.ref_count(), 8);
    assert_eq!(b.ref_count(), 4);

    for h in handles.iter_mut().take(3) {
        h.assign(&b);
    }
    assert_eq!(a.ref_count(), 5);
    assert_eq!(b.ref_count(), 7);
    assert!(log.dropped().is_empty());
}

#[test]
fn failed_construction() {
    let log = DropLog::default();
    let res = Rc::<Node>::try_new_with(|| Err::<Node, _>("no node"));
    assert_eq!(res.err(), Some("no node"));

    let res = Rc::try_new_with(|| Ok::<_, ()>(Node::new(8, &log)));
    let h = res.ok().unwrap();
    assert_eq!(id_of(&h), Some(8));
    drop(h);
    assert_eq!(log.dropped(), vec![8]);
}

#[test]
fn panicking_construction() {
    let res = std::panic::catch_unwind(|| Rc::<String>::new_with(|| panic!("boom")));
    assert!(res.is_err());
}
