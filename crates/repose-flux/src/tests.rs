use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::prelude::*;

#[derive(Clone, Default)]
struct Prefs {
    theme: String,
}

struct Toggle;

fn flux() -> Flux {
    Flux::builder().workers(1).build().expect("flux")
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let n = Arc::new(AtomicUsize::new(0));
    let c = n.clone();
    (n, move || {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn test_tracker_is_created_once_per_store() {
    let owner = flux().owner();
    let a = Store::new(Prefs::default());
    let b = Store::new(Prefs::default());

    owner.tracker(&a);
    owner.tracker(&a);
    owner.tracker(&b);

    assert_eq!(a.tracker_count(), 1);
    assert_eq!(b.tracker_count(), 1);
    assert_eq!(owner.tracker(&a).owner(), Some(owner.id()));
}

#[test]
fn test_dispose_runs_disposers_once() {
    let owner = flux().owner();
    let (n, bump) = counter();
    owner.add_disposer(bump);

    owner.dispose();
    owner.dispose();

    assert_eq!(n.load(Ordering::SeqCst), 1);
    assert!(owner.is_disposed());
}

#[test]
fn test_disposer_added_after_dispose_runs_immediately() {
    let owner = flux().owner();
    owner.dispose();
    let (n, bump) = counter();

    owner.add_disposer(bump);

    assert_eq!(n.load(Ordering::SeqCst), 1);
}

#[test]
fn test_children_are_disposed_with_their_parent() {
    let f = flux();
    let parent = f.owner();
    let child = parent.child();
    let grandchild = child.child();
    let (n, bump) = counter();
    grandchild.on_succeeded::<Toggle>(move |_| bump());

    parent.dispose();
    f.dispatch(Toggle);

    assert!(child.is_disposed());
    assert!(grandchild.is_disposed());
    assert_eq!(n.load(Ordering::SeqCst), 0);
    assert!(f.bus().is_empty());
}

#[test]
fn test_dropping_the_last_handle_tears_down() {
    let f = flux();
    let store = Store::new(Prefs::default());
    {
        let owner = f.owner();
        owner.watch(
            &store,
            Selector::field("theme", |p: &Prefs| p.theme.clone()),
            |_| {},
            TrackingScope::Root,
        );
        owner.on_succeeded::<Toggle>(|_| {});
        assert_eq!(store.watch_count(), 1);
    }

    assert_eq!(store.watch_count(), 0);
    assert_eq!(store.tracker_count(), 0);
    assert!(f.bus().is_empty());
}

#[test]
fn test_disposed_owner_refuses_new_registrations() {
    let f = flux();
    let store = Store::new(Prefs::default());
    let owner = f.owner();
    owner.dispose();

    let handle = owner.watch(
        &store,
        Selector::field("theme", |p: &Prefs| p.theme.clone()),
        |_| {},
        TrackingScope::Root,
    );
    owner.on_succeeded::<Toggle>(|_| {});

    assert!(handle.is_disposed());
    assert_eq!(store.watch_count(), 0);
    assert!(f.bus().is_empty());
}

#[test]
fn test_disposed_owner_hands_out_disposed_trackers() {
    let store = Store::new(Prefs::default());
    let owner = flux().owner();
    owner.dispose();

    let tracker = owner.tracker(&store);

    assert!(tracker.is_disposed());
    assert_eq!(store.tracker_count(), 0);
}

#[test]
fn test_watches_racing_dispose_leave_nothing_behind() {
    for _ in 0..50 {
        let f = flux();
        let store = Store::new(Prefs::default());
        let owner = f.owner();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let owner = owner.clone();
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        owner.watch(
                            &store,
                            Selector::field("theme", |p: &Prefs| p.theme.clone()),
                            |_| {},
                            TrackingScope::Root,
                        );
                        owner.on_succeeded::<Toggle>(|_| {});
                    }
                })
            })
            .collect();
        owner.dispose();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(store.watch_count(), 0);
        assert_eq!(store.tracker_count(), 0);
        assert!(f.bus().is_empty());
    }
}
