use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use repose_state::{OwnerId, Store};

use crate::*;

#[derive(Clone, Default, Debug, PartialEq)]
struct Counter {
    count: i32,
}

struct Increment;
struct Reset;
struct Ping(u32);

fn bump(store: &Store<Counter>) -> Result<repose_state::Updated<()>, repose_state::StateError> {
    store.update(|s| s.field("count", |c| &mut c.count).modify(|n| *n += 1))
}

fn services(store: &Store<Counter>) -> Arc<Services> {
    let services = Services::new();
    services.insert_store(store.clone());
    Arc::new(services)
}

fn dispatcher(table: HandlerTable, store: &Store<Counter>) -> ActionDispatcher {
    let registry = HandlerRegistry::build(table, services(store)).expect("registry");
    ActionDispatcher::new(Arc::new(registry), ActionBus::new())
}

fn statuses(bus: &ActionBus) -> Arc<Mutex<Vec<ActionDispatchStatus>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    bus.subscribe_any(OwnerId::next(), None, StatusSet::all(), move |e| {
        s.lock().push(e.status)
    });
    seen
}

#[test]
fn test_zero_handlers_still_report_full_lifecycle() {
    let store = Store::new(Counter::default());
    let d = dispatcher(HandlerTable::new(), &store);
    let seen = statuses(d.bus());

    d.dispatch(Increment);

    assert_eq!(
        *seen.lock(),
        vec![
            ActionDispatchStatus::Pending,
            ActionDispatchStatus::Succeeded,
            ActionDispatchStatus::RanToCompletion
        ]
    );
    assert_eq!(store.value().count, 0);
}

#[test]
fn test_handlers_mutate_the_registered_store() {
    let store = Store::new(Counter::default());
    let table = HandlerTable::new().on::<Increment, _>("Counter", "increment", |_: &Increment, s: Store<Counter>| {
        bump(&s)
    });
    let d = dispatcher(table, &store);

    for _ in 0..3 {
        d.dispatch(Increment);
    }

    assert_eq!(store.value().count, 3);
    assert_eq!(store.version(), 3);
}

#[test]
fn test_pre_canceled_dispatch_runs_no_handler() {
    let store = Store::new(Counter::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let table = HandlerTable::new().on::<Increment, _>("Counter", "increment", move |_: &Increment| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    let d = dispatcher(table, &store);
    let seen = statuses(d.bus());

    let token = CancelToken::new();
    token.cancel();
    d.dispatch_with(Increment, token);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        *seen.lock(),
        vec![
            ActionDispatchStatus::Pending,
            ActionDispatchStatus::Canceled,
            ActionDispatchStatus::RanToCompletion
        ]
    );
}

#[test]
fn test_cancel_inside_a_handler_skips_the_rest() {
    let store = Store::new(Counter::default());
    let table = HandlerTable::new()
        .on::<Increment, _>("Counter", "first", |_: &Increment, s: Store<Counter>, token: CancelToken| {
            bump(&s)?;
            token.cancel();
            anyhow::Ok(())
        })
        .on::<Increment, _>("Counter", "second", |_: &Increment, s: Store<Counter>| bump(&s));
    let d = dispatcher(table, &store);

    let outcome = pollster::block_on(d.dispatch_async(Increment, CancelToken::new()));

    assert!(outcome.is_canceled());
    assert_eq!(store.value().count, 1);
}

#[test]
fn test_handlers_run_in_registration_order() {
    let store = Store::new(Counter::default());
    let order = Arc::new(Mutex::new(Vec::new()));
    let (a, b, c) = (order.clone(), order.clone(), order.clone());
    let table = HandlerTable::new()
        .on::<Increment, _>("A", "one", move |_: &Increment| a.lock().push(1))
        .on::<Reset, _>("A", "reset", |_: &Reset| {})
        .on::<Increment, _>("B", "two", move |_: &Increment| b.lock().push(2))
        .on::<Increment, _>("C", "three", move |_: &Increment| c.lock().push(3));
    let d = dispatcher(table, &store);

    d.dispatch(Increment);

    assert_eq!(*order.lock(), vec![1, 2, 3]);
    let names: Vec<String> = d.registry().resolve_for::<Increment>().iter().map(|h| h.name()).collect();
    assert_eq!(names, vec!["A::one", "B::two", "C::three"]);
}

#[test]
fn test_failing_handler_does_not_stop_later_ones() {
    let store = Store::new(Counter::default());
    let table = HandlerTable::new()
        .on::<Increment, _>("Counter", "explode", |_: &Increment| -> anyhow::Result<()> {
            Err(anyhow!("boom"))
        })
        .on::<Increment, _>("Counter", "increment", |_: &Increment, s: Store<Counter>| bump(&s));
    let d = dispatcher(table, &store);

    let completed = Arc::new(Mutex::new(None));
    let c = completed.clone();
    d.bus().on_completed::<Increment>(OwnerId::next(), move |_, fault| {
        *c.lock() = fault.map(|f| f.first().to_string());
    });

    let outcome = pollster::block_on(d.dispatch_async(Increment, CancelToken::none()));

    let fault = outcome.fault().expect("faulted");
    assert_eq!(outcome.status(), ActionDispatchStatus::Faulted);
    assert_eq!(fault.len(), 1);
    assert_eq!(fault.first().handler, "Counter::explode");
    assert_eq!(fault.first().error.to_string(), "boom");
    assert_eq!(store.value().count, 1);
    assert_eq!(completed.lock().as_deref(), Some("Counter::explode: boom"));
}

#[test]
fn test_all_faults_are_kept_in_order() {
    let store = Store::new(Counter::default());
    let table = HandlerTable::new()
        .on::<Increment, _>("A", "one", |_: &Increment| -> anyhow::Result<()> { Err(anyhow!("first")) })
        .on::<Increment, _>("B", "two", |_: &Increment| -> anyhow::Result<()> { Err(anyhow!("second")) });
    let d = dispatcher(table, &store);

    let outcome = pollster::block_on(d.dispatch_async(Increment, CancelToken::none()));

    let fault = outcome.fault().expect("faulted");
    let messages: Vec<String> = fault.faults().iter().map(|f| f.error.to_string()).collect();
    assert_eq!(messages, vec!["first", "second"]);
    assert!(fault.to_string().contains("A::one: first"));
}

#[test]
fn test_panicking_handler_is_reported_as_fault() {
    let store = Store::new(Counter::default());
    let table = HandlerTable::new()
        .on::<Increment, _>("Counter", "panics", |_: &Increment| -> anyhow::Result<()> {
            panic!("handler exploded")
        })
        .on::<Increment, _>("Counter", "increment", |_: &Increment, s: Store<Counter>| bump(&s));
    let d = dispatcher(table, &store);

    let outcome = pollster::block_on(d.dispatch_async(Increment, CancelToken::none()));

    let fault = outcome.fault().expect("faulted");
    assert!(fault.first().error.to_string().contains("handler exploded"));
    assert_eq!(store.value().count, 1);
}

#[test]
fn test_missing_store_fails_registry_build() {
    let table = HandlerTable::new().on::<Increment, _>("Counter", "increment", |_: &Increment, s: Store<Counter>| {
        bump(&s)
    });

    let err = HandlerRegistry::build(table, Arc::new(Services::new())).unwrap_err();

    match err {
        RegistryError::Unresolved { handler, kind, .. } => {
            assert_eq!(handler, "Counter::increment");
            assert_eq!(kind, ParamKind::Store);
        }
    }
}

#[test]
fn test_missing_dependency_fails_registry_build() {
    struct Clock;
    let table = HandlerTable::new().on::<Increment, _>("Counter", "tick", |_: &Increment, _c: Dep<Clock>| {});

    assert!(HandlerRegistry::build(table, Arc::new(Services::new())).is_err());
}

#[test]
fn test_unknown_action_type_resolves_to_nothing() {
    let store = Store::new(Counter::default());
    let d = dispatcher(HandlerTable::new(), &store);

    assert!(d.registry().resolve_for::<Ping>().is_empty());
}

#[test]
fn test_descriptors_are_built_once_per_type() {
    let store = Store::new(Counter::default());
    let table = HandlerTable::new().on::<Increment, _>("Counter", "increment", |_: &Increment, s: Store<Counter>| {
        bump(&s)
    });
    let d = dispatcher(table, &store);

    let first = d.registry().resolve_for::<Increment>();
    let second = d.registry().resolve_for::<Increment>();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first[0].params()[0].kind, ParamKind::Store);
    assert_eq!(first[0].mode(), HandlerMode::Sync);
}

#[test]
fn test_dependencies_resolve_per_call() {
    struct RequestId(usize);
    let made = Arc::new(AtomicUsize::new(0));
    let m = made.clone();
    let services = Services::new();
    services.factory(move || RequestId(m.fetch_add(1, Ordering::SeqCst)));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let table = HandlerTable::new().on::<Ping, _>("Log", "ping", move |p: &Ping, id: Dep<RequestId>| {
        s.lock().push((p.0, id.0.0))
    });
    let registry = HandlerRegistry::build(table, Arc::new(services)).expect("registry");
    let d = ActionDispatcher::new(Arc::new(registry), ActionBus::new());

    d.dispatch(Ping(7));
    d.dispatch(Ping(8));

    assert_eq!(*seen.lock(), vec![(7, 0), (8, 1)]);
}

#[test]
fn test_handlers_can_dispatch_follow_ups() {
    let store = Store::new(Counter::default());
    let table = HandlerTable::new()
        .on::<Ping, _>("Counter", "ping", |_: &Ping, d: ActionDispatcher| d.dispatch(Increment))
        .on::<Increment, _>("Counter", "increment", |_: &Increment, s: Store<Counter>| bump(&s));
    let d = dispatcher(table, &store);

    d.dispatch(Ping(1));

    assert_eq!(store.value().count, 1);
}

#[test]
fn test_async_handlers_complete_through_dispatch_async() {
    let store = Store::new(Counter::default());
    let table = HandlerTable::new().on_async::<Increment, _, _>(
        "Counter",
        "increment_later",
        |_: Arc<Increment>, s: Store<Counter>| async move {
            futures::future::ready(()).await;
            bump(&s)
        },
    );
    let d = dispatcher(table, &store);
    let seen = statuses(d.bus());

    let outcome = pollster::block_on(d.dispatch_async(Increment, CancelToken::none()));

    assert!(outcome.is_succeeded());
    assert_eq!(store.value().count, 1);
    assert_eq!(seen.lock().len(), 3);
    assert_eq!(d.registry().resolve_for::<Increment>()[0].mode(), HandlerMode::Async);
}

#[test]
fn test_dropping_an_unfinished_dispatch_reports_cancellation() {
    struct Stall;
    let store = Store::new(Counter::default());
    let table = HandlerTable::new()
        .on_async::<Stall, _, _>("Counter", "stall", |_: Arc<Stall>| async {
            futures::future::pending::<()>().await
        })
        .on::<Stall, _>("Counter", "after", |_: &Stall, s: Store<Counter>| bump(&s));
    let d = dispatcher(table, &store);
    let seen = statuses(d.bus());

    let polled = futures::FutureExt::now_or_never(d.dispatch_async(Stall, CancelToken::none()));

    assert!(polled.is_none());
    assert_eq!(
        *seen.lock(),
        vec![
            ActionDispatchStatus::Pending,
            ActionDispatchStatus::Canceled,
            ActionDispatchStatus::RanToCompletion
        ]
    );
    assert_eq!(store.value().count, 0);
}

#[test]
fn test_sync_dispatch_hands_suspended_handlers_to_workers() {
    let store = Store::new(Counter::default());
    let table = HandlerTable::new()
        .on::<Increment, _>("Counter", "now", |_: &Increment, s: Store<Counter>| bump(&s))
        .on_async::<Increment, _, _>("Counter", "later", |_: Arc<Increment>, s: Store<Counter>| async move {
            bump(&s)
        });
    let d = dispatcher(table, &store);
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    d.bus().on_completed::<Increment>(OwnerId::next(), move |_, fault| {
        let _ = tx.lock().send(fault.is_none());
    });

    d.dispatch(Increment);

    let ok = rx.recv_timeout(Duration::from_secs(5)).expect("completion");
    assert!(ok);
    assert_eq!(store.value().count, 2);
}

#[test]
fn test_subscriptions_filter_by_type_and_status() {
    let store = Store::new(Counter::default());
    let d = dispatcher(HandlerTable::new(), &store);
    let owner = OwnerId::next();
    let hits = Arc::new(Mutex::new(Vec::new()));
    let (h1, h2) = (hits.clone(), hits.clone());
    d.bus().on_succeeded::<Ping>(owner, move |p| h1.lock().push(p.0));
    d.bus().subscribe::<Increment, _>(owner, StatusSet::PENDING, move |_, _| h2.lock().push(0));

    d.dispatch(Ping(4));
    d.dispatch(Increment);
    d.dispatch(Reset);

    assert_eq!(*hits.lock(), vec![4, 0]);
}

#[test]
fn test_unsubscribe_removes_every_owner_subscription() {
    let store = Store::new(Counter::default());
    let d = dispatcher(HandlerTable::new(), &store);
    let owner = OwnerId::next();
    let other = OwnerId::next();
    let hits = Arc::new(AtomicUsize::new(0));
    for o in [owner, owner, other] {
        let h = hits.clone();
        d.bus().on_succeeded::<Increment>(o, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert_eq!(d.bus().unsubscribe(owner), 2);
    d.dispatch(Increment);

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(d.bus().subscription_count(owner), 0);
}

#[test]
fn test_disposing_one_subscription_keeps_the_rest() {
    let bus = ActionBus::new();
    let owner = OwnerId::next();
    let first = bus.on_succeeded::<Increment>(owner, |_| {});
    let _second = bus.on_succeeded::<Increment>(owner, |_| {});

    first.run();
    first.run();

    assert_eq!(bus.subscription_count(owner), 1);
}

#[test]
fn test_panicking_subscriber_does_not_block_others() {
    let store = Store::new(Counter::default());
    let d = dispatcher(HandlerTable::new(), &store);
    let owner = OwnerId::next();
    let hits = Arc::new(AtomicUsize::new(0));
    d.bus().on_succeeded::<Increment>(owner, |_| panic!("subscriber"));
    let h = hits.clone();
    d.bus().on_succeeded::<Increment>(owner, move |_| {
        h.fetch_add(1, Ordering::SeqCst);
    });

    d.dispatch(Increment);

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unsubscribing_during_delivery_applies_to_the_next_dispatch() {
    let store = Store::new(Counter::default());
    let d = dispatcher(HandlerTable::new(), &store);
    let owner = OwnerId::next();
    let hits = Arc::new(AtomicUsize::new(0));
    let bus = d.bus().clone();
    d.bus().on_succeeded::<Increment>(owner, move |_| {
        bus.unsubscribe(owner);
    });
    let h = hits.clone();
    d.bus().on_succeeded::<Increment>(owner, move |_| {
        h.fetch_add(1, Ordering::SeqCst);
    });

    d.dispatch(Increment);
    d.dispatch(Increment);

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_child_tokens_follow_their_parent() {
    let parent = CancelToken::new();
    let child = parent.child();
    assert!(!child.is_canceled());

    parent.cancel();
    assert!(child.is_canceled());

    let none = CancelToken::none();
    none.cancel();
    assert!(!none.is_canceled());
    assert!(!none.can_be_canceled());
}

#[test]
fn test_services_hand_out_instances_and_factories() {
    let services = Services::new();
    services.insert(41u32).factory(|| String::from("fresh"));

    assert_eq!(services.get::<u32>().map(|v| *v), Some(41));
    let a = services.get::<String>().expect("factory");
    let b = services.get::<String>().expect("factory");
    assert!(!Arc::ptr_eq(&a, &b));
    assert!(services.get::<i64>().is_none());
    assert_eq!(services.len(), 2);
}
