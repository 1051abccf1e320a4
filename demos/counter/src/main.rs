use std::sync::Arc;

use repose_flux::prelude::*;

#[derive(Clone, Debug, Default, PartialEq)]
struct ViewItem {
    value: i32,
}

#[derive(Clone, Debug, Default)]
struct MyState {
    count: i32,
    list: Vec<ViewItem>,
}

struct Increment;
struct AddItem(i32);
struct BumpItem(usize);
struct LoadItems(Vec<i32>);

fn handlers() -> HandlerTable {
    HandlerTable::new()
        .on::<Increment, _>("Counter", "increment", |_: &Increment, s: Store<MyState>| {
            s.update(|p| p.field("count", |s| &mut s.count).modify(|c| *c += 1))
        })
        .on::<AddItem, _>("Counter", "add_item", |a: &AddItem, s: Store<MyState>| {
            s.update(|p| p.field("list", |s| &mut s.list).push(ViewItem { value: a.0 }))
        })
        .on::<BumpItem, _>("Counter", "bump_item", |a: &BumpItem, s: Store<MyState>| {
            s.update(|p| {
                let mut list = p.field("list", |s| &mut s.list);
                match list.at(a.0) {
                    Some(mut item) => item.field("value", |i| &mut i.value).modify(|v| *v += 1),
                    None => log::warn!("no item at {}", a.0),
                }
            })
        })
        .on_async::<LoadItems, _, _>("Counter", "load_items", |a: Arc<LoadItems>, s: Store<MyState>| async move {
            s.update(|p| {
                let mut list = p.field("list", |s| &mut s.list);
                list.clear();
                for v in &a.0 {
                    list.push(ViewItem { value: *v });
                }
            })
        })
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let store = Store::new(MyState::default());
    let services = Services::new();
    services.insert_store(store.clone());

    let flux = Flux::builder()
        .services(services)
        .handlers(handlers())
        .workers(1)
        .build()?;

    let view = flux.owner();
    view.watch(
        &store,
        Selector::field("count", |s: &MyState| s.count),
        |c| println!("count -> {c}"),
        TrackingScope::Root,
    );
    view.watch(
        &store,
        Selector::field("list", |s: &MyState| s.list.iter().map(|i| i.value).sum::<i32>()),
        |total| println!("list total -> {total}"),
        TrackingScope::Deep,
    );
    view.on_state_changed(&store, || log::info!("view needs a re-render"));
    view.on_completed::<LoadItems>(|a, fault| match fault {
        None => println!("loaded {} item(s)", a.0.len()),
        Some(f) => println!("load failed: {f}"),
    });

    for _ in 0..3 {
        view.dispatch_action(Increment);
    }
    view.dispatch_action(AddItem(10));
    view.dispatch_action(AddItem(20));
    view.dispatch_action(BumpItem(1));

    let outcome = pollster::block_on(view.dispatch_action_async(LoadItems(vec![1, 2, 3]), CancelToken::none()));
    outcome.into_result()?;

    let state = store.value();
    println!(
        "final: count={} list={:?} (v{})",
        state.count,
        state.list.iter().map(|i| i.value).collect::<Vec<_>>(),
        store.version()
    );

    view.dispose();
    Ok(())
}
