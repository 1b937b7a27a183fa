#![forbid(unsafe_code)]

//! End-to-end scenarios through the public facade.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tangle::prelude::*;
use tangle::{Subscription, Value};

fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl FnMut(&T, &T) + 'static) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let l = Rc::clone(&log);
    (log, move |new: &T, _: &T| l.borrow_mut().push(new.clone()))
}

fn notifications(cell: &Observable<Vec<String>>) -> (Rc<Cell<u32>>, Subscription) {
    let hits = Rc::new(Cell::new(0));
    let h = Rc::clone(&hits);
    (hits, cell.subscribe(move |_| h.set(h.get() + 1)))
}

fn required(value: &String, v: &mut Validation) -> Result<(), ValidationAbort> {
    if value.is_empty() {
        v.error("required");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Watchers
// ---------------------------------------------------------------------------

#[test]
fn paused_writes_fire_each_registration_once_with_latest_value() {
    let source = Observable::new(0);
    let watchers = use_watchers(&source, WatchersOptions::default());
    let logs: Vec<_> = (0..4)
        .map(|_| {
            let (log, cb) = recorder::<i32>();
            let stop = watchers.on_updated(cb, WatchOptions::default());
            (log, stop)
        })
        .collect();

    watchers.pause();
    for v in 1..=10 {
        source.set(v);
    }
    scheduler::flush();
    assert!(logs.iter().all(|(log, _)| log.borrow().is_empty()));

    watchers.resume();
    scheduler::flush();
    for (log, _) in &logs {
        assert_eq!(*log.borrow(), vec![10]);
    }

    watchers.pause();
    watchers.resume();
    scheduler::flush();
    for (log, _) in &logs {
        assert_eq!(log.borrow().len(), 1, "resume without a write fired");
    }
}

#[test]
fn registration_made_while_paused_starts_paused() {
    let source = Observable::new(0);
    let watchers = use_watchers(&source, WatchersOptions::default());
    watchers.pause();
    let (log, cb) = recorder::<i32>();
    let _stop = watchers.on_updated(cb, WatchOptions::default().immediate());
    source.set(1);
    scheduler::flush();
    assert!(log.borrow().is_empty());

    watchers.resume();
    scheduler::flush();
    assert_eq!(*log.borrow(), vec![1]);
}

#[test]
fn ignored_writes_never_fire() {
    let source = Observable::new(0);
    let watchers = use_watchers(&source, WatchersOptions::default());
    let (log, cb) = recorder::<i32>();
    let _stop = watchers.on_updated(cb, WatchOptions::default());

    watchers.ignore(|| source.set(5));
    scheduler::flush();
    scheduler::flush();
    assert!(log.borrow().is_empty());

    source.set(6);
    scheduler::flush();
    assert_eq!(*log.borrow(), vec![6]);
}

#[test]
fn double_pause_needs_two_resumes() {
    let source = Observable::new(0);
    let watchers = use_watchers(&source, WatchersOptions::default());
    let (log, cb) = recorder::<i32>();
    let _stop = watchers.on_updated(cb, WatchOptions::default());

    watchers.pause();
    watchers.pause();
    watchers.resume();
    assert!(watchers.is_paused());
    source.set(1);
    scheduler::flush();
    assert!(log.borrow().is_empty());

    watchers.resume();
    assert!(!watchers.is_paused());
    scheduler::flush();
    assert_eq!(*log.borrow(), vec![1]);
}

#[test]
fn sync_and_batched_registrations_share_one_source() {
    let source = Observable::new(0);
    let watchers = use_watchers(&source, WatchersOptions::default());
    let (sync_log, sync_cb) = recorder::<i32>();
    let (batched_log, batched_cb) = recorder::<i32>();
    let _a = watchers.on_updated(sync_cb, WatchOptions::default().sync());
    let _b = watchers.on_updated(batched_cb, WatchOptions::default());

    source.set(1);
    assert_eq!(*sync_log.borrow(), vec![1]);
    assert!(batched_log.borrow().is_empty());
    source.set(2);
    scheduler::flush();
    assert_eq!(*sync_log.borrow(), vec![1, 2]);
    assert_eq!(*batched_log.borrow(), vec![2]);
}

#[test]
fn controlled_watcher_follows_the_same_pause_rules() {
    let source = Observable::new(String::new());
    let (log, cb) = recorder::<String>();
    let watcher = watch_controlled(&source, cb, WatchOptions::default());

    watcher.pause();
    source.set("first".into());
    source.set("latest".into());
    scheduler::flush();
    assert!(log.borrow().is_empty());
    watcher.resume();
    scheduler::flush();
    scheduler::flush();
    assert_eq!(*log.borrow(), vec!["latest".to_string()]);

    watcher.ignore(|| source.set("quiet".into()));
    scheduler::flush();
    assert_eq!(log.borrow().len(), 1);

    source.set("heard".into());
    scheduler::flush();
    assert_eq!(*log.borrow(), vec!["latest".to_string(), "heard".to_string()]);
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[test]
fn memoized_validation_runs_once_until_forced() {
    let model = use_model(String::new(), required);
    assert!(!model.validate());
    assert!(!model.validate());
    assert_eq!(model.validator_runs(), 1);

    assert!(!model.force_validate());
    assert_eq!(model.validator_runs(), 2);

    model.set("x".into());
    assert!(model.validate());
    assert_eq!(model.validator_runs(), 3);
    assert!(model.errors().is_empty());
}

#[test]
fn reset_restores_an_isolated_snapshot() {
    let model = Model::new(vec![1, 2]);
    model.set(vec![9]);
    model.reset();
    assert_eq!(model.value(), vec![1, 2]);

    model.update(|v| v.push(3));
    assert_eq!(model.value(), vec![1, 2, 3]);
    model.reset();
    assert_eq!(model.value(), vec![1, 2]);
}

#[test]
fn model_props_read_through_cells() {
    let model = use_model(String::new(), required);
    let mut props = model.props().expect("props");
    assert!(props.is_frozen());
    model.validate();
    assert_eq!(props.get::<Vec<String>>("errors").expect("errors"), vec!["required"]);
    assert!(props.get::<bool>("has_errors").expect("has_errors"));
    assert!(props.set("is_valid", true).is_err());
}

// ---------------------------------------------------------------------------
// ModelGroup
// ---------------------------------------------------------------------------

#[test]
fn group_validator_reports_on_named_field() {
    let a = Model::new(String::new());
    let b = Model::new(String::new());
    let group = ModelGroup::builder()
        .model("a", &a)
        .model("b", &b)
        .validator(|payload: &Value, error| {
            if payload["a"].as_str().is_none_or(str::is_empty) {
                error.error("a", "required");
            }
            Ok(())
        })
        .build()
        .expect("group");

    let (a_hits, _a_sub) = notifications(a.errors_cell());
    let (b_hits, _b_sub) = notifications(b.errors_cell());

    assert!(!group.validate());
    assert_eq!(a.errors(), vec!["required"]);
    assert!(b.errors().is_empty());
    assert_eq!(a_hits.get(), 1);
    assert_eq!(b_hits.get(), 1);
}

#[test]
fn nested_group_notifies_each_leaf_once() {
    let x = Model::new(0);
    let z = use_model(String::new(), required);
    let y = ModelGroup::builder().model("z", &z).build().expect("inner");
    let group = ModelGroup::builder()
        .model("x", &x)
        .group("y", &y)
        .build()
        .expect("outer");

    let (x_hits, _x_sub) = notifications(x.errors_cell());
    let (z_hits, _z_sub) = notifications(z.errors_cell());

    assert!(!group.validate());
    assert_eq!(x_hits.get(), 1);
    assert_eq!(z_hits.get(), 1);

    let mut seen = Vec::new();
    group.for_each_error(|path, errors| seen.push((path.to_string(), errors.to_vec())));
    assert_eq!(seen, vec![("y.z".to_string(), vec!["required".to_string()])]);

    assert_eq!(
        group.payload().expect("payload"),
        serde_json::json!({ "x": 0, "y": { "z": "" } })
    );
}

#[test]
fn scope_disposes_models_and_watchers_together() {
    let source = Observable::new(0);
    let watchers = use_watchers(&source, WatchersOptions::default());
    let (log, cb) = recorder::<i32>();
    {
        let scope = Scope::new();
        scope.adopt(watchers.on_updated(cb, WatchOptions::default()));
        scope.adopt(Model::new(String::new()));
    }
    source.set(1);
    scheduler::flush();
    assert!(log.borrow().is_empty());
    assert!(!watchers.is_active());
}
