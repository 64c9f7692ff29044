//! End-to-end scenarios across domains, actions, reactions and history.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::channel::oneshot;
use futures::executor::{LocalPool, block_on};
use futures::task::LocalSpawnExt;
use turbox_reactivity::{
    AutoRunOptions, Disposer, Engine, EngineConfig, Field, HistoryChange, HistoryOperation,
    MaterialKind, ReactivityError, TimeTravelConfig,
};

fn counting_reaction<T: Clone + PartialEq + 'static>(
    engine: &Engine,
    field: &Field<T>,
) -> (Disposer, Rc<Cell<usize>>) {
    let runs = Rc::new(Cell::new(0));
    let disposer = engine.auto_run(
        {
            let (field, runs) = (field.clone(), Rc::clone(&runs));
            move || {
                let _ = field.get();
                runs.set(runs.get() + 1);
            }
        },
        Some(AutoRunOptions::named(format!("watch.{}", field.name()))),
    );
    (disposer, runs)
}

#[test]
fn counter_with_two_step_history() {
    let engine = Engine::default();
    let domain = engine.domain("counter").unwrap();
    let counter = domain.field("counter", 0).unwrap();
    let increment = domain
        .mutation("increment", {
            let counter = counter.clone();
            move |_: ()| counter.update(|c| *c += 1)
        })
        .unwrap();
    let history = domain.create_history(2).unwrap();

    for _ in 0..3 {
        increment.call(()).unwrap();
    }
    assert_eq!(counter.get(), 3);
    assert_eq!(history.len(), 2);

    engine.undo();
    assert_eq!(counter.get(), 2);
    assert!(engine.undoable());
    assert!(engine.redoable());

    // The first increment was evicted, so the oldest retained entry rewinds
    // to 1, not 0.
    engine.undo();
    assert_eq!(counter.get(), 1);
    assert!(!engine.undoable());
    assert!(engine.redoable());

    engine.undo();
    assert_eq!(counter.get(), 1);
}

#[test]
fn undo_on_one_instance_leaves_the_other_alone() {
    let engine = Engine::default();
    let make = |name: &str| {
        let domain = engine.domain(name).unwrap();
        let value = domain.field("value", 0).unwrap();
        let set = domain
            .mutation("set", {
                let value = value.clone();
                move |v: i32| value.set(v)
            })
            .unwrap();
        let history = domain.create_history(10).unwrap();
        (value, set, history)
    };
    let (a_value, a_set, a_history) = make("a");
    let (b_value, b_set, b_history) = make("b");

    engine.switch_time_travel(&a_history);
    a_set.call(1).unwrap();
    engine.switch_time_travel(&b_history);
    b_set.call(5).unwrap();
    b_set.call(6).unwrap();
    assert_eq!((a_history.len(), b_history.len()), (1, 2));

    engine.switch_time_travel(&a_history);
    engine.undo();
    assert_eq!(a_value.get(), 0);
    assert_eq!(b_value.get(), 6);
    assert_eq!(b_history.len(), 2);
    assert_eq!(b_history.cursor(), 2);
    assert!(a_history.is_current());
    assert!(!b_history.is_current());
}

#[test]
fn effect_with_suspension_records_one_entry_and_notifies_once() {
    let engine = Engine::default();
    let domain = engine.domain("doc").unwrap();
    let value = domain.field("value", 0).unwrap();
    let inc = domain
        .mutation("inc", {
            let value = value.clone();
            move |_: ()| value.update(|v| *v += 1)
        })
        .unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let rx = Rc::new(RefCell::new(Some(rx)));
    let load = domain
        .effect("load", {
            let inc = inc.clone();
            move |_: ()| {
                let inc = inc.clone();
                let rx = rx.borrow_mut().take();
                async move {
                    inc.call(())?;
                    inc.call(())?;
                    if let Some(rx) = rx {
                        rx.await.map_err(ReactivityError::body)?;
                    }
                    inc.call(())
                }
            }
        })
        .unwrap()
        .with_display_name("Load document");
    let history = domain.create_history(10).unwrap();
    let (_watch, runs) = counting_reaction(&engine, &value);

    let mut pool = LocalPool::new();
    pool.spawner()
        .spawn_local(async move {
            load.call(()).await.unwrap();
        })
        .unwrap();
    pool.run_until_stalled();
    assert_eq!(value.get(), 2);
    assert_eq!(runs.get(), 1);
    assert!(history.is_empty());
    assert_eq!(engine.material_kind(), MaterialKind::Default);

    tx.send(()).unwrap();
    pool.run_until_stalled();
    assert_eq!(value.get(), 3);
    assert_eq!(runs.get(), 2);
    assert_eq!(history.len(), 1);
    let entry = &history.entries()[0];
    assert_eq!(entry.action.name, "doc.load");
    assert_eq!(entry.action.display_name, "Load document");
    assert_eq!(entry.action_chain, vec!["doc.load", "doc.inc", "doc.inc", "doc.inc"]);

    engine.undo();
    assert_eq!(value.get(), 0);
    assert_eq!(runs.get(), 3);
}

#[test]
fn interleaved_effects_keep_separate_batches() {
    let engine = Engine::default();
    let domain = engine.domain("jobs").unwrap();
    let a = domain.field("a", 0).unwrap();
    let b = domain.field("b", 0).unwrap();
    let set_a = domain
        .mutation("set_a", {
            let a = a.clone();
            move |v: i32| a.set(v)
        })
        .unwrap();
    let set_b = domain
        .mutation("set_b", {
            let b = b.clone();
            move |v: i32| b.set(v)
        })
        .unwrap();
    let history = domain.create_history(10).unwrap();

    let (tx_a, rx_a) = oneshot::channel::<()>();
    let (tx_b, rx_b) = oneshot::channel::<()>();
    let job_a = async move {
        set_a.call(1)?;
        rx_a.await.map_err(ReactivityError::body)?;
        set_a.call(2)
    };
    let job_b = async move {
        set_b.call(1)?;
        rx_b.await.map_err(ReactivityError::body)?;
        set_b.call(2)
    };
    let run_a = domain
        .effect("run_a", {
            let job = Rc::new(RefCell::new(Some(Box::pin(job_a))));
            move |_: ()| {
                let job = job.borrow_mut().take();
                async move {
                    match job {
                        Some(job) => job.await,
                        None => Ok(()),
                    }
                }
            }
        })
        .unwrap();
    let run_b = domain
        .effect("run_b", {
            let job = Rc::new(RefCell::new(Some(Box::pin(job_b))));
            move |_: ()| {
                let job = job.borrow_mut().take();
                async move {
                    match job {
                        Some(job) => job.await,
                        None => Ok(()),
                    }
                }
            }
        })
        .unwrap();

    let mut pool = LocalPool::new();
    let spawner = pool.spawner();
    spawner
        .spawn_local(async move { run_a.call(()).await.unwrap() })
        .unwrap();
    spawner
        .spawn_local(async move { run_b.call(()).await.unwrap() })
        .unwrap();
    pool.run_until_stalled();
    tx_b.send(()).unwrap();
    pool.run_until_stalled();
    tx_a.send(()).unwrap();
    pool.run_until_stalled();

    let chains: Vec<Vec<String>> = history
        .entries()
        .into_iter()
        .map(|e| e.action_chain)
        .collect();
    assert_eq!(
        chains,
        vec![
            vec!["jobs.run_b".to_string(), "jobs.set_b".into(), "jobs.set_b".into()],
            vec!["jobs.run_a".to_string(), "jobs.set_a".into(), "jobs.set_a".into()],
        ]
    );
    engine.undo();
    assert_eq!((a.get(), b.get()), (0, 2));
}

#[test]
fn nested_effects_settle_with_the_outermost() {
    let engine = Engine::default();
    let domain = engine.domain("d").unwrap();
    let value = domain.field("value", 0).unwrap();
    let set = domain
        .mutation("set", {
            let value = value.clone();
            move |v: i32| value.set(v)
        })
        .unwrap();
    let inner = domain
        .effect("inner", move |v: i32| {
            let set = set.clone();
            async move { set.call(v) }
        })
        .unwrap();
    let outer = domain
        .effect("outer", move |_: ()| {
            let inner = inner.clone();
            async move {
                inner.call(1).await?;
                inner.call(2).await
            }
        })
        .unwrap();
    let history = domain.create_history(5).unwrap();
    let (_watch, runs) = counting_reaction(&engine, &value);

    block_on(outer.call(())).unwrap();
    assert_eq!(value.get(), 2);
    assert_eq!(runs.get(), 2);
    assert_eq!(history.len(), 1);
    assert_eq!(
        history.entries()[0].action_chain,
        vec!["d.outer", "d.inner", "d.set", "d.inner", "d.set"]
    );
}

#[test]
fn reaction_fires_once_per_action_and_only_when_relevant() {
    let engine = Engine::default();
    let domain = engine.domain("shape").unwrap();
    let width = domain.field("width", 1).unwrap();
    let height = domain.field("height", 1).unwrap();
    let resize = domain
        .mutation("resize", {
            let width = width.clone();
            move |w: i32| {
                width.set(w)?;
                width.set(w * 2)?;
                width.set(w * 3)
            }
        })
        .unwrap();
    let (_w, width_runs) = counting_reaction(&engine, &width);
    let (_h, height_runs) = counting_reaction(&engine, &height);

    resize.call(2).unwrap();
    assert_eq!(width.get(), 6);
    assert_eq!(width_runs.get(), 2);
    assert_eq!(height_runs.get(), 1);
}

#[test]
fn disposed_reaction_never_fires_again() {
    let engine = Engine::default();
    let domain = engine.domain("d").unwrap();
    let value = domain.field("value", 0).unwrap();
    let set = domain
        .mutation("set", {
            let value = value.clone();
            move |v: i32| value.set(v)
        })
        .unwrap();
    let (disposer, runs) = counting_reaction(&engine, &value);
    assert_eq!(disposer.name(), "watch.value");
    disposer.dispose();
    disposer.dispose();
    set.call(1).unwrap();
    set.call(2).unwrap();
    assert_eq!(runs.get(), 1);
}

#[test]
fn failing_mutation_keeps_classification_intact() {
    let engine = Engine::default();
    let domain = engine.domain("d").unwrap();
    let value = domain.field("value", 0).unwrap();
    let broken = domain
        .mutation("broken", {
            let value = value.clone();
            move |_: ()| {
                value.set(9)?;
                Err(ReactivityError::body("half done"))
            }
        })
        .unwrap();
    let history = domain.create_history(5).unwrap();

    assert!(broken.call(()).is_err());
    assert!(!engine.is_in_transaction());
    assert_eq!(engine.material_kind(), MaterialKind::Default);
    assert_eq!(history.len(), 1);
    assert!(matches!(
        value.set(1),
        Err(ReactivityError::WriteOutsideTransaction { .. })
    ));
}

#[test]
fn pause_suspends_recording_but_not_notification() {
    let engine = Engine::new(EngineConfig::default().with_time_travel(TimeTravelConfig::active(4)));
    let domain = engine.domain("d").unwrap();
    let value = domain.field("value", 0).unwrap();
    let set = domain
        .mutation("set", {
            let value = value.clone();
            move |v: i32| value.set(v)
        })
        .unwrap();
    let history = engine.create_time_travel(4).unwrap();
    engine.switch_time_travel(&history);
    let changes = Rc::new(RefCell::new(Vec::new()));
    history.set_on_change({
        let changes = Rc::clone(&changes);
        move |c: &HistoryChange| changes.borrow_mut().push(c.operation)
    });
    let (_watch, runs) = counting_reaction(&engine, &value);

    engine.pause_history();
    set.call(1).unwrap();
    assert_eq!(runs.get(), 2);
    assert!(history.is_empty());
    engine.resume_history();
    set.call(2).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(*changes.borrow(), vec![HistoryOperation::Mutation]);
}

#[test]
fn composite_action_records_one_entry_or_none_when_aborted() {
    let engine = Engine::default();
    let domain = engine.domain("doc").unwrap();
    let value = domain.field("value", 0).unwrap();
    let inc = domain
        .mutation("inc", {
            let value = value.clone();
            move |_: ()| value.update(|v| *v += 1)
        })
        .unwrap();
    let history = domain.create_history(5).unwrap();

    let paste = engine.create_action("paste");
    paste.execute(|| inc.call(())).unwrap().unwrap();
    paste.execute(|| inc.call(())).unwrap().unwrap();
    paste.complete().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history.entries()[0].action_chain, vec!["paste", "doc.inc", "doc.inc"]);

    let drag = engine.create_action("drag");
    drag.execute(|| inc.call(())).unwrap().unwrap();
    drag.abort().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(value.get(), 3);

    engine.undo();
    assert_eq!(value.get(), 0);
}
