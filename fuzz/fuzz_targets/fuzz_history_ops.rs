#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use turbox_reactivity::Engine;

#[derive(Arbitrary, Debug)]
enum HistoryOp {
    Set(i16),
    SetTwice(i16, i16),
    SetUnrecorded(bool),
    Undo,
    Redo,
    Pause,
    Resume,
    Clear,
}

#[derive(Arbitrary, Debug)]
struct Input {
    max_step_number: u8,
    ops: Vec<HistoryOp>,
}

fuzz_target!(|input: Input| {
    let engine = Engine::default();
    let domain = engine.domain("fuzz").unwrap();
    let value = domain.field("value", 0i16).unwrap();
    let flag = domain
        .field_with("flag", false, turbox_reactivity::FieldOptions::unrecorded())
        .unwrap();
    let set = domain
        .mutation("set", {
            let value = value.clone();
            move |v: i16| value.set(v)
        })
        .unwrap();
    let set_twice = domain
        .mutation("set_twice", {
            let set = set.clone();
            move |(a, b): (i16, i16)| {
                set.call(a)?;
                set.call(b)
            }
        })
        .unwrap();
    let toggle = domain
        .mutation("toggle", {
            let flag = flag.clone();
            move |f: bool| flag.set(f)
        })
        .unwrap();
    let max = usize::from(input.max_step_number).max(1);
    let history = domain.create_history(max).unwrap();

    for op in input.ops.into_iter().take(512) {
        match op {
            HistoryOp::Set(v) => set.call(v).unwrap(),
            HistoryOp::SetTwice(a, b) => set_twice.call((a, b)).unwrap(),
            HistoryOp::SetUnrecorded(f) => toggle.call(f).unwrap(),
            HistoryOp::Undo => engine.undo(),
            HistoryOp::Redo => engine.redo(),
            HistoryOp::Pause => engine.pause_history(),
            HistoryOp::Resume => engine.resume_history(),
            HistoryOp::Clear => engine.clear_history(),
        }
        assert!(history.cursor() <= history.len());
        assert!(history.len() <= max);
        assert!(!engine.is_in_transaction());
    }

    // Once at the tip, a full rewind and replay lands on the same value.
    history.resume();
    while history.redoable() {
        engine.redo();
    }
    if history.undoable() {
        engine.undo();
        engine.redo();
        let tip = value.get();
        while history.undoable() {
            engine.undo();
        }
        while history.redoable() {
            engine.redo();
        }
        assert_eq!(value.get(), tip);
    }
});
