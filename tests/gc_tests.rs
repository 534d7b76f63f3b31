//! End-to-end scenarios from spec.md §8, driven entirely through the
//! public `rtgc` API (plus the header/state accessors a host embedding
//! would also reach for when writing its own regression tests).

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rtgc::header::{WEAKVAL, WHITES};
use rtgc::{
    Age, FuncKind, Gc, GcConfig, GcFunc, GcKind, GcObj, GcRef, GcState, GcStr, GcTable, GcThread, GcUserdata,
    JitState, StepResult, Value,
};

fn new_table(gc: &Gc) -> GcRef {
    gc.alloc(GcObj::Table(GcTable {
        metatable: Cell::new(None),
        array: RefCell::new(vec![]),
        hash: RefCell::new(vec![]),
        mode: Cell::new(0),
        gc_finalizer: RefCell::new(None),
    }))
    .unwrap()
}

fn new_str(gc: &Gc, tag: u32, len: usize) -> GcRef {
    gc.alloc(GcObj::Str(GcStr { hash: tag, bytes: vec![0u8; len].into_boxed_slice() })).unwrap()
}

/// Scenario 1: cycling a weak-value table drops every value once its
/// strong references are gone.
#[test]
fn weak_value_table_drops_unreferenced_entries_on_full_gc() {
    let mut gc = Gc::new(GcConfig::default());

    let weak_mt = new_table(&gc);
    unsafe {
        if let GcObj::Table(t) = &(*weak_mt).obj {
            t.mode.set(WEAKVAL);
        }
    }

    let weak_table = new_table(&gc);
    unsafe {
        if let GcObj::Table(t) = &(*weak_table).obj {
            t.metatable.set(Some(weak_mt));
        }
    }
    gc.gcroots.borrow_mut().push(Value::Obj(weak_table));

    for _ in 0..100 {
        let v = new_table(&gc);
        unsafe {
            if let GcObj::Table(t) = &(*weak_table).obj {
                t.array.borrow_mut().push(Value::Obj(v));
            }
        }
    }
    let before = gc.total();

    gc.full_gc().unwrap();

    unsafe {
        if let GcObj::Table(t) = &(*weak_table).obj {
            assert!(
                t.array.borrow().iter().all(|v| v.is_nil()),
                "every weak-value slot must be cleared once its value is unreachable"
            );
        }
    }
    assert!(gc.total() < before, "the 100 dropped tables' bytes must be reclaimed");
}

/// Scenario 2: a `__gc` finalizer fires exactly once, may resurrect its
/// object by having the mutator re-root it, and only the following cycle
/// (once un-rooted again) actually frees it.
#[test]
fn finalizer_resurrection_then_final_collection() {
    let mut gc = Gc::new(GcConfig::default());

    static CALLS: AtomicUsize = AtomicUsize::new(0);
    let resurrected: Rc<RefCell<Option<GcRef>>> = Rc::new(RefCell::new(None));
    let resurrected_for_closure = resurrected.clone();

    let mt = new_table(&gc);
    unsafe {
        if let GcObj::Table(t) = &(*mt).obj {
            *t.gc_finalizer.borrow_mut() = Some(Rc::new(move |r| {
                CALLS.fetch_add(1, Ordering::SeqCst);
                *resurrected_for_closure.borrow_mut() = Some(r);
            }));
        }
    }
    let ud = gc
        .alloc(GcObj::Userdata(GcUserdata { metatable: Cell::new(Some(mt)), env: Cell::new(None), payload_len: 8 }))
        .unwrap();
    // `ud` is intentionally left unrooted.

    gc.full_gc().unwrap();
    assert_eq!(CALLS.load(Ordering::SeqCst), 1, "__gc must run exactly once");
    let r = resurrected.borrow_mut().take().expect("finalizer must have observed its object");
    assert_eq!(r, ud);

    // Mutator resurrects it: `global.r = x`.
    gc.gcroots.borrow_mut().push(Value::Obj(r));
    gc.full_gc().unwrap();
    assert_eq!(CALLS.load(Ordering::SeqCst), 1, "a resurrected object must not be re-finalized");
    unsafe {
        assert!(!(*ud).header.is_dead(gc.current_white()), "resurrected userdata must survive");
    }

    // Clear the global and collect again: now it is actually freed.
    gc.gcroots.borrow_mut().clear();
    let before = gc.total();
    gc.full_gc().unwrap();
    assert!(gc.total() < before, "dropping the last root must free the userdata");
    assert_eq!(CALLS.load(Ordering::SeqCst), 1, "finalizer must never run a second time");
}

/// Scenario 3: a backward barrier on a black table that is mutated after
/// the collector has moved past the mark phase keeps its newly stored
/// value alive through the next cycle.
#[test]
fn backward_barrier_keeps_late_store_alive() {
    let mut gc = Gc::new(GcConfig::default());

    let t = new_table(&gc);
    gc.gcroots.borrow_mut().push(Value::Obj(t));
    unsafe {
        (*t).header.white_to_gray();
        (*t).header.gray_to_black();
    }
    gc.set_state(GcState::Sweep);

    let v = new_table(&gc);
    unsafe {
        if let GcObj::Table(tab) = &(*t).obj {
            tab.array.borrow_mut().push(Value::Obj(v));
        }
    }
    rtgc::barrier::barrier_back(&gc, t);
    unsafe {
        assert!((*t).header.is_white(), "barrier outside the mark phase defers by whitening the writer");
    }

    gc.set_state(GcState::Pause);
    gc.full_gc().unwrap();

    unsafe {
        assert!(!(*v).header.is_dead(gc.current_white()), "v must be reached via the re-marked table");
    }
}

/// Scenario 4: exceeding `genmajormul` percent growth over the last
/// major cycle's estimate forces a full generational cycle, observable
/// by every survivor's age resetting to `Old`.
#[test]
fn gen_major_trigger_reages_every_survivor_to_old() {
    let mut gc = Gc::new(GcConfig { genmajormul: 100, ..GcConfig::default() });

    let anchor = new_table(&gc);
    gc.gcroots.borrow_mut().push(Value::Obj(anchor));
    gc.change_mode(GcKind::Generational).unwrap();

    let baseline = gc.total();
    let mut children = Vec::new();
    while gc.total() < baseline * 2 + 256 {
        let s = new_str(&gc, children.len() as u32, 64);
        unsafe {
            if let GcObj::Table(tab) = &(*anchor).obj {
                tab.array.borrow_mut().push(Value::Obj(s));
            }
        }
        children.push(s);
    }
    for c in &children {
        unsafe { assert_eq!((**c).header.get_age(), Age::New) };
    }

    let result = gc.step().unwrap();
    assert_eq!(result, StepResult::CycleCompleted, "growth past genmajormul must trigger a full cycle");
    for c in &children {
        unsafe { assert_eq!((**c).header.get_age(), Age::Old, "a full cycle re-bases every survivor to Old") };
    }
}

struct SharedJit(Rc<Cell<bool>>);

impl JitState for SharedJit {
    fn trace_running(&self) -> bool {
        self.0.get()
    }
}

/// Scenario 5: the atomic step defers while a JIT trace is executing and
/// resumes once it stops.
#[test]
fn atomic_step_defers_while_trace_is_running() {
    let flag = Rc::new(Cell::new(true));
    let mut gc = Gc::with_jit(GcConfig::default(), Box::new(SharedJit(flag.clone())));
    gc.set_state(GcState::Atomic);

    let result = gc.step().unwrap();
    assert_eq!(result, StepResult::Slack, "a running trace must defer the step as slack");
    assert_eq!(gc.state(), GcState::Atomic, "state must not advance past Atomic while the trace runs");

    flag.set(false);
    let result = gc.step().unwrap();
    assert_ne!(result, StepResult::Slack);
    assert_ne!(gc.state(), GcState::Atomic, "clearing the trace flag must let atomic complete");
}

/// Scenario 6: `free_all` frees every non-super-fixed object exactly
/// once; only the super-fixed "main thread" stand-in survives.
#[test]
fn free_all_sweeps_everything_but_super_fixed() {
    let mut gc = Gc::new(GcConfig::default());

    let main = gc
        .alloc(GcObj::Thread(GcThread {
            stack: RefCell::new(vec![]),
            top: Cell::new(0),
            env: Cell::new(std::ptr::null_mut()),
            openupval: Cell::new(std::ptr::null_mut()),
        }))
        .unwrap();
    unsafe { (*main).header.superfix() };
    gc.main_thread.set(main);

    let _garbage_a = new_str(&gc, 1, 32);
    let _garbage_b = new_table(&gc);
    let _garbage_c = gc
        .alloc(GcObj::Func(GcFunc {
            env: Cell::new(std::ptr::null_mut()),
            kind: FuncKind::Host { upvals: RefCell::new(vec![]) },
        }))
        .unwrap();

    let main_size = unsafe { (*main).approx_size() };

    gc.free_all();

    assert_eq!(gc.total(), main_size, "only the super-fixed main thread may remain after shutdown");
    unsafe {
        assert!((*main).header.is_superfixed());
        assert!((*main).header.marked() & WHITES != 0);
    }
}

/// Mode round-trip: switching Incremental -> Generational -> Incremental
/// must be identity on the live set (a rooted object survives both
/// transitions, each forcing a full cycle).
#[test]
fn mode_round_trip_preserves_the_live_set() {
    let mut gc = Gc::new(GcConfig::default());
    let t = new_table(&gc);
    gc.gcroots.borrow_mut().push(Value::Obj(t));

    gc.change_mode(GcKind::Generational).unwrap();
    assert_eq!(gc.kind(), GcKind::Generational);
    unsafe { assert!(!(*t).header.is_dead(gc.current_white())) };

    gc.change_mode(GcKind::Incremental).unwrap();
    assert_eq!(gc.kind(), GcKind::Incremental);
    unsafe { assert!(!(*t).header.is_dead(gc.current_white())) };
}
