//! Root enumeration (component B): produces the initial gray set when a
//! cycle begins (`Pause -> Propagate`).

use crate::mark::mark;
use crate::object::Value;
use crate::state::Gc;

/// spec.md §4.B: clear the worklists, mark the fixed roots, transition to
/// `Propagate`. Called once per incoming cycle; the second root sweep done
/// mid-atomic (step 5) calls [`mark_fixed_roots`] again without touching
/// the worklists.
pub fn start_cycle(gc: &mut Gc) {
    gc.gray.set(std::ptr::null_mut());
    gc.grayagain.set(std::ptr::null_mut());
    gc.weak.set(std::ptr::null_mut());
    mark_fixed_roots(gc);
    gc.set_state(crate::state::GcState::Propagate);
}

/// Marks the main thread, its environment, the registry, and every slot of
/// the named-GC-roots array. Reused verbatim by the atomic step's second
/// root sweep (spec.md §4.D step 5).
pub fn mark_fixed_roots(gc: &Gc) {
    let main = gc.main_thread.get();
    if !main.is_null() {
        mark(gc, main);
    }
    if let Value::Obj(r) = gc.registry.get() {
        mark(gc, r);
    }
    for v in gc.gcroots.borrow().iter() {
        if let Value::Obj(r) = v {
            mark(gc, *r);
        }
    }
    if let Some(tr) = gc.current_trace.get() {
        mark(gc, tr);
    }
}
