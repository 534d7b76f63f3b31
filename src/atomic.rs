//! Atomic step (component D): the single non-interruptible transition from
//! marking to sweeping. Refuses to start while a JIT trace is executing.

use crate::header::{WEAK, WEAKKEY, WEAKVAL};
use crate::object::{GcObj, GcRef, Value};
use crate::roots::mark_fixed_roots;
use crate::state::{Gc, GcState};

#[cfg(feature = "gc_logging")]
use tracing::debug;

/// `true` if the atomic step ran; `false` if it deferred because a trace
/// is currently executing (the driver charges `MAX_MEM` and retries).
pub fn run(gc: &mut Gc) -> bool {
    if gc.jit.trace_running() {
        return false;
    }

    #[cfg(feature = "gc_logging")]
    let _span = Gc::span("atomic");

    // 1. Snapshot and detach `grayagain`.
    let saved_grayagain = gc.grayagain.get();
    gc.grayagain.set(std::ptr::null_mut());

    // 2. Enter Atomic.
    gc.set_state(GcState::Atomic);

    // 3. Remark every open upvalue whose value is white.
    remark_open_upvalues(gc);

    // 4. Drain `gray`.
    crate::mark::propagate_all(gc);

    // 5. Move `weak` into `gray`, clear `weak`, remark roots, drain again.
    let saved_weak = gc.weak.get();
    gc.weak.set(std::ptr::null_mut());
    splice_onto_gray(gc, saved_weak);
    mark_fixed_roots(gc);
    crate::mark::propagate_all(gc);

    // 6. Move the saved `grayagain` into `gray`; drain.
    splice_onto_gray(gc, saved_grayagain);
    crate::mark::propagate_all(gc);

    // 7. Separate finalizable userdata (and foreign-data).
    let freed_estimate = crate::finalize::separate_finalizable(gc);

    // 8. Mark everything newly on `mmudata`, then drain.
    mark_mmudata(gc);
    crate::mark::propagate_all(gc);

    // 9. Clear weak tables.
    clear_weak_tables(gc, saved_weak);

    // 10. Shrink scratch buffers: nothing persistent to shrink in this
    // crate's worklists (they are intrusive, not buffers), so this is a
    // deliberate no-op kept as a named step for parity with spec.md.
    shrink_scratch_buffers();

    // 11. Flip currentwhite, reset sweep cursor, update estimate.
    let old_white = gc.current_white();
    gc.currentwhite.set(crate::header::other_white(old_white));
    gc.sweep_cursor.set(None);
    gc.sweep_cursor_is_udata.set(false);
    gc.estimate.set(gc.total().saturating_sub(freed_estimate));

    #[cfg(feature = "gc_logging")]
    debug!(old_white, new_white = gc.current_white(), "currentwhite flipped");

    true
}

fn splice_onto_gray(gc: &Gc, list: GcRef) {
    if list.is_null() {
        return;
    }
    let mut tail = list;
    unsafe {
        while !(*tail).gclist.get().is_null() {
            tail = (*tail).gclist.get();
        }
        (*tail).gclist.set(gc.gray.get());
    }
    gc.gray.set(list);
}

fn remark_open_upvalues(gc: &Gc) {
    let mut cur = gc.uvhead.get();
    while !cur.is_null() {
        let next = unsafe {
            match &(*cur).obj {
                GcObj::Upval(u) => u.uv_next.get(),
                _ => std::ptr::null_mut(),
            }
        };
        if let Value::Obj(v) = unsafe {
            match &(*cur).obj {
                GcObj::Upval(u) => u.value.get(),
                _ => Value::Nil,
            }
        } {
            if unsafe { (*v).header.is_white() } {
                crate::mark::mark(gc, cur);
            }
        }
        cur = next;
    }
}

fn mark_mmudata(gc: &Gc) {
    let head = gc.mmudata.get();
    if head.is_null() {
        return;
    }
    let mut cur = head;
    loop {
        crate::mark::mark(gc, cur);
        let next = unsafe { (*cur).next.get() };
        if next == head || next.is_null() {
            break;
        }
        cur = next;
    }
}

fn shrink_scratch_buffers() {}

/// Removes array/hash slots of every recorded weak table whose referent is
/// about-to-die. Strings are never cleared from weak slots — they are
/// marked here instead, since this design forbids strings as weak keys or
/// values.
fn clear_weak_tables(gc: &Gc, weak_list: GcRef) {
    let other_white = crate::header::other_white(gc.current_white());
    let mut cur = weak_list;
    while !cur.is_null() {
        let o = unsafe { &*cur };
        let next = o.gclist.get();
        if let GcObj::Table(t) = &o.obj {
            let mode = o.header.weak_mode();
            let clear_keys = mode & WEAKKEY != 0;
            let clear_vals = mode & WEAKVAL != 0;

            {
                let mut array = t.array.borrow_mut();
                for slot in array.iter_mut() {
                    if clear_vals && about_to_die(*slot, other_white) {
                        *slot = Value::Nil;
                    }
                }
            }
            {
                let mut hash = t.hash.borrow_mut();
                hash.retain(|(k, v)| {
                    let dying_key = clear_keys && about_to_die(*k, other_white);
                    let dying_val = clear_vals && about_to_die(*v, other_white);
                    ensure_marked_if_string(*k);
                    ensure_marked_if_string(*v);
                    !(dying_key || dying_val)
                });
            }
            o.header.set_weak_mode(mode & WEAK);
        }
        cur = next;
    }
}

fn about_to_die(v: Value, other_white: u8) -> bool {
    match v {
        Value::Obj(r) => {
            if r.is_null() {
                return false;
            }
            let h = unsafe { &(*r).header };
            // Finalized userdata in value position counts as about-to-die
            // for value clearing even though it is not yet swept.
            let finalized_udata = matches!(unsafe { &(*r).obj }, GcObj::Userdata(_)) && h.is_finalized();
            (h.marked() & other_white & crate::header::WHITES != 0) || finalized_udata
        }
        _ => false,
    }
}

fn ensure_marked_if_string(v: Value) {
    if let Value::Obj(r) = v {
        if !r.is_null() {
            if let GcObj::Str(_) = unsafe { &(*r).obj } {
                let h = unsafe { &(*r).header };
                if h.is_white() {
                    h.white_to_gray();
                    h.gray_to_black();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;

    #[test]
    fn atomic_flips_currentwhite() {
        let mut gc = Gc::new(GcConfig::default());
        gc.set_state(GcState::Propagate);
        let before = gc.current_white();
        run(&mut gc);
        assert_ne!(before, gc.current_white());
    }

    #[test]
    fn atomic_defers_while_trace_running() {
        let mut gc = Gc::with_jit(GcConfig::default(), Box::new(crate::jit::FlagJit(true)));
        gc.set_state(GcState::Propagate);
        assert!(!run(&mut gc));
        assert_eq!(gc.state(), GcState::Propagate);
    }
}
