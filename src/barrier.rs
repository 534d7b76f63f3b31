//! Write barriers (component I): keep the tri-color invariant (no black
//! object directly references a white one) and the generational age
//! invariant (no old object directly references a young white one without
//! being re-scanned) during mutator activity between collector steps.
//!
//! spec.md §9 describes these as surfacing to the mutator as "a single
//! macro/inline predicate (`black(o) && white(v)` -> call into barrier)".
//! [`should_barrier`] is that predicate; callers check it before paying for
//! the call.

use crate::header::Age;
use crate::object::{GcObj, GcRef, Value};
use crate::state::{Gc, GcKind, GcState};

#[inline]
unsafe fn is_black(r: GcRef) -> bool {
    (*r).header.is_black()
}

#[inline]
unsafe fn is_white(r: GcRef) -> bool {
    (*r).header.is_white()
}

/// `black(o) && white(v)`.
#[inline]
pub fn should_barrier(o: GcRef, v: GcRef) -> bool {
    if o.is_null() || v.is_null() {
        return false;
    }
    unsafe { is_black(o) && is_white(v) }
}

#[inline]
fn in_mark_phase(gc: &Gc) -> bool {
    matches!(gc.state(), GcState::Propagate | GcState::Atomic)
}

/// Forward barrier: `o` (black) just acquired a reference to `v` (white) —
/// closure upvalues, prototype constants, and similar non-table stores.
pub fn barrier_f(gc: &Gc, o: GcRef, v: GcRef) {
    if !should_barrier(o, v) {
        return;
    }
    if in_mark_phase(gc) {
        crate::mark::mark(gc, v);
        if gc.kind() == GcKind::Generational {
            let oh = unsafe { &(*o).header };
            if oh.is_old() {
                let vh = unsafe { &(*v).header };
                set_age_old0(vh);
            }
        }
    } else {
        unsafe {
            (*o).header.make_white(gc.current_white());
        }
    }
}

/// Backward barrier: a table (or userdata) `t` was mutated after reaching
/// black. Cheaper to revert the whole object to gray than to re-check
/// every one of its slots.
pub fn barrier_back(gc: &Gc, t: GcRef) {
    if t.is_null() {
        return;
    }
    let th = unsafe { &(*t).header };
    if !th.is_black() {
        return;
    }
    if in_mark_phase(gc) {
        th.black_to_gray();
        push_grayagain(gc, t);
        if gc.kind() == GcKind::Generational && th.is_old() {
            force_age(th, Age::Touched1);
        }
    } else {
        th.make_white(gc.current_white());
    }
}

fn push_grayagain(gc: &Gc, r: GcRef) {
    unsafe {
        (*r).gclist.set(gc.grayagain.get());
    }
    gc.grayagain.set(r);
}

/// Closing an open upvalue turns it into a regular heap object.
pub fn barrier_uv(gc: &mut Gc, uv: GcRef) {
    if uv.is_null() {
        return;
    }
    let o = unsafe { &*uv };
    let was_gray = o.header.is_gray();
    if let GcObj::Upval(u) = &o.obj {
        u.open.set(false);
        unlink_open_uv(gc, uv);
    }
    if was_gray {
        if in_mark_phase(gc) {
            o.header.gray_to_black();
            if let GcObj::Upval(u) = &o.obj {
                if let Value::Obj(v) = u.value.get() {
                    barrier_f(gc, uv, v);
                }
            }
        } else {
            o.header.make_white(gc.current_white());
        }
    } else {
        o.header.make_white(gc.current_white());
    }
}

fn unlink_open_uv(gc: &Gc, uv: GcRef) {
    unsafe {
        if let GcObj::Upval(u) = &(*uv).obj {
            let prev = u.uv_prev.get();
            let next = u.uv_next.get();
            if !prev.is_null() {
                if let GcObj::Upval(pu) = &(*prev).obj {
                    pu.uv_next.set(next);
                }
            } else if gc.uvhead.get() == uv {
                gc.uvhead.set(next);
            }
            if !next.is_null() {
                if let GcObj::Upval(nu) = &(*next).obj {
                    nu.uv_prev.set(prev);
                }
            }
            u.uv_prev.set(std::ptr::null_mut());
            u.uv_next.set(std::ptr::null_mut());
        }
    }
}

/// Trace-save barrier: a finished trace is marked, and ages `OLD0` if its
/// starting prototype is old (so the next young cycle re-scans it).
pub fn barrier_trace(gc: &Gc, trace: GcRef, startpt: GcRef) {
    if trace.is_null() {
        return;
    }
    crate::mark::mark(gc, trace);
    if gc.kind() == GcKind::Generational && !startpt.is_null() {
        let pth = unsafe { &(*startpt).header };
        if pth.is_old() {
            let th = unsafe { &(*trace).header };
            set_age_old0(th);
        }
    }
}

fn set_age_old0(h: &crate::header::GcHeader) {
    if h.get_age() != Age::Old0 {
        h.set_age(Age::Old0);
    }
}

/// `changeage` requires the exact prior age; barriers instead force the
/// target age unconditionally since they fire from arbitrary mutator code,
/// not from the generational sweep's structured walk.
fn force_age(h: &crate::header::GcHeader, to: Age) {
    h.set_age(to);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::object::{GcObj, GcStr, GcTable};
    use std::cell::{Cell, RefCell};

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

    #[test]
    fn forward_barrier_marks_during_propagate() {
        let gc = Gc::new(GcConfig::default());
        gc.set_state(GcState::Propagate);
        let o = new_table(&gc);
        let v = gc
            .alloc(GcObj::Str(GcStr { hash: 0, bytes: Box::from(&b"s"[..]) }))
            .unwrap();
        unsafe {
            (*o).header.white_to_gray();
            (*o).header.gray_to_black();
        }
        assert!(should_barrier(o, v));
        barrier_f(&gc, o, v);
        unsafe {
            assert!(!(*v).header.is_white());
        }
    }

    #[test]
    fn forward_barrier_outside_mark_phase_whitens_o() {
        let gc = Gc::new(GcConfig::default());
        gc.set_state(GcState::Sweep);
        let o = new_table(&gc);
        let v = gc
            .alloc(GcObj::Str(GcStr { hash: 0, bytes: Box::from(&b"s"[..]) }))
            .unwrap();
        unsafe {
            (*o).header.white_to_gray();
            (*o).header.gray_to_black();
        }
        barrier_f(&gc, o, v);
        unsafe {
            assert!((*o).header.is_white());
        }
    }
}
