//! Mark/propagate engine (component C): tri-color traversal over `gray` and
//! `grayagain`, per-type children enumeration, weak-table deferral.

use std::ptr;

use crate::header::{WEAK, WEAKKEY, WEAKVAL};
use crate::object::{FuncKind, GcBox, GcObj, GcRef, TypeTag, Value};
use crate::state::{Gc, GcKind};

#[cfg(feature = "gc_logging")]
use tracing::trace;

#[inline]
unsafe fn obj<'a>(r: GcRef) -> &'a GcBox {
    &*r
}

/// Push `r` onto the `gclist`-linked worklist whose head is `list`.
#[inline]
fn push_gclist(r: GcRef, list: &std::cell::Cell<GcRef>) {
    unsafe {
        (*r).gclist.set(list.get());
    }
    list.set(r);
}

/// `mark(o)`: if not white, no-op; else classify per spec.md §4.C.
pub fn mark(gc: &Gc, r: GcRef) {
    if r.is_null() {
        return;
    }
    let o = unsafe { obj(r) };
    if !o.header.is_white() {
        return;
    }
    match &o.obj {
        // Strings and foreign-data have no outgoing GC references; they are
        // never placed on the gray list.
        GcObj::Str(_) => {
            o.header.white_to_gray();
            o.header.gray_to_black();
        }
        GcObj::Foreign(_) => {
            o.header.white_to_gray();
            o.header.gray_to_black();
        }
        // Userdata are marked black immediately; they never sit on `gray`.
        GcObj::Userdata(u) => {
            o.header.white_to_gray();
            if let Some(mt) = u.metatable.get() {
                mark(gc, mt);
            }
            if let Some(env) = u.env.get() {
                mark(gc, env);
            }
            o.header.gray_to_black();
        }
        // Closed upvalues mark their held value and go straight to black.
        GcObj::Upval(uv) if !uv.open.get() => {
            o.header.white_to_gray();
            if let Value::Obj(v) = uv.value.get() {
                mark(gc, v);
            }
            o.header.gray_to_black();
        }
        // Everything else: tables, functions, prototypes, threads, traces,
        // open upvalues — gray, pushed onto the gray worklist.
        _ => {
            o.header.white_to_gray();
            push_gclist(r, &gc.gray);
        }
    }
    #[cfg(feature = "gc_logging")]
    trace!(tag = ?o.type_tag(), "marked");
}

/// Pop and fully process one gray object, returning its approximate
/// traversal cost in bytes (used by the incremental driver's step budget).
pub fn propagate_one(gc: &Gc) -> usize {
    let r = gc.gray.get();
    if r.is_null() {
        return 0;
    }
    let o = unsafe { obj(r) };
    gc.gray.set(o.gclist.get());
    o.gclist.set(ptr::null_mut());

    match &o.obj {
        GcObj::Table(t) => {
            let mt = t.metatable.get();
            let weak = weak_mode_from_metatable(mt);
            if weak != 0 {
                o.header.set_weak_mode(weak);
                push_gclist(r, &gc.weak);
                // The metatable itself is consulted every cycle (it drives
                // `__mode`) and so must stay reachable through this table
                // even though its keys/values are not traversed.
                if let Some(mt) = mt {
                    mark(gc, mt);
                }
                // Only the weak side(s) are skipped — a table with e.g.
                // `__mode="k"` still marks every (strong) value, and one
                // with `__mode="v"` still marks every (strong) key.
                if weak & WEAKVAL == 0 {
                    for v in t.array.borrow().iter() {
                        if let Value::Obj(vr) = v {
                            mark(gc, *vr);
                        }
                    }
                }
                for (k, v) in t.hash.borrow().iter() {
                    if weak & WEAKKEY == 0 {
                        if let Value::Obj(kr) = k {
                            mark(gc, *kr);
                        }
                    }
                    if weak & WEAKVAL == 0 {
                        if let Value::Obj(vr) = v {
                            mark(gc, *vr);
                        }
                    }
                }
                return approx_table_bytes(t);
            }
            o.header.gray_to_black();
            if let Some(mt) = mt {
                mark(gc, mt);
            }
            for v in t.array.borrow().iter() {
                if let Value::Obj(vr) = v {
                    mark(gc, *vr);
                }
            }
            for (k, v) in t.hash.borrow().iter() {
                if let Value::Obj(kr) = k {
                    mark(gc, *kr);
                }
                if let Value::Obj(vr) = v {
                    mark(gc, *vr);
                }
            }
            if gc.kind() == GcKind::Generational {
                // A fully-strong table is reverted to gray and pushed on
                // `grayagain` so the next atomic remark catches writes the
                // barrier missed (spec.md §4.C).
                o.header.black_to_gray();
                push_gclist(r, &gc.grayagain);
            }
            approx_table_bytes(t)
        }
        GcObj::Func(f) => {
            o.header.gray_to_black();
            mark(gc, f.env.get());
            match &f.kind {
                FuncKind::Lua { proto, upvals } => {
                    mark(gc, proto.get());
                    for uv in upvals.borrow().iter() {
                        mark(gc, *uv);
                    }
                }
                FuncKind::Host { upvals } => {
                    for v in upvals.borrow().iter() {
                        if let Value::Obj(vr) = v {
                            mark(gc, *vr);
                        }
                    }
                }
            }
            std::mem::size_of::<crate::object::GcFunc>()
        }
        GcObj::Proto(p) => {
            o.header.gray_to_black();
            mark(gc, p.chunkname.get());
            for c in p.consts.borrow().iter() {
                if let Value::Obj(cr) = c {
                    mark(gc, *cr);
                }
            }
            if let Some(tr) = p.trace.get() {
                mark(gc, tr);
            }
            std::mem::size_of::<crate::object::GcProto>()
                + p.consts.borrow().len() * std::mem::size_of::<Value>()
        }
        GcObj::Thread(t) => {
            let top = t.top.get();
            for v in t.stack.borrow()[..top].iter() {
                if let Value::Obj(vr) = v {
                    mark(gc, *vr);
                }
            }
            if gc.state() == crate::state::GcState::Atomic {
                let mut stack = t.stack.borrow_mut();
                let len = stack.len();
                for slot in stack[top..len].iter_mut() {
                    *slot = Value::Nil;
                }
            }
            mark(gc, t.env.get());
            shrink_thread_stack(t);
            // Threads are never left black: their stack mutates without
            // going through a barrier, so they stay on `grayagain`.
            push_gclist(r, &gc.grayagain);
            std::mem::size_of::<crate::object::GcThread>() + top * std::mem::size_of::<Value>()
        }
        GcObj::Trace(tr) => {
            o.header.gray_to_black();
            for c in tr.consts.borrow().iter() {
                mark(gc, *c);
            }
            if let Some(l) = tr.link.get() {
                mark(gc, l);
            }
            if let Some(n) = tr.nextroot.get() {
                mark(gc, n);
            }
            if let Some(n) = tr.nextside.get() {
                mark(gc, n);
            }
            mark(gc, tr.startpt.get());
            std::mem::size_of::<crate::object::GcTrace>()
        }
        GcObj::Upval(uv) => {
            // Open upvalue: mark the aliased value, stay gray — it is
            // re-scanned at atomic time if still open.
            if let Value::Obj(vr) = uv.value.get() {
                mark(gc, vr);
            }
            std::mem::size_of::<crate::object::GcUpval>()
        }
        GcObj::Str(_) | GcObj::Foreign(_) | GcObj::Userdata(_) => {
            // Never placed on `gray` by `mark`; nothing to do if reached
            // here defensively.
            0
        }
    }
}

/// Drain `gray` to empty, i.e. `propagate_all`.
pub fn propagate_all(gc: &Gc) {
    while !gc.gray.get().is_null() {
        propagate_one(gc);
    }
}

fn weak_mode_from_metatable(mt: Option<GcRef>) -> u8 {
    let Some(mt) = mt else { return 0 };
    let o = unsafe { obj(mt) };
    match &o.obj {
        GcObj::Table(t) => t.mode.get() & WEAK,
        _ => 0,
    }
}

fn approx_table_header_bytes(t: &crate::object::GcTable) -> usize {
    std::mem::size_of::<crate::object::GcTable>() + t.array.borrow().capacity() * std::mem::size_of::<Value>()
}

fn approx_table_bytes(t: &crate::object::GcTable) -> usize {
    approx_table_header_bytes(t) + t.hash.borrow().len() * std::mem::size_of::<(Value, Value)>()
}

/// Traverse call frames to compute the minimum stack size and shrink to
/// it. The stand-in thread representation has no separate frame list, so
/// this conservatively keeps the stack as-is up to `top` plus a small
/// slack — a full runtime's frame walk would compute a tighter bound.
fn shrink_thread_stack(t: &crate::object::GcThread) {
    let top = t.top.get();
    let mut stack = t.stack.borrow_mut();
    let keep = (top + 8).min(stack.len()).max(top);
    stack.truncate(keep.max(top));
    let _ = TypeTag::Thread;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::header::WHITE0;
    use crate::object::{GcObj, GcStr};
    use crate::state::Gc;

    #[test]
    fn mark_of_string_goes_straight_to_black() {
        let gc = Gc::new(GcConfig::default());
        let s = gc.alloc(GcObj::Str(GcStr { hash: 0, bytes: Box::from(&b"x"[..]) })).unwrap();
        let o = unsafe { obj(s) };
        assert!(o.header.is_white());
        mark(&gc, s);
        assert!(o.header.is_black());
        let _ = WHITE0;
    }

    #[test]
    fn propagate_all_drains_gray() {
        let gc = Gc::new(GcConfig::default());
        let t = gc
            .alloc(GcObj::Table(crate::object::GcTable {
                metatable: std::cell::Cell::new(None),
                array: std::cell::RefCell::new(vec![]),
                hash: std::cell::RefCell::new(vec![]),
                mode: std::cell::Cell::new(0),
                gc_finalizer: std::cell::RefCell::new(None),
            }))
            .unwrap();
        mark(&gc, t);
        assert!(!gc.gray.get().is_null());
        propagate_all(&gc);
        assert!(gc.gray.get().is_null());
    }
}
