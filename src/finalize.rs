//! Finalizer runner (component F): invokes userdata `__gc` metamethods and
//! registered foreign-data finalizers, under a raised GC threshold (no
//! reentrant collection while a finalizer runs) and a protected-call
//! boundary so a throwing finalizer cannot leave collector state
//! mid-transition.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use rustc_hash::FxHashMap;

use crate::config::MAX_MEM;
use crate::error::{Error, Result};
use crate::object::{FinalizerFn, GcBox, GcObj, GcRef};
use crate::state::Gc;

#[cfg(feature = "gc_logging")]
use tracing::debug;

/// Side table from foreign-data object to its registered finalizer,
/// standing in for the reference's per-ctype `finalizer` table
/// (`lj_gc_finalize_cdata`) — a metatable `__gc` lookup doesn't apply to
/// foreign-data, which carries no metatable.
#[derive(Default)]
pub struct ForeignFinalizers {
    table: FxHashMap<GcRef, FinalizerFn>,
    /// Set once `finalize_all_foreign` has drained the table at shutdown,
    /// mirroring `setgcrefnull(t->metatable)` disabling the reference's
    /// finalizer table before walking it — re-registration after that is
    /// inert rather than reviving teardown.
    disabled: bool,
}

impl ForeignFinalizers {
    pub fn insert(&mut self, r: GcRef, f: FinalizerFn) {
        if !self.disabled {
            self.table.insert(r, f);
        }
    }

    fn take(&mut self, r: GcRef) -> Option<FinalizerFn> {
        self.table.remove(&r)
    }
}

/// `lj_gc_separateudata`, generalized to foreign-data as well (see
/// DESIGN.md: the reference's cdata finalizer-table insertion lives in a
/// collaborator this crate doesn't carry, so the equivalent separation for
/// foreign-data is modeled here against `FOREIGN_HAS_FIN` instead). Walks
/// `udata_root` and `root`, moving anything unreached with a registered
/// finalizer onto `mmudata`; anything unreached with none gets `FINALIZED`
/// set so a plain sweep collects it without ever visiting `mmudata`.
/// Returns the approximate byte size moved, consumed by the atomic step's
/// `estimate` update.
pub fn separate_finalizable(gc: &Gc) -> usize {
    separate_userdata(gc) + separate_foreign(gc)
}

fn separate_userdata(gc: &Gc) -> usize {
    let mut moved = 0;
    let mut prev: Option<GcRef> = None;
    let mut cur = gc.udata_root.get();
    while !cur.is_null() {
        let o = unsafe { &*cur };
        let next = o.next.get();
        if o.header.is_finalized() || !o.header.is_white() {
            prev = Some(cur);
        } else if !has_gc_method(o) {
            o.header.mark_finalized();
            prev = Some(cur);
        } else {
            unlink(gc, &gc.udata_root, prev, next);
            o.header.mark_finalized();
            moved += unsafe { o.approx_size() };
            link_mmudata(gc, cur);
        }
        cur = next;
    }
    moved
}

fn separate_foreign(gc: &Gc) -> usize {
    let mut moved = 0;
    let mut prev: Option<GcRef> = None;
    let mut cur = gc.root.get();
    while !cur.is_null() {
        let o = unsafe { &*cur };
        let next = o.next.get();
        let candidate =
            matches!(o.obj, GcObj::Foreign(_)) && o.header.has_foreign_fin() && o.header.is_white() && !o.header.is_finalized();
        if candidate {
            unlink(gc, &gc.root, prev, next);
            o.header.mark_finalized();
            moved += unsafe { o.approx_size() };
            link_mmudata(gc, cur);
        } else {
            prev = Some(cur);
        }
        cur = next;
    }
    moved
}

fn unlink(_gc: &Gc, head: &std::cell::Cell<GcRef>, prev: Option<GcRef>, next: GcRef) {
    match prev {
        Some(p) => unsafe { (*p).next.set(next) },
        None => head.set(next),
    }
}

fn has_gc_method(o: &GcBox) -> bool {
    if let GcObj::Userdata(u) = &o.obj {
        if let Some(mt) = u.metatable.get() {
            if let GcObj::Table(t) = unsafe { &(*mt).obj } {
                return t.gc_finalizer.borrow().is_some();
            }
        }
    }
    false
}

fn gc_method(o: &GcBox) -> Option<FinalizerFn> {
    if let GcObj::Userdata(u) = &o.obj {
        if let Some(mt) = u.metatable.get() {
            if let GcObj::Table(t) = unsafe { &(*mt).obj } {
                return t.gc_finalizer.borrow().clone();
            }
        }
    }
    None
}

/// Inserts `r` into the circular `mmudata` list, mirroring the reference's
/// "link to end of mmudata list" / "create circular list" cases verbatim.
fn link_mmudata(gc: &Gc, r: GcRef) {
    let head = gc.mmudata.get();
    if head.is_null() {
        unsafe { (*r).next.set(r) };
    } else {
        let head_next = unsafe { (*head).next.get() };
        unsafe {
            (*r).next.set(head_next);
            (*head).next.set(r);
        }
    }
    gc.mmudata.set(r);
}

/// Finalizes one object from the head of `mmudata` (`gc_finalize`). Pops
/// `head.next`, collapsing the circular list to empty if that was the only
/// element.
pub fn finalize_one(gc: &mut Gc) -> Result<()> {
    let head = gc.mmudata.get();
    if head.is_null() {
        return Ok(());
    }
    let o = unsafe { (*head).next.get() };
    if o == head {
        gc.mmudata.set(ptr::null_mut());
    } else {
        let o_next = unsafe { (*o).next.get() };
        unsafe { (*head).next.set(o_next) };
    }
    finalize_object(gc, o)
}

fn finalize_object(gc: &mut Gc, o: GcRef) -> Result<()> {
    let obj = unsafe { &*o };
    match &obj.obj {
        GcObj::Foreign(_) => {
            unsafe { (*o).next.set(gc.root.get()) };
            gc.root.set(o);
            obj.header.make_white(gc.current_white());
            obj.header.set_foreign_fin(false);
            let finalizer = gc.foreign_finalizers.borrow_mut().take(o);
            if let Some(f) = finalizer {
                call_finalizer(gc, f, o)?;
            }
            Ok(())
        }
        GcObj::Userdata(_) => {
            unsafe { (*o).next.set(gc.udata_root.get()) };
            gc.udata_root.set(o);
            obj.header.make_white(gc.current_white());
            let finalizer = gc_method(obj);
            if let Some(f) = finalizer {
                call_finalizer(gc, f, o)?;
            }
            Ok(())
        }
        _ => unreachable!("only userdata/foreign-data are ever linked onto mmudata"),
    }
}

/// Runs one finalizer closure with the GC threshold raised to `MAX_MEM`
/// (no reentrant step while it runs) and a panic boundary standing in for
/// the reference's protected call (`lj_vm_pcall`) — a panicking finalizer
/// becomes `Error::Finalizer` with collector state already restored.
fn call_finalizer(gc: &mut Gc, f: FinalizerFn, o: GcRef) -> Result<()> {
    let old_threshold = gc.threshold();
    gc.threshold.set(MAX_MEM);
    #[cfg(feature = "gc_logging")]
    debug!(?o, "invoking finalizer");
    let result = catch_unwind(AssertUnwindSafe(|| f(o)));
    gc.threshold.set(old_threshold);
    result.map_err(|payload| Error::Finalizer(panic_message(payload)))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "finalizer panicked".to_string()
    }
}

/// Drains `mmudata` at shutdown / explicit request (`lj_gc_finalize_udata`).
pub fn finalize_all(gc: &mut Gc) -> Result<()> {
    while !gc.mmudata.get().is_null() {
        finalize_one(gc)?;
    }
    Ok(())
}

/// Drains the foreign-data finalizer table directly, bypassing `mmudata`
/// (`lj_gc_finalize_cdata`): disables the table first so finalizers cannot
/// re-register during teardown.
pub fn finalize_all_foreign(gc: &mut Gc) -> Result<()> {
    let entries: Vec<(GcRef, FinalizerFn)> = {
        let mut table = gc.foreign_finalizers.borrow_mut();
        table.disabled = true;
        table.table.drain().collect()
    };
    for (o, f) in entries {
        unsafe {
            (*o).header.make_white(gc.current_white());
            (*o).header.set_foreign_fin(false);
        }
        call_finalizer(gc, f, o)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::object::{GcTable, GcUserdata};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn userdata_with_gc_method_is_finalized_at_most_once() {
        let gc = Gc::new(GcConfig::default());
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let mt = gc
            .alloc(GcObj::Table(GcTable {
                metatable: Cell::new(None),
                array: RefCell::new(vec![]),
                hash: RefCell::new(vec![]),
                mode: Cell::new(0),
                gc_finalizer: RefCell::new(Some(Rc::new(|_r| {
                    CALLS.fetch_add(1, Ordering::SeqCst);
                }))),
            }))
            .unwrap();
        let ud = gc
            .alloc(GcObj::Userdata(GcUserdata { metatable: Cell::new(Some(mt)), env: Cell::new(None), payload_len: 8 }))
            .unwrap();
        // Leave `ud` white (unreached) so it is a finalization candidate.
        let moved = separate_finalizable(&gc);
        assert!(moved > 0);
        assert!(unsafe { (*ud).header.is_finalized() });
        assert!(!gc.mmudata.get().is_null());

        let mut gc = gc;
        finalize_all(&mut gc).unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert!(gc.mmudata.get().is_null());
        assert!(unsafe { (*ud).header.is_white() });
    }

    #[test]
    fn panicking_finalizer_becomes_finalizer_error() {
        let gc = Gc::new(GcConfig::default());
        let mt = gc
            .alloc(GcObj::Table(GcTable {
                metatable: Cell::new(None),
                array: RefCell::new(vec![]),
                hash: RefCell::new(vec![]),
                mode: Cell::new(0),
                gc_finalizer: RefCell::new(Some(Rc::new(|_r| panic!("boom")))),
            }))
            .unwrap();
        let _ud = gc
            .alloc(GcObj::Userdata(GcUserdata { metatable: Cell::new(Some(mt)), env: Cell::new(None), payload_len: 8 }))
            .unwrap();
        separate_finalizable(&gc);
        let mut gc = gc;
        let prev_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let result = finalize_all(&mut gc);
        std::panic::set_hook(prev_hook);
        assert!(matches!(result, Err(Error::Finalizer(_))));
    }
}
