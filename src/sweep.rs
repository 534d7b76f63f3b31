//! Sweep engine (component E): bounded sweep over `root` and `udata_root`
//! in chunks of `SWEEPMAX`, a separate per-chain pass over the interned
//! string table, and the unconditional full-sweep helper `free_all` uses
//! at shutdown.
//!
//! Two home lists are swept in incremental/young-cycle mode: `root` (every
//! collectable except interned strings and userdata) and `udata_root`
//! (userdata only — the reference's `mainthread->nextgc` chain). Treating
//! them as two disjoint lists the sweep engine walks in sequence, rather
//! than a single combined list, keeps `GcUserdata` free of a second link
//! field that would just have to agree with `GcBox::next` — see
//! DESIGN.md's note on this collector's resolution of that ambiguity.

use std::cell::Cell;
use std::ptr;

use crate::header::{other_white, WHITES};
use crate::object::{GcObj, GcRef};
use crate::state::Gc;

#[cfg(feature = "gc_logging")]
use tracing::debug;

/// Smallest size the string table is ever shrunk to, matching
/// `LJ_MIN_STRTAB` in spirit: below this there is no point halving further.
const MIN_STRTAB: usize = 32;

/// Sweeps one node of an intrusive `next`-linked chain. Returns `true` if
/// `cur` survived (the cursor should advance past it), `false` if it was
/// freed (the chain just closed the gap, so the cursor stays put).
fn sweep_node(gc: &Gc, head: &Cell<GcRef>, prev: Option<GcRef>, cur: GcRef, ow: u8) -> bool {
    let o = unsafe { &*cur };
    if let GcObj::Thread(t) = &o.obj {
        sweep_chain_full(gc, &t.openupval);
    }
    let marked = o.header.marked();
    // `free_all` signals its shutdown sweep by folding `SUPERFIXED` into
    // `currentwhite` itself (see below); outside of that, a fixed object
    // must never be swept regardless of its color, matching spec.md's
    // `dead(o)` definition (white under other-white, and not `FIXED`).
    let shutdown_sweep = gc.current_white() & crate::header::SUPERFIXED != 0;
    let alive = o.header.is_superfixed() || (o.header.is_fixed() && !shutdown_sweep) || (marked ^ WHITES) & ow != 0;
    if alive {
        // Black, or current white, or protected: alive. Recolor for the
        // next cycle.
        o.header.make_white(gc.current_white());
        true
    } else {
        let next = o.next.get();
        match prev {
            Some(p) => unsafe { (*p).next.set(next) },
            None => head.set(next),
        }
        #[cfg(feature = "gc_logging")]
        debug!(tag = ?o.type_tag(), "sweep: freed");
        crate::alloc::free_one(gc, cur);
        false
    }
}

/// Unconditional, unbounded sweep of an entire chain (`gc_fullsweep`):
/// used for a thread's open-upvalue list, each string hash chain, and
/// shutdown.
pub fn sweep_chain_full(gc: &Gc, head: &Cell<GcRef>) {
    let ow = other_white(gc.current_white());
    let mut prev: Option<GcRef> = None;
    loop {
        let cur = match prev {
            Some(p) => unsafe { (*p).next.get() },
            None => head.get(),
        };
        if cur.is_null() {
            break;
        }
        if sweep_node(gc, head, prev, cur, ow) {
            prev = Some(cur);
        }
    }
}

/// Advances the resumable `root`/`udata_root` sweep cursor by up to `limit`
/// objects, sweeping `root` to completion before moving on to
/// `udata_root`. Returns the number of objects actually processed.
pub fn sweep_step(gc: &Gc, limit: usize) -> usize {
    let ow = other_white(gc.current_white());
    let mut processed = 0;
    while processed < limit {
        let is_udata = gc.sweep_cursor_is_udata.get();
        let head: &Cell<GcRef> = if is_udata { &gc.udata_root } else { &gc.root };
        let prev = gc.sweep_cursor.get();
        let cur = match prev {
            Some(p) => unsafe { (*p).next.get() },
            None => head.get(),
        };
        if cur.is_null() {
            if is_udata {
                break;
            }
            gc.sweep_cursor_is_udata.set(true);
            gc.sweep_cursor.set(None);
            continue;
        }
        if sweep_node(gc, head, prev, cur, ow) {
            gc.sweep_cursor.set(Some(cur));
        }
        processed += 1;
    }
    processed
}

/// `true` once both `root` and `udata_root` have been fully walked this
/// cycle — the incremental driver's signal to move past `Sweep`.
pub fn sweep_done(gc: &Gc) -> bool {
    if !gc.sweep_cursor_is_udata.get() {
        return false;
    }
    let cur = match gc.sweep_cursor.get() {
        Some(p) => unsafe { (*p).next.get() },
        None => gc.udata_root.get(),
    };
    cur.is_null()
}

/// Resets the resumable cursor to the start of `root`, as the atomic
/// step's final act does (`sweep = &root`).
pub fn reset_cursor(gc: &Gc) {
    gc.sweep_cursor.set(None);
    gc.sweep_cursor_is_udata.set(false);
}

/// Sweeps one string hash chain (`GCSsweepstring`'s per-step unit of
/// work). Returns `true` once every chain has been swept.
pub fn sweep_string_step(gc: &Gc) -> bool {
    let idx = gc.sweepstr.get();
    if idx > gc.strmask() {
        return true;
    }
    {
        let chains = gc.strhash.borrow();
        sweep_chain_full(gc, &chains[idx]);
    }
    gc.sweepstr.set(idx + 1);
    idx + 1 > gc.strmask()
}

/// After a full sweep pass, shrink the string table if occupancy has
/// dropped to a quarter of capacity or below (and it is not already at the
/// floor size). Mirrors the reference's `strnum <= (strmask >> 2) &&
/// strmask > LJ_MIN_STRTAB*2-1` check at the end of `GCSsweep`.
pub fn maybe_shrink_strtab(gc: &Gc) {
    let strmask = gc.strmask();
    let strcount = gc.strcount.get();
    if strcount <= (strmask >> 2) && strmask + 1 > MIN_STRTAB {
        resize_strtab(gc, (strmask + 1) / 2);
    }
}

fn resize_strtab(gc: &Gc, new_size: usize) {
    let new_size = new_size.max(MIN_STRTAB);
    let new_mask = new_size - 1;
    let mut new_chains: Vec<Cell<GcRef>> = (0..new_size).map(|_| Cell::new(ptr::null_mut())).collect();
    {
        let old = gc.strhash.borrow();
        for chain in old.iter() {
            let mut cur = chain.get();
            while !cur.is_null() {
                let o = unsafe { &*cur };
                let next = o.next.get();
                let hash = match &o.obj {
                    GcObj::Str(s) => s.hash,
                    _ => 0,
                };
                let idx = hash as usize & new_mask;
                o.next.set(new_chains[idx].get());
                new_chains[idx].set(cur);
                cur = next;
            }
        }
    }
    *gc.strhash.borrow_mut() = new_chains;
    gc.strmask.set(new_mask);
    #[cfg(feature = "gc_logging")]
    debug!(new_size, "string table shrunk");
}

/// Shutdown sweep (`lj_gc_freeall`): free everything except super-fixed
/// objects. Done by masking `currentwhite` so every non-super-fixed object
/// reads as dead to `sweep_node`'s `WHITES` test, then running an
/// unconditional full sweep of `root`, `udata_root`, and every string
/// chain.
pub fn free_all(gc: &mut Gc) {
    gc.currentwhite.set(WHITES | crate::header::SUPERFIXED);
    sweep_chain_full(gc, &gc.root);
    sweep_chain_full(gc, &gc.udata_root);
    let strmask = gc.strmask();
    for i in 0..=strmask {
        let chains = gc.strhash.borrow();
        sweep_chain_full(gc, &chains[i]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::header::WHITE0;
    use crate::object::{GcObj, GcStr};
    use crate::state::Gc;

    #[test]
    fn dead_string_is_freed_white_one_is_kept() {
        let gc = Gc::new(GcConfig::default());
        let keep = gc.alloc(GcObj::Str(GcStr { hash: 1, bytes: Box::from(&b"keep"[..]) })).unwrap();
        let drop_ = gc.alloc(GcObj::Str(GcStr { hash: 2, bytes: Box::from(&b"drop"[..]) })).unwrap();
        unsafe {
            (*keep).header.white_to_gray();
            (*keep).header.gray_to_black();
        }
        // Flip currentwhite so `drop_`'s original white becomes "other white" (dead).
        let old = gc.current_white();
        gc.currentwhite.set(other_white(old));
        assert!(unsafe { (*drop_).header.is_dead(gc.current_white()) });
        for i in 0..=gc.strmask() {
            let chains = gc.strhash.borrow();
            sweep_chain_full(&gc, &chains[i]);
        }
        unsafe {
            assert!(!(*keep).header.is_white() || (*keep).header.marked() & gc.current_white() != 0);
        }
        let _ = WHITE0;
    }

    #[test]
    fn fixed_string_survives_even_when_other_white() {
        let gc = Gc::new(GcConfig::default());
        let fixed = gc.alloc(GcObj::Str(GcStr { hash: 3, bytes: Box::from(&b"fixed"[..]) })).unwrap();
        unsafe { (*fixed).header.fix() };
        let old = gc.current_white();
        gc.currentwhite.set(other_white(old));
        for i in 0..=gc.strmask() {
            let chains = gc.strhash.borrow();
            sweep_chain_full(&gc, &chains[i]);
        }
        unsafe {
            assert!((*fixed).header.is_fixed());
            assert!(!(*fixed).header.is_dead(gc.current_white()), "a fixed object is never freed by a normal sweep");
        }
    }

    #[test]
    fn sweep_step_processes_root_then_udata() {
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
        let _ = t;
        let processed = sweep_step(&gc, 100);
        assert!(processed >= 1);
        assert!(sweep_done(&gc));
    }
}
