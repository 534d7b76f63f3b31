//! Generational overlay (component H): young-cycle collection layered on
//! the same tri-color machinery in `mark.rs`/`barrier.rs`, plus the mode
//! switches `enter_gen`/`enter_inc` and the scheduler `gen_step`/`full_gen`.
//!
//! A young (minor) cycle rests at `GcState::Pause` both before and after it
//! runs — it dips through `Atomic` only transiently, by calling straight
//! into the atomic step (`atomic.rs`) the same way the reference
//! collector's `youngcollection` calls `atomic()` directly, then resets the
//! state back to `Pause` once swept. Resting at `Pause` between cycles is
//! what keeps the write barriers' "not in mark phase" branch active (see
//! `barrier.rs`): a mutator write from a black, old object to a white young
//! one demotes the writer back to white rather than chasing the new edge
//! immediately, and the next young cycle's [`process_old_segment`] picks
//! every such demoted old object back up.
//! Full (major) cycles are not reimplemented here — they delegate straight
//! to the incremental driver's `full_gc` under a temporarily-swapped `kind`,
//! then re-baseline every survivor's age to `Old`.

use std::cell::Cell;

use crate::error::Result;
use crate::header::Age;
use crate::object::GcRef;
use crate::state::{Gc, GcKind, StepResult};

#[cfg(feature = "gc_logging")]
use tracing::debug;

/// Switches a running incremental collector into generational mode: forces
/// one full incremental cycle so every surviving object's liveness is
/// freshly known, then ages the whole heap to `Old` as the generational
/// baseline.
pub fn enter_gen(gc: &mut Gc) -> Result<()> {
    crate::driver::full_gc(gc)?;
    age_whole_heap(gc);
    gc.estimate.set(gc.total());
    gc.set_kind(GcKind::Generational);
    #[cfg(feature = "gc_logging")]
    debug!("entered generational mode");
    Ok(())
}

/// Switches back to incremental mode: runs one more full cycle under the
/// generational scheduler's own bookkeeping, then resumes incremental
/// scheduling from `Pause`.
pub fn enter_inc(gc: &mut Gc) -> Result<()> {
    full_gen(gc)?;
    gc.set_kind(GcKind::Incremental);
    #[cfg(feature = "gc_logging")]
    debug!("entered incremental mode");
    Ok(())
}

fn age_whole_heap(gc: &Gc) {
    set_chain_age(gc.root.get(), Age::Old);
    set_chain_age(gc.udata_root.get(), Age::Old);
}

fn set_chain_age(mut cur: GcRef, age: Age) {
    while !cur.is_null() {
        let o = unsafe { &*cur };
        o.header.set_age(age);
        cur = o.next.get();
    }
}

/// `gc_correctgraylist` equivalent: converts last cycle's `grayagain` (every
/// thread, every strong table, and every backward-barrier-touched object)
/// into this cycle's initial `gray` set. `Touched2` objects (untouched for
/// a full cycle) drop off the list and settle at `Old`; `Touched1` objects
/// advance to `Touched2` and stay parked for one more cycle's worth of
/// scrutiny; everything else is whitened and re-marked unconditionally.
fn correct_graylists(gc: &Gc) {
    let mut cur = gc.grayagain.get();
    gc.grayagain.set(std::ptr::null_mut());
    while !cur.is_null() {
        let o = unsafe { &*cur };
        let next = o.gclist.get();
        o.gclist.set(std::ptr::null_mut());
        match o.header.get_age() {
            Age::Touched2 => {
                o.header.set_age(Age::Old);
            }
            Age::Touched1 => {
                o.header.set_age(Age::Touched2);
                o.header.make_white(gc.current_white());
                push_gray(gc, cur);
            }
            _ => {
                o.header.make_white(gc.current_white());
                push_gray(gc, cur);
            }
        }
        cur = next;
    }
}

fn push_gray(gc: &Gc, r: GcRef) {
    unsafe { (*r).gclist.set(gc.gray.get()) };
    gc.gray.set(r);
}

/// `markold`: walks one home list looking for old objects this cycle must
/// not skip — either flagged `Old0` by the forward barrier's mark-phase
/// path, or demoted back to white by its mutator-time path (`barrier.rs`'s
/// "not in mark phase" branch, which doesn't distinguish generational from
/// incremental mode and so just whitens the writer). Either way, a white
/// old object may hold the only surviving path to a young object, so it is
/// re-marked. `Old1` objects that were never touched advance straight to
/// the stable `Old` age.
fn process_old_segment(gc: &Gc, head: &Cell<GcRef>) {
    let mut cur = head.get();
    while !cur.is_null() {
        let o = unsafe { &*cur };
        let age = o.header.get_age();
        if age == Age::Old1 && !o.header.is_white() {
            o.header.set_age(Age::Old);
        } else if o.header.is_old() && o.header.is_white() {
            crate::mark::mark(gc, cur);
            if age == Age::Old0 {
                o.header.set_age(Age::Old1);
            }
        }
        cur = o.next.get();
    }
}

/// Sweeps one home list's young (non-`is_old`) objects only: unreached
/// ones are freed, reached ones advance one step along [`Age::next`] and
/// are recolored current-white unless that step made them old (in which
/// case their color is irrelevant until they are next touched). Old
/// objects are left entirely alone — generational young cycles never
/// reclaim old garbage; that is a full cycle's job.
fn sweep_young(gc: &Gc, head: &Cell<GcRef>) -> usize {
    let mut freed = 0;
    let mut prev: Option<GcRef> = None;
    let mut cur = head.get();
    while !cur.is_null() {
        let o = unsafe { &*cur };
        let next = o.next.get();
        if o.header.is_old() {
            prev = Some(cur);
            cur = next;
            continue;
        }
        if o.header.is_white() {
            match prev {
                Some(p) => unsafe { (*p).next.set(next) },
                None => head.set(next),
            }
            freed += unsafe { o.approx_size() };
            crate::alloc::free_one(gc, cur);
            cur = next;
            continue;
        }
        let advanced = o.header.get_age().next();
        o.header.set_age(advanced);
        if !advanced.is_old() {
            o.header.make_white(gc.current_white());
        }
        prev = Some(cur);
        cur = next;
    }
    freed
}

/// One young (minor) collection, per spec.md §4.H: mark every old object
/// due for rescanning, run the atomic step (which remarks the main
/// thread/registry/gcroots/current trace, drains whatever that pulls onto
/// `gray`, separates and marks finalizable userdata, clears weak tables,
/// and flips `currentwhite` — `lj_gc.c`'s `youngcollection` calls `atomic`
/// directly for exactly this), sweep the young partition, correct the
/// gray lists the atomic pass just repopulated (every thread and every
/// fully-strong table it revisited), and drain `mmudata`.
///
/// `atomic::run` transitions through `GcState::Atomic` internally but that
/// is purely transient: once it returns, this function resets the state
/// back to `Pause`, which is this crate's resting state between young
/// cycles (see the module doc comment on why write barriers rely on that).
fn young_collection(gc: &mut Gc) -> Result<usize> {
    process_old_segment(gc, &gc.root);
    process_old_segment(gc, &gc.udata_root);
    if !crate::atomic::run(gc) {
        // A trace started running between `gen_step`'s check and here;
        // the caller will retry on the next step.
        return Ok(0);
    }
    let freed = sweep_young(gc, &gc.root) + sweep_young(gc, &gc.udata_root);
    correct_graylists(gc);
    gc.set_state(crate::state::GcState::Pause);
    crate::finalize::finalize_all(gc)?;
    Ok(freed)
}

/// Forces one full generational (major) cycle by delegating to the
/// incremental driver under a temporarily-swapped `kind` — a full cycle's
/// mark/atomic/sweep/finalize sequence is identical either way, only the
/// scheduling differs. Afterward every survivor is re-baselined to `Old`
/// and `estimate` is recorded as this cycle's live-set size, exactly as
/// `enter_gen` does when first switching modes.
pub fn full_gen(gc: &mut Gc) -> Result<()> {
    gc.set_kind(GcKind::Incremental);
    let result = crate::driver::full_gc(gc);
    gc.set_kind(GcKind::Generational);
    result?;
    age_whole_heap(gc);
    gc.estimate.set(gc.total());
    #[cfg(feature = "gc_logging")]
    debug!(estimate = gc.total(), "full generational cycle completed");
    Ok(())
}

/// `genstep`: a full cycle when `total` has grown past `genmajormul`
/// percent over the last major cycle's `estimate`; a young collection
/// otherwise, with `threshold` re-armed at `genminormul` percent over the
/// resulting `total`.
pub fn gen_step(gc: &mut Gc) -> Result<StepResult> {
    if gc.jit.trace_running() {
        return Ok(StepResult::Slack);
    }
    let estimate = gc.estimate.get().max(1);
    let genmajormul = gc.tunables.genmajormul() as usize;
    let major_threshold = estimate + (estimate / 100) * genmajormul;
    if gc.total.get() >= major_threshold {
        full_gen(gc)?;
        return Ok(StepResult::CycleCompleted);
    }
    young_collection(gc)?;
    let genminormul = gc.tunables.genminormul() as usize;
    let total = gc.total.get();
    gc.threshold.set(total + (total / 100) * genminormul);
    Ok(StepResult::StepTaken)
}
