//! Incremental driver (component G): the byte-budgeted step scheduler that
//! walks the collector through `Pause -> Propagate -> Atomic -> SweepString
//! -> Sweep -> Finalize -> Pause`, one bounded unit of work per call to
//! [`step`], plus [`full_gc`] which forces a complete cycle regardless of
//! budget.

use crate::config::{FINALIZECOST, MAX_MEM, SWEEPCOST, SWEEPMAX, STEPSIZE};
use crate::error::Result;
use crate::state::{Gc, GcKind, GcState, StepResult};

#[cfg(feature = "gc_logging")]
use tracing::debug;

/// Runs one atomic unit of whatever the current state calls for and
/// returns its cost in bytes, or `MAX_MEM` as a sentinel meaning "deferred,
/// a trace is executing" (only ever returned from `Atomic`).
fn gc_onestep(gc: &mut Gc) -> Result<usize> {
    match gc.state() {
        GcState::Pause => {
            crate::roots::start_cycle(gc);
            Ok(0)
        }
        GcState::Propagate => {
            if !gc.gray.get().is_null() {
                Ok(crate::mark::propagate_one(gc))
            } else {
                gc.set_state(GcState::Atomic);
                Ok(0)
            }
        }
        GcState::Atomic => {
            if !crate::atomic::run(gc) {
                return Ok(MAX_MEM);
            }
            gc.sweepstr.set(0);
            gc.set_state(GcState::SweepString);
            Ok(0)
        }
        GcState::SweepString => {
            let done = crate::sweep::sweep_string_step(gc);
            if done {
                crate::sweep::reset_cursor(gc);
                gc.set_state(GcState::Sweep);
            }
            Ok(SWEEPCOST)
        }
        GcState::Sweep => {
            let n = crate::sweep::sweep_step(gc, SWEEPMAX);
            if crate::sweep::sweep_done(gc) {
                crate::sweep::maybe_shrink_strtab(gc);
                if !gc.mmudata.get().is_null() {
                    gc.set_state(GcState::Finalize);
                } else {
                    gc.set_state(GcState::Pause);
                }
            }
            Ok(n * SWEEPCOST)
        }
        GcState::Finalize => {
            if !gc.mmudata.get().is_null() {
                crate::finalize::finalize_one(gc)?;
                if gc.mmudata.get().is_null() {
                    gc.set_state(GcState::Pause);
                }
                Ok(FINALIZECOST)
            } else {
                gc.set_state(GcState::Pause);
                Ok(0)
            }
        }
    }
}

/// `threshold = (estimate / 100) * pause`, computed once a cycle reaches
/// `Pause` again — the point at which the next cycle's growth allowance is
/// fixed against this cycle's live-set estimate.
fn finish_cycle(gc: &Gc) {
    let pause = gc.tunables.pause() as usize;
    let threshold = (gc.estimate.get().saturating_div(100)).saturating_mul(pause);
    gc.threshold.set(threshold.max(gc.total()));
    gc.debt.set(0);
    #[cfg(feature = "gc_logging")]
    debug!(threshold, "gc cycle completed");
}

/// `lj_gc_step`: drives enough steps to cover this call's byte budget
/// (`stepmul` percent of `STEPSIZE`, carried over call to call via `debt`),
/// stopping early if a full cycle completes or a trace defers the atomic
/// step. Generational mode delegates entirely to [`crate::generational::gen_step`].
pub fn step(gc: &mut Gc) -> Result<StepResult> {
    if gc.kind() == GcKind::Generational {
        return crate::generational::gen_step(gc);
    }
    let mut lim = (STEPSIZE as u64 * gc.tunables.stepmul() as u64 / 100) as isize;
    if lim == 0 {
        lim = MAX_MEM as isize;
    }
    if gc.total.get() > gc.threshold.get() {
        let overshoot = (gc.total.get() - gc.threshold.get()) as isize;
        gc.debt.set(gc.debt.get() + overshoot);
    }
    loop {
        let cost = gc_onestep(gc)?;
        lim -= cost as isize;
        if gc.state() == GcState::Pause {
            finish_cycle(gc);
            return Ok(StepResult::CycleCompleted);
        }
        if lim <= 0 {
            break;
        }
    }
    if gc.debt.get() < STEPSIZE as isize {
        gc.threshold.set(gc.total.get() + STEPSIZE);
        Ok(StepResult::Slack)
    } else {
        gc.debt.set(gc.debt.get() - STEPSIZE as isize);
        gc.threshold.set(gc.total.get());
        Ok(StepResult::StepTaken)
    }
}

/// `lj_gc_fullgc`: forces a complete cycle. If one is already in progress,
/// finishes it first, then runs a second complete cycle from `Pause` to
/// `Pause` so every currently-live object is guaranteed to have been marked
/// and swept at least once under this call. Assumes (like the reference)
/// that no JIT trace is executing at the call site — a full collection is a
/// stop-the-world operation the host issues between traces, not during one.
pub fn full_gc(gc: &mut Gc) -> Result<()> {
    if gc.kind() == GcKind::Generational {
        return crate::generational::full_gen(gc);
    }
    if gc.state() != GcState::Pause {
        run_to_pause(gc)?;
    }
    run_to_pause(gc)?;
    Ok(())
}

fn run_to_pause(gc: &mut Gc) -> Result<()> {
    loop {
        let cost = gc_onestep(gc)?;
        if cost == MAX_MEM {
            continue;
        }
        if gc.state() == GcState::Pause {
            finish_cycle(gc);
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;

    #[test]
    fn full_gc_returns_to_pause_with_a_fresh_threshold() {
        let mut gc = Gc::new(GcConfig::default());
        full_gc(&mut gc).unwrap();
        assert_eq!(gc.state(), GcState::Pause);
        assert!(gc.threshold() >= gc.total());
    }

    #[test]
    fn step_eventually_completes_a_cycle_on_an_empty_heap() {
        let mut gc = Gc::new(GcConfig::default());
        let mut completed = false;
        for _ in 0..64 {
            if step(&mut gc).unwrap() == StepResult::CycleCompleted {
                completed = true;
                break;
            }
        }
        assert!(completed, "an empty heap should finish a cycle quickly");
    }
}
