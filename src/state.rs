//! `Gc`: the single struct holding all collector state (spec.md §3's global
//! state `G`), and the public entry points of spec.md §6.

use std::cell::{Cell, RefCell};
use std::ptr;

use crate::config::{GcConfig, Tunables};
use crate::error::{Error, Result};
use crate::header::WHITE0;
use crate::jit::JitState;
use crate::object::{FinalizerFn, GcObj, GcRef, Value};

#[cfg(feature = "gc_logging")]
use tracing::{debug, info_span};

/// `state` field of `G`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    Pause,
    Propagate,
    Atomic,
    SweepString,
    Sweep,
    Finalize,
}

/// `kind` field of `G`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcKind {
    Incremental,
    Generational,
}

/// Return value of [`Gc::step`]: 1 = cycle completed, 0 = step taken,
/// -1 = below-threshold slack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    CycleCompleted,
    StepTaken,
    Slack,
}

/// Global collector state. `!Send`/`!Sync` by construction (every field
/// below is a raw-pointer `Cell` or a `RefCell`, with no interior
/// synchronization) — the single-threaded, cooperative scheduling model of
/// spec.md §5 is a type-level fact here, not just a comment.
pub struct Gc {
    pub(crate) root: Cell<GcRef>,
    pub(crate) udata_root: Cell<GcRef>,

    pub(crate) strhash: RefCell<Vec<Cell<GcRef>>>,
    pub(crate) strmask: Cell<usize>,
    pub(crate) strcount: Cell<usize>,
    pub(crate) sweepstr: Cell<usize>,

    pub(crate) gray: Cell<GcRef>,
    pub(crate) grayagain: Cell<GcRef>,
    pub(crate) weak: Cell<GcRef>,
    pub(crate) mmudata: Cell<GcRef>,

    pub(crate) sweep_cursor: Cell<Option<GcRef>>,
    pub(crate) sweep_cursor_is_udata: Cell<bool>,

    state: Cell<GcState>,
    kind: Cell<GcKind>,
    pub(crate) currentwhite: Cell<u8>,

    pub(crate) total: Cell<usize>,
    pub(crate) estimate: Cell<usize>,
    pub(crate) threshold: Cell<usize>,
    pub(crate) debt: Cell<isize>,

    pub(crate) tunables: Tunables,

    pub(crate) survival: Cell<GcRef>,
    pub(crate) old: Cell<GcRef>,
    pub(crate) reallyold: Cell<GcRef>,
    pub(crate) udatasur: Cell<GcRef>,
    pub(crate) udataold: Cell<GcRef>,
    pub(crate) udatarold: Cell<GcRef>,

    pub(crate) uvhead: Cell<GcRef>,

    pub main_thread: Cell<GcRef>,
    pub registry: Cell<Value>,
    pub gcroots: RefCell<Vec<Value>>,
    pub current_trace: Cell<Option<GcRef>>,

    pub(crate) foreign_finalizers: RefCell<crate::finalize::ForeignFinalizers>,

    pub(crate) jit: Box<dyn JitState>,
}

/// Initial string-hash-chain array size; `strmask = STRHASH_INIT - 1`.
const STRHASH_INIT: usize = 64;

impl Gc {
    pub fn new(config: GcConfig) -> Gc {
        Gc::with_jit(config, Box::new(crate::jit::NoJit))
    }

    pub fn with_jit(config: GcConfig, jit: Box<dyn JitState>) -> Gc {
        let strhash = (0..STRHASH_INIT).map(|_| Cell::new(ptr::null_mut())).collect();
        Gc {
            root: Cell::new(ptr::null_mut()),
            udata_root: Cell::new(ptr::null_mut()),
            strhash: RefCell::new(strhash),
            strmask: Cell::new(STRHASH_INIT - 1),
            strcount: Cell::new(0),
            sweepstr: Cell::new(0),
            gray: Cell::new(ptr::null_mut()),
            grayagain: Cell::new(ptr::null_mut()),
            weak: Cell::new(ptr::null_mut()),
            mmudata: Cell::new(ptr::null_mut()),
            sweep_cursor: Cell::new(None),
            sweep_cursor_is_udata: Cell::new(false),
            state: Cell::new(GcState::Pause),
            kind: Cell::new(GcKind::Incremental),
            currentwhite: Cell::new(WHITE0),
            total: Cell::new(0),
            estimate: Cell::new(0),
            threshold: Cell::new(usize::MAX),
            debt: Cell::new(0),
            tunables: config.into(),
            survival: Cell::new(ptr::null_mut()),
            old: Cell::new(ptr::null_mut()),
            reallyold: Cell::new(ptr::null_mut()),
            udatasur: Cell::new(ptr::null_mut()),
            udataold: Cell::new(ptr::null_mut()),
            udatarold: Cell::new(ptr::null_mut()),
            uvhead: Cell::new(ptr::null_mut()),
            main_thread: Cell::new(ptr::null_mut()),
            registry: Cell::new(Value::Nil),
            gcroots: RefCell::new(Vec::new()),
            current_trace: Cell::new(None),
            foreign_finalizers: RefCell::new(crate::finalize::ForeignFinalizers::default()),
            jit,
        }
    }

    #[inline]
    pub fn state(&self) -> GcState {
        self.state.get()
    }

    #[inline]
    pub fn set_state(&self, s: GcState) {
        #[cfg(feature = "gc_logging")]
        debug!(from = ?self.state.get(), to = ?s, "gc state transition");
        self.state.set(s);
    }

    #[inline]
    pub fn kind(&self) -> GcKind {
        self.kind.get()
    }

    #[inline]
    pub fn current_white(&self) -> u8 {
        self.currentwhite.get()
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.total.get()
    }

    #[inline]
    pub fn threshold(&self) -> usize {
        self.threshold.get()
    }

    /// Links a freshly-allocated object at the head of its home list
    /// (`root`, `udata_root`, or a string hash chain), current-white, age
    /// `New`. Mirrors `new_gco` (spec.md §4.J).
    pub fn alloc(&self, payload: GcObj) -> Result<GcRef> {
        crate::alloc::new_gco(self, payload)
    }

    #[inline]
    pub fn strmask(&self) -> usize {
        self.strmask.get()
    }

    /// Links a freshly-boxed string node at the head of its hash chain
    /// (`hash & strmask`), bumping `strcount`.
    pub(crate) fn link_string(&self, r: GcRef, hash: u32) {
        let mask = self.strmask.get();
        let idx = hash as usize & mask;
        let chains = self.strhash.borrow();
        let cell = &chains[idx];
        unsafe {
            (*r).next.set(cell.get());
        }
        cell.set(r);
        self.strcount.set(self.strcount.get() + 1);
    }

    /// `realloc(p, old_size, new_size)`: byte accounting only — payload
    /// resizing within an object (e.g. a table's array part) happens
    /// through the mutator's own `RefCell<Vec<_>>` mutation; this just
    /// keeps `total` truthful for the step scheduler. `new_size == 0`
    /// frees; `old_size == 0 && new_size > 0` allocates.
    pub fn account(&self, old_size: usize, new_size: usize) -> Result<()> {
        let total = self.total.get();
        let updated = if new_size >= old_size {
            total.checked_add(new_size - old_size)
        } else {
            Some(total - (old_size - new_size))
        };
        match updated {
            Some(t) => {
                self.total.set(t);
                Ok(())
            }
            None => Err(Error::OutOfMemory { requested: new_size }),
        }
    }

    /// `lj_gc_check`: if `total >= threshold`, drive one step.
    #[inline]
    pub fn check(&mut self) -> Result<()> {
        if self.total.get() >= self.threshold.get() {
            self.step()?;
        }
        Ok(())
    }

    pub fn step(&mut self) -> Result<StepResult> {
        crate::driver::step(self)
    }

    pub fn full_gc(&mut self) -> Result<()> {
        crate::driver::full_gc(self)
    }

    pub fn change_mode(&mut self, kind: GcKind) -> Result<()> {
        match (self.kind.get(), kind) {
            (GcKind::Incremental, GcKind::Generational) => crate::generational::enter_gen(self),
            (GcKind::Generational, GcKind::Incremental) => crate::generational::enter_inc(self),
            _ => Ok(()),
        }
    }

    pub(crate) fn set_kind(&self, kind: GcKind) {
        self.kind.set(kind);
    }

    pub fn close_upvalue(&mut self, uv: GcRef) {
        crate::barrier::barrier_uv(self, uv);
    }

    /// Shutdown sweep: free everything except super-fixed objects.
    pub fn free_all(&mut self) {
        crate::sweep::free_all(self);
    }

    pub fn finalize_all_udata(&mut self) -> Result<()> {
        crate::finalize::finalize_all(self)
    }

    pub fn finalize_all_cdata(&mut self) -> Result<()> {
        crate::finalize::finalize_all_foreign(self)
    }

    pub fn register_foreign_finalizer(&self, r: GcRef, f: FinalizerFn) {
        self.foreign_finalizers.borrow_mut().insert(r, f);
        unsafe {
            if let GcObj::Foreign(_) = &(*r).obj {
                (*r).header.set_foreign_fin(true);
            }
        }
    }

    #[cfg(feature = "gc_logging")]
    pub(crate) fn span(name: &'static str) -> tracing::span::EnteredSpan {
        info_span!("gc", phase = name).entered()
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        self.free_all();
    }
}
