//! # rtgc
//!
//! Tri-color incremental mark-and-sweep, with a generational overlay on the
//! same machinery, for an embeddable dynamic-language runtime.
//!
//! ## Design
//!
//! - **Incremental cycle**: `Pause -> Propagate -> Atomic -> SweepString ->
//!   Sweep -> Finalize -> Pause`, driven in small byte-budgeted steps by
//!   [`Gc::step`], or forced to completion by [`Gc::full_gc`].
//! - **Generational overlay**: young collections reuse the same tri-color
//!   worklists and color bits, layered with a 3-bit age field and the
//!   write-barrier age promotions in [`barrier`]; switch with
//!   [`Gc::change_mode`].
//! - **Single-threaded, cooperative**: every piece of collector state is a
//!   `Cell`/`RefCell`, never an atomic — [`Gc`] is `!Send`/`!Sync` by
//!   construction, not just by convention.
//!
//! A host embeds this crate by implementing [`jit::JitState`] (or using
//! [`jit::NoJit`]), allocating objects through [`Gc::alloc`], calling
//! [`Gc::check`] at allocation sites, and routing every store through the
//! barrier predicate [`barrier::should_barrier`].

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod alloc;
pub mod atomic;
pub mod barrier;
pub mod config;
pub mod driver;
pub mod error;
pub mod finalize;
pub mod generational;
pub mod header;
pub mod jit;
pub mod mark;
pub mod object;
pub mod roots;
pub mod state;
pub mod sweep;

pub use config::GcConfig;
pub use error::{Error, Result};
pub use header::{Age, GcHeader};
pub use jit::{FlagJit, JitState, NoJit};
pub use object::{
    FinalizerFn, FuncKind, GcBox, GcForeign, GcFunc, GcObj, GcProto, GcRef, GcStr, GcTable, GcThread, GcUpval,
    GcUserdata, TypeTag, Value,
};
pub use state::{Gc, GcKind, GcState, StepResult};
