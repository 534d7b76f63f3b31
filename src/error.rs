//! Typed error surface. spec.md §7 describes error *kinds* (the original is
//! a C codebase that propagates them via `longjmp`); this crate returns them
//! instead, since a Rust embedding has `Result` available.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("out of memory (requested {requested} bytes)")]
    OutOfMemory { requested: usize },

    /// Raised by `finalize_one`/`finalize_all` when the host's
    /// protected-call boundary reports that a finalizer threw. By the time
    /// this is returned, collector state has already been fully restored
    /// (object re-linked to its home list, made white, `FINALIZED` set) —
    /// a pending error never leaves the collector mid-transition.
    #[error("finalizer error: {0}")]
    Finalizer(String),
}

pub type Result<T> = std::result::Result<T, Error>;
