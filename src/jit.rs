//! The narrow JIT contract: the collector only ever asks "is a compiled
//! trace currently executing?" It never inspects trace internals through
//! this boundary — trace objects that live on the heap are ordinary
//! `GcObj::Trace` nodes traced like anything else (see `mark.rs`).

/// Queried by the atomic step (spec.md §4.D: "Refuses to start if currently
/// executing a JIT trace") and by the finalizer runner, which must not run
/// a finalizer while a trace is on the native call stack.
pub trait JitState {
    fn trace_running(&self) -> bool;
}

/// Default host with no JIT attached: traces never run, so the collector
/// never defers to this contract.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJit;

impl JitState for NoJit {
    fn trace_running(&self) -> bool {
        false
    }
}

/// Test/embedding helper: a flag the host flips around simulated trace
/// execution.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlagJit(pub bool);

impl JitState for FlagJit {
    fn trace_running(&self) -> bool {
        self.0
    }
}
