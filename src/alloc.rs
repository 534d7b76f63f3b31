//! Allocator shim (component J): a single conceptual function,
//! `realloc(p, old_size, new_size)`, that accounts every byte delta into
//! `total` and reports out-of-memory. spec.md keeps the actual memory
//! allocation external (a pluggable `alloc(ud, ptr, old_size, new_size)`);
//! this module owns only the accounting contract `Gc::account`/`Gc::alloc`
//! are built on.

use std::ptr;

use crate::error::{Error, Result};
use crate::object::{GcBox, GcObj, GcRef};
use crate::state::Gc;

/// `total = total - old_size + new_size`. `new_size == 0` frees;
/// `old_size == 0 && new_size > 0` allocates. A growth that would overflow
/// `total` raises `OutOfMemory` rather than panicking — the one case this
/// shim can actually detect without a real allocator behind it.
pub fn realloc_account(gc: &Gc, old_size: usize, new_size: usize) -> Result<()> {
    gc.account(old_size, new_size)
}

/// `new_gco`: link at the home list's head with `new_white` and age `New`.
///
/// Strings are never linked onto `root` — they live in the interned-string
/// hash chains (`gc.strhash`), per spec.md §3's "master list of all
/// collectables *except* internalized strings". Userdata get a second,
/// parallel home list (`udata_root`) alongside the shared string/table/etc.
/// `root` list, mirroring the reference's separate `mainthread->nextgc`
/// chain (spec.md §4.H's `udatasur`/`udataold`/`udatarold` triple operates
/// on exactly this list, disjoint from the `survival`/`old`/`reallyold`
/// triple on `root`).
pub fn new_gco(gc: &Gc, payload: GcObj) -> Result<GcRef> {
    let size = std::mem::size_of::<GcBox>();
    realloc_account(gc, 0, size).map_err(|e| match e {
        Error::OutOfMemory { requested } => Error::OutOfMemory { requested },
        other => other,
    })?;
    let boxed = GcBox::new(gc.current_white(), payload);
    let raw = Box::into_raw(boxed);
    unsafe {
        match &(*raw).obj {
            GcObj::Str(s) => gc.link_string(raw, s.hash),
            GcObj::Userdata(_) => {
                (*raw).next.set(gc.udata_root.get());
                gc.udata_root.set(raw);
            }
            _ => {
                (*raw).next.set(gc.root.get());
                gc.root.set(raw);
            }
        }
    }
    Ok(raw)
}

/// Frees one dead object: drops its boxed payload and reports the freed
/// bytes back into `total`. Dispatch is the tagged-union `match` spec.md
/// §9 asks safe-language implementers to use in place of a `type_tag`
/// jump table.
pub fn free_one(gc: &Gc, r: GcRef) {
    let size = unsafe { (*r).approx_size() };
    let _ = realloc_account(gc, size, 0);
    unsafe {
        if matches!((*r).obj, GcObj::Str(_)) {
            gc.strcount.set(gc.strcount.get().saturating_sub(1));
        }
        drop(Box::from_raw(r));
    }
}

#[inline]
pub(crate) fn null() -> GcRef {
    ptr::null_mut()
}
