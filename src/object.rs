//! The object-header discriminated union and the small mutator-value
//! representation used to drive the collector.
//!
//! Concrete runtimes embedding this crate will have their own, richer value
//! type; `Value`/`GcObj` here are the minimal stand-in spec.md §1 calls for
//! ("the mutator's value representation beyond 'value may or may not
//! reference a collectable object'"), just enough to exercise every
//! component and to write realistic tests against.

use std::cell::{Cell, RefCell};
use std::ptr;

use crate::header::GcHeader;

/// Raw pointer to a heap node. Never null when wrapped in `Value::Obj`;
/// `GcBox`'s own intrusive links use it directly and may be null (end of
/// list).
pub type GcRef = *mut GcBox;

/// A mutator-visible value: either an immediate or a reference to a
/// collectable object.
#[derive(Clone, Copy)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Obj(GcRef),
}

impl Value {
    #[inline]
    pub fn as_obj(&self) -> Option<GcRef> {
        match self {
            Value::Obj(r) => Some(*r),
            _ => None,
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

/// The header-discriminated union. The payload enum's own discriminant
/// stands in for the C header's stored `type_tag` byte (see `GcHeader`'s
/// doc comment) — `GcBox::type_tag` reads it straight off `self.obj`
/// instead of carrying a second, redundant field that could drift out of
/// sync with it.
pub enum GcObj {
    Str(GcStr),
    Upval(GcUpval),
    Thread(GcThread),
    Proto(GcProto),
    Func(GcFunc),
    Trace(GcTrace),
    Foreign(GcForeign),
    Table(GcTable),
    Userdata(GcUserdata),
}

/// Stable tag recovered from a `GcObj`'s discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Str,
    Upval,
    Thread,
    Proto,
    Func,
    Trace,
    Foreign,
    Table,
    Userdata,
}

impl GcObj {
    #[inline]
    pub fn tag(&self) -> TypeTag {
        match self {
            GcObj::Str(_) => TypeTag::Str,
            GcObj::Upval(_) => TypeTag::Upval,
            GcObj::Thread(_) => TypeTag::Thread,
            GcObj::Proto(_) => TypeTag::Proto,
            GcObj::Func(_) => TypeTag::Func,
            GcObj::Trace(_) => TypeTag::Trace,
            GcObj::Foreign(_) => TypeTag::Foreign,
            GcObj::Table(_) => TypeTag::Table,
            GcObj::Userdata(_) => TypeTag::Userdata,
        }
    }
}

/// The common node every collectable object is boxed in: header plus the
/// two intrusive links (`next` into the master list or a string hash
/// chain, `gclist` into the gray/gray-again/weak worklists) plus the
/// payload.
pub struct GcBox {
    pub header: GcHeader,
    pub next: Cell<GcRef>,
    pub gclist: Cell<GcRef>,
    pub obj: GcObj,
}

impl GcBox {
    pub fn new(current_white: u8, obj: GcObj) -> Box<GcBox> {
        Box::new(GcBox {
            header: GcHeader::new(current_white),
            next: Cell::new(ptr::null_mut()),
            gclist: Cell::new(ptr::null_mut()),
            obj,
        })
    }

    #[inline]
    pub fn type_tag(&self) -> TypeTag {
        self.obj.tag()
    }

    /// Approximate resident size in bytes, used for the byte-accounting the
    /// sweep/propagate engines report to the allocator shim. Not exact (no
    /// allocator introspection here) — proportional to each variant's
    /// payload.
    pub fn approx_size(&self) -> usize {
        let base = std::mem::size_of::<GcBox>();
        base + match &self.obj {
            GcObj::Str(s) => s.bytes.len(),
            GcObj::Upval(_) => 0,
            GcObj::Thread(t) => t.stack.borrow().len() * std::mem::size_of::<Value>(),
            GcObj::Proto(p) => p.consts.borrow().len() * std::mem::size_of::<Value>(),
            GcObj::Func(GcFunc { kind: FuncKind::Lua { upvals, .. }, .. }) => {
                upvals.borrow().len() * std::mem::size_of::<GcRef>()
            }
            GcObj::Func(GcFunc { kind: FuncKind::Host { upvals }, .. }) => {
                upvals.borrow().len() * std::mem::size_of::<Value>()
            }
            GcObj::Trace(tr) => tr.consts.borrow().len() * std::mem::size_of::<GcRef>(),
            GcObj::Foreign(f) => f.payload_len,
            GcObj::Table(t) => {
                t.array.borrow().len() * std::mem::size_of::<Value>()
                    + t.hash.borrow().len() * std::mem::size_of::<(Value, Value)>()
            }
            GcObj::Userdata(u) => u.payload_len,
        }
    }
}

/// Interned string node. String *contents* (hashing/insertion/dedup) are an
/// external collaborator per spec.md §1 — this struct is the collectable
/// wrapper the GC walks and frees, not the interning table itself.
pub struct GcStr {
    pub hash: u32,
    pub bytes: Box<[u8]>,
}

/// An upvalue: open while it aliases a live stack slot, closed once it owns
/// its value. Real runtimes alias the actual stack cell while open; this
/// stand-in mirrors the current value into the upvalue itself, which is
/// sufficient to drive mark/barrier logic and tests without a full stack
/// implementation.
pub struct GcUpval {
    pub open: Cell<bool>,
    pub value: Cell<Value>,
    /// Intrusive doubly-linked placement on `Gc::uvhead` while open, so the
    /// atomic step's open-upvalue remark (spec.md §4.D step 3) can walk
    /// every thread's open upvalues without a separate per-thread list.
    pub uv_prev: Cell<GcRef>,
    pub uv_next: Cell<GcRef>,
}

pub struct GcThread {
    pub stack: RefCell<Vec<Value>>,
    pub top: Cell<usize>,
    pub env: Cell<GcRef>,
    /// Head of this thread's open-upvalue list (GcUpval nodes), threaded
    /// through `uv_prev`/`uv_next`.
    pub openupval: Cell<GcRef>,
}

pub struct GcProto {
    pub chunkname: Cell<GcRef>,
    pub consts: RefCell<Vec<Value>>,
    pub trace: Cell<Option<GcRef>>,
}

pub enum FuncKind {
    /// Script-language closure: a prototype plus one heap `GcUpval` per
    /// captured variable.
    Lua { proto: Cell<GcRef>, upvals: RefCell<Vec<GcRef>> },
    /// Host (native) closure: an inline array of values, no separate
    /// upvalue objects.
    Host { upvals: RefCell<Vec<Value>> },
}

pub struct GcFunc {
    pub env: Cell<GcRef>,
    pub kind: FuncKind,
}

pub struct GcTrace {
    pub consts: RefCell<Vec<GcRef>>,
    pub link: Cell<Option<GcRef>>,
    pub nextroot: Cell<Option<GcRef>>,
    pub nextside: Cell<Option<GcRef>>,
    pub startpt: Cell<GcRef>,
}

/// Foreign-data object (cdata-equivalent): opaque payload plus a finalizer
/// looked up in `finalize::ForeignFinalizers`, not a metatable (foreign-data
/// has none).
pub struct GcForeign {
    pub payload_len: usize,
}

/// A finalizer closure, shared (not owned) because the same closure value
/// may be looked up repeatedly without re-running mutator code to fetch it.
pub type FinalizerFn = std::rc::Rc<dyn Fn(GcRef)>;

pub struct GcTable {
    pub metatable: Cell<Option<GcRef>>,
    pub array: RefCell<Vec<Value>>,
    /// Stand-in hash part: spec.md classifies the string table's *contents*
    /// as an external collaborator, but says nothing about general table
    /// storage, so a small association vector is enough here without
    /// committing this crate to a particular hash-table design a host may
    /// not want.
    pub hash: RefCell<Vec<(Value, Value)>>,
    /// `__mode` equivalent, consulted only when this table is installed as
    /// *another* object's metatable (`WEAKKEY`/`WEAKVAL` bits from
    /// `header.rs`). A full runtime would look this up by string key in the
    /// metatable's hash part; the key-string comparison machinery that
    /// would require lives in the external string-interning table, so this
    /// stand-in exposes the bits directly.
    pub mode: Cell<u8>,
    /// `__gc` equivalent, consulted only when this table is installed as a
    /// userdata's metatable.
    pub gc_finalizer: RefCell<Option<FinalizerFn>>,
}

pub struct GcUserdata {
    pub metatable: Cell<Option<GcRef>>,
    pub env: Cell<Option<GcRef>>,
    pub payload_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::WHITE0;

    #[test]
    fn box_reports_type_tag() {
        let b = GcBox::new(WHITE0, GcObj::Str(GcStr { hash: 0, bytes: Box::from(&b""[..]) }));
        assert_eq!(b.type_tag(), TypeTag::Str);
    }
}
