//! Object header: color bits, fixed/finalized flags, and the generational
//! age field.
//!
//! Every collectable object embeds a [`GcHeader`] as the first piece of its
//! [`GcBox`](crate::object::GcBox) node. The header never participates in
//! concurrent access — the collector is single-threaded and cooperative
//! (see the crate root docs) — so all state here is a plain [`Cell`], not an
//! atomic.

use std::cell::Cell;

/// First white bit. One of `WHITE0`/`WHITE1` is always "current"; the other
/// is "other" until the atomic step flips them.
pub const WHITE0: u8 = 0x01;
/// Second white bit.
pub const WHITE1: u8 = 0x02;
/// Black: fully scanned, no outgoing white references survive.
pub const BLACK: u8 = 0x04;
/// Finalizer has already run for this object (userdata/foreign-data only).
pub const FINALIZED: u8 = 0x08;
/// Table has weak keys. Aliases `FINALIZED`'s bit — tables and
/// userdata/foreign-data never share an object, so the alias is safe.
pub const WEAKKEY: u8 = 0x08;
/// Table has weak values, or a foreign-data object has a pending finalizer.
/// Aliased for the same reason as `WEAKKEY`.
pub const WEAKVAL: u8 = 0x10;
/// Alias of `WEAKVAL` on foreign-data objects.
pub const FOREIGN_HAS_FIN: u8 = 0x10;
/// Object is never collected (but is freed at shutdown).
pub const FIXED: u8 = 0x20;
/// Object is never collected, not even at shutdown (the main thread).
pub const SUPERFIXED: u8 = 0x40;

/// Both white bits.
pub const WHITES: u8 = WHITE0 | WHITE1;
/// All three colors.
pub const COLORS: u8 = WHITES | BLACK;
/// Both weak-table mode bits.
pub const WEAK: u8 = WEAKKEY | WEAKVAL;

/// `currentwhite XOR WHITES`: the white bit that means "dead" this cycle.
#[inline]
pub fn other_white(current_white: u8) -> u8 {
    current_white ^ WHITES
}

/// Generational age. Meaningful only when the collector is running in
/// generational mode; incremental mode leaves every object at `New`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Age {
    /// Allocated this cycle.
    New = 0,
    /// Survived exactly one young cycle.
    Survival = 1,
    /// Marked old by the forward barrier this cycle (not yet visited).
    Old0 = 2,
    /// First full cycle as old.
    Old1 = 3,
    /// Stable old object; no longer visited by young collections.
    Old = 4,
    /// Old object mutated this cycle (forward barrier moved it here).
    Touched1 = 5,
    /// `Touched1` object that survived a full cycle with no further writes.
    Touched2 = 6,
}

impl Age {
    /// Table driving age advancement across a young-cycle sweep
    /// (`nextage` in the reference collector).
    #[inline]
    pub fn next(self) -> Age {
        match self {
            Age::New => Age::Survival,
            Age::Survival => Age::Old1,
            Age::Old0 => Age::Old1,
            Age::Old1 => Age::Old,
            Age::Old => Age::Old,
            Age::Touched1 => Age::Touched1,
            Age::Touched2 => Age::Touched2,
        }
    }

    /// `isold(o)`: ages past `Survival` are treated as old by the barriers
    /// and by `markold`.
    #[inline]
    pub fn is_old(self) -> bool {
        self > Age::Survival
    }

    #[inline]
    pub(crate) fn from_u8(v: u8) -> Age {
        match v {
            0 => Age::New,
            1 => Age::Survival,
            2 => Age::Old0,
            3 => Age::Old1,
            4 => Age::Old,
            5 => Age::Touched1,
            6 => Age::Touched2,
            _ => unreachable!("invalid age byte {v}"),
        }
    }
}

/// Color bits plus fixed/finalized/weak flags and the generational age, laid
/// out the way `spec.md` §3 describes: an 8-bit `marked` field and a 3-bit
/// `age` field. `type_tag` is *not* stored here — it is recoverable from the
/// owning [`GcBox`](crate::object::GcBox)'s enum discriminant, so storing it
/// again in the header would just be state that could drift out of sync.
#[derive(Debug)]
pub struct GcHeader {
    marked: Cell<u8>,
    age: Cell<u8>,
}

impl GcHeader {
    /// Create a header in the given current-white color, age `New`.
    pub fn new(current_white: u8) -> GcHeader {
        GcHeader {
            marked: Cell::new(current_white & WHITES),
            age: Cell::new(Age::New as u8),
        }
    }

    #[inline]
    pub fn marked(&self) -> u8 {
        self.marked.get()
    }

    #[inline]
    pub fn set_marked(&self, v: u8) {
        self.marked.set(v);
    }

    #[inline]
    pub fn is_white(&self) -> bool {
        self.marked.get() & WHITES != 0
    }

    #[inline]
    pub fn is_black(&self) -> bool {
        self.marked.get() & BLACK != 0
    }

    #[inline]
    pub fn is_gray(&self) -> bool {
        self.marked.get() & (BLACK | WHITES) == 0
    }

    /// `isdead(g, o)`: white under the *other* white, and not fixed.
    #[inline]
    pub fn is_dead(&self, current_white: u8) -> bool {
        if self.is_fixed() {
            return false;
        }
        let ow = other_white(current_white);
        self.marked.get() & ow & WHITES != 0
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.marked.get() & FIXED != 0
    }

    #[inline]
    pub fn is_superfixed(&self) -> bool {
        self.marked.get() & SUPERFIXED != 0
    }

    #[inline]
    pub fn fix(&self) {
        self.marked.set(self.marked.get() | FIXED);
    }

    #[inline]
    pub fn superfix(&self) {
        self.marked.set(self.marked.get() | FIXED | SUPERFIXED);
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.marked.get() & FINALIZED != 0
    }

    #[inline]
    pub fn mark_finalized(&self) {
        self.marked.set(self.marked.get() | FINALIZED);
    }

    #[inline]
    pub fn clear_finalized(&self) {
        self.marked.set(self.marked.get() & !FINALIZED);
    }

    #[inline]
    pub fn weak_mode(&self) -> u8 {
        self.marked.get() & WEAK
    }

    #[inline]
    pub fn set_weak_mode(&self, weak: u8) {
        self.marked.set((self.marked.get() & !WEAK) | (weak & WEAK));
    }

    #[inline]
    pub fn has_foreign_fin(&self) -> bool {
        self.marked.get() & FOREIGN_HAS_FIN != 0
    }

    #[inline]
    pub fn set_foreign_fin(&self, v: bool) {
        if v {
            self.marked.set(self.marked.get() | FOREIGN_HAS_FIN);
        } else {
            self.marked.set(self.marked.get() & !FOREIGN_HAS_FIN);
        }
    }

    /// `white2gray`.
    #[inline]
    pub fn white_to_gray(&self) {
        self.marked.set(self.marked.get() & !WHITES);
    }

    /// `gray2black`.
    #[inline]
    pub fn gray_to_black(&self) {
        self.marked.set(self.marked.get() | BLACK);
    }

    /// `black2gray`.
    #[inline]
    pub fn black_to_gray(&self) {
        self.marked.set(self.marked.get() & !BLACK);
    }

    /// `makewhite`: recolor to the current white, preserving every
    /// non-color flag (fixed, finalized, weak mode).
    #[inline]
    pub fn make_white(&self, current_white: u8) {
        self.marked
            .set((self.marked.get() & !COLORS) | (current_white & WHITES));
    }

    /// `newwhite`: used only at allocation, where there are no flags yet to
    /// preserve.
    #[inline]
    pub fn new_white(&self, current_white: u8) {
        self.marked.set(current_white & WHITES);
    }

    #[inline]
    pub fn get_age(&self) -> Age {
        Age::from_u8(self.age.get())
    }

    #[inline]
    pub fn set_age(&self, age: Age) {
        self.age.set(age as u8);
    }

    /// `changeage(o, from, to)`: the reference asserts `getage(o) == from`
    /// before writing; we do the same as a debug assertion since this is a
    /// correctness invariant of the generational sweep, not a runtime check
    /// a release build needs to pay for.
    #[inline]
    pub fn change_age(&self, from: Age, to: Age) {
        debug_assert_eq!(self.get_age(), from, "change_age precondition violated");
        self.age.set(to as u8);
    }

    #[inline]
    pub fn is_old(&self) -> bool {
        self.get_age().is_old()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_header_is_current_white_and_new() {
        let h = GcHeader::new(WHITE0);
        assert!(h.is_white());
        assert!(!h.is_black());
        assert!(!h.is_gray());
        assert_eq!(h.get_age(), Age::New);
    }

    #[test]
    fn color_transitions() {
        let h = GcHeader::new(WHITE0);
        h.white_to_gray();
        assert!(h.is_gray());
        h.gray_to_black();
        assert!(h.is_black());
        h.black_to_gray();
        assert!(h.is_gray());
    }

    #[test]
    fn dead_means_other_white() {
        let h = GcHeader::new(WHITE0);
        // WHITE0 is current; a WHITE0 object is alive, not dead.
        assert!(!h.is_dead(WHITE0));
        h.set_marked(WHITE1);
        assert!(h.is_dead(WHITE0));
        h.fix();
        assert!(!h.is_dead(WHITE0), "fixed objects are never dead");
    }

    #[test]
    fn make_white_preserves_flags() {
        let h = GcHeader::new(WHITE0);
        h.gray_to_black();
        h.mark_finalized();
        h.make_white(WHITE1);
        assert!(h.is_white());
        assert!(h.is_finalized(), "make_white must not clear non-color bits");
    }

    #[test]
    fn age_next_table() {
        assert_eq!(Age::New.next(), Age::Survival);
        assert_eq!(Age::Survival.next(), Age::Old1);
        assert_eq!(Age::Old0.next(), Age::Old1);
        assert_eq!(Age::Old1.next(), Age::Old);
        assert_eq!(Age::Old.next(), Age::Old);
        assert_eq!(Age::Touched1.next(), Age::Touched1);
        assert_eq!(Age::Touched2.next(), Age::Touched2);
    }

    #[test]
    fn is_old_threshold() {
        assert!(!Age::New.is_old());
        assert!(!Age::Survival.is_old());
        assert!(Age::Old0.is_old());
        assert!(Age::Old.is_old());
    }
}
