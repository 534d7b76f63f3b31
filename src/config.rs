//! Tunables. spec.md §6 stores these "in quartered form, read via `*4`" —
//! a detail of the reference collector's byte-packed `lu_byte` fields. A
//! Rust API has no packing pressure, so `GcConfig` takes plain values; the
//! quartering convention is preserved internally in `Tunables` so the
//! arithmetic in `driver.rs`/`generational.rs` matches the reference.

/// User-facing configuration, handed to `Gc::new`.
#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    /// Heap growth allowance between cycles in incremental mode, as a
    /// percentage (default 200 means "wait until the heap has grown to
    /// 200% of the post-cycle estimate").
    pub pause: u32,
    /// Bytes marked per byte allocated, as a percentage (default 200).
    pub stepmul: u32,
    /// Young-cycle trigger: percent growth over `total` (default 20).
    pub genminormul: u32,
    /// Major-cycle trigger: percent growth over the last major cycle's
    /// `estimate` (default 100).
    pub genmajormul: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            pause: 200,
            stepmul: 200,
            genminormul: 20,
            genmajormul: 100,
        }
    }
}

/// Internal, quartered storage: `raw() == config_value / 4`, matching the
/// reference's `lu_byte` fields, which store tunables pre-divided by 4 and
/// multiply back out (`* 4`) at each use site. Kept as a distinct type so
/// `driver.rs`/`generational.rs` read it the same way the reference does,
/// rather than re-deriving the quartering at every call site.
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    pause_q: u8,
    stepmul_q: u8,
    genminormul_q: u8,
    genmajormul_q: u8,
}

impl From<GcConfig> for Tunables {
    fn from(c: GcConfig) -> Self {
        Tunables {
            pause_q: quarter(c.pause),
            stepmul_q: quarter(c.stepmul),
            genminormul_q: quarter(c.genminormul),
            genmajormul_q: quarter(c.genmajormul),
        }
    }
}

#[inline]
fn quarter(v: u32) -> u8 {
    (v / 4).min(255) as u8
}

impl Tunables {
    #[inline]
    pub fn pause(&self) -> u32 {
        self.pause_q as u32 * 4
    }

    #[inline]
    pub fn stepmul(&self) -> u32 {
        self.stepmul_q as u32 * 4
    }

    #[inline]
    pub fn genminormul(&self) -> u32 {
        self.genminormul_q as u32 * 4
    }

    #[inline]
    pub fn genmajormul(&self) -> u32 {
        self.genmajormul_q as u32 * 4
    }
}

/// `STEPSIZE`: the base quantum size in bytes for an incremental step.
pub const STEPSIZE: usize = 1024;
/// Objects swept per `Sweep` step.
pub const SWEEPMAX: usize = 40;
/// Reported cost per object swept.
pub const SWEEPCOST: usize = 10;
/// Reported cost per finalizer invoked.
pub const FINALIZECOST: usize = 100;
/// Sentinel cost meaning "suspend — a JIT trace is executing, or we
/// otherwise cannot make progress this call".
pub const MAX_MEM: usize = usize::MAX / 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quartering_round_trips_on_multiples_of_four() {
        let t: Tunables = GcConfig { pause: 200, stepmul: 200, genminormul: 20, genmajormul: 100 }.into();
        assert_eq!(t.pause(), 200);
        assert_eq!(t.stepmul(), 200);
        assert_eq!(t.genminormul(), 20);
        assert_eq!(t.genmajormul(), 100);
    }
}
