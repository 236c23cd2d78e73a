//! Value: a small integer or a reference into the object memory.
//!
//! Small integers carry a 0 in the low bit, references carry the `01` tag and
//! an arena index plus the generation of the slot they were issued for. A stale
//! reference (slot reused after reclamation) fails the generation check in
//! [`crate::ObjectMemory`] instead of aliasing a different object.
use std::fmt;

pub const SMALL_INT_MIN: i64 = -0x4000_0000;
pub const SMALL_INT_MAX: i64 = 0x3FFF_FFFF;

const REFERENCE_TAG: u64 = 0b01;
const TAG_MASK: u64 = 0b11;
const INDEX_SHIFT: u32 = 2;
const GENERATION_SHIFT: u32 = 34;
const INDEX_MASK: u64 = 0xFFFF_FFFF;

#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Value(u64);

impl Value {
    // ── Small integers ─────────────────────────────────────────────

    /// Encode `value` without a range check. Callers guarantee the range.
    #[inline(always)]
    pub const fn small(value: i64) -> Self {
        debug_assert!(value >= SMALL_INT_MIN && value <= SMALL_INT_MAX);
        Self((value as u64) << 1)
    }

    /// `None` when `value` has no immediate representation.
    #[inline(always)]
    pub const fn try_small(value: i64) -> Option<Self> {
        if value < SMALL_INT_MIN || value > SMALL_INT_MAX {
            return None;
        }
        Some(Self::small(value))
    }

    #[inline(always)]
    pub const fn is_small(self) -> bool {
        self.0 & 1 == 0
    }

    #[inline(always)]
    pub const fn as_small(self) -> Option<i64> {
        if self.is_small() {
            Some(self.small_unchecked())
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn small_unchecked(self) -> i64 {
        (self.0 as i64) >> 1
    }

    // ── References ────────────────────────────────────────────────

    #[inline(always)]
    pub const fn reference(index: u32, generation: u32) -> Self {
        Self(
            ((generation as u64) << GENERATION_SHIFT)
                | ((index as u64) << INDEX_SHIFT)
                | REFERENCE_TAG,
        )
    }

    #[inline(always)]
    pub const fn is_reference(self) -> bool {
        self.0 & TAG_MASK == REFERENCE_TAG
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        ((self.0 >> INDEX_SHIFT) & INDEX_MASK) as usize
    }

    #[inline(always)]
    pub const fn generation(self) -> u32 {
        (self.0 >> GENERATION_SHIFT) as u32
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_small() {
            write!(f, "SmallInt({})", self.small_unchecked())
        } else {
            write!(f, "Oop({}@{})", self.index(), self.generation())
        }
    }
}
