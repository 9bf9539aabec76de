//! Fixed-capacity bit masks for CCE, PRB and RBG occupancy
//!
//! The masks are `Copy` so the scheduler can snapshot them freely while
//! searching for allocations inside a slot.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// Bit mask with a logical size of up to `64 * W` bits
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitMask<const W: usize> {
    words: [u64; W],
    size: usize,
}

/// Occupancy of control channel elements in one coreset
pub type CceMask = BitMask<3>;
/// Occupancy of physical resource blocks in one carrier
pub type PrbMask = BitMask<5>;
/// Occupancy of resource block groups in one carrier
pub type RbgMask = BitMask<5>;

impl<const W: usize> BitMask<W> {
    /// Maximum number of bits the mask can hold
    pub const CAPACITY: usize = 64 * W;

    /// Create an all-zero mask of `size` bits
    ///
    /// `size` is clamped to the capacity of the mask.
    pub fn new(size: usize) -> Self {
        debug_assert!(size <= Self::CAPACITY, "mask size {} exceeds capacity", size);
        Self {
            words: [0; W],
            size: size.min(Self::CAPACITY),
        }
    }

    /// Logical size in bits
    pub fn size(&self) -> usize {
        self.size
    }

    /// Test bit `pos`
    pub fn test(&self, pos: usize) -> bool {
        pos < self.size && (self.words[pos / 64] >> (pos % 64)) & 1 == 1
    }

    /// Set bit `pos` to `value`; out-of-range positions are ignored
    pub fn set(&mut self, pos: usize, value: bool) {
        if pos >= self.size {
            return;
        }
        let mask = 1u64 << (pos % 64);
        if value {
            self.words[pos / 64] |= mask;
        } else {
            self.words[pos / 64] &= !mask;
        }
    }

    /// Set every bit in `[start, stop)`
    pub fn fill(&mut self, start: usize, stop: usize) {
        for pos in start..stop.min(self.size) {
            self.set(pos, true);
        }
    }

    /// Clear all bits
    pub fn reset(&mut self) {
        self.words = [0; W];
    }

    /// Whether any bit is set
    pub fn any(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }

    /// Whether no bit is set
    pub fn none(&self) -> bool {
        !self.any()
    }

    /// Whether every bit is set
    pub fn all(&self) -> bool {
        self.count() == self.size
    }

    /// Number of bits set
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether the two masks share at least one set bit
    pub fn intersects(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Iterate over the positions of the set bits, in ascending order
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.size).filter(move |pos| self.test(*pos))
    }

    fn clear_unused(&mut self) {
        for pos in self.size..Self::CAPACITY {
            self.words[pos / 64] &= !(1u64 << (pos % 64));
        }
    }
}

impl<const W: usize> BitAnd for BitMask<W> {
    type Output = Self;

    fn bitand(mut self, rhs: Self) -> Self {
        self &= rhs;
        self
    }
}

impl<const W: usize> BitAndAssign for BitMask<W> {
    fn bitand_assign(&mut self, rhs: Self) {
        for (a, b) in self.words.iter_mut().zip(rhs.words.iter()) {
            *a &= b;
        }
    }
}

impl<const W: usize> BitOr for BitMask<W> {
    type Output = Self;

    fn bitor(mut self, rhs: Self) -> Self {
        self |= rhs;
        self
    }
}

impl<const W: usize> BitOrAssign for BitMask<W> {
    fn bitor_assign(&mut self, rhs: Self) {
        for (a, b) in self.words.iter_mut().zip(rhs.words.iter()) {
            *a |= b;
        }
        self.size = self.size.max(rhs.size);
    }
}

impl<const W: usize> Not for BitMask<W> {
    type Output = Self;

    fn not(mut self) -> Self {
        for w in self.words.iter_mut() {
            *w = !*w;
        }
        self.clear_unused();
        self
    }
}

impl<const W: usize> fmt::Debug for BitMask<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Printed as a binary string, bit 0 first
        let bits: String = (0..self.size)
            .map(|pos| if self.test(pos) { '1' } else { '0' })
            .collect();
        write!(f, "[{}]", bits)
    }
}

/// Contiguous interval of PRBs `[start, stop)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrbInterval {
    /// First PRB
    pub start: u32,
    /// One past the last PRB
    pub stop: u32,
}

impl PrbInterval {
    /// Create an interval; `stop` is clamped to be at least `start`
    pub fn new(start: u32, stop: u32) -> Self {
        Self { start, stop: stop.max(start) }
    }

    /// Number of PRBs in the interval
    pub fn len(&self) -> u32 {
        self.stop - self.start
    }

    /// Whether the interval holds no PRBs
    pub fn is_empty(&self) -> bool {
        self.stop == self.start
    }

    /// Convert into a PRB mask of `nof_prb` bits
    pub fn to_mask(&self, nof_prb: usize) -> PrbMask {
        let mut mask = PrbMask::new(nof_prb);
        mask.fill(self.start as usize, self.stop as usize);
        mask
    }
}

/// Find the first run of free (unset) PRBs of at most `max_len` PRBs
///
/// Returns the longest run found before reaching `max_len`, scanning from PRB
/// `start_prb` upwards. An empty interval means no free PRB was found.
pub fn find_empty_interval(used: &PrbMask, max_len: u32, start_prb: u32) -> PrbInterval {
    let mut best = PrbInterval::default();
    let mut current_start: Option<u32> = None;
    for pos in start_prb..used.size() as u32 {
        if used.test(pos as usize) {
            if let Some(start) = current_start.take() {
                let run = PrbInterval::new(start, pos);
                if run.len() > best.len() {
                    best = run;
                }
            }
            continue;
        }
        let start = *current_start.get_or_insert(pos);
        if pos + 1 - start >= max_len {
            return PrbInterval::new(start, pos + 1);
        }
    }
    if let Some(start) = current_start {
        let run = PrbInterval::new(start, used.size() as u32);
        if run.len() > best.len() {
            best = run;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_set_and_count() {
        let mut mask = CceMask::new(135);
        assert!(mask.none());
        mask.fill(2, 6);
        mask.set(134, true);
        mask.set(200, true);
        assert_eq!(mask.count(), 5);
        assert!(mask.test(134));
        assert!(!mask.test(6));
        assert_eq!(mask.iter_ones().next(), Some(2));
    }

    #[test]
    fn test_mask_ops() {
        let mut a = CceMask::new(16);
        let mut b = CceMask::new(16);
        a.fill(0, 4);
        b.fill(4, 8);
        assert!(!a.intersects(&b));
        let union = a | b;
        assert_eq!(union.count(), 8);
        assert!((union & a).intersects(&a));
        let inv = !union;
        assert_eq!(inv.count(), 8);
        assert!(!inv.test(20));
    }

    #[test]
    fn test_find_empty_interval() {
        let mut used = PrbMask::new(20);
        used.fill(0, 3);
        used.fill(6, 8);
        assert_eq!(find_empty_interval(&used, 3, 0), PrbInterval::new(3, 6));
        assert_eq!(find_empty_interval(&used, 5, 0), PrbInterval::new(8, 13));
        used.fill(8, 20);
        assert_eq!(find_empty_interval(&used, 10, 0), PrbInterval::new(3, 6));
        used.fill(0, 20);
        assert!(find_empty_interval(&used, 4, 0).is_empty());
    }
}
