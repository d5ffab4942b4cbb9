//! # Fixed-size bit array over caller-provided words
//!
//! Bit `i` lives in word `i / 32` under mask `1 << (i % 32)`. The backing
//! words are borrowed, so a bitmap can sit in a static, on the stack in a
//! test, or in the kernel's bootstrap heap.

/// Errors from [`Bitmap::new`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BitmapError {
    #[error("a bitmap needs at least one bit")]
    Empty,
    #[error("{have} words of storage cannot hold {need}")]
    StorageTooSmall { need: usize, have: usize },
}

pub struct Bitmap<'a> {
    num_bits: u32,
    words: &'a mut [u32],
}

impl<'a> Bitmap<'a> {
    /// Number of `u32` words needed to hold `num_bits` bits.
    #[inline]
    #[must_use]
    pub const fn words_for(num_bits: u32) -> usize {
        num_bits.div_ceil(32) as usize
    }

    /// Wrap `storage` as a bitmap of `num_bits` bits.
    ///
    /// Every bit starts **set**. Call [`clear_all`](Self::clear_all) before
    /// using the bitmap as a free-tracker.
    ///
    /// # Errors
    /// - [`BitmapError::Empty`] for `num_bits == 0`.
    /// - [`BitmapError::StorageTooSmall`] if `storage` is shorter than [`words_for`](Self::words_for).
    pub fn new(num_bits: u32, storage: &'a mut [u32]) -> Result<Self, BitmapError> {
        if num_bits == 0 {
            return Err(BitmapError::Empty);
        }
        let need = Self::words_for(num_bits);
        if storage.len() < need {
            return Err(BitmapError::StorageTooSmall {
                need,
                have: storage.len(),
            });
        }
        let words = &mut storage[..need];
        words.fill(u32::MAX);
        Ok(Self { num_bits, words })
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.num_bits
    }

    /// Always `false`; an empty bitmap cannot be constructed.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    #[inline]
    const fn locate(bit: u32) -> (usize, u32) {
        ((bit / 32) as usize, 1 << (bit % 32))
    }

    /// Precondition: `bit < len()`.
    #[inline]
    #[must_use]
    pub fn get(&self, bit: u32) -> bool {
        debug_assert!(bit < self.num_bits, "bit {bit} out of range");
        let (word, mask) = Self::locate(bit);
        self.words[word] & mask != 0
    }

    /// Precondition: `bit < len()`.
    #[inline]
    pub fn set(&mut self, bit: u32) {
        debug_assert!(bit < self.num_bits, "bit {bit} out of range");
        let (word, mask) = Self::locate(bit);
        self.words[word] |= mask;
    }

    /// Precondition: `bit < len()`.
    #[inline]
    pub fn clear(&mut self, bit: u32) {
        debug_assert!(bit < self.num_bits, "bit {bit} out of range");
        let (word, mask) = Self::locate(bit);
        self.words[word] &= !mask;
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Lowest clear bit, or `None` if every bit in `0..len()` is set.
    #[must_use]
    pub fn find_first_clear(&self) -> Option<u32> {
        let (i, w) = self
            .words
            .iter()
            .enumerate()
            .find(|(_, w)| **w != u32::MAX)?;
        #[allow(clippy::cast_possible_truncation)]
        let bit = i as u32 * 32 + (!w).trailing_zeros();
        (bit < self.num_bits).then_some(bit)
    }

    /// Set `count` bits starting at `start`. Precondition: `start + count <= len()`.
    pub fn set_range(&mut self, start: u32, count: u32) {
        self.fill_range(start, count, true);
    }

    /// Clear `count` bits starting at `start`. Precondition: `start + count <= len()`.
    pub fn clear_range(&mut self, start: u32, count: u32) {
        self.fill_range(start, count, false);
    }

    fn fill_range(&mut self, start: u32, count: u32, value: bool) {
        debug_assert!(
            u64::from(start) + u64::from(count) <= u64::from(self.num_bits),
            "range {start}+{count} out of bounds"
        );
        let end = start + count;
        let mut bit = start;
        while bit < end {
            let (word, mask) = Self::locate(bit);
            // Whole words at a time once aligned.
            if bit % 32 == 0 && end - bit >= 32 {
                self.words[word] = if value { u32::MAX } else { 0 };
                bit += 32;
                continue;
            }
            if value {
                self.words[word] |= mask;
            } else {
                self.words[word] &= !mask;
            }
            bit += 1;
        }
    }

    /// Start of the lowest run of `count` clear bits.
    #[must_use]
    pub fn find_clear_run(&self, count: u32) -> Option<u32> {
        if count == 0 || count > self.num_bits {
            return None;
        }
        let mut run_start = 0;
        let mut run_len = 0;
        let mut bit = 0;
        while bit < self.num_bits {
            let (word, _) = Self::locate(bit);
            if bit % 32 == 0 && self.words[word] == u32::MAX {
                run_len = 0;
                bit += 32;
                continue;
            }
            if self.get(bit) {
                run_len = 0;
            } else {
                if run_len == 0 {
                    run_start = bit;
                }
                run_len += 1;
                if run_len == count {
                    return Some(run_start);
                }
            }
            bit += 1;
        }
        None
    }

    /// Number of set bits among `0..len()`.
    #[must_use]
    pub fn count_set(&self) -> u32 {
        let full = (self.num_bits / 32) as usize;
        let mut count: u32 = self.words[..full].iter().map(|w| w.count_ones()).sum();
        let tail = self.num_bits % 32;
        if tail != 0 {
            count += (self.words[full] & ((1 << tail) - 1)).count_ones();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleared(bits: u32, storage: &mut [u32]) -> Bitmap<'_> {
        let mut bm = Bitmap::new(bits, storage).unwrap();
        bm.clear_all();
        bm
    }

    #[test]
    fn rejects_empty_and_short_storage() {
        let mut words = [0u32; 2];
        assert_eq!(Bitmap::new(0, &mut words).err(), Some(BitmapError::Empty));
        assert_eq!(
            Bitmap::new(65, &mut words).err(),
            Some(BitmapError::StorageTooSmall { need: 3, have: 2 })
        );
        assert_eq!(Bitmap::words_for(64), 2);
    }

    #[test]
    fn starts_fully_set_until_cleared() {
        let mut words = [0u32; 2];
        let bm = Bitmap::new(40, &mut words).unwrap();
        assert!(bm.get(0) && bm.get(39));
        assert_eq!(bm.find_first_clear(), None);
        assert_eq!(bm.count_set(), 40);
    }

    #[test]
    fn set_get_clear_every_bit() {
        let mut words = [0u32; 3];
        let mut bm = cleared(70, &mut words);
        for i in 0..70 {
            bm.set(i);
            assert!(bm.get(i));
            bm.clear(i);
            assert!(!bm.get(i));
        }
        assert_eq!(bm.count_set(), 0);
    }

    #[test]
    fn first_clear_after_prefix() {
        let mut words = [0u32; 2];
        let mut bm = cleared(64, &mut words);
        bm.set_range(0, 10);
        assert_eq!(bm.find_first_clear(), Some(10));
    }

    #[test]
    fn all_set_is_none_not_zero() {
        let mut words = [0u32; 2];
        let mut bm = cleared(64, &mut words);
        bm.set_range(0, 64);
        assert_eq!(bm.find_first_clear(), None);
    }

    #[test]
    fn bits_past_len_are_never_reported() {
        let mut words = [0u32; 1];
        let mut bm = cleared(5, &mut words);
        bm.set_range(0, 5);
        assert_eq!(bm.find_first_clear(), None);
        assert_eq!(bm.count_set(), 5);
    }

    #[test]
    fn ranges_cross_word_boundaries() {
        let mut words = [0u32; 4];
        let mut bm = cleared(128, &mut words);
        bm.set_range(30, 70);
        assert_eq!(bm.count_set(), 70);
        assert!(!bm.get(29) && bm.get(30) && bm.get(99) && !bm.get(100));

        bm.clear_range(32, 64);
        assert_eq!(bm.count_set(), 6);
        assert_eq!(bm.find_clear_run(64), Some(32));
    }

    #[test]
    fn clear_run_takes_lowest_fit() {
        let mut words = [0u32; 2];
        let mut bm = cleared(64, &mut words);
        bm.set(3);
        bm.set(8);
        assert_eq!(bm.find_clear_run(3), Some(0));
        assert_eq!(bm.find_clear_run(4), Some(4));
        assert_eq!(bm.find_clear_run(5), Some(9));
        assert_eq!(bm.find_clear_run(56), None);
        assert_eq!(bm.find_clear_run(55), Some(9));
        assert_eq!(bm.find_clear_run(0), None);
    }
}
