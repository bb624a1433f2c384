//! Bit helpers and randomness shared by the pools, trie, and scheduler.
//!
//! The tree/termination barrier types live in [`crate::scheduler::barrier`]
//! rather than here, since they are exclusively consumed by the scheduler.

use rand::Rng;

/// Smallest power of two `>= n`. Used to size pool chunk growth and bitmap
/// words.
pub fn next_power2(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    let mut ret = 1usize;
    while ret < n {
        ret <<= 1;
    }
    ret
}

/// `ceil(log2(n))` for `n > 0`.
pub fn upper_log2(n: usize) -> usize {
    assert!(n > 0, "upper_log2 is undefined for 0");
    let mut i = 0usize;
    let mut m = 1usize;
    loop {
        if m >= n {
            return i;
        }
        m <<= 1;
        i += 1;
    }
}

const BITMAP_BITS: usize = usize::BITS as usize;

/// Number of `usize` words needed to hold `v` bits, used to size the
/// rule-ready bitmap.
pub fn words_for_bits(v: usize) -> usize {
    let mut ret = v / BITMAP_BITS;
    if v % BITMAP_BITS > 0 {
        ret += 1;
    }
    ret
}

/// A fixed-size bitmap over `usize` words, used for the rule-ready and
/// predicate-activation bitmaps in the execution state.
#[derive(Debug, Clone)]
pub struct Bitmap {
    words: Vec<usize>,
}

impl Bitmap {
    pub fn new(num_bits: usize) -> Self {
        Bitmap { words: vec![0usize; words_for_bits(num_bits)] }
    }

    pub fn set(&mut self, bit: usize) {
        self.words[bit / BITMAP_BITS] |= 1usize << (bit % BITMAP_BITS);
    }

    pub fn clear(&mut self, bit: usize) {
        self.words[bit / BITMAP_BITS] &= !(1usize << (bit % BITMAP_BITS));
    }

    pub fn is_set(&self, bit: usize) -> bool {
        self.words[bit / BITMAP_BITS] & (1usize << (bit % BITMAP_BITS)) != 0
    }

    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// In-place union with `other`, returning whether any new bit was set
    /// (used by `mark_active_rules` to detect newly satisfied rules).
    pub fn union_with(&mut self, other: &Bitmap) -> bool {
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            let before = *a;
            *a |= b;
            changed |= *a != before;
        }
        changed
    }

    pub fn iter_set_bits(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &w)| {
            (0..BITMAP_BITS).filter_map(move |b| {
                if w & (1usize << b) != 0 {
                    Some(wi * BITMAP_BITS + b)
                } else {
                    None
                }
            })
        })
    }
}

/// Picks a uniformly random index in `0..len`, used by the scheduler's
/// steal-target selection.
pub fn random_index(len: usize) -> usize {
    debug_assert!(len > 0);
    rand::thread_rng().gen_range(0..len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_power2_rounds_up() {
        assert_eq!(next_power2(0), 1);
        assert_eq!(next_power2(1), 1);
        assert_eq!(next_power2(5), 8);
        assert_eq!(next_power2(64), 64);
        assert_eq!(next_power2(65), 128);
    }

    #[test]
    fn upper_log2_matches_definition() {
        assert_eq!(upper_log2(1), 0);
        assert_eq!(upper_log2(2), 1);
        assert_eq!(upper_log2(5), 3);
        assert_eq!(upper_log2(8), 3);
    }

    #[test]
    fn bitmap_set_clear_and_union() {
        let mut a = Bitmap::new(130);
        a.set(0);
        a.set(129);
        assert!(a.is_set(0));
        assert!(a.is_set(129));
        assert!(!a.is_set(64));

        let mut b = Bitmap::new(130);
        b.set(64);
        let changed = a.union_with(&b);
        assert!(changed);
        assert!(a.is_set(64));

        // Re-unioning with no new bits reports no change.
        assert!(!a.union_with(&b));

        a.clear(0);
        assert!(!a.is_set(0));
    }

    #[test]
    fn bitmap_iterates_set_bits_in_order() {
        let mut b = Bitmap::new(200);
        b.set(3);
        b.set(70);
        b.set(199);
        let bits: Vec<usize> = b.iter_set_bits().collect();
        assert_eq!(bits, vec![3, 70, 199]);
    }
}
