use crate::fnv::fnv1a32;

const INCREMENT: u32 = 0x6D2B79F5;
const DIVISOR: f64 = 4294967296.0;

/// A small deterministic random number generator, Mulberry32.
///
/// Every operation is 32-bit wrapping integer arithmetic, so a given seed
/// produces the same stream of draws everywhere, including in the survey
/// page and the offline bank-building tools.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Rng {
    state: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Rng { state: seed }
    }

    /// Seed from the FNV-1a hash of `key`, e.g. a participant ID.
    pub fn from_key<T: AsRef<str>>(key: T) -> Self {
        Rng::new(fnv1a32(key))
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(INCREMENT);
        let a = self.state;
        let mut t = (a ^ (a >> 15)).wrapping_mul(a | 1);
        t = t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61)) ^ t;
        t ^ (t >> 14)
    }

    /// Returns a value in [0, 1).
    pub fn draw(&mut self) -> f64 {
        self.next_u32() as f64 / DIVISOR
    }

    pub fn shuffle<'a, T>(&mut self, array: &'a mut [T]) -> &'a mut [T] {
        shuffle_in_place(array, || self.draw())
    }
}

impl Iterator for Rng {
    type Item = f64;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.draw())
    }
}

/// Fisher-Yates shuffle, walking from the end of the slice down to index 1.
///
/// `rng` is expected to return values in [0, 1). Anything at or above 1
/// picks the current index, while negative values and NaN pick index 0, so
/// a misbehaving source can skew the permutation but never panics.
pub fn shuffle_in_place<T, F>(array: &mut [T], mut rng: F) -> &mut [T]
where
    F: FnMut() -> f64,
{
    for i in (1..array.len()).rev() {
        let target = ((rng() * (i + 1) as f64).floor() as usize).min(i);
        array.swap(i, target);
    }
    array
}
