//! Cheap pseudo-random sequences for the janitor.
//!
//! [`RandomOrder`] visits every index in `[0, COUNT)` exactly once per cycle
//! in a shuffled order, using a full-period linear congruential generator
//! over a power-of-two modulus instead of a stored permutation.

/// `value * multiplier + increment` with wrapping `u32` arithmetic.
#[derive(Debug, Clone, Copy)]
struct Lcg {
    multiplier: u32,
    increment: u32,
}

impl Lcg {
    fn step(&self, value: u32) -> u32 {
        value
            .wrapping_mul(self.multiplier)
            .wrapping_add(self.increment)
    }
}

/// A seeded stream of pseudo-random numbers.
#[derive(Debug, Clone)]
pub struct RandomStream {
    lcg: Lcg,
    value: u32,
}

impl RandomStream {
    pub fn new(seed: u32) -> Self {
        Self {
            lcg: Lcg {
                multiplier: 1_103_515_245,
                increment: 12_345,
            },
            value: seed,
        }
    }

    pub fn from_entropy() -> Self {
        Self::new(rand::random())
    }

    /// A value in `[min, max)`.
    pub fn range(&mut self, min: u32, max: u32) -> u32 {
        let span = u64::from(max - min);
        self.value = self.lcg.step(self.value);
        min + ((span * u64::from(self.value)) >> 32) as u32
    }
}

/// Shuffled, non-repeating traversal of `[0, COUNT)`.
///
/// `MODULUS` must be a power of two greater than 16 and at least `COUNT`.
/// The cycle is complete when [`RandomOrder::next`] returns
/// [`RandomOrder::first`].
#[derive(Debug, Clone)]
pub struct RandomOrder<const MODULUS: u32, const COUNT: u32> {
    lcg: Lcg,
    first: u32,
    value: u32,
}

impl<const MODULUS: u32, const COUNT: u32> RandomOrder<MODULUS, COUNT> {
    const VALID: () = assert!(
        MODULUS.is_power_of_two() && MODULUS > 16 && COUNT > 0 && COUNT <= MODULUS,
        "RandomOrder needs a power-of-two modulus above 16 and a count in (0, modulus]"
    );

    pub fn new(stream: &mut RandomStream) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID;
        // A multiplier of 5 mod 8 and an odd increment give a full period.
        let multiplier = stream.range(0, MODULUS / 16) * 8 + 5;
        let first = stream.range(0, COUNT);
        Self {
            lcg: Lcg {
                multiplier,
                increment: 12_345,
            },
            first,
            value: first,
        }
    }

    pub fn first(&self) -> u32 {
        self.first
    }

    /// The next index of the cycle.
    pub fn next(&mut self) -> u32 {
        loop {
            self.value = self.lcg.step(self.value) & (MODULUS - 1);
            if self.value < COUNT {
                return self.value;
            }
        }
    }
}
