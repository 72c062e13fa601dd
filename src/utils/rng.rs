//! Simple random number generator for reproducibility.
//!
//! A lightweight xorshift PRNG used for weight initialization and dropout
//! mask sampling, so identical seeds give identical layers and masks.

/// Xorshift-based RNG.
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    /// Create a new RNG with explicit seed (if zero, use a fixed value).
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { 0x9e3779b97f4a7c15 } else { seed };
        Self { state }
    }

    /// Basic xorshift to generate u32.
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x >> 32) as u32
    }

    /// Convert to [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        // 24 random bits keep the result strictly below 1.0 in f32.
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// Uniform sample in [low, high).
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }

    /// Bernoulli draw that is `true` with probability `p`.
    pub fn gen_bool(&mut self, p: f32) -> bool {
        self.next_f32() < p
    }

    /// Integer sample in [0, upper).
    pub fn gen_usize(&mut self, upper: usize) -> usize {
        if upper == 0 {
            0
        } else {
            (self.next_u32() as usize) % upper
        }
    }

    /// Derive an independent generator, advancing this one.
    ///
    /// Layers keep their own stream for dropout masks so that the order in
    /// which layers are built does not couple their masks.
    pub fn fork(&mut self) -> SimpleRng {
        let hi = self.next_u32() as u64;
        let lo = self.next_u32() as u64;
        SimpleRng::new((hi << 32) | lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_deterministic() {
        let mut rng1 = SimpleRng::new(42);
        let mut rng2 = SimpleRng::new(42);

        for _ in 0..100 {
            assert_eq!(rng1.next_u32(), rng2.next_u32());
        }
    }

    #[test]
    fn test_rng_next_f32_range() {
        let mut rng = SimpleRng::new(12345);

        for _ in 0..1000 {
            let val = rng.next_f32();
            assert!((0.0..1.0).contains(&val));
        }
    }

    #[test]
    fn test_rng_gen_range_f32() {
        let mut rng = SimpleRng::new(67890);

        for _ in 0..1000 {
            let val = rng.gen_range_f32(-1.0, 1.0);
            assert!((-1.0..1.0).contains(&val));
        }
    }

    #[test]
    fn test_gen_bool_extremes() {
        let mut rng = SimpleRng::new(7);
        for _ in 0..100 {
            assert!(!rng.gen_bool(0.0));
            assert!(rng.gen_bool(1.0));
        }
    }

    #[test]
    fn test_rng_gen_usize_zero() {
        let mut rng = SimpleRng::new(22222);
        assert_eq!(rng.gen_usize(0), 0);
    }

    #[test]
    fn test_fork_diverges_from_parent() {
        let mut parent = SimpleRng::new(99);
        let mut child = parent.fork();
        let a: Vec<u32> = (0..8).map(|_| parent.next_u32()).collect();
        let b: Vec<u32> = (0..8).map(|_| child.next_u32()).collect();
        assert_ne!(a, b);
    }
}
