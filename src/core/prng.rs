// Minimal PRNG (no external crates).
//
// This is NOT cryptographically secure.
// It drives activation noise, potentiation/depotentiation draws and pattern
// generation, and must be reproducible from a seed.

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    pub fn state(&self) -> u64 {
        self.state
    }

    /// Derive an independent stream, e.g. one per worker rank.
    ///
    /// Every worker that forks the same parent state with the same `stream`
    /// gets the same generator.
    pub fn fork(&self, stream: u64) -> Self {
        // splitmix64 over (state, stream) decorrelates neighbouring streams.
        let mut z = self
            .state
            .wrapping_add(stream.wrapping_add(1).wrapping_mul(0x9E3779B97F4A7C15));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        Self::new(z ^ (z >> 31))
    }

    /// Draw in [0, 1) addressed by `(epoch, index)`; does not advance.
    ///
    /// Used for per-unit and per-connection events so the outcome does not
    /// depend on which worker owns the entity or on iteration order.
    #[inline]
    pub fn keyed_f64(&self, epoch: u64, index: u64) -> f64 {
        self.fork(epoch).fork(index).next_f64()
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform in [0, 1).
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        // 53 high bits -> exactly representable mantissa.
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Bernoulli trial with success probability `p`.
    #[inline]
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    #[inline]
    pub fn gen_range_usize(&mut self, low: usize, high: usize) -> usize {
        if high <= low {
            return low;
        }
        let span = (high - low) as u64;
        low + (self.next_u64() % span) as usize
    }

    /// `count` distinct values drawn uniformly from `0..n`, in draw order.
    ///
    /// Partial Fisher-Yates; `count` is clamped to `n`.
    pub fn sample_unique(&mut self, count: usize, n: usize) -> Vec<usize> {
        let count = count.min(n);
        let mut pool: Vec<usize> = (0..n).collect();
        for i in 0..count {
            let j = self.gen_range_usize(i, n);
            pool.swap(i, j);
        }
        pool.truncate(count);
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Prng::new(7);
        let mut b = Prng::new(7);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn forked_streams_differ_but_are_reproducible() {
        let root = Prng::new(42);
        let mut s0 = root.fork(0);
        let mut s1 = root.fork(1);
        let mut s0_again = root.fork(0);
        let a = s0.next_u64();
        assert_eq!(a, s0_again.next_u64());
        assert_ne!(a, s1.next_u64());
    }

    #[test]
    fn keyed_draws_ignore_call_order() {
        let rng = Prng::new(5);
        let a = rng.keyed_f64(3, 17);
        let _ = rng.keyed_f64(3, 18);
        assert_eq!(a, rng.keyed_f64(3, 17));
        assert_ne!(a, rng.keyed_f64(4, 17));
    }

    #[test]
    fn next_f64_stays_in_unit_interval() {
        let mut rng = Prng::new(3);
        for _ in 0..10_000 {
            let x = rng.next_f64();
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn sample_unique_has_no_duplicates() {
        let mut rng = Prng::new(11);
        let mut s = rng.sample_unique(25, 100);
        assert_eq!(s.len(), 25);
        s.sort_unstable();
        s.dedup();
        assert_eq!(s.len(), 25);
        assert!(s.iter().all(|&i| i < 100));
    }
}
