use fnv::FnvHasher;
use std::hash::Hasher;

/// Register index bits (Redis uses the same precision)
const PRECISION: u32 = 14;
const REGISTER_COUNT: usize = 1 << PRECISION;
const RANK_MAX: u32 = 64 - PRECISION + 1;

/// Approximate distinct counter (HyperLogLog, 16384 six-bit registers
/// stored as bytes, standard error about 0.81%).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperLogLog {
    registers: Vec<u8>,
}

impl HyperLogLog {
    pub fn new() -> Self {
        HyperLogLog {
            registers: vec![0; REGISTER_COUNT],
        }
    }

    /// Returns true if a register changed, i.e. the estimate may have moved.
    pub fn add(&mut self, item: &[u8]) -> bool {
        let hash = hash64(item);
        let index = (hash & (REGISTER_COUNT as u64 - 1)) as usize;
        let rank = ((hash >> PRECISION).trailing_zeros() + 1).min(RANK_MAX) as u8;

        debug_assert!(rank as u32 <= RANK_MAX);

        if rank > self.registers[index] {
            self.registers[index] = rank;
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> u64 {
        let m = REGISTER_COUNT as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);

        let mut sum = 0.0;
        let mut zeros = 0usize;
        for &register in &self.registers {
            sum += 1.0 / (1u64 << register) as f64;
            if register == 0 {
                zeros += 1;
            }
        }

        let raw = alpha * m * m / sum;
        // Small-range correction: linear counting while registers are sparse
        if raw <= 2.5 * m && zeros > 0 {
            (m * (m / zeros as f64).ln()).round() as u64
        } else {
            raw.round() as u64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.registers.iter().all(|&r| r == 0)
    }
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::new()
    }
}

/// FNV-1a followed by a splitmix64 finaliser so low bits are well mixed.
fn hash64(item: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(item);
    let mut z = hasher.finish();
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_counts_zero() {
        let hll = HyperLogLog::new();
        assert!(hll.is_empty());
        assert_eq!(hll.count(), 0);
    }

    #[test]
    fn test_duplicates_do_not_change_estimate() {
        let mut hll = HyperLogLog::new();
        assert!(hll.add(b"visitor-1"));
        assert!(!hll.add(b"visitor-1"));
        assert_eq!(hll.count(), 1);
    }

    #[test]
    fn test_small_cardinality_is_near_exact() {
        let mut hll = HyperLogLog::new();
        for i in 0..100 {
            hll.add(format!("user-{}", i).as_bytes());
        }
        let estimate = hll.count();
        assert!((95..=105).contains(&estimate), "estimate was {}", estimate);
    }

    #[test]
    fn test_large_cardinality_within_error_bound() {
        let mut hll = HyperLogLog::new();
        for i in 0..50_000 {
            hll.add(format!("visitor-{:08}", i).as_bytes());
        }
        let estimate = hll.count() as f64;
        let error = (estimate - 50_000.0).abs() / 50_000.0;
        assert!(error < 0.05, "relative error {} too large", error);
    }
}
