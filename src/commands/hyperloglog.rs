use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use crate::{
    commands::CommandError,
    key_value_store::{DataType, KeyValueStore, SharedStore},
};

/// Register index width in bits; the low bits of the hash select the
/// register and the remaining bits feed the rank estimate.
const HLL_BITS: u32 = 14;
const HLL_REGISTERS: usize = 1 << HLL_BITS;

/// Fixed-size probabilistic cardinality counter. Each observed member is
/// hashed once; the register addressed by the low bits keeps the maximum
/// rank (position of the first set bit) seen in the high bits. Memory is
/// constant regardless of how many members are added.
#[derive(Clone, Debug, PartialEq)]
pub struct HyperLogLog {
    registers: Vec<u8>,
}

impl Default for HyperLogLog {
    fn default() -> Self {
        HyperLogLog {
            registers: vec![0; HLL_REGISTERS],
        }
    }
}

impl HyperLogLog {
    pub fn new() -> Self {
        HyperLogLog::default()
    }

    /// Observes `member`. Returns true when a register changed, meaning the
    /// estimate may have moved; re-adding an already-seen member is a no-op.
    pub fn add(&mut self, member: &str) -> bool {
        let mut hasher = DefaultHasher::new();
        member.hash(&mut hasher);
        let hashed = hasher.finish();

        let index = (hashed & (HLL_REGISTERS as u64 - 1)) as usize;
        let remaining = hashed >> HLL_BITS;
        let rank = rank_of(remaining);

        if rank > self.registers[index] {
            self.registers[index] = rank;
            return true;
        }

        false
    }

    /// Estimates the number of distinct members observed so far.
    ///
    /// Uses the standard bias-corrected harmonic mean, falling back to
    /// linear counting at small cardinalities where the raw estimate is
    /// known to be inaccurate.
    pub fn count(&self) -> u64 {
        let m = HLL_REGISTERS as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);

        let mut harmonic_sum = 0.0;
        let mut zero_registers = 0u64;
        for &register in &self.registers {
            // register ranks top out at 51, so a u64 shift never overflows
            harmonic_sum += 1.0 / (1u64 << register) as f64;
            if register == 0 {
                zero_registers += 1;
            }
        }

        let raw = alpha * m * m / harmonic_sum;

        if raw <= 2.5 * m && zero_registers > 0 {
            (m * (m / zero_registers as f64).ln()).round() as u64
        } else {
            raw.round() as u64
        }
    }
}

/// Position of the first set bit in the hash remainder, counted from the
/// least significant bit, 1-based. An all-zero remainder saturates at the
/// number of usable bits plus one.
fn rank_of(remaining: u64) -> u8 {
    let usable_bits = 64 - HLL_BITS;
    if remaining == 0 {
        return (usable_bits + 1) as u8;
    }

    (remaining.trailing_zeros() + 1).min(usable_bits + 1) as u8
}

/// Observes `members` in the counter at `key`, creating it when absent.
/// Returns true when any register changed (the estimate may have moved).
pub async fn pf_add(
    store: &SharedStore,
    key: &str,
    members: &[String],
) -> Result<bool, CommandError> {
    let mut store_guard = store.lock().await;
    apply_pf_add(&mut store_guard, key, members)
}

/// Estimated number of distinct members; 0 when the key is absent.
pub async fn pf_count(store: &SharedStore, key: &str) -> Result<u64, CommandError> {
    let mut store_guard = store.lock().await;
    apply_pf_count(&mut store_guard, key)
}

pub(crate) fn apply_pf_add(
    store: &mut KeyValueStore,
    key: &str,
    members: &[String],
) -> Result<bool, CommandError> {
    let value = store.get_or_insert_with(key, || DataType::HyperLogLog(HyperLogLog::new()));

    let DataType::HyperLogLog(ref mut counter) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let mut changed = false;
    for member in members {
        changed |= counter.add(member);
    }

    Ok(changed)
}

pub(crate) fn apply_pf_count(store: &mut KeyValueStore, key: &str) -> Result<u64, CommandError> {
    let Some(value) = store.get(key) else {
        return Ok(0);
    };

    let DataType::HyperLogLog(ref counter) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    Ok(counter.count())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::{pf_add, pf_count, HyperLogLog};
    use crate::key_value_store::KeyValueStore;

    #[test]
    fn test_small_cardinality_is_near_exact() {
        let mut counter = HyperLogLog::new();
        for member in ["user-1", "user-2", "user-3", "user-4"] {
            counter.add(member);
        }

        // Linear counting makes small estimates essentially exact.
        let estimate = counter.count();
        assert!((3..=5).contains(&estimate), "estimate was {}", estimate);
    }

    #[test]
    fn test_re_adding_does_not_change_estimate() {
        let mut counter = HyperLogLog::new();
        for i in 0..100 {
            counter.add(&format!("member-{}", i));
        }
        let before = counter.count();

        for i in 0..100 {
            assert!(!counter.add(&format!("member-{}", i)));
        }

        assert_eq!(counter.count(), before);
    }

    #[test]
    fn test_estimate_within_expected_error() {
        let mut counter = HyperLogLog::new();
        let distinct = 1000u64;
        for i in 0..distinct {
            counter.add(&format!("visitor-{}", i));
        }

        let estimate = counter.count() as f64;
        let error = (estimate - distinct as f64).abs() / distinct as f64;
        assert!(error < 0.03, "estimate {} off by {:.1}%", estimate, error * 100.0);
    }

    #[tokio::test]
    async fn test_pf_add_and_count_via_store() {
        let store = Arc::new(Mutex::new(KeyValueStore::new()));

        let members: Vec<String> = (0..50).map(|i| format!("ip-{}", i)).collect();
        assert_eq!(pf_add(&store, "visitors", &members).await, Ok(true));
        // identical batch flips nothing
        assert_eq!(pf_add(&store, "visitors", &members).await, Ok(false));

        let estimate = pf_count(&store, "visitors").await.unwrap();
        assert!((45..=55).contains(&estimate), "estimate was {}", estimate);

        assert_eq!(pf_count(&store, "nobody").await, Ok(0));
    }
}
