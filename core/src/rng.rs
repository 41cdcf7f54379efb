//! Deterministic random number generation.
//!
//! RULE: Nothing in the engine may call any platform RNG.
//! All randomness (chase session tokens, minigame speed re-rolls) flows
//! through SubsystemRng streams derived from the single master seed.
//!
//! Each subsystem gets its own stream, seeded from
//! (master_seed XOR subsystem_index). Adding a subsystem never changes
//! the streams of existing ones.

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG for a single subsystem.
pub struct SubsystemRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl SubsystemRng {
    /// Create a subsystem RNG from the master seed and a stable
    /// subsystem index. The index must never change once assigned.
    pub fn new(master_seed: u64, subsystem_index: u64) -> Self {
        let derived_seed = master_seed ^ (subsystem_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Draw a raw u64 (full range).
    pub fn next_u64(&mut self) -> u64 {
        use rand::RngCore;
        self.inner.next_u64()
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        use rand::RngCore;
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Roll a u32 in the inclusive range [min, max]. Swapped bounds are tolerated.
    pub fn range_inclusive(&mut self, min: u32, max: u32) -> u32 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        lo + self.next_u64_below(u64::from(hi - lo) + 1) as u32
    }

    /// Sixteen random bytes, used to mint session tokens.
    pub fn next_bytes16(&mut self) -> [u8; 16] {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        self.inner.fill_bytes(&mut bytes);
        bytes
    }
}

/// All subsystem RNG streams for a single run, indexed by stable slot.
pub struct RngBank {
    streams: Vec<SubsystemRng>,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        let streams = SubsystemSlot::ALL
            .iter()
            .map(|slot| SubsystemRng::new(master_seed, *slot as u64).with_name(slot.name()))
            .collect();
        Self { streams }
    }

    /// The long-lived stream for a subsystem. Draws advance it permanently.
    pub fn stream(&mut self, slot: SubsystemSlot) -> &mut SubsystemRng {
        &mut self.streams[slot as usize]
    }
}

/// Stable subsystem slot assignments.
/// NEVER reorder or remove entries. Only append.
/// Reordering changes every subsystem's seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum SubsystemSlot {
    Wanted  = 0,
    Chase   = 1,
    Custody = 2,
    // Add new subsystems here, append only.
}

impl SubsystemSlot {
    pub const ALL: [SubsystemSlot; 3] = [Self::Wanted, Self::Chase, Self::Custody];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Wanted  => "wanted",
            Self::Chase   => "chase",
            Self::Custody => "custody",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_are_reproducible_per_slot() {
        let mut a = RngBank::new(12345);
        let mut b = RngBank::new(12345);
        for _ in 0..16 {
            assert_eq!(
                a.stream(SubsystemSlot::Chase).next_u64(),
                b.stream(SubsystemSlot::Chase).next_u64()
            );
        }
    }

    #[test]
    fn slots_draw_independent_streams() {
        let mut bank = RngBank::new(7);
        let chase = bank.stream(SubsystemSlot::Chase).next_u64();
        let custody = bank.stream(SubsystemSlot::Custody).next_u64();
        assert_ne!(chase, custody);
    }

    #[test]
    fn range_inclusive_stays_in_bounds() {
        let mut rng = SubsystemRng::new(99, 2);
        for _ in 0..200 {
            let v = rng.range_inclusive(2, 5);
            assert!((2..=5).contains(&v), "out of range: {v}");
        }
        assert_eq!(rng.range_inclusive(4, 4), 4);
    }
}
