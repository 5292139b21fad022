//! Seeded session ordering.
//!
//! The presentation order is a pure function of the user id: a 32-bit
//! string hash seeds a small linear congruential generator that drives a
//! Fisher–Yates shuffle. No store or clock is involved, so the same id
//! yields the same order on every device and after every restart.

use std::collections::BTreeMap;

const LCG_MULTIPLIER: u64 = 9301;
const LCG_INCREMENT: u64 = 49297;
const LCG_MODULUS: u64 = 233_280;

/// Fold the UTF-16 code units of `user_id` into a wrapping 32-bit signed
/// accumulator (`hash = (hash * 31 - hash) + unit`) and return its absolute
/// value.
#[must_use]
pub fn seed_from_user_id(user_id: &str) -> u64 {
    let hash = user_id.encode_utf16().fold(0_i32, |hash, unit| {
        hash.wrapping_mul(31)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    });
    i64::from(hash).unsigned_abs()
}

/// Linear congruential generator yielding draws in `[0, 1)`.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    /// Start the sequence from `seed`.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Advance and return the next draw.
    #[allow(clippy::cast_precision_loss)]
    pub fn next_f64(&mut self) -> f64 {
        self.state = (self.state * LCG_MULTIPLIER + LCG_INCREMENT) % LCG_MODULUS;
        self.state as f64 / LCG_MODULUS as f64
    }
}

/// Deterministic permutation of `0..count` for `user_id`.
#[must_use]
pub fn assign_order(user_id: &str, count: usize) -> Vec<usize> {
    let mut rng = SeededRng::new(seed_from_user_id(user_id));
    let mut order: Vec<usize> = (0..count).collect();
    for i in (1..count).rev() {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let j = (rng.next_f64() * (i + 1) as f64).floor() as usize;
        order.swap(i, j);
    }
    order
}

/// Count, per variant id, how many of `orders` present that variant first.
///
/// Diagnostic only; used to eyeball counterbalancing across participants.
#[must_use]
pub fn order_distribution<'a, I>(orders: I) -> BTreeMap<usize, usize>
where
    I: IntoIterator<Item = &'a [usize]>,
{
    let mut counts = BTreeMap::new();
    for order in orders {
        if let Some(first) = order.first() {
            *counts.entry(*first).or_insert(0) += 1;
        }
    }
    counts
}

/// Whether `order` is a permutation of `0..count`.
#[must_use]
pub fn is_valid_order(order: &[usize], count: usize) -> bool {
    if order.len() != count {
        return false;
    }
    let mut seen = vec![false; count];
    for &id in order {
        if id >= count || seen[id] {
            return false;
        }
        seen[id] = true;
    }
    true
}
