//! Network policy: consensus constants, difficulty and reward rules.
//!
//! Every function here must be deterministic across nodes. All arithmetic is
//! integer arithmetic; the target is computed with an explicit 256-bit long
//! division so two nodes can never disagree on a rounding direction.

use crate::crypto::Hash;

/// Target time between blocks in seconds.
pub const BLOCK_TIME: u64 = 60;

/// Fixed block reward credited to the miner on top of the transaction fees.
pub const BLOCK_REWARD: u64 = 5_000_000;

/// Number of blocks for which a transaction stays eligible for inclusion,
/// counted from its validity start height.
pub const TRANSACTION_VALIDITY_WINDOW: u32 = 120;

/// Maximum per-block difficulty adjustment factor (up or down).
pub const MAX_ADJUSTMENT_FACTOR: u64 = 4;

/// Lowest allowed difficulty.
pub const MIN_DIFFICULTY: u64 = 1;

/// Maximum tolerated clock drift for block timestamps, in seconds.
pub const ALLOWED_TIMESTAMP_DRIFT: u64 = 600;

/// Block reward at a given height. The emission schedule is flat; the
/// function exists so the reward stays a pure function of height.
pub fn block_reward_at(_height: u32) -> u64 {
    BLOCK_REWARD
}

/// Derive the proof-of-work target from a declared difficulty:
/// `target = (2^256 - 1) / difficulty`, big-endian.
///
/// Computed by long division over the 32 target bytes, so the result is
/// exact and strictly monotonically decreasing in the difficulty.
pub fn target_from_difficulty(difficulty: u64) -> Hash {
    let difficulty = difficulty.max(MIN_DIFFICULTY) as u128;
    let mut target = [0u8; 32];
    let mut rem: u128 = 0;
    for byte in target.iter_mut() {
        let cur = (rem << 8) | 0xff;
        *byte = (cur / difficulty) as u8;
        rem = cur % difficulty;
    }
    target
}

/// The work contributed by a block of the given difficulty. Monotonic:
/// higher difficulty always means more work.
pub fn work_for_difficulty(difficulty: u64) -> u128 {
    difficulty as u128
}

/// Proof-of-work predicate: the header hash, read as a big-endian integer,
/// must not exceed the target derived from the declared difficulty.
pub fn is_proof_of_work(hash: &Hash, difficulty: u64) -> bool {
    *hash <= target_from_difficulty(difficulty)
}

/// Compute the required difficulty for the block following `parent`, given
/// the successor's timestamp. Per-block retargeting: scale the parent's
/// difficulty by `BLOCK_TIME / elapsed`, clamped to `MAX_ADJUSTMENT_FACTOR`
/// in either direction and floored at `MIN_DIFFICULTY`.
pub fn next_difficulty(parent_difficulty: u64, parent_timestamp: u64, timestamp: u64) -> u64 {
    let elapsed = timestamp.saturating_sub(parent_timestamp).max(1);
    let scaled = parent_difficulty.saturating_mul(BLOCK_TIME) / elapsed;

    let upper = parent_difficulty.saturating_mul(MAX_ADJUSTMENT_FACTOR);
    let lower = (parent_difficulty / MAX_ADJUSTMENT_FACTOR).max(MIN_DIFFICULTY);
    scaled.clamp(lower, upper)
}
