//! Effective-balance arithmetic.
//!
//! The token exposes a split multiplier scaled by [`SCALE`]. A holder's
//! effective balance is `floor(balance * multiplier / SCALE)`. The product is
//! taken in 512 bits so no intermediate value can overflow.

use alloy_primitives::{U256, U512};

/// Fixed-point scale of the split multiplier (`1e18` means 1x).
pub const SCALE: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// `floor(balance * multiplier / SCALE)`, or `None` if the result does not fit
/// in 256 bits.
pub fn effective_balance(balance: U256, multiplier: U256) -> Option<U256> {
    let product = widen(balance) * widen(multiplier);
    narrow(product / widen(SCALE))
}

fn widen(value: U256) -> U512 {
    let mut limbs = [0u64; 8];
    limbs[..4].copy_from_slice(value.as_limbs());
    U512::from_limbs(limbs)
}

fn narrow(value: U512) -> Option<U256> {
    let limbs = value.as_limbs();
    if limbs[4..].iter().any(|limb| *limb != 0) {
        return None;
    }
    let mut low = [0u64; 4];
    low.copy_from_slice(&limbs[..4]);
    Some(U256::from_limbs(low))
}
