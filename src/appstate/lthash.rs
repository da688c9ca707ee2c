//! LTHash: a 128-byte associative, commutative hash.
//!
//! The digest is treated as 64 little-endian u16 lanes; mutations are
//! HKDF-expanded to 128 bytes and folded in with lane-wise wrapping
//! addition (or subtraction for removals). Order of operations never
//! affects the result, and `add` undoes `sub` exactly.

use crate::crypto::hkdf;

/// Digest width in bytes.
pub const LTHASH_SIZE: usize = 128;

/// Domain-separation info for mutation expansion.
const EXPAND_INFO: &[u8] = b"WhatsApp Patch Integrity";

pub type LtHash = [u8; LTHASH_SIZE];

/// Expand one mutation's MAC material to a full-width summand.
pub fn expand(parts: &[&[u8]]) -> LtHash {
    let ikm: Vec<u8> = parts.concat();
    let okm = hkdf::derive(None, &ikm, EXPAND_INFO, LTHASH_SIZE);
    okm.try_into().expect("expanded to LTHASH_SIZE")
}

fn fold(hash: &mut LtHash, input: &LtHash, subtract: bool) {
    for i in (0..LTHASH_SIZE).step_by(2) {
        let lane = u16::from_le_bytes([hash[i], hash[i + 1]]);
        let operand = u16::from_le_bytes([input[i], input[i + 1]]);
        let folded = if subtract {
            lane.wrapping_sub(operand)
        } else {
            lane.wrapping_add(operand)
        };
        hash[i..i + 2].copy_from_slice(&folded.to_le_bytes());
    }
}

/// Fold a mutation in.
pub fn add(hash: &mut LtHash, input: &LtHash) {
    fold(hash, input, false);
}

/// Fold a mutation out.
pub fn sub(hash: &mut LtHash, input: &LtHash) {
    fold(hash, input, true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_lthash() -> impl Strategy<Value = Box<LtHash>> {
        proptest::collection::vec(any::<u8>(), LTHASH_SIZE)
            .prop_map(|v| Box::new(<LtHash>::try_from(v.as_slice()).unwrap()))
    }

    #[test]
    fn test_add_sub_inverse() {
        let mut hash = [0u8; LTHASH_SIZE];
        let m = expand(&[b"index mac", b"value mac"]);
        add(&mut hash, &m);
        sub(&mut hash, &m);
        assert_eq!(hash, [0u8; LTHASH_SIZE]);
    }

    #[test]
    fn test_expansion_is_keyed_by_content() {
        assert_ne!(expand(&[b"a"]), expand(&[b"b"]));
        // Multi-part input equals its concatenation.
        assert_eq!(expand(&[b"ab", b"cd"]), expand(&[b"abcd"]));
    }

    proptest! {
        #[test]
        fn prop_commutative(a in arb_lthash(), b in arb_lthash()) {
            let mut left = [3u8; LTHASH_SIZE];
            let mut right = [3u8; LTHASH_SIZE];
            add(&mut left, &a);
            add(&mut left, &b);
            add(&mut right, &b);
            add(&mut right, &a);
            prop_assert_eq!(left, right);
        }

        #[test]
        fn prop_sub_undoes_add(h in arb_lthash(), m in arb_lthash()) {
            let mut current = *h;
            add(&mut current, &m);
            sub(&mut current, &m);
            prop_assert_eq!(current, *h);
        }
    }
}
