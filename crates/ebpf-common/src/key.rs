//! Encryption key indices and the negotiation rule between two nodes.
//!
//! Each node advertises the index of its currently active IPsec key. A
//! packet can only be encrypted with a key that both ends have installed,
//! so the egress path picks one index from the local and peer epochs
//! without any handshake.

/// Highest key index. The mark reserves 4 bits for the key, and 15 is also
/// the rollover sentinel: the index following 15 is 1.
pub const MAX_KEY_INDEX: u8 = 15;

/// Key index meaning "no encryption".
pub const KEY_INDEX_DISABLED: u8 = 0;

/// A key index in `[0, 15]`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyIndex(u8);

impl KeyIndex {
    pub const DISABLED: Self = Self(KEY_INDEX_DISABLED);
    pub const MAX: Self = Self(MAX_KEY_INDEX);

    /// Build a key index, rejecting values that do not fit in 4 bits.
    #[inline]
    pub const fn new(raw: u8) -> Option<Self> {
        if raw <= MAX_KEY_INDEX {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Build a key index from a raw map value, keeping only the low 4 bits.
    #[inline]
    pub const fn from_bits(raw: u8) -> Self {
        Self(raw & MAX_KEY_INDEX)
    }

    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_enabled(self) -> bool {
        self.0 != KEY_INDEX_DISABLED
    }

    /// The index a rotation moves to: 1, 2, ... 15, 1, ...
    ///
    /// A disabled key stays disabled; enabling encryption is an explicit
    /// operator action, not a rotation.
    #[inline]
    pub const fn next(self) -> Self {
        match self.0 {
            KEY_INDEX_DISABLED => Self::DISABLED,
            MAX_KEY_INDEX => Self(1),
            n => Self(n + 1),
        }
    }

    /// Whether `self` and `other` are the same generation or one rotation
    /// apart (including the 15 → 1 wrap).
    #[inline]
    pub const fn is_adjacent(self, other: Self) -> bool {
        if !self.is_enabled() || !other.is_enabled() {
            return self.0 == other.0;
        }
        self.0 == other.0 || self.next().0 == other.0 || other.next().0 == self.0
    }
}

/// Pick the key index used to encrypt towards a peer.
///
/// Either side at 0 yields 0. Otherwise the older of the two generations
/// wins, because it is guaranteed to be installed on both nodes. Key
/// indices only ever move forward by one, so when one side sits at the
/// sentinel (15) and the other at 1 the sentinel is the older one.
/// Indices more than one rotation apart are not disambiguated: the
/// numerically smaller index is returned.
#[inline]
pub const fn select_key(local: KeyIndex, peer: KeyIndex) -> KeyIndex {
    if peer.0 == MAX_KEY_INDEX {
        return if local.0 == 1 { peer } else { local };
    }
    if local.0 == MAX_KEY_INDEX {
        return if peer.0 == 1 { local } else { peer };
    }
    if local.0 < peer.0 { local } else { peer }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(n: u8) -> KeyIndex {
        KeyIndex::new(n).unwrap()
    }

    #[test]
    fn new_rejects_values_above_four_bits() {
        assert_eq!(KeyIndex::new(15), Some(KeyIndex::MAX));
        assert_eq!(KeyIndex::new(16), None);
        assert_eq!(KeyIndex::new(255), None);
    }

    #[test]
    fn from_bits_masks_high_nibble() {
        assert_eq!(KeyIndex::from_bits(0x13).get(), 3);
        assert_eq!(KeyIndex::from_bits(0xF0).get(), 0);
        assert_eq!(KeyIndex::from_bits(15).get(), 15);
    }

    #[test]
    fn next_wraps_from_sentinel_to_one() {
        assert_eq!(k(1).next(), k(2));
        assert_eq!(k(14).next(), k(15));
        assert_eq!(k(15).next(), k(1));
        assert_eq!(KeyIndex::DISABLED.next(), KeyIndex::DISABLED);
    }

    #[test]
    fn adjacency_includes_wrap() {
        assert!(k(3).is_adjacent(k(4)));
        assert!(k(4).is_adjacent(k(3)));
        assert!(k(15).is_adjacent(k(1)));
        assert!(k(1).is_adjacent(k(15)));
        assert!(k(7).is_adjacent(k(7)));
        assert!(!k(2).is_adjacent(k(15)));
        assert!(!k(3).is_adjacent(k(5)));
        assert!(!KeyIndex::DISABLED.is_adjacent(k(1)));
        assert!(KeyIndex::DISABLED.is_adjacent(KeyIndex::DISABLED));
    }

    // ── select_key ───────────────────────────────────────────────────

    #[test]
    fn select_key_scenarios() {
        assert_eq!(select_key(k(3), k(4)), k(3));
        assert_eq!(select_key(k(15), k(1)), k(15));
        assert_eq!(select_key(k(2), k(15)), k(2));
        assert_eq!(select_key(k(15), k(15)), k(15));
        assert_eq!(select_key(k(9), k(9)), k(9));
    }

    #[test]
    fn select_key_is_commutative_over_full_domain() {
        for a in 0..=MAX_KEY_INDEX {
            for b in 0..=MAX_KEY_INDEX {
                assert_eq!(
                    select_key(k(a), k(b)),
                    select_key(k(b), k(a)),
                    "select_key({a}, {b}) not commutative"
                );
            }
        }
    }

    #[test]
    fn select_key_zero_disables() {
        for n in 0..=MAX_KEY_INDEX {
            assert_eq!(select_key(KeyIndex::DISABLED, k(n)), KeyIndex::DISABLED);
            assert_eq!(select_key(k(n), KeyIndex::DISABLED), KeyIndex::DISABLED);
        }
    }

    #[test]
    fn select_key_adjacent_pairs_pick_older_generation() {
        for a in 1..=MAX_KEY_INDEX {
            let b = k(a).next();
            // `a` is one rotation behind `b`, so `a` is installed on both ends.
            assert_eq!(select_key(k(a), b), k(a), "pair ({a}, {})", b.get());
            assert_eq!(select_key(b, k(a)), k(a), "pair ({}, {a})", b.get());
        }
    }

    #[test]
    fn select_key_never_exceeds_max() {
        for a in 0..=MAX_KEY_INDEX {
            for b in 0..=MAX_KEY_INDEX {
                assert!(select_key(k(a), k(b)).get() <= MAX_KEY_INDEX);
            }
        }
    }

    #[test]
    fn select_key_distant_pairs_fall_back_to_smaller() {
        // More than one rotation apart: not disambiguated.
        assert_eq!(select_key(k(2), k(5)), k(2));
        assert_eq!(select_key(k(15), k(3)), k(3));
        assert_eq!(select_key(k(14), k(1)), k(1));
    }
}
