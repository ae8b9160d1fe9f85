//! Packet mark codec.
//!
//! The 32-bit `skb->mark` is shared with unrelated consumers, so the IPsec
//! path multiplexes a tiny protocol onto it:
//!
//! ```text
//!  31                16 15    12 11       8 7          0
//! +--------------------+--------+----------+------------+
//! |      node id       |  key   |  magic   |  (unused)  |
//! +--------------------+--------+----------+------------+
//! ```
//!
//! The magic nibble (bits 8-11) fully determines how the remaining bits are
//! read. Decrypt marks carry a node id but no key: the transform resolves
//! the key from the SPI on the wire.

use crate::key::KeyIndex;

/// 16-bit identifier of a cluster node. 0 is unknown.
pub type NodeId = u16;

/// Node id meaning "not resolved".
pub const NODE_ID_UNKNOWN: NodeId = 0;

/// Selects the magic nibble.
pub const MARK_MAGIC_HOST_MASK: u32 = 0x0F00;
/// Selects the magic nibble and the key nibble.
pub const MARK_MAGIC_KEY_MASK: u32 = 0xFF00;

pub const MARK_MAGIC_DECRYPT: u32 = 0x0D00;
pub const MARK_MAGIC_ENCRYPT: u32 = 0x0E00;

/// Set by the overlay program on encapsulated packets; the source identity
/// is carried in the remaining mark bits.
pub const MARK_MAGIC_OVERLAY: u32 = 0x0400;
/// Overlay packet that was already encrypted before encapsulation.
pub const MARK_MAGIC_OVERLAY_ENCRYPTED: u32 = 0x1400;

const KEY_SHIFT: u32 = 12;
const KEY_FIELD_MASK: u32 = 0x0F;
const NODE_SHIFT: u32 = 16;

/// Typed view over a raw packet mark.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EncryptionMark(u32);

impl EncryptionMark {
    /// Mark requesting encryption with `key` towards `node`.
    #[inline]
    pub const fn encrypt(key: KeyIndex, node: NodeId) -> Self {
        Self(
            ((key.get() as u32 & KEY_FIELD_MASK) << KEY_SHIFT)
                | MARK_MAGIC_ENCRYPT
                | ((node as u32) << NODE_SHIFT),
        )
    }

    /// Mark telling the transform that `node` sent this ESP packet.
    #[inline]
    pub const fn decrypt(node: NodeId) -> Self {
        Self(MARK_MAGIC_DECRYPT | ((node as u32) << NODE_SHIFT))
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_encrypt(self) -> bool {
        self.0 & MARK_MAGIC_HOST_MASK == MARK_MAGIC_ENCRYPT
    }

    #[inline]
    pub const fn is_decrypt(self) -> bool {
        is_decrypt_mark(self.0)
    }

    /// Key index carried by an encrypt mark; `None` for any other mark.
    #[inline]
    pub const fn key(self) -> Option<KeyIndex> {
        if self.is_encrypt() {
            Some(KeyIndex::from_bits(
                ((self.0 >> KEY_SHIFT) & KEY_FIELD_MASK) as u8,
            ))
        } else {
            None
        }
    }

    /// Node id carried by an encrypt or decrypt mark.
    #[inline]
    pub const fn node_id(self) -> Option<NodeId> {
        if self.is_encrypt() || self.is_decrypt() {
            Some((self.0 >> NODE_SHIFT) as NodeId)
        } else {
            None
        }
    }
}

impl From<EncryptionMark> for u32 {
    fn from(mark: EncryptionMark) -> Self {
        mark.0
    }
}

#[inline]
pub const fn is_decrypt_mark(mark: u32) -> bool {
    mark & MARK_MAGIC_HOST_MASK == MARK_MAGIC_DECRYPT
}

#[inline]
pub const fn is_overlay_mark(mark: u32) -> bool {
    mark & MARK_MAGIC_HOST_MASK == MARK_MAGIC_OVERLAY
}

#[inline]
pub const fn is_overlay_encrypted(mark: u32) -> bool {
    mark & MARK_MAGIC_KEY_MASK == MARK_MAGIC_OVERLAY_ENCRYPTED
}

/// Source security identity stashed in an overlay mark.
///
/// The overlay program stores the low 16 bits of the identity in the high
/// half of the mark and the next 8 bits in the low byte.
#[inline]
pub const fn identity_from_mark(mark: u32) -> u32 {
    ((mark & 0xFF) << 16) | (mark >> 16)
}
