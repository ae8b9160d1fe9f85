//! Security identities and the classification predicates the redirect
//! policy relies on.

/// Numeric identities reserved by the cluster. Workload identities are
/// allocated above `IDENTITY_FIRST_USER`.
pub const IDENTITY_UNKNOWN: u32 = 0;
pub const IDENTITY_HOST: u32 = 1;
pub const IDENTITY_WORLD: u32 = 2;
pub const IDENTITY_UNMANAGED: u32 = 3;
pub const IDENTITY_HEALTH: u32 = 4;
pub const IDENTITY_INIT: u32 = 5;
pub const IDENTITY_REMOTE_NODE: u32 = 6;
pub const IDENTITY_KUBE_APISERVER: u32 = 7;
pub const IDENTITY_INGRESS: u32 = 8;
pub const IDENTITY_WORLD_IPV4: u32 = 9;
pub const IDENTITY_WORLD_IPV6: u32 = 10;
pub const IDENTITY_ENCRYPTED_OVERLAY: u32 = 11;
pub const IDENTITY_FIRST_USER: u32 = 256;

/// Scope bits of node-local CIDR identities (top byte).
pub const IDENTITY_SCOPE_MASK: u32 = 0xFF00_0000;
pub const IDENTITY_SCOPE_LOCAL: u32 = 0x0100_0000;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SecurityIdentity(pub u32);

impl SecurityIdentity {
    pub const UNKNOWN: Self = Self(IDENTITY_UNKNOWN);
    pub const HOST: Self = Self(IDENTITY_HOST);
    pub const WORLD: Self = Self(IDENTITY_WORLD);
    pub const REMOTE_NODE: Self = Self(IDENTITY_REMOTE_NODE);
    pub const KUBE_APISERVER: Self = Self(IDENTITY_KUBE_APISERVER);

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_host(self) -> bool {
        self.0 == IDENTITY_HOST
    }

    #[inline]
    pub const fn is_unknown(self) -> bool {
        self.0 == IDENTITY_UNKNOWN
    }

    #[inline]
    pub const fn is_world(self) -> bool {
        matches!(
            self.0,
            IDENTITY_WORLD | IDENTITY_WORLD_IPV4 | IDENTITY_WORLD_IPV6
        )
    }

    /// CIDR identities allocated on this node for external prefixes.
    #[inline]
    pub const fn is_local_scope(self) -> bool {
        self.0 & IDENTITY_SCOPE_MASK == IDENTITY_SCOPE_LOCAL
    }

    /// Whether traffic owned by this identity stays within the cluster.
    ///
    /// Anything that is neither world nor a node-local CIDR identity counts,
    /// `UNKNOWN` included.
    #[inline]
    pub const fn is_cluster_member(self) -> bool {
        !self.is_world() && !self.is_local_scope()
    }

    /// Other nodes of the cluster, the API server included.
    #[inline]
    pub const fn is_remote_node(self) -> bool {
        matches!(self.0, IDENTITY_REMOTE_NODE | IDENTITY_KUBE_APISERVER)
    }
}

impl From<u32> for SecurityIdentity {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_identities_are_not_cluster_members() {
        for id in [IDENTITY_WORLD, IDENTITY_WORLD_IPV4, IDENTITY_WORLD_IPV6] {
            let id = SecurityIdentity(id);
            assert!(id.is_world());
            assert!(!id.is_cluster_member());
        }
    }

    #[test]
    fn local_scope_cidr_identities_are_not_cluster_members() {
        let cidr = SecurityIdentity(0x0100_0042);
        assert!(cidr.is_local_scope());
        assert!(!cidr.is_cluster_member());
        assert!(!SecurityIdentity(0x0200_0042).is_local_scope());
    }

    #[test]
    fn workloads_and_reserved_cluster_ids_are_members() {
        for id in [
            IDENTITY_UNKNOWN,
            IDENTITY_HOST,
            IDENTITY_HEALTH,
            IDENTITY_REMOTE_NODE,
            IDENTITY_INGRESS,
            IDENTITY_FIRST_USER,
            12_345,
            0x00FF_FFFF,
        ] {
            assert!(SecurityIdentity(id).is_cluster_member(), "identity {id}");
        }
    }

    #[test]
    fn remote_node_predicate() {
        assert!(SecurityIdentity::REMOTE_NODE.is_remote_node());
        assert!(SecurityIdentity::KUBE_APISERVER.is_remote_node());
        assert!(!SecurityIdentity::HOST.is_remote_node());
        assert!(!SecurityIdentity(IDENTITY_FIRST_USER).is_remote_node());
    }
}
