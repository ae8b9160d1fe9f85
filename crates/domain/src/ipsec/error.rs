use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpsecError {
    #[error("invalid key index {value}: must be in [0, 15]")]
    InvalidKeyIndex { value: u8 },

    #[error("node '{name}' has id 0, which is reserved")]
    InvalidNodeId { name: String },

    #[error("node {id} has an empty name")]
    EmptyNodeName { id: u16 },

    #[error("node {id} has no addresses")]
    NoNodeAddresses { id: u16 },

    #[error("duplicate node id {id}")]
    DuplicateNodeId { id: u16 },

    #[error("address {addr} is claimed by more than one node")]
    DuplicateAddress { addr: String },

    #[error("node {id} not found")]
    NodeNotFound { id: u16 },

    #[error("invalid prefix length /{prefix_len}")]
    InvalidPrefix { prefix_len: u8 },

    #[error("duplicate endpoint prefix {prefix}")]
    DuplicatePrefix { prefix: String },

    #[error("tunnel endpoint {addr} of {prefix} is unspecified")]
    InvalidTunnelEndpoint { prefix: String, addr: String },

    #[error("too many nodes: {count} exceeds {max}")]
    TooManyNodes { count: usize, max: usize },

    #[error("too many endpoints: {count} exceeds {max}")]
    TooManyEndpoints { count: usize, max: usize },

    #[error("encryption is disabled (key index 0); set a key before rotating")]
    EncryptionDisabled,
}
