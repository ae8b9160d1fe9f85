use thiserror::Error;

use crate::ipsec::error::IpsecError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate entry: {0}")]
    Duplicate(String),

    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("engine error: {0}")]
    EngineError(String),
}

impl From<IpsecError> for DomainError {
    fn from(err: IpsecError) -> Self {
        match err {
            IpsecError::NodeNotFound { .. } => Self::NotFound(err.to_string()),
            IpsecError::DuplicateNodeId { .. }
            | IpsecError::DuplicateAddress { .. }
            | IpsecError::DuplicatePrefix { .. } => Self::Duplicate(err.to_string()),
            IpsecError::TooManyNodes { .. }
            | IpsecError::TooManyEndpoints { .. }
            | IpsecError::EncryptionDisabled => Self::EngineError(err.to_string()),
            IpsecError::InvalidKeyIndex { .. }
            | IpsecError::InvalidNodeId { .. }
            | IpsecError::EmptyNodeName { .. }
            | IpsecError::NoNodeAddresses { .. }
            | IpsecError::InvalidPrefix { .. }
            | IpsecError::InvalidTunnelEndpoint { .. } => Self::InvalidEntry(err.to_string()),
        }
    }
}
