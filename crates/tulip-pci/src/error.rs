use net_backend::{MacAddr, MacAddrParseError, NetBackendError};
use pci::FabricError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid station address: {0}")]
    InvalidMac(#[from] MacAddrParseError),

    #[error("station address {0} is a group address")]
    MulticastMac(MacAddr),

    #[error("station address must not be all zeros")]
    ZeroMac,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("failed to allocate {resource}")]
    Resource {
        resource: &'static str,
        #[source]
        source: FabricError,
    },

    #[error("failed to attach network backend")]
    Backend(#[from] NetBackendError),

    #[error("controller initialization failed: {0}")]
    Controller(String),

    #[error("{0} already allocated")]
    AlreadyAllocated(&'static str),
}

/// Failure to realize a device. The device is not live after either variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Init(#[from] InitError),
}
