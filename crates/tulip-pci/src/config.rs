use net_backend::MacAddr;
use pci::PciBdf;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// User-facing device properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TulipConfig {
    /// Station address. Derived from the PCI slot when unset.
    pub mac: Option<MacAddr>,
    /// Name of the host network backend to attach to.
    pub netdev: Option<String>,
}

impl TulipConfig {
    pub fn with_mac_str(mut self, mac: &str) -> Result<Self, ConfigError> {
        self.mac = Some(mac.parse()?);
        Ok(self)
    }

    pub fn with_netdev(mut self, netdev: impl Into<String>) -> Self {
        self.netdev = Some(netdev.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mac.map_or(Ok(()), check_station_address)
    }

    pub fn station_address(&self, bdf: PciBdf) -> MacAddr {
        self.mac.unwrap_or_else(|| MacAddr::default_for_slot(bdf.device))
    }
}

/// A station address must be a non-zero individual address.
pub(crate) fn check_station_address(mac: MacAddr) -> Result<(), ConfigError> {
    if mac.is_zero() {
        Err(ConfigError::ZeroMac)
    } else if mac.is_multicast() {
        Err(ConfigError::MulticastMac(mac))
    } else {
        Ok(())
    }
}
