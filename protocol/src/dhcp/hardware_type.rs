//! BOOTP hardware type module.

use std::fmt;

/// Hardware address type as assigned in RFC 1700.
///
/// Values the bridge does not care about are kept so that they survive a decode-encode cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareType {
    Ethernet,
    Other(u8),
}

impl From<u8> for HardwareType {
    fn from(value: u8) -> Self {
        match value {
            1 => HardwareType::Ethernet,
            other => HardwareType::Other(other),
        }
    }
}

impl From<HardwareType> for u8 {
    fn from(value: HardwareType) -> Self {
        match value {
            HardwareType::Ethernet => 1,
            HardwareType::Other(other) => other,
        }
    }
}

impl fmt::Display for HardwareType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HardwareType::Ethernet => write!(f, "Ethernet"),
            HardwareType::Other(value) => write!(f, "Other({})", value),
        }
    }
}
