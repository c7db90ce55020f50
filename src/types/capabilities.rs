/// Optional-operation capability set
use std::fmt;

use serde::{Deserialize, Serialize};

/// Optional driver operation, identified by a stable bit index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Capability {
    GetVersion = 0,
    SetVersion = 1,
    GetClusterSize = 2,
    SetClusterSize = 3,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::GetVersion,
        Capability::SetVersion,
        Capability::GetClusterSize,
        Capability::SetClusterSize,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::GetVersion => write!(f, "get-version"),
            Capability::SetVersion => write!(f, "set-version"),
            Capability::GetClusterSize => write!(f, "get-cluster-size"),
            Capability::SetClusterSize => write!(f, "set-cluster-size"),
        }
    }
}

/// Bitset of supported capabilities, keyed by [`Capability::id`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(u64);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.add(capability);
        self
    }

    pub fn add(&mut self, capability: Capability) {
        self.0 |= 1 << capability.id();
    }

    pub fn remove(&mut self, capability: Capability) {
        self.0 &= !(1 << capability.id());
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.0 & (1 << capability.id()) != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.has(*c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_query() {
        let mut caps = Capabilities::new()
            .with(Capability::GetVersion)
            .with(Capability::GetClusterSize);
        assert!(caps.has(Capability::GetVersion));
        assert!(!caps.has(Capability::SetVersion));

        caps.remove(Capability::GetVersion);
        assert_eq!(caps.iter().collect::<Vec<_>>(), vec![Capability::GetClusterSize]);
    }

    #[test]
    fn test_serializes_as_bits() {
        let caps = Capabilities::new()
            .with(Capability::GetVersion)
            .with(Capability::SetClusterSize);
        assert_eq!(serde_json::to_string(&caps).unwrap(), "9");
    }
}
