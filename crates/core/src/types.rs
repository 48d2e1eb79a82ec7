use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub type NodeId = u32;
pub type InterfaceIndex = u8;
pub type ChannelNumber = u32;
pub type SectorId = u32;
pub type AssociationId = u16;

/// Absolute simulated time, measured from the start of the run.
pub type SimTime = Duration;

pub const INVALID_SECTOR_ID: SectorId = SectorId::MAX;
/// Cached "best sector" value meaning no beamformed link exists yet.
pub const QUASI_OMNI_SECTOR_ID: SectorId = SectorId::MAX - 1;

pub const INVALID_ASSOCIATION_ID: AssociationId = AssociationId::MAX;
pub const PCP_ASSOCIATION_ID: AssociationId = 0;
pub const BROADCAST_ASSOCIATION_ID: AssociationId = 255;

pub const MAX_SSID_LEN: usize = 32;

/// Link-layer address of one wireless interface.
///
/// Addresses are derived from the owning node and the interface index, the
/// way the simulator names interfaces; there is no vendor prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacAddress {
    node_id: NodeId,
    interface_index: InterfaceIndex,
}

impl MacAddress {
    pub const INVALID: MacAddress = MacAddress {
        node_id: NodeId::MAX,
        interface_index: InterfaceIndex::MAX,
    };

    pub const BROADCAST: MacAddress = MacAddress {
        node_id: NodeId::MAX - 1,
        interface_index: InterfaceIndex::MAX,
    };

    pub const fn new(node_id: NodeId, interface_index: InterfaceIndex) -> Self {
        Self { node_id, interface_index }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn interface_index(&self) -> InterfaceIndex {
        self.interface_index
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::INVALID => write!(f, "invalid"),
            Self::BROADCAST => write!(f, "broadcast"),
            _ => write!(f, "{}.{}", self.node_id, self.interface_index),
        }
    }
}
