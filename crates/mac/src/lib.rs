//! 802.11ad directional beamforming station management for the DMG simulator

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod device;
pub mod peer_link;
pub mod scanning;
pub mod sector_selector;
pub mod station;
pub mod timer;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{NodeDirectory, ParameterSet, StationConfig};
pub use device::DmgDevice;
pub use peer_link::PeerLinkRecord;
pub use scanning::{ChannelScanningController, ScannerConfig, StrongestBeaconScanner};
pub use sector_selector::{BeamformingSectorSelector, EwmaSectorSelector, SectorMetric};
pub use station::{DmgStation, StationState, SuperframePhase, TimedEvent, TimerSlot};
pub use timer::{EventId, Scheduler, Timer};

/// Unsatisfiable scenario setup. Always fatal for the whole simulation run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{parameter}: malformed value {value:?}")]
    Malformed { parameter: String, value: String },

    #[error("{parameter}: forced rx sector for node {node} has no forced tx sector")]
    ForcedRxWithoutTx { parameter: String, node: u32 },

    #[error("{parameter}: node {node} is received from in a station-to-station period without a forced rx sector")]
    MissingForcedRxSector { parameter: String, node: u32 },

    #[error("{parameter}: node {node} not found")]
    UnknownNode { parameter: String, node: u32 },

    #[error("{parameter}: ssid is {len} bytes, limit is {max}")]
    SsidTooLong {
        parameter: String,
        len: usize,
        max: usize,
    },

    #[error("{parameter}: {detail}")]
    TimingViolation { parameter: String, detail: String },
}

impl ConfigError {
    /// Name of the parameter the operator has to fix.
    pub fn parameter(&self) -> &str {
        match self {
            ConfigError::Malformed { parameter, .. }
            | ConfigError::ForcedRxWithoutTx { parameter, .. }
            | ConfigError::MissingForcedRxSector { parameter, .. }
            | ConfigError::UnknownNode { parameter, .. }
            | ConfigError::SsidTooLong { parameter, .. }
            | ConfigError::TimingViolation { parameter, .. } => parameter,
        }
    }

    pub(crate) fn timing(parameter: &str, detail: impl Into<String>) -> Self {
        ConfigError::TimingViolation {
            parameter: parameter.to_string(),
            detail: detail.into(),
        }
    }
}

/// Per-station counters, reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationStats {
    pub beacons_received: u64,
    pub sector_sweep_frames_sent: u64,
    pub sector_sweep_frames_received: u64,
    pub feedback_received: u64,
    pub feedback_timeouts: u64,
    pub receive_sector_sweeps: u64,
    pub authentications_started: u64,
    pub associations: u64,
    pub disassociations: u64,
    pub handovers: u64,
    pub access_periods_served: u64,
    pub ignored_frames: u64,
}
