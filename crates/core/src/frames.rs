use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::allocation::AccessPeriodAllocation;
use crate::types::{AssociationId, MacAddress, SectorId};
use crate::CoreError;

pub type StatusCode = u16;
pub type ReasonCode = u16;

pub const STATUS_SUCCESS: StatusCode = 0;
pub const STATUS_UNSPECIFIED_FAILURE: StatusCode = 1;
pub const REASON_LEAVING: ReasonCode = 3;
pub const REASON_INACTIVITY: ReasonCode = 4;

/// A management frame as it travels over the simulated air.
///
/// `duration` carries the 802.11 Duration field. In a directional beacon it
/// is the time remaining until the end of the Beacon Transmission Interval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub transmitter: MacAddress,
    pub receiver: MacAddress,
    pub duration: Duration,
    pub body: FrameBody,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FrameBody {
    Authentication {
        transaction_sequence: u16,
    },
    AssociationRequest {
        ssid: String,
        listen_interval: u16,
    },
    ReassociationRequest {
        ssid: String,
        listen_interval: u16,
        current_access_point: MacAddress,
    },
    AssociationResponse {
        status: StatusCode,
        association_id: AssociationId,
    },
    ReassociationResponse {
        status: StatusCode,
        association_id: AssociationId,
    },
    Disassociation {
        reason: ReasonCode,
    },
    /// Legacy (omnidirectional) beacon, never produced on a DMG channel.
    Beacon {
        ssid: String,
    },
    DirectionalBeacon(DirectionalBeacon),
    SectorSweep(SectorSweep),
    SectorSweepFeedback(SectorSweepFeedback),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirectionalBeacon {
    pub ssid: String,
    pub sector_id: SectorId,
    pub cdown: u16,
    pub beacon_interval: Duration,
    pub time_since_beacon_interval_start: Duration,
    pub abft_num_slots: u8,
    pub abft_frames_per_slot: u8,
    pub allocations: Vec<AccessPeriodAllocation>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepDirection {
    Initiator,
    Responder,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectorSweep {
    pub direction: SweepDirection,
    pub sector_id: SectorId,
    /// Number of sweep frames still to follow this one.
    pub cdown: u16,
    /// Best sector the transmitter has seen from the receiver so far.
    pub feedback_sector_id: SectorId,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectorSweepFeedback {
    pub best_sector_id: SectorId,
    pub snr_db: f64,
}

impl Frame {
    pub fn new(transmitter: MacAddress, receiver: MacAddress, body: FrameBody) -> Self {
        Self {
            transmitter,
            receiver,
            duration: Duration::ZERO,
            body,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn kind(&self) -> &'static str {
        match self.body {
            FrameBody::Authentication { .. } => "authentication",
            FrameBody::AssociationRequest { .. } => "association-request",
            FrameBody::ReassociationRequest { .. } => "reassociation-request",
            FrameBody::AssociationResponse { .. } => "association-response",
            FrameBody::ReassociationResponse { .. } => "reassociation-response",
            FrameBody::Disassociation { .. } => "disassociation",
            FrameBody::Beacon { .. } => "beacon",
            FrameBody::DirectionalBeacon(_) => "dmg-beacon",
            FrameBody::SectorSweep(_) => "sector-sweep",
            FrameBody::SectorSweepFeedback(_) => "sector-sweep-feedback",
        }
    }

    /// Number of bytes this frame occupies on the air.
    ///
    /// Integers are encoded at fixed width, so the length only depends on
    /// the shape of the frame and never on the times or ids it carries.
    pub fn encoded_len(&self) -> Result<usize, CoreError> {
        let config = bincode::config::standard().with_fixed_int_encoding();
        let bytes = bincode::serde::encode_to_vec(self, config)?;
        Ok(bytes.len())
    }
}
