//! value types and management frames shared by the DMG simulator

use thiserror::Error;

pub mod allocation;
pub mod frames;
pub mod types;

pub use allocation::AccessPeriodAllocation;
pub use frames::{
    DirectionalBeacon, Frame, FrameBody, SectorSweep, SectorSweepFeedback, SweepDirection,
};
pub use types::*;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("frame encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),
}
