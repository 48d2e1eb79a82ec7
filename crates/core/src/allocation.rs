use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{AssociationId, MacAddress, BROADCAST_ASSOCIATION_ID};

/// One entry of the Data Transfer Interval schedule announced by the PCP.
///
/// `relative_start_time` is measured from the start of the DTI. The PCP
/// resolves association ids to addresses so stations can steer towards
/// peers they never associated with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPeriodAllocation {
    pub relative_start_time: Duration,
    pub duration: Duration,
    pub is_contention_based: bool,
    pub source_association_id: AssociationId,
    pub destination_association_id: AssociationId,
    pub source_address: MacAddress,
    pub destination_address: MacAddress,
    pub must_do_receive_sector_sweep: bool,
}

impl AccessPeriodAllocation {
    pub fn contention_based(relative_start_time: Duration, duration: Duration) -> Self {
        Self {
            relative_start_time,
            duration,
            is_contention_based: true,
            source_association_id: BROADCAST_ASSOCIATION_ID,
            destination_association_id: BROADCAST_ASSOCIATION_ID,
            source_address: MacAddress::BROADCAST,
            destination_address: MacAddress::BROADCAST,
            must_do_receive_sector_sweep: false,
        }
    }

    pub fn service_period(
        relative_start_time: Duration,
        duration: Duration,
        source: (AssociationId, MacAddress),
        destination: (AssociationId, MacAddress),
    ) -> Self {
        Self {
            relative_start_time,
            duration,
            is_contention_based: false,
            source_association_id: source.0,
            destination_association_id: destination.0,
            source_address: source.1,
            destination_address: destination.1,
            must_do_receive_sector_sweep: false,
        }
    }

    pub fn with_receive_sector_sweep(mut self) -> Self {
        self.must_do_receive_sector_sweep = true;
        self
    }

    pub fn relative_end_time(&self) -> Duration {
        self.relative_start_time + self.duration
    }

    pub fn involves(&self, association_id: AssociationId) -> bool {
        self.source_association_id == association_id
            || self.destination_association_id == association_id
    }
}

/// Checks that a schedule is sorted by start time and free of overlaps.
pub fn is_well_formed(allocations: &[AccessPeriodAllocation]) -> bool {
    allocations
        .windows(2)
        .all(|pair| pair[0].relative_end_time() <= pair[1].relative_start_time)
}
