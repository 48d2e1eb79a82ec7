//! BTI, A-BFT and DTI scheduling on the shared superframe timer slot.
//!
//! The first directional beacon of each beacon interval fixes the timeline:
//! the A-BFT starts one MBIFS after the BTI ends and is followed by the DTI,
//! whose allocations are walked in order until the interval ends.

use std::time::Duration;

use beamsim_core::{
    AccessPeriodAllocation, DirectionalBeacon, Frame, FrameBody, MacAddress, SectorSweep,
    SectorSweepFeedback, SweepDirection, INVALID_ASSOCIATION_ID,
};
use beamsim_core::allocation::is_well_formed;
use log::{debug, info, trace};
use rand::Rng;

use super::{DmgStation, StationState, SuperframePhase, SuperframeTimeline, TimerSlot};
use crate::config::{
    ABFT_SLOT_TIME_PARAMETER, ALLOCATION_SCHEDULE_PARAMETER, BEACON_INTERVAL_PARAMETER,
    FORCED_RX_SECTORS_PARAMETER,
};
use crate::device::DmgDevice;
use crate::scanning::BeaconSighting;
use crate::timer::Scheduler;
use crate::ConfigError;

impl<D: DmgDevice, S: Scheduler> DmgStation<D, S> {
    pub(super) fn on_superframe_event(&mut self, phase: SuperframePhase) -> Result<(), ConfigError> {
        match phase {
            SuperframePhase::BeaconTransmissionInterval => {
                if self.state == StationState::StartingUpBackgroundChannelScanning {
                    self.start_background_channel_scanning();
                } else {
                    self.enter_beacon_transmission_interval();
                }
                Ok(())
            }
            SuperframePhase::AssociationBeamformingTraining => {
                self.start_association_beamforming_training();
                Ok(())
            }
            SuperframePhase::AssociationBeamformingTrainingSlot => {
                self.transmit_sector_sweep_frame()
            }
            SuperframePhase::SectorSweepFeedbackTimeout => {
                self.on_sector_sweep_feedback_timeout();
                Ok(())
            }
            SuperframePhase::ReceiveSectorSweepNextSector => {
                self.receive_sector_sweep_next_sector()
            }
            SuperframePhase::DataTransferInterval => {
                self.timeline.allocation_index = 0;
                self.timeline.receive_sector_sweep_done = false;
                self.schedule_event_for_next_allocated_access_period_or_superframe()
            }
            SuperframePhase::AllocatedAccessPeriod => self.start_allocated_access_period(),
            SuperframePhase::AllocatedAccessPeriodAfterGap => {
                self.start_allocated_access_period_after_gap()
            }
        }
    }

    /// Listens quasi-omni for the next directional beacon.
    pub(super) fn enter_beacon_transmission_interval(&mut self) {
        self.disarm(TimerSlot::Superframe);
        self.quasi_omni();
        self.device.start_receiving_frames();
        self.timeline.waiting_for_beacon = true;
        trace!("{}: listening for beacons", self.address);
    }

    pub(super) fn on_directional_beacon(
        &mut self,
        transmitter: MacAddress,
        remaining_bti: Duration,
        beacon: DirectionalBeacon,
    ) -> Result<(), ConfigError> {
        let now = self.now();
        let channel = self.device.current_channel();
        let metric = self.last_frame_metric(beacon.sector_id);
        self.stats.beacons_received += 1;
        self.peer_mut(transmitter).record_sector_metric(metric);
        self.scanner.record_directional_beacon(
            now,
            channel,
            BeaconSighting {
                access_point: transmitter,
                ssid: beacon.ssid.clone(),
                rssi_dbm: metric.rssi_dbm,
            },
        );

        let forced_ap = self.config.forced_access_point;
        match self.state {
            StationState::ChannelScanning if forced_ap == Some(transmitter) => {
                self.adopt_forced_access_point(channel)
            }
            StationState::ChannelScanning | StationState::BackgroundChannelScanning => {
                return Ok(())
            }
            _ => {}
        }
        if transmitter != self.current_ap {
            self.ignore(transmitter, "beacon from another AP");
            return Ok(());
        }
        if self.state == StationState::EndingBackgroundChannelScanning {
            self.set_state(StationState::Associated);
        }
        if !self.timeline.waiting_for_beacon {
            return Ok(());
        }
        self.timeline.waiting_for_beacon = false;
        self.schedule_beacon_interval(now, remaining_bti, beacon)?;

        let established = self.peer_mut(transmitter).beamforming_established();
        if self.state == StationState::NotAssociated && forced_ap == Some(transmitter) && established
        {
            self.start_authentication();
        }
        Ok(())
    }

    fn schedule_beacon_interval(
        &mut self,
        now: Duration,
        remaining_bti: Duration,
        beacon: DirectionalBeacon,
    ) -> Result<(), ConfigError> {
        let abft_slot_time = match self.config.abft_slot_time_override {
            Some(slot_time) => slot_time,
            None => self
                .device
                .calculate_abft_slot_time(u32::from(beacon.abft_frames_per_slot)),
        };
        let abft_num_slots = u32::from(beacon.abft_num_slots);
        let beacon_interval_start = now.saturating_sub(beacon.time_since_beacon_interval_start);
        let abft_start = now + remaining_bti + self.device.medium_beamforming_interframe_space();
        let dti_start = abft_start + abft_slot_time * abft_num_slots;
        let dti_end = beacon_interval_start + beacon.beacon_interval;
        if dti_start >= dti_end {
            return Err(ConfigError::timing(
                ABFT_SLOT_TIME_PARAMETER,
                format!(
                    "{abft_num_slots} A-BFT slots of {abft_slot_time:?} end at {dti_start:?}, \
                     past the beacon interval end {dti_end:?}"
                ),
            ));
        }
        if !is_well_formed(&beacon.allocations) {
            return Err(ConfigError::timing(
                ALLOCATION_SCHEDULE_PARAMETER,
                "allocations overlap or are out of order",
            ));
        }
        if let Some(last) = beacon.allocations.last() {
            if dti_start + last.relative_end_time() > dti_end {
                return Err(ConfigError::timing(
                    ALLOCATION_SCHEDULE_PARAMETER,
                    format!(
                        "last allocation ends at {:?}, past the beacon interval end {dti_end:?}",
                        dti_start + last.relative_end_time()
                    ),
                ));
            }
        }

        self.timeline = SuperframeTimeline {
            beacon_interval_start,
            abft_start,
            abft_num_slots,
            abft_slot_time,
            data_transfer_interval_start: dti_start,
            data_transfer_interval_end: dti_end,
            allocations: beacon.allocations,
            ..SuperframeTimeline::default()
        };
        for peer in self.peers.values_mut() {
            peer.start_new_beacon_interval();
        }
        debug!(
            "{}: beacon interval at {:?}, A-BFT {:?}, DTI {:?}..{:?}",
            self.address, beacon_interval_start, abft_start, dti_start, dti_end
        );
        self.schedule_superframe(abft_start, SuperframePhase::AssociationBeamformingTraining);
        Ok(())
    }

    /// Picks a random A-BFT slot when the link to the AP still needs
    /// training, otherwise skips straight to the DTI.
    fn start_association_beamforming_training(&mut self) {
        let ap = self.current_ap;
        let needs_sweep = self.timeline.abft_num_slots > 0
            && !self.peer_mut(ap).beamforming_established();
        if !needs_sweep {
            let dti_start = self.timeline.data_transfer_interval_start;
            return self.schedule_superframe(dti_start, SuperframePhase::DataTransferInterval);
        }

        let slot = self.rng.random_range(0..self.timeline.abft_num_slots);
        let slot_start = self.timeline.abft_start + self.timeline.abft_slot_time * slot;
        assert!(
            slot_start < self.timeline.data_transfer_interval_start,
            "A-BFT slot {slot} starts at {slot_start:?}, inside the DTI"
        );
        self.timeline.abft_slot = Some(slot);
        self.timeline.abft_slot_start = slot_start;
        self.timeline.abft_slot_end = slot_start + self.timeline.abft_slot_time;
        self.timeline.sector_sweep_frames_to_send = self.device.number_of_antenna_sectors();
        self.timeline.sector_sweep_frame_count = 0;
        debug!("{}: sweeping towards {} in A-BFT slot {}", self.address, ap, slot);
        self.schedule_superframe(slot_start, SuperframePhase::AssociationBeamformingTrainingSlot);
    }

    /// Sends the next frame of our A-BFT sector sweep, one per antenna
    /// sector, then waits for feedback until the slot ends.
    fn transmit_sector_sweep_frame(&mut self) -> Result<(), ConfigError> {
        let now = self.now();
        let ap = self.current_ap;
        let to_send = self.timeline.sector_sweep_frames_to_send;
        let count = self.timeline.sector_sweep_frame_count;
        assert!(count < to_send, "sector sweep overran {to_send} frames");

        let feedback_sector_id = self.peer_mut(ap).best_peer_tx_sector();
        self.steer(count);
        let frame = Frame::new(
            self.address,
            ap,
            FrameBody::SectorSweep(SectorSweep {
                direction: SweepDirection::Initiator,
                sector_id: count,
                cdown: u16::try_from(to_send - count - 1).unwrap_or(u16::MAX),
                feedback_sector_id,
            }),
        );
        let end = self.device.transmit_sector_sweep_frame(frame);
        self.timeline.sector_sweep_frame_count = count + 1;
        self.stats.sector_sweep_frames_sent += 1;

        let slot_end = self.timeline.abft_slot_end;
        if count + 1 < to_send {
            let next_start = end + self.device.short_beamforming_interframe_space();
            let next_end = next_start + end.saturating_sub(now);
            if next_end > slot_end {
                return Err(ConfigError::timing(
                    ABFT_SLOT_TIME_PARAMETER,
                    format!(
                        "sector sweep frame {} of {to_send} would end at {next_end:?}, \
                         after the A-BFT slot ends at {slot_end:?}",
                        count + 2
                    ),
                ));
            }
            self.schedule_superframe(next_start, SuperframePhase::AssociationBeamformingTrainingSlot);
        } else {
            if end >= slot_end {
                return Err(ConfigError::timing(
                    ABFT_SLOT_TIME_PARAMETER,
                    format!(
                        "sector sweep ends at {end:?}, leaving no time for feedback \
                         before the A-BFT slot ends at {slot_end:?}"
                    ),
                ));
            }
            self.quasi_omni();
            self.device.start_receiving_frames();
            self.schedule_superframe(slot_end, SuperframePhase::SectorSweepFeedbackTimeout);
        }
        Ok(())
    }

    pub(super) fn on_sector_sweep(&mut self, transmitter: MacAddress, sweep: SectorSweep) {
        self.stats.sector_sweep_frames_received += 1;
        let metric = self.last_frame_metric(sweep.sector_id);
        self.peer_mut(transmitter).record_sector_metric(metric);
    }

    pub(super) fn on_sector_sweep_feedback(
        &mut self,
        transmitter: MacAddress,
        feedback: SectorSweepFeedback,
    ) {
        if transmitter != self.current_ap
            || self.next_phase != Some(SuperframePhase::SectorSweepFeedbackTimeout)
        {
            return self.ignore(transmitter, "sector sweep feedback");
        }
        self.stats.feedback_received += 1;
        self.peer_mut(transmitter)
            .record_tx_sector_feedback(feedback.best_sector_id, feedback.snr_db);
        info!(
            "{}: beamformed towards {} on sector {} ({:.1} dB)",
            self.address, transmitter, feedback.best_sector_id, feedback.snr_db
        );
        if self.state == StationState::NotAssociated {
            self.start_authentication();
        }
        let dti_start = self.timeline.data_transfer_interval_start;
        self.schedule_superframe(dti_start, SuperframePhase::DataTransferInterval);
    }

    fn on_sector_sweep_feedback_timeout(&mut self) {
        let ap = self.current_ap;
        debug!("{}: no sector sweep feedback from {}", self.address, ap);
        self.stats.feedback_timeouts += 1;
        self.peer_mut(ap).feedback_timed_out();
        let dti_start = self.timeline.data_transfer_interval_start;
        self.schedule_superframe(dti_start, SuperframePhase::DataTransferInterval);
    }

    fn schedule_event_for_next_allocated_access_period_or_superframe(
        &mut self,
    ) -> Result<(), ConfigError> {
        let now = self.now();
        let from = self.timeline.allocation_index;
        let Some(index) = self.get_allocated_access_period_index(from) else {
            self.timeline.allocation_index = self.timeline.allocations.len();
            let dti_end = self.timeline.data_transfer_interval_end;
            if dti_end < now {
                return Err(ConfigError::timing(
                    BEACON_INTERVAL_PARAMETER,
                    format!("beacon interval ended at {dti_end:?}, already past at {now:?}"),
                ));
            }
            self.schedule_superframe(dti_end, SuperframePhase::BeaconTransmissionInterval);
            return Ok(());
        };
        self.timeline.allocation_index = index;
        let start = self.timeline.data_transfer_interval_start
            + self.timeline.allocations[index].relative_start_time;
        if start < now {
            return Err(ConfigError::timing(
                ALLOCATION_SCHEDULE_PARAMETER,
                format!("allocation {index} starts at {start:?}, already past at {now:?}"),
            ));
        }
        self.schedule_superframe(start, SuperframePhase::AllocatedAccessPeriod);
        Ok(())
    }

    fn current_allocation(&self) -> AccessPeriodAllocation {
        let index = self.timeline.allocation_index;
        match self.timeline.allocations.get(index) {
            Some(allocation) => allocation.clone(),
            None => unreachable!("allocation {index} fired past the end of the schedule"),
        }
    }

    fn start_allocated_access_period(&mut self) -> Result<(), ConfigError> {
        let now = self.now();
        let allocation = self.current_allocation();
        let end = self.timeline.data_transfer_interval_start + allocation.relative_end_time();
        self.timeline.allocated_access_period_end = end;

        if allocation.must_do_receive_sector_sweep && !self.timeline.receive_sector_sweep_done {
            self.timeline.receive_sector_sweep_done = true;
            let sweep_end = now
                + self.device.receive_sector_sweep_sector_duration()
                    * self.device.number_of_antenna_sectors();
            if sweep_end > end {
                return Err(ConfigError::timing(
                    ALLOCATION_SCHEDULE_PARAMETER,
                    format!(
                        "receive sector sweep needs until {sweep_end:?}, allocation ends at {end:?}"
                    ),
                ));
            }
            self.stats.receive_sector_sweeps += 1;
            self.timeline.receive_sweep_sector = 0;
            self.device.start_receiving_frames();
            return self.receive_sector_sweep_next_sector();
        }
        self.continue_allocated_access_period(&allocation)
    }

    /// Dwells on each antenna sector in turn to learn our best receive
    /// sector from the PCP's sweep.
    fn receive_sector_sweep_next_sector(&mut self) -> Result<(), ConfigError> {
        let sector = self.timeline.receive_sweep_sector;
        if sector < self.device.number_of_antenna_sectors() {
            self.steer(sector);
            self.timeline.receive_sweep_sector += 1;
            let next = self.now() + self.device.receive_sector_sweep_sector_duration();
            self.schedule_superframe(next, SuperframePhase::ReceiveSectorSweepNextSector);
            return Ok(());
        }
        let allocation = self.current_allocation();
        self.continue_allocated_access_period(&allocation)
    }

    fn continue_allocated_access_period(
        &mut self,
        allocation: &AccessPeriodAllocation,
    ) -> Result<(), ConfigError> {
        let own_id = self.association_id;
        let is_source =
            own_id != INVALID_ASSOCIATION_ID && allocation.source_association_id == own_id;
        let peer = if allocation.is_contention_based {
            self.current_ap
        } else if is_source {
            allocation.destination_address
        } else {
            allocation.source_address
        };
        self.steer_towards(peer)?;

        if allocation.is_contention_based || is_source {
            let gap_end = self.now() + self.device.medium_beamforming_interframe_space();
            self.schedule_superframe(gap_end, SuperframePhase::AllocatedAccessPeriodAfterGap);
            return Ok(());
        }
        self.timeline.allocation_index += 1;
        self.schedule_event_for_next_allocated_access_period_or_superframe()
    }

    /// Points the antenna at `peer` for the rest of the access period, or
    /// stops receiving when no beamformed link to it exists.
    fn steer_towards(&mut self, peer: MacAddress) -> Result<(), ConfigError> {
        let third_party = peer != self.current_ap;
        let sector = match self.peers.get(&peer) {
            Some(link) if link.beamforming_established() => {
                if third_party {
                    link.forced_rx_sector()
                        .ok_or_else(|| ConfigError::MissingForcedRxSector {
                            parameter: FORCED_RX_SECTORS_PARAMETER.to_string(),
                            node: peer.node_id(),
                        })?
                } else {
                    link.best_rx_sector()
                }
            }
            _ => {
                trace!("{}: no beamformed link to {}", self.address, peer);
                self.device.stop_receiving_frames();
                return Ok(());
            }
        };
        self.steer(sector);
        self.device.start_receiving_frames();
        Ok(())
    }

    fn start_allocated_access_period_after_gap(&mut self) -> Result<(), ConfigError> {
        let allocation = self.current_allocation();
        let end = self.timeline.allocated_access_period_end;
        if allocation.is_contention_based {
            self.device.start_contention_period(end);
        } else {
            self.device
                .start_non_contention_period(allocation.destination_address, end);
        }
        self.stats.access_periods_served += 1;
        self.timeline.allocation_index += 1;
        self.schedule_event_for_next_allocated_access_period_or_superframe()
    }
}
