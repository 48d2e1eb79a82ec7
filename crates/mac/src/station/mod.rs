//! The DMG station management controller.
//!
//! One `DmgStation` drives one wireless interface. All mutation happens
//! inside `process_management_frame` and `handle_timed_event`, both invoked
//! by the simulation engine one at a time. Five independent timer slots
//! (scan, authentication, association failure, link check and the shared
//! superframe slot) each hold at most one outstanding wake-up.

use std::collections::BTreeMap;
use std::time::Duration;

use beamsim_core::{
    AccessPeriodAllocation, AssociationId, ChannelNumber, Frame, FrameBody, MacAddress, SectorId,
    SimTime, INVALID_ASSOCIATION_ID, QUASI_OMNI_SECTOR_ID,
};
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{
    StationConfig, ANTENNA_SECTORS_PARAMETER, FORCED_RX_SECTORS_PARAMETER,
    FORCED_TX_SECTORS_PARAMETER,
};
use crate::device::DmgDevice;
use crate::peer_link::PeerLinkRecord;
use crate::scanning::ChannelScanningController;
use crate::sector_selector::{SectorMetric, SelectorFactory};
use crate::timer::{EventId, Scheduler, Timer};
use crate::{ConfigError, StationStats};

mod association;
mod superframe;


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StationState {
    NotAssociated,
    ChannelScanning,
    BackgroundChannelScanning,
    StartingUpBackgroundChannelScanning,
    EndingBackgroundChannelScanning,
    WaitingForAuthentication,
    WaitingForAssociationResponse,
    WaitingForReassociationResponse,
    Associated,
}

impl StationState {
    /// States in which the network layer considers the link up.
    pub fn is_linked(self) -> bool {
        matches!(
            self,
            StationState::Associated
                | StationState::StartingUpBackgroundChannelScanning
                | StationState::BackgroundChannelScanning
                | StationState::EndingBackgroundChannelScanning
        )
    }
}

/// What the shared superframe wake-up does when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SuperframePhase {
    BeaconTransmissionInterval,
    AssociationBeamformingTraining,
    AssociationBeamformingTrainingSlot,
    SectorSweepFeedbackTimeout,
    ReceiveSectorSweepNextSector,
    DataTransferInterval,
    AllocatedAccessPeriod,
    AllocatedAccessPeriodAfterGap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimedEvent {
    StartScanning,
    ScanTimeout,
    AuthenticationTimeout,
    AssociationFailureTimeout,
    LinkCheck,
    Superframe(SuperframePhase),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    Scan,
    Authentication,
    AssociationFailure,
    LinkCheck,
    Superframe,
}

impl TimerSlot {
    pub const ALL: [TimerSlot; 5] = [
        TimerSlot::Scan,
        TimerSlot::Authentication,
        TimerSlot::AssociationFailure,
        TimerSlot::LinkCheck,
        TimerSlot::Superframe,
    ];
}

/// Timing of the current beacon interval, rebuilt from the first directional
/// beacon of every interval.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SuperframeTimeline {
    pub beacon_interval_start: SimTime,
    pub abft_start: SimTime,
    pub abft_num_slots: u32,
    pub abft_slot_time: Duration,
    pub abft_slot: Option<u32>,
    pub abft_slot_start: SimTime,
    pub abft_slot_end: SimTime,
    pub sector_sweep_frames_to_send: u32,
    pub sector_sweep_frame_count: u32,
    pub data_transfer_interval_start: SimTime,
    pub data_transfer_interval_end: SimTime,
    pub allocations: Vec<AccessPeriodAllocation>,
    pub allocation_index: usize,
    pub allocated_access_period_end: SimTime,
    pub receive_sector_sweep_done: bool,
    pub receive_sweep_sector: SectorId,
    pub waiting_for_beacon: bool,
}

pub struct DmgStation<D, S> {
    address: MacAddress,
    config: StationConfig,
    device: D,
    scanner: Box<dyn ChannelScanningController>,
    new_selector: SelectorFactory,
    peers: BTreeMap<MacAddress, PeerLinkRecord>,
    timer: Timer<TimedEvent, S>,
    slots: [Option<EventId>; 5],
    next_phase: Option<SuperframePhase>,
    rng: StdRng,
    state: StationState,
    association_id: AssociationId,
    current_ap: MacAddress,
    last_ap: MacAddress,
    ap_channels: Vec<ChannelNumber>,
    antenna_sector: SectorId,
    timeline: SuperframeTimeline,
    stats: StationStats,
}

impl<D: DmgDevice, S: Scheduler> DmgStation<D, S> {
    /// Builds the controller and arms the initial scan at the current time.
    pub fn new(
        address: MacAddress,
        config: StationConfig,
        mut device: D,
        scheduler: S,
        scanner: Box<dyn ChannelScanningController>,
        new_selector: SelectorFactory,
    ) -> Result<Self, ConfigError> {
        let sectors = device.number_of_antenna_sectors();
        if sectors == 0 {
            return Err(ConfigError::Malformed {
                parameter: ANTENNA_SECTORS_PARAMETER.to_string(),
                value: sectors.to_string(),
            });
        }
        let mut peers = BTreeMap::new();
        for (peer, forced) in &config.forced_sectors {
            if forced.tx >= sectors {
                return Err(ConfigError::Malformed {
                    parameter: FORCED_TX_SECTORS_PARAMETER.to_string(),
                    value: format!("{}:{}", peer.node_id(), forced.tx),
                });
            }
            if let Some(rx) = forced.rx.filter(|rx| *rx >= sectors) {
                return Err(ConfigError::Malformed {
                    parameter: FORCED_RX_SECTORS_PARAMETER.to_string(),
                    value: format!("{}:{}", peer.node_id(), rx),
                });
            }
            let mut record = PeerLinkRecord::new(new_selector());
            record.force_sectors(forced.tx, forced.rx);
            peers.insert(*peer, record);
        }
        for (peer, power_dbm) in &config.forced_tx_power_dbm {
            device.set_link_tx_power(*peer, *power_dbm);
        }

        let mut station = Self {
            address,
            rng: StdRng::seed_from_u64(config.random_seed),
            current_ap: config.forced_access_point.unwrap_or(MacAddress::INVALID),
            config,
            device,
            scanner,
            new_selector,
            peers,
            timer: Timer::new(scheduler),
            slots: [None; 5],
            next_phase: None,
            state: StationState::NotAssociated,
            association_id: INVALID_ASSOCIATION_ID,
            last_ap: MacAddress::INVALID,
            ap_channels: Vec::new(),
            antenna_sector: QUASI_OMNI_SECTOR_ID,
            timeline: SuperframeTimeline::default(),
            stats: StationStats::default(),
        };
        let now = station.timer.now();
        station.arm(TimerSlot::Scan, now, TimedEvent::StartScanning);
        Ok(station)
    }

    /// Entry point for every management frame the lower MAC hands up.
    pub fn process_management_frame(&mut self, frame: Frame) -> Result<(), ConfigError> {
        let Frame {
            transmitter,
            receiver,
            duration,
            body,
        } = frame;
        if receiver != self.address && !receiver.is_broadcast() {
            return Ok(());
        }
        match body {
            FrameBody::Authentication { .. } => self.on_authentication(transmitter),
            FrameBody::AssociationResponse {
                status,
                association_id,
            } => self.on_association_response(transmitter, status, association_id, false),
            FrameBody::ReassociationResponse {
                status,
                association_id,
            } => self.on_association_response(transmitter, status, association_id, true),
            FrameBody::Disassociation { reason } => self.on_disassociation(transmitter, reason),
            FrameBody::AssociationRequest { .. } | FrameBody::ReassociationRequest { .. } => {
                self.ignore(transmitter, "association request at a non-AP station")
            }
            FrameBody::Beacon { .. } => {
                unreachable!("legacy beacon from {transmitter} routed to a DMG station")
            }
            FrameBody::DirectionalBeacon(beacon) => {
                self.on_directional_beacon(transmitter, duration, beacon)?
            }
            FrameBody::SectorSweep(sweep) => self.on_sector_sweep(transmitter, sweep),
            FrameBody::SectorSweepFeedback(feedback) => {
                self.on_sector_sweep_feedback(transmitter, feedback)
            }
        }
        self.check_invariants();
        Ok(())
    }

    /// Entry point for wake-ups previously requested from the scheduler.
    pub fn handle_timed_event(&mut self, event_id: EventId) -> Result<(), ConfigError> {
        let Some(event) = self.timer.triggered(&event_id) else {
            trace!("{}: dropping cancelled timer {:?}", self.address, event_id);
            return Ok(());
        };
        for slot in self.slots.iter_mut() {
            if *slot == Some(event_id) {
                *slot = None;
            }
        }
        trace!("{}: {:?} in {:?}", self.address, event, self.state);
        match event {
            TimedEvent::StartScanning => self.start_channel_scanning(),
            TimedEvent::ScanTimeout => self.continue_channel_scanning(),
            TimedEvent::AuthenticationTimeout => self.on_authentication_timeout(),
            TimedEvent::AssociationFailureTimeout => self.on_association_failure_timeout(),
            TimedEvent::LinkCheck => self.on_link_check(),
            TimedEvent::Superframe(phase) => {
                self.next_phase = None;
                self.on_superframe_event(phase)?
            }
        }
        self.check_invariants();
        Ok(())
    }

    /// Forgets the current AP/PCP. A forced AP is kept. Calling it twice is
    /// the same as calling it once.
    pub fn clear_current_channel_and_access_point(&mut self) {
        self.association_id = INVALID_ASSOCIATION_ID;
        self.state = StationState::NotAssociated;
        match self.config.forced_access_point {
            Some(forced) => self.current_ap = forced,
            None => {
                if self.current_ap.is_valid() {
                    self.scanner.clear_current_channel_and_access_point();
                }
                self.current_ap = MacAddress::INVALID;
                self.ap_channels.clear();
            }
        }
    }

    /// First allocation at or after `from` this station takes part in.
    ///
    /// Contention based periods are open to everyone; scheduled periods
    /// apply when our association id is the source or destination. The
    /// first period asking for a receive sector sweep applies once per
    /// beacon interval.
    pub fn get_allocated_access_period_index(&self, from: usize) -> Option<usize> {
        let allocations = &self.timeline.allocations;
        let first_receive_sweep = allocations
            .iter()
            .position(|a| a.must_do_receive_sector_sweep)
            .filter(|_| !self.timeline.receive_sector_sweep_done);
        let own_id = self.association_id;
        allocations
            .iter()
            .enumerate()
            .skip(from)
            .find(|(index, allocation)| {
                allocation.is_contention_based
                    || (own_id != INVALID_ASSOCIATION_ID && allocation.involves(own_id))
                    || first_receive_sweep == Some(*index)
            })
            .map(|(index, _)| index)
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn state(&self) -> StationState {
        self.state
    }

    pub fn association_id(&self) -> AssociationId {
        self.association_id
    }

    pub fn current_access_point(&self) -> MacAddress {
        self.current_ap
    }

    pub fn last_access_point(&self) -> MacAddress {
        self.last_ap
    }

    pub fn peer(&self, address: &MacAddress) -> Option<&PeerLinkRecord> {
        self.peers.get(address)
    }

    pub fn next_superframe_phase(&self) -> Option<SuperframePhase> {
        self.next_phase
    }

    pub fn timeline(&self) -> &SuperframeTimeline {
        &self.timeline
    }

    pub fn armed_timer_slots(&self) -> Vec<TimerSlot> {
        TimerSlot::ALL
            .into_iter()
            .filter(|slot| self.slots[*slot as usize].is_some())
            .collect()
    }

    pub fn outstanding_timer_events(&self) -> usize {
        self.timer.outstanding()
    }

    pub fn stats(&self) -> &StationStats {
        &self.stats
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    fn now(&self) -> SimTime {
        self.timer.now()
    }

    fn arm(&mut self, slot: TimerSlot, deadline: SimTime, event: TimedEvent) {
        self.timer
            .reschedule(&mut self.slots[slot as usize], deadline, event);
    }

    fn disarm(&mut self, slot: TimerSlot) {
        self.timer.cancel_slot(&mut self.slots[slot as usize]);
        if slot == TimerSlot::Superframe {
            self.next_phase = None;
        }
    }

    fn schedule_superframe(&mut self, deadline: SimTime, phase: SuperframePhase) {
        self.arm(TimerSlot::Superframe, deadline, TimedEvent::Superframe(phase));
        self.next_phase = Some(phase);
    }

    fn peer_mut(&mut self, address: MacAddress) -> &mut PeerLinkRecord {
        let new_selector = self.new_selector;
        self.peers
            .entry(address)
            .or_insert_with(|| PeerLinkRecord::new(new_selector()))
    }

    fn steer(&mut self, sector: SectorId) {
        if sector == QUASI_OMNI_SECTOR_ID {
            self.quasi_omni();
        } else {
            self.device.switch_to_sector(sector);
            self.antenna_sector = sector;
        }
    }

    fn quasi_omni(&mut self) {
        self.device.switch_to_quasi_omni_mode();
        self.antenna_sector = QUASI_OMNI_SECTOR_ID;
    }

    fn last_frame_metric(&self, tx_sector: SectorId) -> SectorMetric {
        SectorMetric {
            tx_sector,
            rx_sector: self.antenna_sector,
            rssi_dbm: self.device.last_frame_rssi_dbm(),
            sinr_db: self.device.last_frame_sinr_db(),
        }
    }

    fn ignore(&mut self, transmitter: MacAddress, what: &str) {
        self.stats.ignored_frames += 1;
        trace!(
            "{}: ignoring {} from {} in {:?}",
            self.address,
            what,
            transmitter,
            self.state
        );
    }

    fn set_state(&mut self, state: StationState) {
        if self.state != state {
            debug!("{}: {:?} -> {:?}", self.address, self.state, state);
            self.state = state;
        }
    }

    fn check_invariants(&self) {
        if self.state == StationState::Associated {
            assert!(
                self.association_id != INVALID_ASSOCIATION_ID && self.current_ap.is_valid(),
                "{} associated without association id or AP",
                self.address
            );
        }
        debug_assert_eq!(
            self.timer.outstanding(),
            self.slots.iter().flatten().count()
        );
    }
}
