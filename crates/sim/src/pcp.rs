//! A minimal PCP/AP driving the superframe from the network side.
//!
//! Every beacon interval it sweeps a directional beacon through each of its
//! sectors, listens quasi-omni through the A-BFT and answers each sweep
//! that had its slot to itself with sector sweep feedback. It then serves
//! the DTI it announced: an optional receive sector sweep, one service
//! period per associated station and a closing CBAP.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use beamsim_core::frames::{STATUS_SUCCESS, STATUS_UNSPECIFIED_FAILURE};
use beamsim_core::{
    AccessPeriodAllocation, AssociationId, DirectionalBeacon, Frame, FrameBody, MacAddress,
    SectorId, SectorSweep, SectorSweepFeedback, SimTime, SweepDirection,
    BROADCAST_ASSOCIATION_ID, INVALID_ASSOCIATION_ID, INVALID_SECTOR_ID, PCP_ASSOCIATION_ID,
    QUASI_OMNI_SECTOR_ID,
};
use beamsim_mac::{DmgDevice, EventId, Timer};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::device::SimulatedDmgDevice;
use crate::engine::EngineScheduler;
use crate::medium::Position;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcpConfig {
    pub position: Position,
    pub ssid: String,
    pub beacon_interval: Duration,
    pub abft_num_slots: u8,
    pub abft_frames_per_slot: u8,
    /// Open every DTI with a receive sector sweep allocation.
    pub receive_sector_sweep: bool,
    pub service_period: Duration,
    pub max_associations: AssociationId,
}

impl Default for PcpConfig {
    fn default() -> Self {
        Self {
            position: Position::new(0.0, 0.0),
            ssid: "dmg".to_string(),
            beacon_interval: Duration::from_millis(100),
            abft_num_slots: 8,
            abft_frames_per_slot: 8,
            receive_sector_sweep: false,
            service_period: Duration::from_millis(5),
            max_associations: 32,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcpStats {
    pub beacon_intervals: u64,
    pub beacons_sent: u64,
    pub sector_sweep_frames_received: u64,
    pub feedback_sent: u64,
    pub abft_collisions: u64,
    pub receive_sweep_frames_sent: u64,
    pub authentications: u64,
    pub associations: u64,
    pub reassociations: u64,
    pub refused: u64,
    pub disassociations: u64,
    pub service_periods_scheduled: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PcpEvent {
    BeaconInterval,
    Beacon(SectorId),
    SectorSweepFeedback(u32),
    ReceiveSweepFrame(u32),
}

#[derive(Debug, Clone)]
struct Client {
    association_id: AssociationId,
    /// Our sector the client hears best, as reported in its sweep.
    tx_sector: Option<SectorId>,
    /// Best sector of the client's sweep in this beacon interval.
    sweep_best: Option<(SectorId, f64)>,
}

impl Client {
    fn new() -> Self {
        Self {
            association_id: INVALID_ASSOCIATION_ID,
            tx_sector: None,
            sweep_best: None,
        }
    }
}

/// Timeline of the beacon interval being served.
#[derive(Debug, Clone, Default)]
struct IntervalPlan {
    start: SimTime,
    bti_end: SimTime,
    abft_start: SimTime,
    slot_time: Duration,
    dti_start: SimTime,
    beacon_airtime: Duration,
    allocations: Vec<AccessPeriodAllocation>,
    sweeps: BTreeMap<u32, BTreeSet<MacAddress>>,
}

pub struct SimulatedPcp {
    address: MacAddress,
    config: PcpConfig,
    device: SimulatedDmgDevice,
    timer: Timer<PcpEvent, EngineScheduler>,
    clients: BTreeMap<MacAddress, Client>,
    plan: IntervalPlan,
    stats: PcpStats,
}

impl SimulatedPcp {
    /// Starts listening and opens the first beacon interval now.
    pub fn new(
        address: MacAddress,
        config: PcpConfig,
        mut device: SimulatedDmgDevice,
        scheduler: EngineScheduler,
    ) -> Self {
        device.switch_to_quasi_omni_mode();
        device.start_receiving_frames();
        let mut timer = Timer::new(scheduler);
        let now = timer.now();
        timer.schedule_event(now, PcpEvent::BeaconInterval);
        Self {
            address,
            config,
            device,
            timer,
            clients: BTreeMap::new(),
            plan: IntervalPlan::default(),
            stats: PcpStats::default(),
        }
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn stats(&self) -> &PcpStats {
        &self.stats
    }

    pub fn device(&self) -> &SimulatedDmgDevice {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut SimulatedDmgDevice {
        &mut self.device
    }

    /// Associated stations ordered by association id.
    pub fn associated_stations(&self) -> Vec<(MacAddress, AssociationId)> {
        let mut stations: Vec<_> = self
            .clients
            .iter()
            .filter(|(_, client)| client.association_id != INVALID_ASSOCIATION_ID)
            .map(|(address, client)| (*address, client.association_id))
            .collect();
        stations.sort_by_key(|(_, aid)| *aid);
        stations
    }

    /// Allocations announced for the current beacon interval.
    pub fn allocations(&self) -> &[AccessPeriodAllocation] {
        &self.plan.allocations
    }

    pub fn handle_timed_event(&mut self, event_id: EventId) {
        let Some(event) = self.timer.triggered(&event_id) else {
            return;
        };
        match event {
            PcpEvent::BeaconInterval => self.start_beacon_interval(),
            PcpEvent::Beacon(sector) => self.send_beacon(sector),
            PcpEvent::SectorSweepFeedback(slot) => self.send_sector_sweep_feedback(slot),
            PcpEvent::ReceiveSweepFrame(index) => self.send_receive_sweep_frame(index),
        }
    }

    pub fn process_management_frame(&mut self, frame: Frame) {
        let Frame {
            transmitter,
            receiver,
            body,
            ..
        } = frame;
        if receiver != self.address && !receiver.is_broadcast() {
            return;
        }
        match body {
            FrameBody::SectorSweep(sweep) => self.on_sector_sweep(transmitter, sweep),
            FrameBody::Authentication {
                transaction_sequence: 1,
            } => self.on_authentication(transmitter),
            FrameBody::AssociationRequest { ssid, .. } => {
                self.on_association_request(transmitter, &ssid, false)
            }
            FrameBody::ReassociationRequest {
                ssid,
                current_access_point,
                ..
            } => {
                debug!("{}: {} moving over from {}", self.address, transmitter, current_access_point);
                self.on_association_request(transmitter, &ssid, true)
            }
            FrameBody::Disassociation { reason } => {
                if self.clients.remove(&transmitter).is_some() {
                    info!("{}: {} left (reason {})", self.address, transmitter, reason);
                    self.stats.disassociations += 1;
                }
            }
            other => trace!("{}: ignoring {:?} from {}", self.address, other, transmitter),
        }
    }

    fn now(&self) -> SimTime {
        self.timer.now()
    }

    fn start_beacon_interval(&mut self) {
        let now = self.now();
        self.stats.beacon_intervals += 1;
        self.timer
            .schedule_event(now + self.config.beacon_interval, PcpEvent::BeaconInterval);
        for client in self.clients.values_mut() {
            client.sweep_best = None;
        }
        self.plan = self.plan_interval(now);
        self.stats.service_periods_scheduled += self
            .plan
            .allocations
            .iter()
            .filter(|a| !a.is_contention_based && !a.must_do_receive_sector_sweep)
            .count() as u64;
        if self.config.receive_sector_sweep {
            let profile = self.device.profile();
            let offset = profile
                .receive_sector_sweep_sector_duration
                .saturating_sub(profile.sector_sweep_airtime())
                / 2;
            self.timer.schedule_event(
                self.plan.dti_start + offset,
                PcpEvent::ReceiveSweepFrame(0),
            );
        }
        trace!(
            "{}: beacon interval at {:?}, A-BFT {:?}, DTI {:?}",
            self.address,
            now,
            self.plan.abft_start,
            self.plan.dti_start
        );
        self.send_beacon(0);
    }

    /// Lays out the interval. Service periods that do not fit before the
    /// next beacon interval are left out, newest association first.
    fn plan_interval(&self, start: SimTime) -> IntervalPlan {
        let profile = self.device.profile();
        let sectors = profile.antenna_sectors;
        let mbifs = profile.medium_beamforming_interframe_space;
        let slot_time = profile.abft_slot_time(u32::from(self.config.abft_frames_per_slot));
        let dti_end = start + self.config.beacon_interval;
        let mut stations = self.associated_stations();
        loop {
            let (mut allocations, used) = self.layout(&stations);
            let beacon = self.beacon_frame(0, allocations.clone(), Duration::ZERO, Duration::ZERO);
            let beacon_airtime = profile.airtime(&beacon);
            let bti_end = start
                + beacon_airtime * sectors
                + profile.short_beamforming_interframe_space * sectors.saturating_sub(1);
            let abft_start = bti_end + mbifs;
            let dti_start = abft_start + slot_time * u32::from(self.config.abft_num_slots);
            let dti_length = dti_end.saturating_sub(dti_start);
            if used + mbifs <= dti_length || stations.is_empty() {
                let cbap = dti_length.saturating_sub(used + mbifs);
                if let Some(last) = allocations.last_mut().filter(|a| a.is_contention_based) {
                    last.duration = cbap;
                }
                return IntervalPlan {
                    start,
                    bti_end,
                    abft_start,
                    slot_time,
                    dti_start,
                    beacon_airtime,
                    allocations,
                    sweeps: BTreeMap::new(),
                };
            }
            if let Some((dropped, aid)) = stations.pop() {
                warn!(
                    "{}: no room for the service period of {} (aid {})",
                    self.address, dropped, aid
                );
            }
        }
    }

    /// Allocations for `stations` with a placeholder CBAP, and the DTI time
    /// they use before that CBAP.
    fn layout(
        &self,
        stations: &[(MacAddress, AssociationId)],
    ) -> (Vec<AccessPeriodAllocation>, Duration) {
        let profile = self.device.profile();
        let mut allocations = Vec::new();
        let mut cursor = Duration::ZERO;
        if self.config.receive_sector_sweep {
            let duration = profile.receive_sector_sweep_sector_duration * profile.antenna_sectors
                + profile.medium_beamforming_interframe_space;
            allocations.push(
                AccessPeriodAllocation::service_period(
                    cursor,
                    duration,
                    (PCP_ASSOCIATION_ID, self.address),
                    (BROADCAST_ASSOCIATION_ID, MacAddress::BROADCAST),
                )
                .with_receive_sector_sweep(),
            );
            cursor += duration;
        }
        for (address, aid) in stations {
            allocations.push(AccessPeriodAllocation::service_period(
                cursor,
                self.config.service_period,
                (*aid, *address),
                (PCP_ASSOCIATION_ID, self.address),
            ));
            cursor += self.config.service_period;
        }
        allocations.push(AccessPeriodAllocation::contention_based(cursor, Duration::ZERO));
        (allocations, cursor)
    }

    fn beacon_frame(
        &self,
        sector_id: SectorId,
        allocations: Vec<AccessPeriodAllocation>,
        remaining_bti: Duration,
        since_interval_start: Duration,
    ) -> Frame {
        let sectors = self.device.profile().antenna_sectors;
        let cdown = sectors.saturating_sub(sector_id + 1);
        Frame::new(
            self.address,
            MacAddress::BROADCAST,
            FrameBody::DirectionalBeacon(DirectionalBeacon {
                ssid: self.config.ssid.clone(),
                sector_id,
                cdown: u16::try_from(cdown).unwrap_or(u16::MAX),
                beacon_interval: self.config.beacon_interval,
                time_since_beacon_interval_start: since_interval_start,
                abft_num_slots: self.config.abft_num_slots,
                abft_frames_per_slot: self.config.abft_frames_per_slot,
                allocations,
            }),
        )
        .with_duration(remaining_bti)
    }

    fn send_beacon(&mut self, sector: SectorId) {
        let now = self.now();
        let end = now + self.plan.beacon_airtime;
        let frame = self.beacon_frame(
            sector,
            self.plan.allocations.clone(),
            self.plan.bti_end.saturating_sub(end),
            end - self.plan.start,
        );
        self.device.switch_to_sector(sector);
        let end = self.device.transmit(frame);
        self.device.switch_to_quasi_omni_mode();
        self.stats.beacons_sent += 1;
        if sector + 1 < self.device.profile().antenna_sectors {
            let next = end + self.device.short_beamforming_interframe_space();
            self.timer.schedule_event(next, PcpEvent::Beacon(sector + 1));
        }
    }

    fn on_sector_sweep(&mut self, transmitter: MacAddress, sweep: SectorSweep) {
        let now = self.now();
        if sweep.direction != SweepDirection::Initiator
            || now < self.plan.abft_start
            || now > self.plan.dti_start
            || self.plan.slot_time.is_zero()
        {
            trace!("{}: sweep from {} outside the A-BFT", self.address, transmitter);
            return;
        }
        self.stats.sector_sweep_frames_received += 1;
        let slot = ((now - self.plan.abft_start).as_nanos() / self.plan.slot_time.as_nanos()) as u32;
        let snr_db = self.device.last_frame_sinr_db();

        let client = self.clients.entry(transmitter).or_insert_with(Client::new);
        if sweep.feedback_sector_id != INVALID_SECTOR_ID
            && sweep.feedback_sector_id != QUASI_OMNI_SECTOR_ID
        {
            client.tx_sector = Some(sweep.feedback_sector_id);
        }
        if client.sweep_best.map_or(true, |(_, best)| snr_db > best) {
            client.sweep_best = Some((sweep.sector_id, snr_db));
        }

        let sweepers = self.plan.sweeps.entry(slot).or_default();
        let first_in_slot = sweepers.is_empty();
        sweepers.insert(transmitter);
        if first_in_slot {
            let profile = self.device.profile();
            let per_frame = profile.sector_sweep_airtime() + profile.short_beamforming_interframe_space;
            let sweep_end = now + per_frame * u32::from(sweep.cdown);
            let feedback_at = sweep_end + profile.medium_beamforming_interframe_space;
            self.timer
                .schedule_event(feedback_at, PcpEvent::SectorSweepFeedback(slot));
        }
    }

    /// Answers the station that swept in `slot`, unless several did.
    fn send_sector_sweep_feedback(&mut self, slot: u32) {
        let Some(sweepers) = self.plan.sweeps.get(&slot) else {
            return;
        };
        if sweepers.len() > 1 {
            debug!(
                "{}: {} stations collided in A-BFT slot {}",
                self.address,
                sweepers.len(),
                slot
            );
            self.stats.abft_collisions += 1;
            return;
        }
        let Some(station) = sweepers.first().copied() else {
            return;
        };
        let Some((best_sector_id, snr_db)) = self.clients.get(&station).and_then(|c| c.sweep_best)
        else {
            return;
        };
        debug!(
            "{}: {} is best heard on its sector {} ({:.1} dB)",
            self.address, station, best_sector_id, snr_db
        );
        self.transmit_to(
            station,
            FrameBody::SectorSweepFeedback(SectorSweepFeedback {
                best_sector_id,
                snr_db,
            }),
        );
        self.stats.feedback_sent += 1;
    }

    fn send_receive_sweep_frame(&mut self, index: u32) {
        let profile = self.device.profile();
        let frames = profile.antenna_sectors;
        let dwell = profile.receive_sector_sweep_sector_duration;
        let now = self.now();
        let frame = Frame::new(
            self.address,
            MacAddress::BROADCAST,
            FrameBody::SectorSweep(SectorSweep {
                direction: SweepDirection::Responder,
                sector_id: QUASI_OMNI_SECTOR_ID,
                cdown: u16::try_from(frames.saturating_sub(index + 1)).unwrap_or(u16::MAX),
                feedback_sector_id: INVALID_SECTOR_ID,
            }),
        );
        self.device.switch_to_quasi_omni_mode();
        self.device.transmit(frame);
        self.stats.receive_sweep_frames_sent += 1;
        if index + 1 < frames {
            self.timer
                .schedule_event(now + dwell, PcpEvent::ReceiveSweepFrame(index + 1));
        }
    }

    fn on_authentication(&mut self, transmitter: MacAddress) {
        self.clients.entry(transmitter).or_insert_with(Client::new);
        self.stats.authentications += 1;
        self.transmit_to(
            transmitter,
            FrameBody::Authentication {
                transaction_sequence: 2,
            },
        );
    }

    fn on_association_request(&mut self, transmitter: MacAddress, ssid: &str, reassociation: bool) {
        let association_id = if ssid == self.config.ssid {
            self.association_id_for(transmitter)
        } else {
            debug!("{}: {} asked for ssid {:?}", self.address, transmitter, ssid);
            None
        };
        let (status, association_id) = match association_id {
            Some(aid) => {
                info!("{}: {} associated as aid {}", self.address, transmitter, aid);
                if reassociation {
                    self.stats.reassociations += 1;
                } else {
                    self.stats.associations += 1;
                }
                (STATUS_SUCCESS, aid)
            }
            None => {
                self.stats.refused += 1;
                (STATUS_UNSPECIFIED_FAILURE, INVALID_ASSOCIATION_ID)
            }
        };
        let body = if reassociation {
            FrameBody::ReassociationResponse {
                status,
                association_id,
            }
        } else {
            FrameBody::AssociationResponse {
                status,
                association_id,
            }
        };
        self.transmit_to(transmitter, body);
    }

    /// Keeps an existing id, otherwise hands out the lowest free one.
    fn association_id_for(&mut self, station: MacAddress) -> Option<AssociationId> {
        let in_use: BTreeSet<AssociationId> = self
            .clients
            .values()
            .map(|client| client.association_id)
            .collect();
        let limit = self.config.max_associations.min(BROADCAST_ASSOCIATION_ID - 1);
        let client = self.clients.entry(station).or_insert_with(Client::new);
        if client.association_id == INVALID_ASSOCIATION_ID {
            client.association_id = (1..=limit).find(|aid| !in_use.contains(aid))?;
        }
        Some(client.association_id)
    }

    /// Sends towards a client on the sector it reported, quasi-omni when it
    /// never swept.
    fn transmit_to(&mut self, receiver: MacAddress, body: FrameBody) {
        match self.clients.get(&receiver).and_then(|client| client.tx_sector) {
            Some(sector) => self.device.switch_to_sector(sector),
            None => self.device.switch_to_quasi_omni_mode(),
        }
        self.device
            .send_management_frame(Frame::new(self.address, receiver, body));
        self.device.switch_to_quasi_omni_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceProfile;
    use crate::engine::{EngineEvent, EventQueue};
    use crate::medium::{Medium, MediumConfig, Reception};
    use std::cell::RefCell;
    use std::rc::Rc;

    const PCP: MacAddress = MacAddress::new(1, 0);
    const STA: MacAddress = MacAddress::new(2, 0);
    const OTHER: MacAddress = MacAddress::new(3, 0);

    struct Bench {
        queue: Rc<RefCell<EventQueue>>,
        pcp: SimulatedPcp,
        sent: Vec<Frame>,
    }

    impl Bench {
        fn new(config: PcpConfig) -> Self {
            let medium_config = MediumConfig {
                shadowing_std_dev_db: 0.0,
                ..MediumConfig::default()
            };
            let medium = Rc::new(RefCell::new(Medium::new(medium_config, 3).unwrap()));
            let queue = Rc::new(RefCell::new(EventQueue::new()));
            let profile = DeviceProfile::default();
            let node = medium
                .borrow_mut()
                .add_radio(config.position, profile.antenna_sectors, 2);
            // a listener so every transmission shows up as an arrival
            medium
                .borrow_mut()
                .add_radio(Position::new(2.0, 0.5), profile.antenna_sectors, 2);
            let device = SimulatedDmgDevice::new(node, PCP, profile, medium, queue.clone());
            let scheduler = EngineScheduler::new(queue.clone(), node);
            let pcp = SimulatedPcp::new(PCP, config, device, scheduler);
            Self {
                queue,
                pcp,
                sent: Vec::new(),
            }
        }

        /// Runs PCP timers up to `limit`, collecting what it transmits.
        fn run_until(&mut self, limit: SimTime) {
            loop {
                let next = self.queue.borrow_mut().peek_time();
                match next {
                    Some(at) if at <= limit => {}
                    _ => break,
                }
                let popped = self.queue.borrow_mut().pop();
                match popped {
                    Some((_, EngineEvent::Timer { event_id, .. })) => {
                        self.pcp.handle_timed_event(event_id)
                    }
                    Some((_, EngineEvent::Arrival(arrival))) => self.sent.push(arrival.frame),
                    None => break,
                }
            }
        }

        fn deliver_at(&mut self, at: SimTime, frame: Frame) {
            self.run_until(at);
            // advance the clock to `at` with a wake-up the PCP does not know
            self.queue.borrow_mut().schedule_timer(0, at);
            self.queue.borrow_mut().pop();
            self.pcp.process_management_frame(frame);
        }

        fn sweep(
            &mut self,
            at: SimTime,
            from: MacAddress,
            sector_id: SectorId,
            cdown: u16,
            sinr_db: f64,
        ) {
            let frame = Frame::new(
                from,
                PCP,
                FrameBody::SectorSweep(SectorSweep {
                    direction: SweepDirection::Initiator,
                    sector_id,
                    cdown,
                    feedback_sector_id: 5,
                }),
            );
            self.pcp.device_mut().record_reception(Reception {
                rssi_dbm: sinr_db - 71.0,
                sinr_db,
            });
            self.deliver_at(at, frame);
        }

        fn beacons(&self) -> Vec<DirectionalBeacon> {
            self.sent
                .iter()
                .filter_map(|frame| match &frame.body {
                    FrameBody::DirectionalBeacon(beacon) => Some(beacon.clone()),
                    _ => None,
                })
                .collect()
        }

        fn sent_to(&self, receiver: MacAddress) -> Vec<&FrameBody> {
            self.sent
                .iter()
                .filter(|frame| frame.receiver == receiver)
                .map(|frame| &frame.body)
                .collect()
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_beacon_sweep_covers_every_sector() {
        let mut bench = Bench::new(PcpConfig::default());
        bench.run_until(ms(50));

        let beacons = bench.beacons();
        assert_eq!(beacons.len(), 8);
        for (index, beacon) in beacons.iter().enumerate() {
            assert_eq!(beacon.sector_id, index as u32);
            assert_eq!(beacon.cdown, 7 - index as u16);
        }
        // the last beacon closes the BTI
        let last = bench.sent.iter().rev().find(|f| f.kind() == "dmg-beacon").unwrap();
        assert_eq!(last.duration, Duration::ZERO);
        assert_eq!(bench.pcp.stats().beacons_sent, 8);
    }

    #[test]
    fn test_beacon_timing_fields_agree() {
        let mut bench = Bench::new(PcpConfig::default());
        bench.run_until(ms(50));
        let plan = bench.pcp.plan.clone();

        let beacons: Vec<&Frame> = bench
            .sent
            .iter()
            .filter(|f| f.kind() == "dmg-beacon")
            .collect();
        for frame in beacons {
            let FrameBody::DirectionalBeacon(beacon) = &frame.body else {
                unreachable!()
            };
            // arrival time + remaining BTI is the end of the BTI
            let arrival = plan.start + beacon.time_since_beacon_interval_start;
            assert_eq!(arrival + frame.duration, plan.bti_end);
        }
        assert_eq!(
            plan.abft_start,
            plan.bti_end + DeviceProfile::default().medium_beamforming_interframe_space
        );
        assert_eq!(plan.dti_start, plan.abft_start + plan.slot_time * 8);
    }

    #[test]
    fn test_lone_sweep_gets_feedback() {
        let mut bench = Bench::new(PcpConfig::default());
        bench.run_until(Duration::ZERO);
        let plan = bench.pcp.plan.clone();
        let profile = DeviceProfile::default();
        let step = profile.sector_sweep_airtime() + profile.short_beamforming_interframe_space;
        let first_end = plan.abft_start + plan.slot_time * 2 + profile.sector_sweep_airtime();

        bench.sweep(first_end, STA, 0, 2, 9.0);
        bench.sweep(first_end + step, STA, 1, 1, 14.0);
        bench.sweep(first_end + step * 2, STA, 2, 0, 4.0);
        bench.run_until(plan.dti_start);

        let feedback: Vec<_> = bench
            .sent_to(STA)
            .into_iter()
            .filter_map(|body| match body {
                FrameBody::SectorSweepFeedback(feedback) => Some(*feedback),
                _ => None,
            })
            .collect();
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].best_sector_id, 1);
        assert_eq!(feedback[0].snr_db, 14.0);
        assert_eq!(bench.pcp.stats().feedback_sent, 1);
        assert_eq!(bench.pcp.stats().sector_sweep_frames_received, 3);
    }

    #[test]
    fn test_shared_slot_is_a_collision() {
        let mut bench = Bench::new(PcpConfig::default());
        bench.run_until(Duration::ZERO);
        let plan = bench.pcp.plan.clone();
        let airtime = DeviceProfile::default().sector_sweep_airtime();
        let slot_start = plan.abft_start + plan.slot_time;

        bench.sweep(slot_start + airtime, STA, 0, 7, 10.0);
        bench.sweep(slot_start + airtime, OTHER, 0, 7, 10.0);
        bench.run_until(plan.dti_start);

        assert!(bench.sent_to(STA).is_empty());
        assert!(bench.sent_to(OTHER).is_empty());
        assert_eq!(bench.pcp.stats().abft_collisions, 1);
    }

    #[test]
    fn test_sweep_outside_abft_is_ignored() {
        let mut bench = Bench::new(PcpConfig::default());
        bench.run_until(Duration::ZERO);
        let plan = bench.pcp.plan.clone();

        bench.sweep(plan.dti_start + ms(1), STA, 0, 0, 10.0);
        bench.run_until(ms(20));
        assert_eq!(bench.pcp.stats().sector_sweep_frames_received, 0);
        assert!(bench.sent_to(STA).is_empty());
    }

    #[test]
    fn test_association_gets_service_period_next_interval() {
        let mut bench = Bench::new(PcpConfig::default());
        bench.run_until(ms(10));
        bench.deliver_at(
            ms(10),
            Frame::new(STA, PCP, FrameBody::Authentication { transaction_sequence: 1 }),
        );
        bench.deliver_at(
            ms(11),
            Frame::new(
                STA,
                PCP,
                FrameBody::AssociationRequest {
                    ssid: "dmg".into(),
                    listen_interval: 1,
                },
            ),
        );
        bench.run_until(ms(12));
        assert_eq!(
            bench.sent_to(STA).last(),
            Some(&&FrameBody::AssociationResponse {
                status: STATUS_SUCCESS,
                association_id: 1,
            })
        );
        assert_eq!(bench.pcp.associated_stations(), vec![(STA, 1)]);

        bench.run_until(ms(150));
        let allocations = bench.pcp.allocations();
        assert_eq!(allocations.len(), 2);
        assert!(allocations[0].involves(1));
        assert_eq!(allocations[0].source_address, STA);
        assert!(allocations[1].is_contention_based);
        let plan = &bench.pcp.plan;
        let dti_end = plan.start + PcpConfig::default().beacon_interval;
        assert!(plan.dti_start + allocations[1].relative_end_time() <= dti_end);
        assert!(allocations[1].duration > ms(80));
    }

    #[test]
    fn test_wrong_ssid_is_refused() {
        let mut bench = Bench::new(PcpConfig::default());
        bench.deliver_at(
            ms(5),
            Frame::new(
                STA,
                PCP,
                FrameBody::AssociationRequest {
                    ssid: "elsewhere".into(),
                    listen_interval: 1,
                },
            ),
        );
        bench.run_until(ms(6));
        assert_eq!(
            bench.sent_to(STA).last(),
            Some(&&FrameBody::AssociationResponse {
                status: STATUS_UNSPECIFIED_FAILURE,
                association_id: INVALID_ASSOCIATION_ID,
            })
        );
        assert_eq!(bench.pcp.stats().refused, 1);
    }

    #[test]
    fn test_reassociation_keeps_id_and_disassociation_frees_it() {
        let mut bench = Bench::new(PcpConfig::default());
        let request = |station| {
            Frame::new(
                station,
                PCP,
                FrameBody::AssociationRequest {
                    ssid: "dmg".into(),
                    listen_interval: 1,
                },
            )
        };
        bench.deliver_at(ms(5), request(STA));
        bench.deliver_at(ms(6), request(OTHER));
        bench.deliver_at(
            ms(7),
            Frame::new(
                STA,
                PCP,
                FrameBody::ReassociationRequest {
                    ssid: "dmg".into(),
                    listen_interval: 1,
                    current_access_point: MacAddress::new(9, 0),
                },
            ),
        );
        assert_eq!(bench.pcp.associated_stations(), vec![(STA, 1), (OTHER, 2)]);
        assert_eq!(bench.pcp.stats().reassociations, 1);

        bench.deliver_at(
            ms(8),
            Frame::new(STA, PCP, FrameBody::Disassociation { reason: 3 }),
        );
        assert_eq!(bench.pcp.associated_stations(), vec![(OTHER, 2)]);
        bench.deliver_at(ms(9), request(STA));
        assert_eq!(bench.pcp.associated_stations(), vec![(STA, 1), (OTHER, 2)]);
    }

    #[test]
    fn test_receive_sweep_opens_the_dti() {
        let config = PcpConfig {
            receive_sector_sweep: true,
            ..PcpConfig::default()
        };
        let mut bench = Bench::new(config);
        bench.run_until(ms(50));

        let allocations = bench.pcp.allocations().to_vec();
        assert!(allocations[0].must_do_receive_sector_sweep);
        assert_eq!(allocations[0].relative_start_time, Duration::ZERO);
        let sweeps = bench
            .sent
            .iter()
            .filter(|f| f.kind() == "sector-sweep")
            .count();
        assert_eq!(sweeps, 8);
        assert_eq!(bench.pcp.stats().receive_sweep_frames_sent, 8);
    }

    #[test]
    fn test_service_periods_that_do_not_fit_are_dropped() {
        let config = PcpConfig {
            service_period: ms(40),
            ..PcpConfig::default()
        };
        let mut bench = Bench::new(config);
        for (index, node) in [2, 3, 4].into_iter().enumerate() {
            bench.deliver_at(
                ms(1 + index as u64),
                Frame::new(
                    MacAddress::new(node, 0),
                    PCP,
                    FrameBody::AssociationRequest {
                        ssid: "dmg".into(),
                        listen_interval: 1,
                    },
                ),
            );
        }
        bench.run_until(ms(150));

        let service_periods = bench
            .pcp
            .allocations()
            .iter()
            .filter(|a| !a.is_contention_based)
            .count();
        assert_eq!(service_periods, 2);
    }
}
