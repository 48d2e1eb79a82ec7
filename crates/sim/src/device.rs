//! DMG lower MAC/PHY bound to the simulated medium

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use beamsim_core::{
    ChannelNumber, Frame, FrameBody, MacAddress, SectorId, SectorSweep, SectorSweepFeedback,
    SimTime, SweepDirection,
};
use beamsim_mac::DmgDevice;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::engine::{EngineEvent, EventQueue, NodeIndex};
use crate::medium::{AntennaPattern, Medium, Reception};

/// PHY timing and antenna parameters shared by every DMG radio in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub antenna_sectors: u32,
    pub tx_power_dbm: f64,
    /// Control PHY (MCS 0) rate used for every management frame.
    pub control_phy_rate_bps: f64,
    pub preamble: Duration,
    pub short_beamforming_interframe_space: Duration,
    pub medium_beamforming_interframe_space: Duration,
    pub receive_sector_sweep_sector_duration: Duration,
    pub max_bonded_channels: usize,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            antenna_sectors: 8,
            tx_power_dbm: 10.0,
            control_phy_rate_bps: 27.5e6,
            preamble: Duration::from_nanos(4_291),
            short_beamforming_interframe_space: Duration::from_micros(1),
            medium_beamforming_interframe_space: Duration::from_micros(9),
            receive_sector_sweep_sector_duration: Duration::from_micros(40),
            max_bonded_channels: 1,
        }
    }
}

impl DeviceProfile {
    pub fn airtime(&self, frame: &Frame) -> Duration {
        let bytes = match frame.encoded_len() {
            Ok(len) => len,
            Err(err) => unreachable!("{} frame does not encode: {err}", frame.kind()),
        };
        self.preamble + Duration::from_secs_f64(bytes as f64 * 8.0 / self.control_phy_rate_bps)
    }

    pub fn sector_sweep_airtime(&self) -> Duration {
        self.airtime(&Frame::new(
            MacAddress::INVALID,
            MacAddress::INVALID,
            FrameBody::SectorSweep(SectorSweep {
                direction: SweepDirection::Initiator,
                sector_id: 0,
                cdown: 0,
                feedback_sector_id: 0,
            }),
        ))
    }

    pub fn sector_sweep_feedback_airtime(&self) -> Duration {
        self.airtime(&Frame::new(
            MacAddress::INVALID,
            MacAddress::INVALID,
            FrameBody::SectorSweepFeedback(SectorSweepFeedback {
                best_sector_id: 0,
                snr_db: 0.0,
            }),
        ))
    }

    /// Time from the start of a sweep of `frames` frames to the end of its
    /// last frame.
    pub fn sector_sweep_duration(&self, frames: u32) -> Duration {
        if frames == 0 {
            return Duration::ZERO;
        }
        self.sector_sweep_airtime() * frames
            + self.short_beamforming_interframe_space * (frames - 1)
    }

    /// A-BFT slot: the responder sweep, MBIFS, the feedback frame and a
    /// closing MBIFS.
    pub fn abft_slot_time(&self, frames_per_slot: u32) -> Duration {
        self.sector_sweep_duration(frames_per_slot)
            + self.medium_beamforming_interframe_space * 2
            + self.sector_sweep_feedback_airtime()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub frames_sent: u64,
    pub airtime: Duration,
    pub frames_received: u64,
    pub channel_switches: u64,
    pub contention_periods: u64,
    pub contention_time: Duration,
    pub service_periods: u64,
    pub service_time: Duration,
    pub link_ups: u64,
    pub link_downs: u64,
}

/// One simulated DMG interface. Antenna and receive state live in the
/// shared medium so arrivals can be judged against them.
pub struct SimulatedDmgDevice {
    node: NodeIndex,
    address: MacAddress,
    profile: DeviceProfile,
    medium: Rc<RefCell<Medium>>,
    queue: Rc<RefCell<EventQueue>>,
    link_tx_power_dbm: BTreeMap<MacAddress, f64>,
    last_reception: Option<Reception>,
    link: Option<MacAddress>,
    stats: DeviceStats,
}

impl SimulatedDmgDevice {
    pub fn new(
        node: NodeIndex,
        address: MacAddress,
        profile: DeviceProfile,
        medium: Rc<RefCell<Medium>>,
        queue: Rc<RefCell<EventQueue>>,
    ) -> Self {
        Self {
            node,
            address,
            profile,
            medium,
            queue,
            link_tx_power_dbm: BTreeMap::new(),
            last_reception: None,
            link: None,
            stats: DeviceStats::default(),
        }
    }

    pub fn node(&self) -> NodeIndex {
        self.node
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    pub fn link(&self) -> Option<MacAddress> {
        self.link
    }

    pub fn pattern(&self) -> AntennaPattern {
        self.medium.borrow().pattern(self.node)
    }

    pub fn now(&self) -> SimTime {
        self.queue.borrow().now()
    }

    /// Called by the driver right before the frame is handed up.
    pub fn record_reception(&mut self, reception: Reception) {
        self.stats.frames_received += 1;
        self.last_reception = Some(reception);
    }

    /// Puts `frame` on the air now and returns when it ends.
    pub fn transmit(&mut self, frame: Frame) -> SimTime {
        let now = self.now();
        let airtime = self.profile.airtime(&frame);
        let end = now + airtime;
        let power = self
            .link_tx_power_dbm
            .get(&frame.receiver)
            .copied()
            .unwrap_or(self.profile.tx_power_dbm);
        trace!(
            "{}: {} to {} on {:?}, {:?} on air",
            self.address,
            frame.kind(),
            frame.receiver,
            self.pattern(),
            airtime
        );
        let arrivals = self.medium.borrow_mut().fan_out(self.node, &frame, power);
        let mut queue = self.queue.borrow_mut();
        for arrival in arrivals {
            queue.push(end, EngineEvent::Arrival(arrival));
        }
        self.stats.frames_sent += 1;
        self.stats.airtime += airtime;
        end
    }
}

impl DmgDevice for SimulatedDmgDevice {
    fn current_channel(&self) -> ChannelNumber {
        self.medium.borrow().channel(self.node)
    }

    fn switch_to_channels(&mut self, channels: &[ChannelNumber]) {
        let Some(primary) = channels.first() else {
            return;
        };
        if self.current_channel() != *primary {
            self.stats.channel_switches += 1;
            self.medium.borrow_mut().set_channel(self.node, *primary);
        }
    }

    fn max_bonded_channel_count(&self) -> usize {
        self.profile.max_bonded_channels
    }

    fn number_of_antenna_sectors(&self) -> u32 {
        self.profile.antenna_sectors
    }

    fn switch_to_quasi_omni_mode(&mut self) {
        self.medium
            .borrow_mut()
            .set_pattern(self.node, AntennaPattern::QuasiOmni);
    }

    fn switch_to_sector(&mut self, sector: SectorId) {
        self.medium
            .borrow_mut()
            .set_pattern(self.node, AntennaPattern::Sector(sector));
    }

    fn start_receiving_frames(&mut self) {
        self.medium.borrow_mut().set_receiving(self.node, true);
    }

    fn stop_receiving_frames(&mut self) {
        self.medium.borrow_mut().set_receiving(self.node, false);
    }

    fn last_frame_rssi_dbm(&self) -> f64 {
        self.last_reception.map_or(f64::NEG_INFINITY, |r| r.rssi_dbm)
    }

    fn last_frame_sinr_db(&self) -> f64 {
        self.last_reception.map_or(f64::NEG_INFINITY, |r| r.sinr_db)
    }

    fn send_management_frame(&mut self, frame: Frame) {
        self.transmit(frame);
    }

    fn transmit_sector_sweep_frame(&mut self, frame: Frame) -> SimTime {
        self.transmit(frame)
    }

    fn start_contention_period(&mut self, end_time: SimTime) {
        let now = self.now();
        self.stats.contention_periods += 1;
        self.stats.contention_time += end_time.saturating_sub(now);
    }

    fn start_non_contention_period(&mut self, destination: MacAddress, end_time: SimTime) {
        let now = self.now();
        trace!(
            "{}: service period towards {} until {:?}",
            self.address,
            destination,
            end_time
        );
        self.stats.service_periods += 1;
        self.stats.service_time += end_time.saturating_sub(now);
    }

    fn set_link_tx_power(&mut self, peer: MacAddress, power_dbm: f64) {
        debug!("{}: tx power towards {} fixed at {} dBm", self.address, peer, power_dbm);
        self.link_tx_power_dbm.insert(peer, power_dbm);
    }

    fn short_beamforming_interframe_space(&self) -> Duration {
        self.profile.short_beamforming_interframe_space
    }

    fn medium_beamforming_interframe_space(&self) -> Duration {
        self.profile.medium_beamforming_interframe_space
    }

    fn receive_sector_sweep_sector_duration(&self) -> Duration {
        self.profile.receive_sector_sweep_sector_duration
    }

    fn calculate_abft_slot_time(&self, frames_per_slot: u32) -> Duration {
        self.profile.abft_slot_time(frames_per_slot)
    }

    fn network_layer_link_up(&mut self, access_point: MacAddress) {
        info!("{}: link up via {}", self.address, access_point);
        self.stats.link_ups += 1;
        self.link = Some(access_point);
    }

    fn network_layer_link_down(&mut self) {
        if let Some(access_point) = self.link.take() {
            info!("{}: link down via {}", self.address, access_point);
        }
        self.stats.link_downs += 1;
    }
}
