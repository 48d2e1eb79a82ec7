//! Test doubles for driving a station one event at a time

use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use beamsim_core::{ChannelNumber, Frame, MacAddress, SectorId, SimTime, QUASI_OMNI_SECTOR_ID};

use crate::device::DmgDevice;
use crate::scanning::{AccessPointChoice, BeaconSighting, ChannelScanningController, ScanDwell};
use crate::timer::{EventId, Scheduler};

#[derive(Default)]
struct SchedulerState {
    now: SimTime,
    next_id: u64,
    pending: BTreeSet<(SimTime, EventId)>,
    cancelled: HashSet<EventId>,
}

/// Manual clock. Clones share the same queue, so a test can keep a handle
/// after moving one into the station.
#[derive(Clone, Default)]
pub struct FakeScheduler {
    state: Rc<RefCell<SchedulerState>>,
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self, event_id: EventId) -> bool {
        self.state.borrow().cancelled.contains(&event_id)
    }

    pub fn set_now(&self, now: SimTime) {
        let mut state = self.state.borrow_mut();
        state.now = state.now.max(now);
    }

    pub fn next_deadline(&self) -> Option<SimTime> {
        self.state.borrow().pending.iter().next().map(|(t, _)| *t)
    }

    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Pops the earliest event due at or before `limit` and moves the clock
    /// to its deadline.
    pub fn pop_until(&self, limit: SimTime) -> Option<EventId> {
        let mut state = self.state.borrow_mut();
        let first = *state.pending.iter().next()?;
        if first.0 > limit {
            return None;
        }
        state.pending.remove(&first);
        state.now = state.now.max(first.0);
        Some(first.1)
    }
}

impl Scheduler for FakeScheduler {
    fn now(&self) -> SimTime {
        self.state.borrow().now
    }

    fn schedule(&mut self, deadline: SimTime) -> EventId {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let event_id = EventId(state.next_id);
        state.pending.insert((deadline, event_id));
        event_id
    }

    fn cancel(&mut self, event_id: EventId) {
        let mut state = self.state.borrow_mut();
        state.pending.retain(|(_, id)| *id != event_id);
        state.cancelled.insert(event_id);
    }
}

/// Records every command the station issues.
pub struct MockDevice {
    clock: FakeScheduler,
    pub channel: ChannelNumber,
    pub sectors: u32,
    pub max_bonded_channels: usize,
    pub sweep_frame_airtime: Duration,
    pub sbifs: Duration,
    pub mbifs: Duration,
    pub rx_sector_duration: Duration,
    pub rssi_dbm: f64,
    pub sinr_db: f64,
    pub antenna: SectorId,
    pub receiving: bool,
    pub channel_switches: Vec<Vec<ChannelNumber>>,
    pub sectors_visited: Vec<SectorId>,
    pub management_frames: Vec<Frame>,
    pub sweep_frames: Vec<(SimTime, Frame)>,
    pub contention_periods: Vec<(SimTime, SimTime)>,
    pub service_periods: Vec<(SimTime, MacAddress, SimTime)>,
    pub tx_power: Vec<(MacAddress, f64)>,
    pub links_up: Vec<MacAddress>,
    pub links_down: usize,
}

impl MockDevice {
    pub fn new(clock: FakeScheduler) -> Self {
        Self {
            clock,
            channel: 1,
            sectors: 4,
            max_bonded_channels: 1,
            sweep_frame_airtime: Duration::from_micros(15),
            sbifs: Duration::from_micros(1),
            mbifs: Duration::from_micros(3),
            rx_sector_duration: Duration::from_micros(20),
            rssi_dbm: -55.0,
            sinr_db: 20.0,
            antenna: QUASI_OMNI_SECTOR_ID,
            receiving: false,
            channel_switches: Vec::new(),
            sectors_visited: Vec::new(),
            management_frames: Vec::new(),
            sweep_frames: Vec::new(),
            contention_periods: Vec::new(),
            service_periods: Vec::new(),
            tx_power: Vec::new(),
            links_up: Vec::new(),
            links_down: 0,
        }
    }

    pub fn last_management_frame(&self) -> Option<&Frame> {
        self.management_frames.last()
    }
}

impl DmgDevice for MockDevice {
    fn current_channel(&self) -> ChannelNumber {
        self.channel
    }

    fn switch_to_channels(&mut self, channels: &[ChannelNumber]) {
        if let Some(primary) = channels.first() {
            self.channel = *primary;
        }
        self.channel_switches.push(channels.to_vec());
    }

    fn max_bonded_channel_count(&self) -> usize {
        self.max_bonded_channels
    }

    fn number_of_antenna_sectors(&self) -> u32 {
        self.sectors
    }

    fn switch_to_quasi_omni_mode(&mut self) {
        self.antenna = QUASI_OMNI_SECTOR_ID;
    }

    fn switch_to_sector(&mut self, sector: SectorId) {
        self.antenna = sector;
        self.sectors_visited.push(sector);
    }

    fn start_receiving_frames(&mut self) {
        self.receiving = true;
    }

    fn stop_receiving_frames(&mut self) {
        self.receiving = false;
    }

    fn last_frame_rssi_dbm(&self) -> f64 {
        self.rssi_dbm
    }

    fn last_frame_sinr_db(&self) -> f64 {
        self.sinr_db
    }

    fn send_management_frame(&mut self, frame: Frame) {
        self.management_frames.push(frame);
    }

    fn transmit_sector_sweep_frame(&mut self, frame: Frame) -> SimTime {
        let now = self.clock.now();
        self.sweep_frames.push((now, frame));
        now + self.sweep_frame_airtime
    }

    fn start_contention_period(&mut self, end_time: SimTime) {
        self.contention_periods.push((self.clock.now(), end_time));
    }

    fn start_non_contention_period(&mut self, destination: MacAddress, end_time: SimTime) {
        self.service_periods
            .push((self.clock.now(), destination, end_time));
    }

    fn set_link_tx_power(&mut self, peer: MacAddress, power_dbm: f64) {
        self.tx_power.push((peer, power_dbm));
    }

    fn short_beamforming_interframe_space(&self) -> Duration {
        self.sbifs
    }

    fn medium_beamforming_interframe_space(&self) -> Duration {
        self.mbifs
    }

    fn receive_sector_sweep_sector_duration(&self) -> Duration {
        self.rx_sector_duration
    }

    fn calculate_abft_slot_time(&self, frames_per_slot: u32) -> Duration {
        (self.sweep_frame_airtime + self.sbifs) * frames_per_slot + Duration::from_micros(20)
    }

    fn network_layer_link_up(&mut self, access_point: MacAddress) {
        self.links_up.push(access_point);
    }

    fn network_layer_link_down(&mut self) {
        self.links_down += 1;
    }
}

pub const SCRIPTED_DWELL: Duration = Duration::from_millis(5);
pub const SCRIPTED_RESCAN_DELAY: Duration = Duration::from_millis(50);
pub const SCRIPTED_LINK_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Verdicts handed to the station by `ScriptedScanner`.
#[derive(Default)]
pub struct ScannerScript {
    pub channels: Vec<ChannelNumber>,
    pub choice: Option<AccessPointChoice>,
    pub in_range: bool,
    pub switch_access_point: bool,
    /// Reset once a scan sequence starts.
    pub background_scan: bool,
    pub sightings: Vec<(SimTime, ChannelNumber, MacAddress)>,
    pub current: Option<(Vec<ChannelNumber>, MacAddress)>,
    pub scans_started: usize,
    pub clears: usize,
    queue: VecDeque<ChannelNumber>,
}

pub struct ScriptedScanner {
    script: Rc<RefCell<ScannerScript>>,
}

impl ScriptedScanner {
    pub fn new(
        channels: Vec<ChannelNumber>,
        choice: Option<AccessPointChoice>,
    ) -> (Self, Rc<RefCell<ScannerScript>>) {
        let script = Rc::new(RefCell::new(ScannerScript {
            channels,
            choice,
            in_range: true,
            ..Default::default()
        }));
        (
            Self {
                script: script.clone(),
            },
            script,
        )
    }
}

impl ChannelScanningController for ScriptedScanner {
    fn start_scan_sequence(&mut self, _now: SimTime) {
        let mut script = self.script.borrow_mut();
        script.queue = script.channels.iter().copied().collect();
        script.scans_started += 1;
        script.background_scan = false;
    }

    fn next_scan_dwell(&mut self) -> Option<ScanDwell> {
        self.script
            .borrow_mut()
            .queue
            .pop_front()
            .map(|channel| ScanDwell {
                channel,
                duration: SCRIPTED_DWELL,
            })
    }

    fn record_directional_beacon(
        &mut self,
        now: SimTime,
        channel: ChannelNumber,
        sighting: BeaconSighting,
    ) {
        self.script
            .borrow_mut()
            .sightings
            .push((now, channel, sighting.access_point));
    }

    fn any_in_range_access_point(&self, _now: SimTime) -> bool {
        self.script.borrow().in_range
    }

    fn should_switch_access_point(&self, _now: SimTime) -> bool {
        self.script.borrow().switch_access_point
    }

    fn choose_access_point(
        &self,
        _now: SimTime,
        _max_bonded_channels: usize,
    ) -> Option<AccessPointChoice> {
        self.script.borrow().choice.clone()
    }

    fn set_current_channel_and_access_point(
        &mut self,
        channels: &[ChannelNumber],
        access_point: MacAddress,
    ) {
        self.script.borrow_mut().current = Some((channels.to_vec(), access_point));
    }

    fn clear_current_channel_and_access_point(&mut self) {
        let mut script = self.script.borrow_mut();
        script.current = None;
        script.clears += 1;
    }

    fn next_scan_start_time(&self, now: SimTime) -> SimTime {
        now + SCRIPTED_RESCAN_DELAY
    }

    fn next_link_check_time(&self, now: SimTime) -> SimTime {
        now + SCRIPTED_LINK_CHECK_INTERVAL
    }

    fn background_scan_wanted(&self, _now: SimTime) -> bool {
        self.script.borrow().background_scan
    }
}
