//! Capabilities the station controller needs from the lower MAC and PHY

use std::time::Duration;

use beamsim_core::{ChannelNumber, Frame, MacAddress, SectorId, SimTime};

/// Lower MAC/PHY of one DMG interface.
///
/// The station controller is the only component that switches antenna mode
/// or receive state through this trait while it is active.
pub trait DmgDevice {
    /// Primary channel currently tuned.
    fn current_channel(&self) -> ChannelNumber;

    /// Tunes to a set of bonded channels; the first one is the primary.
    fn switch_to_channels(&mut self, channels: &[ChannelNumber]);

    fn max_bonded_channel_count(&self) -> usize;

    fn number_of_antenna_sectors(&self) -> u32;

    fn switch_to_quasi_omni_mode(&mut self);

    fn switch_to_sector(&mut self, sector: SectorId);

    fn start_receiving_frames(&mut self);

    fn stop_receiving_frames(&mut self);

    fn last_frame_rssi_dbm(&self) -> f64;

    fn last_frame_sinr_db(&self) -> f64;

    /// Queues a management frame for transmission with the current antenna
    /// pattern.
    fn send_management_frame(&mut self, frame: Frame);

    /// Transmits one sector sweep frame immediately and returns the time its
    /// transmission ends.
    fn transmit_sector_sweep_frame(&mut self, frame: Frame) -> SimTime;

    /// Opens a contention based access period until `end_time`.
    fn start_contention_period(&mut self, end_time: SimTime);

    /// Opens a scheduled service period towards `destination` until
    /// `end_time`.
    fn start_non_contention_period(&mut self, destination: MacAddress, end_time: SimTime);

    fn set_link_tx_power(&mut self, peer: MacAddress, power_dbm: f64);

    /// SBIFS, the gap between consecutive sector sweep frames.
    fn short_beamforming_interframe_space(&self) -> Duration;

    /// MBIFS, the gap before a station may access the medium.
    fn medium_beamforming_interframe_space(&self) -> Duration;

    /// Dwell time per receive sector during a receive sector sweep.
    fn receive_sector_sweep_sector_duration(&self) -> Duration;

    /// Length of an A-BFT slot able to carry `frames_per_slot` sweep frames
    /// plus the feedback exchange.
    fn calculate_abft_slot_time(&self, frames_per_slot: u32) -> Duration;

    fn network_layer_link_up(&mut self, access_point: MacAddress);

    fn network_layer_link_down(&mut self);
}
