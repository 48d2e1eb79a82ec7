//! 60 GHz propagation between simulated radios

use std::f64::consts::PI;

use beamsim_core::{ChannelNumber, Frame, SectorId};
use log::trace;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::engine::NodeIndex;
use crate::SimulationError;

const SPEED_OF_LIGHT: f64 = 299_792_458.0;
/// Closer than this the far-field loss formula stops making sense.
const MIN_DISTANCE_M: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Direction of `other` in degrees, counter-clockwise from the x axis,
    /// in `[0, 360)`.
    pub fn bearing_to(&self, other: &Position) -> f64 {
        (other.y - self.y)
            .atan2(other.x - self.x)
            .to_degrees()
            .rem_euclid(360.0)
    }
}

/// Sector of an antenna with `sectors` equal-width sectors that covers
/// `to` as seen from `from`. Sector 0 starts at bearing 0.
pub fn sector_toward(from: Position, to: Position, sectors: u32) -> SectorId {
    let sectors = sectors.max(1);
    let width = 360.0 / f64::from(sectors);
    let sector = (from.bearing_to(&to) / width).floor() as u32;
    sector.min(sectors - 1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediumConfig {
    pub carrier_frequency_hz: f64,
    pub shadowing_std_dev_db: f64,
    pub noise_floor_dbm: f64,
    /// Control PHY sensitivity; weaker frames are lost.
    pub sensitivity_dbm: f64,
    pub side_lobe_gain_dbi: f64,
    pub quasi_omni_gain_dbi: f64,
}

impl Default for MediumConfig {
    fn default() -> Self {
        Self {
            carrier_frequency_hz: 60.48e9,
            shadowing_std_dev_db: 1.0,
            noise_floor_dbm: -71.0,
            sensitivity_dbm: -78.0,
            side_lobe_gain_dbi: -10.0,
            quasi_omni_gain_dbi: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntennaPattern {
    QuasiOmni,
    Sector(SectorId),
}

#[derive(Debug, Clone)]
struct Radio {
    position: Position,
    sectors: u32,
    channel: ChannelNumber,
    pattern: AntennaPattern,
    receiving: bool,
}

/// A frame on its way to one receiver.
#[derive(Debug, Clone)]
pub struct Arrival {
    pub transmitter: NodeIndex,
    pub receiver: NodeIndex,
    pub channel: ChannelNumber,
    pub frame: Frame,
    /// Transmit power plus transmit antenna gain towards the receiver.
    pub eirp_dbm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reception {
    pub rssi_dbm: f64,
    pub sinr_db: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediumStats {
    pub transmissions: u64,
    pub receptions: u64,
    pub below_sensitivity: u64,
    pub not_listening: u64,
}

pub struct Medium {
    config: MediumConfig,
    radios: Vec<Radio>,
    rng: StdRng,
    shadowing: Normal<f64>,
    stats: MediumStats,
}

impl Medium {
    pub fn new(config: MediumConfig, seed: u64) -> Result<Self, SimulationError> {
        if !(config.shadowing_std_dev_db >= 0.0) {
            return Err(SimulationError::InvalidSetup(format!(
                "shadowing std dev {} must be a non-negative number",
                config.shadowing_std_dev_db
            )));
        }
        let shadowing = Normal::new(0.0, config.shadowing_std_dev_db).map_err(|err| {
            SimulationError::InvalidSetup(format!(
                "shadowing std dev {}: {err}",
                config.shadowing_std_dev_db
            ))
        })?;
        Ok(Self {
            config,
            radios: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            shadowing,
            stats: MediumStats::default(),
        })
    }

    /// Registers a radio, listening quasi-omni on `channel` but not yet
    /// receiving.
    pub fn add_radio(&mut self, position: Position, sectors: u32, channel: ChannelNumber) -> NodeIndex {
        self.radios.push(Radio {
            position,
            sectors: sectors.max(1),
            channel,
            pattern: AntennaPattern::QuasiOmni,
            receiving: false,
        });
        self.radios.len() - 1
    }

    pub fn position(&self, node: NodeIndex) -> Position {
        self.radios[node].position
    }

    pub fn channel(&self, node: NodeIndex) -> ChannelNumber {
        self.radios[node].channel
    }

    pub fn pattern(&self, node: NodeIndex) -> AntennaPattern {
        self.radios[node].pattern
    }

    pub fn is_receiving(&self, node: NodeIndex) -> bool {
        self.radios[node].receiving
    }

    pub fn set_channel(&mut self, node: NodeIndex, channel: ChannelNumber) {
        self.radios[node].channel = channel;
    }

    pub fn set_pattern(&mut self, node: NodeIndex, pattern: AntennaPattern) {
        self.radios[node].pattern = pattern;
    }

    pub fn set_receiving(&mut self, node: NodeIndex, receiving: bool) {
        self.radios[node].receiving = receiving;
    }

    pub fn stats(&self) -> &MediumStats {
        &self.stats
    }

    /// Gain of `node`'s current pattern in the direction of `toward`.
    pub fn antenna_gain_dbi(&self, node: NodeIndex, toward: Position) -> f64 {
        let radio = &self.radios[node];
        match radio.pattern {
            AntennaPattern::QuasiOmni => self.config.quasi_omni_gain_dbi,
            AntennaPattern::Sector(sector) => {
                if sector_toward(radio.position, toward, radio.sectors) == sector {
                    // ideal directivity of one of `sectors` equal slices
                    10.0 * f64::from(radio.sectors).log10()
                } else {
                    self.config.side_lobe_gain_dbi
                }
            }
        }
    }

    /// Free-space path loss at the carrier frequency.
    pub fn path_loss_db(&self, distance_m: f64) -> f64 {
        let distance_m = distance_m.max(MIN_DISTANCE_M);
        20.0 * (4.0 * PI * distance_m * self.config.carrier_frequency_hz / SPEED_OF_LIGHT).log10()
    }

    /// Starts a transmission from `transmitter` with its current pattern.
    /// Every other radio tuned to the same channel gets an arrival.
    pub fn fan_out(&mut self, transmitter: NodeIndex, frame: &Frame, tx_power_dbm: f64) -> Vec<Arrival> {
        self.stats.transmissions += 1;
        let source = &self.radios[transmitter];
        let channel = source.channel;
        self.radios
            .iter()
            .enumerate()
            .filter(|(index, radio)| *index != transmitter && radio.channel == channel)
            .map(|(receiver, radio)| Arrival {
                transmitter,
                receiver,
                channel,
                frame: frame.clone(),
                eirp_dbm: tx_power_dbm + self.antenna_gain_dbi(transmitter, radio.position),
            })
            .collect()
    }

    /// Decides whether an arrival is decoded, using the receiver's state at
    /// the end of the frame.
    pub fn receive(&mut self, arrival: &Arrival) -> Option<Reception> {
        let radio = &self.radios[arrival.receiver];
        if !radio.receiving || radio.channel != arrival.channel {
            self.stats.not_listening += 1;
            return None;
        }
        let from = self.radios[arrival.transmitter].position;
        let distance = radio.position.distance_to(&from);
        let rx_gain = self.antenna_gain_dbi(arrival.receiver, from);
        let shadowing = self.shadowing.sample(&mut self.rng);
        let rssi_dbm = arrival.eirp_dbm + rx_gain - self.path_loss_db(distance) + shadowing;
        if rssi_dbm < self.config.sensitivity_dbm {
            self.stats.below_sensitivity += 1;
            trace!(
                "{} from node {} lost at node {} ({:.1} dBm)",
                arrival.frame.kind(),
                arrival.transmitter,
                arrival.receiver,
                rssi_dbm
            );
            return None;
        }
        self.stats.receptions += 1;
        Some(Reception {
            rssi_dbm,
            sinr_db: rssi_dbm - self.config.noise_floor_dbm,
        })
    }
}
