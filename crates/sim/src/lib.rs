//! Discrete-event simulation of DMG stations beamforming with a PCP

pub mod device;
pub mod engine;
pub mod medium;
pub mod pcp;
pub mod scenarios;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use beamsim_core::{AssociationId, ChannelNumber, MacAddress, NodeId, SimTime};
use beamsim_mac::config::{
    ABFT_SLOT_TIME_PARAMETER, FORCED_ACCESS_POINT_PARAMETER, FORCED_RX_SECTORS_PARAMETER,
    FORCED_TX_POWER_PARAMETER, FORCED_TX_SECTORS_PARAMETER, RANDOM_SEED_PARAMETER,
};
use beamsim_mac::{
    ConfigError, DmgStation, EwmaSectorSelector, ParameterSet, ScannerConfig, StationConfig,
    StationStats, StrongestBeaconScanner,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use device::{DeviceProfile, DeviceStats, SimulatedDmgDevice};
use engine::{EngineEvent, EngineScheduler, EventQueue, NodeIndex};
use medium::{sector_toward, Medium, MediumConfig, MediumStats, Position};
use pcp::{PcpConfig, PcpStats, SimulatedPcp};

pub type Station = DmgStation<SimulatedDmgDevice, EngineScheduler>;

pub const PCP_NODE_ID: NodeId = 1;
pub const PCP_ADDRESS: MacAddress = MacAddress::new(PCP_NODE_ID, 0);

/// Simulated time between two progress callbacks.
const PROGRESS_STEP: Duration = Duration::from_millis(10);

/// Address of the `index`-th station of a scenario.
pub fn station_address(index: usize) -> MacAddress {
    MacAddress::new(PCP_NODE_ID + 1 + index as NodeId, 0)
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid setup: {0}")]
    InvalidSetup(String),

    #[error("{station} rejected its configuration: {source}")]
    Configuration {
        station: MacAddress,
        source: ConfigError,
    },

    #[error("aborted at {at:?} by {node}: {source}")]
    Aborted {
        node: MacAddress,
        at: SimTime,
        source: ConfigError,
    },
}

impl SimulationError {
    /// The fatal configuration error behind this failure, if any.
    pub fn config_error(&self) -> Option<&ConfigError> {
        match self {
            SimulationError::InvalidSetup(_) => None,
            SimulationError::Configuration { source, .. }
            | SimulationError::Aborted { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSetup {
    pub position: Position,
    pub parameters: ParameterSet,
    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub name: String,
    pub duration: Duration,
    pub seed: u64,
    pub channel: ChannelNumber,
    pub medium: MediumConfig,
    pub profile: DeviceProfile,
    pub pcp: PcpConfig,
    pub stations: Vec<StationSetup>,
    /// The scenario is built to hit a fatal configuration error.
    pub expect_abort: bool,
}

impl SimulationConfig {
    fn station(&self, position: Position) -> StationSetup {
        StationSetup {
            position,
            parameters: ParameterSet::new().with(RANDOM_SEED_PARAMETER, self.seed.to_string()),
            scanner: ScannerConfig {
                channels: vec![self.channel],
                ..ScannerConfig::default()
            },
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            duration: Duration::from_secs(1),
            seed: 1,
            channel: 2,
            medium: MediumConfig::default(),
            profile: DeviceProfile::default(),
            pcp: PcpConfig::default(),
            stations: Vec::new(),
            expect_abort: false,
        }
    }
}

pub struct SimulationPresets;

impl SimulationPresets {
    /// One station, a few metres from the PCP, learning its receive sector
    /// through a receive sector sweep.
    pub fn single_station() -> SimulationConfig {
        let mut config = SimulationConfig {
            name: "single-station".to_string(),
            pcp: PcpConfig {
                receive_sector_sweep: true,
                ..PcpConfig::default()
            },
            ..SimulationConfig::default()
        };
        config.stations.push(config.station(Position::new(4.0, 1.5)));
        config
    }

    /// Six stations competing for four A-BFT slots.
    pub fn contention() -> SimulationConfig {
        let mut config = SimulationConfig {
            name: "abft-contention".to_string(),
            duration: Duration::from_secs(3),
            seed: 7,
            pcp: PcpConfig {
                abft_num_slots: 4,
                ..PcpConfig::default()
            },
            ..SimulationConfig::default()
        };
        for index in 0..6u32 {
            let angle = f64::from(index) * std::f64::consts::PI / 3.0 + 0.2;
            let position = Position::new(3.5 * angle.cos(), 3.5 * angle.sin());
            config.stations.push(config.station(position));
        }
        config
    }

    /// A station with static sectors towards a forced PCP, never sweeping.
    pub fn forced_beamforming() -> SimulationConfig {
        let mut config = SimulationConfig {
            name: "forced-beamforming".to_string(),
            ..SimulationConfig::default()
        };
        let position = Position::new(3.0, -2.0);
        let sector = sector_toward(position, config.pcp.position, config.profile.antenna_sectors);
        let mut station = config.station(position);
        station.parameters = station
            .parameters
            .with(FORCED_ACCESS_POINT_PARAMETER, PCP_NODE_ID.to_string())
            .with(FORCED_TX_SECTORS_PARAMETER, format!("{PCP_NODE_ID}:{sector}"))
            .with(FORCED_RX_SECTORS_PARAMETER, format!("{PCP_NODE_ID}:{sector}"))
            .with(FORCED_TX_POWER_PARAMETER, format!("{PCP_NODE_ID}:12"));
        config.stations.push(station);
        config
    }

    /// An A-BFT slot too short for a full sector sweep. Aborts the run.
    pub fn undersized_abft_slot() -> SimulationConfig {
        let mut config = Self::single_station();
        config.name = "undersized-abft-slot".to_string();
        config.expect_abort = true;
        for station in &mut config.stations {
            station.parameters = station.parameters.clone().with(ABFT_SLOT_TIME_PARAMETER, "20us");
        }
        config
    }

    pub fn all() -> Vec<SimulationConfig> {
        vec![
            Self::single_station(),
            Self::contention(),
            Self::forced_beamforming(),
            Self::undersized_abft_slot(),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationReport {
    pub address: MacAddress,
    pub state: String,
    pub linked: bool,
    pub association_id: AssociationId,
    pub access_point: MacAddress,
    pub stats: StationStats,
    pub device: DeviceStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub name: String,
    pub simulated: SimTime,
    pub events: u64,
    pub pcp: PcpStats,
    pub medium: MediumStats,
    pub stations: Vec<StationReport>,
}

impl SimulationReport {
    pub fn linked_stations(&self) -> usize {
        self.stations.iter().filter(|station| station.linked).count()
    }
}

/// One run: the PCP is node 0, stations follow in setup order.
pub struct Simulation {
    name: String,
    end: SimTime,
    queue: Rc<RefCell<EventQueue>>,
    medium: Rc<RefCell<Medium>>,
    pcp: SimulatedPcp,
    stations: Vec<Station>,
}

impl Simulation {
    pub fn new(config: &SimulationConfig) -> Result<Self, SimulationError> {
        if config.profile.antenna_sectors == 0 {
            return Err(SimulationError::InvalidSetup(
                "devices need at least one antenna sector".to_string(),
            ));
        }
        if config.pcp.beacon_interval.is_zero() {
            return Err(SimulationError::InvalidSetup(
                "beacon interval must be positive".to_string(),
            ));
        }
        let sectors = config.profile.antenna_sectors;
        let queue = Rc::new(RefCell::new(EventQueue::new()));
        let medium = Rc::new(RefCell::new(Medium::new(config.medium.clone(), config.seed)?));

        let pcp_node = medium
            .borrow_mut()
            .add_radio(config.pcp.position, sectors, config.channel);
        let pcp_device = SimulatedDmgDevice::new(
            pcp_node,
            PCP_ADDRESS,
            config.profile.clone(),
            medium.clone(),
            queue.clone(),
        );
        let pcp = SimulatedPcp::new(
            PCP_ADDRESS,
            config.pcp.clone(),
            pcp_device,
            EngineScheduler::new(queue.clone(), pcp_node),
        );

        let directory: BTreeSet<NodeId> = std::iter::once(PCP_NODE_ID)
            .chain((0..config.stations.len()).map(|index| station_address(index).node_id()))
            .collect();
        let mut stations = Vec::with_capacity(config.stations.len());
        for (index, setup) in config.stations.iter().enumerate() {
            let address = station_address(index);
            let rejected = |source| SimulationError::Configuration {
                station: address,
                source,
            };
            let station_config =
                StationConfig::from_parameters(&setup.parameters, address, &directory)
                    .map_err(rejected)?;
            let node = medium
                .borrow_mut()
                .add_radio(setup.position, sectors, config.channel);
            let device = SimulatedDmgDevice::new(
                node,
                address,
                config.profile.clone(),
                medium.clone(),
                queue.clone(),
            );
            let station = DmgStation::new(
                address,
                station_config,
                device,
                EngineScheduler::new(queue.clone(), node),
                Box::new(StrongestBeaconScanner::new(setup.scanner.clone())),
                EwmaSectorSelector::boxed,
            )
            .map_err(rejected)?;
            stations.push(station);
        }

        Ok(Self {
            name: config.name.clone(),
            end: config.duration,
            queue,
            medium,
            pcp,
            stations,
        })
    }

    pub fn now(&self) -> SimTime {
        self.queue.borrow().now()
    }

    pub fn pcp(&self) -> &SimulatedPcp {
        &self.pcp
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    /// Handles the next event. Returns `false` once the queue is drained or
    /// the next event lies past the end of the run.
    pub fn step(&mut self) -> Result<bool, SimulationError> {
        let next = self.queue.borrow_mut().peek_time();
        if next.map_or(true, |at| at > self.end) {
            return Ok(false);
        }
        let popped = self.queue.borrow_mut().pop();
        let Some((at, event)) = popped else {
            return Ok(false);
        };
        let (node, result) = match event {
            EngineEvent::Timer { node, event_id } => {
                let result = match node {
                    0 => {
                        self.pcp.handle_timed_event(event_id);
                        Ok(())
                    }
                    _ => self.stations[node - 1].handle_timed_event(event_id),
                };
                (node, result)
            }
            EngineEvent::Arrival(arrival) => {
                let node = arrival.receiver;
                let reception = self.medium.borrow_mut().receive(&arrival);
                let result = match reception {
                    None => Ok(()),
                    Some(reception) if node == 0 => {
                        self.pcp.device_mut().record_reception(reception);
                        self.pcp.process_management_frame(arrival.frame);
                        Ok(())
                    }
                    Some(reception) => {
                        let station = &mut self.stations[node - 1];
                        station.device_mut().record_reception(reception);
                        station.process_management_frame(arrival.frame)
                    }
                };
                (node, result)
            }
        };
        result.map_err(|source| {
            let address = self.address_of(node);
            error!(
                "{}: {} aborted the run at {:?}: {} (fix `{}`)",
                self.name,
                address,
                at,
                source,
                source.parameter()
            );
            SimulationError::Aborted {
                node: address,
                at,
                source,
            }
        })?;
        Ok(true)
    }

    pub fn run(&mut self) -> Result<SimulationReport, SimulationError> {
        self.run_with_progress(|_| {})
    }

    /// Runs to the configured end, calling `progress` with the simulated
    /// time every few milliseconds of it.
    pub fn run_with_progress(
        &mut self,
        mut progress: impl FnMut(SimTime),
    ) -> Result<SimulationReport, SimulationError> {
        info!(
            "{}: {} stations for {:?}",
            self.name,
            self.stations.len(),
            self.end
        );
        let mut reported = Duration::ZERO;
        while self.step()? {
            let now = self.now();
            if now >= reported + PROGRESS_STEP {
                progress(now);
                reported = now;
            }
        }
        progress(self.end);
        Ok(self.report())
    }

    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            name: self.name.clone(),
            simulated: self.now(),
            events: self.queue.borrow().delivered(),
            pcp: self.pcp.stats().clone(),
            medium: self.medium.borrow().stats().clone(),
            stations: self
                .stations
                .iter()
                .map(|station| StationReport {
                    address: station.address(),
                    state: format!("{:?}", station.state()),
                    linked: station.state().is_linked(),
                    association_id: station.association_id(),
                    access_point: station.current_access_point(),
                    stats: station.stats().clone(),
                    device: station.device().stats().clone(),
                })
                .collect(),
        }
    }

    fn address_of(&self, node: NodeIndex) -> MacAddress {
        match node {
            0 => self.pcp.address(),
            _ => self.stations[node - 1].address(),
        }
    }
}
