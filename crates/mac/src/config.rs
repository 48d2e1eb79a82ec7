//! Read-only station parameters and their validation

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::time::Duration;

use beamsim_core::{MacAddress, NodeId, SectorId, MAX_SSID_LEN};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub const FORCED_TX_SECTORS_PARAMETER: &str = "dot11ad-forced-tx-beamforming-sector-ids";
pub const FORCED_RX_SECTORS_PARAMETER: &str = "dot11ad-forced-rx-beamforming-sector-ids";
pub const FORCED_TX_POWER_PARAMETER: &str = "dot11ad-forced-link-tx-power-dbm";
pub const FORCED_ACCESS_POINT_PARAMETER: &str = "dot11ad-forced-pcp-ap-node-id";
pub const AUTHENTICATION_TIMEOUT_PARAMETER: &str = "dot11-authentication-timeout";
pub const ASSOCIATION_FAILURE_TIMEOUT_PARAMETER: &str = "dot11-association-failure-timeout";
pub const REINITIALIZATION_DELAY_PARAMETER: &str = "dot11-sta-reinitialization-delay";
pub const ABFT_SLOT_TIME_PARAMETER: &str =
    "dot11ad-association-beamforming-training-aka-abft-slot-time";
pub const SSID_PARAMETER: &str = "dot11-ssid";
pub const LISTEN_INTERVAL_PARAMETER: &str = "dot11-power-save-listen-interval";
pub const RANDOM_SEED_PARAMETER: &str = "dot11ad-random-seed";
/// Named by timing violations in the DTI schedule.
pub const ALLOCATION_SCHEDULE_PARAMETER: &str = "dot11ad-extended-schedule-allocations";
pub const BEACON_INTERVAL_PARAMETER: &str = "dot11ad-beacon-interval";
/// Named when the device reports an antenna without sectors.
pub const ANTENNA_SECTORS_PARAMETER: &str = "dot11ad-number-of-antenna-sectors";

/// String key/value parameters for one station interface.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSet {
    values: BTreeMap<String, String>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|v| v.trim())
    }

    pub fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        self.get(name)
            .map(|raw| {
                raw.parse::<T>().map_err(|_| ConfigError::Malformed {
                    parameter: name.to_string(),
                    value: raw.to_string(),
                })
            })
            .transpose()
    }

    pub fn duration(&self, name: &str) -> Result<Option<Duration>, ConfigError> {
        self.get(name)
            .map(|raw| {
                parse_duration(raw).ok_or_else(|| ConfigError::Malformed {
                    parameter: name.to_string(),
                    value: raw.to_string(),
                })
            })
            .transpose()
    }

    /// Parses a `node:value` pair list, separated by whitespace or commas.
    pub fn node_pairs<T: FromStr>(&self, name: &str) -> Result<Vec<(NodeId, T)>, ConfigError> {
        let Some(raw) = self.get(name) else {
            return Ok(Vec::new());
        };
        raw.split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .map(|token| {
                let malformed = || ConfigError::Malformed {
                    parameter: name.to_string(),
                    value: token.to_string(),
                };
                let (node, value) = token.split_once(':').ok_or_else(malformed)?;
                let node = node.parse::<NodeId>().map_err(|_| malformed())?;
                let value = value.parse::<T>().map_err(|_| malformed())?;
                Ok((node, value))
            })
            .collect()
    }
}

/// Parses `250ms`, `10us`, `3ns`, `1.5s` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (number, scale) = if let Some(v) = raw.strip_suffix("ns") {
        (v, 1e-9)
    } else if let Some(v) = raw.strip_suffix("us") {
        (v, 1e-6)
    } else if let Some(v) = raw.strip_suffix("ms") {
        (v, 1e-3)
    } else if let Some(v) = raw.strip_suffix('s') {
        (v, 1.0)
    } else {
        (raw, 1.0)
    };
    let value = number.trim().parse::<f64>().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(value * scale))
}

/// Node ids known to the simulation, used to resolve forced peers.
pub trait NodeDirectory {
    fn contains(&self, node: NodeId) -> bool;
}

impl NodeDirectory for BTreeSet<NodeId> {
    fn contains(&self, node: NodeId) -> bool {
        BTreeSet::contains(self, &node)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForcedSectors {
    pub tx: SectorId,
    pub rx: Option<SectorId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationConfig {
    pub ssid: String,
    pub listen_interval: u16,
    pub authentication_timeout: Duration,
    pub association_failure_timeout: Duration,
    pub reinitialization_delay: Duration,
    pub abft_slot_time_override: Option<Duration>,
    pub forced_access_point: Option<MacAddress>,
    pub forced_sectors: BTreeMap<MacAddress, ForcedSectors>,
    pub forced_tx_power_dbm: BTreeMap<MacAddress, f64>,
    pub random_seed: u64,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            ssid: "dmg".to_string(),
            listen_interval: 1,
            authentication_timeout: Duration::from_millis(300),
            association_failure_timeout: Duration::from_millis(300),
            reinitialization_delay: Duration::ZERO,
            abft_slot_time_override: None,
            forced_access_point: None,
            forced_sectors: BTreeMap::new(),
            forced_tx_power_dbm: BTreeMap::new(),
            random_seed: 1,
        }
    }
}

impl StationConfig {
    /// Builds the typed configuration of the interface `own_address`.
    ///
    /// Peers named by node id are addressed on the same interface index as
    /// this station.
    pub fn from_parameters(
        parameters: &ParameterSet,
        own_address: MacAddress,
        directory: &dyn NodeDirectory,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let peer = |parameter: &str, node: NodeId| -> Result<MacAddress, ConfigError> {
            if !directory.contains(node) {
                return Err(ConfigError::UnknownNode {
                    parameter: parameter.to_string(),
                    node,
                });
            }
            Ok(MacAddress::new(node, own_address.interface_index()))
        };

        let ssid = parameters
            .get(SSID_PARAMETER)
            .map(str::to_string)
            .unwrap_or(defaults.ssid);
        if ssid.len() > MAX_SSID_LEN {
            return Err(ConfigError::SsidTooLong {
                parameter: SSID_PARAMETER.to_string(),
                len: ssid.len(),
                max: MAX_SSID_LEN,
            });
        }

        let mut forced_sectors = BTreeMap::new();
        for (node, tx) in parameters.node_pairs::<SectorId>(FORCED_TX_SECTORS_PARAMETER)? {
            let address = peer(FORCED_TX_SECTORS_PARAMETER, node)?;
            forced_sectors.insert(address, ForcedSectors { tx, rx: None });
        }
        for (node, rx) in parameters.node_pairs::<SectorId>(FORCED_RX_SECTORS_PARAMETER)? {
            let address = peer(FORCED_RX_SECTORS_PARAMETER, node)?;
            match forced_sectors.get_mut(&address) {
                Some(forced) => forced.rx = Some(rx),
                None => {
                    return Err(ConfigError::ForcedRxWithoutTx {
                        parameter: FORCED_RX_SECTORS_PARAMETER.to_string(),
                        node,
                    })
                }
            }
        }

        let mut forced_tx_power_dbm = BTreeMap::new();
        for (node, power) in parameters.node_pairs::<f64>(FORCED_TX_POWER_PARAMETER)? {
            forced_tx_power_dbm.insert(peer(FORCED_TX_POWER_PARAMETER, node)?, power);
        }

        let forced_access_point = parameters
            .parse::<NodeId>(FORCED_ACCESS_POINT_PARAMETER)?
            .map(|node| peer(FORCED_ACCESS_POINT_PARAMETER, node))
            .transpose()?;

        let abft_slot_time_override = parameters.duration(ABFT_SLOT_TIME_PARAMETER)?;
        if abft_slot_time_override == Some(Duration::ZERO) {
            return Err(ConfigError::TimingViolation {
                parameter: ABFT_SLOT_TIME_PARAMETER.to_string(),
                detail: "slot time must be positive".to_string(),
            });
        }

        let base_seed = parameters
            .parse::<u64>(RANDOM_SEED_PARAMETER)?
            .unwrap_or(defaults.random_seed);
        let random_seed = base_seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(u64::from(own_address.node_id()) << 8)
            .wrapping_add(u64::from(own_address.interface_index()));

        Ok(Self {
            ssid,
            listen_interval: parameters
                .parse(LISTEN_INTERVAL_PARAMETER)?
                .unwrap_or(defaults.listen_interval),
            authentication_timeout: parameters
                .duration(AUTHENTICATION_TIMEOUT_PARAMETER)?
                .unwrap_or(defaults.authentication_timeout),
            association_failure_timeout: parameters
                .duration(ASSOCIATION_FAILURE_TIMEOUT_PARAMETER)?
                .unwrap_or(defaults.association_failure_timeout),
            reinitialization_delay: parameters
                .duration(REINITIALIZATION_DELAY_PARAMETER)?
                .unwrap_or(defaults.reinitialization_delay),
            abft_slot_time_override,
            forced_access_point,
            forced_sectors,
            forced_tx_power_dbm,
            random_seed,
        })
    }
}
