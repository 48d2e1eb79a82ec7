//! Channel scanning decisions consumed by the station controller

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use beamsim_core::{ChannelNumber, MacAddress, SimTime};
use log::trace;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanDwell {
    pub channel: ChannelNumber,
    pub duration: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPointChoice {
    pub channels: Vec<ChannelNumber>,
    pub access_point: MacAddress,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BeaconSighting {
    pub access_point: MacAddress,
    pub ssid: String,
    pub rssi_dbm: f64,
}

/// Decides which channel to listen on and which AP/PCP to join.
///
/// The controller only asks and reacts; it never inspects the scanner's
/// bookkeeping.
pub trait ChannelScanningController {
    fn start_scan_sequence(&mut self, now: SimTime);

    /// Next channel of the running sequence, `None` once it is exhausted.
    fn next_scan_dwell(&mut self) -> Option<ScanDwell>;

    fn record_directional_beacon(
        &mut self,
        now: SimTime,
        channel: ChannelNumber,
        sighting: BeaconSighting,
    );

    fn any_in_range_access_point(&self, now: SimTime) -> bool;

    fn should_switch_access_point(&self, now: SimTime) -> bool;

    fn choose_access_point(
        &self,
        now: SimTime,
        max_bonded_channels: usize,
    ) -> Option<AccessPointChoice>;

    fn set_current_channel_and_access_point(
        &mut self,
        channels: &[ChannelNumber],
        access_point: MacAddress,
    );

    fn clear_current_channel_and_access_point(&mut self);

    fn next_scan_start_time(&self, now: SimTime) -> SimTime;

    fn next_link_check_time(&self, now: SimTime) -> SimTime;

    fn background_scan_wanted(&self, now: SimTime) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub channels: Vec<ChannelNumber>,
    pub dwell_time: Duration,
    pub sighting_lifetime: Duration,
    pub switch_margin_db: f64,
    pub link_check_interval: Duration,
    pub rescan_delay: Duration,
    pub background_scan_interval: Option<Duration>,
    pub bonded_channel_width: usize,
    pub ssid: Option<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            channels: vec![2],
            dwell_time: Duration::from_millis(110),
            sighting_lifetime: Duration::from_millis(500),
            switch_margin_db: 6.0,
            link_check_interval: Duration::from_millis(200),
            rescan_delay: Duration::from_millis(50),
            background_scan_interval: None,
            bonded_channel_width: 1,
            ssid: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Sighting {
    channel: ChannelNumber,
    rssi_dbm: f64,
    last_seen: SimTime,
}

/// Picks the AP with the strongest directional beacons.
#[derive(Debug)]
pub struct StrongestBeaconScanner {
    config: ScannerConfig,
    sightings: BTreeMap<MacAddress, Sighting>,
    scan_queue: VecDeque<ChannelNumber>,
    current: Option<(Vec<ChannelNumber>, MacAddress)>,
    last_scan_started: Option<SimTime>,
}

impl StrongestBeaconScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            sightings: BTreeMap::new(),
            scan_queue: VecDeque::new(),
            current: None,
            last_scan_started: None,
        }
    }

    fn in_range(&self, now: SimTime) -> impl Iterator<Item = (&MacAddress, &Sighting)> {
        let lifetime = self.config.sighting_lifetime;
        self.sightings
            .iter()
            .filter(move |(_, s)| now.saturating_sub(s.last_seen) <= lifetime)
    }

    fn strongest(&self, now: SimTime) -> Option<(MacAddress, &Sighting)> {
        self.in_range(now)
            .fold(None, |best: Option<(MacAddress, &Sighting)>, (addr, s)| match best {
                Some((_, b)) if b.rssi_dbm >= s.rssi_dbm => best,
                _ => Some((*addr, s)),
            })
    }

    pub fn current_access_point(&self) -> Option<MacAddress> {
        self.current.as_ref().map(|(_, ap)| *ap)
    }
}

impl ChannelScanningController for StrongestBeaconScanner {
    fn start_scan_sequence(&mut self, now: SimTime) {
        self.scan_queue = self.config.channels.iter().copied().collect();
        self.last_scan_started = Some(now);
    }

    fn next_scan_dwell(&mut self) -> Option<ScanDwell> {
        self.scan_queue.pop_front().map(|channel| ScanDwell {
            channel,
            duration: self.config.dwell_time,
        })
    }

    fn record_directional_beacon(
        &mut self,
        now: SimTime,
        channel: ChannelNumber,
        sighting: BeaconSighting,
    ) {
        if let Some(ssid) = &self.config.ssid {
            if *ssid != sighting.ssid {
                trace!("ignoring beacon from {} for ssid {:?}", sighting.access_point, sighting.ssid);
                return;
            }
        }
        self.sightings
            .entry(sighting.access_point)
            .and_modify(|s| {
                s.channel = channel;
                s.rssi_dbm = 0.5 * s.rssi_dbm + 0.5 * sighting.rssi_dbm;
                s.last_seen = now;
            })
            .or_insert(Sighting {
                channel,
                rssi_dbm: sighting.rssi_dbm,
                last_seen: now,
            });
    }

    fn any_in_range_access_point(&self, now: SimTime) -> bool {
        self.in_range(now).next().is_some()
    }

    fn should_switch_access_point(&self, now: SimTime) -> bool {
        let Some((_, current_ap)) = &self.current else {
            return false;
        };
        let Some((best_ap, best)) = self.strongest(now) else {
            return false;
        };
        if best_ap == *current_ap {
            return false;
        }
        match self.in_range(now).find(|(addr, _)| *addr == current_ap) {
            Some((_, current)) => best.rssi_dbm > current.rssi_dbm + self.config.switch_margin_db,
            None => true,
        }
    }

    fn choose_access_point(
        &self,
        now: SimTime,
        max_bonded_channels: usize,
    ) -> Option<AccessPointChoice> {
        let (access_point, sighting) = self.strongest(now)?;
        let width = self.config.bonded_channel_width.min(max_bonded_channels).max(1);
        Some(AccessPointChoice {
            channels: (0..width as ChannelNumber)
                .map(|offset| sighting.channel + offset)
                .collect(),
            access_point,
        })
    }

    fn set_current_channel_and_access_point(
        &mut self,
        channels: &[ChannelNumber],
        access_point: MacAddress,
    ) {
        self.current = Some((channels.to_vec(), access_point));
    }

    fn clear_current_channel_and_access_point(&mut self) {
        self.current = None;
    }

    fn next_scan_start_time(&self, now: SimTime) -> SimTime {
        now + self.config.rescan_delay
    }

    fn next_link_check_time(&self, now: SimTime) -> SimTime {
        now + self.config.link_check_interval
    }

    fn background_scan_wanted(&self, now: SimTime) -> bool {
        match (self.config.background_scan_interval, self.last_scan_started) {
            (Some(interval), Some(last)) => now.saturating_sub(last) >= interval,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn sighting(node: u32, rssi_dbm: f64) -> BeaconSighting {
        BeaconSighting {
            access_point: MacAddress::new(node, 0),
            ssid: "dmg".into(),
            rssi_dbm,
        }
    }

    #[test]
    fn test_scan_sequence_visits_every_channel_once() {
        let mut scanner = StrongestBeaconScanner::new(ScannerConfig {
            channels: vec![1, 2, 3],
            ..Default::default()
        });
        scanner.start_scan_sequence(ms(0));
        let visited: Vec<_> = std::iter::from_fn(|| scanner.next_scan_dwell())
            .map(|d| d.channel)
            .collect();
        assert_eq!(visited, vec![1, 2, 3]);
        assert_eq!(scanner.next_scan_dwell(), None);
    }

    #[test]
    fn test_choose_strongest_in_range() {
        let mut scanner = StrongestBeaconScanner::new(ScannerConfig::default());
        scanner.record_directional_beacon(ms(0), 2, sighting(1, -60.0));
        scanner.record_directional_beacon(ms(0), 3, sighting(4, -50.0));

        let choice = scanner.choose_access_point(ms(10), 1).unwrap();
        assert_eq!(choice.access_point, MacAddress::new(4, 0));
        assert_eq!(choice.channels, vec![3]);

        // both sightings age out
        assert!(!scanner.any_in_range_access_point(ms(10_000)));
        assert_eq!(scanner.choose_access_point(ms(10_000), 1), None);
    }

    #[test]
    fn test_ssid_filter() {
        let mut scanner = StrongestBeaconScanner::new(ScannerConfig {
            ssid: Some("other".into()),
            ..Default::default()
        });
        scanner.record_directional_beacon(ms(0), 2, sighting(1, -40.0));
        assert!(!scanner.any_in_range_access_point(ms(0)));
    }

    #[test]
    fn test_switch_needs_margin() {
        let mut scanner = StrongestBeaconScanner::new(ScannerConfig::default());
        scanner.set_current_channel_and_access_point(&[2], MacAddress::new(1, 0));
        scanner.record_directional_beacon(ms(0), 2, sighting(1, -60.0));
        scanner.record_directional_beacon(ms(0), 2, sighting(4, -57.0));
        assert!(!scanner.should_switch_access_point(ms(1)));

        scanner.record_directional_beacon(ms(1), 2, sighting(4, -40.0));
        assert!(scanner.should_switch_access_point(ms(2)));

        scanner.clear_current_channel_and_access_point();
        assert!(!scanner.should_switch_access_point(ms(2)));
    }

    #[test]
    fn test_background_scan_interval() {
        let mut scanner = StrongestBeaconScanner::new(ScannerConfig {
            background_scan_interval: Some(ms(1000)),
            ..Default::default()
        });
        scanner.start_scan_sequence(ms(0));
        assert!(!scanner.background_scan_wanted(ms(999)));
        assert!(scanner.background_scan_wanted(ms(1000)));

        let disabled = StrongestBeaconScanner::new(ScannerConfig::default());
        assert!(!disabled.background_scan_wanted(ms(5000)));
    }
}
