//! Best-sector tracking for one beamformed link

use std::collections::BTreeMap;

use beamsim_core::{SectorId, QUASI_OMNI_SECTOR_ID};

/// Link quality observed on one received frame.
///
/// `tx_sector` is the sector the peer transmitted with, `rx_sector` the
/// sector this station was listening on (quasi-omni during BTI/A-BFT).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SectorMetric {
    pub tx_sector: SectorId,
    pub rx_sector: SectorId,
    pub rssi_dbm: f64,
    pub sinr_db: f64,
}

/// Opaque per-peer best-sector oracle consulted by the station controller.
pub trait BeamformingSectorSelector {
    fn start_new_beacon_interval(&mut self);

    fn record_sector_metric(&mut self, metric: SectorMetric);

    /// Feedback from the peer naming our best transmit sector towards it.
    fn record_tx_sector_feedback(&mut self, tx_sector: SectorId, snr_db: f64);

    /// Our best transmit sector towards the peer, with its SNR.
    fn best_tx_sector(&self) -> Option<(SectorId, f64)>;

    /// Our best receive sector for frames from the peer, with its SINR.
    fn best_rx_sector(&self) -> Option<(SectorId, f64)>;

    /// The peer's best transmit sector towards us, reported back to it.
    fn best_peer_tx_sector(&self) -> Option<(SectorId, f64)>;
}

/// Builds a fresh selector for a newly seen peer.
pub type SelectorFactory = fn() -> Box<dyn BeamformingSectorSelector>;

/// Number of beacon intervals a sector estimate survives without refresh.
const STALE_AFTER_INTERVALS: u64 = 8;

#[derive(Clone, Debug, PartialEq)]
struct EwmaEstimate {
    current: f64,
    last_interval: u64,
}

/// Exponentially weighted SINR average per sector.
#[derive(Clone, Debug)]
pub struct EwmaSectorSelector {
    weighting_factor: f64,
    interval: u64,
    peer_tx: BTreeMap<SectorId, EwmaEstimate>,
    own_rx: BTreeMap<SectorId, EwmaEstimate>,
    own_tx: BTreeMap<SectorId, EwmaEstimate>,
}

impl EwmaSectorSelector {
    pub fn new(weighting_factor: usize) -> Self {
        Self {
            weighting_factor: weighting_factor as f64,
            interval: 0,
            peer_tx: BTreeMap::new(),
            own_rx: BTreeMap::new(),
            own_tx: BTreeMap::new(),
        }
    }

    pub fn boxed() -> Box<dyn BeamformingSectorSelector> {
        Box::new(Self::default())
    }

    fn update(
        weighting_factor: f64,
        interval: u64,
        table: &mut BTreeMap<SectorId, EwmaEstimate>,
        sector: SectorId,
        value: f64,
    ) {
        let weight = 2.0 / (1.0 + weighting_factor);
        table
            .entry(sector)
            .and_modify(|e| {
                e.current = weight * value + (1.0 - weight) * e.current;
                e.last_interval = interval;
            })
            .or_insert(EwmaEstimate {
                current: value,
                last_interval: interval,
            });
    }

    fn best(table: &BTreeMap<SectorId, EwmaEstimate>) -> Option<(SectorId, f64)> {
        table
            .iter()
            .map(|(sector, e)| (*sector, e.current))
            .fold(None, |best, candidate| match best {
                Some((_, v)) if v >= candidate.1 => best,
                _ => Some(candidate),
            })
    }
}

impl Default for EwmaSectorSelector {
    fn default() -> Self {
        Self::new(4)
    }
}

impl BeamformingSectorSelector for EwmaSectorSelector {
    fn start_new_beacon_interval(&mut self) {
        self.interval += 1;
        let cutoff = self.interval.saturating_sub(STALE_AFTER_INTERVALS);
        for table in [&mut self.peer_tx, &mut self.own_rx, &mut self.own_tx] {
            table.retain(|_, e| e.last_interval >= cutoff);
        }
    }

    fn record_sector_metric(&mut self, metric: SectorMetric) {
        if metric.tx_sector != QUASI_OMNI_SECTOR_ID {
            Self::update(
                self.weighting_factor,
                self.interval,
                &mut self.peer_tx,
                metric.tx_sector,
                metric.sinr_db,
            );
        }
        if metric.rx_sector != QUASI_OMNI_SECTOR_ID {
            Self::update(
                self.weighting_factor,
                self.interval,
                &mut self.own_rx,
                metric.rx_sector,
                metric.sinr_db,
            );
        }
    }

    fn record_tx_sector_feedback(&mut self, tx_sector: SectorId, snr_db: f64) {
        // feedback is authoritative; older estimates for other sectors are dropped
        self.own_tx.clear();
        Self::update(
            self.weighting_factor,
            self.interval,
            &mut self.own_tx,
            tx_sector,
            snr_db,
        );
    }

    fn best_tx_sector(&self) -> Option<(SectorId, f64)> {
        Self::best(&self.own_tx)
    }

    fn best_rx_sector(&self) -> Option<(SectorId, f64)> {
        Self::best(&self.own_rx)
    }

    fn best_peer_tx_sector(&self) -> Option<(SectorId, f64)> {
        Self::best(&self.peer_tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(tx_sector: SectorId, rx_sector: SectorId, sinr_db: f64) -> SectorMetric {
        SectorMetric {
            tx_sector,
            rx_sector,
            rssi_dbm: sinr_db - 80.0,
            sinr_db,
        }
    }

    #[test]
    fn test_empty_selector_has_no_best() {
        let selector = EwmaSectorSelector::default();
        assert_eq!(selector.best_tx_sector(), None);
        assert_eq!(selector.best_rx_sector(), None);
        assert_eq!(selector.best_peer_tx_sector(), None);
    }

    #[test]
    fn test_quasi_omni_reception_only_tracks_peer_sector() {
        let mut selector = EwmaSectorSelector::default();
        selector.record_sector_metric(metric(2, QUASI_OMNI_SECTOR_ID, 10.0));
        selector.record_sector_metric(metric(5, QUASI_OMNI_SECTOR_ID, 18.0));
        selector.record_sector_metric(metric(7, QUASI_OMNI_SECTOR_ID, 4.0));

        assert_eq!(selector.best_peer_tx_sector(), Some((5, 18.0)));
        assert_eq!(selector.best_rx_sector(), None);
    }

    #[test]
    fn test_average_smooths_outliers() {
        let mut selector = EwmaSectorSelector::new(4);
        for _ in 0..10 {
            selector.record_sector_metric(metric(QUASI_OMNI_SECTOR_ID, 1, 20.0));
            selector.record_sector_metric(metric(QUASI_OMNI_SECTOR_ID, 3, 15.0));
        }
        // a single spike on sector 3 does not beat a consistently better sector 1
        selector.record_sector_metric(metric(QUASI_OMNI_SECTOR_ID, 3, 25.0));
        assert_eq!(selector.best_rx_sector().map(|(s, _)| s), Some(1));
    }

    #[test]
    fn test_feedback_replaces_tx_estimate() {
        let mut selector = EwmaSectorSelector::default();
        selector.record_tx_sector_feedback(4, 12.0);
        selector.record_tx_sector_feedback(9, 8.0);
        assert_eq!(selector.best_tx_sector(), Some((9, 8.0)));
    }

    #[test]
    fn test_stale_estimates_expire() {
        let mut selector = EwmaSectorSelector::default();
        selector.record_sector_metric(metric(2, QUASI_OMNI_SECTOR_ID, 10.0));
        for _ in 0..STALE_AFTER_INTERVALS {
            selector.start_new_beacon_interval();
        }
        assert!(selector.best_peer_tx_sector().is_some());
        selector.start_new_beacon_interval();
        assert_eq!(selector.best_peer_tx_sector(), None);
    }
}
