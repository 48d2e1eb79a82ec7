use beamsim_core::{SectorId, INVALID_SECTOR_ID, QUASI_OMNI_SECTOR_ID};

use crate::sector_selector::{BeamformingSectorSelector, SectorMetric};

/// Beamforming state towards one peer, created on first contact.
pub struct PeerLinkRecord {
    selector: Box<dyn BeamformingSectorSelector>,
    forced_tx_sector: Option<SectorId>,
    forced_rx_sector: Option<SectorId>,
    best_tx_sector: SectorId,
    best_rx_sector: SectorId,
    beamforming_established: bool,
}

impl PeerLinkRecord {
    pub fn new(selector: Box<dyn BeamformingSectorSelector>) -> Self {
        Self {
            selector,
            forced_tx_sector: None,
            forced_rx_sector: None,
            best_tx_sector: QUASI_OMNI_SECTOR_ID,
            best_rx_sector: QUASI_OMNI_SECTOR_ID,
            beamforming_established: false,
        }
    }

    /// Pins the link to static sectors. A forced rx sector without a forced
    /// tx sector is rejected when the configuration is parsed.
    pub fn force_sectors(&mut self, tx: SectorId, rx: Option<SectorId>) {
        self.forced_tx_sector = Some(tx);
        self.forced_rx_sector = rx;
        self.best_tx_sector = tx;
        if let Some(rx) = rx {
            self.best_rx_sector = rx;
        }
        self.beamforming_established = true;
    }

    pub fn forced_tx_sector(&self) -> Option<SectorId> {
        self.forced_tx_sector
    }

    pub fn forced_rx_sector(&self) -> Option<SectorId> {
        self.forced_rx_sector
    }

    pub fn best_tx_sector(&self) -> SectorId {
        self.best_tx_sector
    }

    pub fn best_rx_sector(&self) -> SectorId {
        self.best_rx_sector
    }

    /// Sector of ours the peer hears best, as last measured by the peer.
    pub fn best_peer_tx_sector(&self) -> SectorId {
        self.selector
            .best_peer_tx_sector()
            .map(|(sector, _)| sector)
            .unwrap_or(INVALID_SECTOR_ID)
    }

    pub fn beamforming_established(&self) -> bool {
        self.beamforming_established
    }

    pub fn start_new_beacon_interval(&mut self) {
        self.selector.start_new_beacon_interval();
        self.refresh_best_sectors();
    }

    pub fn record_sector_metric(&mut self, metric: SectorMetric) {
        self.selector.record_sector_metric(metric);
    }

    pub fn record_tx_sector_feedback(&mut self, sector: SectorId, snr_db: f64) {
        self.selector.record_tx_sector_feedback(sector, snr_db);
        self.beamforming_established = true;
        self.refresh_best_sectors();
    }

    /// No feedback arrived for our sweep: nothing beamformed towards the peer.
    pub fn feedback_timed_out(&mut self) {
        if self.forced_tx_sector.is_none() {
            self.best_tx_sector = QUASI_OMNI_SECTOR_ID;
        }
    }

    fn refresh_best_sectors(&mut self) {
        self.best_tx_sector = match self.forced_tx_sector {
            Some(forced) => forced,
            None => self
                .selector
                .best_tx_sector()
                .map(|(sector, _)| sector)
                .unwrap_or(self.best_tx_sector),
        };
        self.best_rx_sector = match self.forced_rx_sector {
            Some(forced) => forced,
            None => self
                .selector
                .best_rx_sector()
                .map(|(sector, _)| sector)
                .unwrap_or(self.best_rx_sector),
        };
    }
}

impl std::fmt::Debug for PeerLinkRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLinkRecord")
            .field("forced_tx_sector", &self.forced_tx_sector)
            .field("forced_rx_sector", &self.forced_rx_sector)
            .field("best_tx_sector", &self.best_tx_sector)
            .field("best_rx_sector", &self.best_rx_sector)
            .field("beamforming_established", &self.beamforming_established)
            .finish()
    }
}
