//! Scanning, authentication, (re)association and link supervision

use beamsim_core::frames::{
    ReasonCode, StatusCode, REASON_INACTIVITY, REASON_LEAVING, STATUS_SUCCESS,
};
use beamsim_core::{
    AssociationId, ChannelNumber, Frame, FrameBody, MacAddress, INVALID_ASSOCIATION_ID,
};
use log::{debug, info, trace};

use super::{DmgStation, StationState, TimedEvent, TimerSlot};
use crate::device::DmgDevice;
use crate::timer::Scheduler;

impl<D: DmgDevice, S: Scheduler> DmgStation<D, S> {
    pub(super) fn start_channel_scanning(&mut self) {
        let now = self.now();
        self.disarm(TimerSlot::Superframe);
        self.disarm(TimerSlot::Authentication);
        self.disarm(TimerSlot::AssociationFailure);
        self.set_state(StationState::ChannelScanning);
        self.scanner.start_scan_sequence(now);
        self.continue_channel_scanning();
    }

    /// Moves to the next dwell of the running scan sequence, or acts on its
    /// outcome once the sequence is exhausted.
    pub(super) fn continue_channel_scanning(&mut self) {
        let now = self.now();
        if let Some(dwell) = self.scanner.next_scan_dwell() {
            trace!("{}: scanning channel {}", self.address, dwell.channel);
            self.device.switch_to_channels(&[dwell.channel]);
            self.quasi_omni();
            self.device.start_receiving_frames();
            self.arm(TimerSlot::Scan, now + dwell.duration, TimedEvent::ScanTimeout);
            return;
        }
        match self.state {
            StationState::ChannelScanning => self.finish_channel_scanning(),
            StationState::BackgroundChannelScanning => self.end_background_channel_scanning(),
            state => debug!("{}: scan sequence ended in {:?}", self.address, state),
        }
    }

    fn finish_channel_scanning(&mut self) {
        let now = self.now();
        let forced = self.config.forced_access_point;
        let choice = self
            .scanner
            .choose_access_point(now, self.device.max_bonded_channel_count())
            .filter(|choice| forced.map_or(true, |ap| ap == choice.access_point));
        let Some(choice) = choice else {
            debug!("{}: no access point found, rescanning", self.address);
            let next = self.scanner.next_scan_start_time(now);
            self.arm(TimerSlot::Scan, next, TimedEvent::StartScanning);
            return;
        };
        self.set_state(StationState::NotAssociated);
        self.switch_to_access_point(choice.channels, choice.access_point);
        if self.peer_mut(choice.access_point).beamforming_established() {
            self.start_authentication();
        }
    }

    /// A directional beacon from the forced AP ends scanning at once.
    pub(super) fn adopt_forced_access_point(&mut self, channel: ChannelNumber) {
        let Some(forced) = self.config.forced_access_point else {
            return;
        };
        self.disarm(TimerSlot::Scan);
        self.set_state(StationState::NotAssociated);
        self.switch_to_access_point(vec![channel], forced);
    }

    /// Tunes to the AP/PCP and listens for its next beacon interval.
    pub(super) fn switch_to_access_point(
        &mut self,
        channels: Vec<ChannelNumber>,
        access_point: MacAddress,
    ) {
        info!(
            "{}: selected {} on channels {:?}",
            self.address, access_point, channels
        );
        self.scanner
            .set_current_channel_and_access_point(&channels, access_point);
        self.device.switch_to_channels(&channels);
        self.current_ap = access_point;
        self.ap_channels = channels;
        self.peer_mut(access_point);
        self.enter_beacon_transmission_interval();
    }

    pub(super) fn start_authentication(&mut self) {
        let now = self.now();
        let ap = self.current_ap;
        self.stats.authentications_started += 1;
        self.set_state(StationState::WaitingForAuthentication);
        self.device.send_management_frame(Frame::new(
            self.address,
            ap,
            FrameBody::Authentication {
                transaction_sequence: 1,
            },
        ));
        let deadline = now + self.config.authentication_timeout;
        self.arm(
            TimerSlot::Authentication,
            deadline,
            TimedEvent::AuthenticationTimeout,
        );
    }

    pub(super) fn on_authentication(&mut self, transmitter: MacAddress) {
        if self.state != StationState::WaitingForAuthentication || transmitter != self.current_ap {
            return self.ignore(transmitter, "authentication");
        }
        self.disarm(TimerSlot::Authentication);
        self.associate_with_access_point();
    }

    fn associate_with_access_point(&mut self) {
        let now = self.now();
        let ap = self.current_ap;
        let ssid = self.config.ssid.clone();
        let listen_interval = self.config.listen_interval;
        let (body, state) = if self.last_ap.is_valid() && self.last_ap != ap {
            (
                FrameBody::ReassociationRequest {
                    ssid,
                    listen_interval,
                    current_access_point: self.last_ap,
                },
                StationState::WaitingForReassociationResponse,
            )
        } else {
            (
                FrameBody::AssociationRequest {
                    ssid,
                    listen_interval,
                },
                StationState::WaitingForAssociationResponse,
            )
        };
        self.set_state(state);
        self.device
            .send_management_frame(Frame::new(self.address, ap, body));
        let deadline = now + self.config.association_failure_timeout;
        self.arm(
            TimerSlot::AssociationFailure,
            deadline,
            TimedEvent::AssociationFailureTimeout,
        );
    }

    pub(super) fn on_association_response(
        &mut self,
        transmitter: MacAddress,
        status: StatusCode,
        association_id: AssociationId,
        reassociation: bool,
    ) {
        let expected = if reassociation {
            StationState::WaitingForReassociationResponse
        } else {
            StationState::WaitingForAssociationResponse
        };
        if self.state != expected || transmitter != self.current_ap {
            return self.ignore(transmitter, "association response");
        }
        self.disarm(TimerSlot::AssociationFailure);
        if status != STATUS_SUCCESS || association_id == INVALID_ASSOCIATION_ID {
            debug!(
                "{}: {} refused association with status {}",
                self.address, transmitter, status
            );
            return self.retry_or_rescan();
        }

        let now = self.now();
        self.association_id = association_id;
        self.set_state(StationState::Associated);
        self.stats.associations += 1;
        info!(
            "{}: associated with {} as aid {}",
            self.address, transmitter, association_id
        );
        self.device.network_layer_link_up(transmitter);
        let next_check = self.scanner.next_link_check_time(now);
        self.arm(TimerSlot::LinkCheck, next_check, TimedEvent::LinkCheck);
    }

    pub(super) fn on_disassociation(&mut self, transmitter: MacAddress, reason: ReasonCode) {
        let unassociated = matches!(
            self.state,
            StationState::NotAssociated | StationState::ChannelScanning
        );
        if unassociated || transmitter != self.current_ap {
            return self.ignore(transmitter, "disassociation");
        }
        info!(
            "{}: disassociated by {} (reason {})",
            self.address, transmitter, reason
        );
        self.tear_down_association();
    }

    /// Leaves the current AP and schedules a fresh start.
    fn disassociate(&mut self, reason: ReasonCode) {
        let ap = self.current_ap;
        info!("{}: leaving {} (reason {})", self.address, ap, reason);
        self.device.send_management_frame(Frame::new(
            self.address,
            ap,
            FrameBody::Disassociation { reason },
        ));
        self.tear_down_association();
    }

    fn tear_down_association(&mut self) {
        let now = self.now();
        for slot in [
            TimerSlot::LinkCheck,
            TimerSlot::Superframe,
            TimerSlot::Scan,
            TimerSlot::Authentication,
            TimerSlot::AssociationFailure,
        ] {
            self.disarm(slot);
        }
        if self.state.is_linked() {
            self.device.network_layer_link_down();
        }
        self.stats.disassociations += 1;
        self.last_ap = self.current_ap;
        self.clear_current_channel_and_access_point();
        let restart = now + self.config.reinitialization_delay;
        self.arm(TimerSlot::Scan, restart, TimedEvent::StartScanning);
    }

    pub(super) fn on_authentication_timeout(&mut self) {
        if self.state != StationState::WaitingForAuthentication {
            return;
        }
        debug!("{}: authentication with {} timed out", self.address, self.current_ap);
        self.retry_or_rescan();
    }

    pub(super) fn on_association_failure_timeout(&mut self) {
        if !matches!(
            self.state,
            StationState::WaitingForAssociationResponse
                | StationState::WaitingForReassociationResponse
        ) {
            return;
        }
        debug!("{}: association with {} timed out", self.address, self.current_ap);
        self.retry_or_rescan();
    }

    /// A forced AP is retried directly; anything else goes back to scanning.
    fn retry_or_rescan(&mut self) {
        self.set_state(StationState::NotAssociated);
        if self.config.forced_access_point == Some(self.current_ap) {
            return self.start_authentication();
        }
        self.clear_current_channel_and_access_point();
        self.start_channel_scanning();
    }

    pub(super) fn on_link_check(&mut self) {
        let now = self.now();
        if !self.state.is_linked() {
            return;
        }
        if !self.scanner.any_in_range_access_point(now) {
            return self.disassociate(REASON_INACTIVITY);
        }
        // switching and background scans only start from a settled association
        if self.state != StationState::Associated {
            return self.rearm_link_check();
        }
        if self.config.forced_access_point.is_none()
            && self.scanner.should_switch_access_point(now)
            && self.switch_to_another_access_point()
        {
            return;
        }
        if self.scanner.background_scan_wanted(now) {
            self.set_state(StationState::StartingUpBackgroundChannelScanning);
        }
        self.rearm_link_check();
    }

    fn rearm_link_check(&mut self) {
        let next_check = self.scanner.next_link_check_time(self.now());
        self.arm(TimerSlot::LinkCheck, next_check, TimedEvent::LinkCheck);
    }

    /// Handover without a scan: drop the current AP and authenticate with
    /// the one the scanner prefers.
    fn switch_to_another_access_point(&mut self) -> bool {
        let now = self.now();
        let Some(choice) = self
            .scanner
            .choose_access_point(now, self.device.max_bonded_channel_count())
        else {
            return false;
        };
        if choice.access_point == self.current_ap {
            return false;
        }
        let old_ap = self.current_ap;
        info!(
            "{}: handover from {} to {}",
            self.address, old_ap, choice.access_point
        );
        self.device.send_management_frame(Frame::new(
            self.address,
            old_ap,
            FrameBody::Disassociation {
                reason: REASON_LEAVING,
            },
        ));
        self.disarm(TimerSlot::LinkCheck);
        self.device.network_layer_link_down();
        self.stats.handovers += 1;
        self.last_ap = old_ap;
        self.association_id = INVALID_ASSOCIATION_ID;
        self.set_state(StationState::NotAssociated);
        self.switch_to_access_point(choice.channels, choice.access_point);
        self.start_authentication();
        true
    }

    pub(super) fn start_background_channel_scanning(&mut self) {
        let now = self.now();
        self.disarm(TimerSlot::Superframe);
        self.set_state(StationState::BackgroundChannelScanning);
        self.scanner.start_scan_sequence(now);
        self.continue_channel_scanning();
    }

    fn end_background_channel_scanning(&mut self) {
        let channels = self.ap_channels.clone();
        self.set_state(StationState::EndingBackgroundChannelScanning);
        self.device.switch_to_channels(&channels);
        self.enter_beacon_transmission_interval();
    }
}
