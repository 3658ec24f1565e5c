use std::sync::Arc;
use std::time::Duration;

use crate::events::{Event, EventBus, TimerHandle, TimerKind};
use crate::store::{ConfigurationStore, RemoteSettings};

/// Roadside go/no-go flags carried by the enter CCC domain event.
pub const GO_NOGO_GNSS: u32 = 0x1;
pub const GO_NOGO_NETWORK: u32 = 0x2;
pub const GO_NOGO_SERVICE: u32 = 0x4;

/// The legal status of the tolling service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ActivationStatus {
    Active,
    NoGo,
    NotActive,
}

impl ActivationStatus {
    /// Active and NoGo are the statuses in which anomalies are tracked.
    pub fn is_tracked(&self) -> bool {
        matches!(self, ActivationStatus::Active | ActivationStatus::NoGo)
    }
}

/// # Explanation
/// The signals ActivationLogic fuses into the activation status. Every flag is set by exactly one kind of
/// event. `network_connected` and `on_hold` only influence the anomaly timers, not the status.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActivationFlags {
    pub inside_gnss_domain: bool,
    pub inside_ccc_domain: bool,
    pub service_active: bool,
    pub other_service_active: bool,
    pub service_configured: bool,
    pub vehicle_configured: bool,
    pub axles_approved: bool,
    pub network_connected: bool,
    pub on_hold: bool,
}

impl Default for ActivationFlags {
    fn default() -> Self {
        ActivationFlags {
            inside_gnss_domain: false,
            inside_ccc_domain: false,
            service_active: false,
            other_service_active: false,
            service_configured: false,
            vehicle_configured: false,
            axles_approved: true,
            network_connected: true,
            on_hold: true,
        }
    }
}

impl ActivationFlags {
    pub fn properly_configured(&self) -> bool {
        self.service_configured && self.vehicle_configured && self.axles_approved
    }

    pub fn any_service_active(&self) -> bool {
        self.service_active || self.other_service_active
    }

    /// # Explanation
    /// The activation status is a pure function of the flags:
    /// - Active inside the GNSS domain when the service is active and properly configured,
    /// - NoGo inside the CCC domain when no service is active or the configuration is incomplete,
    /// - NotActive otherwise.
    pub fn status(&self) -> ActivationStatus {
        if self.inside_gnss_domain && self.service_active && self.properly_configured() {
            ActivationStatus::Active
        } else if self.inside_ccc_domain && (!self.any_service_active() || !self.properly_configured()) {
            ActivationStatus::NoGo
        } else {
            ActivationStatus::NotActive
        }
    }

    fn service_active_inside_ccc_domain(&self) -> bool {
        self.inside_ccc_domain && self.service_active && self.properly_configured()
    }
}

/// The standing anomalies and the timers that will raise them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct AnomalyState {
    pub gnss_standing: bool,
    pub network_standing: bool,
    pub gnss_timer: Option<TimerHandle>,
    pub network_timer: Option<TimerHandle>,
}

/// # Explanation
/// ActivationLogic keeps the activation flags up to date and emits the derived events on the bus:
/// the status (and the fixes cut off signal) after every flag change, and the anomaly events.
///
/// The GNSS anomaly is raised when no position arrives for `gps_anomaly_timeout` minutes, the network
/// anomaly when the connection is down for `network_anomaly_timeout` minutes. Both only while the status
/// is Active or NoGo; a timer that fires in NotActive is ignored. No timer runs while the service is on hold.
pub struct ActivationLogic {
    flags: ActivationFlags,
    anomalies: AnomalyState,
    store: Arc<dyn ConfigurationStore>,
}

impl ActivationLogic {
    pub fn new(store: Arc<dyn ConfigurationStore>) -> Self {
        ActivationLogic {
            flags: ActivationFlags::default(),
            anomalies: AnomalyState::default(),
            store,
        }
    }

    pub fn flags(&self) -> &ActivationFlags {
        &self.flags
    }

    pub fn anomalies(&self) -> &AnomalyState {
        &self.anomalies
    }

    pub fn status(&self) -> ActivationStatus {
        self.flags.status()
    }

    /// Whether the tolling service is activated from remote.
    pub fn service_active(&self) -> bool {
        self.flags.service_active
    }

    fn update_service_status(&mut self, bus: &mut EventBus) {
        log::info!("{:?}", self.flags);
        let status = self.flags.status();
        log::debug!("service activation status: {:?}", status);

        bus.emit(Event::StatusChanged(status));
        bus.emit(Event::FixesCutOff(!self.flags.service_active));
    }

    fn emit_generic_anomaly_event(&self, bus: &mut EventBus) {
        bus.emit(Event::GenericAnomaly(
            self.anomalies.gnss_standing || self.anomalies.network_standing,
        ));
    }

    // gnss anomaly

    fn start_gnss_anomaly_timer(&mut self, bus: &mut EventBus) {
        if self.flags.on_hold {
            return;
        }
        self.stop_gnss_anomaly_timer(bus);

        let minutes = RemoteSettings::new(self.store.as_ref()).gps_anomaly_timeout();
        log::debug!("start gnss anomaly timer ({} min)", minutes);
        let timeout = Duration::from_secs(u64::from(minutes) * 60);
        self.anomalies.gnss_timer = Some(bus.schedule(timeout, TimerKind::GnssAnomaly));
    }

    fn stop_gnss_anomaly_timer(&mut self, bus: &mut EventBus) {
        if let Some(handle) = self.anomalies.gnss_timer.take() {
            log::debug!("stop gnss anomaly timer");
            bus.cancel(handle);
        }
    }

    fn clear_gnss_anomaly(&mut self, bus: &mut EventBus) {
        if self.anomalies.gnss_standing {
            self.anomalies.gnss_standing = false;
            self.emit_generic_anomaly_event(bus);
            bus.emit(Event::GnssAnomaly(false));
        }
    }

    fn reset_gnss_anomaly_timer(&mut self, bus: &mut EventBus) {
        self.stop_gnss_anomaly_timer(bus);
        self.start_gnss_anomaly_timer(bus);
    }

    // network anomaly

    fn start_network_anomaly_timer(&mut self, bus: &mut EventBus) {
        if self.flags.on_hold {
            return;
        }
        self.stop_network_anomaly_timer(bus);

        let minutes = RemoteSettings::new(self.store.as_ref()).network_anomaly_timeout();
        log::debug!("start network anomaly timer ({} min)", minutes);
        let timeout = Duration::from_secs(u64::from(minutes) * 60);
        self.anomalies.network_timer = Some(bus.schedule(timeout, TimerKind::NetworkAnomaly));
    }

    fn stop_network_anomaly_timer(&mut self, bus: &mut EventBus) {
        if let Some(handle) = self.anomalies.network_timer.take() {
            log::debug!("stop network anomaly timer");
            bus.cancel(handle);
        }
    }

    fn clear_network_anomaly(&mut self, bus: &mut EventBus) {
        if self.anomalies.network_standing {
            self.force_clear_network_anomaly(bus);
        }
    }

    fn force_clear_network_anomaly(&mut self, bus: &mut EventBus) {
        self.anomalies.network_standing = false;
        self.emit_generic_anomaly_event(bus);
        bus.emit(Event::NetworkAnomaly(false));
    }

    fn update_network_anomaly_timer_status(&mut self, bus: &mut EventBus) {
        log::debug!(
            "network_connected = {}, {:?}, inside_ccc_domain = {}",
            self.flags.network_connected,
            self.anomalies,
            self.flags.inside_ccc_domain
        );

        if self.flags.network_connected {
            self.stop_network_anomaly_timer(bus);
            self.clear_network_anomaly(bus);
        } else if self.flags.inside_ccc_domain && !self.anomalies.network_standing {
            // an anomaly raised before a restart is not known anymore, clear it so the roadside
            // check does not find a stale one
            self.force_clear_network_anomaly(bus);
            if self.anomalies.network_timer.is_none() {
                self.start_network_anomaly_timer(bus);
            }
        }
    }

    fn stop_all_anomaly_timers(&mut self, bus: &mut EventBus) {
        self.stop_gnss_anomaly_timer(bus);
        self.stop_network_anomaly_timer(bus);
    }

    // event handlers

    pub fn on_position_updated(&mut self, bus: &mut EventBus) {
        if self.flags.inside_ccc_domain && self.flags.status().is_tracked() {
            self.clear_gnss_anomaly(bus);
            self.reset_gnss_anomaly_timer(bus);
        }
    }

    pub fn on_network_connected(&mut self, bus: &mut EventBus) {
        self.flags.network_connected = true;
        self.update_network_anomaly_timer_status(bus);
    }

    pub fn on_network_disconnected(&mut self, bus: &mut EventBus) {
        self.flags.network_connected = false;
        self.update_network_anomaly_timer_status(bus);
    }

    pub fn on_service_configured(&mut self, bus: &mut EventBus) {
        self.flags.service_configured = true;
        self.update_service_status(bus);
    }

    pub fn on_vehicle_configured(&mut self, bus: &mut EventBus) {
        self.flags.vehicle_configured = true;
        self.update_service_status(bus);
    }

    pub fn on_service_activated(&mut self, bus: &mut EventBus) {
        self.flags.service_active = true;
        self.update_service_status(bus);
    }

    pub fn on_service_deactivated(&mut self, bus: &mut EventBus) {
        self.flags.service_active = false;
        self.update_service_status(bus);
    }

    pub fn on_other_services_active(&mut self, active: bool, bus: &mut EventBus) {
        self.flags.other_service_active = active;
        self.update_service_status(bus);
    }

    pub fn on_axles_config_approved(&mut self, approved: bool, bus: &mut EventBus) {
        self.flags.axles_approved = approved;
        self.update_service_status(bus);
    }

    pub fn on_enter_gnss_domain(&mut self, bus: &mut EventBus) {
        self.flags.inside_gnss_domain = true;
        self.update_service_status(bus);
    }

    pub fn on_exit_gnss_domain(&mut self, bus: &mut EventBus) {
        // the CCC domain exit may arrive after this one
        self.stop_all_anomaly_timers(bus);
        self.flags.inside_gnss_domain = false;
        self.update_service_status(bus);
    }

    /// # Explanation
    /// Entering the CCC domain clears the anomalies the roadside unit reports (go_nogo_flags) but that are
    /// not standing here, recomputes the status and restarts the anomaly supervision.
    pub fn on_enter_ccc_domain(&mut self, go_nogo_flags: u32, bus: &mut EventBus) {
        self.flags.inside_ccc_domain = true;
        self.clean_up_anomalies_set_by_others(go_nogo_flags, bus);

        self.update_service_status(bus);
        self.update_network_anomaly_timer_status(bus);
        self.clear_gnss_anomaly(bus);
        self.reset_gnss_anomaly_timer(bus);
    }

    fn clean_up_anomalies_set_by_others(&mut self, go_nogo_flags: u32, bus: &mut EventBus) {
        let gnss_flagged = go_nogo_flags & GO_NOGO_GNSS != 0;
        let network_flagged = go_nogo_flags & GO_NOGO_NETWORK != 0;

        if self.flags.inside_ccc_domain && (gnss_flagged || network_flagged) {
            let gnss_unknown = gnss_flagged && !self.anomalies.gnss_standing;
            let network_unknown = network_flagged && !self.anomalies.network_standing;
            if gnss_unknown || network_unknown {
                log::debug!("just in time anomaly clean up");
            }

            if !(self.anomalies.gnss_standing || self.anomalies.network_standing) {
                bus.emit(Event::GenericAnomaly(false));
            }
            if gnss_unknown {
                bus.emit(Event::GnssAnomaly(false));
            }
            if network_unknown {
                bus.emit(Event::NetworkAnomaly(false));
            }
        }

        if go_nogo_flags & GO_NOGO_SERVICE != 0 && self.flags.service_active_inside_ccc_domain() {
            bus.emit(Event::ClearNoGoNotification);
        }
    }

    pub fn on_exit_ccc_domain(&mut self, bus: &mut EventBus) {
        self.stop_all_anomaly_timers(bus);
        self.flags.inside_ccc_domain = false;
        self.update_service_status(bus);
    }

    /// # Explanation
    /// The lifecycle machine entered Running: the status is recomputed, the standing anomalies are announced
    /// again and the GNSS supervision restarts inside the CCC domain.
    pub fn on_lifecycle_started(&mut self, bus: &mut EventBus) {
        self.flags.on_hold = false;
        self.update_service_status(bus);

        if self.flags.status().is_tracked() {
            if self.anomalies.network_standing || self.anomalies.gnss_standing {
                bus.emit(Event::GenericAnomaly(true));
            }
            if self.anomalies.network_standing {
                bus.emit(Event::NetworkAnomaly(true));
            }
            if self.anomalies.gnss_standing {
                bus.emit(Event::GnssAnomaly(true));
            }
        }

        if self.flags.inside_ccc_domain {
            self.start_gnss_anomaly_timer(bus);
        }
    }

    /// The lifecycle machine left Running (on hold or stopped).
    pub fn on_lifecycle_suspended(&mut self, bus: &mut EventBus) {
        self.flags.on_hold = true;
        self.stop_all_anomaly_timers(bus);
    }

    /// # Explanation
    /// Called by the dispatcher when an anomaly timer fires. Only the timer currently held by this logic
    /// counts; the anomaly is raised when the status is still Active or NoGo.
    pub fn on_timer(&mut self, handle: TimerHandle, kind: TimerKind, bus: &mut EventBus) {
        let status = self.flags.status();
        match kind {
            TimerKind::GnssAnomaly if self.anomalies.gnss_timer == Some(handle) => {
                self.anomalies.gnss_timer = None;
                if status.is_tracked() {
                    log::warn!("gnss unavailable for too long");
                    self.anomalies.gnss_standing = true;
                    self.emit_generic_anomaly_event(bus);
                    bus.emit(Event::GnssAnomaly(true));
                } else {
                    log::debug!("gnss unavailable for too long, ignored because the status is {:?}", status);
                }
            }
            TimerKind::NetworkAnomaly if self.anomalies.network_timer == Some(handle) => {
                self.anomalies.network_timer = None;
                if status.is_tracked() {
                    log::warn!("network unavailable for too long");
                    self.anomalies.network_standing = true;
                    self.emit_generic_anomaly_event(bus);
                    bus.emit(Event::NetworkAnomaly(true));
                } else {
                    log::debug!("network unavailable for too long, ignored because the status is {:?}", status);
                }
            }
            _ => log::debug!("timer {:?} ({:?}) is not an active anomaly timer", handle, kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use crate::activation::{ActivationFlags, ActivationLogic, ActivationStatus, GO_NOGO_GNSS, GO_NOGO_SERVICE};
    use crate::events::{Event, EventBus, TimerKind};
    use crate::store::MemoryStore;

    fn drain(bus: &mut EventBus) -> Vec<Event> {
        std::iter::from_fn(|| bus.next_event()).collect()
    }

    fn fire_due(logic: &mut ActivationLogic, bus: &mut EventBus) {
        while let Some((handle, kind)) = bus.pop_due() {
            logic.on_timer(handle, kind, bus);
        }
    }

    /// Running, active and properly configured inside both domains.
    fn active_logic(bus: &mut EventBus) -> ActivationLogic {
        let mut logic = ActivationLogic::new(Arc::new(MemoryStore::new()));
        logic.on_lifecycle_started(bus);
        logic.on_service_configured(bus);
        logic.on_vehicle_configured(bus);
        logic.on_service_activated(bus);
        logic.on_enter_gnss_domain(bus);
        logic.on_enter_ccc_domain(0, bus);
        drain(bus);
        logic
    }

    #[test]
    fn test_status_truth_table() {
        for bits in 0u32..256 {
            let bit = |i: u32| bits & (1 << i) != 0;
            let flags = ActivationFlags {
                inside_gnss_domain: bit(0),
                inside_ccc_domain: bit(1),
                service_active: bit(2),
                other_service_active: bit(3),
                service_configured: bit(4),
                vehicle_configured: bit(5),
                axles_approved: bit(6),
                network_connected: bit(7),
                on_hold: false,
            };

            let properly_configured = bit(4) && bit(5) && bit(6);
            let any_active = bit(2) || bit(3);
            let expected = if bit(0) && bit(2) && properly_configured {
                ActivationStatus::Active
            } else if bit(1) && (!any_active || !properly_configured) {
                ActivationStatus::NoGo
            } else {
                ActivationStatus::NotActive
            };

            assert_eq!(flags.status(), expected, "flags {:08b}", bits);
        }
    }

    #[test]
    fn test_flag_change_emits_status_and_cut_off() {
        let mut bus = EventBus::new(Instant::now());
        let mut logic = ActivationLogic::new(Arc::new(MemoryStore::new()));

        logic.on_enter_ccc_domain(0, &mut bus);
        let events = drain(&mut bus);
        assert!(events.contains(&Event::StatusChanged(ActivationStatus::NoGo)));
        assert!(events.contains(&Event::FixesCutOff(true)));

        logic.on_service_activated(&mut bus);
        assert_eq!(
            drain(&mut bus),
            vec![
                Event::StatusChanged(ActivationStatus::NoGo),
                Event::FixesCutOff(false)
            ]
        );
    }

    #[test]
    fn test_exit_gnss_domain_cancels_timers() {
        let start = Instant::now();
        let mut bus = EventBus::new(start);
        let mut logic = active_logic(&mut bus);
        logic.on_network_disconnected(&mut bus);
        drain(&mut bus);

        assert_eq!(logic.status(), ActivationStatus::Active);
        let gnss_timer = logic.anomalies().gnss_timer.unwrap();
        let network_timer = logic.anomalies().network_timer.unwrap();

        logic.on_exit_gnss_domain(&mut bus);
        assert_eq!(logic.status(), ActivationStatus::NotActive);
        assert!(drain(&mut bus).contains(&Event::StatusChanged(ActivationStatus::NotActive)));
        assert_eq!(logic.anomalies().gnss_timer, None);
        assert_eq!(logic.anomalies().network_timer, None);
        assert!(!bus.is_scheduled(gnss_timer));
        assert!(!bus.is_scheduled(network_timer));

        bus.advance(start + Duration::from_secs(3600));
        assert_eq!(bus.pop_due(), None);
    }

    #[test]
    fn test_gnss_anomaly_raised_and_cleared() {
        let start = Instant::now();
        let mut bus = EventBus::new(start);
        let mut logic = active_logic(&mut bus);

        bus.advance(start + Duration::from_secs(20 * 60));
        fire_due(&mut logic, &mut bus);
        assert!(logic.anomalies().gnss_standing);
        assert_eq!(
            drain(&mut bus),
            vec![Event::GenericAnomaly(true), Event::GnssAnomaly(true)]
        );

        // a position clears the anomaly and restarts the supervision
        logic.on_position_updated(&mut bus);
        assert!(!logic.anomalies().gnss_standing);
        assert!(logic.anomalies().gnss_timer.is_some());
        assert_eq!(
            drain(&mut bus),
            vec![Event::GenericAnomaly(false), Event::GnssAnomaly(false)]
        );
    }

    #[test]
    fn test_position_postpones_gnss_anomaly() {
        let start = Instant::now();
        let mut bus = EventBus::new(start);
        let mut logic = active_logic(&mut bus);

        bus.advance(start + Duration::from_secs(19 * 60));
        logic.on_position_updated(&mut bus);
        bus.advance(start + Duration::from_secs(21 * 60));
        fire_due(&mut logic, &mut bus);
        assert!(!logic.anomalies().gnss_standing);

        bus.advance(start + Duration::from_secs(39 * 60));
        fire_due(&mut logic, &mut bus);
        assert!(logic.anomalies().gnss_standing);
    }

    #[test]
    fn test_timer_ignored_when_not_active() {
        let start = Instant::now();
        let mut bus = EventBus::new(start);
        let mut logic = active_logic(&mut bus);
        let handle = logic.anomalies().gnss_timer.unwrap();

        // deactivation keeps the timer, but it fires into NotActive
        logic.on_service_deactivated(&mut bus);
        logic.on_other_services_active(true, &mut bus);
        assert_eq!(logic.status(), ActivationStatus::NotActive);
        drain(&mut bus);

        logic.on_timer(handle, TimerKind::GnssAnomaly, &mut bus);
        assert!(!logic.anomalies().gnss_standing);
        assert_eq!(logic.anomalies().gnss_timer, None);
        assert!(drain(&mut bus).is_empty());
    }

    #[test]
    fn test_network_anomaly() {
        let start = Instant::now();
        let mut bus = EventBus::new(start);
        let store = MemoryStore::new().with("network_anomaly_timeout", 5);
        let mut logic = ActivationLogic::new(Arc::new(store));
        logic.on_lifecycle_started(&mut bus);
        logic.on_enter_ccc_domain(0, &mut bus);
        drain(&mut bus);

        logic.on_network_disconnected(&mut bus);
        // forced clear of a possibly stale anomaly
        assert_eq!(
            drain(&mut bus),
            vec![Event::GenericAnomaly(false), Event::NetworkAnomaly(false)]
        );
        assert!(logic.anomalies().network_timer.is_some());

        bus.advance(start + Duration::from_secs(5 * 60));
        fire_due(&mut logic, &mut bus);
        assert!(logic.anomalies().network_standing);
        assert_eq!(logic.status(), ActivationStatus::NoGo);
        assert_eq!(
            drain(&mut bus),
            vec![Event::GenericAnomaly(true), Event::NetworkAnomaly(true)]
        );

        logic.on_network_connected(&mut bus);
        assert!(!logic.anomalies().network_standing);
        assert_eq!(
            drain(&mut bus),
            vec![Event::GenericAnomaly(false), Event::NetworkAnomaly(false)]
        );
    }

    #[test]
    fn test_no_timers_on_hold() {
        let mut bus = EventBus::new(Instant::now());
        let mut logic = ActivationLogic::new(Arc::new(MemoryStore::new()));

        logic.on_network_disconnected(&mut bus);
        logic.on_enter_ccc_domain(0, &mut bus);
        assert_eq!(bus.scheduled_timers(), 0);

        logic.on_lifecycle_started(&mut bus);
        assert!(logic.anomalies().gnss_timer.is_some());

        logic.on_lifecycle_suspended(&mut bus);
        assert_eq!(logic.anomalies().gnss_timer, None);
        assert_eq!(bus.scheduled_timers(), 0);
    }

    #[test]
    fn test_enter_ccc_cleans_up_foreign_anomalies() {
        let mut bus = EventBus::new(Instant::now());
        let mut logic = ActivationLogic::new(Arc::new(MemoryStore::new()));
        logic.on_service_configured(&mut bus);
        logic.on_vehicle_configured(&mut bus);
        logic.on_service_activated(&mut bus);
        drain(&mut bus);

        logic.on_enter_ccc_domain(GO_NOGO_GNSS | GO_NOGO_SERVICE, &mut bus);
        let events = drain(&mut bus);
        assert_eq!(
            events[..3],
            [
                Event::GenericAnomaly(false),
                Event::GnssAnomaly(false),
                Event::ClearNoGoNotification
            ]
        );
        assert!(!events.contains(&Event::NetworkAnomaly(false)));
    }

    #[test]
    fn test_restart_announces_standing_anomalies() {
        let start = Instant::now();
        let mut bus = EventBus::new(start);
        let mut logic = active_logic(&mut bus);
        bus.advance(start + Duration::from_secs(20 * 60));
        fire_due(&mut logic, &mut bus);

        logic.on_lifecycle_suspended(&mut bus);
        drain(&mut bus);

        logic.on_lifecycle_started(&mut bus);
        let events = drain(&mut bus);
        assert!(events.contains(&Event::GenericAnomaly(true)));
        assert!(events.contains(&Event::GnssAnomaly(true)));
        assert!(!events.contains(&Event::NetworkAnomaly(true)));
        assert!(logic.anomalies().gnss_timer.is_some());
    }
}
