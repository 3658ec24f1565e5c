use std::time::Duration;

use crate::activation::ActivationStatus;
use crate::collaborators::NotificationKey;
use crate::events::{TimerHandle, TimerKind};
use crate::fix::PositionRecord;
use crate::machine::connection::{ConnectionEvent, ConnectionMachine};
use crate::machine::Services;
use crate::odometer::Odometer;

pub const NO_GO_RAISE_DELAY: Duration = Duration::from_millis(750);

/// # Explanation
/// The ServiceActivationMachine has one state per activation status. It owns the trip odometer and the
/// inner ConnectionMachine, to which it forwards the connectivity events in every state.
///
/// - entering NoGo raises the no-go notification (delayed, see NO_GO_RAISE_DELAY); leaving it clears it
/// - entering Active resets the odometer and the fix filter; leaving it requests a flush of the queue
/// - positions are counted and queued only in NoGo and Active
///
/// The machine is unstarted until its first status: that status becomes the state directly, only its
/// entry action runs.
pub struct ServiceActivationMachine {
    state: Option<ActivationStatus>,
    started: bool,
    odometer: Odometer,
    connection: ConnectionMachine,
    no_go_raise: Option<TimerHandle>,
}

impl ServiceActivationMachine {
    pub fn new() -> Self {
        ServiceActivationMachine {
            state: None,
            started: false,
            odometer: Odometer::new(),
            connection: ConnectionMachine::new(),
            no_go_raise: None,
        }
    }

    pub fn state(&self) -> Option<ActivationStatus> {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn connection(&self) -> &ConnectionMachine {
        &self.connection
    }

    pub fn odometer(&self) -> &Odometer {
        &self.odometer
    }

    /// The owning lifecycle entered Running. A NoGo status is announced again.
    pub fn start(&mut self, services: &mut Services) {
        if self.state == Some(ActivationStatus::NoGo) {
            self.enter_state(services);
        }
    }

    pub fn stop(&mut self, services: &mut Services) {
        self.exit_state(services);
        self.started = false;
    }

    pub fn on_status(&mut self, status: ActivationStatus, services: &mut Services) {
        if self.started {
            self.change_state(status, services);
        } else {
            self.started = true;
            self.state = Some(status);
            log::debug!("service activation starting in state {:?}", status);
            self.enter_state(services);
        }
    }

    pub fn on_connection(&mut self, event: ConnectionEvent, services: &mut Services) {
        self.connection.handle(event, services);
    }

    pub fn on_anomaly(&mut self, present: bool) {
        log::debug!("service activation anomaly {} (no actions)", present);
    }

    pub fn on_position_updated(&mut self, position: &PositionRecord, services: &mut Services) {
        match self.state {
            Some(ActivationStatus::NoGo) | Some(ActivationStatus::Active) => {
                self.odometer.position_received(position);
                services.queue.push(position, self.odometer.trip_distance());
            }
            _ => log::trace!("position ignored in state {:?}", self.state),
        }
    }

    /// # Explanation
    /// The delayed no-go raise fired. Returns whether the timer belonged to this machine.
    pub fn on_timer(&mut self, handle: TimerHandle, services: &mut Services) -> bool {
        if self.no_go_raise != Some(handle) {
            return false;
        }

        self.no_go_raise = None;
        services.notifier.raise(NotificationKey::NoGoService);
        true
    }

    fn change_state(&mut self, next: ActivationStatus, services: &mut Services) {
        if self.state == Some(next) {
            log::debug!("service activation already in state {:?}, nothing to do", next);
            return;
        }

        log::debug!("service activation {:?} -> {:?}", self.state, next);
        self.exit_state(services);
        self.state = Some(next);
        self.enter_state(services);
    }

    fn enter_state(&mut self, services: &mut Services) {
        match self.state {
            Some(ActivationStatus::NoGo) => {
                if let Some(pending) = self.no_go_raise.take() {
                    services.bus.cancel(pending);
                }
                self.no_go_raise = Some(services.bus.schedule(NO_GO_RAISE_DELAY, TimerKind::NoGoRaise));
            }
            Some(ActivationStatus::Active) => {
                self.odometer.reset();
                services.queue.reset_filter();
            }
            _ => {}
        }
    }

    fn exit_state(&mut self, services: &mut Services) {
        match self.state {
            Some(ActivationStatus::NoGo) => {
                if let Some(pending) = self.no_go_raise.take() {
                    services.bus.cancel(pending);
                }
                services.notifier.clear(NotificationKey::NoGoService);
            }
            Some(ActivationStatus::Active) => services.queue.request_flush(),
            _ => {}
        }
    }
}

impl Default for ServiceActivationMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::activation::ActivationStatus;
    use crate::collaborators::NotificationKey;
    use crate::fix::PositionRecord;
    use crate::machine::connection::{ConnectionEvent, ConnectionState};
    use crate::machine::mocks::{Call, Fixture};
    use crate::machine::service_activation::ServiceActivationMachine;

    fn fire_due(machine: &mut ServiceActivationMachine, fixture: &mut Fixture) {
        while let Some((handle, _)) = fixture.bus.pop_due() {
            machine.on_timer(handle, &mut fixture.services());
        }
    }

    fn position(latitude: f64, timestamp_ms: u64) -> PositionRecord {
        PositionRecord {
            latitude,
            longitude: 9.0,
            speed: 36.0,
            timestamp_ms,
            ..PositionRecord::default()
        }
    }

    #[test]
    fn test_first_status_runs_entry_only() {
        let mut fixture = Fixture::new("sa_first");
        let mut machine = ServiceActivationMachine::new();
        assert_eq!(machine.state(), None);

        machine.on_status(ActivationStatus::NoGo, &mut fixture.services());
        assert_eq!(machine.state(), Some(ActivationStatus::NoGo));
        assert!(fixture.recorder.take().is_empty());
        assert_eq!(fixture.bus.scheduled_timers(), 1);

        let start = fixture.bus.now();
        fixture.bus.advance(start + Duration::from_millis(750));
        fire_due(&mut machine, &mut fixture);
        assert_eq!(fixture.recorder.take(), vec![Call::Raise(NotificationKey::NoGoService)]);
    }

    #[test]
    fn test_leaving_no_go_cancels_raise() {
        let mut fixture = Fixture::new("sa_cancel");
        let mut machine = ServiceActivationMachine::new();

        machine.on_status(ActivationStatus::NoGo, &mut fixture.services());
        machine.on_status(ActivationStatus::Active, &mut fixture.services());
        assert_eq!(fixture.recorder.take(), vec![Call::Clear(NotificationKey::NoGoService)]);

        let start = fixture.bus.now();
        fixture.bus.advance(start + Duration::from_secs(1));
        fire_due(&mut machine, &mut fixture);
        assert!(fixture.recorder.take().is_empty());
    }

    #[test]
    fn test_positions_counted_only_when_tracked() {
        let mut fixture = Fixture::new("sa_positions");
        fixture.queue.set_cut_off(false);
        let mut machine = ServiceActivationMachine::new();

        machine.on_status(ActivationStatus::NotActive, &mut fixture.services());
        machine.on_position_updated(&position(45.0, 0), &mut fixture.services());
        assert!(fixture.queue.is_empty());

        machine.on_status(ActivationStatus::Active, &mut fixture.services());
        machine.on_position_updated(&position(45.0, 0), &mut fixture.services());
        machine.on_position_updated(&position(45.01, 3_600_000), &mut fixture.services());
        assert_eq!(fixture.queue.len(), 2);
        assert!((machine.odometer().trip_distance() - 36.0).abs() < 1e-9);

        // re-entering Active starts a new trip
        machine.on_status(ActivationStatus::NotActive, &mut fixture.services());
        machine.on_status(ActivationStatus::Active, &mut fixture.services());
        assert_eq!(machine.odometer().trip_distance(), 0.0);
    }

    #[test]
    fn test_start_announces_no_go_again() {
        let mut fixture = Fixture::new("sa_start");
        let mut machine = ServiceActivationMachine::new();
        machine.on_status(ActivationStatus::NoGo, &mut fixture.services());
        assert_eq!(fixture.bus.scheduled_timers(), 1);

        machine.start(&mut fixture.services());
        assert_eq!(fixture.bus.scheduled_timers(), 1);

        machine.stop(&mut fixture.services());
        assert!(!machine.is_started());
        assert_eq!(fixture.bus.scheduled_timers(), 0);
        assert_eq!(fixture.recorder.take(), vec![Call::Clear(NotificationKey::NoGoService)]);
    }

    #[test]
    fn test_connectivity_forwarded_in_every_state() {
        let mut fixture = Fixture::new("sa_connectivity");
        let mut machine = ServiceActivationMachine::new();

        machine.on_connection(ConnectionEvent::Connected, &mut fixture.services());
        assert_eq!(machine.connection().state(), ConnectionState::Connected);
        machine.on_status(ActivationStatus::NotActive, &mut fixture.services());
        machine.on_connection(ConnectionEvent::NotConnected, &mut fixture.services());
        assert_eq!(machine.connection().state(), ConnectionState::NotConnected);
        assert_eq!(fixture.recorder.take(), vec![Call::Start, Call::Stop]);
    }
}
