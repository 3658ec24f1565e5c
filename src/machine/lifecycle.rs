use crate::activation::ActivationStatus;
use crate::collaborators::{MessageKind, NotificationKey};
use crate::events::{Event, TimerHandle};
use crate::fix::{FixRecord, PositionRecord};
use crate::machine::connection::ConnectionEvent;
use crate::machine::service_activation::ServiceActivationMachine;
use crate::machine::Services;
use crate::store::RemoteSettings;
use crate::utils::LogErrUnwrap;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    OnHold,
    Running,
}

/// # Explanation
/// The LifecycleMachine is the outer machine of the cascade, driven by the run / on hold / stop commands.
/// The status, connectivity and position events reach the inner ServiceActivationMachine only while
/// Running. The anomaly notifications are presented in every state.
///
/// Leaving for Stopped or OnHold first sends a Stop event message with the last known position and the
/// trip distance. The first position while Running sends a Start event message.
pub struct LifecycleMachine {
    state: LifecycleState,
    service_activation: ServiceActivationMachine,
    last_position: Option<PositionRecord>,
    first_fix_sent: bool,
}

impl LifecycleMachine {
    pub fn new() -> Self {
        LifecycleMachine {
            state: LifecycleState::Stopped,
            service_activation: ServiceActivationMachine::new(),
            last_position: None,
            first_fix_sent: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn service_activation(&self) -> &ServiceActivationMachine {
        &self.service_activation
    }

    pub fn last_position(&self) -> Option<&PositionRecord> {
        self.last_position.as_ref()
    }

    pub fn run(&mut self, services: &mut Services) {
        self.change_state(LifecycleState::Running, services);
    }

    pub fn on_hold(&mut self, services: &mut Services) {
        if self.state != LifecycleState::OnHold {
            self.send_stop_message(services);
        }
        self.change_state(LifecycleState::OnHold, services);
    }

    pub fn stop(&mut self, services: &mut Services) {
        if self.state != LifecycleState::Stopped {
            self.send_stop_message(services);
        }
        self.first_fix_sent = false;
        self.change_state(LifecycleState::Stopped, services);
    }

    /// Stops the inner machine for good, at shutdown.
    pub fn shutdown(&mut self, services: &mut Services) {
        self.service_activation.stop(services);
    }

    pub fn on_status(&mut self, status: ActivationStatus, services: &mut Services) {
        if self.state == LifecycleState::Running {
            self.service_activation.on_status(status, services);
        } else {
            log::debug!("status {:?} not forwarded in state {:?}", status, self.state);
        }
    }

    pub fn on_connection(&mut self, event: ConnectionEvent, services: &mut Services) {
        if self.state == LifecycleState::Running {
            self.service_activation.on_connection(event, services);
        } else {
            log::debug!("{:?} not forwarded in state {:?}", event, self.state);
        }
    }

    pub fn on_anomaly(&mut self, present: bool) {
        if self.state == LifecycleState::Running {
            self.service_activation.on_anomaly(present);
        }
    }

    pub fn on_position_updated(&mut self, position: &PositionRecord, services: &mut Services) {
        self.last_position = Some(position.clone());
        if self.state != LifecycleState::Running {
            return;
        }

        self.service_activation.on_position_updated(position, services);
        if !self.first_fix_sent {
            self.send_event_message(position, MessageKind::Start, 0.0, services);
            self.first_fix_sent = true;
        }
    }

    pub fn notify_anomaly(&self, key: NotificationKey, present: bool, services: &mut Services) {
        if present {
            services.notifier.raise(key);
        } else {
            services.notifier.clear(key);
        }
    }

    pub fn on_timer(&mut self, handle: TimerHandle, services: &mut Services) -> bool {
        self.service_activation.on_timer(handle, services)
    }

    fn send_stop_message(&self, services: &mut Services) {
        match &self.last_position {
            Some(position) => {
                let trip_distance = self.service_activation.odometer().trip_distance();
                self.send_event_message(position, MessageKind::Stop, trip_distance, services);
            }
            None => log::debug!("no position known, stop message not sent"),
        }
    }

    fn send_event_message(
        &self,
        position: &PositionRecord,
        kind: MessageKind,
        trip_distance_km: f64,
        services: &mut Services,
    ) {
        let vehicle = RemoteSettings::new(services.store).vehicle_data();
        let fix = FixRecord::from_position(position, trip_distance_km, vehicle);
        log::info!("sending {:?} event message", kind);
        services.transport.send(&[fix], kind).log_err_unwrap(());
    }

    fn change_state(&mut self, next: LifecycleState, services: &mut Services) {
        if self.state == next {
            log::debug!("lifecycle already in state {:?}, nothing to do", next);
            return;
        }

        log::info!("lifecycle {:?} -> {:?}", self.state, next);
        self.exit_state(services);
        self.state = next;
        self.enter_state(services);
    }

    fn enter_state(&mut self, services: &mut Services) {
        match self.state {
            LifecycleState::Stopped => services.bus.emit(Event::LifecycleStopped),
            LifecycleState::OnHold => {
                services.bus.emit(Event::LifecycleOnHold);
                services.network.hold();
                self.service_activation
                    .on_connection(ConnectionEvent::NotConnected, services);
            }
            LifecycleState::Running => {
                services.bus.emit(Event::LifecycleStarted);
                self.service_activation.start(services);
            }
        }
    }

    fn exit_state(&mut self, services: &mut Services) {
        if self.state == LifecycleState::OnHold {
            services.network.resume();
        }
    }
}

impl Default for LifecycleMachine {
    fn default() -> Self {
        Self::new()
    }
}
