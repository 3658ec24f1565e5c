use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::activation::{ActivationLogic, ActivationStatus};
use crate::axles::AxlesChangeManager;
use crate::collaborators::{NetworkControl, NotificationKey, Notifier, Transport};
use crate::events::{Event, EventBus, TimerKind};
use crate::fix::PositionRecord;
use crate::machine::{ConnectionEvent, LifecycleMachine, Services};
use crate::queue::persistence::QueueFile;
use crate::queue::TransmissionQueue;
use crate::store::ConfigurationStore;

const MAX_IDLE_WAIT: Duration = Duration::from_secs(1);

macro_rules! services {
    ($app:expr) => {
        Services {
            transport: $app.transport.as_ref(),
            notifier: $app.notifier.as_ref(),
            network: $app.network.as_ref(),
            queue: &$app.queue,
            store: $app.store.as_ref(),
            bus: &mut $app.bus,
        }
    };
}

/// # Explanation
/// The TollingApplication is the single dispatcher of the service. It owns the event bus, ActivationLogic,
/// the state machine cascade, the axle change manager and the transmission queue, and routes every event
/// to them. Handlers run one at a time; the events they emit are handled afterwards, in order.
///
/// The only other thread is the worker of the transmission queue, started with start_transmission.
pub struct TollingApplication {
    store: Arc<dyn ConfigurationStore>,
    transport: Arc<dyn Transport>,
    notifier: Box<dyn Notifier>,
    network: Box<dyn NetworkControl>,
    queue: TransmissionQueue,
    bus: EventBus,
    activation: ActivationLogic,
    lifecycle: LifecycleMachine,
    axles: AxlesChangeManager,
    current_position: Option<PositionRecord>,
    network_connected: bool,
}

impl TollingApplication {
    pub fn new(
        store: Arc<dyn ConfigurationStore>,
        transport: Arc<dyn Transport>,
        notifier: Box<dyn Notifier>,
        network: Box<dyn NetworkControl>,
        queue_file: QueueFile,
        now: Instant,
    ) -> Self {
        let queue = TransmissionQueue::new(store.clone(), transport.clone(), queue_file);
        let mut bus = EventBus::new(now);
        let mut axles = AxlesChangeManager::new(store.clone());
        axles.announce(&mut bus);

        let mut application = TollingApplication {
            activation: ActivationLogic::new(store.clone()),
            lifecycle: LifecycleMachine::new(),
            store,
            transport,
            notifier,
            network,
            queue,
            bus,
            axles,
            current_position: None,
            network_connected: false,
        };
        application.dispatch();
        application
    }

    /// Starts the worker thread of the transmission queue.
    pub fn start_transmission(&mut self) {
        self.queue.delayed_activation();
    }

    pub fn status(&self) -> ActivationStatus {
        self.activation.status()
    }

    pub fn activation(&self) -> &ActivationLogic {
        &self.activation
    }

    pub fn lifecycle(&self) -> &LifecycleMachine {
        &self.lifecycle
    }

    pub fn axles(&self) -> &AxlesChangeManager {
        &self.axles
    }

    pub fn queue(&self) -> &TransmissionQueue {
        &self.queue
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The latest position reported by the positioning provider.
    pub fn current_position(&self) -> Option<&PositionRecord> {
        self.current_position.as_ref()
    }

    /// Queues the event and handles it, together with every event it causes.
    pub fn handle_event(&mut self, event: Event) {
        self.bus.emit(event);
        self.dispatch();
    }

    /// # Explanation
    /// Moves the clock of the dispatcher to `now` and fires every timer that is due, in deadline order.
    pub fn advance(&mut self, now: Instant) {
        self.bus.advance(now);
        while let Some((handle, kind)) = self.bus.pop_due() {
            log::debug!("timer {:?} ({:?}) fired", handle, kind);
            match kind {
                TimerKind::NoGoRaise => {
                    self.lifecycle.on_timer(handle, &mut services!(self));
                }
                TimerKind::GnssAnomaly | TimerKind::NetworkAnomaly => {
                    self.activation.on_timer(handle, kind, &mut self.bus);
                }
            }
            self.dispatch();
        }
    }

    /// # Explanation
    /// The event loop of the binary. Waits for the events of the providers, or until the next timer is due,
    /// and returns when every sender is gone.
    pub fn run(&mut self, events: Receiver<Event>) {
        log::info!("dispatcher started");
        loop {
            let now = Instant::now();
            let timeout = self
                .bus
                .next_deadline()
                .map_or(MAX_IDLE_WAIT, |deadline| deadline.saturating_duration_since(now))
                .min(MAX_IDLE_WAIT);

            match events.recv_timeout(timeout) {
                Ok(event) => self.bus.emit(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            self.dispatch();
            self.advance(Instant::now());
        }
        log::info!("dispatcher stopped");
    }

    /// # Explanation
    /// Stops the inner machines and shuts the transmission queue down, which drains or saves the queued
    /// fixes.
    pub fn shutdown(&mut self) {
        self.lifecycle.shutdown(&mut services!(self));
        self.dispatch();
        self.queue.shutdown();
    }

    fn dispatch(&mut self) {
        while let Some(event) = self.bus.next_event() {
            log::trace!("handling {:?}", event);
            self.route(event);
        }
    }

    fn route(&mut self, event: Event) {
        match event {
            Event::Run => self.lifecycle.run(&mut services!(self)),
            Event::OnHold => self.lifecycle.on_hold(&mut services!(self)),
            Event::Stop => self.lifecycle.stop(&mut services!(self)),

            Event::PositionUpdated(position) => {
                self.activation.on_position_updated(&mut self.bus);
                self.lifecycle.on_position_updated(&position, &mut services!(self));
                self.current_position = Some(position);
            }

            Event::NetworkConnected => {
                self.network_connected = true;
                self.queue.set_connected(true);
                self.activation.on_network_connected(&mut self.bus);
                self.lifecycle
                    .on_connection(ConnectionEvent::Connected, &mut services!(self));
            }
            Event::NetworkDisconnected => {
                self.network_connected = false;
                self.queue.set_connected(false);
                self.activation.on_network_disconnected(&mut self.bus);
                self.lifecycle
                    .on_connection(ConnectionEvent::NotConnected, &mut services!(self));
            }

            Event::ServiceConfigured => self.activation.on_service_configured(&mut self.bus),
            Event::VehicleConfigured => self.activation.on_vehicle_configured(&mut self.bus),
            Event::ServiceActivated => self.activation.on_service_activated(&mut self.bus),
            Event::ServiceDeactivated => self.activation.on_service_deactivated(&mut self.bus),
            Event::OtherServicesActive(active) => {
                self.activation.on_other_services_active(active, &mut self.bus)
            }
            Event::ConfigurationChanged => self.queue.on_configuration_changed(),
            Event::EnterGnssDomain => self.activation.on_enter_gnss_domain(&mut self.bus),
            Event::ExitGnssDomain => self.activation.on_exit_gnss_domain(&mut self.bus),
            Event::EnterCccDomain { go_nogo_flags } => {
                self.activation.on_enter_ccc_domain(go_nogo_flags, &mut self.bus)
            }
            Event::ExitCccDomain => self.activation.on_exit_ccc_domain(&mut self.bus),

            Event::AxlesChangeRequested { axles, transaction_id } => self.axles.on_change_requested(
                axles,
                &transaction_id,
                self.activation.service_active(),
                self.transport.as_ref(),
                &mut self.bus,
            ),
            Event::AxlesChangeAck(message) => self.axles.on_ack(&message, &mut self.bus),
            Event::AxlesConfigApproved(approved) => {
                self.activation.on_axles_config_approved(approved, &mut self.bus)
            }

            Event::StatusChanged(status) => self.lifecycle.on_status(status, &mut services!(self)),
            Event::FixesCutOff(cut_off) => self.queue.set_cut_off(cut_off),
            Event::GenericAnomaly(present) => self.lifecycle.on_anomaly(present),
            Event::GnssAnomaly(present) => {
                self.lifecycle
                    .notify_anomaly(NotificationKey::GnssAnomaly, present, &mut services!(self))
            }
            Event::NetworkAnomaly(present) => {
                self.lifecycle
                    .notify_anomaly(NotificationKey::NetworkAnomaly, present, &mut services!(self))
            }
            Event::ClearNoGoNotification => self.notifier.clear(NotificationKey::NoGoService),

            Event::LifecycleStarted => {
                self.activation.on_lifecycle_started(&mut self.bus);
                self.axles
                    .notify_last_change(self.activation.service_active(), self.transport.as_ref());
                // the connectivity reported while not running
                let connection = if self.network_connected {
                    ConnectionEvent::Connected
                } else {
                    ConnectionEvent::NotConnected
                };
                self.lifecycle.on_connection(connection, &mut services!(self));
            }
            Event::LifecycleOnHold | Event::LifecycleStopped => {
                self.activation.on_lifecycle_suspended(&mut self.bus)
            }
        }
    }
}
