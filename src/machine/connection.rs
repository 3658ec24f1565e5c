use crate::machine::Services;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    Connected,
    Anomaly,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    NotConnected,
    Anomaly,
}

/// # Explanation
/// The ConnectionMachine follows the connectivity of the back end link. Every state accepts every event,
/// so the target state is the event itself. While Connected the transport client is started and the
/// transmission queue may send.
pub struct ConnectionMachine {
    state: ConnectionState,
}

impl ConnectionMachine {
    pub fn new() -> Self {
        ConnectionMachine {
            state: ConnectionState::NotConnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn handle(&mut self, event: ConnectionEvent, services: &mut Services) {
        let next = match event {
            ConnectionEvent::Connected => ConnectionState::Connected,
            ConnectionEvent::NotConnected => ConnectionState::NotConnected,
            ConnectionEvent::Anomaly => ConnectionState::Anomaly,
        };
        self.change_state(next, services);
    }

    fn change_state(&mut self, next: ConnectionState, services: &mut Services) {
        if self.state == next {
            log::debug!("connection already in state {:?}, nothing to do", next);
            return;
        }

        log::debug!("connection {:?} -> {:?}", self.state, next);
        self.exit_state(services);
        self.state = next;
        self.enter_state(services);
    }

    fn enter_state(&self, services: &mut Services) {
        if self.state == ConnectionState::Connected {
            services.transport.start();
            services.queue.set_connected(true);
        }
    }

    fn exit_state(&self, services: &mut Services) {
        if self.state == ConnectionState::Connected {
            services.queue.set_connected(false);
            services.transport.stop();
        }
    }
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}
