use crate::collaborators::{NetworkControl, Notifier, Transport};
use crate::events::EventBus;
use crate::queue::TransmissionQueue;
use crate::store::ConfigurationStore;

pub mod connection;
pub mod lifecycle;
pub mod service_activation;

pub use connection::{ConnectionEvent, ConnectionMachine, ConnectionState};
pub use lifecycle::{LifecycleMachine, LifecycleState};
pub use service_activation::ServiceActivationMachine;

/// # Explanation
/// The collaborators the state machines act on in their entry and exit actions. A Services value is built
/// by the dispatcher for the handling of one event and lent to the machines.
pub struct Services<'a> {
    pub transport: &'a dyn Transport,
    pub notifier: &'a dyn Notifier,
    pub network: &'a dyn NetworkControl,
    pub queue: &'a TransmissionQueue,
    pub store: &'a dyn ConfigurationStore,
    pub bus: &'a mut EventBus,
}
