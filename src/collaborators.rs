use thiserror::Error;

use crate::fix::FixRecord;

/// The kind of message a batch of fixes is sent as.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Tracking,
    Start,
    Stop,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("the transport client is not started")]
    NotStarted,
    #[error("the message could not be published: {0}")]
    Publish(String),
}

/// # Explanation
/// The Transport trait is the interface to the message composer / back end client. It is used by the
/// dispatcher (start, stop, event messages) and by the worker thread of the transmission queue, hence
/// Send + Sync and `&self` everywhere.
///
/// An implementation reports the progress of a publish through the PublishMonitor of the transmission
/// queue (publish started with the topic, publish ended).
pub trait Transport: Send + Sync {
    fn start(&self);

    fn stop(&self);

    fn send(&self, fixes: &[FixRecord], kind: MessageKind) -> Result<(), TransportError>;

    fn publish_axles_change(&self, transaction_id: &str, axles: u32) -> Result<(), TransportError>;
}

/// The notifications presented to the driver and to roadside enforcement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NotificationKey {
    NoGoService,
    GnssAnomaly,
    NetworkAnomaly,
}

impl NotificationKey {
    pub fn name(&self) -> &'static str {
        match self {
            NotificationKey::NoGoService => "nogo_service",
            NotificationKey::GnssAnomaly => "gnss_anomaly",
            NotificationKey::NetworkAnomaly => "network_anomaly",
        }
    }
}

pub trait Notifier {
    fn raise(&self, key: NotificationKey);

    fn clear(&self, key: NotificationKey);
}

/// # Explanation
/// Control over the network connectivity provider. While the service is on hold the connectivity is
/// suspended.
pub trait NetworkControl {
    fn hold(&self);

    fn resume(&self);
}
