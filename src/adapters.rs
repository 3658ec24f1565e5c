use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::collaborators::{MessageKind, NetworkControl, NotificationKey, Notifier, Transport, TransportError};
use crate::fix::FixRecord;
use crate::queue::PublishMonitor;

const TOPIC_VERSION: &str = "v1";

#[derive(Debug, Serialize)]
struct FixesMessage<'a> {
    obu_id: &'a str,
    message_type: &'static str,
    sent_at: String,
    fixes: &'a [FixRecord],
}

#[derive(Debug, Serialize)]
struct AxlesChangeMessage<'a> {
    data: &'static str,
    trn_id: &'a str,
    value: AxlesValue,
}

#[derive(Debug, Serialize)]
struct AxlesValue {
    axles: u32,
}

fn message_type(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Tracking => "tracking",
        MessageKind::Start => "start",
        MessageKind::Stop => "stop",
    }
}

/// # Explanation
/// A Transport that renders the outgoing messages as JSON and writes them to the log instead of a broker.
/// The tracking packets go to the position data topic, the event messages and the axle changes to their
/// own topics. The progress of each publish is reported to the attached PublishMonitor.
pub struct LogTransport {
    obu_id: String,
    topic_root: String,
    started: AtomicBool,
    next_message_id: AtomicU32,
    monitor: Mutex<Option<PublishMonitor>>,
}

impl LogTransport {
    pub fn new(obu_id: &str, topic_prefix: &str, context_id: u32) -> Self {
        LogTransport {
            obu_id: obu_id.to_string(),
            topic_root: format!("{}/{}/{}/{}", topic_prefix, obu_id, TOPIC_VERSION, context_id),
            started: AtomicBool::new(false),
            next_message_id: AtomicU32::new(1),
            monitor: Mutex::new(None),
        }
    }

    pub fn attach_monitor(&self, monitor: PublishMonitor) {
        *self.monitor.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(monitor);
    }

    pub fn topic(&self, kind: MessageKind) -> String {
        match kind {
            MessageKind::Tracking => format!("{}/posdata", self.topic_root),
            MessageKind::Start | MessageKind::Stop => format!("{}/events", self.topic_root),
        }
    }

    pub fn render(&self, fixes: &[FixRecord], kind: MessageKind) -> Result<String, serde_json::Error> {
        serde_json::to_string(&FixesMessage {
            obu_id: &self.obu_id,
            message_type: message_type(kind),
            sent_at: chrono::Utc::now().to_rfc3339(),
            fixes,
        })
    }

    fn publish(&self, topic: &str, payload: &str) {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        if let Some(monitor) = &monitor {
            monitor.on_publish_started(message_id, topic);
        }
        log::info!("publish {} on {}: {}", message_id, topic, payload);
        if let Some(monitor) = &monitor {
            monitor.on_publish_ended(message_id);
        }
    }
}

impl Transport for LogTransport {
    fn start(&self) {
        log::info!("transport client started");
        self.started.store(true, Ordering::Release);
    }

    fn stop(&self) {
        log::info!("transport client stopped");
        self.started.store(false, Ordering::Release);
    }

    fn send(&self, fixes: &[FixRecord], kind: MessageKind) -> Result<(), TransportError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(TransportError::NotStarted);
        }

        let payload = self
            .render(fixes, kind)
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        self.publish(&self.topic(kind), &payload);
        Ok(())
    }

    fn publish_axles_change(&self, transaction_id: &str, axles: u32) -> Result<(), TransportError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(TransportError::NotStarted);
        }

        let payload = serde_json::to_string(&AxlesChangeMessage {
            data: "axles_change",
            trn_id: transaction_id,
            value: AxlesValue { axles },
        })
        .map_err(|e| TransportError::Publish(e.to_string()))?;
        self.publish(&format!("{}/axles", self.topic_root), &payload);
        Ok(())
    }
}

/// Presents the notifications in the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn raise(&self, key: NotificationKey) {
        log::warn!("notification {} raised", key.name());
    }

    fn clear(&self, key: NotificationKey) {
        log::info!("notification {} cleared", key.name());
    }
}

/// The connectivity of the binary is not managed, holding only logs.
pub struct LogNetworkControl;

impl NetworkControl for LogNetworkControl {
    fn hold(&self) {
        log::info!("network connectivity on hold");
    }

    fn resume(&self) {
        log::info!("network connectivity resumed");
    }
}
