use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::collaborators::Transport;
use crate::data_id::DataIdGenerator;
use crate::filter::FixFilter;
use crate::fix::{FixRecord, PositionRecord};
use crate::queue::persistence::QueueFile;
use crate::store::{ConfigurationStore, RemoteSettings};
use crate::utils::LogErrUnwrap;

pub mod persistence;
mod worker;

pub use worker::Step;

const ESTIMATED_FIX_RATE: f64 = 1.05;
const POSDATA_TOPIC_PATTERN: &str = r"^.+/v\d+/\d+/posdata$";

/// # Explanation
/// The sizing of the queue. The maximum queue size is derived from the network anomaly timeout: the queue
/// has room for the fixes of one anomaly period at the estimated fix rate.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct QueueSizing {
    pub max_queue_size: usize,
    pub max_packet_size: usize,
    pub packet_flush_timeout: Duration,
}

impl QueueSizing {
    pub fn from_settings(settings: &RemoteSettings) -> Self {
        let network_anomaly_timeout = f64::from(settings.network_anomaly_timeout());
        QueueSizing {
            max_queue_size: (network_anomaly_timeout * 60.0 * ESTIMATED_FIX_RATE) as usize,
            max_packet_size: settings.max_packet() as usize,
            packet_flush_timeout: Duration::from_secs(u64::from(settings.transmission_timeout())),
        }
    }
}

pub(crate) struct QueueState {
    fixes: VecDeque<FixRecord>,
    filter: FixFilter,
    data_ids: DataIdGenerator,
    sizing: QueueSizing,
    last_flush_time: Instant,
    connected: bool,
    pending_publish: bool,
    pending_message_id: Option<u32>,
    cut_off: bool,
    flush_requested: bool,
}

impl QueueState {
    /// Takes the oldest fixes, at most one packet.
    fn pop_batch(&mut self) -> Vec<FixRecord> {
        let count = self.sizing.max_packet_size.min(self.fixes.len());
        let batch: Vec<FixRecord> = self.fixes.drain(..count).collect();
        if self.fixes.is_empty() {
            self.flush_requested = false;
        }
        batch
    }

    /// Puts a batch that could not be sent back in front of the queue, in its original order.
    fn requeue(&mut self, batch: Vec<FixRecord>) {
        for fix in batch.into_iter().rev() {
            self.fixes.push_front(fix);
        }
    }
}

pub(crate) struct Shared {
    state: Mutex<QueueState>,
    terminate: AtomicBool,
    transport: Arc<dyn Transport>,
    topic_pattern: Option<Regex>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// # Explanation
/// The TransmissionQueue is the durable FIFO of the admitted fixes. Fixes are pushed by the dispatcher and
/// sent in packets by a single worker thread (see delayed_activation) whenever the transport is connected.
///
/// All queue state, the connectivity and the pending publish flags live behind one mutex that is shared
/// with the worker. The worker never holds the lock while it is sending.
///
/// When the queue is shut down (or dropped) the worker is joined, and the remaining fixes are either sent
/// synchronously (connected) or written to disk (not connected). The fixes on disk are read back when the
/// next queue with the same QueueFile is created.
pub struct TransmissionQueue {
    shared: Arc<Shared>,
    store: Arc<dyn ConfigurationStore>,
    file: QueueFile,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}

impl TransmissionQueue {
    pub fn new(store: Arc<dyn ConfigurationStore>, transport: Arc<dyn Transport>, file: QueueFile) -> Self {
        let sizing = QueueSizing::from_settings(&RemoteSettings::new(store.as_ref()));

        let mut restored = file.read().unwrap_or_else(|e| {
            log::error!("the saved fixes are discarded: {}", e);
            Vec::new()
        });
        if !restored.is_empty() {
            log::info!("{} saved fixes restored", restored.len());
        }
        if restored.len() > sizing.max_queue_size {
            log::warn!(
                "{} restored fixes exceed the queue size, discarding the newest",
                restored.len() - sizing.max_queue_size
            );
            restored.truncate(sizing.max_queue_size);
        }

        let topic_pattern = Regex::new(POSDATA_TOPIC_PATTERN)
            .map_err(|e| log::error!("invalid position data topic pattern: {}", e))
            .ok();

        let state = QueueState {
            fixes: restored.into(),
            filter: FixFilter::new(store.clone()),
            data_ids: DataIdGenerator::new(store.clone()),
            sizing,
            last_flush_time: Instant::now(),
            connected: false,
            pending_publish: false,
            pending_message_id: None,
            cut_off: true,
            flush_requested: false,
        };

        TransmissionQueue {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                terminate: AtomicBool::new(false),
                transport,
                topic_pattern,
            }),
            store,
            file,
            worker: None,
            closed: false,
        }
    }

    /// # Explanation
    /// Starts the worker thread. Calling it again while the worker is running does nothing.
    pub fn delayed_activation(&mut self) {
        if self.worker.is_some() || self.closed {
            return;
        }

        let shared = self.shared.clone();
        let spawn_result = std::thread::Builder::new()
            .name("gnss fixes transmitter".to_string())
            .spawn(move || worker::run(shared));

        match spawn_result {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => log::error!("cannot start the transmission worker: {}", e),
        }
    }

    /// # Explanation
    /// Builds a fix from the position and pushes it when the filter admits it. Returns whether the fix was
    /// queued. Nothing is queued while the fixes are cut off, and a full queue drops the new fix (the
    /// queued fixes are never evicted).
    pub fn push(&self, position: &PositionRecord, trip_distance_km: f64) -> bool {
        let vehicle = RemoteSettings::new(self.store.as_ref()).vehicle_data();
        let mut fix = FixRecord::from_position(position, trip_distance_km, vehicle);

        let mut state = self.shared.lock();
        if state.cut_off {
            return false;
        }
        if !state.filter.should_admit(&fix) {
            return false;
        }
        state.filter.record_admitted(&fix);

        if state.fixes.len() >= state.sizing.max_queue_size {
            drop(state);
            log::warn!("GNSS fixes transmission queue full, discarding fixes");
            return false;
        }

        fix.id = state.data_ids.next_id();
        state.fixes.push_back(fix);
        // the flush timeout runs from the first fix of a packet
        if state.fixes.len() % state.sizing.max_packet_size == 1 || state.sizing.max_packet_size == 1 {
            state.last_flush_time = Instant::now();
        }
        true
    }

    /// The oldest queued fix.
    pub fn head_peek(&self) -> Option<FixRecord> {
        self.shared.lock().fixes.front().cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the queued fixes, oldest first.
    pub fn snapshot(&self) -> Vec<FixRecord> {
        self.shared.lock().fixes.iter().cloned().collect()
    }

    pub fn sizing(&self) -> QueueSizing {
        self.shared.lock().sizing
    }

    pub fn set_cut_off(&self, cut_off: bool) {
        let mut state = self.shared.lock();
        if state.cut_off != cut_off {
            log::info!("fixes cut off: {}", cut_off);
        }
        state.cut_off = cut_off;
    }

    pub fn set_connected(&self, connected: bool) {
        self.shared.lock().connected = connected;
    }

    pub fn reset_filter(&self) {
        self.shared.lock().filter.reset();
    }

    /// The queued fixes are sent at the next worker iteration, without waiting for the flush timeout.
    pub fn request_flush(&self) {
        let mut state = self.shared.lock();
        if !state.fixes.is_empty() {
            state.flush_requested = true;
        }
    }

    pub fn on_configuration_changed(&self) {
        let sizing = QueueSizing::from_settings(&RemoteSettings::new(self.store.as_ref()));
        log::debug!("queue sizing is now {:?}", sizing);
        self.shared.lock().sizing = sizing;
    }

    pub fn publish_monitor(&self) -> PublishMonitor {
        PublishMonitor {
            shared: self.shared.clone(),
        }
    }

    /// # Explanation
    /// One iteration of the worker at the given time. The worker thread calls it in a loop; it is public
    /// so that the send decisions can be driven without the thread.
    pub fn step(&self, now: Instant) -> Step {
        worker::step(&self.shared, now)
    }

    /// # Explanation
    /// Stops the worker and then either drains the remaining fixes (connected) or saves them to disk.
    /// The last fix identifier is written back to the configuration store.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.shared.terminate.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("the transmission worker panicked");
            }
        }

        let remaining = worker::drain(&self.shared);
        if !remaining.is_empty() {
            log::warn!("there are pending fixes, saving (no connection)");
            self.file.write(&remaining).log_err_unwrap(());
        }

        self.shared.lock().data_ids.persist().log_err_unwrap(());
    }
}

impl Drop for TransmissionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// # Explanation
/// The handle the transport uses to report the progress of its publishes. A publish on the position data
/// topic is in flight from publish started until publish ended, and no new packet is sent meanwhile.
#[derive(Clone)]
pub struct PublishMonitor {
    shared: Arc<Shared>,
}

impl PublishMonitor {
    pub fn on_publish_started(&self, message_id: u32, topic: &str) {
        let is_position_data = self
            .shared
            .topic_pattern
            .as_ref()
            .map_or(true, |pattern| pattern.is_match(topic));

        if is_position_data {
            let mut state = self.shared.lock();
            state.pending_publish = true;
            state.pending_message_id = Some(message_id);
        }
    }

    pub fn on_publish_ended(&self, message_id: u32) {
        let mut state = self.shared.lock();
        if state.pending_message_id.is_some_and(|pending| pending != message_id) {
            log::debug!(
                "publish {} ended while {:?} was pending",
                message_id,
                state.pending_message_id
            );
        }
        state.pending_publish = false;
        state.pending_message_id = None;
    }

    pub fn is_pending(&self) -> bool {
        self.shared.lock().pending_publish
    }
}
