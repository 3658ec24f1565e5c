use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::collaborators::MessageKind;
use crate::fix::FixRecord;
use crate::queue::Shared;

pub const IDLE_SLEEP: Duration = Duration::from_millis(300);
pub const PENDING_PUBLISH_SLEEP: Duration = Duration::from_millis(10);

/// The outcome of one worker iteration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    Terminate,
    Sleep(Duration),
    Sent(usize),
}

pub(super) fn run(shared: std::sync::Arc<Shared>) {
    log::info!("transmission worker started");
    loop {
        match step(&shared, Instant::now()) {
            Step::Terminate => break,
            Step::Sleep(duration) => std::thread::sleep(duration),
            Step::Sent(count) => log::debug!("{} fixes sent", count),
        }
    }
    log::info!("transmission worker stopped");
}

/// # Explanation
/// Decides under the lock whether a packet is due and pops it, then sends it without holding the lock.
/// A packet is due when a full packet is queued, when the flush timeout has elapsed since the first fix
/// of the packet was queued, or when a flush was requested.
pub(super) fn step(shared: &Shared, now: Instant) -> Step {
    let batch = {
        let mut state = shared.lock();
        if shared.terminate.load(Ordering::Acquire) {
            return Step::Terminate;
        }
        if !state.connected || state.fixes.is_empty() {
            return Step::Sleep(IDLE_SLEEP);
        }
        if state.pending_publish {
            return Step::Sleep(PENDING_PUBLISH_SLEEP);
        }

        let packet_full = state.fixes.len() >= state.sizing.max_packet_size;
        let timed_out =
            now.saturating_duration_since(state.last_flush_time) > state.sizing.packet_flush_timeout;
        if !(packet_full || timed_out || state.flush_requested) {
            return Step::Sleep(IDLE_SLEEP);
        }

        state.pop_batch()
    };

    match shared.transport.send(&batch, MessageKind::Tracking) {
        Ok(()) => Step::Sent(batch.len()),
        Err(e) => {
            log::warn!("cannot send {} fixes, requeueing: {}", batch.len(), e);
            shared.lock().requeue(batch);
            Step::Sleep(IDLE_SLEEP)
        }
    }
}

/// # Explanation
/// Sends every queued fix when connected. Returns the fixes that could not be sent, which are all of them
/// when the transport is not connected.
pub(super) fn drain(shared: &Shared) -> Vec<FixRecord> {
    let mut state = shared.lock();
    if !state.connected {
        return state.fixes.drain(..).collect();
    }

    if !state.fixes.is_empty() {
        log::info!("there are pending fixes, draining");
    }
    loop {
        let batch = state.pop_batch();
        if batch.is_empty() {
            return Vec::new();
        }

        drop(state);
        let result = shared.transport.send(&batch, MessageKind::Tracking);
        state = shared.lock();

        if let Err(e) = result {
            log::warn!("draining failed: {}", e);
            state.requeue(batch);
            return state.fixes.drain(..).collect();
        }
    }
}
