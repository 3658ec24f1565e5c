use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::activation::ActivationStatus;
use crate::fix::PositionRecord;

/// # Explanation
/// Everything that happens in the service is an Event. The positioning, network and remote configuration
/// providers emit the input events, ActivationLogic and the lifecycle machine emit the derived ones.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // lifecycle commands
    Run,
    OnHold,
    Stop,

    // positioning
    PositionUpdated(PositionRecord),

    // connectivity
    NetworkConnected,
    NetworkDisconnected,

    // remote configuration
    ServiceConfigured,
    VehicleConfigured,
    ServiceActivated,
    ServiceDeactivated,
    OtherServicesActive(bool),
    ConfigurationChanged,
    EnterGnssDomain,
    ExitGnssDomain,
    EnterCccDomain { go_nogo_flags: u32 },
    ExitCccDomain,

    // vehicle configuration (axles)
    AxlesChangeRequested { axles: u32, transaction_id: String },
    AxlesChangeAck(String),
    AxlesConfigApproved(bool),

    // derived by ActivationLogic
    StatusChanged(ActivationStatus),
    FixesCutOff(bool),
    GenericAnomaly(bool),
    GnssAnomaly(bool),
    NetworkAnomaly(bool),
    ClearNoGoNotification,

    // derived by the lifecycle machine
    LifecycleStarted,
    LifecycleOnHold,
    LifecycleStopped,
}

/// What a scheduled timer is for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TimerKind {
    GnssAnomaly,
    NetworkAnomaly,
    NoGoRaise,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// # Explanation
/// The EventBus is the single dispatcher of the service: a FIFO of events and a priority queue of timers.
/// Events are handled one at a time in emission order, and a handler may emit further events that are
/// handled after the current one.
///
/// The bus has its own notion of the current time, set with advance. A cancelled timer is removed from the
/// set of live timers at once, so it can never fire afterwards.
pub struct EventBus {
    events: VecDeque<Event>,
    deadlines: BinaryHeap<Reverse<(Instant, TimerHandle)>>,
    live: HashMap<TimerHandle, TimerKind>,
    next_handle: u64,
    now: Instant,
}

impl EventBus {
    pub fn new(now: Instant) -> Self {
        EventBus {
            events: VecDeque::new(),
            deadlines: BinaryHeap::new(),
            live: HashMap::new(),
            next_handle: 1,
            now,
        }
    }

    pub fn emit(&mut self, event: Event) {
        log::trace!("emit {:?}", event);
        self.events.push_back(event);
    }

    pub fn next_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Moves the clock of the bus forward. Going back in time is ignored.
    pub fn advance(&mut self, now: Instant) {
        if now > self.now {
            self.now = now;
        }
    }

    pub fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;

        self.deadlines.push(Reverse((self.now + delay, handle)));
        self.live.insert(handle, kind);
        log::trace!("timer {:?} ({:?}) scheduled in {:?}", handle, kind, delay);
        handle
    }

    /// Returns whether the timer was still scheduled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.live.remove(&handle).is_some()
    }

    pub fn is_scheduled(&self, handle: TimerHandle) -> bool {
        self.live.contains_key(&handle)
    }

    pub fn scheduled_timers(&self) -> usize {
        self.live.len()
    }

    /// # Explanation
    /// Removes and returns the earliest live timer whose deadline has passed. Timers with the same deadline
    /// fire in the order they were scheduled.
    pub fn pop_due(&mut self) -> Option<(TimerHandle, TimerKind)> {
        while let Some(Reverse((deadline, handle))) = self.deadlines.peek().copied() {
            if !self.live.contains_key(&handle) {
                self.deadlines.pop();
                continue;
            }
            if deadline > self.now {
                return None;
            }

            self.deadlines.pop();
            return self.live.remove(&handle).map(|kind| (handle, kind));
        }
        None
    }

    /// The deadline of the earliest live timer.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, handle))) = self.deadlines.peek().copied() {
            if self.live.contains_key(&handle) {
                return Some(deadline);
            }
            self.deadlines.pop();
        }
        None
    }
}
