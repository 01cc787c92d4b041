//! Event scheduler with deterministic ordering.
//!
//! Implements a priority queue that ensures:
//! - Events are processed in time order
//! - Ties are broken by insertion order (sequence number)
//! - Reproducible across runs

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::engine::entities::EntityId;
use crate::engine::model::{ClassId, ResourceId};
use crate::engine::SimTime;

/// Event payloads the kernel dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// An entity of the given class enters the system.
    Arrival {
        /// Class of the arriving entity.
        class: ClassId,
    },
    /// An entity resumes its process after a resource grant.
    StartProcess {
        /// The entity to advance.
        entity: EntityId,
    },
    /// An entity's delay step completes.
    EndProcess {
        /// The entity to advance.
        entity: EntityId,
    },
    /// An entity returns one unit of capacity to a resource.
    ResourceReleased {
        /// The releasing entity.
        entity: EntityId,
        /// The resource being released.
        resource: ResourceId,
    },
    /// A capacity calendar phase takes effect.
    CapacityChange {
        /// The resource whose capacity changes.
        resource: ResourceId,
        /// The new capacity.
        capacity: u32,
    },
}

/// A scheduled event with time and sequence number.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// Scheduled time.
    pub time: SimTime,
    /// Sequence number for deterministic tie-breaking.
    pub sequence: u64,
    /// The event to execute.
    pub kind: EventKind,
}

impl ScheduledEvent {
    /// Create a new scheduled event.
    #[must_use]
    pub const fn new(time: SimTime, sequence: u64, kind: EventKind) -> Self {
        Self {
            time,
            sequence,
            kind,
        }
    }
}

// Custom ordering for BinaryHeap (min-heap by time, then sequence)
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // First by time, then by sequence
        match self.time.cmp(&other.time) {
            std::cmp::Ordering::Equal => self.sequence.cmp(&other.sequence),
            ord => ord,
        }
    }
}

/// Priority-ordered event queue.
///
/// Ensures deterministic processing order:
/// 1. Events are sorted by time
/// 2. Ties are broken by sequence number (insertion order)
///
/// # Example
///
/// ```rust
/// use flowsim::engine::scheduler::{EventKind, EventScheduler};
/// use flowsim::engine::model::ClassId;
/// use flowsim::engine::SimTime;
///
/// let mut scheduler = EventScheduler::new();
///
/// scheduler.schedule(
///     SimTime::from_minutes(1.0),
///     EventKind::Arrival {
///         class: ClassId::new(0),
///     },
/// );
/// assert_eq!(scheduler.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct EventScheduler {
    /// Min-heap ordered by (time, sequence).
    queue: BinaryHeap<Reverse<ScheduledEvent>>,
    /// Monotonic sequence counter for tie-breaking.
    sequence: u64,
}

impl EventScheduler {
    /// Create a new event scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an event at the given time.
    pub fn schedule(&mut self, time: SimTime, kind: EventKind) {
        let seq = self.sequence;
        self.sequence += 1;

        self.queue
            .push(Reverse(ScheduledEvent::new(time, seq, kind)));
    }

    /// Get the next event (removes from queue).
    #[must_use]
    #[allow(clippy::should_implement_trait)] // Not an Iterator, different semantics
    pub fn next(&mut self) -> Option<ScheduledEvent> {
        self.queue.pop().map(|Reverse(e)| e)
    }

    /// Peek at the next event without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&ScheduledEvent> {
        self.queue.peek().map(|Reverse(e)| e)
    }

    /// Check if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Get the number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Get the time of the next event, if any.
    #[must_use]
    pub fn next_event_time(&self) -> Option<SimTime> {
        self.peek().map(|e| e.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrival(class: u32) -> EventKind {
        EventKind::Arrival {
            class: ClassId::new(class),
        }
    }

    #[test]
    fn test_scheduler_time_ordering() {
        let mut scheduler = EventScheduler::new();

        // Schedule events out of order
        scheduler.schedule(SimTime::from_minutes(3.0), arrival(3));
        scheduler.schedule(SimTime::from_minutes(1.0), arrival(1));
        scheduler.schedule(SimTime::from_minutes(2.0), arrival(2));

        // Should come out in time order
        let e1 = scheduler.next();
        assert!(e1.is_some());
        assert!(
            (e1.as_ref().map(|e| e.time.as_minutes()).unwrap_or(0.0) - 1.0).abs() < f64::EPSILON
        );

        let e2 = scheduler.next();
        assert!(
            (e2.as_ref().map(|e| e.time.as_minutes()).unwrap_or(0.0) - 2.0).abs() < f64::EPSILON
        );

        let e3 = scheduler.next();
        assert!(
            (e3.as_ref().map(|e| e.time.as_minutes()).unwrap_or(0.0) - 3.0).abs() < f64::EPSILON
        );

        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_scheduler_sequence_ordering() {
        let mut scheduler = EventScheduler::new();

        // Schedule multiple events at same time
        let time = SimTime::from_minutes(1.0);
        scheduler.schedule(time, arrival(1));
        scheduler.schedule(time, arrival(2));
        scheduler.schedule(time, arrival(3));

        // Should come out in insertion order (sequence)
        let mut classes = Vec::new();
        while let Some(e) = scheduler.next() {
            if let EventKind::Arrival { class } = e.kind {
                classes.push(class.index());
            }
        }
        assert_eq!(classes, vec![1, 2, 3]);
    }

    #[test]
    fn test_scheduler_peek() {
        let mut scheduler = EventScheduler::new();

        assert!(scheduler.peek().is_none());

        scheduler.schedule(SimTime::from_minutes(1.0), arrival(1));

        // Peek doesn't remove
        assert!(scheduler.peek().is_some());
        assert!(scheduler.peek().is_some());
        assert_eq!(scheduler.len(), 1);

        // Next removes
        let _ = scheduler.next();
        assert!(scheduler.peek().is_none());
    }

    #[test]
    fn test_scheduler_next_event_time() {
        let mut scheduler = EventScheduler::new();

        assert!(scheduler.next_event_time().is_none());

        scheduler.schedule(SimTime::from_minutes(2.5), arrival(1));
        scheduler.schedule(SimTime::from_minutes(1.0), arrival(2));

        // Should return earliest event time
        let next_time = scheduler.next_event_time();
        assert!(next_time.is_some());
        assert!((next_time.map_or(0.0, |t| t.as_minutes()) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_scheduled_event_new() {
        let event = ScheduledEvent::new(SimTime::from_minutes(1.0), 42, arrival(5));

        assert!((event.time.as_minutes() - 1.0).abs() < f64::EPSILON);
        assert_eq!(event.sequence, 42);
    }

    #[test]
    fn test_scheduled_event_eq() {
        let e1 = ScheduledEvent::new(SimTime::from_minutes(1.0), 1, arrival(1));
        let e2 = ScheduledEvent::new(SimTime::from_minutes(1.0), 1, arrival(2));
        let e3 = ScheduledEvent::new(SimTime::from_minutes(1.0), 2, arrival(1));
        let e4 = ScheduledEvent::new(SimTime::from_minutes(2.0), 1, arrival(1));

        // Same time and sequence = equal (payload ignored)
        assert_eq!(e1, e2);
        // Different sequence = not equal
        assert_ne!(e1, e3);
        // Different time = not equal
        assert_ne!(e1, e4);
    }

    #[test]
    fn test_scheduled_event_ord() {
        let earlier = ScheduledEvent::new(SimTime::from_minutes(1.0), 1, arrival(1));
        let later = ScheduledEvent::new(SimTime::from_minutes(2.0), 1, arrival(1));
        let same_time_seq1 = ScheduledEvent::new(SimTime::from_minutes(1.0), 1, arrival(1));
        let same_time_seq2 = ScheduledEvent::new(SimTime::from_minutes(1.0), 2, arrival(1));

        assert!(earlier < later);
        assert!(same_time_seq1 < same_time_seq2);
    }

    #[test]
    fn test_scheduled_event_partial_ord() {
        let e1 = ScheduledEvent::new(SimTime::from_minutes(1.0), 1, arrival(1));
        let e2 = ScheduledEvent::new(SimTime::from_minutes(2.0), 1, arrival(1));

        assert!(e1.partial_cmp(&e2).is_some());
        assert!(e1 < e2);
    }

    #[test]
    fn test_scheduled_event_clone() {
        let event = ScheduledEvent::new(SimTime::from_minutes(1.0), 5, arrival(3));
        let cloned = event.clone();

        assert_eq!(event.time, cloned.time);
        assert_eq!(event.sequence, cloned.sequence);
    }

    #[test]
    fn test_scheduled_event_debug() {
        let event = ScheduledEvent::new(SimTime::from_minutes(1.0), 5, arrival(3));
        let debug = format!("{event:?}");
        assert!(debug.contains("ScheduledEvent"));
    }

    #[test]
    fn test_scheduler_default() {
        let scheduler: EventScheduler = Default::default();
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.len(), 0);
    }

    #[test]
    fn test_scheduler_debug() {
        let scheduler = EventScheduler::new();
        let debug = format!("{scheduler:?}");
        assert!(debug.contains("EventScheduler"));
    }
}
