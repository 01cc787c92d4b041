//! Resource pools: capacity, queues, and usage accounting.
//!
//! Each resource integrates its busy load, queue length, and capacity
//! over time. Integration always happens before a state change, so the
//! integrals cover the old level up to the instant of the change.
//!
//! Capacity shrinks never preempt: entities already holding units keep
//! them, and the load drains below the new capacity through releases.
//! While the load exceeds capacity, utilization runs above one.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::engine::entities::EntityId;
use crate::engine::model::ResourceId;
use crate::engine::SimTime;

/// Queue ordering when demand exceeds capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueDiscipline {
    /// First in, first out.
    #[default]
    Fifo,
    /// Last in, first out.
    Lifo,
    /// Highest priority attribute first; ties go to the earlier arrival.
    Priority,
    /// Shortest expected service first; ties go to the earlier arrival.
    ShortestProcessing,
}

/// Outcome of a seize attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeizeOutcome {
    /// A unit was granted immediately.
    Seized,
    /// No unit free; the entity joined the queue.
    Queued,
}

/// One waiting entity.
#[derive(Debug, Clone)]
struct QueuedEntity {
    entity: EntityId,
    priority: f64,
    expected_service: f64,
}

/// Runtime state of one resource.
#[derive(Debug, Clone)]
pub struct ResourceState {
    name: String,
    capacity: u32,
    load: u32,
    queue: VecDeque<QueuedEntity>,
    discipline: QueueDiscipline,
    busy_integral: f64,
    queue_integral: f64,
    capacity_integral: f64,
    last_change: SimTime,
    observe_from: SimTime,
    seizes: u64,
}

impl ResourceState {
    fn new(name: String, capacity: u32, discipline: QueueDiscipline, observe_from: SimTime) -> Self {
        Self {
            name,
            capacity,
            load: 0,
            queue: VecDeque::new(),
            discipline,
            busy_integral: 0.0,
            queue_integral: 0.0,
            capacity_integral: 0.0,
            last_change: SimTime::ZERO,
            observe_from,
            seizes: 0,
        }
    }

    /// Accrue integrals at the current levels up to `now`.
    fn advance(&mut self, now: SimTime) {
        let from = self.last_change.max(self.observe_from);
        if now > from {
            let dt = (now - from).as_minutes();
            self.busy_integral += f64::from(self.load) * dt;
            self.queue_integral += self.queue.len() as f64 * dt;
            self.capacity_integral += f64::from(self.capacity) * dt;
        }
        if now > self.last_change {
            self.last_change = now;
        }
    }

    /// Pick the queue index the discipline serves next.
    fn next_index(&self) -> Option<usize> {
        if self.queue.is_empty() {
            return None;
        }
        let index = match self.discipline {
            QueueDiscipline::Fifo => 0,
            QueueDiscipline::Lifo => self.queue.len() - 1,
            QueueDiscipline::Priority => {
                let mut best = 0;
                for (i, q) in self.queue.iter().enumerate().skip(1) {
                    if q.priority > self.queue[best].priority {
                        best = i;
                    }
                }
                best
            }
            QueueDiscipline::ShortestProcessing => {
                let mut best = 0;
                for (i, q) in self.queue.iter().enumerate().skip(1) {
                    if q.expected_service < self.queue[best].expected_service {
                        best = i;
                    }
                }
                best
            }
        };
        Some(index)
    }
}

/// All resources of one replication, indexed by [`ResourceId`].
#[derive(Debug, Default)]
pub struct ResourcePool {
    resources: Vec<ResourceState>,
}

impl ResourcePool {
    /// Create an empty pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            resources: Vec::new(),
        }
    }

    /// Register a resource. Handles are assigned in registration order.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        capacity: u32,
        discipline: QueueDiscipline,
        observe_from: SimTime,
    ) -> ResourceId {
        let id = ResourceId::new(self.resources.len() as u32);
        self.resources
            .push(ResourceState::new(name.into(), capacity, discipline, observe_from));
        id
    }

    /// Number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Try to seize one unit, queueing the entity on contention.
    pub fn try_seize(
        &mut self,
        resource: ResourceId,
        entity: EntityId,
        priority: f64,
        expected_service: f64,
        now: SimTime,
    ) -> SeizeOutcome {
        let state = &mut self.resources[resource.index()];
        state.advance(now);
        if state.load < state.capacity {
            state.load += 1;
            state.seizes += 1;
            SeizeOutcome::Seized
        } else {
            state.queue.push_back(QueuedEntity {
                entity,
                priority,
                expected_service,
            });
            SeizeOutcome::Queued
        }
    }

    /// Return one unit to the resource.
    pub fn release(&mut self, resource: ResourceId, now: SimTime) {
        let state = &mut self.resources[resource.index()];
        state.advance(now);
        state.load = state.load.saturating_sub(1);
    }

    /// Grant a free unit to the next queued entity, if both exist.
    pub fn grant_next(&mut self, resource: ResourceId, now: SimTime) -> Option<EntityId> {
        let state = &mut self.resources[resource.index()];
        state.advance(now);
        if state.load >= state.capacity {
            return None;
        }
        let index = state.next_index()?;
        let granted = state.queue.remove(index)?;
        state.load += 1;
        state.seizes += 1;
        Some(granted.entity)
    }

    /// Apply a capacity calendar phase.
    pub fn set_capacity(&mut self, resource: ResourceId, capacity: u32, now: SimTime) {
        let state = &mut self.resources[resource.index()];
        state.advance(now);
        state.capacity = capacity;
    }

    /// Accrue all integrals up to the end of the run.
    pub fn finalize(&mut self, end: SimTime) {
        for state in &mut self.resources {
            state.advance(end);
        }
    }

    /// Resource name.
    #[must_use]
    pub fn name(&self, resource: ResourceId) -> &str {
        &self.resources[resource.index()].name
    }

    /// Current capacity.
    #[must_use]
    pub fn capacity(&self, resource: ResourceId) -> u32 {
        self.resources[resource.index()].capacity
    }

    /// Units currently held.
    #[must_use]
    pub fn load(&self, resource: ResourceId) -> u32 {
        self.resources[resource.index()].load
    }

    /// Entities currently queued.
    #[must_use]
    pub fn queue_len(&self, resource: ResourceId) -> usize {
        self.resources[resource.index()].queue.len()
    }

    /// Units granted over the run.
    #[must_use]
    pub fn seizes(&self, resource: ResourceId) -> u64 {
        self.resources[resource.index()].seizes
    }

    /// Busy time over offered capacity time. Call [`Self::finalize`] first.
    ///
    /// Exceeds one when a capacity shrink left more units held than the
    /// capacity offers.
    #[must_use]
    pub fn utilization(&self, resource: ResourceId) -> f64 {
        let state = &self.resources[resource.index()];
        if state.capacity_integral > 0.0 {
            state.busy_integral / state.capacity_integral
        } else {
            0.0
        }
    }

    /// Time-average queue length over the observed span.
    #[must_use]
    pub fn mean_queue_length(&self, resource: ResourceId, end: SimTime) -> f64 {
        let state = &self.resources[resource.index()];
        if end <= state.observe_from {
            return 0.0;
        }
        let span = (end - state.observe_from).as_minutes();
        state.queue_integral / span
    }
}
