//! Entity records and the per-replication arena.
//!
//! Every entity ever created lives in the arena until the replication
//! ends. Departure flips its location rather than removing the record,
//! so conservation checks can count the whole population independently
//! of the running counters.

use std::collections::HashMap;

use crate::config::AttributeValue;
use crate::engine::model::{ClassId, ProcessId, ResourceId};
use crate::engine::SimTime;

/// Handle to an entity record in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(u32);

impl EntityId {
    /// Create a handle from a raw index.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Arena index of this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where an entity currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityLocation {
    /// Between steps, holding no resource unit.
    Traveling,
    /// In a resource queue.
    Waiting(ResourceId),
    /// Holding a unit of a resource.
    Processing(ResourceId),
    /// Left the system.
    Departed,
}

/// Per-entity state tracked by the kernel.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    /// Handle of this record.
    pub id: EntityId,
    /// Class the entity belongs to.
    pub class: ClassId,
    /// Process plan the entity follows.
    pub process: ProcessId,
    /// Instant the entity entered the system.
    pub arrival_time: SimTime,
    /// Index of the next step to execute.
    pub step: usize,
    /// Current location.
    pub location: EntityLocation,
    /// Attributes stamped at creation, readable by conditional routing.
    pub attributes: HashMap<String, AttributeValue>,
    /// Resource granted by the queue but not yet entered.
    pub granted: Option<ResourceId>,
    /// Instant the entity joined its current queue.
    pub wait_started: Option<SimTime>,
    /// Queue priority, taken from the `priority` attribute.
    pub priority: f64,
}

/// Arena of all entities created during one replication.
#[derive(Debug, Default)]
pub struct EntityArena {
    records: Vec<EntityRecord>,
}

impl EntityArena {
    /// Create an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Create a new entity at its first step.
    pub fn create(
        &mut self,
        class: ClassId,
        process: ProcessId,
        arrival_time: SimTime,
        attributes: HashMap<String, AttributeValue>,
    ) -> EntityId {
        let id = EntityId(self.records.len() as u32);
        let priority = attributes
            .get("priority")
            .and_then(AttributeValue::as_number)
            .unwrap_or(0.0);
        self.records.push(EntityRecord {
            id,
            class,
            process,
            arrival_time,
            step: 0,
            location: EntityLocation::Traveling,
            attributes,
            granted: None,
            wait_started: None,
            priority,
        });
        id
    }

    /// Borrow a record.
    ///
    /// # Panics
    ///
    /// Panics if the handle did not come from this arena.
    #[must_use]
    pub fn get(&self, id: EntityId) -> &EntityRecord {
        &self.records[id.index()]
    }

    /// Mutably borrow a record.
    ///
    /// # Panics
    ///
    /// Panics if the handle did not come from this arena.
    pub fn get_mut(&mut self, id: EntityId) -> &mut EntityRecord {
        &mut self.records[id.index()]
    }

    /// Total entities ever created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether any entity was created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Count of entities that have not departed, by full arena scan.
    ///
    /// Deliberately independent of the kernel's running counters so the
    /// two can cross-check each other.
    #[must_use]
    pub fn in_system(&self) -> u64 {
        self.records
            .iter()
            .filter(|r| r.location != EntityLocation::Departed)
            .count() as u64
    }

    /// Iterate all records.
    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.records.iter()
    }
}
