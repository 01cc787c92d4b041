//! Event handlers: arrivals, step execution, grants, and departures.
//!
//! An entity advances through its process steps inline until it has to
//! wait, either for a sampled delay to elapse or for a resource grant.
//! Releases are not applied inline: the releasing entity schedules a
//! release event at the current instant and keeps advancing, so grants
//! to waiting peers happen as their own events in insertion order.

use std::sync::Arc;

use crate::engine::entities::{EntityId, EntityLocation};
use crate::engine::model::{
    ClassId, CompiledArrivals, CompiledBranching, CompiledStep, ResourceId,
};
use crate::engine::resources::SeizeOutcome;
use crate::engine::sampler::Distribution;
use crate::engine::scheduler::{EventKind, ScheduledEvent};
use crate::engine::{SimTime, Simulation};
use crate::error::{SimError, SimResult};

/// Stream feeding interarrival draws.
const ARRIVAL_STREAM: &str = "arrivals";
/// Stream feeding delay-duration draws.
const SERVICE_STREAM: &str = "service";
/// Stream feeding probabilistic branching draws.
const ROUTING_STREAM: &str = "routing";

impl Simulation {
    /// Schedule the first arrival of every class.
    pub(super) fn prime_arrivals(&mut self) -> SimResult<()> {
        let model = Arc::clone(&self.model);
        for (index, spec) in model.classes.iter().enumerate() {
            let class = ClassId::new(index as u32);
            match &spec.arrivals {
                CompiledArrivals::Poisson { interarrival } => {
                    let gap = self.sampler.sample(ARRIVAL_STREAM, interarrival)?;
                    let first = SimTime::from_minutes(gap);
                    if first <= self.horizon {
                        self.schedule(first, EventKind::Arrival { class })?;
                    }
                }
                CompiledArrivals::Every { first_at, .. } => {
                    if *first_at <= self.horizon {
                        self.schedule(*first_at, EventKind::Arrival { class })?;
                    }
                }
                CompiledArrivals::Scheduled { times } => {
                    for &time in times {
                        if time <= self.horizon {
                            self.schedule(time, EventKind::Arrival { class })?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Execute one popped event.
    pub(super) fn dispatch(&mut self, event: ScheduledEvent) -> SimResult<()> {
        match event.kind {
            EventKind::Arrival { class } => self.handle_arrival(class),
            EventKind::StartProcess { entity } | EventKind::EndProcess { entity } => {
                self.advance_entity(entity)
            }
            EventKind::ResourceReleased { resource, .. } => self.handle_release(resource),
            EventKind::CapacityChange { resource, capacity } => {
                self.handle_capacity_change(resource, capacity)
            }
        }
    }

    /// Create one batch of entities and schedule the generator's next firing.
    fn handle_arrival(&mut self, class: ClassId) -> SimResult<()> {
        let model = Arc::clone(&self.model);
        let spec = &model.classes[class.index()];

        // The next arrival is scheduled before the batch advances, so the
        // generator's draw order does not depend on what the batch does.
        match &spec.arrivals {
            CompiledArrivals::Poisson { interarrival } => {
                let gap = self.sampler.sample(ARRIVAL_STREAM, interarrival)?;
                let next = self.clock + SimTime::from_minutes(gap);
                if next <= self.horizon {
                    self.schedule(next, EventKind::Arrival { class })?;
                }
            }
            CompiledArrivals::Every { interval, .. } => {
                let next = self.clock + *interval;
                if next <= self.horizon {
                    self.schedule(next, EventKind::Arrival { class })?;
                }
            }
            CompiledArrivals::Scheduled { .. } => {}
        }

        let batch = match &spec.arrivals {
            CompiledArrivals::Every { batch, .. } => *batch,
            _ => 1,
        };
        for _ in 0..batch {
            let entity = self.entities.create(
                class,
                spec.process,
                self.clock,
                spec.attributes.clone(),
            );
            self.created += 1;
            self.wip
                .set((self.created - self.departed) as f64, self.clock);
            self.advance_entity(entity)?;
        }
        Ok(())
    }

    /// Advance an entity through its steps until it blocks or departs.
    fn advance_entity(&mut self, entity: EntityId) -> SimResult<()> {
        let model = Arc::clone(&self.model);
        loop {
            let (process, step_index) = {
                let record = self.entities.get(entity);
                (record.process, record.step)
            };
            let steps = &model.processes[process.index()].steps;
            let Some(step) = steps.get(step_index) else {
                // Compilation proves every path ends in a terminal step
                return Err(SimError::invalid_result(
                    "process step index",
                    step_index as f64,
                ));
            };

            match step {
                CompiledStep::Seize { resource } => {
                    let resource = *resource;
                    if self.entities.get(entity).granted == Some(resource) {
                        let record = self.entities.get_mut(entity);
                        record.granted = None;
                        record.location = EntityLocation::Processing(resource);
                        record.step += 1;
                        continue;
                    }
                    let priority = self.entities.get(entity).priority;
                    let expected = model.nominal_service_minutes(resource);
                    match self
                        .resources
                        .try_seize(resource, entity, priority, expected, self.clock)
                    {
                        SeizeOutcome::Seized => {
                            if self.clock >= self.warmup {
                                self.wait.record(0.0);
                            }
                            let record = self.entities.get_mut(entity);
                            record.location = EntityLocation::Processing(resource);
                            record.step += 1;
                        }
                        SeizeOutcome::Queued => {
                            let record = self.entities.get_mut(entity);
                            record.location = EntityLocation::Waiting(resource);
                            record.wait_started = Some(self.clock);
                            return Ok(());
                        }
                    }
                }
                CompiledStep::Delay { duration } => {
                    let minutes = self.sampler.sample_duration(SERVICE_STREAM, duration)?;
                    let at = self.clock + SimTime::from_minutes(minutes);
                    self.entities.get_mut(entity).step += 1;
                    self.schedule(at, EventKind::EndProcess { entity })?;
                    return Ok(());
                }
                CompiledStep::Release { resource } => {
                    let resource = *resource;
                    let record = self.entities.get_mut(entity);
                    record.location = EntityLocation::Traveling;
                    record.step += 1;
                    self.schedule(self.clock, EventKind::ResourceReleased { entity, resource })?;
                }
                CompiledStep::Decision { branching } => {
                    let target = self.choose_branch(entity, branching)?;
                    self.entities.get_mut(entity).step = target;
                }
                CompiledStep::Exit => {
                    self.depart(entity);
                    return Ok(());
                }
            }
        }
    }

    /// Pick the step a decision jumps to.
    fn choose_branch(
        &mut self,
        entity: EntityId,
        branching: &CompiledBranching,
    ) -> SimResult<usize> {
        match branching {
            CompiledBranching::ByProbability { branches } => {
                let u = self.sampler.sample(
                    ROUTING_STREAM,
                    &Distribution::Uniform { min: 0.0, max: 1.0 },
                )?;
                let mut acc = 0.0;
                for &(probability, target) in branches {
                    acc += probability;
                    if u < acc {
                        return Ok(target);
                    }
                }
                // Rounding dust can leave the draw at or past the total
                branches
                    .last()
                    .map(|&(_, target)| target)
                    .ok_or_else(|| SimError::config("decision step has no branches"))
            }
            CompiledBranching::ByCondition { arms, fallback } => {
                let attributes = &self.entities.get(entity).attributes;
                for (condition, target) in arms {
                    if condition.matches(attributes) {
                        return Ok(*target);
                    }
                }
                Ok(*fallback)
            }
        }
    }

    /// Remove the entity from the system and record its departure.
    fn depart(&mut self, entity: EntityId) {
        let arrival = {
            let record = self.entities.get_mut(entity);
            record.location = EntityLocation::Departed;
            record.arrival_time
        };
        self.departed += 1;
        if self.clock >= self.warmup {
            self.departed_observed += 1;
            self.cycle.record((self.clock - arrival).as_minutes());
        }
        self.wip
            .set((self.created - self.departed) as f64, self.clock);
    }

    /// Return a unit and hand freed capacity to waiting entities.
    fn handle_release(&mut self, resource: ResourceId) -> SimResult<()> {
        self.resources.release(resource, self.clock);
        self.pull_waiters(resource)
    }

    /// Grant freed units in discipline order.
    fn pull_waiters(&mut self, resource: ResourceId) -> SimResult<()> {
        while let Some(next) = self.resources.grant_next(resource, self.clock) {
            if self.clock >= self.warmup {
                let started = self.entities.get(next).wait_started.unwrap_or(self.clock);
                self.wait.record((self.clock - started).as_minutes());
            }
            let record = self.entities.get_mut(next);
            record.wait_started = None;
            record.granted = Some(resource);
            self.schedule(self.clock, EventKind::StartProcess { entity: next })?;
        }
        Ok(())
    }

    /// Apply a calendar phase and grant any capacity it opened.
    fn handle_capacity_change(&mut self, resource: ResourceId, capacity: u32) -> SimResult<()> {
        self.resources.set_capacity(resource, capacity, self.clock);
        self.pull_waiters(resource)
    }
}
