//! Subsystem trait and the per-call context.
//!
//! RULE: Every subsystem implements SimSubsystem.
//! The engine offers every routed event to each subsystem in the fixed
//! order documented in engine.rs. Periodic work (custody countdowns, the
//! chase monitor, the wanted sweep) is driven by the engine directly.

use crate::{
    error::SimResult,
    event::IncidentEvent,
    rng::SubsystemRng,
    store::PersistenceLayer,
    types::Tick,
    world::World,
};

/// Everything a subsystem may touch during one call: the current tick,
/// the host world, durable storage and its own RNG stream.
pub struct TickContext<'a> {
    pub tick:  Tick,
    pub world: &'a mut dyn World,
    pub store: &'a mut dyn PersistenceLayer,
    pub rng:   &'a mut SubsystemRng,
}

/// The contract every subsystem must fulfil.
pub trait SimSubsystem {
    /// Unique stable name for this subsystem.
    fn name(&self) -> &'static str;

    /// React to one event routed by the engine.
    ///
    /// Returns follow-up events; the engine queues them behind any
    /// events already pending in this routing pass.
    fn react(
        &mut self,
        event: &IncidentEvent,
        ctx: &mut TickContext<'_>,
    ) -> SimResult<Vec<IncidentEvent>>;
}

/// Log a presentation failure without interrupting the caller. UI is
/// best-effort once state has been committed.
pub(crate) fn ui_logged(result: crate::world::UiResult, tick: Tick, what: &str) {
    if let Err(e) = result {
        log::warn!("tick={tick} ui: {what} failed: {e}");
    }
}
