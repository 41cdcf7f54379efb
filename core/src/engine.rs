//! The incident engine: wanted, chase and custody on one tick clock.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Custody     every tick          (completions, countdowns, minigame)
//!   2. Chase       every monitor interval (validity, distance, capture)
//!   3. Wanted      every sweep interval   (expiry)
//!   4. Snapshot    every SNAPSHOT_INTERVAL ticks
//!
//! ROUTING ORDER: every event produced by a step or a command is offered
//! to Wanted, then Chase, then Custody. Follow-up events queue behind the
//! events already pending, so one pass settles in breadth-first order.
//!
//! RULES:
//!   - All state mutation happens inside the engine, on the caller's thread.
//!   - No component calls another component's functions directly.
//!   - All randomness flows through the RngBank.
//!   - Every routed event is recorded in the event log.

use crate::{
    chase_coordinator::{ChaseCoordinator, ChaseRejection, ChaseSession},
    clock::SimClock,
    command::{CommandOutcome, IncidentCommand},
    config::IncidentConfig,
    custody_controller::{CustodyController, CustodyRejection, JailCountdownSession, PursuitContext},
    error::SimResult,
    event::{ChaseEndReason, CustodyCancelReason, EventLogEntry, IncidentEvent},
    rng::{RngBank, SubsystemSlot},
    sandbox::SandboxWorld,
    snapshot::{IncidentSnapshot, SNAPSHOT_INTERVAL},
    store::{PersistenceLayer, SimStore},
    subsystem::{ui_logged, SimSubsystem, TickContext},
    types::{RunId, SessionId, Tick},
    wanted_registry::{WantedRegistry, WantedStatus},
    world::{Notice, World},
};
use std::collections::VecDeque;

/// Upper bound on events settled in one routing pass.
const MAX_ROUTED_PER_PASS: usize = 512;

/// Host world, durable storage and RNG streams, lent to components one
/// call at a time.
struct Services<W, S> {
    world:    W,
    store:    S,
    rng_bank: RngBank,
}

impl<W: World, S: PersistenceLayer> Services<W, S> {
    fn context(&mut self, tick: Tick, slot: SubsystemSlot) -> TickContext<'_> {
        TickContext {
            tick,
            world: &mut self.world,
            store: &mut self.store,
            rng:   self.rng_bank.stream(slot),
        }
    }
}

pub struct IncidentEngine<W, S = SimStore> {
    pub run_id: RunId,
    pub clock:  SimClock,
    seed:       u64,
    config:     IncidentConfig,
    services:   Services<W, S>,
    wanted:     WantedRegistry,
    chase:      ChaseCoordinator,
    custody:    CustodyController,
}

impl IncidentEngine<SandboxWorld, SimStore> {
    /// Sandbox world over a migrated in-memory store, default test config.
    pub fn build_test(run_id: &str, seed: u64) -> SimResult<Self> {
        Self::build_test_with(run_id, seed, IncidentConfig::default_test())
    }

    pub fn build_test_with(run_id: &str, seed: u64, config: IncidentConfig) -> SimResult<Self> {
        let store = SimStore::in_memory()?;
        store.migrate()?;
        store.insert_run(run_id, seed, env!("CARGO_PKG_VERSION"))?;
        Ok(Self::new(run_id.to_string(), seed, config, SandboxWorld::new(), store))
    }
}

impl<W: World, S: PersistenceLayer> IncidentEngine<W, S> {
    pub fn new(run_id: RunId, seed: u64, config: IncidentConfig, world: W, store: S) -> Self {
        Self {
            clock:    SimClock::new(run_id.clone()),
            seed,
            wanted:   WantedRegistry::new(config.wanted.clone(), config.detection.clone()),
            chase:    ChaseCoordinator::new(config.chase.clone(), config.detection.clone()),
            custody:  CustodyController::new(config.custody.clone(), config.minigame.clone()),
            services: Services { world, store, rng_bank: RngBank::new(seed) },
            config,
            run_id,
        }
    }

    // ── Tick ───────────────────────────────────────────────────

    /// Advance one tick. Returns every event routed during it.
    pub fn tick(&mut self) -> SimResult<Vec<IncidentEvent>> {
        assert!(!self.clock.paused, "tick() called on paused engine");
        let tick = self.clock.advance();
        let mut routed = Vec::new();

        // 1. Custody.
        let produced = {
            let mut ctx = self.services.context(tick, SubsystemSlot::Custody);
            self.custody.tick(&mut ctx, &self.wanted)
        };
        routed.extend(self.route(tick, "custody", produced)?);

        // 2. Chase monitor.
        if tick % self.config.chase.monitor_interval_ticks.max(1) == 0 {
            let produced = {
                let mut ctx = self.services.context(tick, SubsystemSlot::Chase);
                self.chase.monitor(&mut ctx)
            };
            routed.extend(self.route(tick, "chase", produced)?);
        }

        // 3. Wanted sweep.
        if tick % self.config.wanted.sweep_interval_ticks.max(1) == 0 {
            let produced = {
                let mut ctx = self.services.context(tick, SubsystemSlot::Wanted);
                self.wanted.sweep(&mut ctx)
            };
            routed.extend(self.route(tick, "wanted", produced)?);
        }

        // 4. Snapshot.
        if tick % SNAPSHOT_INTERVAL == 0 {
            self.take_snapshot(tick)?;
        }

        Ok(routed)
    }

    /// Run n ticks in a loop. Used for testing and fast-forward.
    pub fn run_ticks(&mut self, n: u64) -> SimResult<()> {
        // Emit RunInitialized at tick 0 so seed differences are observable.
        if self.clock.current_tick == 0 {
            let init = IncidentEvent::RunInitialized { run_id: self.run_id.clone(), seed: self.seed };
            self.log_event(0, "engine", &init)?;
        }
        self.clock.resume();
        for _ in 0..n {
            self.tick()?;
        }
        self.clock.pause();
        Ok(())
    }

    /// Persist, then offer each event to every component in routing order.
    fn route(
        &mut self,
        tick:   Tick,
        origin: &'static str,
        events: Vec<IncidentEvent>,
    ) -> SimResult<Vec<IncidentEvent>> {
        let mut queue: VecDeque<(&'static str, IncidentEvent)> =
            events.into_iter().map(|e| (origin, e)).collect();
        let mut routed = Vec::new();

        while let Some((source, event)) = queue.pop_front() {
            if routed.len() >= MAX_ROUTED_PER_PASS {
                log::error!(
                    "tick={tick} engine: routing cap reached, dropping {} queued events",
                    queue.len() + 1
                );
                break;
            }
            self.log_event(tick, source, &event)?;

            let components: [(&mut dyn SimSubsystem, SubsystemSlot); 3] = [
                (&mut self.wanted, SubsystemSlot::Wanted),
                (&mut self.chase, SubsystemSlot::Chase),
                (&mut self.custody, SubsystemSlot::Custody),
            ];
            for (component, slot) in components {
                let mut ctx = self.services.context(tick, slot);
                match component.react(&event, &mut ctx) {
                    Ok(follow_up) => {
                        let name = component.name();
                        queue.extend(follow_up.into_iter().map(|e| (name, e)));
                    }
                    Err(e) => log::warn!(
                        "tick={tick} engine: {} failed reacting to {}: {e}",
                        component.name(),
                        event.type_name()
                    ),
                }
            }
            routed.push(event);
        }
        Ok(routed)
    }

    fn log_event(&mut self, tick: Tick, subsystem: &str, event: &IncidentEvent) -> SimResult<()> {
        let entry = EventLogEntry {
            id:         None,
            run_id:     self.run_id.clone(),
            tick,
            subsystem:  subsystem.to_string(),
            event_type: event.type_name().to_string(),
            payload:    serde_json::to_string(event)?,
        };
        self.services.store.append_event(&entry)
    }

    fn now(&self) -> Tick {
        self.clock.current_tick
    }

    // ── Commands ───────────────────────────────────────────────

    pub fn start_chase(
        &mut self,
        enforcer: &str,
        target:   &str,
    ) -> SimResult<Result<SessionId, ChaseRejection>> {
        let tick = self.now();
        let result = {
            let mut ctx = self.services.context(tick, SubsystemSlot::Chase);
            self.chase.start(enforcer, target, &mut ctx)
        };
        match result {
            Ok(started) => {
                let session_id = match &started {
                    IncidentEvent::ChaseStarted { session_id, .. } => session_id.clone(),
                    _ => String::new(),
                };
                self.route(tick, "chase", vec![started])?;
                Ok(Ok(session_id))
            }
            Err(rejection) => {
                log::info!("tick={tick} chase: {enforcer} -> {target} rejected: {rejection}");
                let notice = Notice::ChaseRejected { reason: rejection.key().to_string() };
                ui_logged(self.services.world.notify(enforcer, &notice), tick, "chase rejected notice");
                Ok(Err(rejection))
            }
        }
    }

    /// End the chase `actor` takes part in. False if there was none.
    pub fn end_chase(&mut self, actor: &str) -> SimResult<bool> {
        let tick = self.now();
        let ended = {
            let mut ctx = self.services.context(tick, SubsystemSlot::Chase);
            self.chase.end_for_actor(actor, ChaseEndReason::CalledOff, &mut ctx)
        };
        let any = ended.is_some();
        self.route(tick, "chase", ended.into_iter().collect())?;
        Ok(any)
    }

    pub fn start_custody(
        &mut self,
        enforcer: &str,
        target:   &str,
        reason:   &str,
    ) -> SimResult<Result<(), CustodyRejection>> {
        let tick = self.now();
        let pursuit = PursuitContext {
            already_pursuing: self.chase.is_chasing(enforcer, target),
            capture_blocked:  self.chase.capture_blocked(enforcer, target, tick),
        };
        let result = {
            let mut ctx = self.services.context(tick, SubsystemSlot::Custody);
            self.custody.start(enforcer, target, reason, pursuit, &mut ctx)
        };
        match result {
            Ok(started) => {
                self.route(tick, "custody", started)?;
                Ok(Ok(()))
            }
            Err(rejection) => {
                log::info!("tick={tick} custody: {enforcer} on {target} rejected: {rejection}");
                let notice = Notice::CustodyRejected { reason: rejection.key().to_string() };
                ui_logged(self.services.world.notify(enforcer, &notice), tick, "custody rejected notice");
                Ok(Err(rejection))
            }
        }
    }

    pub fn cancel_custody(&mut self, target: &str) -> SimResult<bool> {
        let tick = self.now();
        let cancelled = {
            let mut ctx = self.services.context(tick, SubsystemSlot::Custody);
            self.custody.cancel(target, CustodyCancelReason::CalledOff, &mut ctx)
        };
        let any = cancelled.is_some();
        self.route(tick, "custody", cancelled.into_iter().collect())?;
        Ok(any)
    }

    /// The target pressed the minigame key. False if no minigame was running.
    pub fn minigame_input(&mut self, target: &str) -> SimResult<bool> {
        let tick = self.now();
        let produced = {
            let mut ctx = self.services.context(tick, SubsystemSlot::Custody);
            self.custody.handle_input(target, &mut ctx)
        };
        let any = !produced.is_empty();
        self.route(tick, "custody", produced)?;
        Ok(any)
    }

    pub fn report_hostile_act(&mut self, attacker: &str, victim: &str) -> SimResult<()> {
        let tick = self.now();
        let event = IncidentEvent::HostileActReported {
            tick,
            attacker: attacker.to_string(),
            victim: victim.to_string(),
        };
        self.route(tick, "detection", vec![event])?;
        Ok(())
    }

    pub fn report_contraband(&mut self, actor: &str, reason: &str) -> SimResult<()> {
        let tick = self.now();
        let event = IncidentEvent::ContrabandReported {
            tick,
            actor: actor.to_string(),
            reason: reason.to_string(),
        };
        self.route(tick, "detection", vec![event])?;
        Ok(())
    }

    /// Returns false when the registry refused or nothing changed.
    pub fn set_wanted(&mut self, actor: &str, level: u32, reason: &str) -> SimResult<bool> {
        let tick = self.now();
        let changed = {
            let mut ctx = self.services.context(tick, SubsystemSlot::Wanted);
            self.wanted.set_level(actor, level, reason, &mut ctx)
        };
        let any = changed.is_some();
        self.route(tick, "wanted", changed.into_iter().collect())?;
        Ok(any)
    }

    pub fn increase_wanted(&mut self, actor: &str, delta: u32, reason: &str) -> SimResult<bool> {
        let tick = self.now();
        let changed = {
            let mut ctx = self.services.context(tick, SubsystemSlot::Wanted);
            self.wanted.increase(actor, delta, reason, &mut ctx)
        };
        let any = changed.is_some();
        self.route(tick, "wanted", changed.into_iter().collect())?;
        Ok(any)
    }

    pub fn clear_wanted(&mut self, actor: &str) -> SimResult<bool> {
        let tick = self.now();
        let changed = {
            let mut ctx = self.services.context(tick, SubsystemSlot::Wanted);
            self.wanted.clear(actor, &mut ctx)
        };
        let any = changed.is_some();
        self.route(tick, "wanted", changed.into_iter().collect())?;
        Ok(any)
    }

    /// Reload persisted wanted status for an actor who just connected.
    pub fn actor_joined(&mut self, actor: &str) -> SimResult<()> {
        let tick = self.now();
        let restored = {
            let mut ctx = self.services.context(tick, SubsystemSlot::Wanted);
            self.wanted.restore(actor, &mut ctx)
        };
        self.route(tick, "wanted", restored.into_iter().collect())?;
        Ok(())
    }

    /// Tear down everything an actor takes part in and park their status.
    pub fn actor_left(&mut self, actor: &str) -> SimResult<()> {
        let tick = self.now();
        let cancelled = {
            let mut ctx = self.services.context(tick, SubsystemSlot::Custody);
            self.custody.cancel_for_actor(actor, CustodyCancelReason::Disconnected, &mut ctx)
        };
        self.route(tick, "custody", cancelled)?;

        let ended = {
            let mut ctx = self.services.context(tick, SubsystemSlot::Chase);
            self.chase.end_for_actor(actor, ChaseEndReason::Offline, &mut ctx)
        };
        self.route(tick, "chase", ended.into_iter().collect())?;

        let mut ctx = self.services.context(tick, SubsystemSlot::Wanted);
        self.wanted.park(actor, &mut ctx);
        Ok(())
    }

    /// Apply one serialized command.
    pub fn execute(&mut self, command: IncidentCommand) -> SimResult<CommandOutcome> {
        let applied = |changed: bool| if changed { CommandOutcome::Applied } else { CommandOutcome::Unchanged };
        Ok(match command {
            IncidentCommand::StartChase { enforcer, target } => match self.start_chase(&enforcer, &target)? {
                Ok(session_id) => CommandOutcome::ChaseStarted { session_id },
                Err(r) => CommandOutcome::Rejected { reason: r.key().to_string() },
            },
            IncidentCommand::EndChase { actor } => applied(self.end_chase(&actor)?),
            IncidentCommand::StartCustody { enforcer, target, reason } => {
                match self.start_custody(&enforcer, &target, &reason)? {
                    Ok(()) => CommandOutcome::Applied,
                    Err(r) => CommandOutcome::Rejected { reason: r.key().to_string() },
                }
            }
            IncidentCommand::CancelCustody { target } => applied(self.cancel_custody(&target)?),
            IncidentCommand::MinigameInput { target } => applied(self.minigame_input(&target)?),
            IncidentCommand::ReportHostileAct { attacker, victim } => {
                self.report_hostile_act(&attacker, &victim)?;
                CommandOutcome::Applied
            }
            IncidentCommand::ReportContraband { actor, reason } => {
                self.report_contraband(&actor, &reason)?;
                CommandOutcome::Applied
            }
            IncidentCommand::SetWanted { actor, level, reason } => applied(self.set_wanted(&actor, level, &reason)?),
            IncidentCommand::IncreaseWanted { actor, delta, reason } => {
                applied(self.increase_wanted(&actor, delta, &reason)?)
            }
            IncidentCommand::ClearWanted { actor } => applied(self.clear_wanted(&actor)?),
            IncidentCommand::ActorJoined { actor } => {
                self.actor_joined(&actor)?;
                CommandOutcome::Applied
            }
            IncidentCommand::ActorLeft { actor } => {
                self.actor_left(&actor)?;
                CommandOutcome::Applied
            }
        })
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn config(&self) -> &IncidentConfig {
        &self.config
    }

    pub fn level_of(&self, actor: &str) -> u32 {
        self.wanted.level_of(actor)
    }

    pub fn wanted_status(&self, actor: &str) -> Option<&WantedStatus> {
        self.wanted.status_of(actor)
    }

    pub fn chase_session_for(&self, actor: &str) -> Option<&ChaseSession> {
        self.chase.session_for(actor)
    }

    pub fn chase_count(&self) -> usize {
        self.chase.active_count()
    }

    pub fn is_fleeing(&self, actor: &str) -> bool {
        self.chase.is_fleeing(actor)
    }

    pub fn is_in_countdown(&self, target: &str) -> bool {
        self.custody.is_in_countdown(target)
    }

    pub fn custody_session(&self, target: &str) -> Option<&JailCountdownSession> {
        self.custody.session(target)
    }

    pub fn is_awaiting_jailing(&self, target: &str) -> bool {
        self.custody.is_awaiting_jailing(target)
    }

    pub fn minigame_active(&self, target: &str) -> bool {
        self.custody.minigame().is_active(target)
    }

    pub fn world(&self) -> &W {
        &self.services.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.services.world
    }

    pub fn store(&self) -> &S {
        &self.services.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.services.store
    }

    /// Query events for a specific tick from the store.
    /// Used by the determinism test and replay tooling.
    pub fn store_events_for_tick(&self, run_id: &str, tick: Tick) -> SimResult<Vec<EventLogEntry>> {
        self.services.store.events_for_tick(run_id, tick)
    }

    pub fn snapshot(&self) -> IncidentSnapshot {
        IncidentSnapshot {
            run_id:    self.run_id.clone(),
            tick:      self.clock.current_tick,
            clock:     self.clock.clone(),
            wanted:    self.wanted.statuses().map(|(a, s)| (a.clone(), s.clone())).collect(),
            chases:    self.chase.sessions().cloned().collect(),
            custody:   self.custody.sessions().cloned().collect(),
            pending:   self.custody.pending().cloned().collect(),
            minigames: self
                .custody
                .minigame()
                .states()
                .map(|(a, s)| (a.clone(), s.clone()))
                .collect(),
        }
    }

    fn take_snapshot(&mut self, tick: Tick) -> SimResult<()> {
        let json = serde_json::to_string(&self.snapshot())?;
        self.services.store.save_snapshot(&self.run_id, tick, &json)?;
        log::debug!("tick={tick} snapshot saved");
        Ok(())
    }
}
