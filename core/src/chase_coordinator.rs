//! Chase coordinator: live pursuits between one enforcer and one target.
//!
//! This subsystem:
//!   1. Validates and starts chase sessions (staged, then committed once)
//!   2. Keeps the session table and both uniqueness indices in step
//!   3. Monitors every session on a fixed cadence and ends invalid ones
//!   4. Tracks combat timers and requests captures when the pair is close
//!
//! Execution: monitor every `monitor_interval_ticks`; reactions every routed event.
//! Depends on: WantedRegistry (via events only).

use crate::{
    config::{ChaseConfig, DetectionConfig},
    error::{SimError, SimResult},
    event::{ChaseEndReason, IncidentEvent},
    store::ChaseRecord,
    subsystem::{ui_logged, SimSubsystem, TickContext},
    types::{ActorId, SessionId, Tick},
    world::{Notice, ProgressKind},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaseSession {
    pub id:                SessionId,
    pub enforcer:          ActorId,
    pub target:            ActorId,
    pub started_at:        Tick,
    pub duration_budget:   Tick,
    pub combat_until:      Option<Tick>,
    pub last_warning_at:   Option<Tick>,
    pub capture_requested: bool,
}

impl ChaseSession {
    pub fn in_combat(&self, now: Tick) -> bool {
        self.combat_until.is_some_and(|until| now < until)
    }

    pub fn involves(&self, actor: &str) -> bool {
        self.enforcer == actor || self.target == actor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChaseRole {
    Enforcer,
    Target,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChaseRejection {
    #[error("cannot chase yourself")]
    SelfTarget,
    #[error("enforcer is not on duty")]
    NotOnDuty,
    #[error("target is protected")]
    TargetProtected,
    #[error("target is already being chased")]
    TargetAlreadyChased,
    #[error("enforcer is already in a chase")]
    AlreadyChasing,
    #[error("an actor is offline")]
    ActorOffline,
    #[error("actors are in different worlds")]
    DifferentWorld,
    #[error("target is {distance:.1} blocks away (max {max:.1})")]
    TooFar { distance: f64, max: f64 },
    #[error("target is in a restricted area")]
    NoChaseZone,
    #[error("chase index conflict")]
    IndexConflict,
    #[error("chase storage unavailable")]
    StorageUnavailable,
}

impl ChaseRejection {
    pub fn key(&self) -> &'static str {
        match self {
            Self::SelfTarget          => "chase.self_target",
            Self::NotOnDuty           => "chase.not_on_duty",
            Self::TargetProtected     => "chase.target_protected",
            Self::TargetAlreadyChased => "chase.target_already_chased",
            Self::AlreadyChasing      => "chase.already_chasing",
            Self::ActorOffline        => "chase.actor_offline",
            Self::DifferentWorld      => "chase.different_world",
            Self::TooFar { .. }       => "chase.too_far",
            Self::NoChaseZone         => "chase.no_chase_zone",
            Self::IndexConflict       => "chase.index_conflict",
            Self::StorageUnavailable  => "chase.storage_unavailable",
        }
    }
}

/// Session table plus the two uniqueness indices. All three change together.
#[derive(Debug, Default)]
pub struct ChaseTable {
    sessions:    BTreeMap<SessionId, ChaseSession>,
    by_enforcer: BTreeMap<ActorId, SessionId>,
    by_target:   BTreeMap<ActorId, SessionId>,
}

impl ChaseTable {
    fn commit(&mut self, session: ChaseSession) -> Result<(), ChaseRejection> {
        if self.by_enforcer.contains_key(&session.enforcer)
            || self.by_target.contains_key(&session.target)
            || self.sessions.contains_key(&session.id)
        {
            return Err(ChaseRejection::IndexConflict);
        }
        self.by_enforcer.insert(session.enforcer.clone(), session.id.clone());
        self.by_target.insert(session.target.clone(), session.id.clone());
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Option<ChaseSession> {
        let session = self.sessions.remove(id)?;
        if self.by_enforcer.get(&session.enforcer).is_some_and(|s| s == id) {
            self.by_enforcer.remove(&session.enforcer);
        }
        if self.by_target.get(&session.target).is_some_and(|s| s == id) {
            self.by_target.remove(&session.target);
        }
        Some(session)
    }

    /// Drop index entries that point at missing sessions, or at sessions
    /// the indexed actor takes no part in.
    fn integrity_sweep(&mut self, tick: Tick) -> usize {
        let sessions = &self.sessions;
        let mut dropped = 0;
        for (label, index) in [("enforcer", &mut self.by_enforcer), ("target", &mut self.by_target)] {
            index.retain(|actor, id| {
                let valid = sessions.get(id.as_str()).is_some_and(|s| s.involves(actor));
                if !valid {
                    log::warn!("tick={tick} chase: integrity: {label} index {actor} -> stale session {id}");
                    dropped += 1;
                }
                valid
            });
        }
        dropped
    }

    fn get(&self, id: &str) -> Option<&ChaseSession> {
        self.sessions.get(id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut ChaseSession> {
        self.sessions.get_mut(id)
    }

    fn id_for(&self, actor: &str) -> Option<&SessionId> {
        self.by_enforcer.get(actor).or_else(|| self.by_target.get(actor))
    }
}

pub struct ChaseCoordinator {
    config:    ChaseConfig,
    detection: DetectionConfig,
    table:     ChaseTable,
}

impl ChaseCoordinator {
    pub fn new(config: ChaseConfig, detection: DetectionConfig) -> Self {
        Self { config, detection, table: ChaseTable::default() }
    }

    // ── Queries ────────────────────────────────────────────────

    /// The session this actor takes part in, as enforcer or target.
    pub fn session_for(&self, actor: &str) -> Option<&ChaseSession> {
        self.table.id_for(actor).and_then(|id| self.table.get(id))
    }

    pub fn session(&self, id: &str) -> Option<&ChaseSession> {
        self.table.get(id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &ChaseSession> {
        self.table.sessions.values()
    }

    pub fn active_count(&self) -> usize {
        self.table.sessions.len()
    }

    pub fn role_of(&self, actor: &str) -> Option<ChaseRole> {
        if self.table.by_enforcer.contains_key(actor) {
            Some(ChaseRole::Enforcer)
        } else if self.table.by_target.contains_key(actor) {
            Some(ChaseRole::Target)
        } else {
            None
        }
    }

    pub fn is_fleeing(&self, actor: &str) -> bool {
        self.table.by_target.contains_key(actor)
    }

    pub fn is_chasing(&self, enforcer: &str, target: &str) -> bool {
        self.table
            .by_enforcer
            .get(enforcer)
            .and_then(|id| self.table.get(id))
            .is_some_and(|s| s.target == target)
    }

    /// Either actor is in a chase whose combat timer is still running.
    pub fn capture_blocked(&self, enforcer: &str, target: &str, now: Tick) -> bool {
        self.config.block_capture_during_combat
            && [enforcer, target]
                .iter()
                .filter_map(|actor| self.session_for(actor))
                .any(|s| s.in_combat(now))
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Validate, persist, then commit a new session.
    /// Returns the `ChaseStarted` event for routing.
    pub fn start(
        &mut self,
        enforcer: &str,
        target:   &str,
        ctx:      &mut TickContext<'_>,
    ) -> Result<IncidentEvent, ChaseRejection> {
        if enforcer == target {
            return Err(ChaseRejection::SelfTarget);
        }
        if !ctx.world.is_on_duty(enforcer) {
            return Err(ChaseRejection::NotOnDuty);
        }
        if ctx.world.is_protected(target) {
            log::warn!("tick={} policy: chase on protected {target} refused", ctx.tick);
            return Err(ChaseRejection::TargetProtected);
        }
        if self.table.by_target.contains_key(target) {
            return Err(ChaseRejection::TargetAlreadyChased);
        }
        if self.table.by_enforcer.contains_key(enforcer) {
            return Err(ChaseRejection::AlreadyChasing);
        }
        let (Some(ep), Some(tp)) = (ctx.world.locate(enforcer), ctx.world.locate(target)) else {
            return Err(ChaseRejection::ActorOffline);
        };
        if !ep.same_context(&tp) {
            return Err(ChaseRejection::DifferentWorld);
        }
        let distance = ep.distance_to(&tp);
        if distance > self.config.max_distance {
            return Err(ChaseRejection::TooFar { distance, max: self.config.max_distance });
        }
        if ctx.world.is_in_zone(target, &self.config.no_chase_zones) {
            return Err(ChaseRejection::NoChaseZone);
        }

        // Stage.
        let session = ChaseSession {
            id:                uuid::Builder::from_random_bytes(ctx.rng.next_bytes16())
                .into_uuid()
                .to_string(),
            enforcer:          enforcer.to_string(),
            target:            target.to_string(),
            started_at:        ctx.tick,
            duration_budget:   self.config.duration_budget_ticks(),
            combat_until:      None,
            last_warning_at:   None,
            capture_requested: false,
        };

        // Persist before anything becomes visible.
        let record = ChaseRecord {
            session_id:   session.id.clone(),
            enforcer:     session.enforcer.clone(),
            target:       session.target.clone(),
            started_tick: ctx.tick,
        };
        if let Err(e) = ctx.store.record_chase(&record) {
            log::warn!("tick={} chase: could not record {enforcer} -> {target}: {e}", ctx.tick);
            return Err(ChaseRejection::StorageUnavailable);
        }

        // Commit.
        let id = session.id.clone();
        if let Err(conflict) = self.table.commit(session) {
            if let Err(e) = ctx.store.close_chase(&id, ctx.tick, conflict.key()) {
                log::warn!("tick={} chase: could not close conflicting record {id}: {e}", ctx.tick);
            }
            return Err(conflict);
        }

        let progress = 1.0 - (distance / self.config.max_distance).clamp(0.0, 1.0);
        let label = format!("{distance:.0} blocks");
        let notice = Notice::ChaseStarted { enforcer: enforcer.to_string(), target: target.to_string() };
        for actor in [enforcer, target] {
            ui_logged(ctx.world.show_progress(actor, ProgressKind::Chase, progress, &label), ctx.tick, "chase bar");
            ui_logged(ctx.world.notify(actor, &notice), ctx.tick, "chase started notice");
        }

        log::info!("tick={} chase: {enforcer} -> {target} started ({id})", ctx.tick);
        Ok(IncidentEvent::ChaseStarted {
            tick: ctx.tick,
            session_id: id,
            enforcer: enforcer.to_string(),
            target: target.to_string(),
        })
    }

    /// End a session. Returns `None` if it was already gone.
    pub fn end(
        &mut self,
        id:     &str,
        reason: ChaseEndReason,
        ctx:    &mut TickContext<'_>,
    ) -> Option<IncidentEvent> {
        let session = self.table.remove(id)?;

        if let Err(e) = ctx.store.close_chase(id, ctx.tick, reason.key()) {
            log::warn!("tick={} chase: could not close record {id}: {e}", ctx.tick);
        }
        let notice = Notice::ChaseEnded { reason: reason.key().to_string() };
        for actor in [&session.enforcer, &session.target] {
            ui_logged(ctx.world.hide_progress(actor, ProgressKind::Chase), ctx.tick, "hide chase bar");
            ui_logged(ctx.world.notify(actor, &notice), ctx.tick, "chase ended notice");
        }

        log::info!(
            "tick={} chase: {} -> {} ended: {reason}",
            ctx.tick, session.enforcer, session.target
        );
        Some(IncidentEvent::ChaseEnded {
            tick: ctx.tick,
            session_id: session.id,
            enforcer: session.enforcer,
            target: session.target,
            reason,
        })
    }

    /// End whichever session this actor takes part in.
    pub fn end_for_actor(
        &mut self,
        actor:  &str,
        reason: ChaseEndReason,
        ctx:    &mut TickContext<'_>,
    ) -> Option<IncidentEvent> {
        let id = self.table.id_for(actor)?.clone();
        self.end(&id, reason, ctx)
    }

    // ── Monitor ────────────────────────────────────────────────

    /// Evaluate every session once. A failing session is force-ended and
    /// the sweep moves on.
    pub fn monitor(&mut self, ctx: &mut TickContext<'_>) -> Vec<IncidentEvent> {
        self.table.integrity_sweep(ctx.tick);

        let ids: Vec<SessionId> = self.table.sessions.keys().cloned().collect();
        let mut events = Vec::new();
        for id in ids {
            match self.evaluate(&id, ctx) {
                Ok(produced) => events.extend(produced),
                Err(e) => {
                    let reason = if e.is_integrity() {
                        ChaseEndReason::InvalidSession
                    } else {
                        ChaseEndReason::InternalError
                    };
                    log::warn!("tick={} chase: session {id} failed evaluation: {e}", ctx.tick);
                    events.extend(self.end(&id, reason, ctx));
                }
            }
        }
        events
    }

    fn evaluate(&mut self, id: &str, ctx: &mut TickContext<'_>) -> SimResult<Vec<IncidentEvent>> {
        let Some(session) = self.table.get(id).cloned() else {
            return Ok(Vec::new());
        };
        if session.enforcer == session.target {
            return Err(SimError::integrity(format!("session {id} pairs {} with itself", session.enforcer)));
        }

        let (ep, tp) = match (ctx.world.locate(&session.enforcer), ctx.world.locate(&session.target)) {
            (Some(ep), Some(tp)) => (ep, tp),
            _ => return Ok(self.finish(id, ChaseEndReason::Offline, ctx)),
        };
        if !ep.same_context(&tp) {
            return Ok(self.finish(id, ChaseEndReason::WorldsDiverged, ctx));
        }
        let distance = ep.distance_to(&tp);
        if !distance.is_finite() {
            return Err(SimError::Other(anyhow::anyhow!("non-finite distance in session {id}")));
        }
        if distance > self.config.max_distance {
            return Ok(self.finish(id, ChaseEndReason::TooFar, ctx));
        }
        if ctx.world.is_in_zone(&session.target, &self.config.no_chase_zones) {
            return Ok(self.finish(id, ChaseEndReason::RestrictedArea, ctx));
        }
        if ctx.tick >= session.started_at + session.duration_budget {
            return Ok(self.finish(id, ChaseEndReason::TimeExpired, ctx));
        }

        let blocked = self.config.block_capture_during_combat && session.in_combat(ctx.tick);
        if let Some(capture_distance) = self.config.auto_capture_distance {
            if distance <= capture_distance {
                if !session.capture_requested && !blocked {
                    if let Some(s) = self.table.get_mut(id) {
                        s.capture_requested = true;
                    }
                    log::debug!(
                        "tick={} chase: {} within {distance:.1} of {}, requesting capture",
                        ctx.tick, session.enforcer, session.target
                    );
                    return Ok(vec![IncidentEvent::CaptureRequested {
                        tick: ctx.tick,
                        enforcer: session.enforcer,
                        target: session.target,
                    }]);
                }
            } else if session.capture_requested {
                if let Some(s) = self.table.get_mut(id) {
                    s.capture_requested = false;
                }
            }
        }

        let progress = 1.0 - (distance / self.config.max_distance).clamp(0.0, 1.0);
        let label = format!("{distance:.0} blocks");
        for actor in [&session.enforcer, &session.target] {
            ui_logged(ctx.world.show_progress(actor, ProgressKind::Chase, progress, &label), ctx.tick, "chase bar");
        }

        if distance > self.config.warning_distance {
            let cooled = session
                .last_warning_at
                .is_none_or(|at| ctx.tick >= at + self.config.warning_cooldown_ticks());
            if cooled {
                let warning = Notice::ChaseDistanceWarning { distance, max_distance: self.config.max_distance };
                ui_logged(ctx.world.notify(&session.enforcer, &warning), ctx.tick, "distance warning");
                if let Some(s) = self.table.get_mut(id) {
                    s.last_warning_at = Some(ctx.tick);
                }
            }
        }
        Ok(Vec::new())
    }

    fn finish(&mut self, id: &str, reason: ChaseEndReason, ctx: &mut TickContext<'_>) -> Vec<IncidentEvent> {
        self.end(id, reason, ctx).into_iter().collect()
    }

    // ── Combat ─────────────────────────────────────────────────

    /// Start or refresh combat timers for any session either party is in.
    pub fn on_hostile_act(
        &mut self,
        attacker: &str,
        victim:   &str,
        ctx:      &mut TickContext<'_>,
    ) -> Vec<IncidentEvent> {
        let until = ctx.tick + self.config.combat_ticks();
        let mut ids: Vec<SessionId> = [attacker, victim]
            .iter()
            .filter_map(|actor| self.table.id_for(actor).cloned())
            .collect();
        ids.dedup();

        let mut events = Vec::new();
        for id in ids {
            if let Some(session) = self.table.get_mut(&id) {
                session.combat_until = Some(until);
                events.push(IncidentEvent::CombatTimerRefreshed { tick: ctx.tick, session_id: id, until });
            }
        }

        if self.detection.chase_on_assault
            && ctx.world.is_on_duty(victim)
            && !ctx.world.is_on_duty(attacker)
            && !self.is_chasing(victim, attacker)
        {
            events.push(IncidentEvent::ChaseRequested {
                tick: ctx.tick,
                enforcer: victim.to_string(),
                target: attacker.to_string(),
                cause: "assault".into(),
            });
        }
        events
    }
}

impl SimSubsystem for ChaseCoordinator {
    fn name(&self) -> &'static str {
        "chase"
    }

    fn react(
        &mut self,
        event: &IncidentEvent,
        ctx:   &mut TickContext<'_>,
    ) -> SimResult<Vec<IncidentEvent>> {
        let mut out = Vec::new();
        match event {
            IncidentEvent::ChaseRequested { enforcer, target, cause, .. } => {
                match self.start(enforcer, target, ctx) {
                    Ok(started) => out.push(started),
                    Err(rejection) => {
                        log::info!(
                            "tick={} chase: {enforcer} -> {target} ({cause}) rejected: {rejection}",
                            ctx.tick
                        );
                        let notice = Notice::ChaseRejected { reason: rejection.key().to_string() };
                        ui_logged(ctx.world.notify(enforcer, &notice), ctx.tick, "chase rejected notice");
                    }
                }
            }

            IncidentEvent::CustodyCompleted { target, .. } => {
                if let Some(id) = self.table.by_target.get(target).cloned() {
                    out.extend(self.end(&id, ChaseEndReason::Captured, ctx));
                }
            }

            IncidentEvent::CustodyCancelled { target, .. } => {
                if let Some(id) = self.table.by_target.get(target).cloned() {
                    if let Some(session) = self.table.get_mut(&id) {
                        session.capture_requested = false;
                    }
                }
            }

            IncidentEvent::HostileActReported { attacker, victim, .. } => {
                out.extend(self.on_hostile_act(attacker, victim, ctx));
            }

            _ => {}
        }
        Ok(out)
    }
}
