//! Custody controller: timed capture of a target by an enforcer.
//!
//! This subsystem:
//!   1. Starts jail countdowns after validating range, duty and policy
//!   2. Evaluates every countdown each tick: disconnects, flee detection,
//!      range, the per-second countdown and the final warning
//!   3. Runs the escape minigame for targets not already under pursuit
//!   4. Issues the external jailing effect and applies its completion
//!      on a later tick
//!
//! Execution: every tick; reactions every routed event.
//! Depends on: WantedRegistry (reads level_of), MinigameEngine (owned).
//! Chase requests leave as events; custody never touches chase state.

use crate::{
    clock::{secs_to_ticks, TICKS_PER_SECOND},
    config::{CustodyConfig, EscapeWanted, MinigameConfig},
    error::SimResult,
    event::{CustodyCancelReason, IncidentEvent, WantedChange},
    minigame::{MinigameEngine, MinigameVerdict},
    store::Counter,
    subsystem::{ui_logged, SimSubsystem, TickContext},
    types::{ActorId, Position, Tick},
    wanted_registry::WantedRegistry,
    world::{CompletionSender, CustodyCompletion, CustodyRequest, JailTicket, Notice, ProgressKind},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::mpsc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JailCountdownSession {
    pub enforcer:            ActorId,
    pub target:              ActorId,
    pub reason:              String,
    pub target_origin:       Position,
    pub enforcer_origin:     Position,
    pub skip_flee_detection: bool,
    pub started_at:          Tick,
    pub remaining_secs:      u32,
    pub ticks_into_second:   u32,
}

/// A countdown that reached zero and is waiting on the jailing effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingJailing {
    pub ticket:        JailTicket,
    pub enforcer:      ActorId,
    pub target:        ActorId,
    pub duration_secs: u64,
    pub reason:        String,
    pub issued_at:     Tick,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CustodyRejection {
    #[error("cannot take yourself into custody")]
    SelfTarget,
    #[error("target is already in custody")]
    AlreadyInCustody,
    #[error("target is awaiting jailing")]
    AwaitingJailing,
    #[error("target is protected")]
    TargetProtected,
    #[error("enforcer is not on duty")]
    NotOnDuty,
    #[error("an actor is offline")]
    ActorOffline,
    #[error("actors are in different worlds")]
    DifferentWorld,
    #[error("target is {distance:.1} blocks away (radius {radius:.1})")]
    OutOfRange { distance: f64, radius: f64 },
    #[error("capture blocked while in combat")]
    CaptureBlocked,
}

impl CustodyRejection {
    pub fn key(&self) -> &'static str {
        match self {
            Self::SelfTarget         => "custody.self_target",
            Self::AlreadyInCustody   => "custody.already_in_custody",
            Self::AwaitingJailing    => "custody.awaiting_jailing",
            Self::TargetProtected    => "custody.target_protected",
            Self::NotOnDuty          => "custody.not_on_duty",
            Self::ActorOffline       => "custody.actor_offline",
            Self::DifferentWorld     => "custody.different_world",
            Self::OutOfRange { .. }  => "custody.out_of_range",
            Self::CaptureBlocked     => "custody.capture_blocked",
        }
    }
}

/// What the chase side knows about this pair, supplied by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PursuitContext {
    /// The enforcer is already chasing this target.
    pub already_pursuing: bool,
    /// A running combat timer forbids capture.
    pub capture_blocked:  bool,
}

pub struct CustodyController {
    config:         CustodyConfig,
    minigame_cfg:   MinigameConfig,
    minigame:       MinigameEngine,
    sessions:       BTreeMap<ActorId, JailCountdownSession>,
    pending:        BTreeMap<JailTicket, PendingJailing>,
    next_ticket:    JailTicket,
    completions_tx: mpsc::Sender<CustodyCompletion>,
    completions_rx: mpsc::Receiver<CustodyCompletion>,
}

impl CustodyController {
    pub fn new(config: CustodyConfig, minigame_cfg: MinigameConfig) -> Self {
        let (completions_tx, completions_rx) = mpsc::channel();
        Self {
            config,
            minigame: MinigameEngine::new(minigame_cfg.clone()),
            minigame_cfg,
            sessions: BTreeMap::new(),
            pending: BTreeMap::new(),
            next_ticket: 1,
            completions_tx,
            completions_rx,
        }
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn is_in_countdown(&self, target: &str) -> bool {
        self.sessions.contains_key(target)
    }

    pub fn session(&self, target: &str) -> Option<&JailCountdownSession> {
        self.sessions.get(target)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &JailCountdownSession> {
        self.sessions.values()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingJailing> {
        self.pending.values()
    }

    pub fn is_awaiting_jailing(&self, target: &str) -> bool {
        self.pending.values().any(|p| p.target == target)
    }

    pub fn minigame(&self) -> &MinigameEngine {
        &self.minigame
    }

    // ── Lifecycle ──────────────────────────────────────────────

    pub fn start(
        &mut self,
        enforcer: &str,
        target:   &str,
        reason:   &str,
        pursuit:  PursuitContext,
        ctx:      &mut TickContext<'_>,
    ) -> Result<Vec<IncidentEvent>, CustodyRejection> {
        if enforcer == target {
            return Err(CustodyRejection::SelfTarget);
        }
        if self.sessions.contains_key(target) {
            return Err(CustodyRejection::AlreadyInCustody);
        }
        if self.is_awaiting_jailing(target) {
            return Err(CustodyRejection::AwaitingJailing);
        }
        if ctx.world.is_protected(target) {
            log::warn!("tick={} policy: custody of protected {target} refused", ctx.tick);
            return Err(CustodyRejection::TargetProtected);
        }
        if !ctx.world.is_on_duty(enforcer) {
            return Err(CustodyRejection::NotOnDuty);
        }
        let (Some(ep), Some(tp)) = (ctx.world.locate(enforcer), ctx.world.locate(target)) else {
            return Err(CustodyRejection::ActorOffline);
        };
        if !ep.same_context(&tp) {
            return Err(CustodyRejection::DifferentWorld);
        }
        let distance = ep.distance_to(&tp);
        if distance > self.config.radius {
            return Err(CustodyRejection::OutOfRange { distance, radius: self.config.radius });
        }
        if pursuit.capture_blocked {
            return Err(CustodyRejection::CaptureBlocked);
        }

        let seconds = self.config.countdown_secs;
        let skip_flee_detection = pursuit.already_pursuing;
        self.sessions.insert(
            target.to_string(),
            JailCountdownSession {
                enforcer: enforcer.to_string(),
                target: target.to_string(),
                reason: reason.to_string(),
                target_origin: tp,
                enforcer_origin: ep,
                skip_flee_detection,
                started_at: ctx.tick,
                remaining_secs: seconds,
                ticks_into_second: 0,
            },
        );

        let notice = Notice::CustodyStarted { enforcer: enforcer.to_string(), seconds, reason: reason.to_string() };
        let label = format!("{seconds}s");
        for actor in [enforcer, target] {
            ui_logged(ctx.world.show_progress(actor, ProgressKind::Custody, 1.0, &label), ctx.tick, "custody bar");
            ui_logged(ctx.world.notify(actor, &notice), ctx.tick, "custody started notice");
        }

        let mut events = vec![IncidentEvent::CustodyStarted {
            tick: ctx.tick,
            enforcer: enforcer.to_string(),
            target: target.to_string(),
            reason: reason.to_string(),
            seconds,
            skip_flee_detection,
        }];
        if self.minigame.enabled() && !skip_flee_detection {
            let ends_at = ctx.tick + secs_to_ticks(f64::from(seconds));
            self.minigame.start(target, ends_at, ctx);
            events.push(IncidentEvent::MinigameStarted { tick: ctx.tick, target: target.to_string() });
        }

        log::info!(
            "tick={} custody: {enforcer} holding {target} for {seconds}s ({reason}){}",
            ctx.tick,
            if skip_flee_detection { " [pursuit]" } else { "" }
        );
        Ok(events)
    }

    /// Cancel the countdown on `target`. Returns `None` if none was running.
    pub fn cancel(
        &mut self,
        target: &str,
        reason: CustodyCancelReason,
        ctx:    &mut TickContext<'_>,
    ) -> Option<IncidentEvent> {
        let session = self.sessions.remove(target)?;
        self.minigame.stop(target);

        let notice = Notice::CustodyCancelled { reason: reason.key().to_string() };
        for actor in [&session.target, &session.enforcer] {
            ui_logged(ctx.world.hide_progress(actor, ProgressKind::Custody), ctx.tick, "hide custody bar");
            ui_logged(ctx.world.notify(actor, &notice), ctx.tick, "custody cancelled notice");
        }

        log::info!(
            "tick={} custody: {} on {} cancelled: {reason}",
            ctx.tick, session.enforcer, session.target
        );
        Some(IncidentEvent::CustodyCancelled {
            tick: ctx.tick,
            enforcer: session.enforcer,
            target: session.target,
            reason,
        })
    }

    /// Cancel every countdown this actor takes part in.
    pub fn cancel_for_actor(
        &mut self,
        actor:  &str,
        reason: CustodyCancelReason,
        ctx:    &mut TickContext<'_>,
    ) -> Vec<IncidentEvent> {
        let targets: Vec<ActorId> = self
            .sessions
            .values()
            .filter(|s| s.target == actor || s.enforcer == actor)
            .map(|s| s.target.clone())
            .collect();
        targets
            .iter()
            .filter_map(|target| self.cancel(target, reason, ctx))
            .collect()
    }

    // ── Tick ───────────────────────────────────────────────────

    pub fn tick(&mut self, ctx: &mut TickContext<'_>, wanted: &WantedRegistry) -> Vec<IncidentEvent> {
        let mut events = Vec::new();

        while let Ok(completion) = self.completions_rx.try_recv() {
            events.extend(self.apply_completion(completion, ctx));
        }

        let targets: Vec<ActorId> = self.sessions.keys().cloned().collect();
        for target in targets {
            events.extend(self.evaluate(&target, ctx, wanted));
        }

        self.minigame.tick(ctx);
        events
    }

    fn evaluate(
        &mut self,
        target: &str,
        ctx:    &mut TickContext<'_>,
        wanted: &WantedRegistry,
    ) -> Vec<IncidentEvent> {
        let Some(session) = self.sessions.get(target).cloned() else {
            return Vec::new();
        };

        let (Some(ep), Some(tp)) = (ctx.world.locate(&session.enforcer), ctx.world.locate(target)) else {
            return self.cancel(target, CustodyCancelReason::Disconnected, ctx).into_iter().collect();
        };
        let separation = ep.separation(&tp);
        if separation.is_nan() {
            log::error!("tick={} custody: {target} has no usable position, ending countdown", ctx.tick);
            return self.cancel(target, CustodyCancelReason::InternalError, ctx).into_iter().collect();
        }

        if !session.skip_flee_detection {
            let relative = tp.separation(&session.target_origin) - ep.separation(&session.enforcer_origin);
            if relative >= self.config.flee_threshold + 1.5 || separation > self.config.radius * 1.2 {
                return self.flee(target, relative, false, ctx);
            }
        }

        if separation > self.config.radius {
            return self.cancel(target, CustodyCancelReason::EnforcerMovedAway, ctx).into_iter().collect();
        }

        let Some(live) = self.sessions.get_mut(target) else {
            return Vec::new();
        };
        live.ticks_into_second += 1;
        if live.ticks_into_second < TICKS_PER_SECOND as u32 {
            return Vec::new();
        }
        live.ticks_into_second = 0;
        live.remaining_secs = live.remaining_secs.saturating_sub(1);
        let remaining = live.remaining_secs;

        if remaining == 0 {
            return self.issue_jailing(target, ctx, wanted);
        }

        let total = self.config.countdown_secs.max(1);
        let label = format!("{remaining}s");
        for actor in [&session.enforcer, &session.target] {
            ui_logged(
                ctx.world.show_progress(actor, ProgressKind::Custody, f64::from(remaining) / f64::from(total), &label),
                ctx.tick,
                "custody bar",
            );
        }
        if remaining <= self.config.final_warning_secs {
            let warning = Notice::CustodyFinalWarning { remaining };
            for actor in [&session.enforcer, &session.target] {
                ui_logged(ctx.world.notify(actor, &warning), ctx.tick, "final warning");
            }
        }
        log::debug!("tick={} custody: {target} {remaining}s remaining", ctx.tick);
        Vec::new()
    }

    /// Abort a countdown because the target ran, escalating to a chase.
    fn flee(
        &mut self,
        target:   &str,
        relative: f64,
        forced:   bool,
        ctx:      &mut TickContext<'_>,
    ) -> Vec<IncidentEvent> {
        let Some(enforcer) = self.sessions.get(target).map(|s| s.enforcer.clone()) else {
            return Vec::new();
        };

        log::info!(
            "tick={} custody: {target} fled {enforcer} (relative {relative:.2}{})",
            ctx.tick,
            if forced { ", forced" } else { "" }
        );
        let mut events = vec![IncidentEvent::FleeDetected {
            tick: ctx.tick,
            enforcer: enforcer.clone(),
            target: target.to_string(),
            relative_movement: relative,
            forced,
        }];
        events.extend(self.cancel(target, CustodyCancelReason::TargetFled, ctx));
        events.push(IncidentEvent::WantedChangeRequested {
            tick: ctx.tick,
            actor: target.to_string(),
            change: WantedChange::Increase { delta: self.config.flee_wanted_delta },
            reason: "fled custody".into(),
        });
        events.push(IncidentEvent::ChaseRequested {
            tick: ctx.tick,
            enforcer,
            target: target.to_string(),
            cause: "fled custody".into(),
        });
        events
    }

    fn issue_jailing(
        &mut self,
        target: &str,
        ctx:    &mut TickContext<'_>,
        wanted: &WantedRegistry,
    ) -> Vec<IncidentEvent> {
        let Some(session) = self.sessions.remove(target) else {
            return Vec::new();
        };
        self.minigame.stop(target);
        for actor in [&session.enforcer, &session.target] {
            ui_logged(ctx.world.hide_progress(actor, ProgressKind::Custody), ctx.tick, "hide custody bar");
        }

        let wanted_level = wanted.level_of(target);
        let duration_secs = self.config.jail_secs_for(wanted_level);
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending.insert(
            ticket,
            PendingJailing {
                ticket,
                enforcer: session.enforcer.clone(),
                target: session.target.clone(),
                duration_secs,
                reason: session.reason.clone(),
                issued_at: ctx.tick,
            },
        );

        log::info!(
            "tick={} custody: jailing {target} for {duration_secs}s (level {wanted_level}, ticket {ticket})",
            ctx.tick
        );
        ctx.world.apply(
            CustodyRequest {
                ticket,
                enforcer: session.enforcer.clone(),
                target: session.target.clone(),
                duration_secs,
                reason: session.reason,
            },
            CompletionSender::new(self.completions_tx.clone()),
        );

        vec![IncidentEvent::JailingIssued {
            tick: ctx.tick,
            ticket,
            enforcer: session.enforcer,
            target: session.target,
            wanted_level,
            duration_secs,
        }]
    }

    fn apply_completion(&mut self, completion: CustodyCompletion, ctx: &mut TickContext<'_>) -> Vec<IncidentEvent> {
        let Some(jailing) = self.pending.remove(&completion.ticket) else {
            log::warn!("tick={} custody: integrity: completion for unknown ticket {}", ctx.tick, completion.ticket);
            return Vec::new();
        };
        let PendingJailing { enforcer, target, duration_secs, reason, .. } = jailing;

        if !completion.accepted {
            log::warn!("tick={} custody: jailing of {target} by {enforcer} was rejected", ctx.tick);
            ui_logged(
                ctx.world.notify(&enforcer, &Notice::CustodyFailed { target: target.clone() }),
                ctx.tick,
                "custody failed notice",
            );
            return vec![IncidentEvent::CustodyFailed { tick: ctx.tick, enforcer, target }];
        }

        match ctx.world.forfeit_contraband(&target) {
            Ok(0) => {}
            Ok(taken) => log::debug!("tick={} custody: confiscated {taken} items from {target}", ctx.tick),
            Err(e) => log::warn!("tick={} custody: contraband forfeiture for {target} failed: {e}", ctx.tick),
        }
        for (actor, counter) in [
            (&enforcer, Counter::Arrests),
            (&target, Counter::TimesJailed),
            (&target, Counter::Violations),
        ] {
            if let Err(e) = ctx.store.increment_counter(actor, counter) {
                log::warn!("tick={} custody: {} counter for {actor} not saved: {e}", ctx.tick, counter.column_key());
            }
        }

        ui_logged(
            ctx.world.notify(&target, &Notice::Jailed { duration_secs, reason }),
            ctx.tick,
            "jailed notice",
        );
        let announcement = Notice::ArrestAnnounced {
            enforcer: enforcer.clone(),
            target: target.clone(),
            duration_secs,
        };
        let mut audience = ctx.world.on_duty_actors();
        if !audience.contains(&enforcer) {
            audience.push(enforcer.clone());
        }
        for actor in &audience {
            ui_logged(ctx.world.notify(actor, &announcement), ctx.tick, "arrest announcement");
        }

        log::info!("tick={} custody: {target} jailed by {enforcer} for {duration_secs}s", ctx.tick);
        vec![IncidentEvent::CustodyCompleted { tick: ctx.tick, enforcer, target, duration_secs }]
    }

    // ── Minigame input ─────────────────────────────────────────

    /// Judge the target's key press. Empty when no minigame is running.
    pub fn handle_input(&mut self, target: &str, ctx: &mut TickContext<'_>) -> Vec<IncidentEvent> {
        let Some(enforcer) = self.sessions.get(target).map(|s| s.enforcer.clone()) else {
            return Vec::new();
        };
        let Some(verdict) = self.minigame.input(target) else {
            return Vec::new();
        };

        match verdict {
            MinigameVerdict::Hit => {
                let change = match self.minigame_cfg.escape_wanted {
                    EscapeWanted::Clear => WantedChange::Clear,
                    EscapeWanted::Bonus { levels } => WantedChange::Increase { delta: levels },
                };
                ui_logged(ctx.world.notify(target, &Notice::MinigameEscaped), ctx.tick, "escape notice");

                let mut events = vec![IncidentEvent::MinigameEscaped {
                    tick: ctx.tick,
                    enforcer: enforcer.clone(),
                    target: target.to_string(),
                }];
                events.extend(self.cancel(target, CustodyCancelReason::Escaped, ctx));
                events.push(IncidentEvent::WantedChangeRequested {
                    tick: ctx.tick,
                    actor: target.to_string(),
                    change,
                    reason: "escaped custody".into(),
                });
                if self.minigame_cfg.escape_starts_chase {
                    events.push(IncidentEvent::ChaseRequested {
                        tick: ctx.tick,
                        enforcer,
                        target: target.to_string(),
                        cause: "escaped custody".into(),
                    });
                }
                events
            }

            MinigameVerdict::Miss { misses, threshold_reached } => {
                let notice = Notice::MinigameMiss { misses, threshold: self.minigame_cfg.miss_threshold };
                ui_logged(ctx.world.notify(target, &notice), ctx.tick, "miss notice");
                let mut events = vec![IncidentEvent::MinigameMissed {
                    tick: ctx.tick,
                    target: target.to_string(),
                    misses,
                }];
                if threshold_reached {
                    ctx.world.impair_movement(target, self.minigame_cfg.impair_secs);
                    events.extend(self.flee(target, 0.0, true, ctx));
                }
                events
            }
        }
    }
}

impl SimSubsystem for CustodyController {
    fn name(&self) -> &'static str {
        "custody"
    }

    fn react(
        &mut self,
        event: &IncidentEvent,
        ctx:   &mut TickContext<'_>,
    ) -> SimResult<Vec<IncidentEvent>> {
        let mut out = Vec::new();
        if let IncidentEvent::CaptureRequested { enforcer, target, .. } = event {
            // The monitor only requests a capture for its own pursuit
            // after checking the combat timer.
            let pursuit = PursuitContext { already_pursuing: true, capture_blocked: false };
            match self.start(enforcer, target, "captured during chase", pursuit, ctx) {
                Ok(started) => out.extend(started),
                Err(rejection) => {
                    log::info!("tick={} custody: capture of {target} by {enforcer} rejected: {rejection}", ctx.tick);
                    let notice = Notice::CustodyRejected { reason: rejection.key().to_string() };
                    ui_logged(ctx.world.notify(enforcer, &notice), ctx.tick, "custody rejected notice");
                }
            }
        }
        Ok(out)
    }
}
