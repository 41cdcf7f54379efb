//! Wanted registry: per-actor legal jeopardy.
//!
//! This subsystem:
//!   1. Holds one WantedStatus per actor, created lazily on first offence
//!   2. Clamps every change to [0, max_level]; level 0 means "no status"
//!   3. Refuses changes for protected or on-duty actors
//!   4. Sweeps expired statuses on a fixed cadence
//!   5. Mirrors every transition to the UI (progress + glow) and storage
//!
//! Execution: sweep every `sweep_interval_ticks`; reactions every routed event.
//! Depends on: none. Other subsystems request changes via
//! `WantedChangeRequested`, and custody reads `level_of`.

use crate::{
    clock::{secs_to_ticks, TICKS_PER_SECOND},
    config::{DetectionConfig, WantedConfig},
    error::SimResult,
    event::{IncidentEvent, WantedChange},
    store::{Counter, StoredWanted},
    subsystem::{ui_logged, SimSubsystem, TickContext},
    types::{ActorId, Tick},
    world::{Notice, ProgressKind},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WantedStatus {
    pub level:      u32,
    pub expires_at: Tick,
    pub reason:     String,
}

impl WantedStatus {
    fn remaining_secs(&self, now: Tick) -> u64 {
        self.expires_at.saturating_sub(now).div_ceil(TICKS_PER_SECOND)
    }
}

pub struct WantedRegistry {
    config:    WantedConfig,
    detection: DetectionConfig,
    statuses:  BTreeMap<ActorId, WantedStatus>,
}

impl WantedRegistry {
    pub fn new(config: WantedConfig, detection: DetectionConfig) -> Self {
        Self { config, detection, statuses: BTreeMap::new() }
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn level_of(&self, actor: &str) -> u32 {
        self.statuses.get(actor).map(|s| s.level).unwrap_or(0)
    }

    pub fn status_of(&self, actor: &str) -> Option<&WantedStatus> {
        self.statuses.get(actor)
    }

    pub fn statuses(&self) -> impl Iterator<Item = (&ActorId, &WantedStatus)> {
        self.statuses.iter()
    }

    pub fn active_count(&self) -> usize {
        self.statuses.len()
    }

    // ── Mutation ───────────────────────────────────────────────

    /// Set an actor's level outright. Returns `None` when nothing changed
    /// (protected or on-duty actor, or clearing an actor with no status).
    /// The policy applies to level 0 too; `clear` and the internal clears
    /// (expiry, custody) bypass it so a stale status can always be removed.
    pub fn set_level(
        &mut self,
        actor:  &str,
        level:  u32,
        reason: &str,
        ctx:    &mut TickContext<'_>,
    ) -> Option<IncidentEvent> {
        let level = level.min(self.config.max_level);
        if ctx.world.is_protected(actor) {
            log::warn!(
                "tick={} policy: {actor} is protected; wanted level {level} ({reason}) ignored",
                ctx.tick
            );
            return None;
        }
        if ctx.world.is_on_duty(actor) {
            log::debug!("tick={} wanted: {actor} is on duty; level {level} ignored", ctx.tick);
            return None;
        }
        if level == 0 {
            return self.clear_with_reason(actor, reason, ctx);
        }

        let old_level = self.level_of(actor);
        let ttl = secs_to_ticks(self.config.duration_secs_for(level) as f64);
        self.statuses.insert(
            actor.to_string(),
            WantedStatus {
                level,
                expires_at: ctx.tick + ttl,
                reason: reason.to_string(),
            },
        );

        self.persist(actor, ctx);
        self.present(actor, old_level, level, reason, ctx);

        log::info!("tick={} wanted: {actor} {old_level} -> {level} ({reason})", ctx.tick);
        Some(IncidentEvent::WantedLevelChanged {
            tick: ctx.tick,
            actor: actor.to_string(),
            old_level,
            new_level: level,
            reason: reason.to_string(),
        })
    }

    /// Raise an actor's level by `delta`, never past the ceiling.
    pub fn increase(
        &mut self,
        actor:  &str,
        delta:  u32,
        reason: &str,
        ctx:    &mut TickContext<'_>,
    ) -> Option<IncidentEvent> {
        let current = self.level_of(actor);
        let next = current.saturating_add(delta).min(self.config.max_level);
        if next == current {
            return None;
        }
        self.set_level(actor, next, reason, ctx)
    }

    /// Remove an actor's status. Idempotent.
    pub fn clear(&mut self, actor: &str, ctx: &mut TickContext<'_>) -> Option<IncidentEvent> {
        self.clear_with_reason(actor, "cleared", ctx)
    }

    fn clear_with_reason(
        &mut self,
        actor:  &str,
        reason: &str,
        ctx:    &mut TickContext<'_>,
    ) -> Option<IncidentEvent> {
        let old = self.statuses.remove(actor)?;

        if let Err(e) = ctx.store.delete_wanted(actor) {
            log::warn!("tick={} wanted: could not delete stored status for {actor}: {e}", ctx.tick);
        }
        ui_logged(ctx.world.hide_progress(actor, ProgressKind::Wanted), ctx.tick, "hide wanted bar");
        if old.level >= self.config.visibility_threshold {
            let viewers = ctx.world.on_duty_actors();
            ui_logged(ctx.world.set_glow(actor, false, &viewers), ctx.tick, "remove glow");
        }
        ui_logged(ctx.world.notify(actor, &Notice::WantedCleared), ctx.tick, "wanted cleared notice");

        log::info!("tick={} wanted: {actor} cleared from {} ({reason})", ctx.tick, old.level);
        Some(IncidentEvent::WantedLevelChanged {
            tick: ctx.tick,
            actor: actor.to_string(),
            old_level: old.level,
            new_level: 0,
            reason: reason.to_string(),
        })
    }

    /// Clear every status whose expiry has passed, then re-send the glow
    /// for the rest so enforcers who came on duty since can see it.
    pub fn sweep(&mut self, ctx: &mut TickContext<'_>) -> Vec<IncidentEvent> {
        let expired: Vec<(ActorId, u32)> = self
            .statuses
            .iter()
            .filter(|(_, s)| ctx.tick >= s.expires_at)
            .map(|(actor, s)| (actor.clone(), s.level))
            .collect();

        let mut events = Vec::new();
        for (actor, level) in expired {
            events.push(IncidentEvent::WantedExpired {
                tick: ctx.tick,
                actor: actor.clone(),
                level,
            });
            events.extend(self.clear_with_reason(&actor, "expired", ctx));
        }

        let threshold = self.config.visibility_threshold;
        let glowing: Vec<ActorId> = self
            .statuses
            .iter()
            .filter(|(_, s)| s.level >= threshold)
            .map(|(actor, _)| actor.clone())
            .collect();
        if !glowing.is_empty() {
            let viewers = ctx.world.on_duty_actors();
            for actor in glowing {
                ui_logged(ctx.world.set_glow(&actor, true, &viewers), ctx.tick, "refresh glow");
            }
        }
        events
    }

    /// Reload a persisted status when an actor joins.
    pub fn restore(&mut self, actor: &str, ctx: &mut TickContext<'_>) -> Option<IncidentEvent> {
        if self.statuses.contains_key(actor) {
            return None;
        }
        let stored = match ctx.store.load_wanted(actor) {
            Ok(Some(stored)) if stored.level > 0 => stored,
            Ok(_) => return None,
            Err(e) => {
                log::warn!("tick={} wanted: could not load status for {actor}: {e}", ctx.tick);
                return None;
            }
        };

        if ctx.world.is_protected(actor) || ctx.world.is_on_duty(actor) {
            log::warn!(
                "tick={} policy: {actor} joined protected or on duty; wanted level {} stays parked",
                ctx.tick, stored.level
            );
            return None;
        }

        let level = stored.level.min(self.config.max_level);
        self.statuses.insert(
            actor.to_string(),
            WantedStatus {
                level,
                expires_at: ctx.tick + secs_to_ticks(stored.remaining_secs as f64),
                reason: stored.reason.clone(),
            },
        );
        self.present(actor, 0, level, &stored.reason, ctx);

        Some(IncidentEvent::WantedLevelChanged {
            tick: ctx.tick,
            actor: actor.to_string(),
            old_level: 0,
            new_level: level,
            reason: stored.reason,
        })
    }

    /// Persist remaining time and drop the in-memory status when an actor leaves.
    pub fn park(&mut self, actor: &str, ctx: &mut TickContext<'_>) {
        if self.statuses.contains_key(actor) {
            self.persist(actor, ctx);
            self.statuses.remove(actor);
        }
    }

    fn persist(&self, actor: &str, ctx: &mut TickContext<'_>) {
        let Some(status) = self.statuses.get(actor) else {
            return;
        };
        let stored = StoredWanted {
            level:          status.level,
            reason:         status.reason.clone(),
            remaining_secs: status.remaining_secs(ctx.tick),
        };
        if let Err(e) = ctx.store.save_wanted(actor, &stored) {
            log::warn!("tick={} wanted: could not persist status for {actor}: {e}", ctx.tick);
        }
    }

    fn present(&self, actor: &str, old_level: u32, level: u32, reason: &str, ctx: &mut TickContext<'_>) {
        let max = self.config.max_level.max(1);
        ui_logged(
            ctx.world.show_progress(
                actor,
                ProgressKind::Wanted,
                f64::from(level) / f64::from(max),
                &format!("Wanted {level}/{max}"),
            ),
            ctx.tick,
            "wanted bar",
        );
        ui_logged(
            ctx.world.notify(actor, &Notice::WantedLevelChanged { level, reason: reason.to_string() }),
            ctx.tick,
            "wanted notice",
        );

        let threshold = self.config.visibility_threshold;
        let was_visible = old_level >= threshold;
        let is_visible = level >= threshold;
        if was_visible || is_visible {
            let viewers = ctx.world.on_duty_actors();
            ui_logged(ctx.world.set_glow(actor, is_visible, &viewers), ctx.tick, "wanted glow");
        }
    }
}

impl SimSubsystem for WantedRegistry {
    fn name(&self) -> &'static str {
        "wanted"
    }

    fn react(
        &mut self,
        event: &IncidentEvent,
        ctx:   &mut TickContext<'_>,
    ) -> SimResult<Vec<IncidentEvent>> {
        let mut out = Vec::new();
        match event {
            IncidentEvent::WantedChangeRequested { actor, change, reason, .. } => match change {
                WantedChange::Increase { delta } => {
                    out.extend(self.increase(actor, *delta, reason, ctx));
                }
                WantedChange::Clear => {
                    out.extend(self.clear_with_reason(actor, reason, ctx));
                }
            },

            IncidentEvent::CustodyCompleted { target, .. } => {
                out.extend(self.clear_with_reason(target, "taken into custody", ctx));
            }

            IncidentEvent::ContrabandReported { actor, reason, .. } => {
                if let Err(e) = ctx.store.increment_counter(actor, Counter::Violations) {
                    log::warn!("tick={} wanted: violation counter for {actor} not saved: {e}", ctx.tick);
                }
                out.extend(self.increase(actor, self.detection.contraband_wanted_delta, reason, ctx));
            }

            IncidentEvent::HostileActReported { attacker, victim, .. } => {
                // Only an assault on an on-duty enforcer is an offence here.
                if ctx.world.is_on_duty(victim) && !ctx.world.is_on_duty(attacker) {
                    if let Err(e) = ctx.store.increment_counter(attacker, Counter::Violations) {
                        log::warn!("tick={} wanted: violation counter for {attacker} not saved: {e}", ctx.tick);
                    }
                    out.extend(self.increase(
                        attacker,
                        self.detection.assault_wanted_delta,
                        "assaulted an enforcer",
                        ctx,
                    ));
                }
            }

            _ => {}
        }
        Ok(out)
    }
}
