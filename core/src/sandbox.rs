//! In-memory world used by the integration tests and the incident runner.
//!
//! Implements every collaborator trait over plain maps and records what the
//! engine asked of it so tests can assert on notices, bars, glow and jailings.

use crate::{
    error::{PresentationError, SimResult},
    minigame::MinigameFrame,
    types::{ActorId, Position},
    world::{
        CompletionSender, CustodyEffect, CustodyRequest, DutyStatusProvider, EconomyEffect, Notice,
        PresentationLayer, ProgressKind, Rank, SecurityPolicy, SpatialZoneProvider, UiResult,
    },
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxActor {
    pub position:  Position,
    pub online:    bool,
    pub on_duty:   bool,
    pub protected: bool,
    pub rank:      Option<String>,
}

/// Axis-aligned box inside one world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub name:  String,
    pub world: String,
    pub min:   [f64; 3],
    pub max:   [f64; 3],
}

impl Zone {
    fn contains(&self, pos: &Position) -> bool {
        pos.world == self.world
            && (self.min[0]..=self.max[0]).contains(&pos.x)
            && (self.min[1]..=self.max[1]).contains(&pos.y)
            && (self.min[2]..=self.max[2]).contains(&pos.z)
    }
}

/// How the sandbox answers a jailing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JailingMode {
    #[default]
    Accept,
    Reject,
    /// Hold the request until `resolve_deferred` is called.
    Defer,
}

#[derive(Default)]
pub struct SandboxWorld {
    actors:       BTreeMap<ActorId, SandboxActor>,
    zones:        Vec<Zone>,
    notices:      Vec<(ActorId, Notice)>,
    progress:     BTreeMap<(ActorId, ProgressKind), (f64, String)>,
    glow:         BTreeMap<ActorId, Vec<ActorId>>,
    frames:       BTreeMap<ActorId, MinigameFrame>,
    jailing_mode: JailingMode,
    deferred:     Vec<(CustodyRequest, CompletionSender)>,
    jailed:       Vec<CustodyRequest>,
    impaired:     BTreeMap<ActorId, u32>,
    contraband:   BTreeMap<ActorId, u32>,
    forfeited:    BTreeMap<ActorId, u32>,
    failing_ui:   BTreeSet<ActorId>,
}

impl SandboxWorld {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Actors ─────────────────────────────────────────────────

    pub fn spawn(&mut self, actor: &str, position: Position) {
        self.actors.insert(
            actor.to_string(),
            SandboxActor { position, online: true, on_duty: false, protected: false, rank: None },
        );
    }

    pub fn spawn_enforcer(&mut self, actor: &str, position: Position) {
        self.spawn(actor, position);
        if let Some(a) = self.actors.get_mut(actor) {
            a.on_duty = true;
            a.rank = Some("guard".into());
        }
    }

    pub fn actor(&self, actor: &str) -> Option<&SandboxActor> {
        self.actors.get(actor)
    }

    pub fn set_on_duty(&mut self, actor: &str, on_duty: bool) {
        if let Some(a) = self.actors.get_mut(actor) {
            a.on_duty = on_duty;
        }
    }

    pub fn set_protected(&mut self, actor: &str, protected: bool) {
        if let Some(a) = self.actors.get_mut(actor) {
            a.protected = protected;
        }
    }

    pub fn move_to(&mut self, actor: &str, position: Position) {
        if let Some(a) = self.actors.get_mut(actor) {
            a.position = position;
        }
    }

    /// Shift an actor within its current world.
    pub fn move_by(&mut self, actor: &str, dx: f64, dy: f64, dz: f64) {
        if let Some(a) = self.actors.get_mut(actor) {
            a.position.x += dx;
            a.position.y += dy;
            a.position.z += dz;
        }
    }

    pub fn disconnect(&mut self, actor: &str) {
        if let Some(a) = self.actors.get_mut(actor) {
            a.online = false;
        }
    }

    pub fn reconnect(&mut self, actor: &str) {
        if let Some(a) = self.actors.get_mut(actor) {
            a.online = true;
        }
    }

    pub fn add_zone(&mut self, name: &str, world: &str, min: [f64; 3], max: [f64; 3]) {
        self.zones.push(Zone { name: name.into(), world: world.into(), min, max });
    }

    pub fn give_contraband(&mut self, actor: &str, items: u32) {
        *self.contraband.entry(actor.to_string()).or_default() += items;
    }

    // ── Effects ────────────────────────────────────────────────

    pub fn set_jailing_mode(&mut self, mode: JailingMode) {
        self.jailing_mode = mode;
    }

    /// Answer every held jailing request. Returns how many were answered.
    pub fn resolve_deferred(&mut self, accepted: bool) -> usize {
        let held = std::mem::take(&mut self.deferred);
        let count = held.len();
        for (request, done) in held {
            if accepted {
                self.jailed.push(request.clone());
            }
            done.complete(request.ticket, accepted);
        }
        count
    }

    pub fn jailed(&self) -> &[CustodyRequest] {
        &self.jailed
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn impaired_secs(&self, actor: &str) -> Option<u32> {
        self.impaired.get(actor).copied()
    }

    pub fn forfeited(&self, actor: &str) -> u32 {
        self.forfeited.get(actor).copied().unwrap_or(0)
    }

    // ── Presentation record ────────────────────────────────────

    /// Make every presentation call for `actor` fail.
    pub fn fail_presentation_for(&mut self, actor: &str) {
        self.failing_ui.insert(actor.to_string());
    }

    pub fn notices_for(&self, actor: &str) -> Vec<&Notice> {
        self.notices.iter().filter(|(a, _)| a == actor).map(|(_, n)| n).collect()
    }

    pub fn has_notice(&self, actor: &str, key: &str) -> bool {
        self.notices.iter().any(|(a, n)| a == actor && n.key() == key)
    }

    pub fn progress_of(&self, actor: &str, kind: ProgressKind) -> Option<f64> {
        self.progress.get(&(actor.to_string(), kind)).map(|(p, _)| *p)
    }

    pub fn progress_label(&self, actor: &str, kind: ProgressKind) -> Option<&str> {
        self.progress.get(&(actor.to_string(), kind)).map(|(_, l)| l.as_str())
    }

    pub fn is_glowing(&self, actor: &str) -> bool {
        self.glow.contains_key(actor)
    }

    pub fn glow_viewers(&self, actor: &str) -> Vec<ActorId> {
        self.glow.get(actor).cloned().unwrap_or_default()
    }

    pub fn last_frame(&self, actor: &str) -> Option<&MinigameFrame> {
        self.frames.get(actor)
    }

    fn check_ui(&self, actor: &str) -> UiResult {
        if self.failing_ui.contains(actor) {
            return Err(PresentationError { actor: actor.to_string(), detail: "client unreachable".into() });
        }
        Ok(())
    }
}

impl DutyStatusProvider for SandboxWorld {
    fn is_on_duty(&self, actor: &str) -> bool {
        self.actors.get(actor).is_some_and(|a| a.online && a.on_duty)
    }

    fn current_rank(&self, actor: &str) -> Option<Rank> {
        self.actors
            .get(actor)
            .filter(|a| a.on_duty)
            .and_then(|a| a.rank.clone())
            .map(Rank)
    }

    fn on_duty_actors(&self) -> Vec<ActorId> {
        self.actors
            .iter()
            .filter(|(_, a)| a.online && a.on_duty)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl SecurityPolicy for SandboxWorld {
    fn is_protected(&self, actor: &str) -> bool {
        self.actors.get(actor).is_some_and(|a| a.protected)
    }
}

impl SpatialZoneProvider for SandboxWorld {
    fn locate(&self, actor: &str) -> Option<Position> {
        self.actors
            .get(actor)
            .filter(|a| a.online)
            .map(|a| a.position.clone())
    }

    fn is_in_zone(&self, actor: &str, zones: &[String]) -> bool {
        let Some(pos) = self.locate(actor) else {
            return false;
        };
        self.zones
            .iter()
            .any(|z| zones.contains(&z.name) && z.contains(&pos))
    }
}

impl PresentationLayer for SandboxWorld {
    fn show_progress(&mut self, actor: &str, kind: ProgressKind, progress: f64, label: &str) -> UiResult {
        self.check_ui(actor)?;
        self.progress.insert((actor.to_string(), kind), (progress, label.to_string()));
        Ok(())
    }

    fn hide_progress(&mut self, actor: &str, kind: ProgressKind) -> UiResult {
        self.check_ui(actor)?;
        self.progress.remove(&(actor.to_string(), kind));
        Ok(())
    }

    fn notify(&mut self, actor: &str, notice: &Notice) -> UiResult {
        self.check_ui(actor)?;
        self.notices.push((actor.to_string(), notice.clone()));
        Ok(())
    }

    fn set_glow(&mut self, actor: &str, glowing: bool, viewers: &[ActorId]) -> UiResult {
        self.check_ui(actor)?;
        if glowing {
            self.glow.insert(actor.to_string(), viewers.to_vec());
        } else {
            self.glow.remove(actor);
        }
        Ok(())
    }

    fn render_minigame(&mut self, actor: &str, frame: &MinigameFrame) -> UiResult {
        self.check_ui(actor)?;
        self.frames.insert(actor.to_string(), frame.clone());
        Ok(())
    }
}

impl CustodyEffect for SandboxWorld {
    fn apply(&mut self, request: CustodyRequest, done: CompletionSender) {
        match self.jailing_mode {
            JailingMode::Accept => {
                done.complete(request.ticket, true);
                self.jailed.push(request);
            }
            JailingMode::Reject => {
                done.complete(request.ticket, false);
            }
            JailingMode::Defer => self.deferred.push((request, done)),
        }
    }

    fn impair_movement(&mut self, actor: &str, seconds: u32) {
        self.impaired.insert(actor.to_string(), seconds);
    }
}

impl EconomyEffect for SandboxWorld {
    fn forfeit_contraband(&mut self, actor: &str) -> SimResult<u32> {
        let taken = self.contraband.remove(actor).unwrap_or(0);
        if taken > 0 {
            *self.forfeited.entry(actor.to_string()).or_default() += taken;
        }
        Ok(taken)
    }
}
