//! Collaborator contracts: everything the incident engine consumes.
//!
//! RULE: The engine never reaches past these traits.
//! Duty rosters, zone geometry, UI rendering, the jailing mechanism and the
//! economy all live outside the core. The engine sees them only through
//! the narrow calls below, bundled into the `World` supertrait.

use crate::{
    error::{PresentationError, SimResult},
    minigame::MinigameFrame,
    types::{ActorId, Position},
};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;

// ── Duty & policy ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rank(pub String);

pub trait DutyStatusProvider {
    fn is_on_duty(&self, actor: &str) -> bool;
    fn current_rank(&self, actor: &str) -> Option<Rank>;
    /// Every actor currently on duty, in a stable order.
    fn on_duty_actors(&self) -> Vec<ActorId>;
}

pub trait SecurityPolicy {
    /// Protected actors are exempt from wanted, chase and custody mutation.
    fn is_protected(&self, actor: &str) -> bool;
}

// ── Space ──────────────────────────────────────────────────────────

pub trait SpatialZoneProvider {
    /// Live position of an actor; `None` means the actor is offline.
    fn locate(&self, actor: &str) -> Option<Position>;

    fn is_in_zone(&self, actor: &str, zones: &[String]) -> bool;

    fn same_context(&self, a: &str, b: &str) -> bool {
        match (self.locate(a), self.locate(b)) {
            (Some(pa), Some(pb)) => pa.same_context(&pb),
            _ => false,
        }
    }

    /// Distance between two online actors in the same context.
    fn distance(&self, a: &str, b: &str) -> Option<f64> {
        match (self.locate(a), self.locate(b)) {
            (Some(pa), Some(pb)) if pa.same_context(&pb) => Some(pa.distance_to(&pb)),
            _ => None,
        }
    }
}

// ── Presentation ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Wanted,
    Chase,
    Custody,
}

/// A message for one actor. The presentation layer owns localisation;
/// the engine only chooses which notice and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    WantedLevelChanged { level: u32, reason: String },
    WantedCleared,
    ChaseStarted { enforcer: ActorId, target: ActorId },
    ChaseRejected { reason: String },
    ChaseEnded { reason: String },
    ChaseDistanceWarning { distance: f64, max_distance: f64 },
    CustodyStarted { enforcer: ActorId, seconds: u32, reason: String },
    CustodyRejected { reason: String },
    CustodyFinalWarning { remaining: u32 },
    CustodyCancelled { reason: String },
    Jailed { duration_secs: u64, reason: String },
    ArrestAnnounced { enforcer: ActorId, target: ActorId, duration_secs: u64 },
    CustodyFailed { target: ActorId },
    MinigameMiss { misses: u32, threshold: u32 },
    MinigameEscaped,
}

impl Notice {
    /// Stable localisation key.
    pub fn key(&self) -> &'static str {
        match self {
            Self::WantedLevelChanged { .. }   => "wanted.level_changed",
            Self::WantedCleared               => "wanted.cleared",
            Self::ChaseStarted { .. }         => "chase.started",
            Self::ChaseRejected { .. }        => "chase.rejected",
            Self::ChaseEnded { .. }           => "chase.ended",
            Self::ChaseDistanceWarning { .. } => "chase.distance_warning",
            Self::CustodyStarted { .. }       => "custody.started",
            Self::CustodyRejected { .. }      => "custody.rejected",
            Self::CustodyFinalWarning { .. }  => "custody.final_warning",
            Self::CustodyCancelled { .. }     => "custody.cancelled",
            Self::Jailed { .. }               => "custody.jailed",
            Self::ArrestAnnounced { .. }      => "custody.arrest_announced",
            Self::CustodyFailed { .. }        => "custody.failed",
            Self::MinigameMiss { .. }         => "minigame.miss",
            Self::MinigameEscaped             => "minigame.escaped",
        }
    }
}

pub type UiResult = Result<(), PresentationError>;

pub trait PresentationLayer {
    /// Show or update a progress indicator. `progress` is in [0, 1].
    fn show_progress(&mut self, actor: &str, kind: ProgressKind, progress: f64, label: &str) -> UiResult;
    fn hide_progress(&mut self, actor: &str, kind: ProgressKind) -> UiResult;
    fn notify(&mut self, actor: &str, notice: &Notice) -> UiResult;
    /// Toggle the wanted glow on `actor`, visible to `viewers` only.
    fn set_glow(&mut self, actor: &str, glowing: bool, viewers: &[ActorId]) -> UiResult;
    fn render_minigame(&mut self, actor: &str, frame: &MinigameFrame) -> UiResult;
}

// ── Effects ────────────────────────────────────────────────────────

pub type JailTicket = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustodyRequest {
    pub ticket:        JailTicket,
    pub enforcer:      ActorId,
    pub target:        ActorId,
    pub duration_secs: u64,
    pub reason:        String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustodyCompletion {
    pub ticket:   JailTicket,
    pub accepted: bool,
}

/// Hands a jailing outcome back to the engine. The completion is queued
/// and applied on the next tick, never from the caller's stack.
#[derive(Debug, Clone)]
pub struct CompletionSender(mpsc::Sender<CustodyCompletion>);

impl CompletionSender {
    pub(crate) fn new(tx: mpsc::Sender<CustodyCompletion>) -> Self {
        Self(tx)
    }

    /// Returns false if the engine has already been dropped.
    pub fn complete(&self, ticket: JailTicket, accepted: bool) -> bool {
        self.0.send(CustodyCompletion { ticket, accepted }).is_ok()
    }
}

pub trait CustodyEffect {
    /// Start jailing. The outcome arrives later through `done`.
    fn apply(&mut self, request: CustodyRequest, done: CompletionSender);
    fn impair_movement(&mut self, actor: &str, seconds: u32);
}

pub trait EconomyEffect {
    /// Confiscate the actor's contraband. Returns the number of items taken.
    fn forfeit_contraband(&mut self, actor: &str) -> SimResult<u32>;
}

/// Everything the engine needs from the host game.
pub trait World:
    DutyStatusProvider + SecurityPolicy + SpatialZoneProvider + PresentationLayer + CustodyEffect + EconomyEffect
{
}

impl<T> World for T where
    T: DutyStatusProvider + SecurityPolicy + SpatialZoneProvider + PresentationLayer + CustodyEffect + EconomyEffect
{
}
