//! The event bus: all inter-subsystem communication.
//!
//! RULE: Subsystems communicate ONLY through events.
//! Custody never calls into the chase coordinator; it emits
//! `ChaseRequested` and the engine routes it. Every routed event is
//! persisted to the event log.

use crate::types::{ActorId, RunId, SessionId, Tick};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every event emitted by the engine.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncidentEvent {
    // ── Engine events ──────────────────────────────
    RunInitialized {
        run_id: RunId,
        seed: u64,
    },

    // ── Detection events ───────────────────────────
    HostileActReported {
        tick: Tick,
        attacker: ActorId,
        victim: ActorId,
    },
    ContrabandReported {
        tick: Tick,
        actor: ActorId,
        reason: String,
    },

    // ── Wanted events ──────────────────────────────
    WantedChangeRequested {
        tick: Tick,
        actor: ActorId,
        change: WantedChange,
        reason: String,
    },
    WantedLevelChanged {
        tick: Tick,
        actor: ActorId,
        old_level: u32,
        new_level: u32,
        reason: String,
    },
    WantedExpired {
        tick: Tick,
        actor: ActorId,
        level: u32,
    },

    // ── Chase events ───────────────────────────────
    ChaseRequested {
        tick: Tick,
        enforcer: ActorId,
        target: ActorId,
        cause: String,
    },
    ChaseStarted {
        tick: Tick,
        session_id: SessionId,
        enforcer: ActorId,
        target: ActorId,
    },
    ChaseEnded {
        tick: Tick,
        session_id: SessionId,
        enforcer: ActorId,
        target: ActorId,
        reason: ChaseEndReason,
    },
    CombatTimerRefreshed {
        tick: Tick,
        session_id: SessionId,
        until: Tick,
    },
    CaptureRequested {
        tick: Tick,
        enforcer: ActorId,
        target: ActorId,
    },

    // ── Custody events ─────────────────────────────
    CustodyStarted {
        tick: Tick,
        enforcer: ActorId,
        target: ActorId,
        reason: String,
        seconds: u32,
        skip_flee_detection: bool,
    },
    CustodyCancelled {
        tick: Tick,
        enforcer: ActorId,
        target: ActorId,
        reason: CustodyCancelReason,
    },
    FleeDetected {
        tick: Tick,
        enforcer: ActorId,
        target: ActorId,
        relative_movement: f64,
        forced: bool,
    },
    JailingIssued {
        tick: Tick,
        ticket: u64,
        enforcer: ActorId,
        target: ActorId,
        wanted_level: u32,
        duration_secs: u64,
    },
    CustodyCompleted {
        tick: Tick,
        enforcer: ActorId,
        target: ActorId,
        duration_secs: u64,
    },
    CustodyFailed {
        tick: Tick,
        enforcer: ActorId,
        target: ActorId,
    },

    // ── Minigame events ────────────────────────────
    MinigameStarted {
        tick: Tick,
        target: ActorId,
    },
    MinigameMissed {
        tick: Tick,
        target: ActorId,
        misses: u32,
    },
    MinigameEscaped {
        tick: Tick,
        enforcer: ActorId,
        target: ActorId,
    },
}

impl IncidentEvent {
    /// Stable name for the event_type column in event_log.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. }        => "run_initialized",
            Self::HostileActReported { .. }    => "hostile_act_reported",
            Self::ContrabandReported { .. }    => "contraband_reported",
            Self::WantedChangeRequested { .. } => "wanted_change_requested",
            Self::WantedLevelChanged { .. }    => "wanted_level_changed",
            Self::WantedExpired { .. }         => "wanted_expired",
            Self::ChaseRequested { .. }        => "chase_requested",
            Self::ChaseStarted { .. }          => "chase_started",
            Self::ChaseEnded { .. }            => "chase_ended",
            Self::CombatTimerRefreshed { .. }  => "combat_timer_refreshed",
            Self::CaptureRequested { .. }      => "capture_requested",
            Self::CustodyStarted { .. }        => "custody_started",
            Self::CustodyCancelled { .. }      => "custody_cancelled",
            Self::FleeDetected { .. }          => "flee_detected",
            Self::JailingIssued { .. }         => "jailing_issued",
            Self::CustodyCompleted { .. }      => "custody_completed",
            Self::CustodyFailed { .. }         => "custody_failed",
            Self::MinigameStarted { .. }       => "minigame_started",
            Self::MinigameMissed { .. }        => "minigame_missed",
            Self::MinigameEscaped { .. }       => "minigame_escaped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WantedChange {
    Increase { delta: u32 },
    Clear,
}

/// Why a chase session ended. Checked by the monitor in declaration order
/// for the first five variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChaseEndReason {
    Offline,
    WorldsDiverged,
    TooFar,
    RestrictedArea,
    TimeExpired,
    Captured,
    CalledOff,
    InternalError,
    InvalidSession,
}

impl ChaseEndReason {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Offline        => "offline",
            Self::WorldsDiverged => "worlds diverged",
            Self::TooFar         => "too far",
            Self::RestrictedArea => "entered restricted area",
            Self::TimeExpired    => "time expired",
            Self::Captured       => "captured",
            Self::CalledOff      => "called off",
            Self::InternalError  => "internal error",
            Self::InvalidSession => "invalid session",
        }
    }
}

impl fmt::Display for ChaseEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodyCancelReason {
    Disconnected,
    EnforcerMovedAway,
    TargetFled,
    Escaped,
    CalledOff,
    InternalError,
}

impl CustodyCancelReason {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Disconnected      => "disconnected",
            Self::EnforcerMovedAway => "enforcer moved away",
            Self::TargetFled        => "Target fled",
            Self::Escaped           => "escaped",
            Self::CalledOff         => "called off",
            Self::InternalError     => "internal error",
        }
    }
}

impl fmt::Display for CustodyCancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub tick: Tick,
    pub subsystem: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized IncidentEvent
}
