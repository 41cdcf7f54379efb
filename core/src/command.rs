use serde::{Deserialize, Serialize};
use crate::types::{ActorId, SessionId};

/// Every externally issued engine command.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum IncidentCommand {
    // ── Chase ─────────────────────────────────────
    StartChase { enforcer: ActorId, target: ActorId },
    /// End the chase this actor takes part in.
    EndChase { actor: ActorId },

    // ── Custody ───────────────────────────────────
    StartCustody { enforcer: ActorId, target: ActorId, reason: String },
    CancelCustody { target: ActorId },
    MinigameInput { target: ActorId },

    // ── Detection ─────────────────────────────────
    ReportHostileAct { attacker: ActorId, victim: ActorId },
    ReportContraband { actor: ActorId, reason: String },

    // ── Wanted administration ─────────────────────
    SetWanted { actor: ActorId, level: u32, reason: String },
    IncreaseWanted { actor: ActorId, delta: u32, reason: String },
    ClearWanted { actor: ActorId },

    // ── Presence ──────────────────────────────────
    ActorJoined { actor: ActorId },
    ActorLeft { actor: ActorId },
}

/// What happened to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Applied,
    ChaseStarted { session_id: SessionId },
    /// Refused with a stable localisation key.
    Rejected { reason: String },
    /// Valid, but nothing needed to change.
    Unchanged,
}
