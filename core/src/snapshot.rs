//! Snapshot serialization: live incident state to JSON.
//!
//! A snapshot is taken every SNAPSHOT_INTERVAL ticks (one minute of game
//! time). It is a diagnostic record of every table the engine owns; the
//! runner also prints it on `get_state`.

use crate::{
    chase_coordinator::ChaseSession,
    clock::SimClock,
    custody_controller::{JailCountdownSession, PendingJailing},
    minigame::MinigameState,
    types::{ActorId, RunId, Tick},
    wanted_registry::WantedStatus,
};
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_INTERVAL: Tick = 1200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSnapshot {
    pub run_id:    RunId,
    pub tick:      Tick,
    pub clock:     SimClock,
    pub wanted:    Vec<(ActorId, WantedStatus)>,
    pub chases:    Vec<ChaseSession>,
    pub custody:   Vec<JailCountdownSession>,
    pub pending:   Vec<PendingJailing>,
    pub minigames: Vec<(ActorId, MinigameState)>,
}
