//! Escape minigame tests, driven through custody.
//!
//! Tests cover: when the minigame runs, pointer frames reaching the
//! target, a hit escaping custody, the miss threshold forcing a flee, and
//! the configurable escape outcome.

use cellblock_core::{
    config::{EscapeWanted, IncidentConfig},
    engine::IncidentEngine,
    sandbox::SandboxWorld,
    types::Position,
    world::Notice,
};

fn yard(x: f64) -> Position {
    Position::new("yard", x, 64.0, 0.0)
}

fn build(run_id: &str, config: IncidentConfig) -> IncidentEngine<SandboxWorld> {
    let mut engine = IncidentEngine::build_test_with(run_id, 42, config).expect("build test engine");
    engine.world_mut().spawn_enforcer("guard", yard(0.0));
    engine.world_mut().spawn("inmate", yard(2.0));
    engine
}

fn hold(engine: &mut IncidentEngine<SandboxWorld>) {
    engine
        .start_custody("guard", "inmate", "arrest")
        .expect("storage ok")
        .expect("custody accepted");
}

#[test]
fn minigame_only_runs_when_enabled() {
    let mut disabled = build("mg-off", IncidentConfig::default_test());
    hold(&mut disabled);
    assert!(!disabled.minigame_active("inmate"));
    assert!(!disabled.minigame_input("inmate").unwrap());

    let mut enabled = build("mg-on", IncidentConfig::default_test().with_minigame());
    hold(&mut enabled);
    assert!(enabled.minigame_active("inmate"));
    assert_eq!(enabled.world().last_frame("inmate").map(|f| f.pointer), Some(0));
}

#[test]
fn pointer_frames_follow_the_tick() {
    let mut engine = build("mg-frames", IncidentConfig::default_test().with_minigame());
    hold(&mut engine);

    engine.run_ticks(3).unwrap();
    let frame = engine.world().last_frame("inmate").expect("frame rendered");
    assert_eq!(frame.pointer, 3);
    assert_eq!(frame.bar_length, 10);
    assert_eq!((frame.success_start, frame.success_end), (3, 5));
}

#[test]
fn hit_escapes_custody_and_clears_wanted() {
    let mut engine = build("mg-hit", IncidentConfig::default_test().with_minigame());
    engine.set_wanted("inmate", 2, "fight").unwrap();
    hold(&mut engine);

    engine.run_ticks(3).unwrap();
    assert!(engine.minigame_input("inmate").unwrap());

    assert!(!engine.is_in_countdown("inmate"));
    assert!(!engine.minigame_active("inmate"));
    assert_eq!(engine.level_of("inmate"), 0);
    assert!(engine.chase_session_for("inmate").is_none());
    assert!(engine.world().has_notice("inmate", "minigame.escaped"));
    assert!(engine.world().notices_for("guard").iter().any(|n| {
        matches!(n, Notice::CustodyCancelled { reason } if reason == "escaped")
    }));
}

#[test]
fn escape_outcome_is_configurable() {
    let mut config = IncidentConfig::default_test().with_minigame();
    config.minigame.escape_wanted = EscapeWanted::Bonus { levels: 1 };
    config.minigame.escape_starts_chase = true;
    let mut engine = build("mg-bonus", config);
    engine.set_wanted("inmate", 2, "fight").unwrap();
    hold(&mut engine);

    engine.run_ticks(2).unwrap();
    assert!(engine.minigame_input("inmate").unwrap());

    assert_eq!(engine.level_of("inmate"), 3);
    assert_eq!(engine.chase_session_for("inmate").map(|s| s.enforcer.as_str()), Some("guard"));
}

#[test]
fn misses_up_to_threshold_force_a_flee() {
    let mut engine = build("mg-miss", IncidentConfig::default_test().with_minigame());
    hold(&mut engine);

    // The pointer starts at cell 0, outside the forgiving window 2..=6.
    assert!(engine.minigame_input("inmate").unwrap());
    assert!(engine.minigame_input("inmate").unwrap());
    assert!(engine.is_in_countdown("inmate"));
    assert_eq!(engine.world().impaired_secs("inmate"), None);

    assert!(engine.minigame_input("inmate").unwrap());
    assert!(!engine.is_in_countdown("inmate"));
    assert_eq!(engine.world().impaired_secs("inmate"), Some(5));
    assert!(engine.is_fleeing("inmate"));
    assert_eq!(engine.level_of("inmate"), 1);

    let misses: Vec<u32> = engine
        .world()
        .notices_for("inmate")
        .into_iter()
        .filter_map(|n| match n {
            Notice::MinigameMiss { misses, .. } => Some(*misses),
            _ => None,
        })
        .collect();
    assert_eq!(misses, vec![1, 2, 3]);
}
