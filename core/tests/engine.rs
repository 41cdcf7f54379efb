//! Engine-level tests: serialized commands, the event log and snapshots.

use cellblock_core::{
    command::{CommandOutcome, IncidentCommand},
    engine::IncidentEngine,
    sandbox::SandboxWorld,
    snapshot::{IncidentSnapshot, SNAPSHOT_INTERVAL},
    types::Position,
};

fn yard(x: f64) -> Position {
    Position::new("yard", x, 64.0, 0.0)
}

fn build(run_id: &str) -> IncidentEngine<SandboxWorld> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut engine = IncidentEngine::build_test(run_id, 42).expect("build test engine");
    engine.world_mut().spawn_enforcer("guard", yard(0.0));
    engine.world_mut().spawn("inmate", yard(10.0));
    engine
}

fn command(json: &str) -> IncidentCommand {
    serde_json::from_str(json).expect("valid command")
}

fn event_types(engine: &IncidentEngine<SandboxWorld>) -> Vec<String> {
    (0..=engine.clock.current_tick)
        .flat_map(|tick| {
            engine
                .store_events_for_tick(&engine.run_id, tick)
                .expect("read events")
                .into_iter()
                .map(|e| e.event_type)
        })
        .collect()
}

#[test]
fn serialized_commands_report_their_outcome() {
    let mut engine = build("engine-exec");

    let started = engine
        .execute(command(r#"{"cmd":"start_chase","enforcer":"guard","target":"inmate"}"#))
        .unwrap();
    let session_id = match started {
        CommandOutcome::ChaseStarted { session_id } => session_id,
        other => panic!("expected a chase, got {other:?}"),
    };
    assert_eq!(engine.chase_session_for("inmate").map(|s| s.id.clone()), Some(session_id));

    let again = engine
        .execute(command(r#"{"cmd":"start_chase","enforcer":"guard","target":"inmate"}"#))
        .unwrap();
    assert_eq!(again, CommandOutcome::Rejected { reason: "chase.target_already_chased".into() });

    let ended = engine.execute(command(r#"{"cmd":"end_chase","actor":"inmate"}"#)).unwrap();
    assert_eq!(ended, CommandOutcome::Applied);
    let ended_again = engine.execute(command(r#"{"cmd":"end_chase","actor":"inmate"}"#)).unwrap();
    assert_eq!(ended_again, CommandOutcome::Unchanged);
}

#[test]
fn wanted_commands_round_through_execute() {
    let mut engine = build("engine-wanted");

    let set = command(r#"{"cmd":"set_wanted","actor":"inmate","level":2,"reason":"fight"}"#);
    assert_eq!(engine.execute(set).unwrap(), CommandOutcome::Applied);
    assert_eq!(engine.level_of("inmate"), 2);

    let refused = command(r#"{"cmd":"increase_wanted","actor":"guard","delta":1,"reason":"fight"}"#);
    assert_eq!(engine.execute(refused).unwrap(), CommandOutcome::Unchanged);

    let custody = command(r#"{"cmd":"start_custody","enforcer":"guard","target":"inmate","reason":"arrest"}"#);
    assert_eq!(
        engine.execute(custody).unwrap(),
        CommandOutcome::Rejected { reason: "custody.out_of_range".into() }
    );
}

#[test]
fn every_routed_event_is_logged_in_order() {
    let mut engine = build("engine-log");
    engine.run_ticks(1).unwrap();
    engine.report_hostile_act("inmate", "guard").unwrap();

    let types = event_types(&engine);
    assert_eq!(
        types,
        vec![
            "run_initialized",
            "hostile_act_reported",
            "wanted_level_changed",
            "chase_requested",
            "chase_started",
        ]
    );
}

#[test]
fn snapshot_is_persisted_every_minute() {
    let mut engine = build("engine-snapshot");
    engine.set_wanted("inmate", 1, "loitering").unwrap();
    engine.start_chase("guard", "inmate").unwrap().unwrap();

    engine.run_ticks(SNAPSHOT_INTERVAL - 1).unwrap();
    assert!(engine.store().latest_snapshot_before(&engine.run_id, SNAPSHOT_INTERVAL).unwrap().is_none());

    engine.run_ticks(1).unwrap();
    let (tick, json) = engine
        .store()
        .latest_snapshot_before(&engine.run_id, SNAPSHOT_INTERVAL)
        .unwrap()
        .expect("snapshot written");
    assert_eq!(tick, SNAPSHOT_INTERVAL);

    let snapshot: IncidentSnapshot = serde_json::from_str(&json).expect("snapshot parses");
    assert_eq!(snapshot.tick, SNAPSHOT_INTERVAL);
    assert_eq!(snapshot.wanted.len(), 1);
    assert_eq!(snapshot.chases.len(), 1);
    assert!(snapshot.custody.is_empty());
}

#[test]
fn leaving_actor_is_cleaned_out_of_every_table() {
    let mut engine = build("engine-left");
    engine.set_wanted("inmate", 2, "fight").unwrap();
    engine.start_chase("guard", "inmate").unwrap().unwrap();

    engine.world_mut().disconnect("inmate");
    engine.actor_left("inmate").unwrap();

    let snapshot = engine.snapshot();
    assert!(snapshot.wanted.is_empty());
    assert!(snapshot.chases.is_empty());
    assert_eq!(engine.store().open_chase_count().unwrap(), 0);
}
