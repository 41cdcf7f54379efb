//! Custody controller tests.
//!
//! Tests cover: start preconditions, one countdown per target, flee
//! detection and its threshold boundary, cancellation reasons, the final
//! warning, jailing duration by wanted level, and the asynchronous
//! jailing completion (accepted, rejected, deferred).

use cellblock_core::{
    config::IncidentConfig,
    custody_controller::CustodyRejection,
    engine::IncidentEngine,
    sandbox::{JailingMode, SandboxWorld},
    store::{Counter, PersistenceLayer},
    types::Position,
    world::{Notice, ProgressKind},
};

fn yard(x: f64) -> Position {
    Position::new("yard", x, 64.0, 0.0)
}

/// Guard at the origin, inmate `gap` blocks east.
fn build(run_id: &str, gap: f64) -> IncidentEngine<SandboxWorld> {
    let mut engine = IncidentEngine::build_test(run_id, 42).expect("build test engine");
    engine.world_mut().spawn_enforcer("guard", yard(0.0));
    engine.world_mut().spawn("inmate", yard(gap));
    engine
}

fn hold(engine: &mut IncidentEngine<SandboxWorld>) {
    engine
        .start_custody("guard", "inmate", "arrest")
        .expect("storage ok")
        .expect("custody accepted");
}

fn cancelled_with(engine: &IncidentEngine<SandboxWorld>, actor: &str, reason: &str) -> bool {
    engine.world().notices_for(actor).iter().any(|n| {
        matches!(n, Notice::CustodyCancelled { reason: r } if r == reason)
    })
}

#[test]
fn preconditions_reject_with_distinct_reasons() {
    let mut engine = build("custody-pre", 10.0);
    engine.world_mut().spawn("civilian", yard(9.0));
    engine.world_mut().spawn("vip", yard(1.0));
    engine.world_mut().set_protected("vip", true);
    engine.world_mut().spawn("gone", yard(1.0));
    engine.world_mut().disconnect("gone");
    engine.world_mut().spawn("elsewhere", Position::new("nether", 0.0, 64.0, 0.0));

    let reject = |engine: &mut IncidentEngine<SandboxWorld>, e: &str, t: &str| {
        engine.start_custody(e, t, "arrest").unwrap().unwrap_err()
    };
    assert_eq!(reject(&mut engine, "guard", "guard"), CustodyRejection::SelfTarget);
    assert_eq!(reject(&mut engine, "guard", "vip"), CustodyRejection::TargetProtected);
    assert_eq!(reject(&mut engine, "civilian", "inmate"), CustodyRejection::NotOnDuty);
    assert_eq!(reject(&mut engine, "guard", "gone"), CustodyRejection::ActorOffline);
    assert_eq!(reject(&mut engine, "guard", "elsewhere"), CustodyRejection::DifferentWorld);
    assert!(matches!(
        reject(&mut engine, "guard", "inmate"),
        CustodyRejection::OutOfRange { radius, .. } if radius == 5.0
    ));
    assert!(engine.world().has_notice("guard", "custody.rejected"));
    assert!(!engine.is_in_countdown("inmate"));
}

#[test]
fn one_countdown_per_target() {
    let mut engine = build("custody-unique", 2.0);
    engine.world_mut().spawn_enforcer("warden", yard(3.0));
    hold(&mut engine);

    let second = engine.start_custody("warden", "inmate", "arrest").unwrap();
    assert_eq!(second, Err(CustodyRejection::AlreadyInCustody));
    assert_eq!(engine.custody_session("inmate").unwrap().enforcer, "guard");
}

#[test]
fn cancel_is_idempotent_and_tears_down_ui() {
    let mut engine = build("custody-cancel", 2.0);
    hold(&mut engine);
    assert!(engine.world().progress_of("inmate", ProgressKind::Custody).is_some());

    assert!(engine.cancel_custody("inmate").unwrap());
    assert!(!engine.cancel_custody("inmate").unwrap());

    assert!(!engine.is_in_countdown("inmate"));
    assert!(engine.world().progress_of("inmate", ProgressKind::Custody).is_none());
    assert!(engine.world().progress_of("guard", ProgressKind::Custody).is_none());
    assert!(cancelled_with(&engine, "inmate", "called off"));
}

#[test]
fn running_target_escalates_to_a_chase() {
    let mut engine = build("custody-flee", 2.0);
    hold(&mut engine);

    engine.world_mut().move_by("inmate", 6.0, 0.0, 0.0);
    engine.run_ticks(1).unwrap();

    assert!(!engine.is_in_countdown("inmate"));
    assert!(cancelled_with(&engine, "inmate", "Target fled"));
    let chase = engine.chase_session_for("inmate").expect("flee starts a chase");
    assert_eq!(chase.enforcer, "guard");
    assert_eq!(chase.target, "inmate");
    assert_eq!(engine.level_of("inmate"), 1);
}

#[test]
fn flee_threshold_is_inclusive() {
    let mut at_threshold = build("custody-flee-4", 0.0);
    hold(&mut at_threshold);
    at_threshold.world_mut().move_by("inmate", 4.0, 0.0, 0.0);
    at_threshold.run_ticks(1).unwrap();
    assert!(!at_threshold.is_in_countdown("inmate"));
    assert!(at_threshold.is_fleeing("inmate"));

    let mut below = build("custody-flee-399", 0.0);
    hold(&mut below);
    below.world_mut().move_by("inmate", 3.99, 0.0, 0.0);
    below.run_ticks(1).unwrap();
    assert!(below.is_in_countdown("inmate"));
    assert!(!below.is_fleeing("inmate"));
}

#[test]
fn enforcer_walking_off_cancels_without_escalation() {
    let mut engine = build("custody-walk", 0.0);
    hold(&mut engine);

    engine.world_mut().move_to("guard", yard(5.5));
    engine.run_ticks(1).unwrap();

    assert!(!engine.is_in_countdown("inmate"));
    assert!(cancelled_with(&engine, "inmate", "enforcer moved away"));
    assert!(engine.chase_session_for("inmate").is_none());
    assert_eq!(engine.level_of("inmate"), 0);
}

#[test]
fn disconnect_cancels_the_countdown() {
    let mut engine = build("custody-dc", 2.0);
    hold(&mut engine);

    engine.world_mut().disconnect("inmate");
    engine.run_ticks(1).unwrap();

    assert!(!engine.is_in_countdown("inmate"));
    assert!(cancelled_with(&engine, "guard", "disconnected"));
}

#[test]
fn leaving_the_server_cancels_custody_for_either_role() {
    let mut engine = build("custody-left", 2.0);
    hold(&mut engine);

    engine.actor_left("guard").unwrap();
    assert!(!engine.is_in_countdown("inmate"));
    assert!(cancelled_with(&engine, "inmate", "disconnected"));
}

#[test]
fn final_warning_at_three_seconds() {
    let mut engine = build("custody-warn", 2.0);
    hold(&mut engine);

    engine.run_ticks(139).unwrap();
    assert!(!engine.world().has_notice("inmate", "custody.final_warning"));
    assert_eq!(engine.custody_session("inmate").unwrap().remaining_secs, 4);

    engine.run_ticks(1).unwrap();
    for actor in ["guard", "inmate"] {
        assert!(engine
            .world()
            .notices_for(actor)
            .contains(&&Notice::CustodyFinalWarning { remaining: 3 }));
    }
}

#[test]
fn completed_custody_jails_for_level_scaled_time() {
    let mut engine = build("custody-jail", 2.0);
    engine.world_mut().spawn_enforcer("warden", yard(40.0));
    engine.world_mut().give_contraband("inmate", 3);
    engine.set_wanted("inmate", 3, "riot").unwrap();
    hold(&mut engine);

    engine.run_ticks(200).unwrap();
    assert!(!engine.is_in_countdown("inmate"));
    assert_eq!(engine.world().jailed().len(), 1);
    assert_eq!(engine.world().jailed()[0].duration_secs, 480);

    // The completion is applied on the following tick.
    assert_eq!(engine.level_of("inmate"), 3);
    engine.run_ticks(1).unwrap();
    assert_eq!(engine.level_of("inmate"), 0);
    assert!(!engine.is_awaiting_jailing("inmate"));

    assert_eq!(engine.world().forfeited("inmate"), 3);
    assert_eq!(engine.store().counter("guard", Counter::Arrests).unwrap(), 1);
    assert_eq!(engine.store().counter("inmate", Counter::TimesJailed).unwrap(), 1);
    assert!(engine.world().has_notice("inmate", "custody.jailed"));
    assert!(engine.world().has_notice("warden", "custody.arrest_announced"));
    assert!(engine.world().has_notice("guard", "custody.arrest_announced"));
}

#[test]
fn rejected_jailing_only_notifies_the_enforcer() {
    let mut engine = build("custody-reject", 2.0);
    engine.world_mut().set_jailing_mode(JailingMode::Reject);
    engine.set_wanted("inmate", 2, "fight").unwrap();
    hold(&mut engine);

    engine.run_ticks(201).unwrap();
    assert!(engine.world().has_notice("guard", "custody.failed"));
    assert_eq!(engine.level_of("inmate"), 2);
    assert!(engine.world().jailed().is_empty());
    assert!(!engine.is_awaiting_jailing("inmate"));
    assert_eq!(engine.store().counter("guard", Counter::Arrests).unwrap(), 0);
}

#[test]
fn pending_jailing_blocks_a_second_custody() {
    let mut engine = build("custody-defer", 2.0);
    engine.world_mut().set_jailing_mode(JailingMode::Defer);
    hold(&mut engine);

    engine.run_ticks(205).unwrap();
    assert!(!engine.is_in_countdown("inmate"));
    assert!(engine.is_awaiting_jailing("inmate"));
    assert_eq!(
        engine.start_custody("guard", "inmate", "arrest").unwrap(),
        Err(CustodyRejection::AwaitingJailing)
    );

    assert_eq!(engine.world_mut().resolve_deferred(true), 1);
    engine.run_ticks(1).unwrap();
    assert!(!engine.is_awaiting_jailing("inmate"));
    assert_eq!(engine.world().jailed().len(), 1);
}

#[test]
fn custody_of_a_chased_target_skips_flee_detection() {
    let mut engine = build("custody-pursuit", 2.0);
    let chase = engine.start_chase("guard", "inmate").unwrap().unwrap();
    hold(&mut engine);
    assert!(engine.custody_session("inmate").unwrap().skip_flee_detection);

    // Four blocks of movement would count as fleeing otherwise.
    engine.world_mut().move_to("inmate", yard(-2.0));
    engine.run_ticks(1).unwrap();
    assert!(engine.is_in_countdown("inmate"));

    engine.run_ticks(200).unwrap();
    assert!(engine.chase_session_for("inmate").is_none());
    assert_eq!(engine.store().chase_end_reason(&chase).unwrap().as_deref(), Some("captured"));
}

#[test]
fn unusable_position_ends_the_countdown() {
    let mut engine = build("custody-nan", 2.0);
    hold(&mut engine);

    engine.world_mut().move_to("inmate", Position::new("yard", f64::NAN, 64.0, 0.0));
    engine.run_ticks(1).unwrap();

    assert!(!engine.is_in_countdown("inmate"));
    assert!(cancelled_with(&engine, "guard", "internal error"));
    assert!(engine.chase_session_for("inmate").is_none());
}

#[test]
fn cancel_completes_when_a_client_is_unreachable() {
    let mut engine = build("custody-cancel-ui", 2.0);
    hold(&mut engine);
    engine.world_mut().fail_presentation_for("inmate");

    assert!(engine.cancel_custody("inmate").unwrap());

    assert!(!engine.is_in_countdown("inmate"));
    assert!(!engine.minigame_active("inmate"));
    assert!(engine.world().progress_of("guard", ProgressKind::Custody).is_none());
    assert!(cancelled_with(&engine, "guard", "called off"));
    engine.run_ticks(200).unwrap();
    assert!(engine.world().jailed().is_empty());
}
