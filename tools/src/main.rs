//! incident-runner: headless driver for the incident engine.
//!
//! Reads one JSON command per line and answers each with one JSON line.
//! The world is a sandbox: actors, zones and the jailing collaborator are
//! scripted through the same stream.
//!
//! Usage:
//!   incident-runner --seed 12345 --db run.db --data-dir ./data
//!   incident-runner --seed 12345 --script scenario.jsonl

use anyhow::{Context, Result};
use cellblock_core::{
    command::{CommandOutcome, IncidentCommand},
    config::IncidentConfig,
    engine::IncidentEngine,
    sandbox::{JailingMode, SandboxWorld},
    snapshot::IncidentSnapshot,
    store::SimStore,
    types::Position,
};
use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};

type Engine = IncidentEngine<SandboxWorld, SimStore>;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Spawn {
        actor: String,
        world: String,
        x: f64,
        y: f64,
        z: f64,
        #[serde(default)]
        enforcer: bool,
    },
    Move {
        actor: String,
        world: String,
        x: f64,
        y: f64,
        z: f64,
    },
    Disconnect {
        actor: String,
    },
    Reconnect {
        actor: String,
    },
    Zone {
        name: String,
        world: String,
        min: [f64; 3],
        max: [f64; 3],
    },
    Contraband {
        actor: String,
        items: u32,
    },
    Jailing {
        mode: JailingMode,
    },
    ResolveJailing {
        accepted: bool,
    },
    Engine {
        command: IncidentCommand,
    },
    Tick {
        count: u64,
    },
    GetState,
    Quit,
}

#[derive(serde::Serialize)]
struct Reply {
    tick: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<CommandOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<IncidentSnapshot>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");
    let script = flag_value(&args, "--script");

    let started = chrono::Utc::now();
    let db_effective = if db == ":memory:" {
        format!("file:incident_{}?mode=memory&cache=shared", started.timestamp())
    } else {
        db.to_string()
    };
    let store = SimStore::open(&db_effective)?;
    store.migrate()?;

    let run_id = format!("run-{seed}-{}", started.format("%Y%m%dT%H%M%S"));
    store.insert_run(&run_id, seed, env!("CARGO_PKG_VERSION"))?;

    let config = IncidentConfig::load(data_dir)?;
    let mut engine = IncidentEngine::new(run_id.clone(), seed, config, SandboxWorld::new(), store);
    log::info!("incident-runner: run {run_id} (seed {seed}, data {data_dir})");

    match script {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Cannot open script {path}"))?;
            run_loop(&mut engine, BufReader::new(file))?;
        }
        None => run_loop(&mut engine, io::stdin().lock())?,
    }

    print_summary(&engine, &run_id)
}

fn run_loop(engine: &mut Engine, mut input: impl BufRead) -> Result<()> {
    let mut stdout = io::stdout();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = input.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let reply = handle(engine, cmd)?;
        writeln!(stdout, "{}", serde_json::to_string(&reply)?)?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle(engine: &mut Engine, cmd: IpcCommand) -> Result<Reply> {
    let mut outcome = None;
    let mut state = None;

    match cmd {
        IpcCommand::Spawn { actor, world, x, y, z, enforcer } => {
            let position = Position::new(world, x, y, z);
            if enforcer {
                engine.world_mut().spawn_enforcer(&actor, position);
            } else {
                engine.world_mut().spawn(&actor, position);
            }
            engine.actor_joined(&actor)?;
        }
        IpcCommand::Move { actor, world, x, y, z } => {
            engine.world_mut().move_to(&actor, Position::new(world, x, y, z));
        }
        IpcCommand::Disconnect { actor } => {
            engine.world_mut().disconnect(&actor);
            engine.actor_left(&actor)?;
        }
        IpcCommand::Reconnect { actor } => {
            engine.world_mut().reconnect(&actor);
            engine.actor_joined(&actor)?;
        }
        IpcCommand::Zone { name, world, min, max } => {
            engine.world_mut().add_zone(&name, &world, min, max);
        }
        IpcCommand::Contraband { actor, items } => {
            engine.world_mut().give_contraband(&actor, items);
        }
        IpcCommand::Jailing { mode } => {
            engine.world_mut().set_jailing_mode(mode);
        }
        IpcCommand::ResolveJailing { accepted } => {
            let answered = engine.world_mut().resolve_deferred(accepted);
            log::debug!("incident-runner: answered {answered} held jailing requests");
        }
        IpcCommand::Engine { command } => {
            outcome = Some(engine.execute(command)?);
        }
        IpcCommand::Tick { count } => {
            engine.run_ticks(count)?;
        }
        IpcCommand::GetState => {
            state = Some(engine.snapshot());
        }
        IpcCommand::Quit => {}
    }

    Ok(Reply { tick: engine.clock.current_tick, outcome, state })
}

fn print_summary(engine: &Engine, run_id: &str) -> Result<()> {
    let store = engine.store();
    eprintln!("=== RUN SUMMARY ===");
    eprintln!("  run_id:        {run_id}");
    eprintln!("  final tick:    {} ({:.1} s)", engine.clock.current_tick, engine.clock.seconds_elapsed());
    eprintln!("  events logged: {}", store.event_count(run_id)?);
    eprintln!("  open chases:   {}", store.open_chase_count()?);
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
