//! stage-runner: drives a small multi-actor program on a frame clock.
//!
//! Every actor gets a Start script (glide, wait, formula, broadcast), a
//! receiver for the shared `ping` message, a tap handler, and a receiver for
//! the `finale` broadcast that the first actor sends and waits on. Actions
//! finish after as many frames as their duration covers. Metrics are printed
//! as JSON on exit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};

use stage_core::{load_dotenv, SchedulerConfig};
use stage_scheduler::{
    Action, ActionCompletion, ActorSurface, BroadcastMode, BroadcastRegistry, ContextKind,
    DurationSpec, Instruction, Scheduler, ScriptContext, SequenceScript,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Run a demo program through the script scheduler.
#[derive(Parser, Debug)]
#[command(name = "stage-runner", version, about)]
struct Cli {
    /// Path to a scheduler TOML config. Without it, STAGE_* variables are used.
    #[arg(long, env = "STAGE_CONFIG")]
    config: Option<String>,

    /// Number of actors on stage.
    #[arg(long, default_value_t = 3)]
    actors: usize,

    /// Maximum number of frames to run.
    #[arg(long, default_value_t = 240)]
    frames: u64,

    /// Frame length in milliseconds.
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    /// Frame on which the first actor is tapped.
    #[arg(long, default_value_t = 10)]
    tap_frame: u64,
}

// ── Frame clock ─────────────────────────────────────────────────────

struct InFlight {
    actor: String,
    action: String,
    frames_left: u64,
    completion: ActionCompletion,
}

/// Actions in progress on every actor, advanced once per frame.
#[derive(Clone, Default)]
struct FrameClock {
    in_flight: Arc<Mutex<Vec<InFlight>>>,
}

impl FrameClock {
    fn in_flight(&self) -> MutexGuard<'_, Vec<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self, entry: InFlight) {
        self.in_flight().push(entry);
    }

    /// Advance one frame and complete every action that ran out.
    fn tick(&self) -> usize {
        let finished: Vec<InFlight> = {
            let mut in_flight = self.in_flight();
            for entry in in_flight.iter_mut() {
                entry.frames_left = entry.frames_left.saturating_sub(1);
            }
            let (done, running): (Vec<_>, Vec<_>) =
                in_flight.drain(..).partition(|entry| entry.frames_left == 0);
            *in_flight = running;
            done
        };
        let count = finished.len();
        for entry in finished {
            debug!(actor = %entry.actor, action = %entry.action, "action finished");
            entry.completion.complete();
        }
        count
    }

    fn is_idle(&self) -> bool {
        self.in_flight().is_empty()
    }
}

/// Actor surface that plays actions against the frame clock.
struct FrameSurface {
    name: String,
    clock: FrameClock,
    frame: Duration,
}

fn describe(action: &Action) -> String {
    match action {
        Action::Single(single) => single.name().to_string(),
        Action::Group(members) => format!("group({})", members.len()),
    }
}

impl ActorSurface for FrameSurface {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, action: Action, on_complete: ActionCompletion) {
        let frames = action.duration().as_millis().div_ceil(self.frame.as_millis().max(1));
        let frames = u64::try_from(frames).unwrap_or(u64::MAX).max(1);
        debug!(actor = %self.name, action = %describe(&action), frames, "action started");
        self.clock.start(InFlight {
            actor: self.name.clone(),
            action: describe(&action),
            frames_left: frames,
            completion: on_complete,
        });
    }
}

// ── Program ─────────────────────────────────────────────────────────

fn actor_name(index: usize) -> String {
    format!("actor-{}", index + 1)
}

fn broadcast(message: &'static str, mode: BroadcastMode) -> impl Fn() -> Instruction {
    move || {
        Instruction::high_priority(move |id, scheduler, broadcasts| {
            broadcasts.perform_broadcast(message, id, mode, scheduler)?;
            if mode == BroadcastMode::Plain {
                scheduler.resume_context(id)?;
            }
            Ok(())
        })
    }
}

fn vibrate(actor: String) -> impl Fn() -> Instruction {
    move || {
        let actor = actor.clone();
        Instruction::closure(move |id, scheduler| {
            scheduler
                .effects()
                .submit(move || debug!(actor = %actor, "vibrate"));
            scheduler.resume_context(id)
        })
    }
}

fn build_program(
    scheduler: &mut Scheduler,
    registry: &BroadcastRegistry,
    clock: &FrameClock,
    actors: usize,
    frame: Duration,
) -> anyhow::Result<()> {
    for index in 0..actors {
        let name = actor_name(index);
        scheduler.register_actor(Box::new(FrameSurface {
            name: name.clone(),
            clock: clock.clone(),
            frame,
        }))?;

        let mut main = SequenceScript::new(format!("main-{}", index + 1))
            .step(|| Instruction::Action(Action::timed("glide", Duration::from_millis(120))))
            .step(|| Instruction::wait(|| thread::sleep(Duration::from_millis(30))))
            .step(|| Instruction::formula_buffer(|| thread::sleep(Duration::from_millis(5))))
            .step(broadcast("ping", BroadcastMode::Plain))
            .step(vibrate(name.clone()));
        if index == 0 {
            main = main.step(broadcast("finale", BroadcastMode::AndWait));
        }
        scheduler.register_context(ScriptContext::new(name.as_str(), ContextKind::Start, main))?;

        let spin_seconds = 0.05 * (index + 1) as f64;
        let on_ping = SequenceScript::new(format!("on-ping-{}", index + 1)).step(move || {
            Instruction::long_action(
                DurationSpec::Formula(Box::new(move || spin_seconds)),
                |duration| Action::timed("spin", duration),
            )
        });
        let on_ping = scheduler.register_context(ScriptContext::new(
            name.as_str(),
            ContextKind::Broadcast,
            on_ping,
        ))?;
        registry.subscribe("ping", on_ping);

        let on_finale = SequenceScript::new(format!("on-finale-{}", index + 1))
            .step(|| Instruction::Action(Action::timed("bow", Duration::from_millis(80))));
        let on_finale = scheduler.register_context(ScriptContext::new(
            name.as_str(),
            ContextKind::Broadcast,
            on_finale,
        ))?;
        registry.subscribe("finale", on_finale);

        let on_tap = SequenceScript::new(format!("on-tap-{}", index + 1))
            .step(|| {
                Instruction::Action(Action::merge(vec![
                    Action::timed("bounce", Duration::from_millis(60)),
                    Action::timed("flash", Duration::from_millis(40)),
                ])
                .unwrap_or_else(|| Action::timed("bounce", Duration::from_millis(60))))
            })
            .step(vibrate(name.clone()));
        scheduler.register_context(ScriptContext::new(name.as_str(), ContextKind::When, on_tap))?;
    }
    info!(actors, "program built");
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    // Fall back to the environment if the file is missing or malformed
    let config = match &cli.config {
        Some(path) => match SchedulerConfig::from_file(path) {
            Ok(cfg) => {
                info!(path = %path, "loaded scheduler config");
                cfg
            }
            Err(e) => {
                warn!(error = %e, path = %path, "failed to load config, using environment");
                SchedulerConfig::from_env()
            }
        },
        None => SchedulerConfig::from_env(),
    };
    config.log_summary();

    let registry = Arc::new(BroadcastRegistry::new());
    let mut scheduler = Scheduler::new(config, registry.clone())?;
    let clock = FrameClock::default();
    let frame = Duration::from_millis(cli.frame_ms.max(1));

    build_program(&mut scheduler, &registry, &clock, cli.actors, frame)?;

    info!("stage-runner starting");
    scheduler.run()?;

    let mut frames_run = 0;
    for frame_no in 1..=cli.frames {
        frames_run = frame_no;
        if frame_no == cli.tap_frame && cli.actors > 0 {
            info!(frame = frame_no, actor = %actor_name(0), "tap");
            scheduler.start_when_contexts_of_actor(&actor_name(0))?;
        }

        clock.tick();
        scheduler.pump()?;

        let idle = scheduler.scheduled_actors().next().is_none() && clock.is_idle();
        if idle && frame_no >= cli.tap_frame {
            info!(frame = frame_no, "program finished");
            break;
        }
        thread::sleep(frame);
    }

    let summary = scheduler.config().summary();
    let metrics = scheduler.metrics();
    scheduler.shutdown()?;

    let report = serde_json::json!({
        "frames": frames_run,
        "config": summary,
        "metrics": metrics,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!("stage-runner exited cleanly");
    Ok(())
}
