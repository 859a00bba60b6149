#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crossbeam_channel::Receiver;
    use stage_core::{ContextId, SchedulerConfig};

    use crate::scheduler::broadcast::{BroadcastHandler, BroadcastMode, BroadcastRegistry};
    use crate::scheduler::context::{Script, ScriptContext, SequenceScript};
    use crate::scheduler::error::SchedulerError;
    use crate::scheduler::instruction::{DurationSpec, Instruction};
    use crate::scheduler::runner::Scheduler;
    use crate::scheduler::surface::{Action, ActionCompletion, ActorSurface};
    use crate::scheduler::types::{ContextKind, ContextState, InstructionKind, PoolKind};

    const TIMEOUT: Duration = Duration::from_secs(5);

    type Log = Arc<Mutex<Vec<String>>>;

    fn new_log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    /// What a mock surface was asked to run.
    #[derive(Debug, Clone)]
    struct Submission {
        leaves: usize,
        duration: Duration,
        contexts: Vec<ContextId>,
    }

    /// Shared view into a [`MockSurface`] after it moves into the scheduler.
    #[derive(Clone, Default)]
    struct SurfaceProbe {
        submissions: Arc<Mutex<Vec<Submission>>>,
        held: Arc<Mutex<Vec<ActionCompletion>>>,
    }

    impl SurfaceProbe {
        fn submissions(&self) -> Vec<Submission> {
            self.submissions.lock().unwrap().clone()
        }

        fn complete_oldest(&self) {
            let completion = self.held.lock().unwrap().remove(0);
            completion.complete();
        }
    }

    /// Mock actor surface that records submissions and holds completions
    /// until the test releases them.
    struct MockSurface {
        name: String,
        probe: SurfaceProbe,
    }

    impl ActorSurface for MockSurface {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(&mut self, action: Action, on_complete: ActionCompletion) {
            self.probe.submissions.lock().unwrap().push(Submission {
                leaves: action.leaf_count(),
                duration: action.duration(),
                contexts: on_complete.contexts().collect(),
            });
            self.probe.held.lock().unwrap().push(on_complete);
        }
    }

    /// Mock broadcast handler counting lifecycle calls.
    #[derive(Default)]
    struct MockBroadcasts {
        setups: AtomicUsize,
        teardowns: AtomicUsize,
        wakes: AtomicUsize,
    }

    impl BroadcastHandler for MockBroadcasts {
        fn setup(&self) {
            self.setups.fetch_add(1, Ordering::Relaxed);
        }

        fn tear_down(&self) {
            self.teardowns.fetch_add(1, Ordering::Relaxed);
        }

        fn perform_broadcast(
            &self,
            _message: &str,
            _sender: ContextId,
            _mode: BroadcastMode,
            _scheduler: &mut Scheduler,
        ) -> Result<(), SchedulerError> {
            Ok(())
        }

        fn terminate_waiting_receivers_of(
            &self,
            _sender: ContextId,
            _scheduler: &mut Scheduler,
        ) -> Result<(), SchedulerError> {
            Ok(())
        }

        fn wake_senders_waiting_on(
            &self,
            _receiver: ContextId,
            _scheduler: &mut Scheduler,
        ) -> Result<(), SchedulerError> {
            self.wakes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Yields Invalid until `ready` is set, then one closure.
    struct RetryScript {
        ready: Arc<AtomicBool>,
        log: Log,
        done: bool,
    }

    impl Script for RetryScript {
        fn name(&self) -> &str {
            "retry"
        }

        fn next_instruction(&mut self) -> Option<Instruction> {
            if self.done {
                return None;
            }
            if !self.ready.load(Ordering::Relaxed) {
                return Some(Instruction::Invalid);
            }
            self.done = true;
            let log = Arc::clone(&self.log);
            Some(Instruction::closure(move |id, scheduler| {
                log.lock().unwrap().push("ready".to_string());
                scheduler.resume_context(id)
            }))
        }

        fn rewind(&mut self) {
            self.done = false;
        }
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            initial_wait_lanes: 1,
            lane_name_prefix: "test".to_string(),
            effect_queue_name: "test-effects".to_string(),
            ..SchedulerConfig::default()
        }
    }

    fn scheduler_with(broadcasts: Arc<dyn BroadcastHandler>) -> Scheduler {
        Scheduler::new(test_config(), broadcasts).unwrap()
    }

    fn scheduler() -> Scheduler {
        scheduler_with(Arc::new(BroadcastRegistry::new()))
    }

    fn add_actor(scheduler: &mut Scheduler, name: &str) -> SurfaceProbe {
        let probe = SurfaceProbe::default();
        scheduler
            .register_actor(Box::new(MockSurface {
                name: name.to_string(),
                probe: probe.clone(),
            }))
            .unwrap();
        probe
    }

    fn add_context(
        scheduler: &mut Scheduler,
        actor: &str,
        kind: ContextKind,
        script: impl Script + 'static,
    ) -> ContextId {
        scheduler
            .register_context(ScriptContext::new(actor, kind, script))
            .unwrap()
    }

    /// Step that records `label` and lets the script continue.
    fn log_step(log: &Log, label: &str) -> impl Fn() -> Instruction + 'static {
        let log = Arc::clone(log);
        let label = label.to_string();
        move || {
            let log = Arc::clone(&log);
            let label = label.clone();
            Instruction::closure(move |id, scheduler| {
                log.lock().unwrap().push(label);
                scheduler.resume_context(id)
            })
        }
    }

    fn broadcast_step(message: &str, mode: BroadcastMode) -> impl Fn() -> Instruction + 'static {
        let message = message.to_string();
        move || {
            let message = message.clone();
            Instruction::high_priority(move |id, scheduler, broadcasts| {
                broadcasts.perform_broadcast(&message, id, mode, scheduler)?;
                if mode == BroadcastMode::Plain {
                    scheduler.resume_context(id)?;
                }
                Ok(())
            })
        }
    }

    fn action_step(name: &str) -> impl Fn() -> Instruction + 'static {
        let name = name.to_string();
        move || Instruction::Action(Action::timed(name.clone(), Duration::from_millis(100)))
    }

    /// Wait steps that each block on the next gate in `gates`.
    fn gated_wait_step(gates: Vec<Receiver<()>>) -> impl Fn() -> Instruction + 'static {
        let gates = Arc::new(Mutex::new(VecDeque::from(gates)));
        move || {
            let gate = gates.lock().unwrap().pop_front();
            Instruction::wait(move || {
                if let Some(gate) = gate {
                    let _ = gate.recv_timeout(TIMEOUT);
                }
            })
        }
    }

    // ── Registration ────────────────────────────────────────────

    #[test]
    fn scheduler_creation() {
        let scheduler = scheduler();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.metrics().passes, 0);
        assert_eq!(scheduler.wait_pool().name(), "test-wait");
        assert_eq!(scheduler.buffer_pool().name(), "test-buffer");
        assert_eq!(scheduler.wait_pool().lanes_created(), 0);
    }

    #[test]
    fn register_actor_rejects_unnamed_and_duplicates() {
        let mut scheduler = scheduler();
        add_actor(&mut scheduler, "cat");

        let unnamed = scheduler.register_actor(Box::new(MockSurface {
            name: String::new(),
            probe: SurfaceProbe::default(),
        }));
        assert!(matches!(unnamed, Err(SchedulerError::UnnamedActor)));

        let duplicate = scheduler.register_actor(Box::new(MockSurface {
            name: "cat".to_string(),
            probe: SurfaceProbe::default(),
        }));
        assert!(matches!(duplicate, Err(SchedulerError::DuplicateActor(a)) if a.as_str() == "cat"));
    }

    #[test]
    fn register_context_requires_known_actor() {
        let mut scheduler = scheduler();
        let result = scheduler.register_context(ScriptContext::new(
            "ghost",
            ContextKind::Start,
            SequenceScript::new("s"),
        ));
        assert!(matches!(result, Err(SchedulerError::UnknownActor(_))));
    }

    #[test]
    fn is_scheduled_only_after_schedule_context() {
        let mut scheduler = scheduler();
        add_actor(&mut scheduler, "cat");
        let id = add_context(&mut scheduler, "cat", ContextKind::Ordinary, SequenceScript::new("s"));

        assert!(!scheduler.is_scheduled(id));
        scheduler.schedule_context(id).unwrap();
        assert!(scheduler.is_scheduled(id));
        assert_eq!(scheduler.context_generation(id), Some(1));
    }

    // ── Ordering and merging ────────────────────────────────────

    #[test]
    fn when_contexts_run_before_earlier_ordinary_contexts() {
        let mut scheduler = scheduler();
        add_actor(&mut scheduler, "cat");
        let log = new_log();
        let s = add_context(
            &mut scheduler,
            "cat",
            ContextKind::Ordinary,
            SequenceScript::new("s").step(log_step(&log, "S")),
        );
        let w = add_context(
            &mut scheduler,
            "cat",
            ContextKind::When,
            SequenceScript::new("w").step(log_step(&log, "W")),
        );
        assert_eq!(scheduler.registered_contexts(), &[w, s]);

        scheduler.schedule_context(s).unwrap();
        scheduler.schedule_context(w).unwrap();
        assert_eq!(scheduler.scheduled_contexts("cat"), &[w, s]);

        scheduler.run().unwrap();

        assert_eq!(entries(&log), vec!["W", "S"]);
        assert_eq!(scheduler.context_state(w), Some(ContextState::Dead));
        assert_eq!(scheduler.context_state(s), Some(ContextState::Dead));
    }

    #[test]
    fn actions_of_one_actor_merge_into_one_submission() {
        let mut scheduler = scheduler();
        let probe = add_actor(&mut scheduler, "cat");
        let ids: Vec<ContextId> = ["glide", "turn", "fade"]
            .iter()
            .map(|name| {
                add_context(
                    &mut scheduler,
                    "cat",
                    ContextKind::Start,
                    SequenceScript::new(*name).step(action_step(name)),
                )
            })
            .collect();

        scheduler.run().unwrap();

        let submissions = probe.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].leaves, 3);
        assert_eq!(submissions[0].contexts, ids);
        let metrics = scheduler.metrics();
        assert_eq!(metrics.action_submissions, 1);
        assert_eq!(metrics.largest_action_group, 3);
        for id in &ids {
            assert_eq!(scheduler.context_state(*id), Some(ContextState::Running));
        }

        probe.complete_oldest();
        assert_eq!(scheduler.pump().unwrap(), 1);

        for id in &ids {
            assert_eq!(scheduler.context_state(*id), Some(ContextState::Dead));
        }
        assert!(scheduler.scheduled_contexts("cat").is_empty());
    }

    #[test]
    fn closures_run_before_high_priority_closures() {
        let mut scheduler = scheduler();
        add_actor(&mut scheduler, "cat");
        let log = new_log();
        let hp_log = Arc::clone(&log);
        add_context(
            &mut scheduler,
            "cat",
            ContextKind::Start,
            SequenceScript::new("high").step(move || {
                let log = Arc::clone(&hp_log);
                Instruction::high_priority(move |id, scheduler, _| {
                    log.lock().unwrap().push("high".to_string());
                    scheduler.resume_context(id)
                })
            }),
        );
        add_context(
            &mut scheduler,
            "cat",
            ContextKind::Start,
            SequenceScript::new("plain").step(log_step(&log, "closure")),
        );

        scheduler.run().unwrap();

        assert_eq!(entries(&log), vec!["closure", "high"]);
    }

    #[test]
    fn start_context_runs_three_closures_then_dies() {
        let mut scheduler = scheduler();
        add_actor(&mut scheduler, "cat");
        let states = Arc::new(Mutex::new(Vec::new()));
        let mut script = SequenceScript::new("three");
        for _ in 0..3 {
            let states = Arc::clone(&states);
            script = script.step(move || {
                let states = Arc::clone(&states);
                Instruction::closure(move |id, scheduler| {
                    states.lock().unwrap().push(scheduler.context_state(id));
                    scheduler.resume_context(id)
                })
            });
        }
        let id = add_context(&mut scheduler, "cat", ContextKind::Start, script);

        scheduler.run().unwrap();

        assert_eq!(
            *states.lock().unwrap(),
            vec![Some(ContextState::Running); 3]
        );
        assert_eq!(scheduler.context_state(id), Some(ContextState::Dead));
        assert!(scheduler.scheduled_contexts("cat").is_empty());
        let metrics = scheduler.metrics();
        assert_eq!(metrics.steps_of(InstructionKind::Closure), 3);
        assert_eq!(metrics.contexts_stopped, 1);
    }

    /// An Invalid step raises no flag, so the retry needs something else to
    /// trigger the next pass; here the context is resumed by hand.
    #[test]
    fn invalid_step_is_retried_once_resumed() {
        let mut scheduler = scheduler();
        add_actor(&mut scheduler, "cat");
        let ready = Arc::new(AtomicBool::new(false));
        let log = new_log();
        let id = add_context(
            &mut scheduler,
            "cat",
            ContextKind::Start,
            RetryScript {
                ready: Arc::clone(&ready),
                log: Arc::clone(&log),
                done: false,
            },
        );

        scheduler.run().unwrap();
        assert_eq!(scheduler.context_state(id), Some(ContextState::Runnable));
        assert!(scheduler.is_scheduled(id));
        assert_eq!(scheduler.metrics().steps_of(InstructionKind::Invalid), 1);

        ready.store(true, Ordering::Relaxed);
        scheduler.resume_context(id).unwrap();
        scheduler.pump().unwrap();

        assert_eq!(entries(&log), vec!["ready"]);
        assert_eq!(scheduler.context_state(id), Some(ContextState::Dead));
    }

    #[test]
    fn long_action_duration_comes_from_formula() {
        let mut scheduler = scheduler();
        let probe = add_actor(&mut scheduler, "cat");
        let id = add_context(
            &mut scheduler,
            "cat",
            ContextKind::Start,
            SequenceScript::new("glide").step(|| {
                Instruction::long_action(DurationSpec::Formula(Box::new(|| 0.25)), |duration| {
                    Action::timed("glide", duration)
                })
            }),
        );

        scheduler.run().unwrap();

        let submissions = probe.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].duration, Duration::from_millis(250));
        assert_eq!(submissions[0].contexts, vec![id]);
        let metrics = scheduler.metrics();
        assert_eq!(metrics.long_action_submissions, 1);
        assert_eq!(metrics.action_submissions, 0);

        probe.complete_oldest();
        scheduler.pump().unwrap();
        assert_eq!(scheduler.context_state(id), Some(ContextState::Dead));
    }

    // ── Background work ─────────────────────────────────────────

    #[test]
    fn run_seeds_wait_pool() {
        let mut scheduler = scheduler_with(Arc::new(BroadcastRegistry::new()));
        assert_eq!(scheduler.wait_pool().lanes_created(), 0);
        scheduler.run().unwrap();
        assert_eq!(scheduler.wait_pool().lanes_created(), 1);
    }

    #[test]
    fn buffer_step_rejoins_on_control_thread() {
        let mut scheduler = scheduler();
        add_actor(&mut scheduler, "cat");
        let log = new_log();
        let (tx, rx) = crossbeam_channel::unbounded::<()>();
        let gate = Arc::new(Mutex::new(Some(rx)));
        let id = add_context(
            &mut scheduler,
            "cat",
            ContextKind::Start,
            SequenceScript::new("buffered")
                .step(move || {
                    let gate = gate.lock().unwrap().take();
                    Instruction::formula_buffer(move || {
                        if let Some(gate) = gate {
                            let _ = gate.recv_timeout(TIMEOUT);
                        }
                    })
                })
                .step(log_step(&log, "after")),
        );

        scheduler.run().unwrap();
        assert_eq!(scheduler.context_state(id), Some(ContextState::Running));
        assert_eq!(scheduler.metrics().background_dispatched[&PoolKind::Buffer], 1);

        tx.send(()).unwrap();
        assert_eq!(scheduler.pump_timeout(TIMEOUT).unwrap(), 1);

        assert_eq!(entries(&log), vec!["after"]);
        assert_eq!(scheduler.context_state(id), Some(ContextState::Dead));
        assert_eq!(scheduler.buffer_pool().lanes_created(), 1);
    }

    #[test]
    fn stale_background_completion_is_dropped() {
        let mut scheduler = scheduler();
        add_actor(&mut scheduler, "cat");
        let (first_tx, first_rx) = crossbeam_channel::unbounded();
        let (second_tx, second_rx) = crossbeam_channel::unbounded();
        let id = add_context(
            &mut scheduler,
            "cat",
            ContextKind::Start,
            SequenceScript::new("wait").step(gated_wait_step(vec![first_rx, second_rx])),
        );

        scheduler.run().unwrap();
        assert_eq!(scheduler.context_state(id), Some(ContextState::Running));
        assert_eq!(scheduler.context_generation(id), Some(1));

        // Restart while the first wait is still in flight.
        scheduler.schedule_context(id).unwrap();
        scheduler.pump().unwrap();
        assert_eq!(scheduler.context_state(id), Some(ContextState::Running));
        assert_eq!(scheduler.context_generation(id), Some(2));

        first_tx.send(()).unwrap();
        assert_eq!(scheduler.pump_timeout(TIMEOUT).unwrap(), 1);
        assert_eq!(scheduler.context_state(id), Some(ContextState::Running));
        assert_eq!(scheduler.metrics().stale_completions, 1);

        second_tx.send(()).unwrap();
        assert_eq!(scheduler.pump_timeout(TIMEOUT).unwrap(), 1);
        assert_eq!(scheduler.context_state(id), Some(ContextState::Dead));
        assert_eq!(scheduler.metrics().background_dispatched[&PoolKind::Wait], 2);
    }

    // ── Stopping ────────────────────────────────────────────────

    #[test]
    fn stopping_a_dead_context_is_a_noop() {
        let broadcasts = Arc::new(MockBroadcasts::default());
        let mut scheduler = scheduler_with(broadcasts.clone());
        add_actor(&mut scheduler, "cat");
        let id = add_context(&mut scheduler, "cat", ContextKind::Broadcast, SequenceScript::new("b"));
        scheduler.schedule_context(id).unwrap();

        scheduler.stop_context(id, true).unwrap();
        scheduler.stop_context(id, true).unwrap();

        assert_eq!(broadcasts.wakes.load(Ordering::Relaxed), 1);
        assert_eq!(scheduler.metrics().contexts_stopped, 1);
        assert!(!scheduler.is_scheduled(id));
    }

    #[test]
    fn stop_without_notify_skips_waiting_senders() {
        let broadcasts = Arc::new(MockBroadcasts::default());
        let mut scheduler = scheduler_with(broadcasts.clone());
        add_actor(&mut scheduler, "cat");
        let id = add_context(&mut scheduler, "cat", ContextKind::Broadcast, SequenceScript::new("b"));

        scheduler.stop_context(id, false).unwrap();

        assert_eq!(broadcasts.wakes.load(Ordering::Relaxed), 0);
        assert_eq!(scheduler.context_state(id), Some(ContextState::Dead));
    }

    // ── Lifecycle ───────────────────────────────────────────────

    #[test]
    fn run_twice_is_rejected() {
        let mut scheduler = scheduler();
        scheduler.run().unwrap();
        assert!(matches!(scheduler.run(), Err(SchedulerError::AlreadyRunning)));
    }

    #[test]
    fn when_contexts_start_on_demand() {
        let mut scheduler = scheduler();
        add_actor(&mut scheduler, "cat");
        let log = new_log();
        add_context(
            &mut scheduler,
            "cat",
            ContextKind::When,
            SequenceScript::new("tapped").step(log_step(&log, "tap")),
        );

        scheduler.run().unwrap();
        assert!(entries(&log).is_empty());

        scheduler.start_when_contexts_of_actor("cat").unwrap();
        assert_eq!(entries(&log), vec!["tap"]);

        scheduler.start_when_contexts_of_actor("nobody").unwrap();
        assert_eq!(entries(&log), vec!["tap"]);
    }

    #[test]
    fn pause_holds_passes_and_effects_until_resume() {
        let mut scheduler = scheduler();
        add_actor(&mut scheduler, "cat");
        let log = new_log();
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let id = add_context(
            &mut scheduler,
            "cat",
            ContextKind::Start,
            SequenceScript::new("paused")
                .step(gated_wait_step(vec![gate_rx]))
                .step(log_step(&log, "after")),
        );

        scheduler.run().unwrap();
        scheduler.pause().unwrap();
        assert!(!scheduler.is_running());
        assert!(scheduler.effects().is_suspended());
        let passes = scheduler.metrics().passes;

        let (effect_tx, effect_rx) = crossbeam_channel::unbounded();
        scheduler.effects().submit(move || effect_tx.send(()).unwrap());

        gate_tx.send(()).unwrap();
        assert_eq!(scheduler.pump_timeout(TIMEOUT).unwrap(), 1);
        assert_eq!(scheduler.context_state(id), Some(ContextState::Runnable));
        assert!(entries(&log).is_empty());
        assert_eq!(scheduler.metrics().passes, passes);
        assert!(effect_rx.recv_timeout(Duration::from_millis(50)).is_err());

        scheduler.resume().unwrap();

        assert_eq!(entries(&log), vec!["after"]);
        assert_eq!(scheduler.context_state(id), Some(ContextState::Dead));
        effect_rx.recv_timeout(TIMEOUT).unwrap();
    }

    #[test]
    fn shutdown_clears_tables_and_drops_late_completions() {
        let broadcasts = Arc::new(MockBroadcasts::default());
        let mut scheduler = scheduler_with(broadcasts.clone());
        let probe = add_actor(&mut scheduler, "cat");
        let id = add_context(
            &mut scheduler,
            "cat",
            ContextKind::Start,
            SequenceScript::new("moving").step(action_step("glide")),
        );

        scheduler.run().unwrap();
        assert_eq!(broadcasts.setups.load(Ordering::Relaxed), 1);

        scheduler.shutdown().unwrap();

        assert!(!scheduler.is_running());
        assert_eq!(broadcasts.teardowns.load(Ordering::Relaxed), 1);
        assert_eq!(broadcasts.wakes.load(Ordering::Relaxed), 0);
        assert_eq!(scheduler.context_state(id), None);
        assert_eq!(scheduler.scheduled_actors().count(), 0);
        assert!(scheduler.registered_contexts().is_empty());
        assert_eq!(scheduler.metrics().contexts_stopped, 1);

        probe.complete_oldest();
        assert_eq!(scheduler.pump().unwrap(), 1);
        assert_eq!(scheduler.metrics().stale_completions, 1);
    }

    // ── Broadcasts ──────────────────────────────────────────────

    #[test]
    fn high_priority_broadcast_promotes_receiver_before_run_returns() {
        let registry = Arc::new(BroadcastRegistry::new());
        let mut scheduler = scheduler_with(registry.clone());
        add_actor(&mut scheduler, "alice");
        add_actor(&mut scheduler, "bob");
        let sender = add_context(
            &mut scheduler,
            "alice",
            ContextKind::Start,
            SequenceScript::new("sender").step(broadcast_step("go", BroadcastMode::Plain)),
        );
        let receiver = add_context(
            &mut scheduler,
            "bob",
            ContextKind::Broadcast,
            SequenceScript::new("receiver").step(|| Instruction::Invalid),
        );
        registry.subscribe("go", receiver);

        scheduler.run().unwrap();

        assert!(scheduler.is_scheduled(receiver));
        assert_eq!(scheduler.context_state(receiver), Some(ContextState::Runnable));
        assert_eq!(scheduler.context_state(sender), Some(ContextState::Dead));
        assert_eq!(scheduler.metrics().promotions, 1);
    }

    #[test]
    fn broadcast_receiver_runs_before_run_returns() {
        let registry = Arc::new(BroadcastRegistry::new());
        let mut scheduler = scheduler_with(registry.clone());
        add_actor(&mut scheduler, "alice");
        add_actor(&mut scheduler, "bob");
        let log = new_log();
        add_context(
            &mut scheduler,
            "alice",
            ContextKind::Start,
            SequenceScript::new("sender").step(broadcast_step("go", BroadcastMode::Plain)),
        );
        let receiver = add_context(
            &mut scheduler,
            "bob",
            ContextKind::Broadcast,
            SequenceScript::new("receiver").step(log_step(&log, "B")),
        );
        registry.subscribe("go", receiver);

        scheduler.run().unwrap();

        assert_eq!(entries(&log), vec!["B"]);
        assert_eq!(scheduler.context_state(receiver), Some(ContextState::Dead));
    }

    #[test]
    fn broadcast_and_wait_parks_sender_until_receiver_finishes() {
        let registry = Arc::new(BroadcastRegistry::new());
        let mut scheduler = scheduler_with(registry.clone());
        add_actor(&mut scheduler, "alice");
        let bob = add_actor(&mut scheduler, "bob");
        let log = new_log();
        let sender = add_context(
            &mut scheduler,
            "alice",
            ContextKind::Start,
            SequenceScript::new("sender")
                .step(broadcast_step("go", BroadcastMode::AndWait))
                .step(log_step(&log, "sender-after")),
        );
        let receiver = add_context(
            &mut scheduler,
            "bob",
            ContextKind::Broadcast,
            SequenceScript::new("receiver").step(action_step("spin")),
        );
        registry.subscribe("go", receiver);

        scheduler.run().unwrap();

        assert_eq!(scheduler.context_state(sender), Some(ContextState::Waiting));
        assert_eq!(scheduler.context_state(receiver), Some(ContextState::Running));
        assert_eq!(registry.awaited_by(sender), vec![receiver]);
        assert!(entries(&log).is_empty());

        bob.complete_oldest();
        scheduler.pump().unwrap();

        assert_eq!(entries(&log), vec!["sender-after"]);
        assert!(!registry.is_waiting(sender));
        assert_eq!(scheduler.context_state(sender), Some(ContextState::Dead));
        assert_eq!(scheduler.context_state(receiver), Some(ContextState::Dead));
    }

    #[test]
    fn broadcast_and_wait_without_receivers_continues() {
        let registry = Arc::new(BroadcastRegistry::new());
        let mut scheduler = scheduler_with(registry.clone());
        add_actor(&mut scheduler, "alice");
        let log = new_log();
        let sender = add_context(
            &mut scheduler,
            "alice",
            ContextKind::Start,
            SequenceScript::new("sender")
                .step(broadcast_step("nobody-listens", BroadcastMode::AndWait))
                .step(log_step(&log, "after")),
        );

        scheduler.run().unwrap();

        assert_eq!(entries(&log), vec!["after"]);
        assert_eq!(scheduler.context_state(sender), Some(ContextState::Dead));
    }

    #[test]
    fn restarting_waiting_sender_stops_its_receivers() {
        let registry = Arc::new(BroadcastRegistry::new());
        let mut scheduler = scheduler_with(registry.clone());
        add_actor(&mut scheduler, "alice");
        let bob = add_actor(&mut scheduler, "bob");
        let sender = add_context(
            &mut scheduler,
            "alice",
            ContextKind::Broadcast,
            SequenceScript::new("sender").step(broadcast_step("go", BroadcastMode::AndWait)),
        );
        let receiver = add_context(
            &mut scheduler,
            "bob",
            ContextKind::Broadcast,
            SequenceScript::new("receiver").step(action_step("spin")),
        );
        registry.subscribe("go", receiver);

        scheduler.run().unwrap();
        scheduler.start_broadcast_contexts(&[sender]).unwrap();
        scheduler.pump().unwrap();

        assert_eq!(scheduler.context_state(sender), Some(ContextState::Waiting));
        assert_eq!(scheduler.context_state(receiver), Some(ContextState::Running));
        assert_eq!(bob.submissions().len(), 1);

        scheduler.start_broadcast_contexts(&[sender]).unwrap();

        assert_eq!(scheduler.context_state(receiver), Some(ContextState::Dead));
        assert!(!registry.is_waiting(sender));

        scheduler.pump().unwrap();

        assert_eq!(scheduler.context_state(sender), Some(ContextState::Waiting));
        assert_eq!(scheduler.context_state(receiver), Some(ContextState::Running));
        assert_eq!(scheduler.context_generation(receiver), Some(2));
        assert_eq!(bob.submissions().len(), 2);

        // The first receiver run finishing late changes nothing.
        bob.complete_oldest();
        scheduler.pump().unwrap();
        assert_eq!(scheduler.metrics().stale_completions, 1);
        assert_eq!(scheduler.context_state(receiver), Some(ContextState::Running));
        assert_eq!(scheduler.context_state(sender), Some(ContextState::Waiting));
    }

    #[test]
    fn action_completion_promotes_pending_contexts() {
        let mut scheduler = scheduler();
        let probe = add_actor(&mut scheduler, "cat");
        let log = new_log();
        add_context(
            &mut scheduler,
            "cat",
            ContextKind::Start,
            SequenceScript::new("moving").step(action_step("glide")),
        );
        let receiver = add_context(
            &mut scheduler,
            "cat",
            ContextKind::Broadcast,
            SequenceScript::new("receiver").step(log_step(&log, "B")),
        );

        scheduler.run().unwrap();
        scheduler.start_broadcast_contexts(&[receiver]).unwrap();
        scheduler.pump().unwrap();

        assert_eq!(scheduler.pending_contexts("cat"), &[receiver]);
        assert!(!scheduler.is_scheduled(receiver));
        assert!(entries(&log).is_empty());

        probe.complete_oldest();
        scheduler.pump().unwrap();

        assert_eq!(entries(&log), vec!["B"]);
        assert!(scheduler.pending_contexts("cat").is_empty());
        assert_eq!(scheduler.context_state(receiver), Some(ContextState::Dead));
    }

    #[test]
    fn broadcast_and_wait_to_own_actor_runs_receiver() {
        let registry = Arc::new(BroadcastRegistry::new());
        let mut scheduler = scheduler_with(registry.clone());
        add_actor(&mut scheduler, "cat");
        let log = new_log();
        let sender = add_context(
            &mut scheduler,
            "cat",
            ContextKind::Start,
            SequenceScript::new("sender")
                .step(broadcast_step("go", BroadcastMode::AndWait))
                .step(log_step(&log, "after")),
        );
        let receiver = add_context(
            &mut scheduler,
            "cat",
            ContextKind::Broadcast,
            SequenceScript::new("receiver").step(log_step(&log, "recv")),
        );
        registry.subscribe("go", receiver);

        scheduler.run().unwrap();

        assert_eq!(entries(&log), vec!["recv", "after"]);
        assert_eq!(scheduler.context_state(sender), Some(ContextState::Dead));
        assert_eq!(scheduler.context_state(receiver), Some(ContextState::Dead));
        assert!(scheduler.pending_contexts("cat").is_empty());
        assert!(!registry.is_waiting(sender));
    }

    #[test]
    fn finished_script_promotes_pending_while_action_runs() {
        let registry = Arc::new(BroadcastRegistry::new());
        let mut scheduler = scheduler_with(registry.clone());
        let probe = add_actor(&mut scheduler, "cat");
        let log = new_log();
        let mover = add_context(
            &mut scheduler,
            "cat",
            ContextKind::Start,
            SequenceScript::new("moving").step(action_step("glide")),
        );
        let caller = add_context(
            &mut scheduler,
            "cat",
            ContextKind::Start,
            SequenceScript::new("caller").step(broadcast_step("c", BroadcastMode::Plain)),
        );
        let receiver = add_context(
            &mut scheduler,
            "cat",
            ContextKind::Broadcast,
            SequenceScript::new("receiver").step(log_step(&log, "rc")),
        );
        registry.subscribe("c", receiver);

        scheduler.run().unwrap();

        // The glide is still in flight; the receiver ran anyway.
        assert_eq!(probe.submissions().len(), 1);
        assert_eq!(scheduler.context_state(mover), Some(ContextState::Running));
        assert_eq!(scheduler.context_state(caller), Some(ContextState::Dead));
        assert_eq!(entries(&log), vec!["rc"]);
        assert_eq!(scheduler.context_state(receiver), Some(ContextState::Dead));
        assert!(scheduler.pending_contexts("cat").is_empty());
    }

    #[test]
    fn sweep_promotes_idle_actors_in_pending_order() {
        let mut scheduler = scheduler();
        for name in ["busy", "cat", "dog", "cow"] {
            add_actor(&mut scheduler, name);
        }
        let main = add_context(&mut scheduler, "busy", ContextKind::Start, SequenceScript::new("main"));
        let held = add_context(&mut scheduler, "busy", ContextKind::Broadcast, SequenceScript::new("held"));
        let cat = add_context(&mut scheduler, "cat", ContextKind::Broadcast, SequenceScript::new("c"));
        let dog = add_context(&mut scheduler, "dog", ContextKind::Broadcast, SequenceScript::new("d"));
        let cow = add_context(&mut scheduler, "cow", ContextKind::Broadcast, SequenceScript::new("w"));

        scheduler.schedule_context(main).unwrap();
        for id in [cow, dog, held, cat] {
            scheduler.put_on_hold(id).unwrap();
        }

        scheduler
            .schedule_broadcast_receivers(&"cat".into(), true)
            .unwrap();

        let actors: Vec<&str> = scheduler.scheduled_actors().map(|a| a.as_str()).collect();
        assert_eq!(actors, vec!["busy", "cat", "cow", "dog"]);
        assert_eq!(scheduler.scheduled_contexts("cat"), &[cat]);
        assert_eq!(scheduler.scheduled_contexts("cow"), &[cow]);
        assert_eq!(scheduler.scheduled_contexts("dog"), &[dog]);
        assert_eq!(scheduler.scheduled_contexts("busy"), &[main]);
        assert_eq!(scheduler.pending_contexts("busy"), &[held]);
        assert_eq!(scheduler.metrics().promotions, 3);
    }

    #[test]
    fn sweep_without_others_promotes_only_the_named_actor() {
        let mut scheduler = scheduler();
        add_actor(&mut scheduler, "cat");
        add_actor(&mut scheduler, "dog");
        let cat = add_context(&mut scheduler, "cat", ContextKind::Broadcast, SequenceScript::new("c"));
        let dog = add_context(&mut scheduler, "dog", ContextKind::Broadcast, SequenceScript::new("d"));
        scheduler.put_on_hold(dog).unwrap();
        scheduler.put_on_hold(cat).unwrap();

        scheduler
            .schedule_broadcast_receivers(&"cat".into(), false)
            .unwrap();

        assert_eq!(scheduler.scheduled_contexts("cat"), &[cat]);
        assert_eq!(scheduler.pending_contexts("dog"), &[dog]);
        assert!(!scheduler.is_scheduled(dog));
        assert_eq!(scheduler.metrics().promotions, 1);
    }

    #[test]
    fn put_on_hold_raises_new_work_once() {
        let mut scheduler = scheduler();
        add_actor(&mut scheduler, "cat");
        let id = add_context(&mut scheduler, "cat", ContextKind::Broadcast, SequenceScript::new("b"));

        scheduler.put_on_hold(id).unwrap();
        assert!(scheduler.new_work);
        assert_eq!(scheduler.pending_contexts("cat"), &[id]);

        scheduler.new_work = false;
        scheduler.put_on_hold(id).unwrap();
        assert!(!scheduler.new_work);
        assert_eq!(scheduler.pending_contexts("cat"), &[id]);
        assert_eq!(scheduler.context_generation(id), Some(2));
    }
}
