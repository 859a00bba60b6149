//! The actor's own action runner and the actions it accepts.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::Sender;
use stage_core::{ActorId, ContextId};
use tracing::debug;

use super::control::ControlEvent;

/// An action the render engine knows how to play on an actor.
pub trait ActorAction: fmt::Debug {
    fn name(&self) -> &str;
    fn duration(&self) -> Duration;
}

/// A plain named action with a fixed duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedAction {
    name: String,
    duration: Duration,
}

impl TimedAction {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
        }
    }
}

impl ActorAction for TimedAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn duration(&self) -> Duration {
        self.duration
    }
}

/// A single action or a group of actions that run concurrently.
#[derive(Debug)]
pub enum Action {
    Single(Box<dyn ActorAction>),
    Group(Vec<Action>),
}

impl Action {
    pub fn new(action: impl ActorAction + 'static) -> Self {
        Action::Single(Box::new(action))
    }

    pub fn timed(name: impl Into<String>, duration: Duration) -> Self {
        Action::new(TimedAction::new(name, duration))
    }

    /// Combine actions into one submission: the action itself when there is
    /// one, a concurrent group otherwise.
    pub fn merge(mut actions: Vec<Action>) -> Option<Action> {
        match actions.len() {
            0 => None,
            1 => actions.pop(),
            _ => Some(Action::Group(actions)),
        }
    }

    /// Number of single actions contained.
    pub fn leaf_count(&self) -> usize {
        match self {
            Action::Single(_) => 1,
            Action::Group(actions) => actions.iter().map(Action::leaf_count).sum(),
        }
    }

    /// Wall-clock length: the longest member for groups.
    pub fn duration(&self) -> Duration {
        match self {
            Action::Single(action) => action.duration(),
            Action::Group(actions) => actions
                .iter()
                .map(Action::duration)
                .max()
                .unwrap_or(Duration::ZERO),
        }
    }
}

/// Runs actions on one actor.
///
/// Implementations must call [`ActionCompletion::complete`] exactly once per
/// submitted action, after the action has finished. Completing from another
/// thread is fine: the completion is delivered to the control thread.
pub trait ActorSurface {
    /// The actor's name. Must be non-empty and unique.
    fn name(&self) -> &str;

    fn run(&mut self, action: Action, on_complete: ActionCompletion);
}

/// Completion handle handed to [`ActorSurface::run`].
#[must_use = "an action that never completes stalls its scripts"]
pub struct ActionCompletion {
    actor: ActorId,
    contexts: Vec<(ContextId, u64)>,
    events: Sender<ControlEvent>,
}

impl ActionCompletion {
    pub(crate) fn new(
        actor: ActorId,
        contexts: Vec<(ContextId, u64)>,
        events: Sender<ControlEvent>,
    ) -> Self {
        Self {
            actor,
            contexts,
            events,
        }
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    /// Contexts whose steps were merged into the action.
    pub fn contexts(&self) -> impl Iterator<Item = ContextId> + '_ {
        self.contexts.iter().map(|(id, _)| *id)
    }

    /// Report the action as finished.
    pub fn complete(self) {
        let event = ControlEvent::ActionFinished {
            actor: self.actor,
            contexts: self.contexts,
        };
        if self.events.send(event).is_err() {
            debug!("scheduler dropped before action completed");
        }
    }
}

impl fmt::Debug for ActionCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionCompletion")
            .field("actor", &self.actor)
            .field("contexts", &self.contexts)
            .finish()
    }
}
