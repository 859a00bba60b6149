use stage_core::{ActorId, ContextId};

use super::instruction::Instruction;
use super::types::{ContextKind, ContextState};

/// Source of a script's steps. Block semantics live behind this trait.
pub trait Script {
    /// Script name for logging.
    fn name(&self) -> &str;

    /// Advance the cursor and return the next step, or `None` when the script is done.
    fn next_instruction(&mut self) -> Option<Instruction>;

    /// Move the cursor back to the first step.
    fn rewind(&mut self);
}

/// Execution record for one script on one actor.
pub struct ScriptContext {
    id: ContextId,
    actor: ActorId,
    kind: ContextKind,
    state: ContextState,
    generation: u64,
    script: Box<dyn Script>,
}

impl ScriptContext {
    pub fn new(actor: impl Into<ActorId>, kind: ContextKind, script: impl Script + 'static) -> Self {
        Self {
            id: ContextId::new(),
            actor: actor.into(),
            kind,
            state: ContextState::Runnable,
            generation: 0,
            script: Box::new(script),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Bumped on every reset. Background completions carry the value they
    /// were dispatched with and are dropped if it no longer matches.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn name(&self) -> &str {
        self.script.name()
    }

    pub(crate) fn set_state(&mut self, state: ContextState) {
        self.state = state;
    }

    /// Make the script runnable from its first step under a new generation.
    pub(crate) fn reset(&mut self) {
        self.state = ContextState::Runnable;
        self.script.rewind();
        self.generation = self.generation.wrapping_add(1);
    }

    pub(crate) fn next_instruction(&mut self) -> Option<Instruction> {
        self.script.next_instruction()
    }
}

impl std::fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptContext")
            .field("id", &self.id)
            .field("actor", &self.actor)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("script", &self.script.name())
            .finish()
    }
}

/// Builds a fresh step each time the cursor reaches it.
pub type StepFactory = Box<dyn Fn() -> Instruction>;

/// A script backed by a fixed list of step factories.
pub struct SequenceScript {
    name: String,
    steps: Vec<StepFactory>,
    cursor: usize,
}

impl SequenceScript {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            cursor: 0,
        }
    }

    /// Append a step.
    pub fn step<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Instruction + 'static,
    {
        self.steps.push(Box::new(factory));
        self
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Script for SequenceScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_instruction(&mut self) -> Option<Instruction> {
        let factory = self.steps.get(self.cursor)?;
        self.cursor += 1;
        Some(factory())
    }

    fn rewind(&mut self) {
        self.cursor = 0;
    }
}
