//! Reusable finite-state-machine primitive.
//!
//! Transactions and dialogs share the same discipline: a transition
//! table over `(state, input)`, typed rejection of illegal inputs, and
//! state observation through a watch channel. Actions attached to a
//! transition run under the entity lock, before the new state becomes
//! visible to observers, so every observer sees consistent
//! `(state, last action)` pairs.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// An input was posted that has no transition from the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Input {input} is not valid in state {state}")]
pub struct UnexpectedInput {
    pub state: String,
    pub input: String,
}

/// The result of feeding an input: where the machine was and where it
/// went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
}

impl<S: PartialEq> Transition<S> {
    /// Returns `true` when the input did not move the machine.
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

/// A transition table over copyable state and input types.
///
/// `A` is the action tag attached to transitions; callers match on it to
/// run the side effect belonging to the edge taken.
pub struct Fsm<S, I, A> {
    table: HashMap<(S, I), (S, Option<A>)>,
    terminals: HashSet<S>,
    state: S,
}

impl<S, I, A> Fsm<S, I, A>
where
    S: Copy + Eq + Hash + Debug,
    I: Copy + Eq + Hash + Debug,
    A: Copy,
{
    pub fn new(initial: S) -> Self {
        Self {
            table: HashMap::new(),
            terminals: HashSet::new(),
            state: initial,
        }
    }

    /// Adds a transition `(from, input) -> (to, action)`.
    pub fn route(mut self, from: S, input: I, to: S, action: Option<A>) -> Self {
        self.table.insert((from, input), (to, action));
        self
    }

    /// Marks a state as terminal.
    pub fn terminal(mut self, state: S) -> Self {
        self.terminals.insert(state);
        self
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.terminals.contains(&self.state)
    }

    /// Feeds an input, returning the transition taken and the action tag
    /// attached to it.
    ///
    /// # Errors
    ///
    /// [`UnexpectedInput`] when no transition is defined for the current
    /// state and this input. The state is left unchanged.
    pub fn feed(&mut self, input: I) -> Result<(Transition<S>, Option<A>), UnexpectedInput> {
        let from = self.state;
        match self.table.get(&(from, input)) {
            Some(&(to, action)) => {
                self.state = to;
                Ok((Transition { from, to }, action))
            }
            None => Err(UnexpectedInput {
                state: format!("{from:?}"),
                input: format!("{input:?}"),
            }),
        }
    }
}

/// An [`Fsm`] whose state is observable through a watch channel.
///
/// `feed_with` runs the caller's effect while the entity lock is held
/// and only then publishes the new state, so a task woken by the watch
/// never observes a state whose action has not happened yet.
pub struct ObservedFsm<S, I, A> {
    inner: Mutex<Fsm<S, I, A>>,
    tx: watch::Sender<S>,
}

impl<S, I, A> ObservedFsm<S, I, A>
where
    S: Copy + Eq + Hash + Debug + Send + Sync + 'static,
    I: Copy + Eq + Hash + Debug + Send + 'static,
    A: Copy + Send + 'static,
{
    pub fn new(fsm: Fsm<S, I, A>) -> Self {
        let (tx, _) = watch::channel(fsm.state());
        Self {
            inner: Mutex::new(fsm),
            tx,
        }
    }

    /// The current state.
    pub fn state(&self) -> S {
        *self.tx.borrow()
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.lock().expect("Lock failed").is_terminal()
    }

    /// Posts an input synchronously, failing on an illegal transition.
    pub fn feed(&self, input: I) -> Result<Transition<S>, UnexpectedInput> {
        self.feed_with(input, |_, _| {})
    }

    /// Posts an input synchronously and runs `effect` for the transition
    /// taken before the state change becomes visible to observers.
    pub fn feed_with<F>(&self, input: I, effect: F) -> Result<Transition<S>, UnexpectedInput>
    where
        F: FnOnce(&Transition<S>, Option<A>),
    {
        let mut guard = self.inner.lock().expect("Lock failed");
        let (transition, action) = guard.feed(input)?;

        effect(&transition, action);

        // Publish while still serialized so concurrent feeds cannot
        // reorder their notifications.
        self.tx.send_replace(transition.to);
        drop(guard);

        Ok(transition)
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }

    /// Waits until the state satisfies `predicate`, up to `deadline`.
    ///
    /// Holds no FSM lock while waiting. Returns the matching state, or
    /// `None` when the deadline passes first.
    pub async fn wait_for_state<F>(&self, predicate: F, deadline: Duration) -> Option<S>
    where
        F: FnMut(&S) -> bool,
    {
        let mut rx = self.tx.subscribe();

        let result = match tokio::time::timeout(deadline, rx.wait_for(predicate)).await {
            Ok(Ok(state)) => Some(*state),
            _ => None,
        };
        result
    }

    /// Spawns a strand that applies queued inputs in arrival order.
    ///
    /// Inputs posted through the returned sender never fail the caller;
    /// an illegal transition is dropped after being handed to
    /// `on_rejected`.
    pub fn spawn_queue<F, R>(
        self: std::sync::Arc<Self>,
        mut effect: F,
        mut on_rejected: R,
    ) -> mpsc::UnboundedSender<I>
    where
        F: FnMut(&Transition<S>, Option<A>) + Send + 'static,
        R: FnMut(UnexpectedInput) + Send + 'static,
        A: Sync,
        I: Sync,
        S: Sync,
        Self: Send + Sync + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fsm = self;

        tokio::spawn(async move {
            while let Some(input) = rx.recv().await {
                if let Err(rejected) = fsm.feed_with(input, &mut effect) {
                    on_rejected(rejected);
                }
            }
        });

        tx
    }
}
