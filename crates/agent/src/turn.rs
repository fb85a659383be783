//! One run of the graph, from a user prompt to the next stop.
//!
//! A turn holds the session lock for its whole life, so turns on one
//! thread never interleave. Nodes run lazily as events are pulled, or on
//! a task of their own once the turn is turned into a stream. When
//! the cursor runs out the turn checkpoints the thread and, if the layer
//! registry changed, writes it to the project bucket.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use saferplaces_core::error::GraphError;
use saferplaces_core::message::{Role, ThreadId};
use saferplaces_core::state::{LayerDescriptor, StateUpdate};
use saferplaces_core::storage::{Checkpoint, PendingInterrupt};
use tokio::sync::{OwnedMutexGuard, mpsc};
use tracing::{debug, warn};

use crate::event::TurnEvent;
use crate::graph::{Goto, NodeId, NodeOutcome, recovery_update};
use crate::runtime::AgentRuntime;
use crate::session::SessionState;

/// Object name of the layer registry inside a project bucket.
pub const LAYER_REGISTRY_FILE: &str = "layer_registry.json";

const EVENT_BUFFER: usize = 32;

pub struct Turn {
    runtime: Arc<AgentRuntime>,
    session: OwnedMutexGuard<SessionState>,
    thread_id: ThreadId,
    bucket: String,
    cursor: Option<NodeId>,
    resume: Option<String>,
    steps: usize,
    events: VecDeque<TurnEvent>,
    layers_before: Vec<LayerDescriptor>,
    finished: bool,
}

impl Turn {
    pub(crate) fn new(
        runtime: Arc<AgentRuntime>,
        session: OwnedMutexGuard<SessionState>,
        thread_id: ThreadId,
        bucket: String,
        start: Option<NodeId>,
        resume: Option<String>,
        layers_before: Vec<LayerDescriptor>,
    ) -> Self {
        Self {
            runtime,
            session,
            thread_id,
            bucket,
            cursor: start,
            resume,
            steps: 0,
            events: VecDeque::new(),
            layers_before,
            finished: false,
        }
    }

    pub(crate) fn push(&mut self, event: TurnEvent) {
        self.events.push_back(event);
    }

    /// Run nodes until the next event is ready. `None` once the turn has
    /// stopped and been saved.
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }
            match self.cursor.take() {
                Some(node) => self.step(node).await,
                None => self.finish().await,
            }
        }
    }

    /// Run the turn to its end.
    pub async fn collect(mut self) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    /// Drive the turn on its own task and stream its events. The turn runs
    /// to its stop and is saved even if the stream is dropped early.
    pub fn into_stream(mut self) -> impl Stream<Item = TurnEvent> + Send + 'static {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let mut listening = true;
            while let Some(event) = self.next_event().await {
                if listening && tx.send(event).await.is_err() {
                    debug!(thread = %self.thread_id, "event reader gone, finishing turn");
                    listening = false;
                }
            }
        });
        futures::stream::unfold(rx, |mut rx| async move {
            let event = rx.recv().await?;
            Some((event, rx))
        })
    }

    async fn step(&mut self, node: NodeId) {
        let max_steps = self.runtime.graph.max_steps();
        if self.steps >= max_steps {
            self.fail(GraphError::StepLimit(max_steps));
            return;
        }
        self.steps += 1;

        let runtime = self.runtime.clone();
        let resume = self.resume.take();
        debug!(thread = %self.thread_id, node = %node, step = self.steps, "running node");
        let outcome = runtime
            .graph
            .run_node(node, &self.session.state, resume.as_deref(), &self.bucket)
            .await;

        match outcome {
            Ok(NodeOutcome::Command(command)) => {
                self.apply(StateUpdate::new().history(node.as_str()).then(command.update));
                self.cursor = match command.goto {
                    Goto::Node(next) => Some(next),
                    // Leaving a subgraph hands control back to the chatbot.
                    Goto::End if node.subgraph().is_some() => Some(NodeId::Chatbot),
                    Goto::End => None,
                };
            }
            Ok(NodeOutcome::Suspend(interrupt)) => {
                self.apply(StateUpdate::new().history(node.as_str()));
                self.session.pending = Some(PendingInterrupt {
                    node: node.as_str().to_string(),
                    interrupt: interrupt.clone(),
                });
                self.push(TurnEvent::Interrupt { interrupt });
            }
            Err(e) => self.fail(e),
        }
    }

    /// Close the turn after a node failed, leaving a consistent history.
    fn fail(&mut self, error: GraphError) {
        warn!(thread = %self.thread_id, error = %error, "turn failed");
        self.push(TurnEvent::Error {
            message: error.to_string(),
        });
        let update = recovery_update(&self.session.state, &error);
        self.apply(update);
        self.cursor = None;
    }

    fn apply(&mut self, update: StateUpdate) {
        for message in &update.messages {
            match message.role {
                Role::System | Role::User => {}
                Role::Tool => self.push(TurnEvent::ToolResult {
                    message: message.clone(),
                }),
                Role::Assistant => self.push(TurnEvent::Message {
                    message: message.clone(),
                }),
            }
        }
        let layers_changed = !update.layer_registry.is_empty();
        self.session.state.apply(update);
        if layers_changed {
            self.push(TurnEvent::LayersUpdated {
                layers: self.session.state.layer_registry.clone(),
            });
        }
    }

    async fn finish(&mut self) {
        self.finished = true;

        let checkpoint = Checkpoint::new(
            self.thread_id.clone(),
            self.session.state.clone(),
            self.session.pending.clone(),
        );
        if let Err(e) = self.runtime.checkpointer.save(&checkpoint).await {
            warn!(thread = %self.thread_id, error = %e, "checkpoint not saved");
            self.push(TurnEvent::Error {
                message: format!("Conversation could not be saved: {e}"),
            });
        }

        if self.session.state.layer_registry != self.layers_before {
            let uri = format!("{}/{LAYER_REGISTRY_FILE}", self.bucket);
            let layers = &self.session.state.layer_registry;
            match saferplaces_storage::save_json(self.runtime.store.as_ref(), &uri, layers).await {
                Ok(_) => debug!(uri = %uri, count = layers.len(), "layer registry saved"),
                Err(e) => {
                    warn!(uri = %uri, error = %e, "layer registry not saved");
                    self.push(TurnEvent::Error {
                        message: format!("Layer registry could not be saved: {e}"),
                    });
                }
            }
        }
    }
}
