//! The SaferPlaces conversation graph.
//!
//! A turn starts at the chatbot, which makes one model call per visit:
//!
//! 1. **Reply**: a plain answer ends the turn
//! 2. **Route**: a tool call enters the subgraph that owns the tool
//! 3. **Run**: the subgraph's tool handler infers, validates and confirms
//!    arguments before executing, suspending the turn whenever it needs the
//!    user (see [`nodes::handler`] and [`nodes::interrupt`])
//! 4. **Report**: the tool result goes back to the chatbot, which answers
//!
//! Project creation and flooding simulation are pipelines: a MAIN node walks
//! a fixed sequence of sub-tools through the same handler and reports one
//! consolidated result ([`nodes::pipeline`]).
//!
//! [`Session`] wraps the graph for one thread, checkpointing it after every
//! turn and keeping the project's layer registry in object storage.

pub mod context;
pub mod event;
pub mod graph;
pub mod interrupt;
pub mod nodes;
pub mod runtime;
pub mod session;
pub mod subgraph;
pub mod turn;

#[cfg(test)]
mod test_helpers;

pub use event::TurnEvent;
pub use graph::{Command, Goto, Graph, NodeId, NodeOutcome};
pub use interrupt::{ConfirmationHandler, InterruptHandler, Resolution};
pub use runtime::AgentRuntime;
pub use session::{NewLayer, Session, SessionRegistry};
pub use subgraph::Subgraph;
pub use turn::Turn;
