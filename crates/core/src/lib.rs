//! # SaferPlaces Core
//!
//! Domain types, traits, and error definitions for the SaferPlaces agent.
//! This crate performs no I/O. It defines the conversation state and its
//! reducers, the argument rule engine, and the agent tool state machine that
//! every other crate builds on.
//!
//! ## Layout
//!
//! - [`state`]: the conversation state and the pure merge functions applied
//!   after every graph node
//! - [`rules`]: per-tool validation and inference rules
//! - [`tool`]: the [`AgentTool`] contract and the [`invoke`] state machine
//! - [`provider`]: the language model contract
//! - [`storage`]: object storage and checkpoint contracts
//! - [`names`]: canonical node and tool names

pub mod error;
pub mod message;
pub mod names;
pub mod provider;
pub mod rules;
pub mod state;
pub mod storage;
pub mod tool;

pub use error::{Error, GraphError, ProviderError, Result, StorageError, ToolError};
pub use message::{Message, MessageToolCall, Role, ThreadId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolChoice, ToolDefinition};
pub use rules::{InferenceRule, InferenceRules, Inferred, ToolArgs, ValidationRules};
pub use state::{ConversationState, LayerDescriptor, LayerType, ParamsOp, StateUpdate};
pub use storage::{Checkpoint, Checkpointer, ObjectStore, PendingInterrupt};
pub use tool::{
    AgentTool, GateDefaults, GateOverride, Interrupt, InterruptType, Invocation, ToolContext,
    ToolGate, ToolOutcome, ToolOutput, ToolUpdates, invoke,
};
