//! Node implementations, one module per node kind.

pub mod chatbot;
pub mod handler;
pub mod interrupt;
pub mod pipeline;
