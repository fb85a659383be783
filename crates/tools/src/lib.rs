//! Agent tools for SaferPlaces.
//!
//! Every tool implements [`AgentTool`](saferplaces_core::tool::AgentTool):
//! inference and validation rules over its arguments plus one action. The
//! confirmation flow around the action lives in core; this crate supplies
//! the actions:
//!
//! - [`demo_weather`]: a self-contained forecast for trying the flow
//! - [`create_project`]: the five steps that assemble a project's base layers
//! - [`flooding_rainfall`]: rain event and hydraulic model definitions
//! - [`saferplaces_api`]: digital twin, SaferRain and SaferBuildings processes
//! - [`safercast_api`]: DPC and ICON-2I weather data
//! - [`geospatial_ops`]: operations answered with generated code
//!
//! Remote tools talk to the process APIs through [`remote::ProcessClient`].
//! Side queries to the language model (place names, file names) go through
//! [`llm::Assistant`].

pub mod create_project;
pub mod demo_weather;
pub mod flooding_rainfall;
pub mod geo;
pub mod geospatial_ops;
pub mod llm;
pub mod registry;
pub mod remote;
pub mod safercast_api;
pub mod saferplaces_api;

pub use llm::{AskRole, Assistant, parse_json_reply};
pub use registry::{ToolRegistry, default_registry};
pub use remote::{ApiError, ProcessClient};
