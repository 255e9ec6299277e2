//! Tools the model can ask to run, and the boundary that executes them.
//!
//! A [`ToolSpec`] pairs a name, description and JSON-Schema parameter object
//! with a [`ToolHandler`]. [`execute_tool`] runs the handler and converts any
//! failure into a [`ToolExecutionError`](modelmux_core::ToolExecutionError).

/// Running one tool with panic isolation.
pub mod executor;
/// Name-keyed tool lookup.
pub mod registry;
/// Tool specifications and handlers.
pub mod spec;

pub use executor::execute_tool;
pub use registry::ToolRegistry;
pub use spec::{BoxError, FnTool, ToolArgs, ToolHandler, ToolSpec};
