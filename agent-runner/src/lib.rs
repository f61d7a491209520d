//! Agent runner - subprocess dispatch and streamed-protocol reading
//!
//! This crate owns the boundary to the external tool-running agent:
//! - Capability allow-listing for each dispatch
//! - Per-turn subprocess lifecycle (spawn, stream, cap, kill)
//! - Incremental parsing of the agent's structured output records
//! - Turn records assembled from the ordered event stream

pub mod capability;
pub mod event;
pub mod runner;
pub mod turn;

pub use capability::{Capability, CapabilityError, CapabilitySet};
pub use event::{extract_speak, RecordCursor, StreamEvent, TurnErrorKind};
pub use runner::{AgentRunner, RunnerConfig, RunnerError, TurnStream};
pub use turn::{Turn, TurnStatus};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
