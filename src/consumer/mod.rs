//! Consumer side of the relay: decode what crossed the boundary and turn
//! it into store actions.

mod events;
mod handler;

pub use events::{
    AgentActivity, AgentErrorNotice, DecodeError, DiagnosticLog, IdentityChange, LogLevel, MetricsUpdate,
    StatusNotice, TerminalChunk, UiEvent, WorkspaceErrorNotice,
};
pub use handler::{EventHandler, HandlerStats};
