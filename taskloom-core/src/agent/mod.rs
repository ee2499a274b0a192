//! Executor backends and output streaming for supervised agent processes.

mod backend;
mod output;
mod spawn;

pub use backend::{Backend, BackendRegistry, ExecutorType, ProfileABackend, ProfileBBackend, SpawnRequest};
pub use output::{
    AssistantMessage, ErrorClass, ErrorEnvelope, OutputStreamer, PrintHandler, StreamHandler,
    StreamMessage, Usage,
};
pub use spawn::AgentHandle;
