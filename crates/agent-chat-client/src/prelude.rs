//! Common imports for typical chat client usage.
pub use crate::{
    AbortHandle, AgentClient, ChatCallbacks, ChatConfig, ChatError, ChatSession, LocalFile,
    Message, Role, SendMessageRequest, StopHandle, StreamEvent, StreamObserver, StreamOutcome,
    ToolCallRecord,
};
