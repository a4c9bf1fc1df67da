//! Streaming client and chat-session state for agent server HTTP/SSE APIs.
//!
//! A send opens a long-lived response body, decodes it into `data:` frames,
//! parses each frame into a [`StreamEvent`] and folds the events into
//! growing text, tool-call records and a final [`Message`].
//!
//! # Chatting with an agent
//!
//! ```no_run
//! use agent_chat_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ChatError> {
//! let config = ChatConfig::new("http://localhost:3000/api", "support")
//!     .authorization("Bearer dev-token");
//! let mut chat = ChatSession::connect(config)?;
//!
//! let stop = chat.stop_handle();
//! tokio::spawn(async move {
//!     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!     stop.stop();
//! });
//!
//! if let Some(reply) = chat.send_message("How do I reset my password?").await? {
//!     println!("{}", reply.text());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Lower-level callers can drive a stream themselves with
//! [`AgentClient::send_message_stream`] and a [`StreamObserver`].

/// Server seam used by the chat session and history.
pub mod backend;
/// HTTP client for the agent server API.
pub mod client;
/// Client configuration.
pub mod config;
/// Public error types.
pub mod errors;
/// Typed stream events and frame parsing.
pub mod event;
/// Pending attachments and upload limits.
pub mod files;
/// Paged conversation listing.
pub mod history;
/// Chat messages and their metadata.
pub mod message;
/// Agents, conversations, files and request/response bodies.
pub mod model;
/// Process-wide tracing setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Stream session reducer.
pub mod reducer;
/// Chat session controller and callbacks.
pub mod session;
/// SSE frame decoding.
pub mod sse;
/// Stream driver, cancellation and observer contract.
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use backend::ChatBackend;
pub use client::AgentClient;
pub use config::ChatConfig;
pub use errors::{ChatError, StreamFailure};
pub use event::{StreamEvent, parse_frame};
pub use files::{FilePolicy, LocalFile, PendingFile};
pub use history::ConversationHistory;
pub use message::{
    Citation, ContentPart, JsonMap, Message, MessageContent, MessageMetadata, Role, ToolCall,
    ToolCallRecord, Usage,
};
pub use model::{
    AgentInfo, Conversation, ConversationDetail, ConversationListItem, ConversationQuery,
    CreateConversationRequest, FileAttachment, FilePayload, MessageQuery, Page,
    SendMessageRequest, SendMessageResponse, SortOrder, UpdateConversationRequest,
    UploadFileRequest,
};
pub use observability::init_observability;
pub use reducer::{SessionUpdate, StreamSession};
pub use session::{ChatCallbacks, ChatSession, ChatState, StopHandle};
pub use sse::FrameDecoder;
pub use transport::{AbortHandle, AbortSignal, ByteStream, StreamObserver, StreamOutcome, drive_stream};
