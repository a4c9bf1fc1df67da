use crate::client::AgentClient;
use crate::errors::ChatError;
use crate::model::{
    Conversation, ConversationDetail, ConversationListItem, ConversationQuery,
    CreateConversationRequest, Page, SendMessageRequest, SendMessageResponse,
};
use crate::transport::ByteStream;

/// Server operations the chat session and history depend on.
///
/// [`AgentClient`] is the HTTP implementation.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation, ChatError>;

    async fn get_conversation(&self, conversation_id: &str) -> Result<ConversationDetail, ChatError>;

    async fn send_message(
        &self,
        conversation_id: &str,
        request: SendMessageRequest,
    ) -> Result<SendMessageResponse, ChatError>;

    /// Starts a streaming send and returns its raw SSE body.
    async fn open_stream(
        &self,
        conversation_id: &str,
        request: SendMessageRequest,
    ) -> Result<ByteStream, ChatError>;

    async fn list_conversations(
        &self,
        query: ConversationQuery,
    ) -> Result<Page<ConversationListItem>, ChatError>;

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ChatError>;
}

#[async_trait::async_trait]
impl ChatBackend for AgentClient {
    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation, ChatError> {
        AgentClient::create_conversation(self, &request).await
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<ConversationDetail, ChatError> {
        AgentClient::get_conversation(self, conversation_id).await
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        request: SendMessageRequest,
    ) -> Result<SendMessageResponse, ChatError> {
        AgentClient::send_message(self, conversation_id, request).await
    }

    async fn open_stream(
        &self,
        conversation_id: &str,
        request: SendMessageRequest,
    ) -> Result<ByteStream, ChatError> {
        AgentClient::open_stream(self, conversation_id, request).await
    }

    async fn list_conversations(
        &self,
        query: ConversationQuery,
    ) -> Result<Page<ConversationListItem>, ChatError> {
        self.get_conversations(&query).await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ChatError> {
        AgentClient::delete_conversation(self, conversation_id).await
    }
}
