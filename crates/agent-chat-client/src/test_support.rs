use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use bytes::Bytes;
use chrono::{TimeZone as _, Utc};
use futures::{StreamExt as _, stream};

use crate::backend::ChatBackend;
use crate::errors::ChatError;
use crate::message::{Message, Role};
use crate::model::{
    Conversation, ConversationDetail, ConversationListItem, ConversationQuery,
    CreateConversationRequest, Page, SendMessageRequest, SendMessageResponse,
};
use crate::transport::ByteStream;

struct ScriptedStream {
    chunks: Vec<String>,
    hang: bool,
}

#[derive(Default)]
struct FakeState {
    streams: VecDeque<Result<ScriptedStream, ChatError>>,
    responses: VecDeque<Result<SendMessageResponse, ChatError>>,
    details: HashMap<String, ConversationDetail>,
    pages: VecDeque<Result<Page<ConversationListItem>, ChatError>>,
    created: Vec<CreateConversationRequest>,
    sent: Vec<(String, SendMessageRequest)>,
    queries: Vec<ConversationQuery>,
    deleted: Vec<String>,
}

/// Scripted backend: every call pops the next prepared answer.
#[derive(Default)]
pub(crate) struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().expect("fake backend lock"))
    }

    /// Queues a stream that ends after `chunks`.
    pub(crate) fn push_stream(&self, chunks: &[&str]) {
        self.push_scripted(chunks, false);
    }

    /// Queues a stream that stays open after `chunks`.
    pub(crate) fn push_hanging_stream(&self, chunks: &[&str]) {
        self.push_scripted(chunks, true);
    }

    fn push_scripted(&self, chunks: &[&str], hang: bool) {
        let chunks = chunks.iter().map(|c| c.to_string()).collect();
        self.with(|s| s.streams.push_back(Ok(ScriptedStream { chunks, hang })));
    }

    pub(crate) fn fail_next_open(&self, err: ChatError) {
        self.with(|s| s.streams.push_back(Err(err)));
    }

    pub(crate) fn push_response(&self, response: SendMessageResponse) {
        self.with(|s| s.responses.push_back(Ok(response)));
    }

    pub(crate) fn insert_detail(&self, detail: ConversationDetail) {
        self.with(|s| {
            s.details.insert(detail.conversation.id.clone(), detail);
        });
    }

    pub(crate) fn push_page(&self, items: Vec<ConversationListItem>, has_more: bool) {
        self.with(|s| {
            s.pages.push_back(Ok(Page {
                total: items.len() as u64,
                limit: 0,
                offset: 0,
                has_more,
                items,
            }))
        });
    }

    pub(crate) fn fail_next_list(&self, err: ChatError) {
        self.with(|s| s.pages.push_back(Err(err)));
    }

    pub(crate) fn created(&self) -> Vec<CreateConversationRequest> {
        self.with(|s| s.created.clone())
    }

    pub(crate) fn sent(&self) -> Vec<(String, SendMessageRequest)> {
        self.with(|s| s.sent.clone())
    }

    pub(crate) fn queries(&self) -> Vec<ConversationQuery> {
        self.with(|s| s.queries.clone())
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.with(|s| s.deleted.clone())
    }
}

#[async_trait::async_trait]
impl ChatBackend for FakeBackend {
    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation, ChatError> {
        let n = self.with(|s| {
            s.created.push(request.clone());
            s.created.len()
        });
        let mut created = conversation(&format!("conv-{n}"));
        created.agent_id = request.agent_id;
        created.title = request.title;
        Ok(created)
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<ConversationDetail, ChatError> {
        self.with(|s| s.details.get(conversation_id).cloned())
            .ok_or_else(|| ChatError::api(404, "conversation not found"))
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        request: SendMessageRequest,
    ) -> Result<SendMessageResponse, ChatError> {
        self.with(|s| {
            s.sent.push((conversation_id.to_string(), request));
            s.responses
                .pop_front()
                .unwrap_or_else(|| Err(ChatError::Transport("no scripted response".into())))
        })
    }

    async fn open_stream(
        &self,
        conversation_id: &str,
        request: SendMessageRequest,
    ) -> Result<ByteStream, ChatError> {
        let scripted = self.with(|s| {
            s.sent.push((conversation_id.to_string(), request));
            s.streams
                .pop_front()
                .unwrap_or_else(|| Err(ChatError::Transport("no scripted stream".into())))
        })?;
        let chunks: Vec<Result<Bytes, ChatError>> = scripted
            .chunks
            .into_iter()
            .map(|c| Ok(Bytes::from(c)))
            .collect();
        let body: ByteStream = if scripted.hang {
            Box::pin(stream::iter(chunks).chain(stream::pending()))
        } else {
            Box::pin(stream::iter(chunks))
        };
        Ok(body)
    }

    async fn list_conversations(
        &self,
        query: ConversationQuery,
    ) -> Result<Page<ConversationListItem>, ChatError> {
        self.with(|s| {
            s.queries.push(query);
            s.pages.pop_front().unwrap_or_else(|| {
                Ok(Page {
                    items: Vec::new(),
                    total: 0,
                    limit: 0,
                    offset: 0,
                    has_more: false,
                })
            })
        })
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ChatError> {
        self.with(|s| s.deleted.push(conversation_id.to_string()));
        Ok(())
    }
}

pub(crate) fn conversation(id: &str) -> Conversation {
    let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("valid timestamp");
    Conversation {
        id: id.to_string(),
        agent_id: "support".to_string(),
        user_id: None,
        title: None,
        metadata: None,
        state: None,
        created_at: at,
        updated_at: at,
    }
}

pub(crate) fn list_item(id: &str) -> ConversationListItem {
    let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("valid timestamp");
    ConversationListItem {
        id: id.to_string(),
        title: None,
        agent_id: "support".to_string(),
        created_at: at,
        updated_at: at,
    }
}

pub(crate) fn server_message(id: &str, conversation_id: &str, role: Role, text: &str) -> Message {
    Message::new(id, conversation_id, role, text)
}
