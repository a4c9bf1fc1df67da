use std::sync::Arc;

use tracing::debug;

use crate::backend::ChatBackend;
use crate::errors::ChatError;
use crate::model::{ConversationListItem, ConversationQuery};

pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Paged list of an agent's conversations.
pub struct ConversationHistory {
    backend: Arc<dyn ChatBackend>,
    agent_id: String,
    page_size: u64,
    conversations: Vec<ConversationListItem>,
    offset: u64,
    has_more: bool,
    is_loading: bool,
    error: Option<ChatError>,
}

impl ConversationHistory {
    pub fn new(backend: Arc<dyn ChatBackend>, agent_id: impl Into<String>) -> Self {
        Self {
            backend,
            agent_id: agent_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
            conversations: Vec::new(),
            offset: 0,
            has_more: false,
            is_loading: false,
            error: None,
        }
    }

    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn conversations(&self) -> &[ConversationListItem] {
        &self.conversations
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&ChatError> {
        self.error.as_ref()
    }

    /// Loads the first page, replacing anything listed before.
    pub async fn load(&mut self) {
        self.is_loading = true;
        self.error = None;
        match self.fetch(0).await {
            Ok((items, has_more)) => {
                self.conversations = items;
                self.has_more = has_more;
                self.offset = self.page_size;
            }
            Err(err) => self.error = Some(err),
        }
        self.is_loading = false;
    }

    /// Appends the next page. Does nothing while loading or at the end.
    pub async fn load_more(&mut self) {
        if self.is_loading || !self.has_more {
            return;
        }
        self.is_loading = true;
        match self.fetch(self.offset).await {
            Ok((items, has_more)) => {
                self.conversations.extend(items);
                self.has_more = has_more;
                self.offset += self.page_size;
            }
            Err(err) => self.error = Some(err),
        }
        self.is_loading = false;
    }

    pub async fn refresh(&mut self) {
        self.offset = 0;
        self.load().await;
    }

    /// Deletes on the server, then drops the entry locally.
    pub async fn delete_conversation(&mut self, conversation_id: &str) {
        match self.backend.delete_conversation(conversation_id).await {
            Ok(()) => self.conversations.retain(|c| c.id != conversation_id),
            Err(err) => self.error = Some(err),
        }
    }

    async fn fetch(&self, offset: u64) -> Result<(Vec<ConversationListItem>, bool), ChatError> {
        let query = ConversationQuery {
            agent_id: Some(self.agent_id.clone()),
            user_id: None,
            limit: Some(self.page_size),
            offset: Some(offset),
        };
        let page = self.backend.list_conversations(query).await?;
        debug!(offset, fetched = page.items.len(), has_more = page.has_more, "conversation page loaded");
        Ok((page.items, page.has_more))
    }
}
