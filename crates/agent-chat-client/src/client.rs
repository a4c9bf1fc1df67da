use std::time::Duration;

use futures::StreamExt as _;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ChatConfig;
use crate::errors::{ChatError, error_message_from_body};
use crate::message::Message;
use crate::model::{
    AgentInfo, Conversation, ConversationDetail, ConversationListItem, ConversationQuery,
    CreateConversationRequest, FileAttachment, MessageQuery, Page, SendMessageRequest,
    SendMessageResponse, UpdateConversationRequest, UploadFileRequest,
};
use crate::transport::{AbortSignal, ByteStream, StreamObserver, StreamOutcome, drive_stream};

#[derive(Deserialize)]
struct AgentsEnvelope {
    #[serde(default)]
    agents: Vec<AgentInfo>,
}

#[derive(Deserialize)]
struct ConversationEnvelope {
    conversation: Conversation,
}

#[derive(Deserialize)]
struct FileEnvelope {
    file: FileAttachment,
}

/// HTTP client for the agent server API.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone, Debug)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl AgentClient {
    /// Creates a client from explicit configuration.
    pub fn new(config: &ChatConfig) -> Result<Self, ChatError> {
        if config.base_url.trim().is_empty() {
            return Err(ChatError::Config("base_url must not be empty".into()));
        }
        let http = reqwest::Client::builder()
            .default_headers(default_headers(config)?)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.normalized_base_url().to_string(),
            request_timeout: config.request_timeout,
        })
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_agents(&self) -> Result<Vec<AgentInfo>, ChatError> {
        let envelope: AgentsEnvelope = self.execute(self.http.get(self.url("/agents"))).await?;
        Ok(envelope.agents)
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<AgentInfo, ChatError> {
        require_id("agent_id", agent_id)?;
        self.execute(self.http.get(self.url(&format!("/agents/{agent_id}"))))
            .await
    }

    /// Lists conversations; absent filters are not sent.
    pub async fn get_conversations(
        &self,
        query: &ConversationQuery,
    ) -> Result<Page<ConversationListItem>, ChatError> {
        let request = self
            .http
            .get(self.url("/conversations"))
            .query(&query.to_pairs());
        self.execute(request).await
    }

    pub async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation, ChatError> {
        require_id("agent_id", &request.agent_id)?;
        let envelope: ConversationEnvelope = self
            .execute(self.http.post(self.url("/conversations")).json(request))
            .await?;
        debug!(conversation_id = %envelope.conversation.id, "conversation created");
        Ok(envelope.conversation)
    }

    /// Fetches a conversation with its messages.
    pub async fn get_conversation(&self, conversation_id: &str) -> Result<ConversationDetail, ChatError> {
        require_id("conversation_id", conversation_id)?;
        self.execute(
            self.http
                .get(self.url(&format!("/conversations/{conversation_id}"))),
        )
        .await
    }

    pub async fn update_conversation(
        &self,
        conversation_id: &str,
        request: &UpdateConversationRequest,
    ) -> Result<Conversation, ChatError> {
        require_id("conversation_id", conversation_id)?;
        self.execute(
            self.http
                .patch(self.url(&format!("/conversations/{conversation_id}")))
                .json(request),
        )
        .await
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ChatError> {
        require_id("conversation_id", conversation_id)?;
        self.execute_discarding(
            self.http
                .delete(self.url(&format!("/conversations/{conversation_id}"))),
        )
        .await
    }

    pub async fn get_messages(
        &self,
        conversation_id: &str,
        query: &MessageQuery,
    ) -> Result<Page<Message>, ChatError> {
        require_id("conversation_id", conversation_id)?;
        let request = self
            .http
            .get(self.url(&format!("/conversations/{conversation_id}/messages")))
            .query(&query.to_pairs());
        self.execute(request).await
    }

    /// Sends a message and waits for the complete reply.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        mut request: SendMessageRequest,
    ) -> Result<SendMessageResponse, ChatError> {
        require_id("conversation_id", conversation_id)?;
        request.stream = false;
        self.execute(
            self.http
                .post(self.messages_url(conversation_id))
                .json(&request),
        )
        .await
    }

    /// Starts a streaming send and returns the raw SSE body.
    ///
    /// Fails with [`ChatError::Api`] on a non-success status. The request is
    /// not bounded by the request timeout.
    pub async fn open_stream(
        &self,
        conversation_id: &str,
        mut request: SendMessageRequest,
    ) -> Result<ByteStream, ChatError> {
        require_id("conversation_id", conversation_id)?;
        request.stream = true;
        debug!(conversation_id, files = request.files.as_ref().map_or(0, Vec::len), "opening message stream");
        let response = self
            .http
            .post(self.messages_url(conversation_id))
            .json(&request)
            .send()
            .await
            .map_err(ChatError::transport)?;
        let response = ensure_success(response).await?;
        if response.content_length() == Some(0) {
            return Err(ChatError::Transport("No response body".into()));
        }
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ChatError::transport)),
        ))
    }

    /// Sends a message and streams the reply into `observer`.
    ///
    /// Errors raised before streaming begins are returned and also reported
    /// once through `observer.on_error`. Failures after that are part of the
    /// returned [`StreamOutcome`].
    pub async fn send_message_stream(
        &self,
        conversation_id: &str,
        request: SendMessageRequest,
        observer: &mut dyn StreamObserver,
        abort: AbortSignal,
    ) -> Result<StreamOutcome, ChatError> {
        let mut opening = abort.clone();
        let opened = tokio::select! {
            biased;
            () = opening.aborted() => {
                debug!(conversation_id, "stream cancelled before the response arrived");
                return Ok(StreamOutcome::Cancelled(None));
            }
            opened = self.open_stream(conversation_id, request) => opened,
        };
        match opened {
            Ok(body) => Ok(drive_stream(conversation_id, body, observer, abort).await),
            Err(err) => {
                observer.on_error(&err);
                Err(err)
            }
        }
    }

    pub async fn upload_file(&self, request: &UploadFileRequest) -> Result<FileAttachment, ChatError> {
        let envelope: FileEnvelope = self
            .execute(self.http.post(self.url("/files")).json(request))
            .await?;
        Ok(envelope.file)
    }

    pub async fn get_file(&self, file_id: &str) -> Result<FileAttachment, ChatError> {
        require_id("file_id", file_id)?;
        let envelope: FileEnvelope = self
            .execute(self.http.get(self.url(&format!("/files/{file_id}"))))
            .await?;
        Ok(envelope.file)
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<(), ChatError> {
        require_id("file_id", file_id)?;
        self.execute_discarding(self.http.delete(self.url(&format!("/files/{file_id}"))))
            .await
    }

    /// URL serving the raw content of an uploaded file.
    pub fn file_content_url(&self, file_id: &str) -> String {
        self.url(&format!("/files/{file_id}/content"))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn messages_url(&self, conversation_id: &str) -> String {
        self.url(&format!("/conversations/{conversation_id}/messages"))
    }

    async fn send(&self, mut request: reqwest::RequestBuilder) -> Result<reqwest::Response, ChatError> {
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(ChatError::transport)?;
        ensure_success(response).await
    }

    async fn execute<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, ChatError> {
        let body = self
            .send(request)
            .await?
            .bytes()
            .await
            .map_err(ChatError::transport)?;
        serde_json::from_slice(&body).map_err(|e| ChatError::Decode(e.to_string()))
    }

    /// Like `execute` for endpoints whose body, possibly empty, is unused.
    async fn execute_discarding(&self, request: reqwest::RequestBuilder) -> Result<(), ChatError> {
        self.send(request)
            .await?
            .bytes()
            .await
            .map_err(ChatError::transport)?;
        Ok(())
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    let message = error_message_from_body(&body);
    debug!(status = status.as_u16(), %message, "agent server request failed");
    Err(ChatError::api(status.as_u16(), message))
}

fn require_id(field: &str, value: &str) -> Result<(), ChatError> {
    if value.trim().is_empty() {
        return Err(ChatError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// JSON content type, then `Authorization`, then caller headers. Caller
/// headers may replace `Authorization` but never the content type.
fn default_headers(config: &ChatConfig) -> Result<HeaderMap, ChatError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(authorization) = config.authorization.as_deref() {
        let value = HeaderValue::from_str(authorization)
            .map_err(|e| ChatError::Config(format!("invalid authorization header: {e}")))?;
        headers.insert(AUTHORIZATION, value);
    }
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ChatError::Config(format!("invalid header name {name:?}: {e}")))?;
        if name == CONTENT_TYPE {
            debug!("ignoring configured content-type header");
            continue;
        }
        let value = HeaderValue::from_str(value)
            .map_err(|e| ChatError::Config(format!("invalid value for header {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
