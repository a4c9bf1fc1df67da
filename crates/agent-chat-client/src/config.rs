use std::time::Duration;

use crate::errors::ChatError;

/// Default maximum size of a single attachment (10 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
/// Default maximum number of pending attachments per message.
pub const DEFAULT_MAX_FILES: usize = 10;

/// Configuration for talking to an agent server.
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Base URL of the agent server API (for example `http://localhost:3000/api`).
    pub base_url: String,
    /// Agent used when the session has to create a conversation.
    pub agent_id: String,
    /// `Authorization` header value, sent verbatim (for example `Bearer abc`).
    pub authorization: Option<String>,
    /// Extra headers merged into every request.
    ///
    /// A `Content-Type` entry is ignored; requests are always JSON.
    pub headers: Vec<(String, String)>,
    /// Whether replies are streamed over SSE.
    pub streaming: bool,
    /// Timeout for ordinary request/response calls. Streams are not bounded.
    pub request_timeout: Option<Duration>,
    /// TCP connect timeout for every request.
    pub connect_timeout: Duration,
    /// Whether `add_files` accepts attachments at all.
    pub enable_file_upload: bool,
    /// Accepted MIME types or filename patterns (`image/png`, `*.pdf`).
    /// Empty means any type.
    pub allowed_file_types: Vec<String>,
    /// Maximum size of one attachment in bytes.
    pub max_file_size: u64,
    /// Maximum number of pending attachments.
    pub max_files: usize,
}

impl ChatConfig {
    /// Creates a config with defaults for everything but the server and agent.
    pub fn new(base_url: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            agent_id: agent_id.into(),
            authorization: None,
            headers: Vec::new(),
            streaming: true,
            request_timeout: Some(Duration::from_secs(60)),
            connect_timeout: Duration::from_secs(10),
            enable_file_upload: true,
            allowed_file_types: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_files: DEFAULT_MAX_FILES,
        }
    }

    /// Builds a config from `AGENT_CHAT_BASE_URL`, `AGENT_CHAT_AGENT_ID` and
    /// the optional `AGENT_CHAT_AUTHORIZATION`.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ChatError> {
        let base_url = var("AGENT_CHAT_BASE_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(ChatError::Config("missing AGENT_CHAT_BASE_URL".into()));
        }
        let agent_id = var("AGENT_CHAT_AGENT_ID").unwrap_or_default();
        let mut config = Self::new(base_url, agent_id);
        config.authorization = var("AGENT_CHAT_AUTHORIZATION").filter(|v| !v.trim().is_empty());
        config.validate()?;
        Ok(config)
    }

    /// Sets the `Authorization` header value.
    pub fn authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Adds one extra request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Enables or disables SSE streaming.
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Overrides the request/response timeout.
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Restricts attachments to the given MIME types or filename patterns.
    pub fn allowed_file_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_file_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the attachment size and count limits.
    pub fn file_limits(mut self, max_file_size: u64, max_files: usize) -> Self {
        self.max_file_size = max_file_size;
        self.max_files = max_files;
        self
    }

    /// Checks that the config can address a server and an agent.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.base_url.trim().is_empty() {
            return Err(ChatError::Config("base_url must not be empty".into()));
        }
        if self.agent_id.trim().is_empty() {
            return Err(ChatError::Config("agent_id must not be empty".into()));
        }
        Ok(())
    }

    /// Base URL with a single trailing slash removed.
    pub(crate) fn normalized_base_url(&self) -> &str {
        self.base_url.strip_suffix('/').unwrap_or(&self.base_url)
    }
}
