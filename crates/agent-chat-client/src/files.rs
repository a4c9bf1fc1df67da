//! Attachments waiting to be sent with the next message.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::config::ChatConfig;
use crate::errors::ChatError;
use crate::model::{FileAttachment, FilePayload};

/// A file picked by the caller, with its bytes in memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            content: content.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// An accepted attachment queued for the next send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingFile {
    pub attachment: FileAttachment,
    content: Vec<u8>,
}

impl PendingFile {
    fn accept(file: LocalFile) -> Self {
        Self {
            attachment: FileAttachment {
                id: uuid::Uuid::new_v4().to_string(),
                size: file.size(),
                name: file.name,
                mime_type: file.mime_type,
                url: None,
                storage_key: None,
            },
            content: file.content,
        }
    }

    pub fn id(&self) -> &str {
        &self.attachment.id
    }

    /// Wire form with base64 content.
    pub fn to_payload(&self) -> FilePayload {
        FilePayload {
            name: self.attachment.name.clone(),
            content: STANDARD.encode(&self.content),
            mime_type: self.attachment.mime_type.clone(),
        }
    }
}

/// Admission rules for new attachments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilePolicy {
    pub enabled: bool,
    pub allowed_types: Vec<String>,
    pub max_file_size: u64,
    pub max_files: usize,
}

impl From<&ChatConfig> for FilePolicy {
    fn from(config: &ChatConfig) -> Self {
        Self {
            enabled: config.enable_file_upload,
            allowed_types: config.allowed_file_types.clone(),
            max_file_size: config.max_file_size,
            max_files: config.max_files,
        }
    }
}

impl FilePolicy {
    /// Splits `files` into accepted attachments and one error per rejection.
    ///
    /// Oversized and disallowed files are skipped; reaching the count limit
    /// stops admission for the rest of the batch.
    pub fn admit(&self, already_pending: usize, files: Vec<LocalFile>) -> (Vec<PendingFile>, Vec<ChatError>) {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        if !self.enabled {
            debug!(files = files.len(), "file upload disabled, ignoring files");
            return (accepted, rejected);
        }
        for file in files {
            if already_pending + accepted.len() >= self.max_files {
                rejected.push(ChatError::Validation(format!(
                    "Maximum {} files allowed",
                    self.max_files
                )));
                break;
            }
            if file.size() > self.max_file_size {
                rejected.push(ChatError::Validation(format!(
                    "File {} exceeds maximum size",
                    file.name
                )));
                continue;
            }
            if !self.type_allowed(&file) {
                rejected.push(ChatError::Validation(format!(
                    "File type {} not allowed",
                    file.mime_type
                )));
                continue;
            }
            accepted.push(PendingFile::accept(file));
        }
        (accepted, rejected)
    }

    fn type_allowed(&self, file: &LocalFile) -> bool {
        self.allowed_types.is_empty()
            || self
                .allowed_types
                .iter()
                .any(|pattern| file.mime_type == *pattern || file.name.ends_with(&pattern.replacen('*', "", 1)))
    }
}
