//! Conversation and document transfer objects handed in by the persistence layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecDocumentType {
    #[serde(rename = "10-K")]
    TenK,
    #[serde(rename = "10-Q")]
    TenQ,
}

impl SecDocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            SecDocumentType::TenK => "10-K",
            SecDocumentType::TenQ => "10-Q",
        }
    }
}

/// Filing metadata attached to SEC documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecDocumentMetadata {
    pub company_name: String,
    pub company_ticker: String,
    pub doc_type: SecDocumentType,
    pub year: i32,
    #[serde(default)]
    pub quarter: Option<u8>,
}

/// A document the user selected for the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable external id; also the index id and the tool name.
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub sec_document: Option<SecDocumentMetadata>,
}

impl Document {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            sec_document: None,
        }
    }

    /// Last path segment of the url.
    pub fn file_name(&self) -> &str {
        Path::new(&self.url)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.url)
    }

    /// `"{company} ({ticker}) {doc_type} ({year}[ Qn])"`, or the file name
    /// when the document has no filing metadata.
    pub fn title(&self) -> String {
        match &self.sec_document {
            Some(sec) => {
                let period = match sec.quarter {
                    Some(quarter) => format!("{} Q{}", sec.year, quarter),
                    None => sec.year.to_string(),
                };
                format!(
                    "{} ({}) {} ({})",
                    sec.company_name,
                    sec.company_ticker,
                    sec.doc_type.as_str(),
                    period
                )
            }
            None => self.file_name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>, status: MessageStatus, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            status,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub documents: Vec<Document>,
}

impl Conversation {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            documents,
        }
    }
}
