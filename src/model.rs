use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical persisted record for one uploaded book: metadata, the chapter
/// forest mirroring the TOC nesting, and the image assets copied out of the
/// container at ingest time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookStructure {
    pub id: String,
    pub title: String,
    pub author: String,
    pub metadata: BookMetadata,
    pub chapters: Vec<Chapter>,
    pub images: Vec<ImageAsset>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMetadata {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One TOC node. `content` is `None` until the chapter's text has been
/// extracted; extracted text is never blank, so `Some` always carries real
/// content. `order` increases strictly under pre-order traversal of the whole
/// forest and is not reset per nesting level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub order: u32,
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Chapter>,
}

impl Chapter {
    pub fn is_extracted(&self) -> bool {
        self.content.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAsset {
    /// Manifest id from the source container, reused as-is.
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub local_path: String,
}

/// Listing entry for `GET /api/books`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSummary {
    pub id: String,
    pub title: String,
    pub author: String,
    pub metadata: BookMetadata,
    pub chapter_count: usize,
    #[serde(rename = "uploadDate")]
    pub uploaded_at: DateTime<Utc>,
}

impl BookSummary {
    pub fn from_structure(structure: &BookStructure) -> Self {
        Self {
            id: structure.id.clone(),
            title: structure.title.clone(),
            author: structure.author.clone(),
            metadata: structure.metadata.clone(),
            chapter_count: structure.chapters.len(),
            uploaded_at: structure.uploaded_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub ratio: f64,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeResponse {
    pub summary: String,
    pub original_tokens: u32,
    pub summary_tokens: u32,
    pub actual_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned_by: Option<String>,
}
