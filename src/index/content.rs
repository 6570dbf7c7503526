use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::chat::Document;
use crate::error::{RagrouteError, Result};
use crate::retrieval::TextNode;

pub const DB_DOCUMENT_ID_KEY: &str = "db_document_id";

/// Turns a selected document into ordered page nodes.
#[async_trait]
pub trait DocumentContentSource: Send + Sync {
    async fn fetch_and_parse(&self, document: &Document) -> Result<Vec<TextNode>>;
}

/// Reads pre-extracted document text from a local asset directory.
///
/// The file is `<asset_dir>/<file name of the url>` with its extension
/// replaced by `.txt`; form feeds (`\x0c`) separate pages.
#[derive(Debug, Clone)]
pub struct LocalFileContentSource {
    asset_dir: PathBuf,
}

impl LocalFileContentSource {
    pub fn new<P: AsRef<Path>>(asset_dir: P) -> Self {
        Self {
            asset_dir: asset_dir.as_ref().to_path_buf(),
        }
    }

    fn text_path(&self, document: &Document) -> PathBuf {
        self.asset_dir.join(document.file_name()).with_extension("txt")
    }
}

#[async_trait]
impl DocumentContentSource for LocalFileContentSource {
    async fn fetch_and_parse(&self, document: &Document) -> Result<Vec<TextNode>> {
        let path = self.text_path(document);
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            RagrouteError::ContentFetch(format!("{} ({}): {}", document.id, path.display(), e))
        })?;

        let mut pages: Vec<&str> = raw.split('\x0c').collect();
        while pages.last().is_some_and(|page| page.trim().is_empty()) {
            pages.pop();
        }
        let total_pages = pages.len();

        let nodes: Vec<TextNode> = pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let page_number = i + 1;
                TextNode::new(format!("{}:page:{}", document.id, page_number), text.trim())
                    .with_metadata(DB_DOCUMENT_ID_KEY, document.id.as_str())
                    .with_metadata("total_pages", total_pages)
                    .with_metadata("file_path", document.url.as_str())
                    .with_metadata("file_name", document.file_name())
                    .with_metadata("source", page_number.to_string())
                    .with_metadata("page_label", page_number)
            })
            .collect();

        log::info!("Read {} pages for document {}", nodes.len(), document.id);
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_pages_and_metadata() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("acme-10k.txt"),
            "Page one text.\x0cPage two mentions SME LENDING.\x0c\n",
        )
        .unwrap();

        let source = LocalFileContentSource::new(temp_dir.path());
        let document = Document::new("doc-1", "https://assets.example.com/acme-10k.pdf");
        let nodes = source.fetch_and_parse(&document).await.unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].text, "Page two mentions SME LENDING.");
        assert_eq!(nodes[1].id, "doc-1:page:2");
        assert_eq!(nodes[1].metadata["page_label"], 2);
        assert_eq!(nodes[1].metadata["source"], "2");
        assert_eq!(nodes[0].metadata["total_pages"], 2);
        assert_eq!(nodes[0].metadata[DB_DOCUMENT_ID_KEY], "doc-1");
        assert_eq!(nodes[0].metadata["file_name"], "acme-10k.pdf");
    }

    #[tokio::test]
    async fn test_missing_file_is_content_fetch_error() {
        let temp_dir = TempDir::new().unwrap();
        let source = LocalFileContentSource::new(temp_dir.path());
        let err = source
            .fetch_and_parse(&Document::new("doc-x", "missing.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagrouteError::ContentFetch(_)));
    }
}
