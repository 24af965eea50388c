//! Loading reference documents into the retrieval store as lore.

use super::{RetrievalError, RetrievalStore, SourceTag};
use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// File extensions picked up by [`LoreLibrary::ingest_dir`].
pub const LORE_EXTENSIONS: &[&str] = &["txt", "md"];

/// Summary of an ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub documents: usize,
    pub chunks: usize,
}

/// Writes pre-extracted document text into a store, tagged as lore.
#[derive(Clone)]
pub struct LoreLibrary {
    store: Arc<dyn RetrievalStore>,
}

impl LoreLibrary {
    pub fn new(store: Arc<dyn RetrievalStore>) -> Self {
        Self { store }
    }

    /// Store the pages of one document. Each page is chunked separately.
    pub async fn ingest_text(
        &self,
        name: &str,
        pages: &[String],
    ) -> Result<IngestSummary, RetrievalError> {
        let mut chunks = 0;
        for (i, page) in pages.iter().enumerate() {
            chunks += self
                .store
                .store(page, SourceTag::lore(format!("{name} p.{}", i + 1)))
                .await?;
        }

        info!(document = name, pages = pages.len(), chunks, "ingested lore");
        Ok(IngestSummary {
            documents: 1,
            chunks,
        })
    }

    /// Store every `.txt` and `.md` file directly inside `dir`, one page per file.
    pub async fn ingest_dir(&self, dir: impl AsRef<Path>) -> Result<IngestSummary, RetrievalError> {
        let mut paths: Vec<PathBuf> = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.as_ref()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_lore = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| LORE_EXTENSIONS.iter().any(|l| ext.eq_ignore_ascii_case(l)));
            if is_lore && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let contents = try_join_all(paths.iter().map(tokio::fs::read_to_string)).await?;

        let mut summary = IngestSummary::default();
        for (path, text) in paths.iter().zip(contents) {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let one = self.ingest_text(&name, &[text]).await?;
            summary.documents += one.documents;
            summary.chunks += one.chunks;
        }

        Ok(summary)
    }
}
